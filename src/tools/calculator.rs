//! 计算器工具：受限算术表达式求值
//!
//! 只接受数字、+ - * / % **、一元正负号与括号，递归下降解析，不执行任何其他代码。
//! 优先级（低到高）：加减 < 乘除取模 < 一元正负 < 幂；幂右结合，-2**2 == -4。
//! % 为向下取整取模，结果符号与除数一致。

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::core::ToolError;
use crate::tools::schema::{parameters_for, parse_args};
use crate::tools::Tool;

pub const CALCULATOR_TOOL_NAME: &str = "calculator";

const MAX_EXPRESSION_CHARS: usize = 512;
const MAX_DEPTH: usize = 64;

#[derive(Debug, Deserialize, JsonSchema)]
struct CalculatorArgs {
    /// Arithmetic expression to evaluate. Supports + - * / % ** and parentheses, e.g. "100 * 0.15" or "(383285 - 394328) / 394328 * 100".
    expression: String,
}

/// 计算器：纯函数，相同输入总是得到相同输出
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        CALCULATOR_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression exactly. Use it for every numeric calculation \
         (sums, differences, percentages, growth rates, financial ratios) instead of computing \
         in your head. Example: '(200 - 150) / 150 * 100' computes a growth rate."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<CalculatorArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: CalculatorArgs = parse_args(args)?;
        let value = evaluate(&args.expression).map_err(|e| ToolError::Execution(e.to_string()))?;
        Ok(format_number(value))
    }
}

/// 表达式求值错误
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CalcError {
    #[error("expression is empty")]
    Empty,
    #[error("expression is longer than {} characters", MAX_EXPRESSION_CHARS)]
    TooLong,
    #[error("unsupported character '{0}'; only digits, + - * / % ** ( ) are allowed")]
    InvalidChar(char),
    #[error("malformed number '{0}'")]
    BadNumber(String),
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("expression nests deeper than {} levels", MAX_DEPTH)]
    TooDeep,
    #[error("division by zero")]
    DivisionByZero,
    #[error("result is not a finite number")]
    NotFinite,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Num(f64),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Pow,
    LParen,
    RParen,
}

fn lex(input: &str) -> Result<Vec<Token>, CalcError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // 科学计数法：1e5、2.5E-3
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| CalcError::BadNumber(text.clone()))?;
                tokens.push(Token::Num(n));
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                if chars.get(i + 1) == Some(&'*') {
                    tokens.push(Token::Pow);
                    i += 2;
                } else {
                    tokens.push(Token::Star);
                    i += 1;
                }
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            other => return Err(CalcError::InvalidChar(other)),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.peek();
        self.pos += 1;
        t
    }

    fn enter(&mut self) -> Result<(), CalcError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(CalcError::TooDeep);
        }
        Ok(())
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<f64, CalcError> {
        let mut acc = self.term()?;
        while let Some(op @ (Token::Plus | Token::Minus)) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            acc = if op == Token::Plus { acc + rhs } else { acc - rhs };
        }
        Ok(acc)
    }

    // term := unary (('*' | '/' | '%') unary)*
    fn term(&mut self) -> Result<f64, CalcError> {
        let mut acc = self.unary()?;
        while let Some(op @ (Token::Star | Token::Slash | Token::Percent)) = self.peek() {
            self.pos += 1;
            let rhs = self.unary()?;
            acc = match op {
                Token::Star => acc * rhs,
                Token::Slash => {
                    if rhs == 0.0 {
                        return Err(CalcError::DivisionByZero);
                    }
                    acc / rhs
                }
                _ => {
                    if rhs == 0.0 {
                        return Err(CalcError::DivisionByZero);
                    }
                    let r = acc % rhs;
                    if r != 0.0 && (r < 0.0) != (rhs < 0.0) {
                        r + rhs
                    } else {
                        r
                    }
                }
            };
        }
        Ok(acc)
    }

    // unary := ('+' | '-') unary | power
    fn unary(&mut self) -> Result<f64, CalcError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                self.enter()?;
                let v = self.unary()?;
                self.depth -= 1;
                Ok(-v)
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.enter()?;
                let v = self.unary()?;
                self.depth -= 1;
                Ok(v)
            }
            _ => self.power(),
        }
    }

    // power := primary ('**' unary)?
    fn power(&mut self) -> Result<f64, CalcError> {
        let base = self.primary()?;
        if self.peek() == Some(Token::Pow) {
            self.pos += 1;
            self.enter()?;
            let exp = self.unary()?;
            self.depth -= 1;
            if base == 0.0 && exp < 0.0 {
                return Err(CalcError::DivisionByZero);
            }
            return Ok(base.powf(exp));
        }
        Ok(base)
    }

    // primary := number | '(' expr ')'
    fn primary(&mut self) -> Result<f64, CalcError> {
        match self.next() {
            Some(Token::Num(n)) => Ok(n),
            Some(Token::LParen) => {
                self.enter()?;
                let v = self.expr()?;
                self.depth -= 1;
                match self.next() {
                    Some(Token::RParen) => Ok(v),
                    _ => Err(CalcError::Syntax("missing closing parenthesis".into())),
                }
            }
            Some(t) => Err(CalcError::Syntax(format!("unexpected token {}", describe(t)))),
            None => Err(CalcError::Syntax("unexpected end of expression".into())),
        }
    }
}

fn describe(t: Token) -> &'static str {
    match t {
        Token::Num(_) => "number",
        Token::Plus => "'+'",
        Token::Minus => "'-'",
        Token::Star => "'*'",
        Token::Slash => "'/'",
        Token::Percent => "'%'",
        Token::Pow => "'**'",
        Token::LParen => "'('",
        Token::RParen => "')'",
    }
}

/// 对表达式求值
pub fn evaluate(expression: &str) -> Result<f64, CalcError> {
    let expression = expression.trim();
    if expression.is_empty() {
        return Err(CalcError::Empty);
    }
    if expression.chars().count() > MAX_EXPRESSION_CHARS {
        return Err(CalcError::TooLong);
    }
    let tokens = lex(expression)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if let Some(t) = parser.peek() {
        return Err(CalcError::Syntax(format!("unexpected token {}", describe(t))));
    }
    if !value.is_finite() {
        return Err(CalcError::NotFinite);
    }
    Ok(value)
}

/// 整数不带小数点，否则最多保留 4 位小数并去掉末尾 0
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        return format!("{}", value as i64);
    }
    let s = format!("{:.4}", value);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s == "-0" {
        "0".to_string()
    } else {
        s.to_string()
    }
}
