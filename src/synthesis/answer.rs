//! 答案格式化：解析 [n] 引用并附上被引用的来源
//!
//! 来源取自检索工具的输出（`[n] Source: page ...` 块）；最终输出只列出答案中真正引用过的来源。

use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

static CITATION_RE: OnceLock<Regex> = OnceLock::new();
static SOURCE_HEADER_RE: OnceLock<Regex> = OnceLock::new();
static FILE_RE: OnceLock<Regex> = OnceLock::new();
static SCORE_RE: OnceLock<Regex> = OnceLock::new();
static CONTENT_RE: OnceLock<Regex> = OnceLock::new();

/// 一条可被引用的来源
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Source {
    /// 引用编号，对应答案中的 [n]
    pub index: usize,
    pub page: String,
    pub file: String,
    pub text: String,
    pub score: f32,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] page {}", self.index, self.page)?;
        if !self.file.is_empty() {
            write!(f, " - {}", self.file)?;
        }
        Ok(())
    }
}

/// 格式化后的答案：正文 + 全部来源 + 正文中引用到的编号（首次出现顺序）
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FormattedAnswer {
    pub content: String,
    pub sources: Vec<Source>,
    pub cited_indices: Vec<usize>,
}

impl FormattedAnswer {
    /// 被引用的来源（按来源编号顺序）
    pub fn cited_sources(&self) -> impl Iterator<Item = &Source> {
        self.sources
            .iter()
            .filter(|s| self.cited_indices.contains(&s.index))
    }

    fn has_citations(&self) -> bool {
        self.cited_sources().next().is_some()
    }

    pub fn to_plain(&self) -> String {
        let mut lines = vec![self.content.clone()];
        if self.has_citations() {
            lines.push(String::new());
            lines.push("---".into());
            lines.push("Sources:".into());
            lines.extend(self.cited_sources().map(Source::to_string));
        }
        lines.join("\n")
    }

    pub fn to_markdown(&self) -> String {
        let mut lines = vec![self.content.clone()];
        if self.has_citations() {
            lines.push(String::new());
            lines.push("---".into());
            lines.push(String::new());
            lines.push("**Sources:**".into());
            lines.extend(self.cited_sources().map(|s| format!("- {}", s)));
        }
        lines.join("\n")
    }
}

impl fmt::Display for FormattedAnswer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_plain())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AnswerFormatter;

impl AnswerFormatter {
    pub fn new() -> Self {
        Self
    }

    /// 解析检索工具输出中的来源块
    pub fn parse_sources(&self, retrieval_output: &str) -> Vec<Source> {
        let header = SOURCE_HEADER_RE
            .get_or_init(|| Regex::new(r"(?m)^\[(\d+)\] Source: page (.*)$").unwrap());
        let headers: Vec<_> = header.captures_iter(retrieval_output).collect();

        let mut sources = Vec::with_capacity(headers.len());
        for (i, caps) in headers.iter().enumerate() {
            let Ok(index) = caps[1].parse::<usize>() else {
                continue;
            };
            let start = caps.get(0).map_or(0, |m| m.end());
            let end = headers
                .get(i + 1)
                .and_then(|next| next.get(0))
                .map_or(retrieval_output.len(), |m| m.start());
            let block = &retrieval_output[start..end];

            sources.push(Source {
                index,
                page: caps[2].trim().to_string(),
                file: extract_field(block, &FILE_RE, r"File:\s*(.+)").unwrap_or_default(),
                text: extract_field(block, &CONTENT_RE, r"Content:\s*(.+)").unwrap_or_default(),
                score: extract_field(block, &SCORE_RE, r"Score:\s*([\d.]+)")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0.0),
            });
        }
        sources
    }

    /// 答案中的 [n] 引用编号，去重并保持首次出现顺序
    pub fn extract_citations(&self, answer: &str) -> Vec<usize> {
        let re = CITATION_RE.get_or_init(|| Regex::new(r"\[(\d+)\]").unwrap());
        let mut seen = HashSet::new();
        re.captures_iter(answer)
            .filter_map(|c| c[1].parse::<usize>().ok())
            .filter(|idx| seen.insert(*idx))
            .collect()
    }

    pub fn format(&self, answer: &str, sources: Vec<Source>) -> FormattedAnswer {
        FormattedAnswer {
            content: answer.to_string(),
            cited_indices: self.extract_citations(answer),
            sources,
        }
    }

    /// 直接从检索输出格式化
    pub fn format_with_retrieval(&self, answer: &str, retrieval_output: &str) -> FormattedAnswer {
        self.format(answer, self.parse_sources(retrieval_output))
    }
}

fn extract_field(block: &str, cell: &OnceLock<Regex>, pattern: &str) -> Option<String> {
    let re = cell.get_or_init(|| Regex::new(pattern).unwrap());
    re.captures(block)
        .map(|c| c[1].trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RETRIEVAL_OUTPUT: &str = "Found 3 relevant passage(s):

[1] Source: page 1
    File: FY25_Q4_Consolidated_Financial_Statements.pdf
    Score: 0.38
    Content: Apple Inc. Total net sales 416,161 million

[2] Source: page 4
    File: FY25_Q4_Consolidated_Financial_Statements.pdf
    Score: 0.31
    Content: Income before provision for income taxes

[3] Source: page 3
    Score: 0.31
    Content: Cash, cash equivalents, and restricted cash";

    #[test]
    fn test_parse_sources() {
        let sources = AnswerFormatter::new().parse_sources(RETRIEVAL_OUTPUT);
        assert_eq!(sources.len(), 3);
        assert_eq!(sources[0].index, 1);
        assert_eq!(sources[0].page, "1");
        assert_eq!(sources[0].file, "FY25_Q4_Consolidated_Financial_Statements.pdf");
        assert!((sources[0].score - 0.38).abs() < 1e-6);
        assert!(sources[0].text.starts_with("Apple Inc."));
        assert_eq!(sources[2].page, "3");
        assert_eq!(sources[2].file, "");
    }

    #[test]
    fn test_parse_sources_ignores_other_text() {
        let f = AnswerFormatter::new();
        assert!(f.parse_sources("No relevant information found for 'x'.").is_empty());
        assert!(f.parse_sources("15").is_empty());
    }

    #[test]
    fn test_extract_citations() {
        let f = AnswerFormatter::new();
        assert_eq!(f.extract_citations("Revenue [1] and profit [2] grew [1]"), vec![1, 2]);
        assert_eq!(f.extract_citations("from [3] and [1], not [2]"), vec![3, 1, 2]);
        assert!(f.extract_citations("no citations here").is_empty());
    }

    #[test]
    fn test_plain_and_markdown_list_only_cited_sources() {
        let f = AnswerFormatter::new();
        let answer = f.format_with_retrieval(
            "Total net sales were **416,161 million USD** [1], cash is listed in [3].",
            RETRIEVAL_OUTPUT,
        );
        let plain = answer.to_plain();
        assert!(plain.ends_with(
            "---\nSources:\n[1] page 1 - FY25_Q4_Consolidated_Financial_Statements.pdf\n[3] page 3"
        ));
        assert!(!plain.contains("[2] page 4"));

        let md = answer.to_markdown();
        assert!(md.contains("**Sources:**\n- [1] page 1"));
        assert_eq!(answer.to_string(), plain);
    }

    #[test]
    fn test_uncited_answer_is_unchanged() {
        let f = AnswerFormatter::new();
        let answer = f.format_with_retrieval("15", RETRIEVAL_OUTPUT);
        assert_eq!(answer.to_plain(), "15");
        assert_eq!(answer.to_markdown(), "15");

        let answer = f.format("see [9]", Vec::new());
        assert_eq!(answer.to_plain(), "see [9]");
    }
}
