//! 分词：供关键词检索索引打分使用
//!
//! 含 CJK 字符时用 jieba 搜索引擎模式分词，其余按空白切分；统一小写并去掉首尾标点。

use std::collections::HashSet;
use std::sync::OnceLock;

use jieba_rs::Jieba;

static JIEBA: OnceLock<Jieba> = OnceLock::new();

fn jieba() -> &'static Jieba {
    JIEBA.get_or_init(Jieba::new)
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}' |
        '\u{3400}'..='\u{4DBF}' |
        '\u{F900}'..='\u{FAFF}' |
        '\u{3040}'..='\u{309F}' |
        '\u{30A0}'..='\u{30FF}'
    )
}

pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(is_cjk)
}

fn normalize(token: &str) -> Option<String> {
    let t = token
        .trim_matches(|c: char| !c.is_alphanumeric() && !is_cjk(c))
        .to_lowercase();
    let keep = t.chars().count() > 1 || t.chars().next().is_some_and(|c| is_cjk(c) || c.is_ascii_digit());
    keep.then_some(t)
}

pub fn tokenize(text: &str) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if contains_cjk(text) {
        jieba()
            .cut_for_search(text, true)
            .into_iter()
            .filter_map(normalize)
            .collect()
    } else {
        text.split_whitespace().filter_map(normalize).collect()
    }
}

pub fn tokenize_to_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

/// 查询词在文档词集合中的覆盖率，取值 [0, 1]
pub fn query_coverage(query: &HashSet<String>, doc: &HashSet<String>) -> f32 {
    if query.is_empty() || doc.is_empty() {
        return 0.0;
    }
    query.intersection(doc).count() as f32 / query.len() as f32
}
