//! 内存关键词索引

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use super::{IndexError, KnowledgeIndex, SearchFilters, SearchHit};
use crate::memory::tokenizer;

/// 索引文件中的一条文档：{"text": "...", "metadata": {"page": "1", "source": "FY25.pdf"}}
#[derive(Debug, Deserialize)]
struct DocumentRecord {
    text: String,
    #[serde(default)]
    metadata: BTreeMap<String, serde_json::Value>,
}

struct Entry {
    text: String,
    tokens: HashSet<String>,
    metadata: BTreeMap<String, String>,
}

/// 按「查询词覆盖率」打分的内存索引；过滤条件对元数据做精确匹配
#[derive(Default)]
pub struct KeywordIndex {
    entries: Vec<Entry>,
}

impl KeywordIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, text: impl Into<String>, metadata: BTreeMap<String, String>) {
        let text = text.into();
        let tokens = tokenizer::tokenize_to_set(&text);
        self.entries.push(Entry {
            text,
            tokens,
            metadata,
        });
    }

    /// 从 JSON 数组文件加载文档；元数据中的数字/布尔值统一转为字符串
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, IndexError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .map_err(|e| IndexError::Load(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&data)
    }

    pub fn from_json_str(data: &str) -> Result<Self, IndexError> {
        let records: Vec<DocumentRecord> =
            serde_json::from_str(data).map_err(|e| IndexError::Load(e.to_string()))?;
        let mut index = Self::new();
        for record in records {
            let metadata = record
                .metadata
                .into_iter()
                .map(|(k, v)| {
                    let v = match v {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    (k, v)
                })
                .collect();
            index.add(record.text, metadata);
        }
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn matches_filters(metadata: &BTreeMap<String, String>, filters: &SearchFilters) -> bool {
    filters
        .iter()
        .all(|(k, v)| metadata.get(k).is_some_and(|m| m == v))
}

#[async_trait]
impl KnowledgeIndex for KeywordIndex {
    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, IndexError> {
        let query_tokens = tokenizer::tokenize_to_set(query);
        let mut scored: Vec<(f32, &Entry)> = self
            .entries
            .iter()
            .filter(|e| matches_filters(&e.metadata, filters))
            .map(|e| (tokenizer::query_coverage(&query_tokens, &e.tokens), e))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        // 稳定排序：同分时保持插入顺序
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, e)| SearchHit {
                text: e.text.clone(),
                score,
                metadata: e.metadata.clone(),
            })
            .collect())
    }
}
