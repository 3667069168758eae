//! 知识索引边界
//!
//! RetrievalTool 只依赖 KnowledgeIndex trait；向量库、嵌入模型等实现细节不在本 crate 内。
//! KeywordIndex 是一个按关键词覆盖率打分的内存实现，便于无外部依赖地跑通检索流程。

mod keyword;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use keyword::KeywordIndex;

/// 元数据过滤条件（精确匹配）；BTreeMap 保证日志与输出顺序稳定
pub type SearchFilters = BTreeMap<String, String>;

/// 单条检索结果
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub text: String,
    /// 相似度，[0, 1]
    pub score: f32,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Knowledge index unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to load documents: {0}")]
    Load(String),
}

/// 知识索引：按查询、过滤条件与 top_k 返回按分数降序的结果
#[async_trait]
pub trait KnowledgeIndex: Send + Sync {
    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, IndexError>;
}
