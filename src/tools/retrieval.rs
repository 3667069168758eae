//! 检索工具：查询知识索引并附带可引用的来源信息
//!
//! 每条结果带 `[n]` 编号、页码与文件名，供模型在回答中以 [n] 标注引用。
//! 带过滤条件（year / source）检索为空时，放宽为无过滤再检索一次；仍为空则返回明确的
//! "未找到" 说明，而不是空字符串。

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::core::ToolError;
use crate::knowledge::{KnowledgeIndex, SearchFilters, SearchHit};
use crate::tools::schema::{parameters_for, parse_args, preview};
use crate::tools::Tool;

pub const RETRIEVAL_TOOL_NAME: &str = "search_report";

#[derive(Debug, Deserialize, JsonSchema)]
struct RetrievalArgs {
    /// Search keywords or a question, e.g. "total net sales", "gross margin", "cash flow".
    query: String,
    /// Optional fiscal year to restrict the search to, e.g. 2024. Omit to search all years.
    #[serde(default)]
    year: Option<i64>,
    /// Optional document file name to restrict the search to.
    #[serde(default)]
    source: Option<String>,
    /// Optional number of passages to return.
    #[serde(default)]
    top_k: Option<u32>,
}

/// 检索参数（来自配置）
#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    pub top_k: usize,
    pub min_score: f32,
    /// 单条结果正文最多保留的字符数
    pub max_content_chars: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: 3,
            min_score: 0.0,
            max_content_chars: 500,
        }
    }
}

pub struct RetrievalTool {
    index: Arc<dyn KnowledgeIndex>,
    settings: RetrievalSettings,
}

impl RetrievalTool {
    pub fn new(index: Arc<dyn KnowledgeIndex>) -> Self {
        Self {
            index,
            settings: RetrievalSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: RetrievalSettings) -> Self {
        self.settings = settings;
        self
    }

    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, ToolError> {
        let hits = self
            .index
            .search(query, filters, top_k)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        Ok(hits
            .into_iter()
            .filter(|h| h.score >= self.settings.min_score)
            .take(top_k)
            .collect())
    }

    fn format_hits(&self, hits: &[SearchHit]) -> String {
        let mut out = vec![format!("Found {} relevant passage(s):", hits.len()), String::new()];
        for (i, hit) in hits.iter().enumerate() {
            let page = hit.metadata.get("page").map(String::as_str).unwrap_or("unknown");
            out.push(format!("[{}] Source: page {}", i + 1, page));
            if let Some(source) = hit.metadata.get("source").filter(|s| !s.is_empty()) {
                out.push(format!("    File: {}", source));
            }
            out.push(format!("    Score: {:.2}", hit.score));
            let text = hit.text.split_whitespace().collect::<Vec<_>>().join(" ");
            out.push(format!(
                "    Content: {}",
                preview(&text, self.settings.max_content_chars)
            ));
            out.push(String::new());
        }
        out.join("\n").trim_end().to_string()
    }
}

fn describe_filters(filters: &SearchFilters) -> String {
    filters
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[async_trait]
impl Tool for RetrievalTool {
    fn name(&self) -> &str {
        RETRIEVAL_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Search the loaded financial reports for passages relevant to a query (revenue, profit, \
         margins, assets, liabilities, cash flow, segment results). Returns numbered passages with \
         page and file provenance; cite them in the answer as [1], [2]. Pass `year` to restrict \
         the search to one fiscal year."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<RetrievalArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: RetrievalArgs = parse_args(args)?;
        let query = args.query.trim();
        if query.is_empty() {
            return Err(ToolError::InvalidArguments("query must not be empty".into()));
        }
        let top_k = args
            .top_k
            .map(|k| k as usize)
            .filter(|&k| k > 0)
            .unwrap_or(self.settings.top_k);

        let mut filters = SearchFilters::new();
        if let Some(year) = args.year {
            filters.insert("year".into(), year.to_string());
        }
        if let Some(source) = args.source.filter(|s| !s.trim().is_empty()) {
            filters.insert("source".into(), source.trim().to_string());
        }

        let mut hits = self.search(query, &filters, top_k).await?;
        let mut note = None;
        if hits.is_empty() && !filters.is_empty() {
            tracing::debug!(query = %query, filters = %describe_filters(&filters), "no filtered hits, relaxing filters");
            hits = self.search(query, &SearchFilters::new(), top_k).await?;
            if !hits.is_empty() {
                note = Some(format!(
                    "Note: nothing matched the filters ({}); showing results from all documents instead.",
                    describe_filters(&filters)
                ));
            }
        }

        if hits.is_empty() {
            return Ok(format!(
                "No relevant information found for '{}'. Try different keywords.",
                query
            ));
        }

        let body = self.format_hits(&hits);
        Ok(match note {
            Some(note) => format!("{}\n\n{}", note, body),
            None => body,
        })
    }
}
