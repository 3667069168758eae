//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SAGE__*` 覆盖（双下划线表示嵌套，如 `SAGE__LLM__PROVIDER=openai`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::react::{LoopConfig, DEFAULT_MAX_ITERATIONS};
use crate::tools::RetrievalSettings;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub session: SessionSection,
}

/// [agent] 段：循环上限、整体预算与启用的工具
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// 单次循环的墙钟预算（秒），未设置则不限
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub parallel_tool_calls: bool,
    /// 注册的工具名，顺序即清单顺序
    #[serde(default = "default_tools")]
    pub tools: Vec<String>,
    /// 自定义 system prompt 文件；未设置时使用内置提示词
    pub system_prompt_path: Option<PathBuf>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            timeout_secs: None,
            parallel_tool_calls: false,
            tools: default_tools(),
            system_prompt_path: None,
        }
    }
}

impl AgentSection {
    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            max_iterations: self.max_iterations,
            time_budget: self.timeout_secs.map(Duration::from_secs),
            parallel_tool_calls: self.parallel_tool_calls,
        }
    }
}

fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}

fn default_tools() -> Vec<String> {
    vec!["calculator".into(), "search_report".into()]
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai / deepseek
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    pub temperature: Option<f32>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            temperature: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [tools] 段：单次工具调用超时与检索参数
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default)]
    pub retrieval: RetrievalSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            retrieval: RetrievalSection::default(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

/// [tools.retrieval] 段
#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalSection {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub min_score: f32,
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
    /// 文档 JSON 文件（[{"text": ..., "metadata": {...}}]）；未设置时检索工具面对空索引
    pub index_path: Option<PathBuf>,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: 0.0,
            max_content_chars: default_max_content_chars(),
            index_path: None,
        }
    }
}

impl RetrievalSection {
    pub fn settings(&self) -> RetrievalSettings {
        RetrievalSettings {
            top_k: self.top_k.max(1),
            min_score: self.min_score,
            max_content_chars: self.max_content_chars,
        }
    }
}

fn default_top_k() -> usize {
    3
}

fn default_max_content_chars() -> usize {
    500
}

/// [session] 段：会话文件（JSON），未设置则不持久化
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SessionSection {
    pub path: Option<PathBuf>,
}

/// 从 config 目录加载配置，环境变量 SAGE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 SAGE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SAGE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.agent.max_iterations, 10);
        assert_eq!(cfg.agent.tools, vec!["calculator", "search_report"]);
        assert_eq!(cfg.llm.model, "gpt-4o-mini");
        assert_eq!(cfg.llm.timeouts.request, 60);
        assert_eq!(cfg.tools.tool_timeout_secs, 30);
        assert_eq!(cfg.tools.retrieval.top_k, 3);
        assert!(cfg.session.path.is_none());
        assert!(cfg.agent.loop_config().time_budget.is_none());
    }

    #[test]
    fn test_explicit_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            r#"
[agent]
max_iterations = 4
timeout_secs = 90
parallel_tool_calls = true
tools = ["calculator"]

[llm]
provider = "deepseek"
model = "deepseek-chat"

[tools.retrieval]
top_k = 5
min_score = 0.2
"#,
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.agent.max_iterations, 4);
        assert_eq!(cfg.agent.tools, vec!["calculator"]);
        let lc = cfg.agent.loop_config();
        assert_eq!(lc.time_budget, Some(Duration::from_secs(90)));
        assert!(lc.parallel_tool_calls);
        assert_eq!(cfg.llm.provider, "deepseek");
        assert_eq!(cfg.tools.retrieval.settings().top_k, 5);
        assert!((cfg.tools.retrieval.min_score - 0.2).abs() < 1e-6);
    }
}
