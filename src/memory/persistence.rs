//! 会话持久化
//!
//! 将 ConversationState 写入/从 JSON 文件加载，用于跨进程恢复多轮对话（可选使用）。
//! 加载经 ConversationState::from_turns 重放，损坏或不一致的会话文件会被拒绝。

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::memory::{ConversationState, Turn};

/// 单文件 JSON 持久化
#[derive(Debug)]
pub struct ConversationPersistence {
    path: PathBuf,
}

#[derive(Serialize, Deserialize)]
struct SessionFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    system_prompt: Option<String>,
    turns: Vec<Turn>,
    /// RFC 3339 写入时间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    saved_at: Option<String>,
}

impl ConversationPersistence {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 从 JSON 文件加载；文件不存在时返回 None
    pub fn load(&self) -> anyhow::Result<Option<ConversationState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&self.path)
            .with_context(|| format!("read session {}", self.path.display()))?;
        let file: SessionFile = serde_json::from_str(&data)?;
        tracing::debug!(
            path = %self.path.display(),
            saved_at = file.saved_at.as_deref().unwrap_or("unknown"),
            turns = file.turns.len(),
            "loading session"
        );
        let state = ConversationState::from_turns(file.system_prompt, file.turns)?;
        Ok(Some(state))
    }

    /// 写入 JSON 文件；父目录不存在时自动创建
    pub fn save(&self, state: &ConversationState) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = SessionFile {
            system_prompt: state.system_prompt().map(String::from),
            turns: state.turns().to_vec(),
            saved_at: Some(Utc::now().to_rfc3339()),
        };
        std::fs::write(&self.path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }
}
