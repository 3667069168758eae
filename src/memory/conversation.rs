//! 对话状态：只追加的轮次日志
//!
//! 每次调用模型网关都完整发送全部轮次（不做摘要、不剪枝）。追加时检查协议约束：
//! 工具结果必须对应最近一条 assistant 轮次中的某个 call_id，且每个 call_id 只能回答一次；
//! assistant 的工具请求未全部回答前，不能追加新的用户输入。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::ConversationError;

/// 模型请求的一次工具调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
    /// 模型给出的参数文本无法解析为 JSON 时保留原文，回传给模型时原样发送
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_arguments: Option<String>,
}

impl ToolRequest {
    pub fn new(call_id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            arguments,
            raw_arguments: None,
        }
    }

    /// 参数文本不是合法 JSON：工具收到字符串形式的原文并报告 InvalidArguments
    pub fn unparsed(
        call_id: impl Into<String>,
        name: impl Into<String>,
        raw: impl Into<String>,
    ) -> Self {
        let raw = raw.into();
        Self {
            call_id: call_id.into(),
            name: name.into(),
            arguments: Value::String(raw.clone()),
            raw_arguments: Some(raw),
        }
    }
}

/// 对话中的一个原子条目
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Turn {
    User {
        content: String,
    },
    Assistant {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_requests: Vec<ToolRequest>,
    },
    ToolResult {
        call_id: String,
        content: String,
    },
}

impl Turn {
    pub fn role(&self) -> &'static str {
        match self {
            Turn::User { .. } => "user",
            Turn::Assistant { .. } => "assistant",
            Turn::ToolResult { .. } => "tool_result",
        }
    }
}

/// 轮次在日志中的位置（单调递增）
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TurnId(pub usize);

/// 对话状态：可选的 system 前言 + 只追加的轮次序列
#[derive(Clone, Debug, Default)]
pub struct ConversationState {
    system_prompt: Option<String>,
    turns: Vec<Turn>,
    /// 最近一条 assistant 轮次的下标
    last_assistant: Option<usize>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// 从持久化的轮次恢复：逐条重放追加，因此所有协议约束都会被重新检查
    pub fn from_turns(
        system_prompt: Option<String>,
        turns: Vec<Turn>,
    ) -> Result<Self, ConversationError> {
        let mut state = Self {
            system_prompt,
            ..Self::default()
        };
        for turn in turns {
            match turn {
                Turn::User { content } => {
                    state.push_user(content)?;
                }
                Turn::Assistant {
                    content,
                    tool_requests,
                } => {
                    state.push_assistant(content, tool_requests)?;
                }
                Turn::ToolResult { call_id, content } => {
                    state.push_tool_result(call_id, content)?;
                }
            }
        }
        Ok(state)
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn get(&self, id: TurnId) -> Option<&Turn> {
        self.turns.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn push_user(&mut self, content: impl Into<String>) -> Result<TurnId, ConversationError> {
        let pending = self.pending_call_ids().len();
        if pending > 0 {
            return Err(ConversationError::PendingToolResults(pending));
        }
        Ok(self.append(Turn::User {
            content: content.into(),
        }))
    }

    pub fn push_assistant(
        &mut self,
        content: Option<String>,
        tool_requests: Vec<ToolRequest>,
    ) -> Result<TurnId, ConversationError> {
        let pending = self.pending_call_ids().len();
        if pending > 0 {
            return Err(ConversationError::PendingToolResults(pending));
        }
        let id = self.append(Turn::Assistant {
            content,
            tool_requests,
        });
        self.last_assistant = Some(id.0);
        Ok(id)
    }

    pub fn push_tool_result(
        &mut self,
        call_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<TurnId, ConversationError> {
        let call_id = call_id.into();
        let Some(idx) = self.last_assistant else {
            return Err(ConversationError::NoAssistantTurn(call_id));
        };
        let requested = match &self.turns[idx] {
            Turn::Assistant { tool_requests, .. } => {
                tool_requests.iter().any(|r| r.call_id == call_id)
            }
            _ => false,
        };
        if !requested {
            return Err(ConversationError::UnknownCallId(call_id));
        }
        let answered = self.turns[idx + 1..].iter().any(|t| {
            matches!(t, Turn::ToolResult { call_id: c, .. } if *c == call_id)
        });
        if answered {
            return Err(ConversationError::DuplicateToolResult(call_id));
        }
        Ok(self.append(Turn::ToolResult {
            call_id,
            content: content.into(),
        }))
    }

    /// 最近一条 assistant 轮次中尚未得到结果的 call_id（按请求顺序）
    pub fn pending_call_ids(&self) -> Vec<&str> {
        let Some(idx) = self.last_assistant else {
            return Vec::new();
        };
        let Turn::Assistant { tool_requests, .. } = &self.turns[idx] else {
            return Vec::new();
        };
        let answered: Vec<&str> = self.turns[idx + 1..]
            .iter()
            .filter_map(|t| match t {
                Turn::ToolResult { call_id, .. } => Some(call_id.as_str()),
                _ => None,
            })
            .collect();
        tool_requests
            .iter()
            .map(|r| r.call_id.as_str())
            .filter(|id| !answered.contains(id))
            .collect()
    }

    /// 最近一条 assistant 轮次的文本内容（若有）
    pub fn last_assistant_content(&self) -> Option<&str> {
        self.last_assistant_content_since(0)
    }

    /// 同上，但只看下标 `start` 之后的轮次（单次运行范围）
    pub fn last_assistant_content_since(&self, start: usize) -> Option<&str> {
        let start = start.min(self.turns.len());
        self.turns[start..].iter().rev().find_map(|t| match t {
            Turn::Assistant {
                content: Some(c), ..
            } if !c.trim().is_empty() => Some(c.as_str()),
            _ => None,
        })
    }

    /// 按 call_id 找到发起该调用的工具名
    pub fn tool_name_for(&self, call_id: &str) -> Option<&str> {
        self.turns.iter().rev().find_map(|t| match t {
            Turn::Assistant { tool_requests, .. } => tool_requests
                .iter()
                .find(|r| r.call_id == call_id)
                .map(|r| r.name.as_str()),
            _ => None,
        })
    }

    fn append(&mut self, turn: Turn) -> TurnId {
        self.turns.push(turn);
        TurnId(self.turns.len() - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn req(id: &str) -> ToolRequest {
        ToolRequest::new(id, "calculator", json!({"expression": "1+1"}))
    }

    #[test]
    fn test_turn_ids_are_monotonic() {
        let mut conv = ConversationState::new();
        let a = conv.push_user("hi").unwrap();
        let b = conv.push_assistant(Some("hello".into()), vec![]).unwrap();
        assert!(a < b);
        assert_eq!(conv.get(b).map(Turn::role), Some("assistant"));
    }

    #[test]
    fn test_tool_result_must_match_last_assistant() {
        let mut conv = ConversationState::new();
        conv.push_user("q").unwrap();
        conv.push_assistant(None, vec![req("a"), req("b")]).unwrap();
        assert_eq!(conv.pending_call_ids(), vec!["a", "b"]);

        conv.push_tool_result("a", "2").unwrap();
        assert_eq!(
            conv.push_tool_result("a", "2"),
            Err(ConversationError::DuplicateToolResult("a".into()))
        );
        assert_eq!(
            conv.push_tool_result("zzz", "?"),
            Err(ConversationError::UnknownCallId("zzz".into()))
        );
        assert_eq!(
            conv.push_user("next"),
            Err(ConversationError::PendingToolResults(1))
        );

        conv.push_tool_result("b", "2").unwrap();
        assert!(conv.pending_call_ids().is_empty());
        conv.push_user("next").unwrap();
    }

    #[test]
    fn test_result_from_older_assistant_turn_rejected() {
        let mut conv = ConversationState::new();
        conv.push_user("q").unwrap();
        conv.push_assistant(None, vec![req("a")]).unwrap();
        conv.push_tool_result("a", "2").unwrap();
        conv.push_assistant(None, vec![req("b")]).unwrap();
        assert_eq!(
            conv.push_tool_result("a", "again"),
            Err(ConversationError::UnknownCallId("a".into()))
        );
    }

    #[test]
    fn test_tool_result_without_assistant() {
        let mut conv = ConversationState::new();
        conv.push_user("q").unwrap();
        assert_eq!(
            conv.push_tool_result("a", "x"),
            Err(ConversationError::NoAssistantTurn("a".into()))
        );
    }

    #[test]
    fn test_from_turns_replays_invariants() {
        let turns = vec![
            Turn::User { content: "q".into() },
            Turn::ToolResult {
                call_id: "ghost".into(),
                content: "x".into(),
            },
        ];
        assert!(ConversationState::from_turns(None, turns).is_err());

        let turns = vec![
            Turn::User { content: "q".into() },
            Turn::Assistant {
                content: None,
                tool_requests: vec![req("a")],
            },
            Turn::ToolResult {
                call_id: "a".into(),
                content: "2".into(),
            },
            Turn::Assistant {
                content: Some("2".into()),
                tool_requests: vec![],
            },
        ];
        let conv = ConversationState::from_turns(Some("sys".into()), turns).unwrap();
        assert_eq!(conv.len(), 4);
        assert_eq!(conv.system_prompt(), Some("sys"));
        assert_eq!(conv.last_assistant_content(), Some("2"));
        assert_eq!(conv.last_assistant_content_since(4), None);
        assert_eq!(conv.tool_name_for("a"), Some("calculator"));
    }

    #[test]
    fn test_turn_serde_shape() {
        let turn = Turn::ToolResult {
            call_id: "a".into(),
            content: "4".into(),
        };
        let v = serde_json::to_value(&turn).unwrap();
        assert_eq!(v, json!({"role": "tool_result", "call_id": "a", "content": "4"}));
    }

    #[test]
    fn test_turn_ids_index_the_log() {
        let mut conv = ConversationState::new();
        let user = conv.push_user("hi").unwrap();
        let reply = conv.push_assistant(Some("hello".into()), vec![]).unwrap();
        assert!(user < reply);
        assert_eq!(conv.get(user).map(Turn::role), Some("user"));
        assert_eq!(conv.get(reply).map(Turn::role), Some("assistant"));
        assert!(conv.get(TurnId(2)).is_none());
    }
}
