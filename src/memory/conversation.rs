//! 对话消息
//!
//! 研究状态中的消息日志只追加不修改；工具调用与工具结果也作为消息记录，
//! 供工具循环与澄清阶段拼接上下文。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 消息角色（与 LLM API 一致，Tool 为工具返回）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// 模型请求的一次工具调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            name: name.into(),
            args,
        }
    }
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// 仅 Assistant 消息：本轮请求的工具调用
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// 仅 Tool 消息：对应的调用 id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// 仅 Tool 消息：工具名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    /// 工具结果消息
    pub fn tool(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call.id.clone()),
            name: Some(call.name.clone()),
            ..Self::plain(Role::Tool, content)
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }
}

/// 将消息列表拼成纯文本（每行 `Role: content`），用于分析、规划等单轮 prompt
pub fn buffer_string(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| {
            let prefix = match m.role {
                Role::User => "Human",
                Role::Assistant => "AI",
                Role::System => "System",
                Role::Tool => "Tool",
            };
            format!("{}: {}", prefix, m.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// 所有 User 消息按换行拼接
pub fn joined_user_text(messages: &[Message]) -> String {
    messages
        .iter()
        .filter(|m| m.is_user())
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_string_prefixes() {
        let msgs = vec![Message::user("hi"), Message::assistant("hello")];
        assert_eq!(buffer_string(&msgs), "Human: hi\nAI: hello");
    }

    #[test]
    fn test_joined_user_text_skips_assistant() {
        let msgs = vec![
            Message::user("best laptops"),
            Message::assistant("Which year?"),
            Message::user("2024"),
        ];
        assert_eq!(joined_user_text(&msgs), "best laptops\n2024");
    }

    #[test]
    fn test_tool_message_links_call() {
        let call = ToolCall::new("fetch_url", serde_json::json!({"url": "https://docs.rs"}));
        let msg = Message::tool(&call, "body");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some(call.id.as_str()));
        assert_eq!(msg.name.as_deref(), Some("fetch_url"));
    }
}
