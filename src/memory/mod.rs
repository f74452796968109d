//! 记忆层：研究会话的消息日志

pub mod conversation;

pub use conversation::{buffer_string, joined_user_text, Message, Role, ToolCall};
