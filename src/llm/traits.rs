//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / 阿里云 / Mock）实现 LlmClient：
//! - complete：纯文本补全（后端唯一必须实现的原语）
//! - invoke：带工具的调用；默认实现把工具目录写入 system prompt，再从回复中解析 JSON 工具调用，
//!   与提供方是否原生支持 function calling 无关。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::llm::structured::extract_json_block;
use crate::memory::{Message, Role, ToolCall};

/// 提供方层面的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// 上下文超长（报告合成阶段据此截断重试）
    #[error("Context length exceeded: {0}")]
    ContextLengthExceeded(String),

    #[error("Request timed out")]
    Timeout,
}

impl LlmError {
    /// 根据提供方返回的错误文本归类
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("context_length")
            || lower.contains("maximum context")
            || lower.contains("too many tokens")
            || lower.contains("token limit")
            || (lower.contains("tokens") && lower.contains("exceed"))
        {
            LlmError::ContextLengthExceeded(message)
        } else if lower.contains("rate limit") || lower.contains("429") {
            LlmError::RateLimited(message)
        } else if lower.contains("timed out") || lower.contains("timeout") {
            LlmError::Timeout
        } else {
            LlmError::ApiError(message)
        }
    }

    /// 可重试：限流与超时
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::RateLimited(_) | LlmError::Timeout)
    }
}

/// 传给模型的工具描述
#[derive(Clone, Debug, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 一次 invoke 的结果：文本内容与（可能为空的）工具调用
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LlmResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

impl LlmResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// 转为追加到对话中的 Assistant 消息
    pub fn to_message(&self) -> Message {
        Message::assistant_with_tools(self.content.clone(), self.tool_calls.clone())
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式文本补全
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 带工具调用；tools 为空时等价于 complete
    async fn invoke(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<LlmResponse, LlmError> {
        if tools.is_empty() {
            return Ok(LlmResponse::text(self.complete(messages).await?));
        }
        let prompt = render_text_protocol(messages, tools);
        let raw = self.complete(&prompt).await?;
        Ok(parse_tool_calls(&raw, tools))
    }

    fn model_name(&self) -> &str {
        "unknown"
    }

    /// 累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

fn tool_protocol_prompt(tools: &[ToolSpec]) -> String {
    let catalog = serde_json::to_string_pretty(tools).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"You can call the following tools:
{catalog}

To call one or more tools, reply with ONLY a JSON object in this format:
{{"tool_calls": [{{"tool": "<tool name>", "args": {{...}}}}]}}

If you do not need any tool, reply in plain text."#
    )
}

/// 把带工具的对话改写为纯 System/User/Assistant 文本对话
pub fn render_text_protocol(messages: &[Message], tools: &[ToolSpec]) -> Vec<Message> {
    let protocol = tool_protocol_prompt(tools);
    let mut out = Vec::with_capacity(messages.len() + 1);
    let mut rest = messages;

    match messages.first() {
        Some(first) if first.role == Role::System => {
            out.push(Message::system(format!("{}\n\n{}", first.content, protocol)));
            rest = &messages[1..];
        }
        _ => out.push(Message::system(protocol)),
    }

    for m in rest {
        match m.role {
            Role::Tool => {
                let name = m.name.as_deref().unwrap_or("tool");
                out.push(Message::user(format!("[Tool Result: {}]\n{}", name, m.content)));
            }
            Role::Assistant if !m.tool_calls.is_empty() => {
                let calls: Vec<Value> = m
                    .tool_calls
                    .iter()
                    .map(|c| serde_json::json!({ "tool": c.name, "args": c.args }))
                    .collect();
                let json = serde_json::json!({ "tool_calls": calls });
                let text = if m.content.trim().is_empty() {
                    json.to_string()
                } else {
                    format!("{}\n{}", m.content, json)
                };
                out.push(Message::assistant(text));
            }
            Role::User => out.push(Message::user(m.content.clone())),
            Role::System => out.push(Message::system(m.content.clone())),
            Role::Assistant => out.push(Message::assistant(m.content.clone())),
        }
    }
    out
}

/// 从模型回复中解析 `{"tool_calls": [...]}` 或单个 `{"tool": ..., "args": ...}`；解析不到时视为纯文本回复
///
/// 单对象形式只在 `tool` 是已提供的工具名时才算调用，正文里夹带的 JSON 数据（如 `{"name": ...}`）按文本处理。
pub fn parse_tool_calls(raw: &str, tools: &[ToolSpec]) -> LlmResponse {
    let Some(json_str) = extract_json_block(raw) else {
        return LlmResponse::text(raw.trim());
    };
    let Ok(value) = serde_json::from_str::<Value>(json_str) else {
        return LlmResponse::text(raw.trim());
    };

    let entries: Vec<&Value> = match value.get("tool_calls").and_then(|v| v.as_array()) {
        Some(arr) => arr.iter().collect(),
        None => {
            let known = value
                .get("tool")
                .and_then(|v| v.as_str())
                .is_some_and(|name| tools.iter().any(|t| t.name == name.trim()));
            if !known {
                return LlmResponse::text(raw.trim());
            }
            vec![&value]
        }
    };

    let calls: Vec<ToolCall> = entries
        .into_iter()
        .filter_map(|entry| {
            let name = entry
                .get("tool")
                .or_else(|| entry.get("name"))
                .and_then(|v| v.as_str())?
                .trim();
            if name.is_empty() {
                return None;
            }
            let args = entry
                .get("args")
                .or_else(|| entry.get("arguments"))
                .cloned()
                .unwrap_or_else(|| serde_json::json!({}));
            Some(ToolCall::new(name, args))
        })
        .collect();

    if calls.is_empty() {
        return LlmResponse::text(raw.trim());
    }

    let content = raw
        .find(json_str)
        .map(|start| raw[..start].trim().trim_end_matches("```json").trim().to_string())
        .unwrap_or_default();
    LlmResponse {
        content,
        tool_calls: calls,
    }
}

/// 重试策略（指数退避）
#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    fn delay_for(&self, attempt: u32) -> Duration {
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(attempt.min(i32::MAX as u32) as i32);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// 对限流与超时自动重试的包装客户端
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    config: RetryConfig,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let mut attempt = 0;
        loop {
            match self.inner.complete(messages).await {
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = self.config.delay_for(attempt);
                    tracing::warn!(error = %e, attempt, delay_ms = delay.as_millis() as u64, "LLM call failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn invoke(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<LlmResponse, LlmError> {
        let mut attempt = 0;
        loop {
            match self.inner.invoke(messages, tools).await {
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = self.config.delay_for(attempt);
                    tracing::warn!(error = %e, attempt, delay_ms = delay.as_millis() as u64, "LLM invoke failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}
