//! Mock LLM 客户端（用于测试与无 API Key 的本地演示）
//!
//! 按规则脚本化回复：每条规则是「prompt 中包含的子串 → 回复队列」，按注册顺序匹配，
//! 队列中最后一条回复会被重复使用；没有规则命中时返回默认回复。
//! 同时记录每次调用的 prompt 与最大并发数，便于断言。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::{LlmClient, LlmError, LlmResponse, ToolSpec};
use crate::memory::{Message, ToolCall};

/// 一条脚本化回复
#[derive(Clone, Debug)]
pub enum MockReply {
    Text(String),
    /// 请求工具调用：(工具名, 参数)
    ToolCalls(Vec<(String, Value)>),
    Fail(LlmError),
}

impl MockReply {
    pub fn text(s: impl Into<String>) -> Self {
        MockReply::Text(s.into())
    }

    /// 将可序列化的值作为 JSON 文本回复（结构化输出场景）
    pub fn json(value: Value) -> Self {
        MockReply::Text(value.to_string())
    }

    pub fn tool(name: &str, args: Value) -> Self {
        MockReply::ToolCalls(vec![(name.to_string(), args)])
    }
}

struct MockRule {
    needle: String,
    replies: VecDeque<MockReply>,
}

/// 脚本化 Mock 客户端
pub struct MockLlmClient {
    rules: Mutex<Vec<MockRule>>,
    default_reply: MockReply,
    delay: Option<Duration>,
    prompts: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            default_reply: MockReply::text("Mock response."),
            delay: None,
            prompts: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// 注册规则：prompt 含 needle 时按顺序返回 replies
    pub fn on(self, needle: impl Into<String>, replies: Vec<MockReply>) -> Self {
        self.lock_rules().push(MockRule {
            needle: needle.into(),
            replies: replies.into(),
        });
        self
    }

    pub fn with_default(mut self, reply: MockReply) -> Self {
        self.default_reply = reply;
        self
    }

    /// 每次调用前等待，用于并发与取消测试
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 已记录的全部 prompt（每次调用一条，消息内容按换行拼接）
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn count_matching(&self, needle: &str) -> usize {
        self.prompts().iter().filter(|p| p.contains(needle)).count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn lock_rules(&self) -> std::sync::MutexGuard<'_, Vec<MockRule>> {
        self.rules.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_reply(&self, text: &str) -> MockReply {
        let mut rules = self.lock_rules();
        for rule in rules.iter_mut() {
            if !text.contains(&rule.needle) {
                continue;
            }
            if rule.replies.len() > 1 {
                if let Some(reply) = rule.replies.pop_front() {
                    return reply;
                }
            } else if let Some(reply) = rule.replies.front() {
                return reply.clone();
            }
        }
        self.default_reply.clone()
    }

    async fn respond(&self, messages: &[Message]) -> MockReply {
        let text = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(text.clone());
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        // 调用被取消（future 被丢弃）时也要归还计数
        let _in_flight = InFlight(&self.in_flight);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.next_reply(&text)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        match self.respond(messages).await {
            MockReply::Text(s) => Ok(s),
            MockReply::ToolCalls(calls) => {
                let calls: Vec<Value> = calls
                    .into_iter()
                    .map(|(tool, args)| serde_json::json!({ "tool": tool, "args": args }))
                    .collect();
                Ok(serde_json::json!({ "tool_calls": calls }).to_string())
            }
            MockReply::Fail(e) => Err(e),
        }
    }

    async fn invoke(&self, messages: &[Message], _tools: &[ToolSpec]) -> Result<LlmResponse, LlmError> {
        match self.respond(messages).await {
            MockReply::Text(s) => Ok(LlmResponse::text(s)),
            MockReply::ToolCalls(calls) => Ok(LlmResponse {
                content: String::new(),
                tool_calls: calls
                    .into_iter()
                    .map(|(name, args)| ToolCall::new(name, args))
                    .collect(),
            }),
            MockReply::Fail(e) => Err(e),
        }
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rules_match_in_order_and_last_reply_repeats() {
        let llm = MockLlmClient::new().on(
            "weather",
            vec![MockReply::text("first"), MockReply::text("second")],
        );
        let msgs = [Message::user("what's the weather")];
        assert_eq!(llm.complete(&msgs).await.unwrap(), "first");
        assert_eq!(llm.complete(&msgs).await.unwrap(), "second");
        assert_eq!(llm.complete(&msgs).await.unwrap(), "second");
        assert_eq!(llm.complete(&[Message::user("other")]).await.unwrap(), "Mock response.");
        assert_eq!(llm.count_matching("weather"), 3);
    }

    #[tokio::test]
    async fn test_invoke_returns_tool_calls() {
        let llm = MockLlmClient::new().on(
            "go",
            vec![MockReply::tool("think", serde_json::json!({"thought": "hmm"}))],
        );
        let resp = llm.invoke(&[Message::user("go")], &[]).await.unwrap();
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].name, "think");
    }

    #[tokio::test]
    async fn test_fail_reply() {
        let llm = MockLlmClient::new().with_default(MockReply::Fail(LlmError::Timeout));
        assert_eq!(llm.complete(&[Message::user("x")]).await, Err(LlmError::Timeout));
    }
}
