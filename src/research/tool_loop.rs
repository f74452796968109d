//! 有界工具调用循环（探索阶段、章节研究者、澄清前搜索共用）
//!
//! invoke → 执行工具 → 再 invoke，直到：模型不再请求工具、调用了 research_complete、
//! 轮数达到上限、模型调用失败或被取消。同一轮内的多个工具调用并发执行，结果按请求顺序写回。

use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::llm::LlmClient;
use crate::memory::{Message, ToolCall};
use crate::research::events::{send_event, EventSender, ResearchEvent};
use crate::tools::control::{RESEARCH_COMPLETE, THINK};
use crate::tools::executor::args_preview;
use crate::tools::ToolExecutor;

/// 循环结束原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    NoToolCalls,
    CompleteSignal,
    IterationCap,
    LlmFailed(String),
    Cancelled,
}

/// 循环结果：完整对话、可供压缩的原始笔记与轮数
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub messages: Vec<Message>,
    /// "[Tool Result: name]" 与 "[Analysis]" 片段
    pub notes: Vec<String>,
    pub iterations: u32,
    pub exit: LoopExit,
}

impl LoopOutcome {
    pub fn is_cancelled(&self) -> bool {
        self.exit == LoopExit::Cancelled
    }

    /// 笔记按分隔线拼接
    pub fn joined_notes(&self) -> String {
        self.notes.join("\n\n---\n\n")
    }
}

pub struct ToolLoop<'a> {
    llm: &'a dyn LlmClient,
    executor: &'a ToolExecutor,
    max_iterations: u32,
    label: Option<String>,
    events: Option<EventSender>,
    verbose: bool,
}

impl<'a> ToolLoop<'a> {
    pub fn new(llm: &'a dyn LlmClient, executor: &'a ToolExecutor, max_iterations: u32) -> Self {
        Self {
            llm,
            executor,
            max_iterations: max_iterations.max(1),
            label: None,
            events: None,
            verbose: false,
        }
    }

    /// 事件中的章节标签
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn events(mut self, events: Option<EventSender>) -> Self {
        self.events = events;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub async fn run(&self, mut messages: Vec<Message>, cancel: &CancellationToken) -> LoopOutcome {
        let specs = self.executor.registry().specs();
        let mut notes = Vec::new();
        let mut iterations = 0u32;

        let exit = loop {
            if cancel.is_cancelled() {
                break LoopExit::Cancelled;
            }

            let response = tokio::select! {
                _ = cancel.cancelled() => break LoopExit::Cancelled,
                r = self.llm.invoke(&messages, &specs) => r,
            };
            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(label = ?self.label, iteration = iterations, error = %e, "Model call failed in tool loop");
                    break LoopExit::LlmFailed(e.to_string());
                }
            };

            messages.push(response.to_message());
            if !response.content.trim().is_empty() {
                notes.push(format!("[Analysis]\n{}", response.content.trim()));
            }

            if !response.has_tool_calls() {
                break LoopExit::NoToolCalls;
            }

            if let Some(done) = response.tool_calls.iter().find(|c| c.name == RESEARCH_COMPLETE) {
                if let Some(summary) = done.args.get("summary").and_then(|v| v.as_str()) {
                    if !summary.trim().is_empty() {
                        notes.push(format!("[Analysis]\n{}", summary.trim()));
                    }
                }
                tracing::debug!(label = ?self.label, iteration = iterations, "Completion signal received");
                break LoopExit::CompleteSignal;
            }

            let results = tokio::select! {
                _ = cancel.cancelled() => break LoopExit::Cancelled,
                r = join_all(response.tool_calls.iter().map(|call| self.run_call(call))) => r,
            };
            for (call, output) in response.tool_calls.iter().zip(results) {
                if call.name == THINK {
                    notes.push(format!("[Analysis]\n{}", output));
                } else {
                    notes.push(format!("[Tool Result: {}]\n{}", call.name, output));
                }
                messages.push(Message::tool(call, output));
            }

            iterations += 1;
            if iterations >= self.max_iterations {
                tracing::info!(label = ?self.label, iterations, "Tool loop reached iteration cap");
                break LoopExit::IterationCap;
            }
        };

        LoopOutcome {
            messages,
            notes,
            iterations,
            exit,
        }
    }

    /// 执行单个工具调用；失败作为 "Error: ..." 文本回给模型
    async fn run_call(&self, call: &ToolCall) -> String {
        let preview = args_preview(&call.args);
        if self.verbose {
            tracing::debug!(label = ?self.label, tool = %call.name, args = %preview, "Tool call");
        }
        send_event(
            &self.events,
            ResearchEvent::ToolCall {
                section: self.label.clone(),
                tool: call.name.clone(),
                args_preview: preview,
            },
        );
        match self.executor.execute(&call.name, call.args.clone()).await {
            Ok(out) => out,
            Err(e) => format!("Error: {e}"),
        }
    }
}
