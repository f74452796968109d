//! 深度研究工作流的各个阶段
//!
//! clarify → analyze → (discover) → plan → 并行 researcher → aggregate → review（可回到 plan）→ report。
//! 每个阶段读取 ResearchState，返回 StageOutcome（下一阶段 + 局部更新），由编排器合并与路由。

pub mod aggregate;
pub mod analyze;
pub mod clarify;
pub mod discover;
pub mod events;
pub mod plan;
pub mod prompts;
pub mod report;
pub mod researcher;
pub mod review;
pub mod schemas;
pub mod tool_loop;

use std::fmt;
use std::sync::Arc;

use crate::config::ResearchConfig;
use crate::core::state::{Section, StateUpdate};
use crate::llm::LlmClient;
use crate::tools::control::{ResearchCompleteTool, ThinkTool};
use crate::tools::{ToolExecutor, ToolRegistry};

pub use events::{EventSender, ResearchEvent};
pub use prompts::{BuiltinPrompts, PromptKind, PromptSource};

/// 主干上的阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Clarify,
    Analyze,
    Discover,
    Plan,
    Aggregate,
    Review,
    Report,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Clarify => "clarify",
            Stage::Analyze => "analyze",
            Stage::Discover => "discover",
            Stage::Plan => "plan",
            Stage::Aggregate => "aggregate",
            Stage::Review => "review",
            Stage::Report => "report",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个章节的派发单元，只在一次 worker 调用期间存在
#[derive(Clone, Debug)]
pub struct SectionTask {
    pub section: Section,
    pub research_brief: String,
    pub max_tool_calls: u32,
}

/// 阶段的决定
#[derive(Debug)]
pub enum StageOutcome {
    /// 合并 update 后进入 next
    Goto { next: Stage, update: StateUpdate },
    /// 合并 update 后并行执行 tasks，全部返回后进入 Aggregate（仅 Plan 使用）
    FanOut { tasks: Vec<SectionTask>, update: StateUpdate },
    /// 合并 update 后挂起，等待用户输入（仅 Clarify 使用）
    AwaitUser { update: StateUpdate },
    /// 合并 update 后结束
    Finish { update: StateUpdate },
}

impl StageOutcome {
    pub fn goto(next: Stage, update: StateUpdate) -> Self {
        StageOutcome::Goto { next, update }
    }
}

/// 各阶段共享的只读依赖
#[derive(Clone)]
pub struct ResearchContext {
    pub llm: Arc<dyn LlmClient>,
    /// 外部研究工具（不含控制工具）
    pub tools: ToolRegistry,
    pub prompts: Arc<dyn PromptSource>,
    pub config: ResearchConfig,
    pub events: Option<EventSender>,
}

impl ResearchContext {
    pub fn new(llm: Arc<dyn LlmClient>, tools: ToolRegistry, config: ResearchConfig) -> Self {
        Self {
            llm,
            tools,
            prompts: Arc::new(BuiltinPrompts::new()),
            config,
            events: None,
        }
    }

    pub fn with_prompts(mut self, prompts: Arc<dyn PromptSource>) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn render(&self, kind: PromptKind, vars: &[(&str, &str)]) -> String {
        self.prompts.render(kind, vars)
    }

    /// 工具循环使用的执行器：外部工具 + research_complete + think
    pub fn loop_executor(&self) -> ToolExecutor {
        let mut control = ToolRegistry::new();
        control.register(ResearchCompleteTool);
        control.register(ThinkTool);
        ToolExecutor::new(self.tools.merged(&control), self.config.tool_timeout)
    }

    pub(crate) fn emit(&self, ev: ResearchEvent) {
        events::send_event(&self.events, ev);
    }
}

/// 按字符截断（不拆分 UTF-8）
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars_respects_utf8() {
        assert_eq!(truncate_chars("研究报告", 2), "研究");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn test_loop_executor_includes_control_tools() {
        let ctx = ResearchContext::new(
            Arc::new(crate::llm::MockLlmClient::new()),
            ToolRegistry::new(),
            ResearchConfig::default(),
        );
        let names = ctx.loop_executor().tool_names();
        assert!(names.contains(&"research_complete".to_string()));
        assert!(names.contains(&"think".to_string()));
    }
}
