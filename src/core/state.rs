//! 研究状态：ResearchState 与各阶段返回的 StateUpdate
//!
//! 每个会话一个 ResearchState，仅由编排器在阶段之间持有和修改。
//! 合并规则：sections 按 title upsert，消息日志追加，其余标量字段覆盖。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::core::reducer::merge_sections;
use crate::memory::Message;

/// 章节状态
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    #[default]
    Pending,
    /// 仅存在于 worker 的私有副本中
    Researching,
    Completed,
}

/// 报告章节；title 为合并时的身份键
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub status: SectionStatus,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

impl Section {
    pub fn pending(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            status: SectionStatus::Pending,
            content: String::new(),
            sources: Vec::new(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == SectionStatus::Pending
    }

    pub fn is_completed(&self) -> bool {
        self.status == SectionStatus::Completed
    }

    pub fn complete(&mut self, content: String, sources: Vec<String>) {
        self.status = SectionStatus::Completed;
        self.content = content;
        self.sources = sources;
    }

    /// 评审要求重做：回到 pending 并清空内容
    pub fn reset(&mut self) {
        self.status = SectionStatus::Pending;
        self.content.clear();
        self.sources.clear();
    }
}

/// 探索阶段实体的优先级
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn rank(self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }
}

/// 探索阶段发现的候选实体
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DiscoveredItem {
    /// 实体名称
    pub name: String,
    /// 分类；为空时规划阶段归入 "Other"
    #[serde(default)]
    pub category: String,
    /// 一句话简介
    #[serde(default)]
    pub brief: String,
    /// 信息来源（URL 或站点名）
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub priority: Priority,
}

/// 查询类型
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    /// 枚举类，如「有哪些开源向量数据库」
    List,
    Comparison,
    DeepDive,
    #[default]
    General,
}

impl QueryType {
    pub fn as_str(self) -> &'static str {
        match self {
            QueryType::List => "list",
            QueryType::Comparison => "comparison",
            QueryType::DeepDive => "deep_dive",
            QueryType::General => "general",
        }
    }
}

/// 报告输出形式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Table,
    List,
    #[default]
    Prose,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Table => "table",
            OutputFormat::List => "list",
            OutputFormat::Prose => "prose",
        }
    }
}

/// 澄清阶段的决定
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClarificationOutcome {
    pub need_clarification: bool,
    pub question: String,
    pub verification: String,
}

/// 会话状态
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Running,
    /// 在澄清阶段挂起，等待用户回答
    AwaitingInput,
    Completed,
}

/// 单个研究会话的完整状态（在挂起点按 thread_id 持久化）
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ResearchState {
    pub thread_id: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    /// 所有用户消息拼接
    #[serde(default)]
    pub original_query: String,
    #[serde(default)]
    pub clarification: Option<ClarificationOutcome>,
    #[serde(default)]
    pub query_type: QueryType,
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default)]
    pub needs_discovery: bool,
    #[serde(default)]
    pub discovery_target: String,
    #[serde(default)]
    pub discovered_items: Vec<DiscoveredItem>,
    #[serde(default)]
    pub discovery_summary: String,
    #[serde(default)]
    pub research_brief: String,
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default)]
    pub review_iterations: u32,
    #[serde(default)]
    pub max_review_iterations: u32,
    #[serde(default)]
    pub final_report: String,
    #[serde(default)]
    pub status: RunStatus,
}

impl ResearchState {
    pub fn new(thread_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            messages: vec![Message::user(query)],
            ..Default::default()
        }
    }

    /// 当前查询文本：优先 original_query，否则取用户消息拼接
    pub fn query(&self) -> String {
        if self.original_query.is_empty() {
            crate::memory::joined_user_text(&self.messages)
        } else {
            self.original_query.clone()
        }
    }

    pub fn pending_sections(&self) -> Vec<Section> {
        self.sections.iter().filter(|s| s.is_pending()).cloned().collect()
    }

    pub fn completed_count(&self) -> usize {
        self.sections.iter().filter(|s| s.is_completed()).count()
    }

    /// 按类型合并一个阶段的局部更新
    pub fn apply(&mut self, update: StateUpdate) {
        self.messages.extend(update.messages);
        merge_sections(&mut self.sections, update.sections);

        if let Some(v) = update.original_query {
            self.original_query = v;
        }
        if let Some(v) = update.clarification {
            self.clarification = Some(v);
        }
        if let Some(v) = update.query_type {
            self.query_type = v;
        }
        if let Some(v) = update.output_format {
            self.output_format = v;
        }
        if let Some(v) = update.needs_discovery {
            self.needs_discovery = v;
        }
        if let Some(v) = update.discovery_target {
            self.discovery_target = v;
        }
        if let Some(v) = update.discovered_items {
            self.discovered_items = v;
        }
        if let Some(v) = update.discovery_summary {
            self.discovery_summary = v;
        }
        if let Some(v) = update.research_brief {
            self.research_brief = v;
        }
        if let Some(v) = update.max_review_iterations {
            self.max_review_iterations = v;
        }
        if let Some(v) = update.review_iterations {
            self.review_iterations = v;
        }
        if let Some(v) = update.final_report {
            self.final_report = v;
        }
    }
}

/// 阶段返回的局部更新；None / 空表示不修改
#[derive(Clone, Debug, Default)]
pub struct StateUpdate {
    pub messages: Vec<Message>,
    pub sections: Vec<Section>,
    pub original_query: Option<String>,
    pub clarification: Option<ClarificationOutcome>,
    pub query_type: Option<QueryType>,
    pub output_format: Option<OutputFormat>,
    pub needs_discovery: Option<bool>,
    pub discovery_target: Option<String>,
    pub discovered_items: Option<Vec<DiscoveredItem>>,
    pub discovery_summary: Option<String>,
    pub research_brief: Option<String>,
    pub max_review_iterations: Option<u32>,
    pub review_iterations: Option<u32>,
    pub final_report: Option<String>,
}

impl StateUpdate {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
            && self.sections.is_empty()
            && self.original_query.is_none()
            && self.clarification.is_none()
            && self.query_type.is_none()
            && self.output_format.is_none()
            && self.needs_discovery.is_none()
            && self.discovery_target.is_none()
            && self.discovered_items.is_none()
            && self.discovery_summary.is_none()
            && self.research_brief.is_none()
            && self.max_review_iterations.is_none()
            && self.review_iterations.is_none()
            && self.final_report.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_appends_messages_and_overwrites_scalars() {
        let mut state = ResearchState::new("t1", "rust web frameworks");
        state.apply(StateUpdate {
            messages: vec![Message::assistant("ok")],
            research_brief: Some("brief".into()),
            query_type: Some(QueryType::List),
            ..Default::default()
        });
        state.apply(StateUpdate {
            research_brief: Some("brief v2".into()),
            ..Default::default()
        });

        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.research_brief, "brief v2");
        assert_eq!(state.query_type, QueryType::List);
    }

    #[test]
    fn test_apply_upserts_sections() {
        let mut state = ResearchState::new("t1", "q");
        state.apply(StateUpdate {
            sections: vec![Section::pending("A", "a"), Section::pending("B", "b")],
            ..Default::default()
        });
        let mut done = Section::pending("A", "a");
        done.complete("content".into(), vec!["https://a.dev".into()]);
        state.apply(StateUpdate {
            sections: vec![done],
            ..Default::default()
        });

        assert_eq!(state.sections.len(), 2);
        assert!(state.sections[0].is_completed());
        assert_eq!(state.pending_sections().len(), 1);
        assert_eq!(state.completed_count(), 1);
    }

    #[test]
    fn test_section_reset_clears_content() {
        let mut s = Section::pending("A", "a");
        s.complete("text".into(), vec!["src".into()]);
        s.reset();
        assert!(s.is_pending());
        assert!(s.content.is_empty());
        assert!(s.sources.is_empty());
    }

    #[test]
    fn test_state_serde_roundtrip_keeps_sections() {
        let mut state = ResearchState::new("t1", "q");
        state.sections.push(Section::pending("A", "a"));
        state.status = RunStatus::AwaitingInput;
        let json = serde_json::to_string(&state).unwrap();
        let back: ResearchState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.sections, state.sections);
        assert_eq!(back.status, RunStatus::AwaitingInput);
    }

    #[test]
    fn test_priority_rank_order() {
        assert!(Priority::High.rank() < Priority::Medium.rank());
        assert!(Priority::Medium.rank() < Priority::Low.rank());
    }
}
