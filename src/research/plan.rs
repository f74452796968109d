//! 规划阶段：生成或复用章节大纲，并为每个 pending 章节派发一个并行任务
//!
//! 三条互斥路径：
//! - 复用：已有章节（评审回环），只派发 pending 章节，不重新生成简报
//! - 探索驱动：有 discovered_items 时，生成 概述 + 每个实体一章 + 对比 三类章节
//! - 默认：结构化输出生成 3~7 个章节

use std::collections::HashSet;

use tokio_util::sync::CancellationToken;

use crate::core::state::{DiscoveredItem, ResearchState, Section, StateUpdate};
use crate::llm::invoke_structured_prompt;
use crate::memory::buffer_string;
use crate::research::prompts::{today, PromptKind};
use crate::research::schemas::ResearchBrief;
use crate::research::{truncate_chars, ResearchContext, ResearchEvent, SectionTask, Stage, StageOutcome};

pub const OVERVIEW_TITLE: &str = "Overview and Landscape";
pub const COMPARISON_TITLE: &str = "Comparison and Recommendations";
pub const DEFAULT_CATEGORY: &str = "Other";

const MAX_SECTIONS: usize = 7;
const FALLBACK_TITLE_CHARS: usize = 80;

pub async fn run(state: &ResearchState, ctx: &ResearchContext, cancel: &CancellationToken) -> StageOutcome {
    if !state.sections.is_empty() {
        return reuse(state, ctx);
    }

    let (sections, brief) = if state.discovered_items.is_empty() {
        default_plan(state, ctx, cancel).await
    } else {
        let (sections, brief) = sections_from_discovery(state, ctx);
        tracing::info!(
            thread_id = %state.thread_id,
            items = state.discovered_items.len(),
            sections = sections.len(),
            "Planned sections from discovered items"
        );
        (sections, brief)
    };

    ctx.emit(ResearchEvent::PlanReady {
        sections: sections.iter().map(|s| s.title.clone()).collect(),
    });
    let tasks = tasks_for(&sections, &brief, ctx);
    StageOutcome::FanOut {
        tasks,
        update: StateUpdate {
            research_brief: Some(brief),
            sections,
            max_review_iterations: Some(ctx.config.max_review_iterations),
            ..Default::default()
        },
    }
}

/// 评审回环：只派发 pending 章节，沿用已有简报
fn reuse(state: &ResearchState, ctx: &ResearchContext) -> StageOutcome {
    let pending = state.pending_sections();
    tracing::info!(
        thread_id = %state.thread_id,
        pending = pending.len(),
        total = state.sections.len(),
        "Reusing existing plan"
    );
    if pending.is_empty() {
        return StageOutcome::goto(Stage::Aggregate, StateUpdate::default());
    }
    StageOutcome::FanOut {
        tasks: tasks_for(&pending, &state.research_brief, ctx),
        update: StateUpdate::default(),
    }
}

fn tasks_for(sections: &[Section], brief: &str, ctx: &ResearchContext) -> Vec<SectionTask> {
    sections
        .iter()
        .filter(|s| s.is_pending())
        .map(|s| SectionTask {
            section: s.clone(),
            research_brief: brief.to_string(),
            max_tool_calls: ctx.config.max_tool_calls,
        })
        .collect()
}

/// 丢弃空标题与重复标题（先出现者保留）
fn dedupe(sections: Vec<Section>) -> Vec<Section> {
    let mut seen = HashSet::new();
    sections
        .into_iter()
        .filter(|s| !s.title.trim().is_empty() && seen.insert(s.title.clone()))
        .collect()
}

/// 按分类首次出现顺序分组，组内按优先级 high → medium → low 稳定排序
pub fn group_by_category(items: &[DiscoveredItem]) -> Vec<(String, Vec<DiscoveredItem>)> {
    let mut groups: Vec<(String, Vec<DiscoveredItem>)> = Vec::new();
    for item in items {
        let category = if item.category.trim().is_empty() {
            DEFAULT_CATEGORY.to_string()
        } else {
            item.category.trim().to_string()
        };
        match groups.iter_mut().find(|(c, _)| *c == category) {
            Some((_, members)) => members.push(item.clone()),
            None => groups.push((category, vec![item.clone()])),
        }
    }
    for (_, members) in groups.iter_mut() {
        members.sort_by_key(|i| i.priority.rank());
    }
    groups
}

fn sections_from_discovery(state: &ResearchState, ctx: &ResearchContext) -> (Vec<Section>, String) {
    let items = &state.discovered_items;
    let groups = group_by_category(items);

    let mut sections = vec![Section::pending(
        OVERVIEW_TITLE,
        format!(
            "Give an overall picture of all discovered options: landscape, main categories and trends. Covers {} options in {} categories.",
            items.len(),
            groups.len()
        ),
    )];
    for (category, members) in &groups {
        for item in members {
            sections.push(Section::pending(
                item.name.trim(),
                format!(
                    "In-depth research on {} ({}): {}. Cover introduction, core features, use cases, pros and cons, and links (website, repository, papers).",
                    item.name.trim(),
                    category,
                    item.brief
                ),
            ));
        }
    }
    sections.push(Section::pending(
        COMPARISON_TITLE,
        format!(
            "Compare all {} options on features, performance, ease of use and deployment requirements, and give recommendations for different scenarios.",
            items.len()
        ),
    ));
    let sections = dedupe(sections);

    let sections_text = sections_text(&sections);
    let categories_text = groups
        .iter()
        .map(|(c, members)| format!("{}({})", c, members.len()))
        .collect::<Vec<_>>()
        .join(", ");
    let query = state.query();
    let total = items.len().to_string();
    let brief = ctx.render(
        PromptKind::BriefFromDiscovery,
        &[
            ("original_query", query.as_str()),
            ("total_items", total.as_str()),
            ("categories_text", categories_text.as_str()),
            ("query_type", state.query_type.as_str()),
            ("output_format", state.output_format.as_str()),
            ("sections_text", sections_text.as_str()),
        ],
    );
    (sections, brief)
}

async fn default_plan(state: &ResearchState, ctx: &ResearchContext, cancel: &CancellationToken) -> (Vec<Section>, String) {
    let messages_text = buffer_string(&state.messages);
    let date = today();
    let prompt = ctx.render(
        PromptKind::Plan,
        &[("messages", messages_text.as_str()), ("date", date.as_str())],
    );

    let plan = match invoke_structured_prompt::<ResearchBrief>(ctx.llm.as_ref(), &prompt, cancel).await {
        Ok(brief) => {
            let mut sections = dedupe(
                brief
                    .sections
                    .iter()
                    .map(|p| Section::pending(p.title.trim(), p.description.trim()))
                    .collect(),
            );
            if sections.len() > MAX_SECTIONS {
                tracing::warn!(planned = sections.len(), "Plan has too many sections, truncating");
                sections.truncate(MAX_SECTIONS);
            }
            (!sections.is_empty()).then_some((brief, sections))
        }
        Err(e) => {
            tracing::warn!(thread_id = %state.thread_id, error = %e, "Planning failed, falling back to a single section");
            None
        }
    };

    let query = state.query();
    let (brief, sections) = plan.unwrap_or_else(|| {
        let title = truncate_chars(query.lines().next().unwrap_or("Research"), FALLBACK_TITLE_CHARS);
        let title = if title.trim().is_empty() { "Research".to_string() } else { title };
        (
            ResearchBrief {
                title: title.clone(),
                objective: query.clone(),
                sections: Vec::new(),
                scope: String::new(),
            },
            vec![Section::pending(title, query.clone())],
        )
    });
    tracing::info!(thread_id = %state.thread_id, sections = sections.len(), title = %brief.title, "Research plan ready");

    let sections_text = sections_text(&sections);
    let brief_text = ctx.render(
        PromptKind::BriefFromPlan,
        &[
            ("title", brief.title.as_str()),
            ("objective", brief.objective.as_str()),
            ("scope", brief.scope.as_str()),
            ("query_type", state.query_type.as_str()),
            ("output_format", state.output_format.as_str()),
            ("sections_text", sections_text.as_str()),
        ],
    );
    (sections, brief_text)
}

fn sections_text(sections: &[Section]) -> String {
    sections
        .iter()
        .map(|s| format!("- **{}**: {}", s.title, s.description))
        .collect::<Vec<_>>()
        .join("\n")
}
