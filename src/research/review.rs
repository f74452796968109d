//! 评审：判断章节覆盖是否足够，不足时把指定章节重置为 pending 回到规划
//!
//! 每次进入评审 review_iterations 恰好加一；达到 max_review_iterations 后无论结论如何都进入报告。

use std::collections::HashSet;

use tokio_util::sync::CancellationToken;

use crate::core::state::{ResearchState, StateUpdate};
use crate::llm::invoke_structured_prompt;
use crate::research::prompts::PromptKind;
use crate::research::schemas::ReviewResult;
use crate::research::{truncate_chars, ResearchContext, ResearchEvent, Stage, StageOutcome};

/// 评审摘要中每个章节的正文预览长度
const SECTION_PREVIEW_CHARS: usize = 500;

pub async fn run(state: &ResearchState, ctx: &ResearchContext, cancel: &CancellationToken) -> StageOutcome {
    let iteration = state.review_iterations + 1;
    let max_iterations = if state.max_review_iterations == 0 {
        ctx.config.max_review_iterations
    } else {
        state.max_review_iterations
    };

    let summary = sections_summary(state);
    let iteration_text = iteration.to_string();
    let max_text = max_iterations.to_string();
    let prompt = ctx.render(
        PromptKind::Review,
        &[
            ("research_brief", state.research_brief.as_str()),
            ("iteration", iteration_text.as_str()),
            ("max_iterations", max_text.as_str()),
            ("sections_summary", summary.as_str()),
        ],
    );

    let result = match invoke_structured_prompt::<ReviewResult>(ctx.llm.as_ref(), &prompt, cancel).await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(thread_id = %state.thread_id, error = %e, "Review failed, proceeding to report");
            ctx.emit(ResearchEvent::ReviewDecision {
                iteration,
                sufficient: true,
                score: 0,
                retry: Vec::new(),
            });
            return to_report(iteration);
        }
    };

    tracing::info!(
        thread_id = %state.thread_id,
        iteration,
        max_iterations,
        sufficient = result.is_sufficient,
        score = result.overall_score,
        gaps = result.gaps.len(),
        "Review finished"
    );

    if result.is_sufficient || iteration >= max_iterations {
        ctx.emit(ResearchEvent::ReviewDecision {
            iteration,
            sufficient: result.is_sufficient,
            score: result.overall_score,
            retry: Vec::new(),
        });
        return to_report(iteration);
    }

    let wanted: HashSet<&str> = result.sections_to_retry.iter().map(|t| t.trim()).collect();
    let retry: Vec<_> = state
        .sections
        .iter()
        .filter(|s| wanted.contains(s.title.as_str()))
        .map(|s| {
            let mut reset = s.clone();
            reset.reset();
            reset
        })
        .collect();
    let unknown: Vec<_> = wanted
        .iter()
        .filter(|t| !state.sections.iter().any(|s| s.title == **t))
        .collect();
    if !unknown.is_empty() {
        tracing::warn!(unknown = ?unknown, "Review named sections that do not exist, ignoring");
    }

    ctx.emit(ResearchEvent::ReviewDecision {
        iteration,
        sufficient: false,
        score: result.overall_score,
        retry: retry.iter().map(|s| s.title.clone()).collect(),
    });
    if retry.is_empty() {
        tracing::info!(thread_id = %state.thread_id, "Review found gaps but named no known section, proceeding to report");
        return to_report(iteration);
    }

    tracing::info!(thread_id = %state.thread_id, retry = retry.len(), "Sending sections back for research");
    StageOutcome::goto(
        Stage::Plan,
        StateUpdate {
            sections: retry,
            review_iterations: Some(iteration),
            ..Default::default()
        },
    )
}

fn to_report(iteration: u32) -> StageOutcome {
    StageOutcome::goto(
        Stage::Report,
        StateUpdate {
            review_iterations: Some(iteration),
            ..Default::default()
        },
    )
}

fn sections_summary(state: &ResearchState) -> String {
    state
        .sections
        .iter()
        .map(|s| {
            let preview = if s.content.trim().is_empty() {
                "(no content)".to_string()
            } else {
                let p = truncate_chars(&s.content, SECTION_PREVIEW_CHARS);
                if p.len() < s.content.len() {
                    format!("{p}...")
                } else {
                    p
                }
            };
            format!(
                "### {}\nStatus: {:?}\nGoal: {}\nSources: {}\n{}",
                s.title,
                s.status,
                s.description,
                s.sources.len(),
                preview
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
