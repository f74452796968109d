//! 探索阶段：对枚举类查询先广泛搜索候选实体，再结构化提取为 DiscoveredItem 列表
//!
//! 工具循环最多 max_discover_iterations 轮；提取失败时返回空列表与原始文本摘要，始终进入规划。

use tokio_util::sync::CancellationToken;

use crate::core::state::{ResearchState, StateUpdate};
use crate::llm::invoke_structured_prompt;
use crate::memory::Message;
use crate::research::prompts::PromptKind;
use crate::research::schemas::DiscoveryResult;
use crate::research::tool_loop::ToolLoop;
use crate::research::{truncate_chars, ResearchContext, Stage, StageOutcome};

/// 提取阶段的输入上限
const EXTRACT_INPUT_CHARS: usize = 50_000;
/// 提取失败时摘要中保留的原始文本
const FALLBACK_RAW_CHARS: usize = 5_000;

pub async fn run(state: &ResearchState, ctx: &ResearchContext, cancel: &CancellationToken) -> StageOutcome {
    let query = state.query();
    let target = if state.discovery_target.trim().is_empty() {
        query.clone()
    } else {
        state.discovery_target.clone()
    };
    let max_iterations = ctx.config.max_discover_iterations;
    let max_iterations_text = max_iterations.to_string();

    let system = ctx.render(
        PromptKind::Discover,
        &[
            ("query", query.as_str()),
            ("discovery_target", target.as_str()),
            ("max_iterations", max_iterations_text.as_str()),
        ],
    );
    let executor = ctx.loop_executor();
    let outcome = ToolLoop::new(ctx.llm.as_ref(), &executor, max_iterations)
        .label("discovery")
        .events(ctx.events.clone())
        .verbose(ctx.config.verbose)
        .run(vec![Message::system(system), Message::user(query.clone())], cancel)
        .await;
    tracing::info!(
        thread_id = %state.thread_id,
        iterations = outcome.iterations,
        exit = ?outcome.exit,
        "Discovery search finished"
    );

    if outcome.is_cancelled() {
        tracing::info!(thread_id = %state.thread_id, "Discovery cancelled, skipping extraction");
        return StageOutcome::goto(Stage::Plan, StateUpdate::default());
    }

    let raw = outcome.joined_notes();
    let result = extract(ctx, &query, &target, &raw, cancel).await;
    tracing::info!(
        thread_id = %state.thread_id,
        entities = result.entities.len(),
        categories = result.categories.len(),
        "Discovery extraction finished"
    );

    StageOutcome::goto(
        Stage::Plan,
        StateUpdate {
            discovered_items: Some(result.entities),
            discovery_summary: Some(result.summary),
            ..Default::default()
        },
    )
}

async fn extract(
    ctx: &ResearchContext,
    query: &str,
    target: &str,
    raw: &str,
    cancel: &CancellationToken,
) -> DiscoveryResult {
    let raw_content = truncate_chars(raw, EXTRACT_INPUT_CHARS);
    let prompt = ctx.render(
        PromptKind::ExtractEntities,
        &[
            ("query", query),
            ("discovery_target", target),
            ("raw_content", raw_content.as_str()),
        ],
    );

    match invoke_structured_prompt::<DiscoveryResult>(ctx.llm.as_ref(), &prompt, cancel).await {
        Ok(mut result) => {
            result.entities.retain(|e| !e.name.trim().is_empty());
            if result.total_found == 0 {
                result.total_found = result.entities.len();
            }
            result
        }
        Err(e) => {
            tracing::warn!(error = %e, "Entity extraction failed, continuing without discovered items");
            DiscoveryResult {
                summary: format!(
                    "Entity extraction failed: {}\n\n{}",
                    e,
                    truncate_chars(raw, FALLBACK_RAW_CHARS)
                ),
                ..Default::default()
            }
        }
    }
}
