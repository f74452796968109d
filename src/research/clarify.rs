//! 澄清阶段：判断是否需要先向用户提一个问题
//!
//! 可选先跑一个有界（≤2 轮）的工具搜索子循环了解陌生名词；结构化决定解码失败时默认不澄清。

use tokio_util::sync::CancellationToken;

use crate::core::state::{ClarificationOutcome, ResearchState, StateUpdate};
use crate::llm::invoke_structured_prompt;
use crate::memory::{buffer_string, joined_user_text, Message};
use crate::research::prompts::{today, PromptKind};
use crate::research::schemas::ClarifyWithUser;
use crate::research::tool_loop::ToolLoop;
use crate::research::{truncate_chars, ResearchContext, ResearchEvent, Stage, StageOutcome};

/// 解码失败时使用的确认语
pub const FALLBACK_VERIFICATION: &str =
    "I have enough information to start the research. Proceeding with the request as stated.";

const SEARCH_CONTEXT_CHARS: usize = 8000;

pub async fn run(state: &ResearchState, ctx: &ResearchContext, cancel: &CancellationToken) -> StageOutcome {
    let original_query = joined_user_text(&state.messages);

    if !ctx.config.allow_clarification {
        tracing::info!(thread_id = %state.thread_id, "Clarification disabled, proceeding to analysis");
        return StageOutcome::goto(
            Stage::Analyze,
            StateUpdate {
                original_query: Some(original_query),
                ..Default::default()
            },
        );
    }

    let messages_text = buffer_string(&state.messages);
    let search_context = background_search(ctx, &messages_text, cancel).await;
    let date = today();
    let prompt = ctx.render(
        PromptKind::Clarify,
        &[
            ("messages", messages_text.as_str()),
            ("date", date.as_str()),
            ("search_context", search_context.as_str()),
        ],
    );

    let decision = match invoke_structured_prompt::<ClarifyWithUser>(ctx.llm.as_ref(), &prompt, cancel).await {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!(thread_id = %state.thread_id, error = %e, "Clarification decision failed, proceeding without clarification");
            ClarifyWithUser {
                need_clarification: false,
                question: String::new(),
                verification: FALLBACK_VERIFICATION.to_string(),
            }
        }
    };

    let question = decision.question.trim().to_string();
    if decision.need_clarification && !question.is_empty() {
        tracing::info!(thread_id = %state.thread_id, question = %question, "Clarification needed");
        ctx.emit(ResearchEvent::ClarificationRequested {
            question: question.clone(),
        });
        return StageOutcome::AwaitUser {
            update: StateUpdate {
                messages: vec![Message::assistant(question.clone())],
                original_query: Some(original_query),
                clarification: Some(ClarificationOutcome {
                    need_clarification: true,
                    question,
                    verification: String::new(),
                }),
                ..Default::default()
            },
        };
    }

    let verification = decision.verification.trim().to_string();
    tracing::info!(thread_id = %state.thread_id, "No clarification needed");
    StageOutcome::goto(
        Stage::Analyze,
        StateUpdate {
            messages: if verification.is_empty() {
                Vec::new()
            } else {
                vec![Message::assistant(verification.clone())]
            },
            original_query: Some(original_query),
            clarification: Some(ClarificationOutcome {
                need_clarification: false,
                question: String::new(),
                verification,
            }),
            ..Default::default()
        },
    )
}

/// 澄清前的搜索子循环；关闭或没有外部工具时返回空串
async fn background_search(ctx: &ResearchContext, messages_text: &str, cancel: &CancellationToken) -> String {
    let rounds = ctx.config.clarify_search_iterations.min(2);
    if rounds == 0 || ctx.tools.is_empty() {
        return String::new();
    }

    let date = today();
    let system = ctx.render(PromptKind::ClarifySearch, &[("messages", messages_text), ("date", date.as_str())]);
    let executor = ctx.loop_executor();
    let outcome = ToolLoop::new(ctx.llm.as_ref(), &executor, rounds)
        .events(ctx.events.clone())
        .verbose(ctx.config.verbose)
        .run(vec![Message::system(system), Message::user(messages_text)], cancel)
        .await;

    tracing::debug!(iterations = outcome.iterations, exit = ?outcome.exit, "Clarification search finished");
    if outcome.notes.is_empty() {
        return String::new();
    }
    format!(
        "Background research already done:\n{}",
        truncate_chars(&outcome.joined_notes(), SEARCH_CONTEXT_CHARS)
    )
}
