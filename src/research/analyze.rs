//! 查询分析：分类查询类型与输出形式，决定是否需要探索阶段

use tokio_util::sync::CancellationToken;

use crate::core::state::{OutputFormat, QueryType, ResearchState, StateUpdate};
use crate::llm::invoke_structured_prompt;
use crate::memory::buffer_string;
use crate::research::prompts::PromptKind;
use crate::research::schemas::QueryAnalysis;
use crate::research::{ResearchContext, Stage, StageOutcome};

pub async fn run(state: &ResearchState, ctx: &ResearchContext, cancel: &CancellationToken) -> StageOutcome {
    let messages_text = buffer_string(&state.messages);
    let prompt = ctx.render(PromptKind::Analyze, &[("messages", messages_text.as_str())]);

    let analysis = match invoke_structured_prompt::<QueryAnalysis>(ctx.llm.as_ref(), &prompt, cancel).await {
        Ok(a) => a,
        Err(e) => {
            tracing::warn!(thread_id = %state.thread_id, error = %e, "Query analysis failed, defaulting to general/prose");
            QueryAnalysis {
                query_type: QueryType::General,
                output_format: OutputFormat::Prose,
                needs_discovery: false,
                discovery_target: String::new(),
                reasoning: String::new(),
            }
        }
    };

    let discover = analysis.needs_discovery && analysis.query_type == QueryType::List;
    tracing::info!(
        thread_id = %state.thread_id,
        query_type = analysis.query_type.as_str(),
        output_format = analysis.output_format.as_str(),
        needs_discovery = analysis.needs_discovery,
        "Query analyzed"
    );

    let next = if discover { Stage::Discover } else { Stage::Plan };
    StageOutcome::goto(
        next,
        StateUpdate {
            query_type: Some(analysis.query_type),
            output_format: Some(analysis.output_format),
            needs_discovery: Some(discover),
            discovery_target: Some(analysis.discovery_target),
            ..Default::default()
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::ResearchConfig;
    use crate::llm::{MockLlmClient, MockReply};
    use crate::tools::ToolRegistry;

    async fn analyze_with(reply: MockReply) -> (Stage, StateUpdate) {
        let llm = MockLlmClient::new().on("QueryAnalysis", vec![reply]);
        let ctx = ResearchContext::new(Arc::new(llm), ToolRegistry::new(), ResearchConfig::default());
        match run(&ResearchState::new("t", "q"), &ctx, &CancellationToken::new()).await {
            StageOutcome::Goto { next, update } => (next, update),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_list_with_discovery_routes_to_discover() {
        let (next, update) = analyze_with(MockReply::json(serde_json::json!({
            "query_type": "list",
            "output_format": "table",
            "needs_discovery": true,
            "discovery_target": "open-source vector databases"
        })))
        .await;
        assert_eq!(next, Stage::Discover);
        assert_eq!(update.output_format, Some(OutputFormat::Table));
        assert_eq!(update.discovery_target.as_deref(), Some("open-source vector databases"));
    }

    #[tokio::test]
    async fn test_discovery_ignored_for_non_list() {
        let (next, update) = analyze_with(MockReply::json(serde_json::json!({
            "query_type": "comparison",
            "output_format": "table",
            "needs_discovery": true
        })))
        .await;
        assert_eq!(next, Stage::Plan);
        assert_eq!(update.needs_discovery, Some(false));
    }

    #[tokio::test]
    async fn test_failure_defaults_to_general_prose() {
        let (next, update) = analyze_with(MockReply::text("no idea")).await;
        assert_eq!(next, Stage::Plan);
        assert_eq!(update.query_type, Some(QueryType::General));
        assert_eq!(update.output_format, Some(OutputFormat::Prose));
    }

    #[tokio::test]
    async fn test_cancelled_analysis_returns_default_without_waiting() {
        let llm = MockLlmClient::new()
            .on("QueryAnalysis", vec![MockReply::json(serde_json::json!({"query_type": "list"}))])
            .with_delay(std::time::Duration::from_secs(5));
        let ctx = ResearchContext::new(Arc::new(llm), ToolRegistry::new(), ResearchConfig::default());
        let token = CancellationToken::new();
        token.cancel();

        let started = std::time::Instant::now();
        match run(&ResearchState::new("t", "q"), &ctx, &token).await {
            StageOutcome::Goto { next, update } => {
                assert_eq!(next, Stage::Plan);
                assert_eq!(update.query_type, Some(QueryType::General));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
    }
}
