//! 报告合成：把已完成的章节与简报交给模型写成最终报告
//!
//! 上下文超长时把章节材料截断 10% 重试，最多 3 次；重试耗尽、其他错误或模型返回空文本时
//! 输出带标注的降级报告（简报/查询 + 材料摘录）。

use crate::core::state::{ResearchState, StateUpdate};
use crate::core::ResearchError;
use crate::memory::Message;
use crate::research::prompts::{today, PromptKind};
use crate::research::{truncate_chars, ResearchContext, ResearchEvent, StageOutcome};

const MAX_ATTEMPTS: u32 = 3;
const SOURCES_PER_SECTION: usize = 5;
const FALLBACK_EXCERPT_CHARS: usize = 2_000;

pub const FALLBACK_NOTICE: &str =
    "> Note: the final report could not be generated. Below is the research brief and an excerpt of the collected material.";

pub async fn run(state: &ResearchState, ctx: &ResearchContext) -> StageOutcome {
    let gathered = gathered_info(state);
    let query = state.query();
    let date = today();

    let mut material = gathered.clone();
    let mut report = None;
    for attempt in 1..=MAX_ATTEMPTS {
        let findings = if material.trim().is_empty() {
            "(no research findings were collected)".to_string()
        } else {
            material.clone()
        };
        let prompt = ctx.render(
            PromptKind::FinalReport,
            &[
                ("date", date.as_str()),
                ("query", query.as_str()),
                ("research_brief", state.research_brief.as_str()),
                ("output_format", state.output_format.as_str()),
                ("gathered_info", findings.as_str()),
            ],
        );

        match ctx.llm.complete(&[Message::user(prompt)]).await.map_err(ResearchError::from) {
            Ok(text) if !text.trim().is_empty() => {
                report = Some(text.trim().to_string());
                break;
            }
            Ok(_) => {
                tracing::warn!(thread_id = %state.thread_id, attempt, "Report generation returned empty output");
                break;
            }
            Err(e) if e.is_size_limit() && attempt < MAX_ATTEMPTS => {
                let keep = material.chars().count() * 9 / 10;
                tracing::warn!(thread_id = %state.thread_id, attempt, keep, "Report prompt too long, truncating material");
                material = truncate_chars(&material, keep);
            }
            Err(e) => {
                tracing::error!(thread_id = %state.thread_id, attempt, error = %e, "Report generation failed");
                ctx.emit(ResearchEvent::Error {
                    text: format!("Report generation failed: {e}"),
                });
                break;
            }
        }
    }

    let report = report.unwrap_or_else(|| fallback_report(state, &query, &gathered));
    tracing::info!(thread_id = %state.thread_id, chars = report.chars().count(), "Final report ready");
    ctx.emit(ResearchEvent::ReportReady {
        chars: report.chars().count(),
    });
    StageOutcome::Finish {
        update: StateUpdate {
            final_report: Some(report),
            ..Default::default()
        },
    }
}

/// 已完成章节的材料：`## 标题` + 正文 + 最多 5 个来源，章节间用分隔线
pub fn gathered_info(state: &ResearchState) -> String {
    state
        .sections
        .iter()
        .filter(|s| s.is_completed())
        .map(|s| {
            let mut block = format!("## {}\n\n{}", s.title, s.content);
            if !s.sources.is_empty() {
                let sources: Vec<_> = s.sources.iter().take(SOURCES_PER_SECTION).map(String::as_str).collect();
                block.push_str(&format!("\n\n**Sources**: {}", sources.join(", ")));
            }
            block
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

fn fallback_report(state: &ResearchState, query: &str, gathered: &str) -> String {
    let brief = if state.research_brief.trim().is_empty() {
        query
    } else {
        state.research_brief.as_str()
    };
    let excerpt = if gathered.trim().is_empty() {
        "(no research findings were collected)".to_string()
    } else {
        truncate_chars(gathered, FALLBACK_EXCERPT_CHARS)
    };
    format!("# Research Report (fallback)\n\n{FALLBACK_NOTICE}\n\n## Research brief\n\n{brief}\n\n## Material excerpt\n\n{excerpt}\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::ResearchConfig;
    use crate::core::state::Section;
    use crate::llm::{LlmError, MockLlmClient, MockReply};
    use crate::tools::ToolRegistry;

    fn state() -> ResearchState {
        let mut state = ResearchState::new("t", "rust async runtimes");
        state.research_brief = "# Async runtimes".into();
        let mut a = Section::pending("Tokio", "d");
        a.complete("Tokio is the most used runtime.".into(), (1..=7).map(|i| format!("https://s{i}.dev")).collect());
        state.sections = vec![a, Section::pending("smol", "d")];
        state
    }

    fn report_of(out: StageOutcome) -> String {
        match out {
            StageOutcome::Finish { update } => update.final_report.unwrap(),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_gathered_info_uses_completed_sections_and_caps_sources() {
        let info = gathered_info(&state());
        assert!(info.starts_with("## Tokio\n\nTokio is the most used runtime."));
        assert!(info.contains("https://s5.dev"));
        assert!(!info.contains("https://s6.dev"));
        assert!(!info.contains("smol"));
    }

    #[tokio::test]
    async fn test_writes_report() {
        let llm = Arc::new(
            MockLlmClient::new().on("Write the final research report", vec![MockReply::text("# Report\n\nBody")]),
        );
        let ctx = ResearchContext::new(llm.clone(), ToolRegistry::new(), ResearchConfig::default());
        assert_eq!(report_of(run(&state(), &ctx).await), "# Report\n\nBody");
        assert!(llm.prompts()[0].contains("Tokio is the most used runtime."));
    }

    #[tokio::test]
    async fn test_size_limit_retries_then_falls_back() {
        let llm = Arc::new(
            MockLlmClient::new().with_default(MockReply::Fail(LlmError::ContextLengthExceeded("too long".into()))),
        );
        let ctx = ResearchContext::new(llm.clone(), ToolRegistry::new(), ResearchConfig::default());
        let report = report_of(run(&state(), &ctx).await);
        assert_eq!(llm.prompts().len(), 3);
        assert!(report.contains(FALLBACK_NOTICE));
        assert!(report.contains("# Async runtimes"));
        assert!(report.contains("Tokio is the most used runtime."));
    }

    #[tokio::test]
    async fn test_size_limit_then_success() {
        let llm = Arc::new(MockLlmClient::new().on(
            "Write the final research report",
            vec![
                MockReply::Fail(LlmError::ContextLengthExceeded("too long".into())),
                MockReply::text("shorter report"),
            ],
        ));
        let ctx = ResearchContext::new(llm.clone(), ToolRegistry::new(), ResearchConfig::default());
        assert_eq!(report_of(run(&state(), &ctx).await), "shorter report");
        let prompts = llm.prompts();
        assert!(prompts[1].len() < prompts[0].len());
    }

    #[tokio::test]
    async fn test_empty_output_falls_back() {
        let llm = Arc::new(MockLlmClient::new().with_default(MockReply::text("  ")));
        let ctx = ResearchContext::new(llm, ToolRegistry::new(), ResearchConfig::default());
        assert!(report_of(run(&state(), &ctx).await).starts_with("# Research Report (fallback)"));
    }
}
