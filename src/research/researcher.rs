//! 章节研究者：一个章节一个 worker
//!
//! 在私有副本上把章节标记为 researching，跑有界工具循环收集材料，
//! 再用结构化输出压缩成章节正文。只返回这一个章节，由编排器按标题合并。

use tokio_util::sync::CancellationToken;

use crate::core::state::{Section, SectionStatus};
use crate::core::ResearchError;
use crate::llm::invoke_structured_prompt;
use crate::memory::Message;
use crate::research::prompts::{today, PromptKind};
use crate::research::schemas::SectionContent;
use crate::research::tool_loop::ToolLoop;
use crate::research::{truncate_chars, ResearchContext, ResearchEvent, SectionTask};

/// 压缩阶段的输入上限
const COMPRESS_INPUT_CHARS: usize = 50_000;
/// 压缩失败时保留的原始笔记
const FALLBACK_CONTENT_CHARS: usize = 8_000;

pub const NO_MATERIAL_NOTICE: &str = "No research material could be gathered for this section.";

/// 研究一个章节；被取消时返回 None（章节保持 pending）
pub async fn run(task: SectionTask, ctx: &ResearchContext, cancel: &CancellationToken) -> Option<Section> {
    let mut section = task.section;
    section.status = SectionStatus::Researching;
    tracing::info!(section = %section.title, "Researching section");

    let date = today();
    let max_tool_calls = task.max_tool_calls.to_string();
    let system = ctx.render(
        PromptKind::Researcher,
        &[
            ("date", date.as_str()),
            ("research_brief", task.research_brief.as_str()),
            ("section_title", section.title.as_str()),
            ("section_description", section.description.as_str()),
            ("max_tool_calls", max_tool_calls.as_str()),
        ],
    );
    let executor = ctx.loop_executor();
    let outcome = ToolLoop::new(ctx.llm.as_ref(), &executor, task.max_tool_calls)
        .label(section.title.clone())
        .events(ctx.events.clone())
        .verbose(ctx.config.verbose)
        .run(
            vec![Message::system(system), Message::user(section.description.clone())],
            cancel,
        )
        .await;

    if outcome.is_cancelled() {
        tracing::info!(section = %section.title, "Section research cancelled");
        return None;
    }
    tracing::debug!(
        section = %section.title,
        iterations = outcome.iterations,
        exit = ?outcome.exit,
        notes = outcome.notes.len(),
        "Section tool loop finished"
    );

    let raw = outcome.joined_notes();
    let Some((content, sources)) = compress(ctx, &section, &raw, cancel).await else {
        tracing::info!(section = %section.title, "Section compression cancelled");
        return None;
    };
    section.complete(content, sources);

    ctx.emit(ResearchEvent::SectionCompleted {
        title: section.title.clone(),
        sources: section.sources.len(),
    });
    tracing::info!(section = %section.title, sources = section.sources.len(), "Section completed");
    Some(section)
}

/// 将原始笔记压缩为章节正文与来源；失败时退回截断的原始笔记，被取消时返回 None
async fn compress(
    ctx: &ResearchContext,
    section: &Section,
    raw: &str,
    cancel: &CancellationToken,
) -> Option<(String, Vec<String>)> {
    if raw.trim().is_empty() {
        return Some((NO_MATERIAL_NOTICE.to_string(), Vec::new()));
    }

    let raw_content = truncate_chars(raw, COMPRESS_INPUT_CHARS);
    let prompt = ctx.render(
        PromptKind::Compress,
        &[
            ("section_title", section.title.as_str()),
            ("section_description", section.description.as_str()),
            ("raw_content", raw_content.as_str()),
        ],
    );

    let compressed = match invoke_structured_prompt::<SectionContent>(ctx.llm.as_ref(), &prompt, cancel).await {
        Ok(sc) if !sc.content.trim().is_empty() => {
            let mut content = sc.content.trim().to_string();
            let findings: Vec<_> = sc.key_findings.iter().filter(|f| !f.trim().is_empty()).collect();
            if !findings.is_empty() {
                content.push_str("\n\n**Key findings**:\n");
                for f in findings {
                    content.push_str(&format!("- {}\n", f.trim()));
                }
            }
            let sources = sc.sources.into_iter().filter(|s| !s.trim().is_empty()).collect();
            (content, sources)
        }
        Ok(_) => {
            tracing::warn!(section = %section.title, "Compression returned empty content, using raw notes");
            (truncate_chars(raw, FALLBACK_CONTENT_CHARS), Vec::new())
        }
        Err(ResearchError::Cancelled) => return None,
        Err(e) => {
            tracing::warn!(section = %section.title, error = %e, "Compression failed, using raw notes");
            (truncate_chars(raw, FALLBACK_CONTENT_CHARS), Vec::new())
        }
    };
    Some(compressed)
}
