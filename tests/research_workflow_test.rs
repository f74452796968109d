//! 研究工作流端到端测试：脚本化 Mock LLM 驱动 ResearchEngine 跑完整流程

use std::sync::Arc;
use std::time::Duration;

use bee_research::config::ResearchConfig;
use bee_research::core::{CheckpointStore, ResearchState, RunStatus, SqliteCheckpointStore};
use bee_research::llm::{MockLlmClient, MockReply};
use bee_research::research::ResearchEvent;
use bee_research::{ResearchEngine, ResearchEngineBuilder, ResearchError, RunOutcome};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn no_clarification() -> MockReply {
    MockReply::json(json!({
        "need_clarification": false,
        "question": "",
        "verification": "Starting research on your topic."
    }))
}

fn general_analysis() -> MockReply {
    MockReply::json(json!({
        "query_type": "general",
        "output_format": "prose",
        "needs_discovery": false
    }))
}

fn two_section_plan() -> MockReply {
    MockReply::json(json!({
        "title": "Rust async runtimes",
        "objective": "Compare runtimes",
        "scope": "2024",
        "sections": [
            {"title": "Alpha", "description": "first part"},
            {"title": "Beta", "description": "second part"}
        ]
    }))
}

fn section_content() -> MockReply {
    MockReply::json(json!({
        "content": "Compressed findings.",
        "sources": ["https://example.com/a"],
        "key_findings": ["one finding"]
    }))
}

fn sufficient_review() -> MockReply {
    MockReply::json(json!({"is_sufficient": true, "overall_score": 8}))
}

/// 澄清 → 分析 → 两个章节 → 评审通过 → 报告
fn standard_llm() -> MockLlmClient {
    MockLlmClient::new()
        .on("ClarifyWithUser", vec![no_clarification()])
        .on("QueryAnalysis", vec![general_analysis()])
        .on("ResearchBrief", vec![two_section_plan()])
        .on("Section to research:", vec![MockReply::text("raw notes from the web")])
        .on("SectionContent", vec![section_content()])
        .on("ReviewResult", vec![sufficient_review()])
        .on("Write the final research report", vec![MockReply::text("# Final Report\n\nAll good.")])
}

fn engine(llm: Arc<MockLlmClient>, config: ResearchConfig) -> ResearchEngine {
    ResearchEngineBuilder::new(llm).config(config).build()
}

async fn archived(engine: &ResearchEngine, outcome: &RunOutcome) -> ResearchState {
    engine.load(outcome.thread_id()).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_full_pipeline_produces_report() {
    let llm = Arc::new(standard_llm());
    let engine = engine(llm.clone(), ResearchConfig::default());

    let outcome = engine
        .run("Compare Rust async runtimes", &CancellationToken::new())
        .await
        .unwrap();
    match &outcome {
        RunOutcome::Completed { report, .. } => assert_eq!(report, "# Final Report\n\nAll good."),
        other => panic!("unexpected outcome: {other:?}"),
    }

    let state = archived(&engine, &outcome).await;
    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.sections.len(), 2);
    assert!(state.sections.iter().all(|s| s.is_completed()));
    assert_eq!(state.review_iterations, 1);
    assert!(state.research_brief.starts_with("# Rust async runtimes"));
    assert_eq!(llm.count_matching("Section to research: Alpha"), 1);
    assert_eq!(llm.count_matching("Section to research: Beta"), 1);
}

#[tokio::test]
async fn test_discovery_query_yields_overview_items_and_comparison() {
    let entities: Vec<_> = ["Qdrant", "Milvus", "Weaviate", "Chroma", "LanceDB"]
        .iter()
        .map(|n| json!({"name": n, "category": "Vector DB", "brief": "db", "source": "https://example.com"}))
        .collect();
    let llm = Arc::new(
        MockLlmClient::new()
            .on("ClarifyWithUser", vec![no_clarification()])
            .on(
                "QueryAnalysis",
                vec![MockReply::json(json!({
                    "query_type": "list",
                    "output_format": "table",
                    "needs_discovery": true,
                    "discovery_target": "open-source vector databases"
                }))],
            )
            .on("discovery phase", vec![MockReply::text("Found five databases.")])
            .on("DiscoveryResult", vec![MockReply::json(json!({"entities": entities, "summary": "five"}))])
            .on("Section to research:", vec![MockReply::text("notes")])
            .on("SectionContent", vec![section_content()])
            .on("ReviewResult", vec![sufficient_review()])
            .on("Write the final research report", vec![MockReply::text("# Vector DBs")]),
    );
    let engine = engine(llm.clone(), ResearchConfig::default());

    let outcome = engine
        .run("What open-source vector databases exist?", &CancellationToken::new())
        .await
        .unwrap();
    let state = archived(&engine, &outcome).await;

    assert_eq!(state.discovered_items.len(), 5);
    assert_eq!(state.sections.len(), 7);
    assert_eq!(state.sections[0].title, "Overview and Landscape");
    assert_eq!(state.sections[6].title, "Comparison and Recommendations");
    assert!(state.sections.iter().all(|s| s.is_completed()));
    assert_eq!(llm.count_matching("Section to research:"), 7);
    assert!(llm.count_matching("Write the final research report") >= 1);
}

#[tokio::test]
async fn test_clarification_suspends_and_resumes() {
    let llm = Arc::new(
        MockLlmClient::new()
            .on(
                "ClarifyWithUser",
                vec![
                    MockReply::json(json!({"need_clarification": true, "question": "Which year?"})),
                    no_clarification(),
                ],
            )
            .on("QueryAnalysis", vec![general_analysis()])
            .on("ResearchBrief", vec![two_section_plan()])
            .on("Section to research:", vec![MockReply::text("notes")])
            .on("SectionContent", vec![section_content()])
            .on("ReviewResult", vec![sufficient_review()])
            .on("Write the final research report", vec![MockReply::text("# Phones 2024")]),
    );
    let engine = engine(llm.clone(), ResearchConfig::default());
    let cancel = CancellationToken::new();

    let first = engine.run("best phones", &cancel).await.unwrap();
    let thread_id = match &first {
        RunOutcome::AwaitingInput { thread_id, question } => {
            assert_eq!(question, "Which year?");
            thread_id.clone()
        }
        other => panic!("expected suspension, got {other:?}"),
    };
    let suspended = engine.load(&thread_id).await.unwrap().unwrap();
    assert_eq!(suspended.status, RunStatus::AwaitingInput);
    assert!(suspended.sections.is_empty());
    assert_eq!(llm.count_matching("QueryAnalysis"), 0);

    let second = engine.resume(&thread_id, "2024", &cancel).await.unwrap();
    assert_eq!(
        second,
        RunOutcome::Completed {
            thread_id: thread_id.clone(),
            report: "# Phones 2024".into()
        }
    );
    let state = engine.load(&thread_id).await.unwrap().unwrap();
    assert_eq!(state.original_query, "best phones\n2024");
    assert!(llm.prompts().iter().any(|p| p.contains("QueryAnalysis") && p.contains("2024")));
}

#[tokio::test]
async fn test_review_retries_only_flagged_section() {
    let llm = Arc::new(
        MockLlmClient::new()
            .on("ClarifyWithUser", vec![no_clarification()])
            .on("QueryAnalysis", vec![general_analysis()])
            .on("ResearchBrief", vec![two_section_plan()])
            .on("Section to research:", vec![MockReply::text("notes")])
            .on("SectionContent", vec![section_content()])
            .on(
                "ReviewResult",
                vec![
                    MockReply::json(json!({
                        "is_sufficient": false,
                        "overall_score": 5,
                        "section_coverage": [
                            {"title": "Alpha", "status": "sufficient"},
                            {"title": "Beta", "status": "partial"}
                        ],
                        "sections_to_retry": ["Beta"]
                    })),
                    sufficient_review(),
                ],
            )
            .on("Write the final research report", vec![MockReply::text("# Report")]),
    );
    let engine = engine(llm.clone(), ResearchConfig::default());

    let outcome = engine.run("q", &CancellationToken::new()).await.unwrap();
    let state = archived(&engine, &outcome).await;

    assert_eq!(llm.count_matching("Section to research: Alpha"), 1);
    assert_eq!(llm.count_matching("Section to research: Beta"), 2);
    assert_eq!(state.review_iterations, 2);
    assert_eq!(state.sections.len(), 2);
    assert!(state.sections.iter().all(|s| s.is_completed()));
    // 复用路径不重新规划
    assert_eq!(llm.count_matching("ResearchBrief"), 1);
}

#[tokio::test]
async fn test_review_cap_forces_report() {
    let llm = Arc::new(
        MockLlmClient::new()
            .on("ClarifyWithUser", vec![no_clarification()])
            .on("QueryAnalysis", vec![general_analysis()])
            .on("ResearchBrief", vec![two_section_plan()])
            .on("Section to research:", vec![MockReply::text("notes")])
            .on("SectionContent", vec![section_content()])
            .on(
                "ReviewResult",
                vec![MockReply::json(json!({
                    "is_sufficient": false,
                    "overall_score": 3,
                    "section_coverage": [
                        {"title": "Alpha", "status": "partial"},
                        {"title": "Beta", "status": "partial"}
                    ],
                    "sections_to_retry": ["Alpha", "Beta"]
                }))],
            )
            .on("Write the final research report", vec![MockReply::text("# Capped")]),
    );
    let config = ResearchConfig {
        max_review_iterations: 2,
        ..ResearchConfig::default()
    };
    let engine = engine(llm.clone(), config);

    let outcome = engine.run("q", &CancellationToken::new()).await.unwrap();
    let state = archived(&engine, &outcome).await;

    assert_eq!(llm.count_matching("ReviewResult"), 2);
    assert_eq!(state.review_iterations, 2);
    assert_eq!(state.final_report, "# Capped");
    assert_eq!(llm.count_matching("Section to research: Alpha"), 2);
}

#[tokio::test]
async fn test_report_retries_after_size_errors() {
    use bee_research::llm::LlmError;

    let long_content = "x".repeat(1000);
    let llm = Arc::new(
        MockLlmClient::new()
            .on("ClarifyWithUser", vec![no_clarification()])
            .on("QueryAnalysis", vec![general_analysis()])
            .on("ResearchBrief", vec![two_section_plan()])
            .on("Section to research:", vec![MockReply::text("notes")])
            .on("SectionContent", vec![MockReply::json(json!({"content": long_content}))])
            .on("ReviewResult", vec![sufficient_review()])
            .on(
                "Write the final research report",
                vec![
                    MockReply::Fail(LlmError::ContextLengthExceeded("too long".into())),
                    MockReply::Fail(LlmError::ContextLengthExceeded("too long".into())),
                    MockReply::text("# Third time lucky"),
                ],
            ),
    );
    let engine = engine(llm.clone(), ResearchConfig::default());

    let outcome = engine.run("q", &CancellationToken::new()).await.unwrap();
    match outcome {
        RunOutcome::Completed { report, .. } => assert_eq!(report, "# Third time lucky"),
        other => panic!("unexpected outcome: {other:?}"),
    }

    let reports: Vec<_> = llm
        .prompts()
        .into_iter()
        .filter(|p| p.contains("Write the final research report"))
        .collect();
    assert_eq!(reports.len(), 3);
    let x_count = |p: &str| p.chars().filter(|c| *c == 'x').count();
    let full = x_count(&reports[0]);
    let last = x_count(&reports[2]);
    // 两次各截断 10%：材料约为原来的 0.81
    let removed = full - last;
    let material = 2 * 1000;
    assert!(removed > material * 15 / 100 && removed < material * 23 / 100, "removed {removed}");
}

#[tokio::test]
async fn test_concurrency_is_bounded_by_config() {
    let plan = MockReply::json(json!({
        "title": "Wide",
        "sections": (1..=5).map(|i| json!({"title": format!("S{i}"), "description": "d"})).collect::<Vec<_>>()
    }));
    let llm = Arc::new(
        MockLlmClient::new()
            .on("ClarifyWithUser", vec![no_clarification()])
            .on("QueryAnalysis", vec![general_analysis()])
            .on("ResearchBrief", vec![plan])
            .on("Section to research:", vec![MockReply::text("notes")])
            .on("SectionContent", vec![section_content()])
            .on("ReviewResult", vec![sufficient_review()])
            .on("Write the final research report", vec![MockReply::text("# Wide")])
            .with_delay(Duration::from_millis(30)),
    );
    let config = ResearchConfig {
        max_concurrent_researchers: 2,
        ..ResearchConfig::default()
    };
    let engine = engine(llm.clone(), config);

    let outcome = engine.run("q", &CancellationToken::new()).await.unwrap();
    let state = archived(&engine, &outcome).await;

    assert_eq!(state.completed_count(), 5);
    assert_eq!(llm.max_in_flight(), 2);
}

#[tokio::test]
async fn test_cancellation_still_writes_report() {
    let llm = Arc::new(
        MockLlmClient::new()
            .on("QueryAnalysis", vec![general_analysis()])
            .on("ResearchBrief", vec![two_section_plan()])
            .on("Section to research:", vec![MockReply::text("notes")])
            .on("SectionContent", vec![section_content()])
            .on("ReviewResult", vec![sufficient_review()])
            .on("Write the final research report", vec![MockReply::text("# Partial report")])
            .with_delay(Duration::from_millis(100)),
    );
    let config = ResearchConfig {
        allow_clarification: false,
        ..ResearchConfig::default()
    };
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let engine = ResearchEngineBuilder::new(llm.clone()).config(config).events(tx).build();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        while let Some(ev) = rx.recv().await {
            if matches!(ev, ResearchEvent::SectionDispatched { .. }) {
                trigger.cancel();
            }
        }
    });

    let outcome = engine.run("q", &cancel).await.unwrap();
    match &outcome {
        RunOutcome::Completed { report, .. } => assert_eq!(report, "# Partial report"),
        other => panic!("unexpected outcome: {other:?}"),
    }
    let state = archived(&engine, &outcome).await;
    assert_eq!(state.completed_count(), 0);
    assert_eq!(llm.count_matching("ReviewResult"), 0);
    assert_eq!(llm.count_matching("SectionContent"), 0);
}

#[tokio::test]
async fn test_cancel_during_analysis_skips_to_report() {
    let llm = Arc::new(
        MockLlmClient::new()
            .on("QueryAnalysis", vec![general_analysis()])
            .on("ResearchBrief", vec![two_section_plan()])
            .on("Write the final research report", vec![MockReply::text("# Partial report")])
            .with_delay(Duration::from_millis(1000)),
    );
    let config = ResearchConfig {
        allow_clarification: false,
        ..ResearchConfig::default()
    };
    let engine = engine(llm.clone(), config);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let outcome = engine.run("q", &cancel).await.unwrap();
    let elapsed = started.elapsed();
    match &outcome {
        RunOutcome::Completed { report, .. } => assert_eq!(report, "# Partial report"),
        other => panic!("unexpected outcome: {other:?}"),
    }
    // 分析调用被中断，只剩报告调用的一次延迟
    assert!(elapsed < Duration::from_millis(1800), "took {elapsed:?}");
    assert_eq!(llm.count_matching("QueryAnalysis"), 1);
    assert_eq!(llm.count_matching("ResearchBrief"), 0);
}

#[tokio::test]
async fn test_resume_from_sqlite_store_in_new_engine() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("checkpoints.db");
    let script = |ask_first: bool| {
        let clarify = if ask_first {
            vec![
                MockReply::json(json!({"need_clarification": true, "question": "Which region?"})),
                no_clarification(),
            ]
        } else {
            vec![no_clarification()]
        };
        MockLlmClient::new()
            .on("ClarifyWithUser", clarify)
            .on("QueryAnalysis", vec![general_analysis()])
            .on("ResearchBrief", vec![two_section_plan()])
            .on("Section to research:", vec![MockReply::text("notes")])
            .on("SectionContent", vec![section_content()])
            .on("ReviewResult", vec![sufficient_review()])
            .on("Write the final research report", vec![MockReply::text("# EU report")])
    };

    let thread_id = {
        let store: Arc<dyn CheckpointStore> = Arc::new(SqliteCheckpointStore::open(&db).unwrap());
        let engine = ResearchEngineBuilder::new(Arc::new(script(true)))
            .checkpoint_store(store)
            .build();
        match engine.run("energy prices", &CancellationToken::new()).await.unwrap() {
            RunOutcome::AwaitingInput { thread_id, .. } => thread_id,
            other => panic!("expected suspension, got {other:?}"),
        }
    };

    // 新的引擎与存储实例，相当于另一个进程
    let store: Arc<dyn CheckpointStore> = Arc::new(SqliteCheckpointStore::open(&db).unwrap());
    let engine = ResearchEngineBuilder::new(Arc::new(script(false)))
        .checkpoint_store(store)
        .build();

    let outcome = engine.resume(&thread_id, "EU", &CancellationToken::new()).await.unwrap();
    match outcome {
        RunOutcome::Completed { report, .. } => assert_eq!(report, "# EU report"),
        other => panic!("unexpected outcome: {other:?}"),
    }

    let state = engine.load(&thread_id).await.unwrap().unwrap();
    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.original_query, "energy prices\nEU");
}

#[tokio::test]
async fn test_resume_errors() {
    let engine = engine(Arc::new(standard_llm()), ResearchConfig::default());
    let cancel = CancellationToken::new();

    let err = engine.resume("no-such-thread", "hi", &cancel).await.unwrap_err();
    assert!(matches!(err, ResearchError::ThreadNotFound(_)));

    let done = engine.run("q", &cancel).await.unwrap();
    let err = engine.resume(done.thread_id(), "more", &cancel).await.unwrap_err();
    assert!(matches!(err, ResearchError::InvalidResume(_)));
}
