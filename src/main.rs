//! Bee Research 命令行入口
//!
//! 用法：
//!   bee-research [--config PATH] [--deadline SECS] <问题...>
//!   bee-research [--config PATH] --resume THREAD_ID <回答...>
//!
//! 未给出问题时从 stdin 读取一行。澄清问题从 stdin 读取回答后自动 resume；
//! 跨进程 resume 需要在配置中设置 app.checkpoint_db。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use bee_research::config::{load_config, AppConfig};
use bee_research::core::ShutdownManager;
use bee_research::research::ResearchEvent;
use bee_research::{observability, ResearchEngineBuilder, RunOutcome};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, Default)]
struct CliArgs {
    config: Option<PathBuf>,
    resume: Option<String>,
    deadline: Option<Duration>,
    text: Vec<String>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<CliArgs> {
    let mut cli = CliArgs::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => cli.config = Some(args.next().context("--config needs a path")?.into()),
            "--resume" => cli.resume = Some(args.next().context("--resume needs a thread id")?),
            "--deadline" => {
                let secs: u64 = args
                    .next()
                    .context("--deadline needs seconds")?
                    .parse()
                    .context("--deadline must be an integer")?;
                cli.deadline = Some(Duration::from_secs(secs));
            }
            _ => cli.text.push(arg),
        }
    }
    Ok(cli)
}

/// 进度事件输出到 stderr，报告正文走 stdout
fn print_event(ev: &ResearchEvent) {
    match ev {
        ResearchEvent::StageStarted { stage } => eprintln!("==> {stage}"),
        ResearchEvent::PlanReady { sections } => {
            eprintln!("    plan: {} sections", sections.len());
            for s in sections {
                eprintln!("      - {s}");
            }
        }
        ResearchEvent::SectionDispatched { title } => eprintln!("    researching: {title}"),
        ResearchEvent::ToolCall { section, tool, args_preview } => {
            eprintln!("      [{}] {tool} {args_preview}", section.as_deref().unwrap_or("-"))
        }
        ResearchEvent::SectionCompleted { title, sources } => eprintln!("    done: {title} ({sources} sources)"),
        ResearchEvent::ReviewDecision { iteration, sufficient, score, retry } => eprintln!(
            "    review #{iteration}: sufficient={sufficient} score={score} retry={retry:?}"
        ),
        ResearchEvent::ReportReady { chars } => eprintln!("    report: {chars} chars"),
        ResearchEvent::ClarificationRequested { .. } => {}
        ResearchEvent::Error { text } => eprintln!("    error: {text}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = parse_args(std::env::args().skip(1))?;

    let cfg = load_config(cli.config.clone()).unwrap_or_else(|e| {
        eprintln!("Config load failed ({e}), using defaults");
        AppConfig::default()
    });
    observability::init(cfg.research.verbose);

    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(ev) = event_rx.recv().await {
            print_event(&ev);
        }
    });

    let engine = ResearchEngineBuilder::from_app_config(&cfg)
        .context("Failed to build research engine")?
        .events(event_tx)
        .build();

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();
    if let Some(deadline) = cli.deadline {
        shutdown.cancel_after(deadline);
    }
    let cancel = shutdown.token();

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let text = cli.text.join(" ");

    let mut outcome = match cli.resume {
        Some(thread_id) => {
            if text.trim().is_empty() {
                bail!("--resume needs an answer");
            }
            engine.resume(&thread_id, &text, &cancel).await?
        }
        None => {
            let query = if text.trim().is_empty() {
                eprint!("Research question: ");
                stdin.next_line().await?.unwrap_or_default()
            } else {
                text
            };
            if query.trim().is_empty() {
                bail!("No research question given");
            }
            engine.run(&query, &cancel).await?
        }
    };

    loop {
        match outcome {
            RunOutcome::Completed { thread_id, report } => {
                println!("{report}");
                tracing::info!(thread_id = %thread_id, "Done");
                return Ok(());
            }
            RunOutcome::AwaitingInput { thread_id, question } => {
                eprintln!("\n{question}");
                eprintln!("(thread {thread_id})");
                eprint!("> ");
                let answer = tokio::select! {
                    line = stdin.next_line() => line?.unwrap_or_default(),
                    _ = cancel.cancelled() => String::new(),
                };
                if answer.trim().is_empty() {
                    eprintln!("No answer given; resume later with --resume {thread_id}");
                    return Ok(());
                }
                outcome = engine.resume(&thread_id, &answer, &cancel).await?;
            }
        }
    }
}
