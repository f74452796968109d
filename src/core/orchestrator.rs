//! 研究编排器：主控循环
//!
//! 按阶段驱动 ResearchState：顺序执行 clarify → analyze → (discover) → plan，
//! plan 的扇出交给有界 worker 池并在全部返回后进入 aggregate → review，review 可回到 plan，
//! 最终 report 结束。澄清挂起时保存检查点并返回，resume 追加用户回答后从 clarify 重新进入。
//! 取消时跳到 report，用已完成的章节尽力生成报告。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::core::checkpoint::CheckpointStore;
use crate::core::error::ResearchError;
use crate::core::state::{ResearchState, RunStatus, StateUpdate};
use crate::core::task_scheduler::TaskScheduler;
use crate::memory::Message;
use crate::research::{
    aggregate, analyze, clarify, discover, plan, report, researcher, review, ResearchContext, ResearchEvent,
    SectionTask, Stage, StageOutcome,
};

/// run / resume 的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { thread_id: String, report: String },
    /// 挂起：调用方把 question 交给用户，再用 resume 继续
    AwaitingInput { thread_id: String, question: String },
}

impl RunOutcome {
    pub fn thread_id(&self) -> &str {
        match self {
            RunOutcome::Completed { thread_id, .. } | RunOutcome::AwaitingInput { thread_id, .. } => thread_id,
        }
    }
}

/// 研究工作流引擎（由 ResearchEngineBuilder 构建）
pub struct ResearchEngine {
    ctx: ResearchContext,
    store: Arc<dyn CheckpointStore>,
    scheduler: TaskScheduler,
}

impl ResearchEngine {
    pub(crate) fn new(ctx: ResearchContext, store: Arc<dyn CheckpointStore>) -> Self {
        let scheduler = TaskScheduler::new(ctx.config.max_concurrent_researchers);
        Self { ctx, store, scheduler }
    }

    pub fn context(&self) -> &ResearchContext {
        &self.ctx
    }

    /// 以新的 thread_id 开始一次研究
    pub async fn run(&self, query: &str, cancel: &CancellationToken) -> Result<RunOutcome, ResearchError> {
        let thread_id = uuid::Uuid::new_v4().to_string();
        self.run_thread(&thread_id, query, cancel).await
    }

    /// 以调用方指定的 thread_id 开始
    pub async fn run_thread(
        &self,
        thread_id: &str,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, ResearchError> {
        tracing::info!(thread_id, model = self.ctx.llm.model_name(), "Starting research");
        let state = ResearchState::new(thread_id, query);
        self.drive(state, cancel).await
    }

    /// 提交澄清回答并继续
    pub async fn resume(
        &self,
        thread_id: &str,
        answer: &str,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, ResearchError> {
        let mut state = self
            .store
            .load(thread_id)
            .await?
            .ok_or_else(|| ResearchError::ThreadNotFound(thread_id.to_string()))?;
        if state.status != RunStatus::AwaitingInput {
            return Err(ResearchError::InvalidResume(thread_id.to_string()));
        }

        tracing::info!(thread_id, "Resuming research with user answer");
        state.messages.push(Message::user(answer));
        state.status = RunStatus::Running;
        self.drive(state, cancel).await
    }

    /// 读取某个会话的检查点（挂起中或已归档）
    pub async fn load(&self, thread_id: &str) -> Result<Option<ResearchState>, ResearchError> {
        self.store.load(thread_id).await
    }

    /// 删除会话检查点
    pub async fn delete(&self, thread_id: &str) -> Result<(), ResearchError> {
        self.store.delete(thread_id).await
    }

    async fn drive(&self, mut state: ResearchState, cancel: &CancellationToken) -> Result<RunOutcome, ResearchError> {
        let mut stage = Stage::Clarify;
        loop {
            if cancel.is_cancelled() && stage != Stage::Report {
                tracing::warn!(thread_id = %state.thread_id, skipped = %stage, "Cancelled, synthesizing report from completed sections");
                stage = Stage::Report;
            }

            tracing::debug!(thread_id = %state.thread_id, stage = %stage, "Entering stage");
            self.ctx.emit(ResearchEvent::StageStarted {
                stage: stage.to_string(),
            });

            let outcome = match stage {
                Stage::Clarify => clarify::run(&state, &self.ctx, cancel).await,
                Stage::Analyze => analyze::run(&state, &self.ctx, cancel).await,
                Stage::Discover => discover::run(&state, &self.ctx, cancel).await,
                Stage::Plan => plan::run(&state, &self.ctx, cancel).await,
                Stage::Aggregate => aggregate::run(&state),
                Stage::Review => review::run(&state, &self.ctx, cancel).await,
                Stage::Report => report::run(&state, &self.ctx).await,
            };

            match outcome {
                StageOutcome::Goto { next, update } => {
                    state.apply(update);
                    stage = next;
                }
                StageOutcome::FanOut { tasks, update } => {
                    state.apply(update);
                    self.fan_out(&mut state, tasks, cancel).await;
                    stage = Stage::Aggregate;
                }
                StageOutcome::AwaitUser { update } => {
                    state.apply(update);
                    state.status = RunStatus::AwaitingInput;
                    self.store.save(&state).await?;
                    let question = state
                        .clarification
                        .as_ref()
                        .map(|c| c.question.clone())
                        .unwrap_or_default();
                    tracing::info!(thread_id = %state.thread_id, "Run suspended awaiting user input");
                    return Ok(RunOutcome::AwaitingInput {
                        thread_id: state.thread_id,
                        question,
                    });
                }
                StageOutcome::Finish { update } => {
                    state.apply(update);
                    state.status = RunStatus::Completed;
                    if let Err(e) = self.store.save(&state).await {
                        tracing::warn!(thread_id = %state.thread_id, error = %e, "Failed to archive completed run");
                    }
                    let (prompt_tokens, completion_tokens, total_tokens) = self.ctx.llm.token_usage();
                    tracing::info!(
                        thread_id = %state.thread_id,
                        sections = state.sections.len(),
                        completed = state.completed_count(),
                        review_iterations = state.review_iterations,
                        prompt_tokens,
                        completion_tokens,
                        total_tokens,
                        "Research finished"
                    );
                    return Ok(RunOutcome::Completed {
                        thread_id: state.thread_id,
                        report: state.final_report,
                    });
                }
            }
        }
    }

    /// 并行研究章节；每个返回的章节到达时立即按标题合并
    async fn fan_out(&self, state: &mut ResearchState, tasks: Vec<SectionTask>, cancel: &CancellationToken) {
        if tasks.is_empty() {
            return;
        }
        for task in &tasks {
            self.ctx.emit(ResearchEvent::SectionDispatched {
                title: task.section.title.clone(),
            });
        }
        tracing::info!(
            thread_id = %state.thread_id,
            tasks = tasks.len(),
            max_concurrent = self.scheduler.max_concurrent(),
            "Dispatching section researchers"
        );

        let ctx = self.ctx.clone();
        let stats = self
            .scheduler
            .run_batch(
                tasks,
                cancel,
                move |task, token| {
                    let ctx = ctx.clone();
                    async move { researcher::run(task, &ctx, &token).await }
                },
                |section| {
                    state.apply(StateUpdate {
                        sections: vec![section],
                        ..Default::default()
                    })
                },
            )
            .await;
        tracing::info!(
            thread_id = %state.thread_id,
            completed = stats.completed,
            skipped = stats.skipped,
            failed = stats.failed,
            "Section researchers finished"
        );
    }
}
