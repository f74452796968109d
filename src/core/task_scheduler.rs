//! 任务调度：有界 worker 池
//!
//! 一批相互独立的任务全部 spawn 到 JoinSet，由 Semaphore 限制同时运行的数量（与任务数无关）。
//! 每个任务拿到父 token 的子 token；取消时尚未拿到许可的任务直接放弃。
//! 结果按完成顺序逐个交给调用方，调用方在全部返回后才继续（硬汇合）。

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// 任务 ID
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(0);

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskId {
    pub fn new() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// 一批任务的统计
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// 返回了结果的任务
    pub completed: usize,
    /// 被取消或没有产出的任务
    pub skipped: usize,
    /// panic 的任务
    pub failed: usize,
}

/// 有界任务调度器
#[derive(Clone)]
pub struct TaskScheduler {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl TaskScheduler {
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// 并发执行一批任务，结果到达时调用 `on_result`，全部结束后返回
    pub async fn run_batch<I, R, F, Fut>(
        &self,
        jobs: Vec<I>,
        cancel: &CancellationToken,
        work: F,
        mut on_result: impl FnMut(R),
    ) -> BatchStats
    where
        I: Send + 'static,
        R: Send + 'static,
        F: Fn(I, CancellationToken) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = Option<R>> + Send + 'static,
    {
        let mut set = JoinSet::new();
        for job in jobs {
            let id = TaskId::new();
            let semaphore = self.semaphore.clone();
            let token = cancel.child_token();
            let work = work.clone();
            set.spawn(async move {
                let permit = tokio::select! {
                    _ = token.cancelled() => return (id, None),
                    p = semaphore.acquire_owned() => p,
                };
                let Ok(_permit) = permit else {
                    return (id, None);
                };
                if token.is_cancelled() {
                    return (id, None);
                }
                (id, work(job, token).await)
            });
        }

        let mut stats = BatchStats::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Some(result))) => {
                    stats.completed += 1;
                    on_result(result);
                }
                Ok((id, None)) => {
                    tracing::debug!(task = ?id, "Task produced no result");
                    stats.skipped += 1;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Worker task panicked");
                    stats.failed += 1;
                }
            }
        }
        stats
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let scheduler = TaskScheduler::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (r, p) = (running.clone(), peak.clone());
        let mut results = Vec::new();
        let stats = scheduler
            .run_batch(
                (0..6).collect(),
                &CancellationToken::new(),
                move |i: u32, _token| {
                    let (r, p) = (r.clone(), p.clone());
                    async move {
                        let now = r.fetch_add(1, Ordering::SeqCst) + 1;
                        p.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        r.fetch_sub(1, Ordering::SeqCst);
                        Some(i * 10)
                    }
                },
                |v| results.push(v),
            )
            .await;

        assert_eq!(stats.completed, 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        results.sort();
        assert_eq!(results, vec![0, 10, 20, 30, 40, 50]);
    }

    #[tokio::test]
    async fn test_cancelled_batch_skips_work() {
        let scheduler = TaskScheduler::new(1);
        let token = CancellationToken::new();
        token.cancel();
        let stats = scheduler
            .run_batch(vec![1, 2, 3], &token, |i: u32, _t| async move { Some(i) }, |_| {})
            .await;
        assert_eq!(stats.completed, 0);
        assert_eq!(stats.skipped, 3);
    }

    #[tokio::test]
    async fn test_panicking_task_is_counted() {
        let scheduler = TaskScheduler::default();
        let stats = scheduler
            .run_batch(
                vec![0u32, 1],
                &CancellationToken::new(),
                |i, _t| async move {
                    if i == 0 {
                        panic!("boom");
                    }
                    Some(i)
                },
                |_| {},
            )
            .await;
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
    }
}
