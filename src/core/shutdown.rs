//! 关闭信号处理
//!
//! Ctrl+C / SIGTERM 转成一个 CancellationToken：传给 ResearchEngine 后会取消所有在途的章节研究与工具调用，
//! 编排器随后用已完成的章节生成报告。第二次 Ctrl+C 直接退出进程。

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// 关闭原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM
    Signal,
    /// 研究截止时间到达
    Deadline,
}

/// 关闭信号管理器
#[derive(Clone)]
pub struct ShutdownManager {
    token: CancellationToken,
    reason_tx: broadcast::Sender<ShutdownReason>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (reason_tx, _) = broadcast::channel(1);
        Self {
            token: CancellationToken::new(),
            reason_tx,
        }
    }

    /// 传给 run / resume 的取消 token
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn shutdown(&self, reason: ShutdownReason) {
        tracing::info!(reason = ?reason, "Shutdown requested");
        let _ = self.reason_tx.send(reason);
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.reason_tx.subscribe()
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, cancelling research and writing report from completed sections...");
                manager.shutdown(ShutdownReason::UserInitiated);
                if let Ok(()) = tokio::signal::ctrl_c().await {
                    tracing::warn!("Received second Ctrl+C, exiting immediately");
                    std::process::exit(130);
                }
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::info!("Received SIGTERM, cancelling research...");
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }

    /// 在 deadline 后触发取消
    pub fn cancel_after(self: &Arc<Self>, deadline: std::time::Duration) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(deadline) => manager.shutdown(ShutdownReason::Deadline),
                _ = manager.token.cancelled() => {}
            }
        });
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}
