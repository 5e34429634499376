//! 关闭信号与退出任务
//!
//! ShutdownManager 持有根取消令牌：Ctrl+C / SIGTERM / teardown 任一触发后，进行中的安装与
//! 状态监视器随之停止。退出任务（如停止本进程启动的大脑服务）由 ExitTasks 依次执行，每项限时。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::supervisor::BrainSupervisor;

/// 关闭原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM
    Signal,
    /// 正常结束
    Teardown,
}

#[derive(Default)]
pub struct ShutdownManager {
    root: CancellationToken,
    reason: Mutex<Option<ShutdownReason>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 单个操作的令牌：全局关闭会级联取消它，取消它不影响全局
    pub fn child_token(&self) -> CancellationToken {
        self.root.child_token()
    }

    /// 触发关闭；只记录第一次的原因
    pub fn shutdown(&self, reason: ShutdownReason) {
        if let Ok(mut slot) = self.reason.lock() {
            if slot.is_none() {
                tracing::debug!(?reason, "shutdown requested");
                *slot = Some(reason);
            }
        }
        self.root.cancel();
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.lock().ok().and_then(|slot| *slot)
    }

    pub fn is_shutdown(&self) -> bool {
        self.root.is_cancelled()
    }

    pub async fn wait_for_shutdown(&self) {
        self.root.cancelled().await;
    }

    /// 监听 Ctrl+C 与 SIGTERM；关闭后监听任务自行退出
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let reason = tokio::select! {
                _ = manager.wait_for_shutdown() => return,
                r = tokio::signal::ctrl_c() => match r {
                    Ok(()) => ShutdownReason::UserInitiated,
                    Err(e) => {
                        tracing::warn!(error = %e, "cannot listen for Ctrl+C");
                        return;
                    }
                },
                _ = sigterm() => ShutdownReason::Signal,
            };
            tracing::info!(?reason, "signal received, cancelling in-flight work");
            manager.shutdown(reason);
        });
    }
}

#[cfg(unix)]
async fn sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(_) => std::future::pending::<()>().await,
    }
}

#[cfg(not(unix))]
async fn sigterm() {
    std::future::pending::<()>().await
}

/// 退出时执行的一项任务
#[async_trait]
pub trait ExitTask: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self) -> anyhow::Result<()>;
}

/// 按注册顺序执行退出任务；单项失败或超时不影响后续任务
pub struct ExitTasks {
    tasks: Vec<Box<dyn ExitTask>>,
    per_task: Duration,
}

impl ExitTasks {
    pub fn new(per_task: Duration) -> Self {
        Self {
            tasks: Vec::new(),
            per_task,
        }
    }

    pub fn push(&mut self, task: impl ExitTask + 'static) {
        self.tasks.push(Box::new(task));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// 返回失败（含超时）的任务数
    pub async fn run(&self) -> usize {
        let mut failed = 0;
        for task in &self.tasks {
            let outcome = tokio::time::timeout(self.per_task, task.run()).await;
            match outcome {
                Ok(Ok(())) => tracing::debug!(task = task.name(), "exit task done"),
                Ok(Err(e)) => {
                    failed += 1;
                    tracing::warn!(task = task.name(), error = %e, "exit task failed");
                }
                Err(_) => {
                    failed += 1;
                    tracing::warn!(
                        task = task.name(),
                        timeout_ms = self.per_task.as_millis() as u64,
                        "exit task timed out"
                    );
                }
            }
        }
        failed
    }
}

/// 停止本进程启动的大脑服务；没有记录 PID 时什么都不做
pub struct BrainServerCleanup {
    supervisor: Arc<BrainSupervisor>,
}

impl BrainServerCleanup {
    pub fn new(supervisor: Arc<BrainSupervisor>) -> Self {
        Self { supervisor }
    }
}

#[async_trait]
impl ExitTask for BrainServerCleanup {
    fn name(&self) -> &'static str {
        "stop-brain-server"
    }

    async fn run(&self) -> anyhow::Result<()> {
        let Some(pid) = self.supervisor.pid() else {
            return Ok(());
        };
        if !self.supervisor.stop().await {
            anyhow::bail!("brain server (pid {}) did not stop", pid);
        }
        Ok(())
    }
}
