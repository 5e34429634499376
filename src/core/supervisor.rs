//! 大脑服务进程监管：启动、停止、存活确认
//!
//! 启动时记录子进程 PID（内存与数据目录下的 brain.pid），停止时按 PID 精确终止
//! （POSIX 终止整个进程组，Windows 用 taskkill /T）；PID 未知时才退回按模块名匹配终止。
//! 同一时刻最多一个由本工具拉起的服务进程：重新启动前先终止记录在案的旧进程。

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::brain::HealthCheck;
use crate::environment::{
    CommandOutput, CommandRunner, CommandSpec, HostOs, Provisioner, ProvisioningLock,
    RuntimeStrategy,
};

use super::ProvisionError;

pub struct BrainSupervisor {
    provisioner: Arc<Provisioner>,
    runner: Arc<dyn CommandRunner>,
    health: HealthCheck,
    lock: ProvisioningLock,
    startup_grace: Duration,
    /// 传给服务进程的额外环境变量（API Key）
    envs: Vec<(String, String)>,
    pid_file: PathBuf,
    pid: Mutex<Option<u32>>,
    strategy: Mutex<Option<RuntimeStrategy>>,
}

impl BrainSupervisor {
    /// 数据目录下已有 brain.pid 时接管其中的 PID
    pub fn new(
        provisioner: Arc<Provisioner>,
        runner: Arc<dyn CommandRunner>,
        health: HealthCheck,
        lock: ProvisioningLock,
        startup_grace: Duration,
    ) -> Self {
        let pid_file = provisioner.layout().pid_file();
        let pid = read_pid_file(&pid_file);
        if let Some(pid) = pid {
            tracing::debug!(pid, path = %pid_file.display(), "adopted brain server pid");
        }
        Self {
            provisioner,
            runner,
            health,
            lock,
            startup_grace,
            envs: Vec::new(),
            pid_file,
            pid: Mutex::new(pid),
            strategy: Mutex::new(None),
        }
    }

    pub fn with_env(mut self, envs: Vec<(String, String)>) -> Self {
        self.envs = envs;
        self
    }

    /// 本工具启动的服务 PID
    pub fn pid(&self) -> Option<u32> {
        self.pid.lock().ok().and_then(|g| *g)
    }

    /// 最近一次启动使用的运行时
    pub fn active_strategy(&self) -> Option<RuntimeStrategy> {
        self.strategy.lock().ok().and_then(|g| *g)
    }

    /// 接管另一个监管器记录的进程（配置重载后替换监管器时使用）
    pub fn adopt(&self, previous: &BrainSupervisor) {
        let Some(pid) = previous.pid() else {
            return;
        };
        if self.pid().is_some() {
            return;
        }
        self.record(pid, previous.active_strategy());
        if let Err(e) = std::fs::write(&self.pid_file, pid.to_string()) {
            tracing::warn!(error = %e, path = %self.pid_file.display(), "cannot write pid file");
        }
        tracing::debug!(pid, "brain server pid carried over");
    }

    pub async fn is_running(&self) -> bool {
        self.health.check().await.is_healthy()
    }

    /// 启动服务；已在运行时直接返回 true。失败只记录日志并返回 false。
    ///
    /// 与安装共用供给锁。上次启动的进程未能通过健康检查时先终止它，终止失败则不再拉起新进程。
    pub async fn start(&self) -> bool {
        let _guard = self.lock.lock().await;

        if self.is_running().await {
            tracing::info!(url = %self.health.url(), "brain server already running");
            return true;
        }

        if let Some(stale) = self.pid() {
            tracing::warn!(pid = stale, "tracked brain server is unhealthy, terminating it first");
            if !self.stop_tracked(stale).await {
                tracing::error!(pid = stale, "previous brain server still alive, not relaunching");
                return false;
            }
        }

        match self.launch().await {
            Ok(pid) => {
                tokio::time::sleep(self.startup_grace).await;
                let healthy = self.is_running().await;
                if healthy {
                    tracing::info!(pid, "brain server started");
                } else {
                    tracing::warn!(pid, "brain server launched but health check failed");
                }
                healthy
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to start brain server");
                false
            }
        }
    }

    async fn launch(&self) -> Result<u32, ProvisionError> {
        let status = self.provisioner.status().await;
        if !status.brain_package_installed {
            return Err(ProvisionError::PackageNotInstalled);
        }

        let layout = self.provisioner.layout();
        let strategy = layout.active_strategy();
        let mut spec = layout.server_command(strategy);
        for (key, value) in &self.envs {
            spec = spec.env(key.as_str(), value.as_str());
        }
        tracing::info!(%strategy, command = %spec.display(), "launching brain server");

        let pid = self.runner.spawn_detached(&spec).await?;
        self.record(pid, Some(strategy));
        if let Err(e) = tokio::fs::write(&self.pid_file, pid.to_string()).await {
            tracing::warn!(error = %e, path = %self.pid_file.display(), "cannot write pid file");
        }
        Ok(pid)
    }

    /// 停止服务；有 PID 时按 PID 终止，否则按模块名匹配
    pub async fn stop(&self) -> bool {
        if let Some(pid) = self.pid() {
            return self.stop_tracked(pid).await;
        }

        let spec = self.kill_by_pattern();
        tracing::info!(command = %spec.display(), "stopping brain server");
        match self.runner.run(&spec).await {
            Ok(out) if out.success() => true,
            // pkill 退出码 1 表示没有匹配的进程
            Ok(out) if !self.windows() && out.code == Some(1) => {
                tracing::info!("no brain server process found");
                true
            }
            other => {
                log_stop_failure(other);
                false
            }
        }
    }

    /// 按 PID 终止；进程已不存在也算成功。成功后清除 PID 记录，失败时保留
    async fn stop_tracked(&self, pid: u32) -> bool {
        let spec = self.kill_by_pid(pid);
        tracing::info!(pid, command = %spec.display(), "stopping brain server");

        let stopped = match self.runner.run(&spec).await {
            Ok(out) if out.success() => true,
            Ok(out) if process_gone(&out) => {
                tracing::info!(pid, "brain server process already exited");
                true
            }
            other => {
                log_stop_failure(other);
                false
            }
        };

        if stopped {
            self.record_none().await;
        }
        stopped
    }

    fn record(&self, pid: u32, strategy: Option<RuntimeStrategy>) {
        if let Ok(mut guard) = self.pid.lock() {
            *guard = Some(pid);
        }
        if let Ok(mut guard) = self.strategy.lock() {
            *guard = strategy;
        }
    }

    async fn record_none(&self) {
        if let Ok(mut guard) = self.pid.lock() {
            *guard = None;
        }
        if let Ok(mut guard) = self.strategy.lock() {
            *guard = None;
        }
        match tokio::fs::remove_file(&self.pid_file).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(error = %e, path = %self.pid_file.display(), "cannot remove pid file")
            }
        }
    }

    fn windows(&self) -> bool {
        self.provisioner
            .layout()
            .platform
            .map(|p| p.os == HostOs::Windows)
            .unwrap_or(cfg!(windows))
    }

    fn kill_by_pid(&self, pid: u32) -> CommandSpec {
        if self.windows() {
            CommandSpec::new("taskkill").args(["/F", "/T", "/PID"]).arg(pid.to_string())
        } else {
            // 服务以独立进程组启动，负 PID 终止整组（含 conda run 派生的解释器）
            CommandSpec::new("kill")
                .args(["-TERM", "--"])
                .arg(format!("-{}", pid))
        }
    }

    fn kill_by_pattern(&self) -> CommandSpec {
        let module = self.provisioner.layout().server_module();
        if self.windows() {
            CommandSpec::new("taskkill").args([
                "/F".to_string(),
                "/IM".to_string(),
                "python.exe".to_string(),
                "/FI".to_string(),
                format!("WINDOWTITLE eq {}", module),
            ])
        } else {
            CommandSpec::new("pkill").arg("-f").arg(module)
        }
    }
}

fn read_pid_file(path: &Path) -> Option<u32> {
    let text = std::fs::read_to_string(path).ok()?;
    match text.trim().parse() {
        Ok(pid) => Some(pid),
        Err(_) => {
            tracing::warn!(path = %path.display(), "ignoring malformed pid file");
            None
        }
    }
}

/// kill / taskkill 报告目标进程不存在
fn process_gone(out: &CommandOutput) -> bool {
    let stderr = out.stderr.to_ascii_lowercase();
    stderr.contains("no such process") || stderr.contains("not found")
}

fn log_stop_failure(outcome: Result<CommandOutput, ProvisionError>) {
    match outcome {
        Ok(out) => {
            tracing::warn!(code = ?out.code, stderr = %out.stderr.trim(), "stop command failed")
        }
        Err(e) => tracing::warn!(error = %e, "stop command failed"),
    }
}
