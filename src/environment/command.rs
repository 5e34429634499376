//! 外部命令执行器
//!
//! 版本探测、建环境、pip 安装、进程启停都是不透明的外部命令：这里统一通过 CommandRunner 执行。
//! 命令直接 exec（不经 sh -c / cmd /C），参数按平台拼装；可选超时；取消时子进程随 future 一起被 kill。

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::core::ProvisionError;

/// 一条待执行的命令
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub envs: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// 用于日志与错误信息的单行表示
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// 命令执行结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// 退出码；被信号终止时为 None
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stdout 为空时取 stderr（部分 Python 版本把 --version 打到 stderr）
    pub fn text(&self) -> &str {
        let out = self.stdout.trim();
        if out.is_empty() {
            self.stderr.trim()
        } else {
            out
        }
    }
}

/// 外部命令执行抽象
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// 执行并等待结束；无论退出码如何都返回输出，只有无法启动/超时才返回 Err
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ProvisionError>;

    /// 后台启动（不等待、stdio 置空），返回 PID
    async fn spawn_detached(&self, spec: &CommandSpec) -> Result<u32, ProvisionError>;
}

/// 执行并要求退出码为 0
pub async fn run_checked(
    runner: &dyn CommandRunner,
    spec: &CommandSpec,
) -> Result<CommandOutput, ProvisionError> {
    tracing::info!(command = %spec.display(), "run command");
    let output = runner.run(spec).await?;
    if output.success() {
        Ok(output)
    } else {
        Err(ProvisionError::CommandFailed {
            command: spec.display(),
            status: output
                .code
                .map(|c| format!("exit code {}", c))
                .unwrap_or_else(|| "signal".to_string()),
            stderr: output.stderr.trim().to_string(),
        })
    }
}

/// 执行，成功则返回去空白的输出文本；失败（含无法启动）返回 None。用于状态探测。
pub async fn query_text(runner: &dyn CommandRunner, spec: &CommandSpec) -> Option<String> {
    match runner.run(spec).await {
        Ok(output) if output.success() => Some(output.text().to_string()),
        Ok(output) => {
            tracing::debug!(command = %spec.display(), code = ?output.code, "status query failed");
            None
        }
        Err(e) => {
            tracing::debug!(command = %spec.display(), error = %e, "status query failed");
            None
        }
    }
}

/// 基于 tokio::process 的实现
#[derive(Debug, Default, Clone)]
pub struct SystemCommandRunner;

impl SystemCommandRunner {
    fn build(spec: &CommandSpec) -> Command {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        if let Some(ref dir) = spec.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &spec.envs {
            cmd.env(key, value);
        }
        cmd
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ProvisionError> {
        let mut cmd = Self::build(spec);
        cmd.stdin(Stdio::null()).kill_on_drop(true);

        let fut = cmd.output();
        let output = match spec.timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| ProvisionError::CommandTimeout(spec.display()))?,
            None => fut.await,
        }
        .map_err(|source| ProvisionError::Spawn {
            command: spec.display(),
            source,
        })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn spawn_detached(&self, spec: &CommandSpec) -> Result<u32, ProvisionError> {
        let mut cmd = Self::build(spec);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        // 独立进程组：终端 Ctrl+C 不会波及服务进程，停止时可整组终止
        #[cfg(unix)]
        cmd.process_group(0);

        #[cfg(windows)]
        {
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        let child = cmd.spawn().map_err(|source| ProvisionError::Spawn {
            command: spec.display(),
            source,
        })?;
        let pid = child.id().ok_or_else(|| ProvisionError::Spawn {
            command: spec.display(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "process exited immediately"),
        })?;
        tracing::info!(command = %spec.display(), pid, "spawned background process");
        Ok(pid)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// 脚本化的假执行器：按 handler 决定每条命令的结果，并记录全部命令
    pub(crate) struct FakeRunner {
        handler: Box<dyn Fn(&CommandSpec) -> Result<CommandOutput, ProvisionError> + Send + Sync>,
        pub(crate) commands: Mutex<Vec<CommandSpec>>,
        pub(crate) spawned: Mutex<Vec<CommandSpec>>,
        pids: Mutex<VecDeque<u32>>,
        on_spawn: Option<Box<dyn Fn() + Send + Sync>>,
    }

    impl FakeRunner {
        pub(crate) fn new(
            handler: impl Fn(&CommandSpec) -> Result<CommandOutput, ProvisionError> + Send + Sync + 'static,
        ) -> Self {
            Self {
                handler: Box::new(handler),
                commands: Mutex::new(Vec::new()),
                spawned: Mutex::new(Vec::new()),
                pids: Mutex::new(VecDeque::from(vec![4242, 4343])),
                on_spawn: None,
            }
        }

        /// 后台启动时触发的钩子（例如让假健康检查变为健康）
        pub(crate) fn on_spawn(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
            self.on_spawn = Some(Box::new(hook));
            self
        }

        pub(crate) fn ran(&self, needle: &str) -> bool {
            self.commands
                .lock()
                .unwrap()
                .iter()
                .any(|c| c.display().contains(needle))
        }
    }

    pub(crate) fn ok(stdout: &str) -> Result<CommandOutput, ProvisionError> {
        Ok(CommandOutput {
            code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        })
    }

    pub(crate) fn fail(code: i32, stderr: &str) -> Result<CommandOutput, ProvisionError> {
        Ok(CommandOutput {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.to_string(),
        })
    }

    pub(crate) fn not_found(spec: &CommandSpec) -> Result<CommandOutput, ProvisionError> {
        Err(ProvisionError::Spawn {
            command: spec.display(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        })
    }

    #[async_trait]
    impl CommandRunner for FakeRunner {
        async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ProvisionError> {
            self.commands.lock().unwrap().push(spec.clone());
            (self.handler)(spec)
        }

        async fn spawn_detached(&self, spec: &CommandSpec) -> Result<u32, ProvisionError> {
            self.spawned.lock().unwrap().push(spec.clone());
            if let Some(ref hook) = self.on_spawn {
                hook();
            }
            Ok(self.pids.lock().unwrap().pop_front().unwrap_or(1))
        }
    }

    #[test]
    fn test_display_and_text() {
        let spec = CommandSpec::new("python3").args(["-m", "venv"]).arg("/tmp/venv");
        assert_eq!(spec.display(), "python3 -m venv /tmp/venv");

        let out = CommandOutput {
            code: Some(0),
            stdout: "  ".into(),
            stderr: "Python 3.11.2\n".into(),
        };
        assert_eq!(out.text(), "Python 3.11.2");
    }

    #[tokio::test]
    async fn test_run_checked_reports_stderr() {
        let runner = FakeRunner::new(|_| fail(1, "No matching distribution\n"));
        let err = run_checked(&runner, &CommandSpec::new("pip").arg("install"))
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("pip install"));
        assert!(msg.contains("exit code 1"));
        assert!(msg.contains("No matching distribution"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_runner_executes() {
        let runner = SystemCommandRunner;
        let out = runner
            .run(&CommandSpec::new("sh").args(["-c", "echo hi; exit 3"]))
            .await
            .unwrap();
        assert_eq!(out.code, Some(3));
        assert_eq!(out.stdout.trim(), "hi");

        let missing = runner.run(&CommandSpec::new("definitely-not-a-binary-xyz")).await;
        assert!(matches!(missing, Err(ProvisionError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_runner_timeout() {
        let runner = SystemCommandRunner;
        let spec = CommandSpec::new("sleep")
            .arg("5")
            .timeout(Duration::from_millis(100));
        assert!(matches!(
            runner.run(&spec).await,
            Err(ProvisionError::CommandTimeout(_))
        ));
    }
}
