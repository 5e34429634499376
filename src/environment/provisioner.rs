//! 运行环境安装与状态探测
//!
//! 一次 install 的流程：探测系统 Python → 选择策略（System / Bundled）→ 准备解释器与隔离环境
//! → 安装依赖与服务包 → 重新探测验证。每个检查点回调一次进度；任一步失败转为
//! `step: error` 的最终事件并返回 false，不回滚已完成的步骤。

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::brain::HealthCheck;
use crate::config::AppConfig;
use crate::core::ProvisionError;

use super::command::{query_text, run_checked, CommandRunner, CommandSpec};
use super::download::Downloader;
use super::status::{EnvironmentStatus, InstallStep, InstallationProgress};
use super::strategy::{RuntimeLayout, RuntimeStrategy};
use super::version::{strip_python_prefix, PythonRequirement};
use super::ProvisioningLock;

/// 状态探测命令的超时；`conda run` 冷启动较慢
const QUERY_TIMEOUT: Duration = Duration::from_secs(60);

/// 系统 Python 的两个等价别名，按顺序尝试
const SYSTEM_PYTHON_ALIASES: [&str; 2] = ["python3", "python"];

/// 探测到的系统解释器
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemPython {
    pub program: String,
    pub version: String,
}

pub struct Provisioner {
    layout: RuntimeLayout,
    requirement: PythonRequirement,
    miniforge_url_base: String,
    runner: Arc<dyn CommandRunner>,
    downloader: Arc<dyn Downloader>,
    health: HealthCheck,
    lock: ProvisioningLock,
}

impl Provisioner {
    pub fn new(
        layout: RuntimeLayout,
        requirement: PythonRequirement,
        runner: Arc<dyn CommandRunner>,
        downloader: Arc<dyn Downloader>,
        health: HealthCheck,
        lock: ProvisioningLock,
    ) -> Self {
        Self {
            layout,
            requirement,
            miniforge_url_base: "https://github.com/conda-forge/miniforge/releases/latest/download"
                .to_string(),
            runner,
            downloader,
            health,
            lock,
        }
    }

    pub fn from_config(
        cfg: &AppConfig,
        runner: Arc<dyn CommandRunner>,
        downloader: Arc<dyn Downloader>,
        health: HealthCheck,
        lock: ProvisioningLock,
    ) -> Self {
        let mut provisioner = Self::new(
            RuntimeLayout::from_config(cfg),
            PythonRequirement::from(&cfg.python),
            runner,
            downloader,
            health,
            lock,
        );
        provisioner.miniforge_url_base = cfg
            .python
            .miniforge_url_base
            .trim_end_matches('/')
            .to_string();
        provisioner
    }

    pub fn layout(&self) -> &RuntimeLayout {
        &self.layout
    }

    // ---------- 状态探测 ----------

    /// 重新探测整个环境；只读，从不返回错误（探测失败即对应字段为 false / None）
    pub async fn status(&self) -> EnvironmentStatus {
        let mut status = EnvironmentStatus::default();

        if let Some(system) = self.detect_system_python().await {
            status.python_installed = true;
            status.python_version = Some(system.version);
        }

        let conda = self.query(self.layout.conda_command().arg("--version"));
        status.conda_version = query_text(self.runner.as_ref(), &conda).await;
        status.miniforge_installed = status.conda_version.is_some();

        let strategy = self.layout.active_strategy();
        match strategy {
            RuntimeStrategy::System => {
                status.using_system_python = true;
                status.brain_environment_exists = true;
            }
            RuntimeStrategy::Bundled => {
                if status.miniforge_installed {
                    status.brain_environment_exists = self.conda_env_exists().await;
                }
            }
        }

        if status.brain_environment_exists {
            if let Some(version) = self.env_python_version(strategy).await {
                status.python_installed = true;
                status.python_version = Some(version);
            }
            status.brain_package_installed = self.package_importable(strategy).await;
        }

        if status.brain_package_installed {
            status.brain_version = self.package_version(strategy).await;
            status.brain_server_running = self.health.check().await.is_healthy();
        }

        tracing::debug!(?status, "environment status");
        status
    }

    /// 第一个能回应 `--version` 的系统解释器（不论是否兼容）
    pub async fn detect_system_python(&self) -> Option<SystemPython> {
        for program in SYSTEM_PYTHON_ALIASES {
            let spec = self.query(CommandSpec::new(program).arg("--version"));
            if let Some(text) = query_text(self.runner.as_ref(), &spec).await {
                return Some(SystemPython {
                    program: program.to_string(),
                    version: strip_python_prefix(&text),
                });
            }
        }
        None
    }

    /// 第一个版本满足要求的系统解释器
    pub async fn find_compatible_python(&self) -> Option<SystemPython> {
        for program in SYSTEM_PYTHON_ALIASES {
            let spec = self.query(CommandSpec::new(program).arg("--version"));
            let Some(text) = query_text(self.runner.as_ref(), &spec).await else {
                continue;
            };
            if self.requirement.accepts(&text) {
                return Some(SystemPython {
                    program: program.to_string(),
                    version: strip_python_prefix(&text),
                });
            }
            tracing::info!(program, version = %text, "system python too old, skipping");
        }
        None
    }

    async fn conda_env_exists(&self) -> bool {
        let spec = self.query(self.layout.conda_command().args(["env", "list"]));
        match query_text(self.runner.as_ref(), &spec).await {
            Some(listing) => env_listed(&listing, &self.layout.env_name),
            None => false,
        }
    }

    async fn env_python_version(&self, strategy: RuntimeStrategy) -> Option<String> {
        let spec = self.query(self.layout.python_command(strategy).arg("--version"));
        query_text(self.runner.as_ref(), &spec)
            .await
            .map(|text| strip_python_prefix(&text))
    }

    async fn package_importable(&self, strategy: RuntimeStrategy) -> bool {
        let spec = self.query(
            self.layout
                .python_command(strategy)
                .arg("-c")
                .arg(format!("import {}", self.layout.package_module)),
        );
        query_text(self.runner.as_ref(), &spec).await.is_some()
    }

    async fn package_version(&self, strategy: RuntimeStrategy) -> Option<String> {
        let module = &self.layout.package_module;
        let spec = self.query(
            self.layout
                .python_command(strategy)
                .arg("-c")
                .arg(format!("import {m}; print({m}.__version__)", m = module)),
        );
        query_text(self.runner.as_ref(), &spec).await
    }

    fn query(&self, spec: CommandSpec) -> CommandSpec {
        spec.timeout(QUERY_TIMEOUT)
    }

    // ---------- 安装 ----------

    /// 安装运行环境；成功返回 true。持有供给锁直到结束，取消令牌触发时立即中止当前命令。
    pub async fn install<F>(&self, mut on_progress: F, cancel: CancellationToken) -> bool
    where
        F: FnMut(InstallationProgress) + Send,
    {
        let _guard = self.lock.lock().await;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProvisionError::Cancelled),
            r = self.run_install(&mut on_progress) => r,
        };

        match result {
            Ok(strategy) => {
                tracing::info!(%strategy, "installation complete");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "installation failed");
                on_progress(InstallationProgress::failed(e.to_string()));
                false
            }
        }
    }

    async fn run_install<F>(&self, on_progress: &mut F) -> Result<RuntimeStrategy, ProvisionError>
    where
        F: FnMut(InstallationProgress) + Send,
    {
        on_progress(InstallationProgress::step(
            InstallStep::Detect,
            "Detecting Python runtime...",
        ));
        tokio::fs::create_dir_all(&self.layout.base_dir).await?;

        let strategy = match self.find_compatible_python().await {
            Some(system) => {
                on_progress(InstallationProgress::step(
                    InstallStep::Runtime,
                    format!("Using system Python {}", system.version),
                ));
                on_progress(InstallationProgress::step(
                    InstallStep::Environment,
                    "Creating virtual environment...",
                ));
                self.create_venv(&system).await?;
                RuntimeStrategy::System
            }
            None => {
                on_progress(InstallationProgress::step(
                    InstallStep::Runtime,
                    "Installing Miniforge...",
                ));
                self.ensure_miniforge().await?;
                on_progress(InstallationProgress::step(
                    InstallStep::Environment,
                    "Creating brain environment...",
                ));
                self.ensure_conda_env().await?;
                RuntimeStrategy::Bundled
            }
        };

        on_progress(InstallationProgress::step(
            InstallStep::Package,
            "Installing brain package...",
        ));
        self.install_package(strategy).await?;

        on_progress(InstallationProgress::step(
            InstallStep::Verify,
            "Verifying installation...",
        ));
        if !self.status().await.brain_package_installed {
            return Err(ProvisionError::VerificationFailed);
        }

        on_progress(InstallationProgress::step(
            InstallStep::Complete,
            "Installation complete!",
        ));
        Ok(strategy)
    }

    async fn create_venv(&self, system: &SystemPython) -> Result<(), ProvisionError> {
        if self.layout.venv_exists() {
            tracing::info!(venv = %self.layout.venv_dir.display(), "reusing existing venv");
            return Ok(());
        }
        let spec = CommandSpec::new(system.program.as_str())
            .args(["-m", "venv"])
            .path_arg(&self.layout.venv_dir);
        run_checked(self.runner.as_ref(), &spec).await?;
        Ok(())
    }

    async fn ensure_miniforge(&self) -> Result<(), ProvisionError> {
        let check = self.query(self.layout.conda_command().arg("--version"));
        if query_text(self.runner.as_ref(), &check).await.is_some() {
            tracing::info!("miniforge already installed");
            return Ok(());
        }

        let platform = self.layout.platform()?;
        let installer_name = platform.miniforge_installer();
        let url = format!("{}/{}", self.miniforge_url_base, installer_name);
        let installer = self.layout.downloads_dir.join(installer_name);
        self.downloader.download(&url, &installer).await?;

        let spec = if platform.is_windows() {
            CommandSpec::new(installer.to_string_lossy().into_owned())
                .arg("/S")
                .arg(format!("/D={}", self.layout.miniforge_dir.display()))
        } else {
            CommandSpec::new("bash")
                .path_arg(&installer)
                .args(["-b", "-u", "-p"])
                .path_arg(&self.layout.miniforge_dir)
        };
        run_checked(self.runner.as_ref(), &spec).await?;
        Ok(())
    }

    async fn ensure_conda_env(&self) -> Result<(), ProvisionError> {
        if self.conda_env_exists().await {
            tracing::info!(env = %self.layout.env_name, "conda environment already exists");
            return Ok(());
        }
        let spec = self.layout.conda_command().args([
            "create".to_string(),
            "-n".to_string(),
            self.layout.env_name.clone(),
            format!("python={}", self.requirement.conda_spec()),
            "-y".to_string(),
        ]);
        run_checked(self.runner.as_ref(), &spec).await?;
        Ok(())
    }

    async fn install_package(&self, strategy: RuntimeStrategy) -> Result<(), ProvisionError> {
        let pip = || self.layout.python_command(strategy).args(["-m", "pip", "install"]);

        let requirements = self.layout.requirements_path();
        if requirements.exists() {
            run_checked(self.runner.as_ref(), &pip().arg("-r").path_arg(&requirements)).await?;
        } else {
            tracing::warn!(path = %requirements.display(), "requirements.txt not found, skipping");
        }

        run_checked(self.runner.as_ref(), &pip().arg("-e").path_arg(&self.layout.brain_dir)).await?;
        Ok(())
    }
}

/// `conda env list` 输出中是否有名为 env 的环境（按首列精确匹配）
fn env_listed(listing: &str, env: &str) -> bool {
    listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .any(|line| line.split_whitespace().next() == Some(env))
}
