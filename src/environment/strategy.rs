//! 运行时策略与目录布局
//!
//! 两种策略共用同一套安装流程，只在“解释器从哪来”上不同：
//! - System：系统已有兼容 Python，在数据目录下建 venv
//! - Bundled：下载 Miniforge 到私有目录，用 conda 建独立环境

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::AppConfig;
use crate::core::ProvisionError;

use super::command::CommandSpec;

/// 解释器来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeStrategy {
    System,
    Bundled,
}

impl fmt::Display for RuntimeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeStrategy::System => write!(f, "system python (venv)"),
            RuntimeStrategy::Bundled => write!(f, "bundled miniforge"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOs {
    Linux,
    MacOs,
    Windows,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostArch {
    X86_64,
    Aarch64,
}

/// 宿主平台（决定安装包名与可执行文件路径）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostPlatform {
    pub os: HostOs,
    pub arch: HostArch,
}

impl HostPlatform {
    /// 当前进程所在平台；不支持的组合返回 None
    pub fn current() -> Option<Self> {
        Self::parse(std::env::consts::OS, std::env::consts::ARCH)
    }

    pub fn parse(os: &str, arch: &str) -> Option<Self> {
        let os = match os {
            "linux" => HostOs::Linux,
            "macos" => HostOs::MacOs,
            "windows" => HostOs::Windows,
            _ => return None,
        };
        let arch = match arch {
            "x86_64" => HostArch::X86_64,
            "aarch64" => HostArch::Aarch64,
            _ => return None,
        };
        Some(Self { os, arch })
    }

    pub fn is_windows(&self) -> bool {
        self.os == HostOs::Windows
    }

    /// Miniforge 安装包文件名（6 种组合）
    pub fn miniforge_installer(&self) -> &'static str {
        match (self.os, self.arch) {
            (HostOs::Linux, HostArch::X86_64) => "Miniforge3-Linux-x86_64.sh",
            (HostOs::Linux, HostArch::Aarch64) => "Miniforge3-Linux-aarch64.sh",
            (HostOs::MacOs, HostArch::X86_64) => "Miniforge3-MacOSX-x86_64.sh",
            (HostOs::MacOs, HostArch::Aarch64) => "Miniforge3-MacOSX-arm64.sh",
            (HostOs::Windows, HostArch::X86_64) => "Miniforge3-Windows-x86_64.exe",
            (HostOs::Windows, HostArch::Aarch64) => "Miniforge3-Windows-arm64.exe",
        }
    }
}

/// 数据目录下各路径与运行时参数
#[derive(Debug, Clone)]
pub struct RuntimeLayout {
    pub base_dir: PathBuf,
    pub venv_dir: PathBuf,
    pub miniforge_dir: PathBuf,
    pub downloads_dir: PathBuf,
    pub brain_dir: PathBuf,
    pub env_name: String,
    pub package_module: String,
    pub platform: Option<HostPlatform>,
}

impl RuntimeLayout {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            venv_dir: base_dir.join("venv"),
            miniforge_dir: base_dir.join("miniforge"),
            downloads_dir: base_dir.join("downloads"),
            brain_dir: base_dir.join("brain"),
            base_dir,
            env_name: "ghost-brain".to_string(),
            package_module: "ghost_brain".to_string(),
            platform: HostPlatform::current(),
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        let mut layout = Self::new(cfg.app.data_dir());
        if let Some(ref dir) = cfg.python.brain_dir {
            layout.brain_dir = dir.clone();
        }
        layout.env_name = cfg.python.env_name.clone();
        layout.package_module = cfg.python.package_module.clone();
        layout
    }

    pub fn with_platform(mut self, platform: HostPlatform) -> Self {
        self.platform = Some(platform);
        self
    }

    fn windows(&self) -> bool {
        self.platform.map(|p| p.is_windows()).unwrap_or(cfg!(windows))
    }

    pub fn platform(&self) -> Result<HostPlatform, ProvisionError> {
        self.platform.ok_or_else(|| {
            ProvisionError::UnsupportedPlatform(format!(
                "{}-{}",
                std::env::consts::OS,
                std::env::consts::ARCH
            ))
        })
    }

    /// 已启动服务的 PID 记录，跨进程（ghost start / ghost stop）共享
    pub fn pid_file(&self) -> PathBuf {
        self.base_dir.join("brain.pid")
    }

    pub fn venv_python(&self) -> PathBuf {
        if self.windows() {
            self.venv_dir.join("Scripts").join("python.exe")
        } else {
            self.venv_dir.join("bin").join("python")
        }
    }

    pub fn conda_bin(&self) -> PathBuf {
        if self.windows() {
            self.miniforge_dir.join("Scripts").join("conda.exe")
        } else {
            self.miniforge_dir.join("bin").join("conda")
        }
    }

    pub fn requirements_path(&self) -> PathBuf {
        self.brain_dir.join("requirements.txt")
    }

    pub fn venv_exists(&self) -> bool {
        self.venv_python().exists()
    }

    /// venv 存在即视为 System 路径，否则为 Bundled
    pub fn active_strategy(&self) -> RuntimeStrategy {
        if self.venv_exists() {
            RuntimeStrategy::System
        } else {
            RuntimeStrategy::Bundled
        }
    }

    /// 对应策略下的解释器调用前缀；调用方再追加参数
    pub fn python_command(&self, strategy: RuntimeStrategy) -> CommandSpec {
        match strategy {
            RuntimeStrategy::System => CommandSpec::new(path_string(&self.venv_python())),
            RuntimeStrategy::Bundled => CommandSpec::new(path_string(&self.conda_bin())).args([
                "run",
                "-n",
                self.env_name.as_str(),
                "python",
            ]),
        }
    }

    pub fn conda_command(&self) -> CommandSpec {
        CommandSpec::new(path_string(&self.conda_bin()))
    }

    /// 服务进程：`<python> -m <package>.server`，工作目录为服务源码目录
    pub fn server_command(&self, strategy: RuntimeStrategy) -> CommandSpec {
        self.python_command(strategy)
            .arg("-m")
            .arg(self.server_module())
            .current_dir(self.brain_dir.clone())
    }

    /// 服务模块名，同时用作按名称终止进程的匹配模式
    pub fn server_module(&self) -> String {
        format!("{}.server", self.package_module)
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
