//! Python 运行环境：命令执行、版本判断、策略与目录布局、安装与状态探测

pub mod command;
pub mod download;
pub mod provisioner;
pub mod status;
pub mod strategy;
pub mod version;

use std::sync::Arc;

pub use command::{CommandOutput, CommandRunner, CommandSpec, SystemCommandRunner};
pub use download::{Downloader, HttpDownloader};
pub use provisioner::{Provisioner, SystemPython};
pub use status::{EnvironmentStatus, InstallStep, InstallationProgress};
pub use strategy::{HostArch, HostOs, HostPlatform, RuntimeLayout, RuntimeStrategy};
pub use version::{is_python_version_compatible, PythonRequirement};

/// 进程级供给锁：安装与启动服务互斥
pub type ProvisioningLock = Arc<tokio::sync::Mutex<()>>;
