//! 环境状态快照与安装进度事件

use std::fmt;

use serde::Serialize;

/// 运行环境状态；每次查询都重新探测，不缓存
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnvironmentStatus {
    pub python_installed: bool,
    pub python_version: Option<String>,
    pub miniforge_installed: bool,
    pub brain_environment_exists: bool,
    pub brain_package_installed: bool,
    pub brain_server_running: bool,
    pub conda_version: Option<String>,
    pub brain_version: Option<String>,
    pub using_system_python: bool,
}

impl EnvironmentStatus {
    /// 设置页顶部的一行摘要
    pub fn summary(&self) -> &'static str {
        if self.brain_server_running {
            "Brain server is running"
        } else if self.brain_package_installed {
            "Environment ready, brain server stopped"
        } else if self.brain_environment_exists {
            "Brain environment exists but package is not installed"
        } else if self.miniforge_installed || self.using_system_python {
            "Python runtime installed but brain environment not ready"
        } else {
            "Environment not installed"
        }
    }
}

/// 安装步骤
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallStep {
    Detect,
    Runtime,
    Environment,
    Package,
    Verify,
    Complete,
    Error,
}

impl InstallStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallStep::Detect => "detect",
            InstallStep::Runtime => "runtime",
            InstallStep::Environment => "environment",
            InstallStep::Package => "package",
            InstallStep::Verify => "verify",
            InstallStep::Complete => "complete",
            InstallStep::Error => "error",
        }
    }

    /// 各检查点的进度百分比
    pub fn progress(&self) -> u8 {
        match self {
            InstallStep::Detect => 5,
            InstallStep::Runtime => 15,
            InstallStep::Environment => 25,
            InstallStep::Package => 60,
            InstallStep::Verify => 90,
            InstallStep::Complete => 100,
            InstallStep::Error => 0,
        }
    }
}

impl fmt::Display for InstallStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次进度回调
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallationProgress {
    pub step: InstallStep,
    pub progress: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InstallationProgress {
    pub fn step(step: InstallStep, message: impl Into<String>) -> Self {
        Self {
            step,
            progress: step.progress(),
            message: message.into(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            step: InstallStep::Error,
            progress: 0,
            message: "Installation failed".to_string(),
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.step == InstallStep::Error
    }
}
