//! 错误类型
//!
//! 按层划分：运行环境安装（ProvisionError）、大脑服务 HTTP（TransportError）、
//! 提供商直连分发（DispatchError）、运行时上下文（GhostError）。
//! 公开的 Coordinator / Client / Supervisor 方法不向外抛这些错误，而是记录日志后返回哨兵值。

use thiserror::Error;

use crate::llm::{LlmError, ProviderKind};

/// 运行时安装、探测、进程启停过程中的错误
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("`{0}` timed out")]
    CommandTimeout(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Brain package not installed. Please install the environment first.")]
    PackageNotInstalled,

    #[error("Brain package installation verification failed")]
    VerificationFailed,

    #[error("Installation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// 大脑服务 HTTP 传输层错误
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response body: {0}")]
    Decode(String),
}

/// 直连提供商分发错误；Display 文本即展示给用户的错误消息
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Model not found.")]
    ModelNotFound,

    #[error("Connection not found.")]
    ConnectionNotFound,

    #[error("No client configured for {0}")]
    ClientMissing(ProviderKind),

    #[error("{0}")]
    Provider(#[from] LlmError),
}

/// 运行时上下文初始化错误
#[derive(Error, Debug)]
pub enum GhostError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
