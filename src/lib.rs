//! Ghost - 聊天路由与大脑服务编排
//!
//! 模块划分：
//! - **brain**: 大脑服务 HTTP 客户端（健康检查、/chat、记忆检索、聊天记录嵌入）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 消息协调、单轮对话、服务监管、关闭处理、运行时上下文
//! - **environment**: Python 运行环境探测与安装（系统 venv / Miniforge）
//! - **llm**: 提供商目录、直连路由与 OpenAI 兼容客户端
//! - **memory**: 滚动窗口与本地历史持久化
//! - **observability**: 日志
//! - **secrets**: API Key 存储

pub mod brain;
pub mod config;
pub mod core;
pub mod environment;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod secrets;

pub use crate::core::{ChatSession, MessageCoordinator, RuntimeContext};
