//! 大脑服务集成：HTTP 传输、类型、健康检查、带闸门的客户端

pub mod client;
pub mod health;
pub mod transport;
pub mod types;

pub use client::{BrainClient, BrainClientSettings, DEFAULT_USER_ID};
pub use health::{spawn_status_monitor, BrainHealth, HealthCheck};
pub use transport::{BrainTransport, HttpTransport, TransportResponse};
pub use types::{
    from_brain_response, to_brain_messages, BrainChatResponse, ChatMessage, EmbedReport,
};
