//! 大脑服务的请求 / 响应结构与本地消息格式转换

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::memory::{Message, Role};

/// 发往大脑服务的历史消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
}

/// POST /chat 响应
#[derive(Debug, Clone, Deserialize)]
pub struct BrainChatResponse {
    pub response: String,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub memory_chunks: u32,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub model_type: String,
    #[serde(default)]
    pub model_name: String,
    /// 当前服务端未返回该字段时为空
    #[serde(default)]
    pub memory_backend: String,
}

/// POST /chat 请求体
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest<'a> {
    pub message: &'a str,
    pub history: &'a [ChatMessage],
    pub user_id: &'a str,
    pub system_prompt: &'a str,
    pub model_type: &'a str,
    pub model_name: &'a str,
    pub use_structured_response: bool,
}

/// POST /memory/search 请求体
#[derive(Debug, Clone, Serialize)]
pub struct SearchRequest<'a> {
    pub query: &'a str,
    pub top_k: usize,
}

/// POST /memory/search 响应（只关心 chunks）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub chunks: Vec<String>,
}

/// POST /chat-history/embed 请求体
#[derive(Debug, Clone, Serialize)]
pub struct EmbedRequest<'a> {
    pub chat_history_path: &'a str,
    pub user_id: &'a str,
}

/// POST /chat-history/embed 响应
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbedReport {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub chunks_embedded: u64,
    #[serde(default)]
    pub files_processed: u64,
    #[serde(default)]
    pub chunks_skipped: u64,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl EmbedReport {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }

    /// 一行摘要，如 "Embedded 12 chunks from 3 files (2 skipped - already exist)"
    pub fn summary(&self) -> String {
        let mut line = format!(
            "Embedded {} chunks from {} files",
            self.chunks_embedded, self.files_processed
        );
        if self.chunks_skipped > 0 {
            line.push_str(&format!(
                " ({} skipped - already exist)",
                self.chunks_skipped
            ));
        }
        if !self.errors.is_empty() {
            line.push_str(&format!("; {} errors occurred", self.errors.len()));
        }
        line
    }
}

/// 本地窗口 → 大脑历史：补齐 message_id / timestamp / author_id
pub fn to_brain_messages(messages: &[Message]) -> Vec<ChatMessage> {
    let now = Utc::now();
    let millis = now.timestamp_millis();
    let timestamp = now.to_rfc3339();
    messages
        .iter()
        .enumerate()
        .map(|(index, msg)| ChatMessage {
            role: msg.role,
            content: msg.content.clone(),
            message_id: Some(format!("ghost_{}_{}", millis, index)),
            timestamp: Some(timestamp.clone()),
            author_id: Some(
                if msg.role == Role::User { "user" } else { "assistant" }.to_string(),
            ),
        })
        .collect()
}

/// 大脑回复 → 本地 assistant 消息
pub fn from_brain_response(response: &BrainChatResponse) -> Message {
    Message::assistant(response.response.clone())
}
