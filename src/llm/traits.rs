//! LLM 客户端抽象
//!
//! 直连提供商（OpenAI 兼容 / Mock）实现 LlmClient：complete（非流式）、complete_stream（流式 Token）。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use thiserror::Error;

use crate::memory::Message;

/// 提供商调用错误
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Request build error: {0}")]
    RequestError(String),
}

/// 流式 Token
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// LLM 客户端 trait：非流式完成与流式完成（返回 Token 流）
///
/// model 由路由器逐次传入，同一客户端可服务该提供商的任意模型。
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, model: &str, messages: &[Message]) -> Result<String, LlmError>;

    /// 流式完成，返回 Token 流
    async fn complete_stream(
        &self,
        model: &str,
        messages: &[Message],
    ) -> Result<TokenStream, LlmError>;
}
