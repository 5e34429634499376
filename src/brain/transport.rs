//! 大脑服务 HTTP 传输层
//!
//! BrainClient 只依赖 BrainTransport trait：生产环境用 reqwest 实现，测试中可替换为计数的假实现，
//! 从而断言“未初始化时不发生任何网络 I/O”。每个请求都带显式超时。

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::TransportError;

/// HTTP 响应：状态码 + 原始响应体
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        serde_json::from_str(&self.body).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

/// GET / POST JSON 两种请求即可覆盖大脑服务的全部端点
#[async_trait]
pub trait BrainTransport: Send + Sync {
    async fn get(&self, url: &str, timeout: Duration) -> Result<TransportResponse, TransportError>;

    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError>;
}

/// 基于 reqwest 的实现
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn into_response(
        url: &str,
        result: reqwest::Result<reqwest::Response>,
    ) -> Result<TransportResponse, TransportError> {
        let response = result.map_err(|e| map_reqwest_error(url, e))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| map_reqwest_error(url, e))?;
        Ok(TransportResponse { status, body })
    }
}

fn map_reqwest_error(url: &str, e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(url.to_string())
    } else {
        TransportError::Network(e.to_string())
    }
}

#[async_trait]
impl BrainTransport for HttpTransport {
    async fn get(&self, url: &str, timeout: Duration) -> Result<TransportResponse, TransportError> {
        let result = self
            .client
            .get(url)
            .header("Content-Type", "application/json")
            .timeout(timeout)
            .send()
            .await;
        Self::into_response(url, result).await
    }

    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        let result = self
            .client
            .post(url)
            .json(body)
            .timeout(timeout)
            .send()
            .await;
        Self::into_response(url, result).await
    }
}
