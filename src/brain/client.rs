//! 大脑服务客户端
//!
//! initialize() 通过 /health 打开“已初始化”闸门；闸门关闭时其他调用直接返回哨兵值、不做任何 I/O。
//! 所有方法都不向调用方传播网络错误：记录日志后返回 None / 空 Vec / false。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use super::health::{BrainHealth, HealthCheck};
use super::transport::{BrainTransport, TransportResponse};
use super::types::{
    BrainChatResponse, ChatMessage, ChatRequest, EmbedReport, EmbedRequest, SearchRequest,
    SearchResponse,
};
use crate::config::AppConfig;
use crate::core::TransportError;
use crate::llm::{resolve_model_type, ModelCatalog};

/// 默认用户标识
pub const DEFAULT_USER_ID: &str = "obsidian_user";

/// 构建客户端时的设置快照（设置变更后重建客户端）
#[derive(Debug, Clone)]
pub struct BrainClientSettings {
    pub base_url: String,
    pub system_prompt: String,
    pub model: String,
    pub catalog: ModelCatalog,
    pub health_timeout: Duration,
    pub request_timeout: Duration,
}

impl BrainClientSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            base_url: cfg.brain.base_url(),
            system_prompt: cfg.general.system_prompt.clone(),
            model: cfg.general.model.clone(),
            catalog: ModelCatalog::from_config(&cfg.providers),
            health_timeout: Duration::from_secs(cfg.brain.health_timeout_secs),
            request_timeout: Duration::from_secs(cfg.brain.request_timeout_secs),
        }
    }
}

/// 大脑服务客户端
pub struct BrainClient {
    transport: Arc<dyn BrainTransport>,
    settings: BrainClientSettings,
    initialized: AtomicBool,
}

impl BrainClient {
    pub fn new(transport: Arc<dyn BrainTransport>, settings: BrainClientSettings) -> Self {
        Self {
            transport,
            settings,
            initialized: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &BrainClientSettings {
        &self.settings
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    pub fn health_check(&self) -> HealthCheck {
        HealthCheck::new(
            self.transport.clone(),
            &self.settings.base_url,
            self.settings.health_timeout,
        )
    }

    /// 探测 /health，成功则打开闸门；从不报错
    pub async fn initialize(&self) -> bool {
        match self.health_check().check().await {
            BrainHealth::Healthy => {
                self.initialized.store(true, Ordering::SeqCst);
                tracing::info!(url = %self.settings.base_url, "Brain integration initialized successfully");
                true
            }
            other => {
                tracing::warn!(
                    url = %self.settings.base_url,
                    status = ?other,
                    "Brain not available, falling back to local mode"
                );
                false
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// 换模型后的新客户端；沿用当前闸门状态，不重新探测 /health
    pub fn with_model(&self, model: impl Into<String>) -> Self {
        let mut settings = self.settings.clone();
        settings.model = model.into();
        Self {
            transport: self.transport.clone(),
            settings,
            initialized: AtomicBool::new(self.is_available()),
        }
    }

    /// 当前模型对应的 model_type
    pub fn model_type(&self) -> &'static str {
        resolve_model_type(&self.settings.catalog, &self.settings.model)
    }

    /// POST /chat；闸门关闭、非 2xx、网络或解析失败时返回 None
    pub async fn process_message(
        &self,
        message: &str,
        history: &[ChatMessage],
        user_id: &str,
    ) -> Option<BrainChatResponse> {
        if !self.is_available() {
            tracing::warn!("Brain not initialized, cannot process message");
            return None;
        }

        let request = ChatRequest {
            message,
            history,
            user_id,
            system_prompt: &self.settings.system_prompt,
            model_type: self.model_type(),
            model_name: &self.settings.model,
            use_structured_response: false,
        };

        match self.post("/chat", &request, self.settings.request_timeout).await {
            Ok(resp) => match resp.json::<BrainChatResponse>() {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    tracing::error!(error = %e, "Brain chat response could not be decoded");
                    None
                }
            },
            Err(e) => {
                tracing::error!(error = %e, "Error processing message with brain");
                None
            }
        }
    }

    /// POST /memory/search；任何失败都返回空 Vec
    pub async fn search_memory(&self, query: &str, top_k: usize) -> Vec<String> {
        if !self.is_available() {
            return Vec::new();
        }

        let request = SearchRequest { query, top_k };
        match self
            .post("/memory/search", &request, self.settings.request_timeout)
            .await
            .and_then(|resp| resp.json::<SearchResponse>())
        {
            Ok(parsed) => parsed.chunks,
            Err(e) => {
                tracing::error!(error = %e, "Memory search failed");
                Vec::new()
            }
        }
    }

    /// GET /memory/stats（结构由服务端决定）
    pub async fn memory_stats(&self) -> Option<Value> {
        if !self.is_available() {
            return None;
        }

        let url = self.url("/memory/stats");
        let result = self
            .transport
            .get(&url, self.settings.request_timeout)
            .await
            .and_then(ensure_success)
            .and_then(|resp| resp.json::<Value>());
        match result {
            Ok(stats) => Some(stats),
            Err(e) => {
                tracing::error!(error = %e, "Failed to get memory stats");
                None
            }
        }
    }

    /// POST /chat-history/embed：触发服务端批量嵌入聊天记录目录
    pub async fn embed_chat_history(&self, chat_history_path: &str, user_id: &str) -> Option<EmbedReport> {
        if !self.is_available() {
            return None;
        }

        let request = EmbedRequest {
            chat_history_path,
            user_id,
        };
        // 批量嵌入耗时较长，沿用普通请求超时
        match self
            .post("/chat-history/embed", &request, self.settings.request_timeout)
            .await
            .and_then(|resp| resp.json::<EmbedReport>())
        {
            Ok(report) => {
                tracing::info!(summary = %report.summary(), "chat history embedded");
                Some(report)
            }
            Err(e) => {
                tracing::error!(error = %e, "Error embedding chat history");
                None
            }
        }
    }

    /// POST /config/update：更新服务端运行配置
    pub async fn update_config(&self, config: Value) -> bool {
        if !self.is_available() {
            return false;
        }

        let body = serde_json::json!({ "config": config });
        match self
            .post("/config/update", &body, self.settings.request_timeout)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(error = %e, "Brain config update failed");
                false
            }
        }
    }

    async fn post<T: Serialize>(
        &self,
        path: &str,
        body: &T,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        let body = serde_json::to_value(body).map_err(|e| TransportError::Decode(e.to_string()))?;
        let url = self.url(path);
        self.transport
            .post_json(&url, &body, timeout)
            .await
            .and_then(ensure_success)
    }
}

fn ensure_success(resp: TransportResponse) -> Result<TransportResponse, TransportError> {
    if resp.is_success() {
        Ok(resp)
    } else {
        Err(TransportError::Network(format!("HTTP {}", resp.status)))
    }
}
