//! 直连提供商路由器
//!
//! 大脑服务不可用或未给出回复时，按当前模型名选择提供商：
//! - 模型名为空：报 "Model not found."
//! - 按 DISPATCH_PRECEDENCE 逐个匹配提供商的模型列表，都不命中报 "Connection not found."
//! - 命中后根据该提供商的 allow_stream 决定流式还是一次性返回

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;

use super::provider::{first_match, ModelCatalog, ProviderKind, DISPATCH_PRECEDENCE};
use super::LlmClient;
use crate::core::DispatchError;
use crate::memory::Message;

/// 一次路由决策：目标提供商与是否流式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub provider: ProviderKind,
    pub stream: bool,
}

/// 提供商路由器：模型目录 + 每个提供商的客户端
pub struct ProviderRouter {
    catalog: ModelCatalog,
    clients: HashMap<ProviderKind, Arc<dyn LlmClient>>,
    /// 调用统计
    call_count: AtomicUsize,
}

impl ProviderRouter {
    pub fn new(catalog: ModelCatalog) -> Self {
        Self {
            catalog,
            clients: HashMap::new(),
            call_count: AtomicUsize::new(0),
        }
    }

    /// 注册提供商客户端
    pub fn add_client(&mut self, provider: ProviderKind, client: Arc<dyn LlmClient>) {
        self.clients.insert(provider, client);
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// 根据模型名选择提供商
    pub fn route(&self, model: &str) -> Result<Route, DispatchError> {
        if model.trim().is_empty() {
            return Err(DispatchError::ModelNotFound);
        }
        let provider = first_match(DISPATCH_PRECEDENCE, &self.catalog, model)
            .ok_or(DispatchError::ConnectionNotFound)?;
        Ok(Route {
            provider,
            stream: self.catalog.streams(provider),
        })
    }

    /// 分发一轮对话；流式时每个 Token 额外发往 tokens（若有），最终返回完整文本
    pub async fn dispatch(
        &self,
        model: &str,
        messages: &[Message],
        tokens: Option<&mpsc::UnboundedSender<String>>,
    ) -> Result<(Route, String), DispatchError> {
        let route = self.route(model)?;
        let client = self
            .clients
            .get(&route.provider)
            .ok_or(DispatchError::ClientMissing(route.provider))?;

        self.call_count.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(provider = %route.provider, stream = route.stream, model, "direct dispatch");

        if !route.stream {
            let text = client.complete(model, messages).await?;
            return Ok((route, text));
        }

        let mut stream = client.complete_stream(model, messages).await?;
        let mut text = String::new();
        while let Some(token) = stream.next().await {
            let token = token?;
            if let Some(tx) = tokens {
                let _ = tx.send(token.clone());
            }
            text.push_str(&token);
        }
        Ok((route, text))
    }

    /// 获取调用统计
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    fn router_with(kind: ProviderKind, model: &str, allow_stream: bool) -> (ProviderRouter, Arc<MockLlmClient>) {
        let mut catalog = ModelCatalog::default();
        let entry = catalog.provider_mut(kind);
        entry.models.push(model.to_string());
        entry.allow_stream = allow_stream;

        let mock = Arc::new(MockLlmClient::new("hello world"));
        let mut router = ProviderRouter::new(catalog);
        router.add_client(kind, mock.clone());
        (router, mock)
    }

    #[test]
    fn test_route_errors() {
        let (router, _) = router_with(ProviderKind::OpenAi, "gpt-4o", false);
        assert!(matches!(router.route(""), Err(DispatchError::ModelNotFound)));
        assert!(matches!(router.route("unknown"), Err(DispatchError::ConnectionNotFound)));
        assert_eq!(DispatchError::ConnectionNotFound.to_string(), "Connection not found.");
    }

    #[tokio::test]
    async fn test_dispatch_buffered() {
        let (router, mock) = router_with(ProviderKind::Mistral, "mistral-small", false);
        let (route, text) = router
            .dispatch("mistral-small", &[Message::user("hi")], None)
            .await
            .unwrap();
        assert_eq!(route, Route { provider: ProviderKind::Mistral, stream: false });
        assert_eq!(text, "hello world");
        assert_eq!(mock.calls(), 1);
        assert_eq!(router.call_count(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_sends_routed_model() {
        let mut catalog = ModelCatalog::default();
        catalog
            .provider_mut(ProviderKind::OpenAi)
            .models
            .extend(["gpt-4o".to_string(), "gpt-4-turbo".to_string()]);
        let mock = Arc::new(MockLlmClient::new("ok"));
        let mut router = ProviderRouter::new(catalog);
        router.add_client(ProviderKind::OpenAi, mock.clone());

        router.dispatch("gpt-4-turbo", &[Message::user("hi")], None).await.unwrap();
        assert_eq!(mock.last_model().as_deref(), Some("gpt-4-turbo"));
        router.dispatch("gpt-4o", &[Message::user("hi")], None).await.unwrap();
        assert_eq!(mock.last_model().as_deref(), Some("gpt-4o"));
    }

    #[tokio::test]
    async fn test_dispatch_streaming_forwards_tokens() {
        let (router, _) = router_with(ProviderKind::Ollama, "llama3", true);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (route, text) = router
            .dispatch("llama3", &[Message::user("hi")], Some(&tx))
            .await
            .unwrap();
        assert!(route.stream);
        assert_eq!(text, "hello world");

        drop(tx);
        let mut streamed = String::new();
        while let Some(t) = rx.recv().await {
            streamed.push_str(&t);
        }
        assert_eq!(streamed, "hello world");
    }

    #[tokio::test]
    async fn test_dispatch_without_client() {
        let mut catalog = ModelCatalog::default();
        catalog.anthropic.models.push("claude-2.1".to_string());
        let router = ProviderRouter::new(catalog);
        let err = router.dispatch("claude-2.1", &[], None).await.unwrap_err();
        assert!(matches!(err, DispatchError::ClientMissing(ProviderKind::Anthropic)));
    }
}
