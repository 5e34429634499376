//! 单轮对话编排
//!
//! 用户输入先进入滚动窗口；大脑可用且给出回复时直接采用，否则按当前模型直连提供商。
//! 提供商失败转为显式的 Failed 结果由调用方展示，用户消息不会丢失。

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::coordinator::MessageCoordinator;
use crate::llm::{ProviderKind, ProviderRouter};
use crate::memory::Message;

/// 回复来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplySource {
    Brain,
    Provider(ProviderKind),
}

/// 一轮对话的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Reply { text: String, source: ReplySource },
    /// 提供商报错；message 为展示给用户的文本
    Failed { message: String },
    /// 空输入
    Ignored,
    /// 等待回复期间被取消；用户消息已入窗口
    Cancelled,
}

pub struct ChatSession {
    coordinator: MessageCoordinator,
    router: Arc<ProviderRouter>,
    model: String,
    system_prompt: String,
}

impl ChatSession {
    pub fn new(
        coordinator: MessageCoordinator,
        router: Arc<ProviderRouter>,
        model: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            coordinator,
            router,
            model: model.into(),
            system_prompt: system_prompt.into(),
        }
    }

    pub fn coordinator(&self) -> &MessageCoordinator {
        &self.coordinator
    }

    pub fn coordinator_mut(&mut self) -> &mut MessageCoordinator {
        &mut self.coordinator
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// 同时切换直连模型与发往大脑的 model_name / model_type
    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
        self.coordinator.set_model(&self.model);
    }

    /// 与 submit 相同，但 cancel 触发时立即放弃等待并返回 Cancelled
    pub async fn submit_until(
        &mut self,
        input: &str,
        tokens: Option<&mpsc::UnboundedSender<String>>,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("turn cancelled");
                TurnOutcome::Cancelled
            }
            outcome = self.submit(input, tokens) => outcome,
        }
    }

    /// 处理一轮用户输入；流式提供商的 Token 同时发往 tokens
    pub async fn submit(
        &mut self,
        input: &str,
        tokens: Option<&mpsc::UnboundedSender<String>>,
    ) -> TurnOutcome {
        let input = input.trim();
        if input.is_empty() {
            return TurnOutcome::Ignored;
        }

        self.coordinator.add_user_message(input).await;

        if let Some(reply) = self.coordinator.process_message_with_brain(input).await {
            self.coordinator.add_assistant_message(reply.clone()).await;
            return TurnOutcome::Reply {
                text: reply,
                source: ReplySource::Brain,
            };
        }

        let messages = self.provider_messages();
        match self.router.dispatch(&self.model, &messages, tokens).await {
            Ok((route, reply)) => {
                self.coordinator.add_assistant_message(reply.clone()).await;
                TurnOutcome::Reply {
                    text: reply,
                    source: ReplySource::Provider(route.provider),
                }
            }
            Err(e) => {
                tracing::warn!(model = %self.model, error = %e, "direct dispatch failed");
                TurnOutcome::Failed {
                    message: e.to_string(),
                }
            }
        }
    }

    /// 系统提示词 + 当前窗口
    fn provider_messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.coordinator.max_messages() + 1);
        if !self.system_prompt.trim().is_empty() {
            messages.push(Message::system(self.system_prompt.clone()));
        }
        messages.extend(self.coordinator.history());
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use crate::brain::client::tests::{settings, FakeTransport, CHAT_OK};
    use crate::llm::{LlmClient, LlmError, MockLlmClient, ModelCatalog, TokenStream};
    use crate::memory::ConversationPersistence;

    async fn session(
        dir: &TempDir,
        transport: Arc<FakeTransport>,
        allow_stream: bool,
    ) -> (ChatSession, Arc<ProviderRouter>, Arc<MockLlmClient>) {
        let persistence = ConversationPersistence::new(dir.path().join("history.json"));
        let mut coordinator = MessageCoordinator::new(transport, settings(), persistence, 20, "tester");
        coordinator.initialize().await;

        let mut catalog = ModelCatalog::default();
        let openai = catalog.provider_mut(ProviderKind::OpenAi);
        openai.models.push("gpt-4o".into());
        openai.allow_stream = allow_stream;
        let mut router = ProviderRouter::new(catalog);
        let mock = Arc::new(MockLlmClient::new("from provider"));
        router.add_client(ProviderKind::OpenAi, mock.clone());
        let router = Arc::new(router);

        (
            ChatSession::new(coordinator, router.clone(), "gpt-4o", "be brief"),
            router,
            mock,
        )
    }

    #[tokio::test]
    async fn test_brain_reply_skips_provider() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(FakeTransport::new());
        transport.respond("/health", 200, "{}");
        transport.respond("/chat", 200, CHAT_OK);
        let (mut chat, router, mock) = session(&dir, transport, false).await;

        let outcome = chat.submit("hello", None).await;
        assert_eq!(
            outcome,
            TurnOutcome::Reply {
                text: "from brain".into(),
                source: ReplySource::Brain
            }
        );
        assert_eq!(router.call_count(), 0);
        assert_eq!(mock.calls(), 0);
        assert_eq!(
            chat.coordinator().history(),
            vec![Message::user("hello"), Message::assistant("from brain")]
        );
        chat.coordinator().wait_for_mirrors().await;
    }

    #[tokio::test]
    async fn test_falls_back_to_provider() {
        let dir = TempDir::new().unwrap();
        let (mut chat, router, mock) = session(&dir, Arc::new(FakeTransport::new()), false).await;

        let outcome = chat.submit("  hello  ", None).await;
        assert_eq!(
            outcome,
            TurnOutcome::Reply {
                text: "from provider".into(),
                source: ReplySource::Provider(ProviderKind::OpenAi)
            }
        );
        assert_eq!(router.call_count(), 1);
        assert_eq!(mock.calls(), 1);
        assert_eq!(chat.coordinator().history()[0], Message::user("hello"));
    }

    #[tokio::test]
    async fn test_streams_tokens() {
        let dir = TempDir::new().unwrap();
        let (mut chat, _router, _mock) = session(&dir, Arc::new(FakeTransport::new()), true).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outcome = chat.submit("hello", Some(&tx)).await;
        drop(tx);
        let mut streamed = String::new();
        while let Some(token) = rx.recv().await {
            streamed.push_str(&token);
        }
        assert_eq!(streamed, "from provider");
        assert!(matches!(outcome, TurnOutcome::Reply { .. }));
    }

    #[tokio::test]
    async fn test_unknown_model_keeps_user_turn() {
        let dir = TempDir::new().unwrap();
        let (mut chat, _router, mock) = session(&dir, Arc::new(FakeTransport::new()), false).await;

        chat.set_model("llama-unknown");
        let outcome = chat.submit("hello", None).await;
        assert_eq!(
            outcome,
            TurnOutcome::Failed {
                message: "Connection not found.".into()
            }
        );
        assert_eq!(mock.calls(), 0);
        assert_eq!(chat.coordinator().history(), vec![Message::user("hello")]);

        chat.set_model("");
        assert_eq!(
            chat.submit("again", None).await,
            TurnOutcome::Failed {
                message: "Model not found.".into()
            }
        );
    }

    #[tokio::test]
    async fn test_set_model_reaches_brain_and_provider() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(FakeTransport::new());
        transport.respond("/health", 200, "{}");
        transport.respond("/chat", 200, CHAT_OK);

        let mut brain_settings = settings();
        brain_settings
            .catalog
            .provider_mut(ProviderKind::Anthropic)
            .models
            .push("claude-2.1".into());
        let persistence = ConversationPersistence::new(dir.path().join("history.json"));
        let mut coordinator =
            MessageCoordinator::new(transport.clone(), brain_settings.clone(), persistence, 20, "tester");
        coordinator.initialize().await;

        let mut router = ProviderRouter::new(brain_settings.catalog.clone());
        let mock = Arc::new(MockLlmClient::new("from provider"));
        router.add_client(ProviderKind::Anthropic, mock.clone());
        let mut chat = ChatSession::new(coordinator, Arc::new(router), "gpt-4o", "be brief");

        chat.set_model("claude-2.1");
        assert!(chat.coordinator().is_brain_available());
        chat.submit("hello", None).await;
        {
            let requests = transport.requests.lock().unwrap();
            let (url, body) = requests
                .iter()
                .find(|(url, _)| url.ends_with("/chat"))
                .unwrap();
            assert!(url.ends_with("/chat"));
            let body = body.as_ref().unwrap();
            assert_eq!(body["model_name"], "claude-2.1");
            assert_eq!(body["model_type"], "anthropic");
        }
        chat.coordinator().wait_for_mirrors().await;

        // 大脑掉线后直连提供商，请求同样使用新模型
        transport.respond("/chat", 503, "");
        let outcome = chat.submit("again", None).await;
        assert_eq!(
            outcome,
            TurnOutcome::Reply {
                text: "from provider".into(),
                source: ReplySource::Provider(ProviderKind::Anthropic)
            }
        );
        assert_eq!(mock.last_model().as_deref(), Some("claude-2.1"));
        chat.coordinator().wait_for_mirrors().await;
    }

    /// 永不返回的提供商
    struct Stalled;

    #[async_trait]
    impl LlmClient for Stalled {
        async fn complete(&self, _model: &str, _messages: &[Message]) -> Result<String, LlmError> {
            std::future::pending().await
        }

        async fn complete_stream(
            &self,
            _model: &str,
            _messages: &[Message],
        ) -> Result<TokenStream, LlmError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_cancel_interrupts_stalled_provider() {
        let dir = TempDir::new().unwrap();
        let persistence = ConversationPersistence::new(dir.path().join("history.json"));
        let mut coordinator =
            MessageCoordinator::new(Arc::new(FakeTransport::new()), settings(), persistence, 20, "tester");
        coordinator.initialize().await;
        let mut router = ProviderRouter::new(settings().catalog);
        router.add_client(ProviderKind::OpenAi, Arc::new(Stalled));
        let mut chat = ChatSession::new(coordinator, Arc::new(router), "gpt-4o", "");

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            chat.submit_until("hello", None, &cancel),
        )
        .await
        .unwrap();
        assert_eq!(outcome, TurnOutcome::Cancelled);
        assert_eq!(chat.coordinator().history(), vec![Message::user("hello")]);
    }

    #[tokio::test]
    async fn test_blank_input_ignored() {
        let dir = TempDir::new().unwrap();
        let (mut chat, _router, _mock) = session(&dir, Arc::new(FakeTransport::new()), false).await;
        assert_eq!(chat.submit("   ", None).await, TurnOutcome::Ignored);
        assert!(chat.coordinator().history().is_empty());
    }
}
