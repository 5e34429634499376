//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；OpenAI、OpenRouter、Mistral、
//! Ollama 的 /v1 以及自建 REST 端点都走这里。

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use futures_util::StreamExt;

use crate::llm::{LlmClient, LlmError, TokenStream};
use crate::memory::{Message, Role};

/// OpenAI 兼容客户端；模型名随每次请求传入
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
}

impl OpenAiClient {
    /// api_key 为空时回退到 OPENAI_API_KEY，再回退到占位符（Ollama 等本地端点不校验 Key）
    pub fn new(base_url: Option<&str>, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
        }
    }

    fn to_openai_messages(
        &self,
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        messages
            .iter()
            .map(|m| {
                let msg = match m.role {
                    Role::System => ChatCompletionRequestSystemMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::System),
                    Role::User => ChatCompletionRequestUserMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::User),
                    Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::Assistant),
                };
                msg.map_err(|e| LlmError::RequestError(e.to_string()))
            })
            .collect()
    }

    fn build_request(
        &self,
        model: &str,
        messages: &[Message],
        stream: bool,
    ) -> Result<CreateChatCompletionRequest, LlmError> {
        CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(self.to_openai_messages(messages)?)
            .stream(stream)
            .build()
            .map_err(|e| LlmError::RequestError(e.to_string()))
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, model: &str, messages: &[Message]) -> Result<String, LlmError> {
        let request = self.build_request(model, messages, false)?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| LlmError::ApiError(e.to_string()))?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        Ok(content)
    }

    async fn complete_stream(
        &self,
        model: &str,
        messages: &[Message],
    ) -> Result<TokenStream, LlmError> {
        let request = self.build_request(model, messages, true)?;

        let stream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(|e| LlmError::ApiError(e.to_string()))?;

        let tokens = stream.filter_map(|chunk| async move {
            match chunk {
                Ok(resp) => resp
                    .choices
                    .first()
                    .and_then(|c| c.delta.content.clone())
                    .map(Ok),
                Err(e) => Some(Err(LlmError::StreamError(e.to_string()))),
            }
        });
        Ok(Box::pin(tokens))
    }
}
