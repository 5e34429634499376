//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 返回固定回复（为空时回显最后一条 User 消息），并记录调用次数与收到的模型名，
//! 便于断言是否发生了直连分发、请求发往了哪个模型。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;

use crate::llm::{LlmClient, LlmError, TokenStream};
use crate::memory::{Message, Role};

/// Mock 客户端
#[derive(Debug, Default)]
pub struct MockLlmClient {
    reply: String,
    calls: AtomicUsize,
    models: Mutex<Vec<String>>,
}

impl MockLlmClient {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            calls: AtomicUsize::new(0),
            models: Mutex::new(Vec::new()),
        }
    }

    /// complete / complete_stream 被调用的总次数
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 最近一次调用收到的模型名
    pub fn last_model(&self) -> Option<String> {
        self.models.lock().ok().and_then(|m| m.last().cloned())
    }

    fn record(&self, model: &str) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut models) = self.models.lock() {
            models.push(model.to_string());
        }
    }

    fn reply_for(&self, messages: &[Message]) -> String {
        if !self.reply.is_empty() {
            return self.reply.clone();
        }
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        format!("Echo from Mock: {}", last_user)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, model: &str, messages: &[Message]) -> Result<String, LlmError> {
        self.record(model);
        Ok(self.reply_for(messages))
    }

    async fn complete_stream(
        &self,
        model: &str,
        messages: &[Message],
    ) -> Result<TokenStream, LlmError> {
        self.record(model);
        let content = self.reply_for(messages);
        // 按空格切分成多个 Token，保留分隔符
        let mut tokens = Vec::new();
        for (i, word) in content.split(' ').enumerate() {
            if i == 0 {
                tokens.push(Ok(word.to_string()));
            } else {
                tokens.push(Ok(format!(" {}", word)));
            }
        }
        Ok(Box::pin(stream::iter(tokens)))
    }
}
