//! 消息协调器
//!
//! 持有滚动消息窗口（界面展示与持久化的唯一来源），每次追加后先落盘再返回；
//! 大脑可用时把整段窗口异步镜像到大脑记忆，结果丢弃、失败只记日志。
//! 镜像任务由 TaskTracker 跟踪，测试与退出时可等待它们结束。

use std::sync::Arc;

use serde_json::Value;
use tokio_util::task::TaskTracker;

use crate::brain::{
    from_brain_response, to_brain_messages, BrainClient, BrainClientSettings, BrainTransport,
    EmbedReport,
};
use crate::memory::{ConversationMemory, ConversationPersistence, Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Uninitialized,
    Ready,
}

pub struct MessageCoordinator {
    state: CoordinatorState,
    memory: ConversationMemory,
    persistence: ConversationPersistence,
    transport: Arc<dyn BrainTransport>,
    brain: Arc<BrainClient>,
    user_id: String,
    mirrors: TaskTracker,
}

impl MessageCoordinator {
    pub fn new(
        transport: Arc<dyn BrainTransport>,
        settings: BrainClientSettings,
        persistence: ConversationPersistence,
        max_messages: usize,
        user_id: impl Into<String>,
    ) -> Self {
        let brain = Arc::new(BrainClient::new(transport.clone(), settings));
        Self {
            state: CoordinatorState::Uninitialized,
            memory: ConversationMemory::new(max_messages),
            persistence,
            transport,
            brain,
            user_id: user_id.into(),
            mirrors: TaskTracker::new(),
        }
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    /// 载入历史（截断到窗口上限），再尽力初始化大脑连接
    pub async fn initialize(&mut self) {
        let loaded = match self.persistence.load().await {
            Ok(messages) => messages,
            Err(e) => {
                tracing::error!(
                    path = %self.persistence.path().display(),
                    error = %e,
                    "Error loading message history"
                );
                Vec::new()
            }
        };
        self.memory = ConversationMemory::with_messages(self.memory.max_messages(), loaded);

        self.brain.initialize().await;
        self.state = CoordinatorState::Ready;
        tracing::info!(
            messages = self.memory.len(),
            brain_available = self.brain.is_available(),
            "MessageCoordinator initialized"
        );
    }

    pub async fn add_user_message(&mut self, content: impl Into<String>) {
        self.append(Message::user(content)).await;
    }

    pub async fn add_assistant_message(&mut self, content: impl Into<String>) {
        self.append(Message::assistant(content)).await;
    }

    async fn append(&mut self, message: Message) {
        let content = message.content.clone();
        self.memory.push(message);
        self.persist().await;
        self.mirror(content);
    }

    async fn persist(&self) {
        if let Err(e) = self.persistence.save(self.memory.messages()).await {
            tracing::error!(
                path = %self.persistence.path().display(),
                error = %e,
                "Error saving message history"
            );
        }
    }

    /// 后台把当前窗口与新消息交给大脑存入记忆；调用方不等待
    fn mirror(&self, content: String) {
        if !self.brain.is_available() {
            return;
        }
        let brain = self.brain.clone();
        let history = to_brain_messages(self.memory.messages());
        let user_id = self.user_id.clone();

        self.mirrors.spawn(async move {
            let task = tokio::spawn(async move {
                brain.process_message(&content, &history, &user_id).await
            });
            match task.await {
                Ok(Some(_)) => tracing::debug!("message mirrored to brain memory"),
                Ok(None) => tracing::warn!("Failed to store message in brain memory"),
                Err(e) => tracing::error!(error = %e, "brain mirror task panicked"),
            }
        });
    }

    /// 同步请求大脑回复；大脑不可用或失败时返回 None
    pub async fn process_message_with_brain(&self, text: &str) -> Option<String> {
        if !self.brain.is_available() {
            tracing::warn!("Brain not available, cannot process message");
            return None;
        }
        let history = to_brain_messages(self.memory.messages());
        match self.brain.process_message(text, &history, &self.user_id).await {
            Some(response) => Some(from_brain_response(&response).content),
            None => {
                tracing::error!("No response from brain");
                None
            }
        }
    }

    pub async fn search_memory(&self, query: &str, top_k: usize) -> Vec<String> {
        if !self.brain.is_available() {
            return Vec::new();
        }
        self.brain.search_memory(query, top_k).await
    }

    pub async fn memory_stats(&self) -> Option<Value> {
        if !self.brain.is_available() {
            return None;
        }
        self.brain.memory_stats().await
    }

    pub async fn embed_chat_history(&self, chat_history_path: &str) -> Option<EmbedReport> {
        self.brain
            .embed_chat_history(chat_history_path, &self.user_id)
            .await
    }

    /// 当前窗口的副本
    pub fn history(&self) -> Vec<Message> {
        self.memory.messages().to_vec()
    }

    pub fn max_messages(&self) -> usize {
        self.memory.max_messages()
    }

    /// 清空窗口并持久化空数组
    pub async fn clear_messages(&mut self) {
        self.memory.clear();
        self.persist().await;
    }

    pub fn is_brain_available(&self) -> bool {
        self.brain.is_available()
    }

    pub fn brain(&self) -> &Arc<BrainClient> {
        &self.brain
    }

    /// 切换 /chat 请求携带的模型（model_name 与 model_type 随之变化），保持连接状态
    pub fn set_model(&mut self, model: &str) {
        if self.brain.settings().model == model {
            return;
        }
        self.brain = Arc::new(self.brain.with_model(model));
        tracing::debug!(model, model_type = self.brain.model_type(), "brain model switched");
    }

    /// 设置变更后丢弃旧客户端，用新设置重建并重新初始化
    pub async fn refresh_brain_integration(&mut self, settings: BrainClientSettings) -> bool {
        let brain = Arc::new(BrainClient::new(self.transport.clone(), settings));
        let available = brain.initialize().await;
        self.brain = brain;
        tracing::info!(available, "Brain integration refreshed");
        available
    }

    /// 等待已派出的镜像任务全部结束
    pub async fn wait_for_mirrors(&self) {
        self.mirrors.close();
        self.mirrors.wait().await;
        self.mirrors.reopen();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    use crate::brain::client::tests::{settings, FakeTransport, CHAT_OK};

    fn coordinator(dir: &TempDir, transport: Arc<FakeTransport>, max: usize) -> MessageCoordinator {
        let persistence = ConversationPersistence::new(dir.path().join("data/messageHistory_test.json"));
        MessageCoordinator::new(transport, settings(), persistence, max, "tester")
    }

    #[tokio::test]
    async fn test_window_keeps_most_recent() {
        let dir = TempDir::new().unwrap();
        let mut coord = coordinator(&dir, Arc::new(FakeTransport::new()), 3);
        coord.initialize().await;
        assert_eq!(coord.state(), CoordinatorState::Ready);

        for i in 0..5 {
            coord.add_user_message(format!("m{}", i)).await;
        }
        let contents: Vec<String> = coord.history().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);

        // 落盘内容与窗口一致
        let mut reloaded = coordinator(&dir, Arc::new(FakeTransport::new()), 3);
        reloaded.initialize().await;
        assert_eq!(reloaded.history(), coord.history());
    }

    #[tokio::test]
    async fn test_initialize_truncates_loaded_history() {
        let dir = TempDir::new().unwrap();
        let persistence = ConversationPersistence::new(dir.path().join("data/messageHistory_test.json"));
        let many: Vec<Message> = (0..25).map(|i| Message::user(format!("old{}", i))).collect();
        persistence.save(&many).await.unwrap();

        let mut coord = coordinator(&dir, Arc::new(FakeTransport::new()), 20);
        coord.initialize().await;
        let history = coord.history();
        assert_eq!(history.len(), 20);
        assert_eq!(history[0].content, "old5");
        assert_eq!(history[19].content, "old24");
        assert!(!coord.is_brain_available());
    }

    #[tokio::test]
    async fn test_corrupt_history_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data/messageHistory_test.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();

        let mut coord = coordinator(&dir, Arc::new(FakeTransport::new()), 20);
        coord.initialize().await;
        assert!(coord.history().is_empty());

        std::fs::write(&path, r#"[{"role":"bot","content":"hi"}]"#).unwrap();
        let mut coord = coordinator(&dir, Arc::new(FakeTransport::new()), 20);
        coord.initialize().await;
        assert!(coord.history().is_empty());
    }

    #[tokio::test]
    async fn test_mirrors_to_brain_when_available() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(FakeTransport::new());
        transport.respond("/health", 200, "{}");
        transport.respond("/chat", 200, CHAT_OK);
        let mut coord = coordinator(&dir, transport.clone(), 20);
        coord.initialize().await;
        assert!(coord.is_brain_available());

        coord.add_user_message("hello").await;
        coord.add_assistant_message("hi there").await;
        coord.wait_for_mirrors().await;

        assert_eq!(transport.calls_to("/chat"), 2);
        let requests = transport.requests.lock().unwrap();
        let reply = requests
            .iter()
            .filter_map(|(_, body)| body.as_ref())
            .find(|body| body["message"] == "hi there")
            .unwrap();
        assert_eq!(reply["user_id"], "tester");
        assert_eq!(reply["history"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_no_mirror_when_brain_down() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(FakeTransport::new());
        let mut coord = coordinator(&dir, transport.clone(), 20);
        coord.initialize().await;

        coord.add_user_message("hello").await;
        coord.wait_for_mirrors().await;
        assert_eq!(transport.calls_to("/chat"), 0);
        assert!(coord.process_message_with_brain("hello").await.is_none());
        assert!(coord.search_memory("hello", 3).await.is_empty());
        assert!(coord.memory_stats().await.is_none());
        // 只有初始化时的一次健康检查
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_mirror_does_not_affect_window() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(FakeTransport::new());
        transport.respond("/health", 200, "{}");
        transport.respond("/chat", 500, "boom");
        let mut coord = coordinator(&dir, transport.clone(), 20);
        coord.initialize().await;

        coord.add_user_message("hello").await;
        coord.wait_for_mirrors().await;
        assert_eq!(coord.history(), vec![Message::user("hello")]);
        assert_eq!(transport.calls_to("/chat"), 1);
    }

    #[tokio::test]
    async fn test_process_with_brain_and_refresh() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(FakeTransport::new());
        transport.respond("/health", 503, "");
        let mut coord = coordinator(&dir, transport.clone(), 20);
        coord.initialize().await;
        assert!(!coord.is_brain_available());

        transport.respond("/health", 200, "{}");
        transport.respond("/chat", 200, CHAT_OK);
        assert!(coord.refresh_brain_integration(settings()).await);
        assert_eq!(
            coord.process_message_with_brain("question").await.as_deref(),
            Some("from brain")
        );
    }

    #[tokio::test]
    async fn test_clear_messages_persists_empty() {
        let dir = TempDir::new().unwrap();
        let mut coord = coordinator(&dir, Arc::new(FakeTransport::new()), 20);
        coord.initialize().await;
        coord.add_user_message("bye").await;
        coord.clear_messages().await;
        assert!(coord.history().is_empty());

        let raw = std::fs::read_to_string(dir.path().join("data/messageHistory_test.json")).unwrap();
        assert_eq!(raw.trim(), "[]");
    }
}
