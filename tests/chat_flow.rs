//! 对话流程集成测试：大脑可用时直接采用其回复，掉线后回退直连提供商，历史跨会话保留

use std::path::Path;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tempfile::TempDir;

use ghost::brain::{BrainTransport, TransportResponse};
use ghost::config::AppConfig;
use ghost::core::{
    ChatSession, MessageCoordinator, ProvisionError, ReplySource, RuntimeContext, TransportError,
    TurnOutcome,
};
use ghost::environment::{CommandOutput, CommandRunner, CommandSpec, Downloader};
use ghost::llm::{MockLlmClient, ModelCatalog, ProviderKind, ProviderRouter};
use ghost::memory::{ConversationPersistence, Message};

/// 可切换状态码的大脑服务：/health 与 /chat 共用同一个状态码
struct ScriptedBrain {
    status: AtomicU16,
    posts: Mutex<Vec<(String, Value)>>,
}

impl ScriptedBrain {
    fn new(status: u16) -> Self {
        Self {
            status: AtomicU16::new(status),
            posts: Mutex::new(Vec::new()),
        }
    }

    fn go_down(&self) {
        self.status.store(503, Ordering::SeqCst);
    }

    fn chat_posts(&self) -> Vec<Value> {
        self.posts
            .lock()
            .unwrap()
            .iter()
            .filter(|(url, _)| url.ends_with("/chat"))
            .map(|(_, body)| body.clone())
            .collect()
    }
}

#[async_trait]
impl BrainTransport for ScriptedBrain {
    async fn get(&self, _url: &str, _timeout: Duration) -> Result<TransportResponse, TransportError> {
        Ok(TransportResponse::new(self.status.load(Ordering::SeqCst), "{}"))
    }

    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        _timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        self.posts.lock().unwrap().push((url.to_string(), body.clone()));
        let status = self.status.load(Ordering::SeqCst);
        let reply = format!(
            r#"{{"response":"brain says: {}","memory_chunks":0,"timestamp":"t","model_type":"openai","model_name":"gpt-4o"}}"#,
            body["message"].as_str().unwrap_or_default()
        );
        Ok(TransportResponse::new(status, reply))
    }
}

struct NoProcesses;

#[async_trait]
impl CommandRunner for NoProcesses {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ProvisionError> {
        Err(ProvisionError::Spawn {
            command: spec.display(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        })
    }

    async fn spawn_detached(&self, spec: &CommandSpec) -> Result<u32, ProvisionError> {
        Err(ProvisionError::Spawn {
            command: spec.display(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        })
    }
}

struct NoDownloads;

#[async_trait]
impl Downloader for NoDownloads {
    async fn download(&self, url: &str, _dest: &Path) -> Result<(), ProvisionError> {
        Err(ProvisionError::Download(url.to_string()))
    }
}

fn context(dir: &TempDir, brain: Arc<ScriptedBrain>) -> RuntimeContext {
    let mut config = AppConfig::default();
    config.app.data_dir = Some(dir.path().to_path_buf());
    config.app.max_messages = 4;
    RuntimeContext::with_parts(config, brain, Arc::new(NoProcesses), Arc::new(NoDownloads))
}

fn session_with_mock(coordinator: MessageCoordinator) -> (ChatSession, Arc<MockLlmClient>) {
    let mut catalog = ModelCatalog::default();
    catalog
        .provider_mut(ProviderKind::OpenAi)
        .models
        .push("gpt-4o".into());
    let mut router = ProviderRouter::new(catalog);
    let mock = Arc::new(MockLlmClient::new("provider says hi"));
    router.add_client(ProviderKind::OpenAi, mock.clone());
    (
        ChatSession::new(coordinator, Arc::new(router), "gpt-4o", "be brief"),
        mock,
    )
}

#[tokio::test]
async fn test_brain_then_provider_fallback() {
    let dir = TempDir::new().unwrap();
    let brain = Arc::new(ScriptedBrain::new(200));
    let ctx = context(&dir, brain.clone());

    let mut coordinator = ctx.new_coordinator();
    coordinator.initialize().await;
    assert!(coordinator.is_brain_available());
    let (mut chat, mock) = session_with_mock(coordinator);

    let first = chat.submit("hello", None).await;
    assert_eq!(
        first,
        TurnOutcome::Reply {
            text: "brain says: hello".into(),
            source: ReplySource::Brain,
        }
    );
    assert_eq!(mock.calls(), 0);

    // 服务掉线：/chat 返回 503，回复改由提供商给出
    brain.go_down();
    let second = chat.submit("still there?", None).await;
    assert_eq!(
        second,
        TurnOutcome::Reply {
            text: "provider says hi".into(),
            source: ReplySource::Provider(ProviderKind::OpenAi),
        }
    );
    assert_eq!(mock.calls(), 1);

    chat.coordinator().wait_for_mirrors().await;
    assert_eq!(
        chat.coordinator().history(),
        vec![
            Message::user("hello"),
            Message::assistant("brain says: hello"),
            Message::user("still there?"),
            Message::assistant("provider says hi"),
        ]
    );

    // 镜像请求携带整段窗口
    let mirrored = brain.chat_posts();
    assert!(mirrored
        .iter()
        .any(|body| body["history"].as_array().map(|h| h.len()) == Some(2)));
    assert!(mirrored.iter().all(|body| body["user_id"] == "obsidian_user"));

    ctx.teardown().await;
}

#[tokio::test]
async fn test_history_survives_restart_and_is_capped() {
    let dir = TempDir::new().unwrap();
    let brain = Arc::new(ScriptedBrain::new(503));
    let ctx = context(&dir, brain.clone());

    let mut coordinator = ctx.new_coordinator();
    coordinator.initialize().await;
    assert!(!coordinator.is_brain_available());
    let (mut chat, _mock) = session_with_mock(coordinator);
    for turn in ["one", "two", "three"] {
        chat.submit(turn, None).await;
    }
    // 大脑未连接时不会有任何 POST
    assert!(brain.chat_posts().is_empty());

    let persistence = ConversationPersistence::new(ctx.config().app.history_path());
    let saved = persistence.load().await.unwrap();
    assert_eq!(saved.len(), 4);
    assert_eq!(saved[0], Message::user("two"));

    let mut reopened = MessageCoordinator::new(
        brain,
        ctx.brain_settings(),
        persistence,
        ctx.config().app.max_messages,
        "obsidian_user",
    );
    reopened.initialize().await;
    assert_eq!(reopened.history(), saved);

    ctx.teardown().await;
}

#[tokio::test]
async fn test_supervisor_refuses_to_start_without_package() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir, Arc::new(ScriptedBrain::new(503)));

    let status = ctx.provisioner().status().await;
    assert!(!status.python_installed);
    assert!(!status.brain_package_installed);
    assert!(!status.brain_server_running);

    assert!(!ctx.supervisor().start().await);
    assert!(ctx.supervisor().pid().is_none());

    ctx.teardown().await;
}
