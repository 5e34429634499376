//! 运行时上下文
//!
//! 进程级状态（配置、HTTP 传输、命令执行器、供给锁、环境安装器、服务监管、Key 存储、关闭信号）
//! 集中在 RuntimeContext 中，由入口 init 后注入各组件，退出时 teardown。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::brain::{BrainClientSettings, BrainHealth, BrainTransport, HealthCheck, HttpTransport};
use crate::config::{load_config, reload_config, AppConfig, ProviderSection};
use crate::environment::{
    CommandRunner, Downloader, HttpDownloader, Provisioner, ProvisioningLock, SystemCommandRunner,
};
use crate::llm::{LlmClient, ModelCatalog, OpenAiClient, ProviderKind, ProviderRouter};
use crate::memory::ConversationPersistence;
use crate::secrets::{ApiKeyName, ApiKeyStore};

use super::coordinator::MessageCoordinator;
use super::orchestrator::ChatSession;
use super::shutdown::{BrainServerCleanup, ExitTasks, ShutdownManager, ShutdownReason};
use super::supervisor::BrainSupervisor;
use super::GhostError;

pub struct RuntimeContext {
    config: AppConfig,
    config_path: Option<PathBuf>,
    transport: Arc<dyn BrainTransport>,
    runner: Arc<dyn CommandRunner>,
    downloader: Arc<dyn Downloader>,
    lock: ProvisioningLock,
    provisioner: Arc<Provisioner>,
    supervisor: Arc<BrainSupervisor>,
    keys: ApiKeyStore,
    shutdown: Arc<ShutdownManager>,
}

impl RuntimeContext {
    /// 加载配置并用真实的 HTTP / 子进程实现组装上下文
    pub fn init(config_path: Option<PathBuf>) -> Result<Self, GhostError> {
        let config = load_config(config_path.clone())?;
        let downloader =
            HttpDownloader::new().map_err(|e| GhostError::HttpClient(e.to_string()))?;
        let mut ctx = Self::with_parts(
            config,
            Arc::new(HttpTransport::new()),
            Arc::new(SystemCommandRunner),
            Arc::new(downloader),
        );
        ctx.config_path = config_path;
        ctx.keys.export_to_env();
        Ok(ctx)
    }

    /// 由调用方提供传输层与执行器（测试用假实现）
    pub fn with_parts(
        config: AppConfig,
        transport: Arc<dyn BrainTransport>,
        runner: Arc<dyn CommandRunner>,
        downloader: Arc<dyn Downloader>,
    ) -> Self {
        let lock: ProvisioningLock = Arc::new(tokio::sync::Mutex::new(()));
        let keys = ApiKeyStore::in_data_dir(&config.app.data_dir());
        let (provisioner, supervisor) =
            Self::build_environment(&config, &transport, &runner, &downloader, &lock, &keys);
        Self {
            config,
            config_path: None,
            transport,
            runner,
            downloader,
            lock,
            provisioner,
            supervisor,
            keys,
            shutdown: Arc::new(ShutdownManager::new()),
        }
    }

    fn build_environment(
        config: &AppConfig,
        transport: &Arc<dyn BrainTransport>,
        runner: &Arc<dyn CommandRunner>,
        downloader: &Arc<dyn Downloader>,
        lock: &ProvisioningLock,
        keys: &ApiKeyStore,
    ) -> (Arc<Provisioner>, Arc<BrainSupervisor>) {
        let health = health_check_for(config, transport.clone());
        let provisioner = Arc::new(Provisioner::from_config(
            config,
            runner.clone(),
            downloader.clone(),
            health.clone(),
            lock.clone(),
        ));
        let supervisor = Arc::new(
            BrainSupervisor::new(
                provisioner.clone(),
                runner.clone(),
                health,
                lock.clone(),
                Duration::from_millis(config.brain.startup_grace_ms),
            )
            .with_env(keys.env_pairs()),
        );
        (provisioner, supervisor)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn provisioner(&self) -> &Arc<Provisioner> {
        &self.provisioner
    }

    pub fn supervisor(&self) -> &Arc<BrainSupervisor> {
        &self.supervisor
    }

    pub fn keys(&self) -> &ApiKeyStore {
        &self.keys
    }

    pub fn shutdown(&self) -> &Arc<ShutdownManager> {
        &self.shutdown
    }

    pub fn provisioning_lock(&self) -> &ProvisioningLock {
        &self.lock
    }

    pub fn brain_settings(&self) -> BrainClientSettings {
        BrainClientSettings::from_config(&self.config)
    }

    pub fn health_check(&self) -> HealthCheck {
        health_check_for(&self.config, self.transport.clone())
    }

    /// 未初始化的协调器；历史文件按当前会话档案命名
    pub fn new_coordinator(&self) -> MessageCoordinator {
        MessageCoordinator::new(
            self.transport.clone(),
            self.brain_settings(),
            ConversationPersistence::new(self.config.app.history_path()),
            self.config.app.max_messages,
            self.config.app.user_id.clone(),
        )
    }

    /// 为每个配置了 OpenAI 兼容端点的提供商注册客户端
    pub fn build_router(&self) -> ProviderRouter {
        let mut router = ProviderRouter::new(ModelCatalog::from_config(&self.config.providers));
        for kind in ProviderKind::ALL {
            let section = provider_section(&self.config, kind);
            let Some(ref base_url) = section.base_url else {
                continue;
            };
            let api_key = self.provider_api_key(section);
            let client: Arc<dyn LlmClient> =
                Arc::new(OpenAiClient::new(Some(base_url), api_key.as_deref()));
            router.add_client(kind, client);
            tracing::debug!(provider = %kind, base_url = %base_url, "registered provider client");
        }
        router
    }

    fn provider_api_key(&self, section: &ProviderSection) -> Option<String> {
        let var = section.api_key_env.as_deref()?;
        match ApiKeyName::from_env_var(var) {
            Some(name) => self.keys.get(name),
            None => std::env::var(var).ok().filter(|v| !v.is_empty()),
        }
    }

    /// 初始化好的对话会话（历史已载入、大脑已尝试连接）
    pub async fn chat_session(&self) -> ChatSession {
        let mut coordinator = self.new_coordinator();
        coordinator.initialize().await;
        ChatSession::new(
            coordinator,
            Arc::new(self.build_router()),
            self.config.general.model.clone(),
            self.config.general.system_prompt.clone(),
        )
    }

    /// 后台状态指示器，随上下文关闭而停止
    pub fn spawn_status_monitor(&self) -> watch::Receiver<BrainHealth> {
        crate::brain::spawn_status_monitor(
            self.health_check(),
            Duration::from_secs(self.config.brain.status_interval_secs),
            self.shutdown.child_token(),
        )
    }

    /// 重新读取配置并重建依赖配置的组件；返回新的大脑客户端设置供协调器刷新。
    /// 已启动服务的 PID 由新监管器接管。
    pub fn reload(&mut self) -> Result<BrainClientSettings, GhostError> {
        self.config = reload_config(self.config_path.clone())?;
        self.keys = ApiKeyStore::in_data_dir(&self.config.app.data_dir());
        let (provisioner, supervisor) = Self::build_environment(
            &self.config,
            &self.transport,
            &self.runner,
            &self.downloader,
            &self.lock,
            &self.keys,
        );
        supervisor.adopt(&self.supervisor);
        self.provisioner = provisioner;
        self.supervisor = supervisor;
        Ok(self.brain_settings())
    }

    /// 取消后台任务；配置要求时停止本进程启动的服务
    pub async fn teardown(self) {
        self.shutdown.shutdown(ShutdownReason::Teardown);

        let mut exit_tasks = ExitTasks::new(Duration::from_secs(5));
        if self.config.brain.stop_on_exit {
            exit_tasks.push(BrainServerCleanup::new(self.supervisor.clone()));
        }
        let failed = exit_tasks.run().await;
        tracing::info!(tasks = exit_tasks.len(), failed, "runtime context torn down");
    }
}

fn health_check_for(config: &AppConfig, transport: Arc<dyn BrainTransport>) -> HealthCheck {
    HealthCheck::new(
        transport,
        &config.brain.base_url(),
        Duration::from_secs(config.brain.health_timeout_secs),
    )
}

fn provider_section(config: &AppConfig, kind: ProviderKind) -> &ProviderSection {
    let providers = &config.providers;
    match kind {
        ProviderKind::Ollama => &providers.ollama,
        ProviderKind::RestApi => &providers.rest_api,
        ProviderKind::Anthropic => &providers.anthropic,
        ProviderKind::GoogleGemini => &providers.google_gemini,
        ProviderKind::Mistral => &providers.mistral,
        ProviderKind::OpenAi => &providers.openai,
        ProviderKind::OpenRouter => &providers.openrouter,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    use crate::brain::client::tests::{FakeTransport, CHAT_OK};
    use crate::core::orchestrator::{ReplySource, TurnOutcome};
    use crate::environment::command::tests::{not_found, FakeRunner};

    fn context(dir: &TempDir, transport: Arc<FakeTransport>) -> RuntimeContext {
        let mut config = AppConfig::default();
        config.app.data_dir = Some(dir.path().to_path_buf());
        config.app.profile = "BMO.md".into();
        RuntimeContext::with_parts(
            config,
            transport,
            Arc::new(FakeRunner::new(not_found)),
            Arc::new(HttpDownloader::new().unwrap()),
        )
    }

    #[test]
    fn test_router_uses_configured_catalog() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, Arc::new(FakeTransport::new()));
        let router = ctx.build_router();
        assert_eq!(router.route("gpt-4o").unwrap().provider, ProviderKind::OpenAi);
        assert_eq!(
            router.route("claude-2.1").unwrap().provider,
            ProviderKind::Anthropic
        );
    }

    #[tokio::test]
    async fn test_chat_session_uses_profile_history_and_brain() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(FakeTransport::new());
        transport.respond("/health", 200, "{}");
        transport.respond("/chat", 200, CHAT_OK);
        let ctx = context(&dir, transport);

        let mut chat = ctx.chat_session().await;
        let outcome = chat.submit("hello", None).await;
        assert!(matches!(
            outcome,
            TurnOutcome::Reply {
                source: ReplySource::Brain,
                ..
            }
        ));
        chat.coordinator().wait_for_mirrors().await;
        assert!(dir.path().join("data/messageHistory_BMO.json").exists());

        ctx.teardown().await;
    }

    #[tokio::test]
    async fn test_reload_keeps_tracked_server() {
        let dir = TempDir::new().unwrap();
        let config_file = dir.path().join("ghost.toml");
        std::fs::write(
            &config_file,
            format!(
                "[app]\ndata_dir = {:?}\nprofile = \"BMO.md\"\n\n[general]\nmodel = \"claude-2.1\"\n",
                dir.path().display().to_string()
            ),
        )
        .unwrap();
        std::fs::write(dir.path().join("brain.pid"), "4242").unwrap();

        let mut ctx = context(&dir, Arc::new(FakeTransport::new()));
        ctx.config_path = Some(config_file);
        assert_eq!(ctx.supervisor().pid(), Some(4242));

        // 重载期间 PID 文件丢失也不影响新监管器
        std::fs::remove_file(dir.path().join("brain.pid")).unwrap();
        let settings = ctx.reload().unwrap();
        assert_eq!(settings.model, "claude-2.1");
        assert_eq!(ctx.supervisor().pid(), Some(4242));
        assert!(dir.path().join("brain.pid").exists());
    }

    #[tokio::test]
    async fn test_status_monitor_stops_on_teardown() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(FakeTransport::new());
        transport.respond("/health", 200, "{}");
        let ctx = context(&dir, transport);

        let mut rx = ctx.spawn_status_monitor();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), BrainHealth::Healthy);

        ctx.teardown().await;
        // 监视器退出后发送端被丢弃
        while rx.changed().await.is_ok() {}
    }
}
