//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `GHOST__*` 覆盖（双下划线表示嵌套，如 `GHOST__BRAIN__PORT=8001`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub general: GeneralSection,
    pub brain: BrainSection,
    pub python: PythonSection,
    pub providers: ProvidersSection,
}

/// [app] 段：数据目录、当前会话档案、滚动窗口大小
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    /// 插件私有数据目录，未设置时用系统数据目录下的 ghost/
    pub data_dir: Option<PathBuf>,
    /// 会话档案名（决定历史文件名），如 `BMO.md`
    pub profile: String,
    /// 滚动窗口保留的消息条数
    pub max_messages: usize,
    /// 发往大脑服务的用户标识
    pub user_id: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            data_dir: None,
            profile: "default.md".to_string(),
            max_messages: 20,
            user_id: "obsidian_user".to_string(),
        }
    }
}

impl AppSection {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .map(|d| d.join("ghost"))
                .unwrap_or_else(|| PathBuf::from(".ghost"))
        })
    }

    /// 历史文件：`<data_dir>/data/messageHistory_<profile>.json`（档案名的 .md 后缀换成 .json）
    pub fn history_path(&self) -> PathBuf {
        let profile = self.profile.replace(".md", ".json");
        let file = if profile.ends_with(".json") {
            format!("messageHistory_{}", profile)
        } else {
            format!("messageHistory_{}.json", profile)
        };
        self.data_dir().join("data").join(file)
    }
}

/// [general] 段：当前模型与系统提示词
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneralSection {
    pub model: String,
    pub system_prompt: String,
}

impl Default for GeneralSection {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            system_prompt: "You are a helpful assistant.".to_string(),
        }
    }
}

/// [brain] 段：大脑服务地址与各类超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrainSection {
    /// 使用远程/自定义服务（云端、局域网），否则连本机端口
    pub use_custom_server: bool,
    pub server_url: String,
    pub port: u16,
    /// 待嵌入的聊天记录目录（相对 vault）
    pub chat_history_path: String,
    /// 健康检查超时（秒），不宜超过 3
    pub health_timeout_secs: u64,
    /// /chat 等普通请求超时（秒）
    pub request_timeout_secs: u64,
    /// 启动服务后等待多久再做健康检查（毫秒）
    pub startup_grace_ms: u64,
    /// 状态指示器轮询间隔（秒）
    pub status_interval_secs: u64,
    /// 退出时是否停止由本进程启动的服务
    pub stop_on_exit: bool,
}

impl Default for BrainSection {
    fn default() -> Self {
        Self {
            use_custom_server: false,
            server_url: String::new(),
            port: 8000,
            chat_history_path: "ref/chatlogs".to_string(),
            health_timeout_secs: 3,
            request_timeout_secs: 120,
            startup_grace_ms: 2000,
            status_interval_secs: 30,
            stop_on_exit: false,
        }
    }
}

impl BrainSection {
    /// 服务基地址（不带尾部斜杠）
    pub fn base_url(&self) -> String {
        if self.use_custom_server && !self.server_url.trim().is_empty() {
            self.server_url.trim().trim_end_matches('/').to_string()
        } else {
            format!("http://localhost:{}", self.port)
        }
    }
}

/// [python] 段：运行时版本要求、环境名、服务包
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PythonSection {
    pub min_major: u32,
    pub min_minor: u32,
    /// Bundled 路径下 conda 环境名
    pub env_name: String,
    /// 服务端 Python 包（模块）名
    pub package_module: String,
    /// 服务包源码目录（含 requirements.txt），未设置时为 `<data_dir>/brain`
    pub brain_dir: Option<PathBuf>,
    pub miniforge_url_base: String,
}

impl Default for PythonSection {
    fn default() -> Self {
        Self {
            min_major: 3,
            min_minor: 11,
            env_name: "ghost-brain".to_string(),
            package_module: "ghost_brain".to_string(),
            brain_dir: None,
            miniforge_url_base: "https://github.com/conda-forge/miniforge/releases/latest/download"
                .to_string(),
        }
    }
}

/// 单个提供商：已知模型列表、是否流式、OpenAI 兼容端点、Key 所在环境变量
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderSection {
    pub models: Vec<String>,
    pub allow_stream: bool,
    pub base_url: Option<String>,
    pub api_key_env: Option<String>,
}

impl ProviderSection {
    fn with(models: &[&str], base_url: Option<&str>, api_key_env: Option<&str>) -> Self {
        Self {
            models: models.iter().map(|m| m.to_string()).collect(),
            allow_stream: false,
            base_url: base_url.map(String::from),
            api_key_env: api_key_env.map(String::from),
        }
    }
}

/// [providers.*] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProvidersSection {
    pub ollama: ProviderSection,
    pub rest_api: ProviderSection,
    pub anthropic: ProviderSection,
    pub google_gemini: ProviderSection,
    pub mistral: ProviderSection,
    pub openai: ProviderSection,
    pub openrouter: ProviderSection,
}

impl Default for ProvidersSection {
    fn default() -> Self {
        Self {
            ollama: ProviderSection::with(&[], Some("http://localhost:11434/v1"), None),
            rest_api: ProviderSection::with(&[], None, None),
            anthropic: ProviderSection::with(
                &[
                    "claude-instant-1.2",
                    "claude-2.0",
                    "claude-2.1",
                    "claude-3-opus-20240229",
                    "claude-3-sonnet-20240229",
                ],
                None,
                Some("ANTHROPIC_API_KEY"),
            ),
            google_gemini: ProviderSection::with(&[], None, Some("GOOGLE_API_KEY")),
            mistral: ProviderSection::with(
                &[],
                Some("https://api.mistral.ai/v1"),
                Some("MISTRAL_API_KEY"),
            ),
            openai: ProviderSection::with(
                &[
                    "gpt-3.5-turbo",
                    "gpt-3.5-turbo-1106",
                    "gpt-4",
                    "gpt-4-turbo-preview",
                    "gpt-4-turbo",
                    "gpt-4-turbo-2024-04-09",
                    "gpt-4o",
                    "gpt-4o-2024-05-13",
                ],
                Some("https://api.openai.com/v1"),
                Some("OPENAI_API_KEY"),
            ),
            openrouter: ProviderSection::with(
                &[],
                Some("https://openrouter.ai/api/v1"),
                Some("OPENROUTER_API_KEY"),
            ),
        }
    }
}

/// 从 config 目录加载配置，环境变量 GHOST__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 GHOST__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("GHOST")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 重新从磁盘与环境变量加载配置（设置变更后重建大脑客户端时使用）
pub fn reload_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    load_config(config_path)
}
