//! API Key 存储
//!
//! Key 写入当前进程环境变量（服务进程由此继承），同时以 base64 混淆形式落盘，便于下次启动恢复。
//! 混淆不是加密；读取时环境变量优先。

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

/// 受管理的三类 Key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ApiKeyName {
    OpenAi,
    Google,
    Anthropic,
}

impl ApiKeyName {
    pub const ALL: [ApiKeyName; 3] = [ApiKeyName::OpenAi, ApiKeyName::Google, ApiKeyName::Anthropic];

    pub fn env_var(&self) -> &'static str {
        match self {
            ApiKeyName::OpenAi => "OPENAI_API_KEY",
            ApiKeyName::Google => "GOOGLE_API_KEY",
            ApiKeyName::Anthropic => "ANTHROPIC_API_KEY",
        }
    }

    /// Key 必须以此前缀开头
    pub fn prefix(&self) -> &'static str {
        match self {
            ApiKeyName::OpenAi => "sk-",
            ApiKeyName::Google => "AIza",
            ApiKeyName::Anthropic => "sk-ant-",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ApiKeyName::OpenAi => "OpenAI",
            ApiKeyName::Google => "Google",
            ApiKeyName::Anthropic => "Anthropic",
        }
    }

    pub fn from_env_var(var: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|name| name.env_var() == var)
    }

    pub fn validate(&self, value: &str) -> bool {
        value.starts_with(self.prefix())
    }
}

impl fmt::Display for ApiKeyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for ApiKeyName {
    type Err = KeyStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" | "openai_api_key" => Ok(ApiKeyName::OpenAi),
            "google" | "gemini" | "google_api_key" => Ok(ApiKeyName::Google),
            "anthropic" | "claude" | "anthropic_api_key" => Ok(ApiKeyName::Anthropic),
            other => Err(KeyStoreError::UnknownKey(other.to_string())),
        }
    }
}

#[derive(Error, Debug)]
pub enum KeyStoreError {
    #[error("Invalid {0} API key format")]
    InvalidFormat(ApiKeyName),

    #[error("Unknown API key name: {0}")]
    UnknownKey(String),

    #[error("Key store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Key store is corrupt: {0}")]
    Corrupt(String),
}

/// 持久化的 Key 文件：`{ "OPENAI_API_KEY": "<base64>" }`
pub struct ApiKeyStore {
    path: PathBuf,
}

impl ApiKeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// 默认位置：`<data_dir>/data/secure_keys.json`
    pub fn in_data_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join("data").join("secure_keys.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_file(&self) -> Result<BTreeMap<String, String>, KeyStoreError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw).map_err(|e| KeyStoreError::Corrupt(e.to_string()))
    }

    fn write_file(&self, entries: &BTreeMap<String, String>) -> Result<(), KeyStoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| KeyStoreError::Corrupt(e.to_string()))?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    /// 校验前缀后保存，并写入当前进程环境
    pub fn set(&self, name: ApiKeyName, value: &str) -> Result<(), KeyStoreError> {
        let value = value.trim();
        if !name.validate(value) {
            return Err(KeyStoreError::InvalidFormat(name));
        }
        let mut entries = self.read_file()?;
        entries.insert(name.env_var().to_string(), STANDARD.encode(value));
        self.write_file(&entries)?;
        std::env::set_var(name.env_var(), value);
        tracing::info!(key = name.env_var(), "API key saved");
        Ok(())
    }

    /// 环境变量优先，其次落盘副本
    pub fn get(&self, name: ApiKeyName) -> Option<String> {
        if let Ok(value) = std::env::var(name.env_var()) {
            if !value.is_empty() {
                return Some(value);
            }
        }
        let entries = match self.read_file() {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read key store");
                return None;
            }
        };
        let encoded = entries.get(name.env_var())?;
        STANDARD
            .decode(encoded)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
    }

    pub fn is_configured(&self, name: ApiKeyName) -> bool {
        self.get(name).is_some()
    }

    pub fn status(&self) -> Vec<(ApiKeyName, bool)> {
        ApiKeyName::ALL
            .iter()
            .map(|name| (*name, self.is_configured(*name)))
            .collect()
    }

    /// 把落盘的 Key 恢复到当前进程环境（已有的环境变量不覆盖）
    pub fn export_to_env(&self) {
        for name in ApiKeyName::ALL {
            if std::env::var(name.env_var()).is_err() {
                if let Some(value) = self.get(name) {
                    std::env::set_var(name.env_var(), value);
                }
            }
        }
    }

    /// 传给服务进程的环境变量
    pub fn env_pairs(&self) -> Vec<(String, String)> {
        ApiKeyName::ALL
            .iter()
            .filter_map(|name| self.get(*name).map(|v| (name.env_var().to_string(), v)))
            .collect()
    }

    /// 删除落盘副本并清空当前进程中的三个环境变量
    pub fn clear_all(&self) -> Result<(), KeyStoreError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        for name in ApiKeyName::ALL {
            std::env::remove_var(name.env_var());
        }
        tracing::info!("all API keys cleared");
        Ok(())
    }
}
