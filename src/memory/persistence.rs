//! 对话持久化
//!
//! 将滚动窗口整体写入/从 JSON 文件加载（4 空格缩进的 `{role, content}` 数组）。
//! 每次变更都整文件覆盖；写入先落临时文件再 rename，避免并发写者读到半个文件。

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;
use tokio::fs;

use crate::memory::Message;

/// 单文件 JSON 持久化，每条消息含 role + content
#[derive(Debug, Clone)]
pub struct ConversationPersistence {
    path: PathBuf,
}

impl ConversationPersistence {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 从 JSON 文件加载对话历史；文件不存在或内容为空时返回空 Vec
    pub async fn load(&self) -> anyhow::Result<Vec<Message>> {
        if fs::metadata(&self.path).await.is_err() {
            return Ok(Vec::new());
        }
        let data = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("read {}", self.path.display()))?;
        if data.trim().is_empty() {
            return Ok(Vec::new());
        }
        // 未知 role 视为损坏文件，由调用方决定是否以空窗口继续
        serde_json::from_str(&data).with_context(|| format!("parse {}", self.path.display()))
    }

    /// 将对话历史写入 JSON 文件；父目录不存在时自动创建
    pub async fn save(&self, messages: &[Message]) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser_json = serde_json::Serializer::with_formatter(&mut buf, formatter);
        messages.serialize(&mut ser_json)?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &buf)
            .await
            .with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("rename into {}", self.path.display()))?;
        Ok(())
    }
}
