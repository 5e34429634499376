//! 安装包下载

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::core::ProvisionError;

#[async_trait]
pub trait Downloader: Send + Sync {
    /// 下载 url 到 dest（先写 .part 再改名，中断不会留下半个安装包）
    async fn download(&self, url: &str, dest: &Path) -> Result<(), ProvisionError>;
}

/// reqwest 实现，按块写盘
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    pub fn new() -> Result<Self, ProvisionError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("ghost/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProvisionError::Download(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, url: &str, dest: &Path) -> Result<(), ProvisionError> {
        tracing::info!(url = %url, dest = %dest.display(), "downloading");
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProvisionError::Download(format!("{}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(ProvisionError::Download(format!(
                "Failed to download {}: {}",
                url,
                response.status()
            )));
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let part = dest.with_extension("part");
        let mut file = tokio::fs::File::create(&part).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ProvisionError::Download(format!("{}: {}", url, e)))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&part, dest).await?;

        tracing::info!(bytes = written, "download complete");
        Ok(())
    }
}
