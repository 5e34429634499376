//! 健康检查与状态指示
//!
//! GET /health：2xx 为健康；有响应但非 2xx 为“响应但不健康”；网络失败/超时为不可达。
//! 状态监视器按固定间隔探测，把结果发布到 watch 通道，直到取消令牌触发。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::transport::BrainTransport;

/// 大脑服务健康状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrainHealth {
    /// 尚未探测
    Unknown,
    Healthy,
    /// 有响应但状态码非 2xx
    Unhealthy(u16),
    Unreachable,
}

impl BrainHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, BrainHealth::Healthy)
    }

    pub fn describe(&self) -> &'static str {
        match self {
            BrainHealth::Unknown => "Brain server status unknown",
            BrainHealth::Healthy => "Brain server is running and available",
            BrainHealth::Unhealthy(_) => "Brain server responding but not healthy",
            BrainHealth::Unreachable => "Brain server not available",
        }
    }
}

/// 一次健康探测所需的全部信息
#[derive(Clone)]
pub struct HealthCheck {
    transport: Arc<dyn BrainTransport>,
    url: String,
    timeout: Duration,
}

impl HealthCheck {
    pub fn new(transport: Arc<dyn BrainTransport>, base_url: &str, timeout: Duration) -> Self {
        Self {
            transport,
            url: format!("{}/health", base_url.trim_end_matches('/')),
            timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn check(&self) -> BrainHealth {
        match self.transport.get(&self.url, self.timeout).await {
            Ok(resp) if resp.is_success() => BrainHealth::Healthy,
            Ok(resp) => BrainHealth::Unhealthy(resp.status),
            Err(e) => {
                tracing::debug!(url = %self.url, error = %e, "health check failed");
                BrainHealth::Unreachable
            }
        }
    }
}

/// 启动后台状态监视器：立即探测一次，之后每 interval 探测一次
pub fn spawn_status_monitor(
    health: HealthCheck,
    interval: Duration,
    cancel: CancellationToken,
) -> watch::Receiver<BrainHealth> {
    let (tx, rx) = watch::channel(BrainHealth::Unknown);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let state = health.check().await;
                    tx.send_if_modified(|current| {
                        if *current != state {
                            tracing::info!(status = state.describe(), "brain status changed");
                            *current = state;
                            true
                        } else {
                            false
                        }
                    });
                    if tx.is_closed() {
                        break;
                    }
                }
            }
        }
    });
    rx
}
