//! 上报传输层
//!
//! 批量队列只依赖 `LogTransport`，生产环境使用基于 reqwest 的 `HttpTransport`。

use crate::common::{AppError, BatchPayload, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

/// 一次发送整个批次；非2xx或请求级失败都返回错误
#[async_trait]
pub trait LogTransport: Send + Sync {
    async fn send(&self, payload: &BatchPayload) -> Result<()>;
}

/// HTTP POST 传输
///
/// 不额外设置超时，只对失败和非2xx做出反应。
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client, endpoint))
    }

    pub fn with_client(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl LogTransport for HttpTransport {
    async fn send(&self, payload: &BatchPayload) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(payload)
            .send()
            .await
            .map_err(|e| AppError::transport(None, e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(target: "telemetry", endpoint = %self.endpoint, count = payload.len(), "批次已送达");
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(AppError::transport(Some(status.as_u16()), text))
        }
    }
}

/// 丢弃一切的传输，用于关闭上报但仍需构造服务的场景
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTransport;

#[async_trait]
impl LogTransport for NullTransport {
    async fn send(&self, _payload: &BatchPayload) -> Result<()> {
        Ok(())
    }
}
