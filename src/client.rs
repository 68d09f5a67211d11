//! Client for a running sysdeck gateway.
//!
//! [`GatewayClient`] calls the JSON API. [`PushClient`] follows the push
//! channel and reconnects with a doubling, capped delay.

use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_tungstenite::tungstenite::{self, client::IntoClientRequest, http::HeaderValue, Message};
use tracing::{debug, info, warn};

use crate::collector::HistoryRecord;
use crate::config::Settings;
use crate::core::{Extent, HistorySummary, PushEvent};
use crate::error::ClientError;

/// `{success, data}` or `{success: false, error, code}`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct Toggle {
    enabled: bool,
}

/// Health check body.
#[derive(Debug, Clone, Deserialize)]
pub struct Health {
    pub status: String,
    pub version: String,
    pub hostname: String,
}

/// HTTP client for the API endpoint.
pub struct GatewayClient {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl GatewayClient {
    /// `base_url` is the API endpoint, e.g. `http://127.0.0.1:47802`.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ClientError::Network(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn health(&self) -> Result<Health, ClientError> {
        let response = self
            .client
            .get(self.url("/health"))
            .send()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;
        response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    async fn call<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ClientError> {
        let response = request
            .header("X-Api-Token", &self.token)
            .send()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ClientError::Unauthorized);
        }
        let body: Envelope<T> = response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;

        match (body.success, body.data) {
            (true, Some(data)) => Ok(data),
            (_, _) => Err(ClientError::Server {
                status: status.as_u16(),
                message: body.error.unwrap_or_else(|| "Unknown error".to_string()),
            }),
        }
    }

    /// Records in `[start, end]`. `None` bounds use the server defaults.
    pub async fn history(
        &self,
        start: Option<i64>,
        end: Option<i64>,
        bucket_ms: Option<i64>,
    ) -> Result<Vec<HistoryRecord>, ClientError> {
        let mut query = Vec::new();
        if let Some(start) = start {
            query.push(("startTime", start.to_string()));
        }
        if let Some(end) = end {
            query.push(("endTime", end.to_string()));
        }
        if let Some(bucket) = bucket_ms {
            query.push(("bucketMs", bucket.to_string()));
        }
        self.call(self.client.get(self.url("/api/history")).query(&query))
            .await
    }

    pub async fn history_extent(&self) -> Result<Extent, ClientError> {
        self.call(self.client.get(self.url("/api/history/range")))
            .await
    }

    pub async fn history_summary(&self, start: i64, end: i64) -> Result<HistorySummary, ClientError> {
        let query = [("startTime", start), ("endTime", end)];
        self.call(self.client.get(self.url("/api/history/summary")).query(&query))
            .await
    }

    pub async fn get_settings(&self) -> Result<Settings, ClientError> {
        self.call(self.client.get(self.url("/api/get-settings")))
            .await
    }

    pub async fn update_settings(&self, patch: &serde_json::Value) -> Result<Settings, ClientError> {
        self.call(self.client.post(self.url("/api/update-settings")).json(patch))
            .await
    }

    pub async fn toggle_auto_start(&self, enabled: bool) -> Result<(), ClientError> {
        let _: serde_json::Value = self
            .call(
                self.client
                    .post(self.url("/api/toggle-auto-start"))
                    .json(&Toggle { enabled }),
            )
            .await?;
        Ok(())
    }

    pub async fn toggle_web_access(&self, enabled: bool) -> Result<(), ClientError> {
        let _: serde_json::Value = self
            .call(
                self.client
                    .post(self.url("/api/toggle-web-access"))
                    .json(&Toggle { enabled }),
            )
            .await?;
        Ok(())
    }

    pub async fn status(&self) -> Result<serde_json::Value, ClientError> {
        self.call(self.client.get(self.url("/api/status"))).await
    }
}

/// Bounded, doubling reconnect delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Consecutive failures tolerated; `None` retries forever
    pub max_attempts: Option<u32>,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(10),
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

/// Follows the push channel, reconnecting on drops.
pub struct PushClient {
    url: String,
    token: String,
    policy: ReconnectPolicy,
}

impl PushClient {
    /// `url` is the push endpoint, e.g. `ws://127.0.0.1:47801/`.
    pub fn new(url: impl Into<String>, token: impl Into<String>, policy: ReconnectPolicy) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            policy,
        }
    }

    /// Deliver every event to `on_event` until the retry budget runs out or
    /// the token is rejected.
    ///
    /// The budget counts consecutive failed connects; any session that got
    /// connected resets it, however it ended.
    pub async fn run<F>(&self, mut on_event: F) -> Result<(), ClientError>
    where
        F: FnMut(PushEvent),
    {
        let mut attempts: u32 = 0;
        loop {
            let mut connected = false;
            match self.session(&mut on_event, &mut connected).await {
                Ok(()) => info!("Push channel closed by gateway"),
                Err(ClientError::Unauthorized) => return Err(ClientError::Unauthorized),
                Err(e) => warn!("Push channel error: {}", e),
            }
            if connected {
                attempts = 0;
            }

            if self.policy.exhausted(attempts) {
                return Err(ClientError::GaveUp(attempts));
            }
            let delay = self.policy.delay(attempts);
            info!(delay_ms = delay.as_millis() as u64, "Reconnecting to push channel");
            tokio::time::sleep(delay).await;
            attempts += 1;
        }
    }

    /// One connection. `Ok` means the server closed the stream. `connected`
    /// is set once the handshake succeeds.
    async fn session<F>(&self, on_event: &mut F, connected: &mut bool) -> Result<(), ClientError>
    where
        F: FnMut(PushEvent),
    {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ClientError::Network(e.to_string()))?;
        let protocol =
            HeaderValue::from_str(&self.token).map_err(|e| ClientError::Network(e.to_string()))?;
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", protocol);

        let (mut stream, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| match e {
                tungstenite::Error::Http(response) if response.status().as_u16() == 401 => {
                    ClientError::Unauthorized
                }
                other => ClientError::Network(other.to_string()),
            })?;
        *connected = true;
        debug!("Push channel connected to {}", self.url);

        while let Some(message) = stream.next().await {
            match message.map_err(|e| ClientError::Network(e.to_string()))? {
                Message::Text(text) => match serde_json::from_str::<PushEvent>(&text) {
                    Ok(event) => on_event(event),
                    Err(_) => debug!("Ignoring push frame: {}", text),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
        Ok(())
    }
}
