//! Live adapter: talks to a real exchange over REST. Connection state and credentials
//! are held here; callers never see a raw HTTP error, only the closed error taxonomy.

use super::{AccountSnapshot, ExchangeAdapter, SubmitResult};
use crate::error::{WeaverError, WeaverResult};
use crate::model::{Bar, Order, Timeframe};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

pub struct LiveCredentials {
    pub api_key: String,
    pub api_secret: String,
}

pub struct LiveAdapter {
    id: String,
    base_url: String,
    credentials: LiveCredentials,
    client: Client,
    connected: AtomicBool,
}

impl LiveAdapter {
    pub fn new(id: impl Into<String>, base_url: impl Into<String>, credentials: LiveCredentials) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into(),
            credentials,
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("reqwest client config is static and valid"),
            connected: AtomicBool::new(false),
        }
    }

    fn require_connected(&self) -> WeaverResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(WeaverError::Connection(format!(
                "adapter {} is not connected",
                self.id
            )));
        }
        Ok(())
    }

    fn auth_header_value(&self) -> String {
        format!("{}:{}", self.credentials.api_key, self.credentials.api_secret)
    }

    async fn map_response_errors(&self, response: reqwest::Response) -> WeaverResult<reqwest::Response> {
        match response.status() {
            StatusCode::OK | StatusCode::CREATED | StatusCode::ACCEPTED => Ok(response),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after_secs = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1);
                Err(WeaverError::RateLimit {
                    message: "exchange rate limit exceeded".into(),
                    retry_after_secs,
                })
            }
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                let body = response.text().await.unwrap_or_default();
                Err(WeaverError::ExchangeRejection(body))
            }
            status if status.is_server_error() => Err(WeaverError::Connection(format!(
                "exchange returned {status}"
            ))),
            status => Err(WeaverError::Connection(format!(
                "unexpected exchange response: {status}"
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SubmitOrderResponse {
    order_id: String,
}

#[async_trait]
impl ExchangeAdapter for LiveAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn connect(&self) -> WeaverResult<()> {
        let response = self
            .client
            .get(format!("{}/ping", self.base_url))
            .header("Authorization", self.auth_header_value())
            .send()
            .await
            .map_err(|e| WeaverError::Connection(e.to_string()))?;
        self.map_response_errors(response).await?;
        self.connected.store(true, Ordering::SeqCst);
        info!(adapter_id = %self.id, "connected to exchange");
        Ok(())
    }

    async fn disconnect(&self) -> WeaverResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn submit_order(&self, order: &Order) -> WeaverResult<SubmitResult> {
        self.require_connected()?;
        let response = self
            .client
            .post(format!("{}/orders", self.base_url))
            .header("Authorization", self.auth_header_value())
            .json(order)
            .send()
            .await
            .map_err(|e| WeaverError::Connection(e.to_string()))?;
        let response = self.map_response_errors(response).await?;
        let parsed: SubmitOrderResponse = response
            .json()
            .await
            .map_err(|e| WeaverError::Connection(e.to_string()))?;
        Ok(SubmitResult {
            exchange_order_id: parsed.order_id,
            accepted: true,
            reject_reason: None,
        })
    }

    async fn cancel_order(&self, exchange_order_id: &str) -> WeaverResult<()> {
        self.require_connected()?;
        let response = self
            .client
            .delete(format!("{}/orders/{}", self.base_url, exchange_order_id))
            .header("Authorization", self.auth_header_value())
            .send()
            .await
            .map_err(|e| WeaverError::Connection(e.to_string()))?;
        self.map_response_errors(response).await?;
        Ok(())
    }

    async fn get_order(&self, exchange_order_id: &str) -> WeaverResult<Option<Order>> {
        self.require_connected()?;
        let response = self
            .client
            .get(format!("{}/orders/{}", self.base_url, exchange_order_id))
            .header("Authorization", self.auth_header_value())
            .send()
            .await
            .map_err(|e| WeaverError::Connection(e.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = self.map_response_errors(response).await?;
        let order: Order = response
            .json()
            .await
            .map_err(|e| WeaverError::Connection(e.to_string()))?;
        Ok(Some(order))
    }

    async fn list_open_orders(&self) -> WeaverResult<Vec<Order>> {
        self.require_connected()?;
        let response = self
            .client
            .get(format!("{}/orders?status=open", self.base_url))
            .header("Authorization", self.auth_header_value())
            .send()
            .await
            .map_err(|e| WeaverError::Connection(e.to_string()))?;
        let response = self.map_response_errors(response).await?;
        response
            .json()
            .await
            .map_err(|e| WeaverError::Connection(e.to_string()))
    }

    async fn account_snapshot(&self) -> WeaverResult<AccountSnapshot> {
        self.require_connected()?;
        let response = self
            .client
            .get(format!("{}/account", self.base_url))
            .header("Authorization", self.auth_header_value())
            .send()
            .await
            .map_err(|e| WeaverError::Connection(e.to_string()))?;
        let response = self.map_response_errors(response).await?;
        response
            .json()
            .await
            .map_err(|e| WeaverError::Connection(e.to_string()))
    }

    async fn get_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> WeaverResult<Vec<Bar>> {
        self.require_connected()?;
        let response = self
            .client
            .get(format!("{}/candles", self.base_url))
            .header("Authorization", self.auth_header_value())
            .query(&[
                ("symbol", symbol),
                ("timeframe", timeframe.as_str()),
                ("since", &since.to_rfc3339()),
                ("until", &until.to_rfc3339()),
            ])
            .send()
            .await
            .map_err(|e| WeaverError::Connection(e.to_string()))?;
        let response = self.map_response_errors(response).await?;
        response
            .json()
            .await
            .map_err(|e| WeaverError::Connection(e.to_string()))
    }

    fn supports_feature(&self, feature: &str) -> bool {
        matches!(feature, "market" | "limit" | "stop" | "stop_limit")
    }
}

impl Drop for LiveAdapter {
    fn drop(&mut self) {
        if self.connected.load(Ordering::SeqCst) {
            warn!(adapter_id = %self.id, "live adapter dropped while still connected");
        }
    }
}
