//! API client for the tracking backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{ApiError, PlotSource, PoiSource, PositionSource};
use crate::models::{DeviceEvent, PlotData, PoiResponse, Position, TripQuery};

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        })
    }

    /// Set the bearer token for authenticated requests
    pub fn set_token(&mut self, token: String) {
        self.token = Some(token);
    }

    /// Create a new ApiClient with the given token, sharing the connection pool.
    pub fn with_token(&self, token: String) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token: Some(token),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(
        url: &str,
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(url, status, &body))
        }
    }

    /// Send a request, backing off on 429, and parse the body as JSON.
    async fn send_json<T, F>(&self, url: &str, build: F) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self.authorize(build()).send().await?;

            match Self::check_response_for_retry(url, response).await? {
                Some(response) => {
                    let text = response.text().await?;
                    return serde_json::from_str(&text).map_err(|e| ApiError::InvalidResponse {
                        endpoint: url.to_string(),
                        reason: e.to_string(),
                    });
                }
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited {
                            endpoint: url.to_string(),
                            retries: MAX_RATE_LIMIT_RETRIES,
                        });
                    }
                    warn!(url = url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
            }
        }
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T, ApiError> {
        let url = self.url(path);
        debug!(url = %url, "POST");
        self.send_json(&url, || self.client.post(&url).json(body)).await
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let url = self.url(path);
        debug!(url = %url, "GET");
        self.send_json(&url, || self.client.get(&url).query(query)).await
    }
}

#[async_trait]
impl PositionSource for ApiClient {
    async fn fetch_positions(
        &self,
        device_id: i64,
        from: &str,
        to: &str,
    ) -> Result<Vec<Position>, ApiError> {
        let body = json!({
            "deviceId": device_id,
            "from": from,
            "to": to,
            "direct": true,
        });
        let raw: Vec<Value> = self.post("/api/route", &body).await?;
        Ok(Position::from_values(raw))
    }

    async fn fetch_route(&self, query: &TripQuery) -> Result<Vec<Position>, ApiError> {
        let body = serde_json::to_value(query)?;
        let raw: Vec<Value> = self.post("/api/route", &body).await?;
        Ok(Position::from_values(raw))
    }
}

#[async_trait]
impl PlotSource for ApiClient {
    async fn fetch_plot_data(&self, query: &TripQuery) -> Result<PlotData, ApiError> {
        let body = serde_json::to_value(query)?;
        self.post("/api/plotmaps", &body).await
    }

    async fn fetch_events(&self, query: &TripQuery) -> Result<Vec<DeviceEvent>, ApiError> {
        let body = serde_json::to_value(query)?;
        self.post("/api/events", &body).await
    }
}

#[async_trait]
impl PoiSource for ApiClient {
    async fn fetch_manual_pois(
        &self,
        device_id: Option<i64>,
        from: Option<&str>,
        to: Option<&str>,
    ) -> Result<PoiResponse, ApiError> {
        let mut query = Vec::new();
        if let Some(device_id) = device_id {
            query.push(("deviceId", device_id.to_string()));
        }
        if let Some(from) = from {
            query.push(("from", from.to_string()));
        }
        if let Some(to) = to {
            query.push(("to", to.to_string()));
        }
        self.get("/api/manual-pois", &query).await
    }
}
