//! HTTP-backed market-data and search providers
//!
//! Both talk to a JSON gateway that fronts the real third-party APIs, so the
//! core never parses vendor-specific payloads.

use super::{
    MarketDataProvider, NewsArticle, PriceQuote, SearchHit, SearchProvider, ServiceError,
    ServiceResult,
};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::env;
use std::time::Duration;
use tracing::warn;

#[derive(Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
}

impl HttpGateway {
    pub fn new(base_url: &str, timeout: Duration) -> ServiceResult<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::Unavailable(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Build a gateway from the first of `keys` that is set.
    pub fn from_env(keys: &[&str], timeout: Duration) -> Option<Self> {
        let base_url = keys.iter().find_map(|k| env::var(k).ok())?;
        match Self::new(&base_url, timeout) {
            Ok(gateway) => Some(gateway),
            Err(e) => {
                warn!(error = %e, "Ignoring gateway configuration");
                None
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> ServiceResult<T> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                ServiceError::Unavailable(format!("request to {} failed: {}", path, e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, path, &body));
        }

        let body = response
            .json::<Value>()
            .await
            .map_err(|e| ServiceError::Malformed(format!("invalid JSON from {}: {}", path, e)))?;

        serde_json::from_value(body)
            .map_err(|e| ServiceError::Malformed(format!("unexpected shape from {}: {}", path, e)))
    }
}

fn classify_status(status: StatusCode, path: &str, body: &str) -> ServiceError {
    let detail = format!("{} returned {}: {}", path, status, body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ServiceError::Unauthorized(detail),
        StatusCode::TOO_MANY_REQUESTS => ServiceError::RateLimited(detail),
        StatusCode::PAYMENT_REQUIRED => ServiceError::QuotaExhausted(detail),
        StatusCode::NOT_FOUND => ServiceError::NotFound(detail),
        s if s.is_server_error() || s == StatusCode::REQUEST_TIMEOUT => {
            ServiceError::Unavailable(detail)
        }
        _ => ServiceError::Malformed(detail),
    }
}

pub struct HttpMarketData {
    gateway: HttpGateway,
    attempt_budget: u32,
}

impl HttpMarketData {
    pub fn new(gateway: HttpGateway, attempt_budget: u32) -> Self {
        Self {
            gateway,
            attempt_budget: attempt_budget.max(1),
        }
    }
}

#[async_trait]
impl MarketDataProvider for HttpMarketData {
    async fn get_price(&self, ticker: &str) -> ServiceResult<PriceQuote> {
        self.gateway.get_json("/v1/price", &[("ticker", ticker)]).await
    }

    async fn get_news(&self, ticker: &str) -> ServiceResult<Vec<NewsArticle>> {
        self.gateway.get_json("/v1/news", &[("ticker", ticker)]).await
    }

    fn attempt_budget(&self) -> u32 {
        self.attempt_budget
    }
}

pub struct HttpSearch {
    gateway: HttpGateway,
}

impl HttpSearch {
    pub fn new(gateway: HttpGateway) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl SearchProvider for HttpSearch {
    async fn search(&self, text: &str) -> ServiceResult<Vec<SearchHit>> {
        self.gateway.get_json("/v1/search", &[("q", text)]).await
    }
}
