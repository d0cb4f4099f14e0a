//! External collaborators
//!
//! The orchestration core only sees these traits. Ledger storage, market
//! data and web search are pluggable: in-memory versions for tests and the
//! offline CLI, HTTP gateway versions for real deployments.

pub mod http;
pub mod in_memory;

pub use http::{HttpGateway, HttpMarketData, HttpSearch};
pub use in_memory::{InMemoryLedger, StaticMarketData, StaticSearch};

use crate::error::OrchestrationError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl From<ServiceError> for OrchestrationError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(_) | ServiceError::RateLimited(_) => {
                OrchestrationError::TransientTool(err.to_string())
            }
            ServiceError::Unauthorized(_)
            | ServiceError::QuotaExhausted(_)
            | ServiceError::Malformed(_)
            | ServiceError::NotFound(_) => OrchestrationError::PermanentTool(err.to_string()),
        }
    }
}

//
// ================= Ledger =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LedgerEntry {
    Expense {
        amount: f64,
        category: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Goal {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        target_amount: Option<f64>,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Expense,
    Goal,
}

impl LedgerEntry {
    pub fn kind(&self) -> EntryKind {
        match self {
            LedgerEntry::Expense { .. } => EntryKind::Expense,
            LedgerEntry::Goal { .. } => EntryKind::Goal,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerRecord {
    pub id: u64,
    pub user_id: String,
    pub entry: LedgerEntry,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EntryFilter {
    pub kind: Option<EntryKind>,
    pub category: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

impl EntryFilter {
    pub fn expenses_since(since: DateTime<Utc>) -> Self {
        Self {
            kind: Some(EntryKind::Expense),
            category: None,
            since: Some(since),
        }
    }

    pub fn goals() -> Self {
        Self {
            kind: Some(EntryKind::Goal),
            ..Self::default()
        }
    }

    pub fn matches(&self, record: &LedgerRecord) -> bool {
        if self.kind.is_some_and(|k| k != record.entry.kind()) {
            return false;
        }
        if self.since.is_some_and(|since| record.recorded_at < since) {
            return false;
        }
        match (&self.category, &record.entry) {
            (Some(wanted), LedgerEntry::Expense { category, .. }) => wanted == category,
            (Some(_), LedgerEntry::Goal { .. }) => false,
            (None, _) => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GoalProgress {
    pub goal_id: u64,
    pub text: String,
    pub target_amount: Option<f64>,
    /// Total expenses recorded since the goal was set
    pub spent_since_created: f64,
    pub remaining: Option<f64>,
    pub percent_used: Option<f64>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait LedgerService: Send + Sync {
    async fn record(&self, user_id: &str, entry: LedgerEntry) -> ServiceResult<u64>;
    async fn query(&self, user_id: &str, filter: &EntryFilter) -> ServiceResult<Vec<LedgerRecord>>;
    async fn summarize(&self, user_id: &str, goal_id: u64) -> ServiceResult<GoalProgress>;
}

//
// ================= Market Data =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceQuote {
    pub ticker: String,
    pub price: f64,
    #[serde(default)]
    pub currency: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewsArticle {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn get_price(&self, ticker: &str) -> ServiceResult<PriceQuote>;
    async fn get_news(&self, ticker: &str) -> ServiceResult<Vec<NewsArticle>>;

    /// Attempts per request the provider tolerates before throttling
    fn attempt_budget(&self) -> u32 {
        2
    }
}

//
// ================= Web Search =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub title: String,
    pub snippet: String,
    pub url: String,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, text: &str) -> ServiceResult<Vec<SearchHit>>;
}
