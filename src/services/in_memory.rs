//! In-memory collaborators for development, tests and the offline CLI

use super::{
    EntryFilter, GoalProgress, LedgerEntry, LedgerRecord, LedgerService, MarketDataProvider,
    NewsArticle, PriceQuote, SearchHit, SearchProvider, ServiceError, ServiceResult,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Ledger of expenses and goals kept in process memory
pub struct InMemoryLedger {
    records: Arc<RwLock<Vec<LedgerRecord>>>,
    next_id: AtomicU64,
    available: AtomicBool,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
            next_id: AtomicU64::new(1),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage; every call fails with `Unavailable` while down.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> ServiceResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ServiceError::Unavailable("ledger offline".to_string()))
        }
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerService for InMemoryLedger {
    async fn record(&self, user_id: &str, entry: LedgerEntry) -> ServiceResult<u64> {
        self.ensure_available()?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut records = self.records.write().await;
        records.push(LedgerRecord {
            id,
            user_id: user_id.to_string(),
            entry,
            recorded_at: Utc::now(),
        });
        Ok(id)
    }

    async fn query(&self, user_id: &str, filter: &EntryFilter) -> ServiceResult<Vec<LedgerRecord>> {
        self.ensure_available()?;

        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| r.user_id == user_id && filter.matches(r))
            .cloned()
            .collect())
    }

    async fn summarize(&self, user_id: &str, goal_id: u64) -> ServiceResult<GoalProgress> {
        self.ensure_available()?;

        let records = self.records.read().await;

        let goal = records
            .iter()
            .find(|r| r.id == goal_id && r.user_id == user_id)
            .ok_or_else(|| ServiceError::NotFound(format!("goal {}", goal_id)))?;

        let LedgerEntry::Goal {
            text,
            target_amount,
        } = &goal.entry
        else {
            return Err(ServiceError::NotFound(format!("goal {}", goal_id)));
        };

        let spent: f64 = records
            .iter()
            .filter(|r| r.user_id == user_id && r.recorded_at >= goal.recorded_at)
            .filter_map(|r| match &r.entry {
                LedgerEntry::Expense { amount, .. } => Some(*amount),
                LedgerEntry::Goal { .. } => None,
            })
            .sum();

        let remaining = target_amount.map(|t| t - spent);
        let percent_used = target_amount
            .filter(|t| *t > 0.0)
            .map(|t| (spent / t) * 100.0);

        Ok(GoalProgress {
            goal_id,
            text: text.clone(),
            target_amount: *target_amount,
            spent_since_created: spent,
            remaining,
            percent_used,
            created_at: goal.recorded_at,
        })
    }
}

/// Fixed quotes and headlines keyed by ticker
pub struct StaticMarketData {
    prices: HashMap<String, f64>,
    news: HashMap<String, Vec<NewsArticle>>,
    currency: Option<String>,
}

impl StaticMarketData {
    pub fn new() -> Self {
        Self {
            prices: HashMap::new(),
            news: HashMap::new(),
            currency: Some("USD".to_string()),
        }
    }

    pub fn with_price(mut self, ticker: &str, price: f64) -> Self {
        self.prices.insert(ticker.to_uppercase(), price);
        self
    }

    pub fn with_headline(mut self, ticker: &str, title: &str, url: &str) -> Self {
        self.news
            .entry(ticker.to_uppercase())
            .or_default()
            .push(NewsArticle {
                title: title.to_string(),
                url: url.to_string(),
                source: None,
                published_at: Some(Utc::now()),
            });
        self
    }

    /// A small catalog so the CLI is usable without a market gateway.
    pub fn demo() -> Self {
        Self::new()
            .with_price("AAPL", 189.84)
            .with_price("MSFT", 417.32)
            .with_price("TSLA", 248.50)
            .with_price("RELIANCE", 2931.45)
            .with_headline(
                "AAPL",
                "Apple unveils new on-device AI features",
                "https://example.com/news/aapl-ai",
            )
            .with_headline(
                "TSLA",
                "Tesla deliveries beat expectations",
                "https://example.com/news/tsla-deliveries",
            )
    }
}

impl Default for StaticMarketData {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataProvider for StaticMarketData {
    async fn get_price(&self, ticker: &str) -> ServiceResult<PriceQuote> {
        let symbol = ticker.to_uppercase();
        let price = self
            .prices
            .get(&symbol)
            .copied()
            .ok_or_else(|| ServiceError::NotFound(format!("no quote for {}", symbol)))?;

        Ok(PriceQuote {
            ticker: symbol,
            price,
            currency: self.currency.clone(),
            timestamp: Utc::now(),
        })
    }

    async fn get_news(&self, ticker: &str) -> ServiceResult<Vec<NewsArticle>> {
        Ok(self
            .news
            .get(&ticker.to_uppercase())
            .cloned()
            .unwrap_or_default())
    }
}

/// Search provider answering from a fixed corpus
pub struct StaticSearch {
    corpus: Vec<SearchHit>,
}

impl StaticSearch {
    pub fn new(corpus: Vec<SearchHit>) -> Self {
        Self { corpus }
    }

    pub fn demo() -> Self {
        Self::new(vec![
            SearchHit {
                title: "Mutual fund basics".to_string(),
                snippet: "How SIPs and mutual funds work for new investors.".to_string(),
                url: "https://example.com/mutual-funds".to_string(),
            },
            SearchHit {
                title: "Market headlines today".to_string(),
                snippet: "Indices close higher as banking stocks rally.".to_string(),
                url: "https://example.com/markets-today".to_string(),
            },
        ])
    }
}

#[async_trait]
impl SearchProvider for StaticSearch {
    async fn search(&self, text: &str) -> ServiceResult<Vec<SearchHit>> {
        let words: Vec<String> = text
            .split_whitespace()
            .filter(|w| w.len() > 3)
            .map(|w| w.to_lowercase())
            .collect();

        Ok(self
            .corpus
            .iter()
            .filter(|hit| {
                let haystack = format!("{} {}", hit.title, hit.snippet).to_lowercase();
                words.iter().any(|w| haystack.contains(w.as_str()))
            })
            .cloned()
            .collect())
    }
}
