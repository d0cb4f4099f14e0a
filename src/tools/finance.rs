//! Finance tools: expenses, goals, market data and web search
//!
//! Each tool validates its own parameters, calls exactly one collaborator
//! and returns a JSON result. Rendering for users lives in the formatters
//! registered next to each tool.

use super::insights::summarize_spending;
use super::schema::{ParamKind, ParamSchema, ParamSpec};
use super::{InvocationContext, ResultFormatter, Tool, ToolDescriptor, ToolRegistry};
use crate::error::OrchestrationError;
use crate::models::{Capability, Payload, ToolParams};
use crate::services::{
    EntryFilter, InMemoryLedger, LedgerEntry, LedgerService, MarketDataProvider, SearchProvider,
    StaticMarketData, StaticSearch,
};
use crate::Result;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_PERIOD_DAYS: u64 = 30;
const MAX_PERIOD_DAYS: u64 = 3650;
const MAX_SEARCH_RESULTS: usize = 5;

/// Collaborators the finance tools are built on
#[derive(Clone)]
pub struct FinanceServices {
    pub ledger: Arc<dyn LedgerService>,
    pub market: Arc<dyn MarketDataProvider>,
    pub search: Arc<dyn SearchProvider>,
    pub currency: String,
}

impl FinanceServices {
    /// Fully offline services with a small demo catalog.
    pub fn in_memory(currency: &str) -> Self {
        Self {
            ledger: Arc::new(InMemoryLedger::new()),
            market: Arc::new(StaticMarketData::demo()),
            search: Arc::new(StaticSearch::demo()),
            currency: currency.to_string(),
        }
    }
}

//
// ================= Parameter helpers =================
//

fn require_f64(params: &ToolParams, name: &str) -> Result<f64> {
    params
        .get(name)
        .and_then(Value::as_f64)
        .ok_or_else(|| OrchestrationError::InvalidInput(format!("Expected numeric '{}'", name)))
}

fn require_str<'a>(params: &'a ToolParams, name: &str) -> Result<&'a str> {
    params
        .get(name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| OrchestrationError::InvalidInput(format!("Expected text '{}'", name)))
}

fn optional_str<'a>(params: &'a ToolParams, name: &str) -> Option<&'a str> {
    params
        .get(name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn period_days(params: &ToolParams) -> u64 {
    params
        .get("period_days")
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_PERIOD_DAYS)
        .clamp(1, MAX_PERIOD_DAYS)
}

//
// ================= Expenses =================
//

pub struct ExpenseAddTool {
    ledger: Arc<dyn LedgerService>,
}

#[async_trait::async_trait]
impl Tool for ExpenseAddTool {
    async fn invoke(&self, ctx: &InvocationContext, params: &ToolParams) -> Result<Value> {
        let amount = require_f64(params, "amount")?;
        if amount <= 0.0 || !amount.is_finite() {
            return Err(OrchestrationError::InvalidInput(format!(
                "Amount must be positive, received {}",
                amount
            )));
        }
        let category = require_str(params, "category")?.to_lowercase();
        let description = optional_str(params, "description").map(str::to_string);

        let expense_id = self
            .ledger
            .record(
                &ctx.session_id,
                LedgerEntry::Expense {
                    amount,
                    category: category.clone(),
                    description: description.clone(),
                },
            )
            .await?;

        Ok(json!({
            "expense_id": expense_id,
            "amount": amount,
            "category": category,
            "description": description,
        }))
    }
}

pub struct ExpenseQueryTool {
    ledger: Arc<dyn LedgerService>,
}

#[async_trait::async_trait]
impl Tool for ExpenseQueryTool {
    async fn invoke(&self, ctx: &InvocationContext, params: &ToolParams) -> Result<Value> {
        let days = period_days(params);
        let category = optional_str(params, "category").map(str::to_lowercase);

        let filter = EntryFilter {
            category: category.clone(),
            ..EntryFilter::expenses_since(Utc::now() - ChronoDuration::days(days as i64))
        };
        let records = self.ledger.query(&ctx.session_id, &filter).await?;

        let expenses: Vec<Value> = records
            .iter()
            .filter_map(|r| match &r.entry {
                LedgerEntry::Expense {
                    amount,
                    category,
                    description,
                } => Some(json!({
                    "id": r.id,
                    "amount": amount,
                    "category": category,
                    "description": description,
                    "date": r.recorded_at.to_rfc3339(),
                })),
                LedgerEntry::Goal { .. } => None,
            })
            .collect();
        let total: f64 = expenses
            .iter()
            .filter_map(|e| e.get("amount").and_then(Value::as_f64))
            .sum();

        Ok(json!({
            "count": expenses.len(),
            "total": total,
            "period_days": days,
            "category_filter": category,
            "expenses": expenses,
        }))
    }
}

pub struct ExpenseSummaryTool {
    ledger: Arc<dyn LedgerService>,
    currency: String,
}

#[async_trait::async_trait]
impl Tool for ExpenseSummaryTool {
    async fn invoke(&self, ctx: &InvocationContext, params: &ToolParams) -> Result<Value> {
        let days = period_days(params);
        let since = Utc::now() - ChronoDuration::days(days as i64);
        let records = self
            .ledger
            .query(&ctx.session_id, &EntryFilter::expenses_since(since))
            .await?;

        let summary = summarize_spending(&records, days as u32, &self.currency);
        Ok(serde_json::to_value(summary)?)
    }
}

//
// ================= Goals =================
//

pub struct GoalAddTool {
    ledger: Arc<dyn LedgerService>,
}

#[async_trait::async_trait]
impl Tool for GoalAddTool {
    async fn invoke(&self, ctx: &InvocationContext, params: &ToolParams) -> Result<Value> {
        let text = require_str(params, "goal_text")?.to_string();
        let target_amount = params
            .get("target_amount")
            .and_then(Value::as_f64)
            .filter(|t| *t > 0.0);

        let goal_id = self
            .ledger
            .record(
                &ctx.session_id,
                LedgerEntry::Goal {
                    text: text.clone(),
                    target_amount,
                },
            )
            .await?;

        Ok(json!({
            "goal_id": goal_id,
            "goal_text": text,
            "target_amount": target_amount,
        }))
    }
}

pub struct GoalProgressTool {
    ledger: Arc<dyn LedgerService>,
}

#[async_trait::async_trait]
impl Tool for GoalProgressTool {
    async fn invoke(&self, ctx: &InvocationContext, params: &ToolParams) -> Result<Value> {
        let goal_id = match params.get("goal_id").and_then(Value::as_u64) {
            Some(id) => Some(id),
            None => self
                .ledger
                .query(&ctx.session_id, &EntryFilter::goals())
                .await?
                .iter()
                .map(|r| r.id)
                .max(),
        };

        let Some(goal_id) = goal_id else {
            return Ok(json!({ "goal": null }));
        };

        let progress = self.ledger.summarize(&ctx.session_id, goal_id).await?;
        Ok(json!({ "goal": progress }))
    }
}

//
// ================= Market =================
//

pub struct MarketPriceTool {
    market: Arc<dyn MarketDataProvider>,
}

#[async_trait::async_trait]
impl Tool for MarketPriceTool {
    async fn invoke(&self, _ctx: &InvocationContext, params: &ToolParams) -> Result<Value> {
        let ticker = require_str(params, "ticker")?;
        let quote = self.market.get_price(ticker).await?;
        if !quote.price.is_finite() {
            return Err(OrchestrationError::PermanentTool(format!(
                "Non-numeric price for {}",
                ticker
            )));
        }
        Ok(serde_json::to_value(quote)?)
    }
}

pub struct MarketNewsTool {
    market: Arc<dyn MarketDataProvider>,
}

#[async_trait::async_trait]
impl Tool for MarketNewsTool {
    async fn invoke(&self, _ctx: &InvocationContext, params: &ToolParams) -> Result<Value> {
        let ticker = require_str(params, "ticker")?;
        let articles = self.market.get_news(ticker).await?;
        Ok(json!({
            "ticker": ticker,
            "articles": articles,
        }))
    }
}

pub struct WebSearchTool {
    search: Arc<dyn SearchProvider>,
}

#[async_trait::async_trait]
impl Tool for WebSearchTool {
    async fn invoke(&self, _ctx: &InvocationContext, params: &ToolParams) -> Result<Value> {
        let text = require_str(params, "text")?;
        let mut results = self.search.search(text).await?;
        results.truncate(MAX_SEARCH_RESULTS);
        Ok(json!({
            "query": text,
            "results": results,
        }))
    }
}

//
// ================= Formatters =================
//

type FormatFn = fn(&Value, &str) -> Result<Payload>;

/// Formatter backed by a plain function plus the display currency
struct FnFormatter {
    currency: String,
    format: FormatFn,
}

impl ResultFormatter for FnFormatter {
    fn format(&self, result: &Value) -> Result<Payload> {
        (self.format)(result, &self.currency)
    }
}

fn formatter(currency: &str, format: FormatFn) -> Arc<dyn ResultFormatter> {
    Arc::new(FnFormatter {
        currency: currency.to_string(),
        format,
    })
}

fn field_f64(v: &Value, key: &str) -> Result<f64> {
    v.get(key)
        .and_then(Value::as_f64)
        .ok_or_else(|| OrchestrationError::Internal(format!("result is missing '{}'", key)))
}

fn field_str<'a>(v: &'a Value, key: &str) -> Result<&'a str> {
    v.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| OrchestrationError::Internal(format!("result is missing '{}'", key)))
}

fn format_expense_added(v: &Value, currency: &str) -> Result<Payload> {
    let amount = field_f64(v, "amount")?;
    let category = field_str(v, "category")?;
    Ok(Payload::with_data(
        format!("Logged an expense of {}{:.2} for '{}'.", currency, amount, category),
        v.clone(),
    ))
}

fn format_expense_query(v: &Value, currency: &str) -> Result<Payload> {
    let count = field_f64(v, "count")?;
    let total = field_f64(v, "total")?;
    let days = field_f64(v, "period_days")?;
    let scope = match v.get("category_filter").and_then(Value::as_str) {
        Some(category) => format!(" on {}", category),
        None => String::new(),
    };
    Ok(Payload::with_data(
        format!(
            "Found {} expense(s){} totaling {}{:.2} in the last {} days.",
            count, scope, currency, total, days
        ),
        v.clone(),
    ))
}

fn format_expense_summary(v: &Value, _currency: &str) -> Result<Payload> {
    let feedback = field_str(v, "feedback")?;
    Ok(Payload::with_data(feedback, v.clone()))
}

fn format_goal_added(v: &Value, currency: &str) -> Result<Payload> {
    let text = field_str(v, "goal_text")?;
    let id = field_f64(v, "goal_id")?;
    let target = match v.get("target_amount").and_then(Value::as_f64) {
        Some(t) => format!(" with a target of {}{:.2}", currency, t),
        None => String::new(),
    };
    Ok(Payload::with_data(
        format!("Goal #{} '{}' added{}. You can do it!", id, text, target),
        v.clone(),
    ))
}

fn format_goal_progress(v: &Value, currency: &str) -> Result<Payload> {
    let goal = v
        .get("goal")
        .ok_or_else(|| OrchestrationError::Internal("result is missing 'goal'".to_string()))?;
    if goal.is_null() {
        return Ok(Payload::with_data(
            "You haven't set any goals yet. Try \"set a goal to save 5000 this month\".",
            v.clone(),
        ));
    }

    let text = field_str(goal, "text")?;
    let spent = field_f64(goal, "spent_since_created")?;
    let mut out = format!(
        "Goal '{}': {}{:.2} spent since you set it",
        text, currency, spent
    );
    if let (Some(target), Some(pct)) = (
        goal.get("target_amount").and_then(Value::as_f64),
        goal.get("percent_used").and_then(Value::as_f64),
    ) {
        out.push_str(&format!(
            " ({:.1}% of your {}{:.2} target)",
            pct, currency, target
        ));
    }
    out.push('.');
    Ok(Payload::with_data(out, v.clone()))
}

fn format_price(v: &Value, _currency: &str) -> Result<Payload> {
    let ticker = field_str(v, "ticker")?;
    let price = field_f64(v, "price")?;
    let unit = v
        .get("currency")
        .and_then(Value::as_str)
        .map(|c| format!(" {}", c))
        .unwrap_or_default();
    Ok(Payload::with_data(
        format!("{} is trading at {:.2}{}.", ticker, price, unit),
        v.clone(),
    ))
}

fn format_news(v: &Value, _currency: &str) -> Result<Payload> {
    let ticker = field_str(v, "ticker")?;
    let articles = v
        .get("articles")
        .and_then(Value::as_array)
        .ok_or_else(|| OrchestrationError::Internal("result is missing 'articles'".to_string()))?;

    if articles.is_empty() {
        return Ok(Payload::with_data(
            format!("No recent news found for {}.", ticker),
            v.clone(),
        ));
    }

    let mut out = format!("Latest news for {}:", ticker);
    for article in articles {
        out.push_str(&format!(
            "\n- {} ({})",
            field_str(article, "title")?,
            field_str(article, "url")?
        ));
    }
    Ok(Payload::with_data(out, v.clone()))
}

fn format_search(v: &Value, _currency: &str) -> Result<Payload> {
    let query = field_str(v, "query")?;
    let results = v
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| OrchestrationError::Internal("result is missing 'results'".to_string()))?;

    if results.is_empty() {
        return Ok(Payload::with_data(
            format!("I couldn't find anything for \"{}\".", query),
            v.clone(),
        ));
    }

    let mut out = format!("Here's what I found for \"{}\":", query);
    for hit in results {
        out.push_str(&format!(
            "\n- {}: {} ({})",
            field_str(hit, "title")?,
            field_str(hit, "snippet")?,
            field_str(hit, "url")?
        ));
    }
    Ok(Payload::with_data(out, v.clone()))
}

//
// ================= Registry =================
//

const EXPENSE_ADD_KEYWORDS: &[&str] = &[
    "spent", "spend", "paid", "pay", "bought", "expense", "add", "log", "record",
];
const EXPENSE_QUERY_KEYWORDS: &[&str] = &[
    "show", "list", "expenses", "transactions", "history", "how much", "did i spend",
];
const EXPENSE_SUMMARY_KEYWORDS: &[&str] = &[
    "summary", "summarize", "breakdown", "overview", "biggest", "feedback", "report",
    "insights", "spending pattern",
];
const GOAL_ADD_KEYWORDS: &[&str] = &[
    "goal", "save", "saving", "savings", "target", "want to save", "set a goal",
];
const GOAL_PROGRESS_KEYWORDS: &[&str] = &[
    "progress", "on track", "how am i doing", "goal status", "goal progress",
];
const MARKET_PRICE_KEYWORDS: &[&str] = &[
    "price", "quote", "trading", "worth", "buy", "sell", "stock", "shares", "share price",
];
const MARKET_NEWS_KEYWORDS: &[&str] = &[
    "news", "headlines", "happening", "announcement", "announcements", "update on",
];
const WEB_SEARCH_KEYWORDS: &[&str] = &[
    "search", "look up", "google", "latest", "recent", "today's", "who", "find",
];

/// Build the registry with every finance tool wired to `services`.
pub fn create_default_registry(services: FinanceServices) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    let currency = services.currency.as_str();
    let ledger_timeout = Duration::from_secs(3);
    let market_timeout = Duration::from_secs(5);

    registry.register(
        ToolDescriptor::new(
            Capability::ExpenseAdd,
            "Record an expense for the current user",
            Arc::new(ExpenseAddTool {
                ledger: services.ledger.clone(),
            }),
        )
        .with_schema(ParamSchema::new(vec![
            ParamSpec::required("amount", ParamKind::Number, "Expense amount"),
            ParamSpec::required("category", ParamKind::Text, "Expense category (food, travel, rent...)"),
            ParamSpec::optional("description", ParamKind::Text, "Free-form note"),
        ]))
        .with_formatter(formatter(currency, format_expense_added))
        .idempotent(false)
        .with_timeout(ledger_timeout)
        .with_priority(20)
        .with_keywords(EXPENSE_ADD_KEYWORDS),
    )?;

    registry.register(
        ToolDescriptor::new(
            Capability::ExpenseQuery,
            "List expenses, optionally filtered by category and period",
            Arc::new(ExpenseQueryTool {
                ledger: services.ledger.clone(),
            }),
        )
        .with_schema(ParamSchema::new(vec![
            ParamSpec::optional("category", ParamKind::Text, "Category filter"),
            ParamSpec::optional("period_days", ParamKind::Integer, "Look-back window in days")
                .with_default(json!(DEFAULT_PERIOD_DAYS)),
        ]))
        .with_formatter(formatter(currency, format_expense_query))
        .idempotent(true)
        .with_timeout(ledger_timeout)
        .with_priority(15)
        .with_keywords(EXPENSE_QUERY_KEYWORDS),
    )?;

    registry.register(
        ToolDescriptor::new(
            Capability::ExpenseSummary,
            "Summarize spending by category with feedback",
            Arc::new(ExpenseSummaryTool {
                ledger: services.ledger.clone(),
                currency: services.currency.clone(),
            }),
        )
        .with_schema(ParamSchema::new(vec![ParamSpec::optional(
            "period_days",
            ParamKind::Integer,
            "Look-back window in days",
        )
        .with_default(json!(DEFAULT_PERIOD_DAYS))]))
        .with_formatter(formatter(currency, format_expense_summary))
        .idempotent(true)
        .with_timeout(ledger_timeout)
        .with_priority(12)
        .with_keywords(EXPENSE_SUMMARY_KEYWORDS),
    )?;

    registry.register(
        ToolDescriptor::new(
            Capability::GoalAdd,
            "Record a financial goal",
            Arc::new(GoalAddTool {
                ledger: services.ledger.clone(),
            }),
        )
        .with_schema(ParamSchema::new(vec![
            ParamSpec::required("goal_text", ParamKind::Text, "What the goal is"),
            ParamSpec::optional("target_amount", ParamKind::Number, "Target amount"),
        ]))
        .with_formatter(formatter(currency, format_goal_added))
        .idempotent(false)
        .with_timeout(ledger_timeout)
        .with_priority(35)
        .with_keywords(GOAL_ADD_KEYWORDS),
    )?;

    registry.register(
        ToolDescriptor::new(
            Capability::GoalProgress,
            "Report progress on a goal (latest goal by default)",
            Arc::new(GoalProgressTool {
                ledger: services.ledger.clone(),
            }),
        )
        .with_schema(ParamSchema::new(vec![ParamSpec::optional(
            "goal_id",
            ParamKind::Integer,
            "Goal identifier",
        )]))
        .with_formatter(formatter(currency, format_goal_progress))
        .idempotent(true)
        .with_timeout(ledger_timeout)
        .with_priority(30)
        .with_keywords(GOAL_PROGRESS_KEYWORDS),
    )?;

    let market_attempts = services.market.attempt_budget();

    registry.register(
        ToolDescriptor::new(
            Capability::MarketPrice,
            "Latest price for a stock ticker",
            Arc::new(MarketPriceTool {
                market: services.market.clone(),
            }),
        )
        .with_schema(ParamSchema::new(vec![ParamSpec::required(
            "ticker",
            ParamKind::Ticker,
            "Stock ticker symbol, e.g. AAPL",
        )]))
        .with_formatter(formatter(currency, format_price))
        .idempotent(true)
        .with_timeout(market_timeout)
        .with_priority(10)
        .with_keywords(MARKET_PRICE_KEYWORDS)
        .with_max_attempts(market_attempts),
    )?;

    registry.register(
        ToolDescriptor::new(
            Capability::MarketNews,
            "Recent news for a stock ticker",
            Arc::new(MarketNewsTool {
                market: services.market.clone(),
            }),
        )
        .with_schema(ParamSchema::new(vec![ParamSpec::required(
            "ticker",
            ParamKind::Ticker,
            "Stock ticker symbol, e.g. AAPL",
        )]))
        .with_formatter(formatter(currency, format_news))
        .idempotent(true)
        .with_timeout(market_timeout)
        .with_priority(40)
        .with_keywords(MARKET_NEWS_KEYWORDS)
        .with_max_attempts(market_attempts),
    )?;

    registry.register(
        ToolDescriptor::new(
            Capability::WebSearch,
            "Live web search for open-ended or current questions",
            Arc::new(WebSearchTool {
                search: services.search.clone(),
            }),
        )
        .with_schema(ParamSchema::new(vec![ParamSpec::required(
            "text",
            ParamKind::Text,
            "What to search for",
        )]))
        .with_formatter(formatter(currency, format_search))
        .idempotent(true)
        .with_timeout(Duration::from_secs(8))
        .with_priority(90)
        .with_keywords(WEB_SEARCH_KEYWORDS),
    )?;

    Ok(registry)
}
