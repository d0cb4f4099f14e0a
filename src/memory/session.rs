//! Per-session conversation state
//!
//! Holds the bounded turn history and the working variables the classifier
//! consults for follow-up questions.

use crate::models::{Capability, Query, ResponseEnvelope, ToolParams};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};

pub const VAR_LAST_TICKER: &str = "last_ticker";
pub const VAR_LAST_CAPABILITY: &str = "last_capability";
pub const VAR_PENDING_CAPABILITY: &str = "pending_capability";
pub const VAR_LAST_GOAL_ID: &str = "last_goal_id";
pub const VAR_PENDING_PARAMS: &str = "pending_params";

/// One completed query and the envelope returned for it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub query: Query,
    pub response: ResponseEnvelope,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    turns: VecDeque<Turn>,
    vars: BTreeMap<String, Value>,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            created_at: now,
            last_active: now,
            turns: VecDeque::new(),
            vars: BTreeMap::new(),
        }
    }

    /// Append a turn, dropping the oldest ones beyond `window`.
    pub fn append_turn(&mut self, turn: Turn, window: usize) {
        self.turns.push_back(turn);
        while self.turns.len() > window.max(1) {
            self.turns.pop_front();
        }
        self.touch();
    }

    pub fn touch(&mut self) {
        self.last_active = Utc::now();
    }

    pub fn turns(&self) -> impl DoubleEndedIterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    // =============================
    // Working variables
    // =============================

    pub fn var(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn set_var(&mut self, name: &str, value: Value) {
        self.vars.insert(name.to_string(), value);
    }

    pub fn remove_var(&mut self, name: &str) -> Option<Value> {
        self.vars.remove(name)
    }

    pub fn last_ticker(&self) -> Option<&str> {
        self.var(VAR_LAST_TICKER).and_then(Value::as_str)
    }

    pub fn last_goal_id(&self) -> Option<u64> {
        self.var(VAR_LAST_GOAL_ID).and_then(Value::as_u64)
    }

    pub fn last_capability(&self) -> Option<Capability> {
        self.capability_var(VAR_LAST_CAPABILITY)
    }

    /// Capability a previous clarification was waiting on
    pub fn pending_capability(&self) -> Option<Capability> {
        self.capability_var(VAR_PENDING_CAPABILITY)
    }

    /// Parameters the pending clarification already had
    pub fn pending_params(&self) -> ToolParams {
        self.var(VAR_PENDING_PARAMS)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }

    fn capability_var(&self, name: &str) -> Option<Capability> {
        self.var(name)
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Payload;
    use serde_json::json;

    fn turn(text: &str) -> Turn {
        let query = Query::new(text, "s1");
        let response = ResponseEnvelope::ok(query.id, "s1", Payload::text("ok"), vec![]);
        Turn { query, response }
    }

    #[test]
    fn test_history_never_exceeds_window() {
        let mut ctx = SessionContext::new("s1");
        for i in 0..57 {
            ctx.append_turn(turn(&format!("question {}", i)), 5);
            assert!(ctx.turn_count() <= 5);
        }
        let oldest = ctx.turns().next().unwrap();
        assert_eq!(oldest.query.text, "question 52");
        let newest = ctx.turns().next_back().unwrap();
        assert_eq!(newest.query.text, "question 56");
    }

    #[test]
    fn test_working_variables() {
        let mut ctx = SessionContext::new("s1");
        ctx.set_var(VAR_LAST_TICKER, json!("TSLA"));
        ctx.set_var(VAR_PENDING_CAPABILITY, json!("market_price"));
        ctx.set_var(VAR_LAST_GOAL_ID, json!(7));

        assert_eq!(ctx.last_ticker(), Some("TSLA"));
        assert_eq!(ctx.pending_capability(), Some(Capability::MarketPrice));
        assert_eq!(ctx.last_goal_id(), Some(7));
        assert!(ctx.last_capability().is_none());

        assert!(ctx.pending_params().is_empty());
        ctx.set_var(VAR_PENDING_PARAMS, json!({"amount": 50.0}));
        assert_eq!(ctx.pending_params().get("amount"), Some(&json!(50.0)));

        ctx.remove_var(VAR_PENDING_CAPABILITY);
        assert!(ctx.pending_capability().is_none());
    }
}
