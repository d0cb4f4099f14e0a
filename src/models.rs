//! Core data models for the finance agent

use crate::error::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Named tool parameters, as extracted by the classifier.
pub type ToolParams = serde_json::Map<String, Value>;

//
// ================= Query =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Query {
    pub id: Uuid,
    pub text: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
}

impl Query {
    pub fn new(text: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            session_id: session_id.into(),
            timestamp: Utc::now(),
        }
    }
}

//
// ================= Capability =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ExpenseAdd,
    ExpenseQuery,
    ExpenseSummary,
    GoalAdd,
    GoalProgress,
    MarketPrice,
    MarketNews,
    WebSearch,
    /// Reserved: the query needs more information from the user
    Clarify,
}

impl Capability {
    /// Every capability that can be backed by a tool.
    pub const TOOLS: [Capability; 8] = [
        Capability::ExpenseAdd,
        Capability::ExpenseQuery,
        Capability::ExpenseSummary,
        Capability::GoalAdd,
        Capability::GoalProgress,
        Capability::MarketPrice,
        Capability::MarketNews,
        Capability::WebSearch,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Capability::ExpenseAdd => "expense_add",
            Capability::ExpenseQuery => "expense_query",
            Capability::ExpenseSummary => "expense_summary",
            Capability::GoalAdd => "goal_add",
            Capability::GoalProgress => "goal_progress",
            Capability::MarketPrice => "market_price",
            Capability::MarketNews => "market_news",
            Capability::WebSearch => "web_search",
            Capability::Clarify => "clarify",
        }
    }

    pub fn is_tool(&self) -> bool {
        *self != Capability::Clarify
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::TOOLS
            .iter()
            .chain(std::iter::once(&Capability::Clarify))
            .find(|c| c.name() == s)
            .copied()
            .ok_or_else(|| s.to_string())
    }
}

//
// ================= Intent =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Intent {
    pub capability: Capability,
    pub params: ToolParams,
    pub confidence: f32,
    /// Required fields that could not be filled (clarify intents only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
}

impl Intent {
    pub fn new(capability: Capability, params: ToolParams, confidence: f32) -> Self {
        Self {
            capability,
            params,
            confidence,
            missing: Vec::new(),
        }
    }

    /// A clarification request, optionally naming the capability it would
    /// have been routed to.
    pub fn clarify(target: Option<Capability>, missing: Vec<String>, confidence: f32) -> Self {
        let mut params = ToolParams::new();
        if let Some(target) = target {
            params.insert("for".to_string(), Value::String(target.name().to_string()));
        }
        Self {
            capability: Capability::Clarify,
            params,
            confidence,
            missing,
        }
    }

    /// Keep the parameters already extracted for the clarify target so the
    /// answer only has to supply what is missing.
    pub fn with_known(mut self, known: ToolParams) -> Self {
        if !known.is_empty() {
            self.params.insert("known".to_string(), Value::Object(known));
        }
        self
    }

    /// Parameters extracted before the clarification was asked.
    pub fn clarify_known(&self) -> ToolParams {
        self.params
            .get("known")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_clarify(&self) -> bool {
        self.capability == Capability::Clarify
    }

    /// The capability a clarify intent was aiming for, if any.
    pub fn clarify_target(&self) -> Option<Capability> {
        self.params
            .get("for")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
    }
}

//
// ================= Execution =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepError {
    pub kind: ErrorKind,
    /// Internal detail; logged and audited, never shown to the user
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub step_id: Uuid,
    /// Position of the originating intent within the query
    pub intent_index: usize,
    /// 1-based attempt counter
    pub attempt: u32,
    pub tool: Capability,
    pub params: ToolParams,
    pub status: StepStatus,
    pub result: Option<Value>,
    pub error: Option<StepError>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl ExecutionStep {
    pub fn pending(intent_index: usize, attempt: u32, tool: Capability, params: ToolParams) -> Self {
        Self {
            step_id: Uuid::new_v4(),
            intent_index,
            attempt,
            tool,
            params,
            status: StepStatus::Pending,
            result: None,
            error: None,
            started_at: Utc::now(),
            elapsed_ms: 0,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == StepStatus::Succeeded
    }
}

//
// ================= State Machine =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TurnState {
    Classifying,
    Executing,
    Clarifying,
    Retrying,
    Aggregating,
    Failed,
    Done,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TurnState::Classifying => "CLASSIFYING",
            TurnState::Executing => "EXECUTING",
            TurnState::Clarifying => "CLARIFYING",
            TurnState::Retrying => "RETRYING",
            TurnState::Aggregating => "AGGREGATING",
            TurnState::Failed => "FAILED",
            TurnState::Done => "DONE",
        };
        f.write_str(s)
    }
}

//
// ================= Response =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Partial,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Payload {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Payload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            data: None,
        }
    }

    pub fn with_data(text: impl Into<String>, data: Value) -> Self {
        Self {
            text: text.into(),
            data: Some(data),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Clarification {
    pub capability: Option<Capability>,
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseEnvelope {
    pub query_id: Uuid,
    pub session_id: String,
    pub status: ResponseStatus,
    pub payload: Payload,
    pub source_tools: Vec<Capability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clarification: Option<Clarification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub created_at: DateTime<Utc>,
}

impl ResponseEnvelope {
    pub fn ok(query_id: Uuid, session_id: &str, payload: Payload, source_tools: Vec<Capability>) -> Self {
        Self {
            query_id,
            session_id: session_id.to_string(),
            status: ResponseStatus::Ok,
            payload,
            source_tools,
            clarification: None,
            error: None,
            created_at: Utc::now(),
        }
    }

    pub fn clarify(query_id: Uuid, session_id: &str, text: String, clarification: Clarification) -> Self {
        Self {
            clarification: Some(clarification),
            ..Self::ok(query_id, session_id, Payload::text(text), Vec::new())
        }
    }

    /// Error envelope carrying only the user-safe message for `kind`.
    pub fn error(query_id: Uuid, session_id: &str, kind: ErrorKind) -> Self {
        let message = kind.user_message().to_string();
        Self {
            query_id,
            session_id: session_id.to_string(),
            status: ResponseStatus::Error,
            payload: Payload::text(message.clone()),
            source_tools: Vec::new(),
            clarification: None,
            error: Some(ErrorInfo { kind, message }),
            created_at: Utc::now(),
        }
    }

    /// Downgrade an aggregated envelope after a later step failed.
    pub fn into_partial(mut self, failed_tool: Capability, kind: ErrorKind) -> Self {
        let message = kind.user_message().to_string();
        self.status = ResponseStatus::Partial;
        self.payload.text = format!(
            "{}\n\nI couldn't finish the {} step: {}",
            self.payload.text,
            failed_tool.name().replace('_', " "),
            message
        );
        self.error = Some(ErrorInfo { kind, message });
        self
    }

    pub fn is_clarification(&self) -> bool {
        self.clarification.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_names_round_trip_through_from_str() {
        for cap in Capability::TOOLS {
            assert_eq!(cap.name().parse::<Capability>(), Ok(cap));
        }
        assert!("launch_rocket".parse::<Capability>().is_err());
        assert!(!Capability::Clarify.is_tool());
    }

    #[test]
    fn test_clarify_intent_remembers_target() {
        let intent = Intent::clarify(Some(Capability::MarketPrice), vec!["ticker".into()], 0.5);
        assert!(intent.is_clarify());
        assert_eq!(intent.clarify_target(), Some(Capability::MarketPrice));
        assert!(intent.clarify_known().is_empty());
    }

    #[test]
    fn test_clarify_intent_keeps_known_params() {
        let mut known = ToolParams::new();
        known.insert("amount".into(), Value::from(50.0));
        let intent = Intent::clarify(Some(Capability::ExpenseAdd), vec!["category".into()], 0.67)
            .with_known(known.clone());

        assert_eq!(intent.clarify_known(), known);
        assert_eq!(intent.clarify_target(), Some(Capability::ExpenseAdd));
    }

    #[test]
    fn test_partial_envelope_keeps_completed_text() {
        let env = ResponseEnvelope::ok(
            Uuid::new_v4(),
            "s1",
            Payload::text("Logged ₹50.00 for grocery."),
            vec![Capability::ExpenseAdd],
        )
        .into_partial(Capability::GoalProgress, ErrorKind::Transient);

        assert_eq!(env.status, ResponseStatus::Partial);
        assert!(env.payload.text.starts_with("Logged ₹50.00"));
        assert_eq!(env.error.map(|e| e.kind), Some(ErrorKind::Transient));
    }

    #[test]
    fn test_error_envelope_serializes_lowercase_status() {
        let env = ResponseEnvelope::error(Uuid::new_v4(), "s1", ErrorKind::InvalidInput);
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"]["kind"], "invalid_input");
    }
}
