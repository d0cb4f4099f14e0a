//! Main orchestrator - drives one turn through the state machine
//!
//! CLASSIFYING → {EXECUTING, CLARIFYING} → {AGGREGATING, RETRYING, FAILED} → DONE
//!
//! The orchestrator is the only place where internal errors become
//! user-visible envelopes. Whatever happens, a turn ends in DONE with an
//! envelope whose status is `ok`, `partial` or `error`.

use crate::aggregator::ResultAggregator;
use crate::audit::{AuditLog, TurnRecord};
use crate::classifier::IntentClassifier;
use crate::config::AgentConfig;
use crate::error::OrchestrationError;
use crate::execution::ExecutionEngine;
use crate::memory::session::{
    VAR_LAST_CAPABILITY, VAR_LAST_GOAL_ID, VAR_LAST_TICKER, VAR_PENDING_CAPABILITY,
    VAR_PENDING_PARAMS,
};
use crate::memory::{validate_session_id, ContextStore, SessionContext, Turn};
use crate::models::{
    Capability, Clarification, ExecutionStep, Intent, Query, ResponseEnvelope, TurnState,
};
use crate::tools::ToolRegistry;
use crate::Result;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Everything that happened during one turn, for the audit record
#[derive(Default)]
struct TurnTrace {
    intents: Vec<Intent>,
    steps: Vec<ExecutionStep>,
    states: Vec<TurnState>,
}

/// Question asked when a required parameter could not be filled
fn question_for(field: &str) -> String {
    match field {
        "ticker" => "Which stock ticker do you mean (for example AAPL)?".to_string(),
        "amount" => "How much was it?".to_string(),
        "category" => "What category should I file it under?".to_string(),
        "goal_text" => "What goal would you like to set?".to_string(),
        "text" => "What should I search for?".to_string(),
        other => format!("Could you tell me the {}?", other.replace('_', " ")),
    }
}

pub struct Orchestrator {
    registry: Arc<ToolRegistry>,
    contexts: Arc<ContextStore>,
    classifier: IntentClassifier,
    execution_engine: ExecutionEngine,
    aggregator: ResultAggregator,
    audit_log: AuditLog,
    config: AgentConfig,
}

impl Orchestrator {
    pub fn new(registry: Arc<ToolRegistry>, contexts: Arc<ContextStore>, config: AgentConfig) -> Self {
        Self {
            classifier: IntentClassifier::new(Arc::clone(&registry), &config),
            execution_engine: ExecutionEngine::new(config.clone()),
            aggregator: ResultAggregator::new(Arc::clone(&registry)),
            audit_log: AuditLog::default(),
            registry,
            contexts,
            config,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn contexts(&self) -> &Arc<ContextStore> {
        &self.contexts
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit_log
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Handle one query for a session.
    pub async fn handle(&self, text: &str, session_id: &str) -> ResponseEnvelope {
        self.handle_with_cancel(text, session_id, &CancellationToken::new())
            .await
    }

    /// Handle one query, giving up early once `cancel` fires.
    pub async fn handle_with_cancel(
        &self,
        text: &str,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> ResponseEnvelope {
        let start = Instant::now();
        let query = Query::new(text.trim(), session_id);
        let mut trace = TurnTrace::default();

        info!(
            query_id = %query.id,
            session_id = %query.session_id,
            "Orchestrator: handling query"
        );

        let envelope = match self.validate(&query) {
            Ok(()) => self.run_turn(&query, cancel, &mut trace).await,
            Err(e) => self.fail(&query, &e, &mut trace),
        };
        trace.states.push(TurnState::Done);

        let execution_time_ms = start.elapsed().as_millis() as u64;
        info!(
            query_id = %query.id,
            session_id = %query.session_id,
            status = ?envelope.status,
            tools = ?envelope.source_tools,
            attempts = trace.steps.len(),
            execution_time_ms,
            "Orchestrator: turn complete"
        );

        let record = TurnRecord::new(
            query,
            trace.intents,
            trace.steps,
            trace.states,
            envelope.clone(),
            execution_time_ms,
        );
        self.audit_log.record(record).await;

        envelope
    }

    fn validate(&self, query: &Query) -> Result<()> {
        validate_session_id(&query.session_id)?;

        if query.text.is_empty() {
            return Err(OrchestrationError::InvalidInput(
                "query text is empty".to_string(),
            ));
        }
        let chars = query.text.chars().count();
        if chars > self.config.max_query_chars {
            return Err(OrchestrationError::InvalidInput(format!(
                "query has {} characters, limit is {}",
                chars, self.config.max_query_chars
            )));
        }
        Ok(())
    }

    async fn run_turn(
        &self,
        query: &Query,
        cancel: &CancellationToken,
        trace: &mut TurnTrace,
    ) -> ResponseEnvelope {
        let locked = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(OrchestrationError::Cancelled(
                "cancelled while waiting for the session".to_string(),
            )),
            locked = self.contexts.lock(&query.session_id) => locked,
        };
        let mut session = match locked {
            Ok(session) => session,
            Err(e) => return self.fail(query, &e, trace),
        };

        // === CLASSIFY ===
        trace.states.push(TurnState::Classifying);
        let intents = self.classifier.classify_all(query, &session);
        debug!(
            query_id = %query.id,
            intents = ?intents.iter().map(|i| i.capability).collect::<Vec<_>>(),
            "Query classified"
        );

        let envelope = match intents.first() {
            Some(intent) if intent.is_clarify() => {
                trace.states.push(TurnState::Clarifying);
                self.clarify(query, intent)
            }
            _ => self.execute_all(query, &intents, cancel, trace).await,
        };

        remember(&mut session, &intents, &trace.steps);
        session.append_turn(
            Turn {
                query: query.clone(),
                response: envelope.clone(),
            },
            self.contexts.window(),
        );
        trace.intents = intents;

        envelope
    }

    /// Run intents in order, stopping at the first failure.
    async fn execute_all(
        &self,
        query: &Query,
        intents: &[Intent],
        cancel: &CancellationToken,
        trace: &mut TurnTrace,
    ) -> ResponseEnvelope {
        let mut failure: Option<(Capability, OrchestrationError)> = None;

        for (index, intent) in intents.iter().enumerate() {
            // === EXECUTE ===
            trace.states.push(TurnState::Executing);

            let descriptor = match self.registry.resolve_capability(intent.capability) {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    failure = Some((intent.capability, e));
                    break;
                }
            };

            let outcome = self
                .execution_engine
                .execute(index, intent, &descriptor, query, cancel, &mut trace.states)
                .await;
            trace.steps.extend(outcome.attempts);

            if let Err(e) = outcome.result {
                failure = Some((intent.capability, e));
                break;
            }
        }

        let Some((failed_tool, err)) = failure else {
            // === AGGREGATE ===
            trace.states.push(TurnState::Aggregating);
            return self
                .aggregator
                .aggregate(query.id, &query.session_id, &trace.steps);
        };

        warn!(
            query_id = %query.id,
            tool = %failed_tool,
            error = %err,
            "Step failed"
        );
        trace.states.push(TurnState::Failed);

        if trace.steps.iter().any(ExecutionStep::succeeded) {
            self.aggregator
                .aggregate(query.id, &query.session_id, &trace.steps)
                .into_partial(failed_tool, err.kind())
        } else {
            ResponseEnvelope::error(query.id, &query.session_id, err.kind())
        }
    }

    fn clarify(&self, query: &Query, intent: &Intent) -> ResponseEnvelope {
        let target = intent.clarify_target();

        let text = match target {
            Some(capability) if !intent.missing.is_empty() => {
                let questions: Vec<String> =
                    intent.missing.iter().map(|f| question_for(f)).collect();
                format!(
                    "I can help with {}. {}",
                    capability.name().replace('_', " "),
                    questions.join(" ")
                )
            }
            _ => {
                let options: Vec<String> = self
                    .registry
                    .list()
                    .iter()
                    .map(|d| d.description.to_lowercase())
                    .collect();
                format!(
                    "I'm not sure what you'd like me to do. I can: {}.",
                    options.join("; ")
                )
            }
        };

        ResponseEnvelope::clarify(
            query.id,
            &query.session_id,
            text,
            Clarification {
                capability: target,
                missing: intent.missing.clone(),
            },
        )
    }

    fn fail(&self, query: &Query, err: &OrchestrationError, trace: &mut TurnTrace) -> ResponseEnvelope {
        warn!(
            query_id = %query.id,
            session_id = %query.session_id,
            error = %err,
            "Query rejected"
        );
        trace.states.push(TurnState::Failed);
        ResponseEnvelope::error(query.id, &query.session_id, err.kind())
    }
}

/// Update the working variables follow-up questions rely on.
fn remember(session: &mut SessionContext, intents: &[Intent], steps: &[ExecutionStep]) {
    if let Some(intent) = intents.first().filter(|i| i.is_clarify()) {
        session.remove_var(VAR_PENDING_PARAMS);
        match intent.clarify_target() {
            Some(target) => {
                session.set_var(VAR_PENDING_CAPABILITY, json!(target.name()));
                let known = intent.clarify_known();
                if !known.is_empty() {
                    session.set_var(VAR_PENDING_PARAMS, Value::Object(known));
                }
            }
            None => {
                session.remove_var(VAR_PENDING_CAPABILITY);
            }
        }
        return;
    }
    session.remove_var(VAR_PENDING_CAPABILITY);
    session.remove_var(VAR_PENDING_PARAMS);

    for step in steps {
        if let Some(ticker) = step.params.get("ticker").and_then(Value::as_str) {
            session.set_var(VAR_LAST_TICKER, json!(ticker));
        }
        if !step.succeeded() {
            continue;
        }

        session.set_var(VAR_LAST_CAPABILITY, json!(step.tool.name()));

        let goal_id = step
            .params
            .get("goal_id")
            .and_then(Value::as_u64)
            .or_else(|| {
                step.result
                    .as_ref()
                    .and_then(|r| r.get("goal_id"))
                    .and_then(Value::as_u64)
            });
        if let Some(goal_id) = goal_id {
            session.set_var(VAR_LAST_GOAL_ID, json!(goal_id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::{ResponseStatus, StepStatus, ToolParams};
    use crate::test_support::{Scripted, ScriptedTool};
    use crate::tools::finance::FinanceServices;
    use crate::tools::{
        create_default_registry, InvocationContext, ParamKind, ParamSchema, ParamSpec, Tool,
        ToolDescriptor,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn test_config() -> AgentConfig {
        AgentConfig {
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(5),
            ..AgentConfig::default()
        }
    }

    fn build(registry: ToolRegistry, config: AgentConfig) -> Orchestrator {
        let contexts = Arc::new(ContextStore::from_config(&config));
        Orchestrator::new(Arc::new(registry), contexts, config)
    }

    fn demo() -> Orchestrator {
        let registry = create_default_registry(FinanceServices::in_memory("₹")).unwrap();
        build(registry, test_config())
    }

    fn ticker_tool(name: Capability, keywords: &'static [&'static str], tool: Arc<dyn Tool>) -> ToolDescriptor {
        ToolDescriptor::new(name, "Scripted market tool", tool)
            .with_schema(ParamSchema::new(vec![ParamSpec::required(
                "ticker",
                ParamKind::Ticker,
                "symbol",
            )]))
            .idempotent(true)
            .with_timeout(Duration::from_millis(30))
            .with_keywords(keywords)
    }

    fn scripted(descriptors: Vec<ToolDescriptor>) -> Orchestrator {
        let mut registry = ToolRegistry::new();
        for descriptor in descriptors {
            registry.register(descriptor).unwrap();
        }
        build(registry, test_config())
    }

    #[tokio::test]
    async fn test_price_query_returns_numeric_price() {
        let agent = demo();
        let env = agent.handle("What's the price of AAPL?", "u1").await;

        assert_eq!(env.status, ResponseStatus::Ok);
        assert_eq!(env.source_tools, vec![Capability::MarketPrice]);
        let data = env.payload.data.unwrap();
        assert!(data["price"].is_number());
        assert!(env.payload.text.contains("189.84"));
    }

    #[tokio::test]
    async fn test_expense_is_logged() {
        let agent = demo();
        let env = agent.handle("add $50 grocery expense", "u1").await;

        assert_eq!(env.status, ResponseStatus::Ok);
        assert_eq!(env.source_tools, vec![Capability::ExpenseAdd]);
        assert!(env.payload.text.contains("50.00"));
        assert!(env.payload.text.contains("grocery"));
    }

    #[tokio::test]
    async fn test_bare_buy_asks_for_ticker_without_invoking() {
        let tool = Arc::new(ScriptedTool::always_ok(json!({"price": 1.0})));
        let agent = scripted(vec![ticker_tool(Capability::MarketPrice, &["buy", "price"], tool.clone())]);

        let env = agent.handle("buy", "u1").await;

        assert_eq!(env.status, ResponseStatus::Ok);
        let clarification = env.clarification.clone().unwrap();
        assert_eq!(clarification.capability, Some(Capability::MarketPrice));
        assert_eq!(clarification.missing, vec!["ticker"]);
        assert!(env.payload.text.contains("ticker"));
        assert!(env.source_tools.is_empty());
        assert_eq!(tool.calls(), 0);

        let record = agent.audit_log().for_query(env.query_id).await.unwrap();
        assert!(record.steps.is_empty());
        assert_eq!(
            record.states,
            vec![TurnState::Classifying, TurnState::Clarifying, TurnState::Done]
        );
    }

    #[tokio::test]
    async fn test_clarification_answer_completes_the_request() {
        let agent = demo();
        let first = agent.handle("buy", "u1").await;
        assert!(first.is_clarification());

        let second = agent.handle("AAPL", "u1").await;
        assert_eq!(second.status, ResponseStatus::Ok);
        assert_eq!(second.source_tools, vec![Capability::MarketPrice]);

        let ctx = agent.contexts().get_or_create("u1").await.unwrap();
        assert!(ctx.pending_capability().is_none());
        assert_eq!(ctx.last_ticker(), Some("AAPL"));
    }

    #[tokio::test]
    async fn test_category_answer_completes_pending_expense() {
        let agent = demo();
        let first = agent.handle("add $50 expense", "u1").await;
        let clarification = first.clarification.clone().unwrap();
        assert_eq!(clarification.capability, Some(Capability::ExpenseAdd));
        assert_eq!(clarification.missing, vec!["category"]);

        let second = agent.handle("groceries", "u1").await;
        assert_eq!(second.status, ResponseStatus::Ok);
        assert_eq!(second.source_tools, vec![Capability::ExpenseAdd]);
        assert!(second.payload.text.contains("50.00"));
        assert!(second.payload.text.contains("groceries"));

        let ctx = agent.contexts().get_or_create("u1").await.unwrap();
        assert!(ctx.pending_capability().is_none());
        assert!(ctx.pending_params().is_empty());
    }

    #[tokio::test]
    async fn test_panicking_tool_ends_in_error_envelope() {
        let tool = Arc::new(ScriptedTool::always(Scripted::Panic));
        let agent = scripted(vec![ticker_tool(Capability::MarketPrice, &["price"], tool.clone())]);

        let env = agent.handle("price of AAPL", "u1").await;

        assert_eq!(env.status, ResponseStatus::Error);
        assert_eq!(env.error.as_ref().map(|e| e.kind), Some(ErrorKind::Internal));
        // Internal errors are not retried.
        assert_eq!(tool.calls(), 1);

        let record = agent.audit_log().for_query(env.query_id).await.unwrap();
        assert_eq!(record.steps.len(), 1);
        assert_eq!(record.steps[0].status, StepStatus::Failed);
        assert_eq!(record.states.last(), Some(&TurnState::Done));
        assert_eq!(agent.audit_log().len().await, 1);

        // The session is still usable afterwards.
        let ctx = agent.contexts().get_or_create("u1").await.unwrap();
        assert_eq!(ctx.turn_count(), 1);
    }

    #[tokio::test]
    async fn test_timeouts_exhaust_budget_of_two() {
        let slow = Scripted::Sleep(Duration::from_millis(300), json!({"price": 1.0}));
        let tool = Arc::new(ScriptedTool::new(
            vec![slow.clone(), slow],
            Scripted::Ok(json!({"ticker": "AAPL", "price": 189.84})),
        ));
        let agent = scripted(vec![ticker_tool(Capability::MarketPrice, &["price"], tool.clone())]);

        let env = agent.handle("price of AAPL", "u1").await;

        assert_eq!(env.status, ResponseStatus::Error);
        assert_eq!(env.error.as_ref().map(|e| e.kind), Some(ErrorKind::Timeout));
        assert_eq!(tool.calls(), 2);

        let record = agent.audit_log().for_query(env.query_id).await.unwrap();
        assert_eq!(record.steps.len(), 2);
        assert!(record.steps.iter().all(|s| s.status == StepStatus::Failed));
        assert!(record.states.contains(&TurnState::Retrying));
        assert_eq!(record.states.last(), Some(&TurnState::Done));
    }

    #[tokio::test]
    async fn test_attempts_equal_retry_budget() {
        let tool = Arc::new(ScriptedTool::always(Scripted::Transient));
        let mut registry = ToolRegistry::new();
        registry
            .register(ticker_tool(Capability::MarketPrice, &["price"], tool.clone()))
            .unwrap();
        let agent = build(
            registry,
            AgentConfig {
                retry_budget: 4,
                ..test_config()
            },
        );

        let env = agent.handle("price of MSFT", "u1").await;
        assert_eq!(env.status, ResponseStatus::Error);
        assert_eq!(env.error.map(|e| e.kind), Some(ErrorKind::Transient));
        assert_eq!(tool.calls(), 4);
    }

    #[tokio::test]
    async fn test_later_failure_yields_partial() {
        let price = Arc::new(ScriptedTool::always_ok(json!({"ticker": "AAPL", "price": 189.84})));
        let news = Arc::new(ScriptedTool::always(Scripted::Permanent));
        let agent = scripted(vec![
            ticker_tool(Capability::MarketPrice, &["price"], price),
            ticker_tool(Capability::MarketNews, &["news"], news.clone()),
        ]);

        let env = agent.handle("price of AAPL and then news on AAPL", "u1").await;

        assert_eq!(env.status, ResponseStatus::Partial);
        assert_eq!(env.source_tools, vec![Capability::MarketPrice]);
        assert_eq!(env.error.as_ref().map(|e| e.kind), Some(ErrorKind::Permanent));
        assert_eq!(news.calls(), 1);
        // Internal failure text stays out of the envelope.
        assert!(!env.payload.text.contains("credentials"));
    }

    #[tokio::test]
    async fn test_first_step_failure_is_error() {
        let price = Arc::new(ScriptedTool::always(Scripted::Permanent));
        let news = Arc::new(ScriptedTool::always_ok(json!({})));
        let agent = scripted(vec![
            ticker_tool(Capability::MarketPrice, &["price"], price),
            ticker_tool(Capability::MarketNews, &["news"], news.clone()),
        ]);

        let env = agent.handle("price of AAPL and then news on AAPL", "u1").await;

        assert_eq!(env.status, ResponseStatus::Error);
        assert_eq!(news.calls(), 0);
        assert!(!env.payload.text.contains("credentials"));
    }

    #[tokio::test]
    async fn test_chained_ledger_steps_all_succeed() {
        let agent = demo();
        agent.handle("set a goal to save 5000 this month", "u1").await;

        let env = agent
            .handle("spent 200 rupees on groceries and then how is my goal progress", "u1")
            .await;

        assert_eq!(env.status, ResponseStatus::Ok);
        assert_eq!(
            env.source_tools,
            vec![Capability::ExpenseAdd, Capability::GoalProgress]
        );
        let steps = &env.payload.data.unwrap()["steps"];
        assert_eq!(steps.as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn test_malformed_input_is_rejected_without_touching_sessions() {
        let agent = demo();

        let env = agent.handle("price of AAPL", "not a valid id").await;
        assert_eq!(env.status, ResponseStatus::Error);
        assert_eq!(env.error.map(|e| e.kind), Some(ErrorKind::InvalidSession));

        let env = agent.handle("   ", "u1").await;
        assert_eq!(env.error.map(|e| e.kind), Some(ErrorKind::InvalidInput));

        let huge = "a".repeat(agent.config().max_query_chars + 1);
        let env = agent.handle(&huge, "u1").await;
        assert_eq!(env.error.map(|e| e.kind), Some(ErrorKind::InvalidInput));

        assert_eq!(agent.contexts().session_count().await, 0);
        assert_eq!(agent.audit_log().len().await, 3);
    }

    #[tokio::test]
    async fn test_cancellation_during_invocation() {
        let tool = Arc::new(ScriptedTool::always(Scripted::Sleep(
            Duration::from_secs(5),
            Value::Null,
        )));
        let mut registry = ToolRegistry::new();
        registry
            .register(
                ticker_tool(Capability::MarketPrice, &["price"], tool)
                    .with_timeout(Duration::from_secs(10)),
            )
            .unwrap();
        let agent = build(registry, test_config());

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let env = agent.handle_with_cancel("price of AAPL", "u1", &cancel).await;
        assert_eq!(env.status, ResponseStatus::Error);
        assert_eq!(env.error.map(|e| e.kind), Some(ErrorKind::Cancelled));

        // The cancelled turn is still part of the history.
        let ctx = agent.contexts().get_or_create("u1").await.unwrap();
        assert_eq!(ctx.turn_count(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_while_waiting_for_session() {
        let agent = demo();
        let held = agent.contexts().lock("u1").await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let env = agent.handle_with_cancel("price of AAPL", "u1", &cancel).await;

        assert_eq!(env.error.map(|e| e.kind), Some(ErrorKind::Cancelled));
        assert_eq!(held.turn_count(), 0);
    }

    /// Counts how many invocations overlap
    struct Gauge {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Tool for Gauge {
        async fn invoke(&self, _ctx: &InvocationContext, _params: &ToolParams) -> Result<Value> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(json!({"ticker": "AAPL", "price": 1.0}))
        }
    }

    fn gauged_agent() -> (Orchestrator, Arc<Gauge>) {
        let gauge = Arc::new(Gauge {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let mut registry = ToolRegistry::new();
        registry
            .register(
                ticker_tool(Capability::MarketPrice, &["price"], gauge.clone())
                    .with_timeout(Duration::from_secs(1)),
            )
            .unwrap();
        (build(registry, test_config()), gauge)
    }

    #[tokio::test]
    async fn test_same_session_queries_are_serialized() {
        let (agent, gauge) = gauged_agent();
        let (a, b) = tokio::join!(
            agent.handle("price of AAPL", "u1"),
            agent.handle("price of MSFT", "u1"),
        );

        assert_eq!(a.status, ResponseStatus::Ok);
        assert_eq!(b.status, ResponseStatus::Ok);
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 1);

        let ctx = agent.contexts().get_or_create("u1").await.unwrap();
        assert_eq!(ctx.turn_count(), 2);
    }

    #[tokio::test]
    async fn test_different_sessions_run_concurrently() {
        let (agent, gauge) = gauged_agent();
        let (a, b) = tokio::join!(
            agent.handle("price of AAPL", "u1"),
            agent.handle("price of MSFT", "u2"),
        );

        assert_eq!(a.status, ResponseStatus::Ok);
        assert_eq!(b.status, ResponseStatus::Ok);
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_history_stays_within_window() {
        let registry = create_default_registry(FinanceServices::in_memory("₹")).unwrap();
        let agent = build(
            registry,
            AgentConfig {
                history_window: 3,
                ..test_config()
            },
        );

        for _ in 0..10 {
            agent.handle("What's the price of AAPL?", "u1").await;
        }
        let ctx = agent.contexts().get_or_create("u1").await.unwrap();
        assert_eq!(ctx.turn_count(), 3);
    }

    #[tokio::test]
    async fn test_audit_records_are_intact() {
        let agent = demo();
        let env = agent.handle("What's the price of AAPL?", "u1").await;

        let ids = agent.audit_log().list_for_session("u1").await;
        assert_eq!(ids.len(), 1);
        assert!(agent.audit_log().verify_integrity(ids[0]).await);

        let record = agent.audit_log().get(ids[0]).await.unwrap();
        assert_eq!(record.envelope, env);
        assert_eq!(
            record.states,
            vec![
                TurnState::Classifying,
                TurnState::Executing,
                TurnState::Aggregating,
                TurnState::Done
            ]
        );
    }
}
