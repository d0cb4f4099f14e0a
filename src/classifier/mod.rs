//! Intent Classifier
//!
//! Maps a query plus its session context onto one of the registered
//! capabilities, or onto CLARIFY when the query is too vague or a required
//! parameter cannot be filled.
//!
//! Scoring is purely lexical: every keyword a tool declares that appears in
//! the query is worth one point, and every typed required parameter the
//! extractor manages to fill is worth one more. Confidence is `s / (s + 1)`,
//! so the same query and context always produce the same intent.

pub mod extract;

pub use extract::Hints;

use crate::config::AgentConfig;
use crate::memory::SessionContext;
use crate::models::{Capability, Intent, Query, ToolParams};
use crate::tools::{ParamKind, ToolDescriptor, ToolRegistry};
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

/// Chaining words that separate independent requests in one query,
/// longest first so " and then " wins over " and ".
const SEGMENT_DELIMITERS: &[&str] = &[" and then ", " and also ", " then ", " and ", ";"];

/// Score given to a follow-up that only names a new parameter value
const FOLLOW_UP_SCORE: usize = 2;

/// What the classifier remembers while walking a query's segments
#[derive(Debug, Clone, Default)]
struct Recall {
    hints: Hints,
    pending: Option<Capability>,
    pending_params: ToolParams,
    last: Option<Capability>,
}

impl Recall {
    fn from_context(ctx: &SessionContext) -> Self {
        Self {
            hints: Hints {
                last_ticker: ctx.last_ticker().map(str::to_string),
                last_goal_id: ctx.last_goal_id(),
            },
            pending: ctx.pending_capability(),
            pending_params: ctx.pending_params(),
            last: ctx.last_capability(),
        }
    }

    /// Carry what `intent` resolved into the next segment.
    fn absorb(&mut self, intent: &Intent) {
        if let Some(ticker) = intent.params.get("ticker").and_then(|v| v.as_str()) {
            self.hints.last_ticker = Some(ticker.to_string());
        }
        if let Some(goal_id) = intent.params.get("goal_id").and_then(|v| v.as_u64()) {
            self.hints.last_goal_id = Some(goal_id);
        }
        if intent.capability.is_tool() {
            self.pending = None;
            self.pending_params.clear();
            self.last = Some(intent.capability);
        }
    }
}

struct Candidate<'a> {
    descriptor: &'a ToolDescriptor,
    order: usize,
    score: usize,
    params: ToolParams,
}

pub struct IntentClassifier {
    registry: Arc<ToolRegistry>,
    threshold: f32,
    max_intents: usize,
}

impl IntentClassifier {
    pub fn new(registry: Arc<ToolRegistry>, config: &AgentConfig) -> Self {
        Self {
            registry,
            threshold: config.confidence_threshold,
            max_intents: config.max_intents_per_query.max(1),
        }
    }

    /// Classify the whole query as a single intent.
    pub fn classify(&self, query: &Query, ctx: &SessionContext) -> Intent {
        self.classify_text(&query.text, &Recall::from_context(ctx))
    }

    /// Classify a query that may chain several requests.
    ///
    /// The query is split on chaining words; the split is kept only when
    /// every segment resolves to a tool and there are no more segments than
    /// the configured maximum. Otherwise the query is one intent.
    pub fn classify_all(&self, query: &Query, ctx: &SessionContext) -> Vec<Intent> {
        let recall = Recall::from_context(ctx);
        let segments = split_segments(&query.text);

        if segments.len() >= 2 && segments.len() <= self.max_intents {
            let mut recall = recall.clone();
            let mut intents = Vec::with_capacity(segments.len());

            for segment in &segments {
                let intent = self.classify_text(segment, &recall);
                if !intent.capability.is_tool() {
                    break;
                }
                recall.absorb(&intent);
                intents.push(intent);
            }

            if intents.len() == segments.len() {
                debug!(
                    query_id = %query.id,
                    intents = intents.len(),
                    "Query split into chained intents"
                );
                return intents;
            }
        }

        vec![self.classify_text(&query.text, &recall)]
    }

    fn classify_text(&self, text: &str, recall: &Recall) -> Intent {
        let padded = format!(" {} ", extract::tokens(text).join(" "));

        let best = self
            .registry
            .list()
            .iter()
            .enumerate()
            .filter_map(|(order, descriptor)| {
                let hits = keyword_hits(descriptor.keywords, &padded);
                if hits == 0 {
                    return None;
                }
                let params = extract::extract_params(descriptor.name, text, &recall.hints);
                let score = hits + typed_fills(descriptor, &params);
                Some(Candidate {
                    descriptor: Arc::as_ref(descriptor),
                    order,
                    score,
                    params,
                })
            })
            .min_by(rank)
            .or_else(|| self.follow_up(text, recall));

        let Some(candidate) = best else {
            debug!(text = %text, "No capability matched");
            return Intent::clarify(None, Vec::new(), 0.0);
        };

        let confidence = confidence(candidate.score);
        if confidence < self.threshold {
            debug!(
                text = %text,
                best = %candidate.descriptor.name,
                confidence,
                "Best match below confidence threshold"
            );
            return Intent::clarify(None, Vec::new(), confidence);
        }

        let Candidate {
            descriptor,
            mut params,
            ..
        } = candidate;
        descriptor.schema.apply_defaults(&mut params);

        let missing = descriptor.schema.missing_required(&params);
        if !missing.is_empty() {
            debug!(
                capability = %descriptor.name,
                missing = ?missing,
                "Required parameters missing"
            );
            return Intent::clarify(Some(descriptor.name), missing, confidence).with_known(params);
        }

        Intent::new(descriptor.name, params, confidence)
    }

    /// A query with no keywords that answers an earlier clarification, or
    /// re-targets the last market question at a new ticker.
    fn follow_up(&self, text: &str, recall: &Recall) -> Option<Candidate<'_>> {
        let tools = self.registry.list();
        let lookup = |capability: Capability| {
            tools
                .iter()
                .enumerate()
                .find(|(_, d)| d.name == capability)
                .map(|(order, d)| (order, Arc::as_ref(d)))
        };

        if let Some((order, descriptor)) = recall.pending.and_then(lookup) {
            // The answer has to come from this text, not from remembered hints.
            let mut answered = !extract::extract_params(descriptor.name, text, &Hints::default()).is_empty();
            let mut params = recall.pending_params.clone();
            params.extend(extract::extract_params(descriptor.name, text, &recall.hints));

            let open_text: Vec<&str> = descriptor
                .schema
                .required()
                .filter(|spec| spec.kind == ParamKind::Text && !params.contains_key(spec.name))
                .map(|spec| spec.name)
                .collect();
            if let [field] = open_text[..] {
                if let Some(answer) = extract::extract_bare_answer(text) {
                    params.insert(field.to_string(), Value::String(answer));
                    answered = true;
                }
            }

            if answered && descriptor.schema.missing_required(&params).is_empty() {
                return Some(Candidate {
                    descriptor,
                    order,
                    score: FOLLOW_UP_SCORE,
                    params,
                });
            }
        }

        extract::extract_ticker(text)?;
        let (order, descriptor) = recall
            .last
            .and_then(lookup)
            .filter(|(_, d)| d.schema.get("ticker").is_some())?;
        let params = extract::extract_params(descriptor.name, text, &recall.hints);

        Some(Candidate {
            descriptor,
            order,
            score: FOLLOW_UP_SCORE,
            params,
        })
    }
}

fn keyword_hits(keywords: &[&str], padded: &str) -> usize {
    keywords
        .iter()
        .filter(|kw| padded.contains(&format!(" {} ", kw)))
        .count()
}

/// Required parameters with a typed value. Free text is excluded since any
/// query can fill it.
fn typed_fills(descriptor: &ToolDescriptor, params: &ToolParams) -> usize {
    descriptor
        .schema
        .required()
        .filter(|spec| spec.kind != ParamKind::Text && params.contains_key(spec.name))
        .count()
}

/// Higher score first, then lower priority value, then registration order.
fn rank(a: &Candidate<'_>, b: &Candidate<'_>) -> Ordering {
    b.score
        .cmp(&a.score)
        .then(a.descriptor.priority.cmp(&b.descriptor.priority))
        .then(a.order.cmp(&b.order))
}

fn confidence(score: usize) -> f32 {
    let s = score as f32;
    s / (s + 1.0)
}

/// Split on chaining words, case-insensitively.
pub fn split_segments(text: &str) -> Vec<String> {
    // ASCII lowercasing keeps byte offsets aligned with `text`.
    let lower = text.to_ascii_lowercase();
    let mut segments = Vec::new();
    let mut start = 0;

    loop {
        let next = SEGMENT_DELIMITERS
            .iter()
            .filter_map(|d| lower[start..].find(d).map(|pos| (start + pos, d.len())))
            .min_by_key(|&(pos, len)| (pos, std::cmp::Reverse(len)));

        let Some((pos, len)) = next else {
            break;
        };
        segments.push(text[start..pos].trim().to_string());
        start = pos + len;
    }
    segments.push(text[start..].trim().to_string());

    segments.retain(|s| !s.is_empty());
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::session::{
        VAR_LAST_CAPABILITY, VAR_LAST_TICKER, VAR_PENDING_CAPABILITY, VAR_PENDING_PARAMS,
    };
    use crate::tools::create_default_registry;
    use crate::tools::finance::FinanceServices;
    use serde_json::json;

    fn classifier() -> IntentClassifier {
        let registry = create_default_registry(FinanceServices::in_memory("₹")).unwrap();
        IntentClassifier::new(Arc::new(registry), &AgentConfig::default())
    }

    fn classify(text: &str, ctx: &SessionContext) -> Intent {
        classifier().classify(&Query::new(text, "s1"), ctx)
    }

    #[test]
    fn test_price_question_with_ticker() {
        let intent = classify("What's the price of AAPL?", &SessionContext::new("s1"));
        assert_eq!(intent.capability, Capability::MarketPrice);
        assert_eq!(intent.params["ticker"], json!("AAPL"));
        assert!(intent.confidence >= AgentConfig::default().confidence_threshold);
    }

    #[test]
    fn test_expense_add_fills_amount_and_category() {
        let intent = classify("add $50 grocery expense", &SessionContext::new("s1"));
        assert_eq!(intent.capability, Capability::ExpenseAdd);
        assert_eq!(intent.params["amount"], json!(50.0));
        assert_eq!(intent.params["category"], json!("grocery"));
    }

    #[test]
    fn test_bare_buy_asks_for_ticker() {
        let intent = classify("buy", &SessionContext::new("s1"));
        assert!(intent.is_clarify());
        assert_eq!(intent.clarify_target(), Some(Capability::MarketPrice));
        assert_eq!(intent.missing, vec!["ticker"]);
    }

    #[test]
    fn test_unrelated_text_clarifies_without_target() {
        let intent = classify("hello there", &SessionContext::new("s1"));
        assert!(intent.is_clarify());
        assert!(intent.clarify_target().is_none());
        assert_eq!(intent.confidence, 0.0);
    }

    #[test]
    fn test_ticker_comes_from_context() {
        let mut ctx = SessionContext::new("s1");
        ctx.set_var(VAR_LAST_TICKER, json!("TSLA"));

        let intent = classify("any news on it?", &ctx);
        assert_eq!(intent.capability, Capability::MarketNews);
        assert_eq!(intent.params["ticker"], json!("TSLA"));
    }

    #[test]
    fn test_pending_clarification_is_answered() {
        let mut ctx = SessionContext::new("s1");
        ctx.set_var(VAR_PENDING_CAPABILITY, json!("market_price"));

        let intent = classify("AAPL", &ctx);
        assert_eq!(intent.capability, Capability::MarketPrice);
        assert_eq!(intent.params["ticker"], json!("AAPL"));
    }

    #[test]
    fn test_expense_without_category_keeps_amount() {
        let intent = classify("add $50 expense", &SessionContext::new("s1"));
        assert!(intent.is_clarify());
        assert_eq!(intent.clarify_target(), Some(Capability::ExpenseAdd));
        assert_eq!(intent.missing, vec!["category"]);
        assert_eq!(intent.clarify_known().get("amount"), Some(&json!(50.0)));
    }

    #[test]
    fn test_category_reply_completes_pending_expense() {
        let mut ctx = SessionContext::new("s1");
        ctx.set_var(VAR_PENDING_CAPABILITY, json!("expense_add"));
        ctx.set_var(VAR_PENDING_PARAMS, json!({"amount": 50.0}));

        for reply in ["groceries", "for groceries"] {
            let intent = classify(reply, &ctx);
            assert_eq!(intent.capability, Capability::ExpenseAdd, "reply {:?}", reply);
            assert_eq!(intent.params["amount"], json!(50.0));
            assert_eq!(intent.params["category"], json!("groceries"));
        }
    }

    #[test]
    fn test_long_reply_is_not_a_bare_answer() {
        let mut ctx = SessionContext::new("s1");
        ctx.set_var(VAR_PENDING_CAPABILITY, json!("expense_add"));
        ctx.set_var(VAR_PENDING_PARAMS, json!({"amount": 50.0}));

        let intent = classify("hmm not sure what to call it", &ctx);
        assert!(intent.is_clarify());
    }

    #[test]
    fn test_follow_up_reuses_last_market_capability() {
        let mut ctx = SessionContext::new("s1");
        ctx.set_var(VAR_LAST_CAPABILITY, json!("market_news"));
        ctx.set_var(VAR_LAST_TICKER, json!("AAPL"));

        let intent = classify("what about MSFT?", &ctx);
        assert_eq!(intent.capability, Capability::MarketNews);
        assert_eq!(intent.params["ticker"], json!("MSFT"));
    }

    #[test]
    fn test_tie_breaks_on_priority() {
        // "summary" and "show" score one point each; summary has the lower priority value.
        let intent = classify("show summary", &SessionContext::new("s1"));
        assert_eq!(intent.capability, Capability::ExpenseSummary);
        assert_eq!(intent.params["period_days"], json!(30));
    }

    #[test]
    fn test_classification_is_deterministic() {
        let classifier = classifier();
        let ctx = SessionContext::new("s1");
        let query = Query::new("how much did i spend on food last week", "s1");
        let first = classifier.classify(&query, &ctx);
        for _ in 0..20 {
            assert_eq!(classifier.classify(&query, &ctx), first);
        }
        assert_eq!(first.capability, Capability::ExpenseQuery);
        assert_eq!(first.params["period_days"], json!(7));
    }

    #[test]
    fn test_chained_query_yields_ordered_intents() {
        let classifier = classifier();
        let query = Query::new("add $50 grocery expense and then show my spending summary", "s1");
        let intents = classifier.classify_all(&query, &SessionContext::new("s1"));

        let caps: Vec<_> = intents.iter().map(|i| i.capability).collect();
        assert_eq!(caps, vec![Capability::ExpenseAdd, Capability::ExpenseSummary]);
    }

    #[test]
    fn test_chained_ticker_carries_to_next_segment() {
        let classifier = classifier();
        let query = Query::new("price of AAPL and MSFT", "s1");
        let intents = classifier.classify_all(&query, &SessionContext::new("s1"));

        assert_eq!(intents.len(), 2);
        assert_eq!(intents[0].params["ticker"], json!("AAPL"));
        assert_eq!(intents[1].capability, Capability::MarketPrice);
        assert_eq!(intents[1].params["ticker"], json!("MSFT"));
    }

    #[test]
    fn test_unresolvable_split_falls_back_to_single_intent() {
        let classifier = classifier();
        let query = Query::new("search for stocks and bonds", "s1");
        let intents = classifier.classify_all(&query, &SessionContext::new("s1"));

        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].capability, Capability::WebSearch);
        assert_eq!(intents[0].params["text"], json!("stocks and bonds"));
    }

    #[test]
    fn test_too_many_segments_is_one_query() {
        let classifier = classifier();
        let query = Query::new(
            "price of AAPL and MSFT and TSLA and NVDA and AMZN",
            "s1",
        );
        let intents = classifier.classify_all(&query, &SessionContext::new("s1"));
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].params["ticker"], json!("AAPL"));
    }

    #[test]
    fn test_split_segments() {
        assert_eq!(
            split_segments("Log $5 coffee AND THEN show expenses; news on TSLA"),
            vec!["Log $5 coffee", "show expenses", "news on TSLA"]
        );
        assert_eq!(split_segments("just one"), vec!["just one"]);
    }
}
