//! Result Aggregator
//!
//! Turns the succeeded execution steps of a query into one response
//! envelope. Formatting never fails: a formatter that errors or panics is
//! replaced by a generic summary so a turn can always finish.

use crate::models::{Capability, ExecutionStep, Payload, ResponseEnvelope};
use crate::tools::ToolRegistry;
use serde_json::{json, Value};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

pub struct ResultAggregator {
    registry: Arc<ToolRegistry>,
}

impl ResultAggregator {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// Build an `ok` envelope from the steps that succeeded, in order.
    pub fn aggregate(&self, query_id: Uuid, session_id: &str, steps: &[ExecutionStep]) -> ResponseEnvelope {
        let formatted: Vec<(Capability, Payload)> = steps
            .iter()
            .filter(|step| step.succeeded())
            .map(|step| {
                let raw = step.result.clone().unwrap_or(Value::Null);
                (step.tool, self.format(step.tool, raw))
            })
            .collect();

        let source_tools = formatted.iter().map(|(tool, _)| *tool).collect();

        let payload = match formatted.len() {
            0 => Payload::text("There was nothing to report for that request."),
            1 => formatted.into_iter().map(|(_, payload)| payload).next().unwrap_or_default(),
            _ => {
                let text = formatted
                    .iter()
                    .map(|(_, payload)| payload.text.as_str())
                    .collect::<Vec<_>>()
                    .join("\n\n");
                let data = formatted
                    .into_iter()
                    .map(|(tool, payload)| {
                        json!({
                            "tool": tool,
                            "text": payload.text,
                            "data": payload.data,
                        })
                    })
                    .collect::<Vec<_>>();
                Payload::with_data(text, json!({ "steps": data }))
            }
        };

        ResponseEnvelope::ok(query_id, session_id, payload, source_tools)
    }

    fn format(&self, tool: Capability, raw: Value) -> Payload {
        let formatter = self
            .registry
            .resolve_capability(tool)
            .ok()
            .and_then(|descriptor| descriptor.formatter.clone());

        let Some(formatter) = formatter else {
            return generic(tool, raw);
        };

        match catch_unwind(AssertUnwindSafe(|| formatter.format(&raw))) {
            Ok(Ok(payload)) => payload,
            Ok(Err(e)) => {
                warn!(tool = %tool, error = %e, "Formatter failed, using generic summary");
                generic(tool, raw)
            }
            Err(_) => {
                warn!(tool = %tool, "Formatter panicked, using generic summary");
                generic(tool, raw)
            }
        }
    }
}

fn generic(tool: Capability, raw: Value) -> Payload {
    Payload::with_data(format!("{} completed successfully.", tool), raw)
}
