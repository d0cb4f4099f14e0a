//! Scripted tools shared by unit tests

use crate::error::OrchestrationError;
use crate::models::ToolParams;
use crate::tools::{InvocationContext, Tool};
use crate::Result;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub(crate) enum Scripted {
    Ok(Value),
    Transient,
    Permanent,
    /// Sleep before answering; used to trip invocation timeouts
    Sleep(Duration, Value),
    Panic,
}

/// Replays a fixed sequence of outcomes, then repeats `fallback`
pub(crate) struct ScriptedTool {
    script: Mutex<VecDeque<Scripted>>,
    fallback: Scripted,
    calls: AtomicU32,
}

impl ScriptedTool {
    pub(crate) fn new(script: Vec<Scripted>, fallback: Scripted) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicU32::new(0),
        }
    }

    pub(crate) fn always_ok(value: Value) -> Self {
        Self::new(Vec::new(), Scripted::Ok(value))
    }

    pub(crate) fn always(outcome: Scripted) -> Self {
        Self::new(Vec::new(), outcome)
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next(&self) -> Scripted {
        let mut script = self.script.lock().unwrap();
        script.pop_front().unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait::async_trait]
impl Tool for ScriptedTool {
    async fn invoke(&self, _ctx: &InvocationContext, _params: &ToolParams) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.next() {
            Scripted::Ok(value) => Ok(value),
            Scripted::Transient => Err(OrchestrationError::TransientTool(
                "upstream 503".to_string(),
            )),
            Scripted::Permanent => Err(OrchestrationError::PermanentTool(
                "upstream rejected credentials".to_string(),
            )),
            Scripted::Sleep(delay, value) => {
                tokio::time::sleep(delay).await;
                Ok(value)
            }
            Scripted::Panic => panic!("scripted tool blew up"),
        }
    }
}
