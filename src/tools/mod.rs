//! Tool trait and registry
//!
//! Each capability is backed by exactly one `ToolDescriptor`, registered at
//! startup. After that the registry is shared read-only behind an `Arc`.

pub mod finance;
pub mod insights;
pub mod schema;

pub use finance::create_default_registry;
pub use schema::{ParamKind, ParamSchema, ParamSpec};

use crate::error::OrchestrationError;
use crate::models::{Capability, Payload, ToolParams};
use crate::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// What a tool knows about the call it is serving
#[derive(Debug, Clone)]
pub struct InvocationContext {
    /// Also the ledger user id: every session acts on its own records
    pub session_id: String,
    pub query_id: Uuid,
    pub attempt: u32,
}

/// Uniform invocation interface for every capability
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    async fn invoke(&self, ctx: &InvocationContext, params: &ToolParams) -> Result<Value>;
}

/// Turns a tool's raw result into the common `{text, data}` payload
pub trait ResultFormatter: Send + Sync {
    fn format(&self, result: &Value) -> Result<Payload>;
}

pub struct ToolDescriptor {
    pub name: Capability,
    pub description: &'static str,
    pub schema: ParamSchema,
    pub handler: Arc<dyn Tool>,
    pub formatter: Option<Arc<dyn ResultFormatter>>,
    /// Safe to invoke more than once for the same intent
    pub idempotent: bool,
    /// Falls back to the configured default when unset
    pub timeout: Option<Duration>,
    /// Lower value wins classification ties
    pub priority: u8,
    /// Words and phrases that point the classifier at this tool
    pub keywords: &'static [&'static str],
    /// Provider-imposed cap on attempts per step
    pub max_attempts: Option<u32>,
}

impl ToolDescriptor {
    pub fn new(name: Capability, description: &'static str, handler: Arc<dyn Tool>) -> Self {
        Self {
            name,
            description,
            schema: ParamSchema::default(),
            handler,
            formatter: None,
            idempotent: false,
            timeout: None,
            priority: u8::MAX,
            keywords: &[],
            max_attempts: None,
        }
    }

    pub fn with_schema(mut self, schema: ParamSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_formatter(mut self, formatter: Arc<dyn ResultFormatter>) -> Self {
        self.formatter = Some(formatter);
        self
    }

    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_keywords(mut self, keywords: &'static [&'static str]) -> Self {
        self.keywords = keywords;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts.max(1));
        self
    }
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("idempotent", &self.idempotent)
            .field("timeout", &self.timeout)
            .field("priority", &self.priority)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

/// Tool registry for looking up tools by capability
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<ToolDescriptor>>,
    index: HashMap<Capability, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: ToolDescriptor) -> Result<()> {
        if !descriptor.name.is_tool() {
            return Err(OrchestrationError::InvalidInput(format!(
                "'{}' is reserved and cannot be registered",
                descriptor.name
            )));
        }
        if self.index.contains_key(&descriptor.name) {
            return Err(OrchestrationError::DuplicateTool(
                descriptor.name.to_string(),
            ));
        }

        self.index.insert(descriptor.name, self.tools.len());
        self.tools.push(Arc::new(descriptor));
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<ToolDescriptor>> {
        let capability: Capability = name
            .parse()
            .map_err(|_| OrchestrationError::UnknownTool(name.to_string()))?;
        self.resolve_capability(capability)
    }

    pub fn resolve_capability(&self, capability: Capability) -> Result<Arc<ToolDescriptor>> {
        self.index
            .get(&capability)
            .map(|&i| Arc::clone(&self.tools[i]))
            .ok_or_else(|| OrchestrationError::UnknownTool(capability.to_string()))
    }

    /// Descriptors in registration order
    pub fn list(&self) -> &[Arc<ToolDescriptor>] {
        &self.tools
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|t| t.name.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
