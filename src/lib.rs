//! Finance Agent Orchestrator
//!
//! The orchestration core of a conversational personal-finance assistant:
//! - Routes free-text queries to a closed set of registered finance tools
//! - Keeps short-term, per-session conversational context
//! - Retries transient tool failures within a bounded budget
//! - Normalizes tool results into one response envelope
//! - Records every turn in a tamper-evident audit log
//!
//! TURN LOOP:
//! CLASSIFYING → {EXECUTING, CLARIFYING} → {AGGREGATING, RETRYING, FAILED} → DONE

pub mod agent;
pub mod aggregator;
pub mod audit;
pub mod classifier;
pub mod config;
pub mod error;
pub mod execution;
pub mod memory;
pub mod models;
pub mod services;
pub mod tools;

#[cfg(test)]
mod test_support;

pub use error::Result;

// Re-export common types
pub use agent::Orchestrator;
pub use config::AgentConfig;
pub use error::{ErrorKind, OrchestrationError};
pub use memory::ContextStore;
pub use models::*;
pub use tools::{create_default_registry, ToolDescriptor, ToolRegistry};
