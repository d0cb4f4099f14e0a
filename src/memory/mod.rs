//! Agent Memory System
//!
//! Session-scoped conversation history and working variables, with
//! per-session serialization and idle eviction.

pub mod session;
pub mod store;

pub use session::{SessionContext, Turn};
pub use store::{validate_session_id, ContextStore, SessionGuard};
