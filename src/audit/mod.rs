//! Turn audit log
//!
//! Every handled query leaves a `TurnRecord`: what was asked, how it was
//! classified, every execution attempt, the state path and the envelope
//! returned. Records carry a SHA-256 over their content so tampering can be
//! detected. The log is bounded; the oldest records are dropped first.

use crate::models::{ExecutionStep, Intent, Query, ResponseEnvelope, TurnState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::io::Write;
use tokio::sync::RwLock;
use uuid::Uuid;

pub const DEFAULT_AUDIT_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub audit_id: Uuid,
    pub query: Query,
    pub intents: Vec<Intent>,
    pub steps: Vec<ExecutionStep>,
    pub states: Vec<TurnState>,
    pub envelope: ResponseEnvelope,
    pub integrity_hash: String,
    pub created_at: DateTime<Utc>,
    pub execution_time_ms: u64,
}

impl TurnRecord {
    pub fn new(
        query: Query,
        intents: Vec<Intent>,
        steps: Vec<ExecutionStep>,
        states: Vec<TurnState>,
        envelope: ResponseEnvelope,
        execution_time_ms: u64,
    ) -> Self {
        let mut record = Self {
            audit_id: Uuid::new_v4(),
            query,
            intents,
            steps,
            states,
            envelope,
            integrity_hash: String::new(),
            created_at: Utc::now(),
            execution_time_ms,
        };
        record.integrity_hash = compute_turn_hash(&record);
        record
    }
}

/// The hashed portion of a record
#[derive(Serialize)]
struct HashedTurn<'a> {
    query: &'a Query,
    intents: &'a [Intent],
    steps: &'a [ExecutionStep],
    states: &'a [TurnState],
    envelope: &'a ResponseEnvelope,
}

/// SHA-256 of a record's content, streamed straight into the hasher
pub fn compute_turn_hash(record: &TurnRecord) -> String {
    let mut hasher = Sha256::new();
    let hashed = HashedTurn {
        query: &record.query,
        intents: &record.intents,
        steps: &record.steps,
        states: &record.states,
        envelope: &record.envelope,
    };

    if serde_json::to_writer(&mut HashWriter(&mut hasher), &hashed).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Audit trail storage
pub struct AuditLog {
    records: RwLock<VecDeque<TurnRecord>>,
    capacity: usize,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Store a record, dropping the oldest one when full
    pub async fn record(&self, record: TurnRecord) -> Uuid {
        let audit_id = record.audit_id;
        let mut records = self.records.write().await;
        if records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
        audit_id
    }

    pub async fn get(&self, audit_id: Uuid) -> Option<TurnRecord> {
        let records = self.records.read().await;
        records.iter().find(|r| r.audit_id == audit_id).cloned()
    }

    pub async fn for_query(&self, query_id: Uuid) -> Option<TurnRecord> {
        let records = self.records.read().await;
        records.iter().find(|r| r.query.id == query_id).cloned()
    }

    /// Audit IDs for a session, oldest first
    pub async fn list_for_session(&self, session_id: &str) -> Vec<Uuid> {
        let records = self.records.read().await;
        records
            .iter()
            .filter(|r| r.query.session_id == session_id)
            .map(|r| r.audit_id)
            .collect()
    }

    /// Whether a record still matches its hash. Unknown ids are not intact.
    pub async fn verify_integrity(&self, audit_id: Uuid) -> bool {
        let records = self.records.read().await;
        records
            .iter()
            .find(|r| r.audit_id == audit_id)
            .is_some_and(|r| compute_turn_hash(r) == r.integrity_hash)
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Payload;

    fn record(session_id: &str, text: &str) -> TurnRecord {
        let query = Query::new(text, session_id);
        let envelope = ResponseEnvelope::ok(query.id, session_id, Payload::text("ok"), vec![]);
        TurnRecord::new(
            query,
            vec![],
            vec![],
            vec![TurnState::Classifying, TurnState::Done],
            envelope,
            3,
        )
    }

    #[tokio::test]
    async fn test_record_and_lookup() {
        let log = AuditLog::default();
        let rec = record("s1", "price of AAPL");
        let query_id = rec.query.id;
        let id = log.record(rec).await;

        assert_eq!(log.get(id).await.map(|r| r.audit_id), Some(id));
        assert_eq!(log.for_query(query_id).await.map(|r| r.audit_id), Some(id));
        assert!(log.verify_integrity(id).await);
        assert!(!log.verify_integrity(Uuid::new_v4()).await);
    }

    #[tokio::test]
    async fn test_hash_detects_tampering() {
        let mut rec = record("s1", "price of AAPL");
        assert_eq!(compute_turn_hash(&rec), rec.integrity_hash);

        rec.envelope.payload.text = "something else".into();
        assert_ne!(compute_turn_hash(&rec), rec.integrity_hash);
    }

    #[tokio::test]
    async fn test_capacity_drops_oldest() {
        let log = AuditLog::new(2);
        let first = log.record(record("s1", "one")).await;
        let second = log.record(record("s1", "two")).await;
        let third = log.record(record("s2", "three")).await;

        assert_eq!(log.len().await, 2);
        assert!(log.get(first).await.is_none());
        assert_eq!(log.list_for_session("s1").await, vec![second]);
        assert_eq!(log.list_for_session("s2").await, vec![third]);
    }
}
