//! In-memory job status ledger.
//!
//! [`StatusLedger`] maps job identifiers to their current
//! [`StatusRecord`]. It is shared as `Arc<StatusLedger>` between the
//! progress monitor (writer) and status queries (readers). Nothing is
//! persisted: the ledger is empty after a restart.
//!
//! Terminal records are immutable. Once a job is `SUCCESS` or `FAILED`,
//! later writes are rejected so that a stale in-flight event cannot undo
//! the outcome.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::status::{StatusRecord, StatusUpdate};

/// What [`StatusLedger::upsert`] did with an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No record existed; one was created.
    Created,
    /// An existing non-terminal record was updated.
    Updated,
    /// The record is terminal; the update was discarded.
    RejectedTerminal,
}

/// Process-wide status store, safe to share across tasks.
#[derive(Debug, Default)]
pub struct StatusLedger {
    records: RwLock<HashMap<String, StatusRecord>>,
}

impl StatusLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or partially update the record for `job_id`.
    ///
    /// On first write the record is seeded with fresh timestamps and the
    /// default progress. On later writes only the fields set on `update`
    /// change, and `updated_at` is refreshed.
    pub async fn upsert(&self, job_id: &str, update: StatusUpdate) -> UpsertOutcome {
        let mut records = self.records.write().await;

        let Some(record) = records.get_mut(job_id) else {
            let mut record = StatusRecord::new(job_id, update.status);
            apply(&mut record, update);
            records.insert(job_id.to_string(), record);
            return UpsertOutcome::Created;
        };

        if record.status.is_terminal() {
            tracing::debug!(
                prompt_id = %job_id,
                current = %record.status,
                attempted = %update.status,
                "Ignoring update to terminal status record",
            );
            return UpsertOutcome::RejectedTerminal;
        }

        apply(record, update);
        record.updated_at = chrono::Utc::now();
        UpsertOutcome::Updated
    }

    /// Insert a complete record (e.g. one reconciled from engine history)
    /// unless a record already exists for its job.
    pub async fn insert_if_absent(&self, record: StatusRecord) -> StatusRecord {
        let mut records = self.records.write().await;
        records
            .entry(record.prompt_id.clone())
            .or_insert(record)
            .clone()
    }

    /// Snapshot of the record for `job_id`, if any.
    pub async fn get(&self, job_id: &str) -> Option<StatusRecord> {
        self.records.read().await.get(job_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

fn apply(record: &mut StatusRecord, update: StatusUpdate) {
    record.status = update.status;
    if let Some(progress) = update.progress {
        record.progress = progress;
    }
    if let Some(error) = update.error {
        record.error = Some(error);
    }
    if let Some(result) = update.result {
        record.result = Some(result);
    }
}
