//! Status board: the last reconcile result per parent.
//!
//! Written by the controller after every attempt and read by the API, so a
//! failing object shows which step failed and why.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::RwLock;

use webui_state::ObjectKey;

use crate::error::{ErrorKind, ReconcileError, Step};
use crate::reconciler::Outcome;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileStatus {
    pub key: ObjectKey,
    /// Outcome of the most recent successful reconcile.
    pub last_outcome: Option<Outcome>,
    /// Set while the most recent attempt failed.
    pub last_error: Option<StatusError>,
    /// Consecutive failures.
    pub failures: u32,
    pub attempts: u64,
    /// Unix timestamp (seconds) of the most recent attempt.
    pub updated_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusError {
    pub step: Step,
    pub kind: ErrorKind,
    pub message: String,
}

/// Shared, cloneable map of reconcile statuses.
#[derive(Clone, Default)]
pub struct StatusBoard {
    inner: Arc<RwLock<HashMap<ObjectKey, ReconcileStatus>>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful reconcile. A parent whose children were deleted is
    /// gone, so its entry is dropped.
    pub async fn record_success(&self, key: &ObjectKey, outcome: Outcome) {
        let mut statuses = self.inner.write().await;
        if outcome.is_deleted() {
            statuses.remove(key);
            return;
        }
        let status = statuses
            .entry(key.clone())
            .or_insert_with(|| ReconcileStatus::empty(key));
        status.last_outcome = Some(outcome);
        status.last_error = None;
        status.failures = 0;
        status.attempts = status.attempts.saturating_add(1);
        status.updated_at = epoch_secs();
    }

    /// Record a failed reconcile.
    pub async fn record_failure(&self, key: &ObjectKey, err: &ReconcileError, failures: u32) {
        let mut statuses = self.inner.write().await;
        let status = statuses
            .entry(key.clone())
            .or_insert_with(|| ReconcileStatus::empty(key));
        status.last_error = Some(StatusError {
            step: err.step(),
            kind: err.kind(),
            message: err.to_string(),
        });
        status.failures = failures;
        status.attempts = status.attempts.saturating_add(1);
        status.updated_at = epoch_secs();
    }

    pub async fn get(&self, key: &ObjectKey) -> Option<ReconcileStatus> {
        self.inner.read().await.get(key).cloned()
    }

    /// All statuses, ordered by key.
    pub async fn list(&self) -> Vec<ReconcileStatus> {
        let mut statuses: Vec<_> = self.inner.read().await.values().cloned().collect();
        statuses.sort_by(|a, b| a.key.cmp(&b.key));
        statuses
    }
}

impl ReconcileStatus {
    fn empty(key: &ObjectKey) -> Self {
        Self {
            key: key.clone(),
            last_outcome: None,
            last_error: None,
            failures: 0,
            attempts: 0,
            updated_at: 0,
        }
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
