//! Reconcile error types.
//!
//! Every failure names the step that failed and classifies the cause, so the
//! dispatch layer can pick a retry policy and the status board can report it.

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use webui_state::{ObjectKey, StateError};

/// A store call made by the reconcile engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    GetWebUi,
    DeleteWorkload,
    DeleteContentStore,
    GetWorkload,
    CreateContentStore,
    CreateWorkload,
    UpdateWorkload,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::GetWebUi => "get webui",
            Step::DeleteWorkload => "delete workload",
            Step::DeleteContentStore => "delete content store",
            Step::GetWorkload => "get workload",
            Step::CreateContentStore => "create content store",
            Step::CreateWorkload => "create workload",
            Step::UpdateWorkload => "update workload",
        };
        f.write_str(name)
    }
}

/// Classification of a reconcile failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    /// Stale version on update; re-fetch and retry.
    Conflict,
    /// Store unavailable or failing; retry with backoff.
    Transient,
    /// Misconfiguration that retrying will not fix.
    Fatal,
    /// The caller asked the reconcile to stop.
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Transient => "transient",
            ErrorKind::Fatal => "fatal",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

impl From<&StateError> for ErrorKind {
    fn from(err: &StateError) -> Self {
        match err {
            StateError::NotFound { .. } => ErrorKind::NotFound,
            StateError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            StateError::Conflict { .. } => ErrorKind::Conflict,
            e if e.is_fatal() => ErrorKind::Fatal,
            _ => ErrorKind::Transient,
        }
    }
}

/// Errors returned by [`Reconciler::reconcile`](crate::Reconciler::reconcile).
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("{key}: {step} failed: {source}")]
    Store {
        key: ObjectKey,
        step: Step,
        #[source]
        source: StateError,
    },

    #[error("{key}: cancelled before {step}")]
    Cancelled { key: ObjectKey, step: Step },
}

impl ReconcileError {
    pub(crate) fn store(key: &ObjectKey, step: Step, source: StateError) -> Self {
        Self::Store {
            key: key.clone(),
            step,
            source,
        }
    }

    /// The step that failed (or would have run next, for cancellation).
    pub fn step(&self) -> Step {
        match self {
            Self::Store { step, .. } | Self::Cancelled { step, .. } => *step,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Store { source, .. } => ErrorKind::from(source),
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    pub fn key(&self) -> &ObjectKey {
        match self {
            Self::Store { key, .. } | Self::Cancelled { key, .. } => key,
        }
    }
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;
