//! Debate error types

use std::time::Duration;
use thiserror::Error;

use crate::types::{TaskType, TranscriptEntry, Warning};

/// Observability state carried out of an aborted debate
///
/// A cancelled or deadline-expired debate still surfaces whatever warnings
/// and transcript had accumulated, rather than silently dropping them.
#[derive(Debug, Clone, Default)]
pub struct AbortedDebate {
    pub warnings: Vec<Warning>,
    pub transcript: Vec<TranscriptEntry>,
}

/// Fatal errors that propagate to the caller
///
/// Everything else in the failure taxonomy is recovered locally and
/// reported as a [`Warning`] on the result.
#[derive(Debug, Error)]
pub enum DebateError {
    /// No backend has a usable credential
    #[error("no backends available")]
    NoBackendsAvailable,

    /// Every backend failed to produce a round-1 candidate
    #[error("all backends failed during generation")]
    AllGenerationFailed,

    /// No strategy registered for the requested task type
    #[error("no strategy for task type: {0}")]
    UnknownTaskType(TaskType),

    /// The debate was cancelled or hit its deadline
    #[error("debate aborted before completion")]
    Aborted(Box<AbortedDebate>),
}

/// Transient failure classification for retry decisions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransientKind {
    /// Provider rate limit, optionally with a reset hint
    RateLimited { retry_after: Option<Duration> },
    /// Network unreachable or connection failure
    Network,
}

/// Tagged outcome of one backend call
///
/// Transient errors are retried; fatal errors propagate immediately;
/// `Aborted` is the distinct cancellation signal and never consumes a
/// retry attempt.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    #[error("transient backend error: {detail}")]
    Transient { kind: TransientKind, detail: String },

    #[error("fatal backend error: {detail}")]
    Fatal { detail: String },

    #[error("task aborted")]
    Aborted,
}

impl TaskError {
    pub fn rate_limited(detail: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::Transient {
            kind: TransientKind::RateLimited { retry_after },
            detail: detail.into(),
        }
    }

    pub fn network(detail: impl Into<String>) -> Self {
        Self::Transient {
            kind: TransientKind::Network,
            detail: detail.into(),
        }
    }

    pub fn fatal(detail: impl Into<String>) -> Self {
        Self::Fatal {
            detail: detail.into(),
        }
    }
}
