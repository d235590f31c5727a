/// Structured reconciliation logging.
///
/// The coordinator, reconciler and prune loop report lifecycle events
/// through a `ReconcileLogger` so hosts can route them to `tracing`, a
/// debug overlay, or nowhere.

use std::fmt;

use tether_types::models::{EntryId, EntryState};
use uuid::Uuid;

/// Structured log entry for one optimistic entry.
#[derive(Debug, Clone)]
pub struct ReconcileLog {
    pub component: &'static str,
    pub entry_id: EntryId,
    pub event: ReconcileEvent,
}

/// Events that can be logged.
#[derive(Debug, Clone)]
pub enum ReconcileEvent {
    /// Coordinator: entry created and stored
    Submitted {
        state: EntryState,
        attachments: usize,
    },
    /// Coordinator: attachment uploads started
    UploadStarted { pending: usize },
    /// Coordinator: one attachment finished uploading
    UploadFinished { index: usize },
    /// Coordinator: transport call issued
    SendStarted { attempt: u32 },
    /// Coordinator: transport accepted the entry
    Sent { attempt: u32, duration_ms: u64 },
    /// Coordinator: upload or send failed
    Failed { message: String },
    /// Retry action invoked on a failed entry
    RetryRequested { attempt: u32, reupload: bool },
    /// Retry action invoked while the entry was not failed
    RetryIgnored { state: Option<EntryState> },
    /// Attempt abandoned because the entry or its scope went away
    Abandoned,
    /// Reconciler: a real entry retired the optimistic one
    Confirmed { real_id: Uuid },
    /// Prune loop: entry exceeded its maximum age
    Pruned { age_ms: i64 },
    /// Reconciler: cleared by the clear-on-refresh strategy
    Cleared,
}

impl fmt::Display for ReconcileEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Submitted { state, attachments } => {
                write!(f, "submitted state={} attachments={}", state, attachments)
            }
            Self::UploadStarted { pending } => write!(f, "upload_started pending={}", pending),
            Self::UploadFinished { index } => write!(f, "upload_finished idx={}", index),
            Self::SendStarted { attempt } => write!(f, "send_started attempt={}", attempt),
            Self::Sent { attempt, duration_ms } => {
                write!(f, "sent attempt={} duration_ms={}", attempt, duration_ms)
            }
            Self::Failed { message } => write!(f, "failed: {}", message),
            Self::RetryRequested { attempt, reupload } => {
                write!(f, "retry_requested attempt={} reupload={}", attempt, reupload)
            }
            Self::RetryIgnored { state } => match state {
                Some(s) => write!(f, "retry_ignored state={}", s),
                None => write!(f, "retry_ignored state=gone"),
            },
            Self::Abandoned => write!(f, "abandoned"),
            Self::Confirmed { real_id } => write!(f, "confirmed real_id={}", real_id),
            Self::Pruned { age_ms } => write!(f, "pruned age_ms={}", age_ms),
            Self::Cleared => write!(f, "cleared"),
        }
    }
}

/// Trait for reconciliation logging.
pub trait ReconcileLogger: Send + Sync {
    fn log(&self, entry: ReconcileLog);
}

/// Logger that uses the `tracing` crate.
pub struct TracingLogger;

impl ReconcileLogger for TracingLogger {
    fn log(&self, entry: ReconcileLog) {
        match &entry.event {
            ReconcileEvent::Failed { .. } | ReconcileEvent::Pruned { .. } => {
                tracing::warn!(
                    component = entry.component,
                    entry_id = %entry.entry_id,
                    "{}",
                    entry.event,
                );
            }
            ReconcileEvent::Submitted { .. }
            | ReconcileEvent::Sent { .. }
            | ReconcileEvent::RetryRequested { .. }
            | ReconcileEvent::Confirmed { .. }
            | ReconcileEvent::Cleared => {
                tracing::info!(
                    component = entry.component,
                    entry_id = %entry.entry_id,
                    "{}",
                    entry.event,
                );
            }
            _ => {
                tracing::debug!(
                    component = entry.component,
                    entry_id = %entry.entry_id,
                    "{}",
                    entry.event,
                );
            }
        }
    }
}

/// No-op logger that discards all log entries.
pub struct NullLogger;

impl ReconcileLogger for NullLogger {
    fn log(&self, _entry: ReconcileLog) {}
}
