/// Tether reconciliation core.
///
/// Keeps optimistic (locally created, not yet confirmed) chat messages and
/// comments on screen while they upload and send, and retires them once a
/// refetch shows the server's copy:
/// - `store`: per-scope entry list, most recent first, with change events
/// - `coordinator`: upload + send + retry for one user action
/// - `matcher` / `reconciler`: heuristic identity and one-to-one retirement
/// - `cleanup`: stale-entry prune loop and refetch loop

pub mod cleanup;
pub mod collab;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod matcher;
pub mod memory;
pub mod reconciler;
pub mod store;

// Re-export key types for convenience.
pub use collab::{DataSource, Transport, Uploader};
pub use config::{ReconcileConfig, ReconcileStrategy};
pub use coordinator::{AttemptOutcome, RetryAction, Submission, SubmissionCoordinator};
pub use error::{CollaboratorError, StoreError};
pub use logging::{NullLogger, ReconcileLogger, TracingLogger};
pub use matcher::{MatchPolicy, matches, normalize_text};
pub use reconciler::Reconciler;
pub use store::{EntryPatch, PendingEntry, RetryStart, ThreadStore};
