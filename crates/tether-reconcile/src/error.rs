use thiserror::Error;

use tether_types::models::{EntryId, EntryState};

/// Errors raised by the thread store. All of them indicate a caller bug or a
/// torn-down scope, never a network condition.
#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("entry {0} already exists in this scope")]
    DuplicateId(EntryId),

    #[error("scope is closed")]
    Closed,

    #[error("entry {id}: illegal transition {from} -> {to}")]
    InvalidTransition {
        id: EntryId,
        from: EntryState,
        to: EntryState,
    },
}

/// Failures reported by the external upload and transport collaborators.
/// The coordinator turns these into `failed` entries; they never escape it.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CollaboratorError {
    #[error("upload failed: {0}")]
    Upload(String),

    #[error("send failed: {0}")]
    Transport(String),

    #[error("refetch failed: {0}")]
    Fetch(String),
}
