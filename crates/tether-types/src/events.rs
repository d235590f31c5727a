use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{EntryId, EntryState, OptimisticEntry};

/// Change notifications emitted by a thread store. UI layers re-render on
/// every event; nothing else mutates state in response to them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ThreadEvent {
    /// A new optimistic entry was inserted at the head of the list
    EntryAdded { entry: OptimisticEntry },

    /// An entry changed in place (state, uploaded URLs, error)
    EntryUpdated {
        id: EntryId,
        state: EntryState,
        error: Option<String>,
    },

    /// An entry left the store
    EntryRemoved { id: EntryId, reason: RemovalReason },

    /// The scope was torn down; no further events follow
    Closed,
}

impl ThreadEvent {
    /// Id of the entry this event concerns, if any.
    pub fn entry_id(&self) -> Option<&EntryId> {
        match self {
            Self::EntryAdded { entry } => Some(&entry.id),
            Self::EntryUpdated { id, .. } => Some(id),
            Self::EntryRemoved { id, .. } => Some(id),
            Self::Closed => None,
        }
    }
}

/// Why an optimistic entry was removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum RemovalReason {
    /// A server-confirmed entry took its place
    Confirmed { real_id: Uuid },
    /// Exceeded the maximum unconfirmed age
    Stale,
    /// The user threw it away
    Discarded,
    /// Fresh real data arrived under the clear-on-refresh strategy
    Cleared,
}
