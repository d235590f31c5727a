use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, warn};
use uuid::Uuid;

use tether_types::events::{RemovalReason, ThreadEvent};
use tether_types::models::{EntryId, EntryState, FailureStage, OptimisticEntry};

use crate::coordinator::RetryAction;
use crate::error::StoreError;

/// An optimistic entry together with the retry action bound at creation.
#[derive(Clone)]
pub struct PendingEntry {
    pub entry: OptimisticEntry,
    pub retry: RetryAction,
}

/// Partial update applied by `ThreadStore::update_by_id`.
#[derive(Debug, Clone, Default)]
pub struct EntryPatch {
    pub state: Option<EntryState>,
    /// `Some` replaces the error message; a successful transition clears it.
    pub error: Option<String>,
    /// Recorded alongside a move to `failed`
    pub failed_at: Option<FailureStage>,
    /// (attachment index, hosted URL)
    pub uploaded_urls: Vec<(usize, String)>,
}

impl EntryPatch {
    pub fn state(state: EntryState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }

    pub fn failed(stage: FailureStage, message: impl Into<String>) -> Self {
        Self {
            state: Some(EntryState::Failed),
            error: Some(message.into()),
            failed_at: Some(stage),
            ..Default::default()
        }
    }

    pub fn uploaded(index: usize, url: impl Into<String>) -> Self {
        Self {
            uploaded_urls: vec![(index, url.into())],
            ..Default::default()
        }
    }
}

/// Outcome of `ThreadStore::begin_retry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStart {
    /// Entry moved `failed -> sending`. `reupload` is set when the failed
    /// attempt stopped at the upload step; all hosted URLs were dropped.
    Started { attempt: u32, reupload: bool },
    /// Entry was not failed (or is gone); nothing changed.
    Refused { state: Option<EntryState> },
}

/// Optimistic entries of a single conversation or comment thread, most
/// recent first. Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct ThreadStore {
    inner: Arc<ThreadStoreInner>,
}

struct ThreadStoreInner {
    scope_id: String,

    /// Most recent first
    entries: RwLock<Vec<PendingEntry>>,

    /// Re-render signal for UI layers
    events_tx: broadcast::Sender<ThreadEvent>,

    /// Cleared by `close`; late callbacks must not touch a dead scope
    live: AtomicBool,
}

impl ThreadStore {
    pub fn new(scope_id: impl Into<String>) -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(ThreadStoreInner {
                scope_id: scope_id.into(),
                entries: RwLock::new(Vec::new()),
                events_tx,
                live: AtomicBool::new(true),
            }),
        }
    }

    pub fn scope_id(&self) -> &str {
        &self.inner.scope_id
    }

    /// Subscribe to change events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<ThreadEvent> {
        self.inner.events_tx.subscribe()
    }

    pub fn is_live(&self) -> bool {
        self.inner.live.load(Ordering::Acquire)
    }

    fn emit(&self, event: ThreadEvent) {
        let _ = self.inner.events_tx.send(event);
    }

    /// Insert at the head. Returns the new number of entries.
    pub async fn add(&self, pending: PendingEntry) -> Result<usize, StoreError> {
        let mut entries = self.inner.entries.write().await;
        if !self.is_live() {
            return Err(StoreError::Closed);
        }

        if entries.iter().any(|p| p.entry.id == pending.entry.id) {
            // Ids are UUID-backed; reaching this is a caller bug.
            return Err(StoreError::DuplicateId(pending.entry.id));
        }

        let snapshot = pending.entry.clone();
        entries.insert(0, pending);
        let len = entries.len();
        drop(entries);

        debug!(scope = %self.inner.scope_id, entry_id = %snapshot.id, "entry added");
        self.emit(ThreadEvent::EntryAdded { entry: snapshot });
        Ok(len)
    }

    /// Apply `patch` to one entry. `Ok(false)` when no entry has that id.
    pub async fn update_by_id(&self, id: &EntryId, patch: EntryPatch) -> Result<bool, StoreError> {
        let mut entries = self.inner.entries.write().await;
        if !self.is_live() {
            return Err(StoreError::Closed);
        }

        let Some(pending) = entries.iter_mut().find(|p| &p.entry.id == id) else {
            return Ok(false);
        };
        let entry = &mut pending.entry;

        if let Some(next) = patch.state {
            if next != entry.state && !entry.state.can_transition_to(next) {
                warn!(
                    scope = %self.inner.scope_id,
                    entry_id = %id,
                    "Rejected transition {} -> {}",
                    entry.state,
                    next
                );
                return Err(StoreError::InvalidTransition {
                    id: id.clone(),
                    from: entry.state,
                    to: next,
                });
            }
        }

        for (index, url) in patch.uploaded_urls {
            match entry.attachments.get_mut(index) {
                Some(attachment) => attachment.uploaded_url = Some(url),
                None => warn!(entry_id = %id, "Upload result for missing attachment #{}", index),
            }
        }

        if let Some(next) = patch.state {
            entry.state = next;
            if next != EntryState::Failed {
                entry.error = None;
                entry.failed_at = None;
            }
        }
        if patch.failed_at.is_some() {
            entry.failed_at = patch.failed_at;
        }
        if patch.error.is_some() {
            entry.error = patch.error;
        }

        let event = ThreadEvent::EntryUpdated {
            id: id.clone(),
            state: entry.state,
            error: entry.error.clone(),
        };
        drop(entries);

        self.emit(event);
        Ok(true)
    }

    /// Atomically move a failed entry back to `sending` and count the attempt.
    /// After an upload failure every attachment loses its URL so the retry
    /// uploads the whole submission again.
    pub async fn begin_retry(&self, id: &EntryId) -> Result<RetryStart, StoreError> {
        let mut entries = self.inner.entries.write().await;
        if !self.is_live() {
            return Err(StoreError::Closed);
        }

        let Some(pending) = entries.iter_mut().find(|p| &p.entry.id == id) else {
            return Ok(RetryStart::Refused { state: None });
        };
        let entry = &mut pending.entry;

        if entry.state != EntryState::Failed {
            return Ok(RetryStart::Refused {
                state: Some(entry.state),
            });
        }

        let reupload = entry.failed_at.take() == Some(FailureStage::Upload);
        if reupload {
            for attachment in &mut entry.attachments {
                attachment.uploaded_url = None;
            }
        }

        entry.state = EntryState::Sending;
        entry.error = None;
        entry.attempts += 1;
        let attempt = entry.attempts;
        drop(entries);

        self.emit(ThreadEvent::EntryUpdated {
            id: id.clone(),
            state: EntryState::Sending,
            error: None,
        });
        Ok(RetryStart::Started { attempt, reupload })
    }

    /// Delete one entry. `None` when absent or the scope is closed.
    pub async fn remove_by_id(&self, id: &EntryId, reason: RemovalReason) -> Option<OptimisticEntry> {
        let mut entries = self.inner.entries.write().await;
        if !self.is_live() {
            return None;
        }

        let pos = entries.iter().position(|p| &p.entry.id == id)?;
        let removed = entries.remove(pos).entry;
        drop(entries);

        self.emit(ThreadEvent::EntryRemoved {
            id: removed.id.clone(),
            reason,
        });
        Some(removed)
    }

    /// User-initiated removal.
    pub async fn discard(&self, id: &EntryId) -> Option<OptimisticEntry> {
        self.remove_by_id(id, RemovalReason::Discarded).await
    }

    /// Remove entries retired by real ones, all under one lock.
    /// Returns the entries actually removed.
    pub(crate) async fn retire(&self, pairs: &[(EntryId, Uuid)]) -> Vec<(OptimisticEntry, Uuid)> {
        let mut entries = self.inner.entries.write().await;
        if !self.is_live() {
            return Vec::new();
        }

        let mut removed = Vec::with_capacity(pairs.len());
        for (id, real_id) in pairs {
            if let Some(pos) = entries.iter().position(|p| &p.entry.id == id) {
                removed.push((entries.remove(pos).entry, *real_id));
            }
        }
        drop(entries);

        for (entry, real_id) in &removed {
            self.emit(ThreadEvent::EntryRemoved {
                id: entry.id.clone(),
                reason: RemovalReason::Confirmed { real_id: *real_id },
            });
        }
        removed
    }

    /// Drop every entry. Used by the clear-on-refresh strategy.
    pub(crate) async fn clear(&self) -> Vec<OptimisticEntry> {
        let mut entries = self.inner.entries.write().await;
        if !self.is_live() {
            return Vec::new();
        }

        let removed: Vec<OptimisticEntry> = entries.drain(..).map(|p| p.entry).collect();
        drop(entries);

        for entry in &removed {
            self.emit(ThreadEvent::EntryRemoved {
                id: entry.id.clone(),
                reason: RemovalReason::Cleared,
            });
        }
        removed
    }

    /// Remove entries created more than `max_age` ago.
    pub async fn prune_stale(&self, max_age: Duration) -> Vec<OptimisticEntry> {
        self.prune_stale_at(max_age, Utc::now()).await
    }

    /// `prune_stale` against an explicit clock.
    pub async fn prune_stale_at(&self, max_age: Duration, now: DateTime<Utc>) -> Vec<OptimisticEntry> {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let Some(cutoff) = now.checked_sub_signed(max_age) else {
            return Vec::new();
        };

        let mut entries = self.inner.entries.write().await;
        if !self.is_live() {
            return Vec::new();
        }

        let mut removed = Vec::new();
        entries.retain(|p| {
            if p.entry.created_at < cutoff {
                removed.push(p.entry.clone());
                false
            } else {
                true
            }
        });
        drop(entries);

        for entry in &removed {
            self.emit(ThreadEvent::EntryRemoved {
                id: entry.id.clone(),
                reason: RemovalReason::Stale,
            });
        }
        removed
    }

    pub async fn get(&self, id: &EntryId) -> Option<OptimisticEntry> {
        self.inner
            .entries
            .read()
            .await
            .iter()
            .find(|p| &p.entry.id == id)
            .map(|p| p.entry.clone())
    }

    /// The retry action bound to `id` at creation time.
    pub async fn retry_action(&self, id: &EntryId) -> Option<RetryAction> {
        self.inner
            .entries
            .read()
            .await
            .iter()
            .find(|p| &p.entry.id == id)
            .map(|p| p.retry.clone())
    }

    /// Ordered copy for rendering, most recent first.
    pub async fn snapshot(&self) -> Vec<OptimisticEntry> {
        self.inner
            .entries
            .read()
            .await
            .iter()
            .map(|p| p.entry.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.entries.read().await.is_empty()
    }

    /// Tear the scope down. Pending entries are dropped and every later
    /// mutation is ignored.
    pub async fn close(&self) {
        let mut entries = self.inner.entries.write().await;
        if !self.inner.live.swap(false, Ordering::AcqRel) {
            return;
        }
        entries.clear();
        drop(entries);

        debug!(scope = %self.inner.scope_id, "scope closed");
        self.emit(ThreadEvent::Closed);
    }
}
