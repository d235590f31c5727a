use std::collections::HashSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use tether_types::api::ConfirmedEntry;
use tether_types::models::{EntryId, OptimisticEntry};

use crate::config::{ReconcileConfig, ReconcileStrategy};
use crate::logging::{ReconcileEvent, ReconcileLog, ReconcileLogger};
use crate::matcher::{MatchPolicy, matches};
use crate::store::ThreadStore;

const COMPONENT: &str = "reconciler";

/// Retires optimistic entries of one scope once real data covers them.
pub struct Reconciler {
    store: ThreadStore,
    policy: MatchPolicy,
    strategy: ReconcileStrategy,
    logger: Arc<dyn ReconcileLogger>,
    state: Mutex<ReconcilerState>,
}

#[derive(Default)]
struct ReconcilerState {
    /// Real ids that already retired an entry. A real entry retires at most
    /// one optimistic entry over the lifetime of the scope.
    claimed: HashSet<Uuid>,

    /// Fingerprint of the last real dataset seen by `on_refresh`
    last_seen: Option<u64>,
}

impl Reconciler {
    pub fn new(store: ThreadStore, config: &ReconcileConfig, logger: Arc<dyn ReconcileLogger>) -> Self {
        Self {
            store,
            policy: MatchPolicy {
                window: config.match_window,
            },
            strategy: config.strategy,
            logger,
            state: Mutex::new(ReconcilerState::default()),
        }
    }

    pub fn store(&self) -> &ThreadStore {
        &self.store
    }

    /// Entry point for the data source: runs a pass only when the real
    /// collection differs from the previous call. Returns retired ids.
    pub async fn on_refresh(&self, real: &[ConfirmedEntry]) -> Vec<EntryId> {
        let fingerprint = fingerprint(real);
        {
            let mut state = self.state.lock().await;
            if state.last_seen == Some(fingerprint) {
                return Vec::new();
            }
            state.last_seen = Some(fingerprint);
        }
        self.reconcile(real).await
    }

    /// Run one pruning pass unconditionally. Idempotent for unchanged input.
    pub async fn reconcile(&self, real: &[ConfirmedEntry]) -> Vec<EntryId> {
        match self.strategy {
            ReconcileStrategy::Heuristic => self.retire_matched(real).await,
            ReconcileStrategy::ClearOnRefresh => {
                if real.is_empty() {
                    return Vec::new();
                }
                let cleared = self.store.clear().await;
                for entry in &cleared {
                    self.log(&entry.id, ReconcileEvent::Cleared);
                }
                cleared.into_iter().map(|e| e.id).collect()
            }
        }
    }

    async fn retire_matched(&self, real: &[ConfirmedEntry]) -> Vec<EntryId> {
        // Snapshot under the state lock so concurrent passes see each
        // other's retirements
        let mut state = self.state.lock().await;
        let pending = self.store.snapshot().await;
        if pending.is_empty() {
            return Vec::new();
        }

        // Forget claims whose real entry scrolled out of the dataset
        let present: HashSet<Uuid> = real.iter().map(|r| r.id).collect();
        state.claimed.retain(|id| present.contains(id));

        let pairs = pair_oldest_first(&pending, real, &state.claimed, &self.policy);
        if pairs.is_empty() {
            return Vec::new();
        }

        let removed = self.store.retire(&pairs).await;
        let mut retired = Vec::with_capacity(removed.len());
        for (entry, real_id) in removed {
            state.claimed.insert(real_id);
            self.log(&entry.id, ReconcileEvent::Confirmed { real_id });
            retired.push(entry.id);
        }

        debug!(scope = %self.store.scope_id(), retired = retired.len(), "reconcile pass");
        retired
    }

    fn log(&self, id: &EntryId, event: ReconcileEvent) {
        self.logger.log(ReconcileLog {
            component: COMPONENT,
            entry_id: id.clone(),
            event,
        });
    }
}

/// One-to-one pairing. Real entries are visited oldest first and each takes
/// the oldest still-unmatched optimistic entry it matches, so repeated
/// identical sends retire in the order they were made.
fn pair_oldest_first(
    pending: &[OptimisticEntry],
    real: &[ConfirmedEntry],
    claimed: &HashSet<Uuid>,
    policy: &MatchPolicy,
) -> Vec<(EntryId, Uuid)> {
    // `pending` is most recent first; reverse so the stable sort keeps
    // insertion order among equal timestamps.
    let mut candidates: Vec<&OptimisticEntry> = pending.iter().rev().collect();
    candidates.sort_by_key(|e| e.created_at);

    let mut reals: Vec<&ConfirmedEntry> = real.iter().filter(|r| !claimed.contains(&r.id)).collect();
    reals.sort_by_key(|r| r.created_at);

    let mut taken = vec![false; candidates.len()];
    let mut pairs = Vec::new();
    for r in reals {
        let hit = candidates
            .iter()
            .enumerate()
            .find(|(i, c)| !taken[*i] && matches(c, r, policy))
            .map(|(i, _)| i);
        if let Some(i) = hit {
            taken[i] = true;
            pairs.push((candidates[i].id.clone(), r.id));
        }
    }
    pairs
}

fn fingerprint(real: &[ConfirmedEntry]) -> u64 {
    let mut hasher = DefaultHasher::new();
    real.len().hash(&mut hasher);
    for r in real {
        r.id.hash(&mut hasher);
        r.text.hash(&mut hasher);
        r.client_token.hash(&mut hasher);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::coordinator::RetryAction;
    use crate::logging::NullLogger;
    use crate::store::PendingEntry;
    use tether_types::models::{Draft, EntryKind};

    fn reconciler(strategy: ReconcileStrategy) -> Reconciler {
        let config = ReconcileConfig {
            strategy,
            ..Default::default()
        };
        Reconciler::new(ThreadStore::new("thread-1"), &config, Arc::new(NullLogger))
    }

    async fn add(store: &ThreadStore, author: Uuid, text: &str, at: DateTime<Utc>) -> EntryId {
        let entry = OptimisticEntry::from_draft(EntryId::generate(), EntryKind::Message, author, Draft::text(text), at);
        let id = entry.id.clone();
        store
            .add(PendingEntry {
                entry,
                retry: RetryAction::noop(),
            })
            .await
            .unwrap();
        id
    }

    fn real(author: Uuid, text: &str, at: DateTime<Utc>) -> ConfirmedEntry {
        ConfirmedEntry {
            id: Uuid::new_v4(),
            author_id: author,
            text: text.to_string(),
            created_at: at,
            attachments: vec![],
            client_token: None,
        }
    }

    #[tokio::test]
    async fn matched_entries_are_retired() {
        let r = reconciler(ReconcileStrategy::Heuristic);
        let me = Uuid::new_v4();
        let t = Utc::now();
        let hello = add(r.store(), me, "hello", t).await;
        let other = add(r.store(), me, "still pending", t).await;

        let retired = r.reconcile(&[real(me, "hello", t + chrono::Duration::seconds(1))]).await;
        assert_eq!(retired, vec![hello]);

        let left: Vec<EntryId> = r.store().snapshot().await.into_iter().map(|e| e.id).collect();
        assert_eq!(left, vec![other]);
    }

    #[tokio::test]
    async fn identical_sends_retire_oldest_first_one_to_one() {
        let r = reconciler(ReconcileStrategy::Heuristic);
        let me = Uuid::new_v4();
        let t = Utc::now();
        let first = add(r.store(), me, "ok", t).await;
        let second = add(r.store(), me, "ok", t + chrono::Duration::milliseconds(300)).await;

        let data = vec![real(me, "ok", t + chrono::Duration::seconds(1))];
        assert_eq!(r.reconcile(&data).await, vec![first]);

        // Same data again: the real entry is already spent
        assert!(r.reconcile(&data).await.is_empty());
        assert_eq!(r.store().len().await, 1);

        // The second copy shows up
        let mut more = data.clone();
        more.push(real(me, "ok", t + chrono::Duration::seconds(2)));
        assert_eq!(r.reconcile(&more).await, vec![second]);
        assert!(r.store().is_empty().await);
    }

    #[tokio::test]
    async fn equal_timestamps_fall_back_to_insertion_order() {
        let r = reconciler(ReconcileStrategy::Heuristic);
        let me = Uuid::new_v4();
        let t = Utc::now();
        let first = add(r.store(), me, "same", t).await;
        let _second = add(r.store(), me, "same", t).await;

        assert_eq!(r.reconcile(&[real(me, "same", t)]).await, vec![first]);
    }

    #[tokio::test]
    async fn concurrent_passes_retire_each_entry_once() {
        let r = reconciler(ReconcileStrategy::Heuristic);
        let me = Uuid::new_v4();
        let t = Utc::now();
        let first = add(r.store(), me, "ok", t).await;
        let second = add(r.store(), me, "ok", t + chrono::Duration::milliseconds(200)).await;

        let one = vec![real(me, "ok", t + chrono::Duration::seconds(1))];
        let mut both = one.clone();
        both.push(real(me, "ok", t + chrono::Duration::seconds(2)));

        let (a, b) = tokio::join!(r.reconcile(&one), r.reconcile(&both));
        let mut retired: Vec<EntryId> = a.into_iter().chain(b).collect();
        retired.sort_by(|x, y| x.as_str().cmp(y.as_str()));
        let mut expected = vec![first, second];
        expected.sort_by(|x, y| x.as_str().cmp(y.as_str()));

        assert_eq!(retired, expected);
        assert!(r.store().is_empty().await);
    }

    #[tokio::test]
    async fn on_refresh_skips_unchanged_data() {
        let r = reconciler(ReconcileStrategy::ClearOnRefresh);
        let me = Uuid::new_v4();
        let t = Utc::now();
        let data = vec![real(me, "history", t - chrono::Duration::minutes(10))];

        add(r.store(), me, "a", t).await;
        assert_eq!(r.on_refresh(&data).await.len(), 1);

        // No new real data: a fresh optimistic entry survives
        add(r.store(), me, "b", t).await;
        assert!(r.on_refresh(&data).await.is_empty());
        assert_eq!(r.store().len().await, 1);

        let mut changed = data.clone();
        changed.push(real(me, "b", t));
        assert_eq!(r.on_refresh(&changed).await.len(), 1);
        assert!(r.store().is_empty().await);
    }
}
