use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::collab::DataSource;
use crate::logging::{ReconcileEvent, ReconcileLog, ReconcileLogger};
use crate::reconciler::Reconciler;
use crate::store::ThreadStore;

/// Background task that garbage-collects entries stuck without confirmation.
///
/// Runs on an interval until the scope is closed. This is the safety net
/// for lost round trips; the reconciler is the primary retirement path.
pub async fn run_prune_loop(
    store: ThreadStore,
    logger: Arc<dyn ReconcileLogger>,
    max_age: Duration,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;
        if !store.is_live() {
            debug!(scope = %store.scope_id(), "Prune loop stopping: scope closed");
            return;
        }

        let pruned = prune_once(&store, logger.as_ref(), max_age).await;
        if pruned > 0 {
            info!("Prune: dropped {} stale entries from {}", pruned, store.scope_id());
        }
    }
}

/// One prune pass. Returns the number of entries removed.
pub async fn prune_once(store: &ThreadStore, logger: &dyn ReconcileLogger, max_age: Duration) -> usize {
    let now = Utc::now();
    let removed = store.prune_stale_at(max_age, now).await;

    for entry in &removed {
        logger.log(ReconcileLog {
            component: "prune",
            entry_id: entry.id.clone(),
            event: ReconcileEvent::Pruned {
                age_ms: (now - entry.created_at).num_milliseconds(),
            },
        });
    }

    removed.len()
}

/// Background task that refetches real data and hands it to the reconciler.
///
/// Fetch errors are logged and retried on the next tick. Stops once the
/// scope is closed.
pub async fn run_refresh_loop<S: DataSource>(source: Arc<S>, reconciler: Arc<Reconciler>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;
        if !reconciler.store().is_live() {
            debug!(scope = %reconciler.store().scope_id(), "Refresh loop stopping: scope closed");
            return;
        }

        match source.fetch().await {
            Ok(real) => {
                let retired = reconciler.on_refresh(&real).await;
                if !retired.is_empty() {
                    debug!("Refresh: retired {} entries", retired.len());
                }
            }
            Err(e) => {
                warn!("Refresh error: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconcileConfig;
    use crate::coordinator::{AttemptOutcome, RetryAction, SubmissionCoordinator};
    use crate::logging::NullLogger;
    use crate::memory::{MemoryServer, MemoryUploader};
    use crate::store::PendingEntry;
    use tether_types::models::{Draft, EntryId, EntryKind, OptimisticEntry};
    use uuid::Uuid;

    #[tokio::test]
    async fn prune_once_drops_only_old_entries() {
        let store = ThreadStore::new("thread-1");
        for (text, age) in [("ancient", 120), ("recent", 5)] {
            let entry = OptimisticEntry::from_draft(
                EntryId::generate(),
                EntryKind::Comment,
                Uuid::nil(),
                Draft::text(text),
                Utc::now() - chrono::Duration::seconds(age),
            );
            store
                .add(PendingEntry {
                    entry,
                    retry: RetryAction::noop(),
                })
                .await
                .unwrap();
        }

        assert_eq!(prune_once(&store, &NullLogger, Duration::from_secs(60)).await, 1);
        assert_eq!(prune_once(&store, &NullLogger, Duration::from_secs(60)).await, 0);

        let left = store.snapshot().await;
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].text, "recent");
    }

    #[tokio::test]
    async fn prune_loop_exits_after_close() {
        let store = ThreadStore::new("thread-1");
        let task = tokio::spawn(run_prune_loop(
            store.clone(),
            Arc::new(NullLogger),
            Duration::from_secs(60),
            Duration::from_millis(10),
        ));

        store.close().await;
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("prune loop should stop")
            .unwrap();
    }

    #[tokio::test]
    async fn refresh_loop_retires_sent_entries_and_survives_fetch_errors() {
        let store = ThreadStore::new("thread-1");
        let server = Arc::new(MemoryServer::new());
        let coordinator = SubmissionCoordinator::new(
            store.clone(),
            Uuid::new_v4(),
            EntryKind::Comment,
            server.clone(),
            Arc::new(MemoryUploader::default()),
            Arc::new(NullLogger),
        );
        let reconciler = Arc::new(Reconciler::new(store.clone(), &ReconcileConfig::default(), Arc::new(NullLogger)));

        let submission = coordinator.submit(Draft::text("first!")).await.unwrap();
        assert_eq!(submission.wait().await, AttemptOutcome::Sent);
        assert_eq!(store.len().await, 1);

        // The first tick hits a failing refetch; a later one retires the entry
        server.fail_next_fetch(1);
        let task = tokio::spawn(run_refresh_loop(server.clone(), reconciler, Duration::from_millis(10)));

        tokio::time::timeout(Duration::from_secs(2), async {
            while !store.is_empty().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("entry should be retired");
        assert!(server.fetch().await.is_ok());

        store.close().await;
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("refresh loop should stop")
            .unwrap();
    }
}
