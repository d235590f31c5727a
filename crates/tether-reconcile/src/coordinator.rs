use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures_util::future::join_all;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use tether_types::api::{HostedAttachment, OutgoingMessage};
use tether_types::models::{Draft, EntryId, EntryKind, EntryState, FailureStage, OptimisticEntry};

use crate::collab::{Transport, Uploader};
use crate::error::{CollaboratorError, StoreError};
use crate::logging::{ReconcileEvent, ReconcileLog, ReconcileLogger};
use crate::store::{EntryPatch, PendingEntry, RetryStart, ThreadStore};

const COMPONENT: &str = "coordinator";

/// How one upload + send attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// Transport accepted it; the entry waits for confirmation.
    Sent,
    /// Upload or send failed; the entry is `failed` with this message.
    Failed(String),
    /// Retry invoked while the entry was not failed (`None`: entry gone).
    Refused(Option<EntryState>),
    /// The entry or its scope went away mid-flight.
    Abandoned,
}

/// Handle to an in-flight attempt.
pub struct Submission {
    pub id: EntryId,
    task: JoinHandle<AttemptOutcome>,
}

impl Submission {
    /// Wait for the attempt to settle.
    pub async fn wait(self) -> AttemptOutcome {
        self.task.await.unwrap_or_else(|e| {
            warn!(entry_id = %self.id, "Attempt task died: {}", e);
            AttemptOutcome::Abandoned
        })
    }
}

impl fmt::Debug for Submission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Submission").field("id", &self.id).finish_non_exhaustive()
    }
}

type RetryFn = dyn Fn() -> Option<Submission> + Send + Sync;

/// Zero-argument action that re-attempts a failed entry with the payload it
/// was created from.
#[derive(Clone)]
pub struct RetryAction {
    inner: Arc<RetryFn>,
}

impl RetryAction {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() -> Option<Submission> + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    #[cfg(test)]
    pub(crate) fn noop() -> Self {
        Self::new(|| None)
    }

    pub fn invoke(&self) -> Option<Submission> {
        (self.inner)()
    }
}

impl fmt::Debug for RetryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RetryAction")
    }
}

/// Drives the upload + send lifecycle of user submissions for one scope.
///
/// The coordinator only ever flips entry state; removal belongs to the
/// reconciler (confirmed), the prune loop (stale) or the user (discard).
///
/// Precondition: callers must not resubmit the same logical message while
/// its entry is `sending`. Retrying the existing entry is always safe.
pub struct SubmissionCoordinator<T, U> {
    inner: Arc<CoordinatorInner<T, U>>,
}

impl<T, U> Clone for SubmissionCoordinator<T, U> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct CoordinatorInner<T, U> {
    store: ThreadStore,
    author_id: Uuid,
    kind: EntryKind,
    transport: Arc<T>,
    uploader: Arc<U>,
    logger: Arc<dyn ReconcileLogger>,
    /// Attempts are spawned here so retry actions work from any thread
    runtime: Handle,
}

impl<T: Transport, U: Uploader> SubmissionCoordinator<T, U> {
    /// Must be called from within a Tokio runtime.
    pub fn new(
        store: ThreadStore,
        author_id: Uuid,
        kind: EntryKind,
        transport: Arc<T>,
        uploader: Arc<U>,
        logger: Arc<dyn ReconcileLogger>,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                store,
                author_id,
                kind,
                transport,
                uploader,
                logger,
                runtime: Handle::current(),
            }),
        }
    }

    pub fn store(&self) -> &ThreadStore {
        &self.inner.store
    }

    /// Create an optimistic entry for `draft` and start sending it.
    ///
    /// Returns `None` without touching the store when there is nothing to
    /// send (blank text, no attachments) or the scope is closed. Entries are
    /// stored before this returns, so display order follows call order.
    pub async fn submit(&self, draft: Draft) -> Option<Submission> {
        if draft.is_empty() {
            debug!(scope = %self.inner.store.scope_id(), "Ignoring empty submission");
            return None;
        }

        let id = EntryId::generate();
        let retry = self.bind_retry(id.clone(), draft.clone());

        let mut entry = OptimisticEntry::from_draft(
            id.clone(),
            self.inner.kind,
            self.inner.author_id,
            draft.clone(),
            Utc::now(),
        );
        entry.attempts = 1;
        let state = entry.state;
        let attachments = entry.attachments.len();

        if let Err(e) = self.inner.store.add(PendingEntry { entry, retry }).await {
            warn!(entry_id = %id, "Could not store optimistic entry: {}", e);
            return None;
        }
        self.log(&id, ReconcileEvent::Submitted { state, attachments });

        let this = self.clone();
        let task_id = id.clone();
        let task = self
            .inner
            .runtime
            .spawn(async move { this.run_attempt(&task_id, 1, &draft).await });

        Some(Submission { id, task })
    }

    /// Invoke the retry action bound to `id`.
    pub async fn retry(&self, id: &EntryId) -> Option<Submission> {
        self.inner.store.retry_action(id).await?.invoke()
    }

    /// User-initiated removal of a pending entry.
    pub async fn discard(&self, id: &EntryId) -> Option<OptimisticEntry> {
        self.inner.store.discard(id).await
    }

    fn bind_retry(&self, id: EntryId, draft: Draft) -> RetryAction {
        // Strong: a failed entry keeps a working retry even after the host
        // drops its coordinator. The cycle ends when the entry leaves the store.
        let inner = self.inner.clone();
        RetryAction::new(move || {
            let this = SubmissionCoordinator { inner: inner.clone() };
            let task_id = id.clone();
            let draft = draft.clone();
            let task = inner
                .runtime
                .spawn(async move { this.retry_attempt(&task_id, &draft).await });
            Some(Submission { id: id.clone(), task })
        })
    }

    async fn retry_attempt(&self, id: &EntryId, draft: &Draft) -> AttemptOutcome {
        match self.inner.store.begin_retry(id).await {
            Ok(RetryStart::Started { attempt, reupload }) => {
                self.log(id, ReconcileEvent::RetryRequested { attempt, reupload });
                self.run_attempt(id, attempt, draft).await
            }
            Ok(RetryStart::Refused { state }) => {
                self.log(id, ReconcileEvent::RetryIgnored { state });
                AttemptOutcome::Refused(state)
            }
            Err(_) => self.abandon(id),
        }
    }

    /// Upload whatever is still missing, then send. Every store write checks
    /// that the entry and its scope are still there.
    async fn run_attempt(&self, id: &EntryId, attempt: u32, draft: &Draft) -> AttemptOutcome {
        let store = &self.inner.store;

        let Some(current) = store.get(id).await else {
            return self.abandon(id);
        };

        // URLs kept from an earlier attempt are reused; a retry after an
        // upload failure starts with none
        let missing: Vec<_> = current
            .attachments
            .iter()
            .enumerate()
            .filter(|(_, a)| !a.is_uploaded())
            .map(|(i, a)| (i, a.clone()))
            .collect();

        if !missing.is_empty() {
            self.log(id, ReconcileEvent::UploadStarted { pending: missing.len() });

            let uploads = missing.into_iter().map(|(index, attachment)| {
                let uploader = self.inner.uploader.clone();
                async move { (index, uploader.upload(attachment).await) }
            });

            // All kinds upload concurrently; one failure does not stop the rest
            let mut first_error: Option<CollaboratorError> = None;
            for (index, result) in join_all(uploads).await {
                match result {
                    Ok(url) => match store.update_by_id(id, EntryPatch::uploaded(index, url)).await {
                        Ok(true) => self.log(id, ReconcileEvent::UploadFinished { index }),
                        Ok(false) | Err(_) => return self.abandon(id),
                    },
                    Err(e) => {
                        first_error.get_or_insert(e);
                    }
                }
            }

            if let Some(e) = first_error {
                return self.fail(id, FailureStage::Upload, e).await;
            }
        }

        match store.update_by_id(id, EntryPatch::state(EntryState::Sending)).await {
            Ok(true) => {}
            Ok(false) | Err(StoreError::Closed) => return self.abandon(id),
            Err(e) => {
                warn!(entry_id = %id, "Cannot start send: {}", e);
                return self.abandon(id);
            }
        }

        let Some(current) = store.get(id).await else {
            return self.abandon(id);
        };
        let message = self.outgoing(id, draft, &current);

        self.log(id, ReconcileEvent::SendStarted { attempt });
        let started = Instant::now();

        match self.inner.transport.send(message).await {
            Ok(()) => {
                match store
                    .update_by_id(id, EntryPatch::state(EntryState::SentAwaitingConfirmation))
                    .await
                {
                    Ok(true) => {
                        self.log(
                            id,
                            ReconcileEvent::Sent {
                                attempt,
                                duration_ms: started.elapsed().as_millis() as u64,
                            },
                        );
                        AttemptOutcome::Sent
                    }
                    // Already retired by a refetch, or the scope is gone
                    _ => self.abandon(id),
                }
            }
            Err(e) => self.fail(id, FailureStage::Send, e).await,
        }
    }

    /// Payload from the captured draft, with URLs from the stored entry.
    fn outgoing(&self, id: &EntryId, draft: &Draft, current: &OptimisticEntry) -> OutgoingMessage {
        let attachments = draft
            .attachments
            .iter()
            .enumerate()
            .filter_map(|(i, original)| {
                let url = original
                    .uploaded_url
                    .clone()
                    .or_else(|| current.attachments.get(i).and_then(|a| a.uploaded_url.clone()))?;
                Some(HostedAttachment {
                    kind: original.kind,
                    url,
                    name: original.name.clone(),
                    mime_type: original.mime_type.clone(),
                })
            })
            .collect();

        OutgoingMessage {
            client_token: id.to_string(),
            author_id: self.inner.author_id,
            text: draft.text.clone(),
            attachments,
            reply_to: draft.reply_to.clone(),
        }
    }

    async fn fail(&self, id: &EntryId, stage: FailureStage, error: CollaboratorError) -> AttemptOutcome {
        let message = error.to_string();
        match self
            .inner
            .store
            .update_by_id(id, EntryPatch::failed(stage, message.clone()))
            .await
        {
            Ok(true) => {
                self.log(id, ReconcileEvent::Failed { message: message.clone() });
                AttemptOutcome::Failed(message)
            }
            _ => self.abandon(id),
        }
    }

    fn abandon(&self, id: &EntryId) -> AttemptOutcome {
        self.log(id, ReconcileEvent::Abandoned);
        AttemptOutcome::Abandoned
    }

    fn log(&self, id: &EntryId, event: ReconcileEvent) {
        self.inner.logger.log(ReconcileLog {
            component: COMPONENT,
            entry_id: id.clone(),
            event,
        });
    }
}
