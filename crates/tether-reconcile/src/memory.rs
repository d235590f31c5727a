//! In-process collaborators: a fake message server and media host with
//! failure injection. Used by the tests and the simulator.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, watch};
use uuid::Uuid;

use tether_types::api::{ConfirmedEntry, OutgoingMessage};
use tether_types::models::Attachment;

use crate::collab::{DataSource, Transport, Uploader};
use crate::error::CollaboratorError;

/// Takes one unit from a countdown, returning whether one was available.
fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        .is_ok()
}

/// Fake server: accepts sends and serves them back as confirmed entries.
pub struct MemoryServer {
    entries: Mutex<Vec<ConfirmedEntry>>,
    echo_tokens: bool,
    failure_rate: f64,
    fail_next: AtomicU32,
    fail_next_fetch: AtomicU32,
    latencies: Mutex<VecDeque<Duration>>,
    /// `true` while sends are held back
    gate: watch::Sender<bool>,
    accepted: AtomicUsize,
}

impl Default for MemoryServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryServer {
    /// A server that never echoes client tokens, like most real ones.
    pub fn new() -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            entries: Mutex::new(Vec::new()),
            echo_tokens: false,
            failure_rate: 0.0,
            fail_next: AtomicU32::new(0),
            fail_next_fetch: AtomicU32::new(0),
            latencies: Mutex::new(VecDeque::new()),
            gate,
            accepted: AtomicUsize::new(0),
        }
    }

    /// Echo `client_token` on confirmed entries.
    pub fn with_token_echo(mut self) -> Self {
        self.echo_tokens = true;
        self
    }

    /// Fail each send with this probability.
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Fail the next `n` sends.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::Release);
    }

    /// Fail the next `n` refetches.
    pub fn fail_next_fetch(&self, n: u32) {
        self.fail_next_fetch.store(n, Ordering::Release);
    }

    /// Per-call delays, consumed in call order.
    pub async fn script_latency(&self, delays: impl IntoIterator<Item = Duration>) {
        self.latencies.lock().await.extend(delays);
    }

    /// Park every send until `release`.
    pub fn hold(&self) {
        self.gate.send_replace(true);
    }

    pub fn release(&self) {
        self.gate.send_replace(false);
    }

    /// Inject an entry written by someone else.
    pub async fn push_foreign(&self, author_id: Uuid, text: impl Into<String>) -> ConfirmedEntry {
        let entry = ConfirmedEntry {
            id: Uuid::new_v4(),
            author_id,
            text: text.into(),
            created_at: Utc::now(),
            attachments: vec![],
            client_token: None,
        };
        self.entries.lock().await.push(entry.clone());
        entry
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::Acquire)
    }

    pub async fn confirmed(&self) -> Vec<ConfirmedEntry> {
        self.entries.lock().await.clone()
    }
}

impl Transport for MemoryServer {
    async fn send(&self, message: OutgoingMessage) -> Result<(), CollaboratorError> {
        let delay = self.latencies.lock().await.pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut gate = self.gate.subscribe();
        let open = gate.wait_for(|held| !*held).await.is_ok();
        if !open {
            return Err(CollaboratorError::Transport("server shut down".into()));
        }

        if take_one(&self.fail_next) || (self.failure_rate > 0.0 && rand::random::<f64>() < self.failure_rate) {
            return Err(CollaboratorError::Transport("connection reset".into()));
        }

        let entry = ConfirmedEntry {
            id: Uuid::new_v4(),
            author_id: message.author_id,
            text: message.text,
            created_at: Utc::now(),
            attachments: message.attachments,
            client_token: self.echo_tokens.then_some(message.client_token),
        };
        self.entries.lock().await.push(entry);
        self.accepted.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

impl DataSource for MemoryServer {
    async fn fetch(&self) -> Result<Vec<ConfirmedEntry>, CollaboratorError> {
        if take_one(&self.fail_next_fetch) {
            return Err(CollaboratorError::Fetch("timeline unavailable".into()));
        }
        Ok(self.entries.lock().await.clone())
    }
}

/// Fake media host.
pub struct MemoryUploader {
    base_url: String,
    failure_rate: f64,
    fail_next: AtomicU32,
    uploads: AtomicUsize,
}

impl Default for MemoryUploader {
    fn default() -> Self {
        Self::new("https://media.tether.local")
    }
}

impl MemoryUploader {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            failure_rate: 0.0,
            fail_next: AtomicU32::new(0),
            uploads: AtomicUsize::new(0),
        }
    }

    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Fail the next `n` uploads.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::Release);
    }

    /// Successful uploads so far.
    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::Acquire)
    }
}

impl Uploader for MemoryUploader {
    async fn upload(&self, attachment: Attachment) -> Result<String, CollaboratorError> {
        if take_one(&self.fail_next) || (self.failure_rate > 0.0 && rand::random::<f64>() < self.failure_rate) {
            return Err(CollaboratorError::Upload(format!("{} {} rejected", attachment.kind, attachment.uri)));
        }

        self.uploads.fetch_add(1, Ordering::AcqRel);
        Ok(format!("{}/{}/{}", self.base_url, attachment.kind, Uuid::new_v4()))
    }
}
