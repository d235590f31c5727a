use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix that keeps client ids out of the server's UUID namespace.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// Temporary identifier of an optimistic entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(String);

impl EntryId {
    /// Fresh id. UUIDv4 under the local prefix, so ids are never reused
    /// within a session and never parse as a server id.
    pub fn generate() -> Self {
        Self(format!("{}{}", LOCAL_ID_PREFIX, Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_local(id: &str) -> bool {
        id.starts_with(LOCAL_ID_PREFIX)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryKind {
    Message,
    Comment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttachmentKind {
    Image,
    Video,
    Audio,
    Document,
}

impl fmt::Display for AttachmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
        };
        f.write_str(s)
    }
}

/// A media reference attached to a draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    /// Local URI picked by the user.
    pub uri: String,
    pub kind: AttachmentKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Hosted URL, set once the upload finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_url: Option<String>,
}

impl Attachment {
    pub fn new(uri: impl Into<String>, kind: AttachmentKind) -> Self {
        Self {
            uri: uri.into(),
            kind,
            name: None,
            size: None,
            mime_type: None,
            uploaded_url: None,
        }
    }

    pub fn is_uploaded(&self) -> bool {
        self.uploaded_url.is_some()
    }
}

/// Denormalized copy of the entry being replied to. Not a live pointer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyRef {
    pub id: String,
    pub author_id: Uuid,
    pub text: String,
    #[serde(default)]
    pub has_attachment: bool,
}

/// Lifecycle of an optimistic entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryState {
    PendingUpload,
    ReadyToSend,
    Sending,
    SentAwaitingConfirmation,
    Failed,
}

impl EntryState {
    /// Forward-only transition table. `Failed -> Sending` is the retry edge.
    pub fn can_transition_to(self, next: EntryState) -> bool {
        use EntryState::*;
        matches!(
            (self, next),
            (PendingUpload, ReadyToSend)
                | (PendingUpload, Sending)
                | (PendingUpload, Failed)
                | (ReadyToSend, Sending)
                | (ReadyToSend, Failed)
                | (Sending, SentAwaitingConfirmation)
                | (Sending, Failed)
                | (Failed, Sending)
        )
    }

    /// Still uploading or sending; neither settled nor failed.
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::PendingUpload | Self::ReadyToSend | Self::Sending)
    }
}

/// Step of an attempt that failed. Decides what a retry redoes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureStage {
    /// At least one attachment failed to upload; retry re-uploads all of them
    Upload,
    /// Uploads finished but the transport rejected the send
    Send,
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PendingUpload => "pending-upload",
            Self::ReadyToSend => "ready-to-send",
            Self::Sending => "sending",
            Self::SentAwaitingConfirmation => "sent-awaiting-confirmation",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What the user asked to send.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub reply_to: Option<ReplyRef>,
}

impl Draft {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn replying_to(mut self, reply: ReplyRef) -> Self {
        self.reply_to = Some(reply);
        self
    }

    /// Nothing to send: blank text and no media.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.attachments.is_empty()
    }
}

/// A locally rendered stand-in for a message or comment whose server
/// confirmation is still pending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimisticEntry {
    pub id: EntryId,
    pub kind: EntryKind,
    pub author_id: Uuid,
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub replied_to: Option<ReplyRef>,
    pub state: EntryState,
    /// Human-readable reason of the last failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Where the last failed attempt stopped. Cleared when a retry starts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<FailureStage>,
    /// Number of send attempts started for this entry.
    #[serde(default)]
    pub attempts: u32,
}

impl OptimisticEntry {
    /// Build a fresh entry from a draft. Starts in `PendingUpload` when any
    /// attachment still needs uploading, otherwise `ReadyToSend`.
    pub fn from_draft(
        id: EntryId,
        kind: EntryKind,
        author_id: Uuid,
        draft: Draft,
        created_at: DateTime<Utc>,
    ) -> Self {
        let mut entry = Self {
            id,
            kind,
            author_id,
            text: draft.text,
            created_at,
            attachments: draft.attachments,
            replied_to: draft.reply_to,
            state: EntryState::ReadyToSend,
            error: None,
            failed_at: None,
            attempts: 0,
        };
        if entry.needs_upload() {
            entry.state = EntryState::PendingUpload;
        }
        entry
    }

    pub fn needs_upload(&self) -> bool {
        self.attachments.iter().any(|a| !a.is_uploaded())
    }
}
