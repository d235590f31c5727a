use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{AttachmentKind, ReplyRef};

// -- Outgoing --

/// Payload handed to the transport once every attachment is hosted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Temporary id of the optimistic entry. Servers that support
    /// idempotency tokens echo it back as `ConfirmedEntry::client_token`;
    /// others ignore it.
    pub client_token: String,
    pub author_id: Uuid,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<HostedAttachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostedAttachment {
    pub kind: AttachmentKind,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

// -- Confirmed --

/// A server-confirmed entry as returned by a refetch of the scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmedEntry {
    pub id: Uuid,
    pub author_id: Uuid,
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub attachments: Vec<HostedAttachment>,
    /// Echoed temporary id, when the server supports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_token: Option<String>,
}

impl ConfirmedEntry {
    pub fn attachment_kinds(&self) -> impl Iterator<Item = AttachmentKind> + '_ {
        self.attachments.iter().map(|a| a.kind)
    }
}
