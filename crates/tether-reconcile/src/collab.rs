//! Narrow contracts for the collaborators the reconciliation core consumes.
//! None of them know about optimistic entries.

use std::future::Future;

use tether_types::api::{ConfirmedEntry, OutgoingMessage};
use tether_types::models::Attachment;

use crate::error::CollaboratorError;

/// Network send. Servers are not required to echo `client_token`.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, message: OutgoingMessage) -> impl Future<Output = Result<(), CollaboratorError>> + Send;
}

/// Media upload, one attachment per call. Returns the hosted URL.
pub trait Uploader: Send + Sync + 'static {
    fn upload(&self, attachment: Attachment) -> impl Future<Output = Result<String, CollaboratorError>> + Send;
}

/// Server-confirmed entries of one scope, oldest first.
pub trait DataSource: Send + Sync + 'static {
    fn fetch(&self) -> impl Future<Output = Result<Vec<ConfirmedEntry>, CollaboratorError>> + Send;
}
