/// Tether shared types.
///
/// Plain serde data exchanged between the reconciliation core and whatever
/// sits around it (UI bridge, transports, tests).

pub mod api;
pub mod events;
pub mod models;

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use crate::events::{RemovalReason, ThreadEvent};
    use crate::models::*;

    #[test]
    fn local_ids_never_look_like_server_ids() {
        let id = EntryId::generate();
        assert!(EntryId::is_local(id.as_str()));
        assert!(id.as_str().parse::<Uuid>().is_err());
        assert_ne!(id, EntryId::generate());
    }

    #[test]
    fn state_machine_is_forward_only() {
        use EntryState::*;
        assert!(PendingUpload.can_transition_to(Sending));
        assert!(ReadyToSend.can_transition_to(Sending));
        assert!(Sending.can_transition_to(SentAwaitingConfirmation));
        assert!(Failed.can_transition_to(Sending));

        assert!(!Sending.can_transition_to(PendingUpload));
        assert!(!SentAwaitingConfirmation.can_transition_to(Sending));
        assert!(!SentAwaitingConfirmation.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(SentAwaitingConfirmation));

        assert!(PendingUpload.is_in_flight());
        assert!(Sending.is_in_flight());
        assert!(!SentAwaitingConfirmation.is_in_flight());
        assert!(!Failed.is_in_flight());
    }

    #[test]
    fn initial_state_depends_on_pending_media() {
        let author = Uuid::new_v4();
        let text_only = OptimisticEntry::from_draft(
            EntryId::generate(),
            EntryKind::Message,
            author,
            Draft::text("hello"),
            Utc::now(),
        );
        assert_eq!(text_only.state, EntryState::ReadyToSend);

        let with_photo = OptimisticEntry::from_draft(
            EntryId::generate(),
            EntryKind::Comment,
            author,
            Draft::text("").with_attachment(Attachment::new("file:///a.jpg", AttachmentKind::Image)),
            Utc::now(),
        );
        assert_eq!(with_photo.state, EntryState::PendingUpload);
        assert!(with_photo.needs_upload());

        let mut hosted = Attachment::new("file:///b.jpg", AttachmentKind::Image);
        hosted.uploaded_url = Some("https://cdn.example/b.jpg".into());
        let already_hosted = OptimisticEntry::from_draft(
            EntryId::generate(),
            EntryKind::Message,
            author,
            Draft::text("").with_attachment(hosted),
            Utc::now(),
        );
        assert!(!already_hosted.needs_upload());
        assert_eq!(already_hosted.state, EntryState::ReadyToSend);
    }

    #[test]
    fn blank_drafts_are_empty() {
        assert!(Draft::text("  \n\t").is_empty());
        assert!(!Draft::text(" hi ").is_empty());
        assert!(!Draft::text("")
            .with_attachment(Attachment::new("file:///a.m4a", AttachmentKind::Audio))
            .is_empty());
    }

    #[test]
    fn events_use_tagged_envelope() {
        let id = EntryId::generate();
        let event = ThreadEvent::EntryRemoved {
            id: id.clone(),
            reason: RemovalReason::Stale,
        };
        assert_eq!(event.entry_id(), Some(&id));
        assert_eq!(ThreadEvent::Closed.entry_id(), None);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "EntryRemoved");
        assert_eq!(json["data"]["reason"]["reason"], "stale");

        let state = serde_json::to_value(EntryState::SentAwaitingConfirmation).unwrap();
        assert_eq!(state, "sent-awaiting-confirmation");

        let failed_at = serde_json::to_value(FailureStage::Upload).unwrap();
        assert_eq!(failed_at, "upload");
    }
}
