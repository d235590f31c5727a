use std::collections::BTreeSet;
use std::time::Duration;

use tether_types::api::ConfirmedEntry;
use tether_types::models::{AttachmentKind, OptimisticEntry};

/// Knobs for `matches`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchPolicy {
    /// Timestamps must differ by strictly less than this.
    pub window: Duration,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(30),
        }
    }
}

/// Collapse whitespace runs to a single space and trim the ends.
/// Case and punctuation are significant.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn kinds<I: Iterator<Item = AttachmentKind>>(iter: I) -> BTreeSet<AttachmentKind> {
    iter.collect()
}

/// Does `real` stand for `optimistic`?
///
/// An echoed client token is authoritative when present. Otherwise the
/// heuristic applies: same author, same normalized text (or both empty with
/// the same attachment kinds), and creation times within the window.
/// Errs towards `false`: a missed match only keeps the optimistic entry on
/// screen a little longer.
pub fn matches(optimistic: &OptimisticEntry, real: &ConfirmedEntry, policy: &MatchPolicy) -> bool {
    if let Some(token) = &real.client_token {
        return token == optimistic.id.as_str();
    }

    if real.author_id != optimistic.author_id {
        return false;
    }

    let real_text = normalize_text(&real.text);
    let optimistic_text = normalize_text(&optimistic.text);
    let same_body = if real_text.is_empty() && optimistic_text.is_empty() {
        kinds(real.attachment_kinds()) == kinds(optimistic.attachments.iter().map(|a| a.kind))
    } else {
        real_text == optimistic_text
    };
    if !same_body {
        return false;
    }

    let delta = (real.created_at - optimistic.created_at).abs();
    match delta.to_std() {
        Ok(delta) => delta < policy.window,
        Err(_) => false,
    }
}
