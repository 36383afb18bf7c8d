use crate::types::ConversationStatus;

/// Derives the single status line from typing events, read receipts and
/// last-message authorship.
///
/// A visible `Typing` status holds until a typing-stop event replaces
/// it; plain recomputations never override it.
#[derive(Debug, Clone, Default)]
pub struct StatusReducer {
    status: ConversationStatus,
}

impl StatusReducer {
    pub fn status(&self) -> ConversationStatus {
        self.status
    }

    /// Apply a typing start/stop event. Returns whether the visible
    /// status changed.
    pub fn apply_typing(&mut self, typing: bool) -> bool {
        let next = if typing {
            ConversationStatus::Typing
        } else {
            ConversationStatus::Blank
        };
        self.replace(next)
    }

    /// Force the status blank, bypassing the typing hold. Used when an
    /// inbound message supersedes whatever was shown.
    pub fn clear(&mut self) -> bool {
        self.replace(ConversationStatus::Blank)
    }

    /// Recompute from the last timeline entry's authorship and the
    /// peer's unread count for it.
    ///
    /// `last_entry_by_local` is `None` for an empty timeline. A held
    /// `Typing` status is left untouched.
    pub fn recompute(&mut self, last_entry_by_local: Option<bool>, peer_unread_for_last: i64) -> bool {
        if self.status == ConversationStatus::Typing {
            return false;
        }

        let next = match last_entry_by_local {
            Some(true) if peer_unread_for_last <= 0 => ConversationStatus::Seen,
            _ => ConversationStatus::Blank,
        };
        self.replace(next)
    }

    fn replace(&mut self, next: ConversationStatus) -> bool {
        if self.status == next {
            return false;
        }
        self.status = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_blank() {
        assert_eq!(StatusReducer::default().status(), ConversationStatus::Blank);
    }

    #[test]
    fn typing_holds_until_explicitly_stopped() {
        let mut reducer = StatusReducer::default();
        assert!(reducer.apply_typing(true));
        assert_eq!(reducer.status(), ConversationStatus::Typing);

        // Read receipts while typing do not change the visible line.
        assert!(!reducer.recompute(Some(true), 0));
        assert_eq!(reducer.status(), ConversationStatus::Typing);

        assert!(reducer.apply_typing(false));
        assert_eq!(reducer.status(), ConversationStatus::Blank);
    }

    #[test]
    fn shows_seen_only_for_read_local_messages() {
        let mut reducer = StatusReducer::default();

        assert!(reducer.recompute(Some(true), 0));
        assert_eq!(reducer.status(), ConversationStatus::Seen);

        assert!(reducer.recompute(Some(true), 1));
        assert_eq!(reducer.status(), ConversationStatus::Blank);
    }

    #[test]
    fn peer_authored_last_entry_stays_blank() {
        let mut reducer = StatusReducer::default();
        assert!(!reducer.recompute(Some(false), 0));
        assert_eq!(reducer.status(), ConversationStatus::Blank);
    }

    #[test]
    fn empty_timeline_stays_blank() {
        let mut reducer = StatusReducer::default();
        assert!(!reducer.recompute(None, 0));
        assert_eq!(reducer.status(), ConversationStatus::Blank);
    }

    #[test]
    fn inbound_message_clears_a_held_typing_status() {
        let mut reducer = StatusReducer::default();
        reducer.apply_typing(true);
        assert!(reducer.clear());
        assert_eq!(reducer.status(), ConversationStatus::Blank);
    }
}
