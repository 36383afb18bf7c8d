use chrono::{DateTime, Local, NaiveDate};

use crate::types::{CanonicalMessage, ClockStyle, Grouping, TimelineEntry};

/// Resolved display identity of one conversation participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderIdentity {
    /// Composite user key messages are matched against.
    pub user_key: String,
    /// Display name.
    pub name: String,
    /// Picture reference, when the profile carries one.
    pub picture: Option<String>,
}

/// Both participants' identities, resolved by the profile collaborator
/// before the builder runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationIdentities {
    pub local: SenderIdentity,
    pub peer: SenderIdentity,
}

/// Presentation inputs the builder needs beyond the messages: resolved
/// identities, clock style, and the calendar day header labels are
/// computed against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentationContext {
    pub identities: ConversationIdentities,
    pub clock_style: ClockStyle,
    pub today: NaiveDate,
}

/// Rebuild the presentation-annotated timeline from canonical messages.
///
/// `new_messages` are stable-sorted by send instant, so arrival order is
/// preserved for equal timestamps. With `keep_existing` the new entries
/// are appended after the existing ones without re-sorting the merged
/// sequence: callers guarantee incremental batches are causally after
/// what is already displayed. Without it the existing entries are
/// discarded (full-history refresh).
///
/// Pure transform; callers own persistence of the result.
pub fn rebuild(
    existing: Vec<TimelineEntry>,
    new_messages: Vec<CanonicalMessage>,
    keep_existing: bool,
    ctx: &PresentationContext,
) -> Vec<TimelineEntry> {
    if new_messages.is_empty() {
        return existing;
    }

    let mut entries = if keep_existing { existing } else { Vec::new() };

    let mut ordered = new_messages;
    ordered.sort_by_key(|message| message.sent_at);

    for message in ordered {
        let previous = entries.last();

        let show_date_header = previous
            .is_none_or(|prev| prev.message.sent_at.date_naive() != message.sent_at.date_naive());
        let grouping = if show_date_header
            || previous.is_some_and(|prev| prev.message.sender_id != message.sender_id)
        {
            Grouping::FirstOfGroup
        } else {
            Grouping::ContinuationOfGroup
        };

        let from_peer = message.sender_id != ctx.identities.local.user_key;
        let identity = if from_peer {
            &ctx.identities.peer
        } else {
            &ctx.identities.local
        };

        let header_date =
            show_date_header.then(|| header_label(message.sent_at.date_naive(), ctx.today));
        let time_label = time_label(message.sent_at, ctx.clock_style);

        entries.push(TimelineEntry {
            sender_name: identity.name.clone(),
            sender_picture: identity.picture.clone(),
            message,
            show_date_header,
            grouping,
            from_peer,
            header_date,
            time_label,
        });
    }

    entries
}

/// Clock label for one message.
pub fn time_label(at: DateTime<Local>, style: ClockStyle) -> String {
    match style {
        ClockStyle::TwelveHour => at.format("%I:%M %p").to_string(),
        ClockStyle::TwentyFourHour => at.format("%H:%M").to_string(),
    }
}

/// Uppercased day-header label: TODAY, YESTERDAY, the weekday name for
/// the current week, or the full date.
pub fn header_label(day: NaiveDate, today: NaiveDate) -> String {
    match (today - day).num_days() {
        0 => "TODAY".to_owned(),
        1 => "YESTERDAY".to_owned(),
        2..=6 => day.format("%A").to_string().to_uppercase(),
        _ => day.format("%B %-d, %Y").to_string().to_uppercase(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::types::{DeliveryState, MessageKind, MessagePayload};

    const LOCAL_KEY: &str = "9-12";
    const PEER_KEY: &str = "7-12";

    fn ctx() -> PresentationContext {
        PresentationContext {
            identities: ConversationIdentities {
                local: SenderIdentity {
                    user_key: LOCAL_KEY.to_owned(),
                    name: "Ana Silva".to_owned(),
                    picture: Some("ana.png".to_owned()),
                },
                peer: SenderIdentity {
                    user_key: PEER_KEY.to_owned(),
                    name: "Rui Costa".to_owned(),
                    picture: None,
                },
            },
            clock_style: ClockStyle::TwentyFourHour,
            today: NaiveDate::from_ymd_opt(2026, 3, 6).expect("valid date"),
        }
    }

    fn at(day: u32, hour: u32, minute: u32, second: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2026, 3, day, hour, minute, second)
            .single()
            .expect("unambiguous local instant")
    }

    fn message(id: i64, sender: &str, sent_at: DateTime<Local>) -> CanonicalMessage {
        CanonicalMessage {
            id,
            kind: MessageKind::Text,
            payload: MessagePayload::text(format!("msg-{id}")),
            sender_id: sender.to_owned(),
            sent_at,
            delivery: DeliveryState::Confirmed,
            correlation: None,
        }
    }

    #[test]
    fn orders_entries_by_timestamp_non_decreasing() {
        let scrambled = vec![
            message(3, PEER_KEY, at(5, 14, 0, 0)),
            message(1, PEER_KEY, at(4, 9, 0, 0)),
            message(2, LOCAL_KEY, at(4, 21, 30, 0)),
        ];

        let entries = rebuild(Vec::new(), scrambled, false, &ctx());

        let stamps: Vec<_> = entries.iter().map(|e| e.message.sent_at).collect();
        let mut sorted = stamps.clone();
        sorted.sort();
        assert_eq!(stamps, sorted);
        assert_eq!(
            entries.iter().map(|e| e.message.id).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn stable_sort_preserves_arrival_order_for_equal_timestamps() {
        let tied = vec![
            message(10, PEER_KEY, at(4, 9, 0, 0)),
            message(11, PEER_KEY, at(4, 9, 0, 0)),
            message(12, PEER_KEY, at(4, 9, 0, 0)),
        ];

        let entries = rebuild(Vec::new(), tied, false, &ctx());
        assert_eq!(
            entries.iter().map(|e| e.message.id).collect::<Vec<_>>(),
            vec![10, 11, 12]
        );
    }

    #[test]
    fn batch_rebuild_matches_sequential_appends() {
        let messages = vec![
            message(1, PEER_KEY, at(4, 9, 0, 0)),
            message(2, LOCAL_KEY, at(4, 9, 5, 0)),
            message(3, LOCAL_KEY, at(5, 8, 0, 0)),
            message(4, PEER_KEY, at(5, 8, 0, 30)),
        ];

        let batch = rebuild(Vec::new(), messages.clone(), false, &ctx());

        let mut incremental = Vec::new();
        for msg in messages {
            incremental = rebuild(incremental, vec![msg], true, &ctx());
        }

        assert_eq!(batch, incremental);
    }

    #[test]
    fn shows_date_header_exactly_on_first_entry_of_each_day() {
        let messages = vec![
            message(1, PEER_KEY, at(4, 9, 0, 0)),
            message(2, PEER_KEY, at(4, 18, 0, 0)),
            message(3, LOCAL_KEY, at(5, 7, 0, 0)),
            message(4, PEER_KEY, at(5, 7, 1, 0)),
        ];

        let entries = rebuild(Vec::new(), messages, false, &ctx());
        let headers: Vec<_> = entries.iter().map(|e| e.show_date_header).collect();
        assert_eq!(headers, vec![true, false, true, false]);
        assert!(entries[0].header_date.is_some());
        assert!(entries[1].header_date.is_none());
    }

    #[test]
    fn groups_rapid_same_sender_messages_as_continuation() {
        let messages = vec![
            message(1, LOCAL_KEY, at(4, 10, 0, 0)),
            message(2, LOCAL_KEY, at(4, 10, 0, 1)),
        ];

        let entries = rebuild(Vec::new(), messages, false, &ctx());
        assert_eq!(entries[0].grouping, Grouping::FirstOfGroup);
        assert_eq!(entries[1].grouping, Grouping::ContinuationOfGroup);
        assert!(!entries[1].show_date_header);
        assert_eq!(
            entries[1].presentation(),
            (Grouping::ContinuationOfGroup, MessageKind::Text)
        );
    }

    #[test]
    fn sender_change_starts_a_new_group() {
        let messages = vec![
            message(1, PEER_KEY, at(4, 10, 0, 0)),
            message(2, LOCAL_KEY, at(4, 10, 0, 5)),
        ];

        let entries = rebuild(Vec::new(), messages, false, &ctx());
        assert_eq!(entries[1].grouping, Grouping::FirstOfGroup);
        assert!(!entries[1].show_date_header);
    }

    #[test]
    fn resolves_identity_fields_per_author() {
        let messages = vec![
            message(1, PEER_KEY, at(4, 10, 0, 0)),
            message(2, LOCAL_KEY, at(4, 10, 1, 0)),
        ];

        let entries = rebuild(Vec::new(), messages, false, &ctx());
        assert_eq!(entries[0].sender_name, "Rui Costa");
        assert!(entries[0].from_peer);
        assert_eq!(entries[1].sender_name, "Ana Silva");
        assert_eq!(entries[1].sender_picture.as_deref(), Some("ana.png"));
        assert!(!entries[1].from_peer);
    }

    #[test]
    fn empty_new_messages_is_a_no_op() {
        let seeded = rebuild(
            Vec::new(),
            vec![message(1, PEER_KEY, at(4, 10, 0, 0))],
            false,
            &ctx(),
        );

        let unchanged = rebuild(seeded.clone(), Vec::new(), false, &ctx());
        assert_eq!(unchanged, seeded);
    }

    #[test]
    fn discarding_existing_entries_rebuilds_from_scratch() {
        let seeded = rebuild(
            Vec::new(),
            vec![message(1, PEER_KEY, at(4, 10, 0, 0))],
            false,
            &ctx(),
        );

        let refreshed = rebuild(
            seeded,
            vec![message(2, PEER_KEY, at(5, 10, 0, 0))],
            false,
            &ctx(),
        );
        assert_eq!(refreshed.len(), 1);
        assert_eq!(refreshed[0].message.id, 2);
        assert!(refreshed[0].show_date_header);
    }

    #[test]
    fn renders_header_labels_relative_to_today() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 6).expect("valid");
        assert_eq!(header_label(today, today), "TODAY");
        assert_eq!(
            header_label(today.pred_opt().expect("valid"), today),
            "YESTERDAY"
        );
        // 2026-03-02 is a Monday, four days back.
        assert_eq!(
            header_label(NaiveDate::from_ymd_opt(2026, 3, 2).expect("valid"), today),
            "MONDAY"
        );
        assert_eq!(
            header_label(NaiveDate::from_ymd_opt(2026, 1, 15).expect("valid"), today),
            "JANUARY 15, 2026"
        );
    }

    #[test]
    fn renders_time_labels_per_clock_style() {
        let at = at(4, 21, 5, 0);
        assert_eq!(time_label(at, ClockStyle::TwentyFourHour), "21:05");
        assert_eq!(time_label(at, ClockStyle::TwelveHour), "09:05 PM");
    }
}
