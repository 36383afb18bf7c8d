use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::{
    error::EngineError,
    types::{CanonicalMessage, DeliveryState, MessageKind, MessagePayload},
};

/// Provider type tag marking a media event as a raster image.
const IMAGE_TYPE_TAG: &str = "IMAGE";

/// URL extensions treated as inline-renderable images when the provider
/// tag is ambiguous.
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp"];

/// Body of a raw transport event, in provider wire shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RawBody {
    /// Plain text event.
    Text {
        /// Message text.
        body: String,
    },
    /// Media event (image or file attachment).
    Media {
        /// Provider media subtype tag, for example `IMAGE`.
        type_tag: String,
        /// Download URL of the media.
        url: String,
        /// Original file name, when the provider carries one.
        display_name: Option<String>,
    },
}

/// One raw chat event as delivered by the transport, before
/// normalization into a [`CanonicalMessage`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawEvent {
    /// Server-assigned message id.
    pub server_id: i64,
    /// Composite id of the authoring party.
    pub sender_id: String,
    /// The provider's embedded send instant (RFC 3339), distinct from
    /// the transport receipt time.
    pub sent_at_token: String,
    /// Event body.
    pub body: RawBody,
}

/// Convert a raw transport event into the canonical record shape.
///
/// Events with an empty payload are skipped (`Ok(None)`). An
/// unparseable send timestamp is a data error surfaced to the caller,
/// never silently defaulted.
pub fn normalize(event: &RawEvent) -> Result<Option<CanonicalMessage>, EngineError> {
    let (kind, payload) = match &event.body {
        RawBody::Text { body } => {
            if body.is_empty() {
                return Ok(None);
            }
            (MessageKind::Text, MessagePayload::text(body.clone()))
        }
        RawBody::Media {
            type_tag,
            url,
            display_name,
        } => {
            if url.is_empty() {
                return Ok(None);
            }
            (
                media_kind(type_tag, url),
                MessagePayload {
                    content: url.clone(),
                    display_name: display_name.clone(),
                },
            )
        }
    };

    let sent_at = parse_send_timestamp(&event.sent_at_token)?;

    Ok(Some(CanonicalMessage {
        id: event.server_id,
        kind,
        payload,
        sender_id: event.sender_id.clone(),
        sent_at,
        delivery: DeliveryState::Confirmed,
        correlation: None,
    }))
}

/// Parse a provider send-timestamp token into local time.
pub fn parse_send_timestamp(token: &str) -> Result<DateTime<Local>, EngineError> {
    DateTime::parse_from_rfc3339(token)
        .map(|instant| instant.with_timezone(&Local))
        .map_err(|err| {
            EngineError::malformed("bad_timestamp", format!("invalid send timestamp '{token}': {err}"))
        })
}

/// Collapse the provider's two media subtypes into `Image` vs `File`.
fn media_kind(type_tag: &str, url: &str) -> MessageKind {
    if type_tag.eq_ignore_ascii_case(IMAGE_TYPE_TAG) || has_image_extension(url) {
        MessageKind::Image
    } else {
        MessageKind::File
    }
}

fn has_image_extension(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    match path.rsplit_once('.') {
        Some((_, extension)) => IMAGE_EXTENSIONS
            .iter()
            .any(|known| extension.eq_ignore_ascii_case(known)),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::error::EngineErrorKind;

    fn text_event(body: &str) -> RawEvent {
        RawEvent {
            server_id: 41,
            sender_id: "7-12".to_owned(),
            sent_at_token: "2026-03-04T10:15:00+00:00".to_owned(),
            body: RawBody::Text {
                body: body.to_owned(),
            },
        }
    }

    #[test]
    fn skips_events_with_empty_payload() {
        let normalized = normalize(&text_event("")).expect("empty body is a skip, not an error");
        assert_eq!(normalized, None);
    }

    #[test]
    fn normalizes_text_events_as_confirmed() {
        let message = normalize(&text_event("hello"))
            .expect("valid event")
            .expect("non-empty body must normalize");

        assert_eq!(message.id, 41);
        assert_eq!(message.kind, MessageKind::Text);
        assert_eq!(message.payload.content, "hello");
        assert_eq!(message.delivery, DeliveryState::Confirmed);
        assert_eq!(message.correlation, None);
    }

    #[test]
    fn parses_provider_timestamp_into_local_time() {
        let message = normalize(&text_event("hi"))
            .expect("valid event")
            .expect("message");
        let expected = chrono::Utc
            .with_ymd_and_hms(2026, 3, 4, 10, 15, 0)
            .single()
            .expect("valid instant");
        assert_eq!(message.sent_at.with_timezone(&chrono::Utc), expected);
    }

    #[test]
    fn rejects_unparseable_timestamp_with_stable_code() {
        let mut event = text_event("hi");
        event.sent_at_token = "not-a-date".to_owned();

        let err = normalize(&event).expect_err("bad timestamp must surface");
        assert_eq!(err.kind, EngineErrorKind::MalformedMessage);
        assert_eq!(err.code, "bad_timestamp");
    }

    #[test]
    fn collapses_media_subtypes_by_tag_and_extension() {
        let mut event = text_event("unused");
        event.body = RawBody::Media {
            type_tag: "IMAGE".to_owned(),
            url: "https://cdn.example.org/a".to_owned(),
            display_name: None,
        };
        let message = normalize(&event).expect("valid").expect("media");
        assert_eq!(message.kind, MessageKind::Image);

        event.body = RawBody::Media {
            type_tag: "FILE".to_owned(),
            url: "https://cdn.example.org/photo.JPG?token=1".to_owned(),
            display_name: None,
        };
        let message = normalize(&event).expect("valid").expect("media");
        assert_eq!(message.kind, MessageKind::Image);

        event.body = RawBody::Media {
            type_tag: "FILE".to_owned(),
            url: "https://cdn.example.org/report.pdf".to_owned(),
            display_name: Some("report.pdf".to_owned()),
        };
        let message = normalize(&event).expect("valid").expect("media");
        assert_eq!(message.kind, MessageKind::File);
        assert_eq!(message.payload.display_name.as_deref(), Some("report.pdf"));
    }

    #[test]
    fn skips_media_with_empty_url() {
        let mut event = text_event("unused");
        event.body = RawBody::Media {
            type_tag: "FILE".to_owned(),
            url: String::new(),
            display_name: None,
        };
        assert_eq!(normalize(&event).expect("skip"), None);
    }
}
