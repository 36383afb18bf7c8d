use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Transport connection lifecycle observed by the recovery coordinator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No live connection to the realtime transport.
    #[default]
    Disconnected,
    /// A connection attempt is currently in flight.
    Connecting,
    /// Connection is established and usable.
    Open,
}

/// Message content classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageKind {
    /// Plain text message.
    Text,
    /// Media message rendered inline (raster image).
    Image,
    /// Media message rendered as a downloadable attachment.
    File,
}

/// Delivery lifecycle of a canonical message.
///
/// `Pending` only ever appears on locally-originated messages that still
/// await their server echo.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeliveryState {
    /// Locally created, not yet confirmed by the transport.
    Pending,
    /// Acknowledged by the server with a server-assigned id.
    Confirmed,
    /// Transmission failed; kept for retry.
    Failed,
}

/// Message content: a text body, or a URI for media kinds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessagePayload {
    /// Text body for `Text`, media URI for `Image`/`File`.
    pub content: String,
    /// Original file name carried alongside `File` payloads.
    pub display_name: Option<String>,
}

impl MessagePayload {
    /// Text payload with no attachment metadata.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            display_name: None,
        }
    }
}

/// Engine-internal normalized representation of one chat event.
///
/// Immutable once created. Locally-originated pending messages carry a
/// temporary id derived from the synthesis instant; reconciliation
/// replaces it with the server-assigned id (never both).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalMessage {
    /// Unique id within the conversation (temporary for pending sends).
    pub id: i64,
    /// Content classification.
    pub kind: MessageKind,
    /// Text body or media URI.
    pub payload: MessagePayload,
    /// Composite id of the authoring party.
    pub sender_id: String,
    /// Provider send instant in local time; source of timeline ordering.
    pub sent_at: DateTime<Local>,
    /// Delivery lifecycle state.
    pub delivery: DeliveryState,
    /// Token correlating an optimistic send with its server echo.
    pub correlation: Option<Uuid>,
}

/// Grouping axis of a timeline entry's presentation.
///
/// The full presentation kind is this axis crossed with [`MessageKind`];
/// see [`TimelineEntry::presentation`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Grouping {
    /// Starts a run: date header shown, or the sender changed.
    FirstOfGroup,
    /// Continues the previous sender's run; avatar/name suppressed.
    ContinuationOfGroup,
}

/// A canonical message annotated with presentation-only derived fields.
///
/// Rebuilt from canonical sequences; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimelineEntry {
    /// The underlying canonical message.
    pub message: CanonicalMessage,
    /// True for the first entry of each distinct calendar day.
    pub show_date_header: bool,
    /// Grouping relative to the preceding entry.
    pub grouping: Grouping,
    /// Resolved display name of the author.
    pub sender_name: String,
    /// Resolved picture reference of the author.
    pub sender_picture: Option<String>,
    /// True when the author is the peer (presence indicator shown).
    pub from_peer: bool,
    /// Uppercased header label, present iff `show_date_header`.
    pub header_date: Option<String>,
    /// Clock label rendered per the configured [`ClockStyle`].
    pub time_label: String,
}

impl TimelineEntry {
    /// Full presentation kind: grouping crossed with the message kind.
    pub fn presentation(&self) -> (Grouping, MessageKind) {
        (self.grouping, self.message.kind)
    }
}

/// Clock rendering style for per-message time labels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ClockStyle {
    /// `09:41 AM`
    TwelveHour,
    /// `09:41`
    #[default]
    TwentyFourHour,
}

/// Human-readable status line derived by the presence reducer.
///
/// Localization is a presentation concern; the engine only reports the
/// typed variant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ConversationStatus {
    /// Nothing to show.
    #[default]
    Blank,
    /// The peer is currently typing.
    Typing,
    /// The peer has read the local user's last message.
    Seen,
}

/// Per-conversation configuration supplied at session construction.
///
/// Identity and organization ids are passed explicitly; the engine keeps
/// no ambient global settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationConfig {
    /// Composite `"{user}-{organization}"` id of the local user.
    pub local_user_key: String,
    /// Plain user id of the peer.
    pub peer_user_id: i64,
    /// Organization scope both participants belong to.
    pub organization_id: i64,
    /// Clock style for rendered time labels.
    pub clock_style: ClockStyle,
}

impl ConversationConfig {
    /// Deterministic channel lookup key for the peer participant.
    pub fn participant_key(&self) -> String {
        format!("{}-{}", self.peer_user_id, self.organization_id)
    }
}

/// Command channel input accepted by the session runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionCommand {
    /// Open the conversation: resolve profiles, restore the cached
    /// summary, acquire the channel and load recent history.
    Open,
    /// Optimistically send a message.
    Send {
        /// Text body or media URI.
        content: String,
        /// Content classification.
        kind: MessageKind,
    },
    /// Replay every failed pending send.
    RetryFailed,
    /// Forward local typing start/stop to the transport.
    SetTyping(bool),
    /// Mark the channel read for the local user.
    MarkRead,
    /// Reload recent history from the transport.
    Refresh,
    /// Tear the session down, persisting the conversation summary.
    Close,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CloseReason {
    /// The presentation layer closed the conversation.
    UserRequested,
    /// Channel membership dropped below two participants.
    PeerMissing,
    /// Local or peer profile could not be resolved on open.
    ProfileMissing,
}

/// Event channel output emitted by the session runtime.
///
/// Every mutation of session state is announced by the variant naming
/// the changed field, carrying the new value where the presentation
/// layer needs it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SessionEvent {
    /// The displayable timeline changed.
    TimelineChanged {
        /// Full ordered snapshot.
        entries: Vec<TimelineEntry>,
    },
    /// The status line changed.
    StatusChanged {
        /// New status value.
        status: ConversationStatus,
    },
    /// The peer's presence indicator changed.
    PresenceChanged {
        /// True when the peer is known to be online.
        online: bool,
    },
    /// The pending outbox changed.
    PendingChanged {
        /// Number of messages still awaiting confirmation or retry.
        remaining: usize,
    },
    /// An inbound message arrived while the conversation is open.
    NewMessageAlert,
    /// A transient, user-visible alert.
    AlertRaised {
        /// Stable machine-readable error code.
        code: String,
        /// Human-readable message.
        message: String,
    },
    /// The session ended and its state was released.
    Closed {
        /// Why the session ended.
        reason: CloseReason,
    },
}
