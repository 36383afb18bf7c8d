//! Core contract of the chat timeline synchronization engine.
//!
//! This crate defines the canonical message model, the normalization and
//! timeline-building transforms, the presence reducer, connection poll
//! policy, and the common error/channel abstractions shared between the
//! session runtime and presentation consumers.

/// Async command/event channel primitives.
pub mod channel;
/// Stable engine error taxonomy.
pub mod error;
/// Raw transport events and normalization into canonical records.
pub mod normalize;
/// Presence/status line reduction.
pub mod presence;
/// Connect poll schedule used by the recovery coordinator.
pub mod retry;
/// Timeline rebuild: ordering, grouping and presentation derivation.
pub mod timeline;
/// Protocol types (commands, events, canonical records).
pub mod types;

pub use channel::{EngineChannels, EventStream, SessionChannelError};
pub use error::{EngineError, EngineErrorKind};
pub use normalize::{RawBody, RawEvent, normalize, parse_send_timestamp};
pub use presence::StatusReducer;
pub use retry::ConnectPollPolicy;
pub use timeline::{
    ConversationIdentities, PresentationContext, SenderIdentity, header_label, rebuild, time_label,
};
pub use types::{
    CanonicalMessage, ClockStyle, CloseReason, ConnectionState, ConversationConfig,
    ConversationStatus, DeliveryState, Grouping, MessageKind, MessagePayload, SessionCommand,
    SessionEvent, TimelineEntry,
};
