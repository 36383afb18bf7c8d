//! Collaborator contracts consumed by the session runtime, plus
//! in-memory reference implementations used by tests and the smoke
//! binary.
//!
//! The engine never talks to a concrete SDK, store or speaker directly;
//! everything outside the reconciliation logic arrives through the
//! traits defined here.

/// Profile lookup and audio cue contracts.
pub mod directory;
/// Cached conversation summary store.
pub mod summary;
/// Realtime transport contract and wire types.
pub mod transport;

pub use directory::{
    AudioCuePlayer, NullAudioCues, Profile, ProfileLookup, RecordingAudioCues,
    StaticProfileDirectory,
};
pub use summary::{
    ConversationSummary, InMemorySummaryStore, RECENT_MESSAGE_CAP, SummaryStore,
};
pub use transport::{
    ChannelHandle, ConfirmedMessage, InMemoryTransport, SendToken, Transport, TransportEvent,
};
