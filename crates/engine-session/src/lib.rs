//! Conversation session runtime.
//!
//! One spawned task per open conversation owns all of its state:
//! commands from the presentation layer and events from the transport
//! are drained one at a time, so timeline mutations always apply in
//! resume order. The channel coordinator and pending outbox live here
//! next to the runtime that drives them.

/// Serialized connection recovery and channel resolution.
pub mod coordinator;
/// Pending optimistic-send queue.
pub mod outbox;
/// The per-conversation session task.
pub mod runtime;

pub use coordinator::ChannelCoordinator;
pub use outbox::PendingOutbox;
pub use runtime::{SessionCollaborators, SessionHandle, spawn_session};
