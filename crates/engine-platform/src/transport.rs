use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering},
    },
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use engine_core::{ConnectionState, EngineError, RawEvent};

/// Buffer size of one subscription's event queue.
const SUBSCRIPTION_BUFFER: usize = 64;

/// Opaque reference to the transport-level conversation resource
/// between two participants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelHandle {
    /// Transport-unique channel address.
    pub url: String,
    /// Current member count; below two the conversation is invalid.
    pub member_count: u32,
}

/// Token attached to an outbound send and echoed back verbatim in the
/// confirmed message, correlating the optimistic record with its echo.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendToken {
    /// Locally-generated correlation token.
    pub correlation: Uuid,
    /// Original send instant (RFC 3339) as recorded by the sender.
    pub sent_at_token: String,
}

/// Server acknowledgement for one transmitted message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfirmedMessage {
    /// Server-assigned message id.
    pub id: i64,
    /// Message body as stored by the server.
    pub body: String,
    /// Server-recorded send instant (RFC 3339).
    pub sent_at_token: String,
    /// Correlation token echoed from the [`SendToken`].
    pub correlation: Uuid,
}

/// Push events delivered on a subscription stream.
///
/// Handlers never run on foreign threads: events queue here and the
/// session task drains them one at a time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransportEvent {
    /// A message arrived on a channel.
    Message {
        /// Channel the event belongs to.
        channel_url: String,
        /// Raw event payload, pre-normalization.
        event: RawEvent,
    },
    /// The peer started or stopped typing.
    TypingChanged {
        /// Channel the event belongs to.
        channel_url: String,
        /// Whether the peer is currently typing.
        typing: bool,
    },
    /// The peer's read position moved.
    ReadReceiptChanged {
        /// Channel the event belongs to.
        channel_url: String,
        /// Members that have not read the latest message; zero or
        /// below means the peer has seen it.
        unread_for_last: i64,
    },
    /// Device-level connectivity changed.
    ConnectivityChanged {
        /// Whether the network is reachable again.
        online: bool,
    },
}

/// Realtime transport consumed by the session runtime.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Current connection lifecycle state.
    fn connection_state(&self) -> ConnectionState;

    /// Issue an explicit connect request.
    async fn connect(&self) -> Result<(), EngineError>;

    /// Look up the channel for a deterministic participant key.
    async fn resolve_channel(
        &self,
        participant_key: &str,
    ) -> Result<Option<ChannelHandle>, EngineError>;

    /// Create a fresh channel for the given participants.
    async fn create_channel(
        &self,
        participant_keys: &[String],
    ) -> Result<ChannelHandle, EngineError>;

    /// Drop a channel that is no longer valid.
    async fn remove_channel(&self, channel: &ChannelHandle) -> Result<(), EngineError>;

    /// Transmit a message; the confirmed message echoes the token.
    async fn send(
        &self,
        channel: &ChannelHandle,
        text: &str,
        token: &SendToken,
    ) -> Result<ConfirmedMessage, EngineError>;

    /// Mark the channel read for the local user.
    async fn mark_read(&self, channel: &ChannelHandle) -> Result<(), EngineError>;

    /// Load the most recent history page for a channel.
    async fn load_recent(
        &self,
        channel: &ChannelHandle,
        limit: u16,
    ) -> Result<Vec<RawEvent>, EngineError>;

    /// Report local typing start/stop to the peer.
    async fn set_typing(&self, channel: &ChannelHandle, typing: bool) -> Result<(), EngineError>;

    /// Register a handler key and receive its event queue.
    fn subscribe(&self, handler_key: &str) -> mpsc::Receiver<TransportEvent>;

    /// Deterministically detach a previously registered handler.
    fn unsubscribe(&self, handler_key: &str);
}

#[derive(Debug, Default)]
struct InMemoryTransportInner {
    state: Mutex<ConnectionState>,
    fail_connect: AtomicBool,
    fail_send: AtomicBool,
    connect_calls: AtomicU32,
    mark_read_calls: AtomicU32,
    next_server_id: AtomicI64,
    created_member_count: AtomicU32,
    channels: Mutex<HashMap<String, ChannelHandle>>,
    removed_channels: Mutex<Vec<String>>,
    history: Mutex<Vec<RawEvent>>,
    sent: Mutex<Vec<(String, SendToken)>>,
    typing_reports: Mutex<Vec<bool>>,
    subscribers: Mutex<HashMap<String, mpsc::Sender<TransportEvent>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scriptable in-memory transport used by tests and the smoke binary.
///
/// Connection states, send/connect failures, created-channel membership
/// and history pages are all injectable; connect calls and outbound
/// traffic are recorded for assertions.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTransport {
    inner: Arc<InMemoryTransportInner>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        let transport = Self::default();
        transport
            .inner
            .created_member_count
            .store(2, Ordering::SeqCst);
        transport.inner.next_server_id.store(1_000, Ordering::SeqCst);
        transport
    }

    /// Override the reported connection state.
    pub fn set_connection_state(&self, state: ConnectionState) {
        *lock(&self.inner.state) = state;
    }

    /// Make subsequent `connect` calls fail.
    pub fn set_connect_fails(&self, fails: bool) {
        self.inner.fail_connect.store(fails, Ordering::SeqCst);
    }

    /// Make subsequent `send` calls fail.
    pub fn set_send_fails(&self, fails: bool) {
        self.inner.fail_send.store(fails, Ordering::SeqCst);
    }

    /// Member count stamped onto channels created from now on.
    pub fn set_created_member_count(&self, members: u32) {
        self.inner
            .created_member_count
            .store(members, Ordering::SeqCst);
    }

    /// Pre-register an existing channel under a participant key.
    pub fn preload_channel(&self, participant_key: &str, channel: ChannelHandle) {
        lock(&self.inner.channels).insert(participant_key.to_owned(), channel);
    }

    /// Replace the history page served by `load_recent`.
    pub fn set_history(&self, events: Vec<RawEvent>) {
        *lock(&self.inner.history) = events;
    }

    /// Push one event to every live subscription queue.
    pub fn inject_event(&self, event: TransportEvent) {
        for sender in lock(&self.inner.subscribers).values() {
            let _ = sender.try_send(event.clone());
        }
    }

    pub fn connect_calls(&self) -> u32 {
        self.inner.connect_calls.load(Ordering::SeqCst)
    }

    pub fn mark_read_calls(&self) -> u32 {
        self.inner.mark_read_calls.load(Ordering::SeqCst)
    }

    pub fn sent_messages(&self) -> Vec<(String, SendToken)> {
        lock(&self.inner.sent).clone()
    }

    pub fn typing_reports(&self) -> Vec<bool> {
        lock(&self.inner.typing_reports).clone()
    }

    pub fn removed_channels(&self) -> Vec<String> {
        lock(&self.inner.removed_channels).clone()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscribers).len()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    fn connection_state(&self) -> ConnectionState {
        *lock(&self.inner.state)
    }

    async fn connect(&self) -> Result<(), EngineError> {
        self.inner.connect_calls.fetch_add(1, Ordering::SeqCst);

        if self.inner.fail_connect.load(Ordering::SeqCst) {
            return Err(EngineError::transport_unavailable(
                "connect_failed",
                "in-memory transport is scripted to refuse connections",
            ));
        }

        self.set_connection_state(ConnectionState::Open);
        Ok(())
    }

    async fn resolve_channel(
        &self,
        participant_key: &str,
    ) -> Result<Option<ChannelHandle>, EngineError> {
        Ok(lock(&self.inner.channels).get(participant_key).cloned())
    }

    async fn create_channel(
        &self,
        participant_keys: &[String],
    ) -> Result<ChannelHandle, EngineError> {
        let key = participant_keys.join("+");
        let channel = ChannelHandle {
            url: format!("channel-{key}"),
            member_count: self.inner.created_member_count.load(Ordering::SeqCst),
        };

        lock(&self.inner.channels).insert(key, channel.clone());

        Ok(channel)
    }

    async fn remove_channel(&self, channel: &ChannelHandle) -> Result<(), EngineError> {
        lock(&self.inner.channels).retain(|_, known| known.url != channel.url);
        lock(&self.inner.removed_channels).push(channel.url.clone());
        Ok(())
    }

    async fn send(
        &self,
        _channel: &ChannelHandle,
        text: &str,
        token: &SendToken,
    ) -> Result<ConfirmedMessage, EngineError> {
        if self.inner.fail_send.load(Ordering::SeqCst) {
            return Err(EngineError::send_failed(
                "in-memory transport is scripted to refuse sends",
            ));
        }

        lock(&self.inner.sent).push((text.to_owned(), token.clone()));

        Ok(ConfirmedMessage {
            id: self.inner.next_server_id.fetch_add(1, Ordering::SeqCst),
            body: text.to_owned(),
            sent_at_token: token.sent_at_token.clone(),
            correlation: token.correlation,
        })
    }

    async fn mark_read(&self, _channel: &ChannelHandle) -> Result<(), EngineError> {
        self.inner.mark_read_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load_recent(
        &self,
        _channel: &ChannelHandle,
        limit: u16,
    ) -> Result<Vec<RawEvent>, EngineError> {
        let history = lock(&self.inner.history);
        let skip = history.len().saturating_sub(usize::from(limit));
        Ok(history.iter().skip(skip).cloned().collect())
    }

    async fn set_typing(
        &self,
        _channel: &ChannelHandle,
        typing: bool,
    ) -> Result<(), EngineError> {
        lock(&self.inner.typing_reports).push(typing);
        Ok(())
    }

    fn subscribe(&self, handler_key: &str) -> mpsc::Receiver<TransportEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        lock(&self.inner.subscribers).insert(handler_key.to_owned(), tx);
        rx
    }

    fn unsubscribe(&self, handler_key: &str) {
        lock(&self.inner.subscribers).remove(handler_key);
    }
}
