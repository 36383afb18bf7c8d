use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use engine_core::{ConnectPollPolicy, ConnectionState, EngineError};
use engine_platform::{ChannelHandle, Transport};

/// Maintains the transport connection lifecycle and resolves the
/// conversation channel behind it.
///
/// `ensure_channel` is callable concurrently: an internal mutex
/// serializes recovery so callers await the in-flight attempt instead
/// of issuing duplicate reconnects.
pub struct ChannelCoordinator {
    transport: Arc<dyn Transport>,
    participant_key: String,
    poll: ConnectPollPolicy,
    slot: Mutex<Option<ChannelHandle>>,
}

impl ChannelCoordinator {
    pub fn new(transport: Arc<dyn Transport>, participant_key: impl Into<String>) -> Self {
        Self {
            transport,
            participant_key: participant_key.into(),
            poll: ConnectPollPolicy::default(),
            slot: Mutex::new(None),
        }
    }

    /// Resolve (or lazily create) the channel behind a live connection.
    ///
    /// Transport faults surface as recoverable `TransportUnavailable`;
    /// a channel with fewer than two members is a terminal
    /// `ConversationInvalid` that the caller must close on.
    pub async fn ensure_channel(&self) -> Result<ChannelHandle, EngineError> {
        let mut slot = self.slot.lock().await;

        self.ensure_connected().await?;

        if let Some(channel) = slot.as_ref() {
            return Ok(channel.clone());
        }

        let channel = match self
            .transport
            .resolve_channel(&self.participant_key)
            .await?
        {
            Some(existing) => existing,
            None => {
                debug!(key = %self.participant_key, "creating conversation channel");
                self.transport
                    .create_channel(std::slice::from_ref(&self.participant_key))
                    .await?
            }
        };

        if channel.member_count < 2 {
            if let Err(remove_err) = self.transport.remove_channel(&channel).await {
                warn!(code = %remove_err.code, "could not remove lonely channel: {remove_err}");
            }
            return Err(EngineError::conversation_invalid(
                "peer_left_channel",
                format!(
                    "channel {} has {} member(s)",
                    channel.url, channel.member_count
                ),
            ));
        }

        *slot = Some(channel.clone());
        Ok(channel)
    }

    /// Channel resolved by an earlier acquisition, if any.
    pub async fn current(&self) -> Option<ChannelHandle> {
        self.slot.lock().await.clone()
    }

    /// Drop the cached channel, returning it for cleanup.
    pub async fn invalidate(&self) -> Option<ChannelHandle> {
        self.slot.lock().await.take()
    }

    async fn ensure_connected(&self) -> Result<(), EngineError> {
        if self.transport.connection_state() == ConnectionState::Open {
            return Ok(());
        }

        let mut attempt = 0;
        while self.transport.connection_state() == ConnectionState::Connecting
            && attempt < self.poll.max_attempts()
        {
            debug!(attempt, "waiting for in-flight transport connection");
            tokio::time::sleep(self.poll.delay_for_attempt(attempt)).await;
            attempt += 1;
        }

        if self.transport.connection_state() != ConnectionState::Open {
            self.transport.connect().await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use engine_platform::InMemoryTransport;

    use super::*;

    fn coordinator(transport: &InMemoryTransport) -> Arc<ChannelCoordinator> {
        Arc::new(ChannelCoordinator::new(
            Arc::new(transport.clone()),
            "7-12",
        ))
    }

    #[tokio::test]
    async fn open_connection_skips_connect_entirely() {
        let transport = InMemoryTransport::new();
        transport.set_connection_state(ConnectionState::Open);

        let channel = coordinator(&transport)
            .ensure_channel()
            .await
            .expect("channel should resolve");

        assert_eq!(transport.connect_calls(), 0);
        assert_eq!(channel.member_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_connect() {
        let transport = InMemoryTransport::new();
        transport.set_connection_state(ConnectionState::Connecting);

        let coordinator = coordinator(&transport);
        let first = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.ensure_channel().await })
        };
        let second = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.ensure_channel().await })
        };

        let first = first.await.expect("task").expect("first caller resolves");
        let second = second.await.expect("task").expect("second caller resolves");

        assert_eq!(first, second);
        assert_eq!(transport.connect_calls(), 1);
    }

    #[tokio::test]
    async fn resolves_an_existing_channel_before_creating_one() {
        let transport = InMemoryTransport::new();
        transport.set_connection_state(ConnectionState::Open);
        transport.preload_channel(
            "7-12",
            ChannelHandle {
                url: "channel-existing".to_owned(),
                member_count: 2,
            },
        );

        let channel = coordinator(&transport)
            .ensure_channel()
            .await
            .expect("channel should resolve");
        assert_eq!(channel.url, "channel-existing");
    }

    #[tokio::test]
    async fn caches_the_resolved_channel_across_calls() {
        let transport = InMemoryTransport::new();
        transport.set_connection_state(ConnectionState::Open);

        let coordinator = coordinator(&transport);
        let first = coordinator.ensure_channel().await.expect("resolves");
        transport.set_created_member_count(5);
        let second = coordinator.ensure_channel().await.expect("resolves");

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn membership_below_two_is_terminal() {
        let transport = InMemoryTransport::new();
        transport.set_connection_state(ConnectionState::Open);
        transport.set_created_member_count(1);

        let err = coordinator(&transport)
            .ensure_channel()
            .await
            .expect_err("lonely channel must be invalid");
        assert_eq!(err.kind, engine_core::EngineErrorKind::ConversationInvalid);
        assert_eq!(err.code, "peer_left_channel");
        assert!(!err.is_recoverable());
        assert_eq!(transport.removed_channels().len(), 1);
    }

    #[tokio::test]
    async fn connect_failure_is_recoverable_and_retryable() {
        let transport = InMemoryTransport::new();
        transport.set_connect_fails(true);

        let coordinator = coordinator(&transport);
        let err = coordinator
            .ensure_channel()
            .await
            .expect_err("connect failure must surface");
        assert!(err.is_recoverable());

        transport.set_connect_fails(false);
        coordinator
            .ensure_channel()
            .await
            .expect("whole flow retries cleanly");
        assert_eq!(transport.connect_calls(), 2);
    }
}
