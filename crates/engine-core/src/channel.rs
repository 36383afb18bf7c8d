use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::types::{SessionCommand, SessionEvent};

/// Broadcast event stream type used by presentation subscribers.
pub type EventStream = broadcast::Receiver<SessionEvent>;

/// Errors returned by session channel operations.
#[derive(Debug, Error)]
pub enum SessionChannelError {
    /// The command receiver side is closed (session ended).
    #[error("session command channel is closed")]
    CommandChannelClosed,
}

/// Command/event channel pair connecting the presentation layer to the
/// session runtime task.
#[derive(Clone, Debug)]
pub struct EngineChannels {
    command_tx: mpsc::Sender<SessionCommand>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl EngineChannels {
    /// Create a new channel set and return it with the command receiver.
    pub fn new(
        command_buffer: usize,
        event_buffer: usize,
    ) -> (Self, mpsc::Receiver<SessionCommand>) {
        let (command_tx, command_rx) = mpsc::channel(command_buffer.max(1));
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));

        (
            Self {
                command_tx,
                event_tx,
            },
            command_rx,
        )
    }

    /// Subscribe to emitted session events.
    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }

    /// Send one command to the session runtime.
    pub async fn send_command(&self, command: SessionCommand) -> Result<(), SessionChannelError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| SessionChannelError::CommandChannelClosed)
    }

    /// Emit an event to all subscribers.
    ///
    /// Emission is best-effort; lagged subscribers are handled by
    /// `broadcast`.
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConversationStatus, MessageKind};

    #[tokio::test]
    async fn sends_commands_to_receiver() {
        let (channels, mut rx) = EngineChannels::new(8, 8);
        channels
            .send_command(SessionCommand::Send {
                content: "hello".to_owned(),
                kind: MessageKind::Text,
            })
            .await
            .expect("command send should work");

        let cmd = rx.recv().await.expect("receiver should have a command");
        match cmd {
            SessionCommand::Send { content, .. } => assert_eq!(content, "hello"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test]
    async fn fans_out_events_to_subscribers() {
        let (channels, _rx) = EngineChannels::new(4, 16);
        let mut a = channels.subscribe();
        let mut b = channels.subscribe();

        channels.emit(SessionEvent::StatusChanged {
            status: ConversationStatus::Typing,
        });

        let event_a = a.recv().await.expect("subscriber a should receive event");
        let event_b = b.recv().await.expect("subscriber b should receive event");
        assert_eq!(event_a, event_b);
    }
}
