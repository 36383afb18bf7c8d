use std::sync::Arc;

use chrono::Local;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use engine_core::{
    CanonicalMessage, CloseReason, ConversationConfig, ConversationIdentities, DeliveryState,
    EngineChannels, EngineError, EngineErrorKind, EventStream, MessageKind, MessagePayload,
    PresentationContext, SenderIdentity, SessionChannelError, SessionCommand, SessionEvent,
    StatusReducer, TimelineEntry, normalize, parse_send_timestamp, rebuild, time_label,
};
use engine_platform::{
    AudioCuePlayer, ChannelHandle, ConfirmedMessage, ConversationSummary, ProfileLookup,
    RECENT_MESSAGE_CAP, SendToken, SummaryStore, Transport, TransportEvent,
};

use crate::{coordinator::ChannelCoordinator, outbox::PendingOutbox};

const HANDLER_KEY: &str = "conversation-session";
const RECENT_HISTORY_LIMIT: u16 = 30;
const COMMAND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 256;
/// Peer unread count assumed before the first read-receipt event.
const UNREAD_UNKNOWN: i64 = i64::MAX;

/// External collaborators wired into one session.
#[derive(Clone)]
pub struct SessionCollaborators {
    pub transport: Arc<dyn Transport>,
    pub summaries: Arc<dyn SummaryStore>,
    pub profiles: Arc<dyn ProfileLookup>,
    pub audio: Arc<dyn AudioCuePlayer>,
}

/// Handle to a running conversation session task.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    channels: EngineChannels,
}

impl SessionHandle {
    /// Send one command to the session.
    pub async fn send(&self, command: SessionCommand) -> Result<(), SessionChannelError> {
        self.channels.send_command(command).await
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> EventStream {
        self.channels.subscribe()
    }
}

/// Spawn the session task for one conversation and return its handle.
///
/// The task owns all conversation state; commands and transport events
/// are drained one at a time, so mutations apply in resume order.
pub fn spawn_session(
    config: ConversationConfig,
    collaborators: SessionCollaborators,
) -> SessionHandle {
    let (channels, command_rx) = EngineChannels::new(COMMAND_BUFFER, EVENT_BUFFER);
    let session = ConversationSession::new(config, collaborators, channels.clone(), command_rx);
    tokio::spawn(session.run());

    SessionHandle { channels }
}

enum Input {
    Command(Option<SessionCommand>),
    Transport(Option<TransportEvent>),
    Cancelled,
}

struct ConversationSession {
    config: ConversationConfig,
    transport: Arc<dyn Transport>,
    summaries: Arc<dyn SummaryStore>,
    profiles: Arc<dyn ProfileLookup>,
    audio: Arc<dyn AudioCuePlayer>,
    channels: EngineChannels,
    command_rx: mpsc::Receiver<SessionCommand>,
    coordinator: ChannelCoordinator,
    outbox: PendingOutbox,
    timeline: Vec<TimelineEntry>,
    known: Vec<CanonicalMessage>,
    status: StatusReducer,
    peer_online: bool,
    peer_unread_for_last: i64,
    identities: Option<ConversationIdentities>,
    peer_title: Option<String>,
    transport_rx: Option<mpsc::Receiver<TransportEvent>>,
    channel_url: Option<String>,
    handlers_detached: bool,
    cancel: CancellationToken,
    closed: bool,
}

impl ConversationSession {
    fn new(
        config: ConversationConfig,
        collaborators: SessionCollaborators,
        channels: EngineChannels,
        command_rx: mpsc::Receiver<SessionCommand>,
    ) -> Self {
        let coordinator = ChannelCoordinator::new(
            Arc::clone(&collaborators.transport),
            config.participant_key(),
        );

        Self {
            config,
            transport: collaborators.transport,
            summaries: collaborators.summaries,
            profiles: collaborators.profiles,
            audio: collaborators.audio,
            channels,
            command_rx,
            coordinator,
            outbox: PendingOutbox::default(),
            timeline: Vec::new(),
            known: Vec::new(),
            status: StatusReducer::default(),
            peer_online: false,
            peer_unread_for_last: UNREAD_UNKNOWN,
            identities: None,
            peer_title: None,
            transport_rx: None,
            channel_url: None,
            handlers_detached: false,
            cancel: CancellationToken::new(),
            closed: false,
        }
    }

    async fn run(mut self) {
        debug!(peer = self.config.peer_user_id, "conversation session started");

        loop {
            let input = {
                let command_rx = &mut self.command_rx;
                let cancel = &self.cancel;
                match self.transport_rx.as_mut() {
                    Some(events) => tokio::select! {
                        _ = cancel.cancelled() => Input::Cancelled,
                        command = command_rx.recv() => Input::Command(command),
                        event = events.recv() => Input::Transport(event),
                    },
                    None => tokio::select! {
                        _ = cancel.cancelled() => Input::Cancelled,
                        command = command_rx.recv() => Input::Command(command),
                    },
                }
            };

            match input {
                Input::Cancelled => break,
                Input::Command(None) => {
                    // Every handle dropped: tear down as a regular close.
                    self.finish_close(CloseReason::UserRequested, true).await;
                    break;
                }
                Input::Command(Some(command)) => {
                    self.handle_command(command).await;
                    if self.closed {
                        break;
                    }
                }
                Input::Transport(None) => {
                    self.transport_rx = None;
                }
                Input::Transport(Some(event)) => {
                    self.handle_transport_event(event).await;
                    if self.closed {
                        break;
                    }
                }
            }
        }

        debug!(peer = self.config.peer_user_id, "conversation session ended");
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Open => {
                if let Err(err) = self.handle_open().await {
                    self.route_error(err).await;
                }
            }
            SessionCommand::Send { content, kind } => self.handle_send(content, kind, false).await,
            SessionCommand::RetryFailed => self.handle_retry().await,
            SessionCommand::SetTyping(typing) => self.handle_set_typing(typing).await,
            SessionCommand::MarkRead => {
                if let Err(err) = self.handle_mark_read().await {
                    self.route_error(err).await;
                }
            }
            SessionCommand::Refresh => {
                if let Err(err) = self.handle_refresh().await {
                    self.route_error(err).await;
                }
            }
            SessionCommand::Close => self.finish_close(CloseReason::UserRequested, true).await,
        }
    }

    async fn handle_open(&mut self) -> Result<(), EngineError> {
        let local = self.profiles.resolve(&self.config.local_user_key).await;
        let peer = self.profiles.resolve(&self.config.participant_key()).await;

        let (Some(local), Some(peer)) = (local, peer) else {
            self.raise_alert(&EngineError::conversation_invalid(
                "user_not_found",
                "conversation participant profile is missing",
            ));
            self.finish_close(CloseReason::ProfileMissing, false).await;
            return Ok(());
        };

        self.peer_title = peer.title.clone();
        self.identities = Some(ConversationIdentities {
            local: SenderIdentity {
                user_key: self.config.local_user_key.clone(),
                name: local.name,
                picture: local.picture,
            },
            peer: SenderIdentity {
                user_key: self.config.participant_key(),
                name: peer.name,
                picture: peer.picture,
            },
        });

        // Seed the view from the cached summary before touching the
        // network, so a stale timeline shows while recovery runs.
        if let Some(summary) = self.summaries.find(self.config.peer_user_id).await {
            if let Some(ctx) = self.presentation_ctx() {
                self.timeline = rebuild(Vec::new(), summary.recent_messages.clone(), false, &ctx);
                self.known = summary.recent_messages;
                self.emit_timeline();
            }
        }

        let channel = self.coordinator.ensure_channel().await?;
        self.channel_url = Some(channel.url.clone());
        self.transport_rx = Some(self.transport.subscribe(HANDLER_KEY));
        self.handlers_detached = false;

        if let Err(err) = self.transport.mark_read(&channel).await {
            warn!(code = %err.code, "mark-read on open failed: {err}");
        }

        self.reload_recent(&channel).await?;
        if self.recompute_status() {
            self.emit_status();
        }
        self.emit_timeline();
        Ok(())
    }

    async fn handle_send(&mut self, content: String, kind: MessageKind, replaying: bool) {
        let ctx = match self.require_ctx() {
            Ok(ctx) => ctx,
            Err(err) => {
                self.raise_alert(&err);
                return;
            }
        };

        let channel = match self.coordinator.ensure_channel().await {
            Ok(channel) => Some(channel),
            Err(err) if err.kind == EngineErrorKind::ConversationInvalid => {
                self.handle_conversation_invalid(err).await;
                return;
            }
            Err(err) => {
                debug!(code = %err.code, "channel unavailable before send: {err}");
                None
            }
        };
        if let Some(channel) = &channel {
            self.channel_url = Some(channel.url.clone());
        }

        let content = trim_trailing_newlines(&content);
        let sent_at = Local::now();
        let correlation = Uuid::new_v4();
        let pending = CanonicalMessage {
            id: sent_at.timestamp_micros(),
            kind,
            payload: MessagePayload::text(content.clone()),
            sender_id: self.config.local_user_key.clone(),
            sent_at,
            delivery: DeliveryState::Pending,
            correlation: Some(correlation),
        };

        self.timeline = rebuild(
            std::mem::take(&mut self.timeline),
            vec![pending.clone()],
            true,
            &ctx,
        );
        self.outbox.push(pending);
        self.emit_timeline();
        self.emit_pending();
        if !replaying {
            self.audio.play_sent();
        }
        if self.status.clear() {
            self.emit_status();
        }

        let Some(channel) = channel else {
            self.fail_pending_sends(replaying);
            return;
        };

        let token = SendToken {
            correlation,
            sent_at_token: sent_at.to_rfc3339(),
        };
        match self.transport.send(&channel, &content, &token).await {
            Ok(confirmed) => self.reconcile_confirmed(confirmed, &ctx),
            Err(err) => {
                debug!(code = %err.code, "send failed: {err}");
                self.fail_pending_sends(replaying);
            }
        }
    }

    /// Replay every queued failed send, then drop the original failed
    /// entries so successful replays are not displayed twice.
    async fn handle_retry(&mut self) {
        match self.coordinator.ensure_channel().await {
            Ok(_) => {}
            Err(err) if err.kind == EngineErrorKind::ConversationInvalid => {
                self.handle_conversation_invalid(err).await;
                return;
            }
            Err(err) => {
                self.raise_alert(&err);
                return;
            }
        }

        let snapshot = self.outbox.drain_all();
        if snapshot.is_empty() {
            return;
        }
        self.emit_pending();

        let original_ids: Vec<i64> = snapshot.iter().map(|message| message.id).collect();

        for message in snapshot {
            self.handle_send(message.payload.content.clone(), message.kind, true)
                .await;
            if self.closed {
                return;
            }
        }

        self.timeline
            .retain(|entry| !original_ids.contains(&entry.message.id));
        self.emit_timeline();
        self.emit_pending();
    }

    async fn handle_set_typing(&mut self, typing: bool) {
        let Some(channel) = self.coordinator.current().await else {
            return;
        };
        if let Err(err) = self.transport.set_typing(&channel, typing).await {
            debug!(code = %err.code, "typing report failed: {err}");
        }
    }

    async fn handle_mark_read(&mut self) -> Result<(), EngineError> {
        let channel = self.coordinator.ensure_channel().await?;
        self.channel_url = Some(channel.url.clone());
        self.transport.mark_read(&channel).await
    }

    async fn handle_refresh(&mut self) -> Result<(), EngineError> {
        let channel = self.coordinator.ensure_channel().await?;
        self.channel_url = Some(channel.url.clone());

        if let Err(err) = self.transport.mark_read(&channel).await {
            warn!(code = %err.code, "mark-read on refresh failed: {err}");
        }

        self.reload_recent(&channel).await?;
        if self.recompute_status() {
            self.emit_status();
        }
        Ok(())
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message { channel_url, event } => {
                if self.handlers_detached || !self.is_current_channel(&channel_url) {
                    return;
                }
                self.set_peer_online(true);
                match normalize(&event) {
                    Ok(Some(message)) => self.apply_inbound_message(message),
                    Ok(None) => {}
                    Err(err) => {
                        warn!(code = %err.code, "dropping malformed inbound event: {err}");
                    }
                }
            }
            TransportEvent::TypingChanged {
                channel_url,
                typing,
            } => {
                if self.handlers_detached || !self.is_current_channel(&channel_url) {
                    return;
                }
                let mut changed = self.status.apply_typing(typing);
                if !typing {
                    changed |= self.recompute_status();
                }
                if changed {
                    self.emit_status();
                }
            }
            TransportEvent::ReadReceiptChanged {
                channel_url,
                unread_for_last,
            } => {
                if self.handlers_detached || !self.is_current_channel(&channel_url) {
                    return;
                }
                self.set_peer_online(true);
                self.peer_unread_for_last = unread_for_last;
                if self.recompute_status() {
                    self.emit_status();
                }
            }
            TransportEvent::ConnectivityChanged { online } => {
                self.handle_connectivity(online).await;
            }
        }
    }

    fn apply_inbound_message(&mut self, message: CanonicalMessage) {
        if self.known.iter().any(|known| known.id == message.id) {
            debug!(id = message.id, "ignoring duplicate inbound message");
            return;
        }
        let Some(ctx) = self.presentation_ctx() else {
            return;
        };

        self.known.push(message.clone());
        self.timeline = rebuild(std::mem::take(&mut self.timeline), vec![message], true, &ctx);
        self.emit_timeline();

        let mut status_changed = self.status.clear();
        status_changed |= self.recompute_status();
        if status_changed {
            self.emit_status();
        }

        self.channels.emit(SessionEvent::NewMessageAlert);
        self.audio.play_received();
    }

    async fn handle_connectivity(&mut self, online: bool) {
        if !online {
            self.set_peer_online(false);
            self.handlers_detached = true;
            return;
        }

        self.handlers_detached = false;

        // Background recovery stays silent on transport faults; a later
        // operation that depends on the channel will surface them.
        match self.coordinator.ensure_channel().await {
            Ok(channel) => {
                self.channel_url = Some(channel.url.clone());
                if let Err(err) = self.transport.mark_read(&channel).await {
                    debug!(code = %err.code, "mark-read after reconnect failed: {err}");
                }
                if let Err(err) = self.reload_recent(&channel).await {
                    debug!(code = %err.code, "history reload after reconnect failed: {err}");
                }
                if self.recompute_status() {
                    self.emit_status();
                }
            }
            Err(err) if err.kind == EngineErrorKind::ConversationInvalid => {
                self.handle_conversation_invalid(err).await;
            }
            Err(err) => {
                debug!(code = %err.code, "background reconnect failed: {err}");
            }
        }
    }

    async fn reload_recent(&mut self, channel: &ChannelHandle) -> Result<(), EngineError> {
        let ctx = self.require_ctx()?;
        let raw = self
            .transport
            .load_recent(channel, RECENT_HISTORY_LIMIT)
            .await?;

        let mut loaded = Vec::new();
        for event in &raw {
            match normalize(event) {
                Ok(Some(message)) => loaded.push(message),
                Ok(None) => {}
                Err(err) => warn!(code = %err.code, "dropping malformed history event: {err}"),
            }
        }

        let previous_last = self.timeline.last().map(|entry| entry.message.id);

        self.known = loaded.clone();
        let mut entries = rebuild(std::mem::take(&mut self.timeline), loaded, false, &ctx);

        // Optimistic sends stay visible across a full-history refresh.
        let pending = self.outbox.entries().to_vec();
        if !pending.is_empty() {
            entries = rebuild(entries, pending, true, &ctx);
        }
        self.timeline = entries;

        let new_last = self.timeline.last().map(|entry| entry.message.id);
        if previous_last != new_last {
            self.emit_timeline();
        }
        Ok(())
    }

    fn reconcile_confirmed(&mut self, confirmed: ConfirmedMessage, ctx: &PresentationContext) {
        let Some(pending) = self.outbox.confirm(confirmed.correlation) else {
            warn!(
                id = confirmed.id,
                "no pending message matches the confirmation token"
            );
            return;
        };

        let server_sent_at = match parse_send_timestamp(&confirmed.sent_at_token) {
            Ok(at) => at,
            Err(err) => {
                warn!(code = %err.code, "confirmed message carries a bad timestamp: {err}");
                pending.sent_at
            }
        };

        let message = CanonicalMessage {
            id: confirmed.id,
            kind: pending.kind,
            payload: pending.payload.clone(),
            sender_id: pending.sender_id.clone(),
            sent_at: server_sent_at,
            delivery: DeliveryState::Confirmed,
            correlation: Some(confirmed.correlation),
        };
        self.known.push(message.clone());

        if let Some(entry) = self
            .timeline
            .iter_mut()
            .find(|entry| entry.message.id == pending.id)
        {
            entry.time_label = time_label(server_sent_at, ctx.clock_style);
            entry.message = message;
        }

        self.emit_timeline();
        self.emit_pending();
    }

    fn fail_pending_sends(&mut self, replaying: bool) {
        self.outbox.mark_all_failed();
        for id in self.outbox.local_ids() {
            if let Some(entry) = self
                .timeline
                .iter_mut()
                .find(|entry| entry.message.id == id)
            {
                entry.message.delivery = DeliveryState::Failed;
            }
        }

        self.raise_alert(&EngineError::send_failed("message could not be delivered"));
        if !replaying {
            self.emit_timeline();
        }
    }

    async fn route_error(&mut self, err: EngineError) {
        match err.kind {
            EngineErrorKind::ConversationInvalid => self.handle_conversation_invalid(err).await,
            EngineErrorKind::MalformedMessage => {
                warn!(code = %err.code, "dropped malformed data: {err}");
            }
            _ => self.raise_alert(&err),
        }
    }

    async fn handle_conversation_invalid(&mut self, err: EngineError) {
        let _ = self.coordinator.invalidate().await;
        self.summaries.remove(self.config.peer_user_id).await;
        self.raise_alert(&err);
        self.finish_close(CloseReason::PeerMissing, false).await;
    }

    async fn finish_close(&mut self, reason: CloseReason, persist: bool) {
        if self.closed {
            return;
        }

        self.transport.unsubscribe(HANDLER_KEY);
        self.transport_rx = None;

        if persist && !self.timeline.is_empty() {
            self.persist_summary().await;
        }

        self.channels.emit(SessionEvent::Closed { reason });
        self.closed = true;
        self.cancel.cancel();
    }

    async fn persist_summary(&mut self) {
        let Some(identities) = &self.identities else {
            return;
        };
        let Some(last) = self.timeline.last() else {
            return;
        };

        let from_local = !last.from_peer;
        let previous = self.summaries.find(self.config.peer_user_id).await;

        let skip = self.known.len().saturating_sub(RECENT_MESSAGE_CAP);
        let recent_messages: Vec<CanonicalMessage> =
            self.known.iter().skip(skip).cloned().collect();

        let peer_name = match &self.peer_title {
            Some(title) => format!("{} - {}", identities.peer.name, title),
            None => identities.peer.name.clone(),
        };

        self.summaries
            .upsert(ConversationSummary {
                peer_user_id: self.config.peer_user_id,
                peer_name,
                peer_picture: identities.peer.picture.clone(),
                muted: previous.as_ref().is_some_and(|summary| summary.muted),
                archived: previous.as_ref().is_some_and(|summary| summary.archived),
                peer_seen_my_last_message: from_local && self.peer_unread_for_last <= 0,
                last_message_preview: preview_of(last),
                last_message_from_local: from_local,
                last_message_at: last.message.sent_at,
                recent_messages,
            })
            .await;
    }

    fn recompute_status(&mut self) -> bool {
        let last_by_local = self.timeline.last().map(|entry| !entry.from_peer);
        self.status
            .recompute(last_by_local, self.peer_unread_for_last)
    }

    fn set_peer_online(&mut self, online: bool) {
        if self.peer_online != online {
            self.peer_online = online;
            self.channels
                .emit(SessionEvent::PresenceChanged { online });
        }
    }

    fn is_current_channel(&self, channel_url: &str) -> bool {
        self.channel_url.as_deref() == Some(channel_url)
    }

    fn presentation_ctx(&self) -> Option<PresentationContext> {
        self.identities
            .as_ref()
            .map(|identities| PresentationContext {
                identities: identities.clone(),
                clock_style: self.config.clock_style,
                today: Local::now().date_naive(),
            })
    }

    fn require_ctx(&self) -> Result<PresentationContext, EngineError> {
        self.presentation_ctx().ok_or_else(|| {
            EngineError::new(
                EngineErrorKind::Internal,
                "session_not_open",
                "open the conversation before using it",
            )
        })
    }

    fn raise_alert(&self, err: &EngineError) {
        warn!(code = %err.code, "raising alert: {err}");
        self.channels.emit(SessionEvent::AlertRaised {
            code: err.code.clone(),
            message: err.message.clone(),
        });
    }

    fn emit_timeline(&self) {
        self.channels.emit(SessionEvent::TimelineChanged {
            entries: self.timeline.clone(),
        });
    }

    fn emit_pending(&self) {
        self.channels.emit(SessionEvent::PendingChanged {
            remaining: self.outbox.len(),
        });
    }

    fn emit_status(&self) {
        self.channels.emit(SessionEvent::StatusChanged {
            status: self.status.status(),
        });
    }
}

fn preview_of(entry: &TimelineEntry) -> String {
    match entry.message.payload.display_name.as_deref() {
        Some(name) if !name.is_empty() => name.to_owned(),
        _ => entry.message.payload.content.clone(),
    }
}

fn trim_trailing_newlines(content: &str) -> String {
    content.trim_end_matches(['\r', '\n']).to_owned()
}
