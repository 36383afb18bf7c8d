//! Scripted end-to-end run of the conversation session against the
//! in-memory collaborators: open with history, receive, send, retry a
//! failed send, close.

mod logging;

use std::{sync::Arc, time::Duration};

use chrono::Local;
use tokio::time::timeout;
use tracing::info;

use engine_core::{
    ClockStyle, ConnectionState, ConversationConfig, MessageKind, RawBody, RawEvent,
    SessionCommand, SessionEvent,
};
use engine_platform::{
    InMemorySummaryStore, InMemoryTransport, NullAudioCues, Profile, StaticProfileDirectory,
    SummaryStore, TransportEvent,
};
use engine_session::{SessionCollaborators, spawn_session};

const LOCAL_KEY: &str = "9-12";
const PEER_KEY: &str = "7-12";

#[tokio::main]
async fn main() {
    logging::init();

    let transport = InMemoryTransport::new();
    transport.set_connection_state(ConnectionState::Open);
    transport.set_history(vec![
        history_event(1, PEER_KEY, "morning!", 26),
        history_event(2, LOCAL_KEY, "hey, almost done with the draft", 25),
        history_event(3, PEER_KEY, "send it over when you can", 2),
    ]);

    let profiles = StaticProfileDirectory::new()
        .with_profile(
            LOCAL_KEY,
            Profile {
                name: "Ana Silva".to_owned(),
                title: None,
                picture: None,
            },
        )
        .with_profile(
            PEER_KEY,
            Profile {
                name: "Rui Costa".to_owned(),
                title: Some("Designer".to_owned()),
                picture: None,
            },
        );

    let summaries = InMemorySummaryStore::default();
    let handle = spawn_session(
        ConversationConfig {
            local_user_key: LOCAL_KEY.to_owned(),
            peer_user_id: 7,
            organization_id: 12,
            clock_style: ClockStyle::TwentyFourHour,
        },
        SessionCollaborators {
            transport: Arc::new(transport.clone()),
            summaries: Arc::new(summaries.clone()),
            profiles: Arc::new(profiles),
            audio: Arc::new(NullAudioCues),
        },
    );
    let mut events = handle.subscribe();

    handle
        .send(SessionCommand::Open)
        .await
        .expect("session accepts commands");
    settle().await;

    // First send fails, the retry replays it.
    transport.set_send_fails(true);
    handle
        .send(SessionCommand::Send {
            content: "here it is\n".to_owned(),
            kind: MessageKind::Text,
        })
        .await
        .expect("session accepts commands");
    settle().await;
    transport.set_send_fails(false);
    handle
        .send(SessionCommand::RetryFailed)
        .await
        .expect("session accepts commands");
    settle().await;

    transport.inject_event(TransportEvent::TypingChanged {
        channel_url: format!("channel-{PEER_KEY}"),
        typing: true,
    });
    transport.inject_event(TransportEvent::Message {
        channel_url: format!("channel-{PEER_KEY}"),
        event: history_event(4, PEER_KEY, "perfect, thanks!", 0),
    });
    transport.inject_event(TransportEvent::ReadReceiptChanged {
        channel_url: format!("channel-{PEER_KEY}"),
        unread_for_last: 0,
    });
    settle().await;

    handle
        .send(SessionCommand::Close)
        .await
        .expect("session accepts commands");

    loop {
        let event = match timeout(Duration::from_secs(2), events.recv()).await {
            Ok(Ok(event)) => event,
            Ok(Err(_)) | Err(_) => break,
        };

        match &event {
            SessionEvent::TimelineChanged { entries } => {
                println!("timeline ({} entries):", entries.len());
                for entry in entries {
                    if let Some(header) = entry.header_date.as_deref() {
                        println!("  -- {header} --");
                    }
                    println!(
                        "  [{}] {:>8} {} ({:?}, {:?})",
                        entry.time_label,
                        entry.sender_name,
                        entry.message.payload.content,
                        entry.message.delivery,
                        entry.grouping,
                    );
                }
            }
            SessionEvent::StatusChanged { status } => println!("status: {status:?}"),
            SessionEvent::PendingChanged { remaining } => println!("pending: {remaining}"),
            other => println!("event: {other:?}"),
        }

        if matches!(event, SessionEvent::Closed { .. }) {
            break;
        }
    }

    match summaries.find(7).await {
        Some(summary) => {
            let encoded =
                serde_json::to_string_pretty(&summary).unwrap_or_else(|err| err.to_string());
            println!("persisted summary:\n{encoded}");
        }
        None => info!("no conversation summary persisted"),
    }

    let now = Local::now().to_rfc3339();
    info!(%now, "smoke run complete");
}

/// Give the session task a moment to drain what was just queued.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

fn history_event(server_id: i64, sender: &str, body: &str, hours_ago: i64) -> RawEvent {
    RawEvent {
        server_id,
        sender_id: sender.to_owned(),
        sent_at_token: (Local::now() - chrono::Duration::hours(hours_ago)).to_rfc3339(),
        body: RawBody::Text {
            body: body.to_owned(),
        },
    }
}
