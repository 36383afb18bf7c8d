use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use engine_core::CanonicalMessage;

/// Most recent messages retained in a cached summary.
pub const RECENT_MESSAGE_CAP: usize = 30;

/// Lightweight last-known-state record for one conversation, cached
/// across app restarts. Not the authoritative message store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationSummary {
    /// Peer user id the summary is keyed by.
    pub peer_user_id: i64,
    /// Peer display name (with title when known).
    pub peer_name: String,
    /// Peer picture reference.
    pub peer_picture: Option<String>,
    /// Whether the local user muted this conversation.
    pub muted: bool,
    /// Whether the conversation is archived.
    pub archived: bool,
    /// Whether the peer has read the local user's last message.
    pub peer_seen_my_last_message: bool,
    /// Preview of the last message.
    pub last_message_preview: String,
    /// True when the preview is self-authored, so the presentation can
    /// render its "you" prefix.
    pub last_message_from_local: bool,
    /// Send instant of the last message.
    pub last_message_at: DateTime<Local>,
    /// Up to [`RECENT_MESSAGE_CAP`] most recent confirmed messages.
    pub recent_messages: Vec<CanonicalMessage>,
}

/// Cache of per-conversation summaries.
///
/// Best-effort cache semantics; implementations swallow their own
/// storage faults rather than failing the session.
#[async_trait]
pub trait SummaryStore: Send + Sync {
    async fn find(&self, peer_user_id: i64) -> Option<ConversationSummary>;

    async fn upsert(&self, summary: ConversationSummary);

    async fn remove(&self, peer_user_id: i64);
}

/// In-memory summary store for tests and the smoke binary.
#[derive(Debug, Clone, Default)]
pub struct InMemorySummaryStore {
    data: Arc<RwLock<HashMap<i64, ConversationSummary>>>,
}

#[async_trait]
impl SummaryStore for InMemorySummaryStore {
    async fn find(&self, peer_user_id: i64) -> Option<ConversationSummary> {
        self.data.read().await.get(&peer_user_id).cloned()
    }

    async fn upsert(&self, summary: ConversationSummary) {
        self.data.write().await.insert(summary.peer_user_id, summary);
    }

    async fn remove(&self, peer_user_id: i64) {
        self.data.write().await.remove(&peer_user_id);
    }
}
