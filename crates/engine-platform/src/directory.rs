use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Display profile of one user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    /// Display name.
    pub name: String,
    /// Position or role, when known.
    pub title: Option<String>,
    /// Picture reference.
    pub picture: Option<String>,
}

/// Resolves user display profiles. Backed by a contact directory in the
/// host application.
#[async_trait]
pub trait ProfileLookup: Send + Sync {
    async fn resolve(&self, user_key: &str) -> Option<Profile>;
}

/// Fixed profile map for tests and the smoke binary.
#[derive(Debug, Clone, Default)]
pub struct StaticProfileDirectory {
    profiles: HashMap<String, Profile>,
}

impl StaticProfileDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a profile under a composite user key.
    pub fn with_profile(mut self, user_key: impl Into<String>, profile: Profile) -> Self {
        self.profiles.insert(user_key.into(), profile);
        self
    }
}

#[async_trait]
impl ProfileLookup for StaticProfileDirectory {
    async fn resolve(&self, user_key: &str) -> Option<Profile> {
        self.profiles.get(user_key).cloned()
    }
}

/// Plays the local audio cues accompanying sent/received messages.
pub trait AudioCuePlayer: Send + Sync {
    fn play_sent(&self);
    fn play_received(&self);
}

/// No-op cue player for headless use.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAudioCues;

impl AudioCuePlayer for NullAudioCues {
    fn play_sent(&self) {}
    fn play_received(&self) {}
}

/// Cue player that counts invocations, for assertions in tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingAudioCues {
    sent: Arc<AtomicU32>,
    received: Arc<AtomicU32>,
}

impl RecordingAudioCues {
    pub fn sent_count(&self) -> u32 {
        self.sent.load(Ordering::SeqCst)
    }

    pub fn received_count(&self) -> u32 {
        self.received.load(Ordering::SeqCst)
    }
}

impl AudioCuePlayer for RecordingAudioCues {
    fn play_sent(&self) {
        self.sent.fetch_add(1, Ordering::SeqCst);
    }

    fn play_received(&self) {
        self.received.fetch_add(1, Ordering::SeqCst);
    }
}
