use crate::protocol::models::Role;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Minimum number of entries for a conversation to be worth summarizing.
pub const MIN_SUMMARY_ENTRIES: usize = 2;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub id: Uuid,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl TranscriptEntry {
    #[must_use]
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self::at(role, text, Utc::now())
    }

    #[must_use]
    pub fn at(role: Role, text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self { id: Uuid::new_v4(), role, text: text.into(), timestamp }
    }
}

/// Append-only record of what was said during one session.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    #[must_use]
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Append a line; blank text is dropped.
    pub fn push(&mut self, role: Role, text: &str) -> Option<&TranscriptEntry> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        self.entries.push(TranscriptEntry::new(role, text));
        self.entries.last()
    }

    #[must_use]
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Payload handed to the summary pipeline at teardown.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSummaryRequest {
    pub user_id: String,
    pub conversation_id: String,
    pub transcript: Vec<TranscriptEntry>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl SessionSummaryRequest {
    /// Build the request if the transcript is long enough to summarize.
    #[must_use]
    pub fn from_transcript(
        user_id: &str,
        conversation_id: &str,
        transcript: &Transcript,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Option<Self> {
        if transcript.len() < MIN_SUMMARY_ENTRIES {
            return None;
        }
        Some(Self {
            user_id: user_id.to_string(),
            conversation_id: conversation_id.to_string(),
            transcript: transcript.entries().to_vec(),
            started_at,
            ended_at,
        })
    }
}
