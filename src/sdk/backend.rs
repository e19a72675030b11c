//! Contracts for the external collaborators the engine consumes.

use super::transcript::{SessionSummaryRequest, TranscriptEntry};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// A previous conversation the assistant may refer back to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecentConversation {
    pub id: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Input to credential issuance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ConversationContext {
    pub conversation_id: String,
    pub user_id: String,
    pub recent_transcript: Vec<TranscriptEntry>,
    pub recent_conversations: Vec<RecentConversation>,
}

impl ConversationContext {
    /// Copy of this context keeping only the last `len` transcript entries,
    /// oldest first.
    #[must_use]
    pub fn excerpt(&self, len: usize) -> Self {
        let start = self.recent_transcript.len().saturating_sub(len);
        Self {
            recent_transcript: self.recent_transcript[start..].to_vec(),
            ..self.clone()
        }
    }
}

/// Ephemeral, conversation-scoped credential for one realtime session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionCredential {
    pub value: String,
    pub session_id: String,
    /// Unix seconds after which the credential is no longer accepted.
    pub expires_at: Option<i64>,
}

impl SessionCredential {
    /// Time left before expiry, `None` when the credential carries no expiry.
    /// An expired credential reports `Some(Duration::ZERO)`.
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let expires_at = self.expires_at?;
        let left = expires_at.saturating_sub(now.timestamp());
        Some(Duration::from_secs(u64::try_from(left).unwrap_or(0)))
    }
}

#[async_trait]
pub trait CredentialBroker: Send + Sync {
    /// # Errors
    /// `QuotaExceeded` when the user is out of voice minutes, `AuthFailure`
    /// when the caller may not open a session, or a transport error.
    async fn issue_session_credential(&self, context: &ConversationContext) -> Result<SessionCredential>;
}

/// Session-description exchange with the remote realtime engine.
#[async_trait]
pub trait Signaling: Send + Sync {
    /// Send the local offer, bearer-authorized by `credential`, and return the answer.
    ///
    /// # Errors
    /// Returns an error if the exchange is rejected or the request fails.
    async fn negotiate(&self, offer: String, credential: &str) -> Result<String>;
}

/// Generic tool execution; every registered tool shares this call shape.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// # Errors
    /// Returns an error if the tool fails or the endpoint is unreachable.
    async fn execute_function(&self, name: &str, arguments: Value) -> Result<Value>;
}

#[async_trait]
pub trait SummaryStore: Send + Sync {
    /// # Errors
    /// Returns an error if the summary cannot be stored.
    async fn store_session_summary(&self, request: SessionSummaryRequest) -> Result<()>;
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::models::Role;
    use chrono::TimeZone;

    #[test]
    fn excerpt_keeps_most_recent_in_order() {
        let context = ConversationContext {
            conversation_id: "conv".to_string(),
            recent_transcript: ["a", "b", "c"]
                .into_iter()
                .map(|text| TranscriptEntry::new(Role::User, text))
                .collect(),
            ..ConversationContext::default()
        };
        let tail: Vec<_> = context.excerpt(2).recent_transcript.into_iter().map(|e| e.text).collect();
        assert_eq!(tail, ["b", "c"]);
        assert_eq!(context.excerpt(2).conversation_id, "conv");
        assert_eq!(context.excerpt(10).recent_transcript.len(), 3);
        assert!(context.excerpt(0).recent_transcript.is_empty());
    }

    #[test]
    fn remaining_lifetime() {
        let now = Utc.timestamp_opt(1_000, 0).unwrap();
        let credential = SessionCredential {
            value: "ek".to_string(),
            session_id: "sess".to_string(),
            expires_at: Some(1_060),
        };
        assert_eq!(credential.remaining(now), Some(Duration::from_secs(60)));

        let expired = SessionCredential { expires_at: Some(900), ..credential.clone() };
        assert_eq!(expired.remaining(now), Some(Duration::ZERO));

        let open = SessionCredential { expires_at: None, ..credential };
        assert_eq!(open.remaining(now), None);
    }
}
