use crate::sdk::SessionFault;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorType {
    InvalidRequestError,
    RateLimitError,
    AuthenticationError,
    ServerError,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Error payload carried by the remote engine's `error` event.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ServerError {
    #[serde(rename = "type", default)]
    pub error_type: ApiErrorType,
    pub code: Option<String>,
    pub message: String,
    pub param: Option<String>,
    pub event_id: Option<String>,
}

/// Usage counters reported by the credential endpoint when the quota is exhausted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct QuotaUsage {
    pub current: u32,
    pub limit: u32,
    #[serde(default, alias = "upgradeRequired")]
    pub upgrade_required: bool,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP protocol error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse or serialize JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Header error: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),

    #[error("Voice quota exceeded ({} of {} used)", .0.current, .0.limit)]
    QuotaExceeded(QuotaUsage),

    #[error("Not authorized to start a voice session: {0}")]
    AuthFailure(String),

    #[error("Session credential expired before negotiation")]
    CredentialExpired,

    #[error("Session negotiation failed: {0}")]
    Negotiation(String),

    #[error("Media error: {0}")]
    Media(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: &'static str, after: Duration },

    #[error("The connection was closed unexpectedly")]
    ConnectionClosed,

    #[error("Session was superseded by a newer connect or disconnect")]
    Superseded,

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Errors in this set end the connection attempt and are shown to the user.
    #[must_use]
    pub const fn is_user_visible(&self) -> bool {
        matches!(
            self,
            Self::QuotaExceeded(_)
                | Self::AuthFailure(_)
                | Self::CredentialExpired
                | Self::Negotiation(_)
                | Self::Media(_)
                | Self::Timeout { .. }
        )
    }

    /// Project this error into the fault recorded in `RecordingState`.
    #[must_use]
    pub fn fault(&self) -> SessionFault {
        SessionFault::from(self)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// `Timeout::operation` for the credential request.
pub const CREDENTIAL_ISSUANCE: &str = "credential issuance";
