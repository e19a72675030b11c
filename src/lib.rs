#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

pub mod config;
pub mod error;
pub mod protocol;
pub mod sdk;
pub mod transport;

pub use config::{AudioConstraints, EngineConfig, VadConfig};
pub use error::{Error, QuotaUsage, Result};
pub use protocol::client_events::ClientEvent;
pub use protocol::models::{ContentPart, Item, Role, SessionUpdate, SessionUpdateConfig, Tool, ToolChoice};
pub use protocol::server_events::ServerEvent;
pub use sdk::{
    Collaborators, ConversationContext, CredentialBroker, FaultKind, LocalTools, Phase, RecordingState,
    SessionCredential, SessionFault, SessionSummaryRequest, Signaling, StateStream, SummaryStore, ToolCatalog,
    ToolExecutor, TranscriptEntry, VoiceEngine, VoiceSession, VoiceSessionBuilder,
};
pub use transport::media::{
    AudioFrame, AudioTrack, ChannelEvent, ChannelHandle, DataChannel, LinkState, MediaBackend, PeerConnection,
    PeerEvent, PeerHandle, RemoteAudioTrack,
};
pub use transport::rest::{BackendRestAdapter, RealtimeSignalingAdapter};

pub(crate) const TRACE_LOG_MAX_BYTES: usize = 1024;
const TRACE_TRUNCATE_SUFFIX: &str = "... (truncated)";

pub(crate) fn safe_truncate(s: &str, max_bytes: usize) -> std::borrow::Cow<'_, str> {
    if s.len() <= max_bytes {
        return std::borrow::Cow::Borrowed(s);
    }

    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    std::borrow::Cow::Owned(format!(
        "{} {} {} bytes",
        &s[..end],
        TRACE_TRUNCATE_SUFFIX,
        s.len() - end
    ))
}

#[cfg(test)]
mod tests {
    use super::safe_truncate;

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "héllo wörld";
        let out = safe_truncate(text, 2);
        assert!(out.starts_with('h'));
        assert!(out.ends_with("bytes"));
        assert_eq!(safe_truncate("short", 16), "short");
    }
}
