//! Voice session engine: lifecycle, control channel protocol, function-call
//! dispatch and voice activity.
//!
//! Hosts construct a [`VoiceSession`] through [`VoiceEngine::builder`] and
//! observe it through [`VoiceSession::subscribe`].

mod backend;
mod builder;
mod channel;
mod dispatch;
mod monitor;
mod pending;
mod session;
mod state;
mod tools;
mod transcript;

pub use backend::{
    ConversationContext, CredentialBroker, RecentConversation, SessionCredential, Signaling, SummaryStore,
    ToolExecutor,
};
pub use builder::{VoiceEngine, VoiceSessionBuilder};
pub use channel::{ProtocolHandler, session_update};
pub use dispatch::{ChannelSender, Dispatcher};
pub use monitor::{MonitorHandle, VoiceDetector, spawn_monitor};
pub use pending::{CallStatus, PendingCalls, PendingFunctionCall};
pub use session::{Collaborators, Phase, VoiceSession};
pub use state::{FaultKind, RecordingState, SessionFault, StateAction, StateStore, StateStream};
pub use tools::{
    BoxFuture as ToolFuture, LocalTools, SaveMemoryArgs, SearchMemoryArgs, ToolCall, ToolCatalog, ToolDefinition,
};
pub use transcript::{MIN_SUMMARY_ENTRIES, SessionSummaryRequest, Transcript, TranscriptEntry};
