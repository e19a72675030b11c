use crate::config::EngineConfig;
use crate::transport::media::MediaBackend;
use crate::transport::rest::{BackendRestAdapter, RealtimeSignalingAdapter};
use crate::{Error, Result};
use std::sync::Arc;

use super::backend::{
    ConversationContext, CredentialBroker, RecentConversation, Signaling, SummaryStore, ToolExecutor,
};
use super::session::{Collaborators, VoiceSession};
use super::tools::ToolCatalog;
use super::transcript::TranscriptEntry;

pub struct VoiceEngine;

impl VoiceEngine {
    #[must_use]
    pub fn builder() -> VoiceSessionBuilder {
        VoiceSessionBuilder::new()
    }
}

pub struct VoiceSessionBuilder {
    config: EngineConfig,
    credentials: Option<Arc<dyn CredentialBroker>>,
    signaling: Option<Arc<dyn Signaling>>,
    tools: Option<Arc<dyn ToolExecutor>>,
    summaries: Option<Arc<dyn SummaryStore>>,
    media: Option<Arc<dyn MediaBackend>>,
    catalog: ToolCatalog,
    context: ConversationContext,
}

impl VoiceSessionBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            credentials: None,
            signaling: None,
            tools: None,
            summaries: None,
            media: None,
            catalog: ToolCatalog::memory_defaults(),
            context: ConversationContext::default(),
        }
    }

    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.config.instructions = Some(instructions.into());
        self
    }

    #[must_use]
    pub fn voice(mut self, voice: impl Into<String>) -> Self {
        self.config.voice = Some(voice.into());
        self
    }

    #[must_use]
    pub fn credentials(mut self, broker: Arc<dyn CredentialBroker>) -> Self {
        self.credentials = Some(broker);
        self
    }

    #[must_use]
    pub fn signaling(mut self, signaling: Arc<dyn Signaling>) -> Self {
        self.signaling = Some(signaling);
        self
    }

    #[must_use]
    pub fn tool_executor(mut self, executor: Arc<dyn ToolExecutor>) -> Self {
        self.tools = Some(executor);
        self
    }

    #[must_use]
    pub fn summary_store(mut self, store: Arc<dyn SummaryStore>) -> Self {
        self.summaries = Some(store);
        self
    }

    #[must_use]
    pub fn media(mut self, backend: Arc<dyn MediaBackend>) -> Self {
        self.media = Some(backend);
        self
    }

    /// Replace the default memory tool catalog.
    #[must_use]
    pub fn tools(mut self, catalog: ToolCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    #[must_use]
    pub fn conversation(mut self, conversation_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.context.conversation_id = conversation_id.into();
        self.context.user_id = user_id.into();
        self
    }

    /// Prior transcript of this conversation; the tail is sent with the
    /// credential request.
    #[must_use]
    pub fn history(mut self, entries: Vec<TranscriptEntry>) -> Self {
        self.context.recent_transcript = entries;
        self
    }

    #[must_use]
    pub fn recent_conversations(mut self, conversations: Vec<RecentConversation>) -> Self {
        self.context.recent_conversations = conversations;
        self
    }

    /// Use the HTTP adapters for every collaborator not set explicitly.
    ///
    /// # Errors
    /// Returns an error if an adapter cannot be constructed.
    #[allow(clippy::result_large_err)]
    pub fn with_http_backend(mut self, api_token: &str) -> Result<Self> {
        let backend = Arc::new(BackendRestAdapter::from_config(&self.config, api_token)?);
        if self.credentials.is_none() {
            self.credentials = Some(backend.clone());
        }
        if self.tools.is_none() {
            self.tools = Some(backend.clone());
        }
        if self.summaries.is_none() {
            self.summaries = Some(backend);
        }
        if self.signaling.is_none() {
            self.signaling = Some(Arc::new(RealtimeSignalingAdapter::from_config(&self.config)?));
        }
        Ok(self)
    }

    /// # Errors
    /// Returns an error if a collaborator is missing, the conversation is not
    /// set, or the configuration is invalid.
    #[allow(clippy::result_large_err)]
    pub fn build(self) -> Result<VoiceSession> {
        self.config.validate()?;
        if self.context.conversation_id.is_empty() || self.context.user_id.is_empty() {
            return Err(Error::InvalidConfig("conversation and user ids are required".to_string()));
        }
        let collaborators = Collaborators {
            credentials: required(self.credentials, "credential broker")?,
            signaling: required(self.signaling, "signaling")?,
            tools: required(self.tools, "tool executor")?,
            summaries: required(self.summaries, "summary store")?,
            media: required(self.media, "media backend")?,
        };
        Ok(VoiceSession::new(self.config, collaborators, self.catalog, self.context))
    }
}

impl Default for VoiceSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::result_large_err)]
fn required<T: ?Sized>(value: Option<Arc<T>>, what: &str) -> Result<Arc<T>> {
    value.ok_or_else(|| Error::InvalidConfig(format!("{what} required")))
}
