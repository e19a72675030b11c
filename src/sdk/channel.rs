//! Control channel protocol: configures the remote engine on open and routes
//! the typed event stream.

use super::dispatch::{ChannelSender, Dispatcher};
use super::pending::{PendingCalls, PendingFunctionCall};
use super::state::{StateAction, StateStore};
use super::tools::{ToolCall, ToolCatalog};
use super::transcript::Transcript;
use crate::config::EngineConfig;
use crate::protocol::client_events::ClientEvent;
use crate::protocol::models::{
    InputAudioTranscription, Item, Role, SessionUpdate, SessionUpdateConfig, ToolChoice, TurnDetection,
};
use crate::protocol::server_events::ServerEvent;
use crate::{Error, Result, TRACE_LOG_MAX_BYTES, safe_truncate};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};

/// Build the `session.update` sent when the control channel opens.
///
/// # Errors
/// Returns an error if a tool schema cannot be serialized.
#[allow(clippy::result_large_err)]
pub fn session_update(config: &EngineConfig, catalog: &ToolCatalog) -> Result<SessionUpdate> {
    let tools = catalog.try_as_tools()?;
    let tool_choice = (!tools.is_empty()).then_some(ToolChoice::Auto);
    Ok(SessionUpdate {
        config: SessionUpdateConfig {
            instructions: config.instructions.clone(),
            voice: config.voice.clone(),
            input_audio_transcription: config.input_transcription_model.clone().map(|model| {
                InputAudioTranscription { model: Some(model), language: None }
            }),
            turn_detection: Some(TurnDetection::server_default()),
            tools: (!tools.is_empty()).then_some(tools),
            tool_choice,
        },
    })
}

pub struct ProtocolHandler {
    sender: ChannelSender,
    catalog: ToolCatalog,
    session_update: SessionUpdate,
    pending: PendingCalls,
    dispatcher: Dispatcher,
    state: StateStore,
    transcript: Arc<Mutex<Transcript>>,
}

impl ProtocolHandler {
    #[must_use]
    pub fn new(
        sender: ChannelSender,
        catalog: ToolCatalog,
        session_update: SessionUpdate,
        dispatcher: Dispatcher,
        state: StateStore,
        transcript: Arc<Mutex<Transcript>>,
    ) -> Self {
        Self {
            sender,
            catalog,
            session_update,
            pending: PendingCalls::new(),
            dispatcher,
            state,
            transcript,
        }
    }

    #[must_use]
    pub const fn pending(&self) -> &PendingCalls {
        &self.pending
    }

    /// Declare the session configuration and tool catalog, then start generation.
    ///
    /// # Errors
    /// Returns an error if either event cannot be sent.
    pub async fn on_open(&self) -> Result<()> {
        tracing::debug!(
            "Control channel open; declaring {} tools",
            self.catalog.definitions().len()
        );
        self.sender
            .send(ClientEvent::SessionUpdate {
                event_id: None,
                session: Box::new(self.session_update.clone()),
            })
            .await?;
        self.sender.send(ClientEvent::continue_generation()).await
    }

    /// Parse and route one raw message. A message that is not valid JSON is
    /// dropped; the channel keeps running.
    pub async fn on_message(&mut self, text: &str) {
        tracing::trace!("Received event: {}", safe_truncate(text, TRACE_LOG_MAX_BYTES));
        match serde_json::from_str::<ServerEvent>(text) {
            Ok(event) => self.handle_event(event).await,
            Err(err) => tracing::warn!("Dropping malformed control message: {err}"),
        }
    }

    pub async fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::ResponseOutputItemAdded { item: Item::FunctionCall { name, call_id, .. }, .. } => {
                self.pending.begin(&call_id, &name);
            }
            ServerEvent::ResponseFunctionCallArgumentsDelta { call_id, delta, .. } => {
                self.pending.append(&call_id, &delta);
            }
            ServerEvent::ResponseFunctionCallArgumentsDone { call_id, name, arguments, .. } => {
                let Some(mut call) = self.pending.take(&call_id) else {
                    tracing::warn!("Ignoring completion for unknown call {call_id}");
                    return;
                };
                if call.name.is_none() {
                    call.name = name;
                }
                if call.buffer.is_empty() {
                    call.buffer = arguments.unwrap_or_default();
                }
                self.complete(call).await;
            }
            ServerEvent::InputAudioTranscriptionCompleted { transcript, .. } => {
                self.record(Role::User, &transcript);
            }
            ServerEvent::ResponseOutputAudioTranscriptDone { transcript, .. } => {
                self.record(Role::Assistant, &transcript);
            }
            ServerEvent::ResponseOutputTextDone { text, .. } => {
                self.record(Role::Assistant, &text);
            }
            ServerEvent::OutputAudioBufferStarted { .. } => {
                self.state.apply(StateAction::PlaybackChanged(true));
            }
            ServerEvent::OutputAudioBufferStopped { .. } | ServerEvent::OutputAudioBufferCleared { .. } => {
                self.state.apply(StateAction::PlaybackChanged(false));
            }
            ServerEvent::Error { error, .. } => {
                tracing::warn!(
                    code = error.code.as_deref().unwrap_or("none"),
                    "Remote engine reported an error: {}",
                    error.message
                );
            }
            ServerEvent::Unknown(_) => {
                tracing::debug!("Ignoring unrecognized event {}", event.event_type());
            }
            other => tracing::trace!("Unhandled event {}", other.event_type()),
        }
    }

    /// Discard partial calls when the session goes away.
    pub fn shutdown(&mut self) -> usize {
        self.pending.clear()
    }

    async fn complete(&self, call: PendingFunctionCall) {
        let PendingFunctionCall { call_id, name, buffer, .. } = call;
        let Some(name) = name else {
            let err = Error::InvalidArguments("function name was never announced".to_string());
            self.dispatcher.reject(&call_id, &err).await;
            return;
        };
        if !self.catalog.contains(&name) {
            self.dispatcher.reject(&call_id, &Error::UnknownTool(name)).await;
            return;
        }
        let arguments = if buffer.trim().is_empty() {
            Value::Object(serde_json::Map::new())
        } else {
            match serde_json::from_str::<Value>(&buffer) {
                Ok(arguments) => arguments,
                Err(err) => {
                    let err = Error::InvalidArguments(format!("{name}: {err}"));
                    self.dispatcher.reject(&call_id, &err).await;
                    return;
                }
            }
        };
        self.dispatcher.spawn(ToolCall { name, call_id, arguments });
    }

    fn record(&self, role: Role, text: &str) {
        let mut transcript = self.transcript.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = transcript.push(role, text) {
            tracing::debug!("Transcript +{} ({} chars)", entry.role, entry.text.len());
        }
    }
}
