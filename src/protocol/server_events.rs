use serde::{Deserialize, Deserializer, Serialize, Serializer};
use super::models::{ArbitraryJson, Item};
use crate::error::ServerError;

/// Minimal view of a response object carried by `response.created` / `response.done`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Events received over the control channel. Unknown or malformed event types
/// are kept as raw JSON in `Unknown` so a single unexpected message never
/// fails deserialization of the stream.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    Error {
        event_id: String,
        error: ServerError,
    },
    SessionCreated {
        event_id: String,
        session: ArbitraryJson,
    },
    SessionUpdated {
        event_id: String,
        session: ArbitraryJson,
    },
    InputAudioBufferSpeechStarted {
        event_id: String,
        audio_start_ms: u32,
        item_id: String,
    },
    InputAudioBufferSpeechStopped {
        event_id: String,
        audio_end_ms: u32,
        item_id: String,
    },
    OutputAudioBufferStarted {
        event_id: String,
        response_id: String,
    },
    OutputAudioBufferStopped {
        event_id: String,
        response_id: String,
    },
    OutputAudioBufferCleared {
        event_id: String,
        response_id: String,
    },
    InputAudioTranscriptionCompleted {
        event_id: String,
        item_id: String,
        content_index: u32,
        transcript: String,
    },
    ResponseCreated {
        event_id: String,
        response: ResponseRef,
    },
    ResponseDone {
        event_id: String,
        response: ResponseRef,
    },
    ResponseOutputItemAdded {
        event_id: String,
        response_id: String,
        output_index: u32,
        item: Item,
    },
    ResponseOutputTextDone {
        event_id: String,
        response_id: String,
        item_id: String,
        output_index: u32,
        content_index: u32,
        text: String,
    },
    ResponseOutputAudioTranscriptDone {
        event_id: String,
        response_id: String,
        item_id: String,
        output_index: u32,
        content_index: u32,
        transcript: String,
    },
    /// `response.function_call_arguments.delta`: one slice of a function call's JSON arguments.
    ResponseFunctionCallArgumentsDelta {
        event_id: String,
        response_id: String,
        item_id: String,
        output_index: u32,
        call_id: String,
        delta: String,
    },
    /// `response.function_call_arguments.done`: all argument slices for `call_id` have been sent.
    ResponseFunctionCallArgumentsDone {
        event_id: String,
        response_id: String,
        item_id: String,
        output_index: u32,
        call_id: String,
        name: Option<String>,
        arguments: Option<String>,
    },
    Unknown(ArbitraryJson),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
enum ServerEventRepr {
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        event_id: String,
        error: ServerError,
    },
    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        event_id: String,
        session: ArbitraryJson,
    },
    #[serde(rename = "session.updated")]
    SessionUpdated {
        #[serde(default)]
        event_id: String,
        session: ArbitraryJson,
    },
    #[serde(rename = "input_audio_buffer.speech_started")]
    InputAudioBufferSpeechStarted {
        #[serde(default)]
        event_id: String,
        #[serde(default)]
        audio_start_ms: u32,
        #[serde(default)]
        item_id: String,
    },
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    InputAudioBufferSpeechStopped {
        #[serde(default)]
        event_id: String,
        #[serde(default)]
        audio_end_ms: u32,
        #[serde(default)]
        item_id: String,
    },
    #[serde(rename = "output_audio_buffer.started")]
    OutputAudioBufferStarted {
        #[serde(default)]
        event_id: String,
        #[serde(default)]
        response_id: String,
    },
    #[serde(rename = "output_audio_buffer.stopped")]
    OutputAudioBufferStopped {
        #[serde(default)]
        event_id: String,
        #[serde(default)]
        response_id: String,
    },
    #[serde(rename = "output_audio_buffer.cleared")]
    OutputAudioBufferCleared {
        #[serde(default)]
        event_id: String,
        #[serde(default)]
        response_id: String,
    },
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputAudioTranscriptionCompleted {
        #[serde(default)]
        event_id: String,
        #[serde(default)]
        item_id: String,
        #[serde(default)]
        content_index: u32,
        transcript: String,
    },
    #[serde(rename = "response.created")]
    ResponseCreated {
        #[serde(default)]
        event_id: String,
        response: ResponseRef,
    },
    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        event_id: String,
        response: ResponseRef,
    },
    #[serde(rename = "response.output_item.added")]
    ResponseOutputItemAdded {
        #[serde(default)]
        event_id: String,
        #[serde(default)]
        response_id: String,
        #[serde(default)]
        output_index: u32,
        item: Item,
    },
    #[serde(rename = "response.output_text.done")]
    ResponseOutputTextDone {
        #[serde(default)]
        event_id: String,
        #[serde(default)]
        response_id: String,
        #[serde(default)]
        item_id: String,
        #[serde(default)]
        output_index: u32,
        #[serde(default)]
        content_index: u32,
        text: String,
    },
    #[serde(rename = "response.output_audio_transcript.done")]
    ResponseOutputAudioTranscriptDone {
        #[serde(default)]
        event_id: String,
        #[serde(default)]
        response_id: String,
        #[serde(default)]
        item_id: String,
        #[serde(default)]
        output_index: u32,
        #[serde(default)]
        content_index: u32,
        transcript: String,
    },
    #[serde(rename = "response.function_call_arguments.delta")]
    ResponseFunctionCallArgumentsDelta {
        #[serde(default)]
        event_id: String,
        #[serde(default)]
        response_id: String,
        #[serde(default)]
        item_id: String,
        #[serde(default)]
        output_index: u32,
        call_id: String,
        delta: String,
    },
    #[serde(rename = "response.function_call_arguments.done")]
    ResponseFunctionCallArgumentsDone {
        #[serde(default)]
        event_id: String,
        #[serde(default)]
        response_id: String,
        #[serde(default)]
        item_id: String,
        #[serde(default)]
        output_index: u32,
        call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        arguments: Option<String>,
    },
}

impl From<ServerEventRepr> for ServerEvent {
    fn from(repr: ServerEventRepr) -> Self {
        match repr {
            ServerEventRepr::Error { event_id, error } => Self::Error { event_id, error },
            ServerEventRepr::SessionCreated { event_id, session } => Self::SessionCreated { event_id, session },
            ServerEventRepr::SessionUpdated { event_id, session } => Self::SessionUpdated { event_id, session },
            ServerEventRepr::InputAudioBufferSpeechStarted { event_id, audio_start_ms, item_id } => Self::InputAudioBufferSpeechStarted { event_id, audio_start_ms, item_id },
            ServerEventRepr::InputAudioBufferSpeechStopped { event_id, audio_end_ms, item_id } => Self::InputAudioBufferSpeechStopped { event_id, audio_end_ms, item_id },
            ServerEventRepr::OutputAudioBufferStarted { event_id, response_id } => Self::OutputAudioBufferStarted { event_id, response_id },
            ServerEventRepr::OutputAudioBufferStopped { event_id, response_id } => Self::OutputAudioBufferStopped { event_id, response_id },
            ServerEventRepr::OutputAudioBufferCleared { event_id, response_id } => Self::OutputAudioBufferCleared { event_id, response_id },
            ServerEventRepr::InputAudioTranscriptionCompleted { event_id, item_id, content_index, transcript } => Self::InputAudioTranscriptionCompleted { event_id, item_id, content_index, transcript },
            ServerEventRepr::ResponseCreated { event_id, response } => Self::ResponseCreated { event_id, response },
            ServerEventRepr::ResponseDone { event_id, response } => Self::ResponseDone { event_id, response },
            ServerEventRepr::ResponseOutputItemAdded { event_id, response_id, output_index, item } => Self::ResponseOutputItemAdded { event_id, response_id, output_index, item },
            ServerEventRepr::ResponseOutputTextDone { event_id, response_id, item_id, output_index, content_index, text } => Self::ResponseOutputTextDone { event_id, response_id, item_id, output_index, content_index, text },
            ServerEventRepr::ResponseOutputAudioTranscriptDone { event_id, response_id, item_id, output_index, content_index, transcript } => Self::ResponseOutputAudioTranscriptDone { event_id, response_id, item_id, output_index, content_index, transcript },
            ServerEventRepr::ResponseFunctionCallArgumentsDelta { event_id, response_id, item_id, output_index, call_id, delta } => Self::ResponseFunctionCallArgumentsDelta { event_id, response_id, item_id, output_index, call_id, delta },
            ServerEventRepr::ResponseFunctionCallArgumentsDone { event_id, response_id, item_id, output_index, call_id, name, arguments } => Self::ResponseFunctionCallArgumentsDone { event_id, response_id, item_id, output_index, call_id, name, arguments },
        }
    }
}

impl Serialize for ServerEvent {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let repr = match self.clone() {
            Self::Unknown(value) => return value.serialize(serializer),
            Self::Error { event_id, error } => ServerEventRepr::Error { event_id, error },
            Self::SessionCreated { event_id, session } => ServerEventRepr::SessionCreated { event_id, session },
            Self::SessionUpdated { event_id, session } => ServerEventRepr::SessionUpdated { event_id, session },
            Self::InputAudioBufferSpeechStarted { event_id, audio_start_ms, item_id } => ServerEventRepr::InputAudioBufferSpeechStarted { event_id, audio_start_ms, item_id },
            Self::InputAudioBufferSpeechStopped { event_id, audio_end_ms, item_id } => ServerEventRepr::InputAudioBufferSpeechStopped { event_id, audio_end_ms, item_id },
            Self::OutputAudioBufferStarted { event_id, response_id } => ServerEventRepr::OutputAudioBufferStarted { event_id, response_id },
            Self::OutputAudioBufferStopped { event_id, response_id } => ServerEventRepr::OutputAudioBufferStopped { event_id, response_id },
            Self::OutputAudioBufferCleared { event_id, response_id } => ServerEventRepr::OutputAudioBufferCleared { event_id, response_id },
            Self::InputAudioTranscriptionCompleted { event_id, item_id, content_index, transcript } => ServerEventRepr::InputAudioTranscriptionCompleted { event_id, item_id, content_index, transcript },
            Self::ResponseCreated { event_id, response } => ServerEventRepr::ResponseCreated { event_id, response },
            Self::ResponseDone { event_id, response } => ServerEventRepr::ResponseDone { event_id, response },
            Self::ResponseOutputItemAdded { event_id, response_id, output_index, item } => ServerEventRepr::ResponseOutputItemAdded { event_id, response_id, output_index, item },
            Self::ResponseOutputTextDone { event_id, response_id, item_id, output_index, content_index, text } => ServerEventRepr::ResponseOutputTextDone { event_id, response_id, item_id, output_index, content_index, text },
            Self::ResponseOutputAudioTranscriptDone { event_id, response_id, item_id, output_index, content_index, transcript } => ServerEventRepr::ResponseOutputAudioTranscriptDone { event_id, response_id, item_id, output_index, content_index, transcript },
            Self::ResponseFunctionCallArgumentsDelta { event_id, response_id, item_id, output_index, call_id, delta } => ServerEventRepr::ResponseFunctionCallArgumentsDelta { event_id, response_id, item_id, output_index, call_id, delta },
            Self::ResponseFunctionCallArgumentsDone { event_id, response_id, item_id, output_index, call_id, name, arguments } => ServerEventRepr::ResponseFunctionCallArgumentsDone { event_id, response_id, item_id, output_index, call_id, name, arguments },
        };
        repr.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ServerEvent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = ArbitraryJson::deserialize(deserializer)?;
        match ServerEventRepr::deserialize(value.clone()) {
            Ok(repr) => Ok(repr.into()),
            Err(err) => {
                tracing::debug!("Failed to parse ServerEvent: {err}");
                Ok(Self::Unknown(value))
            }
        }
    }
}

impl ServerEvent {
    /// Build a `response.function_call_arguments.delta` event.
    #[must_use]
    pub fn argument_fragment(call_id: impl Into<String>, delta: impl Into<String>) -> Self {
        Self::ResponseFunctionCallArgumentsDelta {
            event_id: String::new(),
            response_id: String::new(),
            item_id: String::new(),
            output_index: 0,
            call_id: call_id.into(),
            delta: delta.into(),
        }
    }

    /// Build a `response.function_call_arguments.done` event.
    #[must_use]
    pub fn argument_complete(call_id: impl Into<String>, name: Option<&str>) -> Self {
        Self::ResponseFunctionCallArgumentsDone {
            event_id: String::new(),
            response_id: String::new(),
            item_id: String::new(),
            output_index: 0,
            call_id: call_id.into(),
            name: name.map(str::to_string),
            arguments: None,
        }
    }

    #[must_use]
    pub fn event_type(&self) -> &str {
        match self {
            Self::Error { .. } => "error",
            Self::SessionCreated { .. } => "session.created",
            Self::SessionUpdated { .. } => "session.updated",
            Self::InputAudioBufferSpeechStarted { .. } => "input_audio_buffer.speech_started",
            Self::InputAudioBufferSpeechStopped { .. } => "input_audio_buffer.speech_stopped",
            Self::OutputAudioBufferStarted { .. } => "output_audio_buffer.started",
            Self::OutputAudioBufferStopped { .. } => "output_audio_buffer.stopped",
            Self::OutputAudioBufferCleared { .. } => "output_audio_buffer.cleared",
            Self::InputAudioTranscriptionCompleted { .. } => "conversation.item.input_audio_transcription.completed",
            Self::ResponseCreated { .. } => "response.created",
            Self::ResponseDone { .. } => "response.done",
            Self::ResponseOutputItemAdded { .. } => "response.output_item.added",
            Self::ResponseOutputTextDone { .. } => "response.output_text.done",
            Self::ResponseOutputAudioTranscriptDone { .. } => "response.output_audio_transcript.done",
            Self::ResponseFunctionCallArgumentsDelta { .. } => "response.function_call_arguments.delta",
            Self::ResponseFunctionCallArgumentsDone { .. } => "response.function_call_arguments.done",
            Self::Unknown(value) => value.get("type").and_then(|v| v.as_str()).unwrap_or("unknown"),
        }
    }
}
