use serde::{Deserialize, Serialize};
use super::models::{Item, SessionUpdate};

/// Events the engine sends over the control channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate {
        #[serde(skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        session: Box<SessionUpdate>,
    },
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        #[serde(skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        previous_item_id: Option<String>,
        item: Box<Item>,
    },
    #[serde(rename = "response.create")]
    ResponseCreate {
        #[serde(skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
    },
}

impl ClientEvent {
    /// A `function_call_output` item carrying a tool's output back to the conversation.
    #[must_use]
    pub fn function_result(call_id: impl Into<String>, output: String) -> Self {
        Self::ConversationItemCreate {
            event_id: None,
            previous_item_id: None,
            item: Box::new(Item::function_output(call_id, output)),
        }
    }

    /// `response.create`: ask the engine to produce the next response.
    #[must_use]
    pub const fn continue_generation() -> Self {
        Self::ResponseCreate { event_id: None }
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SessionUpdate { .. } => "session.update",
            Self::ConversationItemCreate { .. } => "conversation.item.create",
            Self::ResponseCreate { .. } => "response.create",
        }
    }
}
