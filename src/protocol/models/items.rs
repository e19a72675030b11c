use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{ArbitraryJson, ItemStatus, Role};

/// Manual deserialization keeps unknown item types as raw JSON so a new item
/// kind from the remote engine never fails the whole event.
#[derive(Debug, Clone)]
pub enum Item {
    Message {
        id: Option<String>,
        status: Option<ItemStatus>,
        role: Role,
        content: Vec<ContentPart>,
    },
    FunctionCall {
        id: Option<String>,
        status: Option<ItemStatus>,
        name: String,
        call_id: String,
        arguments: String,
    },
    FunctionCallOutput {
        id: Option<String>,
        call_id: String,
        output: String,
    },
    Unknown(ArbitraryJson),
}

impl Item {
    /// Build the output item that answers a function call.
    #[must_use]
    pub fn function_output(call_id: impl Into<String>, output: String) -> Self {
        Self::FunctionCallOutput { id: None, call_id: call_id.into(), output }
    }
}

impl std::fmt::Display for Item {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Message { .. } => "message",
            Self::FunctionCall { .. } => "function_call",
            Self::FunctionCallOutput { .. } => "function_call_output",
            Self::Unknown(_) => "unknown",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ItemRepr {
    Message {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<ItemStatus>,
        role: Role,
        content: Vec<ContentPart>,
    },
    FunctionCall {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<ItemStatus>,
        name: String,
        call_id: String,
        #[serde(default)]
        arguments: String,
    },
    FunctionCallOutput {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        call_id: String,
        output: String,
    },
}

impl From<ItemRepr> for Item {
    fn from(repr: ItemRepr) -> Self {
        match repr {
            ItemRepr::Message { id, status, role, content } => Self::Message { id, status, role, content },
            ItemRepr::FunctionCall { id, status, name, call_id, arguments } => {
                Self::FunctionCall { id, status, name, call_id, arguments }
            }
            ItemRepr::FunctionCallOutput { id, call_id, output } => {
                Self::FunctionCallOutput { id, call_id, output }
            }
        }
    }
}

impl Serialize for Item {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let repr = match self {
            Self::Unknown(value) => return value.serialize(serializer),
            Self::Message { id, status, role, content } => ItemRepr::Message {
                id: id.clone(),
                status: *status,
                role: *role,
                content: content.clone(),
            },
            Self::FunctionCall { id, status, name, call_id, arguments } => ItemRepr::FunctionCall {
                id: id.clone(),
                status: *status,
                name: name.clone(),
                call_id: call_id.clone(),
                arguments: arguments.clone(),
            },
            Self::FunctionCallOutput { id, call_id, output } => ItemRepr::FunctionCallOutput {
                id: id.clone(),
                call_id: call_id.clone(),
                output: output.clone(),
            },
        };
        repr.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Item {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = ArbitraryJson::deserialize(deserializer)?;
        match ItemRepr::deserialize(value.clone()) {
            Ok(repr) => Ok(repr.into()),
            Err(err) => {
                tracing::debug!("Failed to parse Item: {err}");
                Ok(Self::Unknown(value))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    InputText {
        text: String,
    },
    InputAudio {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transcript: Option<String>,
    },
    OutputText {
        text: String,
    },
    OutputAudio {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transcript: Option<String>,
    },
    #[serde(other)]
    Unknown,
}
