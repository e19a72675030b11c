pub mod common;
pub mod items;
pub mod session;
pub mod tools;

pub use common::{ArbitraryJson, DEFAULT_MODEL, ItemStatus, JsonSchema, Role};
pub use items::{ContentPart, Item};
pub use session::{InputAudioTranscription, SessionUpdate, SessionUpdateConfig, TurnDetection};
pub use tools::{Tool, ToolChoice};
