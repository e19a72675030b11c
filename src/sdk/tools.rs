use super::backend::ToolExecutor;
use crate::protocol::models::Tool;
use crate::{Error, Result};
use async_trait::async_trait;
use schemars::JsonSchema;
use schemars::schema::RootSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

type ToolHandler = Box<dyn Fn(Value) -> BoxFuture<Result<Value>> + Send + Sync>;

#[derive(Clone, Debug)]
pub struct ToolDefinition {
    pub name: String,
    pub description: Option<String>,
    pub schema: RootSchema,
}

/// A completed function call ready for execution.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub call_id: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct SearchMemoryArgs {
    /// What to look for in the user's saved memories.
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct SaveMemoryArgs {
    /// The fact to remember, phrased as a standalone statement.
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// The callable tools declared to the remote engine when the control channel opens.
#[derive(Clone, Debug, Default)]
pub struct ToolCatalog {
    defs: Vec<ToolDefinition>,
}

impl ToolCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The memory tools every voice session exposes by default.
    #[must_use]
    pub fn memory_defaults() -> Self {
        Self::new()
            .with_function::<SearchMemoryArgs>(
                "search_memory",
                "Search the user's saved memories for facts relevant to the conversation.",
            )
            .with_function::<SaveMemoryArgs>(
                "save_memory",
                "Save a fact about the user so it can be recalled in later conversations.",
            )
    }

    /// Declare a function whose parameter schema is derived from `TArgs`.
    /// Declaring a name twice replaces the earlier definition.
    #[must_use]
    pub fn with_function<TArgs: JsonSchema>(mut self, name: &str, description: impl Into<String>) -> Self {
        self.function::<TArgs>(name, Some(description.into()));
        self
    }

    pub fn function<TArgs: JsonSchema>(&mut self, name: &str, description: Option<String>) {
        let schema = schemars::schema_for!(TArgs);
        self.defs.retain(|d| d.name != name);
        self.defs.push(ToolDefinition { name: name.to_string(), description, schema });
    }

    #[must_use]
    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.defs
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.defs.iter().any(|d| d.name == name)
    }

    /// Convert the catalog into protocol-level tool definitions.
    ///
    /// # Errors
    /// Returns an error if schema serialization fails.
    #[allow(clippy::result_large_err)]
    pub fn try_as_tools(&self) -> Result<Vec<Tool>> {
        self.defs
            .iter()
            .map(|def| {
                Ok(Tool::Function {
                    name: def.name.clone(),
                    description: def.description.clone(),
                    parameters: serde_json::to_value(&def.schema)?,
                })
            })
            .collect()
    }
}

/// In-process `ToolExecutor` backed by typed async handlers.
#[derive(Default)]
pub struct LocalTools {
    handlers: HashMap<String, ToolHandler>,
}

impl LocalTools {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tool<TArgs, TResp, F, Fut>(&mut self, name: &str, handler: F)
    where
        TArgs: DeserializeOwned + Send + 'static,
        TResp: Serialize + Send + 'static,
        F: Fn(TArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TResp>> + Send + 'static,
    {
        let user_handler = Arc::new(handler);
        let handler = move |value: Value| -> BoxFuture<Result<Value>> {
            let user_handler = Arc::clone(&user_handler);
            Box::pin(async move {
                let args: TArgs =
                    serde_json::from_value(value).map_err(|e| Error::InvalidArguments(e.to_string()))?;
                let resp = user_handler(args).await?;
                Ok(serde_json::to_value(resp)?)
            })
        };
        self.handlers.insert(name.to_string(), Box::new(handler));
    }
}

#[async_trait]
impl ToolExecutor for LocalTools {
    async fn execute_function(&self, name: &str, arguments: Value) -> Result<Value> {
        let handler = self
            .handlers
            .get(name)
            .ok_or_else(|| Error::UnknownTool(name.to_string()))?;
        handler(arguments).await
    }
}
