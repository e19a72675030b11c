use super::backend::ToolExecutor;
use super::tools::ToolCall;
use crate::protocol::client_events::ClientEvent;
use crate::transport::media::DataChannel;
use crate::{Error, Result, TRACE_LOG_MAX_BYTES, safe_truncate};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Sends client events on one session's control channel.
///
/// Bound to the session generation it was created for: once the lifecycle
/// moves on, or the channel closes, sends become silent no-ops.
#[derive(Clone)]
pub struct ChannelSender {
    channel: Arc<dyn DataChannel>,
    generation: u64,
    current: watch::Receiver<u64>,
}

impl ChannelSender {
    #[must_use]
    pub fn new(channel: Arc<dyn DataChannel>, generation: u64, current: watch::Receiver<u64>) -> Self {
        Self { channel, generation, current }
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        *self.current.borrow() == self.generation && self.channel.is_open()
    }

    /// # Errors
    /// Returns an error if the event cannot be serialized or the channel
    /// rejects the write.
    pub async fn send(&self, event: ClientEvent) -> Result<()> {
        if !self.is_live() {
            tracing::debug!("Dropping {} for a closed or superseded session", event.kind());
            return Ok(());
        }
        let json = serde_json::to_string(&event)?;
        tracing::trace!("Sending event: {}", safe_truncate(&json, TRACE_LOG_MAX_BYTES));
        self.channel.send_text(json).await
    }
}

/// Runs completed function calls against the tool executor and feeds the
/// outcome back into the conversation.
#[derive(Clone)]
pub struct Dispatcher {
    executor: Arc<dyn ToolExecutor>,
    sender: ChannelSender,
    timeout: Duration,
}

impl Dispatcher {
    #[must_use]
    pub fn new(executor: Arc<dyn ToolExecutor>, sender: ChannelSender, timeout: Duration) -> Self {
        Self { executor, sender, timeout }
    }

    /// Run the call on its own task so the event loop keeps reading fragments.
    pub fn spawn(&self, call: ToolCall) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.run(call).await })
    }

    /// Execute once, then always emit one function result followed by one
    /// continue-generation, whether the tool succeeded, failed, panicked or
    /// timed out.
    pub async fn run(&self, call: ToolCall) {
        let ToolCall { name, call_id, arguments } = call;
        tracing::debug!("Dispatching {name} for call {call_id}");

        let executor = Arc::clone(&self.executor);
        let tool = name.clone();
        let mut task = tokio::spawn(async move { executor.execute_function(&tool, arguments).await });

        let outcome = match tokio::time::timeout(self.timeout, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(Error::ToolExecution(format!("{name} aborted: {join_err}"))),
            Err(_) => {
                task.abort();
                Err(Error::Timeout { operation: "tool execution", after: self.timeout })
            }
        };

        let output = match outcome {
            Ok(value) => serde_json::to_string(&value).unwrap_or_else(|err| error_output(&err.into())),
            Err(err) => {
                tracing::warn!("Tool {name} failed for call {call_id}: {err}");
                error_output(&err)
            }
        };
        self.respond(&call_id, output).await;
    }

    /// Answer a call that cannot be executed.
    pub async fn reject(&self, call_id: &str, err: &Error) {
        tracing::warn!("Rejecting call {call_id}: {err}");
        self.respond(call_id, error_output(err)).await;
    }

    async fn respond(&self, call_id: &str, output: String) {
        if let Err(err) = self.sender.send(ClientEvent::function_result(call_id, output)).await {
            tracing::warn!("Failed to deliver result for call {call_id}: {err}");
            return;
        }
        if let Err(err) = self.sender.send(ClientEvent::continue_generation()).await {
            tracing::warn!("Failed to resume generation after call {call_id}: {err}");
        }
    }
}

fn error_output(err: &Error) -> String {
    json!({ "error": err.to_string() }).to_string()
}
