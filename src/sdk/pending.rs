//! Argument reassembly for in-flight function calls.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    /// Fragments are still arriving.
    Streaming,
    /// The completion event arrived and the call was handed off.
    Dispatched,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFunctionCall {
    pub call_id: String,
    pub name: Option<String>,
    pub buffer: String,
    pub status: CallStatus,
}

impl PendingFunctionCall {
    fn new(call_id: &str) -> Self {
        Self {
            call_id: call_id.to_string(),
            name: None,
            buffer: String::new(),
            status: CallStatus::Streaming,
        }
    }
}

/// Calls keyed by call id. Owned by the session event loop, so no locking.
#[derive(Debug, Default)]
pub struct PendingCalls {
    calls: HashMap<String, PendingFunctionCall>,
}

impl PendingCalls {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the function name announced ahead of the argument stream.
    pub fn begin(&mut self, call_id: &str, name: &str) {
        let call = self
            .calls
            .entry(call_id.to_string())
            .or_insert_with(|| PendingFunctionCall::new(call_id));
        call.name = Some(name.to_string());
    }

    /// Append a fragment, creating the entry on first sight.
    pub fn append(&mut self, call_id: &str, delta: &str) {
        self.calls
            .entry(call_id.to_string())
            .or_insert_with(|| PendingFunctionCall::new(call_id))
            .buffer
            .push_str(delta);
    }

    /// Remove and return the call so it can be dispatched.
    pub fn take(&mut self, call_id: &str) -> Option<PendingFunctionCall> {
        let mut call = self.calls.remove(call_id)?;
        call.status = CallStatus::Dispatched;
        Some(call)
    }

    #[must_use]
    pub fn get(&self, call_id: &str) -> Option<&PendingFunctionCall> {
        self.calls.get(call_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Drop every partial call; returns how many were discarded.
    pub fn clear(&mut self) -> usize {
        let dropped = self.calls.len();
        self.calls.clear();
        dropped
    }
}
