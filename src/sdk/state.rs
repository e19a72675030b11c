//! Externally observable recording state and its single mutation path.

use crate::Error;
use crate::error::{CREDENTIAL_ISSUANCE, QuotaUsage};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FaultKind {
    QuotaExceeded {
        current: u32,
        limit: u32,
        upgrade_required: bool,
    },
    Authorization,
    /// The credential service did not answer in time.
    CredentialIssuance,
    Negotiation,
    Transport,
}

/// A user-visible failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionFault {
    #[serde(flatten)]
    pub kind: FaultKind,
    pub message: String,
}

impl SessionFault {
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self { kind: FaultKind::Transport, message: message.into() }
    }
}

impl From<&Error> for SessionFault {
    fn from(err: &Error) -> Self {
        let kind = match err {
            Error::QuotaExceeded(QuotaUsage { current, limit, upgrade_required }) => FaultKind::QuotaExceeded {
                current: *current,
                limit: *limit,
                upgrade_required: *upgrade_required,
            },
            Error::AuthFailure(_) | Error::CredentialExpired => FaultKind::Authorization,
            Error::Timeout { operation: CREDENTIAL_ISSUANCE, .. } => FaultKind::CredentialIssuance,
            Error::Negotiation(_) | Error::Timeout { .. } | Error::Media(_) => FaultKind::Negotiation,
            _ => FaultKind::Transport,
        };
        Self { kind, message: err.to_string() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecordingState {
    pub is_connected: bool,
    pub is_recording: bool,
    pub is_muted: bool,
    pub is_playing: bool,
    pub is_connecting: bool,
    pub error: Option<SessionFault>,
}

/// Everything that may change `RecordingState`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateAction {
    ConnectStarted,
    Connected,
    ConnectFailed(SessionFault),
    /// The established link dropped; `Some` when it failed rather than closed.
    LinkLost(Option<SessionFault>),
    MuteChanged(bool),
    VoiceActivity(bool),
    PlaybackChanged(bool),
    Reset,
}

impl RecordingState {
    /// Pure reducer. Voice activity and playback can only turn on while the
    /// session is connected, and voice activity never while muted.
    #[must_use]
    pub fn reduce(&self, action: StateAction) -> Self {
        let mut next = self.clone();
        match action {
            StateAction::ConnectStarted => {
                next.is_connecting = true;
                next.is_connected = false;
                next.is_recording = false;
                next.is_playing = false;
                next.error = None;
            }
            StateAction::Connected => {
                next.is_connecting = false;
                next.is_connected = true;
                next.error = None;
            }
            StateAction::ConnectFailed(fault) => {
                next.is_connecting = false;
                next.is_connected = false;
                next.is_recording = false;
                next.is_playing = false;
                next.error = Some(fault);
            }
            StateAction::LinkLost(fault) => {
                next.is_connecting = false;
                next.is_connected = false;
                next.is_recording = false;
                next.is_playing = false;
                if fault.is_some() {
                    next.error = fault;
                }
            }
            StateAction::MuteChanged(muted) => {
                next.is_muted = muted;
                if muted {
                    next.is_recording = false;
                }
            }
            StateAction::VoiceActivity(active) => {
                next.is_recording = active && next.is_connected && !next.is_muted;
            }
            StateAction::PlaybackChanged(playing) => {
                next.is_playing = playing && next.is_connected;
            }
            StateAction::Reset => next = Self::default(),
        }
        next
    }
}

struct StoreInner {
    state: RecordingState,
    subscribers: Vec<mpsc::UnboundedSender<RecordingState>>,
}

/// Mutex-guarded reducer with a subscriber list. `apply` is the only way to
/// change the state; subscribers see every distinct state in order.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner {
                state: RecordingState::default(),
                subscribers: Vec::new(),
            })),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> RecordingState {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).state.clone()
    }

    /// Apply an action and notify subscribers if the state changed.
    /// Returns the resulting state.
    pub fn apply(&self, action: StateAction) -> RecordingState {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let next = inner.state.reduce(action);
        if next != inner.state {
            tracing::trace!(?next, "Recording state changed");
            inner.state = next.clone();
            inner.subscribers.retain(|tx| tx.send(next.clone()).is_ok());
        }
        next
    }

    /// Subscribe to state changes. The current state is delivered first.
    #[must_use]
    pub fn subscribe(&self) -> StateStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if tx.send(inner.state.clone()).is_ok() {
            inner.subscribers.push(tx);
        }
        StateStream { rx }
    }
}

/// Push subscription to `RecordingState` changes.
pub struct StateStream {
    rx: mpsc::UnboundedReceiver<RecordingState>,
}

impl StateStream {
    pub async fn next_state(&mut self) -> Option<RecordingState> {
        self.rx.recv().await
    }
}

impl Stream for StateStream {
    type Item = RecordingState;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        this.rx.poll_recv(cx)
    }
}
