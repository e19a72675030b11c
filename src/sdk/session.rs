use super::backend::{ConversationContext, CredentialBroker, Signaling, SummaryStore, ToolExecutor};
use super::channel::{ProtocolHandler, session_update};
use super::dispatch::{ChannelSender, Dispatcher};
use super::monitor::{MonitorHandle, spawn_monitor};
use super::state::{RecordingState, SessionFault, StateAction, StateStore, StateStream};
use super::tools::ToolCatalog;
use super::transcript::{SessionSummaryRequest, Transcript};
use crate::config::EngineConfig;
use crate::transport::media::{
    ChannelEvent, LinkState, MediaBackend, MediaSession, NegotiatedLink, PeerEvent,
};
use crate::error::CREDENTIAL_ISSUANCE;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// The external services a session talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub credentials: Arc<dyn CredentialBroker>,
    pub signaling: Arc<dyn Signaling>,
    pub tools: Arc<dyn ToolExecutor>,
    pub summaries: Arc<dyn SummaryStore>,
    pub media: Arc<dyn MediaBackend>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Connecting,
    Connected,
    Ended,
}

/// Everything owned by one established session.
struct LiveSession {
    media: MediaSession,
    event_loop: JoinHandle<()>,
    monitor: Option<MonitorHandle>,
}

impl LiveSession {
    async fn release(mut self) {
        self.media.release().await;
        if let Some(monitor) = self.monitor.take() {
            monitor.stop();
        }
        self.event_loop.abort();
    }
}

struct Lifecycle {
    phase: Phase,
    live: Option<LiveSession>,
    session_id: Option<String>,
    started_at: Option<DateTime<Utc>>,
    transcript: Arc<Mutex<Transcript>>,
    summary_sent: bool,
}

struct Shared {
    config: EngineConfig,
    collaborators: Collaborators,
    catalog: ToolCatalog,
    context: ConversationContext,
    state: StateStore,
    generation: watch::Sender<u64>,
    lifecycle: Mutex<Lifecycle>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_generation(&self) -> u64 {
        *self.generation.borrow()
    }

    fn next_generation(&self) -> u64 {
        let mut next = 0;
        self.generation.send_modify(|generation| {
            *generation += 1;
            next = *generation;
        });
        next
    }

    /// Context sent with the credential request, with the history trimmed to
    /// the configured excerpt.
    fn credential_context(&self) -> ConversationContext {
        self.context.excerpt(self.config.transcript_excerpt_len)
    }

    /// Detach the live session and claim the one-shot summary, if any.
    fn take_for_teardown(&self, lifecycle: &mut Lifecycle) -> (Option<LiveSession>, Option<SessionSummaryRequest>) {
        let summary = if lifecycle.summary_sent {
            None
        } else {
            lifecycle.summary_sent = true;
            let transcript = lifecycle.transcript.lock().unwrap_or_else(PoisonError::into_inner);
            SessionSummaryRequest::from_transcript(
                &self.context.user_id,
                &self.context.conversation_id,
                &transcript,
                lifecycle.started_at.unwrap_or_else(Utc::now),
                Utc::now(),
            )
        };
        (lifecycle.live.take(), summary)
    }

    fn spawn_summary(&self, request: SessionSummaryRequest) {
        let store = Arc::clone(&self.collaborators.summaries);
        let entries = request.transcript.len();
        let conversation_id = request.conversation_id.clone();
        tokio::spawn(async move {
            match store.store_session_summary(request).await {
                Ok(()) => tracing::info!("Stored summary for {conversation_id} ({entries} entries)"),
                Err(err) => tracing::warn!("Failed to store summary for {conversation_id}: {err}"),
            }
        });
    }
}

/// A voice conversation. Cheap to clone; every clone drives the same session.
#[derive(Clone)]
pub struct VoiceSession {
    shared: Arc<Shared>,
}

impl VoiceSession {
    pub(crate) fn new(
        config: EngineConfig,
        collaborators: Collaborators,
        catalog: ToolCatalog,
        context: ConversationContext,
    ) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                config,
                collaborators,
                catalog,
                context,
                state: StateStore::new(),
                generation,
                lifecycle: Mutex::new(Lifecycle {
                    phase: Phase::Idle,
                    live: None,
                    session_id: None,
                    started_at: None,
                    transcript: Arc::new(Mutex::new(Transcript::new())),
                    summary_sent: false,
                }),
            }),
        }
    }

    #[must_use]
    pub fn state(&self) -> RecordingState {
        self.shared.state.snapshot()
    }

    /// Push subscription to recording state; the current state arrives first.
    #[must_use]
    pub fn subscribe(&self) -> StateStream {
        self.shared.state.subscribe()
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.shared.lock().phase
    }

    /// Remote session id of the current or most recent session.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.shared.lock().session_id.clone()
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Snapshot of what has been said in the current or most recent session.
    #[must_use]
    pub fn transcript(&self) -> Transcript {
        let transcript = Arc::clone(&self.shared.lock().transcript);
        let guard = transcript.lock().unwrap_or_else(PoisonError::into_inner);
        guard.clone()
    }

    /// Start a session: issue a credential, negotiate media, open the control
    /// channel. Does nothing while a session is already connecting or
    /// connected.
    ///
    /// # Errors
    /// `QuotaExceeded` / `AuthFailure` from credential issuance (no media is
    /// touched), `CredentialExpired`, negotiation failures and timeouts, or
    /// `Superseded` when `disconnect()` ran before the attempt finished.
    /// Every error except `Superseded` is also recorded in the state.
    pub async fn connect(&self) -> Result<()> {
        let shared = &self.shared;
        let (generation, stale) = {
            let mut lifecycle = shared.lock();
            if matches!(lifecycle.phase, Phase::Connecting | Phase::Connected) {
                tracing::debug!("connect() ignored while {:?}", lifecycle.phase);
                return Ok(());
            }
            let stale = shared.take_for_teardown(&mut lifecycle);
            let generation = shared.next_generation();
            lifecycle.phase = Phase::Connecting;
            lifecycle.session_id = None;
            lifecycle.started_at = None;
            lifecycle.transcript = Arc::new(Mutex::new(Transcript::new()));
            lifecycle.summary_sent = false;
            shared.state.apply(StateAction::ConnectStarted);
            (generation, stale)
        };

        let (stale_live, stale_summary) = stale;
        if let Some(request) = stale_summary {
            shared.spawn_summary(request);
        }
        if let Some(live) = stale_live {
            live.release().await;
        }

        match self.establish(generation).await {
            Ok(()) => Ok(()),
            Err(Error::Superseded) => {
                tracing::debug!("Connect attempt {generation} superseded");
                Err(Error::Superseded)
            }
            Err(err) => {
                let mut lifecycle = shared.lock();
                if shared.current_generation() == generation {
                    lifecycle.phase = Phase::Ended;
                    shared.state.apply(StateAction::ConnectFailed(err.fault()));
                }
                drop(lifecycle);
                tracing::warn!("Voice session failed to connect: {err}");
                Err(err)
            }
        }
    }

    async fn establish(&self, generation: u64) -> Result<()> {
        let shared = &self.shared;
        let config = &shared.config;
        let collaborators = &shared.collaborators;

        let context = shared.credential_context();
        let credential = self
            .until_superseded(
                generation,
                bounded(
                    CREDENTIAL_ISSUANCE,
                    config.credential_timeout(),
                    collaborators.credentials.issue_session_credential(&context),
                ),
            )
            .await??;

        let negotiation_timeout = config.negotiation_timeout();
        let deadline = match credential.remaining(Utc::now()) {
            Some(left) if left.is_zero() => return Err(Error::CredentialExpired),
            Some(left) => left.min(negotiation_timeout),
            None => negotiation_timeout,
        };

        let mut media = MediaSession::new(Arc::clone(&collaborators.media));
        let negotiated = self
            .until_superseded(
                generation,
                media.negotiate(collaborators.signaling.as_ref(), &credential.value, &config.audio, deadline),
            )
            .await;
        let link = match negotiated {
            Ok(Ok(link)) => link,
            Ok(Err(err)) => return Err(err),
            Err(superseded) => {
                media.release().await;
                return Err(superseded);
            }
        };
        let Some(channel) = media.control_channel() else {
            media.release().await;
            return Err(Error::Negotiation("control channel missing after negotiation".to_string()));
        };

        let update = match session_update(config, &shared.catalog) {
            Ok(update) => update,
            Err(err) => {
                media.release().await;
                return Err(err);
            }
        };

        let installed = {
            let mut lifecycle = shared.lock();
            if shared.current_generation() == generation {
                let sender = ChannelSender::new(channel, generation, shared.generation.subscribe());
                let dispatcher =
                    Dispatcher::new(Arc::clone(&collaborators.tools), sender.clone(), config.tool_timeout());
                let handler = ProtocolHandler::new(
                    sender,
                    shared.catalog.clone(),
                    update,
                    dispatcher,
                    shared.state.clone(),
                    Arc::clone(&lifecycle.transcript),
                );
                let event_loop = tokio::spawn(run_event_loop(
                    Arc::downgrade(shared),
                    generation,
                    handler,
                    link,
                    Arc::clone(&collaborators.media),
                ));

                shared.state.apply(StateAction::Connected);
                media.set_input_enabled(!shared.state.snapshot().is_muted);
                let monitor = media
                    .track()
                    .map(|track| spawn_monitor(track.analyser(), shared.state.clone(), config.vad));

                lifecycle.phase = Phase::Connected;
                lifecycle.session_id = Some(credential.session_id.clone());
                lifecycle.started_at = Some(Utc::now());
                lifecycle.live = Some(LiveSession { media, event_loop, monitor });
                Ok(())
            } else {
                Err(media)
            }
        };
        if let Err(mut media) = installed {
            media.release().await;
            return Err(Error::Superseded);
        }

        tracing::info!("Voice session {} connected", credential.session_id);
        Ok(())
    }

    /// Await `fut` unless the session generation moves on first.
    async fn until_superseded<F: Future>(&self, generation: u64, fut: F) -> Result<F::Output> {
        let mut current = self.shared.generation.subscribe();
        tokio::select! {
            output = fut => Ok(output),
            () = superseded(&mut current, generation) => Err(Error::Superseded),
        }
    }

    /// Tear the session down. Safe to call in any phase and more than once;
    /// the end-of-session summary is handed off at most once per session and
    /// never awaited. Every cleanup step runs even if an earlier one fails.
    pub async fn disconnect(&self) {
        let shared = &self.shared;
        let (generation, (live, summary)) = {
            let mut lifecycle = shared.lock();
            let generation = shared.next_generation();
            if lifecycle.phase != Phase::Idle {
                lifecycle.phase = Phase::Ended;
            }
            (generation, shared.take_for_teardown(&mut lifecycle))
        };

        if let Some(request) = summary {
            shared.spawn_summary(request);
        }
        if let Some(live) = live {
            live.release().await;
        }
        if shared.current_generation() == generation {
            shared.state.apply(StateAction::Reset);
        }
        tracing::info!("Voice session disconnected");
    }

    /// Mute or unmute the microphone.
    pub fn set_muted(&self, muted: bool) {
        let lifecycle = self.shared.lock();
        if let Some(live) = &lifecycle.live {
            live.media.set_input_enabled(!muted);
        }
        self.shared.state.apply(StateAction::MuteChanged(muted));
    }
}

async fn bounded<T>(operation: &'static str, after: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(after, fut)
        .await
        .map_err(|_| Error::Timeout { operation, after })?
}

async fn superseded(current: &mut watch::Receiver<u64>, generation: u64) {
    let closed = current.wait_for(|value| *value != generation).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

async fn run_event_loop(
    shared: Weak<Shared>,
    generation: u64,
    mut handler: ProtocolHandler,
    link: NegotiatedLink,
    media: Arc<dyn MediaBackend>,
) {
    let NegotiatedLink { mut control_events, mut peer_events } = link;
    let mut control_open = true;

    loop {
        tokio::select! {
            event = control_events.recv(), if control_open => match event {
                Some(ChannelEvent::Open) => {
                    if let Err(err) = handler.on_open().await {
                        tracing::warn!("Failed to configure remote session: {err}");
                    }
                }
                Some(ChannelEvent::Message(text)) => handler.on_message(&text).await,
                Some(ChannelEvent::Closed) | None => {
                    tracing::debug!("Control channel closed");
                    control_open = false;
                }
            },
            event = peer_events.recv() => match event {
                Some(PeerEvent::StateChanged(state @ (LinkState::Disconnected | LinkState::Failed | LinkState::Closed))) => {
                    link_lost(&shared, generation, state);
                    break;
                }
                Some(PeerEvent::StateChanged(state)) => tracing::debug!("Link state: {state:?}"),
                Some(PeerEvent::RemoteTrack(remote)) => {
                    let id = remote.id.clone();
                    if let Err(err) = media.play(remote).await {
                        tracing::warn!("Failed to attach remote audio track {id}: {err}");
                    }
                }
                None => {
                    link_lost(&shared, generation, LinkState::Closed);
                    break;
                }
            },
        }
    }

    let dropped = handler.shutdown();
    if dropped > 0 {
        tracing::debug!("Discarded {dropped} incomplete function calls");
    }
}

fn link_lost(shared: &Weak<Shared>, generation: u64, state: LinkState) {
    let Some(shared) = shared.upgrade() else {
        return;
    };
    let mut lifecycle = shared.lock();
    if shared.current_generation() != generation {
        return;
    }
    if let Some(live) = lifecycle.live.as_mut() {
        live.media.mark_lost(state);
    }
    lifecycle.phase = Phase::Ended;
    let fault = (state == LinkState::Failed).then(|| SessionFault::transport("media link failed"));
    shared.state.apply(StateAction::LinkLost(fault));
    drop(lifecycle);
    tracing::warn!("Voice session link lost ({state:?})");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QuotaUsage;
    use crate::sdk::backend::testing::{
        BrokerBehavior, FakeBroker, FakeExecutor, RecordingSummaries, ToolBehavior, credential,
    };
    use crate::sdk::state::FaultKind;
    use crate::transport::media::testing::{EchoSignaling, FakeBackend, FakeRig};
    use crate::transport::media::AudioFrame;
    use futures::StreamExt;
    use serde_json::Value;
    use std::sync::atomic::Ordering;
    use tokio::sync::mpsc;

    struct Harness {
        session: VoiceSession,
        rig: FakeRig,
        backend: Arc<FakeBackend>,
        broker: Arc<FakeBroker>,
        executor: Arc<FakeExecutor>,
        summaries: mpsc::UnboundedReceiver<SessionSummaryRequest>,
    }

    fn build(broker: Arc<FakeBroker>, auto_connect: bool, tool: ToolBehavior) -> Harness {
        let (backend, rig) = FakeBackend::new(auto_connect);
        let executor = FakeExecutor::new(tool);
        let (store, summaries) = RecordingSummaries::new();
        let collaborators = Collaborators {
            credentials: broker.clone(),
            signaling: Arc::new(EchoSignaling::new()),
            tools: executor.clone(),
            summaries: store,
            media: backend.clone(),
        };
        let context = ConversationContext {
            conversation_id: "conv_1".to_string(),
            user_id: "user_1".to_string(),
            ..ConversationContext::default()
        };
        let session = VoiceSession::new(
            EngineConfig::default(),
            collaborators,
            ToolCatalog::memory_defaults(),
            context,
        );
        Harness { session, rig, backend, broker, executor, summaries }
    }

    fn harness_with(broker: Arc<FakeBroker>, auto_connect: bool) -> Harness {
        build(broker, auto_connect, ToolBehavior::Echo)
    }

    fn harness() -> Harness {
        harness_with(FakeBroker::issuing(None), true)
    }

    async fn next_sent(rx: &mut mpsc::UnboundedReceiver<String>) -> Value {
        let text = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        serde_json::from_str(&text).unwrap()
    }

    async fn say(rig: &FakeRig, json: &str) {
        rig.channel_tx.send(ChannelEvent::Message(json.to_string())).await.unwrap();
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn connect_configures_session_on_channel_open() {
        let mut h = harness();
        h.session.connect().await.unwrap();

        let state = h.session.state();
        assert!(state.is_connected);
        assert!(!state.is_connecting);
        assert_eq!(h.session.phase(), Phase::Connected);
        assert_eq!(h.session.session_id().as_deref(), Some("sess_test"));

        h.rig.channel_tx.send(ChannelEvent::Open).await.unwrap();
        assert_eq!(next_sent(&mut h.rig.outgoing_rx).await["type"], "session.update");
        assert_eq!(next_sent(&mut h.rig.outgoing_rx).await["type"], "response.create");
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let h = harness();
        h.session.connect().await.unwrap();
        h.session.connect().await.unwrap();
        assert_eq!(h.broker.calls(), 1);
        assert_eq!(h.backend.peers_created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn quota_exceeded_allocates_no_media() {
        let usage = QuotaUsage { current: 10, limit: 10, upgrade_required: true };
        let h = harness_with(FakeBroker::new(BrokerBehavior::Quota(usage)), true);

        let err = h.session.connect().await.unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded(QuotaUsage { current: 10, limit: 10, .. })));

        let state = h.session.state();
        assert!(!state.is_connected && !state.is_connecting);
        let fault = state.error.unwrap();
        assert_eq!(
            fault.kind,
            FaultKind::QuotaExceeded { current: 10, limit: 10, upgrade_required: true }
        );
        assert_eq!(h.backend.microphones_opened.load(Ordering::SeqCst), 0);
        assert_eq!(h.backend.peers_created.load(Ordering::SeqCst), 0);
        assert_eq!(h.rig.peer.offers.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn auth_failure_is_user_visible() {
        let h = harness_with(FakeBroker::new(BrokerBehavior::Deny), true);
        let err = h.session.connect().await.unwrap_err();
        assert!(err.is_user_visible());
        assert_eq!(h.session.state().error.unwrap().kind, FaultKind::Authorization);
        assert_eq!(h.session.phase(), Phase::Ended);
    }

    #[tokio::test]
    async fn expired_credential_fails_before_negotiation() {
        let h = harness_with(FakeBroker::issuing(Some(Utc::now().timestamp() - 5)), true);
        let err = h.session.connect().await.unwrap_err();
        assert!(matches!(err, Error::CredentialExpired));
        assert_eq!(h.backend.microphones_opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn negotiation_timeout_releases_track() {
        let h = harness_with(FakeBroker::issuing(None), false);
        let err = h.session.connect().await.unwrap_err();
        assert!(matches!(err, Error::Timeout { operation: "negotiation", .. }));
        assert!(h.rig.track.stopped.load(Ordering::SeqCst));
        assert_eq!(h.session.state().error.unwrap().kind, FaultKind::Negotiation);
    }

    #[tokio::test]
    async fn function_call_round_trip() {
        let mut h = harness();
        h.session.connect().await.unwrap();

        say(&h.rig, r#"{"type":"response.function_call_arguments.delta","call_id":"c1","delta":"{\"query\":"}"#).await;
        say(&h.rig, r#"{"type":"response.function_call_arguments.delta","call_id":"c1","delta":"\"hi\"}"}"#).await;
        say(&h.rig, r#"{"type":"response.function_call_arguments.done","call_id":"c1","name":"search_memory"}"#).await;

        let result = next_sent(&mut h.rig.outgoing_rx).await;
        assert_eq!(result["type"], "conversation.item.create");
        assert_eq!(result["item"]["type"], "function_call_output");
        assert_eq!(next_sent(&mut h.rig.outgoing_rx).await["type"], "response.create");
        assert_eq!(
            h.executor.calls(),
            vec![("search_memory".to_string(), serde_json::json!({ "query": "hi" }))]
        );
    }

    #[tokio::test]
    async fn disconnect_resets_state_and_releases_resources() {
        let h = harness();
        h.session.connect().await.unwrap();
        h.session.set_muted(true);
        assert!(!h.rig.track.enabled.load(Ordering::SeqCst));

        h.session.disconnect().await;

        let state = h.session.state();
        assert_eq!(state, RecordingState::default());
        assert!(h.rig.peer.closed.load(Ordering::SeqCst));
        assert!(h.rig.track.stopped.load(Ordering::SeqCst));
        assert!(!h.rig.peer.channel.open.load(Ordering::SeqCst));
        assert_eq!(h.session.phase(), Phase::Ended);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent_and_summarizes_once() {
        let mut h = harness();
        h.session.connect().await.unwrap();
        say(&h.rig, r#"{"type":"conversation.item.input_audio_transcription.completed","transcript":"remember I like tea"}"#).await;
        say(&h.rig, r#"{"type":"response.output_audio_transcript.done","transcript":"Noted, you like tea."}"#).await;
        settle().await;

        h.session.disconnect().await;
        h.session.disconnect().await;

        let request = tokio::time::timeout(Duration::from_secs(1), h.summaries.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.transcript.len(), 2);
        assert_eq!(request.user_id, "user_1");
        assert_eq!(request.conversation_id, "conv_1");
        assert!(request.started_at <= request.transcript[0].timestamp);
        assert!(request.transcript[0].timestamp <= request.transcript[1].timestamp);
        assert!(request.transcript[1].timestamp <= request.ended_at);

        settle().await;
        assert!(h.summaries.try_recv().is_err());
    }

    #[tokio::test]
    async fn single_entry_transcript_is_not_summarized() {
        let mut h = harness();
        h.session.connect().await.unwrap();
        say(&h.rig, r#"{"type":"conversation.item.input_audio_transcription.completed","transcript":"hello?"}"#).await;
        settle().await;

        h.session.disconnect().await;
        settle().await;
        assert!(h.summaries.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_during_credential_issuance_supersedes_connect() {
        let broker = FakeBroker::new(BrokerBehavior::Delay(Duration::from_secs(3600), credential(None)));
        let h = harness_with(broker, true);

        let session = h.session.clone();
        let connecting = tokio::spawn(async move { session.connect().await });
        settle().await;
        assert!(h.session.state().is_connecting);

        h.session.disconnect().await;
        let state = h.session.state();
        assert!(!state.is_connected && !state.is_recording && !state.is_playing && !state.is_connecting);

        let outcome = connecting.await.unwrap();
        assert!(matches!(outcome, Err(Error::Superseded)));
        assert_eq!(h.backend.microphones_opened.load(Ordering::SeqCst), 0);
        assert_eq!(h.session.state(), RecordingState::default());
    }

    #[tokio::test]
    async fn disconnect_mid_negotiation_releases_acquired_media() {
        let h = harness_with(FakeBroker::issuing(None), false);

        let session = h.session.clone();
        let connecting = tokio::spawn(async move { session.connect().await });
        settle().await;
        assert_eq!(h.backend.microphones_opened.load(Ordering::SeqCst), 1);

        h.session.disconnect().await;
        let outcome = connecting.await.unwrap();
        assert!(matches!(outcome, Err(Error::Superseded)));
        assert!(h.rig.track.stopped.load(Ordering::SeqCst));
        assert!(h.rig.peer.closed.load(Ordering::SeqCst));
        assert!(!h.session.state().is_connected);
    }

    #[tokio::test]
    async fn link_failure_surfaces_fault() {
        let h = harness();
        h.session.connect().await.unwrap();
        let mut states = h.session.subscribe();
        assert!(states.next().await.unwrap().is_connected);

        h.rig.peer_tx.send(PeerEvent::StateChanged(LinkState::Failed)).await.unwrap();
        let lost = tokio::time::timeout(Duration::from_secs(1), states.next())
            .await
            .unwrap()
            .unwrap();
        assert!(!lost.is_connected);
        assert_eq!(lost.error.unwrap().kind, FaultKind::Transport);
        assert_eq!(h.session.phase(), Phase::Ended);

        h.session.disconnect().await;
        assert!(h.rig.track.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn voice_activity_drives_recording() {
        let h = harness();
        h.session.connect().await.unwrap();

        for _ in 0..5 {
            h.rig.frames_tx.send(AudioFrame::new(vec![0.4; 480])).await.unwrap();
        }
        settle().await;
        assert!(h.session.state().is_recording);

        h.session.set_muted(true);
        assert!(!h.session.state().is_recording);
        for _ in 0..5 {
            h.rig.frames_tx.send(AudioFrame::new(vec![0.4; 480])).await.unwrap();
        }
        settle().await;
        assert!(!h.session.state().is_recording);
    }

    #[tokio::test(start_paused = true)]
    async fn late_tool_result_after_disconnect_sends_nothing() {
        let mut h = build(FakeBroker::issuing(None), true, ToolBehavior::Slow(Duration::from_secs(2)));
        h.session.connect().await.unwrap();

        say(&h.rig, r#"{"type":"response.function_call_arguments.delta","call_id":"c1","delta":"{}"}"#).await;
        say(&h.rig, r#"{"type":"response.function_call_arguments.done","call_id":"c1","name":"save_memory"}"#).await;
        settle().await;
        assert_eq!(h.executor.calls().len(), 1);

        h.session.disconnect().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(h.rig.outgoing_rx.try_recv().is_err());
    }
}
