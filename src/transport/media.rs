//! Media transport: the host's peer-connection stack behind traits, plus the
//! `MediaSession` state machine that drives one negotiation over it.

use crate::config::AudioConstraints;
use crate::sdk::Signaling;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Label of the reliable, ordered data channel carrying protocol events.
pub const CONTROL_CHANNEL_LABEL: &str = "oai-events";

/// One block of normalized (`-1.0..=1.0`) mono samples from a track.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
}

impl AudioFrame {
    #[must_use]
    pub const fn new(samples: Vec<f32>) -> Self {
        Self { samples }
    }

    /// Root-mean-square level of the frame; zero for an empty frame.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let energy: f32 = self.samples.iter().map(|s| s * s).sum();
        (energy / self.samples.len() as f32).sqrt()
    }
}

/// Local capture track.
pub trait AudioTrack: Send + Sync {
    fn id(&self) -> &str;

    /// Level-metering tap: every captured frame is delivered to the returned receiver.
    fn analyser(&self) -> mpsc::Receiver<AudioFrame>;

    /// Enable or silence outbound audio without releasing the device.
    fn set_enabled(&self, enabled: bool);

    /// Release the capture device.
    ///
    /// # Errors
    /// Returns an error if the platform refuses to stop the track.
    #[allow(clippy::result_large_err)]
    fn stop(&self) -> Result<()>;
}

/// Incoming audio announced by the peer connection.
#[derive(Debug)]
pub struct RemoteAudioTrack {
    pub id: String,
    pub frames: mpsc::Receiver<AudioFrame>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug)]
pub enum PeerEvent {
    StateChanged(LinkState),
    RemoteTrack(RemoteAudioTrack),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Open,
    Message(String),
    Closed,
}

#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> &str;

    fn is_open(&self) -> bool;

    async fn send_text(&self, text: String) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// A data channel together with the receiver of its events.
pub struct ChannelHandle {
    pub channel: Arc<dyn DataChannel>,
    pub events: mpsc::Receiver<ChannelEvent>,
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn add_track(&self, track: Arc<dyn AudioTrack>) -> Result<()>;

    async fn create_data_channel(&self, label: &str) -> Result<ChannelHandle>;

    /// Create the local offer and install it as the local description.
    async fn create_offer(&self) -> Result<String>;

    async fn set_remote_description(&self, answer: String) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// A peer connection together with the receiver of its events.
pub struct PeerHandle {
    pub connection: Arc<dyn PeerConnection>,
    pub events: mpsc::Receiver<PeerEvent>,
}

/// Platform media stack supplied by the host (device capture, peer
/// connections, playback).
#[async_trait]
pub trait MediaBackend: Send + Sync {
    async fn open_microphone(&self, constraints: &AudioConstraints) -> Result<Arc<dyn AudioTrack>>;

    async fn create_peer(&self) -> Result<PeerHandle>;

    async fn play(&self, track: RemoteAudioTrack) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Idle,
    Negotiating,
    Connected,
    Disconnected,
    Failed,
}

impl TransportState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }
}

/// What a successful negotiation hands to the session event loop.
pub struct NegotiatedLink {
    pub control_events: mpsc::Receiver<ChannelEvent>,
    pub peer_events: mpsc::Receiver<PeerEvent>,
}

/// Owns the track, peer connection and control channel of one session.
pub struct MediaSession {
    backend: Arc<dyn MediaBackend>,
    state: TransportState,
    track: Option<Arc<dyn AudioTrack>>,
    peer: Option<Arc<dyn PeerConnection>>,
    channel: Option<Arc<dyn DataChannel>>,
}

impl MediaSession {
    #[must_use]
    pub fn new(backend: Arc<dyn MediaBackend>) -> Self {
        Self {
            backend,
            state: TransportState::Idle,
            track: None,
            peer: None,
            channel: None,
        }
    }

    #[must_use]
    pub const fn state(&self) -> TransportState {
        self.state
    }

    #[must_use]
    pub fn track(&self) -> Option<Arc<dyn AudioTrack>> {
        self.track.clone()
    }

    #[must_use]
    pub fn control_channel(&self) -> Option<Arc<dyn DataChannel>> {
        self.channel.clone()
    }

    /// Run the full offer/answer exchange and wait for the link to come up.
    ///
    /// Only one negotiation may run per session: a second call fails without
    /// touching the existing resources. On any failure the partially acquired
    /// resources are released and the session ends in `Failed`.
    ///
    /// # Errors
    /// Returns an error if capture, offer creation, signaling or link
    /// establishment fails, or if `deadline` elapses first.
    pub async fn negotiate(
        &mut self,
        signaling: &dyn Signaling,
        credential: &str,
        constraints: &AudioConstraints,
        deadline: Duration,
    ) -> Result<NegotiatedLink> {
        if self.state != TransportState::Idle {
            return Err(Error::Negotiation(format!(
                "negotiation already attempted (state {:?})",
                self.state
            )));
        }
        self.state = TransportState::Negotiating;

        let outcome = tokio::time::timeout(deadline, self.run_negotiation(signaling, credential, constraints)).await;
        let result = match outcome {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout { operation: "negotiation", after: deadline }),
        };

        match result {
            Ok(link) => {
                self.state = TransportState::Connected;
                tracing::info!("Media transport connected");
                Ok(link)
            }
            Err(err) => {
                tracing::warn!("Media negotiation failed: {err}");
                self.release().await;
                self.state = TransportState::Failed;
                Err(err)
            }
        }
    }

    async fn run_negotiation(
        &mut self,
        signaling: &dyn Signaling,
        credential: &str,
        constraints: &AudioConstraints,
    ) -> Result<NegotiatedLink> {
        let track = self.backend.open_microphone(constraints).await?;
        self.track = Some(Arc::clone(&track));

        let PeerHandle { connection, events: mut peer_events } = self.backend.create_peer().await?;
        self.peer = Some(Arc::clone(&connection));

        connection.add_track(track).await?;
        let ChannelHandle { channel, events: control_events } =
            connection.create_data_channel(CONTROL_CHANNEL_LABEL).await?;
        self.channel = Some(channel);

        let offer = connection.create_offer().await?;
        let answer = signaling.negotiate(offer, credential).await?;
        connection.set_remote_description(answer).await?;

        loop {
            match peer_events.recv().await {
                Some(PeerEvent::StateChanged(LinkState::Connected)) => break,
                Some(PeerEvent::StateChanged(state @ (LinkState::Failed | LinkState::Closed | LinkState::Disconnected))) => {
                    return Err(Error::Negotiation(format!("link entered {state:?} before connecting")));
                }
                Some(PeerEvent::StateChanged(state)) => {
                    tracing::debug!("Link state while negotiating: {state:?}");
                }
                Some(PeerEvent::RemoteTrack(remote)) => self.attach_remote(remote).await,
                None => return Err(Error::ConnectionClosed),
            }
        }

        Ok(NegotiatedLink { control_events, peer_events })
    }

    /// Route incoming remote audio to local playback. Playback failure is
    /// logged; the conversation continues without it.
    pub async fn attach_remote(&self, remote: RemoteAudioTrack) {
        let id = remote.id.clone();
        match self.backend.play(remote).await {
            Ok(()) => tracing::debug!("Remote audio track {id} attached to playback"),
            Err(err) => tracing::warn!("Failed to attach remote audio track {id}: {err}"),
        }
    }

    /// Record that the established link went away.
    pub fn mark_lost(&mut self, state: LinkState) {
        if self.state.is_terminal() {
            return;
        }
        self.state = if state == LinkState::Failed {
            TransportState::Failed
        } else {
            TransportState::Disconnected
        };
    }

    /// Mute or unmute outbound audio.
    pub fn set_input_enabled(&self, enabled: bool) {
        if let Some(track) = &self.track {
            track.set_enabled(enabled);
        }
    }

    /// # Errors
    /// Returns an error if the data channel refuses to close.
    pub async fn close_control_channel(&mut self) -> Result<()> {
        match self.channel.take() {
            Some(channel) => channel.close().await,
            None => Ok(()),
        }
    }

    /// # Errors
    /// Returns an error if the peer connection refuses to close.
    pub async fn close_peer(&mut self) -> Result<()> {
        if !self.state.is_terminal() {
            self.state = TransportState::Disconnected;
        }
        match self.peer.take() {
            Some(peer) => peer.close().await,
            None => Ok(()),
        }
    }

    /// # Errors
    /// Returns an error if the capture track refuses to stop.
    #[allow(clippy::result_large_err)]
    pub fn stop_tracks(&mut self) -> Result<()> {
        match self.track.take() {
            Some(track) => track.stop(),
            None => Ok(()),
        }
    }

    /// Best-effort release of everything acquired so far; failures are logged.
    pub async fn release(&mut self) {
        if let Err(err) = self.close_control_channel().await {
            tracing::warn!("Failed to close control channel: {err}");
        }
        if let Err(err) = self.close_peer().await {
            tracing::warn!("Failed to close peer connection: {err}");
        }
        if let Err(err) = self.stop_tracks() {
            tracing::warn!("Failed to stop local track: {err}");
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn rms_of_constant_signal() {
        let frame = AudioFrame::new(vec![0.5; 32]);
        assert!((frame.rms() - 0.5).abs() < 1e-6);
        assert!(AudioFrame::new(Vec::new()).rms().abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn negotiation_applies_answer_and_connects() {
        let (backend, rig) = FakeBackend::new(true);
        let signaling = EchoSignaling::new();
        let mut media = MediaSession::new(backend.clone());

        let link = media
            .negotiate(&signaling, "ek_1", &AudioConstraints::default(), Duration::from_secs(1))
            .await
            .unwrap();
        drop(link);

        assert_eq!(media.state(), TransportState::Connected);
        assert_eq!(
            rig.peer.remote_sdp.lock().unwrap().as_deref(),
            Some("answer-for[v=0 offer] via ek_1")
        );
        assert!(media.control_channel().is_some());
    }

    #[tokio::test]
    async fn second_negotiation_is_rejected() {
        let (backend, rig) = FakeBackend::new(true);
        let signaling = EchoSignaling::new();
        let mut media = MediaSession::new(backend);

        let _link = media
            .negotiate(&signaling, "ek_1", &AudioConstraints::default(), Duration::from_secs(1))
            .await
            .unwrap();
        let err = media
            .negotiate(&signaling, "ek_1", &AudioConstraints::default(), Duration::from_secs(1))
            .await;

        assert!(matches!(err, Err(Error::Negotiation(_))));
        assert_eq!(signaling.calls.load(Ordering::SeqCst), 1);
        assert_eq!(rig.peer.offers.load(Ordering::SeqCst), 1);
        assert_eq!(media.state(), TransportState::Connected);
    }

    #[tokio::test]
    async fn negotiation_timeout_releases_resources() {
        let (backend, rig) = FakeBackend::new(false);
        let signaling = EchoSignaling::new();
        let mut media = MediaSession::new(backend);

        let err = media
            .negotiate(&signaling, "ek_1", &AudioConstraints::default(), Duration::from_millis(50))
            .await;

        assert!(matches!(err, Err(Error::Timeout { operation: "negotiation", .. })));
        assert_eq!(media.state(), TransportState::Failed);
        assert!(rig.track.stopped.load(Ordering::SeqCst));
        assert!(rig.peer.closed.load(Ordering::SeqCst));
        assert!(media.track().is_none());
    }

    #[tokio::test]
    async fn link_failure_during_negotiation_is_terminal() {
        let (backend, rig) = FakeBackend::new(false);
        let signaling = EchoSignaling::new();
        let mut media = MediaSession::new(backend);
        rig.peer_tx.send(PeerEvent::StateChanged(LinkState::Failed)).await.unwrap();

        let err = media
            .negotiate(&signaling, "ek_1", &AudioConstraints::default(), Duration::from_secs(1))
            .await;

        assert!(matches!(err, Err(Error::Negotiation(_))));
        assert_eq!(media.state(), TransportState::Failed);
    }

    #[tokio::test]
    async fn remote_track_before_connect_is_played() {
        let (backend, rig) = FakeBackend::new(true);
        let signaling = EchoSignaling::new();
        let mut media = MediaSession::new(backend.clone());
        let (_frames_tx, frames) = mpsc::channel(1);
        rig.peer_tx
            .send(PeerEvent::RemoteTrack(RemoteAudioTrack { id: "remote-0".to_string(), frames }))
            .await
            .unwrap();

        media
            .negotiate(&signaling, "ek_1", &AudioConstraints::default(), Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(backend.played.load(Ordering::SeqCst), 1);
    }
}
