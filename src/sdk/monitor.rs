//! Energy-based voice activity on the local capture track.

use super::state::{StateAction, StateStore};
use crate::config::VadConfig;
use crate::transport::media::AudioFrame;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Exponentially smoothed RMS compared against a threshold with release
/// hysteresis.
#[derive(Debug, Clone)]
pub struct VoiceDetector {
    vad: VadConfig,
    level: f32,
    active: bool,
}

impl VoiceDetector {
    #[must_use]
    pub const fn new(vad: VadConfig) -> Self {
        Self { vad, level: 0.0, active: false }
    }

    #[must_use]
    pub const fn level(&self) -> f32 {
        self.level
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Feed one frame's RMS and return whether voice is active afterwards.
    pub fn observe(&mut self, rms: f32) -> bool {
        let alpha = self.vad.smoothing;
        self.level = alpha.mul_add(self.level, (1.0 - alpha) * rms);
        if self.active {
            if self.level < self.vad.threshold * self.vad.release_ratio {
                self.active = false;
            }
        } else if self.level > self.vad.threshold {
            self.active = true;
        }
        self.active
    }
}

/// Handle to a running monitor task.
pub struct MonitorHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Stop sampling. Safe to call after the loop has already exited.
    pub fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.task.abort();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Sample `frames` until stopped, the track ends, or the session is no longer
/// connected. Each frame that flips the detector's verdict relative to the
/// published state is applied through the state store, whose reducer refuses
/// to record while muted or disconnected.
pub fn spawn_monitor(
    mut frames: mpsc::Receiver<AudioFrame>,
    state: StateStore,
    vad: VadConfig,
) -> MonitorHandle {
    let (stop_tx, mut stop_rx) = oneshot::channel();
    let task = tokio::spawn(async move {
        let mut detector = VoiceDetector::new(vad);
        loop {
            tokio::select! {
                biased;
                _ = &mut stop_rx => break,
                frame = frames.recv() => {
                    let Some(frame) = frame else {
                        tracing::debug!("Capture track ended; voice monitor stopping");
                        break;
                    };
                    let current = state.snapshot();
                    if !current.is_connected {
                        tracing::debug!("Session disconnected; voice monitor stopping");
                        break;
                    }
                    let active = detector.observe(frame.rms());
                    if active != current.is_recording {
                        state.apply(StateAction::VoiceActivity(active));
                    }
                }
            }
        }
    });
    MonitorHandle { stop: Some(stop_tx), task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn loud() -> AudioFrame {
        AudioFrame::new(vec![0.3; 480])
    }

    fn quiet() -> AudioFrame {
        AudioFrame::new(vec![0.0; 480])
    }

    fn connected_store() -> StateStore {
        let store = StateStore::new();
        store.apply(StateAction::ConnectStarted);
        store.apply(StateAction::Connected);
        store
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn detector_uses_hysteresis() {
        let mut detector = VoiceDetector::new(VadConfig { threshold: 0.1, smoothing: 0.0, release_ratio: 0.5 });
        assert!(!detector.observe(0.05));
        assert!(detector.observe(0.2));
        // Between release level and threshold: stays active.
        assert!(detector.observe(0.07));
        assert!(!detector.observe(0.01));
        assert!(!detector.observe(0.07));
    }

    #[test]
    fn smoothing_delays_onset() {
        let mut detector = VoiceDetector::new(VadConfig { threshold: 0.1, smoothing: 0.8, release_ratio: 0.75 });
        assert!(!detector.observe(0.3));
        assert!(detector.observe(0.3));
        assert!(detector.level() > 0.1);
    }

    #[tokio::test]
    async fn voice_sets_recording_while_connected() {
        let store = connected_store();
        let (tx, rx) = mpsc::channel(16);
        let handle = spawn_monitor(rx, store.clone(), VadConfig::default());

        for _ in 0..5 {
            tx.send(loud()).await.unwrap();
        }
        settle().await;
        assert!(store.snapshot().is_recording);

        for _ in 0..40 {
            tx.send(quiet()).await.unwrap();
        }
        settle().await;
        assert!(!store.snapshot().is_recording);
        handle.stop();
    }

    #[tokio::test]
    async fn never_records_while_muted() {
        let store = connected_store();
        store.apply(StateAction::MuteChanged(true));
        let (tx, rx) = mpsc::channel(16);
        let handle = spawn_monitor(rx, store.clone(), VadConfig::default());

        for _ in 0..10 {
            tx.send(loud()).await.unwrap();
            settle().await;
            assert!(!store.snapshot().is_recording);
        }
        handle.stop();
    }

    #[tokio::test]
    async fn exits_once_disconnected() {
        let store = connected_store();
        let (tx, rx) = mpsc::channel(16);
        let handle = spawn_monitor(rx, store.clone(), VadConfig::default());

        store.apply(StateAction::LinkLost(None));
        tx.send(loud()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), async {
            while !handle.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(!store.snapshot().is_recording);
    }
}
