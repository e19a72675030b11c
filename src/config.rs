use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::protocol::models::DEFAULT_MODEL;
use crate::{Error, Result};

const DEFAULT_BACKEND_URL: &str = "http://localhost:8080/api/";
const DEFAULT_REALTIME_URL: &str = "https://api.openai.com/v1/realtime";
const DEFAULT_TRANSCRIPTION_MODEL: &str = "gpt-4o-mini-transcribe";

/// Engine-wide configuration. Every field has a default, so a partial
/// document deserializes cleanly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base URL of the backend hosting the credential, tool and summary endpoints.
    pub backend_url: String,
    /// Base URL of the remote realtime engine's signaling endpoint.
    pub realtime_url: String,
    pub model: String,
    pub voice: Option<String>,
    pub instructions: Option<String>,
    pub input_transcription_model: Option<String>,
    pub credential_timeout_ms: u64,
    pub negotiation_timeout_ms: u64,
    pub tool_timeout_ms: u64,
    pub http_timeout_ms: u64,
    pub audio: AudioConstraints,
    pub vad: VadConfig,
    /// Number of trailing history entries sent with the credential request.
    pub transcript_excerpt_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            realtime_url: DEFAULT_REALTIME_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            voice: None,
            instructions: None,
            input_transcription_model: Some(DEFAULT_TRANSCRIPTION_MODEL.to_string()),
            credential_timeout_ms: 10_000,
            negotiation_timeout_ms: 15_000,
            tool_timeout_ms: 20_000,
            http_timeout_ms: 30_000,
            audio: AudioConstraints::default(),
            vad: VadConfig::default(),
            transcript_excerpt_len: 10,
        }
    }
}

impl EngineConfig {
    /// # Errors
    /// Returns an error if `backend_url` is not an absolute URL.
    #[allow(clippy::result_large_err)]
    pub fn backend_url(&self) -> Result<Url> {
        Ok(Url::parse(&self.backend_url)?)
    }

    /// # Errors
    /// Returns an error if `realtime_url` is not an absolute URL.
    #[allow(clippy::result_large_err)]
    pub fn realtime_url(&self) -> Result<Url> {
        Ok(Url::parse(&self.realtime_url)?)
    }

    #[must_use]
    pub const fn credential_timeout(&self) -> Duration {
        Duration::from_millis(self.credential_timeout_ms)
    }

    #[must_use]
    pub const fn negotiation_timeout(&self) -> Duration {
        Duration::from_millis(self.negotiation_timeout_ms)
    }

    #[must_use]
    pub const fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms)
    }

    #[must_use]
    pub const fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    /// Parse a JSON configuration document.
    ///
    /// # Errors
    /// Returns an error if the document is malformed or fails validation.
    #[allow(clippy::result_large_err)]
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns an error if an endpoint URL is malformed, a timeout is zero or
    /// the VAD settings are out of range.
    #[allow(clippy::result_large_err)]
    pub fn validate(&self) -> Result<()> {
        self.backend_url()?;
        self.realtime_url()?;
        let timeouts = [
            ("credential_timeout_ms", self.credential_timeout_ms),
            ("negotiation_timeout_ms", self.negotiation_timeout_ms),
            ("tool_timeout_ms", self.tool_timeout_ms),
            ("http_timeout_ms", self.http_timeout_ms),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(Error::InvalidConfig(format!("{name} must be greater than zero")));
            }
        }
        if self.audio.sample_rate == 0 {
            return Err(Error::InvalidConfig("audio.sample_rate must be greater than zero".to_string()));
        }
        self.vad.validate()
    }
}

/// Capture constraints for the local microphone track.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            sample_rate: 24_000,
            channels: 1,
        }
    }
}

/// Energy-based voice activity settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VadConfig {
    /// Smoothed RMS level (normalized samples) above which voice is active.
    pub threshold: f32,
    /// Weight of the previous smoothed value in the moving average, in `[0, 1)`.
    pub smoothing: f32,
    /// Fraction of `threshold` the level must fall below to release.
    pub release_ratio: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.02,
            smoothing: 0.8,
            release_ratio: 0.75,
        }
    }
}

impl VadConfig {
    /// # Errors
    /// Returns an error if any value is outside its valid range.
    #[allow(clippy::result_large_err)]
    pub fn validate(&self) -> Result<()> {
        if !(self.threshold > 0.0 && self.threshold <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "vad.threshold must be in (0, 1], got {}",
                self.threshold
            )));
        }
        if !(0.0..1.0).contains(&self.smoothing) {
            return Err(Error::InvalidConfig(format!(
                "vad.smoothing must be in [0, 1), got {}",
                self.smoothing
            )));
        }
        if !(self.release_ratio > 0.0 && self.release_ratio <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "vad.release_ratio must be in (0, 1], got {}",
                self.release_ratio
            )));
        }
        Ok(())
    }
}
