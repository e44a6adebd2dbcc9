//! Session configuration.
//!
//! [`SessionConfig`] is an immutable snapshot captured when a session is
//! created. The setup message is derived from it exactly once and cached,
//! so later mutation of a config value never affects a live session.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Model used when the config leaves the model field empty.
pub const DEFAULT_LIVE_MODEL: &str = "gemini-2.0-flash-live-001";

/// Output modality the model produces. TEXT and AUDIO are mutually
/// exclusive in the Live API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Modality {
    #[serde(rename = "TEXT")]
    Text,
    #[serde(rename = "AUDIO")]
    Audio,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Text => "TEXT",
            Modality::Audio => "AUDIO",
        }
    }
}

// ── VAD policy ─────────────────────────────────────────────────────

/// Start-of-speech detection sensitivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VadSensitivity {
    #[serde(rename = "START_SENSITIVITY_HIGH")]
    High,
    #[serde(rename = "START_SENSITIVITY_MEDIUM")]
    Medium,
    #[serde(rename = "START_SENSITIVITY_LOW")]
    Low,
}

/// End-of-speech detection sensitivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndSensitivity {
    #[serde(rename = "END_SENSITIVITY_HIGH")]
    High,
    #[serde(rename = "END_SENSITIVITY_MEDIUM")]
    Medium,
    #[serde(rename = "END_SENSITIVITY_LOW")]
    Low,
}

/// Tuning knobs for server-side automatic activity detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VadTuning {
    /// How sensitive the start-of-speech detector is.
    pub start_sensitivity: VadSensitivity,
    /// How sensitive the end-of-speech detector is.
    pub end_sensitivity: EndSensitivity,
    /// Milliseconds of audio before detected speech start to include.
    pub prefix_padding_ms: u32,
    /// Milliseconds of silence before declaring speech ended.
    pub silence_duration_ms: u32,
}

impl Default for VadTuning {
    fn default() -> Self {
        Self {
            start_sensitivity: VadSensitivity::Low,
            end_sensitivity: EndSensitivity::Low,
            prefix_padding_ms: 100,
            silence_duration_ms: 300,
        }
    }
}

/// Voice activity detection policy for a session.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum VadPolicy {
    /// Leave VAD entirely to the server's defaults; no
    /// `realtimeInputConfig` is sent.
    #[default]
    ServerDefault,
    /// Server-side VAD with explicit tuning.
    Automatic(VadTuning),
    /// VAD off: the client marks turn boundaries with explicit
    /// `activityStart` / `activityEnd` signals.
    Disabled,
}

impl VadPolicy {
    /// Manual turn control (explicit activity markers) is in effect.
    pub fn is_manual(&self) -> bool {
        matches!(self, VadPolicy::Disabled)
    }
}

// ── Tool catalog ───────────────────────────────────────────────────

/// A callable tool advertised to the model at setup time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDecl {
    pub name: String,
    pub description: String,
    /// JSON-schema object describing the tool's parameters.
    pub parameters: serde_json::Value,
}

// ── Silence tail ───────────────────────────────────────────────────

/// Shape of the silence tail sent on `end_input` when VAD is enabled.
/// The frames give the server VAD enough quiet to trigger end-of-speech.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SilenceConfig {
    /// Number of silent frames to emit.
    pub frames: usize,
    /// Size of each frame in bytes (zeroed PCM).
    pub frame_bytes: usize,
    /// Gap between frames in milliseconds.
    pub gap_ms: u64,
}

impl Default for SilenceConfig {
    fn default() -> Self {
        Self {
            frames: 8,
            frame_bytes: 16_000,
            gap_ms: 50,
        }
    }
}

// ── Session configuration ──────────────────────────────────────────

/// Immutable configuration snapshot for a live session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Model identifier; normalized to `models/<name>` on the wire.
    /// Empty selects [`DEFAULT_LIVE_MODEL`].
    pub model: String,
    /// Response modalities. Exactly one of TEXT or AUDIO.
    pub modalities: Vec<Modality>,
    /// Optional system instruction text.
    pub system_instruction: Option<String>,
    /// Prebuilt voice name for AUDIO sessions.
    pub voice: Option<String>,
    /// Voice activity detection policy.
    pub vad: VadPolicy,
    /// Tools advertised to the model.
    pub tools: Vec<ToolDecl>,
    /// Reconnect automatically after a mid-session transport drop.
    pub auto_reconnect: bool,
    /// Maximum reconnection attempts before giving up.
    pub max_reconnect_tries: u32,
    /// Silence tail emitted by `end_input` in VAD-enabled mode.
    pub silence: SilenceConfig,
    /// USD cost per 1K input tokens; zero disables cost computation.
    pub input_cost_per_1k: f64,
    /// USD cost per 1K output tokens; zero disables cost computation.
    pub output_cost_per_1k: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            modalities: vec![Modality::Text],
            system_instruction: None,
            voice: None,
            vad: VadPolicy::ServerDefault,
            tools: Vec::new(),
            auto_reconnect: true,
            max_reconnect_tries: 3,
            silence: SilenceConfig::default(),
            input_cost_per_1k: 0.0,
            output_cost_per_1k: 0.0,
        }
    }
}

impl SessionConfig {
    /// Validate the snapshot. Runs before any I/O is attempted.
    pub fn validate(&self) -> Result<(), Error> {
        let text = self.modalities.contains(&Modality::Text);
        let audio = self.modalities.contains(&Modality::Audio);
        if text && audio {
            return Err(Error::ConfigInvalid(format!(
                "invalid response modalities: {:?}: Gemini Live does not support TEXT and AUDIO \
                 simultaneously; choose exactly one",
                self.modalities
                    .iter()
                    .map(Modality::as_str)
                    .collect::<Vec<_>>()
            )));
        }
        Ok(())
    }

    /// The modality actually in effect (empty defaults to TEXT).
    pub fn modality(&self) -> Modality {
        self.modalities.first().copied().unwrap_or(Modality::Text)
    }

    /// Wire-form model identifier, `models/<name>`.
    pub fn resolved_model(&self) -> String {
        let name = if self.model.is_empty() {
            DEFAULT_LIVE_MODEL
        } else {
            self.model.as_str()
        };
        if name.starts_with("models/") {
            name.to_string()
        } else {
            format!("models/{name}")
        }
    }

    /// Per-1K token USD rates, for the cost computation.
    pub fn cost_rates(&self) -> CostRates {
        CostRates {
            input_per_1k: self.input_cost_per_1k,
            output_per_1k: self.output_cost_per_1k,
        }
    }
}

/// Per-1K token USD rates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CostRates {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl CostRates {
    /// Both rates configured; USD amounts will be non-zero.
    pub fn is_priced(&self) -> bool {
        self.input_per_1k > 0.0 && self.output_per_1k > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid_text() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.modality(), Modality::Text);
        assert_eq!(config.max_reconnect_tries, 3);
        assert!(config.auto_reconnect);
    }

    #[test]
    fn text_plus_audio_is_rejected() {
        let config = SessionConfig {
            modalities: vec![Modality::Text, Modality::Audio],
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err
            .to_string()
            .contains("does not support TEXT and AUDIO simultaneously"));
    }

    #[test]
    fn model_is_normalized() {
        let mut config = SessionConfig::default();
        assert_eq!(
            config.resolved_model(),
            format!("models/{DEFAULT_LIVE_MODEL}")
        );

        config.model = "gemini-2.0-flash-live-001".into();
        assert_eq!(config.resolved_model(), "models/gemini-2.0-flash-live-001");

        config.model = "models/already-prefixed".into();
        assert_eq!(config.resolved_model(), "models/already-prefixed");
    }

    #[test]
    fn vad_tuning_defaults() {
        let tuning = VadTuning::default();
        assert_eq!(tuning.start_sensitivity, VadSensitivity::Low);
        assert_eq!(tuning.end_sensitivity, EndSensitivity::Low);
        assert_eq!(tuning.prefix_padding_ms, 100);
        assert_eq!(tuning.silence_duration_ms, 300);
    }

    #[test]
    fn silence_defaults() {
        let silence = SilenceConfig::default();
        assert_eq!(silence.frames, 8);
        assert_eq!(silence.frame_bytes, 16_000);
        assert_eq!(silence.gap_ms, 50);
    }

    #[test]
    fn cost_rates_require_both_sides() {
        assert!(!CostRates {
            input_per_1k: 0.1,
            output_per_1k: 0.0
        }
        .is_priced());
        assert!(CostRates {
            input_per_1k: 0.1,
            output_per_1k: 0.4
        }
        .is_priced());
    }
}
