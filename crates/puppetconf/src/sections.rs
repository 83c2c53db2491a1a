//! Configuration sections. Every field has a compiled default so a missing
//! file, section or key is never an error.

use serde::{Deserialize, Serialize};

/// Event transport endpoints and reconnection behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Main event channel (ai_response, user_message, ...).
    /// Default: ws://localhost:8000/ws
    #[serde(default = "TransportConfig::default_server_url")]
    pub server_url: String,

    /// Dedicated voice-activity channel. Empty means captured audio only
    /// goes over the main channel.
    /// Default: ws://localhost:8000/ws-vad
    #[serde(default = "TransportConfig::default_vad_url")]
    pub vad_url: String,

    /// Delay before a reconnection attempt.
    /// Default: 1000
    #[serde(default = "TransportConfig::default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// When non-zero, reconnection delay doubles per failed attempt up to
    /// this cap. Zero keeps the fixed delay.
    /// Default: 0
    #[serde(default)]
    pub reconnect_max_ms: u64,

    /// Interval between `{"type":"ping"}` keep-alives. Zero disables them.
    /// Default: 0
    #[serde(default)]
    pub keepalive_secs: u64,
}

impl TransportConfig {
    fn default_server_url() -> String {
        "ws://localhost:8000/ws".to_string()
    }

    fn default_vad_url() -> String {
        "ws://localhost:8000/ws-vad".to_string()
    }

    fn default_reconnect_delay_ms() -> u64 {
        1000
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            server_url: Self::default_server_url(),
            vad_url: Self::default_vad_url(),
            reconnect_delay_ms: Self::default_reconnect_delay_ms(),
            reconnect_max_ms: 0,
            keepalive_secs: 0,
        }
    }
}

/// HTTP backend used for audio retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL; audio lives at `{http_url}/audio/{id}`.
    /// Default: http://localhost:8000
    #[serde(default = "BackendConfig::default_http_url")]
    pub http_url: String,

    /// Timeout for a single audio fetch.
    /// Default: 10000
    #[serde(default = "BackendConfig::default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
}

impl BackendConfig {
    fn default_http_url() -> String {
        "http://localhost:8000".to_string()
    }

    fn default_fetch_timeout_ms() -> u64 {
        10_000
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            http_url: Self::default_http_url(),
            fetch_timeout_ms: Self::default_fetch_timeout_ms(),
        }
    }
}

/// The character runtime that receives commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Bridge endpoint the runtime listens on. Empty means commands are only
    /// logged.
    /// Default: ws://localhost:8765
    #[serde(default = "TargetConfig::default_bridge_url")]
    pub bridge_url: String,

    /// Object that receives character commands.
    /// Default: WebGLInputManagerGameObject
    #[serde(default = "TargetConfig::default_input_object")]
    pub input_object: String,

    /// Object that receives background changes.
    /// Default: bg
    #[serde(default = "TargetConfig::default_background_object")]
    pub background_object: String,

    /// Readiness wait used before pushing voice audio.
    /// Default: 5000
    #[serde(default = "TargetConfig::default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
}

impl TargetConfig {
    fn default_bridge_url() -> String {
        "ws://localhost:8765".to_string()
    }

    fn default_input_object() -> String {
        "WebGLInputManagerGameObject".to_string()
    }

    fn default_background_object() -> String {
        "bg".to_string()
    }

    fn default_ready_timeout_ms() -> u64 {
        5000
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            bridge_url: Self::default_bridge_url(),
            input_object: Self::default_input_object(),
            background_object: Self::default_background_object(),
            ready_timeout_ms: Self::default_ready_timeout_ms(),
        }
    }
}

/// Voice playback and lip-sync scheduling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Headroom between computing the start time and the start itself.
    /// Default: 120
    #[serde(default = "PlaybackConfig::default_latency_ms")]
    pub latency_ms: u64,

    /// Envelope frame length.
    /// Default: 50
    #[serde(default = "PlaybackConfig::default_frame_ms")]
    pub frame_ms: u64,

    /// Attempts at pushing samples to the runtime.
    /// Default: 4
    #[serde(default = "PlaybackConfig::default_max_attempts")]
    pub max_attempts: u32,
}

impl PlaybackConfig {
    fn default_latency_ms() -> u64 {
        120
    }

    fn default_frame_ms() -> u64 {
        50
    }

    fn default_max_attempts() -> u32 {
        4
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            latency_ms: Self::default_latency_ms(),
            frame_ms: Self::default_frame_ms(),
            max_attempts: Self::default_max_attempts(),
        }
    }
}

/// Microphone capture and streaming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Start the microphone with `run`.
    /// Default: true
    #[serde(default = "CaptureConfig::default_enabled")]
    pub enabled: bool,

    /// Cadence of audio batches sent to the VAD.
    /// Default: 60
    #[serde(default = "CaptureConfig::default_send_interval_ms")]
    pub send_interval_ms: u64,

    /// Rate audio is downsampled to before sending.
    /// Default: 16000
    #[serde(default = "CaptureConfig::default_target_rate")]
    pub target_rate: u32,

    /// Samples kept for waveform rendering.
    /// Default: 2048
    #[serde(default = "CaptureConfig::default_scope_size")]
    pub scope_size: usize,
}

impl CaptureConfig {
    fn default_enabled() -> bool {
        true
    }

    fn default_send_interval_ms() -> u64 {
        60
    }

    fn default_target_rate() -> u32 {
        16_000
    }

    fn default_scope_size() -> usize {
        2048
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            send_interval_ms: Self::default_send_interval_ms(),
            target_rate: Self::default_target_rate(),
            scope_size: Self::default_scope_size(),
        }
    }
}

/// Logging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// EnvFilter directive (trace, debug, info, warn, error, or per-target).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}
