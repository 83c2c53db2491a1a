//! JSON events exchanged with the conversation backend.
//!
//! Outbound messages are tagged with `type`, inbound ones with `event`. The
//! backend is loosely typed, so inbound parsing never fails: anything that
//! doesn't match a known event lands in [`Incoming::Unrecognized`] or
//! [`Incoming::Opaque`] and the router ignores it.

use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// How the backend should answer a text message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    Audio,
    Text,
    /// Anything the backend invents later.
    #[serde(other)]
    Unknown,
}

/// Messages sent to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Text {
        text: String,
        #[serde(rename = "responseMode", skip_serializing_if = "Option::is_none")]
        response_mode: Option<ResponseMode>,
    },
    Audio {
        #[serde(rename = "sampleRate")]
        sample_rate: u32,
        /// Base64 of little-endian PCM16.
        data: String,
    },
    Ping,
}

impl Outbound {
    pub fn text(text: impl Into<String>, response_mode: Option<ResponseMode>) -> Self {
        Outbound::Text {
            text: text.into(),
            response_mode,
        }
    }

    /// Pack PCM16 samples as little-endian bytes and base64 them.
    pub fn audio_pcm16(sample_rate: u32, samples: &[i16]) -> Self {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Outbound::Audio {
            sample_rate,
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// One caption cue attached to an `ai_response`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextCue {
    pub sentence: String,
    /// Seconds the caption stays up.
    #[serde(default)]
    pub duration: f64,
    /// Passed through to the runtime untouched.
    #[serde(default)]
    pub pos: Value,
    #[serde(rename = "type", default)]
    pub kind: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AiResponse {
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub timeline: Option<Value>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub audio_id: Option<String>,
    /// Caption cues. Kept raw so a single malformed cue doesn't sink the
    /// whole response; see [`AiResponse::captions`].
    #[serde(default)]
    pub text: Option<Value>,
    #[serde(rename = "responseMode", default)]
    pub response_mode: Option<ResponseMode>,
}

impl AiResponse {
    /// Well-formed caption cues, in order. Malformed entries are skipped.
    pub fn captions(&self) -> Vec<TextCue> {
        match &self.text {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Whether the backend asked for a text-only answer.
    pub fn is_text_mode(&self) -> bool {
        self.response_mode == Some(ResponseMode::Text)
    }
}

/// Events pushed by the backend.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InboundEvent {
    AiResponse(AiResponse),
    SpeechStarted,
    SpeechEnded {
        #[serde(default)]
        duration: Option<f64>,
        #[serde(default)]
        timeline: Option<Value>,
    },
    UserMessage {
        #[serde(default)]
        text: String,
    },
}

/// Result of classifying one raw inbound payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Event(InboundEvent),
    /// Valid JSON, but not an event we know.
    Unrecognized(Value),
    /// Not JSON at all.
    Opaque(String),
}

impl Incoming {
    pub fn parse(raw: &str) -> Self {
        let value: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(_) => return Incoming::Opaque(raw.to_string()),
        };
        match InboundEvent::deserialize(&value) {
            Ok(event) => Incoming::Event(event),
            Err(_) => Incoming::Unrecognized(value),
        }
    }
}

/// Accept `"abc"`, `123` or `null` for ids.
fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
