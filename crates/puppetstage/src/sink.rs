//! Command sink adapter
//!
//! The character runtime is an addressable target: an object name plus a
//! method string, with one string parameter. [`CommandSink`] wraps a
//! [`CommandTarget`] with the named operations the rest of the stage uses.
//!
//! Every operation is fire-and-forget and returns `bool`. `false` means the
//! target isn't addressable yet or rejected the call; it is logged, never
//! raised. Commands are safe to resend.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Runtime object that receives character commands.
pub const DEFAULT_INPUT_OBJECT: &str = "WebGLInputManagerGameObject";
/// Runtime object that owns the background sprite.
pub const DEFAULT_BACKGROUND_OBJECT: &str = "bg";

pub const READY_POLL_INTERVAL: Duration = Duration::from_millis(150);
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_millis(3000);

pub const MIN_TRIGGER_SPEED: f64 = 0.1;
pub const MAX_TRIGGER_SPEED: f64 = 2.0;

/// Display name to sprite name for the stock backgrounds.
pub const BACKGROUNDS: &[(&str, &str)] = &[
    ("Zenless Zero", "bg_1"),
    ("Rei", "bg_2"),
    ("Reze", "bg_3"),
];

/// Sprite for a stock background display name.
pub fn background_sprite(label: &str) -> Option<&'static str> {
    BACKGROUNDS
        .iter()
        .find(|(name, _)| *name == label)
        .map(|(_, sprite)| *sprite)
}

#[derive(Debug, Error)]
pub enum TargetError {
    #[error("target not ready")]
    NotReady,

    #[error("target rejected {method}: {reason}")]
    Rejected { method: String, reason: String },
}

/// The external character runtime.
pub trait CommandTarget: Send + Sync {
    /// Whether commands can be delivered right now.
    fn is_ready(&self) -> bool;

    fn send_message(&self, object: &str, method: &str, param: &str) -> Result<(), TargetError>;
}

#[derive(Clone)]
pub struct CommandSink {
    target: Arc<dyn CommandTarget>,
    input_object: String,
    background_object: String,
}

impl std::fmt::Debug for CommandSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSink")
            .field("input_object", &self.input_object)
            .field("background_object", &self.background_object)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct VoiceSamples<'a> {
    samples: &'a [f32],
    #[serde(rename = "sampleRate")]
    sample_rate: u32,
}

impl CommandSink {
    pub fn new(target: Arc<dyn CommandTarget>) -> Self {
        Self {
            target,
            input_object: DEFAULT_INPUT_OBJECT.to_string(),
            background_object: DEFAULT_BACKGROUND_OBJECT.to_string(),
        }
    }

    pub fn with_objects(mut self, input_object: &str, background_object: &str) -> Self {
        self.input_object = input_object.to_string();
        self.background_object = background_object.to_string();
        self
    }

    fn send(&self, object: &str, method: &str, param: &str) -> bool {
        match self.target.send_message(object, method, param) {
            Ok(()) => {
                trace!(object, method, "command delivered");
                true
            }
            Err(e) => {
                warn!(object, method, error = %e, "command not delivered");
                false
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.target.is_ready()
    }

    /// Fire an animation trigger. Speed is clamped to [0.1, 2.0].
    pub fn trigger(&self, name: &str, speed: f64) -> bool {
        let param = json!({ "name": name, "speed": clamp_speed(speed) });
        self.send(&self.input_object, "TriggerByName", &param.to_string())
    }

    pub fn change_expression(&self, id: i64) -> bool {
        self.send(&self.input_object, "ChangeExpression", &id.to_string())
    }

    /// Mouth openness in [0, 1].
    pub fn update_mouth_volume(&self, volume: f64) -> bool {
        let volume = if volume.is_finite() {
            volume.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.send(&self.input_object, "UpdateMouthVolume", &volume.to_string())
    }

    pub fn show_text_box(&self, text: &str, duration: f64, position: &Value, kind: &Value) -> bool {
        let param = json!({
            "text": text,
            "position": position,
            "type": kind,
            "duration": duration,
        });
        self.send(&self.input_object, "ShowTextBox", &param.to_string())
    }

    pub fn clear_text_boxes(&self) -> bool {
        self.send(&self.input_object, "ClearAllTextBoxes", "")
    }

    /// Push mono voice samples into the runtime's playback buffer.
    pub fn load_voice(&self, samples: &[f32], sample_rate: u32) -> bool {
        let param = match serde_json::to_string(&VoiceSamples {
            samples,
            sample_rate,
        }) {
            Ok(param) => param,
            Err(e) => {
                warn!(error = %e, "failed to encode voice samples");
                return false;
            }
        };
        self.send(&self.input_object, "PlayAudioFromJS", &param)
    }

    /// Start whatever `load_voice` last pushed.
    pub fn play_voice(&self) -> bool {
        self.send(&self.input_object, "PlayVoiceFromJS", "")
    }

    pub fn set_background(&self, sprite: &str) -> bool {
        if sprite.is_empty() {
            return false;
        }
        self.send(&self.background_object, "SetBackground", sprite)
    }

    /// Poll readiness every 150 ms until it holds or `timeout` elapses.
    ///
    /// Never returns `false` before the timeout.
    pub async fn wait_until_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_ready() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(timeout_ms = timeout.as_millis() as u64, "target still not ready");
                return false;
            }
            tokio::time::sleep(READY_POLL_INTERVAL.min(deadline - now)).await;
        }
    }
}

fn clamp_speed(speed: f64) -> f64 {
    if speed.is_finite() {
        speed.clamp(MIN_TRIGGER_SPEED, MAX_TRIGGER_SPEED)
    } else {
        1.0
    }
}

/// One command as the target saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct SentCommand {
    pub object: String,
    pub method: String,
    pub param: String,
    pub at: Instant,
}

/// In-memory target for tests and dry runs.
///
/// Records every delivered command with the (tokio) instant it arrived.
#[derive(Debug)]
pub struct RecordingTarget {
    ready: AtomicBool,
    reject_next: AtomicUsize,
    attempts: AtomicUsize,
    sent: Mutex<Vec<SentCommand>>,
}

impl RecordingTarget {
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(true),
            reject_next: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Reject the next `count` deliveries.
    pub fn reject_next(&self, count: usize) {
        self.reject_next.store(count, Ordering::SeqCst);
    }

    /// Deliveries attempted, including rejected ones.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<SentCommand> {
        self.lock().clone()
    }

    /// Delivered commands with the given method, in arrival order.
    pub fn with_method(&self, method: &str) -> Vec<SentCommand> {
        self.lock()
            .iter()
            .filter(|c| c.method == method)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SentCommand>> {
        self.sent.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for RecordingTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandTarget for RecordingTarget {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn send_message(&self, object: &str, method: &str, param: &str) -> Result<(), TargetError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.is_ready() {
            return Err(TargetError::NotReady);
        }
        let rejected = self
            .reject_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(TargetError::Rejected {
                method: method.to_string(),
                reason: "scripted rejection".to_string(),
            });
        }
        self.lock().push(SentCommand {
            object: object.to_string(),
            method: method.to_string(),
            param: param.to_string(),
            at: Instant::now(),
        });
        Ok(())
    }
}
