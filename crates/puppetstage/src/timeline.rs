//! Animation timeline execution
//!
//! A timeline is a list of entries, each with an offset in seconds and the
//! expressions/triggers to fire at that offset:
//!
//! ```json
//! [
//!   {"time": 0,   "triggers": ["madtrigger"], "trigger_speed": 1.2},
//!   {"time": 1.9, "expressions": ["Smile.exp3"]}
//! ]
//! ```
//!
//! Only one timeline runs at a time. `execute` cancels everything the
//! previous one still had pending before scheduling the new one. Offsets are
//! relative to `start_at` (stage-clock seconds) when given, so a timeline can
//! be pinned to a voice's planned start.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::clock::StageClock;
use crate::schedule::Scheduler;
use crate::sink::CommandSink;

/// Expression name to runtime expression id.
pub const EXPRESSIONS: &[(&str, i64)] = &[
    ("Angry.exp3", 0),
    ("f01.exp3", 1),
    ("Normal.exp3", 2),
    ("f02.exp3", 3),
    ("Smile.exp3", 4),
    ("Blushing.exp3", 5),
    ("Surprised.exp3", 6),
    ("Sad.exp3", 7),
];

/// Triggers the stock character knows. Others are still sent.
pub const TRIGGERS: &[&str] = &[
    "madtrigger",
    "embarrassedtrigger",
    "headnodtrigger",
    "confusedtrigger",
    "disappointedtrigger",
    "happytrigger",
    "winktrigger",
    "happyagreetrigger",
    "lightmadtrigger",
    "sadtiredtrigger",
    "sadtrigger",
    "happynotrigger",
    "bothertrigger",
    "shaketrigger",
];

/// Completion fires this long after the last command.
pub const COMPLETION_MARGIN: Duration = Duration::from_millis(80);

pub fn expression_id(name: &str) -> Option<i64> {
    EXPRESSIONS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, id)| *id)
}

pub fn is_known_trigger(name: &str) -> bool {
    TRIGGERS.contains(&name)
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TimelineEntry {
    /// Seconds from the timeline's base
    #[serde(default)]
    pub time: f64,
    #[serde(default = "TimelineEntry::default_speed", alias = "speed")]
    pub trigger_speed: f64,
    #[serde(default)]
    pub triggers: Vec<String>,
    #[serde(default)]
    pub expressions: Vec<String>,
}

impl TimelineEntry {
    fn default_speed() -> f64 {
        1.0
    }

    /// Speed to send; zero or garbage falls back to 1.0.
    pub fn speed(&self) -> f64 {
        if self.trigger_speed.is_finite() && self.trigger_speed > 0.0 {
            self.trigger_speed
        } else {
            1.0
        }
    }
}

/// Extract entries from a timeline payload.
///
/// Accepts a bare array or `{"timeline": [...]}`. Returns `None` when there
/// is no array; malformed entries inside an array are skipped.
pub fn parse_timeline(payload: &Value) -> Option<Vec<TimelineEntry>> {
    let payload = match payload {
        Value::Object(map) => map.get("timeline")?,
        other => other,
    };
    let items = payload.as_array()?;
    Some(
        items
            .iter()
            .filter_map(|item| match TimelineEntry::deserialize(item) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!(error = %e, "skipping malformed timeline entry");
                    None
                }
            })
            .collect(),
    )
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineState {
    Idle = 0,
    Scheduling = 1,
    Active = 2,
}

impl TimelineState {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => TimelineState::Scheduling,
            2 => TimelineState::Active,
            _ => TimelineState::Idle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineOutcome {
    /// Every command fired
    Completed,
    /// A newer timeline or `clear()` cancelled it
    Preempted,
}

/// Resolves once the timeline completes or is preempted.
#[derive(Debug)]
pub struct TimelineCompletion {
    rx: oneshot::Receiver<TimelineOutcome>,
}

impl Future for TimelineCompletion {
    type Output = TimelineOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A dropped sender means the run was cancelled
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(TimelineOutcome::Preempted))
    }
}

struct Run {
    scheduler: Scheduler,
    done: Option<oneshot::Sender<TimelineOutcome>>,
}

pub struct TimelineExecutor {
    sink: CommandSink,
    clock: StageClock,
    state: Arc<AtomicU8>,
    run: Arc<Mutex<Run>>,
}

impl TimelineExecutor {
    pub fn new(sink: CommandSink, clock: StageClock) -> Self {
        Self {
            sink,
            clock,
            state: Arc::new(AtomicU8::new(TimelineState::Idle as u8)),
            run: Arc::new(Mutex::new(Run {
                scheduler: Scheduler::new(),
                done: None,
            })),
        }
    }

    pub fn state(&self) -> TimelineState {
        TimelineState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn lock(&self) -> MutexGuard<'_, Run> {
        self.run.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Schedule a timeline, replacing whatever was running.
    ///
    /// `start_at` is stage-clock seconds; entry offsets count from there.
    /// Without it they count from now. Returns `None` (and leaves any running
    /// timeline alone) when `payload` holds no timeline.
    pub fn execute(&self, payload: &Value, start_at: Option<f64>) -> Option<TimelineCompletion> {
        let entries = parse_timeline(payload)?;

        let mut run = self.lock();
        preempt(&mut run);
        self.state
            .store(TimelineState::Scheduling as u8, Ordering::SeqCst);

        let base = start_at
            .map(|at| (at - self.clock.now()).max(0.0))
            .unwrap_or(0.0);

        let mut last = Duration::ZERO;
        let mut commands = 0usize;

        for entry in &entries {
            let Ok(delay) = Duration::try_from_secs_f64((entry.time + base).max(0.0)) else {
                debug!(time = entry.time, "timeline offset out of range, skipping entry");
                continue;
            };
            last = last.max(delay);

            for name in &entry.expressions {
                let Some(id) = expression_id(name) else {
                    debug!(expression = %name, "unknown expression, skipping");
                    continue;
                };
                let sink = self.sink.clone();
                let name = name.clone();
                run.scheduler.schedule_after(delay, move || {
                    debug!(expression = %name, id, "changing expression");
                    sink.change_expression(id);
                });
                commands += 1;
            }

            let speed = entry.speed();
            for name in &entry.triggers {
                if !is_known_trigger(name) {
                    debug!(trigger = %name, "unknown trigger, sending anyway");
                }
                let sink = self.sink.clone();
                let name = name.clone();
                run.scheduler.schedule_after(delay, move || {
                    debug!(trigger = %name, speed, "firing trigger");
                    sink.trigger(&name, speed);
                });
                commands += 1;
            }
        }

        let (tx, rx) = oneshot::channel();
        run.done = Some(tx);

        let generation = run.scheduler.generation();
        let state = Arc::clone(&self.state);
        let weak_run = Arc::downgrade(&self.run);
        run.scheduler.schedule_after(last.saturating_add(COMPLETION_MARGIN), move || {
            let Some(run) = weak_run.upgrade() else {
                return;
            };
            let mut run = run.lock().unwrap_or_else(|p| p.into_inner());
            if run.scheduler.generation() != generation {
                return;
            }
            state.store(TimelineState::Idle as u8, Ordering::SeqCst);
            if let Some(done) = run.done.take() {
                let _ = done.send(TimelineOutcome::Completed);
            }
        });

        self.state.store(TimelineState::Active as u8, Ordering::SeqCst);
        info!(
            entries = entries.len(),
            commands,
            base_secs = base,
            last_ms = last.as_millis() as u64,
            "timeline scheduled"
        );

        Some(TimelineCompletion { rx })
    }

    /// Cancel pending commands and go idle.
    pub fn clear(&self) {
        let mut run = self.lock();
        preempt(&mut run);
        self.state.store(TimelineState::Idle as u8, Ordering::SeqCst);
    }
}

fn preempt(run: &mut Run) {
    let cancelled = run.scheduler.cancel_all();
    if let Some(done) = run.done.take() {
        debug!(cancelled, "timeline preempted");
        let _ = done.send(TimelineOutcome::Preempted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn expression_table() {
        assert_eq!(expression_id("Angry.exp3"), Some(0));
        assert_eq!(expression_id("Smile.exp3"), Some(4));
        assert_eq!(expression_id("Sad.exp3"), Some(7));
        assert_eq!(expression_id("Grumpy.exp3"), None);
        assert_eq!(TRIGGERS.len(), 14);
        assert!(is_known_trigger("shaketrigger"));
    }

    #[test]
    fn parse_unwraps_and_skips_garbage() {
        let wrapped = json!({"timeline": [
            {"time": 0.5, "triggers": ["winktrigger"], "speed": 1.5},
            {"time": "soon"},
            {"expressions": ["Sad.exp3"]}
        ]});
        let entries = parse_timeline(&wrapped).unwrap();
        assert_eq!(
            entries,
            vec![
                TimelineEntry {
                    time: 0.5,
                    trigger_speed: 1.5,
                    triggers: vec!["winktrigger".to_string()],
                    expressions: vec![],
                },
                TimelineEntry {
                    time: 0.0,
                    trigger_speed: 1.0,
                    triggers: vec![],
                    expressions: vec!["Sad.exp3".to_string()],
                },
            ]
        );
    }

    #[test]
    fn parse_rejects_non_arrays() {
        assert_eq!(parse_timeline(&json!(null)), None);
        assert_eq!(parse_timeline(&json!("timeline")), None);
        assert_eq!(parse_timeline(&json!({"timeline": 3})), None);
        assert_eq!(parse_timeline(&json!({})), None);
    }

    #[test]
    fn zero_speed_falls_back() {
        let entry: TimelineEntry = serde_json::from_value(json!({"trigger_speed": 0})).unwrap();
        assert_eq!(entry.speed(), 1.0);
    }
}
