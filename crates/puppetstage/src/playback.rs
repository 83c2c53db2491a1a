//! Voice playback with envelope-driven lip-sync
//!
//! `play` decodes the voice, computes its loudness envelope, picks a start
//! time slightly in the future on the stage clock, pushes the samples to the
//! runtime and schedules:
//!
//! ```text
//! planned_start            planned_start + frame_ms     ...
//!      │                          │
//!      ├─ PlayVoiceFromJS         │
//!      ├─ UpdateMouthVolume(e0)   ├─ UpdateMouthVolume(e1)  ...
//! ```
//!
//! It returns as soon as everything is scheduled. A newer `play` (or `stop`)
//! cancels whatever the previous one still had pending.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::clock::StageClock;
use crate::decode::{self, DecodedVoice};
use crate::envelope;
use crate::schedule::Scheduler;
use crate::sink::CommandSink;

/// Silence pushed when the voice couldn't be decoded, so the runtime doesn't
/// replay a stale buffer.
const SILENT_FALLBACK_SAMPLES: usize = 100;
const SILENT_FALLBACK_RATE: u32 = 48_000;

/// Linear backoff unit between push attempts.
const PUSH_BACKOFF: Duration = Duration::from_millis(150);

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackOptions {
    /// Headroom between now and the planned start
    pub latency_ms: u64,
    /// Envelope frame length
    pub frame_ms: u64,
    /// Attempts at pushing samples
    pub max_attempts: u32,
    /// Bounded wait for the runtime before pushing
    pub ready_timeout: Duration,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            latency_ms: 120,
            frame_ms: 50,
            max_attempts: 4,
            ready_timeout: Duration::from_millis(5000),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackReport {
    /// Stage-clock seconds at which PlayVoiceFromJS was scheduled
    pub planned_start: f64,
    /// Voice duration in seconds
    pub duration: f64,
    pub envelope: Vec<f32>,
    /// Whether the samples reached the runtime
    pub pushed: bool,
    /// Whether anything was scheduled; false when a newer play took over
    pub scheduled: bool,
}

pub struct VoicePlayer {
    sink: CommandSink,
    clock: StageClock,
    scheduler: Mutex<Scheduler>,
    current: AtomicU64,
}

impl VoicePlayer {
    pub fn new(sink: CommandSink, clock: StageClock) -> Self {
        Self {
            sink,
            clock,
            scheduler: Mutex::new(Scheduler::new()),
            current: AtomicU64::new(0),
        }
    }

    pub fn clock(&self) -> &StageClock {
        &self.clock
    }

    fn scheduler(&self) -> MutexGuard<'_, Scheduler> {
        self.scheduler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Decode `bytes` and play them. See the module docs.
    pub async fn play(&self, bytes: &[u8], options: &PlaybackOptions) -> PlaybackReport {
        self.play_voice(decode::decode_voice(bytes), options).await
    }

    /// Play an already-decoded voice.
    pub async fn play_voice(
        &self,
        voice: DecodedVoice,
        options: &PlaybackOptions,
    ) -> PlaybackReport {
        let ticket = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        let preempted = self.scheduler().cancel_all();
        if preempted > 0 {
            debug!(preempted, "previous playback preempted");
        }

        let (samples, sample_rate, duration) = match voice {
            DecodedVoice::Decoded {
                samples,
                sample_rate,
                duration,
            } => (samples, sample_rate, duration),
            DecodedVoice::Unavailable { fallback_duration } => {
                warn!("no decodable voice, starting with silence");
                (
                    vec![0.0; SILENT_FALLBACK_SAMPLES],
                    SILENT_FALLBACK_RATE,
                    fallback_duration,
                )
            }
        };

        let envelope = envelope::compute(&samples, sample_rate, options.frame_ms);
        let planned_start = self.clock.now() + options.latency_ms as f64 / 1000.0;

        if !self.sink.wait_until_ready(options.ready_timeout).await {
            warn!(
                timeout_ms = options.ready_timeout.as_millis() as u64,
                "runtime not ready, pushing voice anyway"
            );
        }

        let pushed = self.push(&samples, sample_rate, options.max_attempts).await;
        if !pushed {
            warn!(attempts = options.max_attempts, "voice samples not delivered");
        }

        if self.current.load(Ordering::SeqCst) != ticket {
            debug!("playback superseded before scheduling");
            return PlaybackReport {
                planned_start,
                duration,
                envelope,
                pushed,
                scheduled: false,
            };
        }

        let start_delay = self.clock.until(planned_start);
        let frame = Duration::from_millis(options.frame_ms);
        {
            let mut scheduler = self.scheduler();

            let sink = self.sink.clone();
            scheduler.schedule_after(start_delay, move || {
                sink.play_voice();
            });

            for (idx, &value) in envelope.iter().enumerate() {
                let level = envelope::mouth_level(value);
                let sink = self.sink.clone();
                scheduler.schedule_after(start_delay + frame * idx as u32, move || {
                    sink.update_mouth_volume(level);
                });
            }
        }

        info!(
            planned_start,
            duration,
            frames = envelope.len(),
            "voice scheduled"
        );

        PlaybackReport {
            planned_start,
            duration,
            envelope,
            pushed,
            scheduled: true,
        }
    }

    /// Push samples, retrying with 150 ms × attempt between failures.
    async fn push(&self, samples: &[f32], sample_rate: u32, max_attempts: u32) -> bool {
        for attempt in 1..=max_attempts.max(1) {
            if self.sink.load_voice(samples, sample_rate) {
                return true;
            }
            if attempt < max_attempts {
                let backoff = PUSH_BACKOFF * attempt;
                debug!(
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "voice push failed, retrying"
                );
                tokio::time::sleep(backoff).await;
            }
        }
        false
    }

    /// Cancel every pending command of the current playback.
    pub fn stop(&self) {
        self.current.fetch_add(1, Ordering::SeqCst);
        let cancelled = self.scheduler().cancel_all();
        debug!(cancelled, "playback stopped");
    }

    /// Commands still waiting to fire.
    pub fn pending(&self) -> usize {
        self.scheduler().pending()
    }
}
