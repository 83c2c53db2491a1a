//! Caption cues shown in sequence
//!
//! Each cue goes up via `ShowTextBox` when the previous one's duration has
//! run out, counting from the track's start time. A new caption set replaces
//! the old one.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use puppetproto::TextCue;
use tracing::debug;

use crate::clock::StageClock;
use crate::schedule::Scheduler;
use crate::sink::CommandSink;

pub struct CaptionTrack {
    sink: CommandSink,
    clock: StageClock,
    scheduler: Mutex<Scheduler>,
}

impl CaptionTrack {
    pub fn new(sink: CommandSink, clock: StageClock) -> Self {
        Self {
            sink,
            clock,
            scheduler: Mutex::new(Scheduler::new()),
        }
    }

    fn scheduler(&self) -> MutexGuard<'_, Scheduler> {
        self.scheduler.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Schedule `cues` back to back from `start_at` (stage-clock seconds),
    /// or from now. Returns the total span in seconds.
    pub fn show(&self, cues: &[TextCue], start_at: Option<f64>) -> f64 {
        let mut scheduler = self.scheduler();
        scheduler.cancel_all();

        let base = start_at.map(|at| self.clock.until(at)).unwrap_or_default();
        let mut offset = 0.0_f64;

        for cue in cues {
            let Some(delay) = Duration::try_from_secs_f64(offset)
                .ok()
                .and_then(|offset| base.checked_add(offset))
            else {
                debug!(offset_secs = offset, "caption offset out of range, dropping the rest");
                break;
            };
            let sink = self.sink.clone();
            let cue = cue.clone();
            scheduler.schedule_after(delay, move || {
                sink.show_text_box(&cue.sentence, cue.duration, &cue.pos, &cue.kind);
            });

            if cue.duration.is_finite() && cue.duration > 0.0 {
                offset += cue.duration;
            }
        }

        debug!(cues = cues.len(), span_secs = offset, "captions scheduled");
        offset
    }

    /// Drop pending cues. Cues already on screen stay until cleared.
    pub fn clear(&self) {
        self.scheduler().cancel_all();
    }
}
