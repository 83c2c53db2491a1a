//! Live microphone capture and streaming
//!
//! A [`CaptureSession`] owns one input device and two loops:
//!
//! - **send loop** (every `send_interval`, default 60 ms): drain the ring,
//!   block-average down to 16 kHz, quantize to PCM16, base64, and send
//!   `{"type":"audio","sampleRate":16000,"data":...}` over the primary channel.
//!   If that fails the fallback channel gets a try; otherwise the batch is
//!   dropped. Batches are never retried or requeued.
//! - **frame loop** (~60 fps): snapshot the scope buffer, hand it to the
//!   [`WaveformView`], and run a local RMS speech indicator for UI feedback.
//!   The remote VAD stays authoritative.
//!
//! The device only ever touches the [`CaptureTap`], which never blocks, so
//! neither loop can stall the device callback or each other.

mod dsp;
mod tap;

#[cfg(feature = "cpal-input")]
mod cpal_input;

pub use dsp::{downsample, quantize, rms, waveform_points};
pub use tap::{CaptureStats, CaptureTap, ScopeBuffer};

#[cfg(feature = "cpal-input")]
pub use cpal_input::CpalInput;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use puppetproto::{MessageChannel, Outbound};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// RMS above this counts as speech for the local indicator.
pub const SPEECH_THRESHOLD: f32 = 0.02;
/// Silent frames (at ~60 fps, about 300 ms) before local speech ends.
pub const SILENCE_FRAMES_TO_END: u32 = 18;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("microphone access denied")]
    PermissionDenied,

    #[error("no input device available")]
    NoDevice,

    #[error("input device error: {0}")]
    Device(String),

    #[error("capture thread failed: {0}")]
    ThreadFailed(#[from] std::io::Error),
}

/// Human-readable capture state for a UI line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureStatus {
    Idle,
    Listening,
    SpeechStarted,
    SpeechEnded { duration_ms: u64 },
    AccessDenied,
    NoDevice,
    Failed(String),
    Closed,
}

impl fmt::Display for CaptureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureStatus::Idle => Ok(()),
            CaptureStatus::Listening => write!(f, "Listening"),
            CaptureStatus::SpeechStarted => write!(f, "Speech started"),
            CaptureStatus::SpeechEnded { duration_ms } => {
                write!(f, "Speech ended: {} ms", duration_ms)
            }
            CaptureStatus::AccessDenied => write!(f, "Microphone access denied"),
            CaptureStatus::NoDevice => write!(f, "No microphone found"),
            CaptureStatus::Failed(reason) => write!(f, "Microphone error: {}", reason),
            CaptureStatus::Closed => write!(f, "Microphone closed"),
        }
    }
}

impl From<&CaptureError> for CaptureStatus {
    fn from(err: &CaptureError) -> Self {
        match err {
            CaptureError::PermissionDenied => CaptureStatus::AccessDenied,
            CaptureError::NoDevice => CaptureStatus::NoDevice,
            other => CaptureStatus::Failed(other.to_string()),
        }
    }
}

/// An input device producing mono f32 samples.
pub trait CaptureDevice: Send {
    fn sample_rate(&self) -> u32;

    /// Begin pushing samples into `tap`. Errors here surface as status, not
    /// panics.
    fn start(&mut self, tap: CaptureTap) -> Result<(), CaptureError>;

    /// Stop pushing. Called once by the session.
    fn stop(&mut self);
}

/// Oscilloscope sink for the frame loop.
pub trait WaveformView: Send + Sync {
    /// `samples` is the scope window, oldest first.
    fn render(&self, samples: &[f32]);
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureOptions {
    pub send_interval: Duration,
    pub target_rate: u32,
    /// Samples kept for the waveform view
    pub scope_size: usize,
    pub frame_interval: Duration,
    /// Seconds of device audio the send ring can hold
    pub ring_seconds: u32,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            send_interval: Duration::from_millis(60),
            target_rate: 16_000,
            scope_size: 2048,
            frame_interval: Duration::from_millis(16),
            ring_seconds: 2,
        }
    }
}

/// Local RMS-threshold speech detector.
#[derive(Debug)]
pub struct SpeechIndicator {
    threshold: f32,
    silence_frames_to_end: u32,
    speaking_since: Option<Instant>,
    silent_frames: u32,
}

impl SpeechIndicator {
    pub fn new(threshold: f32, silence_frames_to_end: u32) -> Self {
        Self {
            threshold,
            silence_frames_to_end,
            speaking_since: None,
            silent_frames: 0,
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking_since.is_some()
    }

    /// Feed one frame's RMS. Returns a status when speech starts or ends.
    pub fn update(&mut self, level: f32, now: Instant) -> Option<CaptureStatus> {
        if level > self.threshold {
            self.silent_frames = 0;
            if self.speaking_since.is_none() {
                self.speaking_since = Some(now);
                return Some(CaptureStatus::SpeechStarted);
            }
            return None;
        }

        let since = self.speaking_since?;
        self.silent_frames += 1;
        if self.silent_frames > self.silence_frames_to_end {
            self.speaking_since = None;
            self.silent_frames = 0;
            let duration_ms = now.saturating_duration_since(since).as_millis() as u64;
            return Some(CaptureStatus::SpeechEnded { duration_ms });
        }
        None
    }
}

impl Default for SpeechIndicator {
    fn default() -> Self {
        Self::new(SPEECH_THRESHOLD, SILENCE_FRAMES_TO_END)
    }
}

/// A running (or failed-to-start) microphone stream.
pub struct CaptureSession {
    closed: AtomicBool,
    device: Mutex<Option<Box<dyn CaptureDevice>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    status_tx: Arc<watch::Sender<CaptureStatus>>,
    stats: Arc<CaptureStats>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

impl CaptureSession {
    /// Start `device` and both loops. Must be called within a tokio runtime.
    ///
    /// A device that fails to start leaves the session idle with the failure
    /// in [`CaptureSession::status`].
    pub fn start(
        mut device: Box<dyn CaptureDevice>,
        primary: Arc<dyn MessageChannel>,
        fallback: Option<Arc<dyn MessageChannel>>,
        options: CaptureOptions,
        view: Option<Arc<dyn WaveformView>>,
    ) -> Self {
        let (status_tx, _) = watch::channel(CaptureStatus::Idle);
        let status_tx = Arc::new(status_tx);
        let stats = Arc::new(CaptureStats::default());

        let sample_rate = device.sample_rate();
        let capacity = (sample_rate as usize * options.ring_seconds.max(1) as usize).max(1024);
        let (producer, consumer) = rtrb::RingBuffer::new(capacity);
        let scope = Arc::new(Mutex::new(ScopeBuffer::new(options.scope_size)));
        let tap = CaptureTap::new(producer, Arc::clone(&scope), Arc::clone(&stats));

        let session = Self {
            closed: AtomicBool::new(false),
            device: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            status_tx,
            stats,
        };

        if let Err(e) = device.start(tap) {
            warn!(error = %e, "microphone failed to start");
            session.status_tx.send_replace(CaptureStatus::from(&e));
            return session;
        }

        info!(
            sample_rate,
            target_rate = options.target_rate,
            send_interval_ms = options.send_interval.as_millis() as u64,
            "microphone capture started"
        );
        *lock(&session.device) = Some(device);
        session.status_tx.send_replace(CaptureStatus::Listening);

        let send_task = tokio::spawn(send_loop(
            consumer,
            sample_rate,
            primary,
            fallback,
            options.clone(),
            Arc::clone(&session.stats),
        ));
        let frame_task = tokio::spawn(frame_loop(
            scope,
            view,
            options.frame_interval,
            Arc::clone(&session.status_tx),
        ));
        lock(&session.tasks).extend([send_task, frame_task]);

        session
    }

    /// Watch the status line.
    pub fn status(&self) -> watch::Receiver<CaptureStatus> {
        self.status_tx.subscribe()
    }

    pub fn current_status(&self) -> CaptureStatus {
        self.status_tx.borrow().clone()
    }

    pub fn stats(&self) -> &Arc<CaptureStats> {
        &self.stats
    }

    pub fn is_running(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && lock(&self.device).is_some()
    }

    /// Stop the device and both loops. Safe to call any number of times;
    /// only the first does anything.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        if let Some(mut device) = lock(&self.device).take() {
            device.stop();
        }
        self.status_tx.send_replace(CaptureStatus::Closed);
        info!(stats = %self.stats.snapshot(), "microphone capture closed");
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Turn one drained batch into the outbound JSON, or `None` if empty.
pub fn encode_batch(samples: &[f32], in_rate: u32, target_rate: u32) -> Option<String> {
    if samples.is_empty() {
        return None;
    }
    let downsampled = downsample(samples, in_rate, target_rate);
    if downsampled.is_empty() {
        return None;
    }
    let out_rate = if in_rate > target_rate {
        target_rate
    } else {
        in_rate
    };
    let pcm = quantize(&downsampled);
    match Outbound::audio_pcm16(out_rate, &pcm).to_json() {
        Ok(json) => Some(json),
        Err(e) => {
            warn!(error = %e, "failed to encode audio batch");
            None
        }
    }
}

async fn send_loop(
    mut consumer: rtrb::Consumer<f32>,
    in_rate: u32,
    primary: Arc<dyn MessageChannel>,
    fallback: Option<Arc<dyn MessageChannel>>,
    options: CaptureOptions,
    stats: Arc<CaptureStats>,
) {
    let mut pending: Vec<f32> = Vec::with_capacity(in_rate as usize / 10);
    let mut ticker = tokio::time::interval(options.send_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    debug!("capture send loop started");

    loop {
        ticker.tick().await;

        let available = consumer.slots();
        if available == 0 {
            continue;
        }
        if let Ok(chunk) = consumer.read_chunk(available) {
            let (first, second) = chunk.as_slices();
            pending.extend_from_slice(first);
            pending.extend_from_slice(second);
            chunk.commit_all();
        }

        let batch = encode_batch(&pending, in_rate, options.target_rate);
        let drained = pending.len();
        pending.clear();

        let Some(payload) = batch else {
            continue;
        };

        let delivered = primary.send(&payload)
            || fallback.as_ref().is_some_and(|channel| channel.send(&payload));

        if delivered {
            stats.batches_sent.fetch_add(1, Ordering::Relaxed);
            trace!(samples = drained, "audio batch sent");
        } else {
            stats.batches_dropped.fetch_add(1, Ordering::Relaxed);
            trace!(samples = drained, "audio batch dropped");
        }
    }
}

async fn frame_loop(
    scope: Arc<Mutex<ScopeBuffer>>,
    view: Option<Arc<dyn WaveformView>>,
    frame_interval: Duration,
    status_tx: Arc<watch::Sender<CaptureStatus>>,
) {
    let mut window: Vec<f32> = Vec::new();
    let mut indicator = SpeechIndicator::default();
    let mut ticker = tokio::time::interval(frame_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        lock(&scope).snapshot_into(&mut window);

        if let Some(view) = &view {
            view.render(&window);
        }

        if let Some(status) = indicator.update(rms(&window), Instant::now()) {
            debug!(status = %status, "local speech indicator");
            status_tx.send_replace(status);
        }
    }
}
