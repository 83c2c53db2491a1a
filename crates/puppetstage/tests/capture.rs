//! CaptureSession with a scripted device and in-memory channels.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine;
use puppetproto::MessageChannel;
use puppetstage::{
    CaptureDevice, CaptureError, CaptureOptions, CaptureSession, CaptureStatus, CaptureTap,
    WaveformView,
};

/// Device whose callback is driven by the test through `feed`.
struct ScriptedDevice {
    sample_rate: u32,
    tap: Arc<Mutex<Option<CaptureTap>>>,
    stops: Arc<AtomicUsize>,
    fail_with: Option<CaptureError>,
}

#[derive(Clone, Default)]
struct DeviceHandle {
    tap: Arc<Mutex<Option<CaptureTap>>>,
    stops: Arc<AtomicUsize>,
}

impl DeviceHandle {
    fn feed(&self, samples: &[f32]) {
        let mut tap = self.tap.lock().unwrap();
        tap.as_mut().expect("device not started").push(samples);
    }

    fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

fn device(sample_rate: u32) -> (Box<dyn CaptureDevice>, DeviceHandle) {
    let handle = DeviceHandle::default();
    let device = ScriptedDevice {
        sample_rate,
        tap: Arc::clone(&handle.tap),
        stops: Arc::clone(&handle.stops),
        fail_with: None,
    };
    (Box::new(device), handle)
}

impl CaptureDevice for ScriptedDevice {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start(&mut self, tap: CaptureTap) -> Result<(), CaptureError> {
        if let Some(err) = self.fail_with.take() {
            return Err(err);
        }
        *self.tap.lock().unwrap() = Some(tap);
        Ok(())
    }

    fn stop(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.tap.lock().unwrap().take();
    }
}

#[derive(Default)]
struct Channel {
    refuse: AtomicBool,
    sent: Mutex<Vec<String>>,
}

impl Channel {
    fn refusing() -> Arc<Self> {
        let channel = Self::default();
        channel.refuse.store(true, Ordering::SeqCst);
        Arc::new(channel)
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

impl MessageChannel for Channel {
    fn send(&self, payload: &str) -> bool {
        if self.refuse.load(Ordering::SeqCst) {
            return false;
        }
        self.sent.lock().unwrap().push(payload.to_string());
        true
    }
}

#[derive(Default)]
struct CountingView {
    frames: AtomicUsize,
    last_len: AtomicUsize,
}

impl WaveformView for CountingView {
    fn render(&self, samples: &[f32]) {
        self.frames.fetch_add(1, Ordering::SeqCst);
        self.last_len.store(samples.len(), Ordering::SeqCst);
    }
}

fn decoded_len(payload: &str) -> usize {
    let value: serde_json::Value = serde_json::from_str(payload).unwrap();
    assert_eq!(value["type"], "audio");
    assert_eq!(value["sampleRate"], 16_000);
    base64::engine::general_purpose::STANDARD
        .decode(value["data"].as_str().unwrap())
        .unwrap()
        .len()
}

#[tokio::test(start_paused = true)]
async fn batches_are_downsampled_and_sent() {
    let (dev, handle) = device(48_000);
    let primary = Arc::new(Channel::default());
    let session = CaptureSession::start(
        dev,
        primary.clone(),
        None,
        CaptureOptions::default(),
        None,
    );
    assert_eq!(session.current_status(), CaptureStatus::Listening);
    assert!(session.is_running());

    // Let the first (immediate) tick pass with nothing queued
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(primary.sent().is_empty());

    handle.feed(&[0.1; 2880]);
    tokio::time::sleep(Duration::from_millis(60)).await;

    let sent = primary.sent();
    assert_eq!(sent.len(), 1);
    // 2880 samples at 48 kHz → 960 at 16 kHz → 1920 bytes
    assert_eq!(decoded_len(&sent[0]), 1920);

    // Nothing new captured, nothing sent
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(primary.sent().len(), 1);
    assert_eq!(session.stats().batches_sent.load(Ordering::Relaxed), 1);
}

#[tokio::test(start_paused = true)]
async fn fallback_takes_batches_primary_refuses() {
    let (dev, handle) = device(16_000);
    let primary = Channel::refusing();
    let fallback = Arc::new(Channel::default());
    let session = CaptureSession::start(
        dev,
        primary.clone(),
        Some(fallback.clone()),
        CaptureOptions::default(),
        None,
    );

    tokio::time::sleep(Duration::from_millis(10)).await;
    handle.feed(&[0.2; 960]);
    tokio::time::sleep(Duration::from_millis(60)).await;

    assert!(primary.sent().is_empty());
    let sent = fallback.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(decoded_len(&sent[0]), 1920);
    assert_eq!(session.stats().batches_sent.load(Ordering::Relaxed), 1);
}

#[tokio::test(start_paused = true)]
async fn undeliverable_batches_are_dropped_not_requeued() {
    let (dev, handle) = device(16_000);
    let primary = Channel::refusing();
    let session = CaptureSession::start(
        dev,
        primary.clone(),
        None,
        CaptureOptions::default(),
        None,
    );

    tokio::time::sleep(Duration::from_millis(10)).await;
    handle.feed(&[0.2; 480]);
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(session.stats().batches_dropped.load(Ordering::Relaxed), 1);

    primary.refuse.store(false, Ordering::SeqCst);
    handle.feed(&[0.2; 160]);
    tokio::time::sleep(Duration::from_millis(60)).await;

    let sent = primary.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(decoded_len(&sent[0]), 320);
}

#[tokio::test(start_paused = true)]
async fn close_is_idempotent() {
    let (dev, handle) = device(48_000);
    let primary = Arc::new(Channel::default());
    let session = CaptureSession::start(
        dev,
        primary.clone(),
        None,
        CaptureOptions::default(),
        None,
    );

    session.close();
    session.close();
    assert_eq!(handle.stops(), 1);
    assert_eq!(session.current_status(), CaptureStatus::Closed);
    assert!(!session.is_running());

    drop(session);
    assert_eq!(handle.stops(), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(primary.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn denied_device_reports_status() {
    let handle = DeviceHandle::default();
    let dev = ScriptedDevice {
        sample_rate: 48_000,
        tap: Arc::clone(&handle.tap),
        stops: Arc::clone(&handle.stops),
        fail_with: Some(CaptureError::PermissionDenied),
    };
    let primary = Arc::new(Channel::default());
    let session = CaptureSession::start(
        Box::new(dev),
        primary.clone(),
        None,
        CaptureOptions::default(),
        None,
    );

    assert_eq!(session.current_status().to_string(), "Microphone access denied");
    assert!(!session.is_running());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(primary.sent().is_empty());
    assert_eq!(handle.stops(), 0);
}

#[tokio::test(start_paused = true)]
async fn view_gets_frames_and_speech_is_flagged() {
    let (dev, handle) = device(48_000);
    let view = Arc::new(CountingView::default());
    let options = CaptureOptions {
        scope_size: 1024,
        ..CaptureOptions::default()
    };
    let session = CaptureSession::start(
        dev,
        Arc::new(Channel::default()),
        None,
        options,
        Some(view.clone()),
    );
    let mut status = session.status();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(view.frames.load(Ordering::SeqCst) >= 5);
    assert_eq!(view.last_len.load(Ordering::SeqCst), 1024);
    assert_eq!(*status.borrow_and_update(), CaptureStatus::Listening);

    handle.feed(&[0.5; 1024]);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(*status.borrow_and_update(), CaptureStatus::SpeechStarted);
}
