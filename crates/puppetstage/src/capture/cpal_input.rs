//! Default microphone through cpal
//!
//! cpal streams aren't `Send`, so the stream lives on its own thread for its
//! whole life. `start` waits for that thread to report whether the stream
//! came up, so open failures surface as a [`CaptureError`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{debug, error, info};

use super::{CaptureDevice, CaptureError, CaptureTap};

pub struct CpalInput {
    device_name: Option<String>,
    sample_rate: u32,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

/// Hints that a backend error means the OS refused microphone access.
const DENIED_HINTS: &[&str] = &["permission", "denied", "not permitted", "unauthorized"];

/// cpal has no dedicated access-denied error; backends report it as free text,
/// so this is best-effort.
fn backend_error(err: &cpal::BackendSpecificError) -> CaptureError {
    let lower = err.description.to_lowercase();
    if DENIED_HINTS.iter().any(|hint| lower.contains(hint)) {
        CaptureError::PermissionDenied
    } else {
        CaptureError::Device(err.description.clone())
    }
}

fn config_error(err: cpal::DefaultStreamConfigError) -> CaptureError {
    match err {
        cpal::DefaultStreamConfigError::DeviceNotAvailable => CaptureError::NoDevice,
        cpal::DefaultStreamConfigError::BackendSpecific { err } => backend_error(&err),
        other => CaptureError::Device(other.to_string()),
    }
}

fn find_device(name: Option<&str>) -> Result<cpal::Device, CaptureError> {
    let host = cpal::default_host();
    match name {
        None => host.default_input_device().ok_or(CaptureError::NoDevice),
        Some(name) => host
            .input_devices()
            .map_err(|e| CaptureError::Device(e.to_string()))?
            .find(|d| d.name().map(|n| n.contains(name)).unwrap_or(false))
            .ok_or(CaptureError::NoDevice),
    }
}

impl CpalInput {
    /// Probe the default input device (or the first whose name contains
    /// `device_name`).
    pub fn open(device_name: Option<&str>) -> Result<Self, CaptureError> {
        let device = find_device(device_name)?;
        let config = device.default_input_config().map_err(config_error)?;

        info!(
            "Using input device {:?} at {}Hz, {}ch",
            device.name().ok(),
            config.sample_rate().0,
            config.channels()
        );

        Ok(Self {
            device_name: device_name.map(str::to_string),
            sample_rate: config.sample_rate().0,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        })
    }
}

impl CaptureDevice for CpalInput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start(&mut self, tap: CaptureTap) -> Result<(), CaptureError> {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), CaptureError>>();
        let running = Arc::clone(&self.running);
        running.store(true, Ordering::SeqCst);
        let device_name = self.device_name.clone();

        let handle = thread::Builder::new()
            .name("puppetry-mic".to_string())
            .spawn(move || run_stream(device_name, tap, running, ready_tx))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.thread_handle = Some(handle);
                Ok(())
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                Err(CaptureError::Device("capture thread exited".to_string()))
            }
        }
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_stream(
    device_name: Option<String>,
    mut tap: CaptureTap,
    running: Arc<AtomicBool>,
    ready_tx: mpsc::Sender<Result<(), CaptureError>>,
) {
    let stream = match build_stream(device_name.as_deref(), move |mono| {
        tap.push(mono);
    }) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let e = match e {
            cpal::PlayStreamError::DeviceNotAvailable => CaptureError::NoDevice,
            cpal::PlayStreamError::BackendSpecific { err } => backend_error(&err),
        };
        let _ = ready_tx.send(Err(e));
        return;
    }
    let _ = ready_tx.send(Ok(()));
    debug!("cpal input stream playing");

    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(20));
    }

    drop(stream);
    debug!("cpal input stream stopped");
}

/// Build an input stream that hands each callback's first channel to `sink`.
fn build_stream<F>(device_name: Option<&str>, mut sink: F) -> Result<cpal::Stream, CaptureError>
where
    F: FnMut(&[f32]) + Send + 'static,
{
    let device = find_device(device_name)?;
    let supported = device.default_input_config().map_err(config_error)?;
    let channels = supported.channels().max(1) as usize;
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();

    let on_error = |e: cpal::StreamError| error!("Input stream error: {}", e);
    let mut mono: Vec<f32> = Vec::new();

    let stream = match sample_format {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                mono.clear();
                mono.extend(data.iter().step_by(channels).copied());
                sink(&mono);
            },
            on_error,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                mono.clear();
                mono.extend(
                    data.iter()
                        .step_by(channels)
                        .map(|&s| s as f32 / 32768.0),
                );
                sink(&mono);
            },
            on_error,
            None,
        ),
        other => {
            return Err(CaptureError::Device(format!(
                "unsupported sample format {:?}",
                other
            )))
        }
    };

    stream.map_err(|e| match e {
        cpal::BuildStreamError::DeviceNotAvailable => CaptureError::NoDevice,
        cpal::BuildStreamError::BackendSpecific { err } => backend_error(&err),
        other => CaptureError::Device(other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureStatus;

    fn backend(description: &str) -> cpal::BackendSpecificError {
        cpal::BackendSpecificError {
            description: description.to_string(),
        }
    }

    #[test]
    fn access_refusals_become_permission_denied() {
        for description in [
            "ALSA function 'snd_pcm_open' failed with error 'EACCES: Permission denied'",
            "Operation not permitted",
            "Microphone access unauthorized",
        ] {
            assert!(
                matches!(backend_error(&backend(description)), CaptureError::PermissionDenied),
                "{}",
                description
            );
        }
    }

    #[test]
    fn other_backend_errors_stay_device_errors() {
        let e = backend_error(&backend("device busy"));
        assert!(matches!(e, CaptureError::Device(ref d) if d == "device busy"));
    }

    #[test]
    fn denied_config_reports_access_denied_status() {
        let e = config_error(cpal::DefaultStreamConfigError::BackendSpecific {
            err: backend("Permission denied"),
        });
        assert_eq!(
            CaptureStatus::from(&e).to_string(),
            "Microphone access denied"
        );
        assert!(matches!(
            config_error(cpal::DefaultStreamConfigError::DeviceNotAvailable),
            CaptureError::NoDevice
        ));
    }
}
