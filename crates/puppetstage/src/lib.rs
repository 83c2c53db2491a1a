//! Puppetstage: the time-sensitive half of Puppetry
//!
//! Everything here runs against one [`StageClock`] so that a voice's planned
//! start means the same instant to the timeline and caption tracks:
//!
//! - **Playback** ([`VoicePlayer`]): decode, envelope, push, then schedule
//!   `PlayVoiceFromJS` and per-frame mouth volume
//! - **Timeline** ([`TimelineExecutor`]): expressions and triggers at offsets,
//!   with strict preemption by the next timeline
//! - **Captions** ([`CaptionTrack`]): text boxes back to back
//! - **Capture** ([`CaptureSession`]): microphone to 16 kHz PCM16 batches over
//!   a [`puppetproto::MessageChannel`]
//!
//! Commands reach the character runtime through a [`CommandSink`] wrapping
//! any [`CommandTarget`].

pub mod captions;
pub mod capture;
pub mod clock;
pub mod decode;
pub mod envelope;
pub mod playback;
pub mod schedule;
pub mod sink;
pub mod timeline;

pub use captions::CaptionTrack;
pub use capture::{
    CaptureDevice, CaptureError, CaptureOptions, CaptureSession, CaptureStats, CaptureStatus,
    CaptureTap, WaveformView,
};
pub use clock::StageClock;
pub use decode::{DecodeError, DecodedAudio, DecodedVoice};
pub use playback::{PlaybackOptions, PlaybackReport, VoicePlayer};
pub use schedule::Scheduler;
pub use sink::{CommandSink, CommandTarget, RecordingTarget, SentCommand, TargetError};
pub use timeline::{
    TimelineCompletion, TimelineEntry, TimelineExecutor, TimelineOutcome, TimelineState,
};

#[cfg(feature = "cpal-input")]
pub use capture::CpalInput;
