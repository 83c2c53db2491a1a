//! Inbound event routing.
//!
//! Transport listeners only forward raw payloads into a channel; the
//! [`Router`] task parses them and drives the [`Stage`]. Each `ai_response`
//! runs in its own task so a slow audio fetch never holds up the next event,
//! and a newer response aborts the older one before it starts.

use std::sync::Arc;

use puppetproto::{AiResponse, InboundEvent, Incoming};
use puppetstage::{
    CaptionTrack, CommandSink, PlaybackOptions, StageClock, TimelineExecutor, VoicePlayer,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::fetch::AudioSource;

/// Everything the character does in response to events, on one clock.
pub struct Stage {
    sink: CommandSink,
    player: VoicePlayer,
    timeline: TimelineExecutor,
    captions: CaptionTrack,
    audio: Option<Arc<dyn AudioSource>>,
    playback: PlaybackOptions,
    text_mode: bool,
}

impl Stage {
    pub fn new(sink: CommandSink, clock: StageClock, playback: PlaybackOptions) -> Self {
        Self {
            player: VoicePlayer::new(sink.clone(), clock),
            timeline: TimelineExecutor::new(sink.clone(), clock),
            captions: CaptionTrack::new(sink.clone(), clock),
            sink,
            audio: None,
            playback,
            text_mode: false,
        }
    }

    pub fn with_audio(mut self, audio: Arc<dyn AudioSource>) -> Self {
        self.audio = Some(audio);
        self
    }

    /// Never fetch or play voice, whatever the backend sends.
    pub fn with_text_mode(mut self, text_mode: bool) -> Self {
        self.text_mode = text_mode;
        self
    }

    pub fn sink(&self) -> &CommandSink {
        &self.sink
    }

    /// Cancel everything still pending from earlier responses.
    pub fn preempt(&self) {
        self.player.stop();
        self.timeline.clear();
        self.captions.clear();
    }

    /// Voice, timeline and captions for one `ai_response`.
    ///
    /// With voice, the timeline and captions start at the voice's planned
    /// start; without it (text mode, no id, fetch failure) they start now.
    pub async fn respond(&self, response: AiResponse) {
        if let Some(text) = &response.response {
            info!(response = %text, "ai response");
        }
        self.sink.clear_text_boxes();

        let mut start_at = None;
        let wants_voice = !self.text_mode && !response.is_text_mode();

        if let (true, Some(audio_id), Some(audio)) =
            (wants_voice, response.audio_id.as_deref(), &self.audio)
        {
            match audio.fetch(audio_id).await {
                Ok(bytes) => {
                    let report = self.player.play(&bytes, &self.playback).await;
                    if !report.scheduled {
                        return;
                    }
                    start_at = Some(report.planned_start);
                }
                Err(e) => warn!(audio_id, error = %e, "voice fetch failed, running without audio"),
            }
        }

        if let Some(timeline) = &response.timeline {
            self.timeline.execute(timeline, start_at);
        }

        let cues = response.captions();
        if !cues.is_empty() {
            self.captions.show(&cues, start_at);
        }
    }

    /// The backend's VAD saw the user stop talking.
    pub fn speech_ended(&self, duration: Option<f64>, timeline: Option<&Value>) {
        info!(duration = ?duration, "speech ended");
        if let Some(timeline) = timeline {
            self.timeline.execute(timeline, None);
        }
    }
}

pub struct Router {
    stage: Arc<Stage>,
    current: Option<JoinHandle<()>>,
}

impl Router {
    pub fn new(stage: Arc<Stage>) -> Self {
        Self {
            stage,
            current: None,
        }
    }

    /// Route one raw payload. Must be called within a tokio runtime.
    pub fn dispatch(&mut self, raw: &str) {
        match Incoming::parse(raw) {
            Incoming::Event(InboundEvent::AiResponse(response)) => {
                if let Some(previous) = self.current.take() {
                    previous.abort();
                }
                self.stage.preempt();
                let stage = Arc::clone(&self.stage);
                self.current = Some(tokio::spawn(async move {
                    stage.respond(response).await;
                }));
            }
            Incoming::Event(InboundEvent::SpeechStarted) => info!("speech started"),
            Incoming::Event(InboundEvent::SpeechEnded { duration, timeline }) => {
                self.stage.speech_ended(duration, timeline.as_ref());
            }
            Incoming::Event(InboundEvent::UserMessage { text }) => {
                info!(text = %text, "user message")
            }
            Incoming::Unrecognized(value) => debug!(%value, "ignoring unrecognized event"),
            Incoming::Opaque(raw) => debug!(len = raw.len(), "ignoring non-JSON message"),
        }
    }

    /// Route until the channel closes or `shutdown` fires.
    pub async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<String>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                raw = rx.recv() => match raw {
                    Some(raw) => self.dispatch(&raw),
                    None => break,
                },
            }
        }

        if let Some(current) = self.current.take() {
            current.abort();
        }
        self.stage.preempt();
        debug!("router stopped");
    }
}
