//! Process wiring shared by `run` and `say`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use puppetconf::PuppetConfig;
use puppetproto::{EventTransport, MessageChannel, Outbound, ResponseMode, Subscription};
use puppetstage::sink::background_sprite;
use puppetstage::{CaptureSession, CommandSink, CommandTarget, StageClock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bridge::{BridgeTarget, LogTarget};
use crate::fetch::AudioFetcher;
use crate::router::{Router, Stage};
use crate::settings;

#[derive(Debug, Clone, Default)]
pub struct AppOptions {
    /// Stream the microphone (if built with `mic` and enabled in config)
    pub mic: bool,
    /// Never fetch or play voice
    pub text_mode: bool,
    /// Background label to show once the runtime is up
    pub background: Option<String>,
}

pub struct App {
    server: EventTransport,
    vad: Option<EventTransport>,
    bridge: Option<EventTransport>,
    capture: Option<CaptureSession>,
    subscriptions: Vec<Subscription>,
    router: JoinHandle<()>,
    status_task: Option<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl App {
    pub async fn start(config: &PuppetConfig, options: AppOptions) -> Result<Self> {
        let clock = StageClock::new();
        let shutdown = CancellationToken::new();

        // --- Runtime bridge ---
        let bridge = settings::bridge_transport(config)
            .map(EventTransport::new)
            .transpose()
            .context("Invalid bridge url")?;
        let target: Arc<dyn CommandTarget> = match &bridge {
            Some(transport) => {
                transport.connect();
                info!("Runtime bridge: {}", transport.url());
                Arc::new(BridgeTarget::new(transport.clone()))
            }
            None => {
                info!("No runtime bridge configured, logging commands");
                Arc::new(LogTarget)
            }
        };
        let sink = CommandSink::new(target)
            .with_objects(&config.target.input_object, &config.target.background_object);

        let ready_timeout = Duration::from_millis(config.target.ready_timeout_ms);
        if sink.wait_until_ready(ready_timeout).await {
            info!("Runtime ready");
        } else {
            warn!(
                "Runtime not ready after {} ms, continuing",
                config.target.ready_timeout_ms
            );
        }

        if let Some(label) = &options.background {
            match background_sprite(label) {
                Some(sprite) => {
                    sink.set_background(sprite);
                }
                None => warn!("Unknown background {:?}", label),
            }
        }

        // --- Stage ---
        let fetch_timeout = Duration::from_millis(config.backend.fetch_timeout_ms);
        let fetcher = AudioFetcher::new(&config.backend.http_url, fetch_timeout)
            .context("Failed to set up audio fetcher")?;
        let stage = Arc::new(
            Stage::new(sink, clock, settings::playback_options(config))
                .with_audio(Arc::new(fetcher))
                .with_text_mode(options.text_mode),
        );

        // --- Event transports ---
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        let mut subscriptions = Vec::new();

        let server = EventTransport::new(settings::server_transport(config))
            .context("Invalid server url")?;
        let server_tx = tx.clone();
        subscriptions.push(server.on_message(move |raw| {
            let _ = server_tx.send(raw.to_string());
        }));
        server.connect();
        info!("Event server: {}", server.url());

        let vad = settings::vad_transport(config)
            .map(EventTransport::new)
            .transpose()
            .context("Invalid VAD url")?;
        if let Some(vad) = &vad {
            let vad_tx = tx.clone();
            subscriptions.push(vad.on_message(move |raw| {
                let _ = vad_tx.send(raw.to_string());
            }));
            vad.connect();
            info!("VAD server: {}", vad.url());
        }
        drop(tx);

        let router = tokio::spawn(Router::new(Arc::clone(&stage)).run(rx, shutdown.clone()));

        // --- Microphone ---
        let (capture, status_task) = if options.mic && config.capture.enabled {
            // Audio goes to the VAD socket when there is one, the event socket otherwise
            let server_channel: Arc<dyn MessageChannel> = Arc::new(server.clone());
            let (primary, fallback) = match &vad {
                Some(vad) => {
                    let vad_channel: Arc<dyn MessageChannel> = Arc::new(vad.clone());
                    (vad_channel, Some(server_channel))
                }
                None => (server_channel, None),
            };
            match start_capture(config, primary, fallback) {
                Some(session) => {
                    let task = watch_status(&session, shutdown.clone());
                    (Some(session), Some(task))
                }
                None => (None, None),
            }
        } else {
            (None, None)
        };

        Ok(Self {
            server,
            vad,
            bridge,
            capture,
            subscriptions,
            router,
            status_task,
            shutdown,
        })
    }

    pub fn server(&self) -> &EventTransport {
        &self.server
    }

    /// Wait for the event socket to open, up to `timeout`.
    pub async fn wait_for_server(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.server.is_open() {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        true
    }

    /// Send one user text message.
    pub fn send_text(&self, text: &str, mode: Option<ResponseMode>) -> Result<bool> {
        let payload = Outbound::text(text, mode)
            .to_json()
            .context("Failed to encode text message")?;
        Ok(self.server.send(&payload))
    }

    /// Stop routing, close the microphone and every socket.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Some(capture) = &self.capture {
            capture.close();
        }
        if let Some(task) = self.status_task {
            let _ = task.await;
        }
        for subscription in self.subscriptions {
            subscription.unsubscribe();
        }
        if let Err(e) = self.router.await {
            warn!("Router task ended abnormally: {}", e);
        }
        self.server.close();
        if let Some(vad) = &self.vad {
            vad.close();
        }
        if let Some(bridge) = &self.bridge {
            bridge.close();
        }
        info!("Shut down");
    }
}

fn watch_status(session: &CaptureSession, shutdown: CancellationToken) -> JoinHandle<()> {
    let mut status = session.status();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let line = status.borrow_and_update().to_string();
                    if !line.is_empty() {
                        info!("🎤 {}", line);
                    }
                }
            }
        }
    })
}

#[cfg(feature = "mic")]
fn start_capture(
    config: &PuppetConfig,
    primary: Arc<dyn MessageChannel>,
    fallback: Option<Arc<dyn MessageChannel>>,
) -> Option<CaptureSession> {
    use puppetstage::{CaptureStatus, CpalInput};

    let device = match CpalInput::open(None) {
        Ok(device) => device,
        Err(e) => {
            warn!("🎤 {}", CaptureStatus::from(&e));
            return None;
        }
    };
    let session = CaptureSession::start(
        Box::new(device),
        primary,
        fallback,
        settings::capture_options(config),
        None,
    );
    info!("🎤 {}", session.current_status());
    Some(session)
}

#[cfg(not(feature = "mic"))]
fn start_capture(
    _config: &PuppetConfig,
    _primary: Arc<dyn MessageChannel>,
    _fallback: Option<Arc<dyn MessageChannel>>,
) -> Option<CaptureSession> {
    warn!("Built without the `mic` feature, not capturing");
    None
}
