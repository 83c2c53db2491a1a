//! Turning a [`PuppetConfig`] into component options.

use std::time::Duration;

use puppetconf::PuppetConfig;
use puppetproto::{ReconnectPolicy, TransportConfig};
use puppetstage::{CaptureOptions, PlaybackOptions};

pub fn reconnect_policy(config: &PuppetConfig) -> ReconnectPolicy {
    ReconnectPolicy::from_millis(
        config.transport.reconnect_delay_ms,
        config.transport.reconnect_max_ms,
    )
}

fn transport(config: &PuppetConfig, name: &str, url: &str) -> TransportConfig {
    let transport = TransportConfig::new(name, url).with_reconnect(reconnect_policy(config));
    match config.transport.keepalive_secs {
        0 => transport,
        secs => transport.with_keepalive(Duration::from_secs(secs)),
    }
}

/// The conversation backend's event socket.
pub fn server_transport(config: &PuppetConfig) -> TransportConfig {
    transport(config, "server", &config.transport.server_url)
}

/// The VAD socket, if one is configured.
pub fn vad_transport(config: &PuppetConfig) -> Option<TransportConfig> {
    let url = config.transport.vad_url.trim();
    (!url.is_empty()).then(|| transport(config, "vad", url))
}

/// The runtime bridge socket, if one is configured.
pub fn bridge_transport(config: &PuppetConfig) -> Option<TransportConfig> {
    let url = config.target.bridge_url.trim();
    (!url.is_empty()).then(|| transport(config, "bridge", url))
}

pub fn playback_options(config: &PuppetConfig) -> PlaybackOptions {
    PlaybackOptions {
        latency_ms: config.playback.latency_ms,
        frame_ms: config.playback.frame_ms.max(1),
        max_attempts: config.playback.max_attempts.max(1),
        ready_timeout: Duration::from_millis(config.target.ready_timeout_ms),
    }
}

pub fn capture_options(config: &PuppetConfig) -> CaptureOptions {
    CaptureOptions {
        send_interval: Duration::from_millis(config.capture.send_interval_ms.max(1)),
        target_rate: config.capture.target_rate,
        scope_size: config.capture.scope_size,
        ..CaptureOptions::default()
    }
}
