//! Loading from an explicit config path.

use std::io::Write;

use puppetconf::PuppetConfig;

#[test]
fn cli_path_overrides_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[playback]
latency_ms = 180
max_attempts = 2

[capture]
send_interval_ms = 40
"#
    )
    .unwrap();

    let (config, sources) = PuppetConfig::load_with_sources_from(Some(file.path())).unwrap();

    assert_eq!(config.playback.latency_ms, 180);
    assert_eq!(config.playback.max_attempts, 2);
    assert_eq!(config.playback.frame_ms, 50);
    assert_eq!(config.capture.send_interval_ms, 40);
    assert!(sources.files.iter().any(|p| p == file.path()));
}

#[test]
fn unreadable_toml_is_reported() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[playback\nlatency_ms = ").unwrap();

    let err = PuppetConfig::load_from(Some(file.path())).unwrap_err();
    assert!(matches!(err, puppetconf::ConfigError::Parse { .. }));
}
