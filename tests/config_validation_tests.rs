//! Config Validation Tests
//!
//! Loads hestia.toml fixtures from temp dirs and asserts the startup
//! validation contract: bad endpoint schemes, out-of-range coordinates,
//! and empty tokens are rejected before any I/O; defaults fill gaps;
//! environment variables override the file.

use hestia::config::AppConfig;
use std::io::Write;

fn write_config(dir: &std::path::Path, body: &str) {
    let mut file = std::fs::File::create(dir.join("hestia.toml")).unwrap();
    file.write_all(body.as_bytes()).unwrap();
}

const VALID: &str = r#"
[hub]
url = "ws://ha.local:8123/api/websocket"
token = "long-lived-token"

[weather]
api_key = "owm-key"
latitude = 51.5074
longitude = -0.1278

[influxdb]
url = "http://influx.local:8086"
token = "influx-token"
org = "home"
bucket = "events"
"#;

#[test]
fn valid_config_loads_with_defaults() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), VALID);

    let config = AppConfig::load(dir.path()).unwrap();
    assert_eq!(config.hub.url, "ws://ha.local:8123/api/websocket");
    assert_eq!(config.hub.reconnect_delay_secs, 5);
    assert_eq!(config.hub.watchdog_secs, 60);
    assert_eq!(config.influxdb.batch_size, 500);
    assert_eq!(config.influxdb.flush_interval_ms, 1000);
    assert_eq!(config.weather.cache_ttl_secs, 300);
    assert_eq!(config.scheduler.detection_interval_secs, 6 * 3600);
    assert_eq!(config.hub.effective_rest_url(), "http://ha.local:8123");
}

#[test]
fn missing_file_falls_back_to_defaults_and_fails_validation() {
    // Defaults have no hub URL or tokens: validation must reject before
    // startup rather than letting the session loop spin on nothing.
    let dir = tempfile::tempdir().unwrap();
    let err = AppConfig::load(dir.path()).unwrap_err();
    assert!(err.to_string().contains("hub.url"));
}

#[test]
fn http_scheme_for_hub_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_config(
        dir.path(),
        &VALID.replace("ws://ha.local:8123/api/websocket", "http://ha.local:8123"),
    );
    let err = AppConfig::load(dir.path()).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("hub.url"), "{message}");
    assert!(message.contains("ws://"), "{message}");
}

#[test]
fn out_of_range_coordinates_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), &VALID.replace("51.5074", "123.0"));
    let err = AppConfig::load(dir.path()).unwrap_err();
    assert!(err.to_string().contains("latitude"));
}

#[test]
fn empty_tokens_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), &VALID.replace("long-lived-token", " "));
    let err = AppConfig::load(dir.path()).unwrap_err();
    assert!(err.to_string().contains("hub.token"));
}

#[test]
fn malformed_toml_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), "[hub\nurl = broken");
    let err = AppConfig::load(dir.path()).unwrap_err();
    assert!(err.to_string().contains("parse"));
}

#[test]
fn unknown_keys_do_not_break_loading() {
    // Typos warn (with a suggestion) but never fail an otherwise valid
    // config.
    let dir = tempfile::tempdir().unwrap();
    write_config(
        dir.path(),
        &format!("{VALID}\n[hub_extra]\nwatchdog_sec = 90\n"),
    );
    assert!(AppConfig::load(dir.path()).is_ok());
}
