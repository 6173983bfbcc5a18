use super::settings::Settings;
use super::*;
use serial_test::serial;
use std::env;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.broker.host, "127.0.0.1");
    assert_eq!(settings.broker.port, 5672);
    assert_eq!(settings.broker.heartbeat_secs, 60);
    assert_eq!(settings.broker.exchange, "vehicle.exchange");
    assert!(!settings.retry.enabled);
    assert_eq!(settings.log.level, "info");
    assert_eq!(settings.broker.endpoint(), "127.0.0.1:5672");
}

#[test]
fn test_empty_partial_yields_defaults() {
    let merged = PartialSettings::default().merge_over(Settings::default());
    assert_eq!(merged, Settings::default());
}

#[test]
#[serial]
fn load_config_from_file_overrides_defaults() {
    // load_config reads config/default.toml relative to the working directory
    let tmp = TempDir::new().expect("create tempdir");
    let orig = env::current_dir().expect("current_dir");
    env::set_current_dir(tmp.path()).expect("set current dir");

    fs::create_dir_all("config").expect("create config dir");
    let toml = r#"
        [broker]
        host = "10.0.0.5"
        port = 5673
        username = "backend"
        heartbeat_secs = 30

        [retry]
        enabled = true
        max_attempts = 3
    "#;
    fs::write("config/default.toml", toml).expect("write config file");

    let cfg = load_config();
    env::set_current_dir(orig).expect("restore cwd");
    let cfg = cfg.expect("load_config failed");

    assert_eq!(cfg.broker.host, "10.0.0.5");
    assert_eq!(cfg.broker.port, 5673);
    assert_eq!(cfg.broker.username, "backend");
    assert_eq!(cfg.broker.heartbeat_secs, 30);
    // untouched keys keep their defaults
    assert_eq!(cfg.broker.password, "guest");
    assert_eq!(cfg.broker.exchange, "vehicle.exchange");
    assert!(cfg.retry.enabled);
    assert_eq!(cfg.retry.max_attempts, 3);
    assert_eq!(cfg.retry.max_backoff_ms, 30_000);
}

#[test]
#[serial]
fn load_config_from_environment() {
    temp_env::with_vars(
        [
            ("FLEETLINK_BROKER__HOST", Some("broker.internal")),
            ("FLEETLINK_BROKER__PASSWORD", Some("s3cret")),
            ("FLEETLINK_LOG__LEVEL", Some("debug")),
        ],
        || {
            let cfg = load_config().expect("load_config failed");
            assert_eq!(cfg.broker.host, "broker.internal");
            assert_eq!(cfg.broker.password, "s3cret");
            assert_eq!(cfg.log.level, "debug");
            assert_eq!(cfg.broker.port, 5672);
        },
    );
}
