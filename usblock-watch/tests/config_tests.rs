use pretty_assertions::assert_eq;
use std::path::PathBuf;
use std::time::Duration;
use usblock_watch::{
    WatchConfig, WatchError, DEFAULT_LICENSE_FILE_NAME, DEFAULT_MAX_CONCURRENT_CHECKS,
    DEFAULT_SETTLE_DELAY_MS, PUBLIC_KEY_FILE_NAME,
};

#[test]
fn defaults() {
    let config = WatchConfig::default();
    assert_eq!(config.license_file_name, DEFAULT_LICENSE_FILE_NAME);
    assert_eq!(config.settle_delay(), Duration::from_millis(DEFAULT_SETTLE_DELAY_MS));
    assert_eq!(config.settle_delay(), Duration::from_millis(1500));
    assert_eq!(config.max_concurrent_checks, DEFAULT_MAX_CONCURRENT_CHECKS);
    assert!(config.public_key_path.ends_with(PUBLIC_KEY_FILE_NAME));
    assert!(config.validate().is_ok());
}

#[test]
fn empty_toml_is_all_defaults() {
    assert_eq!(WatchConfig::from_toml_str("").unwrap(), WatchConfig::default());
}

#[test]
fn partial_toml_overrides_named_fields() {
    let config = WatchConfig::from_toml_str(
        r#"
public_key_path = "/opt/usblock/public_key.pem"
settle_delay_ms = 2500
max_concurrent_checks = 2
"#,
    )
    .unwrap();
    assert_eq!(config.public_key_path, PathBuf::from("/opt/usblock/public_key.pem"));
    assert_eq!(config.settle_delay(), Duration::from_millis(2500));
    assert_eq!(config.max_concurrent_checks, 2);
    assert_eq!(config.license_file_name, DEFAULT_LICENSE_FILE_NAME);
}

#[test]
fn zero_concurrency_rejected() {
    let err = WatchConfig::from_toml_str("max_concurrent_checks = 0").unwrap_err();
    assert!(matches!(err, WatchError::Config(_)));
}

#[test]
fn absolute_license_path_rejected() {
    let err = WatchConfig::from_toml_str(r#"license_file_name = "/etc/license.json""#).unwrap_err();
    assert!(matches!(err, WatchError::Config(_)));
}

#[test]
fn wrong_type_rejected() {
    let err = WatchConfig::from_toml_str(r#"settle_delay_ms = "soon""#).unwrap_err();
    assert!(format!("{err}").contains("invalid configuration"));
}

#[test]
fn load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("agent.toml");
    std::fs::write(&path, "poll_interval_ms = 250\n").unwrap();
    let config = WatchConfig::load(&path).unwrap();
    assert_eq!(config.poll_interval(), Duration::from_millis(250));
}

#[test]
fn load_missing_file_is_config_error() {
    let err = WatchConfig::load(std::path::Path::new("/nonexistent/agent.toml")).unwrap_err();
    assert!(matches!(err, WatchError::Config(_)));
}
