//! Integration tests for configuration and session persistence.
//!
//! Each test points `GTO_CONFIG_DIR` at a fresh temp directory and runs in
//! test mode, so credentials go to `credentials.json` instead of the keyring.

use std::env;
use std::fs;
use std::sync::{Mutex, MutexGuard};

use gto::Config;
use tempfile::TempDir;

// Global lock to prevent env var pollution between tests
static ENV_LOCK: Mutex<()> = Mutex::new(());

fn setup_test_env() -> (TempDir, MutexGuard<'static, ()>) {
    let guard = ENV_LOCK
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let temp_dir = TempDir::new().unwrap();

    env::remove_var("GTO_API_URL");
    env::remove_var("GTO_WS_URL");
    env::set_var("GTO_ENV", "test");
    env::set_var("GTO_CONFIG_DIR", temp_dir.path());

    (temp_dir, guard)
}

#[test]
fn test_load_without_file_uses_defaults() {
    let (_dir, _guard) = setup_test_env();

    let config = Config::load().unwrap();
    assert_eq!(config.api_url, "https://api.gto.rakaoran.dev");
    assert_eq!(config.ws_url, "wss://api.gto.rakaoran.dev");
    assert_eq!(config.username, None);
    assert!(!config.has_session());
}

#[test]
fn test_save_and_reload() {
    let (dir, _guard) = setup_test_env();

    let mut config = Config::load().unwrap();
    config.api_url = "http://localhost:5000".to_string();
    config.ws_url = "ws://localhost:5000".to_string();
    config.username = Some("alice".to_string());
    config.save().unwrap();

    let written = fs::read_to_string(dir.path().join("config.json")).unwrap();
    assert!(written.contains("alice"));

    let reloaded = Config::load().unwrap();
    assert_eq!(reloaded.api_url, "http://localhost:5000");
    assert_eq!(reloaded.username.as_deref(), Some("alice"));
}

#[test]
fn test_api_url_override_derives_socket_url() {
    let (_dir, _guard) = setup_test_env();
    env::set_var("GTO_API_URL", "https://staging.example.com");

    let config = Config::load().unwrap();
    assert_eq!(config.api_url, "https://staging.example.com");
    assert_eq!(config.ws_url, "wss://staging.example.com");

    env::set_var("GTO_WS_URL", "ws://127.0.0.1:9000");
    let config = Config::load().unwrap();
    assert_eq!(config.ws_url, "ws://127.0.0.1:9000");

    env::remove_var("GTO_API_URL");
    env::remove_var("GTO_WS_URL");
}

#[test]
fn test_session_is_stored_outside_config_file() {
    let (dir, _guard) = setup_test_env();

    let mut config = Config::load().unwrap();
    config.save_session("secret.jwt").unwrap();
    config.save().unwrap();

    let written = fs::read_to_string(dir.path().join("config.json")).unwrap();
    assert!(!written.contains("secret.jwt"));
    assert!(dir.path().join("credentials.json").exists());

    let reloaded = Config::load().unwrap();
    assert_eq!(reloaded.session.as_deref(), Some("secret.jwt"));

    let mut reloaded = reloaded;
    reloaded.clear_session().unwrap();
    assert!(!Config::load().unwrap().has_session());
}

#[test]
fn test_corrupt_config_file_is_an_error() {
    let (dir, _guard) = setup_test_env();
    fs::write(dir.path().join("config.json"), "{ not json").unwrap();

    let err = Config::load().unwrap_err();
    assert!(format!("{err:#}").contains("config.json"));
}
