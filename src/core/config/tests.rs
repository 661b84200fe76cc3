use super::data::{AppSettings, Config};
use super::defaults::{DEFAULT_HISTORY_LIMIT, DEFAULT_MODEL, DEFAULT_SERVER_URL};
use super::io::ConfigError;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn missing_config_file_loads_defaults() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config = Config::load_from_path(&temp_dir.path().join("absent.toml")).expect("load");
    assert_eq!(config, Config::default());

    let settings = config.to_settings();
    assert_eq!(settings.server_url, DEFAULT_SERVER_URL);
    assert_eq!(settings.model, DEFAULT_MODEL);
    assert!(settings.system_prompt.is_empty());
    assert_eq!(settings.history_limit, Some(DEFAULT_HISTORY_LIMIT));
}

#[test]
fn save_and_reload_round_trips() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("nested").join("config.toml");

    let config = Config {
        server_url: Some("http://localhost:9000/v1".to_string()),
        model: Some("permissive".to_string()),
        temperature: Some(1.2),
        max_tokens: Some(256),
        system_prompt: Some("Be brief.".to_string()),
        history_limit: Some(20),
        request_timeout_secs: Some(30),
        database_path: Some(PathBuf::from("/tmp/threads.sqlite3")),
    };
    config.save_to_path(&config_path).expect("save");

    let loaded = Config::load_from_path(&config_path).expect("load");
    assert_eq!(loaded, config);
}

#[test]
fn invalid_toml_reports_parse_error_with_path() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("config.toml");
    std::fs::write(&config_path, "model = [unterminated").unwrap();

    let err = Config::load_from_path(&config_path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().contains("Failed to parse config"));
}

#[test]
fn set_value_validates_temperature_range() {
    let mut config = Config::default();
    config.set_value("temperature", "0.3").expect("valid");
    assert_eq!(config.temperature, Some(0.3));

    let err = config.set_value("temperature", "2.5").unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { .. }));
    assert!(config.set_value("temperature", "warm").is_err());
    assert_eq!(config.temperature, Some(0.3));
}

#[test]
fn set_and_unset_cover_every_key() {
    let mut config = Config::default();
    for (key, value) in [
        ("server-url", "http://example.com"),
        ("model", "m"),
        ("temperature", "1"),
        ("max-tokens", "10"),
        ("system-prompt", "hi"),
        ("history-limit", "4"),
        ("request-timeout", "9"),
        ("database-path", "/tmp/db"),
    ] {
        config.set_value(key, value).expect(key);
    }
    for key in super::defaults::CONFIG_KEYS {
        config.unset_value(key).expect(key);
    }
    assert_eq!(config, Config::default());

    assert!(matches!(
        config.set_value("theme", "dark"),
        Err(ConfigError::UnknownKey(_))
    ));
}

#[test]
fn env_overrides_replace_file_values_when_non_blank() {
    let mut config = Config {
        server_url: Some("http://file".to_string()),
        model: Some("file-model".to_string()),
        ..Default::default()
    };
    config.apply_overrides(Some("http://env".to_string()), Some("  ".to_string()));
    assert_eq!(config.server_url.as_deref(), Some("http://env"));
    assert_eq!(config.model.as_deref(), Some("file-model"));
}

#[test]
fn settings_clamp_temperature_and_treat_zero_history_limit_as_unlimited() {
    let settings = Config {
        temperature: Some(5.0),
        history_limit: Some(0),
        ..Default::default()
    }
    .to_settings();
    assert_eq!(settings.clamped_temperature(), 2.0);
    assert_eq!(settings.history_limit, None);

    let negative = AppSettings {
        temperature: -1.0,
        ..AppSettings::default()
    };
    assert_eq!(negative.clamped_temperature(), 0.0);
}

#[test]
fn explicit_database_path_wins() {
    let config = Config {
        database_path: Some(PathBuf::from("/var/tmp/custom.sqlite3")),
        ..Default::default()
    };
    assert_eq!(
        config.database_path().expect("path"),
        PathBuf::from("/var/tmp/custom.sqlite3")
    );
}
