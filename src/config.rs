use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{AppError, AppResult};
use crate::security::InputValidator;

const APP_DIR_NAME: &str = "Wardrobe Uploader";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub log_level: String,
    pub event_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000".to_string(),
            request_timeout_secs: 60,
            log_level: "info".to_string(),
            event_buffer: 64,
        }
    }
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn log_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

pub fn get_config_directory() -> AppResult<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| AppError::Config("Could not find config directory".to_string()))?
        .join(APP_DIR_NAME);

    fs::create_dir_all(&config_dir)?;
    Ok(config_dir)
}

fn get_config_path() -> AppResult<PathBuf> {
    Ok(get_config_directory()?.join("config.json"))
}

pub fn load_config() -> AppResult<Config> {
    load_config_from(&get_config_path()?)
}

pub fn load_config_from(config_path: &Path) -> AppResult<Config> {
    if config_path.exists() {
        let config_str = fs::read_to_string(config_path)?;
        let config: Config = serde_json::from_str(&config_str).unwrap_or_else(|e| {
            log::warn!("Failed to parse config file: {}. Using defaults.", e);
            Config::default()
        });

        validate_config(&config)?;

        Ok(config)
    } else {
        let default_config = Config::default();
        save_config_to(config_path, &default_config)?;
        Ok(default_config)
    }
}

pub fn save_config_to(config_path: &Path, config: &Config) -> AppResult<()> {
    validate_config(config)?;

    if config_path.exists() {
        let backup_path = config_path.with_extension("json.bak");
        if let Err(e) = fs::copy(config_path, &backup_path) {
            log::warn!("Failed to create config backup: {}", e);
        }
    }

    let config_str = serde_json::to_string_pretty(config)?;
    fs::write(config_path, config_str)?;

    log::info!("Configuration saved to {}", config_path.display());
    Ok(())
}

pub fn validate_config(config: &Config) -> AppResult<()> {
    InputValidator::validate_base_url(&config.api_base_url)?;

    if config.request_timeout_secs == 0 || config.request_timeout_secs > 600 {
        return Err(AppError::validation("request_timeout_secs", "Must be between 1 and 600"));
    }

    if config.event_buffer == 0 || config.event_buffer > 4096 {
        return Err(AppError::validation("event_buffer", "Must be between 1 and 4096"));
    }

    let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
    if !valid_log_levels.contains(&config.log_level.as_str()) {
        return Err(AppError::validation("log_level", "Must be a valid log level"));
    }

    Ok(())
}

pub fn reset_config() -> AppResult<Config> {
    reset_config_at(&get_config_path()?)
}

pub fn reset_config_at(config_path: &Path) -> AppResult<Config> {
    if config_path.exists() {
        let backup_path = config_path.with_extension("json.reset_backup");
        fs::copy(config_path, &backup_path)?;
        log::info!("Existing config backed up to {}", backup_path.display());
    }

    let default_config = Config::default();
    save_config_to(config_path, &default_config)?;

    log::info!("Configuration reset to defaults");
    Ok(default_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = load_config_from(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());
    }

    #[test]
    fn test_unparseable_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_config_keeps_defaults_for_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"api_base_url": "https://wardrobe.example.com"}"#).unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.api_base_url, "https://wardrobe.example.com");
        assert_eq!(config.request_timeout_secs, 60);
    }

    #[test]
    fn test_save_creates_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        save_config_to(&path, &Config::default()).unwrap();
        let mut changed = Config::default();
        changed.log_level = "debug".to_string();
        save_config_to(&path, &changed).unwrap();

        assert!(path.with_extension("json.bak").exists());
        assert_eq!(load_config_from(&path).unwrap().log_level, "debug");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = Config::default();
        config.request_timeout_secs = 0;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.log_level = "loud".to_string();
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.api_base_url = "localhost".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_reset_restores_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut changed = Config::default();
        changed.event_buffer = 8;
        save_config_to(&path, &changed).unwrap();

        let config = reset_config_at(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.with_extension("json.reset_backup").exists());
    }

    #[test]
    fn test_log_filter_parses_level() {
        let mut config = Config::default();
        config.log_level = "debug".to_string();
        assert_eq!(config.log_filter(), log::LevelFilter::Debug);
    }
}
