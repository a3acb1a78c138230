//! Configuration loading for Rotocast.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Get the Rotocast home directory (~/.rotocast).
///
/// Overridable through ROTOCAST_HOME so tests and side-by-side installs
/// don't share state.
pub fn get_home_dir() -> Result<PathBuf> {
    if let Ok(raw) = std::env::var("ROTOCAST_HOME") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }

    let home = directories::UserDirs::new()
        .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;

    Ok(home.home_dir().join(".rotocast"))
}

/// Get the settings file path.
pub fn get_settings_path() -> Result<PathBuf> {
    Ok(get_home_dir()?.join("settings.json"))
}

/// Get the groups catalog file path.
pub fn get_groups_path() -> Result<PathBuf> {
    Ok(get_home_dir()?.join("groups.json"))
}

/// Get the SQLite database path.
pub fn get_db_path() -> Result<PathBuf> {
    Ok(get_home_dir()?.join("messages.db"))
}

/// Load settings from ~/.rotocast/settings.json
pub fn load_settings() -> Result<Settings> {
    let path = get_settings_path()?;

    if !path.exists() {
        return Err(Error::Config(format!(
            "Settings file not found at {}. Run 'rotocast setup' first.",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(&path)?;
    let settings: Settings = serde_json::from_str(&content)?;

    validate_settings(&settings)?;

    tracing::debug!("Loaded settings from {}", path.display());
    Ok(settings)
}

fn validate_settings(settings: &Settings) -> Result<()> {
    if settings.scheduler.tick_seconds == 0 {
        return Err(Error::Config(
            "scheduler.tick_seconds must be positive".to_string(),
        ));
    }
    for channel in &settings.channels.enabled {
        match channel.as_str() {
            "console" | "telegram" => {}
            other => {
                return Err(Error::Config(format!(
                    "channels.enabled contains unknown channel '{}'",
                    other
                )));
            }
        }
    }
    if settings.channels.enabled.iter().any(|c| c == "telegram")
        && settings.channels.telegram.bot_token.is_none()
    {
        return Err(Error::Config(
            "telegram channel enabled but channels.telegram.bot_token is not set".to_string(),
        ));
    }
    Ok(())
}

/// Save settings to ~/.rotocast/settings.json
pub fn save_settings(settings: &Settings) -> Result<()> {
    let path = get_settings_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, serde_json::to_string_pretty(settings)?)?;
    tracing::debug!("Saved settings to {}", path.display());
    Ok(())
}

/// Telegram channel configuration.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    #[serde(default)]
    pub chat_ids: Vec<i64>,
}

/// Channels configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Channels {
    #[serde(default = "default_enabled_channels")]
    pub enabled: Vec<String>,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

fn default_enabled_channels() -> Vec<String> {
    vec!["console".to_string()]
}

impl Default for Channels {
    fn default() -> Self {
        Self {
            enabled: default_enabled_channels(),
            telegram: TelegramConfig::default(),
        }
    }
}

/// Scheduler configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SchedulerConfig {
    /// Seconds between scheduler ticks. One minute is the scheduling
    /// resolution; lower values only make sense in tests.
    #[serde(default = "default_tick_seconds")]
    pub tick_seconds: u64,
}

fn default_tick_seconds() -> u64 {
    60
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_seconds: default_tick_seconds(),
        }
    }
}

/// Rotocast settings.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Settings {
    #[serde(default)]
    pub channels: Channels,

    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_validate() {
        let settings = Settings::default();
        assert!(validate_settings(&settings).is_ok());
        assert_eq!(settings.scheduler.tick_seconds, 60);
        assert_eq!(settings.channels.enabled, vec!["console".to_string()]);
    }

    #[test]
    fn telegram_without_token_rejected() {
        let mut settings = Settings::default();
        settings.channels.enabled = vec!["telegram".to_string()];
        assert!(validate_settings(&settings).is_err());

        settings.channels.telegram.bot_token = Some("123:abc".to_string());
        assert!(validate_settings(&settings).is_ok());
    }

    #[test]
    fn unknown_channel_rejected() {
        let mut settings = Settings::default();
        settings.channels.enabled = vec!["irc".to_string()];
        assert!(validate_settings(&settings).is_err());
    }
}
