//! Remailer configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{RemailerError, Result};

/// Root configuration, loaded from ~/.remailer/config.toml.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RemailerConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    "~/.remailer/remailer.db".into()
}

impl RemailerConfig {
    /// Load config from the default path, falling back to defaults when the
    /// file does not exist.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RemailerError::config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| RemailerError::config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::default_path();
        self.save_to(&path)?;
        Ok(path)
    }

    /// Save config to a specific path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| RemailerError::config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Remailer home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".remailer")
    }

    /// Process-wide default Telegram chat id, if configured and non-empty.
    pub fn default_chat_id(&self) -> Option<&str> {
        let id = self.telegram.default_chat_id.as_str();
        (!id.is_empty()).then_some(id)
    }
}

/// Tick loop and schedule-policy defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Polling period of the tick loop, in seconds.
    #[serde(default = "default_tick_seconds")]
    pub tick_seconds: u64,
    /// Default minimum re-dispatch interval for new schedules.
    #[serde(default = "default_interval_seconds")]
    pub default_interval_seconds: u32,
    /// Default per-minute dispatch cap for new schedules.
    #[serde(default = "default_max_per_minute")]
    pub default_max_per_minute: u32,
}

fn default_tick_seconds() -> u64 {
    30
}
fn default_interval_seconds() -> u32 {
    60
}
fn default_max_per_minute() -> u32 {
    30
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_seconds: default_tick_seconds(),
            default_interval_seconds: default_interval_seconds(),
            default_max_per_minute: default_max_per_minute(),
        }
    }
}

/// SMTP sender configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_from_address")]
    pub from_address: String,
    #[serde(default)]
    pub from_name: Option<String>,
}

fn default_smtp_port() -> u16 {
    587
}
fn default_from_address() -> String {
    "robot@example.com".into()
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: String::new(),
            smtp_port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            from_address: default_from_address(),
            from_name: None,
        }
    }
}

/// Telegram Bot API sender configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Fallback chat id for messages without a per-message chat id.
    #[serde(default)]
    pub default_chat_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RemailerConfig::default();
        assert_eq!(config.scheduler.tick_seconds, 30);
        assert_eq!(config.scheduler.default_interval_seconds, 60);
        assert_eq!(config.scheduler.default_max_per_minute, 30);
        assert_eq!(config.email.smtp_port, 587);
        assert!(config.default_chat_id().is_none());
    }

    #[test]
    fn test_save_and_reload() {
        let path = std::env::temp_dir().join(format!("remailer-config-{}.toml", std::process::id()));
        let mut config = RemailerConfig::default();
        config.scheduler.tick_seconds = 7;
        config.save_to(&path).unwrap();

        let loaded = RemailerConfig::load_from(&path).unwrap();
        assert_eq!(loaded.scheduler.tick_seconds, 7);
        assert_eq!(loaded.email.smtp_port, 587);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: RemailerConfig = toml::from_str(
            r#"
            [scheduler]
            tick_seconds = 5

            [telegram]
            bot_token = "123:abc"
            default_chat_id = "-100200"
            "#,
        )
        .unwrap();
        assert_eq!(config.scheduler.tick_seconds, 5);
        // Unspecified fields keep their defaults.
        assert_eq!(config.scheduler.default_max_per_minute, 30);
        assert_eq!(config.default_chat_id(), Some("-100200"));
    }
}
