//! Configuration loader and validator for the Intercom→Telegram relay.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub telegram: Telegram,
    #[serde(default)]
    pub intercom: Intercom,
    #[serde(default)]
    pub delivery: Delivery,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

/// Destination group settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Telegram {
    pub bot_token: String,
    pub group_id: i64,
    /// Forum topic inside the group; `None` posts to the general thread.
    #[serde(default)]
    pub thread_id: Option<i32>,
}

/// Source platform settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Intercom {
    /// Client secret used to sign webhooks. Unset disables verification.
    #[serde(default)]
    pub webhook_secret: Option<String>,
    /// Prefix for deep links; the conversation id is appended.
    #[serde(default)]
    pub inbox_url: Option<String>,
}

/// Delivery queue and retention knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Delivery {
    pub max_retries: u32,
    pub inter_message_delay_ms: u64,
    pub tick_interval_ms: u64,
    pub retention_days: u32,
    pub sweep_interval_secs: u64,
}

impl Default for Delivery {
    fn default() -> Self {
        Self {
            max_retries: 3,
            inter_message_delay_ms: 1000,
            tick_interval_ms: 1000,
            retention_days: 7,
            sweep_interval_secs: 24 * 60 * 60,
        }
    }
}

impl Delivery {
    pub fn inter_message_delay(&self) -> Duration {
        Duration::from_millis(self.inter_message_delay_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// SQLite URL for the dedup store, honouring `DATABASE_URL`.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/relaybot.db", self.app.data_dir))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
            if !token.trim().is_empty() {
                self.telegram.bot_token = token;
            }
        }
        if let Ok(secret) = std::env::var("INTERCOM_WEBHOOK_SECRET") {
            if !secret.trim().is_empty() {
                self.intercom.webhook_secret = Some(secret);
            }
        }
    }
}

/// Load configuration from a YAML file, apply environment overrides and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    cfg.apply_env_overrides();
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.listen_addr.trim().is_empty() {
        return Err(ConfigError::Invalid("app.listen_addr must be non-empty"));
    }

    if cfg.telegram.bot_token.trim().is_empty() {
        return Err(ConfigError::Invalid("telegram.bot_token must be non-empty"));
    }
    if cfg.telegram.group_id == 0 {
        return Err(ConfigError::Invalid("telegram.group_id must be set"));
    }
    if matches!(cfg.telegram.thread_id, Some(id) if id <= 0) {
        return Err(ConfigError::Invalid("telegram.thread_id must be positive"));
    }

    if matches!(&cfg.intercom.webhook_secret, Some(s) if s.trim().is_empty()) {
        return Err(ConfigError::Invalid(
            "intercom.webhook_secret must be non-empty when present",
        ));
    }

    let d = &cfg.delivery;
    if d.max_retries == 0 {
        return Err(ConfigError::Invalid("delivery.max_retries must be > 0"));
    }
    if d.inter_message_delay_ms == 0 {
        return Err(ConfigError::Invalid(
            "delivery.inter_message_delay_ms must be > 0",
        ));
    }
    if d.tick_interval_ms == 0 {
        return Err(ConfigError::Invalid("delivery.tick_interval_ms must be > 0"));
    }
    if d.retention_days == 0 {
        return Err(ConfigError::Invalid("delivery.retention_days must be > 0"));
    }
    if d.sweep_interval_secs == 0 {
        return Err(ConfigError::Invalid("delivery.sweep_interval_secs must be > 0"));
    }

    Ok(())
}

/// Returns a complete example configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  listen_addr: "0.0.0.0:8080"

telegram:
  bot_token: "YOUR_TELEGRAM_BOT_TOKEN"
  group_id: -1001234567890
  # thread_id: 42

intercom:
  webhook_secret: "YOUR_INTERCOM_CLIENT_SECRET"
  inbox_url: "https://app.intercom.com/a/inbox/APP_ID/inbox/conversation/"

delivery:
  max_retries: 3
  inter_message_delay_ms: 1000
  tick_interval_ms: 1000
  retention_days: 7
  sweep_interval_secs: 86400
"#
}
