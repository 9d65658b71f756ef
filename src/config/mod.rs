//! Instance configuration.
//!
//! Configuration lives in the `config` table of the database as string
//! key/value pairs and is loaded into a typed [`Config`] at startup. The
//! key set is closed: writes to unknown keys or unparseable values are
//! rejected at the edge, so a loaded `Config` is always well-formed.
//!
//! Keys:
//! - `webhook_url` - Endpoint for run status notifications; unset disables delivery
//! - `webhook_secret` - Shared secret for the delivery signature
//! - `application_id` - Application identifier echoed in webhook bodies
//! - `app_installation_id` - Installation identifier echoed in webhook bodies
//! - `recent_visit_retention_days` - Pruning window for recent visits (default 30)
//! - `action_log_enabled` - Whether commands are appended to the action log (default true)

use crate::storage::Storage;
use crate::{Error, Result};

/// Default retention window for recent-visit pruning.
pub const DEFAULT_VISIT_RETENTION_DAYS: i64 = 30;

/// All recognized configuration keys.
pub const KEYS: &[&str] = &[
    "webhook_url",
    "webhook_secret",
    "application_id",
    "app_installation_id",
    "recent_visit_retention_days",
    "action_log_enabled",
];

/// Typed view of the config table.
#[derive(Debug, Clone)]
pub struct Config {
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub application_id: Option<String>,
    pub app_installation_id: Option<String>,
    pub recent_visit_retention_days: i64,
    pub action_log_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            webhook_url: None,
            webhook_secret: None,
            application_id: None,
            app_installation_id: None,
            recent_visit_retention_days: DEFAULT_VISIT_RETENTION_DAYS,
            action_log_enabled: true,
        }
    }
}

impl Config {
    /// Load configuration from storage, falling back to defaults for
    /// unset keys.
    pub fn load(storage: &Storage) -> Result<Self> {
        let mut config = Self::default();
        config.webhook_url = storage.get_config("webhook_url")?;
        config.webhook_secret = storage.get_config("webhook_secret")?;
        config.application_id = storage.get_config("application_id")?;
        config.app_installation_id = storage.get_config("app_installation_id")?;
        if let Some(days) = storage.get_config("recent_visit_retention_days")? {
            config.recent_visit_retention_days = parse_days(&days)?;
        }
        if let Some(enabled) = storage.get_config("action_log_enabled")? {
            config.action_log_enabled = parse_bool(&enabled)?;
        }
        Ok(config)
    }

    /// Validate a key/value pair before it is written.
    pub fn validate(key: &str, value: &str) -> Result<()> {
        match key {
            "webhook_url" => {
                if !value.starts_with("http://") && !value.starts_with("https://") {
                    return Err(Error::InvalidInput(format!(
                        "webhook_url must be an http(s) URL, got {:?}",
                        value
                    )));
                }
                Ok(())
            }
            "recent_visit_retention_days" => parse_days(value).map(|_| ()),
            "action_log_enabled" => parse_bool(value).map(|_| ()),
            "webhook_secret" | "application_id" | "app_installation_id" => Ok(()),
            _ => Err(Error::InvalidInput(format!(
                "Unknown config key: {} (recognized: {})",
                key,
                KEYS.join(", ")
            ))),
        }
    }
}

fn parse_days(value: &str) -> Result<i64> {
    let days: i64 = value
        .parse()
        .map_err(|_| Error::InvalidInput(format!("Not a number of days: {:?}", value)))?;
    if days < 1 {
        return Err(Error::InvalidInput(
            "recent_visit_retention_days must be at least 1".to_string(),
        ));
    }
    Ok(days)
}

fn parse_bool(value: &str) -> Result<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(Error::InvalidInput(format!(
            "Expected true or false, got {:?}",
            value
        ))),
    }
}
