//! Action logging for Lodestar commands.
//!
//! Every CLI invocation is appended as one JSON line to `action.log` in
//! the data directory, recording what ran, with which arguments, whether
//! it succeeded, and how long it took.

use crate::storage::Storage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// Name of the log file under the data directory.
const LOG_FILE: &str = "action.log";

/// A single action log entry.
#[derive(Debug, Serialize, Deserialize)]
pub struct ActionLog {
    /// When the command ran
    pub timestamp: DateTime<Utc>,

    /// Command name (e.g., "entity move", "run activity")
    pub command: String,

    /// Command arguments as JSON
    pub args: serde_json::Value,

    /// Whether the command succeeded
    pub success: bool,

    /// Error message if the command failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Command execution duration in milliseconds
    pub duration_ms: u64,

    /// User who executed the command
    pub user: String,
}

/// Log an action to the data directory's log file.
///
/// Logging never fails a command: when the log cannot be written the
/// problem is reported on stderr and the command result stands.
pub fn log_action(
    data_dir: &Path,
    command: &str,
    args: serde_json::Value,
    success: bool,
    error: Option<String>,
    duration_ms: u64,
) {
    let enabled = match Storage::open(data_dir) {
        Ok(storage) => match storage.get_config("action_log_enabled") {
            Ok(Some(value)) => value == "true",
            _ => true,
        },
        // Pre-init commands (system init itself) are still logged.
        Err(_) => true,
    };
    if !enabled {
        return;
    }

    let entry = ActionLog {
        timestamp: Utc::now(),
        command: command.to_string(),
        args: sanitize_args(&args),
        success,
        error,
        duration_ms,
        user: current_user(),
    };

    if let Err(e) = write_entry(data_dir, &entry) {
        eprintln!("Warning: Failed to write action log: {}", e);
    }
}

fn write_entry(data_dir: &Path, entry: &ActionLog) -> crate::Result<()> {
    std::fs::create_dir_all(data_dir)?;
    let json = serde_json::to_string(entry)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(data_dir.join(LOG_FILE))?;
    writeln!(file, "{}", json)?;
    Ok(())
}

/// Redact values under secret-bearing keys and truncate oversized strings.
fn sanitize_args(args: &serde_json::Value) -> serde_json::Value {
    match args {
        serde_json::Value::Object(map) => {
            let mut sanitized = serde_json::Map::new();
            for (key, value) in map {
                let key_lower = key.to_lowercase();
                if key_lower.contains("secret")
                    || key_lower.contains("token")
                    || key_lower.contains("password")
                {
                    sanitized.insert(
                        key.clone(),
                        serde_json::Value::String("[REDACTED]".to_string()),
                    );
                } else {
                    sanitized.insert(key.clone(), sanitize_args(value));
                }
            }
            serde_json::Value::Object(sanitized)
        }
        serde_json::Value::Array(arr) => {
            serde_json::Value::Array(arr.iter().map(sanitize_args).collect())
        }
        serde_json::Value::String(s) if s.len() > 200 => {
            serde_json::Value::String(format!("{}... ({} chars)", &s[..197], s.len()))
        }
        _ => args.clone(),
    }
}

fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}
