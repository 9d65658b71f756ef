//! Webhook delivery for run status changes.
//!
//! Delivery is best-effort: a missing endpoint is a no-op and a transport
//! failure is reported on stderr but never fails the caller. Consumers
//! that need certainty poll run status instead.

use crate::config::Config;
use crate::models::run::Run;
use crate::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Header carrying the request signature.
pub const SIGNATURE_HEADER: &str = "X-Lodestar-Signature";

/// Request body for a run status notification.
#[derive(Debug, Serialize)]
struct RunStatusPayload<'a> {
    workspace_id: &'a str,
    application_id: Option<&'a str>,
    app_installation_id: Option<&'a str>,
    status: String,
}

/// Hex SHA-256 over the shared secret concatenated with the body bytes.
pub fn sign(secret: &str, body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(body.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Notify the configured endpoint of a run's current status.
pub fn notify_run_status(config: &Config, run: &Run) -> Result<()> {
    let Some(url) = &config.webhook_url else {
        return Ok(());
    };

    let payload = RunStatusPayload {
        workspace_id: &run.workspace_id,
        application_id: config.application_id.as_deref(),
        app_installation_id: config.app_installation_id.as_deref(),
        status: run.status.to_string(),
    };
    let body = serde_json::to_string(&payload)?;

    let mut request = ureq::post(url).set("Content-Type", "application/json");
    if let Some(secret) = &config.webhook_secret {
        request = request.set(SIGNATURE_HEADER, &sign(secret, &body));
    }

    if let Err(e) = request.send_string(&body) {
        eprintln!("Webhook delivery to {} failed: {}", url, e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::run::RunStatus;

    #[test]
    fn test_sign_is_stable() {
        let a = sign("secret", r#"{"status":"completed"}"#);
        let b = sign("secret", r#"{"status":"completed"}"#);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));

        // Either input changing changes the signature.
        assert_ne!(a, sign("other", r#"{"status":"completed"}"#));
        assert_ne!(a, sign("secret", r#"{"status":"failed"}"#));
    }

    #[test]
    fn test_no_endpoint_is_noop() {
        let run = Run::new(
            "r-1".to_string(),
            "w-1".to_string(),
            "agent".to_string(),
            "u-1".to_string(),
        );
        notify_run_status(&Config::default(), &run).unwrap();
    }

    #[test]
    fn test_payload_shape() {
        let mut run = Run::new(
            "r-1".to_string(),
            "w-1".to_string(),
            "agent".to_string(),
            "u-1".to_string(),
        );
        run.status = RunStatus::Completed;

        let payload = RunStatusPayload {
            workspace_id: &run.workspace_id,
            application_id: Some("app-1"),
            app_installation_id: None,
            status: run.status.to_string(),
        };
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&payload).unwrap()).unwrap();
        assert_eq!(json["workspace_id"], "w-1");
        assert_eq!(json["application_id"], "app-1");
        assert_eq!(json["app_installation_id"], serde_json::Value::Null);
        assert_eq!(json["status"], "completed");
    }
}
