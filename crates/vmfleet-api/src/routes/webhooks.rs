//! GitHub webhook endpoint.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::Router;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, info, warn};
use vmfleet_scheduler::{WorkflowJobEvent, apply_event};

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new().route("/github", post(github_webhook))
}

/// Handle a GitHub webhook delivery.
async fn github_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<&'static str, ApiError> {
    let signature = headers
        .get("X-Hub-Signature-256")
        .and_then(|v| v.to_str().ok());

    if !verify_github_signature(&state.webhook_secret, &body, signature) {
        warn!("Invalid webhook signature");
        return Err(ApiError::Unauthorized(
            "Signatures didn't match!".to_string(),
        ));
    }

    let event_type = headers
        .get("X-GitHub-Event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");

    let payload: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON: {}", e)))?;

    match event_type {
        "ping" | "installation" | "github_app_authorization" => {
            debug!(event = %event_type, "Ignoring GitHub event");
            Ok("")
        }
        "workflow_job" => {
            let event = WorkflowJobEvent::from_github_payload(&payload).ok_or_else(|| {
                ApiError::BadRequest("Malformed workflow_job payload".to_string())
            })?;

            let outcome = apply_event(&state.coordinator, &event, Utc::now());
            info!(
                action = ?event.action,
                repository = %event.repository,
                queued = outcome.queued,
                updated = outcome.updated,
                expired = outcome.expired,
                "Processed workflow_job event"
            );
            Ok("Accepted")
        }
        other => Err(ApiError::BadRequest(format!(
            "Unsupported event \"{}\"!",
            other
        ))),
    }
}

/// Check a `sha256=<hex>` signature against the HMAC of `body`.
fn verify_github_signature(secret: &str, body: &[u8], signature: Option<&str>) -> bool {
    let Some(signature) = signature else {
        return false;
    };

    let Some(sig_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let Ok(sig_bytes) = hex::decode(sig_hex) else {
        return false;
    };

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);

    mac.verify_slice(&sig_bytes).is_ok()
}
