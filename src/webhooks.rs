use axum::{
    body::Bytes,
    extract::Extension,
    http::HeaderMap,
    Json,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{error, warn};

use crate::billing::{BillingService, GatewayEvent, IgnoreReason, WebhookOutcome};
use crate::error::{AppError, AppResult};

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Checks `sha256=<hex>` against HMAC-SHA256 of the raw body in constant time.
pub fn verify_signature(secret: &str, body: &[u8], header: Option<&str>) -> bool {
    let Some(provided) = header.map(str::trim) else {
        return false;
    };
    let hex_digest = provided.strip_prefix("sha256=").unwrap_or(provided);
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// key: gateway-webhook -> acknowledge every delivery the gateway can retry
///
/// Only a failed signature (401) or an unavailable store (500) produce a non-2xx response.
pub async fn gateway_webhook(
    Extension(billing): Extension<BillingService>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<WebhookOutcome>> {
    if let Some(secret) = billing.settings().webhook_secret.as_deref() {
        let header = headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok());
        if !verify_signature(secret, &body, header) {
            warn!("rejected gateway webhook with invalid signature");
            return Err(AppError::Unauthorized);
        }
    }

    let event: GatewayEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(err) => {
            warn!(?err, bytes = body.len(), "malformed gateway webhook payload");
            return Ok(Json(WebhookOutcome::Ignored(IgnoreReason::MalformedPayload)));
        }
    };

    let outcome = billing.lifecycle().apply(event).await.map_err(|err| {
        error!(?err, "failed to apply gateway webhook");
        AppError::Internal(err)
    })?;
    Ok(Json(outcome))
}
