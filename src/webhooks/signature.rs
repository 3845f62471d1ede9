//! `Stripe-Signature` verification: `t=<unix>,v1=<hex hmac-sha256("t.body")>`.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::errors::ServiceError;

type HmacSha256 = Hmac<Sha256>;

/// Accepted clock skew for timestamps from the future (seconds)
const FUTURE_SKEW_SECS: i64 = 60;

/// Verifies deliveries for one webhook endpoint against its signing secret.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance_secs: i64,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish_non_exhaustive()
    }
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>, tolerance_secs: u64) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs: i64::try_from(tolerance_secs).unwrap_or(i64::MAX),
        }
    }

    pub fn verify(&self, payload: &[u8], header: &str) -> Result<(), ServiceError> {
        self.verify_at(payload, header, chrono::Utc::now().timestamp())
    }

    /// Verifies `header` for `payload` as if the current time were `now`.
    pub fn verify_at(&self, payload: &[u8], header: &str, now: i64) -> Result<(), ServiceError> {
        if self.secret.is_empty() {
            return Err(ServiceError::InvalidSignature(
                "Webhook secret is not configured".to_string(),
            ));
        }

        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            let part = part.trim();
            if let Some(t) = part.strip_prefix("t=") {
                timestamp = Some(t);
            } else if let Some(s) = part.strip_prefix("v1=") {
                signatures.push(s);
            }
        }

        let timestamp_str = timestamp.ok_or_else(|| {
            ServiceError::InvalidSignature("Missing timestamp in signature header".to_string())
        })?;
        if signatures.is_empty() {
            return Err(ServiceError::InvalidSignature(
                "Missing v1 signature in signature header".to_string(),
            ));
        }

        let timestamp: i64 = timestamp_str.parse().map_err(|_| {
            ServiceError::InvalidSignature("Invalid timestamp in signature header".to_string())
        })?;

        let age = now - timestamp;
        if age > self.tolerance_secs {
            warn!(age, max = self.tolerance_secs, "Webhook timestamp too old");
            return Err(ServiceError::InvalidSignature(
                "Timestamp outside the tolerance zone".to_string(),
            ));
        }
        if age < -FUTURE_SKEW_SECS {
            warn!(age, "Webhook timestamp in the future");
            return Err(ServiceError::InvalidSignature(
                "Timestamp outside the tolerance zone".to_string(),
            ));
        }

        let expected = compute_signature(&self.secret, timestamp_str, payload)?;
        let expected = expected.as_bytes();

        // Length is not secret: always 64 hex chars.
        let matched = signatures
            .iter()
            .any(|s| s.len() == expected.len() && bool::from(s.as_bytes().ct_eq(expected)));

        if matched {
            Ok(())
        } else {
            Err(ServiceError::InvalidSignature(
                "No signature matches the payload".to_string(),
            ))
        }
    }
}

/// Hex HMAC-SHA256 of `"{timestamp}.{payload}"`.
pub fn compute_signature(
    secret: &str,
    timestamp: &str,
    payload: &[u8],
) -> Result<String, ServiceError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| ServiceError::InternalError("Invalid webhook secret".to_string()))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Builds a `Stripe-Signature` header value for `payload`.
pub fn signature_header(
    secret: &str,
    timestamp: i64,
    payload: &[u8],
) -> Result<String, ServiceError> {
    let signature = compute_signature(secret, &timestamp.to_string(), payload)?;
    Ok(format!("t={},v1={}", timestamp, signature))
}
