use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    errors::ServiceError,
    webhooks::{ParsedEvent, WebhookEndpoint},
    AppState,
};

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Creates the router for the gateway webhook endpoints
pub fn webhook_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/connect", post(connect_webhook))
        .route("/payments", post(payments_webhook))
        .route("/refunds", post(refunds_webhook))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookAck {
    pub received: bool,
}

// POST /api/webhooks/connect
async fn connect_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    handle_delivery(&state, WebhookEndpoint::Connect, &headers, &body).await
}

// POST /api/webhooks/payments
async fn payments_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    handle_delivery(&state, WebhookEndpoint::Payments, &headers, &body).await
}

// POST /api/webhooks/refunds
async fn refunds_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    handle_delivery(&state, WebhookEndpoint::Refunds, &headers, &body).await
}

/// Verify, parse once, reconcile. The signature is checked against the raw
/// bytes before anything is parsed or stored.
async fn handle_delivery(
    state: &AppState,
    endpoint: WebhookEndpoint,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<(StatusCode, Json<WebhookAck>), ServiceError> {
    let endpoint_label = endpoint.as_str();

    let verified = headers
        .get(SIGNATURE_HEADER)
        .ok_or_else(|| ServiceError::InvalidSignature("Missing Stripe-Signature header".to_string()))
        .and_then(|value| {
            value.to_str().map_err(|_| {
                ServiceError::InvalidSignature("Unreadable Stripe-Signature header".to_string())
            })
        })
        .and_then(|signature| {
            state
                .services
                .webhook_verifiers
                .for_endpoint(endpoint)
                .verify(body, signature)
        });
    if let Err(e) = verified {
        warn!(endpoint = endpoint_label, error = %e, "Webhook signature verification failed");
        counter!("thrift_market_webhooks.rejected", 1, "endpoint" => endpoint_label);
        return Err(e);
    }

    let parsed = ParsedEvent::parse(body)?;
    let event_id = parsed.id.clone();

    match state.services.reconciler.reconcile(endpoint, parsed).await {
        Ok(outcome) => {
            counter!(
                "thrift_market_webhooks.processed",
                1,
                "endpoint" => endpoint_label,
                "outcome" => outcome.as_str()
            );
            info!(endpoint = endpoint_label, event_id = %event_id, outcome = outcome.as_str(), "Webhook processed");
            Ok((StatusCode::OK, Json(WebhookAck { received: true })))
        }
        Err(e) => {
            counter!("thrift_market_webhooks.failed", 1, "endpoint" => endpoint_label);
            warn!(endpoint = endpoint_label, event_id = %event_id, error = %e, "Webhook processing failed");
            Err(e)
        }
    }
}
