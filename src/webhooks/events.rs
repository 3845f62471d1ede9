use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;

use crate::errors::ServiceError;

/// The three signed webhook endpoints, each with its own secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookEndpoint {
    Connect,
    Payments,
    Refunds,
}

impl WebhookEndpoint {
    pub fn as_str(self) -> &'static str {
        match self {
            WebhookEndpoint::Connect => "connect",
            WebhookEndpoint::Payments => "payments",
            WebhookEndpoint::Refunds => "refunds",
        }
    }

    /// Whether events of this kind are handled on this endpoint.
    pub fn accepts(self, event: &GatewayEvent) -> bool {
        use GatewayEvent::*;
        match self {
            WebhookEndpoint::Connect => matches!(event, AccountUpdated(_)),
            WebhookEndpoint::Payments => matches!(
                event,
                CheckoutSessionCompleted(_)
                    | CheckoutAsyncPaymentSucceeded(_)
                    | CheckoutAsyncPaymentFailed(_)
                    | PaymentIntentSucceeded(_)
                    | PaymentIntentFailed(_)
            ),
            WebhookEndpoint::Refunds => matches!(event, ChargeRefunded(_) | RefundUpdated(_)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    data: EnvelopeData,
}

#[derive(Debug, Deserialize)]
struct EnvelopeData {
    object: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSessionObject {
    pub id: String,
    #[serde(default)]
    pub client_reference_id: Option<String>,
    #[serde(default)]
    pub payment_intent: Option<String>,
    /// Amount charged in minor units
    #[serde(default)]
    pub amount_total: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntentObject {
    pub id: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChargeObject {
    pub id: String,
    #[serde(default)]
    pub payment_intent: Option<String>,
    /// True once the charge is fully refunded
    #[serde(default)]
    pub refunded: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefundObject {
    pub id: String,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountObject {
    pub id: String,
    #[serde(default)]
    pub charges_enabled: bool,
    #[serde(default)]
    pub details_submitted: bool,
}

/// A gateway event, resolved once from the raw envelope.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    CheckoutSessionCompleted(CheckoutSessionObject),
    CheckoutAsyncPaymentSucceeded(CheckoutSessionObject),
    CheckoutAsyncPaymentFailed(CheckoutSessionObject),
    PaymentIntentSucceeded(PaymentIntentObject),
    PaymentIntentFailed(PaymentIntentObject),
    ChargeRefunded(ChargeObject),
    RefundUpdated(RefundObject),
    AccountUpdated(AccountObject),
    /// Kinds this service does not handle
    Ignored { kind: String },
}

/// A parsed delivery: the gateway's event id plus the typed event.
#[derive(Debug, Clone)]
pub struct ParsedEvent {
    pub id: String,
    pub kind: String,
    pub event: GatewayEvent,
}

impl ParsedEvent {
    /// Parses the envelope `{id, type, data: {object}}`.
    pub fn parse(payload: &[u8]) -> Result<Self, ServiceError> {
        let envelope: Envelope = serde_json::from_slice(payload)
            .map_err(|e| ServiceError::BadRequest(format!("Invalid event envelope: {}", e)))?;

        let object = envelope.data.object;
        let event = match envelope.kind.as_str() {
            "checkout.session.completed" => {
                GatewayEvent::CheckoutSessionCompleted(object_as(&envelope.kind, object)?)
            }
            "checkout.session.async_payment_succeeded" => {
                GatewayEvent::CheckoutAsyncPaymentSucceeded(object_as(&envelope.kind, object)?)
            }
            "checkout.session.async_payment_failed" => {
                GatewayEvent::CheckoutAsyncPaymentFailed(object_as(&envelope.kind, object)?)
            }
            "payment_intent.succeeded" => {
                GatewayEvent::PaymentIntentSucceeded(object_as(&envelope.kind, object)?)
            }
            "payment_intent.payment_failed" => {
                GatewayEvent::PaymentIntentFailed(object_as(&envelope.kind, object)?)
            }
            "charge.refunded" => GatewayEvent::ChargeRefunded(object_as(&envelope.kind, object)?),
            "charge.refund.updated" => {
                GatewayEvent::RefundUpdated(object_as(&envelope.kind, object)?)
            }
            "account.updated" => GatewayEvent::AccountUpdated(object_as(&envelope.kind, object)?),
            other => GatewayEvent::Ignored {
                kind: other.to_string(),
            },
        };

        Ok(Self {
            id: envelope.id,
            kind: envelope.kind,
            event,
        })
    }
}

fn object_as<T: DeserializeOwned>(kind: &str, object: serde_json::Value) -> Result<T, ServiceError> {
    serde_json::from_value(object)
        .map_err(|e| ServiceError::BadRequest(format!("Invalid {} payload: {}", kind, e)))
}
