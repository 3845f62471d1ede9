//! Inbound payment-gateway webhooks: signature verification, event parsing
//! and reconciliation into the ledger.

pub mod events;
pub mod reconciler;
pub mod signature;

use crate::config::AppConfig;

pub use events::{GatewayEvent, ParsedEvent, WebhookEndpoint};
pub use reconciler::{ReconcileOutcome, WebhookReconciler};
pub use signature::WebhookVerifier;

/// One verifier per endpoint, each keyed by its own signing secret
#[derive(Debug, Clone)]
pub struct WebhookVerifiers {
    connect: WebhookVerifier,
    payments: WebhookVerifier,
    refunds: WebhookVerifier,
}

impl WebhookVerifiers {
    pub fn from_config(config: &AppConfig) -> Self {
        let tolerance = config.webhook_tolerance_secs;
        Self {
            connect: WebhookVerifier::new(config.connect_webhook_secret.clone(), tolerance),
            payments: WebhookVerifier::new(config.payment_webhook_secret.clone(), tolerance),
            refunds: WebhookVerifier::new(config.refund_webhook_secret.clone(), tolerance),
        }
    }

    pub fn for_endpoint(&self, endpoint: WebhookEndpoint) -> &WebhookVerifier {
        match endpoint {
            WebhookEndpoint::Connect => &self.connect,
            WebhookEndpoint::Payments => &self.payments,
            WebhookEndpoint::Refunds => &self.refunds,
        }
    }
}
