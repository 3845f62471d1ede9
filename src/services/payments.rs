use async_trait::async_trait;
use metrics::counter;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{error, info, instrument};

use crate::config::AppConfig;
use crate::errors::ServiceError;

/// Metadata key under which the checkout reference is attached to the
/// payment intent, so payment-intent events can be correlated.
pub const CHECKOUT_REFERENCE_METADATA_KEY: &str = "checkout_reference";

/// One hosted-checkout line. Amounts are minor units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutLineItem {
    pub name: String,
    pub images: Vec<String>,
    pub unit_amount: i64,
    pub quantity: u32,
}

/// Everything the gateway needs to open a hosted payment page for a bag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSessionRequest {
    pub currency: String,
    pub line_items: Vec<CheckoutLineItem>,
    /// Serialized checkout reference, round-tripped verbatim
    pub client_reference_id: String,
    pub application_fee_amount: i64,
    /// Connected account receiving the transfer
    pub destination_account: String,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Refund {
    pub id: String,
    pub status: Option<String>,
}

/// Outbound calls to the payment processor.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CheckoutSession, ServiceError>;

    /// Requests a full refund of the payment intent. The resulting status
    /// change arrives later through the refund webhook.
    async fn create_refund(&self, payment_intent_id: &str) -> Result<Refund, ServiceError>;
}

/// Stripe REST implementation of [`PaymentGateway`]
#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: String,
    api_base: String,
}

impl StripeClient {
    pub fn new(secret_key: impl Into<String>, api_base: impl Into<String>) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("HTTP client init failed: {}", e)))?;
        Ok(Self {
            client,
            secret_key: secret_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ServiceError> {
        Self::new(config.stripe_secret_key.clone(), config.stripe_api_base.clone())
    }

    async fn post_form<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        form: &[(String, String)],
        idempotency_key: Option<&str>,
    ) -> Result<T, ServiceError> {
        let mut request = self
            .client
            .post(format!("{}{}", self.api_base, path))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(form);
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| {
                counter!("thrift_market_gateway.errors", 1, "path" => path.to_string());
                ServiceError::ExternalServiceError(format!("Stripe API error: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            counter!("thrift_market_gateway.errors", 1, "path" => path.to_string());
            error!(%status, path, "Stripe API returned an error: {}", error_text);
            return Err(ServiceError::ExternalServiceError(format!(
                "Stripe API error ({}): {}",
                status, error_text
            )));
        }

        response.json().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("Failed to parse Stripe response: {}", e))
        })
    }
}

/// Flattens a session request into Stripe's bracketed form encoding.
pub fn checkout_session_form(request: &CheckoutSessionRequest) -> Vec<(String, String)> {
    let mut form = vec![
        ("mode".to_string(), "payment".to_string()),
        ("success_url".to_string(), request.success_url.clone()),
        ("cancel_url".to_string(), request.cancel_url.clone()),
        (
            "client_reference_id".to_string(),
            request.client_reference_id.clone(),
        ),
        (
            "payment_intent_data[application_fee_amount]".to_string(),
            request.application_fee_amount.to_string(),
        ),
        (
            "payment_intent_data[transfer_data][destination]".to_string(),
            request.destination_account.clone(),
        ),
        (
            format!("payment_intent_data[metadata][{}]", CHECKOUT_REFERENCE_METADATA_KEY),
            request.client_reference_id.clone(),
        ),
    ];

    for (i, item) in request.line_items.iter().enumerate() {
        let prefix = format!("line_items[{}]", i);
        form.push((
            format!("{}[price_data][currency]", prefix),
            request.currency.clone(),
        ));
        form.push((
            format!("{}[price_data][unit_amount]", prefix),
            item.unit_amount.to_string(),
        ));
        form.push((
            format!("{}[price_data][product_data][name]", prefix),
            item.name.clone(),
        ));
        for (j, image) in item.images.iter().enumerate() {
            form.push((
                format!("{}[price_data][product_data][images][{}]", prefix, j),
                image.clone(),
            ));
        }
        form.push((format!("{}[quantity]", prefix), item.quantity.to_string()));
    }

    form
}

#[async_trait]
impl PaymentGateway for StripeClient {
    #[instrument(skip(self, request), fields(line_items = request.line_items.len()))]
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CheckoutSession, ServiceError> {
        let form = checkout_session_form(&request);
        let session: CheckoutSession = self.post_form("/v1/checkout/sessions", &form, None).await?;
        info!(session_id = %session.id, "Created checkout session");
        Ok(session)
    }

    #[instrument(skip(self))]
    async fn create_refund(&self, payment_intent_id: &str) -> Result<Refund, ServiceError> {
        let form = vec![
            ("payment_intent".to_string(), payment_intent_id.to_string()),
            ("reverse_transfer".to_string(), "true".to_string()),
            ("refund_application_fee".to_string(), "true".to_string()),
        ];
        // One key per intent so concurrent refund requests collapse into one refund
        let key = refund_idempotency_key(payment_intent_id);
        let refund: Refund = self.post_form("/v1/refunds", &form, Some(&key)).await?;
        info!(refund_id = %refund.id, "Requested refund");
        Ok(refund)
    }
}

fn refund_idempotency_key(payment_intent_id: &str) -> String {
    format!("refund-{}", payment_intent_id)
}
