use crate::{
    config::AppConfig,
    entities::commerce::{bag_item, Address, Bag, BagItem, Store},
    errors::ServiceError,
    events::{Event, EventSender},
    services::payments::{CheckoutLineItem, CheckoutSessionRequest, PaymentGateway},
};
use sea_orm::{DatabaseConnection, EntityTrait, ModelTrait, QueryOrder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use super::checkout_reference::CheckoutReference;
use super::currency::{application_fee_amount, currency_for_country};

/// Turns a bag into a hosted payment session.
///
/// Nothing is written locally: the order only comes into existence once the
/// gateway reports the completed checkout.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            gateway,
            event_sender,
            config,
        }
    }

    /// Creates a hosted checkout session for the buyer's bag.
    ///
    /// # Returns
    ///
    /// * `Ok(CheckoutSessionResponse)` - URL of the hosted payment page
    /// * `Err(ServiceError::NotFound)` - Bag, address or store missing, or not the buyer's
    /// * `Err(ServiceError::BadRequest)` - Store cannot take payments or its country has no currency
    /// * `Err(ServiceError::InternalError)` - Gateway returned no URL
    #[instrument(skip(self))]
    pub async fn create_checkout_session(
        &self,
        buyer_id: Uuid,
        bag_id: Uuid,
        address_id: Uuid,
    ) -> Result<CheckoutSessionResponse, ServiceError> {
        let bag = Bag::find_by_id(bag_id)
            .one(&*self.db)
            .await?
            .filter(|bag| bag.user_id == buyer_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Bag {} not found", bag_id)))?;

        Address::find_by_id(address_id)
            .one(&*self.db)
            .await?
            .filter(|address| address.user_id == buyer_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Address {} not found", address_id)))?;

        let store = Store::find_by_id(bag.store_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Store {} not found", bag.store_id)))?;

        let destination_account = match (&store.stripe_account_id, store.can_accept_payments()) {
            (Some(account), true) => account.clone(),
            _ => {
                return Err(ServiceError::BadRequest(format!(
                    "Store {} cannot accept payments yet",
                    store.id
                )))
            }
        };

        let currency = currency_for_country(&store.country).ok_or_else(|| {
            ServiceError::BadRequest(format!(
                "No currency configured for country {}",
                store.country
            ))
        })?;

        let items = bag
            .find_related(BagItem)
            .order_by_asc(bag_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        if items.is_empty() {
            return Err(ServiceError::BadRequest("Bag is empty".to_string()));
        }

        let reference = CheckoutReference {
            bag_id: bag.id,
            store_id: store.id,
            seller_id: store.user_id,
            user_id: buyer_id,
            address_id,
        };

        let total: i64 = items.iter().map(bag_item::Model::line_total).sum();
        let line_items = items
            .iter()
            .map(|item| CheckoutLineItem {
                name: item.name.clone(),
                images: image_urls(&item.images),
                unit_amount: item.line_total(),
                quantity: 1,
            })
            .collect();

        let site_url = self.config.site_url.trim_end_matches('/');
        let request = CheckoutSessionRequest {
            currency: currency.to_string(),
            line_items,
            client_reference_id: reference.encode()?,
            application_fee_amount: application_fee_amount(
                total,
                self.config.application_fee_percentage,
            )?,
            destination_account,
            success_url: format!("{}/orders?checkout=success", site_url),
            cancel_url: format!("{}/bags/{}", site_url, bag.id),
        };

        let session = self.gateway.create_checkout_session(request).await?;
        let url = session.url.ok_or_else(|| {
            ServiceError::InternalError(format!(
                "Checkout session {} returned no URL",
                session.id
            ))
        })?;

        self.event_sender
            .send_or_log(Event::CheckoutStarted {
                bag_id: bag.id,
                store_id: store.id,
            })
            .await;

        info!(session_id = %session.id, "Created checkout session for bag {}", bag.id);
        Ok(CheckoutSessionResponse { url })
    }
}

/// Image URLs stored as a JSON array; anything else yields no images.
fn image_urls(images: &serde_json::Value) -> Vec<String> {
    images
        .as_array()
        .map(|urls| {
            urls.iter()
                .filter_map(|url| url.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSessionResponse {
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn image_urls_skip_non_strings() {
        assert_eq!(
            image_urls(&json!(["a.jpg", 3, "b.jpg"])),
            vec!["a.jpg".to_string(), "b.jpg".to_string()]
        );
        assert!(image_urls(&json!(null)).is_empty());
    }
}
