use crate::entities::commerce::notification::{self, Entity as NotificationEntity};
use crate::errors::ServiceError;
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

pub const NEW_ORDER: &str = "You have a new order";
pub const PAYMENT_PROCESSED: &str = "Payment has been processed for this order";
pub const PAYMENT_FAILED: &str = "Payment could not be processed for this order";
pub const REFUND_PROCESSED: &str = "Refund has been processed for this order";
pub const ORDER_CANCELLED: &str = "This order has been cancelled";
pub const ORDER_SHIPPED: &str = "This order has been shipped";
pub const ORDER_RECEIVED: &str = "This order has been marked as received";

/// Persists user-facing notifications about orders.
///
/// Notifications are issued after the state change they describe has
/// committed, so a failure here is logged and swallowed.
#[derive(Clone)]
pub struct NotificationService {
    db: Arc<DatabaseConnection>,
}

impl NotificationService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Best-effort create; never fails the caller.
    #[instrument(skip(self))]
    pub async fn notify(&self, notifier_id: Uuid, notified_id: Uuid, model_id: Uuid, message: &str) {
        if let Err(e) = self.create(notifier_id, notified_id, model_id, message).await {
            counter!("thrift_market_notifications.failed", 1);
            warn!(
                notified_id = %notified_id,
                model_id = %model_id,
                error = %e,
                "Failed to create notification"
            );
        }
    }

    /// Notifies both parties of an order.
    pub async fn notify_both(&self, buyer_id: Uuid, seller_id: Uuid, order_id: Uuid, message: &str) {
        self.notify(seller_id, buyer_id, order_id, message).await;
        self.notify(buyer_id, seller_id, order_id, message).await;
    }

    pub async fn create(
        &self,
        notifier_id: Uuid,
        notified_id: Uuid,
        model_id: Uuid,
        message: &str,
    ) -> Result<notification::Model, ServiceError> {
        let model = notification::ActiveModel {
            id: Set(Uuid::new_v4()),
            notifier_id: Set(notifier_id),
            notified_id: Set(notified_id),
            model_id: Set(model_id),
            message: Set(message.to_string()),
            read: Set(false),
            created_at: Set(Utc::now()),
        };
        Ok(model.insert(&*self.db).await?)
    }

    /// Notifications addressed to `user_id`, newest first
    pub async fn list_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<notification::Model>, ServiceError> {
        Ok(NotificationEntity::find()
            .filter(notification::Column::NotifiedId.eq(user_id))
            .order_by_desc(notification::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }
}
