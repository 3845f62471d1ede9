pub mod commerce;
pub mod common;
pub mod notifications;
pub mod orders;
pub mod payment_webhooks;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{
    commerce::{BagService, CheckoutService},
    notifications::NotificationService,
    orders::OrderService,
    payments::PaymentGateway,
};
use crate::webhooks::{WebhookReconciler, WebhookVerifiers};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub bags: Arc<BagService>,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub notifications: Arc<NotificationService>,
    pub reconciler: Arc<WebhookReconciler>,
    pub webhook_verifiers: Arc<WebhookVerifiers>,
}

impl AppServices {
    /// Wire every service against one pool, gateway and event channel.
    pub fn new(
        db_pool: Arc<DbPool>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        let notifications = Arc::new(NotificationService::new(db_pool.clone()));

        let bags = Arc::new(BagService::new(db_pool.clone(), event_sender.clone()));
        let checkout = Arc::new(CheckoutService::new(
            db_pool.clone(),
            gateway.clone(),
            event_sender.clone(),
            config.clone(),
        ));
        let orders = Arc::new(OrderService::new(
            db_pool.clone(),
            gateway.clone(),
            notifications.clone(),
            event_sender.clone(),
            config.clone(),
        ));
        let reconciler = Arc::new(WebhookReconciler::new(
            db_pool,
            gateway,
            notifications.clone(),
            event_sender,
        ));

        Self {
            bags,
            checkout,
            orders,
            notifications,
            reconciler,
            webhook_verifiers: Arc::new(WebhookVerifiers::from_config(&config)),
        }
    }
}
