use crate::{
    config::AppConfig,
    entities::commerce::{
        order::{self, OrderStatus, PaymentStatus},
        order_item, Address, Order, OrderItem, Store,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        notifications::{self, NotificationService},
        payments::PaymentGateway,
    },
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, LoaderTrait, PaginatorTrait,
    QueryFilter, QueryOrder,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// An order together with its item snapshots
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderWithItems {
    #[serde(flatten)]
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderListResponse {
    pub orders: Vec<OrderWithItems>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Which side of an order an actor is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Party {
    Buyer,
    Seller,
}

/// Buyer- and seller-facing queries and guarded mutations over orders.
///
/// Every status change is a conditional update on the expected current
/// status, so it cannot overwrite a concurrent transition made by the
/// webhook reconciler or the other party.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    notifications: Arc<NotificationService>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        notifications: Arc<NotificationService>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            gateway,
            notifications,
            event_sender,
            config,
        }
    }

    /// Orders placed by the buyer, newest first
    #[instrument(skip(self))]
    pub async fn get_user_orders(
        &self,
        buyer_id: Uuid,
        page: u64,
        per_page: Option<u64>,
    ) -> Result<OrderListResponse, ServiceError> {
        self.list_orders(order::Column::UserId.eq(buyer_id), page, per_page)
            .await
    }

    /// Orders received by the seller's store, newest first
    #[instrument(skip(self))]
    pub async fn get_store_orders(
        &self,
        seller_id: Uuid,
        page: u64,
        per_page: Option<u64>,
    ) -> Result<OrderListResponse, ServiceError> {
        let store = Store::find()
            .filter(crate::entities::commerce::store::Column::UserId.eq(seller_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::Unauthorized("You do not have a store".to_string()))?;

        self.list_orders(order::Column::StoreId.eq(store.id), page, per_page)
            .await
    }

    async fn list_orders(
        &self,
        condition: sea_orm::sea_query::SimpleExpr,
        page: u64,
        per_page: Option<u64>,
    ) -> Result<OrderListResponse, ServiceError> {
        let per_page = self.config.page_size(per_page);
        let page = page.max(1);

        let paginator = Order::find()
            .filter(condition)
            .order_by_desc(order::Column::CreatedAt)
            .order_by_desc(order::Column::Id)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page - 1).await?;
        let items = orders.load_many(OrderItem, &*self.db).await?;

        Ok(OrderListResponse {
            orders: orders
                .into_iter()
                .zip(items)
                .map(|(order, items)| OrderWithItems { order, items })
                .collect(),
            total,
            page,
            per_page,
        })
    }

    /// Cancels an in-progress order on behalf of its buyer or seller.
    ///
    /// A completed payment is refunded through the gateway after the
    /// cancellation commits; the refund webhook later moves the payment
    /// status.
    #[instrument(skip(self))]
    pub async fn cancel_order(
        &self,
        actor_id: Uuid,
        order_id: Uuid,
    ) -> Result<order::Model, ServiceError> {
        let (order, seller_id, party) = self.load_for_actor(actor_id, order_id).await?;
        ensure_in_progress(&order, "cancelled")?;

        self.transition_order_status(order_id, OrderStatus::Cancelled, "cancelled")
            .await?;

        // Payment may have completed since the order was loaded
        let current = self.find_order(order_id).await?;
        if current.payment_status == PaymentStatus::Completed {
            if let Some(intent) = current.payment_intent_id.as_deref() {
                self.request_refund(order_id, intent).await;
            }
        }

        let counterparty = match party {
            Party::Buyer => seller_id,
            Party::Seller => order.user_id,
        };
        self.notifications
            .notify(actor_id, counterparty, order_id, notifications::ORDER_CANCELLED)
            .await;

        info!("Order {} cancelled by {:?}", order_id, party);
        Ok(current)
    }

    /// Buyer confirms delivery: `in_progress -> shipped`
    #[instrument(skip(self))]
    pub async fn mark_order_as_received(
        &self,
        buyer_id: Uuid,
        order_id: Uuid,
    ) -> Result<order::Model, ServiceError> {
        let (order, seller_id, party) = self.load_for_actor(buyer_id, order_id).await?;
        if party != Party::Buyer {
            return Err(ServiceError::BadRequest(
                "Only the buyer can mark an order as received".to_string(),
            ));
        }
        ensure_in_progress(&order, "marked as received")?;

        self.transition_order_status(order_id, OrderStatus::Shipped, "marked as received")
            .await?;

        self.notifications
            .notify(buyer_id, seller_id, order_id, notifications::ORDER_RECEIVED)
            .await;

        self.find_order(order_id).await
    }

    /// Seller marks the order as sent: `in_progress -> shipped`
    #[instrument(skip(self))]
    pub async fn mark_order_as_shipped(
        &self,
        seller_id: Uuid,
        order_id: Uuid,
    ) -> Result<order::Model, ServiceError> {
        let (order, _, party) = self.load_for_actor(seller_id, order_id).await?;
        if party != Party::Seller {
            return Err(ServiceError::BadRequest(
                "Only the seller can mark an order as shipped".to_string(),
            ));
        }
        ensure_in_progress(&order, "marked as shipped")?;

        self.transition_order_status(order_id, OrderStatus::Shipped, "marked as shipped")
            .await?;

        self.notifications
            .notify(seller_id, order.user_id, order_id, notifications::ORDER_SHIPPED)
            .await;

        self.find_order(order_id).await
    }

    /// Changes the delivery address of an order that has not shipped yet.
    #[instrument(skip(self))]
    pub async fn update_user_order(
        &self,
        buyer_id: Uuid,
        order_id: Uuid,
        address_id: Uuid,
    ) -> Result<order::Model, ServiceError> {
        let (order, _, party) = self.load_for_actor(buyer_id, order_id).await?;
        if party != Party::Buyer {
            return Err(ServiceError::BadRequest(
                "Only the buyer can change the delivery address".to_string(),
            ));
        }
        ensure_in_progress(&order, "updated")?;

        Address::find_by_id(address_id)
            .one(&*self.db)
            .await?
            .filter(|address| address.user_id == buyer_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Address {} not found", address_id)))?;

        let result = Order::update_many()
            .col_expr(order::Column::AddressId, Expr::value(address_id))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::OrderStatus.eq(OrderStatus::InProgress))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::BadRequest(
                "Only in-progress orders can be updated".to_string(),
            ));
        }

        self.event_sender
            .send_or_log(Event::OrderAddressUpdated {
                order_id,
                address_id,
            })
            .await;

        self.find_order(order_id).await
    }

    async fn find_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    /// Loads the order and resolves which party `actor_id` is.
    /// Strangers get `Unauthorized`.
    async fn load_for_actor(
        &self,
        actor_id: Uuid,
        order_id: Uuid,
    ) -> Result<(order::Model, Uuid, Party), ServiceError> {
        let order = self.find_order(order_id).await?;
        let seller_id = Store::find_by_id(order.store_id)
            .one(&*self.db)
            .await?
            .map(|store| store.user_id)
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Store {} not found", order.store_id))
            })?;

        let party = if order.user_id == actor_id {
            Party::Buyer
        } else if seller_id == actor_id {
            Party::Seller
        } else {
            return Err(ServiceError::Unauthorized(
                "You are not a party to this order".to_string(),
            ));
        };

        Ok((order, seller_id, party))
    }

    /// `in_progress -> to`, guarded on the current status
    async fn transition_order_status(
        &self,
        order_id: Uuid,
        to: OrderStatus,
        action: &str,
    ) -> Result<(), ServiceError> {
        let result = Order::update_many()
            .col_expr(order::Column::OrderStatus, Expr::value(to))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::OrderStatus.eq(OrderStatus::InProgress))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::BadRequest(format!(
                "Only in-progress orders can be {}",
                action
            )));
        }

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                new_status: to,
            })
            .await;
        Ok(())
    }

    /// Asks the gateway to refund a cancelled order. Failures are logged;
    /// the cancellation has already committed.
    pub(crate) async fn request_refund(&self, order_id: Uuid, payment_intent_id: &str) {
        request_refund(&*self.gateway, &self.event_sender, order_id, payment_intent_id).await
    }
}

/// Shared by order cancellation and the webhook reconciler.
pub(crate) async fn request_refund(
    gateway: &dyn PaymentGateway,
    event_sender: &EventSender,
    order_id: Uuid,
    payment_intent_id: &str,
) {
    match gateway.create_refund(payment_intent_id).await {
        Ok(refund) => {
            counter!("thrift_market_refunds.requested", 1);
            info!(order_id = %order_id, refund_id = %refund.id, "Refund requested");
            event_sender
                .send_or_log(Event::RefundRequested {
                    order_id,
                    payment_intent_id: payment_intent_id.to_string(),
                })
                .await;
        }
        Err(e) => {
            counter!("thrift_market_refunds.failed", 1);
            error!(order_id = %order_id, error = %e, "Refund request failed");
        }
    }
}

fn ensure_in_progress(order: &order::Model, action: &str) -> Result<(), ServiceError> {
    if order.order_status.is_terminal() {
        return Err(ServiceError::BadRequest(format!(
            "Only in-progress orders can be {}",
            action
        )));
    }
    Ok(())
}
