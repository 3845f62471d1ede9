use crate::{
    db,
    entities::commerce::{
        bag, bag_item, order,
        order::{OrderStatus, PaymentStatus},
        order_item, product, store, user, Address, Bag, BagItem, Order, OrderItem, Product,
        Store, StripeSetupStatus, User,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        commerce::CheckoutReference,
        notifications::{self, NotificationService},
        orders::request_refund,
        payments::{PaymentGateway, CHECKOUT_REFERENCE_METADATA_KEY},
    },
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    sea_query::{Condition, Expr},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, ModelTrait, QueryFilter, QuerySelect, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::events::{
    AccountObject, ChargeObject, CheckoutSessionObject, GatewayEvent, ParsedEvent,
    PaymentIntentObject, RefundObject, WebhookEndpoint,
};

/// What a delivery did to the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// A state transition was committed
    Applied,
    /// Already applied or superseded; nothing changed
    AlreadyApplied,
    /// Not an event this endpoint acts on
    Ignored,
}

impl ReconcileOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ReconcileOutcome::Applied => "applied",
            ReconcileOutcome::AlreadyApplied => "already_applied",
            ReconcileOutcome::Ignored => "ignored",
        }
    }
}

/// Turns verified gateway events into order, payment and store transitions.
///
/// Deliveries may repeat and arrive in any order. Order materialization is
/// a single transaction and every payment-status change is a conditional
/// update on the allowed source states, so replays converge.
#[derive(Clone)]
pub struct WebhookReconciler {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    notifications: Arc<NotificationService>,
    event_sender: Arc<EventSender>,
}

impl WebhookReconciler {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        notifications: Arc<NotificationService>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            db,
            gateway,
            notifications,
            event_sender,
        }
    }

    /// Dispatches a verified delivery received on `endpoint`.
    #[instrument(skip(self, parsed), fields(event_id = %parsed.id, kind = %parsed.kind))]
    pub async fn reconcile(
        &self,
        endpoint: WebhookEndpoint,
        parsed: ParsedEvent,
    ) -> Result<ReconcileOutcome, ServiceError> {
        if !endpoint.accepts(&parsed.event) {
            info!(endpoint = endpoint.as_str(), "Ignoring event kind on this endpoint");
            return Ok(ReconcileOutcome::Ignored);
        }

        match parsed.event {
            GatewayEvent::CheckoutSessionCompleted(session) => {
                self.checkout_completed(&session).await
            }
            GatewayEvent::CheckoutAsyncPaymentSucceeded(session) => {
                let order = self.order_for_session(&session).await?;
                self.apply_payment_status(order, PaymentStatus::Completed, session.payment_intent)
                    .await
            }
            GatewayEvent::CheckoutAsyncPaymentFailed(session) => {
                let order = self.order_for_session(&session).await?;
                self.apply_payment_status(order, PaymentStatus::Failed, session.payment_intent)
                    .await
            }
            GatewayEvent::PaymentIntentSucceeded(intent) => {
                let order = self.order_for_intent(&intent).await?;
                self.apply_payment_status(order, PaymentStatus::Completed, Some(intent.id))
                    .await
            }
            GatewayEvent::PaymentIntentFailed(intent) => {
                let order = self.order_for_intent(&intent).await?;
                self.apply_payment_status(order, PaymentStatus::Failed, Some(intent.id))
                    .await
            }
            GatewayEvent::ChargeRefunded(charge) => self.charge_refunded(charge).await,
            GatewayEvent::RefundUpdated(refund) => self.refund_updated(refund).await,
            GatewayEvent::AccountUpdated(account) => self.account_updated(&account).await,
            GatewayEvent::Ignored { kind } => {
                info!(kind = %kind, "Ignoring unhandled event kind");
                Ok(ReconcileOutcome::Ignored)
            }
        }
    }

    /// Materializes the order for a completed checkout.
    ///
    /// Order insert, item snapshots, sold flags and bag deletion commit
    /// together or not at all. A replay finds the bag gone and the order
    /// present and succeeds without changes.
    async fn checkout_completed(
        &self,
        session: &CheckoutSessionObject,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let reference = decode_reference(session.client_reference_id.as_deref())?;

        let txn = self.db.begin().await?;

        // Row lock holds off concurrent adds until the bag is gone.
        let Some(bag) = Bag::find_by_id(reference.bag_id)
            .lock_exclusive()
            .one(&txn)
            .await?
        else {
            let existing = Order::find()
                .filter(
                    Condition::any()
                        .add(order::Column::BagId.eq(reference.bag_id))
                        .add(order::Column::CheckoutSessionId.eq(session.id.clone())),
                )
                .one(&txn)
                .await?;
            return match existing {
                Some(order) => {
                    info!(order_id = %order.id, "Checkout already reconciled");
                    Ok(ReconcileOutcome::AlreadyApplied)
                }
                None => Err(ServiceError::NotFound(format!(
                    "Bag {} not found",
                    reference.bag_id
                ))),
            };
        };

        let order = match materialize_order(&txn, &reference, &bag, session).await {
            Ok(order) => order,
            Err(e) => return Err(db::rolled_back("checkout_completed", e)),
        };

        db::commit(txn, "checkout_completed").await?;

        counter!("thrift_market_orders.created", 1);
        info!(order_id = %order.id, bag_id = %bag.id, "Order created from checkout");

        self.notifications
            .notify(
                reference.user_id,
                reference.seller_id,
                order.id,
                notifications::NEW_ORDER,
            )
            .await;
        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id: order.id,
                bag_id: bag.id,
                checkout_session_id: Some(session.id.clone()),
            })
            .await;

        Ok(ReconcileOutcome::Applied)
    }

    async fn order_for_session(
        &self,
        session: &CheckoutSessionObject,
    ) -> Result<order::Model, ServiceError> {
        let by_reference = match session.client_reference_id.as_deref() {
            Some(raw) => {
                let reference = CheckoutReference::decode(raw)?;
                find_order_by(&*self.db, order::Column::BagId.eq(reference.bag_id)).await?
            }
            None => None,
        };

        let found = match by_reference {
            Some(order) => Some(order),
            None => {
                find_order_by(
                    &*self.db,
                    order::Column::CheckoutSessionId.eq(session.id.clone()),
                )
                .await?
            }
        };

        found.ok_or_else(|| {
            ServiceError::NotFound(format!("No order for checkout session {}", session.id))
        })
    }

    async fn order_for_intent(
        &self,
        intent: &PaymentIntentObject,
    ) -> Result<order::Model, ServiceError> {
        let by_reference = match intent.metadata.get(CHECKOUT_REFERENCE_METADATA_KEY) {
            Some(raw) => {
                let reference = CheckoutReference::decode(raw)?;
                find_order_by(&*self.db, order::Column::BagId.eq(reference.bag_id)).await?
            }
            None => None,
        };

        let found = match by_reference {
            Some(order) => Some(order),
            None => self.order_for_payment_intent(&intent.id).await?,
        };

        found.ok_or_else(|| {
            ServiceError::NotFound(format!("No order for payment intent {}", intent.id))
        })
    }

    async fn order_for_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<order::Model>, ServiceError> {
        find_order_by(
            &*self.db,
            order::Column::PaymentIntentId.eq(payment_intent_id.to_string()),
        )
        .await
    }

    async fn charge_refunded(&self, charge: ChargeObject) -> Result<ReconcileOutcome, ServiceError> {
        if !charge.refunded {
            info!(charge_id = %charge.id, "Charge only partially refunded");
            return Ok(ReconcileOutcome::Ignored);
        }
        let intent = charge.payment_intent.ok_or_else(|| {
            ServiceError::BadRequest(format!("Charge {} has no payment intent", charge.id))
        })?;
        self.refund_succeeded(&intent).await
    }

    async fn refund_updated(&self, refund: RefundObject) -> Result<ReconcileOutcome, ServiceError> {
        if refund.status.as_deref() != Some("succeeded") {
            info!(refund_id = %refund.id, status = ?refund.status, "Refund not settled yet");
            return Ok(ReconcileOutcome::Ignored);
        }
        let intent = refund.payment_intent.ok_or_else(|| {
            ServiceError::BadRequest(format!("Refund {} has no payment intent", refund.id))
        })?;
        self.refund_succeeded(&intent).await
    }

    async fn refund_succeeded(&self, payment_intent_id: &str) -> Result<ReconcileOutcome, ServiceError> {
        let order = self
            .order_for_payment_intent(payment_intent_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("No order for payment intent {}", payment_intent_id))
            })?;
        self.apply_payment_status(order, PaymentStatus::Refunded, None)
            .await
    }

    /// Moves `payment_status` to `to` if the order is in one of the allowed
    /// source states. Zero rows affected means the transition was already
    /// applied or superseded.
    async fn apply_payment_status(
        &self,
        order: order::Model,
        to: PaymentStatus,
        payment_intent_id: Option<String>,
    ) -> Result<ReconcileOutcome, ServiceError> {
        if order.payment_intent_id.is_none() {
            if let Some(intent) = payment_intent_id.as_deref() {
                Order::update_many()
                    .col_expr(order::Column::PaymentIntentId, Expr::value(intent))
                    .filter(order::Column::Id.eq(order.id))
                    .filter(order::Column::PaymentIntentId.is_null())
                    .exec(&*self.db)
                    .await?;
            }
        }

        let result = Order::update_many()
            .col_expr(order::Column::PaymentStatus, Expr::value(to))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::PaymentStatus.is_in(to.allowed_sources().iter().copied()))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            info!(
                order_id = %order.id,
                current = ?order.payment_status,
                target = ?to,
                "Payment transition already applied or superseded"
            );
            return Ok(ReconcileOutcome::AlreadyApplied);
        }

        counter!("thrift_market_payments.transitions", 1, "to" => payment_status_label(to));
        info!(order_id = %order.id, target = ?to, "Payment status updated");

        let seller_id = Store::find_by_id(order.store_id)
            .one(&*self.db)
            .await?
            .map(|store| store.user_id);
        let message = match to {
            PaymentStatus::Completed => Some(notifications::PAYMENT_PROCESSED),
            PaymentStatus::Failed => Some(notifications::PAYMENT_FAILED),
            PaymentStatus::Refunded => Some(notifications::REFUND_PROCESSED),
            PaymentStatus::Pending => None,
        };
        if let (Some(seller_id), Some(message)) = (seller_id, message) {
            self.notifications
                .notify_both(order.user_id, seller_id, order.id, message)
                .await;
        }

        self.event_sender
            .send_or_log(Event::PaymentStatusChanged {
                order_id: order.id,
                new_status: to,
            })
            .await;

        // A payment that lands after the order was cancelled is handed back.
        if to == PaymentStatus::Completed {
            let current = Order::find_by_id(order.id).one(&*self.db).await?;
            if let Some(current) = current.filter(|o| o.order_status == OrderStatus::Cancelled) {
                if let Some(intent) = current.payment_intent_id.as_deref() {
                    warn!(order_id = %current.id, "Payment completed for a cancelled order");
                    request_refund(&*self.gateway, &self.event_sender, current.id, intent).await;
                }
            }
        }

        Ok(ReconcileOutcome::Applied)
    }

    /// Connected-account onboarding progress.
    async fn account_updated(
        &self,
        account: &AccountObject,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let store = Store::find()
            .filter(store::Column::StripeAccountId.eq(account.id.clone()))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("No store for connected account {}", account.id))
            })?;

        if account.charges_enabled {
            let txn = self.db.begin().await?;
            if let Err(e) = complete_store_setup(&txn, &store).await {
                return Err(db::rolled_back("account_updated", e));
            }
            db::commit(txn, "account_updated").await?;

            info!(store_id = %store.id, "Store payment setup complete");
            self.event_sender
                .send_or_log(Event::StoreSetupChanged {
                    store_id: store.id,
                    complete: true,
                })
                .await;
            Ok(ReconcileOutcome::Applied)
        } else if account.details_submitted {
            let mut active: store::ActiveModel = store.clone().into();
            active.stripe_setup_status = Set(StripeSetupStatus::InProgress);
            active.updated_at = Set(Utc::now());
            active.update(&*self.db).await?;

            info!(store_id = %store.id, "Store payment setup in progress");
            self.event_sender
                .send_or_log(Event::StoreSetupChanged {
                    store_id: store.id,
                    complete: false,
                })
                .await;
            Ok(ReconcileOutcome::Applied)
        } else {
            Ok(ReconcileOutcome::Ignored)
        }
    }
}

fn decode_reference(raw: Option<&str>) -> Result<CheckoutReference, ServiceError> {
    let raw = raw.ok_or_else(|| {
        ServiceError::BadRequest("Checkout session has no client reference".to_string())
    })?;
    CheckoutReference::decode(raw)
}

async fn find_order_by<C: ConnectionTrait>(
    conn: &C,
    condition: sea_orm::sea_query::SimpleExpr,
) -> Result<Option<order::Model>, ServiceError> {
    Ok(Order::find().filter(condition).one(conn).await?)
}

fn payment_status_label(status: PaymentStatus) -> &'static str {
    match status {
        PaymentStatus::Pending => "pending",
        PaymentStatus::Completed => "completed",
        PaymentStatus::Failed => "failed",
        PaymentStatus::Refunded => "refunded",
    }
}

/// Re-validates the reference against the ledger and writes the order.
/// Must run inside `txn`; nothing here touches the pool directly.
async fn materialize_order(
    txn: &DatabaseTransaction,
    reference: &CheckoutReference,
    bag: &bag::Model,
    session: &CheckoutSessionObject,
) -> Result<order::Model, ServiceError> {
    if bag.store_id != reference.store_id || bag.user_id != reference.user_id {
        return Err(ServiceError::BadRequest(
            "Checkout reference does not match the bag".to_string(),
        ));
    }

    let store = Store::find_by_id(reference.store_id)
        .one(txn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Store {} not found", reference.store_id)))?;
    if store.user_id != reference.seller_id {
        return Err(ServiceError::BadRequest(
            "Checkout reference does not match the store's seller".to_string(),
        ));
    }

    let address = Address::find_by_id(reference.address_id)
        .one(txn)
        .await?
        .ok_or_else(|| {
            ServiceError::NotFound(format!("Address {} not found", reference.address_id))
        })?;
    if address.user_id != reference.user_id {
        return Err(ServiceError::BadRequest(
            "Checkout reference address does not belong to the buyer".to_string(),
        ));
    }

    let items = bag.find_related(BagItem).all(txn).await?;
    if items.is_empty() {
        return Err(ServiceError::BadRequest(format!("Bag {} is empty", bag.id)));
    }

    let sub_total: i64 = items.iter().map(|item| item.price).sum();
    let shipping_total: i64 = items.iter().map(|item| item.shipping_price).sum();
    if let Some(charged) = session.amount_total {
        if charged != sub_total + shipping_total {
            return Err(ServiceError::Conflict(format!(
                "Bag {} totals {} but checkout session {} charged {}",
                bag.id,
                sub_total + shipping_total,
                session.id,
                charged
            )));
        }
    }
    let now = Utc::now();

    let order = order::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(reference.user_id),
        store_id: Set(reference.store_id),
        address_id: Set(reference.address_id),
        bag_id: Set(bag.id),
        checkout_session_id: Set(Some(session.id.clone())),
        payment_intent_id: Set(session.payment_intent.clone()),
        sub_total: Set(sub_total),
        shipping_total: Set(shipping_total),
        grand_total: Set(sub_total + shipping_total),
        payment_status: Set(PaymentStatus::Pending),
        order_status: Set(OrderStatus::InProgress),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(txn)
    .await?;

    OrderItem::insert_many(items.iter().map(|item| order_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order.id),
        product_id: Set(item.product_id),
        name: Set(item.name.clone()),
        description: Set(item.description.clone()),
        images: Set(item.images.clone()),
        price: Set(item.price),
        shipping_price: Set(item.shipping_price),
        created_at: Set(now),
    }))
    .exec_without_returning(txn)
    .await?;

    let product_ids: Vec<Uuid> = items.iter().map(|item| item.product_id).collect();
    let marked = Product::update_many()
        .col_expr(product::Column::Sold, Expr::value(true))
        .col_expr(product::Column::UpdatedAt, Expr::value(now))
        .filter(product::Column::Id.is_in(product_ids.clone()))
        .filter(product::Column::Sold.eq(false))
        .exec(txn)
        .await?;
    if marked.rows_affected != product_ids.len() as u64 {
        return Err(ServiceError::Conflict(format!(
            "{} of {} products in bag {} are no longer available",
            product_ids.len() as u64 - marked.rows_affected,
            product_ids.len(),
            bag.id
        )));
    }

    let item_ids: Vec<Uuid> = items.iter().map(|item| item.id).collect();
    BagItem::delete_many()
        .filter(bag_item::Column::Id.is_in(item_ids))
        .exec(txn)
        .await?;
    Bag::delete_by_id(bag.id).exec(txn).await?;

    Ok(order)
}

async fn complete_store_setup(
    txn: &DatabaseTransaction,
    store: &store::Model,
) -> Result<(), ServiceError> {
    Store::update_many()
        .col_expr(
            store::Column::StripeSetupStatus,
            Expr::value(StripeSetupStatus::Complete),
        )
        .col_expr(store::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(store::Column::Id.eq(store.id))
        .exec(txn)
        .await?;

    let updated = User::update_many()
        .col_expr(user::Column::CanSell, Expr::value(true))
        .filter(user::Column::Id.eq(store.user_id))
        .exec(txn)
        .await?;
    if updated.rows_affected == 0 {
        return Err(ServiceError::NotFound(format!(
            "User {} not found",
            store.user_id
        )));
    }
    Ok(())
}
