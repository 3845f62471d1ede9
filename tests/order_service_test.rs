mod common;

use assert_matches::assert_matches;
use common::{payment_intent_event, TestApp};
use thrift_market_api::{
    entities::commerce::{OrderStatus, PaymentStatus, StripeSetupStatus},
    errors::ServiceError,
    services::notifications,
    webhooks::WebhookEndpoint,
};
use uuid::Uuid;

#[tokio::test]
async fn test_buyer_and_store_order_listings() {
    let app = TestApp::new().await;
    let market = app.seed_marketplace().await;
    let order = app.place_order(&market, "pi_test_1").await;
    let orders = &app.state.services.orders;

    let bought = orders.get_user_orders(market.buyer.id, 1, None).await.unwrap();
    assert_eq!(bought.total, 1);
    assert_eq!(bought.orders[0].order.id, order.id);
    assert_eq!(bought.orders[0].items.len(), 1);

    let sold = orders.get_store_orders(market.seller.id, 1, None).await.unwrap();
    assert_eq!(sold.total, 1);
    assert_eq!(sold.orders[0].order.id, order.id);

    let none = orders.get_user_orders(market.seller.id, 1, None).await.unwrap();
    assert_eq!(none.total, 0);
    assert!(none.orders.is_empty());
}

#[tokio::test]
async fn test_store_orders_require_a_store() {
    let app = TestApp::new().await;
    let buyer = app.seed_user("Buyer").await;

    assert_matches!(
        app.state
            .services
            .orders
            .get_store_orders(buyer.id, 1, None)
            .await,
        Err(ServiceError::Unauthorized(_))
    );
}

#[tokio::test]
async fn test_page_size_is_clamped() {
    let app = TestApp::new().await;
    let market = app.seed_marketplace().await;
    app.place_order(&market, "pi_test_1").await;

    let page = app
        .state
        .services
        .orders
        .get_user_orders(market.buyer.id, 1, Some(10_000))
        .await
        .unwrap();
    assert_eq!(page.per_page, app.state.config.max_page_size);

    let empty_page = app
        .state
        .services
        .orders
        .get_user_orders(market.buyer.id, 2, Some(1))
        .await
        .unwrap();
    assert_eq!(empty_page.total, 1);
    assert!(empty_page.orders.is_empty());
}

#[tokio::test]
async fn test_seller_ships_and_buyer_is_notified() {
    let app = TestApp::new().await;
    let market = app.seed_marketplace().await;
    let order = app.place_order(&market, "pi_test_1").await;

    let shipped = app
        .state
        .services
        .orders
        .mark_order_as_shipped(market.seller.id, order.id)
        .await
        .unwrap();
    assert_eq!(shipped.order_status, OrderStatus::Shipped);

    let buyer_notes = app
        .state
        .services
        .notifications
        .list_for_user(market.buyer.id)
        .await
        .unwrap();
    assert!(buyer_notes
        .iter()
        .any(|n| n.message == notifications::ORDER_SHIPPED && n.model_id == order.id));
}

#[tokio::test]
async fn test_role_guards_on_status_changes() {
    let app = TestApp::new().await;
    let market = app.seed_marketplace().await;
    let stranger = app.seed_user("Stranger").await;
    let order = app.place_order(&market, "pi_test_1").await;
    let orders = &app.state.services.orders;

    assert_matches!(
        orders.mark_order_as_shipped(market.buyer.id, order.id).await,
        Err(ServiceError::BadRequest(_))
    );
    assert_matches!(
        orders.mark_order_as_received(market.seller.id, order.id).await,
        Err(ServiceError::BadRequest(_))
    );
    assert_matches!(
        orders.cancel_order(stranger.id, order.id).await,
        Err(ServiceError::Unauthorized(_))
    );
    assert_matches!(
        orders.cancel_order(market.buyer.id, Uuid::new_v4()).await,
        Err(ServiceError::NotFound(_))
    );

    assert_eq!(
        app.reload_order(order.id).await.order_status,
        OrderStatus::InProgress
    );
}

#[tokio::test]
async fn test_terminal_orders_cannot_change_status() {
    let app = TestApp::new().await;
    let market = app.seed_marketplace().await;
    let order = app.place_order(&market, "pi_test_1").await;
    let orders = &app.state.services.orders;

    orders
        .mark_order_as_received(market.buyer.id, order.id)
        .await
        .unwrap();

    assert_matches!(
        orders.cancel_order(market.seller.id, order.id).await,
        Err(ServiceError::BadRequest(_))
    );
    assert_matches!(
        orders.mark_order_as_shipped(market.seller.id, order.id).await,
        Err(ServiceError::BadRequest(_))
    );
    assert_matches!(
        orders
            .update_user_order(market.buyer.id, order.id, market.address.id)
            .await,
        Err(ServiceError::BadRequest(_))
    );
    assert_eq!(
        app.reload_order(order.id).await.order_status,
        OrderStatus::Shipped
    );
}

#[tokio::test]
async fn test_cancelling_paid_order_requests_refund() {
    let app = TestApp::new().await;
    let market = app.seed_marketplace().await;
    let order = app.place_order(&market, "pi_test_1").await;
    app.reconcile(
        WebhookEndpoint::Payments,
        payment_intent_event("payment_intent.succeeded", "pi_test_1", None),
    )
    .await
    .unwrap();

    let cancelled = app
        .state
        .services
        .orders
        .cancel_order(market.seller.id, order.id)
        .await
        .unwrap();

    assert_eq!(cancelled.order_status, OrderStatus::Cancelled);
    // The refund webhook moves the payment status later
    assert_eq!(cancelled.payment_status, PaymentStatus::Completed);
    assert_eq!(app.gateway.refunded_intents(), vec!["pi_test_1".to_string()]);

    let buyer_notes = app
        .state
        .services
        .notifications
        .list_for_user(market.buyer.id)
        .await
        .unwrap();
    assert!(buyer_notes
        .iter()
        .any(|n| n.message == notifications::ORDER_CANCELLED));
}

#[tokio::test]
async fn test_cancel_racing_payment_refunds_exactly_once() {
    let app = TestApp::new().await;
    let market = app.seed_marketplace().await;
    let order = app.place_order(&market, "pi_race").await;

    let cancelled = app
        .state
        .services
        .orders
        .cancel_order(market.buyer.id, order.id)
        .await
        .unwrap();
    assert_eq!(cancelled.order_status, OrderStatus::Cancelled);
    assert_eq!(cancelled.payment_status, PaymentStatus::Pending);
    assert!(app.gateway.refunded_intents().is_empty());

    // Payment lands after the cancel committed
    app.reconcile(
        WebhookEndpoint::Payments,
        payment_intent_event("payment_intent.succeeded", "pi_race", None),
    )
    .await
    .unwrap();

    assert_eq!(app.gateway.refunded_intents(), vec!["pi_race".to_string()]);
    let current = app.reload_order(order.id).await;
    assert_eq!(current.order_status, OrderStatus::Cancelled);
    assert_eq!(current.payment_status, PaymentStatus::Completed);
}

#[tokio::test]
async fn test_refund_failure_does_not_undo_cancellation() {
    let app = TestApp::new().await;
    let market = app.seed_marketplace().await;
    let order = app.place_order(&market, "pi_test_1").await;
    app.reconcile(
        WebhookEndpoint::Payments,
        payment_intent_event("payment_intent.succeeded", "pi_test_1", None),
    )
    .await
    .unwrap();
    app.gateway.fail_refunds();

    let cancelled = app
        .state
        .services
        .orders
        .cancel_order(market.buyer.id, order.id)
        .await
        .unwrap();

    assert_eq!(cancelled.order_status, OrderStatus::Cancelled);
    assert!(app.gateway.refunded_intents().is_empty());
}

#[tokio::test]
async fn test_buyer_can_change_delivery_address() {
    let app = TestApp::new().await;
    let market = app.seed_marketplace().await;
    let order = app.place_order(&market, "pi_test_1").await;
    let new_address = app.seed_address(&market.buyer).await;

    let updated = app
        .state
        .services
        .orders
        .update_user_order(market.buyer.id, order.id, new_address.id)
        .await
        .unwrap();
    assert_eq!(updated.address_id, new_address.id);
}

#[tokio::test]
async fn test_address_must_belong_to_buyer() {
    let app = TestApp::new().await;
    let market = app.seed_marketplace().await;
    let order = app.place_order(&market, "pi_test_1").await;
    let other = app.seed_user("Other").await;
    let other_store = app.seed_store(&other, "DE", StripeSetupStatus::Complete).await;
    let foreign_address = app.seed_address(&other).await;
    let orders = &app.state.services.orders;

    assert_matches!(
        orders
            .update_user_order(market.buyer.id, order.id, foreign_address.id)
            .await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        orders
            .update_user_order(market.seller.id, order.id, market.address.id)
            .await,
        Err(ServiceError::BadRequest(_))
    );
    assert_ne!(other_store.user_id, market.buyer.id);
    assert_eq!(app.reload_order(order.id).await.address_id, market.address.id);
}
