mod common;

use assert_matches::assert_matches;
use common::{TestApp, CHECKOUT_URL, SITE_URL};
use sea_orm::{EntityTrait, PaginatorTrait};
use thrift_market_api::{
    entities::commerce::{Order, StripeSetupStatus},
    errors::ServiceError,
    services::commerce::checkout_reference::MAX_REFERENCE_LEN,
};
use uuid::Uuid;

#[tokio::test]
async fn test_checkout_session_carries_reference_fee_and_destination() {
    let app = TestApp::new().await;
    let market = app.seed_marketplace().await;
    let scarf = app.seed_product(&market.store, "Wool Scarf", 1200, 300).await;
    let bags = &app.state.services.bags;

    bags.add_to_bag(market.buyer.id, market.product.id).await.unwrap();
    let bag = bags.add_to_bag(market.buyer.id, scarf.id).await.unwrap();

    let response = app
        .state
        .services
        .checkout
        .create_checkout_session(market.buyer.id, bag.bag.id, market.address.id)
        .await
        .expect("checkout session");
    assert_eq!(response.url, CHECKOUT_URL);

    let request = app.gateway.last_session().unwrap();
    assert_eq!(request.currency, "gbp");
    assert_eq!(
        request.destination_account,
        market.store.stripe_account_id.clone().unwrap()
    );
    // 10% of 4450, rounded up
    assert_eq!(request.application_fee_amount, 445);
    assert_eq!(request.line_items.len(), 2);
    assert_eq!(
        request.line_items.iter().map(|l| l.unit_amount).sum::<i64>(),
        4450
    );
    assert!(request.line_items.iter().all(|l| l.quantity == 1));
    assert_eq!(request.success_url, format!("{}/orders?checkout=success", SITE_URL));
    assert_eq!(request.cancel_url, format!("{}/bags/{}", SITE_URL, bag.bag.id));
    assert!(request.client_reference_id.len() <= MAX_REFERENCE_LEN);

    let reference = app.last_reference();
    assert_eq!(reference.bag_id, bag.bag.id);
    assert_eq!(reference.store_id, market.store.id);
    assert_eq!(reference.seller_id, market.seller.id);
    assert_eq!(reference.user_id, market.buyer.id);
    assert_eq!(reference.address_id, market.address.id);
}

#[tokio::test]
async fn test_checkout_writes_no_order() {
    let app = TestApp::new().await;
    let market = app.seed_marketplace().await;

    let bag = app
        .state
        .services
        .bags
        .add_to_bag(market.buyer.id, market.product.id)
        .await
        .unwrap();
    app.state
        .services
        .checkout
        .create_checkout_session(market.buyer.id, bag.bag.id, market.address.id)
        .await
        .unwrap();

    assert_eq!(Order::find().count(&*app.state.db).await.unwrap(), 0);
}

#[tokio::test]
async fn test_fee_rounds_up_fractional_minor_units() {
    let app = TestApp::new().await;
    let buyer = app.seed_user("Buyer").await;
    let seller = app.seed_user("Seller").await;
    let store = app.seed_store(&seller, "US", StripeSetupStatus::Complete).await;
    let tee = app.seed_product(&store, "Band Tee", 999, 0).await;
    let address = app.seed_address(&buyer).await;

    let bag = app.state.services.bags.add_to_bag(buyer.id, tee.id).await.unwrap();
    app.state
        .services
        .checkout
        .create_checkout_session(buyer.id, bag.bag.id, address.id)
        .await
        .unwrap();

    let request = app.gateway.last_session().unwrap();
    assert_eq!(request.currency, "usd");
    assert_eq!(request.application_fee_amount, 100);
}

#[tokio::test]
async fn test_store_without_completed_setup_is_rejected() {
    let app = TestApp::new().await;
    let buyer = app.seed_user("Buyer").await;
    let seller = app.seed_user("Seller").await;
    let store = app
        .seed_store(&seller, "GB", StripeSetupStatus::InProgress)
        .await;
    let coat = app.seed_product(&store, "Coat", 5000, 500).await;
    let address = app.seed_address(&buyer).await;

    let bag = app.state.services.bags.add_to_bag(buyer.id, coat.id).await.unwrap();
    let result = app
        .state
        .services
        .checkout
        .create_checkout_session(buyer.id, bag.bag.id, address.id)
        .await;

    assert_matches!(result, Err(ServiceError::BadRequest(_)));
    assert!(app.gateway.last_session().is_none());
}

#[tokio::test]
async fn test_unsupported_country_is_rejected() {
    let app = TestApp::new().await;
    let buyer = app.seed_user("Buyer").await;
    let seller = app.seed_user("Seller").await;
    let store = app.seed_store(&seller, "ZZ", StripeSetupStatus::Complete).await;
    let coat = app.seed_product(&store, "Coat", 5000, 500).await;
    let address = app.seed_address(&buyer).await;

    let bag = app.state.services.bags.add_to_bag(buyer.id, coat.id).await.unwrap();
    let result = app
        .state
        .services
        .checkout
        .create_checkout_session(buyer.id, bag.bag.id, address.id)
        .await;

    assert_matches!(result, Err(ServiceError::BadRequest(_)));
}

#[tokio::test]
async fn test_foreign_bag_or_address_is_not_found() {
    let app = TestApp::new().await;
    let market = app.seed_marketplace().await;
    let stranger = app.seed_user("Stranger").await;
    let stranger_address = app.seed_address(&stranger).await;
    let checkout = &app.state.services.checkout;

    let bag = app
        .state
        .services
        .bags
        .add_to_bag(market.buyer.id, market.product.id)
        .await
        .unwrap();

    assert_matches!(
        checkout
            .create_checkout_session(stranger.id, bag.bag.id, stranger_address.id)
            .await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        checkout
            .create_checkout_session(market.buyer.id, bag.bag.id, stranger_address.id)
            .await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        checkout
            .create_checkout_session(market.buyer.id, Uuid::new_v4(), market.address.id)
            .await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn test_missing_session_url_is_internal_error() {
    let app = TestApp::new().await;
    let market = app.seed_marketplace().await;
    app.gateway.set_session_url(None);

    let bag = app
        .state
        .services
        .bags
        .add_to_bag(market.buyer.id, market.product.id)
        .await
        .unwrap();
    let result = app
        .state
        .services
        .checkout
        .create_checkout_session(market.buyer.id, bag.bag.id, market.address.id)
        .await;

    assert_matches!(result, Err(ServiceError::InternalError(_)));
}
