mod common;

use axum::http::{Method, StatusCode};
use chrono::Utc;
use common::{
    body_json, checkout_completed_event, payment_intent_event, TestApp, CONNECT_SECRET,
    PAYMENT_SECRET, REFUND_SECRET,
};
use sea_orm::{EntityTrait, PaginatorTrait};
use serde_json::json;
use thrift_market_api::{
    entities::commerce::{Order, PaymentStatus},
    services::notifications,
    webhooks::signature::signature_header,
};

#[tokio::test]
async fn test_signed_checkout_webhook_creates_order() {
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
    let reference = app.last_reference().encode().unwrap();
    let event = checkout_completed_event(&reference, "cs_http", Some("pi_http"));

    let response = app
        .post_signed_webhook("/api/webhooks/payments", PAYMENT_SECRET, &event)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "received": true }));
    assert!(app.order_for_bag(bag.bag.id).await.is_some());

    // Redelivery is acknowledged without duplicating the order
    let replay = app
        .post_signed_webhook("/api/webhooks/payments", PAYMENT_SECRET, &event)
        .await;
    assert_eq!(replay.status(), StatusCode::OK);
    assert_eq!(Order::find().count(&*app.state.db).await.unwrap(), 1);
}

#[tokio::test]
async fn test_bad_signatures_are_rejected_before_any_write() {
    let app = TestApp::new().await;
    let market = app.seed_marketplace().await;
    let order = app.place_order(&market, "pi_test_1").await;
    let event = payment_intent_event("payment_intent.succeeded", "pi_test_1", None);
    let body = event.to_string().into_bytes();
    let now = Utc::now().timestamp();

    let missing = app
        .post_webhook("/api/webhooks/payments", body.clone(), None)
        .await;
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

    // Signed with another endpoint's secret
    let wrong_secret = signature_header(REFUND_SECRET, now, &body).unwrap();
    let response = app
        .post_webhook("/api/webhooks/payments", body.clone(), Some(&wrong_secret))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let stale = signature_header(PAYMENT_SECRET, now - 3600, &body).unwrap();
    let response = app
        .post_webhook("/api/webhooks/payments", body.clone(), Some(&stale))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let signed = signature_header(PAYMENT_SECRET, now, &body).unwrap();
    let mut tampered = body.clone();
    tampered.extend_from_slice(b" ");
    let response = app
        .post_webhook("/api/webhooks/payments", tampered, Some(&signed))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert_eq!(
        app.reload_order(order.id).await.payment_status,
        PaymentStatus::Pending
    );
}

#[tokio::test]
async fn test_unhandled_event_kinds_are_acknowledged() {
    let app = TestApp::new().await;
    let event = json!({
        "id": "evt_other",
        "type": "customer.created",
        "data": { "object": { "id": "cus_1" } }
    });

    let response = app
        .post_signed_webhook("/api/webhooks/connect", CONNECT_SECRET, &event)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_order_is_reported_so_the_gateway_retries() {
    let app = TestApp::new().await;
    let event = payment_intent_event("payment_intent.succeeded", "pi_nowhere", None);

    let response = app
        .post_signed_webhook("/api/webhooks/payments", PAYMENT_SECRET, &event)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_payload_is_bad_request() {
    let app = TestApp::new().await;
    let body = b"{\"id\": 1".to_vec();
    let header = signature_header(PAYMENT_SECRET, Utc::now().timestamp(), &body).unwrap();

    let response = app
        .post_webhook("/api/webhooks/payments", body, Some(&header))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_bag_and_checkout_routes() {
    let app = TestApp::new().await;
    let market = app.seed_marketplace().await;
    let buyer = Some(market.buyer.id);

    let unauthenticated = app.request(Method::GET, "/api/v1/bags", None, None).await;
    assert_eq!(unauthenticated.status(), StatusCode::UNAUTHORIZED);

    let created = app
        .request(
            Method::POST,
            "/api/v1/bags/items",
            Some(json!({ "productId": market.product.id })),
            buyer,
        )
        .await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let bag = body_json(created).await;
    assert_eq!(bag["grandTotal"], 2950);
    assert_eq!(bag["items"].as_array().unwrap().len(), 1);
    let bag_id = bag["id"].as_str().unwrap().to_string();

    let count = app
        .request(Method::GET, "/api/v1/bags/count", None, buyer)
        .await;
    assert_eq!(count.status(), StatusCode::OK);
    assert_eq!(body_json(count).await, json!({ "count": 1 }));

    let duplicate = app
        .request(
            Method::POST,
            "/api/v1/bags/items",
            Some(json!({ "productId": market.product.id })),
            buyer,
        )
        .await;
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    let checkout = app
        .request(
            Method::POST,
            "/api/v1/checkout/sessions",
            Some(json!({ "bagId": bag_id, "addressId": market.address.id })),
            buyer,
        )
        .await;
    assert_eq!(checkout.status(), StatusCode::OK);
    assert_eq!(body_json(checkout).await["url"], common::CHECKOUT_URL);

    let seller_view = app
        .request(
            Method::GET,
            &format!("/api/v1/bags/{}", bag_id),
            None,
            Some(market.seller.id),
        )
        .await;
    assert_eq!(seller_view.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_order_routes() {
    let app = TestApp::new().await;
    let market = app.seed_marketplace().await;
    let order = app.place_order(&market, "pi_test_1").await;

    let listing = app
        .request(Method::GET, "/api/v1/orders?page=1&per_page=5", None, Some(market.buyer.id))
        .await;
    assert_eq!(listing.status(), StatusCode::OK);
    let body = body_json(listing).await;
    assert_eq!(body["pagination"]["total"], 1);
    assert_eq!(body["pagination"]["per_page"], 5);
    assert_eq!(body["data"][0]["id"], order.id.to_string());

    let store_listing = app
        .request(Method::GET, "/api/v1/store/orders", None, Some(market.seller.id))
        .await;
    assert_eq!(store_listing.status(), StatusCode::OK);

    let wrong_party = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/shipped", order.id),
            None,
            Some(market.buyer.id),
        )
        .await;
    assert_eq!(wrong_party.status(), StatusCode::BAD_REQUEST);

    let shipped = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/shipped", order.id),
            None,
            Some(market.seller.id),
        )
        .await;
    assert_eq!(shipped.status(), StatusCode::OK);
    assert_eq!(body_json(shipped).await["orderStatus"], "shipped");
}

#[tokio::test]
async fn test_notifications_route_lists_callers_notifications() {
    let app = TestApp::new().await;
    let market = app.seed_marketplace().await;
    let order = app.place_order(&market, "pi_test_1").await;

    let response = app
        .request(Method::GET, "/api/v1/notifications", None, Some(market.seller.id))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let notes = body.as_array().expect("array body");
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0]["message"], notifications::NEW_ORDER);
    assert_eq!(notes[0]["modelId"], order.id.to_string());
    assert_eq!(notes[0]["notifiedId"], market.seller.id.to_string());

    let buyer = app
        .request(Method::GET, "/api/v1/notifications", None, Some(market.buyer.id))
        .await;
    assert_eq!(body_json(buyer).await, json!([]));

    let anonymous = app
        .request(Method::GET, "/api/v1/notifications", None, None)
        .await;
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
}
