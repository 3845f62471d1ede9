#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::{json, Value};
use thrift_market_api::{
    app_router,
    auth::USER_ID_HEADER,
    config::AppConfig,
    db,
    entities::commerce::{address, order, product, store, user, Order, StripeSetupStatus},
    errors::ServiceError,
    events::{self, EventSender},
    handlers::AppServices,
    services::{
        commerce::CheckoutReference,
        payments::{CheckoutSession, CheckoutSessionRequest, PaymentGateway, Refund},
    },
    webhooks::{signature::signature_header, ParsedEvent, ReconcileOutcome, WebhookEndpoint},
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const CONNECT_SECRET: &str = "whsec_connect_test";
pub const PAYMENT_SECRET: &str = "whsec_payment_test";
pub const REFUND_SECRET: &str = "whsec_refund_test";
pub const SITE_URL: &str = "https://thrift.test";
pub const CHECKOUT_URL: &str = "https://checkout.stripe.test/c/pay/cs_test";

/// Records outbound gateway calls instead of talking to Stripe.
pub struct FakeGateway {
    session_url: Mutex<Option<String>>,
    fail_refunds: Mutex<bool>,
    pub sessions: Mutex<Vec<CheckoutSessionRequest>>,
    pub refunds: Mutex<Vec<String>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            session_url: Mutex::new(Some(CHECKOUT_URL.to_string())),
            fail_refunds: Mutex::new(false),
            sessions: Mutex::new(Vec::new()),
            refunds: Mutex::new(Vec::new()),
        }
    }

    pub fn set_session_url(&self, url: Option<&str>) {
        *self.session_url.lock().unwrap() = url.map(str::to_string);
    }

    pub fn fail_refunds(&self) {
        *self.fail_refunds.lock().unwrap() = true;
    }

    pub fn last_session(&self) -> Option<CheckoutSessionRequest> {
        self.sessions.lock().unwrap().last().cloned()
    }

    pub fn refunded_intents(&self) -> Vec<String> {
        self.refunds.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CheckoutSession, ServiceError> {
        let mut sessions = self.sessions.lock().unwrap();
        sessions.push(request);
        Ok(CheckoutSession {
            id: format!("cs_test_{}", sessions.len()),
            url: self.session_url.lock().unwrap().clone(),
        })
    }

    async fn create_refund(&self, payment_intent_id: &str) -> Result<Refund, ServiceError> {
        if *self.fail_refunds.lock().unwrap() {
            return Err(ServiceError::ExternalServiceError(
                "refund rejected".to_string(),
            ));
        }
        let mut refunds = self.refunds.lock().unwrap();
        refunds.push(payment_intent_id.to_string());
        Ok(Refund {
            id: format!("re_test_{}", refunds.len()),
            status: Some("pending".to_string()),
        })
    }
}

/// A buyer, a seller with a payment-ready store, one product and the
/// buyer's address.
pub struct Marketplace {
    pub buyer: user::Model,
    pub seller: user::Model,
    pub store: store::Model,
    pub product: product::Model,
    pub address: address::Model,
}

/// Helper harness for spinning up an application state backed by an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: Arc<AppState>,
    pub gateway: Arc<FakeGateway>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            SITE_URL.to_string(),
            "test".to_string(),
        );
        // One connection keeps the in-memory database alive for the whole test.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.db_idle_timeout_secs = 3600;
        cfg.connect_webhook_secret = CONNECT_SECRET.to_string();
        cfg.payment_webhook_secret = PAYMENT_SECRET.to_string();
        cfg.refund_webhook_secret = REFUND_SECRET.to_string();

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(FakeGateway::new());
        let config = Arc::new(cfg);
        let services = AppServices::new(
            db_arc.clone(),
            gateway.clone(),
            event_sender.clone(),
            config.clone(),
        );

        let state = Arc::new(AppState {
            db: db_arc,
            config,
            event_sender,
            services,
        });

        Self {
            router: app_router(state.clone()),
            state,
            gateway,
            _event_task: event_task,
        }
    }

    pub async fn seed_user(&self, name: &str) -> user::Model {
        let id = Uuid::new_v4();
        user::ActiveModel {
            id: Set(id),
            name: Set(name.to_string()),
            email: Set(format!("{}-{}@thrift.test", name.to_lowercase(), id.simple())),
            can_sell: Set(false),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed user")
    }

    pub async fn seed_store(
        &self,
        owner: &user::Model,
        country: &str,
        setup: StripeSetupStatus,
    ) -> store::Model {
        let now = Utc::now();
        let id = Uuid::new_v4();
        store::ActiveModel {
            id: Set(id),
            user_id: Set(owner.id),
            name: Set(format!("{}'s rail", owner.name)),
            country: Set(country.to_string()),
            stripe_account_id: Set(Some(format!("acct_{}", id.simple()))),
            stripe_setup_status: Set(setup),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed store")
    }

    pub async fn seed_product(
        &self,
        store: &store::Model,
        name: &str,
        price: i64,
        shipping_price: i64,
    ) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            store_id: Set(store.id),
            name: Set(name.to_string()),
            description: Set(format!("Pre-loved {}", name.to_lowercase())),
            images: Set(json!([format!("https://img.thrift.test/{}.jpg", name)])),
            price: Set(price),
            shipping_price: Set(shipping_price),
            sold: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product")
    }

    pub async fn seed_address(&self, owner: &user::Model) -> address::Model {
        address::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(owner.id),
            name: Set(owner.name.clone()),
            line1: Set("1 Market Street".to_string()),
            line2: Set(None),
            city: Set("Leeds".to_string()),
            postal_code: Set("LS1 1AA".to_string()),
            country: Set("GB".to_string()),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed address")
    }

    pub async fn seed_marketplace(&self) -> Marketplace {
        let buyer = self.seed_user("Buyer").await;
        let seller = self.seed_user("Seller").await;
        let store = self
            .seed_store(&seller, "GB", StripeSetupStatus::Complete)
            .await;
        let product = self.seed_product(&store, "Denim Jacket", 2500, 450).await;
        let address = self.seed_address(&buyer).await;
        Marketplace {
            buyer,
            seller,
            store,
            product,
            address,
        }
    }

    /// Runs a bag through checkout and the completed-checkout webhook,
    /// returning the materialized order.
    pub async fn place_order(&self, market: &Marketplace, payment_intent: &str) -> order::Model {
        let bag = self
            .state
            .services
            .bags
            .add_to_bag(market.buyer.id, market.product.id)
            .await
            .expect("add to bag");
        self.state
            .services
            .checkout
            .create_checkout_session(market.buyer.id, bag.bag.id, market.address.id)
            .await
            .expect("create checkout session");

        let reference = self.last_reference();
        let outcome = self
            .reconcile(
                WebhookEndpoint::Payments,
                checkout_completed_event_charging(
                    &reference.encode().unwrap(),
                    "cs_test_order",
                    Some(payment_intent),
                    self.last_session_amount(),
                ),
            )
            .await
            .expect("reconcile checkout");
        assert_eq!(outcome, ReconcileOutcome::Applied);

        self.order_for_bag(bag.bag.id).await.expect("order created")
    }

    /// What the gateway would charge for the last requested session.
    pub fn last_session_amount(&self) -> i64 {
        let session = self.gateway.last_session().expect("checkout session requested");
        session
            .line_items
            .iter()
            .map(|item| item.unit_amount * i64::from(item.quantity))
            .sum()
    }

    pub fn last_reference(&self) -> CheckoutReference {
        let session = self.gateway.last_session().expect("checkout session requested");
        CheckoutReference::decode(&session.client_reference_id).expect("valid reference")
    }

    pub async fn reconcile(
        &self,
        endpoint: WebhookEndpoint,
        event: Value,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let parsed = ParsedEvent::parse(event.to_string().as_bytes())?;
        self.state.services.reconciler.reconcile(endpoint, parsed).await
    }

    pub async fn order_for_bag(&self, bag_id: Uuid) -> Option<order::Model> {
        use sea_orm::{ColumnTrait, QueryFilter};
        Order::find()
            .filter(order::Column::BagId.eq(bag_id))
            .one(&*self.state.db)
            .await
            .expect("query order")
    }

    pub async fn reload_order(&self, order_id: Uuid) -> order::Model {
        Order::find_by_id(order_id)
            .one(&*self.state.db)
            .await
            .expect("query order")
            .expect("order exists")
    }

    /// Send a request against the router, optionally as `user_id`.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        user_id: Option<Uuid>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(id) = user_id {
            builder = builder.header(USER_ID_HEADER, id.to_string());
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// POST a raw webhook body with an optional signature header.
    pub async fn post_webhook(&self, path: &str, body: Vec<u8>, signature: Option<&str>) -> Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header("stripe-signature", signature);
        }
        let request = builder.body(Body::from(body)).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// POST `event` to `path`, signed with `secret` at the current time.
    pub async fn post_signed_webhook(&self, path: &str, secret: &str, event: &Value) -> Response {
        let body = event.to_string().into_bytes();
        let header = signature_header(secret, Utc::now().timestamp(), &body).expect("sign payload");
        self.post_webhook(path, body, Some(&header)).await
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body is json")
}

pub fn checkout_completed_event(reference: &str, session_id: &str, payment_intent: Option<&str>) -> Value {
    json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": session_id,
            "client_reference_id": reference,
            "payment_intent": payment_intent,
        }}
    })
}

pub fn checkout_completed_event_charging(
    reference: &str,
    session_id: &str,
    payment_intent: Option<&str>,
    amount_total: i64,
) -> Value {
    let mut event = checkout_completed_event(reference, session_id, payment_intent);
    event["data"]["object"]["amount_total"] = json!(amount_total);
    event
}

pub fn payment_intent_event(kind: &str, payment_intent: &str, reference: Option<&str>) -> Value {
    let metadata = match reference {
        Some(reference) => json!({ "checkout_reference": reference }),
        None => json!({}),
    };
    json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "type": kind,
        "data": { "object": { "id": payment_intent, "metadata": metadata } }
    })
}

pub fn charge_refunded_event(payment_intent: &str, refunded: bool) -> Value {
    json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "type": "charge.refunded",
        "data": { "object": {
            "id": format!("ch_{}", Uuid::new_v4().simple()),
            "payment_intent": payment_intent,
            "refunded": refunded,
        }}
    })
}

pub fn account_updated_event(account_id: &str, charges_enabled: bool, details_submitted: bool) -> Value {
    json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "type": "account.updated",
        "data": { "object": {
            "id": account_id,
            "charges_enabled": charges_enabled,
            "details_submitted": details_submitted,
        }}
    })
}
