//! Thrift Market API
//!
//! Bags, hosted checkout, webhook reconciliation and orders for a
//! peer-to-peer secondhand clothing marketplace.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod services;
pub mod webhooks;

use axum::{routing::get, Json, Router};
use sea_orm::DatabaseConnection;
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<config::AppConfig>,
    pub event_sender: Arc<events::EventSender>,
    pub services: handlers::AppServices,
}

/// Buyer- and seller-facing routes, mounted under `/api/v1`
pub fn api_v1_routes() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/bags", handlers::commerce::bags::bags_routes())
        .nest("/checkout", handlers::commerce::checkout::checkout_routes())
        .merge(handlers::orders::orders_routes())
        .merge(handlers::notifications::notifications_routes())
}

/// Full application router with tracing and request timeouts applied.
pub fn app_router(state: Arc<AppState>) -> Router {
    let timeout = Duration::from_secs(state.config.request_timeout_secs);

    Router::new()
        .route("/", get(|| async { "thrift-market-api up" }))
        .route("/health", get(|| async { Json(json!({ "status": "ok" })) }))
        .nest("/api/v1", api_v1_routes())
        .nest(
            "/api/webhooks",
            handlers::payment_webhooks::webhook_routes(),
        )
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(timeout))
        .with_state(state)
}
