use crate::handlers::common::{success_response, validate_input, PaginatedResponse, PaginationParams};
use crate::{auth::CurrentUser, errors::ServiceError, AppState};
use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Creates the router for order endpoints
pub fn orders_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", get(get_user_orders))
        .route("/store/orders", get(get_store_orders))
        .route("/orders/:id/cancel", post(cancel_order))
        .route("/orders/:id/received", post(mark_order_as_received))
        .route("/orders/:id/shipped", post(mark_order_as_shipped))
        .route("/orders/:id/address", put(update_user_order))
}

/// Orders the caller placed as a buyer
async fn get_user_orders(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&params)?;

    let list = state
        .services
        .orders
        .get_user_orders(user.user_id, params.page, params.per_page)
        .await?;

    Ok(success_response(PaginatedResponse::new(
        list.orders,
        list.page,
        list.per_page,
        list.total,
    )))
}

/// Orders received by the caller's store
async fn get_store_orders(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&params)?;

    let list = state
        .services
        .orders
        .get_store_orders(user.user_id, params.page, params.per_page)
        .await?;

    Ok(success_response(PaginatedResponse::new(
        list.orders,
        list.page,
        list.per_page,
        list.total,
    )))
}

async fn cancel_order(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.orders.cancel_order(user.user_id, id).await?;
    Ok(success_response(order))
}

async fn mark_order_as_received(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .mark_order_as_received(user.user_id, id)
        .await?;
    Ok(success_response(order))
}

async fn mark_order_as_shipped(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .mark_order_as_shipped(user.user_id, id)
        .await?;
    Ok(success_response(order))
}

/// Change the delivery address of an order that has not shipped
async fn update_user_order(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateOrderAddressRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .update_user_order(user.user_id, id, payload.address_id)
        .await?;
    Ok(success_response(order))
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOrderAddressRequest {
    pub address_id: Uuid,
}
