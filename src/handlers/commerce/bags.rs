use crate::handlers::common::{created_response, success_response};
use crate::{auth::CurrentUser, errors::ServiceError, AppState};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Creates the router for bag endpoints
pub fn bags_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(get_user_bags))
        .route("/items", post(add_to_bag))
        .route("/count", get(count_bag_items))
        .route("/:bag_id", get(get_user_bag))
        .route("/:bag_id/items/:item_id", delete(remove_from_bag))
}

/// Add a product to the caller's bag for that product's store
async fn add_to_bag(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(payload): Json<AddToBagRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let bag = state
        .services
        .bags
        .add_to_bag(user.user_id, payload.product_id)
        .await?;

    Ok(created_response(bag))
}

async fn remove_from_bag(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path((bag_id, item_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ServiceError> {
    let result = state
        .services
        .bags
        .remove_from_bag(user.user_id, bag_id, item_id)
        .await?;

    Ok(success_response(result))
}

async fn count_bag_items(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<impl IntoResponse, ServiceError> {
    let count = state.services.bags.count_bag_items(user.user_id).await?;
    Ok(success_response(BagCountResponse { count }))
}

async fn get_user_bags(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<impl IntoResponse, ServiceError> {
    let bags = state.services.bags.get_user_bags(user.user_id).await?;
    Ok(success_response(bags))
}

/// Get one bag; visible to its buyer and to the store's seller
async fn get_user_bag(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(bag_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let bag = state
        .services
        .bags
        .get_user_bag(user.user_id, bag_id)
        .await?;
    Ok(success_response(bag))
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddToBagRequest {
    pub product_id: Uuid,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct BagCountResponse {
    pub count: u64,
}
