use crate::handlers::common::success_response;
use crate::{auth::CurrentUser, errors::ServiceError, AppState};
use axum::{
    extract::{Json, State},
    response::IntoResponse,
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Creates the router for checkout endpoints
pub fn checkout_routes() -> Router<Arc<AppState>> {
    Router::new().route("/sessions", post(create_checkout_session))
}

/// Start a hosted checkout for one of the caller's bags
async fn create_checkout_session(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(payload): Json<CreateCheckoutSessionRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let session = state
        .services
        .checkout
        .create_checkout_session(user.user_id, payload.bag_id, payload.address_id)
        .await?;

    Ok(success_response(session))
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCheckoutSessionRequest {
    pub bag_id: Uuid,
    pub address_id: Uuid,
}
