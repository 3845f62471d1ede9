use crate::handlers::common::success_response;
use crate::{auth::CurrentUser, errors::ServiceError, AppState};
use axum::{extract::State, response::IntoResponse, routing::get, Router};
use std::sync::Arc;

pub fn notifications_routes() -> Router<Arc<AppState>> {
    Router::new().route("/notifications", get(list_notifications))
}

/// Notifications addressed to the caller, newest first
async fn list_notifications(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<impl IntoResponse, ServiceError> {
    let notifications = state
        .services
        .notifications
        .list_for_user(user.user_id)
        .await?;
    Ok(success_response(notifications))
}
