//! Caller identity.
//!
//! Session management lives upstream; it forwards the signed-in user's id
//! in the `x-user-id` header and this module only turns that into a typed
//! extractor.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::errors::ServiceError;

pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated caller of an RPC endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser {
    pub user_id: Uuid,
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| ServiceError::Unauthorized("Not signed in".to_string()))?
            .to_str()
            .map_err(|_| ServiceError::Unauthorized("Invalid user id header".to_string()))?;

        let user_id = Uuid::parse_str(raw.trim())
            .map_err(|_| ServiceError::Unauthorized("Invalid user id header".to_string()))?;

        Ok(CurrentUser { user_id })
    }
}
