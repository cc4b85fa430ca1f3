use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::AppError;
use crate::models::shipment::Membership;
use crate::state::AppState;

/// Header carrying the authenticated user id, set by the upstream gateway.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Authenticated caller. Rejects with 401 when the identity header is
/// missing or blank.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|user_id| !user_id.is_empty())
            .map(|user_id| Caller {
                user_id: user_id.to_string(),
            })
            .ok_or(AppError::Unauthorized)
    }
}

impl Caller {
    /// The caller's organization membership; shipments cannot be
    /// attributed without one.
    pub async fn membership(&self, state: &AppState) -> Result<Membership, AppError> {
        state
            .store
            .membership_for_user(&self.user_id)
            .await?
            .ok_or_else(|| AppError::BadRequest("No organization membership".to_string()))
    }
}
