use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::auth::Caller;
use crate::error::AppError;
use crate::messaging::template::DEFAULT_TEMPLATES;
use crate::models::shipment::MemberRole;
use crate::state::AppState;
use crate::store::StoreError;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/onboarding", post(onboard))
        .route("/api/setup/default-templates", post(seed_default_templates))
}

async fn seed_templates(state: &AppState, org_id: Uuid) -> Result<usize, StoreError> {
    for (status, body) in DEFAULT_TEMPLATES {
        state.store.upsert_template(org_id, *status, body).await?;
    }
    Ok(DEFAULT_TEMPLATES.len())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingRequest {
    #[serde(default)]
    pub org_name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingResponse {
    pub ok: bool,
    pub org_id: Uuid,
}

async fn onboard(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(request): Json<OnboardingRequest>,
) -> Result<Json<OnboardingResponse>, AppError> {
    let org_name = request.org_name.trim();
    if org_name.chars().count() < 2 {
        return Err(AppError::BadRequest(
            "orgName must be at least 2 characters".to_string(),
        ));
    }

    let membership = match state.store.create_org(&caller.user_id, org_name).await {
        Ok(membership) => membership,
        Err(err) if err.is_unique_violation() => {
            return Err(AppError::Conflict(
                "User already belongs to an organization".to_string(),
            ));
        }
        Err(err) => return Err(err.into()),
    };

    let seeded = seed_templates(&state, membership.org_id).await?;
    info!(org_id = %membership.org_id, templates = seeded, "organization created");

    Ok(Json(OnboardingResponse {
        ok: true,
        org_id: membership.org_id,
    }))
}

#[derive(Serialize)]
pub struct SeedResponse {
    pub ok: bool,
    pub templates: usize,
}

async fn seed_default_templates(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<Json<SeedResponse>, AppError> {
    let membership = caller.membership(&state).await?;
    if !matches!(membership.role, MemberRole::Admin | MemberRole::Staff) {
        return Err(AppError::Forbidden(
            "Only admin or staff can manage templates".to_string(),
        ));
    }

    let templates = seed_templates(&state, membership.org_id).await?;
    Ok(Json(SeedResponse { ok: true, templates }))
}
