// src/routes/settings_routes.rs

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, QuotaSetting},
};

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/settings/daily-quota",
        get(get_daily_quota).post(set_daily_quota),
    )
}

#[derive(Debug, Serialize)]
pub struct DailyQuotaData {
    pub active: Option<QuotaSetting>,
    pub history: Vec<QuotaSetting>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

pub async fn get_daily_quota(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<ApiOk<DailyQuotaData>>, ApiError> {
    let limit = q.limit.unwrap_or(20).clamp(1, 200);

    let active = state.booking.active_quota().await?;
    let history = state.booking.quota_history(limit).await?;

    Ok(Json(ApiOk {
        data: DailyQuotaData { active, history },
    }))
}

#[derive(Debug, Deserialize)]
pub struct SetQuotaRequest {
    pub quota: i32,
    /// Defaults to now; a future instant schedules the change.
    pub effective_at: Option<DateTime<Utc>>,
}

fn ensure_admin_or_manager(auth: &AuthContext) -> Result<(), ApiError> {
    // roles: 1 admin, 2 manager
    if auth.role == 1 || auth.role == 2 {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Only admin/manager can change the daily quota".into(),
        ))
    }
}

pub async fn set_daily_quota(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<SetQuotaRequest>,
) -> Result<Json<ApiOk<QuotaSetting>>, ApiError> {
    ensure_admin_or_manager(&auth)?;

    let setting = state
        .booking
        .set_quota(req.quota, req.effective_at, Some(auth.user_id))
        .await?;

    Ok(Json(ApiOk { data: setting }))
}
