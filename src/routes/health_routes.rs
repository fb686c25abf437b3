use axum::{Json, Router, extract::State, routing::get};

use crate::error::ApiError;
use crate::models::{ApiOk, AppState};

#[derive(serde::Serialize)]
pub struct HealthData {
    pub ok: bool,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

pub async fn health(State(state): State<AppState>) -> Result<Json<ApiOk<HealthData>>, ApiError> {
    sqlx::query("SELECT 1")
        .execute(&state.db)
        .await
        .map_err(|e| ApiError::Unavailable("DB_UNAVAILABLE", format!("db error: {e}")))?;

    Ok(Json(ApiOk {
        data: HealthData { ok: true },
    }))
}
