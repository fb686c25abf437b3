use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::booking::{BookingError, MAX_QUOTA};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorObject,
}

#[derive(Debug, Serialize)]
pub struct ErrorObject {
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(&'static str, String),
    Forbidden(&'static str, String),
    BadRequest(&'static str, String),
    NotFound(&'static str, String),
    Conflict(&'static str, String),
    Unavailable(&'static str, String),
    Internal(String),
}

impl ApiError {
    pub fn session_expired() -> Self {
        ApiError::Unauthorized("SESSION_EXPIRED", "Session expired".into())
    }

    fn to_error_response(code: &str, message: &str) -> Json<ErrorResponse> {
        Json(ErrorResponse {
            error: ErrorObject {
                code: code.to_string(),
                message: message.to_string(),
            },
        })
    }
}

impl From<BookingError> for ApiError {
    fn from(e: BookingError) -> Self {
        match e {
            BookingError::Unconfigured => ApiError::Unavailable(
                "QUOTA_NOT_CONFIGURED",
                "Bookings are not open yet: no daily quota has been configured".into(),
            ),
            BookingError::QuotaExceeded(day) => ApiError::Conflict(
                "DAY_FULL",
                format!("All appointments for {day} are taken"),
            ),
            BookingError::PatientNotFound => {
                ApiError::NotFound("PATIENT_NOT_FOUND", "patient not found".into())
            }
            BookingError::NotFound => {
                ApiError::NotFound("NOT_FOUND", "appointment not found".into())
            }
            BookingError::InvalidQuota => ApiError::BadRequest(
                "VALIDATION_ERROR",
                format!("quota must be between 0 and {MAX_QUOTA}"),
            ),
            BookingError::BackdatedQuota { requested, active } => ApiError::BadRequest(
                "VALIDATION_ERROR",
                format!("effective_at {requested} is earlier than the active quota ({active})"),
            ),
            // details are logged by the booking service, not sent to clients
            BookingError::Storage(_) => ApiError::Internal("storage failure".into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(code, msg) => {
                (StatusCode::UNAUTHORIZED, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Forbidden(code, msg) => {
                (StatusCode::FORBIDDEN, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::BadRequest(code, msg) => {
                (StatusCode::BAD_REQUEST, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::NotFound(code, msg) => {
                (StatusCode::NOT_FOUND, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Conflict(code, msg) => {
                (StatusCode::CONFLICT, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Unavailable(code, msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ApiError::to_error_response(code, &msg),
            )
                .into_response(),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::to_error_response("INTERNAL", &msg),
            )
                .into_response(),
        }
    }
}
