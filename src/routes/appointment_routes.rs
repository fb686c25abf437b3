// src/routes/appointment_routes.rs

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    booking::{AppointmentView, DayAvailability},
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{role_to_string, ApiOk, Appointment, AppState, AppointmentStatus},
};

/*
Roles (app_user.roles):
0 patient
1 admin
2 manager
3 doctor
4 receptionist
*/

fn is_patient(auth: &AuthContext) -> bool {
    auth.role == 0
}
fn is_admin(auth: &AuthContext) -> bool {
    auth.role == 1
}
fn is_manager(auth: &AuthContext) -> bool {
    auth.role == 2
}
fn is_receptionist(auth: &AuthContext) -> bool {
    auth.role == 4
}

fn can_manage_bookings(auth: &AuthContext) -> bool {
    is_admin(auth) || is_manager(auth) || is_receptionist(auth)
}

/// Patient accounts book and view only for themselves; desk staff pick the patient.
fn resolve_target_patient(auth: &AuthContext, requested: Option<Uuid>) -> Result<Uuid, ApiError> {
    if can_manage_bookings(auth) {
        return requested.ok_or_else(|| {
            ApiError::BadRequest(
                "VALIDATION_ERROR",
                "patient_id is required for staff bookings".into(),
            )
        });
    }

    if is_patient(auth) {
        let Some(own) = auth.patient_id else {
            return Err(ApiError::BadRequest(
                "NO_PATIENT_PROFILE",
                "This account has no patient profile".into(),
            ));
        };
        if requested.is_some_and(|p| p != own) {
            return Err(ApiError::Forbidden(
                "FORBIDDEN",
                "Patients can only book for themselves".into(),
            ));
        }
        return Ok(own);
    }

    Err(ApiError::Forbidden(
        "FORBIDDEN",
        format!("{} accounts cannot book appointments", role_to_string(auth.role)),
    ))
}

fn parse_day(raw: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest("VALIDATION_ERROR", "day must be YYYY-MM-DD".into()))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/appointments", post(create_appointment))
        .route("/appointments/mine", get(list_my_appointments))
        .route("/appointments/availability", get(get_availability))
        .route("/appointments/{appointment_id}/cancel", post(cancel_appointment))
        .route("/patients/{patient_id}/appointments", get(list_patient_appointments))
}

/* ============================================================
   Response DTOs
   ============================================================ */

#[derive(Debug, Serialize)]
pub struct AppointmentDto {
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub day: NaiveDate,
    pub position: i32,
    pub status: AppointmentStatus,
    pub estimated_time: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub cancelled_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl AppointmentDto {
    fn from_row(a: Appointment, estimated_time: String) -> Self {
        Self {
            appointment_id: a.appointment_id,
            patient_id: a.patient_id,
            day: a.day,
            position: a.position,
            status: a.status,
            estimated_time,
            created_at: a.created_at,
            cancelled_at: a.cancelled_at,
        }
    }
}

impl From<AppointmentView> for AppointmentDto {
    fn from(v: AppointmentView) -> Self {
        AppointmentDto::from_row(v.appointment, v.estimated_time)
    }
}

/* ============================================================
   POST /appointments
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct CreateAppointmentRequest {
    // YYYY-MM-DD
    pub day: String,
    pub patient_id: Option<Uuid>,
}

pub async fn create_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateAppointmentRequest>,
) -> Result<Json<ApiOk<AppointmentDto>>, ApiError> {
    let patient_id = resolve_target_patient(&auth, req.patient_id)?;
    let day = parse_day(&req.day)?;

    // Desk policy: no bookings for days that have already passed.
    if day < Local::now().date_naive() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "day must not be in the past".into(),
        ));
    }

    let reservation = state.booking.reserve(patient_id, day).await?;

    Ok(Json(ApiOk {
        data: AppointmentDto::from_row(reservation.appointment, reservation.estimated_time),
    }))
}

/* ============================================================
   Listing
   ============================================================ */

pub async fn list_my_appointments(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<AppointmentDto>>>, ApiError> {
    let Some(patient_id) = auth.patient_id else {
        return Err(ApiError::BadRequest(
            "NO_PATIENT_PROFILE",
            "This account has no patient profile".into(),
        ));
    };

    let rows = state.booking.list_for_patient(patient_id).await?;
    Ok(Json(ApiOk {
        data: rows.into_iter().map(AppointmentDto::from).collect(),
    }))
}

pub async fn list_patient_appointments(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<ApiOk<Vec<AppointmentDto>>>, ApiError> {
    if !can_manage_bookings(&auth) && auth.patient_id != Some(patient_id) {
        return Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Only desk staff can view other patients' appointments".into(),
        ));
    }

    let rows = state.booking.list_for_patient(patient_id).await?;
    Ok(Json(ApiOk {
        data: rows.into_iter().map(AppointmentDto::from).collect(),
    }))
}

/* ============================================================
   GET /appointments/availability?day=YYYY-MM-DD
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub day: String,
}

pub async fn get_availability(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<AvailabilityQuery>,
) -> Result<Json<ApiOk<DayAvailability>>, ApiError> {
    let day = parse_day(&q.day)?;
    let availability = state.booking.availability(day).await?;
    Ok(Json(ApiOk { data: availability }))
}

/* ============================================================
   POST /appointments/{id}/cancel
   ============================================================ */

pub async fn cancel_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentDto>>, ApiError> {
    let existing = state.booking.find(appointment_id).await?;

    if !can_manage_bookings(&auth) && auth.patient_id != Some(existing.patient_id) {
        return Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Patients can only cancel their own appointments".into(),
        ));
    }

    let row = state.booking.cancel(appointment_id).await?;
    let estimated_time = state.booking.estimate(row.position);

    Ok(Json(ApiOk {
        data: AppointmentDto::from_row(row, estimated_time),
    }))
}
