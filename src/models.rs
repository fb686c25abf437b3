use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::booking::BookingService;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub booking: BookingService,
}

/* -------------------------
   API envelope
--------------------------*/

#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub data: T,
}

/* -------------------------
   DB Row Models
--------------------------*/

/// Appointment status as stored in `appointment.status`.
/// The only transition is Booked -> Cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "smallint")]
#[repr(i16)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Booked = 0,
    Cancelled = 1,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Appointment {
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub day: NaiveDate,
    pub position: i32,
    pub status: AppointmentStatus,
    /// Quota record that was in effect when this row was admitted.
    pub quota_setting_id: i64,
    pub created_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QuotaSetting {
    pub setting_id: i64,
    pub quota: i32,
    pub effective_at: DateTime<Utc>,
    pub changed_by_user_id: Option<Uuid>,
}

/* -------------------------
   Helpers
--------------------------*/

/// Role mapping (app_user.roles):
/// 0 Patient, 1 Admin, 2 Manager, 3 Doctor, 4 Receptionist
pub fn role_to_string(role: i16) -> String {
    match role {
        0 => "patient",
        1 => "admin",
        2 => "manager",
        3 => "doctor",
        4 => "receptionist",
        _ => "unknown",
    }
    .to_string()
}
