// src/booking/store.rs
//
// Storage seams for the booking core. The Postgres implementation lives in
// `pg.rs`; tests run against the in-memory one in `memory.rs`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Appointment, QuotaSetting};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// COMMIT itself failed; the write may or may not have landed.
    #[error("commit outcome unknown: {0}")]
    CommitUnknown(String),
}

impl StoreError {
    /// True when the whole unit of work was rolled back and may be re-run.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(e) => is_transient_sqlx(e),
            StoreError::CommitUnknown(_) => false,
        }
    }
}

fn is_transient_sqlx(e: &sqlx::Error) -> bool {
    match e {
        // serialization_failure / deadlock_detected
        sqlx::Error::Database(db) => matches!(db.code().as_deref(), Some("40001") | Some("40P01")),
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
        _ => false,
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Per-day tallies read from the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, sqlx::FromRow)]
pub struct DayCounts {
    /// Appointments for the day that are still booked.
    pub booked: i64,
    /// Highest position ever assigned for the day, cancelled or not (0 if none).
    pub last_position: i32,
}

#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub patient_id: Uuid,
    pub position: i32,
    pub quota_setting_id: i64,
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Latest record whose `effective_at` is not in the future.
    async fn active_quota(&self) -> StoreResult<Option<QuotaSetting>>;

    async fn append_quota(
        &self,
        quota: i32,
        effective_at: Option<DateTime<Utc>>,
        changed_by: Option<Uuid>,
    ) -> StoreResult<QuotaSetting>;

    /// Newest first.
    async fn quota_history(&self, limit: i64) -> StoreResult<Vec<QuotaSetting>>;
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Opens the serialized unit of work for `day`. Holders for the same day
    /// exclude each other until commit or drop; other days are unaffected.
    async fn begin_day(&self, day: NaiveDate) -> StoreResult<Box<dyn DayReservation>>;

    async fn patient_exists(&self, patient_id: Uuid) -> StoreResult<bool>;

    async fn find(&self, appointment_id: Uuid) -> StoreResult<Option<Appointment>>;

    /// Booked -> Cancelled. Already-cancelled rows are left untouched.
    /// Returns the row as it stands afterwards, or None if it does not exist.
    async fn set_cancelled(&self, appointment_id: Uuid) -> StoreResult<Option<Appointment>>;

    async fn list_by_patient(&self, patient_id: Uuid) -> StoreResult<Vec<Appointment>>;

    /// Unlocked read, for display only.
    async fn day_counts(&self, day: NaiveDate) -> StoreResult<DayCounts>;
}

/// One reservation attempt for a single day. Dropping without `commit`
/// discards everything written through it.
#[async_trait]
pub trait DayReservation: Send {
    fn day(&self) -> NaiveDate;

    async fn active_quota(&mut self) -> StoreResult<Option<QuotaSetting>>;

    async fn day_counts(&mut self) -> StoreResult<DayCounts>;

    async fn insert_booked(&mut self, new: NewAppointment) -> StoreResult<Appointment>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
