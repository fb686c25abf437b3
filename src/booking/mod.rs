//! Daily OPD capacity allocation: reservations against the active quota,
//! queue positions, arrival estimates and cancellation.

mod estimate;
#[cfg(test)]
pub(crate) mod memory;
pub mod pg;
pub mod store;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

pub use estimate::EstimatePolicy;
use store::{Ledger, NewAppointment, SettingsStore, StoreError};

use crate::models::{Appointment, QuotaSetting};

pub const MAX_QUOTA: i32 = 10_000;

#[derive(Error, Debug)]
pub enum BookingError {
    #[error("daily quota is not configured")]
    Unconfigured,

    #[error("no slots left on {0}")]
    QuotaExceeded(NaiveDate),

    #[error("patient not found")]
    PatientNotFound,

    #[error("appointment not found")]
    NotFound,

    #[error("quota must be between 0 and 10000")]
    InvalidQuota,

    /// The record would sort below the active one and could never take effect.
    #[error("effective_at {requested} is earlier than the active quota record ({active})")]
    BackdatedQuota {
        requested: DateTime<Utc>,
        active: DateTime<Utc>,
    },

    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
}

impl BookingError {
    fn is_transient(&self) -> bool {
        matches!(self, BookingError::Storage(e) if e.is_transient())
    }
}

/// How often a failed unit of work is re-run, and how long to wait between runs.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
    }

    async fn run<T, F, Fut>(&self, op: &'static str, mut f: F) -> Result<T, BookingError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BookingError>>,
    {
        let mut attempt = 1;
        loop {
            match f().await {
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let wait = self.backoff(attempt);
                    tracing::warn!(op, attempt, ?wait, error = %e, "transient storage failure, retrying");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

/// A committed reservation.
#[derive(Debug, Clone, Serialize)]
pub struct Reservation {
    pub appointment: Appointment,
    pub position: i32,
    pub estimated_time: String,
}

/// An appointment with its arrival estimate recomputed for display.
#[derive(Debug, Clone, Serialize)]
pub struct AppointmentView {
    #[serde(flatten)]
    pub appointment: Appointment,
    pub estimated_time: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DayAvailability {
    pub day: NaiveDate,
    pub quota: Option<i32>,
    pub booked: i64,
    pub remaining: i64,
    pub next_position: i32,
    pub next_estimate: String,
}

#[derive(Clone)]
pub struct BookingService {
    ledger: Arc<dyn Ledger>,
    settings: Arc<dyn SettingsStore>,
    policy: EstimatePolicy,
    retry: RetryPolicy,
}

impl BookingService {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        settings: Arc<dyn SettingsStore>,
        policy: EstimatePolicy,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            ledger,
            settings,
            policy,
            retry,
        }
    }

    /// Arrival estimate for `position` under the configured clinic timing.
    pub fn estimate(&self, position: i32) -> String {
        self.policy.estimate(position)
    }

    /// Admits a booking for `day` if the active quota still has room and
    /// assigns it the next queue position for that day.
    pub async fn reserve(&self, patient_id: Uuid, day: NaiveDate) -> Result<Reservation, BookingError> {
        let appointment = self
            .retry
            .run("reserve", || self.reserve_once(patient_id, day))
            .await
            .inspect_err(|e| match e {
                BookingError::QuotaExceeded(_) => tracing::info!(%patient_id, %day, "day is full"),
                BookingError::Unconfigured => tracing::warn!(%day, "booking attempted with no daily quota configured"),
                BookingError::Storage(err) => tracing::error!(%patient_id, %day, error = %err, "reservation failed"),
                _ => {}
            })?;

        tracing::info!(
            appointment_id = %appointment.appointment_id,
            %patient_id,
            %day,
            position = appointment.position,
            "appointment booked"
        );

        Ok(Reservation {
            position: appointment.position,
            estimated_time: self.policy.estimate(appointment.position),
            appointment,
        })
    }

    async fn reserve_once(&self, patient_id: Uuid, day: NaiveDate) -> Result<Appointment, BookingError> {
        if !self.ledger.patient_exists(patient_id).await? {
            return Err(BookingError::PatientNotFound);
        }

        // Quota read, count and insert all happen under the day's lock.
        let mut tx = self.ledger.begin_day(day).await?;
        tracing::debug!(day = %tx.day(), %patient_id, "day lock acquired");

        let Some(setting) = tx.active_quota().await? else {
            return Err(BookingError::Unconfigured);
        };

        let counts = tx.day_counts().await?;
        if counts.booked >= i64::from(setting.quota) {
            return Err(BookingError::QuotaExceeded(day));
        }

        let appointment = tx
            .insert_booked(NewAppointment {
                patient_id,
                position: counts.last_position + 1,
                quota_setting_id: setting.setting_id,
            })
            .await?;

        tx.commit().await?;
        Ok(appointment)
    }

    /// Flips a booked appointment to cancelled. Cancelling twice is a no-op.
    /// Positions are never handed out again.
    pub async fn cancel(&self, appointment_id: Uuid) -> Result<Appointment, BookingError> {
        let row = self
            .retry
            .run("cancel", || async {
                Ok::<_, BookingError>(self.ledger.set_cancelled(appointment_id).await?)
            })
            .await?
            .ok_or(BookingError::NotFound)?;

        tracing::info!(%appointment_id, day = %row.day, position = row.position, "appointment cancelled");
        Ok(row)
    }

    pub async fn find(&self, appointment_id: Uuid) -> Result<Appointment, BookingError> {
        self.retry
            .run("find", || async {
                Ok::<_, BookingError>(self.ledger.find(appointment_id).await?)
            })
            .await?
            .ok_or(BookingError::NotFound)
    }

    /// Newest day first, then by position.
    pub async fn list_for_patient(&self, patient_id: Uuid) -> Result<Vec<AppointmentView>, BookingError> {
        let mut rows = self
            .retry
            .run("list_for_patient", || async {
                Ok::<_, BookingError>(self.ledger.list_by_patient(patient_id).await?)
            })
            .await?;

        rows.sort_by(|a, b| b.day.cmp(&a.day).then(a.position.cmp(&b.position)));

        Ok(rows
            .into_iter()
            .map(|appointment| AppointmentView {
                estimated_time: self.policy.estimate(appointment.position),
                appointment,
            })
            .collect())
    }

    /// Snapshot of a day's capacity. Not a promise: only `reserve` decides.
    pub async fn availability(&self, day: NaiveDate) -> Result<DayAvailability, BookingError> {
        let (setting, counts) = self
            .retry
            .run("availability", || async {
                let setting = self.settings.active_quota().await?;
                let counts = self.ledger.day_counts(day).await?;
                Ok::<_, BookingError>((setting, counts))
            })
            .await?;

        let quota = setting.map(|s| s.quota);
        let remaining = quota
            .map(|q| (i64::from(q) - counts.booked).max(0))
            .unwrap_or(0);
        let next_position = counts.last_position + 1;

        Ok(DayAvailability {
            day,
            quota,
            booked: counts.booked,
            remaining,
            next_position,
            next_estimate: self.policy.estimate(next_position),
        })
    }

    pub async fn active_quota(&self) -> Result<Option<QuotaSetting>, BookingError> {
        self.retry
            .run("active_quota", || async {
                Ok::<_, BookingError>(self.settings.active_quota().await?)
            })
            .await
    }

    pub async fn quota_history(&self, limit: i64) -> Result<Vec<QuotaSetting>, BookingError> {
        self.retry
            .run("quota_history", || async {
                Ok::<_, BookingError>(self.settings.quota_history(limit).await?)
            })
            .await
    }

    /// Appends a new quota record; earlier records are kept. An explicit
    /// `effective_at` must not predate the record currently in effect.
    pub async fn set_quota(
        &self,
        quota: i32,
        effective_at: Option<DateTime<Utc>>,
        changed_by: Option<Uuid>,
    ) -> Result<QuotaSetting, BookingError> {
        if !(0..=MAX_QUOTA).contains(&quota) {
            return Err(BookingError::InvalidQuota);
        }

        if let Some(requested) = effective_at {
            if let Some(active) = self.active_quota().await? {
                if requested < active.effective_at {
                    return Err(BookingError::BackdatedQuota {
                        requested,
                        active: active.effective_at,
                    });
                }
            }
        }

        // not retried: a lost reply could otherwise append the record twice
        let setting = self
            .settings
            .append_quota(quota, effective_at, changed_by)
            .await?;

        tracing::info!(
            setting_id = setting.setting_id,
            quota,
            effective_at = %setting.effective_at,
            "daily quota changed"
        );
        Ok(setting)
    }
}
