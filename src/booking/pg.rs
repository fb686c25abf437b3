// src/booking/pg.rs

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::store::{
    DayCounts, DayReservation, Ledger, NewAppointment, SettingsStore, StoreError, StoreResult,
};
use crate::models::{Appointment, QuotaSetting};

/// First key of `pg_advisory_xact_lock(int, int)`; the second key is the day.
const DAY_LOCK_NAMESPACE: i32 = 0x4f50_4431; // "OPD1"

const APPOINTMENT_COLUMNS: &str = r#"
    appointment_id, patient_id, day, position, status,
    quota_setting_id, created_at, cancelled_at
"#;

// clock_timestamp(), not now(): inside a reservation this runs after the
// advisory lock wait, and now() would still be the transaction start.
const ACTIVE_QUOTA_SQL: &str = r#"
    SELECT setting_id, quota, effective_at, changed_by_user_id
    FROM daily_quota_setting
    WHERE effective_at <= clock_timestamp()
    ORDER BY effective_at DESC, setting_id DESC
    LIMIT 1
"#;

const DAY_COUNTS_SQL: &str = r#"
    SELECT
      COUNT(*) FILTER (WHERE status = 0) AS booked,
      COALESCE(MAX(position), 0)         AS last_position
    FROM appointment
    WHERE day = $1
"#;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Appends `quota` only when the log is empty. Returns true if it did.
    pub async fn seed_quota_if_empty(&self, quota: i32) -> StoreResult<bool> {
        let res = sqlx::query(
            r#"
            INSERT INTO daily_quota_setting (quota, effective_at)
            SELECT $1, clock_timestamp()
            WHERE NOT EXISTS (SELECT 1 FROM daily_quota_setting)
            "#,
        )
        .bind(quota)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() > 0)
    }
}

#[async_trait]
impl SettingsStore for PgStore {
    async fn active_quota(&self) -> StoreResult<Option<QuotaSetting>> {
        let row = sqlx::query_as::<_, QuotaSetting>(ACTIVE_QUOTA_SQL)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn append_quota(
        &self,
        quota: i32,
        effective_at: Option<DateTime<Utc>>,
        changed_by: Option<Uuid>,
    ) -> StoreResult<QuotaSetting> {
        let row = sqlx::query_as::<_, QuotaSetting>(
            r#"
            INSERT INTO daily_quota_setting (quota, effective_at, changed_by_user_id)
            VALUES ($1, COALESCE($2, clock_timestamp()), $3)
            RETURNING setting_id, quota, effective_at, changed_by_user_id
            "#,
        )
        .bind(quota)
        .bind(effective_at)
        .bind(changed_by)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn quota_history(&self, limit: i64) -> StoreResult<Vec<QuotaSetting>> {
        let rows = sqlx::query_as::<_, QuotaSetting>(
            r#"
            SELECT setting_id, quota, effective_at, changed_by_user_id
            FROM daily_quota_setting
            ORDER BY effective_at DESC, setting_id DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl Ledger for PgStore {
    async fn begin_day(&self, day: NaiveDate) -> StoreResult<Box<dyn DayReservation>> {
        let mut tx = self.pool.begin().await?;

        // Held until COMMIT/ROLLBACK. Every statement after this one runs with a
        // fresh READ COMMITTED snapshot, so it sees all earlier reservations.
        sqlx::query("SELECT pg_advisory_xact_lock($1, $2)")
            .bind(DAY_LOCK_NAMESPACE)
            .bind(day.num_days_from_ce())
            .execute(&mut *tx)
            .await?;

        Ok(Box::new(PgDayReservation { tx, day }))
    }

    async fn patient_exists(&self, patient_id: Uuid) -> StoreResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM patient WHERE patient_id = $1)")
                .bind(patient_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn find(&self, appointment_id: Uuid) -> StoreResult<Option<Appointment>> {
        let sql = format!("SELECT {APPOINTMENT_COLUMNS} FROM appointment WHERE appointment_id = $1");
        let row = sqlx::query_as::<_, Appointment>(&sql)
            .bind(appointment_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn set_cancelled(&self, appointment_id: Uuid) -> StoreResult<Option<Appointment>> {
        let sql = format!(
            r#"
            UPDATE appointment
            SET status = 1,
                cancelled_at = now()
            WHERE appointment_id = $1
              AND status = 0
            RETURNING {APPOINTMENT_COLUMNS}
            "#
        );
        let updated = sqlx::query_as::<_, Appointment>(&sql)
            .bind(appointment_id)
            .fetch_optional(&self.pool)
            .await?;

        match updated {
            Some(row) => Ok(Some(row)),
            // either missing or already cancelled
            None => self.find(appointment_id).await,
        }
    }

    async fn list_by_patient(&self, patient_id: Uuid) -> StoreResult<Vec<Appointment>> {
        let sql = format!(
            r#"
            SELECT {APPOINTMENT_COLUMNS}
            FROM appointment
            WHERE patient_id = $1
            ORDER BY day DESC, position ASC
            "#
        );
        let rows = sqlx::query_as::<_, Appointment>(&sql)
            .bind(patient_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn day_counts(&self, day: NaiveDate) -> StoreResult<DayCounts> {
        let counts = sqlx::query_as::<_, DayCounts>(DAY_COUNTS_SQL)
            .bind(day)
            .fetch_one(&self.pool)
            .await?;
        Ok(counts)
    }
}

struct PgDayReservation {
    tx: Transaction<'static, Postgres>,
    day: NaiveDate,
}

#[async_trait]
impl DayReservation for PgDayReservation {
    fn day(&self) -> NaiveDate {
        self.day
    }

    async fn active_quota(&mut self) -> StoreResult<Option<QuotaSetting>> {
        let row = sqlx::query_as::<_, QuotaSetting>(ACTIVE_QUOTA_SQL)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row)
    }

    async fn day_counts(&mut self) -> StoreResult<DayCounts> {
        let counts = sqlx::query_as::<_, DayCounts>(DAY_COUNTS_SQL)
            .bind(self.day)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(counts)
    }

    async fn insert_booked(&mut self, new: NewAppointment) -> StoreResult<Appointment> {
        let sql = format!(
            r#"
            INSERT INTO appointment (patient_id, day, position, status, quota_setting_id)
            VALUES ($1, $2, $3, 0, $4)
            RETURNING {APPOINTMENT_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, Appointment>(&sql)
            .bind(new.patient_id)
            .bind(self.day)
            .bind(new.position)
            .bind(new.quota_setting_id)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(row)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let PgDayReservation { tx, day } = *self;
        tracing::trace!(%day, "committing reservation");
        tx.commit().await.map_err(|e| match e {
            // the server refused the commit, so nothing was written
            sqlx::Error::Database(_) => StoreError::Database(e),
            other => StoreError::CommitUnknown(other.to_string()),
        })
    }
}
