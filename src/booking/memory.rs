// src/booking/memory.rs
//
// In-process ledger used by the booking tests. Same contract as PgStore, with
// a tokio mutex per day standing in for the advisory lock.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use super::store::{
    DayCounts, DayReservation, Ledger, NewAppointment, SettingsStore, StoreError, StoreResult,
};
use crate::models::{Appointment, AppointmentStatus, QuotaSetting};

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    patients: Mutex<HashSet<Uuid>>,
    settings: Mutex<Vec<QuotaSetting>>,
    appointments: Mutex<Vec<Appointment>>,
    day_locks: Mutex<HashMap<NaiveDate, Arc<tokio::sync::Mutex<()>>>>,
    next_setting_id: AtomicI64,
    failures_left: AtomicU32,
    begin_calls: AtomicU32,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn counts_for(rows: &[Appointment], day: NaiveDate) -> DayCounts {
    rows.iter()
        .filter(|a| a.day == day)
        .fold(DayCounts::default(), |mut acc, a| {
            if a.status == AppointmentStatus::Booked {
                acc.booked += 1;
            }
            acc.last_position = acc.last_position.max(a.position);
            acc
        })
}

fn active_of(settings: &[QuotaSetting], now: DateTime<Utc>) -> Option<QuotaSetting> {
    settings
        .iter()
        .filter(|s| s.effective_at <= now)
        .max_by_key(|s| (s.effective_at, s.setting_id))
        .cloned()
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_patient(&self) -> Uuid {
        let id = Uuid::new_v4();
        lock(&self.inner.patients).insert(id);
        id
    }

    /// The next `n` calls to `begin_day` fail with a transient error.
    pub fn fail_next_begins(&self, n: u32) {
        self.inner.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn begin_calls(&self) -> u32 {
        self.inner.begin_calls.load(Ordering::SeqCst)
    }

    pub fn appointments_on(&self, day: NaiveDate) -> Vec<Appointment> {
        let mut rows: Vec<Appointment> = lock(&self.inner.appointments)
            .iter()
            .filter(|a| a.day == day)
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.position);
        rows
    }

    fn day_lock(&self, day: NaiveDate) -> Arc<tokio::sync::Mutex<()>> {
        lock(&self.inner.day_locks)
            .entry(day)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Holds the lock for `day` until the returned guard is dropped.
    pub async fn hold_day(&self, day: NaiveDate) -> OwnedMutexGuard<()> {
        self.day_lock(day).lock_owned().await
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn active_quota(&self) -> StoreResult<Option<QuotaSetting>> {
        Ok(active_of(&lock(&self.inner.settings), Utc::now()))
    }

    async fn append_quota(
        &self,
        quota: i32,
        effective_at: Option<DateTime<Utc>>,
        changed_by: Option<Uuid>,
    ) -> StoreResult<QuotaSetting> {
        let setting = QuotaSetting {
            setting_id: self.inner.next_setting_id.fetch_add(1, Ordering::SeqCst) + 1,
            quota,
            effective_at: effective_at.unwrap_or_else(Utc::now),
            changed_by_user_id: changed_by,
        };
        lock(&self.inner.settings).push(setting.clone());
        Ok(setting)
    }

    async fn quota_history(&self, limit: i64) -> StoreResult<Vec<QuotaSetting>> {
        let mut rows = lock(&self.inner.settings).clone();
        rows.sort_by(|a, b| {
            b.effective_at
                .cmp(&a.effective_at)
                .then(b.setting_id.cmp(&a.setting_id))
        });
        rows.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        Ok(rows)
    }
}

#[async_trait]
impl Ledger for MemoryStore {
    async fn begin_day(&self, day: NaiveDate) -> StoreResult<Box<dyn DayReservation>> {
        self.inner.begin_calls.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .inner
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }

        let guard = self.hold_day(day).await;
        Ok(Box::new(MemoryDayReservation {
            store: self.clone(),
            day,
            pending: Vec::new(),
            _guard: guard,
        }))
    }

    async fn patient_exists(&self, patient_id: Uuid) -> StoreResult<bool> {
        Ok(lock(&self.inner.patients).contains(&patient_id))
    }

    async fn find(&self, appointment_id: Uuid) -> StoreResult<Option<Appointment>> {
        Ok(lock(&self.inner.appointments)
            .iter()
            .find(|a| a.appointment_id == appointment_id)
            .cloned())
    }

    async fn set_cancelled(&self, appointment_id: Uuid) -> StoreResult<Option<Appointment>> {
        let mut rows = lock(&self.inner.appointments);
        let Some(row) = rows.iter_mut().find(|a| a.appointment_id == appointment_id) else {
            return Ok(None);
        };
        if row.status == AppointmentStatus::Booked {
            row.status = AppointmentStatus::Cancelled;
            row.cancelled_at = Some(Utc::now());
        }
        Ok(Some(row.clone()))
    }

    async fn list_by_patient(&self, patient_id: Uuid) -> StoreResult<Vec<Appointment>> {
        // unordered on purpose; the service sorts
        Ok(lock(&self.inner.appointments)
            .iter()
            .filter(|a| a.patient_id == patient_id)
            .cloned()
            .collect())
    }

    async fn day_counts(&self, day: NaiveDate) -> StoreResult<DayCounts> {
        Ok(counts_for(&lock(&self.inner.appointments), day))
    }
}

struct MemoryDayReservation {
    store: MemoryStore,
    day: NaiveDate,
    pending: Vec<Appointment>,
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl DayReservation for MemoryDayReservation {
    fn day(&self) -> NaiveDate {
        self.day
    }

    async fn active_quota(&mut self) -> StoreResult<Option<QuotaSetting>> {
        Ok(active_of(&lock(&self.store.inner.settings), Utc::now()))
    }

    async fn day_counts(&mut self) -> StoreResult<DayCounts> {
        // give racing tasks a chance to interleave between read and write
        tokio::task::yield_now().await;
        let committed = counts_for(&lock(&self.store.inner.appointments), self.day);
        let pending = counts_for(&self.pending, self.day);
        Ok(DayCounts {
            booked: committed.booked + pending.booked,
            last_position: committed.last_position.max(pending.last_position),
        })
    }

    async fn insert_booked(&mut self, new: NewAppointment) -> StoreResult<Appointment> {
        let taken = lock(&self.store.inner.appointments)
            .iter()
            .chain(self.pending.iter())
            .any(|a| a.day == self.day && a.position == new.position);
        if taken {
            return Err(StoreError::Database(sqlx::Error::Protocol(format!(
                "duplicate position {} on {}",
                new.position, self.day
            ))));
        }

        let row = Appointment {
            appointment_id: Uuid::new_v4(),
            patient_id: new.patient_id,
            day: self.day,
            position: new.position,
            status: AppointmentStatus::Booked,
            quota_setting_id: new.quota_setting_id,
            created_at: Utc::now(),
            cancelled_at: None,
        };
        self.pending.push(row.clone());
        Ok(row)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryDayReservation {
            store,
            pending,
            _guard: guard,
            ..
        } = *self;
        lock(&store.inner.appointments).extend(pending);
        drop(guard);
        Ok(())
    }
}
