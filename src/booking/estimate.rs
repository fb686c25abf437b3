// src/booking/estimate.rs

use chrono::{NaiveTime, TimeDelta};

/// Clinic timing used to turn a queue position into an arrival estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EstimatePolicy {
    pub service_start: NaiveTime,
    pub slot_minutes: i64,
}

impl Default for EstimatePolicy {
    fn default() -> Self {
        Self {
            service_start: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN),
            slot_minutes: 10,
        }
    }
}

impl EstimatePolicy {
    pub fn new(service_start: NaiveTime, slot_minutes: i64) -> Self {
        Self {
            service_start,
            slot_minutes,
        }
    }

    /// Clock time at which `position` is expected to be seen.
    /// Positions below 1 are treated as 1. Wraps past midnight.
    pub fn arrival_time(&self, position: i32) -> NaiveTime {
        const DAY_MINUTES: i64 = 24 * 60;
        let ahead = i64::from(position.max(1) - 1) % DAY_MINUTES;
        let minutes = (ahead * self.slot_minutes.rem_euclid(DAY_MINUTES)) % DAY_MINUTES;
        let (t, _) = self
            .service_start
            .overflowing_add_signed(TimeDelta::minutes(minutes));
        t
    }

    /// `H:MM AM/PM`, e.g. `8:00 AM`, `12:10 PM`.
    pub fn estimate(&self, position: i32) -> String {
        self.arrival_time(position).format("%-I:%M %p").to_string()
    }
}
