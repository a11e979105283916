//! Counter Store key layout and lifetimes.
//!
//! ```text
//! script:statistics:{id}:{op}:uv:{day}                 PF set, 60d
//! script:statistics:{id}:{op}:uv:merge:{days}:{from}   PF set, 15d
//! script:statistics:{id}:{op}:pv:day                   HASH day -> count
//! script:statistics:{id}:{op}:pv:total                 counter
//! script:statistics:{id}:{op}:realtime:{minute}        counter, 1h
//! script:statistics:{id}:update:suppress:{ip}          flag, 1h
//! script:statistics:{id}:{op}:ip:{ip}:{day}            flag (SET NX), 16h
//! script:statistics:sync:{id}:count                    counter
//! script:statistics:sync:{id}:time                     unix seconds
//! script:statistics:sync:pending                       SET of script ids
//! ```

use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;

use crate::event::{Operation, RawEvent};

const HOUR: u64 = 60 * 60;
const DAY: u64 = 24 * HOUR;

pub const UV_TTL: Duration = Duration::from_secs(60 * DAY);
pub const MERGED_UV_TTL: Duration = Duration::from_secs(15 * DAY);
pub const REALTIME_TTL: Duration = Duration::from_secs(HOUR);
pub const SUPPRESSION_TTL: Duration = Duration::from_secs(HOUR);
pub const IP_DEDUP_TTL: Duration = Duration::from_secs(16 * HOUR);

/// Number of one-minute buckets returned by the realtime query.
pub const REALTIME_WINDOW: usize = 15;

pub const SYNC_PENDING_SET: &str = "script:statistics:sync:pending";

/// Calendar day of `ts` in the configured zone, as used in key names.
pub fn day_of(ts: DateTime<Utc>, tz: Tz) -> NaiveDate {
    ts.with_timezone(&tz).date_naive()
}

pub fn day_field(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

pub fn minute_of_epoch(ts: DateTime<Utc>) -> i64 {
    ts.timestamp().div_euclid(60)
}

/// Key builder for one `(script, operation)` pair.
#[derive(Debug, Clone, Copy)]
pub struct StatKeys {
    script_id: i64,
    operation: Operation,
}

impl StatKeys {
    pub fn new(script_id: i64, operation: Operation) -> Self {
        Self {
            script_id,
            operation,
        }
    }

    fn prefix(&self) -> String {
        format!("script:statistics:{}:{}", self.script_id, self.operation)
    }

    pub fn uv(&self, day: NaiveDate) -> String {
        format!("{}:uv:{}", self.prefix(), day_field(day))
    }

    pub fn uv_merged(&self, days: u32, from: NaiveDate) -> String {
        format!("{}:uv:merge:{}:{}", self.prefix(), days, day_field(from))
    }

    pub fn pv_daily(&self) -> String {
        format!("{}:pv:day", self.prefix())
    }

    pub fn pv_total(&self) -> String {
        format!("{}:pv:total", self.prefix())
    }

    pub fn realtime(&self, minute: i64) -> String {
        format!("{}:realtime:{}", self.prefix(), minute)
    }

    pub fn ip_dedup(&self, ip: &str, day: NaiveDate) -> String {
        format!("{}:ip:{}:{}", self.prefix(), ip, day_field(day))
    }
}

/// Dedup gate for `event`: one per `(script, operation, ip)` and calendar
/// day in `tz`.
pub fn dedup_key(event: &RawEvent, tz: Tz) -> String {
    StatKeys::new(event.script_id, event.operation).ip_dedup(&event.ip, day_of(event.time, tz))
}

/// The update-suppresses-download flag. Always lives under the `update`
/// operation regardless of which event reads it.
pub fn suppression_key(script_id: i64, ip: &str) -> String {
    format!(
        "script:statistics:{}:{}:suppress:{}",
        script_id,
        Operation::Update,
        ip
    )
}

pub fn sync_count_key(script_id: i64) -> String {
    format!("script:statistics:sync:{script_id}:count")
}

pub fn sync_time_key(script_id: i64) -> String {
    format!("script:statistics:sync:{script_id}:time")
}
