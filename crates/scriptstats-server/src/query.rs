use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, NaiveDate};
use chrono_tz::Tz;

use scriptstats_core::clock::Clock;
use scriptstats_core::event::Operation;
use scriptstats_core::keys::{
    day_field, day_of, minute_of_epoch, StatKeys, MERGED_UV_TTL, REALTIME_WINDOW,
};
use scriptstats_core::store::CounterStore;

/// Read side of the fast-path counters.
pub struct StatisticsQuery {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    timezone: Tz,
}

impl StatisticsQuery {
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>, timezone: Tz) -> Self {
        Self {
            store,
            clock,
            timezone,
        }
    }

    /// Today in the configured zone.
    pub fn today(&self) -> NaiveDate {
        day_of(self.clock.now(), self.timezone)
    }

    pub async fn total_pv(&self, script_id: i64, operation: Operation) -> Result<i64> {
        let keys = StatKeys::new(script_id, operation);
        Ok(self.store.get_counter(&keys.pv_total()).await?.unwrap_or(0))
    }

    /// Sum of the `days` daily page-view fields ending at `from`.
    pub async fn days_pv_num(
        &self,
        script_id: i64,
        operation: Operation,
        days: u32,
        from: NaiveDate,
    ) -> Result<i64> {
        if days == 0 {
            return Ok(0);
        }
        let keys = StatKeys::new(script_id, operation);
        let fields: Vec<String> = window(days, from).map(day_field).collect();
        let counts = self.store.hget_counters(&keys.pv_daily(), &fields).await?;
        Ok(counts.into_iter().flatten().sum())
    }

    /// Approximate distinct visitors over the `days` days ending at `from`.
    ///
    /// Multi-day unions are materialised once per `(days, from)` and reused
    /// until the cached set expires.
    pub async fn days_uv_num(
        &self,
        script_id: i64,
        operation: Operation,
        days: u32,
        from: NaiveDate,
    ) -> Result<u64> {
        let keys = StatKeys::new(script_id, operation);
        match days {
            0 => Ok(0),
            1 => self.store.pf_count(&keys.uv(from)).await,
            _ => {
                let merged = keys.uv_merged(days, from);
                if !self.store.exists(&merged).await? {
                    let sources: Vec<String> = window(days, from).map(|day| keys.uv(day)).collect();
                    self.store.pf_merge(&merged, &sources).await?;
                    self.store.expire(&merged, MERGED_UV_TTL).await?;
                }
                self.store.pf_count(&merged).await
            }
        }
    }

    /// Page views per minute for the last [`REALTIME_WINDOW`] minutes.
    /// Index 0 is the current minute; expired buckets read as zero.
    pub async fn realtime(&self, script_id: i64, operation: Operation) -> Result<Vec<i64>> {
        let keys = StatKeys::new(script_id, operation);
        let current = minute_of_epoch(self.clock.now());
        let bucket_keys: Vec<String> = (0..REALTIME_WINDOW as i64)
            .map(|i| keys.realtime(current - i))
            .collect();
        let counts = self.store.get_counters(&bucket_keys).await?;
        Ok(counts.into_iter().map(|c| c.unwrap_or(0)).collect())
    }
}

/// `days` consecutive dates ending at `from`, newest first.
fn window(days: u32, from: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    (0..i64::from(days)).map(move |i| from - Duration::days(i))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use scriptstats_core::clock::ManualClock;
    use scriptstats_core::memory::MemoryCounterStore;

    fn setup() -> (StatisticsQuery, Arc<MemoryCounterStore>, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 10, 9, 30, 0).unwrap());
        let store = Arc::new(MemoryCounterStore::new(Arc::new(clock.clone())));
        let query = StatisticsQuery::new(store.clone(), Arc::new(clock.clone()), Tz::UTC);
        (query, store, clock)
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    #[test]
    fn window_walks_backwards_from_the_anchor() {
        let days: Vec<NaiveDate> = window(3, day(10)).collect();
        assert_eq!(days, vec![day(10), day(9), day(8)]);
    }

    #[tokio::test]
    async fn days_pv_sums_only_the_window() {
        let (query, store, _clock) = setup();
        let keys = StatKeys::new(1, Operation::View);
        for (d, n) in [(8, 2), (9, 3), (10, 4), (7, 100)] {
            for _ in 0..n {
                store.hincr(&keys.pv_daily(), &day_field(day(d))).await.unwrap();
            }
        }
        assert_eq!(query.days_pv_num(1, Operation::View, 3, day(10)).await.unwrap(), 9);
        assert_eq!(query.days_pv_num(1, Operation::View, 0, day(10)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn days_uv_single_day_equals_day_cardinality_and_grows_with_range() {
        let (query, store, _clock) = setup();
        let keys = StatKeys::new(1, Operation::Download);
        for (d, visitor) in [(10, "a"), (10, "b"), (9, "b"), (9, "c"), (8, "d")] {
            store.pf_add(&keys.uv(day(d)), visitor).await.unwrap();
        }

        let one = query.days_uv_num(1, Operation::Download, 1, day(10)).await.unwrap();
        assert_eq!(one, store.pf_count(&keys.uv(day(10))).await.unwrap());
        let two = query.days_uv_num(1, Operation::Download, 2, day(10)).await.unwrap();
        let three = query.days_uv_num(1, Operation::Download, 3, day(10)).await.unwrap();
        assert_eq!((one, two, three), (2, 3, 4));
    }

    #[tokio::test]
    async fn merged_union_is_cached_for_fifteen_days() {
        let (query, store, clock) = setup();
        let keys = StatKeys::new(1, Operation::Download);
        store.pf_add(&keys.uv(day(9)), "a").await.unwrap();
        assert_eq!(query.days_uv_num(1, Operation::Download, 2, day(10)).await.unwrap(), 1);

        // Later adds are not visible while the cached union lives.
        store.pf_add(&keys.uv(day(10)), "b").await.unwrap();
        assert_eq!(query.days_uv_num(1, Operation::Download, 2, day(10)).await.unwrap(), 1);
        assert_eq!(store.ttl(&keys.uv_merged(2, day(10))), Some(MERGED_UV_TTL));

        clock.advance(Duration::days(15));
        assert_eq!(query.days_uv_num(1, Operation::Download, 2, day(10)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn realtime_is_current_minute_first_and_zero_after_expiry() {
        let (query, store, clock) = setup();
        let keys = StatKeys::new(1, Operation::View);
        let now = minute_of_epoch(clock.now());
        store
            .incr(&keys.realtime(now), Some(std::time::Duration::from_secs(3600)))
            .await
            .unwrap();
        store
            .incr(&keys.realtime(now - 2), Some(std::time::Duration::from_secs(3600)))
            .await
            .unwrap();

        let series = query.realtime(1, Operation::View).await.unwrap();
        assert_eq!(series.len(), REALTIME_WINDOW);
        assert_eq!(series[0], 1);
        assert_eq!(series[1], 0);
        assert_eq!(series[2], 1);

        clock.advance(Duration::minutes(61));
        let series = query.realtime(1, Operation::View).await.unwrap();
        assert!(series.iter().all(|&c| c == 0));
    }
}
