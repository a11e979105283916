use std::sync::Arc;

use anyhow::Result;
use chrono_tz::Tz;
use tracing::warn;

use scriptstats_core::event::{Operation, RawEvent};
use scriptstats_core::keys::{
    day_field, day_of, dedup_key, minute_of_epoch, suppression_key, StatKeys, IP_DEDUP_TTL,
    REALTIME_TTL, SUPPRESSION_TTL, UV_TTL,
};
use scriptstats_core::store::CounterStore;

/// Fast-path consumer of `script.statistic`.
///
/// Folds one event into the unique-visitor set, the page-view counters and
/// the realtime bucket, and decides whether the durable totals should move.
/// Buckets are taken from the event timestamp in the configured zone.
pub struct Aggregator {
    store: Arc<dyn CounterStore>,
    timezone: Tz,
}

impl Aggregator {
    pub fn new(store: Arc<dyn CounterStore>, timezone: Tz) -> Self {
        Self { store, timezone }
    }

    /// Apply `event`. Returns `true` when the event is both counted and the
    /// first of its `(script, operation, ip)` today, i.e. when the durable
    /// totals should be incremented.
    ///
    /// Any Counter Store error aborts and propagates so the channel
    /// redelivers; steps already applied may then be applied twice.
    ///
    /// The realtime bucket is the minute of `event.time`, not of processing.
    /// A redelivery delayed past the realtime window still increments its
    /// original, older bucket, which the realtime query no longer reads.
    #[tracing::instrument(
        skip(self, event),
        fields(script_id = event.script_id, operation = %event.operation)
    )]
    pub async fn on_event(&self, event: &RawEvent) -> Result<bool> {
        let day = day_of(event.time, self.timezone);
        let keys = StatKeys::new(event.script_id, event.operation);
        let suppress = suppression_key(event.script_id, &event.ip);

        let counted = match event.operation {
            Operation::Update => {
                if let Err(e) = self.store.set(&suppress, "1", Some(SUPPRESSION_TTL)).await {
                    warn!(ip = %event.ip, error = %e, "failed to write update suppression flag");
                }
                true
            }
            Operation::Download => !self.store.exists(&suppress).await?,
            Operation::View => true,
        };

        if counted {
            let uv = keys.uv(day);
            self.store.pf_add(&uv, &event.visitor_token).await?;
            self.store.expire(&uv, UV_TTL).await?;
        }

        self.store.hincr(&keys.pv_daily(), &day_field(day)).await?;
        self.store.incr(&keys.pv_total(), None).await?;

        let minute = minute_of_epoch(event.time);
        self.store
            .incr(&keys.realtime(minute), Some(REALTIME_TTL))
            .await?;

        let first_today = self
            .store
            .set_nx(&dedup_key(event, self.timezone), "1", IP_DEDUP_TTL)
            .await?;

        Ok(counted && first_today)
    }
}
