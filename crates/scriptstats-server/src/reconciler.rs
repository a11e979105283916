use std::sync::Arc;

use anyhow::Result;
use chrono::Duration;
use chrono_tz::Tz;
use tracing::{error, info, warn};

use scriptstats_core::clock::Clock;
use scriptstats_core::event::{RawEvent, ScriptSnapshot};
use scriptstats_core::keys::{day_of, dedup_key, sync_count_key, sync_time_key, SYNC_PENDING_SET};
use scriptstats_core::repository::StatisticsRepository;
use scriptstats_core::search::SearchIndex;
use scriptstats_core::statistics::{ScriptDocument, ScriptStatistics, StatisticsDocument};
use scriptstats_core::store::CounterStore;

/// Folds fast-path decisions into the durable tables and keeps the search
/// document in step.
///
/// Index sync is batched per script: every processed event bumps a counter,
/// and the document is rewritten once the counter reaches `batch` or
/// `interval` has passed since the last sync. Scripts with unsynced events
/// sit in [`SYNC_PENDING_SET`] until a sync clears them.
pub struct Reconciler {
    store: Arc<dyn CounterStore>,
    repository: Arc<dyn StatisticsRepository>,
    index: Arc<dyn SearchIndex>,
    clock: Arc<dyn Clock>,
    timezone: Tz,
    batch: i64,
    interval: Duration,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn CounterStore>,
        repository: Arc<dyn StatisticsRepository>,
        index: Arc<dyn SearchIndex>,
        clock: Arc<dyn Clock>,
        timezone: Tz,
        batch: i64,
        interval: std::time::Duration,
    ) -> Self {
        Self {
            store,
            repository,
            index,
            clock,
            timezone,
            batch,
            interval: Duration::from_std(interval).unwrap_or(Duration::minutes(5)),
        }
    }

    /// Increment the durable totals for an event that passed the dedup gate.
    ///
    /// On failure the gate is released before the error propagates, so the
    /// redelivered message wins the gate again instead of being dropped.
    #[tracing::instrument(
        skip(self, event),
        fields(script_id = event.script_id, operation = %event.operation)
    )]
    pub async fn apply(&self, event: &RawEvent) -> Result<()> {
        let day = day_of(event.time, self.timezone);
        if let Err(e) = self
            .repository
            .record(event.script_id, day, event.operation)
            .await
        {
            let gate = dedup_key(event, self.timezone);
            if let Err(release) = self.store.delete(&gate).await {
                error!(
                    key = %gate,
                    error = %release,
                    "failed to release dedup gate, durable increment will be lost"
                );
            }
            return Err(e);
        }
        Ok(())
    }

    /// Flag `script_id` for the next scheduled flush.
    pub async fn mark_pending(&self, script_id: i64) -> Result<()> {
        self.store
            .sadd(SYNC_PENDING_SET, &script_id.to_string())
            .await
    }

    /// Count one processed event for `script_id` and sync its document when
    /// the batch or interval threshold is reached. Returns whether a sync ran.
    #[tracing::instrument(skip(self))]
    pub async fn record_and_maybe_sync(&self, script_id: i64) -> Result<bool> {
        let count = self.store.incr(&sync_count_key(script_id), None).await?;
        self.mark_pending(script_id).await?;

        if count >= self.batch || self.interval_elapsed(script_id).await? {
            self.sync(script_id).await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// A missing or unreadable last-sync stamp counts as due.
    async fn interval_elapsed(&self, script_id: i64) -> Result<bool> {
        let last = self
            .store
            .get(&sync_time_key(script_id))
            .await?
            .and_then(|raw| raw.parse::<i64>().ok());
        Ok(match last {
            Some(secs) => self.clock.now().timestamp() - secs >= self.interval.num_seconds(),
            None => true,
        })
    }

    /// Reset the batch counters and rewrite the statistics part of the
    /// search document from the durable row.
    ///
    /// The script leaves the pending set before the row is read, so an
    /// increment that lands after the read re-flags it for the next flush.
    pub async fn sync(&self, script_id: i64) -> Result<()> {
        let now = self.clock.now();
        let member = script_id.to_string();
        self.store.delete(&sync_count_key(script_id)).await?;
        self.store
            .set(&sync_time_key(script_id), &now.timestamp().to_string(), None)
            .await?;
        self.store.srem(SYNC_PENDING_SET, &member).await?;

        let row = self
            .repository
            .find_script(script_id)
            .await?
            .unwrap_or_else(|| ScriptStatistics::empty(script_id));
        if let Err(e) = self
            .index
            .upsert_statistics(&StatisticsDocument::from_row(&row, now))
            .await
        {
            self.store.sadd(SYNC_PENDING_SET, &member).await?;
            return Err(e);
        }
        Ok(())
    }

    /// Sync every script in the pending set. Returns how many synced.
    pub async fn flush_pending(&self) -> Result<usize> {
        let members = self.store.smembers(SYNC_PENDING_SET).await?;
        let mut synced = 0;
        for member in members {
            let Ok(script_id) = member.parse::<i64>() else {
                warn!(member = %member, "dropping malformed pending sync entry");
                self.store.srem(SYNC_PENDING_SET, &member).await?;
                continue;
            };
            match self.sync(script_id).await {
                Ok(()) => synced += 1,
                Err(e) => warn!(script_id, error = %e, "pending index sync failed"),
            }
        }
        Ok(synced)
    }

    /// Rewrite the statistics document of every script with a durable row.
    pub async fn resync_all(&self) -> Result<usize> {
        let now = self.clock.now();
        let ids = self.repository.list_script_ids().await?;
        let total = ids.len();
        let mut synced = 0;
        for script_id in ids {
            let Some(row) = self.repository.find_script(script_id).await? else {
                continue;
            };
            match self
                .index
                .upsert_statistics(&StatisticsDocument::from_row(&row, now))
                .await
            {
                Ok(()) => synced += 1,
                Err(e) => warn!(script_id, error = %e, "resync failed"),
            }
        }
        info!(synced, total, "full statistics resync finished");
        Ok(synced)
    }

    /// Replace the whole search document on create or code update.
    pub async fn replace_script(&self, snapshot: &ScriptSnapshot) -> Result<()> {
        let row = self
            .repository
            .find_script(snapshot.script_id)
            .await?
            .unwrap_or_else(|| ScriptStatistics::empty(snapshot.script_id));
        let stats = StatisticsDocument::from_row(&row, self.clock.now());
        self.index
            .replace_script(&ScriptDocument::new(snapshot, stats))
            .await
    }

    pub async fn delete_script(&self, script_id: i64) -> Result<()> {
        self.index.delete_script(script_id).await
    }
}
