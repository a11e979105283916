use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use scriptstats_core::channel::{
    EventChannel, GROUP_AGGREGATOR, GROUP_INDEX, TOPIC_SCRIPT_CODE_UPDATE, TOPIC_SCRIPT_CREATE,
    TOPIC_SCRIPT_DELETE, TOPIC_SCRIPT_STATISTIC,
};
use scriptstats_core::clock::Clock;
use scriptstats_core::config::Config;
use scriptstats_core::repository::StatisticsRepository;
use scriptstats_core::search::SearchIndex;
use scriptstats_core::store::CounterStore;

use crate::aggregator::Aggregator;
use crate::consumer::{
    spawn_group, IndexSyncHandler, LifecycleHandler, MessageHandler, RetryPolicy,
    StatisticHandler,
};
use crate::producer::StatisticsProducer;
use crate::query::StatisticsQuery;
use crate::reconciler::Reconciler;

/// Shared application state injected into every Axum handler via
/// [`axum::extract::State`].
///
/// Every collaborator is constructed by the caller and passed in, so tests
/// can wire in-process backends and a manual clock.
pub struct AppState {
    /// Parsed configuration, loaded once at startup from environment variables.
    pub config: Arc<Config>,
    pub clock: Arc<dyn Clock>,
    pub store: Arc<dyn CounterStore>,
    pub channel: Arc<dyn EventChannel>,
    pub repository: Arc<dyn StatisticsRepository>,
    pub producer: Arc<StatisticsProducer>,
    pub aggregator: Arc<Aggregator>,
    pub reconciler: Arc<Reconciler>,
    pub query: StatisticsQuery,
}

impl AppState {
    pub fn new(
        config: Config,
        clock: Arc<dyn Clock>,
        store: Arc<dyn CounterStore>,
        channel: Arc<dyn EventChannel>,
        repository: Arc<dyn StatisticsRepository>,
        index: Arc<dyn SearchIndex>,
    ) -> Self {
        let producer = Arc::new(StatisticsProducer::new(
            Arc::clone(&channel),
            config.publish_timeout(),
            config.publish_max_in_flight,
        ));
        let aggregator = Arc::new(Aggregator::new(Arc::clone(&store), config.timezone));
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&store),
            Arc::clone(&repository),
            index,
            Arc::clone(&clock),
            config.timezone,
            config.index_sync_batch,
            config.index_sync_interval(),
        ));
        let query = StatisticsQuery::new(Arc::clone(&store), Arc::clone(&clock), config.timezone);
        Self {
            config: Arc::new(config),
            clock,
            store,
            channel,
            repository,
            producer,
            aggregator,
            reconciler,
            query,
        }
    }

    /// Join both consumer groups on every topic they consume and spawn their
    /// workers. Workers stop when `shutdown` flips to `true`.
    pub async fn start_consumers(
        &self,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<Vec<JoinHandle<()>>> {
        let policy = RetryPolicy::from_config(&self.config);
        let workers = self.config.consumer_workers;

        let statistic: Arc<dyn MessageHandler> = Arc::new(StatisticHandler::new(
            Arc::clone(&self.aggregator),
            Arc::clone(&self.reconciler),
        ));
        let index_sync: Arc<dyn MessageHandler> =
            Arc::new(IndexSyncHandler::new(Arc::clone(&self.reconciler)));
        let lifecycle: Arc<dyn MessageHandler> =
            Arc::new(LifecycleHandler::new(Arc::clone(&self.reconciler)));

        let groups = [
            (TOPIC_SCRIPT_STATISTIC, GROUP_AGGREGATOR, statistic, workers),
            (TOPIC_SCRIPT_STATISTIC, GROUP_INDEX, index_sync, workers),
            (TOPIC_SCRIPT_CREATE, GROUP_INDEX, Arc::clone(&lifecycle), 1),
            (TOPIC_SCRIPT_CODE_UPDATE, GROUP_INDEX, Arc::clone(&lifecycle), 1),
            (TOPIC_SCRIPT_DELETE, GROUP_INDEX, lifecycle, 1),
        ];

        let mut handles = Vec::new();
        for (topic, group, handler, n) in groups {
            handles.extend(
                spawn_group(&self.channel, topic, group, handler, n, policy, shutdown).await?,
            );
        }
        Ok(handles)
    }

    /// Flush pending index syncs once, bounded by `deadline`. Used on
    /// shutdown.
    pub async fn flush_pending_syncs(&self, deadline: Duration) {
        match tokio::time::timeout(deadline, self.reconciler.flush_pending()).await {
            Ok(Ok(synced)) => info!(synced, "pending index syncs flushed"),
            Ok(Err(e)) => error!(error = %e, "pending index sync flush failed"),
            Err(_) => error!(deadline_ms = deadline.as_millis() as u64, "pending index sync flush timed out"),
        }
    }
}
