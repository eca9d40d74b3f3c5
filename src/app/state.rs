//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::matchmaking::{MatchOrchestrator, RoomRegistry};
use crate::session::ChannelBroadcaster;
use crate::store::{spawn_result_writer, LoggingResultStore, RestResultStore, ResultQueue, ResultStore};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub orchestrator: Arc<MatchOrchestrator>,
}

impl AppState {
    /// Wire the core and start its background tasks. Must run inside the runtime.
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        // Persistence: PostgREST when configured, the log otherwise
        let store: Arc<dyn ResultStore> =
            match (&config.result_store_url, &config.result_store_key) {
                (Some(url), Some(key)) => Arc::new(RestResultStore::new(url.as_str(), key.as_str())),
                _ => {
                    tracing::warn!("RESULT_STORE_URL not set, match results will only be logged");
                    Arc::new(LoggingResultStore::default())
                }
            };
        let (results, results_rx) = ResultQueue::new(config.game.result_queue_capacity);
        spawn_result_writer(store, results_rx);

        let orchestrator = Arc::new(MatchOrchestrator::new(
            RoomRegistry::new(config.game.max_score),
            &config.game,
            Arc::new(ChannelBroadcaster),
            results,
        ));
        orchestrator.spawn_heartbeat_sweep(config.game.heartbeat_sweep_interval);

        Self {
            config,
            orchestrator,
        }
    }
}
