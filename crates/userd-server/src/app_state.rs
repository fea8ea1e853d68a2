// ABOUTME: Shared application state for the userd HTTP server.
// ABOUTME: Wires Store, Cache, and Notifier into a RecordPipeline, with constructors for prod and test use.

use std::sync::Arc;

use thiserror::Error;
use userd_core::{
    BroadcastNotifier, Cache, CacheError, FanoutNotifier, MemoryCache, MemoryStore, RecordPipeline,
    Store,
};
use userd_store::{JsonlError, JsonlNotifier, SqliteStore, SqliteStoreError};

use crate::config::{StoreKind, UserdConfig};
use crate::metrics::{RequestCounter, RouteMetrics};

/// Errors that can occur while wiring collaborators at startup.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("failed to create home directory: {0}")]
    Home(#[from] std::io::Error),

    #[error("failed to open store: {0}")]
    Store(#[from] SqliteStoreError),

    #[error("failed to open event log: {0}")]
    EventLog(#[from] JsonlError),

    #[error("failed to connect cache: {0}")]
    Cache(#[from] CacheError),

    #[error("failed to register metrics: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Shared application state accessible by all Axum handlers.
/// Every collaborator is injected here; nothing is process-global.
pub struct AppState {
    pub pipeline: Arc<RecordPipeline>,
    /// Live feed of published events for the SSE endpoint.
    pub events: BroadcastNotifier,
    pub metrics: Arc<RouteMetrics>,
    pub requests: Arc<RequestCounter>,
}

/// Type alias for the Arc-wrapped state used with Axum's State extractor.
pub type SharedState = Arc<AppState>;

impl AppState {
    /// Assemble state from an already-built pipeline. `events` should be one of
    /// the pipeline's notifier sinks so the SSE stream sees its events.
    pub fn new(
        pipeline: Arc<RecordPipeline>,
        events: BroadcastNotifier,
        requests: RequestCounter,
    ) -> Result<Self, BootstrapError> {
        Ok(Self {
            pipeline,
            events,
            metrics: Arc::new(RouteMetrics::new()?),
            requests: Arc::new(requests),
        })
    }

    /// Fully in-memory state: memory store, memory cache, broadcast-only events.
    pub fn in_memory() -> Result<Self, BootstrapError> {
        let events = BroadcastNotifier::default();
        let pipeline = RecordPipeline::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryCache::new()),
            Arc::new(events.clone()),
        );
        Self::new(Arc::new(pipeline), events, RequestCounter::ephemeral())
    }

    /// Open every collaborator named by the config and build the pipeline.
    pub async fn from_config(config: &UserdConfig) -> Result<Self, BootstrapError> {
        std::fs::create_dir_all(&config.home)?;

        let store: Arc<dyn Store> = match config.store {
            StoreKind::Sqlite => {
                let path = config.db_path();
                tracing::info!("opening sqlite store at {}", path.display());
                Arc::new(SqliteStore::open(&path)?)
            }
            StoreKind::Memory => {
                tracing::warn!("using in-memory store; records will not survive a restart");
                Arc::new(MemoryStore::new())
            }
        };

        let cache = open_cache(config).await?;

        let events = BroadcastNotifier::default();
        let log = JsonlNotifier::open(&config.event_log_path())?;
        let notifier = FanoutNotifier::new()
            .with(Arc::new(log))
            .with(Arc::new(events.clone()));

        let pipeline = RecordPipeline::new(store, cache, Arc::new(notifier))
            .with_topic(config.topic.clone())
            .with_cache_ttl(config.cache_ttl);

        let requests = RequestCounter::load(&config.counter_path());
        Self::new(Arc::new(pipeline), events, requests)
    }
}

#[cfg(feature = "redis")]
async fn open_cache(config: &UserdConfig) -> Result<Arc<dyn Cache>, BootstrapError> {
    match &config.redis_url {
        Some(url) => Ok(Arc::new(userd_store::RedisCache::connect(url).await?)),
        None => Ok(Arc::new(MemoryCache::new())),
    }
}

#[cfg(not(feature = "redis"))]
async fn open_cache(config: &UserdConfig) -> Result<Arc<dyn Cache>, BootstrapError> {
    if config.redis_url.is_some() {
        tracing::warn!("ignoring USERD_REDIS_URL: built without the `redis` feature");
    }
    Ok(Arc::new(MemoryCache::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use userd_core::NewUser;
    use userd_store::JsonlEventLog;

    #[tokio::test]
    async fn from_config_wires_sqlite_and_event_log() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = UserdConfig::with_home(dir.path().join("home"));

        let state = AppState::from_config(&config).await.unwrap();
        let mut rx = state.events.subscribe();

        let created = state
            .pipeline
            .create(NewUser {
                name: "A".to_string(),
                email: "a@x.com".to_string(),
            })
            .await
            .unwrap();

        assert!(config.db_path().exists());
        let logged = JsonlEventLog::replay(&config.event_log_path()).unwrap();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].record, created);

        let live = rx.recv().await.unwrap();
        assert_eq!(live.event.record, created);
    }

    #[tokio::test]
    async fn sqlite_state_survives_restart() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = UserdConfig::with_home(dir.path().to_path_buf());

        let created = {
            let state = AppState::from_config(&config).await.unwrap();
            state
                .pipeline
                .create(NewUser {
                    name: "A".to_string(),
                    email: "a@x.com".to_string(),
                })
                .await
                .unwrap()
        };

        let state = AppState::from_config(&config).await.unwrap();
        assert_eq!(state.pipeline.read(created.id).await.unwrap(), created);
    }
}
