//! Analytics client wiring a dispatcher to its transport, store and flush timer

use crate::batch_dispatcher::BatchDispatcher;
use crate::config::{Config, DispatchVariant};
use crate::dispatcher::{DispatcherStats, EventDispatcher, FlushOutcome, FlushTimer, spawn_flush_timer};
use crate::errors::{DispatchError, Result};
use crate::event::{EnvironmentInfo, Event};
use crate::reachability::{ConnectProbe, Reachability, ReachabilityHandle};
use crate::single_dispatcher::SingleEventDispatcher;
use crate::store::{DurableStore, FileStore};
use crate::transport::{HttpTransport, Transport};

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Owns one dispatcher plus the timer that flushes it
pub struct AnalyticsClient {
    client_id: String,
    config: Config,
    dispatcher: Arc<dyn EventDispatcher>,
    timer: Mutex<Option<FlushTimer>>,
}

impl AnalyticsClient {
    /// Build an HTTP/file-backed client from configuration
    pub async fn new(config: Config) -> Result<Self> {
        config.validate().map_err(DispatchError::Config)?;

        let settings = config
            .dispatcher_settings(EnvironmentInfo::detect())
            .map_err(DispatchError::Config)?;

        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(config.http_timeout)?);
        let store: Arc<dyn DurableStore> = Arc::new(FileStore::new(&config.store_dir).await?);

        let reachability: Arc<dyn Reachability> =
            match ConnectProbe::for_url(&settings.base_url, Duration::from_secs(2)) {
                Some(probe) => Arc::new(probe),
                None => {
                    warn!("Cannot derive a probe address from {}, assuming reachable", settings.base_url);
                    Arc::new(ReachabilityHandle::default())
                }
            };

        let dispatcher: Arc<dyn EventDispatcher> = match config.variant {
            DispatchVariant::Batch => {
                Arc::new(BatchDispatcher::new(settings, transport, store, reachability).await)
            }
            DispatchVariant::SingleEvent => {
                Arc::new(SingleEventDispatcher::new(settings, transport, store).await)
            }
        };

        Ok(Self::with_dispatcher(config, dispatcher))
    }

    /// Wrap an already-built dispatcher
    pub fn with_dispatcher(config: Config, dispatcher: Arc<dyn EventDispatcher>) -> Self {
        Self {
            client_id: Uuid::new_v4().to_string(),
            config,
            dispatcher,
            timer: Mutex::new(None),
        }
    }

    /// Random id used to tell clients apart in logs
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Shared handle to the running dispatcher
    pub fn dispatcher(&self) -> Arc<dyn EventDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Queue an event; never blocks on the network
    pub fn enqueue(&self, event: Event) {
        self.dispatcher.enqueue(event);
    }

    /// Start periodic flushing; calling it twice keeps the first timer
    pub fn start_flush_timer(&self) {
        let mut timer = self.timer.lock();
        if timer.is_some() {
            return;
        }

        info!(
            "Client {} flushing every {}s ({:?})",
            self.client_id,
            self.config.flush_interval.as_secs(),
            self.config.variant
        );
        *timer = Some(spawn_flush_timer(self.dispatcher(), self.config.flush_interval));
    }

    /// One flush outside the timer's schedule
    pub async fn flush(&self) -> FlushOutcome {
        self.dispatcher.flush().await
    }

    /// Stop the timer, flush, and persist whatever could not be delivered
    #[instrument(skip(self), fields(client_id = %self.client_id))]
    pub async fn shutdown(&self) -> Result<FlushOutcome> {
        let timer = self.timer.lock().take();
        if let Some(timer) = timer {
            timer.stop().await;
        }

        let outcome = self.dispatcher.flush_or_save_to_disk().await?;
        let stats = self.stats();

        info!(
            "Client {} shut down - delivered: {}, requests: {}, left on disk: {}",
            self.client_id, stats.delivered, stats.requests, stats.pending
        );

        Ok(outcome)
    }

    /// Counters of the underlying dispatcher
    pub fn stats(&self) -> DispatcherStats {
        self.dispatcher.stats()
    }
}
