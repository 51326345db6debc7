//! Batching dispatcher for native platforms

use crate::dispatcher::{
    DeliveryCore, DispatcherSettings, DispatcherStats, EventDispatcher, FlushOutcome, PayloadShape,
    SnapshotRestore,
};
use crate::errors::Result;
use crate::event::Event;
use crate::reachability::Reachability;
use crate::store::{DurableStore, take_snapshot};
use crate::transport::Transport;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

pub const EVENTS_ENDPOINT: &str = "/api/v0/events";
pub const BATCH_STORE_KEY: &str = "aptabase_key";
pub const MAX_BATCH_SIZE: usize = 25;

/// Sends queued events as JSON arrays of up to `max_batch_size` and checks
/// reachability before every request.
pub struct BatchDispatcher {
    core: DeliveryCore,
    reachability: Arc<dyn Reachability>,
    max_batch_size: usize,
}

impl BatchDispatcher {
    /// Build the dispatcher, seeding the queue from the stored snapshot
    /// unless `settings.restore` says otherwise.
    pub async fn new(
        settings: DispatcherSettings,
        transport: Arc<dyn Transport>,
        store: Arc<dyn DurableStore>,
        reachability: Arc<dyn Reachability>,
    ) -> Self {
        let restored = match settings.restore.unwrap_or(SnapshotRestore::LoadOnce) {
            SnapshotRestore::LoadOnce => take_snapshot(store.as_ref(), BATCH_STORE_KEY).await,
            SnapshotRestore::Skip => Vec::new(),
        };

        if !restored.is_empty() {
            info!("Restored {} pending events from the previous session", restored.len());
        }

        let core = DeliveryCore::new(
            &settings,
            EVENTS_ENDPOINT,
            BATCH_STORE_KEY,
            PayloadShape::Array,
            transport,
            store,
            restored,
        );

        Self {
            core,
            reachability,
            max_batch_size: settings.max_batch_size.max(1),
        }
    }

    /// Effective batch size after clamping
    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Full bulk endpoint URL
    pub fn url(&self) -> &str {
        self.core.url()
    }

    /// Queued events, front first
    pub fn pending_events(&self) -> Vec<Event> {
        self.core.pending_events()
    }
}

#[async_trait]
impl EventDispatcher for BatchDispatcher {
    fn enqueue(&self, event: Event) {
        self.core.enqueue(event);
    }

    async fn flush(&self) -> FlushOutcome {
        self.core
            .flush(self.max_batch_size, Some(self.reachability.as_ref()))
            .await
    }

    async fn flush_or_save_to_disk(&self) -> Result<FlushOutcome> {
        self.core
            .flush_then_save(self.max_batch_size, Some(self.reachability.as_ref()))
            .await
    }

    fn pending(&self) -> usize {
        self.core.pending()
    }

    fn stats(&self) -> DispatcherStats {
        self.core.stats()
    }
}
