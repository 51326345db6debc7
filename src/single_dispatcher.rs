//! One-event-per-request dispatcher for sandboxed browser runtimes

use crate::dispatcher::{
    DeliveryCore, DispatcherSettings, DispatcherStats, EventDispatcher, FlushOutcome, PayloadShape,
    SnapshotRestore,
};
use crate::errors::Result;
use crate::event::Event;
use crate::store::{DurableStore, take_snapshot};
use crate::transport::Transport;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

pub const EVENT_ENDPOINT: &str = "/api/v0/event";
pub const SINGLE_STORE_KEY: &str = "AptabaseKey";

/// Sends each queued event as its own JSON object.
///
/// There is no reachability check; the request itself is left to fail.
/// By default the queue starts empty and any stored snapshot is left
/// alone until the next save overwrites it.
pub struct SingleEventDispatcher {
    core: DeliveryCore,
}

impl SingleEventDispatcher {
    /// Build the dispatcher; the snapshot is only read with `SnapshotRestore::LoadOnce`
    pub async fn new(
        settings: DispatcherSettings,
        transport: Arc<dyn Transport>,
        store: Arc<dyn DurableStore>,
    ) -> Self {
        let restored = match settings.restore.unwrap_or(SnapshotRestore::Skip) {
            SnapshotRestore::LoadOnce => take_snapshot(store.as_ref(), SINGLE_STORE_KEY).await,
            SnapshotRestore::Skip => {
                debug!("Snapshot restore disabled for single-event dispatch");
                Vec::new()
            }
        };

        if !restored.is_empty() {
            info!("Restored {} pending events from the previous session", restored.len());
        }

        let core = DeliveryCore::new(
            &settings,
            EVENT_ENDPOINT,
            SINGLE_STORE_KEY,
            PayloadShape::Object,
            transport,
            store,
            restored,
        );

        Self { core }
    }

    /// Full single-event endpoint URL
    pub fn url(&self) -> &str {
        self.core.url()
    }

    /// Queued events, front first
    pub fn pending_events(&self) -> Vec<Event> {
        self.core.pending_events()
    }

    /// Whether a snapshot is currently stored under the single-event key
    pub async fn has_stored_snapshot(&self) -> Result<bool> {
        Ok(self.core.store().get_string(SINGLE_STORE_KEY).await?.is_some())
    }
}

#[async_trait]
impl EventDispatcher for SingleEventDispatcher {
    fn enqueue(&self, event: Event) {
        self.core.enqueue(event);
    }

    async fn flush(&self) -> FlushOutcome {
        self.core.flush(1, None).await
    }

    async fn flush_or_save_to_disk(&self) -> Result<FlushOutcome> {
        self.core.flush_then_save(1, None).await
    }

    fn pending(&self) -> usize {
        self.core.pending()
    }

    fn stats(&self) -> DispatcherStats {
        self.core.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EnvironmentInfo;
    use crate::store::{MemoryStore, write_snapshot};
    use crate::test_support::{Reply, RecordingTransport, events, names};
    use serde_json::Value;

    fn settings() -> DispatcherSettings {
        DispatcherSettings::new("https://eu.aptabase.com", "A-EU-1234567890", EnvironmentInfo::default())
    }

    async fn dispatcher(
        transport: &Arc<RecordingTransport>,
        store: &Arc<MemoryStore>,
        settings: DispatcherSettings,
    ) -> SingleEventDispatcher {
        SingleEventDispatcher::new(settings, transport.clone(), store.clone()).await
    }

    #[tokio::test]
    async fn test_each_event_is_its_own_request() {
        let transport = Arc::new(RecordingTransport::new(Reply::Accept));
        let store = Arc::new(MemoryStore::new());
        let dispatcher = dispatcher(&transport, &store, settings()).await;

        for event in events(30) {
            dispatcher.enqueue(event);
        }

        let outcome = dispatcher.flush().await;

        assert_eq!(
            outcome,
            FlushOutcome::Completed { requests: 30, delivered: 30, requeued: 0 }
        );
        assert_eq!(transport.sent_names().concat(), names(&events(30)));

        let request = &transport.requests()[0];
        assert_eq!(request.url, "https://eu.aptabase.com/api/v0/event");
        let body: Value = serde_json::from_str(&request.body).unwrap();
        assert!(body.is_object());
        assert_eq!(body["eventName"], "event-0");
    }

    #[tokio::test]
    async fn test_failed_events_requeued_in_order() {
        let transport = Arc::new(RecordingTransport::new(Reply::Accept));
        transport.script([Reply::Reject, Reply::Accept, Reply::Fail, Reply::Accept]);
        let store = Arc::new(MemoryStore::new());
        let dispatcher = dispatcher(&transport, &store, settings()).await;
        let input = events(4);

        for event in input.clone() {
            dispatcher.enqueue(event);
        }

        let outcome = dispatcher.flush().await;

        assert_eq!(
            outcome,
            FlushOutcome::Completed { requests: 4, delivered: 2, requeued: 2 }
        );
        assert_eq!(dispatcher.pending_events(), vec![input[0].clone(), input[2].clone()]);
    }

    #[tokio::test]
    async fn test_concurrent_flush_is_a_no_op() {
        let transport = Arc::new(RecordingTransport::new(Reply::Accept));
        let store = Arc::new(MemoryStore::new());
        let dispatcher = dispatcher(&transport, &store, settings()).await;

        dispatcher.enqueue(Event::new("a", "s"));
        let (first, second) = futures::join!(dispatcher.flush(), dispatcher.flush());

        assert!(matches!(first, FlushOutcome::Completed { requests: 1, .. }));
        assert_eq!(second, FlushOutcome::AlreadyFlushing);
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_default_does_not_restore_snapshot() {
        let transport = Arc::new(RecordingTransport::new(Reply::Accept));
        let store = Arc::new(MemoryStore::new());
        write_snapshot(store.as_ref(), SINGLE_STORE_KEY, &events(2)).await.unwrap();

        let dispatcher = dispatcher(&transport, &store, settings()).await;

        assert_eq!(dispatcher.pending(), 0);
        assert!(dispatcher.has_stored_snapshot().await.unwrap());
    }

    #[tokio::test]
    async fn test_load_once_restores_and_clears_snapshot() {
        let transport = Arc::new(RecordingTransport::new(Reply::Reject));
        let store = Arc::new(MemoryStore::new());
        let input = events(3);

        {
            let first = dispatcher(&transport, &store, settings()).await;
            for event in input.clone() {
                first.enqueue(event);
            }
            first.flush_or_save_to_disk().await.unwrap();
        }

        let restored = dispatcher(
            &transport,
            &store,
            settings().with_restore(SnapshotRestore::LoadOnce),
        )
        .await;

        assert_eq!(restored.pending_events(), input);
        assert!(!restored.has_stored_snapshot().await.unwrap());
    }

    #[tokio::test]
    async fn test_save_overwrites_with_remaining_queue() {
        let transport = Arc::new(RecordingTransport::new(Reply::Accept));
        let store = Arc::new(MemoryStore::new());
        write_snapshot(store.as_ref(), SINGLE_STORE_KEY, &events(5)).await.unwrap();
        let dispatcher = dispatcher(&transport, &store, settings()).await;

        dispatcher.enqueue(Event::new("delivered", "s"));
        dispatcher.flush_or_save_to_disk().await.unwrap();

        assert_eq!(
            store.get_string(SINGLE_STORE_KEY).await.unwrap().as_deref(),
            Some("[]")
        );
        assert_eq!(dispatcher.stats().delivered, 1);
    }
}
