//! Shared dispatcher contract and the single-flight flush loop behind both variants

use crate::errors::Result;
use crate::event::{EnvironmentInfo, Event};
use crate::queue::{EventQueue, FlushState};
use crate::reachability::Reachability;
use crate::store::{DurableStore, write_snapshot};
use crate::transport::{Transport, WebRequest};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, instrument, warn};

/// Queue-and-flush contract shared by the batching and single-event dispatchers
#[async_trait]
pub trait EventDispatcher: Send + Sync {
    /// Append to the queue. Never touches the network.
    fn enqueue(&self, event: Event);

    /// Drain the queue through the transport. A no-op while another
    /// flush is running or when nothing is queued.
    async fn flush(&self) -> FlushOutcome;

    /// Flush, then overwrite the stored snapshot with whatever is left.
    async fn flush_or_save_to_disk(&self) -> Result<FlushOutcome>;

    fn pending(&self) -> usize;

    fn stats(&self) -> DispatcherStats;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    AlreadyFlushing,
    Empty,
    Completed {
        requests: usize,
        delivered: usize,
        requeued: usize,
    },
}

/// Whether a dispatcher seeds its queue from the stored snapshot on construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotRestore {
    /// Read the snapshot, then delete it
    LoadOnce,
    /// Start empty and leave the store untouched
    Skip,
}

/// Construction-time configuration for a dispatcher
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub base_url: String,
    pub app_key: String,
    pub environment: EnvironmentInfo,
    /// Upper bound on events per request; only the batching variant reads it
    pub max_batch_size: usize,
    /// `None` keeps the variant's default
    pub restore: Option<SnapshotRestore>,
}

impl DispatcherSettings {
    /// Settings with the default batch size and the variant's default restore
    pub fn new(base_url: impl Into<String>, app_key: impl Into<String>, environment: EnvironmentInfo) -> Self {
        Self {
            base_url: base_url.into(),
            app_key: app_key.into(),
            environment,
            max_batch_size: crate::batch_dispatcher::MAX_BATCH_SIZE,
            restore: None,
        }
    }

    /// Values below 1 are clamped by the dispatcher
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    /// Override the variant's snapshot restore default
    pub fn with_restore(mut self, restore: SnapshotRestore) -> Self {
        self.restore = Some(restore);
        self
    }

    pub(crate) fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), endpoint)
    }
}

/// Point-in-time dispatcher counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub pending: usize,
    pub flushes: u64,
    pub requests: u64,
    pub delivered: u64,
    pub requeued: u64,
    pub snapshots_written: u64,
}

#[derive(Debug, Default)]
struct Counters {
    flushes: AtomicU64,
    requests: AtomicU64,
    delivered: AtomicU64,
    requeued: AtomicU64,
    snapshots_written: AtomicU64,
}

/// JSON shape of a request body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PayloadShape {
    Array,
    Object,
}

impl PayloadShape {
    fn encode(self, batch: &[Event]) -> serde_json::Result<String> {
        match (self, batch) {
            (PayloadShape::Object, [event]) => serde_json::to_string(event),
            _ => serde_json::to_string(batch),
        }
    }
}

enum Delivery {
    Delivered,
    Rejected,
    Unreachable,
}

/// Queue, guard and request target owned by one dispatcher instance
pub(crate) struct DeliveryCore {
    queue: EventQueue,
    state: FlushState,
    counters: Counters,
    transport: Arc<dyn Transport>,
    store: Arc<dyn DurableStore>,
    store_key: &'static str,
    url: String,
    app_key: String,
    environment: EnvironmentInfo,
    shape: PayloadShape,
}

impl DeliveryCore {
    pub(crate) fn new(
        settings: &DispatcherSettings,
        endpoint: &str,
        store_key: &'static str,
        shape: PayloadShape,
        transport: Arc<dyn Transport>,
        store: Arc<dyn DurableStore>,
        restored: Vec<Event>,
    ) -> Self {
        Self {
            queue: EventQueue::from_events(restored),
            state: FlushState::new(),
            counters: Counters::default(),
            transport,
            store,
            store_key,
            url: settings.endpoint_url(endpoint),
            app_key: settings.app_key.clone(),
            environment: settings.environment.clone(),
            shape,
        }
    }

    pub(crate) fn store(&self) -> &dyn DurableStore {
        self.store.as_ref()
    }

    pub(crate) fn url(&self) -> &str {
        &self.url
    }

    pub(crate) fn enqueue(&self, event: Event) {
        self.queue.push(event);
    }

    pub(crate) fn pending(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn pending_events(&self) -> Vec<Event> {
        self.queue.snapshot()
    }

    /// Drain the queue in chunks of `batch_size`.
    ///
    /// A failed chunk fails as a whole. Failed events go back on the queue
    /// after the drain, behind anything that arrived meanwhile.
    #[instrument(skip(self, reachability), fields(url = %self.url))]
    pub(crate) async fn flush(
        &self,
        batch_size: usize,
        reachability: Option<&dyn Reachability>,
    ) -> FlushOutcome {
        let Some(_guard) = self.state.try_begin() else {
            debug!("Flush already in progress, skipping");
            return FlushOutcome::AlreadyFlushing;
        };

        if self.queue.is_empty() {
            return FlushOutcome::Empty;
        }

        let mut drain = Drain::new(&self.queue);
        let mut requests = 0;
        let mut delivered = 0;

        loop {
            drain.in_flight = self.queue.take_batch(batch_size);
            if drain.in_flight.is_empty() {
                break;
            }

            let result = self.deliver(&drain.in_flight, reachability).await;
            let batch = std::mem::take(&mut drain.in_flight);

            match result {
                Delivery::Delivered => {
                    requests += 1;
                    delivered += batch.len();
                }
                Delivery::Rejected => {
                    requests += 1;
                    drain.failed.extend(batch);
                }
                Delivery::Unreachable => drain.failed.extend(batch),
            }
        }

        let failed = std::mem::take(&mut drain.failed);
        let requeued = failed.len();
        self.queue.push_all(failed);

        self.counters.flushes.fetch_add(1, Ordering::Relaxed);
        self.counters.requests.fetch_add(requests as u64, Ordering::Relaxed);
        self.counters.delivered.fetch_add(delivered as u64, Ordering::Relaxed);
        self.counters.requeued.fetch_add(requeued as u64, Ordering::Relaxed);

        if requeued > 0 {
            warn!("Flush finished with {} events requeued for the next cycle", requeued);
        } else {
            debug!("Flush delivered {} events in {} requests", delivered, requests);
        }

        FlushOutcome::Completed {
            requests,
            delivered,
            requeued,
        }
    }

    async fn deliver(&self, batch: &[Event], reachability: Option<&dyn Reachability>) -> Delivery {
        if let Some(reachability) = reachability {
            if !reachability.status().await.is_reachable() {
                debug!("Network unreachable, holding {} events", batch.len());
                return Delivery::Unreachable;
            }
        }

        let payload = match self.shape.encode(batch) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode {} events: {}", batch.len(), e);
                return Delivery::Rejected;
            }
        };

        let request = WebRequest::build(&self.url, &self.app_key, &self.environment, payload);

        match self.transport.send(request).await {
            Ok(true) => Delivery::Delivered,
            Ok(false) => Delivery::Rejected,
            Err(e) => {
                warn!("Failed to send {} events: {}", batch.len(), e);
                Delivery::Rejected
            }
        }
    }

    /// Flush to completion, then write the snapshot.
    ///
    /// A flush already running on another trigger is waited out first, so
    /// the snapshot never misses the events that flush still holds.
    pub(crate) async fn flush_then_save(
        &self,
        batch_size: usize,
        reachability: Option<&dyn Reachability>,
    ) -> Result<FlushOutcome> {
        let outcome = loop {
            match self.flush(batch_size, reachability).await {
                FlushOutcome::AlreadyFlushing => {
                    debug!("Waiting for the running flush before saving");
                    self.state.wait_idle().await;
                }
                outcome => break outcome,
            }
        };

        self.save().await?;
        Ok(outcome)
    }

    /// Replace the stored snapshot with the current queue
    pub(crate) async fn save(&self) -> Result<()> {
        let events = self.queue.snapshot();
        write_snapshot(self.store.as_ref(), self.store_key, &events).await?;
        self.counters.snapshots_written.fetch_add(1, Ordering::Relaxed);
        info!("Saved {} pending events under {}", events.len(), self.store_key);
        Ok(())
    }

    pub(crate) fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            pending: self.queue.len(),
            flushes: self.counters.flushes.load(Ordering::Relaxed),
            requests: self.counters.requests.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            requeued: self.counters.requeued.load(Ordering::Relaxed),
            snapshots_written: self.counters.snapshots_written.load(Ordering::Relaxed),
        }
    }
}

/// Events held by a running flush: the batch awaiting a reply and the
/// batches that already failed.
///
/// If the flush future is dropped before it finishes, both go back to the
/// front of the queue in their original order.
struct Drain<'a> {
    queue: &'a EventQueue,
    in_flight: Vec<Event>,
    failed: Vec<Event>,
}

impl<'a> Drain<'a> {
    fn new(queue: &'a EventQueue) -> Self {
        Self {
            queue,
            in_flight: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl Drop for Drain<'_> {
    fn drop(&mut self) {
        if self.in_flight.is_empty() && self.failed.is_empty() {
            return;
        }

        let mut held = std::mem::take(&mut self.failed);
        held.append(&mut self.in_flight);
        warn!("Flush interrupted, returning {} events to the queue", held.len());
        self.queue.push_front_all(held);
    }
}

/// Handle to a running flush timer
#[derive(Debug)]
pub struct FlushTimer {
    stop: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl FlushTimer {
    /// Stop ticking and wait for the task to exit.
    ///
    /// A flush started by the timer is allowed to finish; it is never
    /// cancelled mid-send.
    pub async fn stop(self) {
        self.stop.notify_one();
        if let Err(e) = self.handle.await {
            warn!("Flush timer task ended abnormally: {}", e);
        }
    }
}

/// Call `flush()` every `period`, starting one period from now
pub fn spawn_flush_timer(dispatcher: Arc<dyn EventDispatcher>, period: Duration) -> FlushTimer {
    let stop = Arc::new(Notify::new());
    let stopped = Arc::clone(&stop);

    let handle = tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = stopped.notified() => break,
                _ = ticker.tick() => {}
            }

            if let FlushOutcome::Completed { requeued, .. } = dispatcher.flush().await {
                if requeued > 0 {
                    debug!("Timer flush left {} events queued", requeued);
                }
            }
        }

        debug!("Flush timer stopped");
    });

    FlushTimer { stop, handle }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch_dispatcher::BatchDispatcher;
    use crate::reachability::ReachabilityHandle;
    use crate::store::MemoryStore;
    use crate::test_support::{Reply, RecordingTransport};

    #[test]
    fn test_payload_shapes() {
        let events = vec![Event::new("a", "s")];

        let array = PayloadShape::Array.encode(&events).unwrap();
        assert!(array.starts_with('['));

        let object = PayloadShape::Object.encode(&events).unwrap();
        assert!(object.starts_with('{'));
    }

    #[test]
    fn test_endpoint_url_joins_cleanly() {
        let settings = DispatcherSettings::new("http://localhost:3000/", "A-DEV-1", EnvironmentInfo::default());
        assert_eq!(settings.endpoint_url("/api/v0/events"), "http://localhost:3000/api/v0/events");
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_timer_drains_queue() {
        let transport = Arc::new(RecordingTransport::new(Reply::Accept));
        let dispatcher = Arc::new(
            BatchDispatcher::new(
                DispatcherSettings::new("http://collector", "A-DEV-1", EnvironmentInfo::default()),
                transport.clone(),
                Arc::new(MemoryStore::new()),
                Arc::new(ReachabilityHandle::default()),
            )
            .await,
        );

        dispatcher.enqueue(Event::new("tick", "s"));
        let timer = spawn_flush_timer(dispatcher.clone(), Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.request_count(), 0);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(transport.request_count(), 1);
        assert_eq!(dispatcher.pending(), 0);

        timer.stop().await;
    }
}
