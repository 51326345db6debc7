//! Event Dispatcher Library
//!
//! At-least-once, batched delivery of analytics events to a remote collector,
//! with an on-disk snapshot for events that could not be delivered before exit.

pub mod batch_dispatcher;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod event;
pub mod queue;
pub mod reachability;
pub mod single_dispatcher;
pub mod store;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use batch_dispatcher::{BatchDispatcher, MAX_BATCH_SIZE};
pub use client::AnalyticsClient;
pub use config::{Config, DispatchVariant};
pub use dispatcher::{DispatcherSettings, DispatcherStats, EventDispatcher, FlushOutcome, SnapshotRestore};
pub use errors::{DispatchError, Result};
pub use event::{EnvironmentInfo, Event, new_session_id};
pub use reachability::{NetworkReachability, Reachability, ReachabilityHandle};
pub use single_dispatcher::SingleEventDispatcher;
pub use store::{DurableStore, FileStore, MemoryStore};
pub use transport::{HttpTransport, Transport, WebRequest};
