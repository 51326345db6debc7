//! Scripted transport and event helpers shared by unit tests

use crate::errors::{DispatchError, Result};
use crate::event::Event;
use crate::transport::{Transport, WebRequest};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reply {
    Accept,
    Reject,
    Fail,
    /// Never answers
    Stall,
}

/// Records every request and answers from a script, then from a fallback.
///
/// Each send yields once before answering so concurrent callers get a
/// chance to run while a request is "in flight".
pub(crate) struct RecordingTransport {
    requests: Mutex<Vec<WebRequest>>,
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    delay: Duration,
}

impl RecordingTransport {
    pub(crate) fn new(fallback: Reply) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
            fallback,
            delay: Duration::ZERO,
        }
    }

    /// Hold every reply for `delay` before answering
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn script(&self, replies: impl IntoIterator<Item = Reply>) {
        self.script.lock().extend(replies);
    }

    pub(crate) fn requests(&self) -> Vec<WebRequest> {
        self.requests.lock().clone()
    }

    pub(crate) fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Events per request; an object body counts as one
    pub(crate) fn batch_sizes(&self) -> Vec<usize> {
        self.bodies()
            .iter()
            .map(|body| body.as_array().map_or(1, Vec::len))
            .collect()
    }

    pub(crate) fn sent_names(&self) -> Vec<Vec<String>> {
        self.bodies()
            .into_iter()
            .map(|body| match body {
                Value::Array(items) => items.iter().map(event_name).collect(),
                other => vec![event_name(&other)],
            })
            .collect()
    }

    fn bodies(&self) -> Vec<Value> {
        self.requests
            .lock()
            .iter()
            .map(|r| serde_json::from_str(&r.body).unwrap())
            .collect()
    }
}

fn event_name(value: &Value) -> String {
    value["eventName"].as_str().unwrap_or_default().to_string()
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, request: WebRequest) -> Result<bool> {
        self.requests.lock().push(request);
        tokio::task::yield_now().await;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let reply = self.script.lock().pop_front().unwrap_or(self.fallback);
        match reply {
            Reply::Accept => Ok(true),
            Reply::Reject => Ok(false),
            Reply::Fail => Err(DispatchError::Transport("connection reset".to_string())),
            Reply::Stall => std::future::pending().await,
        }
    }
}

pub(crate) fn events(n: usize) -> Vec<Event> {
    (0..n)
        .map(|i| Event::new(format!("event-{}", i), "session").with_prop("seq", i))
        .collect()
}

pub(crate) fn names(events: &[Event]) -> Vec<String> {
    events.iter().map(|e| e.event_name.clone()).collect()
}
