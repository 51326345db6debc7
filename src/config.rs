//! Configuration management for the analytics client

use crate::dispatcher::{DispatcherSettings, SnapshotRestore};
use crate::event::EnvironmentInfo;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Which dispatcher the client runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchVariant {
    /// Bounded batches with a reachability pre-check
    Batch,
    /// One event per request, for sandboxed browser runtimes
    SingleEvent,
}

impl FromStr for DispatchVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "batch" | "batching" | "native" => Ok(DispatchVariant::Batch),
            "single" | "single-event" | "single_event" | "web" | "webgl" => Ok(DispatchVariant::SingleEvent),
            other => Err(format!("unknown dispatch variant: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application key, `A-<REGION>-<id>`
    pub app_key: String,

    /// Collector host; required for self-hosted keys, overrides the region otherwise
    pub host: Option<String>,

    /// Dispatcher variant
    pub variant: DispatchVariant,

    /// Interval between timer-driven flushes
    pub flush_interval: Duration,

    /// HTTP timeout for collector requests
    pub http_timeout: Duration,

    /// Directory holding the pending-event snapshot
    pub store_dir: PathBuf,

    /// Restore the snapshot when running the single-event variant
    pub restore_single_event_snapshot: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_key: String::new(),
            host: None,
            variant: DispatchVariant::Batch,
            flush_interval: Duration::from_secs(60),
            http_timeout: Duration::from_secs(10),
            store_dir: env::temp_dir().join("event_dispatcher"),
            restore_single_event_snapshot: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key-value source.
    ///
    /// Unparsable values are logged and the default is kept.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Config::default();

        if let Some(app_key) = lookup("APTABASE_APP_KEY") {
            config.app_key = app_key.trim().to_string();
        }

        if let Some(host) = lookup("APTABASE_HOST") {
            if !host.trim().is_empty() {
                config.host = Some(host.trim().to_string());
            }
        }

        if let Some(variant) = lookup("DISPATCH_VARIANT") {
            match variant.parse() {
                Ok(variant) => config.variant = variant,
                Err(e) => warn!("Ignoring DISPATCH_VARIANT: {}, using {:?}", e, config.variant),
            }
        }

        if let Some(seconds) = parse_seconds(&lookup, "FLUSH_INTERVAL_SECONDS") {
            config.flush_interval = seconds;
        }

        if let Some(seconds) = parse_seconds(&lookup, "HTTP_TIMEOUT_SECONDS") {
            config.http_timeout = seconds;
        }

        if let Some(store_dir) = lookup("STORE_DIR") {
            config.store_dir = PathBuf::from(store_dir);
        }

        if let Some(restore) = lookup("RESTORE_SINGLE_EVENT_SNAPSHOT") {
            match restore.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => config.restore_single_event_snapshot = true,
                "false" | "0" | "no" | "" => config.restore_single_event_snapshot = false,
                other => warn!("Ignoring RESTORE_SINGLE_EVENT_SNAPSHOT={:?}, expected true or false", other),
            }
        }

        config
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.app_key.is_empty() {
            return Err("app_key cannot be empty".to_string());
        }

        let region = self
            .region()
            .ok_or_else(|| format!("app_key {:?} is not of the form A-<REGION>-<id>", self.app_key))?;

        if region == "SH" && self.host.is_none() {
            return Err("self-hosted app keys require a host".to_string());
        }

        if self.flush_interval.is_zero() {
            return Err("flush_interval must be greater than 0".to_string());
        }

        if self.http_timeout.is_zero() {
            return Err("http_timeout must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Region segment of the app key
    pub fn region(&self) -> Option<&str> {
        let mut parts = self.app_key.split('-');
        match (parts.next(), parts.next(), parts.next()) {
            (Some("A"), Some(region), Some(id)) if !region.is_empty() && !id.is_empty() => Some(region),
            _ => None,
        }
    }

    /// Collector base URL; an explicit host wins over the key's region
    pub fn base_url(&self) -> Option<String> {
        if let Some(host) = &self.host {
            return Some(host.trim_end_matches('/').to_string());
        }

        match self.region()? {
            "EU" => Some("https://eu.aptabase.com".to_string()),
            "US" => Some("https://us.aptabase.com".to_string()),
            "DEV" => Some("http://localhost:3000".to_string()),
            _ => None,
        }
    }

    /// Settings for the configured dispatcher variant
    pub fn dispatcher_settings(&self, environment: EnvironmentInfo) -> Result<DispatcherSettings, String> {
        let base_url = self
            .base_url()
            .ok_or_else(|| format!("cannot resolve a collector for app_key {:?}", self.app_key))?;

        let mut settings = DispatcherSettings::new(base_url, self.app_key.clone(), environment);

        if self.variant == DispatchVariant::SingleEvent && self.restore_single_event_snapshot {
            settings = settings.with_restore(SnapshotRestore::LoadOnce);
        }

        Ok(settings)
    }
}

fn parse_seconds(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(seconds) => Some(Duration::from_secs(seconds)),
        Err(e) => {
            warn!("Ignoring {}={:?}: {}", key, raw, e);
            None
        }
    }
}
