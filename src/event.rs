//! Event records and the environment descriptor attached to requests

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// One telemetry occurrence. The dispatcher never looks inside it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub event_name: String,
    #[serde(default)]
    pub props: HashMap<String, Value>,
}

impl Event {
    pub fn new(event_name: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            session_id: session_id.into(),
            event_name: event_name.into(),
            props: HashMap::new(),
        }
    }

    /// Add or replace one property
    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }

    pub fn with_props(mut self, props: HashMap<String, Value>) -> Self {
        self.props.extend(props);
        self
    }

    /// Override the capture time
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Platform and runtime metadata sent with every request.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentInfo {
    pub is_debug: bool,
    pub os_name: String,
    pub os_version: String,
    pub locale: String,
    pub app_version: String,
    pub app_build_number: String,
    pub sdk_version: String,
    pub engine_name: String,
    pub engine_version: String,
}

impl Default for EnvironmentInfo {
    fn default() -> Self {
        Self {
            is_debug: cfg!(debug_assertions),
            os_name: std::env::consts::OS.to_string(),
            os_version: String::new(),
            locale: "en-US".to_string(),
            app_version: String::new(),
            app_build_number: String::new(),
            sdk_version: format!("event_dispatcher@{}", env!("CARGO_PKG_VERSION")),
            engine_name: "rust".to_string(),
            engine_version: String::new(),
        }
    }
}

impl EnvironmentInfo {
    /// Best-effort detection for the current process
    pub fn detect() -> Self {
        let mut env = Self::default();

        if let Ok(lang) = std::env::var("LANG") {
            // "en_US.UTF-8" -> "en-US"
            let tag = lang.split('.').next().unwrap_or_default().replace('_', "-");
            if !tag.is_empty() && tag != "C" && tag != "POSIX" {
                env.locale = tag;
            }
        }

        if cfg!(target_os = "linux") {
            if let Ok(text) = std::fs::read_to_string("/etc/os-release") {
                env.os_version = parse_os_release(&text).unwrap_or_default();
            }
        }

        env
    }

    /// Set the host application's version and build number
    pub fn with_app_version(mut self, version: impl Into<String>, build_number: impl Into<String>) -> Self {
        self.app_version = version.into();
        self.app_build_number = build_number.into();
        self
    }

    /// Descriptor rendered into the `User-Agent` header
    pub fn user_agent(&self) -> String {
        let os = if self.os_version.is_empty() {
            self.os_name.clone()
        } else {
            format!("{} {}", self.os_name, self.os_version)
        };

        format!("{} ({}; {})", self.sdk_version, os, self.locale)
    }

    /// Compact JSON of every field, camelCase keys
    pub fn to_json(&self) -> String {
        // a struct of strings and a bool always serializes
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// `VERSION_ID` from an os-release file, quotes stripped
fn parse_os_release(text: &str) -> Option<String> {
    text.lines()
        .filter_map(|line| line.trim().strip_prefix("VERSION_ID="))
        .map(|value| value.trim_matches(|c: char| c == '"' || c == '\'').to_string())
        .find(|value| !value.is_empty())
}

/// Epoch seconds followed by eight random digits
pub fn new_session_id() -> String {
    let epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    format!("{}{:08}", epoch, rand::random_range(0..100_000_000u32))
}
