use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::AsRefStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
    Detection,
    Signature,
    Broadcast,
    Balance,
}

impl LogLevel {
    /// Levels that are also pushed to the operator immediately.
    pub fn is_notifiable(self) -> bool {
        matches!(self, LogLevel::Error | LogLevel::Success | LogLevel::Detection)
    }
}

/// Entry as emitted by a component, before the recorder assigns id and time.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLogEntry {
    pub level: LogLevel,
    pub message: String,
    pub detail: Option<BTreeMap<String, Value>>,
}

impl NewLogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.detail
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<BTreeMap<String, Value>>,
}
