//! Bounded, newest-first activity log with its persisted toggle counter.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::StoreError;
use crate::store::KeyValueStore;

/// Maximum number of entries kept in memory and on disk.
pub const MAX_ENTRIES: usize = 20;

pub const LOGS_KEY: &str = "led_logs";
pub const COUNT_KEY: &str = "toggle_count";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    On,
    Off,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Creation time in milliseconds since the epoch, bumped when needed so
    /// ids stay strictly increasing.
    pub id: i64,
    pub message: String,
    pub time: String,
    #[serde(rename = "type")]
    pub kind: LogKind,
}

pub struct ActivityLog {
    entries: Vec<LogEntry>,
    toggle_count: u64,
    store: Box<dyn KeyValueStore>,
}

impl ActivityLog {
    /// Create a log backed by `store` and load whatever it already holds.
    pub fn restore(store: Box<dyn KeyValueStore>) -> Self {
        let mut log = Self {
            entries: Vec::new(),
            toggle_count: 0,
            store,
        };

        match log.store.get(LOGS_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<LogEntry>>(&raw) {
                Ok(mut entries) => {
                    entries.truncate(MAX_ENTRIES);
                    log.entries = entries;
                }
                Err(e) => error!("Error loading logs: {}", e),
            },
            Ok(None) => {}
            Err(e) => error!("Error reading stored logs: {}", e),
        }

        match log.store.get(COUNT_KEY) {
            Ok(Some(raw)) => match raw.trim().parse::<u64>() {
                Ok(count) => log.toggle_count = count,
                Err(e) => warn!("Ignoring stored toggle count {:?}: {}", raw, e),
            },
            Ok(None) => {}
            Err(e) => error!("Error reading stored toggle count: {}", e),
        }

        debug!(
            "Restored {} log entries, toggle count {}",
            log.entries.len(),
            log.toggle_count
        );
        log
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn toggle_count(&self) -> u64 {
        self.toggle_count
    }

    /// Count one observed state change and log it.
    pub fn record_toggle(&mut self, message: impl Into<String>, kind: LogKind) {
        self.toggle_count += 1;
        self.append(message, kind);
    }

    pub fn append(&mut self, message: impl Into<String>, kind: LogKind) {
        self.append_at(message, kind, Local::now());
    }

    pub fn append_at(&mut self, message: impl Into<String>, kind: LogKind, now: DateTime<Local>) {
        let mut id = now.timestamp_millis();
        if let Some(newest) = self.entries.first() {
            id = id.max(newest.id + 1);
        }

        self.entries.insert(
            0,
            LogEntry {
                id,
                message: message.into(),
                time: now.format("%-I:%M:%S %p").to_string(),
                kind,
            },
        );
        self.entries.truncate(MAX_ENTRIES);
        self.persist();
    }

    /// Write entries and counter to the store. An empty log is never written.
    pub fn persist(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        if let Err(e) = self.try_persist() {
            error!("Failed to persist activity log: {}", e);
        }
    }

    fn try_persist(&mut self) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(&self.entries)?;
        self.store.set(LOGS_KEY, &serialized)?;
        self.store.set(COUNT_KEY, &self.toggle_count.to_string())?;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.toggle_count = 0;
        for key in [LOGS_KEY, COUNT_KEY] {
            if let Err(e) = self.store.remove(key) {
                error!("Failed to remove {}: {}", key, e);
            }
        }
    }
}
