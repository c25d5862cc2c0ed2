//! Local mirror of the remote LED key.
//!
//! The cached state changes only when the subscription delivers a value.
//! Writes are fire-and-forget: a successful write does not touch local state,
//! the echo that follows it does.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Local};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::history::LogKind;
use crate::remote::{Delivery, RemoteWriter};

/// Normalized (upper-cased) value of the LED key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceState {
    On,
    Off,
    /// Anything else another writer put in the key, kept verbatim so changes
    /// away from and back to it still count.
    Other(String),
}

impl DeviceState {
    /// Normalize a delivered value: stringify, then upper-case.
    ///
    /// Non-string values use their JSON text, so an object reads as
    /// `{"A":1}` and an array as `[1,2]`. Either way it is an unknown state.
    pub fn from_value(value: &serde_json::Value) -> Self {
        let text = match value {
            serde_json::Value::String(s) => s.to_uppercase(),
            other => other.to_string().to_uppercase(),
        };
        match text.as_str() {
            "ON" => DeviceState::On,
            "OFF" => DeviceState::Off,
            _ => DeviceState::Other(text),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            DeviceState::On => "ON",
            DeviceState::Off => "OFF",
            DeviceState::Other(s) => s,
        }
    }

    pub fn log_kind(&self) -> LogKind {
        match self {
            DeviceState::On => LogKind::On,
            _ => LogKind::Off,
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Completion of a write issued by [`RemoteStateMirror::set_state`].
#[derive(Debug)]
pub struct WriteResult {
    pub target: DeviceState,
    pub result: Result<(), String>,
}

pub struct RemoteStateMirror {
    writer: Arc<dyn RemoteWriter>,
    write_tx: mpsc::Sender<WriteResult>,
    cached: Option<DeviceState>,
    connected: bool,
    last_update: Option<DateTime<Local>>,
}

impl RemoteStateMirror {
    pub fn new(writer: Arc<dyn RemoteWriter>, write_tx: mpsc::Sender<WriteResult>) -> Self {
        Self {
            writer,
            write_tx,
            cached: None,
            connected: false,
            last_update: None,
        }
    }

    pub fn state(&self) -> Option<&DeviceState> {
        self.cached.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn last_update(&self) -> Option<DateTime<Local>> {
        self.last_update
    }

    /// Apply one subscription delivery. Returns the new state when the
    /// delivered value differs from the cached one.
    pub fn on_delivery(&mut self, delivery: Delivery) -> Option<DeviceState> {
        match delivery {
            Delivery::Error(e) => {
                warn!("Remote subscription error: {}", e);
                self.connected = false;
                None
            }
            Delivery::Value(None) => {
                info!("No value in remote store, initializing to OFF");
                self.connected = true;
                self.set_state(DeviceState::Off);
                None
            }
            Delivery::Value(Some(value)) => {
                debug!("Remote value received: {}", value);
                self.connected = true;
                let state = DeviceState::from_value(&value);
                if self.cached.as_ref() == Some(&state) {
                    return None;
                }
                info!(
                    "State changed from {} to {}",
                    self.cached.as_ref().map_or("(none)", DeviceState::as_str),
                    state
                );
                self.cached = Some(state.clone());
                self.last_update = Some(Local::now());
                Some(state)
            }
        }
    }

    /// Ask the remote store to take `target`. The outcome arrives later on
    /// the write-result channel.
    pub fn set_state(&self, target: DeviceState) {
        info!("Writing {} to remote store", target);
        let writer = Arc::clone(&self.writer);
        let tx = self.write_tx.clone();
        tokio::spawn(async move {
            let result = writer.set(target.as_str()).await.map_err(|e| e.to_string());
            if tx.send(WriteResult { target, result }).await.is_err() {
                warn!("Write result channel closed");
            }
        });
    }
}
