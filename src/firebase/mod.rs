pub mod client;
pub mod sse;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::RemoteError;
use sse::SseEvent;

/// A decoded event from the Realtime Database streaming endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Put { path: String, data: Value },
    Patch { path: String, data: Value },
    KeepAlive,
    Cancel(String),
    AuthRevoked,
}

#[derive(Deserialize)]
struct PathData {
    path: String,
    data: Value,
}

impl StreamEvent {
    pub fn parse(event: &SseEvent) -> Result<Self, RemoteError> {
        let path_data = || {
            serde_json::from_str::<PathData>(&event.data)
                .map_err(|e| RemoteError::Malformed(format!("{} event: {e}", event.event)))
        };

        match event.event.as_str() {
            "put" => {
                let PathData { path, data } = path_data()?;
                Ok(StreamEvent::Put { path, data })
            }
            "patch" => {
                let PathData { path, data } = path_data()?;
                Ok(StreamEvent::Patch { path, data })
            }
            "keep-alive" => Ok(StreamEvent::KeepAlive),
            "cancel" => Ok(StreamEvent::Cancel(event.data.trim_matches('"').to_string())),
            "auth_revoked" => Ok(StreamEvent::AuthRevoked),
            other => Err(RemoteError::Malformed(format!("unknown event type {other}"))),
        }
    }
}

/// Client-side copy of the subscribed location, rebuilt from put/patch
/// events so every delivery carries the whole value.
#[derive(Debug, Default)]
pub struct Snapshot {
    root: Value,
}

impl Snapshot {
    pub fn put(&mut self, path: &str, data: Value) {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        put_at(&mut self.root, &segments, data);
    }

    pub fn patch(&mut self, path: &str, data: Value) {
        match data {
            Value::Object(children) => {
                let base = path.trim_end_matches('/');
                for (key, value) in children {
                    self.put(&format!("{base}/{key}"), value);
                }
            }
            other => self.put(path, other),
        }
    }

    /// Current value, `None` when the location is empty.
    pub fn value(&self) -> Option<Value> {
        match &self.root {
            Value::Null => None,
            v => Some(v.clone()),
        }
    }
}

fn put_at(node: &mut Value, segments: &[&str], data: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *node = data;
        return;
    };

    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map.entry(first.to_string()).or_insert(Value::Null);
        put_at(child, rest, data);
        if child.is_null() || child.as_object().is_some_and(Map::is_empty) {
            map.remove(*first);
        }
        if map.is_empty() {
            *node = Value::Null;
        }
    }
}
