use thiserror::Error;

/// Failures talking to the remote key-value endpoint.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("no data from server for {0:?}")]
    Idle(std::time::Duration),

    #[error("event stream closed by server")]
    StreamClosed,

    #[error("subscription cancelled: {0}")]
    Cancelled(String),

    #[error("malformed event: {0}")]
    Malformed(String),

    #[error("mqtt client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),
}

/// Failures reading or writing the local key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
