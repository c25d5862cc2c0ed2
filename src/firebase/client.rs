use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info};

use crate::config::FirebaseConfig;
use crate::error::RemoteError;
use crate::remote::{Delivery, RemoteWriter};

use super::sse::SseParser;
use super::{Snapshot, StreamEvent};

const INITIAL_BACKOFF: Duration = Duration::from_secs(5);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// REST client for one key of a Firebase Realtime Database.
#[derive(Clone)]
pub struct FirebaseClient {
    http: reqwest::Client,
    key_url: String,
    auth: Option<String>,
    /// Longest silence tolerated on the stream. The server sends a
    /// keep-alive roughly every 30 s.
    idle_timeout: Duration,
}

impl FirebaseClient {
    pub fn new(config: &FirebaseConfig, key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            key_url: format!("{}/{}.json", config.database_url, key),
            auth: config.auth.clone(),
            idle_timeout: config.idle_timeout,
        }
    }

    pub fn key_url(&self) -> &str {
        &self.key_url
    }

    fn request(&self, method: reqwest::Method) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, &self.key_url);
        match &self.auth {
            Some(auth) => builder.query(&[("auth", auth)]),
            None => builder,
        }
    }

    /// Keep a streaming subscription open, forwarding every value and every
    /// failure to `tx`. Returns once `tx` is closed.
    pub async fn run(&self, tx: mpsc::Sender<Delivery>) {
        let mut backoff = INITIAL_BACKOFF;

        loop {
            info!("Setting up Firebase listener on {}", self.key_url);

            match self.run_session(&tx, &mut backoff).await {
                Ok(()) => {
                    info!("Cleaning up Firebase listener");
                    return;
                }
                Err(e) => {
                    error!("Firebase error: {}. Reconnecting in {:?}", e, backoff);
                    if tx.send(Delivery::Error(e.to_string())).await.is_err() {
                        return;
                    }
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    /// One streaming connection. `Ok` means the receiver went away; the
    /// stream ending on its own is an error, and so is a silent stream.
    async fn run_session(
        &self,
        tx: &mpsc::Sender<Delivery>,
        backoff: &mut Duration,
    ) -> Result<(), RemoteError> {
        let request = self
            .request(reqwest::Method::GET)
            .header(ACCEPT, "text/event-stream")
            .send();
        let response = timeout(self.idle_timeout, request)
            .await
            .map_err(|_| RemoteError::Idle(self.idle_timeout))??;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let mut parser = SseParser::default();
        let mut snapshot = Snapshot::default();
        let mut stream = response.bytes_stream();

        loop {
            let chunk = match timeout(self.idle_timeout, stream.next()).await {
                Ok(Some(chunk)) => chunk?,
                Ok(None) => return Err(RemoteError::StreamClosed),
                Err(_) => return Err(RemoteError::Idle(self.idle_timeout)),
            };

            for event in parser.feed(&chunk)? {
                match StreamEvent::parse(&event)? {
                    StreamEvent::Put { path, data } => snapshot.put(&path, data),
                    StreamEvent::Patch { path, data } => snapshot.patch(&path, data),
                    StreamEvent::KeepAlive => {
                        debug!("Firebase keep-alive");
                        continue;
                    }
                    StreamEvent::Cancel(reason) => return Err(RemoteError::Cancelled(reason)),
                    StreamEvent::AuthRevoked => {
                        return Err(RemoteError::Cancelled("auth token revoked".into()));
                    }
                }

                *backoff = INITIAL_BACKOFF;
                let value = snapshot.value();
                debug!("Firebase value received: {:?}", value);
                if tx.send(Delivery::Value(value)).await.is_err() {
                    return Ok(());
                }
            }
        }
    }
}

#[async_trait]
impl RemoteWriter for FirebaseClient {
    async fn set(&self, value: &str) -> Result<(), RemoteError> {
        debug!("PUT {} = {}", self.key_url, value);
        let response = self
            .request(reqwest::Method::PUT)
            .json(&value)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const RECV_LIMIT: Duration = Duration::from_secs(5);

    fn config(auth: Option<&str>) -> FirebaseConfig {
        FirebaseConfig {
            database_url: "https://demo-default-rtdb.firebaseio.com".into(),
            auth: auth.map(String::from),
            idle_timeout: Duration::from_secs(90),
        }
    }

    /// Accepts one streaming request, writes `chunks` as the event-stream
    /// body, then either keeps the socket open without sending anything or
    /// closes it.
    async fn sse_server(chunks: Vec<&'static str>, hold_open: bool) -> FirebaseConfig {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                request.extend_from_slice(&buf[..n]);
            }

            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\n\r\n")
                .await
                .unwrap();
            for chunk in chunks {
                socket.write_all(chunk.as_bytes()).await.unwrap();
                socket.flush().await.unwrap();
            }
            if hold_open {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        });

        FirebaseConfig {
            database_url: format!("http://{addr}"),
            auth: None,
            idle_timeout: Duration::from_millis(300),
        }
    }

    async fn next(rx: &mut mpsc::Receiver<Delivery>) -> Delivery {
        timeout(RECV_LIMIT, rx.recv())
            .await
            .expect("no delivery in time")
            .expect("delivery channel closed")
    }

    #[test]
    fn key_url_points_at_json_endpoint() {
        let client = FirebaseClient::new(&config(None), "ledtest");
        assert_eq!(
            client.key_url(),
            "https://demo-default-rtdb.firebaseio.com/ledtest.json"
        );
    }

    #[test]
    fn auth_token_goes_in_query() {
        let client = FirebaseClient::new(&config(Some("s3cret")), "devices/led");
        let request = client.request(reqwest::Method::PUT).build().unwrap();
        assert_eq!(
            request.url().as_str(),
            "https://demo-default-rtdb.firebaseio.com/devices/led.json?auth=s3cret"
        );
    }

    #[tokio::test]
    async fn unreachable_server_reports_error_delivery() {
        let mut unreachable = config(None);
        unreachable.database_url = "http://127.0.0.1:9".into();
        let client = FirebaseClient::new(&unreachable, "ledtest");
        let (tx, mut rx) = mpsc::channel(1);
        let task = tokio::spawn(async move { client.run(tx).await });

        match next(&mut rx).await {
            Delivery::Error(_) => {}
            other => panic!("expected error delivery, got {other:?}"),
        }
        task.abort();
    }

    #[tokio::test]
    async fn session_turns_events_into_deliveries() {
        let config = sse_server(
            vec![
                "event: put\ndata: {\"path\":\"/\",\"data\":null}\n\n",
                "event: keep-alive\ndata: null\n\n",
                "event: put\ndata: {\"path\":\"/\",\"data\":\"on\"}\n\n",
                "event: cancel\ndata: \"Permission denied\"\n\n",
            ],
            false,
        )
        .await;
        let client = FirebaseClient::new(&config, "ledtest");
        let (tx, mut rx) = mpsc::channel(8);
        let mut backoff = MAX_BACKOFF;

        let result = client.run_session(&tx, &mut backoff).await;

        match result {
            Err(RemoteError::Cancelled(reason)) => assert_eq!(reason, "Permission denied"),
            other => panic!("expected cancellation, got {other:?}"),
        }
        assert_eq!(backoff, INITIAL_BACKOFF);
        assert_eq!(rx.try_recv().unwrap(), Delivery::Value(None));
        assert_eq!(rx.try_recv().unwrap(), Delivery::Value(Some(json!("on"))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn backoff_is_kept_when_no_value_arrives() {
        let config = sse_server(vec!["event: keep-alive\ndata: null\n\n"], false).await;
        let client = FirebaseClient::new(&config, "ledtest");
        let (tx, mut rx) = mpsc::channel(8);
        let mut backoff = MAX_BACKOFF;

        let result = client.run_session(&tx, &mut backoff).await;

        assert!(matches!(result, Err(RemoteError::StreamClosed)));
        assert_eq!(backoff, MAX_BACKOFF);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn silent_stream_is_reported_as_error() {
        let config = sse_server(
            vec!["event: put\ndata: {\"path\":\"/\",\"data\":\"ON\"}\n\n"],
            true,
        )
        .await;
        let client = FirebaseClient::new(&config, "ledtest");
        let (tx, mut rx) = mpsc::channel(8);
        let task = tokio::spawn(async move { client.run(tx).await });

        assert_eq!(next(&mut rx).await, Delivery::Value(Some(json!("ON"))));
        match next(&mut rx).await {
            Delivery::Error(reason) => assert!(reason.contains("no data from server")),
            other => panic!("expected error delivery, got {other:?}"),
        }
        task.abort();
    }

    #[tokio::test]
    async fn cancel_is_reported_as_error() {
        let config = sse_server(
            vec![
                "event: put\ndata: {\"path\":\"/\",\"data\":\"OFF\"}\n\n",
                "event: cancel\ndata: \"Permission denied\"\n\n",
            ],
            true,
        )
        .await;
        let client = FirebaseClient::new(&config, "ledtest");
        let (tx, mut rx) = mpsc::channel(8);
        let task = tokio::spawn(async move { client.run(tx).await });

        assert_eq!(next(&mut rx).await, Delivery::Value(Some(json!("OFF"))));
        match next(&mut rx).await {
            Delivery::Error(reason) => assert!(reason.contains("Permission denied")),
            other => panic!("expected error delivery, got {other:?}"),
        }
        task.abort();
    }
}
