use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, Incoming, MqttOptions, QoS};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::config::MqttConfig;
use crate::error::RemoteError;
use crate::remote::{Delivery, RemoteWriter};

/// How long to wait after SubAck for a retained value before treating the
/// topic as empty.
const RETAINED_GRACE: Duration = Duration::from_secs(2);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

pub struct MqttClient {
    client: AsyncClient,
    eventloop: EventLoop,
    topic: String,
}

impl MqttClient {
    pub fn new(config: &MqttConfig, topic: &str) -> Self {
        let mut mqttopts =
            MqttOptions::new(&config.client_id, &config.broker_host, config.broker_port);
        mqttopts.set_keep_alive(Duration::from_secs(30));

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            mqttopts.set_credentials(user, pass);
        }

        let (client, eventloop) = AsyncClient::new(mqttopts, 100);

        Self {
            client,
            eventloop,
            topic: topic.to_string(),
        }
    }

    pub fn writer(&self) -> MqttWriter {
        MqttWriter {
            client: self.client.clone(),
            topic: self.topic.clone(),
        }
    }

    /// Run the MQTT event loop. Subscribes to the LED topic on every connect
    /// and forwards retained and live values through `tx`. Returns once `tx`
    /// is closed.
    pub async fn run(mut self, tx: mpsc::Sender<Delivery>) {
        let mut state = ListenerState::new(&self.topic);

        loop {
            let reaction = tokio::select! {
                event = self.eventloop.poll() => state.on_event(event),
                _ = grace_elapsed(state.deadline()) => {
                    debug!("No retained value on {}", self.topic);
                    Reaction::Deliver(state.on_grace_elapsed())
                }
            };

            match reaction {
                Reaction::Ignore => {}
                Reaction::Subscribe => {
                    info!("Connected to MQTT broker, subscribing to {}", self.topic);
                    if let Err(e) = self.client.subscribe(&self.topic, QoS::AtLeastOnce).await {
                        error!("Failed to subscribe to {}: {}", self.topic, e);
                    }
                }
                Reaction::Deliver(delivery) => {
                    if tx.send(delivery).await.is_err() {
                        info!("Delivery channel closed, stopping MQTT listener");
                        return;
                    }
                }
                Reaction::Reconnect(delivery) => {
                    if tx.send(delivery).await.is_err() {
                        return;
                    }
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }
}

/// What the listener loop does with one event-loop result.
#[derive(Debug, PartialEq)]
enum Reaction {
    Ignore,
    Subscribe,
    Deliver(Delivery),
    /// Report the failure, then pause before polling again.
    Reconnect(Delivery),
}

/// Tracks whether the current subscription has produced a value yet, and
/// when to give up waiting for a retained one.
#[derive(Debug)]
struct ListenerState {
    topic: String,
    retained_deadline: Option<Instant>,
    seen_value: bool,
}

impl ListenerState {
    fn new(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            retained_deadline: None,
            seen_value: false,
        }
    }

    fn deadline(&self) -> Option<Instant> {
        self.retained_deadline
    }

    fn on_event(&mut self, event: Result<Event, ConnectionError>) -> Reaction {
        match event {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                self.seen_value = false;
                self.retained_deadline = None;
                Reaction::Subscribe
            }
            Ok(Event::Incoming(Incoming::SubAck(_))) => {
                if !self.seen_value {
                    self.retained_deadline = Some(Instant::now() + RETAINED_GRACE);
                }
                Reaction::Ignore
            }
            Ok(Event::Incoming(Incoming::Publish(publish))) if publish.topic == self.topic => {
                self.seen_value = true;
                self.retained_deadline = None;
                Reaction::Deliver(Delivery::Value(payload_value(&publish.payload)))
            }
            Ok(_) => Reaction::Ignore,
            Err(e) => {
                error!("MQTT connection error: {}. Reconnecting...", e);
                self.retained_deadline = None;
                Reaction::Reconnect(Delivery::Error(e.to_string()))
            }
        }
    }

    /// Nothing retained arrived in time: the key is absent.
    fn on_grace_elapsed(&mut self) -> Delivery {
        self.retained_deadline = None;
        self.seen_value = true;
        Delivery::Value(None)
    }
}

/// Completes at `deadline`, or never when there is none.
async fn grace_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// An empty retained payload is how MQTT expresses a deleted value.
fn payload_value(payload: &[u8]) -> Option<serde_json::Value> {
    if payload.is_empty() {
        return None;
    }
    Some(serde_json::Value::String(
        String::from_utf8_lossy(payload).trim().to_string(),
    ))
}

/// Publishes the LED value as a retained message so new subscribers (the
/// device included) see it immediately.
#[derive(Clone)]
pub struct MqttWriter {
    client: AsyncClient,
    topic: String,
}

#[async_trait]
impl RemoteWriter for MqttWriter {
    async fn set(&self, value: &str) -> Result<(), RemoteError> {
        debug!("Publishing {}: {}", self.topic, value);
        self.client
            .publish(&self.topic, QoS::AtLeastOnce, true, value.as_bytes().to_vec())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::{ConnAck, ConnectReturnCode, Publish, SubAck, SubscribeReasonCode};
    use serde_json::json;

    fn connack() -> Result<Event, ConnectionError> {
        Ok(Event::Incoming(Incoming::ConnAck(ConnAck::new(
            ConnectReturnCode::Success,
            false,
        ))))
    }

    fn suback() -> Result<Event, ConnectionError> {
        Ok(Event::Incoming(Incoming::SubAck(SubAck::new(
            1,
            vec![SubscribeReasonCode::Success(QoS::AtLeastOnce)],
        ))))
    }

    fn publish(topic: &str, payload: &str) -> Result<Event, ConnectionError> {
        Ok(Event::Incoming(Incoming::Publish(Publish::new(
            topic,
            QoS::AtLeastOnce,
            payload,
        ))))
    }

    fn refused() -> Result<Event, ConnectionError> {
        Err(ConnectionError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        )))
    }

    #[test]
    fn connack_subscribes() {
        let mut state = ListenerState::new("ledtest");
        assert_eq!(state.on_event(connack()), Reaction::Subscribe);
        assert_eq!(state.deadline(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_topic_is_reported_absent_after_grace() {
        let mut state = ListenerState::new("ledtest");
        state.on_event(connack());
        let start = Instant::now();
        assert_eq!(state.on_event(suback()), Reaction::Ignore);
        assert_eq!(state.deadline(), Some(start + RETAINED_GRACE));

        tokio::select! {
            biased;
            _ = grace_elapsed(state.deadline()) => panic!("grace ended early"),
            _ = tokio::time::sleep(RETAINED_GRACE - Duration::from_millis(1)) => {}
        }
        grace_elapsed(state.deadline()).await;
        assert!(Instant::now() >= start + RETAINED_GRACE);

        assert_eq!(state.on_grace_elapsed(), Delivery::Value(None));
        assert_eq!(state.deadline(), None);

        // A second SubAck on the same connection does not re-arm the timer.
        state.on_event(suback());
        assert_eq!(state.deadline(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn retained_value_cancels_grace() {
        let mut state = ListenerState::new("ledtest");
        state.on_event(connack());
        state.on_event(suback());

        assert_eq!(state.on_event(publish("other/led", "ON")), Reaction::Ignore);
        assert!(state.deadline().is_some());

        assert_eq!(
            state.on_event(publish("ledtest", "ON")),
            Reaction::Deliver(Delivery::Value(Some(json!("ON"))))
        );
        assert_eq!(state.deadline(), None);
        assert_eq!(
            state.on_event(publish("ledtest", "")),
            Reaction::Deliver(Delivery::Value(None))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn connection_error_reports_and_rearms_on_reconnect() {
        let mut state = ListenerState::new("ledtest");
        state.on_event(connack());
        state.on_event(suback());
        state.on_event(publish("ledtest", "OFF"));

        match state.on_event(refused()) {
            Reaction::Reconnect(Delivery::Error(reason)) => {
                assert!(reason.contains("connection refused"))
            }
            other => panic!("expected reconnect, got {other:?}"),
        }
        assert_eq!(state.deadline(), None);

        // A fresh session waits for the retained value again.
        assert_eq!(state.on_event(connack()), Reaction::Subscribe);
        state.on_event(suback());
        assert!(state.deadline().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn no_deadline_never_elapses() {
        let waited = tokio::time::timeout(Duration::from_secs(3600), grace_elapsed(None)).await;
        assert!(waited.is_err());
    }

    #[test]
    fn empty_payload_is_absent() {
        assert_eq!(payload_value(b""), None);
    }

    #[test]
    fn payload_is_delivered_as_string() {
        assert_eq!(payload_value(b"on\n"), Some(json!("on")));
        assert_eq!(payload_value(b"OFF"), Some(json!("OFF")));
    }

    #[tokio::test]
    async fn writer_queues_retained_publish() {
        let config = MqttConfig {
            broker_host: "127.0.0.1".into(),
            broker_port: 1883,
            username: None,
            password: None,
            client_id: "led-dashboard-test".into(),
        };
        let client = MqttClient::new(&config, "ledtest");
        let writer = client.writer();

        // The request is queued on the client channel; nothing is sent until
        // the event loop is polled.
        writer.set("ON").await.unwrap();
    }
}
