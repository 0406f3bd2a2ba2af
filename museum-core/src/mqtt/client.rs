//! Broker session: connect-with-retry, subscribe set, publish with topic
//! contract validation, and a periodic reconnect check.

use crate::mqtt::feedback_tracker::FeedbackTracker;
use crate::mqtt::topic_contract::{self, Payload};
use crate::{log_critical, log_debug, log_error, log_info, log_warn};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct MqttSettings {
    pub broker_host: String,
    pub broker_port: u16,
    pub room_id: String,
    pub retry_attempts: u32,
    pub retry_sleep: Duration,
    pub connect_timeout: Duration,
    pub check_interval: Duration,
}

/// An incoming message, already decoded as UTF-8, paired with its retained
/// flag since some routing decisions (device registry) depend on it.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub topic: String,
    pub payload: String,
    pub retained: bool,
}

pub struct MqttClient {
    client: AsyncClient,
    settings: MqttSettings,
    connected: AtomicBool,
    feedback_tracker: Arc<FeedbackTracker>,
}

impl MqttClient {
    /// Builds the client and its background event-loop task. The returned
    /// receiver yields every decoded incoming message; the caller (the
    /// Message Router) owns demuxing it further.
    pub fn new(
        settings: MqttSettings,
        feedback_tracker: Arc<FeedbackTracker>,
    ) -> (Arc<Self>, tokio::sync::mpsc::UnboundedReceiver<IncomingMessage>) {
        let client_id = format!("{}_controller", settings.room_id);
        let mut options = MqttOptions::new(client_id, settings.broker_host.clone(), settings.broker_port);
        options.set_keep_alive(Duration::from_secs(30));

        let (client, mut event_loop) = AsyncClient::new(options, 64);
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        let this = Arc::new(MqttClient {
            client,
            settings,
            connected: AtomicBool::new(false),
            feedback_tracker,
        });

        let driver = this.clone();
        tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        if ack.code == rumqttc::ConnectReturnCode::Success {
                            let was_connected = driver.connected.swap(true, Ordering::SeqCst);
                            log_info!(
                                "Connected to MQTT broker at {}:{}",
                                driver.settings.broker_host,
                                driver.settings.broker_port
                            );
                            driver.resubscribe().await;
                            if !was_connected {
                                log_info!("MQTT connection restored");
                            }
                        } else {
                            driver.connected.store(false, Ordering::SeqCst);
                            log_error!("Failed to connect to MQTT broker: {:?}", ack.code);
                        }
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        let was_connected = driver.connected.swap(false, Ordering::SeqCst);
                        if was_connected {
                            log_info!("Disconnected from MQTT broker");
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let payload = String::from_utf8_lossy(&publish.payload).trim().to_string();
                        let _ = tx.send(IncomingMessage {
                            topic: publish.topic,
                            payload,
                            retained: publish.retain,
                        });
                    }
                    Ok(_) => {}
                    Err(e) => {
                        driver.connected.store(false, Ordering::SeqCst);
                        log_warn!("MQTT event loop error: {e}");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        (this, rx)
    }

    async fn resubscribe(&self) {
        for topic in topic_contract::room_subscriptions(&self.settings.room_id) {
            match self.client.subscribe(&topic, QoS::AtMostOnce).await {
                Ok(_) => log_info!("Subscribed to topic: {topic}"),
                Err(e) => log_error!("Failed to subscribe to {topic}: {e}"),
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Publishes a string payload after validating it against the topic
    /// contract, and arms feedback tracking on success.
    pub async fn publish(&self, topic: &str, message: &str) -> bool {
        if !self.is_connected() {
            log_warn!("Not connected to MQTT broker");
            return false;
        }
        if let Err(e) = topic_contract::validate_publish(topic, &Payload::Text(message)) {
            log_error!("Refusing to publish invalid message: {e}");
            return false;
        }
        match self
            .client
            .publish(topic, QoS::AtMostOnce, false, message.as_bytes())
            .await
        {
            Ok(()) => {
                log_debug!("Publishing to {topic}: {message}");
                self.feedback_tracker.track_published(topic);
                true
            }
            Err(e) => {
                log_error!("Failed to publish to {topic}: {e}");
                false
            }
        }
    }

    /// Attempts `retry_attempts` connect cycles, sleeping `retry_sleep`
    /// between failures, each bounded by `connect_timeout`.
    pub async fn connect_with_retry(&self, shutdown: &AtomicBool) -> bool {
        for attempt in 1..=self.settings.retry_attempts {
            if shutdown.load(Ordering::SeqCst) {
                return false;
            }
            log_info!("MQTT connection attempt {attempt}/{}", self.settings.retry_attempts);

            let waited = tokio::time::timeout(self.settings.connect_timeout, async {
                while !self.is_connected() {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            })
            .await;

            if waited.is_ok() {
                return true;
            }

            if attempt < self.settings.retry_attempts {
                log_warn!(
                    "Connection failed, retrying in {}s...",
                    self.settings.retry_sleep.as_secs_f64()
                );
                tokio::time::sleep(self.settings.retry_sleep).await;
            }
        }
        false
    }

    pub async fn establish_initial_connection(&self, shutdown: &AtomicBool) -> bool {
        if !self.connect_with_retry(shutdown).await {
            log_critical!("CRITICAL: Unable to establish MQTT connection");
            return false;
        }
        true
    }

    pub async fn check_and_reconnect(&self, shutdown: &AtomicBool) -> bool {
        if self.is_connected() {
            return true;
        }
        log_warn!("MQTT connection lost, attempting to reconnect...");
        if self.connect_with_retry(shutdown).await {
            log_info!("MQTT connection restored");
            true
        } else {
            log_error!("Failed to restore MQTT connection");
            false
        }
    }

    pub fn check_interval(&self) -> Duration {
        self.settings.check_interval
    }
}
