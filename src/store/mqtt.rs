//! MQTT broker as the shared retained store.
//!
//! A background task drives the rumqttc event loop and routes packets back to
//! waiting callers:
//!
//! - `get` subscribes to the topic, waits for the first PUBLISH on it (the
//!   broker delivers the retained message immediately on subscribe) and
//!   unsubscribes again.
//! - `set` publishes retained with QoS 1 and waits for the broker's PUBACK.

use super::SharedStore;
use crate::config::MqttConfig;
use crate::error::{Result, ThermostatError};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Callers waiting on the event loop.
#[derive(Default)]
struct Waiters {
    /// Pending retained reads, per topic.
    gets: Mutex<HashMap<String, Vec<oneshot::Sender<String>>>>,
    /// Publishes handed to the client but not yet assigned a packet id.
    queued_publishes: Mutex<VecDeque<oneshot::Sender<()>>>,
    /// Publishes on the wire, keyed by packet id, waiting for PUBACK.
    inflight_publishes: Mutex<HashMap<u16, oneshot::Sender<()>>>,
    connected: AtomicBool,
}

impl Waiters {
    fn deliver(&self, topic: &str, payload: String) {
        let waiters = self.gets.lock().remove(topic);
        if let Some(waiters) = waiters {
            for tx in waiters {
                let _ = tx.send(payload.clone());
            }
        } else {
            debug!("[MQTT] Unsolicited message on {}", topic);
        }
    }

    fn publish_sent(&self, pkid: u16) {
        if let Some(tx) = self.queued_publishes.lock().pop_front() {
            self.inflight_publishes.lock().insert(pkid, tx);
        }
    }

    fn publish_acked(&self, pkid: u16) {
        if let Some(tx) = self.inflight_publishes.lock().remove(&pkid) {
            let _ = tx.send(());
        }
    }

    /// Fail every pending publish; dropping the senders wakes the callers.
    fn connection_lost(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.queued_publishes.lock().clear();
        self.inflight_publishes.lock().clear();
    }
}

/// Retained store backed by an MQTT broker.
pub struct MqttStore {
    client: AsyncClient,
    waiters: Arc<Waiters>,
    publish_order: tokio::sync::Mutex<()>,
    timeout: Duration,
    event_task: JoinHandle<()>,
}

impl MqttStore {
    /// Connect to the broker and wait for the CONNACK.
    pub async fn connect(config: &MqttConfig) -> Result<Self> {
        let mut options =
            MqttOptions::new(&config.client_id, &config.broker_host, config.broker_port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_session(true);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        let (client, event_loop) = AsyncClient::new(options, 100);
        let waiters = Arc::new(Waiters::default());
        let (connected_tx, connected_rx) = oneshot::channel();

        let event_task = tokio::spawn(run_event_loop(
            event_loop,
            waiters.clone(),
            Some(connected_tx),
        ));

        info!(
            "[MQTT] Connecting to {}:{} as {}",
            config.broker_host, config.broker_port, config.client_id
        );

        match tokio::time::timeout(config.timeout(), connected_rx).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                event_task.abort();
                return Err(ThermostatError::StoreUnavailable(
                    "MQTT event loop ended before connecting".to_string(),
                ));
            }
            Err(_) => {
                event_task.abort();
                return Err(ThermostatError::StoreUnavailable(format!(
                    "no connection to {}:{} within {:?}",
                    config.broker_host,
                    config.broker_port,
                    config.timeout()
                )));
            }
        }

        Ok(Self {
            client,
            waiters,
            publish_order: tokio::sync::Mutex::new(()),
            timeout: config.timeout(),
            event_task,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.waiters.connected.load(Ordering::SeqCst)
    }

    /// Send DISCONNECT and stop the event loop.
    pub async fn disconnect(self) {
        if let Err(e) = self.client.disconnect().await {
            debug!("[MQTT] Disconnect request failed: {}", e);
        }
        // Let the event loop flush the DISCONNECT
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.event_task.abort();
    }

    fn transport_error(action: &str, topic: &str, e: rumqttc::ClientError) -> ThermostatError {
        ThermostatError::StoreUnavailable(format!("failed to {} {}: {}", action, topic, e))
    }
}

impl Drop for MqttStore {
    fn drop(&mut self) {
        self.event_task.abort();
    }
}

#[async_trait]
impl SharedStore for MqttStore {
    async fn get(&self, topic: &str) -> Result<String> {
        let (tx, rx) = oneshot::channel();
        self.waiters
            .gets
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(tx);

        if let Err(e) = self.client.subscribe(topic, QoS::AtLeastOnce).await {
            self.waiters.gets.lock().remove(topic);
            return Err(Self::transport_error("subscribe to", topic, e));
        }

        let result = tokio::time::timeout(self.timeout, rx).await;

        let no_waiters_left = {
            let mut gets = self.waiters.gets.lock();
            match gets.get_mut(topic) {
                Some(waiters) => {
                    waiters.retain(|tx| !tx.is_closed());
                    if waiters.is_empty() {
                        gets.remove(topic);
                        true
                    } else {
                        false
                    }
                }
                None => true,
            }
        };
        if no_waiters_left && let Err(e) = self.client.unsubscribe(topic).await {
            debug!("[MQTT] Failed to unsubscribe from {}: {}", topic, e);
        }

        match result {
            Ok(Ok(payload)) => {
                debug!("[MQTT] Read {} = {}", topic, payload);
                Ok(payload)
            }
            Ok(Err(_)) => Err(ThermostatError::StoreUnavailable(format!(
                "connection closed while reading {}",
                topic
            ))),
            Err(_) => Err(ThermostatError::StoreUnavailable(format!(
                "no retained value for {} within {:?}",
                topic, self.timeout
            ))),
        }
    }

    async fn set(&self, topic: &str, value: &str) -> Result<()> {
        if !self.is_connected() {
            return Err(ThermostatError::StoreUnavailable(format!(
                "not connected, cannot publish {}",
                topic
            )));
        }

        let (tx, rx) = oneshot::channel();
        {
            // Queue order must match the order publishes reach the event loop
            let _order = self.publish_order.lock().await;
            self.waiters.queued_publishes.lock().push_back(tx);
            if let Err(e) = self
                .client
                .publish(topic, QoS::AtLeastOnce, true, value.as_bytes().to_vec())
                .await
            {
                self.waiters.queued_publishes.lock().pop_back();
                return Err(Self::transport_error("publish", topic, e));
            }
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(())) => {
                debug!("[MQTT] Published {} = {}", topic, value);
                Ok(())
            }
            Ok(Err(_)) => Err(ThermostatError::StoreUnavailable(format!(
                "connection lost before {} was acknowledged",
                topic
            ))),
            Err(_) => Err(ThermostatError::StoreUnavailable(format!(
                "publish of {} not acknowledged within {:?}",
                topic, self.timeout
            ))),
        }
    }
}

/// Drive the MQTT connection and route packets to waiters.
///
/// Runs until aborted; connection errors are retried after a delay.
async fn run_event_loop(
    mut event_loop: EventLoop,
    waiters: Arc<Waiters>,
    mut connected_tx: Option<oneshot::Sender<()>>,
) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                waiters.connected.store(true, Ordering::SeqCst);
                info!("[MQTT] Connected");
                if let Some(tx) = connected_tx.take() {
                    let _ = tx.send(());
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                match String::from_utf8(publish.payload.to_vec()) {
                    Ok(payload) => waiters.deliver(&publish.topic, payload.trim().to_string()),
                    Err(e) => warn!("[MQTT] Invalid UTF-8 on {}: {}", publish.topic, e),
                }
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => waiters.publish_acked(ack.pkid),
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => waiters.publish_sent(pkid),
            Ok(_) => {}
            Err(e) => {
                error!("[MQTT] Connection error: {:?}", e);
                waiters.connection_lost();
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}
