//! MQTT adapter
//!
//! The broker connection is split in two: a driver task that owns the
//! `EventLoop` and does nothing but poll it, and an mpsc channel that hands
//! decoded envelopes to the agent's dispatch loop. Handler work therefore
//! never runs on the polling task, and a publish issued from inside a handler
//! only waits on channel capacity, never on an acknowledgement that the
//! polling task itself would have to process.
//!
//! Delivery is QoS-1 (configurable): redelivery after reconnect is expected
//! and absorbed by the idempotency keys downstream.

use mindgraph_core::{EventEnvelope, Settings};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);
const CHANNEL_CAPACITY: usize = 256;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("mqtt client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("mqtt connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),

    #[error("timed out connecting to MQTT {host}:{port}")]
    ConnectTimeout { host: String, port: u16 },

    #[error(transparent)]
    Codec(#[from] mindgraph_core::Error),
}

/// Publishing handle, cheap to clone into timers and handlers.
#[derive(Clone)]
pub struct MqttBus {
    client: AsyncClient,
    qos: QoS,
}

/// A connected bus: the publishing handle plus the delivery channel fed by
/// the driver task.
pub struct BusConnection {
    pub bus: MqttBus,
    pub events: mpsc::Receiver<(String, EventEnvelope)>,
}

impl MqttBus {
    /// Connect, subscribe, and start the event-loop driver. Waits up to 10 s
    /// for the broker acknowledgement; a broker that never answers is fatal.
    pub async fn connect(
        settings: &Settings,
        client_id: &str,
        subscriptions: &[&str],
        shutdown: CancellationToken,
    ) -> Result<BusConnection, BusError> {
        let mut options = MqttOptions::new(client_id, &settings.mqtt_host, settings.mqtt_port);
        options.set_keep_alive(Duration::from_secs(30));
        let (client, mut eventloop) = AsyncClient::new(options, 64);
        let qos = qos_level(settings.mqtt_qos);

        wait_for_connack(&mut eventloop, settings).await?;
        info!(
            host = %settings.mqtt_host,
            port = settings.mqtt_port,
            "connected to MQTT broker"
        );

        let topics: Vec<String> = subscriptions.iter().map(|t| t.to_string()).collect();
        for topic in &topics {
            client.subscribe(topic, qos).await?;
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let driver_client = client.clone();
        tokio::spawn(drive_event_loop(
            eventloop,
            driver_client,
            topics,
            qos,
            tx,
            shutdown,
        ));

        Ok(BusConnection {
            bus: MqttBus { client, qos },
            events: rx,
        })
    }

    /// Encode the envelope in canonical form and enqueue it at the
    /// configured QoS.
    pub async fn publish(&self, topic: &str, envelope: &EventEnvelope) -> Result<(), BusError> {
        let payload = envelope.to_canonical_json()?;
        self.client
            .publish(topic, self.qos, false, payload.into_bytes())
            .await?;
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<(), BusError> {
        self.client.disconnect().await?;
        Ok(())
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop, settings: &Settings) -> Result<(), BusError> {
    let deadline = tokio::time::Instant::now() + CONNECT_TIMEOUT;
    let timed_out = || BusError::ConnectTimeout {
        host: settings.mqtt_host.clone(),
        port: settings.mqtt_port,
    };
    loop {
        match tokio::time::timeout_at(deadline, eventloop.poll())
            .await
            .map_err(|_| timed_out())?
        {
            Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
            Ok(_) => {}
            Err(err) => {
                warn!("broker not reachable yet, retrying: {}", err);
                // Backoff counts against the same 10 s budget as the poll.
                tokio::time::timeout_at(deadline, tokio::time::sleep(RECONNECT_BACKOFF))
                    .await
                    .map_err(|_| timed_out())?;
            }
        }
    }
}

/// Poll the event loop forever: decode publishes onto the channel,
/// re-subscribe after reconnects, back off on transport errors.
async fn drive_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    topics: Vec<String>,
    qos: QoS,
    tx: mpsc::Sender<(String, EventEnvelope)>,
    shutdown: CancellationToken,
) {
    loop {
        let polled = tokio::select! {
            _ = shutdown.cancelled() => break,
            polled = eventloop.poll() => polled,
        };
        match polled {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                match EventEnvelope::from_slice(&publish.payload) {
                    Ok(envelope) => {
                        if tx.send((publish.topic, envelope)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        // Malformed events are dropped; QoS has already
                        // acknowledged them.
                        error!(topic = %publish.topic, "discarding malformed event: {}", err);
                    }
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("reconnected to MQTT broker, restoring subscriptions");
                for topic in &topics {
                    if let Err(err) = client.subscribe(topic, qos).await {
                        error!(topic = %topic, "failed to resubscribe: {}", err);
                    }
                }
            }
            Ok(_) => {}
            Err(err) => {
                warn!("mqtt transport error, retrying: {}", err);
                tokio::time::sleep(RECONNECT_BACKOFF).await;
            }
        }
    }
}

fn qos_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos_defaults_to_at_least_once() {
        assert_eq!(qos_level(0), QoS::AtMostOnce);
        assert_eq!(qos_level(1), QoS::AtLeastOnce);
        assert_eq!(qos_level(2), QoS::ExactlyOnce);
        assert_eq!(qos_level(9), QoS::AtLeastOnce);
    }
}
