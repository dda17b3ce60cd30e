//! Status and heartbeat publishing over MQTT.
//!
//! Publishing never blocks the poll loop: messages are queued on the client
//! and a separate thread drives the connection. If the broker cannot be
//! reached after [`MAX_CONNECT_ATTEMPTS`] consecutive attempts the driver
//! marks the channel halted and the poll loop stops, leaving the restart to
//! the service supervisor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};
use rumqttc::{Client, Connection, Event, MqttOptions, Packet, QoS};

pub const HEARTBEAT: &str = "I'm alive!";
pub const MAX_CONNECT_ATTEMPTS: u32 = 3;

const RETRY_DELAY: Duration = Duration::from_secs(5);
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const QUEUE_CAPACITY: usize = 10;

pub trait Telemetry {
    /// Publish a short status line. Failures are logged and dropped.
    fn status(&mut self, message: &str);
    fn heartbeat(&mut self);
    /// True once the channel has given up on reconnecting.
    fn halted(&self) -> bool;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub key: String,
    pub client_id: String,
    pub status_topic: String,
    pub heartbeat_topic: String,
}

pub struct MqttTelemetry {
    client: Client,
    status_topic: String,
    heartbeat_topic: String,
    halted: Arc<AtomicBool>,
    stopping: Arc<AtomicBool>,
}

impl MqttTelemetry {
    pub fn connect(settings: &MqttSettings) -> Self {
        let mut options = MqttOptions::new(
            settings.client_id.as_str(),
            settings.host.as_str(),
            settings.port,
        );
        options.set_keep_alive(KEEP_ALIVE);
        if !settings.username.is_empty() {
            options.set_credentials(settings.username.as_str(), settings.key.as_str());
        }

        let (client, connection) = Client::new(options, QUEUE_CAPACITY);
        let halted = Arc::new(AtomicBool::new(false));
        let stopping = Arc::new(AtomicBool::new(false));
        {
            let halted = Arc::clone(&halted);
            let stopping = Arc::clone(&stopping);
            thread::spawn(move || {
                drive(connection, &halted, &stopping);
                debug!("MQTT thread exiting");
            });
        }
        info!(
            "publishing telemetry to {}:{}",
            settings.host, settings.port
        );

        MqttTelemetry {
            client,
            status_topic: settings.status_topic.clone(),
            heartbeat_topic: settings.heartbeat_topic.clone(),
            halted,
            stopping,
        }
    }

    fn publish(&mut self, topic: &str, payload: &str) {
        match self
            .client
            .try_publish(topic, QoS::AtLeastOnce, false, payload.as_bytes().to_vec())
        {
            Ok(()) => debug!("MQTT queued {:?} on {}", payload, topic),
            Err(err) => warn!("MQTT send failed: {}", err),
        }
    }
}

impl Telemetry for MqttTelemetry {
    fn status(&mut self, message: &str) {
        let topic = self.status_topic.clone();
        self.publish(&topic, message);
    }

    fn heartbeat(&mut self) {
        let topic = self.heartbeat_topic.clone();
        self.publish(&topic, HEARTBEAT);
    }

    fn halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }
}

impl Drop for MqttTelemetry {
    fn drop(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
        let _ = self.client.try_disconnect();
    }
}

fn drive(mut connection: Connection, halted: &AtomicBool, stopping: &AtomicBool) {
    let mut attempts = Attempts::default();
    for notification in connection.iter() {
        if stopping.load(Ordering::SeqCst) {
            return;
        }
        match notification {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("MQTT connected");
                attempts.connected();
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => debug!("MQTT send OK! ({})", ack.pkid),
            Ok(_) => {}
            Err(err) => {
                warn!("MQTT connection error: {}", err);
                if attempts.failed() {
                    error!(
                        "MQTT unreachable after {} attempts, halting",
                        MAX_CONNECT_ATTEMPTS
                    );
                    halted.store(true, Ordering::SeqCst);
                    return;
                }
                info!("Retrying MQTT connection in {} seconds...", RETRY_DELAY.as_secs());
                thread::sleep(RETRY_DELAY);
            }
        }
    }
}

/// Consecutive connection failures since the last successful connect.
#[derive(Debug, Default)]
struct Attempts {
    failures: u32,
}

impl Attempts {
    fn connected(&mut self) {
        self.failures = 0;
    }

    /// Record a failure, returning true when no attempts are left.
    fn failed(&mut self) -> bool {
        self.failures += 1;
        self.failures >= MAX_CONNECT_ATTEMPTS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gives_up_after_three_consecutive_failures() {
        let mut attempts = Attempts::default();
        assert!(!attempts.failed());
        assert!(!attempts.failed());
        assert!(attempts.failed());
    }

    #[test]
    fn success_resets_the_count() {
        let mut attempts = Attempts::default();
        attempts.failed();
        attempts.failed();
        attempts.connected();
        assert!(!attempts.failed());
        assert!(!attempts.failed());
        assert!(attempts.failed());
    }
}
