//! Cloud Synchronization Module
//!
//! Fire-and-forget publishing of driver events to the cloud bridge:
//! - Non-blocking sends with a bounded outbound queue
//! - Drop-on-full with sent/failed accounting
//! - Transport runs on its own thread and tolerates a missing broker
//! - Bounded linger on shutdown

use metrics::counter;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, QoS};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Publisher error types
#[derive(Error, Debug)]
pub enum PublisherError {
    #[error("Invalid endpoint: {0}")]
    Endpoint(String),

    #[error("Transport runtime failed: {0}")]
    Runtime(String),
}

/// Publisher configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Broker endpoint, `host:port` with an optional `tcp://` or `mqtt://` scheme
    pub endpoint: String,
    /// Topic events are published on
    pub topic: String,
    /// MQTT client identifier
    pub client_id: String,
    /// Outbound queue capacity; sends beyond it are dropped
    pub queue_capacity: usize,
    /// Maximum time shutdown waits for the transport to flush
    pub linger_ms: u64,
    /// MQTT keep-alive interval
    pub keep_alive_secs: u64,
    /// Delay before reconnecting after a connection error
    pub reconnect_backoff_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            endpoint: "localhost:1883".to_string(),
            topic: "drowsiness/events".to_string(),
            client_id: "drowsiness-monitor".to_string(),
            queue_capacity: 1000,
            linger_ms: 1000,
            keep_alive_secs: 30,
            reconnect_backoff_ms: 1000,
        }
    }
}

impl PublisherConfig {
    /// Split the endpoint into broker host and port
    pub fn broker_address(&self) -> Result<(String, u16), PublisherError> {
        let trimmed = self
            .endpoint
            .trim()
            .trim_start_matches("tcp://")
            .trim_start_matches("mqtt://");

        let (host, port) = trimmed
            .rsplit_once(':')
            .ok_or_else(|| PublisherError::Endpoint(format!("missing port in '{}'", self.endpoint)))?;

        if host.is_empty() || host == "*" {
            return Err(PublisherError::Endpoint(format!(
                "'{}' does not name a broker host",
                self.endpoint
            )));
        }

        let port = port
            .parse::<u16>()
            .map_err(|e| PublisherError::Endpoint(format!("bad port in '{}': {}", self.endpoint, e)))?;

        Ok((host.to_string(), port))
    }
}

/// Cumulative publish counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PublisherStats {
    pub sent: u64,
    pub failed: u64,
}

/// One-way event sink. Implementations must never block the caller.
pub trait EventPublisher: Send + Sync {
    /// Queue one serialized event; `false` if it was dropped
    fn publish_message(&self, payload: &str) -> bool;

    fn stats(&self) -> PublisherStats;

    /// Release the transport. Safe to call more than once.
    fn shutdown(&self);
}

struct Transport {
    handle: JoinHandle<()>,
    done: Receiver<()>,
}

/// MQTT event publisher
pub struct MessagePublisher {
    config: PublisherConfig,
    client: AsyncClient,
    stopping: Arc<AtomicBool>,
    sent: AtomicU64,
    failed: AtomicU64,
    transport: Mutex<Option<Transport>>,
}

impl MessagePublisher {
    /// Create the client and start the transport thread.
    ///
    /// Succeeds without a reachable broker; connection errors are retried in
    /// the background while sends queue up to `queue_capacity`.
    pub fn bind(config: PublisherConfig) -> Result<Self, PublisherError> {
        let (host, port) = config.broker_address()?;

        let mut options = MqttOptions::new(config.client_id.clone(), host.clone(), port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));

        let (client, eventloop) = AsyncClient::new(options, config.queue_capacity.max(1));

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| PublisherError::Runtime(e.to_string()))?;

        let stopping = Arc::new(AtomicBool::new(false));
        let (done_tx, done) = mpsc::sync_channel(1);
        let backoff = Duration::from_millis(config.reconnect_backoff_ms);
        let loop_stopping = Arc::clone(&stopping);

        let handle = std::thread::Builder::new()
            .name("mqtt-transport".to_string())
            .spawn(move || {
                runtime.block_on(drive(eventloop, loop_stopping, backoff));
                let _ = done_tx.send(());
            })
            .map_err(|e| PublisherError::Runtime(e.to_string()))?;

        info!("Message publisher started for {}:{} on topic '{}'", host, port, config.topic);

        Ok(Self {
            config,
            client,
            stopping,
            sent: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            transport: Mutex::new(Some(Transport { handle, done })),
        })
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// Whether the publisher still accepts messages
    pub fn is_ready(&self) -> bool {
        !self.stopping.load(Ordering::Acquire)
    }

    fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        counter!("publisher_messages_failed").increment(1);
    }
}

impl EventPublisher for MessagePublisher {
    fn publish_message(&self, payload: &str) -> bool {
        if self.stopping.load(Ordering::Acquire) {
            self.record_failure();
            return false;
        }

        match self.client.try_publish(
            self.config.topic.as_str(),
            QoS::AtMostOnce,
            false,
            payload.as_bytes().to_vec(),
        ) {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                counter!("publisher_messages_sent").increment(1);
                true
            }
            Err(e) => {
                self.record_failure();
                warn!("Publish dropped, outbound queue unavailable: {}", e);
                false
            }
        }
    }

    fn stats(&self) -> PublisherStats {
        PublisherStats {
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    fn shutdown(&self) {
        let transport = match self.transport.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(transport) = transport else {
            return;
        };

        self.stopping.store(true, Ordering::Release);
        if let Err(e) = self.client.try_disconnect() {
            debug!("Disconnect request not queued: {}", e);
        }

        let linger = Duration::from_millis(self.config.linger_ms);
        match transport.done.recv_timeout(linger) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if transport.handle.join().is_err() {
                    error!("MQTT transport thread panicked");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("MQTT transport did not stop within {:?}, detaching", linger);
            }
        }

        let stats = self.stats();
        info!(
            "Message publisher shut down. Sent: {}, Failed: {}",
            stats.sent, stats.failed
        );
    }
}

impl Drop for MessagePublisher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Poll the MQTT event loop until a disconnect goes out or shutdown is requested
async fn drive(mut eventloop: EventLoop, stopping: Arc<AtomicBool>, backoff: Duration) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT disconnect sent");
                break;
            }
            Ok(Event::Incoming(incoming)) => {
                debug!("MQTT incoming: {:?}", incoming);
            }
            Ok(_) => {}
            Err(e) => {
                if stopping.load(Ordering::Acquire) {
                    break;
                }
                error!("MQTT error: {}", e);
                tokio::time::sleep(backoff).await;
                if stopping.load(Ordering::Acquire) {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn unreachable_config(queue_capacity: usize) -> PublisherConfig {
        PublisherConfig {
            // Port 1 on loopback: connection refused, no broker
            endpoint: "127.0.0.1:1".to_string(),
            queue_capacity,
            linger_ms: 300,
            reconnect_backoff_ms: 50,
            ..Default::default()
        }
    }

    #[test]
    fn test_endpoint_parsing() {
        let parse = |endpoint: &str| {
            PublisherConfig {
                endpoint: endpoint.to_string(),
                ..Default::default()
            }
            .broker_address()
        };

        assert_eq!(parse("localhost:1883").unwrap(), ("localhost".to_string(), 1883));
        assert_eq!(parse("tcp://10.0.0.2:5555").unwrap(), ("10.0.0.2".to_string(), 5555));
        assert_eq!(parse("mqtt://broker:1884").unwrap(), ("broker".to_string(), 1884));
        assert!(matches!(parse("tcp://*:5555"), Err(PublisherError::Endpoint(_))));
        assert!(matches!(parse("localhost"), Err(PublisherError::Endpoint(_))));
        assert!(matches!(parse("localhost:99999"), Err(PublisherError::Endpoint(_))));
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let publisher = MessagePublisher::bind(unreachable_config(2)).unwrap();

        let started = Instant::now();
        let accepted = (0..10)
            .filter(|i| publisher.publish_message(&format!("{{\"n\":{}}}", i)))
            .count() as u64;
        assert!(started.elapsed() < Duration::from_secs(1));

        let stats = publisher.stats();
        assert_eq!(stats.sent, accepted);
        assert_eq!(stats.sent + stats.failed, 10);
        assert!(stats.failed >= 1);

        publisher.shutdown();
    }

    #[test]
    fn test_shutdown_is_bounded_and_idempotent() {
        let publisher = MessagePublisher::bind(unreachable_config(10)).unwrap();
        assert!(publisher.is_ready());

        let started = Instant::now();
        publisher.shutdown();
        publisher.shutdown();
        assert!(started.elapsed() < Duration::from_secs(2));

        assert!(!publisher.is_ready());
        assert!(!publisher.publish_message("{}"));
        assert_eq!(publisher.stats().failed, 1);
    }

    #[test]
    fn test_bad_endpoint_fails_bind() {
        let config = PublisherConfig {
            endpoint: "nowhere".to_string(),
            ..Default::default()
        };
        assert!(MessagePublisher::bind(config).is_err());
    }

    #[test]
    fn test_config_defaults_from_partial_json() {
        let config: PublisherConfig =
            serde_json::from_str(r#"{"endpoint": "broker:1883"}"#).unwrap();
        assert_eq!(config.topic, "drowsiness/events");
        assert_eq!(config.queue_capacity, 1000);
    }
}
