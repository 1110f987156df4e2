//! Periodic heartbeat broadcast and session expiry sweep.

use std::sync::Arc;
use std::time::{Duration, Instant};

use osc_bridge_common::{HEARTBEAT_ADDRESS, current_timestamp_secs};
use rosc::OscType;
use tokio_util::sync::CancellationToken;

use crate::config::{HeartbeatConfig, SessionConfig};
use crate::session::SessionRegistry;
use crate::transmitter::OscTransmitter;

/// Announces liveness to every session and expires idle ones.
///
/// Heartbeat args: `[device_name, timestamp, uptime_secs, session_count]`.
/// The expiry sweep runs on every tick even when broadcasting is disabled.
pub struct HeartbeatBroadcaster {
    registry: Arc<SessionRegistry>,
    transmitter: OscTransmitter,
    interval: Duration,
    ttl: Duration,
    enabled: bool,
    started: Instant,
}

impl HeartbeatBroadcaster {
    pub fn new(
        registry: Arc<SessionRegistry>,
        transmitter: OscTransmitter,
        heartbeat: &HeartbeatConfig,
        session: &SessionConfig,
    ) -> Self {
        Self {
            registry,
            transmitter,
            interval: heartbeat.interval(),
            ttl: session.ttl(),
            enabled: heartbeat.enabled,
            started: Instant::now(),
        }
    }

    /// Run until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            ttl_secs = self.ttl.as_secs(),
            enabled = self.enabled,
            "Heartbeat started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.tick().await,
            }
        }

        tracing::debug!("Heartbeat stopped");
    }

    /// One sweep-and-broadcast round.
    pub async fn tick(&self) {
        let expired = self.registry.expire_stale(Instant::now(), self.ttl).await;
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Expired idle sessions");
        }

        if !self.enabled {
            return;
        }

        let targets = self.registry.return_addresses().await;
        if targets.is_empty() {
            return;
        }

        let args = vec![
            OscType::String(self.transmitter.addresses().device().to_string()),
            OscType::Double(current_timestamp_secs()),
            OscType::Long(self.started.elapsed().as_secs() as i64),
            OscType::Int(targets.len() as i32),
        ];
        let stats = self
            .transmitter
            .broadcast(targets, HEARTBEAT_ADDRESS, args)
            .await;
        tracing::trace!(sent = stats.success, failed = stats.failed, "Heartbeat sent");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::decode_datagram;
    use osc_bridge_common::OutputFormat;
    use tokio::net::UdpSocket;

    async fn transmitter() -> OscTransmitter {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        OscTransmitter::new(socket, "rig")
    }

    #[tokio::test]
    async fn test_tick_broadcasts_to_sessions() {
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let registry = Arc::new(SessionRegistry::new(None, OutputFormat::Osc));
        registry.touch(client.local_addr().unwrap()).await;

        let heartbeat = HeartbeatBroadcaster::new(
            registry.clone(),
            transmitter().await,
            &HeartbeatConfig::default(),
            &SessionConfig::default(),
        );
        heartbeat.tick().await;

        let mut buf = [0u8; 512];
        let (len, _) = client.recv_from(&mut buf).await.unwrap();
        let messages = decode_datagram(&buf[..len]).unwrap();
        assert_eq!(messages[0].addr, HEARTBEAT_ADDRESS);
        assert_eq!(messages[0].args[0], OscType::String("rig".to_string()));
        assert_eq!(messages[0].args[3], OscType::Int(1));
    }

    #[tokio::test]
    async fn test_tick_expires_even_when_disabled() {
        let registry = Arc::new(SessionRegistry::new(None, OutputFormat::Osc));
        registry.touch("127.0.0.1:4000".parse().unwrap()).await;

        let heartbeat = HeartbeatBroadcaster::new(
            registry.clone(),
            transmitter().await,
            &HeartbeatConfig {
                enabled: false,
                interval_secs: 0.01,
            },
            &SessionConfig { ttl_secs: 0.02 },
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        heartbeat.tick().await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let registry = Arc::new(SessionRegistry::new(None, OutputFormat::Osc));
        let heartbeat = HeartbeatBroadcaster::new(
            registry,
            transmitter().await,
            &HeartbeatConfig::default(),
            &SessionConfig::default(),
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(heartbeat.run(cancel.clone()));
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
