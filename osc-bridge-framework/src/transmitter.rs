//! OSC transmitter for client replies and pushed data.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use osc_bridge_common::AddressBuilder;
use rosc::OscType;
use tokio::net::UdpSocket;

use crate::error::{BridgeError, Result};
use crate::packet::encode_message;

/// Sends OSC messages over UDP.
///
/// Wraps a shared socket and the device address builder; cheap to clone.
/// Delivery is best-effort: a failed send is reported to the caller and
/// counted, never retried.
#[derive(Clone, Debug)]
pub struct OscTransmitter {
    socket: Arc<UdpSocket>,
    addresses: AddressBuilder,
    stats: Arc<TransmitCounters>,
}

#[derive(Debug, Default)]
struct TransmitCounters {
    sent: AtomicU64,
    failed: AtomicU64,
}

impl OscTransmitter {
    /// Create a transmitter on an already bound socket.
    pub fn new(socket: Arc<UdpSocket>, device_name: impl Into<String>) -> Self {
        Self {
            socket,
            addresses: AddressBuilder::new(device_name),
            stats: Arc::new(TransmitCounters::default()),
        }
    }

    /// Bind an ephemeral socket on the unspecified address for outbound traffic.
    pub async fn bind(device_name: impl Into<String>) -> Result<Self> {
        let addr: SocketAddr = ([0, 0, 0, 0], 0).into();
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| BridgeError::Bind { addr, source })?;
        Ok(Self::new(Arc::new(socket), device_name))
    }

    /// Device-scoped address builder.
    pub fn addresses(&self) -> &AddressBuilder {
        &self.addresses
    }

    /// Build a full reply address from a path below the device.
    pub fn build_address(&self, path: &str) -> String {
        self.addresses.build(path)
    }

    /// Send a message to an absolute address.
    pub async fn send(&self, target: SocketAddr, address: &str, args: Vec<OscType>) -> Result<()> {
        let payload = encode_message(address, args)?;
        self.send_raw(target, &payload).await
    }

    /// Send a message to a path below the device (`/{device}/{path}`).
    pub async fn send_device(
        &self,
        target: SocketAddr,
        path: &str,
        args: Vec<OscType>,
    ) -> Result<()> {
        let address = self.build_address(path);
        self.send(target, &address, args).await
    }

    /// Send a JSON-serialized value as a single string argument.
    pub async fn send_json<T: serde::Serialize>(
        &self,
        target: SocketAddr,
        path: &str,
        value: &T,
    ) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.send_device(target, path, vec![OscType::String(json)])
            .await
    }

    /// Send an encoded packet.
    pub async fn send_raw(&self, target: SocketAddr, payload: &[u8]) -> Result<()> {
        match self.socket.send_to(payload, target).await {
            Ok(_) => {
                self.stats.sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(source) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                Err(BridgeError::Send { target, source })
            }
        }
    }

    /// Send the same message to many targets.
    ///
    /// Returns per-batch statistics; individual failures are logged.
    pub async fn broadcast<I>(&self, targets: I, address: &str, args: Vec<OscType>) -> TransmitStats
    where
        I: IntoIterator<Item = SocketAddr>,
    {
        let mut stats = TransmitStats::default();

        let payload = match encode_message(address, args) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode broadcast");
                return stats;
            }
        };

        for target in targets {
            match self.send_raw(target, &payload).await {
                Ok(()) => stats.success += 1,
                Err(e) => {
                    stats.failed += 1;
                    tracing::warn!(error = %e, "Failed to deliver broadcast");
                }
            }
        }

        stats
    }

    /// Lifetime counters for this transmitter and its clones.
    pub fn totals(&self) -> TransmitStats {
        TransmitStats {
            success: self.stats.sent.load(Ordering::Relaxed) as usize,
            failed: self.stats.failed.load(Ordering::Relaxed) as usize,
        }
    }
}

/// Statistics from a batch send.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransmitStats {
    /// Number of datagrams sent.
    pub success: usize,
    /// Number of failed sends.
    pub failed: usize,
}

impl TransmitStats {
    /// Total number of attempted sends.
    pub fn total(&self) -> usize {
        self.success + self.failed
    }

    /// Success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        if self.total() == 0 {
            100.0
        } else {
            (self.success as f64 / self.total() as f64) * 100.0
        }
    }
}
