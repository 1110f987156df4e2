//! Bridge runner for lifecycle management.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rosc::OscMessage;
use tokio::net::UdpSocket;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use osc_bridge_common::{LoggingConfig, init_tracing};

use crate::BridgeArgs;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::heartbeat::HeartbeatBroadcaster;
use crate::packet::decode_datagram;
use crate::session::SessionRegistry;
use crate::status::BridgeStatus;
use crate::transmitter::OscTransmitter;

/// Largest datagram the receive loop accepts.
const MAX_DATAGRAM: usize = 65_536;

/// Handles decoded inbound OSC messages.
///
/// The receive loop has already touched the sender's session before
/// `handle` is called. Messages from one datagram are handled in order on
/// a task of their own, so a slow handler never stalls the receive loop.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Handle one message from `from`.
    async fn handle(&self, from: SocketAddr, message: OscMessage);

    /// Called for datagrams that are not valid OSC.
    async fn malformed(&self, from: SocketAddr, error: BridgeError) {
        tracing::debug!(client = %from, error = %error, "Dropping malformed datagram");
    }
}

/// Bridge runner that manages the lifecycle of an OSC bridge.
///
/// Handles:
/// - Logging initialization
/// - Binding the command socket (also used for replies)
/// - The session registry and heartbeat
/// - Task spawning and cooperative shutdown
/// - Offline status broadcast on Ctrl+C
///
/// # Example
///
/// ```ignore
/// use osc_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let args = BridgeArgs::parse_with_default("mybridge.json5");
///     let config = MyBridgeConfig::load(&args.config)?;
///
///     let mut runner = BridgeRunner::new_with_args("mybridge", config, Some(&args)).await?;
///     runner.serve(Arc::new(MyHandler::new(runner.transmitter())));
///     runner.start_heartbeat();
///
///     runner.run().await
/// }
/// ```
pub struct BridgeRunner<C: BridgeConfig> {
    /// Bridge name for logging and status.
    name: String,
    /// Bridge version.
    version: String,
    /// The loaded configuration.
    config: C,
    /// Command socket.
    socket: Arc<UdpSocket>,
    /// Transmitter sharing the command socket.
    transmitter: OscTransmitter,
    /// Client sessions.
    registry: Arc<SessionRegistry>,
    /// Cancelled on shutdown; parent of every monitor token.
    shutdown: CancellationToken,
    /// Spawned tasks.
    tasks: Vec<JoinHandle<()>>,
}

impl<C: BridgeConfig> BridgeRunner<C> {
    /// Create a new bridge runner.
    ///
    /// This will:
    /// 1. Initialize logging based on config
    /// 2. Bind the command socket
    /// 3. Create the transmitter and session registry
    pub async fn new(name: impl Into<String>, config: C) -> Result<Self> {
        Self::new_with_args(name, config, None).await
    }

    /// Create a new bridge runner with CLI args for log level override.
    pub async fn new_with_args(
        name: impl Into<String>,
        config: C,
        args: Option<&BridgeArgs>,
    ) -> Result<Self> {
        let name = name.into();

        // Initialize logging with optional CLI override
        let log_config = match args.and_then(|a| a.log_level.as_ref()) {
            Some(level) => LoggingConfig {
                level: level.clone(),
                ..config.logging().clone()
            },
            None => config.logging().clone(),
        };

        init_tracing(&log_config).map_err(|e| BridgeError::config(e.to_string()))?;

        Self::bind(name, config).await
    }

    /// Bind sockets and build the runner without touching global logging.
    pub async fn bind(name: impl Into<String>, config: C) -> Result<Self> {
        let name = name.into();
        let version = env!("CARGO_PKG_VERSION").to_string();

        tracing::info!(bridge = %name, version = %version, "Starting bridge");

        let addr = config.osc().bind_addr()?;
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| BridgeError::Bind { addr, source })?;
        let socket = Arc::new(socket);

        tracing::info!(addr = %socket.local_addr()?, "Listening for OSC commands");

        let transmitter = OscTransmitter::new(socket.clone(), config.device_name());
        let registry = Arc::new(SessionRegistry::new(
            config.osc().return_port,
            config.default_format(),
        ));

        Ok(Self {
            name,
            version,
            config,
            socket,
            transmitter,
            registry,
            shutdown: CancellationToken::new(),
            tasks: Vec::new(),
        })
    }

    /// Get the bridge name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the bridge version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &C {
        &self.config
    }

    /// Address the command socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Get a clone of the transmitter.
    pub fn transmitter(&self) -> OscTransmitter {
        self.transmitter.clone()
    }

    /// Get the session registry.
    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    /// Token cancelled when the bridge shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Spawn a worker task.
    ///
    /// Workers should observe [`shutdown_token`](Self::shutdown_token); any
    /// still running after shutdown are aborted.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.tasks.push(handle);
    }

    /// Start the inbound datagram loop with the given handler.
    pub fn serve<H: MessageHandler>(&mut self, handler: Arc<H>) {
        let socket = self.socket.clone();
        let registry = self.registry.clone();
        let cancel = self.shutdown.clone();
        self.spawn(receive_loop(socket, registry, handler, cancel));
    }

    /// Start the heartbeat broadcaster and session expiry sweep.
    pub fn start_heartbeat(&mut self) {
        let heartbeat = HeartbeatBroadcaster::new(
            self.registry.clone(),
            self.transmitter.clone(),
            self.config.heartbeat(),
            self.config.session(),
        );
        let cancel = self.shutdown.clone();
        self.spawn(heartbeat.run(cancel));
    }

    /// Run the bridge until Ctrl+C is received.
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            }
        })
        .await
    }

    /// Run the bridge until `stop` completes or the shutdown token is cancelled.
    ///
    /// This will:
    /// 1. Wait for the stop signal
    /// 2. Cancel the shutdown token (heartbeat, receive loop, monitors)
    /// 3. Broadcast "offline" status to every session
    /// 4. Drop all sessions
    /// 5. Abort tasks that did not exit on their own
    pub async fn run_until<F>(self, stop: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(
            bridge = %self.name,
            tasks = self.tasks.len(),
            "Bridge running. Press Ctrl+C to stop."
        );

        tokio::select! {
            _ = stop => tracing::info!(bridge = %self.name, "Received shutdown signal"),
            _ = self.shutdown.cancelled() => tracing::info!(bridge = %self.name, "Shutdown requested"),
        }

        self.shutdown.cancel();

        let targets = self.registry.clear().await;
        if !targets.is_empty() {
            let status = BridgeStatus::offline(&self.name, &self.version);
            if let Err(e) = status.broadcast(&self.transmitter, targets).await {
                tracing::warn!(error = %e, "Failed to broadcast offline status");
            }
        }

        // Wait briefly for tasks to observe cancellation
        tokio::time::sleep(Duration::from_millis(100)).await;

        for task in &self.tasks {
            if !task.is_finished() {
                task.abort();
            }
        }

        tracing::info!(bridge = %self.name, "Goodbye!");

        Ok(())
    }
}

/// Receive datagrams until cancelled, touching the sender's session and
/// handing decoded messages to `handler`.
///
/// Receive errors are logged and never end the loop.
pub async fn receive_loop<H: MessageHandler>(
    socket: Arc<UdpSocket>,
    registry: Arc<SessionRegistry>,
    handler: Arc<H>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        let (len, from) = tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(e) => {
                    tracing::error!("UDP receive error: {}", e);
                    continue;
                }
            },
        };

        registry.touch(from).await;

        let handler = handler.clone();
        match decode_datagram(&buf[..len]) {
            Ok(messages) => {
                tokio::spawn(async move {
                    for message in messages {
                        tracing::debug!(client = %from, address = %message.addr, "Received");
                        handler.handle(from, message).await;
                    }
                });
            }
            Err(e) => {
                tokio::spawn(async move { handler.malformed(from, e).await });
            }
        }
    }

    tracing::debug!("Receive loop stopped");
}
