//! Routes parsed commands to the encoder, GPIO and monitor scheduler.
//!
//! Every message gets exactly one reply: a success payload on the
//! command's reply address or a structured error on `/{device}/error`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use osc_bridge_common::{ErrorKind, ErrorReport, OutputFormat};
use osc_bridge_framework::{
    BridgeError, BridgeStatus, MessageHandler, OscMessage, OscTransmitter, STATUS_PATH,
    SessionRegistry,
};
use rosc::OscType;
use tracing::{debug, warn};

use crate::command::{Command, CommandDefaults, GpioOp};
use crate::error::{CommandError, InvalidCommand};
use crate::gpio::{GpioController, PinState};
use crate::monitor::MonitorScheduler;
use crate::poller::EncoderPoller;

/// Name reported in status documents.
pub const BRIDGE_NAME: &str = "encoder";

/// A success reply: path below the device plus arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub path: &'static str,
    pub args: Vec<OscType>,
}

impl Reply {
    fn new(path: &'static str, args: Vec<OscType>) -> Self {
        Self { path, args }
    }

    fn success(path: &'static str, mut args: Vec<OscType>) -> Self {
        args.insert(0, OscType::String("success".to_string()));
        Self { path, args }
    }
}

fn string(value: impl Into<String>) -> OscType {
    OscType::String(value.into())
}

/// Handles inbound messages for the encoder bridge.
pub struct CommandDispatcher {
    device_name: String,
    version: String,
    registry: Arc<SessionRegistry>,
    transmitter: OscTransmitter,
    poller: Arc<EncoderPoller>,
    monitors: MonitorScheduler,
    gpio: GpioController,
    defaults: CommandDefaults,
    started: Instant,
}

impl CommandDispatcher {
    pub fn new(
        device_name: impl Into<String>,
        registry: Arc<SessionRegistry>,
        transmitter: OscTransmitter,
        poller: Arc<EncoderPoller>,
        monitors: MonitorScheduler,
        gpio: GpioController,
        defaults: CommandDefaults,
    ) -> Self {
        Self {
            device_name: device_name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            registry,
            transmitter,
            poller,
            monitors,
            gpio,
            defaults,
            started: Instant::now(),
        }
    }

    /// Parse and run one message.
    pub async fn dispatch(&self, from: SocketAddr, message: &OscMessage) -> Result<Reply, CommandError> {
        let command = Command::parse(&message.addr, &message.args, &self.device_name, &self.defaults)?;
        debug!(client = %from, command = ?command, "Dispatching");
        self.execute(from, command).await
    }

    async fn execute(&self, from: SocketAddr, command: Command) -> Result<Reply, CommandError> {
        match command {
            Command::WhoAmI => Ok(Reply::new(
                "whoami",
                vec![
                    string(&self.device_name),
                    string(&self.version),
                    string(from.to_string()),
                    string(self.poller.link().state().as_str()),
                ],
            )),

            Command::SetZero { reset_laps } => {
                let sample = self.poller.set_zero(reset_laps).await?;
                Ok(Reply::success(
                    "encoder/zero_set",
                    vec![OscType::Float(sample.angle as f32), OscType::Int(sample.laps_i32())],
                ))
            }

            Command::StartMonitor { interval, format } => {
                let format = match format {
                    Some(format) => {
                        self.registry.set_format(from, format).await;
                        format
                    }
                    None => self.session_format(from).await,
                };
                let started = self.monitors.start(from, interval, format).await;
                Ok(Reply::success(
                    "encoder/start_monitor",
                    vec![
                        string(started.info.id.to_string()),
                        OscType::Float(interval.as_secs_f32()),
                        string(format.as_str()),
                    ],
                ))
            }

            Command::StopMonitor { task_id } => {
                let stopped = self
                    .monitors
                    .stop(from, task_id)
                    .await
                    .map_err(|e| InvalidCommand::new("task_id", e.to_string()))?;
                let id = stopped.map_or_else(|| "none".to_string(), |info| info.id.to_string());
                Ok(Reply::success("encoder/stop_monitor", vec![string(id)]))
            }

            Command::ReadPosition => {
                let sample = self.poller.poll().await?;
                Ok(Reply::success(
                    "encoder/position",
                    vec![
                        OscType::Float(sample.angle as f32),
                        OscType::Int(i32::from(sample.raw_angle)),
                        OscType::Int(sample.laps_i32()),
                        OscType::Int(sample.direction.as_i32()),
                    ],
                ))
            }

            Command::ReadSpeed => {
                let sample = self.poller.poll().await?;
                Ok(Reply::success(
                    "encoder/speed",
                    vec![
                        OscType::Float(sample.rpm as f32),
                        OscType::Int(i32::from(sample.raw_speed)),
                        OscType::Int(sample.direction.as_i32()),
                    ],
                ))
            }

            Command::Connect => {
                let state = self.poller.link().force_reconnect().await?;
                Ok(Reply::success("encoder/connection", vec![string(state.as_str())]))
            }

            Command::ListMonitors => {
                let monitors = self.monitors.list().await;
                let mut args = vec![OscType::Int(monitors.len() as i32)];
                args.extend(monitors.into_iter().map(|(session, info)| {
                    string(format!(
                        "{}={}@{}/{}",
                        session,
                        info.id,
                        info.interval.as_secs_f64(),
                        info.format.as_str()
                    ))
                }));
                Ok(Reply::new("encoder/monitors", args))
            }

            Command::Status => {
                let status = self.status().await;
                let json = serde_json::to_string(&status).map_err(|e| CommandError::internal(e.to_string()))?;
                Ok(Reply::new(STATUS_PATH, vec![string(json)]))
            }

            Command::Gpio(op) => self.run_gpio(op).await,
        }
    }

    async fn run_gpio(&self, op: GpioOp) -> Result<Reply, CommandError> {
        let state = match op {
            GpioOp::High(pin) => self.gpio.set(pin, true).await?,
            GpioOp::Low(pin) => self.gpio.set(pin, false).await?,
            GpioOp::Toggle(pin) => self.gpio.toggle(pin).await?,
            GpioOp::Pulse { pin, duration } => self.gpio.pulse(pin, duration).await?,
            GpioOp::Read => {
                let high = self.gpio.read_input().await?;
                return Ok(Reply::success(
                    "gpio/input",
                    vec![
                        OscType::Int(self.gpio.input_pin() as i32),
                        OscType::Int(i32::from(high)),
                    ],
                ));
            }
        };
        Ok(gpio_reply(op, state))
    }

    async fn session_format(&self, from: SocketAddr) -> OutputFormat {
        match self.registry.get(from).await {
            Some(session) => session.format,
            None => OutputFormat::default(),
        }
    }

    /// Running status with link health, sessions and uptime.
    pub async fn status(&self) -> BridgeStatus {
        let link = self.poller.link().snapshot().await;
        let monitors = self.monitors.list().await.len();
        BridgeStatus::running(BRIDGE_NAME, &self.version).with_metadata(serde_json::json!({
            "device_name": self.device_name,
            "link": link,
            "sessions": self.registry.len().await,
            "monitors": monitors,
            "uptime_secs": self.started.elapsed().as_secs(),
        }))
    }

    async fn reply_target(&self, from: SocketAddr) -> SocketAddr {
        self.registry
            .get(from)
            .await
            .map_or(from, |session| session.return_addr)
    }

    async fn send_error(&self, target: SocketAddr, report: ErrorReport) {
        let args = vec![
            string(report.kind.as_str()),
            string(report.field.unwrap_or_default()),
            string(report.message),
            string(report.command),
        ];
        let address = self.transmitter.addresses().error();
        if let Err(e) = self.transmitter.send(target, &address, args).await {
            warn!(error = %e, "Failed to send error reply");
        }
    }
}

fn gpio_reply(op: GpioOp, state: PinState) -> Reply {
    Reply::success(
        "gpio/response",
        vec![
            string(op.name()),
            OscType::Int(state.index as i32),
            OscType::Int(state.gpio as i32),
            OscType::Int(i32::from(state.high)),
        ],
    )
}

#[async_trait]
impl MessageHandler for CommandDispatcher {
    async fn handle(&self, from: SocketAddr, message: OscMessage) {
        let result = self.dispatch(from, &message).await;
        let target = self.reply_target(from).await;

        match result {
            Ok(reply) => {
                if let Err(e) = self.transmitter.send_device(target, reply.path, reply.args).await {
                    warn!(client = %from, error = %e, "Failed to send reply");
                }
            }
            Err(e) => {
                let kind = e.kind();
                match kind {
                    ErrorKind::InvalidCommand => {
                        debug!(client = %from, address = %message.addr, error = %e, "Rejected command")
                    }
                    _ => warn!(client = %from, address = %message.addr, error = %e, "Command failed"),
                }
                let mut report = ErrorReport::new(kind, e.to_string(), &message.addr);
                if let Some(field) = e.field() {
                    report = report.with_field(field);
                }
                self.send_error(target, report).await;
            }
        }
    }

    async fn malformed(&self, from: SocketAddr, error: BridgeError) {
        debug!(client = %from, error = %error, "Malformed datagram");
        let report = ErrorReport::new(
            ErrorKind::InvalidCommand,
            error.to_string(),
            "",
        )
        .with_field("packet");
        let target = self.reply_target(from).await;
        self.send_error(target, report).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EncoderConfig, GpioConfig};
    use crate::encoder::EncoderModel;
    use crate::gpio::SimulatedIo;
    use crate::monitor::MonitorSettings;
    use crate::registers;
    use crate::simulated::SimulatedEncoder;
    use crate::supervisor::{ConnectionSupervisor, SupervisorPolicy};
    use std::time::Duration;
    use tokio::net::UdpSocket;
    use tokio_util::sync::CancellationToken;

    async fn dispatcher(sim: &SimulatedEncoder) -> (CommandDispatcher, SocketAddr) {
        let policy = SupervisorPolicy {
            max_retries: 1,
            retry_interval: Duration::from_millis(5),
            background_retry_interval: Duration::from_secs(60),
            call_attempts: 1,
            call_backoff: Duration::from_millis(1),
            call_timeout: Duration::from_millis(50),
            degrade_after: 2,
            disconnect_after: 4,
            probe_interval: Duration::from_secs(30),
            probe_register: registers::DEVICE_ADDRESS,
        };
        let link = Arc::new(ConnectionSupervisor::new(sim.clone(), policy));
        let poller = Arc::new(EncoderPoller::new(link, EncoderModel::new(&EncoderConfig::default())));
        let registry = Arc::new(SessionRegistry::new(None, OutputFormat::Osc));
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let transmitter = OscTransmitter::new(socket, "rig");
        let monitors = MonitorScheduler::new(
            registry.clone(),
            poller.clone(),
            transmitter.clone(),
            MonitorSettings {
                device_name: "rig".into(),
                slave_address: 1,
                degraded_notice: Duration::from_secs(5),
                max_consecutive_errors: 3,
            },
            CancellationToken::new(),
        );
        let gpio = GpioController::new(Arc::new(SimulatedIo::new()), &GpioConfig::default());
        let defaults = CommandDefaults {
            monitor_interval: Duration::from_millis(500),
            pulse: Duration::from_millis(50),
            output_pins: gpio.output_count(),
        };
        let client: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        registry.touch(client).await;
        (
            CommandDispatcher::new("rig", registry, transmitter, poller, monitors, gpio, defaults),
            client,
        )
    }

    fn message(addr: &str, args: Vec<OscType>) -> OscMessage {
        OscMessage {
            addr: addr.to_string(),
            args,
        }
    }

    #[tokio::test]
    async fn test_read_position_reply() {
        let sim = SimulatedEncoder::new(4096, 100, 1);
        sim.set_position(2048).await;
        let (dispatcher, client) = dispatcher(&sim).await;

        let reply = dispatcher
            .dispatch(client, &message("/encoder/read_position", vec![]))
            .await
            .unwrap();
        assert_eq!(reply.path, "encoder/position");
        assert_eq!(reply.args[0], OscType::String("success".into()));
        assert_eq!(reply.args[1], OscType::Float(180.0));
        assert_eq!(reply.args[2], OscType::Int(2048));
    }

    #[tokio::test]
    async fn test_set_zero_reply() {
        let sim = SimulatedEncoder::new(4096, 100, 1);
        sim.set_position(300).await;
        let (dispatcher, client) = dispatcher(&sim).await;

        let reply = dispatcher
            .dispatch(client, &message("/rig/encoder/set_zero", vec![OscType::Int(1)]))
            .await
            .unwrap();
        assert_eq!(reply.path, "encoder/zero_set");
        assert_eq!(reply.args[1], OscType::Float(0.0));
        assert_eq!(reply.args[2], OscType::Int(0));
    }

    #[tokio::test]
    async fn test_stop_unknown_task_is_invalid() {
        let sim = SimulatedEncoder::new(4096, 100, 1);
        let (dispatcher, client) = dispatcher(&sim).await;

        dispatcher
            .dispatch(client, &message("/encoder/start_monitor", vec![OscType::Float(1.0)]))
            .await
            .unwrap();
        let other = uuid::Uuid::new_v4().to_string();
        let err = dispatcher
            .dispatch(client, &message("/encoder/stop_monitor", vec![OscType::String(other)]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidCommand);
        assert_eq!(err.field(), Some("task_id"));

        let reply = dispatcher
            .dispatch(client, &message("/encoder/stop_monitor", vec![]))
            .await
            .unwrap();
        assert_ne!(reply.args[1], OscType::String("none".into()));
    }

    #[tokio::test]
    async fn test_start_monitor_uses_session_format() {
        let sim = SimulatedEncoder::new(4096, 100, 1);
        let (dispatcher, client) = dispatcher(&sim).await;

        let reply = dispatcher
            .dispatch(
                client,
                &message(
                    "/encoder/start_monitor",
                    vec![OscType::Float(1.0), OscType::String("text".into())],
                ),
            )
            .await
            .unwrap();
        assert_eq!(reply.args[3], OscType::String("text".into()));

        // A restart without a format keeps the session's last choice.
        let reply = dispatcher
            .dispatch(client, &message("/encoder/start_monitor", vec![OscType::Float(1.0)]))
            .await
            .unwrap();
        assert_eq!(reply.args[3], OscType::String("text".into()));
        assert_eq!(dispatcher.monitors.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_link_failure_maps_to_error_kind() {
        let sim = SimulatedEncoder::new(4096, 100, 1);
        sim.set_offline(true).await;
        let (dispatcher, client) = dispatcher(&sim).await;

        let err = dispatcher
            .dispatch(client, &message("/encoder/read_speed", vec![]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LinkUnavailable);
        assert_eq!(err.field(), None);
    }

    #[tokio::test]
    async fn test_status_document() {
        let sim = SimulatedEncoder::new(4096, 100, 1);
        let (dispatcher, client) = dispatcher(&sim).await;

        let reply = dispatcher
            .dispatch(client, &message("/system/status", vec![]))
            .await
            .unwrap();
        assert_eq!(reply.path, STATUS_PATH);
        let OscType::String(json) = &reply.args[0] else {
            panic!("expected a JSON string");
        };
        let status: serde_json::Value = serde_json::from_str(json).unwrap();
        assert_eq!(status["bridge"], BRIDGE_NAME);
        assert_eq!(status["device_name"], "rig");
        assert_eq!(status["link"]["state"], "disconnected");
    }
}
