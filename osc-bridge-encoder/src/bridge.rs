//! Wires the encoder bridge onto a [`BridgeRunner`].

use std::sync::Arc;
use std::time::Duration;

use osc_bridge_framework::{
    BridgeConfig, BridgeRunner, LinkState, OscTransmitter, SessionRegistry,
};
use rosc::OscType;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::command::CommandDefaults;
use crate::config::EncoderBridgeConfig;
use crate::dispatcher::CommandDispatcher;
use crate::encoder::EncoderModel;
use crate::gpio::GpioController;
use crate::link::Connector;
use crate::monitor::{MonitorScheduler, MonitorSettings};
use crate::poller::EncoderPoller;
use crate::supervisor::{ConnectionSupervisor, SupervisorPolicy};

/// Path link-state transitions are broadcast on.
pub const CONNECTION_PATH: &str = "encoder/connection";

/// Handles to the running bridge components.
pub struct EncoderBridge {
    pub supervisor: Arc<ConnectionSupervisor>,
    pub poller: Arc<EncoderPoller>,
    pub monitors: MonitorScheduler,
    pub dispatcher: Arc<CommandDispatcher>,
}

impl EncoderBridge {
    /// Start every task on `runner` with the link policy from its config.
    pub fn start(
        runner: &mut BridgeRunner<EncoderBridgeConfig>,
        connector: impl Connector,
        gpio: GpioController,
    ) -> Self {
        let config = runner.config();
        let policy = SupervisorPolicy::from_config(&config.modbus, &config.serial);
        Self::start_with_policy(runner, connector, policy, gpio)
    }

    /// Start with an explicit link policy.
    pub fn start_with_policy(
        runner: &mut BridgeRunner<EncoderBridgeConfig>,
        connector: impl Connector,
        policy: SupervisorPolicy,
        gpio: GpioController,
    ) -> Self {
        let config = runner.config().clone();
        let device_name = config.device_name().to_string();
        let registry = runner.registry();
        let transmitter = runner.transmitter();
        let shutdown = runner.shutdown_token();

        let supervisor = Arc::new(ConnectionSupervisor::new(connector, policy));
        let poller = Arc::new(EncoderPoller::new(
            supervisor.clone(),
            EncoderModel::new(&config.encoder),
        ));

        let monitors = MonitorScheduler::new(
            registry.clone(),
            poller.clone(),
            transmitter.clone(),
            MonitorSettings {
                device_name: device_name.clone(),
                slave_address: config.modbus.slave_address,
                degraded_notice: config.monitor.degraded_notice(),
                max_consecutive_errors: config.monitor.max_consecutive_errors,
            },
            shutdown.clone(),
        );

        let defaults = CommandDefaults {
            monitor_interval: Duration::from_secs_f64(config.monitor.default_interval_secs),
            pulse: Duration::from_secs_f64(config.gpio.default_pulse_secs),
            output_pins: gpio.output_count(),
        };

        let dispatcher = Arc::new(CommandDispatcher::new(
            device_name,
            registry.clone(),
            transmitter.clone(),
            poller.clone(),
            monitors.clone(),
            gpio,
            defaults,
        ));

        runner.serve(dispatcher.clone());
        runner.start_heartbeat();
        runner.spawn(supervisor.clone().supervise(shutdown.clone()));
        runner.spawn(announce_link_state(
            supervisor.subscribe(),
            registry,
            transmitter,
            shutdown,
        ));

        let sync = poller.clone();
        let sampling_time_ms = config.encoder.sampling_time_ms;
        let write = config.encoder.write_sampling_time;
        runner.spawn(async move {
            if let Err(e) = sync.sync_sampling_time(sampling_time_ms, write).await {
                warn!(error = %e, "Could not check the speed sampling time");
            }
        });

        info!(
            slave = config.modbus.slave_address,
            resolution = config.encoder.resolution,
            "Encoder bridge started"
        );

        Self {
            supervisor,
            poller,
            monitors,
            dispatcher,
        }
    }
}

/// Broadcast every link-state transition to all sessions.
async fn announce_link_state(
    mut states: watch::Receiver<LinkState>,
    registry: Arc<SessionRegistry>,
    transmitter: OscTransmitter,
    cancel: CancellationToken,
) {
    let address = transmitter.build_address(CONNECTION_PATH);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        let state = *states.borrow_and_update();
        let targets = registry.return_addresses().await;
        if targets.is_empty() {
            continue;
        }
        let stats = transmitter
            .broadcast(targets, &address, vec![OscType::String(state.as_str().to_string())])
            .await;
        info!(state = %state, clients = stats.success, "Link state announced");
    }
}
