//! OSC bridge for a Modbus-RTU rotary encoder.
//!
//! Serves any number of OSC clients over UDP and keeps the serial link to
//! the encoder alive across cable pulls and power cycles.

use anyhow::{Context, Result};
use osc_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
use tracing::info;

use osc_bridge_encoder::EncoderBridge;
use osc_bridge_encoder::config::EncoderBridgeConfig;
use osc_bridge_encoder::gpio::GpioController;
use osc_bridge_encoder::link::RtuConnector;
use osc_bridge_encoder::simulated::SimulatedEncoder;

#[tokio::main]
async fn main() -> Result<()> {
    let args = BridgeArgs::parse_with_default("encoder-bridge.json5");

    let mut config = EncoderBridgeConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;
    if args.simulate {
        config.serial.simulate = true;
    }

    let mut runner = BridgeRunner::new_with_args("encoder", config, Some(&args))
        .await
        .context("Failed to start bridge")?;

    let config = runner.config().clone();
    let gpio = GpioController::from_config(&config.gpio);
    gpio.init().await;

    if config.serial.simulate {
        info!("Using simulated encoder");
        let encoder = SimulatedEncoder::new(
            config.encoder.resolution,
            config.encoder.sampling_time_ms,
            config.modbus.slave_address,
        );
        EncoderBridge::start(&mut runner, encoder, gpio);
    } else {
        info!(
            port = %config.serial.port,
            baud = config.serial.baud_rate,
            slave = config.modbus.slave_address,
            "Using serial encoder"
        );
        let connector = RtuConnector::new(config.serial.clone(), config.modbus.slave_address);
        EncoderBridge::start(&mut runner, connector, gpio);
    }

    runner.run().await.context("Bridge failed")
}
