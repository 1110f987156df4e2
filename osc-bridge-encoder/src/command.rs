//! Typed commands parsed from inbound OSC messages.
//!
//! Parsing validates eagerly: anything that does not fit a known command
//! shape becomes an [`InvalidCommand`] naming the offending field.

use std::str::FromStr;
use std::time::Duration;

use osc_bridge_common::{OutputFormat, parse_address};
use osc_bridge_framework::MIN_INTERVAL;
use osc_bridge_framework::packet::{arg_as_bool, arg_as_f64, arg_as_i64, arg_as_str};
use rosc::OscType;
use uuid::Uuid;

use crate::error::InvalidCommand;

/// A digital I/O operation. Pins are indices into the configured outputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GpioOp {
    High(usize),
    Low(usize),
    Toggle(usize),
    Pulse { pin: usize, duration: Duration },
    Read,
}

impl GpioOp {
    pub fn name(&self) -> &'static str {
        match self {
            GpioOp::High(_) => "high",
            GpioOp::Low(_) => "low",
            GpioOp::Toggle(_) => "toggle",
            GpioOp::Pulse { .. } => "pulse",
            GpioOp::Read => "read",
        }
    }
}

/// Every command the bridge understands.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    WhoAmI,
    SetZero {
        reset_laps: bool,
    },
    StartMonitor {
        interval: Duration,
        /// `None` keeps the session's current format.
        format: Option<OutputFormat>,
    },
    StopMonitor {
        task_id: Option<Uuid>,
    },
    ReadPosition,
    ReadSpeed,
    Connect,
    ListMonitors,
    Status,
    Gpio(GpioOp),
}

/// Values used when a command leaves an argument out.
#[derive(Debug, Clone)]
pub struct CommandDefaults {
    pub monitor_interval: Duration,
    pub pulse: Duration,
    pub output_pins: usize,
}

impl Command {
    /// Parse an address and its arguments. A leading device segment
    /// (`/encoder-pi/encoder/read_speed`) is accepted and ignored.
    pub fn parse(
        address: &str,
        args: &[OscType],
        device: &str,
        defaults: &CommandDefaults,
    ) -> Result<Self, InvalidCommand> {
        let parsed = parse_address(address)
            .map_err(|e| InvalidCommand::new("address", e.to_string()))?
            .without_device(device);
        let segments: Vec<&str> = parsed.segments.iter().map(String::as_str).collect();

        match segments.as_slice() {
            ["whoami"] => Ok(Command::WhoAmI),
            ["encoder", "set_zero"] => Ok(Command::SetZero {
                reset_laps: optional(args, 0, "reset_laps", arg_as_bool)?.unwrap_or(false),
            }),
            ["encoder", "start_monitor"] => parse_start_monitor(args, defaults),
            ["encoder", "stop_monitor"] => {
                let task_id = match args.first() {
                    None => None,
                    Some(arg) => Some(parse_task_id(arg)?),
                };
                Ok(Command::StopMonitor { task_id })
            }
            ["encoder", "read_position"] => Ok(Command::ReadPosition),
            ["encoder", "read_speed"] => Ok(Command::ReadSpeed),
            ["encoder", "connect"] => Ok(Command::Connect),
            ["encoder", "list_monitors"] => Ok(Command::ListMonitors),
            ["system", "status"] => Ok(Command::Status),
            ["gpio"] => {
                let op = required(args, 0, "operation", |a| arg_as_str(a).map(str::to_string))?;
                parse_gpio(&op, &args[1..], defaults)
            }
            ["gpio", op] => parse_gpio(op, args, defaults),
            _ => Err(InvalidCommand::new(
                "address",
                format!("unknown command '{}'", address),
            )),
        }
    }
}

fn optional<T>(
    args: &[OscType],
    index: usize,
    field: &str,
    read: impl Fn(&OscType) -> Option<T>,
) -> Result<Option<T>, InvalidCommand> {
    match args.get(index) {
        None | Some(OscType::Nil) => Ok(None),
        Some(arg) => read(arg)
            .map(Some)
            .ok_or_else(|| InvalidCommand::new(field, format!("unexpected value {:?}", arg))),
    }
}

fn required<T>(
    args: &[OscType],
    index: usize,
    field: &str,
    read: impl Fn(&OscType) -> Option<T>,
) -> Result<T, InvalidCommand> {
    optional(args, index, field, read)?
        .ok_or_else(|| InvalidCommand::new(field, "missing argument"))
}

/// Seconds as a timer period, no shorter than [`MIN_INTERVAL`].
fn positive_secs(value: f64, field: &str) -> Result<Duration, InvalidCommand> {
    match Duration::try_from_secs_f64(value) {
        Ok(period) if period >= MIN_INTERVAL => Ok(period),
        Ok(_) => Err(InvalidCommand::new(
            field,
            format!("must be at least {} ms, got {}", MIN_INTERVAL.as_millis(), value),
        )),
        Err(_) => Err(InvalidCommand::new(field, format!("must be > 0, got {}", value))),
    }
}

fn parse_start_monitor(
    args: &[OscType],
    defaults: &CommandDefaults,
) -> Result<Command, InvalidCommand> {
    let interval = match optional(args, 0, "interval", arg_as_f64)? {
        Some(secs) => positive_secs(secs, "interval")?,
        None => defaults.monitor_interval,
    };

    let format = optional(args, 1, "format", |a| arg_as_str(a).map(str::to_string))?
        .map(|name| {
            OutputFormat::from_str(&name).map_err(|e| InvalidCommand::new("format", e.to_string()))
        })
        .transpose()?;

    Ok(Command::StartMonitor { interval, format })
}

fn parse_task_id(arg: &OscType) -> Result<Uuid, InvalidCommand> {
    let text = arg_as_str(arg)
        .ok_or_else(|| InvalidCommand::new("task_id", "expected a string"))?;
    Uuid::parse_str(text.trim()).map_err(|e| InvalidCommand::new("task_id", e.to_string()))
}

fn parse_pin(args: &[OscType], defaults: &CommandDefaults) -> Result<usize, InvalidCommand> {
    let pin = required(args, 0, "pin", arg_as_i64)?;
    usize::try_from(pin)
        .ok()
        .filter(|index| *index < defaults.output_pins)
        .ok_or_else(|| {
            InvalidCommand::new(
                "pin",
                format!(
                    "pin index {} out of range (0..{})",
                    pin, defaults.output_pins
                ),
            )
        })
}

fn parse_gpio(
    op: &str,
    args: &[OscType],
    defaults: &CommandDefaults,
) -> Result<Command, InvalidCommand> {
    let op = match op.to_ascii_lowercase().as_str() {
        "read" => GpioOp::Read,
        "high" => GpioOp::High(parse_pin(args, defaults)?),
        "low" => GpioOp::Low(parse_pin(args, defaults)?),
        "toggle" => GpioOp::Toggle(parse_pin(args, defaults)?),
        "pulse" => {
            let pin = parse_pin(args, defaults)?;
            let duration = match optional(args, 1, "duration", arg_as_f64)? {
                Some(secs) => positive_secs(secs, "duration")?,
                None => defaults.pulse,
            };
            GpioOp::Pulse { pin, duration }
        }
        other => {
            return Err(InvalidCommand::new(
                "operation",
                format!("unknown GPIO operation '{}'", other),
            ));
        }
    };
    Ok(Command::Gpio(op))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> CommandDefaults {
        CommandDefaults {
            monitor_interval: Duration::from_millis(500),
            pulse: Duration::from_millis(500),
            output_pins: 3,
        }
    }

    fn parse(address: &str, args: Vec<OscType>) -> Result<Command, InvalidCommand> {
        Command::parse(address, &args, "encoder-pi", &defaults())
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(parse("/whoami", vec![]).unwrap(), Command::WhoAmI);
        assert_eq!(
            parse("/encoder/read_position", vec![]).unwrap(),
            Command::ReadPosition
        );
        assert_eq!(parse("/encoder/read_speed", vec![]).unwrap(), Command::ReadSpeed);
        assert_eq!(parse("/encoder/connect", vec![]).unwrap(), Command::Connect);
        assert_eq!(parse("/system/status", vec![]).unwrap(), Command::Status);
        assert_eq!(
            parse("/encoder-pi/encoder/list_monitors", vec![]).unwrap(),
            Command::ListMonitors
        );
    }

    #[test]
    fn test_start_monitor() {
        assert_eq!(
            parse("/encoder/start_monitor", vec![OscType::Float(0.25)]).unwrap(),
            Command::StartMonitor {
                interval: Duration::from_millis(250),
                format: None
            }
        );
        assert_eq!(
            parse(
                "/encoder/start_monitor",
                vec![OscType::Int(2), OscType::String("JSON".into())]
            )
            .unwrap(),
            Command::StartMonitor {
                interval: Duration::from_secs(2),
                format: Some(OutputFormat::Json)
            }
        );
        assert_eq!(
            parse("/encoder/start_monitor", vec![]).unwrap(),
            Command::StartMonitor {
                interval: Duration::from_millis(500),
                format: None
            }
        );
    }

    #[test]
    fn test_start_monitor_rejections() {
        let err = parse("/encoder/start_monitor", vec![OscType::Float(0.0)]).unwrap_err();
        assert_eq!(err.field, "interval");
        let err = parse("/encoder/start_monitor", vec![OscType::Float(-1.0)]).unwrap_err();
        assert_eq!(err.field, "interval");
        let err = parse("/encoder/start_monitor", vec![OscType::String("soon".into())]).unwrap_err();
        assert_eq!(err.field, "interval");
        let err = parse("/encoder/start_monitor", vec![OscType::Double(f64::INFINITY)]).unwrap_err();
        assert_eq!(err.field, "interval");
        let err = parse(
            "/encoder/start_monitor",
            vec![OscType::Float(1.0), OscType::String("xml".into())],
        )
        .unwrap_err();
        assert_eq!(err.field, "format");
    }

    #[test]
    fn test_interval_rounding_to_zero_is_rejected() {
        // Positive, but below a nanosecond once converted.
        let err = parse("/encoder/start_monitor", vec![OscType::Float(1e-10)]).unwrap_err();
        assert_eq!(err.field, "interval");
        let err = parse("/encoder/start_monitor", vec![OscType::Double(0.0004)]).unwrap_err();
        assert_eq!(err.field, "interval");

        assert_eq!(
            parse("/encoder/start_monitor", vec![OscType::Double(0.001)]).unwrap(),
            Command::StartMonitor {
                interval: MIN_INTERVAL,
                format: None
            }
        );

        let err = parse(
            "/gpio",
            vec![
                OscType::String("pulse".into()),
                OscType::Int(0),
                OscType::Float(1e-12),
            ],
        )
        .unwrap_err();
        assert_eq!(err.field, "duration");
    }

    #[test]
    fn test_stop_monitor_task_id() {
        let id = Uuid::new_v4();
        assert_eq!(
            parse("/encoder/stop_monitor", vec![OscType::String(id.to_string())]).unwrap(),
            Command::StopMonitor { task_id: Some(id) }
        );
        assert_eq!(
            parse("/encoder/stop_monitor", vec![]).unwrap(),
            Command::StopMonitor { task_id: None }
        );
        let err = parse("/encoder/stop_monitor", vec![OscType::String("nope".into())]).unwrap_err();
        assert_eq!(err.field, "task_id");
    }

    #[test]
    fn test_set_zero() {
        assert_eq!(
            parse("/encoder/set_zero", vec![]).unwrap(),
            Command::SetZero { reset_laps: false }
        );
        assert_eq!(
            parse("/encoder/set_zero", vec![OscType::Int(1)]).unwrap(),
            Command::SetZero { reset_laps: true }
        );
    }

    #[test]
    fn test_gpio_commands() {
        assert_eq!(
            parse("/gpio", vec![OscType::String("high".into()), OscType::Int(0)]).unwrap(),
            Command::Gpio(GpioOp::High(0))
        );
        assert_eq!(
            parse("/gpio/toggle", vec![OscType::Float(2.0)]).unwrap(),
            Command::Gpio(GpioOp::Toggle(2))
        );
        assert_eq!(
            parse(
                "/gpio",
                vec![
                    OscType::String("pulse".into()),
                    OscType::Int(1),
                    OscType::Float(0.2)
                ]
            )
            .unwrap(),
            Command::Gpio(GpioOp::Pulse {
                pin: 1,
                duration: Duration::from_secs_f64(0.2f32 as f64)
            })
        );
        assert_eq!(
            parse("/gpio", vec![OscType::String("pulse".into()), OscType::Int(1)]).unwrap(),
            Command::Gpio(GpioOp::Pulse {
                pin: 1,
                duration: Duration::from_millis(500)
            })
        );
        assert_eq!(
            parse("/gpio", vec![OscType::String("read".into())]).unwrap(),
            Command::Gpio(GpioOp::Read)
        );
    }

    #[test]
    fn test_gpio_rejections() {
        let err = parse("/gpio", vec![OscType::String("high".into()), OscType::Int(3)]).unwrap_err();
        assert_eq!(err.field, "pin");
        let err = parse("/gpio", vec![OscType::String("low".into()), OscType::Int(-1)]).unwrap_err();
        assert_eq!(err.field, "pin");
        let err = parse("/gpio", vec![OscType::String("low".into())]).unwrap_err();
        assert_eq!(err.field, "pin");
        let err = parse(
            "/gpio",
            vec![
                OscType::String("pulse".into()),
                OscType::Int(0),
                OscType::Float(0.0),
            ],
        )
        .unwrap_err();
        assert_eq!(err.field, "duration");
        let err = parse("/gpio", vec![OscType::String("blink".into()), OscType::Int(0)]).unwrap_err();
        assert_eq!(err.field, "operation");
        let err = parse("/gpio", vec![]).unwrap_err();
        assert_eq!(err.field, "operation");
    }

    #[test]
    fn test_unknown_address() {
        assert_eq!(parse("/encoder/explode", vec![]).unwrap_err().field, "address");
        assert_eq!(parse("no-slash", vec![]).unwrap_err().field, "address");
    }
}
