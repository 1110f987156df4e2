//! OSC packet decoding, encoding and argument coercion.
//!
//! OSC clients disagree on numeric typing (some send every number as a
//! float, some send strings), so command arguments are read through the
//! lenient `arg_as_*` helpers rather than by matching a single type tag.

use rosc::{OscMessage, OscPacket, OscType};

use crate::error::{BridgeError, Result};

/// Decode a datagram into its messages, flattening bundles in order.
pub fn decode_datagram(buf: &[u8]) -> Result<Vec<OscMessage>> {
    let (_, packet) =
        rosc::decoder::decode_udp(buf).map_err(|e| BridgeError::Decode(format!("{:?}", e)))?;

    let mut messages = Vec::new();
    flatten(packet, &mut messages);
    Ok(messages)
}

fn flatten(packet: OscPacket, out: &mut Vec<OscMessage>) {
    match packet {
        OscPacket::Message(msg) => out.push(msg),
        OscPacket::Bundle(bundle) => {
            for inner in bundle.content {
                flatten(inner, out);
            }
        }
    }
}

/// Encode a single message.
pub fn encode_message(address: &str, args: Vec<OscType>) -> Result<Vec<u8>> {
    let packet = OscPacket::Message(OscMessage {
        addr: address.to_string(),
        args,
    });
    rosc::encoder::encode(&packet).map_err(|e| BridgeError::Encode {
        address: address.to_string(),
        message: format!("{:?}", e),
    })
}

/// Read a numeric argument as `f64`.
pub fn arg_as_f64(arg: &OscType) -> Option<f64> {
    match arg {
        OscType::Int(v) => Some(f64::from(*v)),
        OscType::Long(v) => Some(*v as f64),
        OscType::Float(v) => Some(f64::from(*v)),
        OscType::Double(v) => Some(*v),
        OscType::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|v: &f64| v.is_finite())
}

/// Read an integral argument. Floats are accepted when they hold a whole number.
pub fn arg_as_i64(arg: &OscType) -> Option<i64> {
    match arg {
        OscType::Int(v) => Some(i64::from(*v)),
        OscType::Long(v) => Some(*v),
        OscType::Bool(v) => Some(i64::from(*v)),
        OscType::String(s) => s.trim().parse().ok(),
        other => arg_as_f64(other).filter(|v| v.fract() == 0.0).map(|v| v as i64),
    }
}

/// Read a string argument.
pub fn arg_as_str(arg: &OscType) -> Option<&str> {
    match arg {
        OscType::String(s) => Some(s.as_str()),
        _ => None,
    }
}

/// Read a boolean-ish argument (`true`, non-zero number, or `"true"`/`"1"`/`"yes"`).
pub fn arg_as_bool(arg: &OscType) -> Option<bool> {
    match arg {
        OscType::Bool(v) => Some(*v),
        OscType::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(true),
            "false" | "0" | "no" | "off" => Some(false),
            _ => None,
        },
        other => arg_as_f64(other).map(|v| v != 0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rosc::{OscBundle, OscTime};

    #[test]
    fn test_encode_decode_message() {
        let bytes = encode_message(
            "/encoder/start_monitor",
            vec![OscType::Float(0.5), OscType::String("text".to_string())],
        )
        .unwrap();

        let messages = decode_datagram(&bytes).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].addr, "/encoder/start_monitor");
        assert_eq!(messages[0].args[0], OscType::Float(0.5));
    }

    #[test]
    fn test_bundle_is_flattened_in_order() {
        let bundle = OscPacket::Bundle(OscBundle {
            timetag: OscTime {
                seconds: 0,
                fractional: 1,
            },
            content: vec![
                OscPacket::Message(OscMessage {
                    addr: "/whoami".to_string(),
                    args: vec![],
                }),
                OscPacket::Message(OscMessage {
                    addr: "/encoder/read_speed".to_string(),
                    args: vec![],
                }),
            ],
        });
        let bytes = rosc::encoder::encode(&bundle).unwrap();

        let messages = decode_datagram(&bytes).unwrap();
        let addrs: Vec<_> = messages.iter().map(|m| m.addr.as_str()).collect();
        assert_eq!(addrs, vec!["/whoami", "/encoder/read_speed"]);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(
            decode_datagram(b"not osc at all"),
            Err(BridgeError::Decode(_))
        ));
    }

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(arg_as_f64(&OscType::Int(2)), Some(2.0));
        assert_eq!(arg_as_f64(&OscType::String("0.25".into())), Some(0.25));
        assert_eq!(arg_as_f64(&OscType::Double(f64::NAN)), None);
        assert_eq!(arg_as_f64(&OscType::Nil), None);

        assert_eq!(arg_as_i64(&OscType::Float(3.0)), Some(3));
        assert_eq!(arg_as_i64(&OscType::Float(3.5)), None);
        assert_eq!(arg_as_i64(&OscType::String("17".into())), Some(17));
    }

    #[test]
    fn test_bool_and_str() {
        assert_eq!(arg_as_bool(&OscType::Int(1)), Some(true));
        assert_eq!(arg_as_bool(&OscType::String("no".into())), Some(false));
        assert_eq!(arg_as_bool(&OscType::String("maybe".into())), None);
        assert_eq!(arg_as_str(&OscType::String("high".into())), Some("high"));
        assert_eq!(arg_as_str(&OscType::Int(1)), None);
    }
}
