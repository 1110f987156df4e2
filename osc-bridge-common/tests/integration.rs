//! Integration tests for osc-bridge-common library.

use osc_bridge_common::{
    AddressBuilder, BaseConfig, ErrorKind, ErrorReport, LinkSnapshot, LinkState, LogFormat,
    OutputFormat, encode_json, load_config, parse_address, parse_config,
};
use std::io::Write;

#[test]
fn test_address_building_and_parsing() {
    let builder = AddressBuilder::new("encoder-pi");
    let address = builder.build("encoder/data");
    assert_eq!(address, "/encoder-pi/encoder/data");

    // A device-prefixed address routes like the bare one.
    let parsed = parse_address(&address).expect("Parse failed").without_device("encoder-pi");
    assert_eq!(parsed.namespace(), "encoder");
    assert_eq!(parsed.action(), Some("data"));
}

#[test]
fn test_load_config_from_file() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    writeln!(
        file,
        r#"{{
            // comments are fine in JSON5
            osc: {{ port: 7777, return_port: null }},
            logging: {{ level: "warn", format: "json" }},
        }}"#
    )
    .expect("write");

    let config: BaseConfig = load_config(file.path()).expect("load");
    assert_eq!(config.osc.port, 7777);
    assert_eq!(config.osc.return_port, None);
    assert_eq!(config.logging.format, LogFormat::Json);
}

#[test]
fn test_load_config_missing_file() {
    let result: osc_bridge_common::Result<BaseConfig> = load_config("/nonexistent/bridge.json5");
    assert!(result.is_err());
}

#[test]
fn test_snapshot_and_report_json() {
    let snapshot = LinkSnapshot {
        state: LinkState::Degraded,
        consecutive_failures: 3,
        calls_total: 10,
        failures_total: 3,
        ..Default::default()
    };
    let json = encode_json(&snapshot).unwrap();
    assert!(json.contains("\"state\":\"degraded\""));
    assert!(!json.contains("last_error"));

    let report = ErrorReport::new(ErrorKind::GpioFault, "pin 7 not configured", "/gpio");
    let value: serde_json::Value = serde_json::from_str(&encode_json(&report).unwrap()).unwrap();
    assert_eq!(value["kind"], "gpio_fault");
    assert_eq!(value["retryable"], false);
}

#[test]
fn test_output_format_in_config() {
    #[derive(serde::Deserialize)]
    struct Wrapper {
        format: OutputFormat,
    }
    let wrapper: Wrapper = parse_config("{ format: 'json' }").unwrap();
    assert_eq!(wrapper.format, OutputFormat::Json);
}
