//! Monitor payload rendering for each output format.

use osc_bridge_common::OutputFormat;
use rosc::OscType;
use serde::Serialize;
use uuid::Uuid;

use crate::encoder::Sample;

/// Reply path (below the device) for samples in `format`.
pub fn data_path(format: OutputFormat) -> &'static str {
    match format {
        OutputFormat::Osc => "encoder/data",
        OutputFormat::Json => "json",
        OutputFormat::Text => "text",
    }
}

#[derive(Serialize)]
struct MonitorData<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    task_id: Uuid,
    device_name: &'a str,
    address: u8,
    timestamp: f64,
    direction: i32,
    angle: f64,
    rpm: f64,
    laps: i64,
    raw_angle: u16,
    raw_rpm: i16,
}

/// Context every rendered sample carries.
#[derive(Debug, Clone, Copy)]
pub struct SampleSource<'a> {
    pub device_name: &'a str,
    pub slave_address: u8,
    pub task_id: Uuid,
}

/// Render a sample as OSC arguments for `format`.
pub fn render(
    format: OutputFormat,
    sample: &Sample,
    source: SampleSource<'_>,
) -> Result<Vec<OscType>, serde_json::Error> {
    let args = match format {
        OutputFormat::Osc => vec![
            OscType::Int(i32::from(source.slave_address)),
            OscType::Double(sample.timestamp),
            OscType::Int(sample.direction.as_i32()),
            OscType::Float(sample.angle as f32),
            OscType::Float(sample.rpm as f32),
            OscType::Int(sample.laps_i32()),
            OscType::Int(i32::from(sample.raw_angle)),
            OscType::Int(i32::from(sample.raw_speed)),
        ],
        OutputFormat::Json => {
            let data = MonitorData {
                kind: "monitor_data",
                task_id: source.task_id,
                device_name: source.device_name,
                address: source.slave_address,
                timestamp: sample.timestamp,
                direction: sample.direction.as_i32(),
                angle: sample.angle,
                rpm: sample.rpm,
                laps: sample.laps,
                raw_angle: sample.raw_angle,
                raw_rpm: sample.raw_speed,
            };
            vec![OscType::String(serde_json::to_string(&data)?)]
        }
        OutputFormat::Text => vec![OscType::String(format!(
            "{} {:.3} {} {:.4} {:.4} {} {} {}\n",
            source.slave_address,
            sample.timestamp,
            sample.direction.as_i32(),
            sample.angle,
            sample.rpm,
            sample.laps,
            sample.raw_angle,
            sample.raw_speed
        ))],
    };
    Ok(args)
}
