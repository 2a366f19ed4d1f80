//! OBD-II PID Definitions and Response Parsing
//!
//! Mode 01 Parameter IDs and their decoding formulas, kept as one static
//! table. Supporting a new PID means adding one row to [`PID_TABLE`].

use serde::Serialize;

/// Decoding formula over the raw data bytes A, B, C, D
pub type Formula = fn(f64, f64, f64, f64) -> f64;

/// Static description of one Mode 01 PID
#[derive(Debug, Clone, Copy)]
pub struct PidDefinition {
    /// Request key, mode and PID in hex (e.g. "010C")
    pub key: &'static str,
    /// Display name
    pub name: &'static str,
    /// Physical unit of the decoded value
    pub unit: &'static str,
    /// Lowest value the formula can produce
    pub min: f64,
    /// Highest value the formula can produce
    pub max: f64,
    /// Formula from raw bytes to the physical value
    pub formula: Formula,
}

/// Every Mode 01 PID this crate knows how to decode
pub static PID_TABLE: &[PidDefinition] = &[
    PidDefinition { key: "0104", name: "Engine Load", unit: "%", min: 0.0, max: 100.0, formula: |a, _, _, _| a * 100.0 / 255.0 },
    PidDefinition { key: "0105", name: "Coolant Temp", unit: "°C", min: -40.0, max: 215.0, formula: |a, _, _, _| a - 40.0 },
    PidDefinition { key: "0106", name: "Short Term Fuel Trim Bank 1", unit: "%", min: -100.0, max: 99.2, formula: |a, _, _, _| (a - 128.0) * 100.0 / 128.0 },
    PidDefinition { key: "0107", name: "Long Term Fuel Trim Bank 1", unit: "%", min: -100.0, max: 99.2, formula: |a, _, _, _| (a - 128.0) * 100.0 / 128.0 },
    PidDefinition { key: "010B", name: "Intake Manifold Pressure", unit: "kPa", min: 0.0, max: 255.0, formula: |a, _, _, _| a },
    PidDefinition { key: "010C", name: "RPM", unit: "rpm", min: 0.0, max: 16383.75, formula: |a, b, _, _| (a * 256.0 + b) / 4.0 },
    PidDefinition { key: "010D", name: "Speed", unit: "km/h", min: 0.0, max: 255.0, formula: |a, _, _, _| a },
    PidDefinition { key: "010E", name: "Timing Advance", unit: "°", min: -64.0, max: 63.5, formula: |a, _, _, _| (a - 128.0) / 2.0 },
    PidDefinition { key: "010F", name: "Intake Air Temp", unit: "°C", min: -40.0, max: 215.0, formula: |a, _, _, _| a - 40.0 },
    PidDefinition { key: "0110", name: "MAF Air Flow Rate", unit: "g/s", min: 0.0, max: 655.35, formula: |a, b, _, _| (a * 256.0 + b) / 100.0 },
    PidDefinition { key: "0111", name: "Throttle Position", unit: "%", min: 0.0, max: 100.0, formula: |a, _, _, _| a * 100.0 / 255.0 },
    PidDefinition { key: "011F", name: "Run Time Since Engine Start", unit: "sec", min: 0.0, max: 65535.0, formula: |a, b, _, _| a * 256.0 + b },
    PidDefinition { key: "0121", name: "Distance Traveled with MIL On", unit: "km", min: 0.0, max: 65535.0, formula: |a, b, _, _| a * 256.0 + b },
    PidDefinition { key: "012F", name: "Fuel Tank Level Input", unit: "%", min: 0.0, max: 100.0, formula: |a, _, _, _| a * 100.0 / 255.0 },
    PidDefinition { key: "0133", name: "Barometric Pressure", unit: "kPa", min: 0.0, max: 255.0, formula: |a, _, _, _| a },
    PidDefinition { key: "0142", name: "Control Module Voltage", unit: "V", min: 0.0, max: 65.535, formula: |a, b, _, _| (a * 256.0 + b) / 1000.0 },
    PidDefinition { key: "0143", name: "Absolute Load Value", unit: "%", min: 0.0, max: 25700.0, formula: |a, b, _, _| (a * 256.0 + b) * 100.0 / 255.0 },
    PidDefinition { key: "0144", name: "Command Equivalence Ratio", unit: "ratio", min: 0.0, max: 2.0, formula: |a, b, _, _| (a * 256.0 + b) / 32768.0 },
    PidDefinition { key: "0145", name: "Relative Throttle Position", unit: "%", min: 0.0, max: 100.0, formula: |a, _, _, _| a * 100.0 / 255.0 },
    PidDefinition { key: "0146", name: "Ambient Air Temp", unit: "°C", min: -40.0, max: 215.0, formula: |a, _, _, _| a - 40.0 },
    PidDefinition { key: "015C", name: "Engine Oil Temp", unit: "°C", min: -40.0, max: 210.0, formula: |a, _, _, _| a - 40.0 },
];

/// A decoded PID value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedPid {
    /// Request key (e.g. "010C")
    pub key: &'static str,
    /// Display name
    pub name: &'static str,
    /// Physical value rounded to 2 decimals
    pub value: f64,
    /// Physical unit
    pub unit: &'static str,
    /// Range lower bound
    pub min: f64,
    /// Range upper bound
    pub max: f64,
}

/// Look up the table row for a PID key
pub fn lookup(key: &str) -> Option<&'static PidDefinition> {
    PID_TABLE.iter().find(|def| def.key.eq_ignore_ascii_case(key))
}

/// Decode raw data bytes for a PID key.
///
/// Returns `None` for PIDs missing from [`PID_TABLE`]. Short payloads are
/// tolerated: missing bytes count as zero.
pub fn decode(key: &str, bytes: &[u8]) -> Option<DecodedPid> {
    let def = lookup(key)?;
    let byte = |i: usize| bytes.get(i).copied().unwrap_or(0) as f64;
    let value = (def.formula)(byte(0), byte(1), byte(2), byte(3));

    Some(DecodedPid {
        key: def.key,
        name: def.name,
        value: round2(value),
        unit: def.unit,
        min: def.min,
        max: def.max,
    })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
