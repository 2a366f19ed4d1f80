//! Emissions Readiness (Mode 01 PID 01)
//!
//! PID 01 is a bitfield rather than a formula, so it is decoded here and not
//! through the PID table.

use serde::Serialize;
use std::fmt;

/// Status of one readiness monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum MonitorStatus {
    /// Monitor not supported by the vehicle
    #[default]
    #[serde(rename = "N/A")]
    NotAvailable,
    /// Supported and complete
    #[serde(rename = "OK")]
    Ok,
    /// Supported but not yet complete
    #[serde(rename = "INC")]
    Incomplete,
}

impl MonitorStatus {
    /// Status from a support bit and a completion bit (set = incomplete)
    fn from_bits(support_byte: u8, support_bit: u8, completion_byte: u8, completion_bit: u8) -> Self {
        if support_byte & (1 << support_bit) == 0 {
            MonitorStatus::NotAvailable
        } else if completion_byte & (1 << completion_bit) == 0 {
            MonitorStatus::Ok
        } else {
            MonitorStatus::Incomplete
        }
    }

    /// Short label as shown to the user
    pub fn label(&self) -> &'static str {
        match self {
            MonitorStatus::NotAvailable => "N/A",
            MonitorStatus::Ok => "OK",
            MonitorStatus::Incomplete => "INC",
        }
    }
}

impl fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Snapshot of the emissions readiness monitors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct EmissionsReadiness {
    /// Malfunction indicator lamp
    pub mil: bool,
    /// Misfire monitor (continuous)
    pub misfire: MonitorStatus,
    /// Fuel system monitor (continuous)
    pub fuel_system: MonitorStatus,
    /// Comprehensive components monitor (continuous)
    pub components: MonitorStatus,
    /// Catalyst
    pub catalyst: MonitorStatus,
    /// Heated catalyst
    pub heated_catalyst: MonitorStatus,
    /// Evaporative system
    pub evap: MonitorStatus,
    /// Secondary air system
    pub secondary_air: MonitorStatus,
    /// A/C refrigerant
    pub ac_refrigerant: MonitorStatus,
    /// Oxygen sensor
    pub oxygen_sensor: MonitorStatus,
    /// Oxygen sensor heater
    pub oxygen_sensor_heater: MonitorStatus,
    /// EGR system
    pub egr: MonitorStatus,
}

impl EmissionsReadiness {
    /// Monitors with their display names, in report order
    pub fn monitors(&self) -> [(&'static str, MonitorStatus); 11] {
        [
            ("Misfire", self.misfire),
            ("FuelSys", self.fuel_system),
            ("Components", self.components),
            ("Catalyst", self.catalyst),
            ("HeatedCat", self.heated_catalyst),
            ("EVAP", self.evap),
            ("SecAir", self.secondary_air),
            ("ACRef", self.ac_refrigerant),
            ("O2", self.oxygen_sensor),
            ("O2Heater", self.oxygen_sensor_heater),
            ("EGR", self.egr),
        ]
    }
}

/// Decode the four data bytes of a Mode 01 PID 01 reply.
///
/// Byte A bit 7 is the MIL. Continuous monitors pair the support bits of
/// byte B with the same bits of byte D; the spark-ignition monitors pair the
/// support bits of byte C with the completion bits of byte D. Missing bytes
/// count as zero.
pub fn decode_readiness(bytes: &[u8]) -> EmissionsReadiness {
    let byte = |i: usize| bytes.get(i).copied().unwrap_or(0);
    let (a, b, c, d) = (byte(0), byte(1), byte(2), byte(3));
    let status = MonitorStatus::from_bits;

    EmissionsReadiness {
        mil: a & 0x80 != 0,
        misfire: status(b, 0, d, 0),
        fuel_system: status(b, 1, d, 1),
        components: status(b, 2, d, 2),
        catalyst: status(c, 0, d, 0),
        heated_catalyst: status(c, 1, d, 1),
        evap: status(c, 2, d, 2),
        secondary_air: status(c, 3, d, 3),
        ac_refrigerant: status(c, 4, d, 4),
        oxygen_sensor: status(c, 5, d, 5),
        oxygen_sensor_heater: status(c, 6, d, 6),
        egr: status(c, 7, d, 7),
    }
}
