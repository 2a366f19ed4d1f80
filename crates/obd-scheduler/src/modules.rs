//! Known diagnostic modules

use obd_protocol::ModuleHeader;
use serde::Serialize;

/// Display names of commonly found modules, by request header
pub const MODULE_NAMES: [(u16, &str); 14] = [
    (0x7E0, "Engine (ECM)"),
    (0x7E1, "Transmission"),
    (0x7E2, "ABS"),
    (0x7E8, "Gateway"),
    (0x7C0, "Body Control"),
    (0x7C4, "HVAC"),
    (0x7D0, "Steering"),
    (0x720, "Sunroof"),
    (0x730, "Door LF"),
    (0x731, "Door RF"),
    (0x7A0, "Park Assist"),
    (0x750, "Cluster"),
    (0x758, "Radar"),
    (0x790, "Wipers"),
];

/// Display name of the module behind `header`
pub fn module_name(header: ModuleHeader) -> String {
    MODULE_NAMES
        .iter()
        .find(|(raw, _)| *raw == header.value())
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| format!("Module {}", header))
}

/// A module that answered the presence probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleInfo {
    pub header: ModuleHeader,
    pub name: String,
}

impl ModuleInfo {
    pub fn new(header: ModuleHeader) -> Self {
        Self {
            header,
            name: module_name(header),
        }
    }
}
