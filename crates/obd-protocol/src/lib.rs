//! OBD-II Protocol Implementation
//!
//! Pure protocol layer for ELM327-compatible adapters: cleaning of raw
//! adapter text, command encoding, Mode 01 PID decoding, emissions
//! readiness, trouble code decoding and the Mode 06 / Mode 09 replies
//! requested during a bus scan. Nothing in this crate performs I/O.

mod command;
mod error;
pub mod dtc;
pub mod frame;
pub mod pid;
mod protocol;
pub mod readiness;
pub mod test_result;
pub mod vin;

pub use command::{Command, ModuleHeader, Response, ResponseMatcher};
pub use dtc::parse_dtc;
pub use error::ObdError;
pub use frame::{normalize, FrameAssembler};
pub use pid::{decode as decode_pid, DecodedPid, PidDefinition, PID_TABLE};
pub use protocol::ObdProtocol;
pub use readiness::{decode_readiness, EmissionsReadiness, MonitorStatus};
pub use test_result::TestResult;

/// OBD-II mode constants
pub mod mode {
    /// Current data
    pub const CURRENT_DATA: u8 = 0x01;
    /// Diagnostic trouble codes
    pub const READ_DTC: u8 = 0x03;
    /// Oxygen sensor monitoring test results
    pub const O2_MONITORING: u8 = 0x05;
    /// On-board monitoring test results
    pub const TEST_RESULTS: u8 = 0x06;
    /// Pending trouble codes
    pub const PENDING_DTC: u8 = 0x07;
    /// Control of on-board systems
    pub const CONTROL: u8 = 0x08;
    /// Vehicle information
    pub const VEHICLE_INFO: u8 = 0x09;
    /// Permanent trouble codes
    pub const PERMANENT_DTC: u8 = 0x0A;

    /// Offset added to a mode byte in a positive response
    pub const POSITIVE_RESPONSE_OFFSET: u8 = 0x40;

    /// Request text for `mode`, optionally followed by a PID
    pub fn request(mode: u8, pid: Option<u8>) -> String {
        match pid {
            Some(pid) => format!("{:02X}{:02X}", mode, pid),
            None => format!("{:02X}", mode),
        }
    }

    /// Leading byte of a positive reply to `mode`
    pub fn positive_response(mode: u8) -> String {
        format!("{:02X}", mode.wrapping_add(POSITIVE_RESPONSE_OFFSET))
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_request_text() {
            assert_eq!(request(CURRENT_DATA, Some(0x0C)), "010C");
            assert_eq!(request(VEHICLE_INFO, Some(0x02)), "0902");
            assert_eq!(request(READ_DTC, None), "03");
        }

        #[test]
        fn test_positive_response() {
            assert_eq!(positive_response(CURRENT_DATA), "41");
            assert_eq!(positive_response(PENDING_DTC), "47");
            assert_eq!(positive_response(PERMANENT_DTC), "4A");
        }
    }
}

/// ELM327 AT commands used by the transport
pub mod at {
    /// Reset the adapter
    pub const RESET: &str = "ATZ";
    /// Echo off
    pub const ECHO_OFF: &str = "ATE0";
    /// Linefeeds off
    pub const LINEFEEDS_OFF: &str = "ATL0";
    /// Spaces off
    pub const SPACES_OFF: &str = "ATS0";
    /// Prefix of the set-transmit-header command
    pub const SET_HEADER: &str = "ATSH";
}
