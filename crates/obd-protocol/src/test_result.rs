//! Mode 06 On-Board Test Results

use crate::frame::hex_to_bytes;
use serde::Serialize;

/// Positive response prefix of Mode 06
const RESPONSE_PREFIX: &str = "46";

/// One on-board monitoring test result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TestResult {
    /// Test ID
    pub tid: u8,
    /// Component ID
    pub cid: u8,
    /// Measured value
    pub value: u16,
    /// Lower limit
    pub min: u16,
    /// Upper limit
    pub max: u16,
    /// Whether the value reached the lower limit
    pub passed: bool,
}

/// Parse a cleaned Mode 06 reply; `None` unless it carries 8 data bytes
pub fn parse_test_result(clean_hex: &str) -> Option<TestResult> {
    let data = clean_hex.strip_prefix(RESPONSE_PREFIX)?;
    let bytes = hex_to_bytes(data);
    if bytes.len() < 8 {
        return None;
    }

    let word = |i: usize| u16::from(bytes[i]) << 8 | u16::from(bytes[i + 1]);
    let value = word(2);
    let min = word(4);

    Some(TestResult {
        tid: bytes[0],
        cid: bytes[1],
        value,
        min,
        max: word(6),
        passed: value >= min,
    })
}
