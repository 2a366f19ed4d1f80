//! Vehicle Identification Number (Mode 09 PID 02)

use crate::frame::hex_to_bytes;

/// Response marker of a Mode 09 PID 02 reply
const VIN_MARKER: &str = "4902";

/// Length of a VIN
pub const VIN_LENGTH: usize = 17;

/// Extract the VIN from a cleaned Mode 09 PID 02 reply.
///
/// Handles both the single ISO-TP message of CAN vehicles and the
/// five-line replies of legacy protocols, where every line repeats the
/// `4902` marker and a sequence byte.
pub fn parse_vin(clean_hex: &str) -> Option<String> {
    let upper = clean_hex.to_ascii_uppercase();
    let mut segments = upper.split(VIN_MARKER);
    // Anything before the first marker is ISO-TP length or header noise
    segments.next();

    let chars: String = segments
        .filter_map(|segment| segment.get(2..))
        .flat_map(hex_to_bytes)
        .filter(u8::is_ascii_alphanumeric)
        .map(char::from)
        .collect();

    if chars.len() < VIN_LENGTH {
        return None;
    }
    Some(chars[chars.len() - VIN_LENGTH..].to_string())
}
