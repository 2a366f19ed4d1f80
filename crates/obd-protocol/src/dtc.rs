//! Diagnostic Trouble Code Decoding
//!
//! Decodes Mode 03 (stored), Mode 07 (pending) and Mode 0A (permanent)
//! replies into 5-character codes such as `P0420`.

use crate::mode;

/// Trouble-code modes: stored, pending, permanent
const DTC_MODES: [u8; 3] = [mode::READ_DTC, mode::PENDING_DTC, mode::PERMANENT_DTC];

/// Code letter selected by the top two bits of the first byte
const DTC_LETTERS: [char; 4] = ['P', 'C', 'B', 'U'];

/// Decode a cleaned trouble-code reply into codes, in payload order.
///
/// A leading 11-bit CAN header (`7xx`) is skipped up to the first
/// response-mode byte, then the mode byte itself is dropped. Remaining data
/// is read as byte pairs; all-zero pairs are padding. A pair whose first
/// byte is malformed is skipped. A malformed or missing second byte reads
/// as zero.
pub fn parse_dtc(clean_hex: &str) -> Vec<String> {
    let upper = clean_hex.to_ascii_uppercase();
    let payload = strip_response_header(&upper);

    if payload == "00" || payload.len() < 4 {
        return Vec::new();
    }

    payload
        .as_bytes()
        .chunks(4)
        .filter_map(decode_pair)
        .collect()
}

/// Whether a trouble-code reply is the all-zero "no codes" answer
pub fn is_no_codes(clean_hex: &str) -> bool {
    let upper = clean_hex.to_ascii_uppercase();
    strip_response_header(&upper).chars().all(|c| c == '0')
}

/// Whether a reply carries one of the trouble-code positive response bytes
pub fn has_response_mode(clean_hex: &str, mode_response: &str) -> bool {
    clean_hex.to_ascii_uppercase().contains(mode_response)
}

fn strip_response_header(clean: &str) -> &str {
    let responses = DTC_MODES.map(mode::positive_response);
    let mut payload = clean;

    if has_can_header(payload) {
        let first_mode = responses
            .iter()
            .filter_map(|response| payload.find(response.as_str()))
            .min();
        if let Some(idx) = first_mode {
            payload = &payload[idx..];
        }
    }

    responses
        .iter()
        .find_map(|response| payload.strip_prefix(response.as_str()))
        .unwrap_or(payload)
}

fn has_can_header(payload: &str) -> bool {
    let bytes = payload.as_bytes();
    bytes.len() >= 3
        && bytes[0] == b'7'
        && bytes[1].is_ascii_hexdigit()
        && bytes[2].is_ascii_hexdigit()
}

fn decode_pair(chunk: &[u8]) -> Option<String> {
    let a = parse_byte(chunk.get(..2).unwrap_or(chunk))?;
    let b = chunk.get(2..).and_then(parse_byte);
    if a == 0 && b == Some(0) {
        return None;
    }
    let b = b.unwrap_or(0);

    let letter = DTC_LETTERS[(a >> 6) as usize];
    let second = (a >> 4) & 0x3;
    let rest = (u16::from(a & 0x0F) << 8) | u16::from(b);
    Some(format!("{}{}{:03X}", letter, second, rest))
}

fn parse_byte(pair: &[u8]) -> Option<u8> {
    std::str::from_utf8(pair)
        .ok()
        .and_then(|s| u8::from_str_radix(s, 16).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_single_code() {
        assert_eq!(parse_dtc("430101"), vec!["P0101"]);
    }

    #[test]
    fn test_no_codes() {
        assert!(parse_dtc("4300").is_empty());
        assert!(parse_dtc("").is_empty());
        assert!(parse_dtc("43").is_empty());
    }

    #[test]
    fn test_code_letters() {
        // 0x04 0x20 -> P0420, 0x41 0x23 -> C0123, 0x92 0x34 -> B1234, 0xC1 0x00 -> U0100
        assert_eq!(
            parse_dtc("43042041239234C100"),
            vec!["P0420", "C0123", "B1234", "U0100"]
        );
    }

    #[test]
    fn test_padding_pairs_skipped() {
        assert_eq!(parse_dtc("43030000000171"), vec!["P0300", "P0171"]);
    }

    #[test]
    fn test_pending_and_permanent_modes() {
        assert_eq!(parse_dtc("470300"), vec!["P0300"]);
        assert_eq!(parse_dtc("4A0442"), vec!["P0442"]);
    }

    #[test]
    fn test_can_header_removed() {
        assert_eq!(parse_dtc("7E804430101"), vec!["P0101"]);
    }

    #[test]
    fn test_malformed_pairs_skipped() {
        assert_eq!(parse_dtc("43ZZ010420"), vec!["P0420"]);
        assert_eq!(parse_dtc("43Z1010420"), vec!["P0420"]);
    }

    #[test]
    fn test_malformed_second_byte_reads_as_zero() {
        // Trailing half pair
        assert_eq!(parse_dtc("4301010"), vec!["P0101", "P0000"]);
        assert_eq!(parse_dtc("430101C"), vec!["P0101", "P0C00"]);
        assert_eq!(parse_dtc("4301XX0420"), vec!["P0100", "P0420"]);
        // Zero first byte with a bad second byte is still a code
        assert_eq!(parse_dtc("4300XX"), vec!["P0000"]);
    }

    #[test]
    fn test_lowercase_input() {
        assert_eq!(parse_dtc("43c100"), vec!["U0100"]);
    }

    #[test]
    fn test_is_no_codes() {
        assert!(is_no_codes("4300"));
        assert!(is_no_codes("430000"));
        assert!(is_no_codes("7E8024300"));
        assert!(!is_no_codes("430043"));
        assert!(!is_no_codes("430101"));
    }

    #[test]
    fn test_has_response_mode() {
        assert!(has_response_mode("430101", "43"));
        assert!(!has_response_mode("NODATA", "47"));
    }

    proptest! {
        #[test]
        fn prop_parse_dtc_total(input in "\\PC{0,48}") {
            for code in parse_dtc(&input) {
                prop_assert_eq!(code.len(), 5);
                prop_assert!("PCBU".contains(&code[0..1]));
            }
        }

        #[test]
        fn prop_codes_in_payload_order(pairs in proptest::collection::vec((1u8..=0xFF, any::<u8>()), 1..6)) {
            let payload: String = pairs.iter().map(|(a, b)| format!("{:02X}{:02X}", a, b)).collect();
            let codes = parse_dtc(&format!("43{}", payload));
            prop_assert_eq!(codes.len(), pairs.len());
        }
    }
}
