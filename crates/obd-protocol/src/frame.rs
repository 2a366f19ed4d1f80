//! ELM327 Frame Codec
//!
//! Turns the raw ASCII text delivered by the adapter into clean hexadecimal
//! strings and encodes outbound commands. Every function here is total:
//! malformed input yields an empty or best-effort result, never an error.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::debug;

/// ELM327 prompt character, sent when the adapter is ready for input
pub const PROMPT: char = '>';

/// Command terminator expected by the ELM327
pub const TERMINATOR: u8 = b'\r';

/// Upper bound on text held by a [`FrameAssembler`] without seeing a prompt
const MAX_PENDING_CHARS: usize = 4096;

/// Normalize raw adapter text into a clean hex string.
///
/// Removes carriage returns, newlines and all other whitespace, the ISO-TP
/// line-number prefixes of multi-frame replies (`0:`, `1:` ... `F:`) and the
/// prompt character.
pub fn normalize(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    let mut clean = String::with_capacity(raw.len());

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_ascii_hexdigit() && chars.get(i + 1) == Some(&':') {
            i += 2;
            continue;
        }
        if !c.is_whitespace() && c != PROMPT {
            clean.push(c);
        }
        i += 1;
    }

    clean
}

/// Encode command text for the write characteristic.
///
/// The result always ends with exactly one carriage return.
pub fn encode_command(text: &str) -> Vec<u8> {
    let mut bytes = text.trim_end_matches(['\r', '\n']).as_bytes().to_vec();
    bytes.push(TERMINATOR);
    bytes
}

/// Base64 form of [`encode_command`], as expected by mobile BLE bindings
pub fn encode_command_base64(text: &str) -> String {
    STANDARD.encode(encode_command(text))
}

/// Decode the payload of one notification into trimmed, upper-cased text
pub fn decode_notification(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_uppercase()
}

/// Decode a base64 notification value as delivered by mobile BLE bindings.
///
/// Returns `None` when the value is not valid base64.
pub fn decode_notification_base64(value: &str) -> Option<String> {
    match STANDARD.decode(value.trim()) {
        Ok(bytes) => Some(decode_notification(&bytes)),
        Err(e) => {
            debug!("Dropping notification with invalid base64: {}", e);
            None
        }
    }
}

/// Parse hex pairs into bytes, stopping at the first pair that is not hex
pub fn hex_to_bytes(hex: &str) -> Vec<u8> {
    hex.as_bytes()
        .chunks(2)
        .map_while(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|s| u8::from_str_radix(s, 16).ok())
        })
        .collect()
}

/// Reassembles replies split across several notifications.
///
/// Text is buffered until the adapter prompt arrives; each prompt closes one
/// frame.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: String,
}

impl FrameAssembler {
    /// Create an empty assembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one notification, returning every frame it completed
    pub fn push(&mut self, fragment: &str) -> Vec<String> {
        self.buffer.push_str(fragment);

        let mut frames = Vec::new();
        while let Some(idx) = self.buffer.find(PROMPT) {
            let frame: String = self.buffer.drain(..=idx).collect();
            let frame = frame.trim_end_matches(PROMPT).trim();
            if !frame.is_empty() {
                frames.push(frame.to_string());
            }
        }

        if self.buffer.len() > MAX_PENDING_CHARS {
            debug!("Discarding {} buffered chars without prompt", self.buffer.len());
            self.buffer.clear();
        }

        frames
    }

    /// Text received since the last prompt
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Drop any partial frame
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalize_strips_prompt_and_whitespace() {
        assert_eq!(normalize("41 0C 1A F8\r\r>"), "410C1AF8");
        assert_eq!(normalize(">"), "");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_normalize_strips_isotp_line_numbers() {
        let raw = "014\r0: 49 02 01 31 47 31\r1: 4A 43 35 34 34 34 52\r2: 37 32 35 32 33 36 37\r\r>";
        assert_eq!(
            normalize(raw),
            "0144902013147314A43353434345237323532333637"
        );
    }

    #[test]
    fn test_normalize_clean_hex_unchanged() {
        assert_eq!(normalize("4101AA"), "4101AA");
    }

    #[test]
    fn test_encode_command_single_terminator() {
        assert_eq!(encode_command("010C"), b"010C\r");
        assert_eq!(encode_command("010C\r"), b"010C\r");
        assert_eq!(encode_command("ATZ\r\r"), b"ATZ\r");
    }

    #[test]
    fn test_base64_helpers() {
        assert_eq!(encode_command_base64("ATZ"), "QVRaDQ==");
        // "41 0c 7b\r>" as sent by an adapter
        assert_eq!(
            decode_notification_base64("NDEgMGMgN2INPg==").as_deref(),
            Some("41 0C 7B\r>")
        );
        assert_eq!(decode_notification_base64("not base64!"), None);
    }

    #[test]
    fn test_hex_to_bytes() {
        assert_eq!(hex_to_bytes("1AF8"), vec![0x1A, 0xF8]);
        assert_eq!(hex_to_bytes("1AZZ03"), vec![0x1A]);
        assert!(hex_to_bytes("").is_empty());
    }

    #[test]
    fn test_assembler_joins_fragments() {
        let mut assembler = FrameAssembler::new();
        assert!(assembler.push("41 0C").is_empty());
        assert_eq!(assembler.pending(), "41 0C");

        let frames = assembler.push(" 1A F8\r\r>");
        assert_eq!(frames, vec!["41 0C 1A F8".to_string()]);
        assert!(assembler.pending().is_empty());
    }

    #[test]
    fn test_assembler_splits_on_each_prompt() {
        let mut assembler = FrameAssembler::new();
        let frames = assembler.push("OK\r>4100BE3EB811\r>41");
        assert_eq!(frames, vec!["OK".to_string(), "4100BE3EB811".to_string()]);
        assert_eq!(assembler.pending(), "41");
    }

    proptest! {
        #[test]
        fn prop_normalize_idempotent_on_clean_hex(hex in "[0-9A-F]{0,64}") {
            prop_assert_eq!(normalize(&hex), hex.clone());
            prop_assert_eq!(normalize(&normalize(&hex)), hex);
        }

        #[test]
        fn prop_normalize_removes_noise(raw in "\\PC{0,64}") {
            let clean = normalize(&raw);
            prop_assert!(!clean.contains(PROMPT));
            prop_assert!(!clean.chars().any(char::is_whitespace));
        }

        #[test]
        fn prop_encode_appends_one_terminator(text in "[ -~]{0,16}", crs in 0usize..3) {
            let input = format!("{}{}", text, "\r".repeat(crs));
            let encoded = encode_command(&input);
            prop_assert_eq!(encoded.last(), Some(&TERMINATOR));
            let body = &encoded[..encoded.len() - 1];
            prop_assert!(!body.ends_with(b"\r"));
        }
    }
}
