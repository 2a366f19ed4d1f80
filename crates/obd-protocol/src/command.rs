//! Adapter Commands and Response Matching

use crate::at;
use crate::error::ObdError;
use crate::frame;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;

/// Range of 11-bit diagnostic CAN headers
pub const DIAGNOSTIC_HEADERS: RangeInclusive<u16> = 0x700..=0x7FF;

/// Predicate a notification must satisfy to answer a pending command
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResponseMatcher {
    /// Any payload longer than one character
    #[default]
    Any,
    /// Payload starting with the given text
    Prefix(String),
    /// Payload of at least the given length
    MinLength(usize),
}

impl ResponseMatcher {
    /// Check a normalized payload against this matcher
    pub fn matches(&self, payload: &str) -> bool {
        match self {
            ResponseMatcher::Any => payload.len() > 1,
            ResponseMatcher::Prefix(prefix) => payload.starts_with(prefix.as_str()),
            ResponseMatcher::MinLength(len) => payload.len() >= *len,
        }
    }
}

/// One command for the adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    text: String,
    expects_response: bool,
    matcher: ResponseMatcher,
    timeout: Option<Duration>,
}

impl Command {
    /// Create a command that waits for any response with the default timeout
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            expects_response: true,
            matcher: ResponseMatcher::Any,
            timeout: None,
        }
    }

    /// Create a command from user-supplied text, rejecting anything the
    /// adapter cannot take as one line
    pub fn parse(text: &str) -> Result<Self, ObdError> {
        let trimmed = text.trim();
        let valid = !trimmed.is_empty()
            && trimmed.bytes().all(|b| b.is_ascii_graphic() || b == b' ');
        if !valid {
            return Err(ObdError::InvalidCommand(text.to_string()));
        }
        Ok(Self::new(trimmed.to_ascii_uppercase()))
    }

    /// `ATSH` command selecting the CAN transmit header
    pub fn set_header(header: ModuleHeader) -> Self {
        Self::new(format!("{}{}", at::SET_HEADER, header))
    }

    /// Set the response timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the response matcher
    pub fn with_matcher(mut self, matcher: ResponseMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    /// Do not wait for a response after transmitting
    pub fn without_response(mut self) -> Self {
        self.expects_response = false;
        self
    }

    /// Command text without terminator
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Whether the sender waits for a matching notification
    pub fn expects_response(&self) -> bool {
        self.expects_response
    }

    /// Matcher for the response
    pub fn matcher(&self) -> &ResponseMatcher {
        &self.matcher
    }

    /// Explicit timeout, if any
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Bytes to write to the adapter
    pub fn encode(&self) -> Vec<u8> {
        frame::encode_command(&self.text)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Outcome of a dispatched command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Response {
    /// Normalized payload of the matching notification
    Payload(String),
    /// No matching notification arrived in time
    Timeout,
    /// Sent without waiting for a response
    Acknowledged,
}

impl Response {
    /// Payload text, if a matching notification arrived
    pub fn payload(&self) -> Option<&str> {
        match self {
            Response::Payload(payload) => Some(payload),
            _ => None,
        }
    }

    /// Whether this is the timeout sentinel
    pub fn is_timeout(&self) -> bool {
        matches!(self, Response::Timeout)
    }
}

/// 11-bit CAN header of a diagnostic module (0x700..=0x7FF)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleHeader(u16);

impl ModuleHeader {
    /// Header of the primary engine ECU
    pub const ENGINE: ModuleHeader = ModuleHeader(0x7E0);
    /// Lowest diagnostic header
    pub const FIRST: ModuleHeader = ModuleHeader(0x700);
    /// Highest diagnostic header
    pub const LAST: ModuleHeader = ModuleHeader(0x7FF);

    /// Create a header, checking the diagnostic range
    pub fn new(raw: u16) -> Result<Self, ObdError> {
        if DIAGNOSTIC_HEADERS.contains(&raw) {
            Ok(Self(raw))
        } else {
            Err(ObdError::InvalidHeader(format!("{:X}", raw)))
        }
    }

    /// Raw header value
    pub fn value(&self) -> u16 {
        self.0
    }

    /// Every header from `first` to `last`, inclusive
    pub fn sweep(first: ModuleHeader, last: ModuleHeader) -> impl Iterator<Item = ModuleHeader> {
        (first.0..=last.0).map(ModuleHeader)
    }
}

impl FromStr for ModuleHeader {
    type Err = ObdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = u16::from_str_radix(s.trim(), 16)
            .map_err(|_| ObdError::InvalidHeader(s.to_string()))?;
        Self::new(raw).map_err(|_| ObdError::InvalidHeader(s.to_string()))
    }
}

impl fmt::Display for ModuleHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03X}", self.0)
    }
}

impl Serialize for ModuleHeader {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ModuleHeader {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matcher() {
        let matcher = ResponseMatcher::default();
        assert!(matcher.matches("OK"));
        assert!(!matcher.matches(">"));
        assert!(!matcher.matches(""));
    }

    #[test]
    fn test_prefix_and_length_matchers() {
        let prefix = ResponseMatcher::Prefix("410C".to_string());
        assert!(prefix.matches("410C1AF8"));
        assert!(!prefix.matches("410D55"));

        let length = ResponseMatcher::MinLength(6);
        assert!(length.matches("4100BE"));
        assert!(!length.matches("4100"));
    }

    #[test]
    fn test_command_builder() {
        let cmd = Command::new("0100")
            .with_timeout(Duration::from_millis(400))
            .with_matcher(ResponseMatcher::Prefix("41".into()));
        assert_eq!(cmd.text(), "0100");
        assert!(cmd.expects_response());
        assert_eq!(cmd.timeout(), Some(Duration::from_millis(400)));
        assert_eq!(cmd.encode(), b"0100\r");

        let cmd = Command::new("ATE0").without_response();
        assert!(!cmd.expects_response());
        assert_eq!(cmd.timeout(), None);
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(Command::parse(" 010c ").unwrap().text(), "010C");
        assert!(Command::parse("").is_err());
        assert!(Command::parse("01\r0C").is_err());
    }

    #[test]
    fn test_set_header_command() {
        let header: ModuleHeader = "7e0".parse().unwrap();
        assert_eq!(Command::set_header(header).text(), "ATSH7E0");
        assert_eq!(header, ModuleHeader::ENGINE);
    }

    #[test]
    fn test_header_range() {
        assert!(ModuleHeader::new(0x6FF).is_err());
        assert!(ModuleHeader::new(0x800).is_err());
        assert!("XYZ".parse::<ModuleHeader>().is_err());
        assert_eq!(ModuleHeader::new(0x700).unwrap().to_string(), "700");
    }

    #[test]
    fn test_header_sweep() {
        let headers: Vec<_> = ModuleHeader::sweep(ModuleHeader::FIRST, ModuleHeader::LAST).collect();
        assert_eq!(headers.len(), 256);
        assert_eq!(headers[255].to_string(), "7FF");
    }

    #[test]
    fn test_response_helpers() {
        assert_eq!(Response::Payload("41".into()).payload(), Some("41"));
        assert!(Response::Timeout.is_timeout());
        assert_eq!(Response::Acknowledged.payload(), None);
    }
}
