// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! AT message protocol definitions and serialization.

use std::fmt;

use crate::hfp::{Indicator, INDICATOR_MAP_MAX};

/// Kinds of AT messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtType {
    /// Verbatim text, never parsed.
    Raw,
    /// `AT<cmd>`
    Command,
    /// `AT<cmd>?`
    Get,
    /// `AT<cmd>=<value>`
    Set,
    /// `AT<cmd>=?`
    Test,
    /// `<cmd>: <value>` or a bare result code such as `OK`.
    Response,
}

impl AtType {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "RAW",
            Self::Command => "CMD",
            Self::Get => "GET",
            Self::Set => "SET",
            Self::Test => "TEST",
            Self::Response => "RESP",
        }
    }
}

/// A single AT message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtMessage {
    pub kind: AtType,
    /// Command name (upper case), empty for bare result codes.
    pub command: String,
    pub value: Option<String>,
    /// Exact bytes this message was parsed from.
    pub raw: Vec<u8>,
}

/// Why a buffer could not be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// The message terminator has not been received yet.
    Incomplete,
    /// The bytes do not form an AT message.
    Malformed,
}

impl AtMessage {
    /// Create a message for sending.
    pub fn new(kind: AtType, command: impl Into<String>, value: Option<&str>) -> Self {
        let command = command.into();
        let value = value.map(str::to_string);
        let raw = build(kind, &command, value.as_deref());
        Self {
            kind,
            command,
            value,
            raw,
        }
    }

    /// Value of the message, or an empty string.
    pub fn value(&self) -> &str {
        self.value.as_deref().unwrap_or("")
    }

    /// Parse the first message in `buffer`.
    ///
    /// Returns the message and the number of bytes consumed.
    pub fn parse(buffer: &[u8]) -> Result<(Self, usize), ParseError> {
        let start = buffer
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .ok_or(ParseError::Incomplete)?;
        let text = &buffer[start..];

        if text.len() < 2 {
            return Err(ParseError::Incomplete);
        }

        if text[..2].eq_ignore_ascii_case(b"AT") {
            let end = text
                .iter()
                .position(|&b| b == b'\r')
                .ok_or(ParseError::Incomplete)?;
            let line = to_str(&text[2..end])?;
            let mut consumed = start + end + 1;
            if buffer.get(consumed) == Some(&b'\n') {
                consumed += 1;
            }

            let (kind, command, value) = if let Some(command) = line.strip_suffix("=?") {
                (AtType::Test, command, None)
            } else if let Some(command) = line.strip_suffix('?') {
                (AtType::Get, command, None)
            } else if let Some((command, value)) = line.split_once('=') {
                (AtType::Set, command, Some(value))
            } else {
                (AtType::Command, line, None)
            };

            return Ok((
                Self {
                    kind,
                    command: command.trim().to_ascii_uppercase(),
                    value: value.map(str::to_string),
                    raw: buffer[..consumed].to_vec(),
                },
                consumed,
            ));
        }

        let end = text
            .windows(2)
            .position(|w| w == b"\r\n")
            .ok_or(ParseError::Incomplete)?;
        let line = to_str(&text[..end])?;
        let consumed = start + end + 2;

        let (command, value) = match line.split_once(':') {
            Some((command, value)) if command.starts_with('+') => {
                (command.trim().to_ascii_uppercase(), value.trim_start())
            }
            _ => (String::new(), line),
        };

        Ok((
            Self {
                kind: AtType::Response,
                command,
                value: Some(value.to_string()),
                raw: buffer[..consumed].to_vec(),
            },
            consumed,
        ))
    }
}

impl fmt::Display for AtMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: command:{}, value:{}",
            self.kind.as_str(),
            self.command,
            self.value()
        )
    }
}

fn to_str(bytes: &[u8]) -> Result<&str, ParseError> {
    let line = std::str::from_utf8(bytes).map_err(|_| ParseError::Malformed)?;
    if line.chars().any(|c| c.is_control()) {
        return Err(ParseError::Malformed);
    }
    Ok(line)
}

/// Serialize an AT message into its wire form.
pub fn build(kind: AtType, command: &str, value: Option<&str>) -> Vec<u8> {
    let value = value.unwrap_or("");
    let text = match kind {
        AtType::Raw => command.to_string(),
        AtType::Command => format!("AT{}\r", command),
        AtType::Get => format!("AT{}?\r", command),
        AtType::Set => format!("AT{}={}\r", command, value),
        AtType::Test => format!("AT{}=?\r", command),
        AtType::Response if command.is_empty() => format!("\r\n{}\r\n", value),
        AtType::Response => format!("\r\n{}: {}\r\n", command, value),
    };
    text.into_bytes()
}

/// Parse the indicator list of a `+CIND` test response.
///
/// Returns the indicator found at each 1-based wire position (shifted to
/// 0-based), `None` for indicators this engine does not know.
pub fn parse_cind(value: &str) -> Result<Vec<Option<Indicator>>, ParseError> {
    let parts: Vec<&str> = value.split('"').collect();
    // Names sit between quote pairs, so a well-formed list splits oddly.
    if parts.len() < 3 || parts.len() % 2 == 0 {
        return Err(ParseError::Malformed);
    }

    Ok(parts
        .iter()
        .skip(1)
        .step_by(2)
        .take(INDICATOR_MAP_MAX)
        .map(|name| Indicator::parse(name))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(mut buffer: &[u8]) -> Vec<AtMessage> {
        let mut messages = Vec::new();
        while let Ok((message, consumed)) = AtMessage::parse(buffer) {
            messages.push(message);
            buffer = &buffer[consumed..];
        }
        messages
    }

    #[test]
    fn test_parse_commands() {
        let (msg, consumed) = AtMessage::parse(b"AT+BRSF=756\r").unwrap();
        assert_eq!(msg.kind, AtType::Set);
        assert_eq!(msg.command, "+BRSF");
        assert_eq!(msg.value.as_deref(), Some("756"));
        assert_eq!(consumed, 12);

        let (msg, _) = AtMessage::parse(b"at+cind=?\r").unwrap();
        assert_eq!(msg.kind, AtType::Test);
        assert_eq!(msg.command, "+CIND");
        assert_eq!(msg.value, None);

        let (msg, _) = AtMessage::parse(b"AT+CIND?\r").unwrap();
        assert_eq!(msg.kind, AtType::Get);
        assert_eq!(msg.command, "+CIND");

        let (msg, _) = AtMessage::parse(b"ATA\r").unwrap();
        assert_eq!(msg.kind, AtType::Command);
        assert_eq!(msg.command, "A");
    }

    #[test]
    fn test_parse_responses() {
        let (msg, consumed) = AtMessage::parse(b"\r\nOK\r\n").unwrap();
        assert_eq!(msg.kind, AtType::Response);
        assert_eq!(msg.command, "");
        assert_eq!(msg.value(), "OK");
        assert_eq!(consumed, 6);

        let (msg, _) = AtMessage::parse(b"\r\n+CIEV: 2,1\r\n").unwrap();
        assert_eq!(msg.command, "+CIEV");
        assert_eq!(msg.value(), "2,1");

        let (msg, _) = AtMessage::parse(b"\r\n+XAPL=iPhone,2\r\n").unwrap();
        assert_eq!(msg.command, "");
        assert_eq!(msg.value(), "+XAPL=iPhone,2");
    }

    #[test]
    fn test_parse_concatenated() {
        let messages = parse_all(b"\r\n+BRSF: 871\r\n\r\nOK\r\n");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].command, "+BRSF");
        assert_eq!(messages[1].value(), "OK");
        assert_eq!(messages[0].raw, b"\r\n+BRSF: 871\r\n");
        assert_eq!(messages[1].raw, b"\r\nOK\r\n");
    }

    #[test]
    fn test_command_consumes_line_feed() {
        let (msg, consumed) = AtMessage::parse(b"AT+BIA=1\r\nAT+BTRH?\r").unwrap();
        assert_eq!(msg.command, "+BIA");
        assert_eq!(consumed, 10);
    }

    #[test]
    fn test_parse_incomplete() {
        assert_eq!(AtMessage::parse(b""), Err(ParseError::Incomplete));
        assert_eq!(AtMessage::parse(b"\r\n"), Err(ParseError::Incomplete));
        assert_eq!(AtMessage::parse(b"A"), Err(ParseError::Incomplete));
        assert_eq!(AtMessage::parse(b"AT+BRSF=1"), Err(ParseError::Incomplete));
        assert_eq!(AtMessage::parse(b"\r\n+CIEV: 1"), Err(ParseError::Incomplete));
    }

    #[test]
    fn test_parse_malformed() {
        assert_eq!(
            AtMessage::parse(b"\r\n\xff\xfe\r\n"),
            Err(ParseError::Malformed)
        );
        assert_eq!(AtMessage::parse(b"AT+\x01X\r"), Err(ParseError::Malformed));
    }

    #[test]
    fn test_build() {
        assert_eq!(build(AtType::Set, "+BRSF", Some("756")), b"AT+BRSF=756\r");
        assert_eq!(build(AtType::Get, "+CIND", None), b"AT+CIND?\r");
        assert_eq!(build(AtType::Test, "+CIND", None), b"AT+CIND=?\r");
        assert_eq!(build(AtType::Command, "A", None), b"ATA\r");
        assert_eq!(build(AtType::Response, "", Some("OK")), b"\r\nOK\r\n");
        assert_eq!(build(AtType::Response, "+BCS", Some("2")), b"\r\n+BCS: 2\r\n");
        assert_eq!(build(AtType::Raw, "\r\nRING\r\n", None), b"\r\nRING\r\n");
    }

    #[test]
    fn test_parse_cind() {
        let map = parse_cind("(\"call\",(0,1)),(\"battchg\",(0,5))").unwrap();
        assert_eq!(map, vec![Some(Indicator::Call), Some(Indicator::BattChg)]);

        let map = parse_cind(crate::hfp::AG_INDICATORS).unwrap();
        assert_eq!(map.len(), 7);
        assert_eq!(map[5], Some(Indicator::BattChg));

        let map = parse_cind("(\"call\",(0,1)),(\"vendor\",(0,9))").unwrap();
        assert_eq!(map, vec![Some(Indicator::Call), None]);

        assert!(parse_cind("garbage").is_err());
        assert!(parse_cind("(\"call,(0,1))").is_err());
    }
}
