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

//! AT message reassembly from the RFCOMM byte stream.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use super::error::{Result, RfcommError};
use super::protocol::{AtMessage, ParseError};

/// Capacity of the read buffer. Longer messages are rejected.
pub const AT_BUFFER_SIZE: usize = 256;

/// Turns the RFCOMM byte stream into AT messages, one at a time.
///
/// When a single read delivers several messages, all of them are handed out
/// before the socket is read again.
pub struct MessageReassembler {
    buffer: [u8; AT_BUFFER_SIZE],
    /// Number of valid bytes in the buffer.
    len: usize,
    /// Offset of the next unparsed message.
    next: Option<usize>,
}

impl MessageReassembler {
    /// Create a new message reassembler.
    pub fn new() -> Self {
        Self {
            buffer: [0; AT_BUFFER_SIZE],
            len: 0,
            next: None,
        }
    }

    /// Whether parsed-but-undelivered bytes are waiting.
    pub fn has_pending(&self) -> bool {
        self.next.is_some()
    }

    /// Get current buffer size.
    pub fn buffer_size(&self) -> usize {
        self.len
    }

    /// Reset the reassembler state.
    pub fn reset(&mut self) {
        self.len = 0;
        self.next = None;
    }

    /// Read the next message.
    ///
    /// Pending messages are returned without touching `reader`. `Ok(None)`
    /// means a partial message was buffered and more data is needed.
    ///
    /// Only the socket read is awaited and no state changes before it
    /// completes, so the future may be dropped at any time.
    pub async fn read_message<R>(&mut self, reader: &mut R) -> Result<Option<AtMessage>>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        if self.next.is_none() {
            let n = loop {
                match reader.read(&mut self.buffer[self.len..]).await {
                    Ok(n) => break n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e.into()),
                }
            };

            if n == 0 {
                self.reset();
                return Err(RfcommError::ConnectionReset);
            }

            self.len += n;
            self.next = Some(0);
        }

        self.parse_next()
    }

    /// Parse the next buffered message.
    ///
    /// On a parse failure the buffer is dropped, so the same bytes are never
    /// seen twice.
    pub fn parse_next(&mut self) -> Result<Option<AtMessage>> {
        let Some(start) = self.next.take() else {
            return Ok(None);
        };

        match AtMessage::parse(&self.buffer[start..self.len]) {
            Ok((message, consumed)) => {
                let rest = start + consumed;
                if self.buffer[rest..self.len]
                    .iter()
                    .all(u8::is_ascii_whitespace)
                {
                    self.len = 0;
                } else {
                    self.next = Some(rest);
                }
                Ok(Some(message))
            }
            Err(ParseError::Incomplete) => {
                if self.buffer[start..self.len]
                    .iter()
                    .all(u8::is_ascii_whitespace)
                {
                    self.len = 0;
                } else if start == 0 && self.len == AT_BUFFER_SIZE {
                    self.reset();
                    return Err(RfcommError::MessageTooLong(AT_BUFFER_SIZE));
                } else {
                    self.buffer.copy_within(start..self.len, 0);
                    self.len -= start;
                    debug!("Buffered partial AT message: {} bytes", self.len);
                }
                Ok(None)
            }
            Err(ParseError::Malformed) => {
                let text = String::from_utf8_lossy(&self.buffer[start..self.len]).into_owned();
                self.reset();
                Err(RfcommError::Malformed(text))
            }
        }
    }
}

impl Default for MessageReassembler {
    fn default() -> Self {
        Self::new()
    }
}
