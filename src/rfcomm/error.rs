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

//! RFCOMM session errors.

use std::io;
use thiserror::Error;

/// Errors raised while running an RFCOMM session.
#[derive(Debug, Error)]
pub enum RfcommError {
    /// The peer closed or reset the connection.
    #[error("connection reset by peer")]
    ConnectionReset,

    /// Received bytes do not form an AT message.
    #[error("invalid AT message: {0}")]
    Malformed(String),

    /// A message did not fit into the read buffer.
    #[error("AT message exceeds {0} bytes")]
    MessageTooLong(usize),

    /// The peer rejected a mandatory SLC step.
    #[error("operation not supported by peer")]
    NotSupported,

    /// The SLC procedure did not progress within the retry limit.
    #[error("service level connection timed out")]
    Timeout,

    /// Another session already owns the transport's signal channel.
    #[error("transport signal channel already in use")]
    SignalChannelTaken,

    /// The session task panicked or was aborted.
    #[error("session task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl RfcommError {
    /// Whether the error ends the session.
    ///
    /// Anything else is logged and the session keeps running.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::ConnectionReset
            | Self::NotSupported
            | Self::Timeout
            | Self::SignalChannelTaken
            | Self::Task(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            ),
            Self::Malformed(_) | Self::MessageTooLong(_) => false,
        }
    }
}

/// Result type of RFCOMM operations.
pub type Result<T> = std::result::Result<T, RfcommError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_classification() {
        assert!(RfcommError::ConnectionReset.is_disconnect());
        assert!(RfcommError::NotSupported.is_disconnect());
        assert!(RfcommError::Timeout.is_disconnect());
        assert!(RfcommError::from(io::Error::from(io::ErrorKind::BrokenPipe)).is_disconnect());

        assert!(!RfcommError::Malformed("x".to_string()).is_disconnect());
        assert!(!RfcommError::MessageTooLong(256).is_disconnect());
        assert!(!RfcommError::from(io::Error::from(io::ErrorKind::Other)).is_disconnect());
    }
}
