//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Error types for the AMI test server

use crate::types::ConnectionId;
use amitest_codec::CodecError;
use std::net::SocketAddr;
use thiserror::Error;

/// Result type for operations
pub type Result<T> = std::result::Result<T, ServerError>;

/// AMI test server error types
#[derive(Debug, Error)]
pub enum ServerError {
    /// I/O error from the underlying TCP stream
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing error from the codec layer
    #[error("Protocol error: {0}")]
    Codec(#[from] CodecError),

    /// The listening socket could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Requested address
        addr: SocketAddr,
        /// Underlying bind failure
        source: std::io::Error,
    },

    /// A connection was refused because the server is full
    #[error("Maximum connections ({0}) reached")]
    CapacityExceeded(usize),

    /// Login was attempted with credentials that do not match
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// The connection did not log in before its deadline
    #[error("Authentication timed out")]
    AuthTimeout,

    /// A connection id was registered twice
    #[error("Connection {0} is already registered")]
    DuplicateConnection(ConnectionId),

    /// Connection has been closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// `listen` was called on a server that is already accepting
    #[error("Server already running")]
    AlreadyRunning,

    /// Server is not running
    #[error("Server not running")]
    ServerNotRunning,

    /// Configuration failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ServerError {
    /// Check if the error is recoverable
    ///
    /// Recoverable errors affect a single connection; the server keeps running.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ServerError::Io(_)
                | ServerError::Codec(_)
                | ServerError::CapacityExceeded(_)
                | ServerError::AuthenticationFailed
                | ServerError::AuthTimeout
                | ServerError::ConnectionClosed
        )
    }

    /// Check if the error is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            ServerError::ConnectionClosed | ServerError::Io(_) | ServerError::Codec(_)
        )
    }

    /// Check if the error happened while starting the server
    pub fn is_startup_error(&self) -> bool {
        matches!(
            self,
            ServerError::Bind { .. } | ServerError::AlreadyRunning | ServerError::InvalidConfig(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_is_recoverable() {
        assert!(ServerError::AuthTimeout.is_recoverable());
        assert!(ServerError::ConnectionClosed.is_recoverable());
        assert!(ServerError::CapacityExceeded(1).is_recoverable());
        assert!(!ServerError::ServerNotRunning.is_recoverable());
        assert!(!ServerError::AlreadyRunning.is_recoverable());
    }

    #[test]
    fn test_error_is_startup_error() {
        let err = ServerError::Bind {
            addr: "127.0.0.1:5038".parse().unwrap(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        assert!(err.is_startup_error());
        assert!(!ServerError::AuthenticationFailed.is_startup_error());
    }

    #[test]
    fn test_error_display() {
        let err = ServerError::DuplicateConnection(ConnectionId::new(42));
        assert_eq!(err.to_string(), "Connection conn-42 is already registered");

        let err = ServerError::CapacityExceeded(50);
        assert_eq!(err.to_string(), "Maximum connections (50) reached");
    }
}
