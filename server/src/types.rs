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

//! Core types for the AMI test server

use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Unique identifier for a connection (monotonically increasing, never reused)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Create a new connection ID
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the underlying u64 value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Authentication state of a connection (stored as atomic u8 for lock-free access)
///
/// Transitions are one-way: `Unauthenticated -> Authenticated -> Closed` or
/// `Unauthenticated -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Connected, login not yet completed
    Unauthenticated = 0,
    /// Login accepted
    Authenticated = 1,
    /// Connection is closed (terminal)
    Closed = 2,
}

impl ConnectionState {
    /// Convert from u8 (for atomic operations)
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Unauthenticated,
            1 => Self::Authenticated,
            _ => Self::Closed,
        }
    }

    /// Convert to u8 (for atomic operations)
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Check if the connection is in the terminal state
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Check if the connection has logged in
    pub fn is_authenticated(self) -> bool {
        matches!(self, Self::Authenticated)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthenticated => write!(f, "unauthenticated"),
            Self::Authenticated => write!(f, "authenticated"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Why a connection was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client closed its side of the socket
    PeerClosed,
    /// The client sent `Logoff`
    Logoff,
    /// Login was attempted with the wrong credentials
    AuthenticationFailed,
    /// The client did not log in before its deadline
    AuthTimeout,
    /// The server is shutting down or closed the client explicitly
    Shutdown,
    /// A read or write on the socket failed
    Error,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::PeerClosed => "peer closed",
            Self::Logoff => "logoff",
            Self::AuthenticationFailed => "authentication failed",
            Self::AuthTimeout => "authentication timeout",
            Self::Shutdown => "shutdown",
            Self::Error => "error",
        };
        f.write_str(reason)
    }
}

/// Connection information snapshot (for non-blocking queries)
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Connection ID
    pub id: ConnectionId,
    /// Current state
    pub state: ConnectionState,
    /// Peer address
    pub peer_addr: SocketAddr,
    /// When the connection was accepted
    pub created_at: Instant,
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Total messages sent
    pub messages_sent: u64,
    /// Total messages received
    pub messages_received: u64,
}

impl ConnectionInfo {
    /// Get the connection duration
    pub fn duration(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Server snapshot for non-blocking debug information
#[derive(Debug, Clone)]
pub struct ServerSnapshot {
    /// Connections that completed login
    pub authenticated: usize,
    /// Connections still waiting for login
    pub unauthenticated: usize,
    /// Total connections accepted since server start
    pub total_connections: u64,
    /// Bound address, if listening
    pub local_addr: Option<SocketAddr>,
    /// Server uptime
    pub uptime: Duration,
}

impl fmt::Display for ServerSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let addr = self
            .local_addr
            .map(|a| a.to_string())
            .unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "AmiServer {{ authenticated: {}, unauthenticated: {}, total: {}, addr: {}, uptime: {:?} }}",
            self.authenticated, self.unauthenticated, self.total_connections, addr, self.uptime
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id() {
        let id1 = ConnectionId::new(1);
        let id2 = ConnectionId::new(2);

        assert_eq!(id1.as_u64(), 1);
        assert_ne!(id1, id2);
        assert!(id1 < id2);
        assert_eq!(id2.to_string(), "conn-2");
    }

    #[test]
    fn test_connection_state_conversion() {
        for state in [
            ConnectionState::Unauthenticated,
            ConnectionState::Authenticated,
            ConnectionState::Closed,
        ] {
            assert_eq!(state, ConnectionState::from_u8(state.as_u8()));
        }
        assert_eq!(ConnectionState::from_u8(200), ConnectionState::Closed);
    }

    #[test]
    fn test_connection_state_predicates() {
        assert!(!ConnectionState::Unauthenticated.is_terminal());
        assert!(!ConnectionState::Authenticated.is_terminal());
        assert!(ConnectionState::Closed.is_terminal());
        assert!(ConnectionState::Authenticated.is_authenticated());
        assert!(!ConnectionState::Unauthenticated.is_authenticated());
    }
}
