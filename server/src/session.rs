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

//! Authentication session for one connection

use crate::timer::AuthTimer;
use crate::{ConnectionState, Credentials};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::debug;

/// Result of a login attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Credentials matched; the session is now authenticated
    Accepted,
    /// Credentials did not match; the session is closed
    Rejected,
    /// The login deadline passed before the attempt was processed
    Expired,
}

/// Per-connection authentication state machine
///
/// Owns the connection's [`AuthTimer`]. A login attempt first claims the
/// timer; if the deadline already fired the attempt loses and the session is
/// treated as timed out, whatever the credentials were.
#[derive(Debug)]
pub struct AuthSession {
    state: Arc<AtomicU8>,
    timer: AuthTimer,
    credentials: Option<Credentials>,
}

impl AuthSession {
    /// Create a session in the unauthenticated state
    ///
    /// With `credentials` set to `None` any login is accepted.
    pub fn new(state: Arc<AtomicU8>, timer: AuthTimer, credentials: Option<Credentials>) -> Self {
        state.store(ConnectionState::Unauthenticated.as_u8(), Ordering::Release);
        Self {
            state,
            timer,
            credentials,
        }
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Check if login has been accepted and the session is still open
    pub fn is_authenticated(&self) -> bool {
        self.state().is_authenticated()
    }

    /// The session's login deadline
    pub fn timer(&self) -> &AuthTimer {
        &self.timer
    }

    /// Process a login attempt
    ///
    /// Only meaningful while unauthenticated; any other state yields
    /// [`LoginOutcome::Rejected`] without changing anything.
    pub fn login(&self, username: Option<&str>, secret: Option<&str>) -> LoginOutcome {
        if self.state() != ConnectionState::Unauthenticated {
            return LoginOutcome::Rejected;
        }

        if !self.timer.cancel() {
            debug!("Login arrived after the deadline");
            self.set(ConnectionState::Closed);
            return LoginOutcome::Expired;
        }

        let accepted = self
            .credentials
            .as_ref()
            .is_none_or(|credentials| credentials.verify(username, secret));

        if accepted {
            self.transition(ConnectionState::Unauthenticated, ConnectionState::Authenticated);
            LoginOutcome::Accepted
        } else {
            self.set(ConnectionState::Closed);
            LoginOutcome::Rejected
        }
    }

    /// End an authenticated session
    pub fn logoff(&self) {
        self.close();
    }

    /// Close the session from any state
    ///
    /// Cancels the deadline and returns the state the session was in.
    pub fn close(&self) -> ConnectionState {
        self.timer.cancel();
        ConnectionState::from_u8(
            self.state
                .swap(ConnectionState::Closed.as_u8(), Ordering::AcqRel),
        )
    }

    fn set(&self, state: ConnectionState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
