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

//! Lifecycle notifications for code embedding the server

use crate::{CloseReason, ConnectionId, ServerError};
use async_trait::async_trait;
use std::net::SocketAddr;

/// Server notification handler
///
/// Implement this trait to observe the server from test code. All methods
/// have default implementations that do nothing.
///
/// # Example
///
/// ```no_run
/// use amitest_server::ServerHandler;
/// use async_trait::async_trait;
///
/// struct LoginCounter;
///
/// #[async_trait]
/// impl ServerHandler for LoginCounter {
///     async fn on_connection(&self, authenticated: usize) {
///         println!("{} clients logged in", authenticated);
///     }
/// }
/// ```
#[async_trait]
pub trait ServerHandler: Send + Sync + 'static {
    /// Called once the listener is bound
    async fn on_listening(&self, _addr: SocketAddr) {}

    /// Called after each successful login with the new authenticated count
    ///
    /// By the time this runs the client has received its login response and
    /// is eligible for broadcasts.
    async fn on_connection(&self, _authenticated: usize) {}

    /// Called when a client connection ends, for any reason
    async fn on_disconnect(&self, _id: ConnectionId, _reason: CloseReason) {}

    /// Called on a socket level error or a failed login
    ///
    /// `id` is `None` for errors on the listening socket. The server keeps
    /// running; an affected connection is closed after this returns.
    /// Rejected credentials and missed login deadlines arrive as
    /// [`ServerError::AuthenticationFailed`] and [`ServerError::AuthTimeout`].
    async fn on_error(&self, _id: Option<ConnectionId>, _error: &ServerError) {}

    /// Called once the server has shut down
    async fn on_close(&self) {}
}

/// Handler that ignores every notification
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

impl ServerHandler for NoopHandler {}

/// Callback-based handler implementation
///
/// Lets tests observe the server with closures instead of implementing
/// [`ServerHandler`].
///
/// # Example
///
/// ```no_run
/// use amitest_server::CallbackHandler;
///
/// let handler = CallbackHandler {
///     on_connection: Some(Box::new(|count| println!("{} logged in", count))),
///     ..Default::default()
/// };
/// ```
#[derive(Default)]
pub struct CallbackHandler {
    /// Called once the listener is bound
    pub on_listening: Option<Box<dyn Fn(SocketAddr) + Send + Sync + 'static>>,
    /// Called after each successful login
    pub on_connection: Option<Box<dyn Fn(usize) + Send + Sync + 'static>>,
    /// Called when a client connection ends
    pub on_disconnect: Option<Box<dyn Fn(ConnectionId, CloseReason) + Send + Sync + 'static>>,
    /// Called on error
    pub on_error: Option<Box<dyn Fn(Option<ConnectionId>, &ServerError) + Send + Sync + 'static>>,
    /// Called on shutdown
    pub on_close: Option<Box<dyn Fn() + Send + Sync + 'static>>,
}

#[async_trait]
impl ServerHandler for CallbackHandler {
    async fn on_listening(&self, addr: SocketAddr) {
        if let Some(ref f) = self.on_listening {
            f(addr);
        }
    }

    async fn on_connection(&self, authenticated: usize) {
        if let Some(ref f) = self.on_connection {
            f(authenticated);
        }
    }

    async fn on_disconnect(&self, id: ConnectionId, reason: CloseReason) {
        if let Some(ref f) = self.on_disconnect {
            f(id, reason);
        }
    }

    async fn on_error(&self, id: Option<ConnectionId>, error: &ServerError) {
        if let Some(ref f) = self.on_error {
            f(id, error);
        }
    }

    async fn on_close(&self) {
        if let Some(ref f) = self.on_close {
            f();
        }
    }
}

impl std::fmt::Debug for CallbackHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackHandler")
            .field("on_listening", &self.on_listening.is_some())
            .field("on_connection", &self.on_connection.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_close", &self.on_close.is_some())
            .finish()
    }
}
