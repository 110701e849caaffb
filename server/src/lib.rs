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

//! Asterisk Manager Interface Test Server
//!
//! An in-process stand-in for an Asterisk manager port, meant for testing
//! AMI clients. It speaks just enough of the protocol for a client to log
//! in, keep the session alive with `Ping`, log off and receive events:
//!
//! - `Login` is checked against an optional credential pair
//! - unauthenticated connections are dropped after a deadline
//! - `Ping` answers before and after login
//! - broadcasts reach authenticated clients only
//! - the number of simultaneous connections can be capped
//!
//! # Architecture
//!
//! ```text
//! AmiServer (accept loop, capacity, broadcast, close)
//!     ↓
//! ClientRegistry (unauthenticated / authenticated partitions)
//!     ↓
//! ConnectionWorker → AuthSession + AuthTimer
//!     ↓                ↓
//! WireReader      ActionDispatcher → AmiConnection
//! ```
//!
//! # Example
//!
//! ```no_run
//! use amitest_server::{AmiServer, CallbackHandler, Credentials, ServerConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default()
//!         .with_credentials(Credentials::new("test", "test"))
//!         .with_auth_timeout(Duration::from_secs(30));
//!
//!     let handler = CallbackHandler {
//!         on_connection: Some(Box::new(|count| println!("{} clients logged in", count))),
//!         ..Default::default()
//!     };
//!
//!     let server = AmiServer::new(config, Arc::new(handler));
//!     server.listen(5038).await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.close().await?;
//!     Ok(())
//! }
//! ```

mod config;
mod connection;
mod dispatcher;
mod error;
mod handler;
mod metrics;
mod registry;
mod server;
mod session;
mod source;
mod timer;
mod types;
mod worker;

pub use config::{Credentials, ServerConfig};
pub use connection::{AmiConnection, Frame, WireReader};
pub use dispatcher::{ActionDispatcher, ActionKind, Next, Reply, timestamp};
pub use error::{Result, ServerError};
pub use handler::{CallbackHandler, NoopHandler, ServerHandler};
pub use metrics::{MetricsSnapshot, ServerMetrics};
pub use registry::{ClientHandle, ClientRegistry, Partition};
pub use server::{AmiServer, BroadcastResult};
pub use session::{AuthSession, LoginOutcome};
pub use source::{EventFilter, EventSource, RecordedEvents, spawn_replay};
pub use timer::{AuthTimer, TimerStatus};
pub use types::{CloseReason, ConnectionId, ConnectionInfo, ConnectionState, ServerSnapshot};
pub use worker::ControlMessage;
