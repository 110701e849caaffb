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

//! Development AMI Server
//!
//! Runs a test server that replays a recorded event log to every client
//! that logs in. Handy for poking at an AMI client by hand.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --example dev_server -- [port] [events.log] [EventA,EventB]
//! ```
//!
//! Log in with `Username: admin` / `Secret: admin`. The optional event list
//! restricts which recorded events are replayed.

use amitest_server::{
    AmiServer, CallbackHandler, Credentials, EventFilter, RecordedEvents, ServerConfig,
    spawn_replay,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let port: u16 = match args.next() {
        Some(port) => port.parse()?,
        None => 5038,
    };
    let events_path = args.next();
    let filter: EventFilter = args
        .next()
        .map(|names| names.split(',').map(str::to_string).collect())
        .unwrap_or_default();

    let config = ServerConfig::default()
        .with_credentials(Credentials::new("admin", "admin"))
        .with_auth_timeout(Duration::from_secs(60))
        .with_max_connections(Some(50))
        .with_banner("Asterisk Call Manager/5.0.1");

    let handler = CallbackHandler {
        on_connection: Some(Box::new(|count| info!(authenticated = count, "Client logged in"))),
        on_close: Some(Box::new(|| info!("Server closed"))),
        ..Default::default()
    };

    let server = Arc::new(AmiServer::new(config, Arc::new(handler)));
    server.listen(port).await?;

    let replay = match events_path {
        Some(path) => {
            let events = RecordedEvents::from_file(&path, &filter).await?.looping(true);
            if events.is_empty() {
                warn!(%path, "No events to replay");
            }
            Some(spawn_replay(server.clone(), events, Duration::from_millis(500)))
        }
        None => None,
    };

    println!("Press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    server.close().await?;
    if let Some(replay) = replay {
        let sent = replay.await??;
        info!(sent, "Replay finished");
    }

    Ok(())
}
