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

//! Loopback client and handler shared by the integration tests

#![allow(dead_code)]

use amitest_server::{AmiServer, CloseReason, ConnectionId, ServerConfig, ServerError, ServerHandler};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

pub const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Handler that records every notification
#[derive(Default)]
pub struct TrackingHandler {
    pub listening: AtomicUsize,
    pub last_authenticated: AtomicUsize,
    pub logins: AtomicUsize,
    pub errors: AtomicUsize,
    pub closes: AtomicUsize,
    pub disconnects: Mutex<Vec<(ConnectionId, CloseReason)>>,
    pub error_messages: Mutex<Vec<String>>,
}

impl TrackingHandler {
    pub fn disconnect_reasons(&self) -> Vec<CloseReason> {
        self.disconnects
            .lock()
            .unwrap()
            .iter()
            .map(|(_, reason)| *reason)
            .collect()
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.error_messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl ServerHandler for TrackingHandler {
    async fn on_listening(&self, _addr: SocketAddr) {
        self.listening.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_connection(&self, authenticated: usize) {
        self.last_authenticated.store(authenticated, Ordering::SeqCst);
        self.logins.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_disconnect(&self, id: ConnectionId, reason: CloseReason) {
        self.disconnects.lock().unwrap().push((id, reason));
    }

    async fn on_error(&self, _id: Option<ConnectionId>, error: &ServerError) {
        self.error_messages.lock().unwrap().push(error.to_string());
        self.errors.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Start a server on an ephemeral port
pub async fn start(config: ServerConfig) -> (Arc<AmiServer>, Arc<TrackingHandler>, SocketAddr) {
    let handler = Arc::new(TrackingHandler::default());
    let server = Arc::new(AmiServer::new(
        config.with_shutdown_timeout(Duration::from_secs(1)),
        handler.clone(),
    ));
    let addr = server.listen(0).await.unwrap();
    (server, handler, addr)
}

/// Poll `condition` until it holds or two seconds pass
pub async fn wait_for(condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + READ_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Raw text client
pub struct TestClient {
    stream: BufReader<TcpStream>,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self {
            stream: BufReader::new(stream),
        }
    }

    pub async fn send(&mut self, text: &str) {
        self.stream.get_mut().write_all(text.as_bytes()).await.unwrap();
        self.stream.get_mut().flush().await.unwrap();
    }

    pub async fn login(&mut self, username: &str, secret: &str) -> String {
        self.send(&format!(
            "Action: Login\r\nUsername: {}\r\nSecret: {}\r\n\r\n",
            username, secret
        ))
        .await;
        self.read_record().await
    }

    /// Read one line including its CRLF
    pub async fn read_line(&mut self) -> String {
        let mut line = String::new();
        let read = tokio::time::timeout(READ_TIMEOUT, self.stream.read_line(&mut line))
            .await
            .expect("timed out waiting for a line")
            .unwrap();
        assert!(read > 0, "connection closed while waiting for a line");
        line
    }

    /// Read one record including its terminating blank line
    pub async fn read_record(&mut self) -> String {
        let mut record = String::new();
        loop {
            let line = self.read_line().await;
            let blank = line == "\r\n";
            record.push_str(&line);
            if blank {
                return record;
            }
        }
    }

    /// Wait for the server to close the connection; returns any bytes left
    pub async fn read_to_close(&mut self) -> String {
        let mut rest = Vec::new();
        let _ = tokio::time::timeout(READ_TIMEOUT, self.stream.read_to_end(&mut rest))
            .await
            .expect("server did not close the connection");
        String::from_utf8_lossy(&rest).into_owned()
    }

    /// Check that nothing arrives within `window`
    pub async fn expect_silence(&mut self, window: Duration) {
        let mut buf = [0u8; 1];
        if let Ok(read) = tokio::time::timeout(window, self.stream.read(&mut buf)).await {
            panic!("expected silence, got {:?}", read);
        }
    }
}
