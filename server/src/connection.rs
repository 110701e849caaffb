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

//! Per-connection wire adapter
//!
//! An accepted socket is split in two. The read half is owned by a
//! [`WireReader`] which feeds bytes through [`AmiCodec`] and yields complete
//! records to the connection worker. The write half sits behind an
//! [`AmiConnection`], a cheap clonable handle that serializes writes and
//! silently drops anything sent after the connection started closing.

use crate::{ConnectionId, ConnectionInfo, ConnectionState, Result, ServerConfig, ServerError};
use amitest_codec::{AmiCodec, AmiMessage, CodecError};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio_util::codec::{Encoder, FramedRead, FramedWrite};
use tracing::{debug, info, instrument, trace, warn};

/// One unit of outbound traffic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A record serialized by the codec
    Message(AmiMessage),
    /// A plain text line, written followed by CRLF
    Line(String),
}

struct WriterState {
    framed: FramedWrite<OwnedWriteHalf, AmiCodec>,
    shut_down: bool,
}

/// Write side of a client connection
#[derive(Clone)]
pub struct AmiConnection {
    writer: Arc<Mutex<WriterState>>,
    closing: Arc<AtomicBool>,
    state: Arc<AtomicU8>,

    id: ConnectionId,
    peer_addr: SocketAddr,
    created_at: Instant,
    write_timeout: Duration,

    bytes_sent: Arc<AtomicU64>,
    messages_sent: Arc<AtomicU64>,
    messages_received: Arc<AtomicU64>,
}

impl AmiConnection {
    /// Split a TCP stream into a write handle and a record reader
    #[instrument(skip(socket, config), fields(connection_id = %id))]
    pub fn wrap(
        socket: TcpStream,
        id: ConnectionId,
        config: &ServerConfig,
    ) -> Result<(Self, WireReader)> {
        let peer_addr = socket.peer_addr()?;
        let (read_half, write_half) = socket.into_split();

        info!(peer_addr = %peer_addr, "Creating new AMI connection");

        counter!("amitest.connections.total").increment(1);
        gauge!("amitest.connections.active").increment(1.0);

        let messages_received = Arc::new(AtomicU64::new(0));
        let connection = Self {
            writer: Arc::new(Mutex::new(WriterState {
                framed: FramedWrite::new(write_half, AmiCodec::new()),
                shut_down: false,
            })),
            closing: Arc::new(AtomicBool::new(false)),
            state: Arc::new(AtomicU8::new(ConnectionState::Unauthenticated.as_u8())),
            id,
            peer_addr,
            created_at: Instant::now(),
            write_timeout: config.write_timeout,
            bytes_sent: Arc::new(AtomicU64::new(0)),
            messages_sent: Arc::new(AtomicU64::new(0)),
            messages_received: messages_received.clone(),
        };

        let reader = WireReader {
            framed: FramedRead::new(
                read_half,
                AmiCodec::with_max_length(config.max_record_length),
            ),
            id,
            messages_received,
        };

        Ok((connection, reader))
    }

    /// Get the connection ID
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Get the peer address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Get when the connection was accepted
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Current authentication state
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Shared state cell, handed to the connection's session
    pub(crate) fn state_cell(&self) -> Arc<AtomicU8> {
        self.state.clone()
    }

    /// Get bytes sent
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Get messages sent
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    /// Get messages received
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// True once the connection started closing; further writes are dropped
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Snapshot of this connection
    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            state: self.state(),
            peer_addr: self.peer_addr,
            created_at: self.created_at,
            bytes_sent: self.bytes_sent(),
            messages_sent: self.messages_sent(),
            messages_received: self.messages_received(),
        }
    }

    /// Send a record
    pub async fn send(&self, message: &AmiMessage) -> Result<()> {
        let len = message.encoded_len();
        self.write(message, len).await
    }

    /// Send pre-serialized bytes verbatim
    pub async fn send_raw(&self, payload: Bytes) -> Result<()> {
        let len = payload.len();
        self.write(payload, len).await
    }

    /// Send a text line terminated by CRLF
    pub async fn send_line(&self, line: &str) -> Result<()> {
        self.send_raw(Bytes::from(format!("{}\r\n", line))).await
    }

    /// Send any outbound frame
    pub async fn send_frame(&self, frame: &Frame) -> Result<()> {
        match frame {
            Frame::Message(message) => self.send(message).await,
            Frame::Line(line) => self.send_line(line).await,
        }
    }

    #[instrument(skip(self, item), fields(connection_id = %self.id))]
    async fn write<M>(&self, item: M, len: usize) -> Result<()>
    where
        AmiCodec: Encoder<M, Error = CodecError>,
        M: Send,
    {
        if self.is_closing() {
            trace!("Dropping write on closing connection");
            return Ok(());
        }

        let start = Instant::now();
        let mut writer = self.writer.lock().await;
        if writer.shut_down || self.is_closing() {
            trace!("Dropping write on closing connection");
            return Ok(());
        }

        match tokio::time::timeout(self.write_timeout, writer.framed.send(item)).await {
            Ok(Ok(())) => {
                self.messages_sent.fetch_add(1, Ordering::Relaxed);
                self.bytes_sent.fetch_add(len as u64, Ordering::Relaxed);

                counter!("amitest.messages.sent").increment(1);
                histogram!("amitest.message.send_duration").record(start.elapsed().as_secs_f64());
                Ok(())
            }
            Ok(Err(e)) => {
                counter!("amitest.errors.send").increment(1);
                warn!(error = %e, "Failed to write to client");
                Err(e.into())
            }
            Err(_) => {
                counter!("amitest.errors.send").increment(1);
                warn!(timeout = ?self.write_timeout, "Write to client timed out");
                Err(ServerError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "write timed out",
                )))
            }
        }
    }

    /// Stop accepting writes without touching the socket
    ///
    /// Used when the connection must go quiet immediately, before the worker
    /// gets around to closing it.
    pub fn begin_close(&self) {
        self.closing.store(true, Ordering::Release);
    }

    /// Stop accepting writes and shut down the write direction of the socket
    ///
    /// Any write already in progress completes first. Idempotent.
    pub async fn close(&self) {
        self.begin_close();

        let mut writer = self.writer.lock().await;
        if writer.shut_down {
            return;
        }
        writer.shut_down = true;

        if let Err(e) = writer.framed.get_mut().shutdown().await {
            debug!(connection_id = %self.id, error = %e, "Socket shutdown failed");
        }
        gauge!("amitest.connections.active").decrement(1.0);
    }
}

impl std::fmt::Debug for AmiConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmiConnection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state())
            .field("closing", &self.is_closing())
            .finish()
    }
}

/// Read side of a client connection
///
/// Owns the codec buffer; dropping the reader detaches it from the socket.
pub struct WireReader {
    framed: FramedRead<OwnedReadHalf, AmiCodec>,
    id: ConnectionId,
    messages_received: Arc<AtomicU64>,
}

impl WireReader {
    /// Receive the next complete record
    ///
    /// Returns `Ok(None)` once the peer has closed its side. Cancel safe:
    /// partially received records stay buffered in the codec.
    pub async fn next(&mut self) -> Result<Option<AmiMessage>> {
        match self.framed.next().await {
            Some(Ok(message)) => {
                self.messages_received.fetch_add(1, Ordering::Relaxed);
                counter!("amitest.messages.received").increment(1);
                trace!(connection_id = %self.id, action = ?message.action(), "Record received");
                Ok(Some(message))
            }
            Some(Err(e)) => {
                counter!("amitest.errors.receive").increment(1);
                Err(e.into())
            }
            None => {
                debug!(connection_id = %self.id, "Connection stream ended");
                Ok(None)
            }
        }
    }

    /// Bytes buffered for a record that has not been terminated yet
    pub fn buffered(&self) -> usize {
        self.framed.read_buffer().len()
    }
}

impl std::fmt::Debug for WireReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireReader")
            .field("id", &self.id)
            .field("buffered", &self.buffered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client_task = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (server, _) = listener.accept().await.unwrap();
        let client = client_task.await.unwrap();

        (server, client)
    }

    #[tokio::test]
    async fn test_send_writes_wire_format() {
        let (server, mut client) = socket_pair().await;
        let (conn, _reader) =
            AmiConnection::wrap(server, ConnectionId::new(1), &ServerConfig::default()).unwrap();

        conn.send(&AmiMessage::response("Success").with("Ping", "Pong"))
            .await
            .unwrap();
        conn.close().await;

        let mut out = String::new();
        client.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "Response: Success\r\nPing: Pong\r\n\r\n");
        assert_eq!(conn.messages_sent(), 1);
        assert_eq!(conn.bytes_sent(), out.len() as u64);
    }

    #[tokio::test]
    async fn test_writes_after_close_are_dropped() {
        let (server, mut client) = socket_pair().await;
        let (conn, _reader) =
            AmiConnection::wrap(server, ConnectionId::new(2), &ServerConfig::default()).unwrap();

        conn.close().await;
        conn.close().await;
        assert!(conn.is_closing());

        conn.send_line("too late").await.unwrap();
        conn.send_raw(Bytes::from_static(b"Event: Late\r\n\r\n"))
            .await
            .unwrap();

        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        assert!(out.is_empty());
        assert_eq!(conn.messages_sent(), 0);
    }

    #[tokio::test]
    async fn test_begin_close_drops_writes_immediately() {
        let (server, _client) = socket_pair().await;
        let (conn, _reader) =
            AmiConnection::wrap(server, ConnectionId::new(3), &ServerConfig::default()).unwrap();

        conn.begin_close();
        conn.send(&AmiMessage::event("Ignored")).await.unwrap();
        assert_eq!(conn.messages_sent(), 0);
    }

    #[tokio::test]
    async fn test_reader_yields_records_in_order() {
        let (server, mut client) = socket_pair().await;
        let (_conn, mut reader) =
            AmiConnection::wrap(server, ConnectionId::new(4), &ServerConfig::default()).unwrap();

        client
            .write_all(b"Action: Ping\r\nActionID: 1\r\n\r\nAction: Ping\r\nActionID: 2\r\n\r\n")
            .await
            .unwrap();
        drop(client);

        let first = reader.next().await.unwrap().unwrap();
        let second = reader.next().await.unwrap().unwrap();
        assert_eq!(first.action_id(), Some("1"));
        assert_eq!(second.action_id(), Some("2"));
        assert!(reader.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reader_reports_oversized_record() {
        let (server, mut client) = socket_pair().await;
        let config = ServerConfig::default().with_max_record_length(16);
        let (_conn, mut reader) = AmiConnection::wrap(server, ConnectionId::new(5), &config).unwrap();

        client
            .write_all(b"Action: Originate\r\nChannel: Local/1234567890\r\n\r\n")
            .await
            .unwrap();

        let err = reader.next().await.unwrap_err();
        assert!(matches!(err, ServerError::Codec(CodecError::RecordTooLong { .. })));
    }
}
