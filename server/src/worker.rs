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

//! Connection worker
//!
//! One worker task runs per accepted connection. It owns the connection's
//! read side and session, and is the only task that writes to the socket in
//! response to client input or broadcasts. Records are handled strictly in
//! arrival order and every reply is fully written before the next record or
//! queued broadcast is looked at.

use crate::dispatcher::{ActionDispatcher, Next};
use crate::registry::ClientRegistry;
use crate::session::{AuthSession, LoginOutcome};
use crate::{
    AmiConnection, CloseReason, ConnectionId, Result, ServerError, ServerHandler, ServerMetrics,
    WireReader,
};
use amitest_codec::AmiMessage;
use bytes::Bytes;
use metrics::{counter, histogram};
use std::sync::Arc;
use tokio::select;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Control messages for the worker
#[derive(Debug)]
pub enum ControlMessage {
    /// Write a pre-serialized payload to an authenticated client
    Broadcast(Bytes),
    /// The login deadline passed; close without writing anything
    AuthTimeout,
}

/// Server-wide state every worker needs
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub(crate) dispatcher: Arc<ActionDispatcher>,
    pub(crate) registry: Arc<ClientRegistry>,
    pub(crate) handler: Arc<dyn ServerHandler>,
    pub(crate) metrics: Arc<ServerMetrics>,
}

/// Connection worker that manages a single connection's lifecycle
pub(crate) struct ConnectionWorker {
    id: ConnectionId,
    connection: AmiConnection,
    reader: WireReader,
    session: AuthSession,
    control_rx: mpsc::Receiver<ControlMessage>,
    cancel: CancellationToken,
    ctx: WorkerContext,
}

impl ConnectionWorker {
    /// Create a new connection worker
    pub(crate) fn new(
        connection: AmiConnection,
        reader: WireReader,
        session: AuthSession,
        control_rx: mpsc::Receiver<ControlMessage>,
        cancel: CancellationToken,
        ctx: WorkerContext,
    ) -> Self {
        Self {
            id: connection.id(),
            connection,
            reader,
            session,
            control_rx,
            cancel,
            ctx,
        }
    }

    /// Run the worker until the connection closes
    #[instrument(skip(self), fields(connection_id = %self.id, peer_addr = %self.connection.peer_addr()))]
    pub(crate) async fn run(mut self) {
        let reason = match self.event_loop().await {
            Ok(reason) => reason,
            Err(e) => {
                match &e {
                    ServerError::Codec(codec) if !codec.is_io() => {
                        self.ctx.metrics.protocol_error();
                        warn!(error = %e, "Protocol error");
                    }
                    _ => {
                        self.ctx.metrics.connection_error();
                        debug!(error = %e, "Connection error");
                    }
                }
                self.ctx.handler.on_error(Some(self.id), &e).await;
                CloseReason::Error
            }
        };

        self.cleanup(reason).await;
    }

    async fn event_loop(&mut self) -> Result<CloseReason> {
        loop {
            select! {
                biased;

                _ = self.cancel.cancelled() => {
                    return Ok(CloseReason::Shutdown);
                }

                msg = self.control_rx.recv() => {
                    match msg {
                        Some(ControlMessage::Broadcast(payload)) => {
                            self.connection.send_raw(payload).await?;
                        }
                        Some(ControlMessage::AuthTimeout) => {
                            info!("Client failed to log in before the deadline");
                            return Ok(CloseReason::AuthTimeout);
                        }
                        None => return Ok(CloseReason::Shutdown),
                    }
                }

                record = self.reader.next() => {
                    match record? {
                        Some(record) => {
                            if let Some(reason) = self.handle_record(record).await? {
                                return Ok(reason);
                            }
                        }
                        None => return Ok(CloseReason::PeerClosed),
                    }
                }
            }
        }
    }

    async fn handle_record(&mut self, record: AmiMessage) -> Result<Option<CloseReason>> {
        self.ctx.metrics.message_received();

        let reply = self.ctx.dispatcher.dispatch(&record, &self.session);
        match reply.login {
            Some(LoginOutcome::Accepted) => {
                self.ctx.metrics.login_accepted();
                counter!("amitest.auth.accepted").increment(1);
            }
            Some(LoginOutcome::Rejected) => {
                self.ctx.metrics.login_rejected();
                counter!("amitest.auth.rejected").increment(1);
            }
            _ => {}
        }

        for frame in &reply.frames {
            self.connection.send_frame(frame).await?;
            self.ctx.metrics.message_sent();
        }

        match reply.next {
            Next::Continue => Ok(None),
            Next::Promote => {
                if self.ctx.registry.promote(self.id) {
                    let authenticated = self.ctx.registry.authenticated_count();
                    info!(authenticated, "Client authorized");
                    self.ctx.handler.on_connection(authenticated).await;
                }
                Ok(None)
            }
            Next::Close(reason) => Ok(Some(reason)),
        }
    }

    async fn cleanup(mut self, reason: CloseReason) {
        let previous = self.session.close();
        self.ctx.registry.remove(self.id);
        self.connection.close().await;

        self.control_rx.close();
        while self.control_rx.try_recv().is_ok() {}

        let duration = self.connection.created_at().elapsed();
        self.ctx.metrics.connection_closed(duration);
        histogram!("amitest.connection.duration").record(duration.as_secs_f64());
        if reason == CloseReason::AuthTimeout {
            self.ctx.metrics.auth_timeout();
            counter!("amitest.auth.timeouts").increment(1);
        }

        let failure = match reason {
            CloseReason::AuthenticationFailed => Some(ServerError::AuthenticationFailed),
            CloseReason::AuthTimeout => Some(ServerError::AuthTimeout),
            _ => None,
        };
        if let Some(error) = failure {
            self.ctx.handler.on_error(Some(self.id), &error).await;
        }

        info!(%reason, state = %previous, "Client disconnected");
        self.ctx.handler.on_disconnect(self.id, reason).await;
    }
}
