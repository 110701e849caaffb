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

//! Client registry
//!
//! Tracks every live connection in one of two partitions, unauthenticated or
//! authenticated. A connection id appears in exactly one partition at a time;
//! both partitions live in the same map, so moving a client between them is a
//! single in-place update under the map's shard lock.

use crate::timer::AuthTimer;
use crate::worker::ControlMessage;
use crate::{AmiConnection, ConnectionId, ConnectionInfo, Result, ServerError};
use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Which partition a registered client lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    /// Connected, login pending
    Unauthenticated,
    /// Logged in, receives broadcasts
    Authenticated,
}

/// Handle to a registered client
///
/// Cloning the handle is cheap; every clone talks to the same worker.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    connection: AmiConnection,
    control_tx: mpsc::Sender<ControlMessage>,
    timer: AuthTimer,
    cancel: CancellationToken,
}

impl ClientHandle {
    pub(crate) fn new(
        connection: AmiConnection,
        control_tx: mpsc::Sender<ControlMessage>,
        timer: AuthTimer,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            connection,
            control_tx,
            timer,
            cancel,
        }
    }

    /// Connection id
    pub fn id(&self) -> ConnectionId {
        self.connection.id()
    }

    /// Write side of the connection
    pub fn connection(&self) -> &AmiConnection {
        &self.connection
    }

    /// Snapshot of the connection
    pub fn info(&self) -> ConnectionInfo {
        self.connection.info()
    }

    /// Queue a pre-serialized payload for the client's worker
    ///
    /// Never waits: a full queue or a finished worker is reported as an error.
    pub fn try_broadcast(&self, payload: Bytes) -> Result<()> {
        match self.control_tx.try_send(ControlMessage::Broadcast(payload)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                trace!(connection_id = %self.id(), "Control queue full, dropping broadcast");
                Err(ServerError::Io(std::io::Error::new(
                    std::io::ErrorKind::WouldBlock,
                    "client queue full",
                )))
            }
            Err(TrySendError::Closed(_)) => Err(ServerError::ConnectionClosed),
        }
    }

    /// Cancel the client's login deadline
    pub fn cancel_timer(&self) -> bool {
        self.timer.cancel()
    }

    /// Ask the client's worker to close the connection
    pub fn close(&self) {
        self.connection.begin_close();
        self.cancel.cancel();
    }
}

#[derive(Debug)]
struct RegistryEntry {
    handle: ClientHandle,
    partition: Partition,
}

/// Registry of live client connections
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: DashMap<ConnectionId, RegistryEntry>,
}

impl ClientRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
        }
    }

    /// Register a freshly accepted connection as unauthenticated
    pub fn add_unauthenticated(&self, id: ConnectionId, handle: ClientHandle) -> Result<()> {
        match self.clients.entry(id) {
            Entry::Occupied(_) => Err(ServerError::DuplicateConnection(id)),
            Entry::Vacant(slot) => {
                slot.insert(RegistryEntry {
                    handle,
                    partition: Partition::Unauthenticated,
                });
                trace!(connection_id = %id, "Client registered");
                Ok(())
            }
        }
    }

    /// Move a client into the authenticated partition
    ///
    /// Returns `false` if the client is not registered.
    pub fn promote(&self, id: ConnectionId) -> bool {
        match self.clients.get_mut(&id) {
            Some(mut entry) => {
                entry.partition = Partition::Authenticated;
                debug!(connection_id = %id, "Client promoted");
                true
            }
            None => false,
        }
    }

    /// Remove a client from whichever partition holds it
    pub fn remove(&self, id: ConnectionId) -> Option<ClientHandle> {
        self.clients.remove(&id).map(|(_, entry)| {
            trace!(connection_id = %id, partition = ?entry.partition, "Client removed");
            entry.handle
        })
    }

    /// Check if a client is registered
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.clients.contains_key(&id)
    }

    /// Partition currently holding the client
    pub fn partition_of(&self, id: ConnectionId) -> Option<Partition> {
        self.clients.get(&id).map(|entry| entry.partition)
    }

    /// Look up a client
    pub fn get(&self, id: ConnectionId) -> Option<ClientHandle> {
        self.clients.get(&id).map(|entry| entry.handle.clone())
    }

    /// Total registered clients across both partitions
    pub fn count(&self) -> usize {
        self.clients.len()
    }

    /// Registered clients that have logged in
    pub fn authenticated_count(&self) -> usize {
        self.count_in(Partition::Authenticated)
    }

    /// Registered clients still waiting to log in
    pub fn unauthenticated_count(&self) -> usize {
        self.count_in(Partition::Unauthenticated)
    }

    /// True if no clients are registered
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Snapshot of the authenticated partition
    pub fn authenticated_list(&self) -> Vec<ClientHandle> {
        self.list_in(Some(Partition::Authenticated))
    }

    /// Snapshot of the unauthenticated partition
    pub fn unauthenticated_list(&self) -> Vec<ClientHandle> {
        self.list_in(Some(Partition::Unauthenticated))
    }

    /// Snapshot of every registered client
    pub fn all_list(&self) -> Vec<ClientHandle> {
        self.list_in(None)
    }

    /// Drop every registration
    pub fn clear(&self) {
        self.clients.clear();
    }

    fn count_in(&self, partition: Partition) -> usize {
        self.clients
            .iter()
            .filter(|entry| entry.partition == partition)
            .count()
    }

    fn list_in(&self, partition: Option<Partition>) -> Vec<ClientHandle> {
        self.clients
            .iter()
            .filter(|entry| partition.is_none_or(|p| entry.partition == p))
            .map(|entry| entry.handle.clone())
            .collect()
    }
}
