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

//! Recorded event replay
//!
//! A development server is more useful when clients see traffic. An
//! [`EventSource`] produces pre-serialized event records and
//! [`spawn_replay`] broadcasts them to authenticated clients at a fixed pace.

use crate::{AmiServer, Result};
use amitest_codec::{AmiCodec, AmiMessage, EVENT};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::codec::Decoder;
use tracing::{debug, info};

/// Producer of broadcast payloads
#[async_trait]
pub trait EventSource: Send {
    /// Next payload to broadcast, or `None` once the source is exhausted
    async fn next_event(&mut self) -> Result<Option<Bytes>>;
}

/// Set of accepted event names
///
/// Names are compared ignoring ASCII case and surrounding whitespace. An
/// empty filter accepts every event.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    accepted: HashSet<String>,
}

impl EventFilter {
    /// Create a filter that accepts every event
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept events named `name`
    pub fn accept(mut self, name: impl AsRef<str>) -> Self {
        self.accepted.insert(normalize(name.as_ref()));
        self
    }

    /// Check whether `record` passes the filter
    ///
    /// Records without an `Event` field never pass.
    pub fn accepts(&self, record: &AmiMessage) -> bool {
        match record.get(EVENT) {
            Some(name) => self.accepted.is_empty() || self.accepted.contains(&normalize(name)),
            None => false,
        }
    }

    /// True if the filter accepts every event
    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for EventFilter {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        iter.into_iter().fold(Self::new(), |filter, name| filter.accept(name))
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

/// In-memory list of recorded events
#[derive(Debug, Clone, Default)]
pub struct RecordedEvents {
    events: Vec<Bytes>,
    position: usize,
    looping: bool,
}

impl RecordedEvents {
    /// Parse a recorded log of `Field: value` blocks separated by blank lines
    pub fn parse(log: &[u8], filter: &EventFilter) -> Result<Self> {
        let mut codec = AmiCodec::with_max_length(log.len() + 2);
        let mut src = BytesMut::with_capacity(log.len() + 2);
        src.extend_from_slice(log);
        // Terminate a trailing record that lacks its blank line
        src.extend_from_slice(b"\n\n");

        let mut events = Vec::new();
        let mut skipped = 0usize;
        while let Some(record) = codec.decode_eof(&mut src)? {
            if filter.accepts(&record) {
                events.push(Bytes::from(record.to_string()));
            } else {
                skipped += 1;
            }
        }

        debug!(events = events.len(), skipped, "Parsed recorded events");
        Ok(Self {
            events,
            position: 0,
            looping: false,
        })
    }

    /// Load a recorded log from disk
    pub async fn from_file(path: impl AsRef<Path>, filter: &EventFilter) -> Result<Self> {
        let path = path.as_ref();
        let log = tokio::fs::read(path).await?;
        let events = Self::parse(&log, filter)?;
        info!(path = %path.display(), events = events.len(), "Loaded recorded events");
        Ok(events)
    }

    /// Start over from the first event once the last one was produced
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Number of recorded events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True if nothing passed the filter
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[async_trait]
impl EventSource for RecordedEvents {
    async fn next_event(&mut self) -> Result<Option<Bytes>> {
        if self.position >= self.events.len() {
            if !self.looping || self.events.is_empty() {
                return Ok(None);
            }
            self.position = 0;
        }

        let event = self.events[self.position].clone();
        self.position += 1;
        Ok(Some(event))
    }
}

/// Broadcast events from `source` every `interval` until it runs dry or the
/// server closes
///
/// The task resolves to the number of events broadcast.
pub fn spawn_replay<S>(server: Arc<AmiServer>, mut source: S, interval: Duration) -> JoinHandle<Result<u64>>
where
    S: EventSource + 'static,
{
    let shutdown = server.shutdown_token();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut sent = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match source.next_event().await? {
                Some(payload) => {
                    server.broadcast(payload);
                    sent += 1;
                }
                None => {
                    debug!(sent, "Event source exhausted");
                    break;
                }
            }
        }

        Ok(sent)
    })
}
