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

use crate::{AmiMessage, CodecError};
use bytes::{BufMut, Bytes, BytesMut};
use std::mem;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

/// Default upper bound for a single buffered record.
pub const DEFAULT_MAX_LENGTH: usize = 64 * 1024;

const CRLF: &[u8] = b"\r\n";

/// Manager protocol codec
///
/// Decodes a byte stream into [`AmiMessage`] records and encodes records back
/// into `Field: value\r\n` lines terminated by an empty line.
///
/// The decoder is incremental. Records may be split across any number of reads
/// and a single read may carry several records; lines are consumed as soon as
/// they are complete, and the partially assembled record is kept inside the
/// codec until its terminating blank line arrives.
#[derive(Debug, Clone)]
pub struct AmiCodec {
    /// Fields collected for the record currently being assembled
    pending: AmiMessage,
    /// Bytes consumed for the pending record
    pending_len: usize,
    /// Offset into the source buffer already scanned for a line ending
    next_index: usize,
    /// Maximum bytes a single record may occupy
    max_length: usize,
}

impl AmiCodec {
    /// Create a codec with the default record length limit
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_LENGTH)
    }

    /// Create a codec which rejects records longer than `max_length` bytes
    pub fn with_max_length(max_length: usize) -> Self {
        AmiCodec {
            pending: AmiMessage::new(),
            pending_len: 0,
            next_index: 0,
            max_length,
        }
    }

    /// The configured record length limit
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// True if a record has been started but not yet terminated
    pub fn has_partial_record(&self) -> bool {
        !self.pending.is_empty()
    }

    fn too_long(&self) -> CodecError {
        CodecError::RecordTooLong {
            limit: self.max_length,
        }
    }

    fn reset(&mut self) {
        self.pending = AmiMessage::new();
        self.pending_len = 0;
        self.next_index = 0;
    }
}

impl Default for AmiCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

impl Decoder for AmiCodec {
    type Item = AmiMessage;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<AmiMessage>, Self::Error> {
        loop {
            let newline = src[self.next_index..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| self.next_index + offset);

            let Some(newline) = newline else {
                self.next_index = src.len();
                if self.pending_len + src.len() > self.max_length {
                    return Err(self.too_long());
                }
                return Ok(None);
            };

            self.next_index = 0;
            let raw = src.split_to(newline + 1);
            let line = strip_line_ending(&raw);

            if line.is_empty() {
                if self.pending.is_empty() {
                    // Stray separator between records
                    self.pending_len = 0;
                    continue;
                }
                self.pending_len = 0;
                return Ok(Some(mem::take(&mut self.pending)));
            }

            self.pending_len += raw.len();
            if self.pending_len > self.max_length {
                return Err(self.too_long());
            }

            let text = String::from_utf8_lossy(line);
            match text.split_once(':') {
                Some((field, value)) => self.pending.push(field.trim(), value.trim()),
                None => trace!(line = %text, "Ignoring line without field separator"),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<AmiMessage>, Self::Error> {
        if let Some(message) = self.decode(src)? {
            return Ok(Some(message));
        }
        if self.has_partial_record() || !src.is_empty() {
            trace!(
                fields = self.pending.len(),
                trailing = src.len(),
                "Discarding unterminated record at end of stream"
            );
            src.clear();
        }
        self.reset();
        Ok(None)
    }
}

impl Encoder<&AmiMessage> for AmiCodec {
    type Error = CodecError;

    fn encode(&mut self, item: &AmiMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.encoded_len());
        for (field, value) in item.iter() {
            dst.put_slice(field.as_bytes());
            dst.put_slice(b": ");
            dst.put_slice(value.as_bytes());
            dst.put_slice(CRLF);
        }
        dst.put_slice(CRLF);
        Ok(())
    }
}

impl Encoder<AmiMessage> for AmiCodec {
    type Error = CodecError;

    fn encode(&mut self, item: AmiMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        Encoder::<&AmiMessage>::encode(self, &item, dst)
    }
}

/// Pre-serialized payloads are written verbatim.
impl Encoder<Bytes> for AmiCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&item);
        Ok(())
    }
}

impl Encoder<&str> for AmiCodec {
    type Error = CodecError;

    fn encode(&mut self, item: &str, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(item.as_bytes());
        Ok(())
    }
}
