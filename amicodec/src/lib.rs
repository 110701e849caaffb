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

//! # Asterisk Manager Interface Codec
//!
//! This crate frames the line-oriented manager protocol spoken by Asterisk's AMI.
//! Every action, response and event is a block of `Field: value` lines terminated
//! by CRLF, with an empty line marking the end of the block:
//!
//! ```text
//! Action: Login\r\n
//! Username: admin\r\n
//! Secret: secret\r\n
//! \r\n
//! ```
//!
//! ## Core Components
//!
//! ### [`AmiMessage`]
//!
//! An ordered list of fields with case-insensitive lookup, used for inbound
//! actions as well as outbound responses and events.
//!
//! ### [`AmiCodec`]
//!
//! Implements [`Decoder`](tokio_util::codec::Decoder) and
//! [`Encoder`](tokio_util::codec::Encoder) from `tokio_util::codec`, so it
//! can be plugged into `Framed`, `FramedRead` or `FramedWrite`.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use amitest_codec::{AmiCodec, AmiMessage};
//! use futures_util::{SinkExt, StreamExt};
//! use tokio::net::TcpStream;
//! use tokio_util::codec::Framed;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let stream = TcpStream::connect("127.0.0.1:5038").await?;
//! let mut framed = Framed::new(stream, AmiCodec::new());
//!
//! framed.send(AmiMessage::action_named("Ping").with("ActionID", "1")).await?;
//! if let Some(response) = framed.next().await {
//!     println!("{}", response?);
//! }
//! # Ok(())
//! # }
//! ```

mod codec;
mod message;
mod result;

pub use codec::{AmiCodec, DEFAULT_MAX_LENGTH};
pub use message::{ACTION, ACTION_ID, AmiMessage, EVENT, MESSAGE, RESPONSE, SECRET, USERNAME};
pub use result::{CodecError, CodecResult};
