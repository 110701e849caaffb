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

//! Action dispatch
//!
//! Maps one inbound record plus the connection's session state to the
//! frames that must be written back and what happens to the connection
//! afterwards. Dispatch performs no I/O; the connection worker writes the
//! frames in order and then applies [`Next`].

use crate::session::{AuthSession, LoginOutcome};
use crate::{CloseReason, ConnectionState, Frame};
use amitest_codec::{AmiMessage, MESSAGE, SECRET, USERNAME};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, trace};

/// Action vocabulary understood by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// No `Action` field, or an empty one
    Missing,
    /// An action name outside the vocabulary
    Unknown,
    /// `Ping`
    Ping,
    /// `Login`
    Login,
    /// `Logoff`
    Logoff,
}

impl ActionKind {
    /// Classify a record by its action name, ignoring case
    pub fn classify(record: &AmiMessage) -> Self {
        match record.action().map(str::trim) {
            None | Some("") => Self::Missing,
            Some(name) if name.eq_ignore_ascii_case("ping") => Self::Ping,
            Some(name) if name.eq_ignore_ascii_case("login") => Self::Login,
            Some(name) if name.eq_ignore_ascii_case("logoff") => Self::Logoff,
            Some(_) => Self::Unknown,
        }
    }
}

/// What the worker does with the connection after writing a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    /// Keep reading
    Continue,
    /// Move the connection into the authenticated partition
    Promote,
    /// Close the connection
    Close(CloseReason),
}

/// Outcome of dispatching one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Frames to write, in order
    pub frames: Vec<Frame>,
    /// Follow-up action
    pub next: Next,
    /// Login result, when the record was a login attempt
    pub login: Option<LoginOutcome>,
}

impl Reply {
    fn respond(message: AmiMessage) -> Self {
        Self {
            frames: vec![Frame::Message(message)],
            next: Next::Continue,
            login: None,
        }
    }

    fn then(mut self, next: Next) -> Self {
        self.next = next;
        self
    }
}

/// Stateless action router
#[derive(Debug, Clone, Default)]
pub struct ActionDispatcher {
    banner: Option<String>,
}

impl ActionDispatcher {
    /// Create a dispatcher which writes `banner` after every accepted login
    pub fn new(banner: Option<String>) -> Self {
        Self { banner }
    }

    /// Decide the reply to `record` for a connection in `session`'s state
    ///
    /// Login attempts are applied to the session as part of dispatch.
    pub fn dispatch(&self, record: &AmiMessage, session: &AuthSession) -> Reply {
        let kind = ActionKind::classify(record);
        let state = session.state();
        let action_id = record.action_id();

        trace!(?kind, %state, action_id, "Dispatching action");

        match (kind, state) {
            (ActionKind::Missing, _) => Reply::respond(error(action_id, "Missing action in request")),
            (ActionKind::Unknown, _) => Reply::respond(unknown(action_id)),
            (ActionKind::Ping, _) => Reply::respond(pong(action_id)),
            (ActionKind::Login, ConnectionState::Unauthenticated) => {
                self.login(record, session, action_id)
            }
            (ActionKind::Logoff, ConnectionState::Authenticated) => {
                session.logoff();
                Reply::respond(
                    AmiMessage::response("Goodbye")
                        .with(MESSAGE, "Thanks for all the fish.")
                        .with_action_id(action_id),
                )
                .then(Next::Close(CloseReason::Logoff))
            }
            (ActionKind::Login | ActionKind::Logoff, _) => Reply::respond(unknown(action_id)),
        }
    }

    fn login(&self, record: &AmiMessage, session: &AuthSession, action_id: Option<&str>) -> Reply {
        let outcome = session.login(record.get(USERNAME), record.get(SECRET));
        debug!(?outcome, username = record.get(USERNAME), "Login attempt");

        let reply = match outcome {
            LoginOutcome::Accepted => {
                let mut frames = vec![
                    Frame::Message(
                        AmiMessage::response("Success")
                            .with(MESSAGE, "Authentication accepted")
                            .with_action_id(action_id),
                    ),
                    Frame::Message(
                        AmiMessage::event("FullyBooted")
                            .with("Privilege", "system,all")
                            .with("Status", "Fully Booted"),
                    ),
                ];
                if let Some(banner) = &self.banner {
                    frames.push(Frame::Line(banner.clone()));
                }
                Reply {
                    frames,
                    next: Next::Promote,
                    login: None,
                }
            }
            LoginOutcome::Rejected => Reply::respond(error(action_id, "Authentication failed"))
                .then(Next::Close(CloseReason::AuthenticationFailed)),
            LoginOutcome::Expired => Reply {
                frames: Vec::new(),
                next: Next::Close(CloseReason::AuthTimeout),
                login: None,
            },
        };

        Reply {
            login: Some(outcome),
            ..reply
        }
    }
}

fn error(action_id: Option<&str>, message: &str) -> AmiMessage {
    AmiMessage::response("Error")
        .with(MESSAGE, message)
        .with_action_id(action_id)
}

fn unknown(action_id: Option<&str>) -> AmiMessage {
    error(action_id, "Invalid/unknown command")
}

fn pong(action_id: Option<&str>) -> AmiMessage {
    AmiMessage::response("Success")
        .with("Ping", "Pong")
        .with("Timestamp", timestamp())
        .with_action_id(action_id)
}

/// Current time as epoch seconds with a microsecond fraction
pub fn timestamp() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}.{:06}", now.as_secs(), now.subsec_micros())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Credentials;
    use crate::timer::AuthTimer;
    use std::sync::Arc;
    use std::sync::atomic::AtomicU8;
    use std::time::Duration;

    fn session(credentials: Option<Credentials>) -> AuthSession {
        let timer = AuthTimer::arm(Duration::from_secs(30), || {});
        AuthSession::new(Arc::new(AtomicU8::new(0)), timer, credentials)
    }

    fn record(fields: &[(&str, &str)]) -> AmiMessage {
        fields.iter().copied().collect()
    }

    fn only_message(reply: &Reply) -> &AmiMessage {
        assert_eq!(reply.frames.len(), 1);
        match &reply.frames[0] {
            Frame::Message(message) => message,
            other => panic!("expected a record, got {:?}", other),
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(ActionKind::classify(&record(&[])), ActionKind::Missing);
        assert_eq!(ActionKind::classify(&record(&[("Action", "")])), ActionKind::Missing);
        assert_eq!(ActionKind::classify(&record(&[("action", "PING")])), ActionKind::Ping);
        assert_eq!(ActionKind::classify(&record(&[("Action", "login")])), ActionKind::Login);
        assert_eq!(ActionKind::classify(&record(&[("Action", "LogOff")])), ActionKind::Logoff);
        assert_eq!(
            ActionKind::classify(&record(&[("Action", "Originate")])),
            ActionKind::Unknown
        );
    }

    #[tokio::test]
    async fn test_missing_action_echoes_action_id() {
        let dispatcher = ActionDispatcher::default();
        let session = session(None);

        let reply = dispatcher.dispatch(&record(&[("ActionID", "empty_123")]), &session);
        assert_eq!(
            only_message(&reply).to_string(),
            "Response: Error\r\nMessage: Missing action in request\r\nActionID: empty_123\r\n\r\n"
        );
        assert_eq!(reply.next, Next::Continue);
    }

    #[tokio::test]
    async fn test_unknown_action() {
        let dispatcher = ActionDispatcher::default();
        let session = session(None);

        let reply = dispatcher.dispatch(&record(&[("Action", "CoreShowChannels")]), &session);
        assert_eq!(
            only_message(&reply).to_string(),
            "Response: Error\r\nMessage: Invalid/unknown command\r\n\r\n"
        );
        assert_eq!(session.state(), ConnectionState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_ping_before_and_after_login() {
        let dispatcher = ActionDispatcher::default();
        let session = session(None);

        let before = dispatcher.dispatch(&record(&[("Action", "Ping"), ("ActionID", "p1")]), &session);
        let message = only_message(&before);
        assert_eq!(message.get("Response"), Some("Success"));
        assert_eq!(message.get("Ping"), Some("Pong"));
        assert_eq!(message.action_id(), Some("p1"));
        assert!(message.get("Timestamp").is_some_and(|ts| ts.contains('.')));

        dispatcher.dispatch(&record(&[("Action", "Login")]), &session);

        let after = dispatcher.dispatch(&record(&[("Action", "ping")]), &session);
        let message = only_message(&after);
        assert_eq!(message.get("Ping"), Some("Pong"));
        assert!(message.action_id().is_none());
        assert!(!message.contains("ActionID"));
    }

    #[tokio::test]
    async fn test_login_accepted_frames_in_order() {
        let dispatcher = ActionDispatcher::new(Some("Asterisk Call Manager/5.0.1".to_string()));
        let session = session(Some(Credentials::new("test", "test")));

        let reply = dispatcher.dispatch(
            &record(&[
                ("Action", "Login"),
                ("Username", "test"),
                ("Secret", "test"),
                ("ActionID", "42"),
            ]),
            &session,
        );

        assert_eq!(reply.next, Next::Promote);
        assert_eq!(reply.login, Some(LoginOutcome::Accepted));
        assert_eq!(
            reply.frames,
            vec![
                Frame::Message(
                    AmiMessage::response("Success")
                        .with("Message", "Authentication accepted")
                        .with("ActionID", "42")
                ),
                Frame::Message(
                    AmiMessage::event("FullyBooted")
                        .with("Privilege", "system,all")
                        .with("Status", "Fully Booted")
                ),
                Frame::Line("Asterisk Call Manager/5.0.1".to_string()),
            ]
        );
        assert!(session.is_authenticated());
    }

    #[tokio::test]
    async fn test_login_rejected_closes() {
        let dispatcher = ActionDispatcher::default();
        let session = session(Some(Credentials::new("test", "test")));

        let reply = dispatcher.dispatch(
            &record(&[("Action", "Login"), ("Username", "test"), ("Secret", "TEST")]),
            &session,
        );

        assert_eq!(
            only_message(&reply).to_string(),
            "Response: Error\r\nMessage: Authentication failed\r\n\r\n"
        );
        assert_eq!(reply.next, Next::Close(CloseReason::AuthenticationFailed));
        assert_eq!(reply.login, Some(LoginOutcome::Rejected));
    }

    #[tokio::test]
    async fn test_login_with_empty_credentials_rejected() {
        let dispatcher = ActionDispatcher::default();
        let session = session(Some(Credentials::new("test", "test")));

        let reply = dispatcher.dispatch(
            &record(&[("Action", "Login"), ("Username", ""), ("Secret", "")]),
            &session,
        );
        assert_eq!(reply.login, Some(LoginOutcome::Rejected));
    }

    #[tokio::test]
    async fn test_login_while_authenticated_is_unknown() {
        let dispatcher = ActionDispatcher::default();
        let session = session(None);
        dispatcher.dispatch(&record(&[("Action", "Login")]), &session);

        let reply = dispatcher.dispatch(&record(&[("Action", "Login")]), &session);
        assert_eq!(
            only_message(&reply).get("Message"),
            Some("Invalid/unknown command")
        );
        assert_eq!(reply.next, Next::Continue);
        assert!(session.is_authenticated());
    }

    #[tokio::test]
    async fn test_logoff_before_login_is_unknown() {
        let dispatcher = ActionDispatcher::default();
        let session = session(None);

        let reply = dispatcher.dispatch(&record(&[("Action", "Logoff")]), &session);
        assert_eq!(
            only_message(&reply).get("Message"),
            Some("Invalid/unknown command")
        );
        assert_eq!(session.state(), ConnectionState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_logoff_after_login() {
        let dispatcher = ActionDispatcher::default();
        let session = session(None);
        dispatcher.dispatch(&record(&[("Action", "Login")]), &session);

        let reply = dispatcher.dispatch(
            &record(&[("Action", "Logoff"), ("ActionID", "logoff_123")]),
            &session,
        );
        assert_eq!(
            only_message(&reply).to_string(),
            "Response: Goodbye\r\nMessage: Thanks for all the fish.\r\nActionID: logoff_123\r\n\r\n"
        );
        assert_eq!(reply.next, Next::Close(CloseReason::Logoff));
        assert_eq!(session.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_after_deadline_writes_nothing() {
        let dispatcher = ActionDispatcher::default();
        let timer = AuthTimer::arm(Duration::from_millis(10), || {});
        let session = AuthSession::new(Arc::new(AtomicU8::new(0)), timer, None);

        tokio::time::sleep(Duration::from_millis(20)).await;
        tokio::task::yield_now().await;

        let reply = dispatcher.dispatch(&record(&[("Action", "Login")]), &session);
        assert!(reply.frames.is_empty());
        assert_eq!(reply.next, Next::Close(CloseReason::AuthTimeout));
        assert_eq!(reply.login, Some(LoginOutcome::Expired));
    }

    #[test]
    fn test_timestamp_format() {
        let ts = timestamp();
        let (secs, micros) = ts.split_once('.').unwrap();
        assert!(secs.parse::<u64>().unwrap() > 1_600_000_000);
        assert_eq!(micros.len(), 6);
    }
}
