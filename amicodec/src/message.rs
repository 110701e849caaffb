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

//! Manager protocol records
//!
//! Actions, responses and events share a single shape on the wire: an ordered
//! block of `Field: value` lines. [`AmiMessage`] models that block and keeps
//! insertion order so that serialization is deterministic.

use std::fmt;

/// Field carrying the action name of a request.
pub const ACTION: &str = "Action";
/// Field carrying the client-supplied correlation token.
pub const ACTION_ID: &str = "ActionID";
/// Field carrying the kind of a response.
pub const RESPONSE: &str = "Response";
/// Field carrying the name of an event.
pub const EVENT: &str = "Event";
/// Field carrying a human readable message.
pub const MESSAGE: &str = "Message";
/// Login user name.
pub const USERNAME: &str = "Username";
/// Login secret.
pub const SECRET: &str = "Secret";

/// A single manager protocol record.
///
/// Field lookups are case-insensitive, field order is preserved.
///
/// # Example
///
/// ```
/// use amitest_codec::AmiMessage;
///
/// let msg = AmiMessage::response("Success")
///     .with("Message", "Authentication accepted")
///     .with_action_id(Some("42"));
///
/// assert_eq!(msg.get("response"), Some("Success"));
/// assert_eq!(msg.action_id(), Some("42"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmiMessage {
    fields: Vec<(String, String)>,
}

impl AmiMessage {
    /// Create an empty message
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Create a response record of the given kind (`Success`, `Error`, ...)
    pub fn response(kind: impl Into<String>) -> Self {
        Self::new().with(RESPONSE, kind)
    }

    /// Create an event record with the given name
    pub fn event(name: impl Into<String>) -> Self {
        Self::new().with(EVENT, name)
    }

    /// Create an action record with the given name
    pub fn action_named(name: impl Into<String>) -> Self {
        Self::new().with(ACTION, name)
    }

    /// Append a field, returning the message
    pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(field, value);
        self
    }

    /// Append the correlation token if one is given
    pub fn with_action_id(self, action_id: Option<&str>) -> Self {
        match action_id {
            Some(id) => self.with(ACTION_ID, id),
            None => self,
        }
    }

    /// Append a field
    pub fn push(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.fields.push((field.into(), value.into()));
    }

    /// Look up the first value for `field`, ignoring ASCII case
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(field))
            .map(|(_, value)| value.as_str())
    }

    /// Check whether `field` is present
    pub fn contains(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    /// The `Action` value, if present
    pub fn action(&self) -> Option<&str> {
        self.get(ACTION)
    }

    /// The `ActionID` value, if present and non-empty
    pub fn action_id(&self) -> Option<&str> {
        self.get(ACTION_ID).filter(|id| !id.is_empty())
    }

    /// Iterate over fields in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True if the message carries no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Number of bytes this message occupies on the wire
    pub fn encoded_len(&self) -> usize {
        self.fields
            .iter()
            .map(|(k, v)| k.len() + v.len() + 4)
            .sum::<usize>()
            + 2
    }
}

impl fmt::Display for AmiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (field, value) in &self.fields {
            write!(f, "{}: {}\r\n", field, value)?;
        }
        f.write_str("\r\n")
    }
}

impl<K, V> FromIterator<(K, V)> for AmiMessage
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_lookup() {
        let msg = AmiMessage::new()
            .with("ACTION", "Ping")
            .with("actionid", "abc");

        assert_eq!(msg.action(), Some("Ping"));
        assert_eq!(msg.action_id(), Some("abc"));
        assert_eq!(msg.get("Action"), Some("Ping"));
        assert!(msg.get("Username").is_none());
    }

    #[test]
    fn test_empty_action_id_is_absent() {
        let msg = AmiMessage::action_named("Ping").with(ACTION_ID, "");
        assert_eq!(msg.action_id(), None);
    }

    #[test]
    fn test_display_matches_wire_format() {
        let msg = AmiMessage::response("Goodbye")
            .with(MESSAGE, "Thanks for all the fish.")
            .with_action_id(Some("logoff_123"));

        assert_eq!(
            msg.to_string(),
            "Response: Goodbye\r\nMessage: Thanks for all the fish.\r\nActionID: logoff_123\r\n\r\n"
        );
        assert_eq!(msg.encoded_len(), msg.to_string().len());
    }

    #[test]
    fn test_first_duplicate_field_wins() {
        let msg: AmiMessage = [("Variable", "a=1"), ("Variable", "b=2")]
            .into_iter()
            .collect();
        assert_eq!(msg.get("variable"), Some("a=1"));
        assert_eq!(msg.len(), 2);
    }
}
