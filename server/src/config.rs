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

//! Server configuration

use crate::{Result, ServerError};
use amitest_codec::DEFAULT_MAX_LENGTH;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Login credentials accepted by the server
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Expected `Username`
    pub username: String,
    /// Expected `Secret`
    pub secret: String,
}

impl Credentials {
    /// Create a credential pair
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }

    /// Check a login attempt against this pair
    ///
    /// Both values must be present, non-empty and equal byte for byte.
    pub fn verify(&self, username: Option<&str>, secret: Option<&str>) -> bool {
        match (username, secret) {
            (Some(username), Some(secret)) => {
                !username.is_empty()
                    && !secret.is_empty()
                    && username == self.username
                    && secret == self.secret
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Server configuration
///
/// This structure contains all configuration options for the AMI test server.
/// Use the builder pattern methods to customize the configuration. The
/// configuration is read-only once handed to the server.
///
/// # Example
///
/// ```
/// use amitest_server::{Credentials, ServerConfig};
/// use std::time::Duration;
///
/// let config = ServerConfig::default()
///     .with_max_connections(Some(10))
///     .with_auth_timeout(Duration::from_secs(5))
///     .with_credentials(Credentials::new("admin", "secret"));
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface the listener binds to; the port is supplied to `listen`
    pub host: IpAddr,

    /// Maximum number of concurrent connections, authenticated or not
    ///
    /// `None` means unlimited. `Some(0)` rejects every connection.
    pub max_connections: Option<usize>,

    /// Time an unauthenticated connection may stay open before it is dropped
    pub auth_timeout: Duration,

    /// Accepted login; `None` accepts any login
    pub credentials: Option<Credentials>,

    /// Line written to a client right after a successful login
    pub banner: Option<String>,

    /// Suppress the startup log line
    pub silent: bool,

    /// Timeout for a single write to a client
    pub write_timeout: Duration,

    /// Time `close` waits for connection workers to finish
    pub shutdown_timeout: Duration,

    /// Per-connection queue of pending broadcasts and control messages
    pub control_buffer_size: usize,

    /// Largest record a client may send, in bytes
    pub max_record_length: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            max_connections: Some(50),
            auth_timeout: Duration::from_millis(30_000),
            credentials: None,
            banner: None,
            silent: false,
            write_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(5),
            control_buffer_size: 1024,
            max_record_length: DEFAULT_MAX_LENGTH,
        }
    }
}

impl ServerConfig {
    /// Create a new configuration bound to the given interface
    ///
    /// All other settings will use their default values.
    pub fn new(host: IpAddr) -> Self {
        Self {
            host,
            ..Default::default()
        }
    }

    /// Set the connection limit (`None` for unlimited)
    pub fn with_max_connections(mut self, max: Option<usize>) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the login deadline
    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    /// Require the given credentials on login
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Accept any login
    pub fn without_credentials(mut self) -> Self {
        self.credentials = None;
        self
    }

    /// Write `banner` after a successful login
    pub fn with_banner(mut self, banner: impl Into<String>) -> Self {
        self.banner = Some(banner.into());
        self
    }

    /// Suppress the startup log line
    pub fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    /// Set the write timeout duration
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the shutdown timeout duration
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the per-connection control queue size
    pub fn with_control_buffer_size(mut self, size: usize) -> Self {
        self.control_buffer_size = size;
        self
    }

    /// Set the largest accepted record
    pub fn with_max_record_length(mut self, length: usize) -> Self {
        self.max_record_length = length;
        self
    }

    /// Whether a new connection may be accepted while `current` are open
    pub fn allows_connection(&self, current: usize) -> bool {
        match self.max_connections {
            None => true,
            Some(max) => current < max,
        }
    }

    /// Validate the configuration
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.auth_timeout.is_zero() {
            return Err(ServerError::InvalidConfig(
                "auth_timeout must be greater than 0".to_string(),
            ));
        }

        if self.write_timeout.is_zero() {
            return Err(ServerError::InvalidConfig(
                "write_timeout must be greater than 0".to_string(),
            ));
        }

        if self.control_buffer_size == 0 {
            return Err(ServerError::InvalidConfig(
                "control_buffer_size must be greater than 0".to_string(),
            ));
        }

        if self.max_record_length == 0 {
            return Err(ServerError::InvalidConfig(
                "max_record_length must be greater than 0".to_string(),
            ));
        }

        if let Some(credentials) = &self.credentials {
            if credentials.username.is_empty() || credentials.secret.is_empty() {
                return Err(ServerError::InvalidConfig(
                    "credentials must have a non-empty username and secret".to_string(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.max_connections, Some(50));
        assert_eq!(config.auth_timeout, Duration::from_millis(30_000));
        assert!(config.credentials.is_none());
        assert!(config.banner.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = ServerConfig::default()
            .with_max_connections(None)
            .with_auth_timeout(Duration::from_secs(1))
            .with_credentials(Credentials::new("test", "test"))
            .with_banner("hello")
            .with_silent(true);

        assert_eq!(config.max_connections, None);
        assert_eq!(config.auth_timeout, Duration::from_secs(1));
        assert_eq!(config.credentials, Some(Credentials::new("test", "test")));
        assert_eq!(config.banner.as_deref(), Some("hello"));
        assert!(config.silent);
    }

    #[test]
    fn test_capacity_policy() {
        let limited = ServerConfig::default().with_max_connections(Some(2));
        assert!(limited.allows_connection(0));
        assert!(limited.allows_connection(1));
        assert!(!limited.allows_connection(2));

        let closed = ServerConfig::default().with_max_connections(Some(0));
        assert!(!closed.allows_connection(0));

        let unlimited = ServerConfig::default().with_max_connections(None);
        assert!(unlimited.allows_connection(usize::MAX - 1));
    }

    #[test]
    fn test_validation() {
        let mut config = ServerConfig::default();
        assert!(config.validate().is_ok());

        config.auth_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        config.auth_timeout = Duration::from_secs(1);
        config.credentials = Some(Credentials::new("", "secret"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_credentials_verify() {
        let creds = Credentials::new("test", "test");
        assert!(creds.verify(Some("test"), Some("test")));
        assert!(!creds.verify(Some("Test"), Some("test")));
        assert!(!creds.verify(Some("test"), Some("wrong")));
        assert!(!creds.verify(Some("test"), None));
        assert!(!creds.verify(None, None));
        assert!(!Credentials::new("", "").verify(Some(""), Some("")));
    }

    #[test]
    fn test_credentials_debug_hides_secret() {
        let creds = Credentials::new("admin", "hunter2");
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("hunter2"));
    }
}
