//! Client configuration
//!
//! [`ClientConfig`] gathers everything the session client needs up front:
//! the local identity, the signaling server endpoint, call limits, lease and
//! timeout tuning, and the reconnect policy. Builder-style `with_*` methods
//! cover the common adjustments.
//!
//! ```rust
//! use softphone_core::{ClientConfig, Identity};
//!
//! let identity = Identity::new("alice", "example.com").with_display_name("Alice");
//! let config = ClientConfig::new(identity, "sips:edge.example.com:5061")
//!     .with_max_calls(4)
//!     .with_register_expires(1800);
//!
//! assert_eq!(config.max_concurrent_calls, 4);
//! assert_eq!(config.identity.uri(), "sip:alice@example.com");
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::client::recovery::RetryConfig;
use crate::error::{ClientError, ClientResult};
use crate::media::MediaOptions;

/// Authentication credentials passed through to the transport
///
/// The core never interprets these; challenges are the transport's concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Authentication username
    pub username: String,
    /// Authentication password
    pub password: String,
    /// Authentication realm, when known in advance
    pub realm: Option<String>,
}

/// The local identity bound to the signaling server
///
/// Immutable for the lifetime of a connection cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// User part of the address of record
    pub user: String,
    /// Domain part of the address of record
    pub domain: String,
    /// Display name presented to remote parties
    pub display_name: Option<String>,
    /// Credentials for the transport to answer challenges with
    pub credentials: Option<Credentials>,
}

impl Identity {
    /// Identity without display name or credentials
    pub fn new(user: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            domain: domain.into(),
            display_name: None,
            credentials: None,
        }
    }

    /// Set the display name
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    /// Set authentication credentials
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
            realm: None,
        });
        self
    }

    /// The address-of-record URI for this identity
    pub fn uri(&self) -> String {
        format!("sip:{}@{}", self.user, self.domain)
    }
}

/// Configuration for the session client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Local identity to register and place calls as
    pub identity: Identity,
    /// Signaling server endpoint, e.g. `sips:edge.example.com:5061`
    pub server: String,
    /// User agent string presented by the transport
    pub user_agent: String,
    /// Maximum simultaneous non-terminal sessions
    pub max_concurrent_calls: usize,
    /// Registration lease to request, in seconds
    pub register_expires: u32,
    /// Fraction of the granted lease after which to renew
    pub register_refresh_fraction: f64,
    /// How long an outgoing call may ring before being cancelled
    pub establish_timeout: Duration,
    /// How long to wait for the remote to acknowledge a teardown
    pub terminate_timeout: Duration,
    /// Backoff policy for reconnecting after an unexpected disconnect
    pub reconnect: RetryConfig,
    /// Media used when the event handler auto-accepts an incoming call
    pub default_media: MediaOptions,
    /// Capacity of the broadcast event channel
    pub event_buffer: usize,
}

impl ClientConfig {
    /// Configuration with defaults for everything but identity and server
    pub fn new(identity: Identity, server: impl Into<String>) -> Self {
        Self {
            identity,
            server: server.into(),
            user_agent: concat!("softphone-core/", env!("CARGO_PKG_VERSION")).to_string(),
            max_concurrent_calls: 4,
            register_expires: 3600,
            register_refresh_fraction: 0.8,
            establish_timeout: Duration::from_secs(120),
            terminate_timeout: Duration::from_secs(5),
            reconnect: RetryConfig::reconnect(),
            default_media: MediaOptions::audio_only(),
            event_buffer: 128,
        }
    }

    /// Set the user agent string
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set the concurrent call limit
    pub fn with_max_calls(mut self, max: usize) -> Self {
        self.max_concurrent_calls = max;
        self
    }

    /// Set the requested registration lease in seconds
    pub fn with_register_expires(mut self, expires: u32) -> Self {
        self.register_expires = expires;
        self
    }

    /// Set the ring timeout for outgoing calls
    pub fn with_establish_timeout(mut self, timeout: Duration) -> Self {
        self.establish_timeout = timeout;
        self
    }

    /// Set the teardown acknowledgment timeout
    pub fn with_terminate_timeout(mut self, timeout: Duration) -> Self {
        self.terminate_timeout = timeout;
        self
    }

    /// Set the reconnect backoff policy
    pub fn with_reconnect(mut self, policy: RetryConfig) -> Self {
        self.reconnect = policy;
        self
    }

    /// Set the media used for auto-accepted calls
    pub fn with_default_media(mut self, media: MediaOptions) -> Self {
        self.default_media = media;
        self
    }

    /// Validate fields that can be checked without collaborators
    pub fn validate(&self) -> ClientResult<()> {
        if self.identity.user.is_empty() || self.identity.domain.is_empty() {
            return Err(ClientError::InvalidConfiguration {
                field: "identity".into(),
                reason: "user and domain must be non-empty".into(),
            });
        }
        url::Url::parse(&self.server).map_err(|e| ClientError::InvalidConfiguration {
            field: "server".into(),
            reason: e.to_string(),
        })?;
        if self.max_concurrent_calls == 0 {
            return Err(ClientError::InvalidConfiguration {
                field: "max_concurrent_calls".into(),
                reason: "must be at least 1".into(),
            });
        }
        if !(0.1..=0.95).contains(&self.register_refresh_fraction) {
            return Err(ClientError::InvalidConfiguration {
                field: "register_refresh_fraction".into(),
                reason: "must be between 0.1 and 0.95".into(),
            });
        }
        if self.event_buffer == 0 {
            return Err(ClientError::InvalidConfiguration {
                field: "event_buffer".into(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}
