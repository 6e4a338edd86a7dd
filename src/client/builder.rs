//! Builder for [`SessionClient`]
//!
//! Collects the configuration and the two collaborators (transport and
//! media), plus an optional pre-built session store and event handler, and
//! assembles the client.
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use softphone_core::{ClientBuilder, ClientConfig, Identity};
//! # use softphone_core::{SignalingTransport, MediaEngine, TransportEvent};
//! # fn example(
//! #     transport: Arc<dyn SignalingTransport>,
//! #     events: tokio::sync::mpsc::Receiver<TransportEvent>,
//! #     media: Arc<dyn MediaEngine>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::new(
//!     Identity::new("alice", "example.com").with_credentials("alice", "secret"),
//!     "sips:edge.example.com:5061",
//! );
//! let client = ClientBuilder::new(config)
//!     .with_transport(transport, events)
//!     .with_media(media)
//!     .build()?;
//! # let _ = client;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::client::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::events::ClientEventHandler;
use crate::media::MediaEngine;
use crate::session::SessionStore;
use crate::transport::{SignalingTransport, TransportEvent};

use super::manager::SessionClient;

/// Assembles a [`SessionClient`] from its parts
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<(Arc<dyn SignalingTransport>, mpsc::Receiver<TransportEvent>)>,
    media: Option<Arc<dyn MediaEngine>>,
    sessions: Option<Arc<SessionStore>>,
    handler: Option<Arc<dyn ClientEventHandler>>,
}

impl ClientBuilder {
    /// Start a builder from a configuration
    pub fn new(config: ClientConfig) -> Self {
        Self { config, transport: None, media: None, sessions: None, handler: None }
    }

    /// Supply the signaling transport and its event feed
    pub fn with_transport(
        mut self,
        transport: Arc<dyn SignalingTransport>,
        events: mpsc::Receiver<TransportEvent>,
    ) -> Self {
        self.transport = Some((transport, events));
        self
    }

    /// Supply the media engine
    pub fn with_media(mut self, media: Arc<dyn MediaEngine>) -> Self {
        self.media = Some(media);
        self
    }

    /// Use an explicitly constructed session store instead of a fresh one
    pub fn with_session_store(mut self, sessions: Arc<SessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Register an event handler as part of construction
    pub fn with_event_handler(mut self, handler: Arc<dyn ClientEventHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Assemble the client. Fails when a collaborator is missing or the
    /// configuration does not validate.
    pub fn build(self) -> ClientResult<Arc<SessionClient>> {
        let (transport, events) = self.transport.ok_or_else(|| {
            ClientError::InvalidConfiguration {
                field: "transport".into(),
                reason: "a signaling transport is required".into(),
            }
        })?;
        let media = self.media.ok_or_else(|| ClientError::InvalidConfiguration {
            field: "media".into(),
            reason: "a media engine is required".into(),
        })?;
        let sessions = self.sessions.unwrap_or_else(|| Arc::new(SessionStore::new()));

        let client = SessionClient::with_store(self.config, transport, events, media, sessions)?;
        if let Some(handler) = self.handler {
            client.set_event_handler(handler);
        }
        Ok(client)
    }
}
