//! Shared mock collaborators and helpers for the integration tests
#![allow(dead_code)] // each test binary uses a different subset

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use softphone_core::{
    CallId, CallState, ClientBuilder, ClientConfig, ConnectionState, Credentials, Identity,
    MediaEngine, MediaError, MediaHandle, MediaOptions, RegistrationBinding, RegistrationState,
    SessionClient, SignalMessage, SignalingTransport, TransportError, TransportEvent,
};

/// Transport double: records outbound messages, events are injected by the
/// test through the channel handed to the client.
pub struct MockTransport {
    pub sent: Mutex<Vec<SignalMessage>>,
    pub fail_connect: AtomicBool,
    pub fail_register: AtomicBool,
    pub connect_calls: AtomicUsize,
    pub register_calls: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            fail_connect: AtomicBool::new(false),
            fail_register: AtomicBool::new(false),
            connect_calls: AtomicUsize::new(0),
            register_calls: AtomicUsize::new(0),
        })
    }

    pub fn sent_messages(&self) -> Vec<SignalMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl SignalingTransport for MockTransport {
    async fn connect(
        &self,
        _endpoint: &str,
        _credentials: Option<&Credentials>,
    ) -> Result<(), TransportError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            Err(TransportError::ConnectFailed { reason: "connection refused".into() })
        } else {
            Ok(())
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send(&self, message: SignalMessage) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn register(&self, binding: &RegistrationBinding) -> Result<u32, TransportError> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_register.load(Ordering::SeqCst) {
            Err(TransportError::Rejected { reason: "403 Forbidden".into() })
        } else {
            Ok(binding.expires)
        }
    }

    async fn unregister(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Media double: counts acquisitions, attachments and releases.
pub struct MockMedia {
    pub acquired: AtomicUsize,
    pub attached: AtomicUsize,
    pub released: AtomicUsize,
    pub fail_acquire: AtomicBool,
}

impl MockMedia {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            acquired: AtomicUsize::new(0),
            attached: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            fail_acquire: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl MediaEngine for MockMedia {
    async fn acquire(&self, _options: &MediaOptions) -> Result<MediaHandle, MediaError> {
        if self.fail_acquire.load(Ordering::SeqCst) {
            return Err(MediaError::AcquisitionFailed { reason: "no capture device".into() });
        }
        let n = self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(MediaHandle(format!("media-{n}")))
    }

    async fn attach(&self, _handle: &MediaHandle, _call_id: &CallId) -> Result<(), MediaError> {
        self.attached.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn set_hold(&self, _handle: &MediaHandle, _held: bool) -> Result<(), MediaError> {
        Ok(())
    }

    async fn set_muted(&self, _handle: &MediaHandle, _muted: bool) -> Result<(), MediaError> {
        Ok(())
    }

    async fn release(&self, _handle: MediaHandle) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct Harness {
    pub client: Arc<SessionClient>,
    pub transport: Arc<MockTransport>,
    pub media: Arc<MockMedia>,
    pub events_tx: mpsc::Sender<TransportEvent>,
}

pub fn test_config() -> ClientConfig {
    ClientConfig::new(
        Identity::new("alice", "example.com").with_display_name("Alice"),
        "sips:edge.example.com:5061",
    )
}

/// Initialize test logging once; respects `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Build and start a client around fresh mocks.
pub async fn start_client(config: ClientConfig) -> Harness {
    init_tracing();
    let transport = MockTransport::new();
    let media = MockMedia::new();
    let (events_tx, events_rx) = mpsc::channel(64);
    let client = ClientBuilder::new(config)
        .with_transport(transport.clone(), events_rx)
        .with_media(media.clone())
        .build()
        .expect("client should build");
    client.start().await.expect("client should start");
    Harness { client, transport, media, events_tx }
}

/// Build, start, connect and register.
pub async fn registered_client(config: ClientConfig) -> Harness {
    let h = start_client(config).await;
    h.client.connect().await.expect("connect");
    h.client.register().await.expect("register");
    h
}

/// Poll until the session reaches `state` or the deadline passes.
pub async fn wait_for_call_state(client: &SessionClient, call_id: &CallId, state: CallState) {
    wait_until(&format!("session {call_id} to reach {state}"), || {
        client.get_call(call_id).map(|c| c.state == state).unwrap_or(false)
    })
    .await;
}

/// Poll until the connection reaches `state` or the deadline passes.
pub async fn wait_for_connection_state(client: &SessionClient, state: ConnectionState) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if client.connection_state().await == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for connection state {state:?}");
}

/// Poll until the registration reaches `state` or the deadline passes.
pub async fn wait_for_registration_state(client: &SessionClient, state: RegistrationState) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if client.registration_state().await == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for registration state {state:?}");
}

/// Poll a condition for up to two seconds.
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
