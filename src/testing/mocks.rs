//! Mock implementations for testing
//!
//! Provides a mock [`Transport`] and [`TransportFactory`] so the publish
//! workflow can be exercised without a broker. All recorders are shared
//! `Arc`s, so a test keeps a [`MockRecorder`] clone and inspects it after the
//! transport has been moved into the workflow and dropped.

use crate::error::PublisherResult;
use crate::transport::mqtt::{ConnectionState, MqttError};
use crate::transport::{
    ConnectRequest, OutgoingMessage, PublishReceipt, SessionEvent, SessionSettings, Transport,
    TransportFactory,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

/// A message accepted by [`MockTransport::publish`] and when it arrived
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub message: OutgoingMessage,
    pub at: Instant,
}

/// Shared record of everything the mocks were asked to do
#[derive(Debug, Clone, Default)]
pub struct MockRecorder {
    pub sessions_created: Arc<AtomicU32>,
    pub settings: Arc<Mutex<Vec<SessionSettings>>>,
    pub connect_requests: Arc<Mutex<Vec<ConnectRequest>>>,
    pub published: Arc<Mutex<Vec<PublishedMessage>>>,
    pub disconnects: Arc<AtomicU32>,
}

impl MockRecorder {
    pub fn sessions_created(&self) -> u32 {
        self.sessions_created.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> u32 {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub async fn get_settings(&self) -> Vec<SessionSettings> {
        self.settings.lock().await.clone()
    }

    pub async fn get_connect_requests(&self) -> Vec<ConnectRequest> {
        self.connect_requests.lock().await.clone()
    }

    pub async fn get_published(&self) -> Vec<PublishedMessage> {
        self.published.lock().await.clone()
    }
}

/// Mock transport for testing
#[derive(Debug)]
pub struct MockTransport {
    recorder: MockRecorder,
    reject_connection: bool,
    /// 1-based publish attempts that fail
    fail_attempts: Vec<u32>,
    attempts: AtomicU32,
    connected: AtomicBool,
    events_tx: Option<mpsc::UnboundedSender<SessionEvent>>,
    events_rx: Option<mpsc::UnboundedReceiver<SessionEvent>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new(MockRecorder::default())
    }
}

impl MockTransport {
    pub fn new(recorder: MockRecorder) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            recorder,
            reject_connection: false,
            fail_attempts: Vec::new(),
            attempts: AtomicU32::new(0),
            connected: AtomicBool::new(false),
            events_tx: Some(events_tx),
            events_rx: Some(events_rx),
        }
    }

    /// Broker refuses the credentials
    pub fn rejecting(mut self) -> Self {
        self.reject_connection = true;
        self
    }

    /// Publish attempts with these 1-based numbers return an error
    pub fn failing_publishes(mut self, attempts: &[u32]) -> Self {
        self.fail_attempts = attempts.to_vec();
        self
    }

    pub fn recorder(&self) -> &MockRecorder {
        &self.recorder
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.events_tx {
            let _ = tx.send(event);
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MqttError;

    async fn connect(&mut self, request: ConnectRequest) -> Result<(), Self::Error> {
        self.recorder.connect_requests.lock().await.push(request);

        if self.reject_connection {
            return Err(MqttError::ConnectionRefused(
                "BadUserNamePassword".to_string(),
            ));
        }

        self.connected.store(true, Ordering::SeqCst);
        self.emit(SessionEvent::Connected);
        Ok(())
    }

    async fn publish(&self, message: OutgoingMessage) -> Result<PublishReceipt, Self::Error> {
        if !self.is_connected() {
            return Err(MqttError::NotConnected {
                state: self.connection_state(),
            });
        }

        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_attempts.contains(&attempt) {
            return Err(MqttError::PublishFailed("Mock publish failure".into()));
        }

        let bytes = message.payload.len();
        let packet_id = u16::try_from(attempt).unwrap_or(u16::MAX);
        self.recorder.published.lock().await.push(PublishedMessage {
            message,
            at: Instant::now(),
        });
        self.emit(SessionEvent::MessagePublished { packet_id });

        Ok(PublishReceipt { bytes })
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        self.recorder.disconnects.fetch_add(1, Ordering::SeqCst);

        if self.connected.swap(false, Ordering::SeqCst) {
            self.emit(SessionEvent::ConnectionClosed {
                reason: "Client disconnected".to_string(),
            });
        }
        self.events_tx = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connection_state(&self) -> ConnectionState {
        if self.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Idle
        }
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.events_rx.take()
    }
}

/// Factory handing out [`MockTransport`]s that share one recorder
#[derive(Debug, Clone, Default)]
pub struct MockTransportFactory {
    pub recorder: MockRecorder,
    pub reject_connection: bool,
    pub fail_attempts: Vec<u32>,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting() -> Self {
        Self {
            reject_connection: true,
            ..Default::default()
        }
    }

    pub fn failing_publishes(attempts: &[u32]) -> Self {
        Self {
            fail_attempts: attempts.to_vec(),
            ..Default::default()
        }
    }
}

impl TransportFactory for MockTransportFactory {
    type Transport = MockTransport;

    fn create(&self, settings: SessionSettings) -> PublisherResult<Self::Transport> {
        self.recorder.sessions_created.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut recorded) = self.recorder.settings.try_lock() {
            recorded.push(settings);
        }

        let mut transport =
            MockTransport::new(self.recorder.clone()).failing_publishes(&self.fail_attempts);
        if self.reject_connection {
            transport = transport.rejecting();
        }
        Ok(transport)
    }
}
