//! Impure I/O operations for the MQTT session
//!
//! This module owns the rumqttc client and drives its event loop on a spawned
//! task. Connection state flows back over a `watch` channel and observer
//! events over an unbounded `mpsc` channel.

use super::connection::{
    configure_mqtt_options, ConnectionState, MqttError, REQUEST_CHANNEL_CAPACITY,
};
use super::event_router::{EventRoute, EventRouter};
use crate::error::PublisherResult;
use crate::transport::{
    ConnectRequest, OutgoingMessage, PublishReceipt, SessionEvent, SessionSettings, Transport,
    TransportFactory,
};
use async_trait::async_trait;
use rumqttc::{AsyncClient, EventLoop};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How long disconnect waits for the event loop to flush DISCONNECT
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// MQTT 3.1.1 session over TLS 1.2
pub struct MqttSession {
    settings: SessionSettings,
    client: Option<AsyncClient>,
    event_loop_handle: Option<JoinHandle<()>>,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<SessionEvent>>,
}

impl MqttSession {
    /// Create an idle session; no I/O happens until [`MqttSession::connect`]
    pub fn new(settings: SessionSettings) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (shutdown_tx, _) = watch::channel(false);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        MqttSession {
            settings,
            client: None,
            event_loop_handle: None,
            state_tx,
            state_rx,
            shutdown_tx,
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    /// Wait for connection confirmation (ConnAck) with timeout
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let timeout_result = tokio::time::timeout(timeout, async {
            loop {
                match &*state_rx.borrow_and_update() {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Refused(code) => {
                        return Err(MqttError::ConnectionRefused(code.clone()));
                    }
                    ConnectionState::Disconnected(reason) => {
                        return Err(MqttError::ConnectionFailed(reason.clone().into()));
                    }
                    ConnectionState::Idle | ConnectionState::Connecting => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionClosed(
                        "State channel closed".to_string(),
                    ));
                }
            }
        })
        .await;

        match timeout_result {
            Ok(result) => result,
            Err(_) => Err(MqttError::ConnectTimeout),
        }
    }

    /// Connect to the broker and wait for CONNACK
    pub async fn connect(&mut self, request: ConnectRequest) -> Result<(), MqttError> {
        if self.client.is_some() {
            return Err(MqttError::AlreadyConnected);
        }

        let mqtt_options = configure_mqtt_options(&self.settings, &request)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);

        let _ = self.state_tx.send(ConnectionState::Connecting);
        let shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(Self::run_event_loop(
            event_loop,
            self.state_tx.clone(),
            self.events_tx.clone(),
            shutdown_rx,
        ));
        self.client = Some(client);
        self.event_loop_handle = Some(handle);

        info!(
            host = %self.settings.broker.host,
            port = self.settings.broker.port,
            client_id = %request.client_id,
            "Connecting to MQTT broker"
        );

        let confirmation = Self::wait_for_connection_confirmation(
            self.state_rx.clone(),
            self.settings.connect_timeout,
        )
        .await;

        if let Err(e) = confirmation {
            error!("MQTT connection failed: {}", e);
            self.stop_event_loop();
            if self.connection_state().reason().is_none() {
                let _ = self
                    .state_tx
                    .send(ConnectionState::Disconnected(e.to_string()));
            }
            return Err(e);
        }

        info!("Connected to MQTT broker");
        Ok(())
    }

    /// Poll rumqttc until the session ends or shutdown is signalled
    async fn run_event_loop(
        mut event_loop: EventLoop,
        state_tx: watch::Sender<ConnectionState>,
        events_tx: mpsc::UnboundedSender<SessionEvent>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        debug!("Starting MQTT event loop");

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!("Shutdown signal received, stopping MQTT event loop");
                        break;
                    }
                }

                event_result = event_loop.poll() => {
                    match event_result {
                        Ok(event) => {
                            let route = EventRouter::route_mqtt_event(&event);
                            if !Self::process_event_route(route, &state_tx, &events_tx) {
                                break;
                            }
                        }
                        Err(e) => {
                            let state = EventRouter::state_for_error(&e);
                            Self::handle_event_loop_error(state, &state_tx, &events_tx);
                            break;
                        }
                    }
                }
            }
        }

        debug!("MQTT event loop stopped");
    }

    /// Apply a routed event; returns false when the loop should stop
    fn process_event_route(
        route: EventRoute,
        state_tx: &watch::Sender<ConnectionState>,
        events_tx: &mpsc::UnboundedSender<SessionEvent>,
    ) -> bool {
        match &route {
            EventRoute::InfrastructureEvent(event) => {
                tracing::trace!(target: "mqtt_transport", "MQTT event: {}", event);
            }
            EventRoute::ConnectionRefused(code) => {
                warn!("Broker refused connection: {}", code);
            }
            _ => {}
        }

        if let Some(state) = EventRouter::next_state(&route) {
            let _ = state_tx.send(state);
        }
        if let Some(event) = EventRouter::session_event(&route) {
            // Receiver may already be gone; events are informational only
            let _ = events_tx.send(event);
        }

        EventRouter::keeps_running(&route)
    }

    /// Record an event loop failure; no reconnection is attempted
    fn handle_event_loop_error(
        state: ConnectionState,
        state_tx: &watch::Sender<ConnectionState>,
        events_tx: &mpsc::UnboundedSender<SessionEvent>,
    ) {
        let was_connected = state_tx.borrow().can_publish();
        let reason = state.reason().unwrap_or("event loop stopped").to_string();
        error!("MQTT event loop error: {}", reason);

        let _ = state_tx.send(state);
        if was_connected {
            let _ = events_tx.send(SessionEvent::ConnectionClosed { reason });
        }
    }

    /// Signal the event loop task to stop and abort it if it lingers
    fn stop_event_loop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
    }

    /// Get current connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Check connection state before operations
    fn check_connection_state(&self) -> Result<&AsyncClient, MqttError> {
        let current_state = self.connection_state();
        match &self.client {
            Some(client) if current_state.can_publish() => Ok(client),
            _ => Err(MqttError::NotConnected {
                state: current_state,
            }),
        }
    }

    /// Hand a message to the rumqttc client
    pub async fn publish(&self, message: OutgoingMessage) -> Result<PublishReceipt, MqttError> {
        let client = self.check_connection_state()?;
        let bytes = message.payload.len();

        client
            .publish(
                message.topic.as_str(),
                message.qos,
                message.retain,
                message.payload.to_vec(),
            )
            .await
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))?;

        debug!(topic = %message.topic, bytes, "Queued MQTT publish");
        Ok(PublishReceipt { bytes })
    }

    /// Send DISCONNECT and stop the event loop
    pub async fn disconnect(&mut self) -> Result<(), MqttError> {
        let Some(client) = self.client.take() else {
            debug!("Disconnect requested on a session that never connected");
            return Ok(());
        };

        let still_open = matches!(
            self.connection_state(),
            ConnectionState::Connected | ConnectionState::Connecting
        );
        let result = if still_open {
            client
                .disconnect()
                .await
                .map_err(|e| MqttError::DisconnectFailed(Box::new(e)))
        } else {
            Ok(())
        };

        // The event loop stops on its own once DISCONNECT is written
        if let Some(mut handle) = self.event_loop_handle.take() {
            match tokio::time::timeout(DISCONNECT_GRACE, &mut handle).await {
                Ok(Ok(())) => debug!("Event loop task shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!("Event loop task ended with error: {}", e);
                }
                Err(_) => {
                    warn!("Event loop task didn't shut down gracefully, forcing abort");
                    let _ = self.shutdown_tx.send(true);
                    handle.abort();
                }
                _ => {}
            }
        }

        if self.connection_state().reason().is_none() {
            let _ = self.state_tx.send(ConnectionState::Disconnected(
                "Client disconnected".to_string(),
            ));
        }

        info!("MQTT session disconnected");
        result
    }
}

/// Implementation of Transport trait for MqttSession
#[async_trait]
impl Transport for MqttSession {
    type Error = MqttError;

    async fn connect(&mut self, request: ConnectRequest) -> Result<(), Self::Error> {
        MqttSession::connect(self, request).await
    }

    async fn publish(&self, message: OutgoingMessage) -> Result<PublishReceipt, Self::Error> {
        MqttSession::publish(self, message).await
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        MqttSession::disconnect(self).await
    }

    fn is_connected(&self) -> bool {
        self.connection_state().can_publish()
    }

    fn connection_state(&self) -> ConnectionState {
        MqttSession::connection_state(self)
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.events_rx.take()
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        // Async disconnect cannot run here; only make sure the I/O task ends
        self.stop_event_loop();
    }
}

/// Creates a fresh [`MqttSession`] per run
#[derive(Debug, Clone, Copy, Default)]
pub struct MqttSessionFactory;

impl TransportFactory for MqttSessionFactory {
    type Transport = MqttSession;

    fn create(&self, settings: SessionSettings) -> PublisherResult<Self::Transport> {
        Ok(MqttSession::new(settings))
    }
}
