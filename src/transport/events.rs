//! Session events emitted by the transport's I/O task
//!
//! The MQTT event loop runs on its own task. Instead of invoking callbacks it
//! sends [`SessionEvent`]s down an unbounded channel; the workflow drains them
//! on a separate task purely for console reporting.

use tokio::sync::mpsc;
use tracing::{debug, info};

/// Notifications from the transport's I/O task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Broker accepted the connection
    Connected,
    /// A publish left the client (for QoS 0 this is local send completion,
    /// not a broker acknowledgement)
    MessagePublished { packet_id: u16 },
    /// Connection closed, intentionally or not
    ConnectionClosed { reason: String },
}

/// Counts of the events seen by [`observe_session_events`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventTally {
    pub connected: u32,
    pub published: u32,
    pub closed: u32,
}

/// Drain the event channel until every sender is dropped
pub async fn observe_session_events(
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
) -> EventTally {
    let mut tally = EventTally::default();

    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Connected => {
                tally.connected += 1;
                debug!("Session established");
            }
            SessionEvent::MessagePublished { packet_id } => {
                tally.published += 1;
                debug!(packet_id, "Transport reported publish");
                info!("Message successfully published to GCP IoT Core.");
            }
            SessionEvent::ConnectionClosed { reason } => {
                tally.closed += 1;
                debug!(reason = %reason, "Transport reported close");
                info!("Connection to GCP IoT Core closed.");
            }
        }
    }

    tally
}
