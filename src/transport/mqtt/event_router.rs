//! Pure routing of rumqttc events
//!
//! This module turns raw event loop output into routing decisions and state
//! transitions without touching any channel or socket.

use super::connection::ConnectionState;
use crate::transport::SessionEvent;
use rumqttc::{ConnectReturnCode, ConnectionError, Event, Outgoing, Packet};

/// Pure routing decisions based on MQTT events
pub struct EventRouter;

impl EventRouter {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(Packet::ConnAck(connack)) => {
                if connack.code == ConnectReturnCode::Success {
                    EventRoute::ConnectionAcknowledged
                } else {
                    EventRoute::ConnectionRefused(format!("{:?}", connack.code))
                }
            }
            Event::Incoming(Packet::Disconnect) => EventRoute::BrokerDisconnected,
            Event::Incoming(other) => EventRoute::InfrastructureEvent(format!("{other:?}")),
            Event::Outgoing(Outgoing::Publish(packet_id)) => EventRoute::PublishSent {
                packet_id: *packet_id,
            },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// State the session moves to after `route`, if it changes
    pub fn next_state(route: &EventRoute) -> Option<ConnectionState> {
        match route {
            EventRoute::ConnectionAcknowledged => Some(ConnectionState::Connected),
            EventRoute::ConnectionRefused(code) => Some(ConnectionState::Refused(code.clone())),
            EventRoute::BrokerDisconnected | EventRoute::DisconnectSent => Self::close_reason(route)
                .map(|reason| ConnectionState::Disconnected(reason.to_string())),
            EventRoute::PublishSent { .. }
            | EventRoute::InfrastructureEvent(_)
            | EventRoute::OutgoingEvent => None,
        }
    }

    /// Observer notification for `route`, if any
    pub fn session_event(route: &EventRoute) -> Option<SessionEvent> {
        match route {
            EventRoute::ConnectionAcknowledged => Some(SessionEvent::Connected),
            EventRoute::PublishSent { packet_id } => Some(SessionEvent::MessagePublished {
                packet_id: *packet_id,
            }),
            EventRoute::BrokerDisconnected | EventRoute::DisconnectSent => {
                Self::close_reason(route).map(|reason| SessionEvent::ConnectionClosed {
                    reason: reason.to_string(),
                })
            }
            EventRoute::ConnectionRefused(_)
            | EventRoute::InfrastructureEvent(_)
            | EventRoute::OutgoingEvent => None,
        }
    }

    /// State after the event loop fails; CONNACK refusals stay distinct
    /// from transport failures
    pub fn state_for_error(error: &ConnectionError) -> ConnectionState {
        match error {
            ConnectionError::ConnectionRefused(code) => ConnectionState::Refused(format!("{code:?}")),
            other => ConnectionState::Disconnected(other.to_string()),
        }
    }

    fn close_reason(route: &EventRoute) -> Option<&'static str> {
        match route {
            EventRoute::BrokerDisconnected => Some("Broker closed the connection"),
            EventRoute::DisconnectSent => Some("Client disconnected"),
            _ => None,
        }
    }

    /// Whether the event loop keeps polling after `route`
    pub fn keeps_running(route: &EventRoute) -> bool {
        !matches!(
            route,
            EventRoute::ConnectionRefused(_)
                | EventRoute::BrokerDisconnected
                | EventRoute::DisconnectSent
        )
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventRoute {
    /// CONNACK accepted - ready to publish
    ConnectionAcknowledged,
    /// CONNACK with a failure return code
    ConnectionRefused(String),
    /// Broker sent DISCONNECT
    BrokerDisconnected,
    /// A PUBLISH was written to the network
    PublishSent { packet_id: u16 },
    /// Our DISCONNECT was written to the network
    DisconnectSent,
    /// Other incoming packets (pings, acks)
    InfrastructureEvent(String),
    /// Other outgoing packets
    OutgoingEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::ConnAck;

    #[test]
    fn test_route_successful_connack() {
        let event = Event::Incoming(Packet::ConnAck(ConnAck::new(
            ConnectReturnCode::Success,
            false,
        )));
        let route = EventRouter::route_mqtt_event(&event);

        assert_eq!(route, EventRoute::ConnectionAcknowledged);
        assert_eq!(
            EventRouter::next_state(&route),
            Some(ConnectionState::Connected)
        );
        assert_eq!(
            EventRouter::session_event(&route),
            Some(SessionEvent::Connected)
        );
        assert!(EventRouter::keeps_running(&route));
    }

    #[test]
    fn test_route_refused_connack() {
        let event = Event::Incoming(Packet::ConnAck(ConnAck::new(
            ConnectReturnCode::BadUserNamePassword,
            false,
        )));
        let route = EventRouter::route_mqtt_event(&event);

        assert!(matches!(route, EventRoute::ConnectionRefused(_)));
        assert!(matches!(
            EventRouter::next_state(&route),
            Some(ConnectionState::Refused(reason)) if reason.contains("BadUserNamePassword")
        ));
        assert_eq!(EventRouter::session_event(&route), None);
        assert!(!EventRouter::keeps_running(&route));
    }

    #[test]
    fn test_route_outgoing_publish() {
        let route = EventRouter::route_mqtt_event(&Event::Outgoing(Outgoing::Publish(0)));

        assert_eq!(route, EventRoute::PublishSent { packet_id: 0 });
        assert_eq!(EventRouter::next_state(&route), None);
        assert_eq!(
            EventRouter::session_event(&route),
            Some(SessionEvent::MessagePublished { packet_id: 0 })
        );
        assert!(EventRouter::keeps_running(&route));
    }

    #[test]
    fn test_route_outgoing_disconnect() {
        let route = EventRouter::route_mqtt_event(&Event::Outgoing(Outgoing::Disconnect));

        assert_eq!(route, EventRoute::DisconnectSent);
        assert_eq!(
            EventRouter::session_event(&route),
            Some(SessionEvent::ConnectionClosed {
                reason: "Client disconnected".to_string()
            })
        );
        assert!(!EventRouter::keeps_running(&route));
    }

    #[test]
    fn test_route_broker_disconnect() {
        let route = EventRouter::route_mqtt_event(&Event::Incoming(Packet::Disconnect));

        assert_eq!(route, EventRoute::BrokerDisconnected);
        assert!(matches!(
            EventRouter::session_event(&route),
            Some(SessionEvent::ConnectionClosed { .. })
        ));
        assert!(!EventRouter::keeps_running(&route));
    }

    #[test]
    fn test_route_ping_is_infrastructure() {
        let route = EventRouter::route_mqtt_event(&Event::Incoming(Packet::PingResp));

        assert!(matches!(route, EventRoute::InfrastructureEvent(_)));
        assert_eq!(EventRouter::next_state(&route), None);
        assert_eq!(EventRouter::session_event(&route), None);
        assert!(EventRouter::keeps_running(&route));
    }

    #[test]
    fn test_refused_connack_error_maps_to_refused_state() {
        let error = ConnectionError::ConnectionRefused(ConnectReturnCode::NotAuthorized);
        assert_eq!(
            EventRouter::state_for_error(&error),
            ConnectionState::Refused("NotAuthorized".to_string())
        );
    }

    #[test]
    fn test_transport_error_maps_to_disconnected_state() {
        let error = ConnectionError::NetworkTimeout;
        assert!(matches!(
            EventRouter::state_for_error(&error),
            ConnectionState::Disconnected(_)
        ));
    }

    #[test]
    fn test_route_outgoing_ping() {
        let route = EventRouter::route_mqtt_event(&Event::Outgoing(Outgoing::PingReq));
        assert_eq!(route, EventRoute::OutgoingEvent);
    }
}
