#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use crate::{
        conn::{ConnId, ConnState},
        types::{CloseReason, DisconnectEvent, HubError, LifecycleEvent},
    };

    #[test]
    fn test_close_reason_states() {
        assert_eq!(CloseReason::Peer.state(), ConnState::ClosedByPeer);
        assert_eq!(CloseReason::Local.state(), ConnState::ClosedLocally);
        assert_eq!(
            CloseReason::Failed("boom".into()).state(),
            ConnState::ClosedByError
        );
        assert!(CloseReason::Failed("boom".into()).is_failure());
        assert!(!CloseReason::Peer.is_failure());
    }

    #[test]
    fn test_closed_states() {
        assert!(!ConnState::Connecting.is_closed());
        assert!(!ConnState::Open.is_closed());
        assert!(ConnState::ClosedByPeer.is_closed());
        assert!(ConnState::ClosedByError.is_closed());
        assert!(ConnState::ClosedLocally.is_closed());
    }

    #[test]
    fn test_lifecycle_display() {
        let addr: SocketAddr = "10.0.0.1:11000".parse().unwrap();
        let id = ConnId::new();

        assert_eq!(
            LifecycleEvent::Listening { addr }.to_string(),
            "Listening on 10.0.0.1:11000"
        );
        assert_eq!(
            LifecycleEvent::WaitingForConnection.to_string(),
            "Waiting for new connection..."
        );
        assert_eq!(
            LifecycleEvent::Connected { id, addr, count: 2 }.to_string(),
            format!(
                "New connection accepted. Id: {id}, Endpoint: 10.0.0.1:11000. \
                 Current client count: 2"
            )
        );
        assert_eq!(
            LifecycleEvent::Disconnected {
                id,
                reason: CloseReason::Peer,
                count: 0
            }
            .to_string(),
            format!("Client {id} disconnected (connection closed by peer). Current client count: 0")
        );
    }

    #[test]
    fn test_disconnect_event_display() {
        let id = ConnId::new();
        let event = DisconnectEvent {
            conn_id: id,
            cause: "broken pipe".into(),
        };

        assert_eq!(event.to_string(), format!("Disconnected {id}: broken pipe"));
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            HubError::ProtocolViolation { length: -4 }.to_string(),
            "protocol violation: invalid message length -4"
        );
        assert_eq!(
            HubError::BacklogExceeded { limit: 8 }.to_string(),
            "inbound backlog exceeded 8 messages"
        );

        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(HubError::from(io), HubError::Transport(_)));
    }
}
