#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
        sync::mpsc::unbounded_channel,
        time::timeout,
    };

    use crate::{
        codec::{Codec, MsgPackCodec},
        config::EndpointConfig,
        conn::ConnState,
        endpoint::Endpoint,
        framer::Framer,
        hub::Hub,
        types::{CloseReason, HubError, LifecycleEvent},
    };

    const WAIT: Duration = Duration::from_secs(5);

    type TextEndpoint = Endpoint<MsgPackCodec<String>>;

    fn endpoint() -> TextEndpoint {
        Endpoint::new(EndpointConfig::new(), MsgPackCodec::new())
    }

    fn text_frame(text: &str) -> Vec<u8> {
        let payload = MsgPackCodec::<String>::new().encode(&text.to_string()).unwrap();
        Framer::wrap(&payload).unwrap().to_vec()
    }

    async fn accept_one() -> (TcpListener, std::net::SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    async fn until<F: Fn() -> bool>(check: F) {
        timeout(WAIT, async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition never held");
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let endpoint = endpoint();

        let err = endpoint.send(&"hi".to_string()).await.unwrap_err();
        assert!(matches!(err, HubError::NotConnected));
        assert_eq!(endpoint.state(), None);
        assert!(!endpoint.is_connected());
    }

    #[tokio::test]
    async fn test_connect_refused_is_transport_error() {
        let port = {
            let unused = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            unused.local_addr().unwrap().port()
        };

        let err = endpoint().connect(("127.0.0.1", port)).await.unwrap_err();
        assert!(matches!(err, HubError::Transport(_)));
    }

    #[tokio::test]
    async fn test_send_writes_one_frame() {
        let (listener, addr) = accept_one().await;
        let endpoint = endpoint();

        let peer = endpoint.connect(addr).await.unwrap();
        let (mut server, _) = listener.accept().await.unwrap();
        assert_eq!(peer, addr);
        until(|| endpoint.is_connected()).await;

        endpoint.send(&"hello".to_string()).await.unwrap();

        let expected = text_frame("hello");
        let mut received = vec![0u8; expected.len()];
        timeout(WAIT, server.read_exact(&mut received))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn test_second_connect_is_rejected_while_open() {
        let (listener, addr) = accept_one().await;
        let endpoint = endpoint();

        endpoint.connect(addr).await.unwrap();
        let _server = listener.accept().await.unwrap();

        assert!(matches!(
            endpoint.connect(addr).await,
            Err(HubError::AlreadyStarted)
        ));
    }

    #[tokio::test]
    async fn test_drain_returns_received_messages() {
        let (listener, addr) = accept_one().await;
        let endpoint = endpoint();

        endpoint.connect(addr).await.unwrap();
        let (mut server, _) = listener.accept().await.unwrap();

        let mut stream = text_frame("a");
        stream.extend_from_slice(&Framer::wrap_keepalive());
        stream.extend_from_slice(&text_frame("b"));
        server.write_all(&stream).await.unwrap();

        let mut received = Vec::new();
        timeout(WAIT, async {
            while received.len() < 2 {
                for event in endpoint.drain().await {
                    let event = event.unwrap();
                    assert_eq!(Some(event.conn_id), endpoint.id());
                    received.push(event.data);
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("messages never arrived");

        assert_eq!(received, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_message_handler_receives_pushes() {
        let (listener, addr) = accept_one().await;
        let endpoint = endpoint();
        let (tx, mut rx) = unbounded_channel();
        endpoint.on_message(move |event| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(event.data);
            }
        });

        endpoint.connect(addr).await.unwrap();
        let (mut server, _) = listener.accept().await.unwrap();
        server.write_all(&text_frame("pushed")).await.unwrap();

        let received = timeout(WAIT, rx.recv()).await.unwrap();
        assert_eq!(received.as_deref(), Some("pushed"));
        assert!(endpoint.drain().await.is_empty());
    }

    #[tokio::test]
    async fn test_server_close_then_send_raises_disconnect() {
        let (listener, addr) = accept_one().await;
        let endpoint = endpoint();
        let (lifecycle_tx, mut lifecycle_rx) = unbounded_channel();
        let (disconnect_tx, mut disconnect_rx) = unbounded_channel();
        endpoint.on_lifecycle(move |event| {
            let tx = lifecycle_tx.clone();
            async move {
                let _ = tx.send(event);
            }
        });
        endpoint.on_disconnect(move |event| {
            let tx = disconnect_tx.clone();
            async move {
                let _ = tx.send(event);
            }
        });

        endpoint.connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        drop(server);

        let reason = timeout(WAIT, async {
            loop {
                if let Some(LifecycleEvent::Disconnected { reason, count, .. }) =
                    lifecycle_rx.recv().await
                {
                    assert_eq!(count, 0);
                    return reason;
                }
            }
        })
        .await
        .expect("no disconnect event");
        assert_eq!(reason, CloseReason::Peer);
        assert_eq!(endpoint.state(), Some(ConnState::ClosedByPeer));
        assert!(!endpoint.is_connected());

        let err = endpoint.send(&"too late".to_string()).await.unwrap_err();
        assert!(matches!(err, HubError::Transport(_)));

        let event = timeout(WAIT, disconnect_rx.recv()).await.unwrap().unwrap();
        assert_eq!(Some(event.conn_id), endpoint.id());
        assert_eq!(endpoint.state(), Some(ConnState::ClosedByPeer));
    }

    #[tokio::test]
    async fn test_disconnect_closes_socket() {
        let (listener, addr) = accept_one().await;
        let endpoint = endpoint();

        endpoint.connect(addr).await.unwrap();
        let (mut server, _) = listener.accept().await.unwrap();
        until(|| endpoint.is_connected()).await;

        Hub::close(&endpoint);

        until(|| endpoint.state() == Some(ConnState::ClosedLocally)).await;
        let mut buf = [0u8; 1];
        let read = timeout(WAIT, server.read(&mut buf)).await.unwrap();
        assert!(matches!(read, Ok(0) | Err(_)));
    }

    #[tokio::test]
    async fn test_reconnect_after_close() {
        let (listener, addr) = accept_one().await;
        let endpoint = endpoint();

        endpoint.connect(addr).await.unwrap();
        let _first = listener.accept().await.unwrap();
        let first_id = endpoint.id();
        endpoint.disconnect();

        endpoint.connect(addr).await.unwrap();
        let _second = listener.accept().await.unwrap();

        assert_ne!(endpoint.id(), first_id);
    }

    #[tokio::test]
    async fn test_open_uses_configured_address() {
        let (listener, addr) = accept_one().await;
        let endpoint = Endpoint::new(
            EndpointConfig::new().host("127.0.0.1").port(addr.port()),
            MsgPackCodec::<String>::new(),
        );

        let peer = endpoint.open().await.unwrap();
        let _server: TcpStream = listener.accept().await.unwrap().0;

        assert_eq!(peer, addr);
        endpoint.send_keepalive().await.unwrap();
    }
}
