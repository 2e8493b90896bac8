#[cfg(test)]
mod tests {
    use std::{
        collections::{HashMap, HashSet},
        io,
        net::SocketAddr,
        pin::Pin,
        sync::{Arc, Mutex},
        task::{Context, Poll},
        time::Duration,
    };

    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, DuplexStream, ReadBuf};
    use tokio_util::sync::CancellationToken;

    use crate::{
        conn::{ConnId, ConnState, Connection},
        framer::Framer,
        handle::Broadcaster,
        registry::Registry,
        types::CloseReason,
    };

    // Duplex stream whose writes can be made to fail
    #[derive(Debug)]
    struct MockStream {
        inner: DuplexStream,
        fail_writes: bool,
    }

    impl AsyncRead for MockStream {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Pin::new(&mut self.inner).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for MockStream {
        fn poll_write(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            if self.fail_writes {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "mock write failure",
                )));
            }
            Pin::new(&mut self.inner).poll_write(cx, buf)
        }

        fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.inner).poll_flush(cx)
        }

        fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.inner).poll_shutdown(cx)
        }
    }

    fn mock_client(
        registry: &Registry<MockStream>,
        fail_writes: bool,
    ) -> (Arc<Connection<MockStream>>, DuplexStream) {
        let (inner, peer) = tokio::io::duplex(64 * 1024);
        let addr: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let stream = MockStream { inner, fail_writes };
        let (conn, _reader) =
            Connection::new(stream, addr, Framer::default(), CancellationToken::new());
        registry.add(Arc::clone(&conn));
        (conn, peer)
    }

    type Peers = Arc<Mutex<HashMap<ConnId, DuplexStream>>>;

    fn duplex_client(registry: &Registry<DuplexStream>, peers: &Peers) -> ConnId {
        let (stream, peer) = tokio::io::duplex(64 * 1024);
        let addr: SocketAddr = "127.0.0.1:5001".parse().unwrap();
        let (conn, _reader) =
            Connection::new(stream, addr, Framer::default(), CancellationToken::new());
        peers.lock().unwrap().insert(conn.id(), peer);
        registry.add(Arc::clone(&conn));
        conn.id()
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_client() {
        let registry = Registry::new();
        let mut peers = Vec::new();
        for _ in 0..3 {
            peers.push(mock_client(&registry, false));
        }
        let broadcaster = Broadcaster::new(registry.clone());
        let frame = Framer::wrap(b"hello everyone").unwrap();

        let report = broadcaster.emit(frame.clone()).await;

        assert!(report.is_clean());
        assert_eq!(report.delivered_count(), 3);
        for (_, peer) in &mut peers {
            let mut received = vec![0u8; frame.len()];
            peer.read_exact(&mut received).await.unwrap();
            assert_eq!(received, frame.to_vec());
        }
    }

    #[tokio::test]
    async fn test_failed_write_removes_only_that_client() {
        let registry = Registry::new();
        let (first, mut first_peer) = mock_client(&registry, false);
        let (broken, _broken_peer) = mock_client(&registry, true);
        let (third, mut third_peer) = mock_client(&registry, false);
        let broadcaster = Broadcaster::new(registry.clone());
        let frame = Framer::wrap(b"payload").unwrap();

        let report = broadcaster.emit(frame.clone()).await;

        assert_eq!(report.delivered, vec![first.id(), third.id()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, broken.id());
        assert_eq!(report.failed[0].1.kind(), io::ErrorKind::BrokenPipe);

        assert_eq!(registry.count(), 2);
        assert!(!registry.contains(broken.id()));
        assert_eq!(broken.state(), ConnState::ClosedByError);
        assert!(matches!(
            broken.close_reason(),
            Some(CloseReason::Failed(cause)) if cause.starts_with("write failed")
        ));

        let mut a = vec![0u8; frame.len()];
        let mut b = vec![0u8; frame.len()];
        first_peer.read_exact(&mut a).await.unwrap();
        third_peer.read_exact(&mut b).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a, frame.to_vec());
    }

    #[tokio::test]
    async fn test_closed_client_is_pruned() {
        let registry = Registry::new();
        let (open, _open_peer) = mock_client(&registry, false);
        let (closed, _closed_peer) = mock_client(&registry, false);
        closed.close();

        let report = Broadcaster::new(registry.clone())
            .emit(Framer::wrap_keepalive())
            .await;

        assert_eq!(report.delivered, vec![open.id()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(registry.count(), 1);
        assert_eq!(closed.state(), ConnState::ClosedLocally);
    }

    #[tokio::test]
    async fn test_broadcast_to_empty_registry() {
        let registry: Registry<MockStream> = Registry::new();

        let report = Broadcaster::new(registry).emit(Framer::wrap_keepalive()).await;

        assert!(report.is_clean());
        assert_eq!(report.delivered_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_broadcast_during_registry_churn() {
        let registry = Registry::new();
        let peers: Peers = Arc::new(Mutex::new(HashMap::new()));

        let stable: Vec<_> = (0..16).map(|_| duplex_client(&registry, &peers)).collect();
        let removed_before: Vec<_> = (0..8).map(|_| duplex_client(&registry, &peers)).collect();
        for id in &removed_before {
            assert!(registry.remove(*id).is_some());
        }

        let barrier = Arc::new(tokio::sync::Barrier::new(5));
        let mut churn = Vec::new();
        for _ in 0..4 {
            let registry = registry.clone();
            let peers = Arc::clone(&peers);
            let barrier = Arc::clone(&barrier);
            churn.push(tokio::spawn(async move {
                barrier.wait().await;
                for i in 0..50 {
                    let id = duplex_client(&registry, &peers);
                    if i % 2 == 0 {
                        registry.remove(id);
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }

        let frame = Framer::wrap(b"during churn").unwrap();
        let broadcaster = Broadcaster::new(registry.clone());
        barrier.wait().await;
        let report = broadcaster.emit(frame.clone()).await;
        for task in churn {
            task.await.unwrap();
        }

        assert!(report.is_clean());
        let delivered: HashSet<_> = report.delivered.iter().copied().collect();
        assert_eq!(delivered.len(), report.delivered.len());
        for id in &stable {
            assert!(delivered.contains(id), "stable record {id} missed the frame");
        }
        for id in &removed_before {
            assert!(!delivered.contains(id), "removed record {id} got the frame");
        }

        let mut peers = std::mem::take(&mut *peers.lock().unwrap());
        for id in &delivered {
            let peer = peers.get_mut(id).expect("delivered to an unknown record");
            let mut received = vec![0u8; frame.len()];
            tokio::time::timeout(Duration::from_secs(5), peer.read_exact(&mut received))
                .await
                .expect("frame never arrived")
                .unwrap();
            assert_eq!(received, frame.to_vec());
        }
        for id in &removed_before {
            let peer = peers.get_mut(id).unwrap();
            let mut byte = [0u8; 1];
            let read = tokio::time::timeout(Duration::from_millis(20), peer.read(&mut byte)).await;
            assert!(matches!(read, Ok(Ok(0)) | Err(_)), "removed record {id} received bytes");
        }
    }
}
