use std::{future::Future, net::Ipv4Addr, time::Duration};

use framehub::{
    codec::MsgPackCodec,
    config::{EndpointConfig, HubConfig},
    endpoint::Endpoint,
    hub::{Hub, TcpHub},
    MessageEvent,
};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ChatMessage {
    author: String,
    text: String,
}

fn chat(author: &str, text: &str) -> ChatMessage {
    ChatMessage {
        author: author.to_string(),
        text: text.to_string(),
    }
}

async fn drain_until<F, Fut>(drain: F, want: usize) -> Vec<MessageEvent<ChatMessage>>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Vec<framehub::Result<MessageEvent<ChatMessage>>>>,
{
    let mut received = Vec::new();
    timeout(WAIT, async {
        while received.len() < want {
            for event in drain().await {
                received.push(event.expect("message should decode"));
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("messages never arrived");
    received
}

async fn wait_for_clients(hub: &TcpHub<MsgPackCodec<ChatMessage>>, count: usize) {
    timeout(WAIT, async {
        while hub.connection_count() != count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("clients never registered");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn hub_and_two_endpoints_exchange_messages() {
    let hub = TcpHub::new(
        HubConfig::new().bind_address(Ipv4Addr::LOCALHOST.into()).port(0),
        MsgPackCodec::<ChatMessage>::new(),
    );
    let addr = hub.open().await.unwrap();

    let config = EndpointConfig::new().host("127.0.0.1").port(addr.port());
    let alice = Endpoint::new(config.clone(), MsgPackCodec::<ChatMessage>::new());
    let bob = Endpoint::new(config, MsgPackCodec::<ChatMessage>::new());
    alice.open().await.unwrap();
    bob.open().await.unwrap();
    wait_for_clients(&hub, 2).await;

    alice.send(&chat("alice", "hello")).await.unwrap();

    let inbound = drain_until(|| hub.drain(), 1).await;
    assert_eq!(inbound.len(), 1);
    assert_eq!(inbound[0].data, chat("alice", "hello"));
    assert!(hub.registry().contains(inbound[0].conn_id));

    let report = hub.broadcast(&inbound[0].data).await.unwrap();
    assert_eq!(report.delivered_count(), 2);

    let at_alice = drain_until(|| alice.drain(), 1).await;
    let at_bob = drain_until(|| bob.drain(), 1).await;
    assert_eq!(at_alice[0].data, chat("alice", "hello"));
    assert_eq!(at_bob[0].data, chat("alice", "hello"));

    bob.close();
    wait_for_clients(&hub, 1).await;

    let report = hub.broadcast(&chat("hub", "still here")).await.unwrap();
    assert_eq!(report.delivered_count(), 1);
    let at_alice = drain_until(|| alice.drain(), 1).await;
    assert_eq!(at_alice[0].data.text, "still here");

    hub.close();
    timeout(WAIT, async {
        while alice.is_connected() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("endpoint never saw the hub close");
}
