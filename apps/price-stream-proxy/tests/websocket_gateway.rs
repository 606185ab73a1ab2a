//! WebSocket Gateway Integration Tests
//!
//! Runs the gateway on an ephemeral port and talks to it with a real
//! WebSocket client.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use price_stream_proxy::{
    GatewayServer, GatewayState, InMemoryPriceLink, PriceFeedHandle, PriceUpdate,
    SubscriptionService, SubscriptionServiceConfig,
};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(2);

struct TestGateway {
    addr: SocketAddr,
    service: Arc<SubscriptionService>,
    feed: PriceFeedHandle,
    shutdown: CancellationToken,
}

async fn setup_gateway() -> TestGateway {
    let (link, feed) = InMemoryPriceLink::channel();
    let shutdown = CancellationToken::new();
    let service = SubscriptionService::start(
        Arc::new(link),
        SubscriptionServiceConfig::default(),
        &shutdown,
    )
    .unwrap();

    let state = Arc::new(GatewayState::new(Arc::clone(&service), shutdown.clone()));
    let server = GatewayServer::bind("127.0.0.1:0".parse().unwrap(), state)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move {
        server.run().await.unwrap();
    });

    TestGateway {
        addr,
        service,
        feed,
        shutdown,
    }
}

async fn connect(gateway: &TestGateway) -> Client {
    let (ws, _response) = timeout(WAIT, connect_async(format!("ws://{}/subscribe", gateway.addr)))
        .await
        .unwrap()
        .unwrap();
    ws
}

async fn send_names(ws: &mut Client, body: &str) {
    ws.send(Message::text(body)).await.unwrap();
}

async fn next_update(ws: &mut Client) -> serde_json::Value {
    loop {
        let message = timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("connection ended")
            .unwrap();
        match message {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Resolves once the server closed the connection.
async fn expect_closed(ws: &mut Client) {
    timeout(WAIT, async {
        while let Some(message) = ws.next().await {
            match message {
                Ok(Message::Close(_)) | Err(_) => return,
                Ok(_) => {}
            }
        }
    })
    .await
    .expect("connection was not closed");
}

async fn wait_for_push(feed: &PriceFeedHandle, expected: &[&str]) {
    let expected: BTreeSet<String> = expected.iter().map(|s| (*s).to_string()).collect();
    timeout(WAIT, async {
        while feed.last_push().as_ref() != Some(&expected) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("interest set was never pushed");
}

async fn wait_for_subscribers(service: &SubscriptionService, count: usize) {
    timeout(WAIT, async {
        while service.stats().subscribers != count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("subscriber count never settled");
}

#[tokio::test]
async fn test_subscriber_receives_requested_symbols() {
    let gateway = setup_gateway().await;
    let mut ws = connect(&gateway).await;

    send_names(&mut ws, r#"{"names":["gold"]}"#).await;
    wait_for_push(&gateway.feed, &["gold"]).await;

    gateway.feed.send_batch(vec![
        PriceUpdate::new("oil", 80.0, 80.5),
        PriceUpdate::new("gold", 1900.0, 1901.5),
    ]);

    let update = next_update(&mut ws).await;
    assert_eq!(update["symbol"], "gold");
    assert_eq!(update["sellPrice"], 1900.0);
    assert_eq!(update["buyPrice"], 1901.5);
}

#[tokio::test]
async fn test_new_request_replaces_interest() {
    let gateway = setup_gateway().await;
    let mut ws = connect(&gateway).await;

    send_names(&mut ws, r#"{"names":["gold"]}"#).await;
    wait_for_push(&gateway.feed, &["gold"]).await;
    send_names(&mut ws, r#"{"names":["oil"]}"#).await;
    wait_for_push(&gateway.feed, &["oil"]).await;

    gateway.feed.send_batch(vec![
        PriceUpdate::new("gold", 1900.0, 1901.5),
        PriceUpdate::new("oil", 80.0, 80.5),
    ]);

    assert_eq!(next_update(&mut ws).await["symbol"], "oil");
}

#[tokio::test]
async fn test_binary_request_is_accepted() {
    let gateway = setup_gateway().await;
    let mut ws = connect(&gateway).await;

    ws.send(Message::binary(br#"{"names":["tesla"]}"#.to_vec()))
        .await
        .unwrap();
    wait_for_push(&gateway.feed, &["tesla"]).await;

    gateway
        .feed
        .send_batch(vec![PriceUpdate::new("tesla", 250.0, 251.0)]);
    assert_eq!(next_update(&mut ws).await["symbol"], "tesla");
}

#[tokio::test]
async fn test_interest_union_across_clients() {
    let gateway = setup_gateway().await;
    let mut first = connect(&gateway).await;
    let mut second = connect(&gateway).await;

    send_names(&mut first, r#"{"names":["tesla","gold"]}"#).await;
    wait_for_push(&gateway.feed, &["gold", "tesla"]).await;
    send_names(&mut second, r#"{"names":["tesla"]}"#).await;
    timeout(WAIT, async {
        while gateway.service.stats().active_subscribers < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("second interest set never applied");

    gateway
        .feed
        .send_batch(vec![PriceUpdate::new("tesla", 250.0, 251.0)]);
    assert_eq!(next_update(&mut first).await["symbol"], "tesla");
    assert_eq!(next_update(&mut second).await["symbol"], "tesla");

    first.close(None).await.unwrap();
    wait_for_push(&gateway.feed, &["tesla"]).await;
    wait_for_subscribers(&gateway.service, 1).await;
}

#[tokio::test]
async fn test_invalid_request_closes_connection() {
    let gateway = setup_gateway().await;
    let mut ws = connect(&gateway).await;
    wait_for_subscribers(&gateway.service, 1).await;

    send_names(&mut ws, r#"{"names":["g0ld"]}"#).await;

    expect_closed(&mut ws).await;
    wait_for_subscribers(&gateway.service, 0).await;
    assert!(gateway.service.watched_symbols().is_empty());
}

#[tokio::test]
async fn test_disconnect_withdraws_interest() {
    let gateway = setup_gateway().await;
    let mut ws = connect(&gateway).await;

    send_names(&mut ws, r#"{"names":["gold","oil"]}"#).await;
    wait_for_push(&gateway.feed, &["gold", "oil"]).await;

    drop(ws);

    wait_for_subscribers(&gateway.service, 0).await;
    wait_for_push(&gateway.feed, &[]).await;
}

#[tokio::test]
async fn test_upstream_fault_closes_clients() {
    let gateway = setup_gateway().await;
    let mut ws = connect(&gateway).await;
    wait_for_subscribers(&gateway.service, 1).await;

    gateway.feed.fail("stream reset");

    expect_closed(&mut ws).await;
    assert!(gateway.service.upstream().is_faulted());
}

#[tokio::test]
async fn test_shutdown_closes_clients() {
    let gateway = setup_gateway().await;
    let mut ws = connect(&gateway).await;
    wait_for_subscribers(&gateway.service, 1).await;

    gateway.shutdown.cancel();

    expect_closed(&mut ws).await;
}
