//! Integration tests for the transport engine over loopback TCP.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    loopback, start_network, test_network_config, wait_for_clipboard, wait_for_peers, wait_until,
    RecordingEvents, SETTLE,
};
use syncboard_core::config::NetworkConfig;
use syncboard_core::network::Network;
use syncboard_core::protocol::DataType;
use syncboard_core::Error;

fn text(s: &str) -> Vec<u8> {
    s.as_bytes().to_vec()
}

/// Connect `from` to `to` and wait until both sides track the link.
async fn link(from: &Network, to: std::net::SocketAddr, to_network: &Network) {
    from.connect(to).await.expect("connect");
    wait_for_peers(from, 1).await;
    wait_for_peers(to_network, 1).await;
}

#[tokio::test]
async fn test_clipboard_syncs_both_ways() {
    let (first, first_addr) = start_network(Arc::new(()));
    let (second, _) = start_network(Arc::new(()));
    link(&second, first_addr, &first).await;

    second.broadcast(text("test 1"), DataType::Text).unwrap();
    wait_for_clipboard(&first, b"test 1").await;
    assert_eq!(second.current_clipboard().data, b"test 1");

    first.broadcast(text("test 2"), DataType::Text).unwrap();
    wait_for_clipboard(&second, b"test 2").await;
    assert_eq!(first.current_clipboard().data, b"test 2");

    let received = second.current_clipboard();
    assert_eq!(received.data_type, DataType::Text);
    assert_eq!(received.owner.map(|addr| addr.port()), Some(first_addr.port()));
    assert_eq!(first.current_clipboard().owner, None);

    first.stop().await;
    second.stop().await;
}

#[tokio::test]
async fn test_burst_of_updates_arrives_framed() {
    let recorder = Arc::new(RecordingEvents::default());
    let (receiver, receiver_addr) = start_network(recorder.clone());
    let (sender, _) = start_network(Arc::new(()));
    link(&sender, receiver_addr, &receiver).await;

    for i in 0..50 {
        sender.broadcast(format!("update {i}").into_bytes(), DataType::Text).unwrap();
    }

    wait_for_clipboard(&receiver, b"update 49").await;
    assert!(wait_until(SETTLE, || recorder.received_count() == 50).await);

    sender.stop().await;
    receiver.stop().await;
}

#[tokio::test]
async fn test_large_payload_spans_reads() {
    let (receiver, receiver_addr) = start_network(Arc::new(()));
    let (sender, _) = start_network(Arc::new(()));
    link(&sender, receiver_addr, &receiver).await;

    let payload: Vec<u8> = (0..200_000u32).map(|i| b'a' + (i % 26) as u8).collect();
    sender.broadcast(payload.clone(), DataType::Text).unwrap();
    wait_for_clipboard(&receiver, &payload).await;

    sender.stop().await;
    receiver.stop().await;
}

#[tokio::test]
async fn test_oversized_update_is_refused_and_links_survive() {
    let config = NetworkConfig {
        max_payload_size: 1024,
        ..test_network_config()
    };
    let receiver = Network::new(config.clone(), Arc::new(()));
    let receiver_addr = loopback(receiver.start().unwrap());
    let sender = Network::new(config, Arc::new(()));
    sender.start().unwrap();
    link(&sender, receiver_addr, &receiver).await;

    sender.broadcast(text("small"), DataType::Text).unwrap();
    wait_for_clipboard(&receiver, b"small").await;

    let err = sender.broadcast(vec![b'x'; 2048], DataType::Text).unwrap_err();
    assert!(matches!(err, Error::PayloadTooLarge(2048)));
    assert_eq!(sender.current_clipboard().data, b"small");

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(sender.live_peers().len(), 1);
    assert_eq!(receiver.live_peers().len(), 1);
    assert_eq!(receiver.current_clipboard().data, b"small");

    sender.broadcast(text("still linked"), DataType::Text).unwrap();
    wait_for_clipboard(&receiver, b"still linked").await;

    sender.stop().await;
    receiver.stop().await;
}

#[tokio::test]
async fn test_disconnect_stops_delivery_and_reconnect_restores_it() {
    let (first, first_addr) = start_network(Arc::new(()));
    let (second, second_addr) = start_network(Arc::new(()));
    link(&second, first_addr, &first).await;

    first.broadcast(text("before"), DataType::Text).unwrap();
    wait_for_clipboard(&second, b"before").await;

    second.disconnect(first_addr.ip(), Some(first_addr.port()));
    wait_for_peers(&second, 0).await;
    wait_for_peers(&first, 0).await;

    first.broadcast(text("after"), DataType::Text).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(second.current_clipboard().data, b"before");

    link(&first, second_addr, &second).await;
    first.broadcast(text("again"), DataType::Text).unwrap();
    wait_for_clipboard(&second, b"again").await;

    first.stop().await;
    second.stop().await;
}

#[tokio::test]
async fn test_disconnect_without_port_closes_all_links_to_host() {
    let (hub, hub_addr) = start_network(Arc::new(()));
    let (a, _) = start_network(Arc::new(()));
    let (b, _) = start_network(Arc::new(()));

    a.connect(hub_addr).await.unwrap();
    b.connect(hub_addr).await.unwrap();
    wait_for_peers(&hub, 2).await;

    hub.disconnect(hub_addr.ip(), None);
    wait_for_peers(&hub, 0).await;
    wait_for_peers(&a, 0).await;
    wait_for_peers(&b, 0).await;

    hub.stop().await;
    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_callbacks_report_inbound_and_loss() {
    let recorder = Arc::new(RecordingEvents::default());
    let (listener, listener_addr) = start_network(recorder.clone());
    let (dialer, _) = start_network(Arc::new(()));

    dialer.connect(listener_addr).await.unwrap();
    assert!(wait_until(SETTLE, || recorder.connected_count() == 1).await);
    assert_eq!(recorder.disconnected_count(), 0);

    dialer.stop().await;
    assert!(wait_until(SETTLE, || recorder.disconnected_count() == 1).await);
    wait_for_peers(&listener, 0).await;

    assert_eq!(
        recorder.connected.lock().unwrap()[0],
        recorder.disconnected.lock().unwrap()[0]
    );

    listener.stop().await;
}

#[tokio::test]
async fn test_explicit_disconnect_is_not_reported_locally() {
    let recorder = Arc::new(RecordingEvents::default());
    let (local, _) = start_network(recorder.clone());
    let (remote, remote_addr) = start_network(Arc::new(()));
    link(&local, remote_addr, &remote).await;

    local.disconnect(remote_addr.ip(), None);
    wait_for_peers(&local, 0).await;
    wait_for_peers(&remote, 0).await;
    assert_eq!(recorder.disconnected_count(), 0);

    local.stop().await;
    remote.stop().await;
}

#[tokio::test]
async fn test_stop_closes_links() {
    let (first, first_addr) = start_network(Arc::new(()));
    let (second, _) = start_network(Arc::new(()));
    link(&second, first_addr, &first).await;

    first.stop().await;
    assert!(!first.is_running());
    assert!(first.live_peers().is_empty());
    wait_for_peers(&second, 0).await;

    second.stop().await;
}

#[tokio::test]
async fn test_connect_to_closed_port_fails() {
    let (network, _) = start_network(Arc::new(()));

    let unused = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = unused.local_addr().unwrap();
    drop(unused);

    let err = network.connect(addr).await.unwrap_err();
    assert!(err.is_recoverable());
    assert!(matches!(err, Error::ConnectionFailed { .. } | Error::ConnectTimeout(_)));
    assert!(network.live_peers().is_empty());

    network.stop().await;
}

#[tokio::test]
async fn test_clipboard_subscription_sees_remote_update() {
    let (first, first_addr) = start_network(Arc::new(()));
    let (second, _) = start_network(Arc::new(()));
    link(&second, first_addr, &first).await;

    let mut updates = first.subscribe_clipboard();
    second.broadcast(text("watched"), DataType::Text).unwrap();

    tokio::time::timeout(SETTLE, updates.wait_for(|entry| entry.data == b"watched"))
        .await
        .expect("no clipboard update")
        .unwrap();

    first.stop().await;
    second.stop().await;
}
