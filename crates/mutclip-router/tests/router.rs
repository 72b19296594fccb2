//! Integration tests for the router and its tunnels.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use mutclip_protocol::{ConnectionId, Message};
use mutclip_router::{ConnectionTable, Router, RouterConfig, RouterError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn text(data: &str) -> Message {
    Message::Text { data: data.into() }
}

fn new_router() -> (Router, mutclip_router::Drain) {
    Router::new(RouterConfig::default(), CancellationToken::new())
}

// =========================================================================
// Registration
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_cancelled_connection_is_removed_after_grace() {
    let table = Arc::new(ConnectionTable::new());
    let (router, _drain) = Router::with_table(
        RouterConfig::default(),
        CancellationToken::new(),
        Arc::clone(&table),
    );
    let (tx, _rx) = mpsc::channel(4);
    let scope = CancellationToken::new();
    let id = router.connect(tx, scope.clone());

    scope.cancel();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(table.contains(id), "still registered during the grace delay");

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(!table.contains(id));
    assert!(matches!(
        router.send(id, Message::Ack).await,
        Err(RouterError::NotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_router_scope_cancellation_drops_everyone() {
    let scope = CancellationToken::new();
    let (router, _drain) = Router::new(RouterConfig::default(), scope.clone());
    let (tx, _rx) = mpsc::channel(4);
    router.connect(tx.clone(), CancellationToken::new());
    router.connect(tx, CancellationToken::new());

    scope.cancel();
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(router.connections().is_empty());
}

#[tokio::test]
async fn test_disconnect_cancels_connection_scope() {
    let (router, _drain) = new_router();
    let (tx, _rx) = mpsc::channel(4);
    let scope = CancellationToken::new();
    let id = router.connect(tx, scope.clone());

    router.disconnect(id).unwrap();
    assert!(scope.is_cancelled());
    assert!(matches!(
        router.disconnect(ConnectionId::new(u64::MAX)),
        Err(RouterError::NotFound(_))
    ));
}

// =========================================================================
// Delivery
// =========================================================================

#[tokio::test]
async fn test_send_reaches_sink() {
    let (router, _drain) = new_router();
    let (tx, mut rx) = mpsc::channel(4);
    let id = router.connect(tx, CancellationToken::new());

    router.send(id, text("hi")).await.unwrap();
    assert_eq!(rx.recv().await, Some(text("hi")));
}

#[tokio::test]
async fn test_send_to_unknown_id_is_not_found() {
    let (router, _drain) = new_router();
    let result = router.send(ConnectionId::new(u64::MAX), Message::Ack).await;
    assert!(matches!(result, Err(RouterError::NotFound(_))));
}

#[tokio::test]
async fn test_broadcast_skips_excluded_and_closed() {
    let (router, _drain) = new_router();
    let (tx_a, mut rx_a) = mpsc::channel(4);
    let (tx_b, mut rx_b) = mpsc::channel(4);
    let (tx_c, _rx_c) = mpsc::channel(4);
    let a = router.connect(tx_a, CancellationToken::new());
    router.connect(tx_b, CancellationToken::new());
    let c_scope = CancellationToken::new();
    router.connect(tx_c, c_scope.clone());
    c_scope.cancel();

    let delivered = router.broadcast(&text("x"), &HashSet::from([a])).await;

    assert_eq!(delivered, 1);
    assert_eq!(rx_b.recv().await, Some(text("x")));
    assert!(rx_a.try_recv().is_err());
}

// =========================================================================
// Tunnels
// =========================================================================

#[tokio::test]
async fn test_tunnel_captures_inbound_frames() {
    let (router, mut drain) = new_router();
    let (tx, _rx) = mpsc::channel(4);
    let id = router.connect(tx, CancellationToken::new());
    let ingress = router.ingress(id).unwrap();

    let mut tunnel = router.open_tunnel(id).unwrap();
    assert!(router.has_tunnel(id));

    ingress.push(Message::NextChunk).await.unwrap();
    assert_eq!(tunnel.recv().await.unwrap(), Message::NextChunk);
    assert!(drain.try_recv().is_err(), "drain must not see tunnelled frames");

    tunnel.close().await;
    assert!(!router.has_tunnel(id));

    ingress.push(Message::Ack).await.unwrap();
    let inbound = drain.recv().await.unwrap();
    assert_eq!(inbound.from, id);
    assert_eq!(inbound.message, Message::Ack);
}

#[tokio::test]
async fn test_second_tunnel_is_rejected() {
    let (router, _drain) = new_router();
    let (tx, _rx) = mpsc::channel(4);
    let id = router.connect(tx, CancellationToken::new());

    let first = router.open_tunnel(id).unwrap();
    assert!(matches!(
        router.open_tunnel(id),
        Err(RouterError::DuplicateTunnel(_))
    ));

    drop(first);
    assert!(router.open_tunnel(id).is_ok(), "dropping releases the rule");
}

#[tokio::test]
async fn test_tunnel_to_unknown_id_is_not_found() {
    let (router, _drain) = new_router();
    assert!(matches!(
        router.open_tunnel(ConnectionId::new(u64::MAX)),
        Err(RouterError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_close_flushes_outbound_queue() {
    let (router, _drain) = new_router();
    let (tx, mut rx) = mpsc::channel(8);
    let id = router.connect(tx, CancellationToken::new());

    let tunnel = router.open_tunnel(id).unwrap();
    for i in 0..3 {
        tunnel
            .send(Message::Chunk {
                index: i,
                data: vec![i as u8],
            })
            .await
            .unwrap();
    }
    tunnel.close().await;

    for i in 0..3 {
        match rx.recv().await {
            Some(Message::Chunk { index, .. }) => assert_eq!(index, i),
            other => panic!("expected chunk {i}, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_recv_fails_when_connection_cancelled() {
    let (router, _drain) = new_router();
    let (tx, _rx) = mpsc::channel(4);
    let scope = CancellationToken::new();
    let id = router.connect(tx, scope.clone());
    let mut tunnel = router.open_tunnel(id).unwrap();

    scope.cancel();
    assert!(matches!(tunnel.recv().await, Err(RouterError::Closed(_))));
    assert!(matches!(
        tunnel.send(Message::Ack).await,
        Err(RouterError::Closed(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_recv_timeout_expires() {
    let (router, _drain) = new_router();
    let (tx, _rx) = mpsc::channel(4);
    let id = router.connect(tx, CancellationToken::new());
    let mut tunnel = router.open_tunnel(id).unwrap();

    let result = tunnel.recv_timeout(Duration::from_secs(30)).await;
    assert!(matches!(result, Err(RouterError::Timeout(t)) if t == id));
}

#[tokio::test]
async fn test_open_tunnel_on_cancelled_connection_is_closed() {
    let (router, _drain) = new_router();
    let (tx, _rx) = mpsc::channel(4);
    let scope = CancellationToken::new();
    let id = router.connect(tx, scope.clone());
    scope.cancel();

    assert!(matches!(
        router.open_tunnel(id),
        Err(RouterError::Closed(_))
    ));
}
