//! Acceptance tests for the overlay.
//!
//! These tests run real overlays over loopback TCP and verify:
//! 1. Exchange - Two overlays connect and exchange lines
//! 2. Broadcast - One write reaches every peer with the same encoding
//! 3. Disconnect - A remote close removes the peer and notifies once
//! 4. Middleware order - Stages run in registration order end to end
//! 5. Maintainer - Seeds are dialed while below `min_peers`
//! 6. Dial failure - A refused dial leaves no trace

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};

use mesh_overlay::middleware::from_fn;
use mesh_overlay::{
    Inbox, MiddlewareContext, Outlet, Overlay, OverlayConfig, OverlayEvent, PeerAddr, PeerConnection, Payload,
    Transform, TransformError, TransformFactory,
};

/// Timeout for anything that needs the network to make progress.
const NET_TIMEOUT_MS: u64 = 5000;

/// Create a test config that never dials on its own.
fn test_config() -> OverlayConfig {
    OverlayConfig::new()
        .with_min_peers(0)
        .with_max_peers(8)
        .with_maintenance_interval(Duration::from_millis(100))
        .with_dial_timeout(Duration::from_secs(2))
}

fn any_port() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn loopback(addr: SocketAddr) -> PeerAddr {
    PeerAddr::new("127.0.0.1", addr.port())
}

/// Create an overlay listening on an OS-assigned port.
async fn listening_overlay(config: OverlayConfig) -> (Overlay, Inbox, SocketAddr) {
    let (overlay, inbox) = Overlay::new(config).unwrap();
    let handle = overlay.listen(any_port()).await.unwrap();
    (overlay, inbox, handle.local_addr())
}

/// Poll a condition until it's true or timeout.
async fn wait_for<F>(timeout_ms: u64, poll_ms: u64, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    let timeout_duration = Duration::from_millis(timeout_ms);
    let poll_duration = Duration::from_millis(poll_ms);

    loop {
        if condition() {
            return true;
        }
        if start.elapsed() > timeout_duration {
            return false;
        }
        sleep(poll_duration).await;
    }
}

async fn next_item(inbox: &mut Inbox) -> Payload {
    timeout(Duration::from_millis(NET_TIMEOUT_MS), inbox.recv())
        .await
        .expect("timed out waiting for inbox")
        .expect("inbox closed")
}

async fn next_event(events: &mut broadcast::Receiver<OverlayEvent>) -> OverlayEvent {
    timeout(Duration::from_millis(NET_TIMEOUT_MS), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Appends its tag to every text item.
fn tagger(tag: &'static str) -> impl TransformFactory {
    move |_peer: &Arc<PeerConnection>| -> Box<dyn Transform> {
        from_fn(tag, move |item, out| {
            let text = item.as_text().unwrap_or_default().to_string();
            out.push(text + tag);
            Ok(())
        })
    }
}

#[tokio::test]
async fn test_two_overlays_exchange_lines() {
    let (a, mut inbox_a, addr_a) = listening_overlay(test_config()).await;
    a.use_named(&["lines"]).unwrap();

    let (b, mut inbox_b) = Overlay::new(test_config()).unwrap();
    b.use_named(&["lines"]).unwrap();
    b.connect(loopback(addr_a));

    assert!(
        wait_for(NET_TIMEOUT_MS, 20, || {
            a.peers().len() == 1 && b.peers().first().is_some_and(|p| p.state().is_connected())
        })
        .await,
        "overlays should connect"
    );

    assert_eq!(b.write("hello from b\n"), 1);
    assert_eq!(next_item(&mut inbox_a).await, Payload::from("hello from b"));

    assert_eq!(a.write("hello from a\n"), 1);
    assert_eq!(next_item(&mut inbox_b).await, Payload::from("hello from a"));

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn test_json_broadcast_reaches_every_peer() {
    let (hub, _hub_inbox, hub_addr) = listening_overlay(test_config()).await;

    let mut leaves = Vec::new();
    for _ in 0..2 {
        let (leaf, inbox) = Overlay::new(test_config()).unwrap();
        leaf.use_named(&["json"]).unwrap();
        leaf.connect(loopback(hub_addr));
        leaves.push((leaf, inbox));
    }

    assert!(
        wait_for(NET_TIMEOUT_MS, 20, || hub.peers().len() == 2).await,
        "both leaves should connect"
    );

    assert_eq!(hub.write_value(&json!({"a": 1})), 2);
    for (_, inbox) in leaves.iter_mut() {
        assert_eq!(next_item(inbox).await, Payload::from(json!({"a": 1})));
    }

    hub.shutdown().await;
    for (leaf, _) in &leaves {
        leaf.shutdown().await;
    }
}

#[tokio::test]
async fn test_remote_close_notifies_once() {
    let (a, _inbox_a, addr_a) = listening_overlay(test_config()).await;
    let mut events = a.subscribe();

    let (b, _inbox_b) = Overlay::new(test_config()).unwrap();
    b.connect(loopback(addr_a));

    let (peer, addr) = match next_event(&mut events).await {
        OverlayEvent::PeerConnected { peer, addr } => (peer, addr),
        other => panic!("unexpected event {:?}", other),
    };
    assert!(addr.as_ref().is_some_and(PeerAddr::is_loopback));
    assert_eq!(a.peers().len(), 1);

    b.shutdown().await;

    assert_eq!(
        next_event(&mut events).await,
        OverlayEvent::PeerDisconnected { peer, addr }
    );
    assert!(a.peers().is_empty());

    // No second notification for the same connection.
    let again = timeout(Duration::from_millis(300), events.recv()).await;
    assert!(again.is_err(), "unexpected extra event: {:?}", again);

    a.shutdown().await;
}

#[tokio::test]
async fn test_middleware_runs_in_registration_order() {
    let (a, mut inbox_a, addr_a) = listening_overlay(test_config()).await;
    a.use_named(&["lines"]).unwrap();
    a.use_all(vec![
        Arc::new(tagger("A")) as Arc<dyn TransformFactory>,
        Arc::new(tagger("B")) as Arc<dyn TransformFactory>,
    ])
    .unwrap();

    let (b, _inbox_b) = Overlay::new(test_config()).unwrap();
    b.connect(loopback(addr_a));
    assert!(wait_for(NET_TIMEOUT_MS, 20, || a.peers().len() == 1).await);

    b.write("x\ny\n");
    assert_eq!(next_item(&mut inbox_a).await, Payload::from("xAB"));
    assert_eq!(next_item(&mut inbox_a).await, Payload::from("yAB"));

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn test_init_hook_sees_wired_connection() {
    struct Announce;

    struct AnnounceTransform;

    impl TransformFactory for Announce {
        fn name(&self) -> &str {
            "announce"
        }

        fn create(&self, _peer: &Arc<PeerConnection>) -> Result<Box<dyn Transform>, TransformError> {
            Ok(Box::new(AnnounceTransform))
        }
    }

    impl Transform for AnnounceTransform {
        fn init(&mut self, ctx: &MiddlewareContext, peer: &Arc<PeerConnection>) -> Result<(), TransformError> {
            ctx.notify("wired", json!({ "peer": peer.id().0 }));
            Ok(())
        }

        fn transform(&mut self, item: Payload, out: &mut Outlet) -> Result<(), TransformError> {
            out.push(item);
            Ok(())
        }
    }

    let (a, _inbox_a, addr_a) = listening_overlay(test_config()).await;
    a.use_middleware(Announce).unwrap();
    let mut events = a.subscribe();

    let (b, _inbox_b) = Overlay::new(test_config()).unwrap();
    b.connect(loopback(addr_a));

    match next_event(&mut events).await {
        OverlayEvent::Notice { topic, payload } => {
            assert_eq!(topic, "wired");
            assert!(payload["peer"].is_u64());
        }
        other => panic!("expected the init notice first, got {:?}", other),
    }
    assert!(matches!(
        next_event(&mut events).await,
        OverlayEvent::PeerConnected { .. }
    ));

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn test_maintainer_dials_seeds() {
    let (seed_a, _inbox_a, addr_a) = listening_overlay(test_config()).await;
    let (seed_c, _inbox_c, addr_c) = listening_overlay(test_config()).await;

    let config = test_config()
        .with_min_peers(3)
        .with_seeds(vec![loopback(addr_a), loopback(addr_c)]);
    let (b, _inbox_b) = Overlay::new(config).unwrap();
    assert!(b.start());

    assert!(
        wait_for(NET_TIMEOUT_MS, 20, || seed_a.peers().len() == 1 && seed_c.peers().len() == 1).await,
        "maintainer should dial both seeds"
    );

    // Later ticks must not pile up duplicate links.
    sleep(Duration::from_millis(350)).await;
    assert_eq!(seed_a.peers().len(), 1);
    assert_eq!(seed_c.peers().len(), 1);
    assert_eq!(b.peers().len(), 2);

    b.shutdown().await;
    seed_a.shutdown().await;
    seed_c.shutdown().await;
}

#[tokio::test]
async fn test_failed_dial_is_discarded() {
    // Reserve a port, then free it so nothing is listening there.
    let closed_port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let (b, _inbox_b) = Overlay::new(test_config()).unwrap();
    let mut events = b.subscribe();
    let conn = b.connect(PeerAddr::new("127.0.0.1", closed_port));
    assert!(conn.state().is_connecting());

    assert!(
        wait_for(NET_TIMEOUT_MS, 20, || b.peers().is_empty()).await,
        "failed dial should leave the registry"
    );
    assert!(conn.state().is_closed());
    assert!(events.try_recv().is_err(), "a failed dial must not notify");

    b.shutdown().await;
}
