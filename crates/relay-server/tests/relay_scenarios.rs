// crates/relay-server/tests/relay_scenarios.rs
//
// Whole-relay scenarios over the in-memory transport: registry task,
// supervisors and fan-out together, no sockets.

use std::time::Duration;

use bytes::Bytes;
use relay_core::BackpressurePolicy;
use relay_server::supervisor::ExitReason;
use relay_server::transport::memory::{self, MemoryPeer};
use relay_server::Relay;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(2);

fn connect(relay: &Relay) -> (relay_core::ConnectionId, MemoryPeer, tokio::task::JoinHandle<relay_server::supervisor::SupervisorExit>) {
    let (source, sink, peer) = memory::pair();
    let (id, handle) = relay.admit(source, sink).expect("registry running");
    (id, peer, handle)
}

async fn wait_for_members(relay: &Relay, n: usize) {
    timeout(WAIT, async {
        loop {
            if relay.snapshot().await.expect("registry running").members.len() == n {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("membership never reached the expected size");
}

#[tokio::test]
async fn everyone_but_the_sender_receives() {
    let (relay, _registry) = Relay::start(BackpressurePolicy::default());
    let (_a, mut a, _ha) = connect(&relay);
    let (_b, mut b, _hb) = connect(&relay);
    let (_c, mut c, _hc) = connect(&relay);
    wait_for_members(&relay, 3).await;

    a.send("hi");

    assert_eq!(timeout(WAIT, b.recv()).await.unwrap(), Some(Bytes::from("hi")));
    assert_eq!(timeout(WAIT, c.recv()).await.unwrap(), Some(Bytes::from("hi")));
    sleep(Duration::from_millis(20)).await;
    assert_eq!(a.try_recv(), None);
}

#[tokio::test]
async fn per_sender_order_is_preserved() {
    let (relay, _registry) = Relay::start(BackpressurePolicy::default());
    let (_a, a, _ha) = connect(&relay);
    let (_b, mut b, _hb) = connect(&relay);
    wait_for_members(&relay, 2).await;

    for i in 0..50 {
        a.send(format!("m{i}"));
    }

    for i in 0..50 {
        let got = timeout(WAIT, b.recv()).await.unwrap().unwrap();
        assert_eq!(got, Bytes::from(format!("m{i}")));
    }
}

#[tokio::test]
async fn failed_reader_leaves_once_and_gets_nothing_more() {
    let (relay, _registry) = Relay::start(BackpressurePolicy::default());
    let (_a, mut a, a_handle) = connect(&relay);
    let (_b, mut b, _hb) = connect(&relay);
    wait_for_members(&relay, 2).await;

    a.send("from a");
    assert_eq!(timeout(WAIT, b.recv()).await.unwrap(), Some(Bytes::from("from a")));

    a.fail_read("connection reset");
    let exit = timeout(WAIT, a_handle).await.unwrap().unwrap();
    assert!(matches!(exit.reason, ExitReason::ReadFailed(_)));
    assert_eq!(a.close_count(), 1);

    wait_for_members(&relay, 1).await;
    b.send("from b");
    // Drain A's side: the sink is gone, nothing new was written.
    assert_eq!(timeout(WAIT, a.recv()).await.unwrap(), None);

    let snapshot = relay.snapshot().await.unwrap();
    assert_eq!(snapshot.stats.left, 1);
    assert_eq!(snapshot.stats.queued, 1, "only A's message was ever queued");
}

#[tokio::test]
async fn write_failure_tears_the_connection_down() {
    let (relay, _registry) = Relay::start(BackpressurePolicy::default());
    let (_a, a, _ha) = connect(&relay);
    let (_b, b, b_handle) = connect(&relay);
    wait_for_members(&relay, 2).await;

    b.fail_writes();
    a.send("boom");

    let exit = timeout(WAIT, b_handle).await.unwrap().unwrap();
    assert!(matches!(exit.reason, ExitReason::WriteFailed(_)));
    assert_eq!(b.close_count(), 1);
    wait_for_members(&relay, 1).await;
}

#[tokio::test]
async fn peer_hang_up_is_a_clean_leave() {
    let (relay, _registry) = Relay::start(BackpressurePolicy::default());
    let (a_id, mut a, a_handle) = connect(&relay);
    let (b_id, _b, _hb) = connect(&relay);
    wait_for_members(&relay, 2).await;

    a.hang_up();
    let exit = timeout(WAIT, a_handle).await.unwrap().unwrap();

    assert_eq!(exit.conn_id, a_id);
    assert_eq!(exit.reason, ExitReason::PeerClosed);
    wait_for_members(&relay, 1).await;
    assert_eq!(relay.snapshot().await.unwrap().members, vec![b_id]);
}

#[tokio::test]
async fn evicted_stalled_client_is_disconnected() {
    let (relay, _registry) = Relay::start(BackpressurePolicy::new(1, Some(2)));
    let (a_id, a, _ha) = connect(&relay);
    let (_b, b, b_handle) = connect(&relay);
    wait_for_members(&relay, 2).await;

    // B stops reading: its first write never completes and its queue fills.
    b.stall_writes();
    for i in 0..10 {
        a.send(format!("spam {i}"));
    }

    let exit = timeout(WAIT, b_handle)
        .await
        .expect("evicted client still connected")
        .unwrap();
    assert_eq!(exit.reason, ExitReason::QueueClosed);
    assert_eq!(exit.frames_written, 0);
    assert_eq!(b.close_count(), 1);

    // Its read loop is gone too, so nothing it sends reaches the room.
    assert!(!b.send("from the grave"));

    let snapshot = relay.snapshot().await.unwrap();
    assert_eq!(snapshot.members, vec![a_id]);
    assert_eq!(snapshot.stats.evicted, 1);
    assert_eq!(snapshot.stats.orphan_messages, 0);
}
