// crates/relay-core/tests/registry_scenarios.rs
use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use relay_core::{
    BackpressurePolicy, Connection, ConnectionId, Drain, Message, Registry, RegistryError,
    RelayEvent,
};
use tokio::sync::oneshot;

fn join(registry: &mut Registry, id: u64) -> Drain {
    let (conn, drain) = Connection::new(ConnectionId(id), registry.policy().queue_capacity);
    registry.on_join(conn).expect("fresh id joins");
    drain
}

fn drained(drain: &mut Drain) -> Vec<Bytes> {
    let mut out = Vec::new();
    while let Some(p) = drain.try_next() {
        out.push(p);
    }
    out
}

#[test]
fn message_reaches_everyone_but_the_sender() {
    let mut registry = Registry::new(BackpressurePolicy::default());
    let mut a = join(&mut registry, 1);
    let mut b = join(&mut registry, 2);
    let mut c = join(&mut registry, 3);

    let report = registry.on_message(&Message::new(ConnectionId(1), "hi"));

    assert_eq!(report.queued, 2);
    assert_eq!(drained(&mut b), vec![Bytes::from("hi")]);
    assert_eq!(drained(&mut c), vec![Bytes::from("hi")]);
    assert!(drained(&mut a).is_empty());
}

#[test]
fn saturated_destination_drops_while_others_receive() {
    let mut registry = Registry::new(BackpressurePolicy::new(1, None));
    let _a = join(&mut registry, 1);
    let mut b = join(&mut registry, 2);
    let mut c = join(&mut registry, 3);

    // C sends first to fill B's only slot; A is also served.
    registry.on_message(&Message::new(ConnectionId(3), "backlog"));

    let report = registry.on_message(&Message::new(ConnectionId(1), "fresh"));

    assert_eq!(report.dropped, 1);
    assert_eq!(report.queued, 1);
    assert!(registry.contains(ConnectionId(2)), "tolerate policy keeps B");
    assert_eq!(drained(&mut b), vec![Bytes::from("backlog")]);
    assert_eq!(drained(&mut c), vec![Bytes::from("fresh")]);
    assert_eq!(registry.stats().dropped, 1);
}

#[test]
fn slow_consumer_is_evicted_when_policy_says_so() {
    let mut registry = Registry::new(BackpressurePolicy::new(1, Some(2)));
    let _a = join(&mut registry, 1);
    let mut b = join(&mut registry, 2);

    for _ in 0..3 {
        registry.on_message(&Message::new(ConnectionId(1), "spam"));
    }

    assert!(!registry.contains(ConnectionId(2)));
    assert_eq!(registry.stats().evicted, 1);

    // Backlog is still handed out, then the drain ends.
    assert_eq!(drained(&mut b), vec![Bytes::from("spam")]);

    // A later leave from B's supervisor is a no-op.
    assert!(!registry.on_leave(ConnectionId(2)));
    assert_eq!(registry.stats().left, 0);
}

#[tokio::test]
async fn left_connection_gets_nothing_more() {
    let mut registry = Registry::new(BackpressurePolicy::default());
    let mut a = join(&mut registry, 1);
    let mut b = join(&mut registry, 2);

    registry.on_message(&Message::new(ConnectionId(1), "before"));
    assert!(registry.on_leave(ConnectionId(1)));
    assert!(!registry.on_leave(ConnectionId(1)));

    let report = registry.on_message(&Message::new(ConnectionId(2), "after"));

    assert_eq!(report.destinations(), 0);
    assert_eq!(registry.stats().left, 1);
    assert_eq!(drained(&mut b), vec![Bytes::from("before")]);
    // A's queue was closed by the leave and nothing new arrived.
    assert_eq!(a.next().await, None);
}

#[test]
fn messages_after_leave_are_not_relayed() {
    let mut registry = Registry::new(BackpressurePolicy::default());
    let _a = join(&mut registry, 1);
    let mut b = join(&mut registry, 2);

    registry.on_leave(ConnectionId(1));
    let report = registry.on_message(&Message::new(ConnectionId(1), "late"));

    assert_eq!(report.destinations(), 0);
    assert!(drained(&mut b).is_empty());
    assert_eq!(registry.stats().orphan_messages, 1);
    assert_eq!(registry.stats().messages, 0);
}

#[test]
fn duplicate_join_is_rejected_and_keeps_the_original() {
    let mut registry = Registry::new(BackpressurePolicy::default());
    let mut original = join(&mut registry, 7);
    let _b = join(&mut registry, 8);

    let (dup, mut dup_drain) = Connection::new(ConnectionId(7), 4);
    assert_eq!(
        registry.on_join(dup),
        Err(RegistryError::AlreadyRegistered(ConnectionId(7)))
    );
    assert_eq!(registry.len(), 2);

    registry.on_message(&Message::new(ConnectionId(8), "x"));
    assert_eq!(drained(&mut original), vec![Bytes::from("x")]);
    assert!(dup_drain.try_next().is_none());
}

#[test]
fn snapshot_event_reports_members_and_counters() {
    let mut registry = Registry::new(BackpressurePolicy::default());
    let _a = join(&mut registry, 3);
    let _b = join(&mut registry, 1);
    registry.on_message(&Message::new(ConnectionId(1), "x"));

    let (tx, mut rx) = oneshot::channel();
    registry.handle(RelayEvent::Snapshot(tx)).expect("snapshot never fails");
    let snapshot = rx.try_recv().expect("answered synchronously");

    assert_eq!(snapshot.members, vec![ConnectionId(1), ConnectionId(3)]);
    assert_eq!(snapshot.stats.joined, 2);
    assert_eq!(snapshot.stats.messages, 1);
    assert_eq!(snapshot.stats.queued, 1);
}

/// Small deterministic generator so the interleaving test needs no extra crates.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }
}

#[test]
fn membership_matches_joined_minus_left_under_interleaving() {
    for seed in 1..=20u64 {
        let mut rng = Lcg(seed);
        let mut registry = Registry::new(BackpressurePolicy::new(4, None));
        let mut model: HashSet<ConnectionId> = HashSet::new();
        let mut drains: HashMap<ConnectionId, Drain> = HashMap::new();
        let mut next_id = 1u64;

        for _ in 0..500 {
            match rng.next() % 4 {
                0 => {
                    let id = ConnectionId(next_id);
                    next_id += 1;
                    let (conn, drain) = Connection::new(id, 4);
                    registry.handle(RelayEvent::Join(conn)).expect("fresh id");
                    model.insert(id);
                    drains.insert(id, drain);
                }
                1 => {
                    // Leave for any id ever issued, members or not.
                    let id = ConnectionId(rng.next() % next_id);
                    registry.handle(RelayEvent::Leave(id)).expect("leave never fails");
                    model.remove(&id);
                }
                _ => {
                    let sender = ConnectionId(rng.next() % next_id);
                    let msg = Message::new(sender, Bytes::from_static(b"m"));
                    registry.handle(RelayEvent::Message(msg)).expect("message never fails");
                    // Keep queues from filling so nothing is evicted.
                    for drain in drains.values_mut() {
                        drained(drain);
                    }
                }
            }

            let expected: HashSet<ConnectionId> = model.clone();
            let actual: HashSet<ConnectionId> = registry.members().into_iter().collect();
            assert_eq!(actual, expected, "seed {seed}");
        }
    }
}
