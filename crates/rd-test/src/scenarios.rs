//! End-to-end scenarios over a simulated link

use std::sync::Arc;

use parking_lot::Mutex;

use rd_core::{Lifetime, LifetimeDefinition, OverflowPolicy, ProtocolConfig, RdId};
use rd_demo::{DemoRoot, Note, Point};
use rd_reactive::{bind_leaves, Protocol, RdBindable, RdExtBase, RdLeaf, RdProperty, RdSignal};
use rd_rpc::{RdCall, RdEndpoint, RdTask, RdTaskResult, RpcFault};
use rd_wire::{Polymorphic, WireWriter};

use crate::{Direction, LinkConfig, ModelPair};

fn recorder<T: Clone + Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(&T) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |value: &T| sink.lock().push(value.clone()))
}

/// Bind a primitive read from the wire at a fixed id
fn bind_at(protocol: &Arc<Protocol>, primitive: &dyn RdBindable) {
    let mut leaves: Vec<Arc<dyn RdLeaf>> = Vec::new();
    primitive.collect_leaves(&mut leaves);
    bind_leaves(protocol, &protocol.lifetime(), &leaves).unwrap();
}

fn property_at(protocol: &Protocol, id: RdId, value: i32) -> RdProperty<i32> {
    let ctx = protocol.serialization_ctx();
    let mut w = WireWriter::new();
    w.write_rd_id(id);
    w.write_i32(value);
    ctx.from_bytes(w.freeze()).unwrap()
}

#[test]
fn test_property_at_id_7_mirrors_set_exactly_once() {
    let pair = ModelPair::seeded(7);
    let local = property_at(pair.client(), RdId(7), 0);
    let remote = property_at(pair.server(), RdId(7), 0);
    bind_at(pair.client(), &local);
    bind_at(pair.server(), &remote);

    let (seen, observer) = recorder::<i32>();
    remote.advise(&Lifetime::eternal(), observer);

    local.set(42);
    pair.pump();

    assert_eq!(remote.get(), 42);
    assert_eq!(*seen.lock(), vec![0, 42]);
    assert_eq!(pair.stats().frames_delivered, 1);
}

#[test]
fn test_buffered_frames_for_id_12_replay_in_arrival_order() {
    let pair = ModelPair::new(LinkConfig::ordered());
    for value in [3, 1, 2] {
        let mut w = WireWriter::new();
        w.write_i32(value);
        pair.client().wire().send(RdId(12), w.freeze()).unwrap();
    }
    pair.pump();
    assert_eq!(pair.server().broker().buffered(RdId(12)), 3);

    let mut w = WireWriter::new();
    w.write_rd_id(RdId(12));
    let signal: RdSignal<i32> = pair.server().serialization_ctx().from_bytes(w.freeze()).unwrap();
    let (seen, observer) = recorder::<i32>();
    signal.advise(&Lifetime::eternal(), observer);
    assert!(seen.lock().is_empty());

    bind_at(pair.server(), &signal);
    assert_eq!(*seen.lock(), vec![3, 1, 2]);
    assert_eq!(pair.server().broker().buffered(RdId(12)), 0);
}

#[test]
fn test_always_faulting_handler_resolves_in_one_round_trip() {
    let pair = ModelPair::seeded(3);
    let (client_call, server_call) = (RdCall::<String, u32>::new(), RdCall::<String, u32>::new());
    RdExtBase::new("Rpc")
        .connect(&Lifetime::eternal(), pair.client(), &[("call", &client_call)])
        .unwrap();
    RdExtBase::new("Rpc")
        .connect(&Lifetime::eternal(), pair.server(), &[("call", &server_call)])
        .unwrap();
    server_call.set_endpoint(RdEndpoint::sync(|_: String| -> Result<u32, RpcFault> {
        Err(RpcFault::new("Invalid", "bad-input"))
    }));

    let task = client_call.start("anything".into());
    assert!(!task.is_completed());

    assert!(pair.step_direction(Direction::ClientToServer));
    assert!(pair.step_direction(Direction::ServerToClient));
    assert_eq!(
        task.result(),
        Some(RdTaskResult::Faulted(RpcFault::new("Invalid", "bad-input")))
    );
    assert!(pair.link().is_idle());
    assert_eq!(client_call.pending(), 0);
}

#[test]
fn test_demo_root_converges_over_hostile_link() {
    let pair = ModelPair::new(LinkConfig::hostile(11));
    let (a, b) = (DemoRoot::new(), DemoRoot::new());
    a.connect(&Lifetime::eternal(), pair.client()).unwrap();
    b.connect(&Lifetime::eternal(), pair.server()).unwrap();

    for i in 0..50 {
        a.counter().set(i);
        a.items().add(format!("item-{}", i));
        if i % 3 == 0 {
            a.tags().add(format!("tag-{}", i % 9));
        }
        a.scores().insert(format!("p{}", i % 5), i as i64);
        b.tags().add(format!("server-{}", i % 7));
        pair.step();
    }
    a.items().remove_at(0);
    a.notes().add(Polymorphic::new(Note::new("n").with_attachment(Point { x: 2, y: 3 })));
    pair.pump();

    assert_eq!(b.counter().get(), 49);
    let sorted = |mut tags: Vec<String>| {
        tags.sort();
        tags
    };
    assert_eq!(sorted(a.tags().to_vec()), sorted(b.tags().to_vec()));
    assert_eq!(a.tags().len(), 3 + 7);
    assert_eq!(a.scores().to_vec(), b.scores().to_vec());
    assert_eq!(a.notes().to_vec(), b.notes().to_vec());
    assert_eq!(a.items().to_vec(), b.items().to_vec());
    assert_eq!(b.items().len(), 49);
    for protocol in [pair.client(), pair.server()] {
        let stats = protocol.broker().stats();
        assert_eq!(stats.dropped_poisoned, 0);
        assert_eq!(stats.consistency_errors, 0);
    }
}

#[test]
fn test_client_writes_before_server_connects_are_replayed() {
    let pair = ModelPair::seeded(5);
    let (a, b) = (DemoRoot::new(), DemoRoot::new());
    a.connect(&Lifetime::eternal(), pair.client()).unwrap();
    a.counter().set(8);
    a.settings().theme().set("dark".into());
    a.items().add("early".into());
    pair.pump();

    b.connect(&Lifetime::eternal(), pair.server()).unwrap();
    assert_eq!(b.counter().get(), 8);
    assert_eq!(b.settings().theme().get(), "dark");
    assert_eq!(b.items().to_vec(), vec!["early".to_string()]);
}

#[test]
fn test_overflow_keeps_newest_frames() {
    let config = ProtocolConfig::default()
        .with_max_buffered_per_id(2)
        .with_overflow_policy(OverflowPolicy::DropOldest);
    let pair = ModelPair::with_config(LinkConfig::ordered(), config);
    let (a, b) = (DemoRoot::new(), DemoRoot::new());
    a.connect(&Lifetime::eternal(), pair.client()).unwrap();
    for i in 1..=5 {
        a.ping().fire(i);
    }
    pair.pump();

    let (seen, observer) = recorder::<u32>();
    b.ping().advise(&Lifetime::eternal(), observer);
    b.connect(&Lifetime::eternal(), pair.server()).unwrap();
    assert_eq!(*seen.lock(), vec![4, 5]);
    assert_eq!(pair.server().broker().stats().dropped_overflow, 3);
}

#[test]
fn test_cancel_over_link_reaches_handler() {
    let pair = ModelPair::seeded(9);
    let (a, b) = (DemoRoot::new(), DemoRoot::new());
    a.connect(&Lifetime::eternal(), pair.client()).unwrap();
    b.connect(&Lifetime::eternal(), pair.server()).unwrap();

    let handler_lifetimes = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&handler_lifetimes);
    b.echo().set_endpoint(RdEndpoint::new(move |lifetime: &Lifetime, _: String| {
        recorded.lock().push(lifetime.clone());
        RdTask::new()
    }));

    let task = a.echo().start("slow".into());
    pair.pump();
    assert_eq!(b.echo().running(), 1);

    assert!(task.cancel());
    pair.pump();
    assert_eq!(task.result(), Some(RdTaskResult::Cancelled));
    assert_eq!(b.echo().running(), 0);
    assert!(handler_lifetimes.lock().iter().all(|l| !l.is_alive()));
}

#[test]
fn test_disconnect_mid_flight_cancels_pending_calls() {
    let pair = ModelPair::seeded(13);
    let (a, b) = (DemoRoot::new(), DemoRoot::new());
    a.connect(&Lifetime::eternal(), pair.client()).unwrap();
    b.connect(&Lifetime::eternal(), pair.server()).unwrap();
    b.echo().set_endpoint(RdEndpoint::sync(|s: String| Ok(s)));

    let tasks: Vec<_> = (0..4).map(|i| a.echo().start(format!("r{}", i))).collect();
    pair.step_direction(Direction::ClientToServer);
    pair.disconnect();

    for task in &tasks {
        assert_eq!(task.result(), Some(RdTaskResult::Cancelled));
    }
    assert_eq!(a.status(), rd_reactive::ExtStatus::Disposed);
    assert_eq!(b.status(), rd_reactive::ExtStatus::Disposed);
}

#[test]
fn test_scoped_connection_unbinds_only_its_root() {
    let pair = ModelPair::seeded(17);
    let scope = LifetimeDefinition::new();
    let (a, b) = (DemoRoot::new(), DemoRoot::new());
    a.connect(&scope.lifetime(), pair.client()).unwrap();
    b.connect(&Lifetime::eternal(), pair.server()).unwrap();

    let other = (RdExtBase::new("Other"), RdProperty::new(0i32));
    let mirror = (RdExtBase::new("Other"), RdProperty::new(0i32));
    other.0.connect(&Lifetime::eternal(), pair.client(), &[("v", &other.1)]).unwrap();
    mirror.0.connect(&Lifetime::eternal(), pair.server(), &[("v", &mirror.1)]).unwrap();

    scope.terminate();
    assert!(!a.counter().is_bound());
    a.counter().set(1);
    other.1.set(2);
    pair.pump();

    assert_eq!(b.counter().get(), 0);
    assert_eq!(mirror.1.get(), 2);
    assert!(pair.client().is_connected());
}

#[tokio::test]
async fn test_demo_root_over_stream_transport() {
    use std::time::Duration;

    use rd_core::IdKind;
    use rd_transport::{StreamTransport, TransportConfig};

    crate::init_logging();
    let (left, right) = tokio::io::duplex(256);
    let config = TransportConfig::default().with_read_chunk_size(7);
    let client = StreamTransport::spawn(left, Protocol::builder("client").kind(IdKind::Client), config.clone());
    let server = StreamTransport::spawn(right, Protocol::builder("server").kind(IdKind::Server), config);

    let (a, b) = (DemoRoot::new(), DemoRoot::new());
    a.connect(&Lifetime::eternal(), client.protocol()).unwrap();
    b.connect(&Lifetime::eternal(), server.protocol()).unwrap();
    b.echo().set_endpoint(RdEndpoint::sync(|text: String| Ok(text.to_uppercase())));

    a.settings().refresh_ms().set(250);
    let result = tokio::time::timeout(Duration::from_secs(5), a.echo().call("over the wire".into()))
        .await
        .unwrap();
    assert_eq!(result, RdTaskResult::Success("OVER THE WIRE".to_string()));
    assert_eq!(b.settings().refresh_ms().get(), 250);

    client.close();
    tokio::time::timeout(Duration::from_secs(5), server.join()).await.unwrap();
    assert_eq!(b.status(), rd_reactive::ExtStatus::Disposed);
}
