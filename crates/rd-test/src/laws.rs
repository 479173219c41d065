//! Property tests for the protocol laws

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use proptest::prelude::*;

use rd_core::{IdScope, Lifetime, RdId};
use rd_demo::{DemoRoot, DemoRootSerializersOwner, Note, Point};
use rd_reactive::{RdBindable, RdExtBase, RdList, RdMap, RdProperty, RdSet, RdSignal};
use rd_rpc::{RdCall, RdEndpoint, RdTask, RdTaskResult, RpcFault};
use rd_wire::{Polymorphic, SerializationCtx, Serializers};

use crate::{LinkConfig, ModelPair};

fn demo_ctx() -> SerializationCtx {
    let serializers = Serializers::new();
    serializers.register_owner(&DemoRootSerializersOwner).unwrap();
    SerializationCtx::new(Arc::new(serializers))
}

fn point() -> impl Strategy<Value = Point> {
    (any::<i32>(), any::<i32>()).prop_map(|(x, y)| Point { x, y })
}

fn note() -> impl Strategy<Value = Note> {
    let leaf = (".{0,12}", proptest::collection::vec("[a-z]{1,6}", 0..4), proptest::option::of(point()))
        .prop_map(|(text, labels, attachment)| Note {
            text,
            labels,
            attachment: attachment.map(Polymorphic::new),
        });
    leaf.prop_recursive(3, 8, 1, |inner| {
        (".{0,12}", inner).prop_map(|(text, nested)| Note::new(text).with_attachment(nested))
    })
}

#[derive(Clone, Debug)]
enum ListOp {
    Add(u16),
    Insert(usize, u16),
    Set(usize, u16),
    RemoveAt(usize),
    Clear,
}

fn list_op() -> impl Strategy<Value = ListOp> {
    prop_oneof![
        4 => any::<u16>().prop_map(ListOp::Add),
        2 => (0..20usize, any::<u16>()).prop_map(|(i, v)| ListOp::Insert(i, v)),
        2 => (0..20usize, any::<u16>()).prop_map(|(i, v)| ListOp::Set(i, v)),
        2 => (0..20usize).prop_map(ListOp::RemoveAt),
        1 => Just(ListOp::Clear),
    ]
}

#[derive(Clone, Debug)]
enum KeyedOp {
    Put(u8, i32),
    Remove(u8),
}

fn keyed_op() -> impl Strategy<Value = KeyedOp> {
    prop_oneof![
        3 => (0..16u8, any::<i32>()).prop_map(|(k, v)| KeyedOp::Put(k, v)),
        1 => (0..16u8).prop_map(KeyedOp::Remove),
    ]
}

#[derive(Clone, Debug)]
enum CallStep {
    Start(u8),
    Cancel(usize),
    Complete(usize, bool),
    Deliver(u8),
}

fn call_step() -> impl Strategy<Value = CallStep> {
    prop_oneof![
        3 => any::<u8>().prop_map(CallStep::Start),
        1 => (0..32usize).prop_map(CallStep::Cancel),
        2 => (0..32usize, any::<bool>()).prop_map(|(i, ok)| CallStep::Complete(i, ok)),
        3 => (1..8u8).prop_map(CallStep::Deliver),
    ]
}

/// Ids of a full tree, identified twice in separate scopes
fn identify_tree(root: RdId, depth: u32, fan_out: u32, out: &mut Vec<RdId>) {
    if depth == 0 {
        return;
    }
    let mut scope = IdScope::new(root);
    for _ in 0..fan_out {
        let id = scope.next();
        out.push(id);
        identify_tree(id, depth - 1, fan_out, out);
    }
}

#[test]
fn test_identity_tree_depth_5_fan_out_10() {
    let root = RdId::NULL.mix_str("law.root");
    let (mut first, mut second) = (Vec::new(), Vec::new());
    identify_tree(root, 5, 10, &mut first);
    identify_tree(root, 5, 10, &mut second);
    assert_eq!(first.len(), 111_110);
    assert_eq!(first, second);

    let unique: HashSet<RdId> = first.iter().copied().collect();
    assert_eq!(unique.len(), first.len());
    assert!(!unique.contains(&RdId::NULL));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_independent_roots_agree_on_ids(seed in any::<u64>()) {
        let pair = ModelPair::seeded(seed);
        let (a, b) = (DemoRoot::new(), DemoRoot::new());
        let ia = a.identify(pair.client());
        let ib = b.identify(pair.server());
        prop_assert_eq!(ia, ib);
        prop_assert_eq!(a.scores().id(), b.scores().id());
        prop_assert_eq!(a.settings().pinned().id(), b.settings().pinned().id());
        prop_assert_ne!(a.settings().id(), a.settings().theme().id());
    }

    #[test]
    fn prop_polymorphic_composites_roundtrip(notes in proptest::collection::vec(note(), 0..6), extra in proptest::option::of(point())) {
        let ctx = demo_ctx();
        let value: (Vec<Polymorphic>, Option<Polymorphic>) = (
            notes.into_iter().map(Polymorphic::new).collect(),
            extra.map(Polymorphic::new),
        );
        let read: (Vec<Polymorphic>, Option<Polymorphic>) = ctx.from_bytes(ctx.to_bytes(&value)).unwrap();
        prop_assert_eq!(read, value);
    }

    #[test]
    fn prop_per_id_order_is_preserved(seed in any::<u64>(), sends in proptest::collection::vec((0..4usize, any::<i64>()), 1..80)) {
        let pair = ModelPair::new(LinkConfig::hostile(seed));
        let senders: Vec<RdSignal<i64>> = (0..4).map(|_| RdSignal::new()).collect();
        let receivers: Vec<RdSignal<i64>> = (0..4).map(|_| RdSignal::new()).collect();
        let seen: Vec<Arc<Mutex<Vec<i64>>>> = (0..4).map(|_| Arc::new(Mutex::new(Vec::new()))).collect();
        for (signal, log) in receivers.iter().zip(&seen) {
            let log = Arc::clone(log);
            signal.advise(&Lifetime::eternal(), move |v| log.lock().push(*v));
        }
        let named = |signals: &[RdSignal<i64>]| -> Vec<(String, RdSignal<i64>)> {
            signals.iter().enumerate().map(|(i, s)| (format!("s{}", i), s.clone())).collect()
        };
        let (client_fields, server_fields) = (named(&senders), named(&receivers));
        let client_children: Vec<(&str, &dyn RdBindable)> = client_fields
            .iter()
            .map(|(n, s)| (n.as_str(), s as &dyn RdBindable))
            .collect();
        let server_children: Vec<(&str, &dyn RdBindable)> = server_fields
            .iter()
            .map(|(n, s)| (n.as_str(), s as &dyn RdBindable))
            .collect();
        RdExtBase::new("Lanes").connect(&Lifetime::eternal(), pair.client(), &client_children).unwrap();
        RdExtBase::new("Lanes").connect(&Lifetime::eternal(), pair.server(), &server_children).unwrap();

        let mut expected = vec![Vec::new(); 4];
        for (lane, value) in sends {
            senders[lane].fire(value);
            expected[lane].push(value);
        }
        pair.pump();
        for (log, want) in seen.iter().zip(expected) {
            prop_assert_eq!(&*log.lock(), &want);
        }
    }

    #[test]
    fn prop_collections_converge(seed in any::<u64>(), list_ops in proptest::collection::vec(list_op(), 0..60), keyed in proptest::collection::vec(keyed_op(), 0..60)) {
        let pair = ModelPair::new(LinkConfig::hostile(seed));
        let (la, lb) = (RdList::<u16>::new(), RdList::<u16>::new());
        let (sa, sb) = (RdSet::<u8>::new(), RdSet::<u8>::new());
        let (ma, mb) = (RdMap::<u8, i32>::new(), RdMap::<u8, i32>::new());
        RdExtBase::new("C").connect(&Lifetime::eternal(), pair.client(), &[("l", &la), ("s", &sa), ("m", &ma)]).unwrap();
        RdExtBase::new("C").connect(&Lifetime::eternal(), pair.server(), &[("l", &lb), ("s", &sb), ("m", &mb)]).unwrap();

        for (i, op) in list_ops.into_iter().enumerate() {
            match op {
                ListOp::Add(v) => la.add(v),
                ListOp::Insert(at, v) => { la.insert(at, v); }
                ListOp::Set(at, v) => { la.set(at, v); }
                ListOp::RemoveAt(at) => { la.remove_at(at); }
                ListOp::Clear => la.clear(),
            }
            if i % 4 == 0 {
                pair.step();
            }
        }
        for op in keyed {
            match op {
                KeyedOp::Put(k, v) => {
                    sa.add(k);
                    ma.insert(k, v);
                }
                KeyedOp::Remove(k) => {
                    sa.remove(&k);
                    ma.remove(&k);
                }
            }
            pair.step();
        }
        pair.pump();

        prop_assert_eq!(la.to_vec(), lb.to_vec());
        prop_assert_eq!(sa.to_vec(), sb.to_vec());
        prop_assert_eq!(ma.to_vec(), mb.to_vec());
        prop_assert_eq!(pair.server().broker().stats().consistency_errors, 0);
    }

    #[test]
    fn prop_advise_sees_latest_value_then_changes(before in proptest::collection::vec(any::<i32>(), 0..20), after in proptest::collection::vec(any::<i32>(), 0..20)) {
        let property = RdProperty::new(0i32);
        for v in &before {
            property.set(*v);
        }
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        property.advise(&Lifetime::eternal(), move |v| sink.lock().push(*v));

        let mut expected = vec![property.get()];
        let mut current = property.get();
        for v in after {
            property.set(v);
            if v != current {
                expected.push(v);
                current = v;
            }
        }
        prop_assert_eq!(&*seen.lock(), &expected);
    }

    #[test]
    fn prop_every_call_reaches_one_terminal_outcome(seed in any::<u64>(), steps in proptest::collection::vec(call_step(), 1..40), drop_link in any::<bool>()) {
        let pair = ModelPair::seeded(seed);
        let (client, server) = (RdCall::<u8, u8>::new(), RdCall::<u8, u8>::new());
        RdExtBase::new("Rpc").connect(&Lifetime::eternal(), pair.client(), &[("call", &client)]).unwrap();
        RdExtBase::new("Rpc").connect(&Lifetime::eternal(), pair.server(), &[("call", &server)]).unwrap();

        let served: Arc<Mutex<Vec<RdTask<u8>>>> = Arc::new(Mutex::new(Vec::new()));
        let backlog = Arc::clone(&served);
        server.set_endpoint(RdEndpoint::new(move |_: &Lifetime, request: u8| {
            if request % 5 == 0 {
                return RdTask::faulted(RpcFault::new("Invalid", "bad-input"));
            }
            let task = RdTask::new();
            backlog.lock().push(task.clone());
            task
        }));

        let mut tasks: Vec<(RdTask<u8>, Arc<Mutex<u32>>)> = Vec::new();
        for step in steps {
            match step {
                CallStep::Start(request) => {
                    let task = client.start(request);
                    let outcomes = Arc::new(Mutex::new(0));
                    let counter = Arc::clone(&outcomes);
                    task.on_complete(move |_| *counter.lock() += 1);
                    tasks.push((task, outcomes));
                }
                CallStep::Cancel(i) => {
                    if let Some((task, _)) = tasks.get(i) {
                        task.cancel();
                    }
                }
                CallStep::Complete(i, ok) => {
                    let task = served.lock().get(i).cloned();
                    if let Some(task) = task {
                        let result = if ok {
                            RdTaskResult::Success(i as u8)
                        } else {
                            RdTaskResult::Faulted(RpcFault::new("Invalid", "late"))
                        };
                        task.set(result);
                    }
                }
                CallStep::Deliver(n) => {
                    for _ in 0..n {
                        pair.step();
                    }
                }
            }
        }

        if drop_link {
            pair.disconnect();
        } else {
            pair.pump();
            let backlog = served.lock().clone();
            for task in backlog {
                task.set(RdTaskResult::Success(0));
            }
            pair.pump();
        }

        for (task, outcomes) in &tasks {
            prop_assert!(task.is_completed());
            prop_assert_eq!(*outcomes.lock(), 1);
        }
        prop_assert_eq!(client.pending(), 0);
    }
}
