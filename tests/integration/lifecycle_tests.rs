//! Registration, destroy, observers and untrusted input.

use std::cell::RefCell;
use std::rc::Rc;

use postbridge::ChannelConfig;
use postbridge::ChannelError;
use postbridge::rpc::{Channel, ChannelHooks, Envelope, Readiness, Transaction};
use serde_json::{Value, json};

use crate::harness::{Outcome, Outcomes, Pair, RIGHT_ORIGIN};

#[test]
fn same_peer_and_scope_cannot_bind_twice() {
    let pair = Pair::new();
    let _first = pair.left("s", ChannelHooks::default());
    let dup = Channel::build(
        &pair.left_rt,
        pair.right_id,
        &ChannelConfig::new(RIGHT_ORIGIN).with_scope("s"),
        ChannelHooks::default(),
    );
    assert!(matches!(dup, Err(ChannelError::ProtocolViolation(_))));

    let _other_scope = pair.left("t", ChannelHooks::default());
    assert_eq!(pair.left_rt.registry.binding_count(), 2);
}

#[test]
fn wildcard_and_exact_origins_overlap() {
    let pair = Pair::new();
    let _wild = Channel::build(
        &pair.left_rt,
        pair.right_id,
        &ChannelConfig::default().with_scope("s"),
        ChannelHooks::default(),
    )
    .unwrap();
    let exact = Channel::build(
        &pair.left_rt,
        pair.right_id,
        &ChannelConfig::new(RIGHT_ORIGIN).with_scope("s"),
        ChannelHooks::default(),
    );
    assert!(exact.is_err());
}

#[test]
fn targeting_self_is_a_config_error() {
    let pair = Pair::new();
    let err = Channel::build(
        &pair.left_rt,
        pair.left_id,
        &ChannelConfig::default(),
        ChannelHooks::default(),
    )
    .unwrap_err();
    assert_eq!(err.kind(), "config_error");
}

#[test]
fn invalid_origin_and_scope_are_config_errors() {
    let pair = Pair::new();
    for config in [
        ChannelConfig::new("not an origin"),
        ChannelConfig::new("ftp://right.test"),
        ChannelConfig::default().with_scope("a::b"),
    ] {
        assert!(matches!(
            Channel::build(&pair.left_rt, pair.right_id, &config, ChannelHooks::default()),
            Err(ChannelError::Config(_))
        ));
    }
    assert_eq!(pair.left_rt.registry.binding_count(), 0);
}

#[test]
fn destroy_frees_the_slot() {
    let pair = Pair::new();
    let first = pair.left("s", ChannelHooks::default());
    first.destroy();
    assert_eq!(first.id(), "");
    assert_eq!(first.readiness(), Readiness::Destroyed);
    assert_eq!(pair.left_rt.registry.binding_count(), 0);

    let again = pair.left("s", ChannelHooks::default());
    assert_eq!(again.readiness(), Readiness::NotReady);
}

#[test]
fn destroyed_channel_rejects_operations() {
    let (_pair, left, _right) = Pair::connected("");
    left.destroy();
    left.destroy();

    let out = Outcomes::default();
    assert!(matches!(
        left.call(out.call("m", Value::Null)),
        Err(ChannelError::ProtocolViolation(_))
    ));
    assert!(left.notify("m", Value::Null).is_err());
    assert!(left.bind("m", |_, _| Ok(Value::Null)).is_err());
}

#[test]
fn destroy_abandons_outstanding_calls_silently() {
    let (pair, left, right) = Pair::connected("");
    let stash: Rc<RefCell<Option<Transaction>>> = Rc::default();
    let s = stash.clone();
    right
        .bind("slow", move |txn, _| {
            txn.delay_return(true);
            *s.borrow_mut() = Some(txn.clone());
            Ok(Value::Null)
        })
        .unwrap();

    let out = Outcomes::default();
    left.call(out.call("slow", Value::Null)).unwrap();
    pair.settle();
    assert_eq!(pair.left_rt.registry.route_count(), 1);

    left.destroy();
    assert_eq!(pair.left_rt.registry.route_count(), 0);

    let txn = stash.borrow_mut().take().unwrap();
    txn.complete(json!("late")).unwrap();
    pair.settle();
    assert!(out.take().is_empty());
}

#[test]
fn dropping_every_handle_releases_registry_entries() {
    let (pair, left, right) = Pair::connected("");
    right.bind("slow", |txn, _| {
        txn.delay_return(true);
        Ok(Value::Null)
    })
    .unwrap();

    let out = Outcomes::default();
    for _ in 0..3 {
        left.call(out.call("slow", Value::Null)).unwrap();
    }
    pair.settle();
    assert_eq!(pair.left_rt.registry.route_count(), 3);
    assert_eq!(pair.left_rt.registry.binding_count(), 1);

    drop(left);
    assert_eq!(pair.left_rt.registry.route_count(), 0);
    assert_eq!(pair.left_rt.registry.binding_count(), 0);

    let again = pair.left("", ChannelHooks::default());
    assert_eq!(again.readiness(), Readiness::NotReady);
    assert!(out.take().is_empty());
}

#[test]
fn responder_destroyed_mid_transaction_cannot_answer() {
    let (pair, left, right) = Pair::connected("");
    let stash: Rc<RefCell<Option<Transaction>>> = Rc::default();
    let s = stash.clone();
    right
        .bind("slow", move |txn, _| {
            txn.delay_return(true);
            *s.borrow_mut() = Some(txn.clone());
            Ok(Value::Null)
        })
        .unwrap();

    let out = Outcomes::default();
    left.call(out.call("slow", Value::Null)).unwrap();
    pair.settle();
    right.destroy();
    pair.net.clear_frames();

    let txn = stash.borrow_mut().take().unwrap();
    assert!(!txn.is_open());
    assert!(matches!(
        txn.complete(json!(1)),
        Err(ChannelError::ProtocolViolation(_))
    ));
    pair.settle();
    assert!(pair.net.frames().is_empty());
}

#[test]
fn observers_see_received_and_posted_envelopes() {
    let pair = Pair::new();
    let got: Rc<RefCell<Vec<(String, String)>>> = Rc::default();
    let posted: Rc<RefCell<Vec<String>>> = Rc::default();
    let g = got.clone();
    let p = posted.clone();
    let right = pair.right(
        "",
        ChannelHooks::default()
            .on_received(move |origin, env: &Envelope| {
                g.borrow_mut()
                    .push((origin.to_string(), env.kind_name().to_string()));
            })
            .on_posted(move |_, env: &Envelope| p.borrow_mut().push(env.kind_name().to_string())),
    );
    right.bind("m", |_, _| Ok(json!(1))).unwrap();
    pair.settle();
    assert_eq!(*posted.borrow(), ["notification"], "the lost ping");

    let left = pair.left("", ChannelHooks::default());
    pair.settle();
    let out = Outcomes::default();
    left.call(out.call("m", Value::Null)).unwrap();
    pair.settle();

    assert_eq!(
        *got.borrow(),
        [
            ("https://left.test".to_string(), "notification".to_string()),
            ("https://left.test".to_string(), "request".to_string()),
        ]
    );
    assert_eq!(*posted.borrow(), ["notification", "notification", "result"]);
}

#[test]
fn malformed_input_is_ignored() {
    let (pair, left, right) = Pair::connected("");
    right.bind("m", |_, _| Ok(json!("still works"))).unwrap();

    for junk in [
        "",
        "not json",
        "[1,2,3]",
        "null",
        r#"{"id":"seven","result":1}"#,
        r#"{"params":{}}"#,
        r#"{"id":1,"method":"m","callbacks":"nope"}"#,
    ] {
        pair.net.inject(pair.left_id, pair.right_id, junk);
    }
    pair.settle();
    assert_eq!(right.open_transactions(), 0);

    let out = Outcomes::default();
    left.call(out.call("m", Value::Null)).unwrap();
    pair.settle();
    assert_eq!(out.take(), [Outcome::Success(json!("still works"))]);
}

#[test]
fn responses_from_a_third_context_are_ignored() {
    let (pair, left, _right) = Pair::connected("");
    let (intruder, _rt) = pair.net.attach("https://right.test");

    let out = Outcomes::default();
    let id = left.call(out.call("nobody_home", Value::Null)).unwrap();
    pair.settle();

    pair.net.inject(
        intruder,
        pair.left_id,
        &json!({"id": id, "result": "forged"}).to_string(),
    );
    pair.settle();
    assert!(out.take().is_empty());
    assert_eq!(left.outstanding_calls(), 1);

    pair.net.inject(
        pair.right_id,
        pair.left_id,
        &json!({"id": id, "result": "genuine"}).to_string(),
    );
    pair.settle();
    assert_eq!(out.take(), [Outcome::Success(json!("genuine"))]);
}

#[test]
fn requests_from_the_wrong_peer_do_not_reach_the_channel() {
    let (pair, _left, right) = Pair::connected("");
    let hits = Rc::new(RefCell::new(0));
    let h = hits.clone();
    right
        .bind("m", move |_, _| {
            *h.borrow_mut() += 1;
            Ok(Value::Null)
        })
        .unwrap();
    let (intruder, _rt) = pair.net.attach("https://left.test");

    pair.net.inject(intruder, pair.right_id, r#"{"id":99,"method":"m"}"#);
    pair.settle();
    assert_eq!(*hits.borrow(), 0);
}

#[test]
fn teardown_detaches_every_channel() {
    let (pair, left, _right) = Pair::connected("");
    let out = Outcomes::default();
    left.call(out.call("nobody_home", Value::Null)).unwrap();
    pair.settle();

    pair.left_rt.registry.teardown();
    assert_eq!(pair.left_rt.registry.binding_count(), 0);
    assert_eq!(pair.left_rt.registry.route_count(), 0);
}
