//! Streaming callbacks embedded in call params.

use std::cell::RefCell;
use std::rc::Rc;

use postbridge::ChannelError;
use postbridge::rpc::Param;
use serde_json::{Value, json};

use crate::harness::{Outcome, Outcomes, Pair};

#[test]
fn nested_callback_is_invoked_by_path() {
    let (pair, left, right) = Pair::connected("");
    let seen = Rc::new(RefCell::new(None));
    let s = seen.clone();
    right
        .bind("stream", move |txn, params| {
            *s.borrow_mut() = Some((params, txn.callbacks().to_vec()));
            txn.invoke("a/b", json!({"x": 1}))?;
            txn.invoke("a/b", json!({"x": 2}))?;
            Ok(json!("done"))
        })
        .unwrap();

    let out = Outcomes::default();
    let inner = Param::map();
    inner.insert("b", out.callback("a/b")).unwrap();
    let params = Param::map();
    params.insert("a", inner).unwrap().insert("n", 7).unwrap();
    let id = left.call(out.call("stream", params)).unwrap();
    pair.settle();

    assert_eq!(
        seen.borrow_mut().take().unwrap(),
        (json!({"a": {}, "n": 7}), vec!["a/b".to_string()])
    );
    assert_eq!(
        out.take(),
        [
            Outcome::Callback("a/b".into(), json!({"x": 1})),
            Outcome::Callback("a/b".into(), json!({"x": 2})),
            Outcome::Success(json!("done")),
        ]
    );
    let request = pair
        .wire(pair.left_id, pair.right_id)
        .into_iter()
        .find(|v| v["id"] == json!(id))
        .unwrap();
    assert_eq!(request["callbacks"], json!(["a/b"]));
}

#[test]
fn list_callback_leaves_null_slot() {
    let (pair, left, right) = Pair::connected("");
    let seen = Rc::new(RefCell::new(Value::Null));
    let s = seen.clone();
    right
        .bind("m", move |txn, params| {
            *s.borrow_mut() = params;
            assert_eq!(txn.callbacks(), ["1"]);
            txn.invoke("1", json!("hi"))?;
            Ok(Value::Null)
        })
        .unwrap();

    let out = Outcomes::default();
    let list = Param::list();
    list.push(1)
        .and_then(|l| l.push(out.callback("1")))
        .and_then(|l| l.push("x"))
        .unwrap();
    left.call(out.call("m", list)).unwrap();
    pair.settle();

    assert_eq!(*seen.borrow(), json!([1, null, "x"]));
    assert_eq!(
        out.take(),
        [
            Outcome::Callback("1".into(), json!("hi")),
            Outcome::Success(Value::Null)
        ]
    );
}

#[test]
fn undeclared_callback_is_rejected() {
    let (pair, left, right) = Pair::connected("");
    let result = Rc::new(RefCell::new(None));
    let r = result.clone();
    right
        .bind("m", move |txn, _| {
            *r.borrow_mut() = Some(txn.invoke("nope", Value::Null));
            Ok(Value::Null)
        })
        .unwrap();

    let out = Outcomes::default();
    left.call(out.call("m", Value::Null)).unwrap();
    pair.settle();

    assert!(matches!(
        result.borrow_mut().take(),
        Some(Err(ChannelError::ProtocolViolation(_)))
    ));
    assert_eq!(out.take(), [Outcome::Success(Value::Null)]);
}

#[test]
fn callback_after_completion_is_rejected() {
    let (pair, left, right) = Pair::connected("");
    let result = Rc::new(RefCell::new(None));
    let r = result.clone();
    right
        .bind("m", move |txn, _| {
            txn.complete(json!("early"))?;
            *r.borrow_mut() = Some(txn.invoke("cb", Value::Null));
            Ok(Value::Null)
        })
        .unwrap();

    let out = Outcomes::default();
    let params = Param::map();
    params.insert("cb", out.callback("cb")).unwrap();
    left.call(out.call("m", params)).unwrap();
    pair.settle();

    assert!(matches!(
        result.borrow_mut().take(),
        Some(Err(ChannelError::ProtocolViolation(_)))
    ));
    assert_eq!(out.take(), [Outcome::Success(json!("early"))]);
}

#[test]
fn remote_callback_stub_invokes_by_name() {
    let (pair, left, right) = Pair::connected("s");
    right
        .bind("m", |txn, _| {
            assert!(txn.callback("missing").is_none());
            let progress = txn.callback("progress").ok_or("no progress callback")?;
            assert_eq!(progress.name(), "progress");
            for pct in [25, 50, 100] {
                progress.call(json!(pct))?;
            }
            Ok(json!("ok"))
        })
        .unwrap();

    let out = Outcomes::default();
    let params = Param::map();
    params.insert("progress", out.callback("progress")).unwrap();
    left.call(out.call("m", params)).unwrap();
    pair.settle();

    assert_eq!(
        out.take(),
        [
            Outcome::Callback("progress".into(), json!(25)),
            Outcome::Callback("progress".into(), json!(50)),
            Outcome::Callback("progress".into(), json!(100)),
            Outcome::Success(json!("ok")),
        ]
    );
}

#[test]
fn callbacks_stop_after_response() {
    let (pair, left, right) = Pair::connected("");
    let stash = Rc::new(RefCell::new(None));
    let s = stash.clone();
    right
        .bind("m", move |txn, _| {
            *s.borrow_mut() = Some(txn.id().unwrap());
            Ok(json!("finished"))
        })
        .unwrap();

    let out = Outcomes::default();
    let params = Param::map();
    params.insert("cb", out.callback("cb")).unwrap();
    left.call(out.call("m", params)).unwrap();
    pair.settle();
    assert_eq!(out.take(), [Outcome::Success(json!("finished"))]);

    // A stale invocation for the retired id finds no route.
    let id = stash.borrow_mut().take().unwrap();
    pair.net.inject(
        pair.right_id,
        pair.left_id,
        &json!({"id": id, "callback": "cb", "params": 1}).to_string(),
    );
    pair.settle();
    assert!(out.take().is_empty());
}
