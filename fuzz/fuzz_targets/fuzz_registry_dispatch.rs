//! Fuzz target: `Registry::dispatch` into a live channel
//!
//! Feeds arbitrary payloads to a ready channel with a bound handler and an
//! outstanding call.  The engine must never panic, and a well-formed call
//! issued afterwards must still be answered.
//!
//! cargo fuzz run fuzz_registry_dispatch

#![no_main]

use std::cell::Cell;
use std::rc::Rc;

use libfuzzer_sys::fuzz_target;
use postbridge::ChannelConfig;
use postbridge::adapters::loopback::LoopbackNetwork;
use postbridge::rpc::{Call, Channel, ChannelHooks};
use postbridge::scheduler::Scheduler;
use serde_json::Value;

fuzz_target!(|data: &[u8]| {
    let sched = Scheduler::new();
    let net = LoopbackNetwork::new(Rc::new(sched.clone()));
    let (left_id, left_rt) = net.attach("https://left.test");
    let (right_id, right_rt) = net.attach("https://right.test");

    let right = Channel::build(
        &right_rt,
        left_id,
        &ChannelConfig::new("https://left.test"),
        ChannelHooks::default(),
    )
    .unwrap();
    right.bind("echo", |_, v| Ok(v)).unwrap();
    sched.run_until_idle();

    let left = Channel::build(
        &left_rt,
        right_id,
        &ChannelConfig::new("https://right.test"),
        ChannelHooks::default(),
    )
    .unwrap();
    sched.run_until_idle();

    let text = String::from_utf8_lossy(data);
    net.inject(left_id, right_id, &text);
    net.inject(right_id, left_id, &text);
    sched.run_until_idle();

    let answered = Rc::new(Cell::new(false));
    let a = answered.clone();
    left.call(
        Call::new("echo", Value::Null)
            .on_success(move |_| a.set(true))
            .on_error(|_, _| {}),
    )
    .unwrap();
    sched.run_until_idle();
    assert!(answered.get(), "channel must survive arbitrary input");
});
