//! PostBridge demo: two contexts talking over the loopback transport.
//!
//! ```text
//! ┌──────────────────────────┐          ┌──────────────────────────┐
//! │ parent  https://app.test │  text    │ child  https://widget.test│
//! │                          │◀────────▶│                          │
//! │  Channel(scope "widget") │ loopback │  Channel(scope "widget") │
//! │   call sum / countdown   │          │   bind sum / countdown   │
//! └──────────────────────────┘          └──────────────────────────┘
//!              ▲                                     ▲
//!              └──────── Scheduler (virtual clock) ──┘
//! ```
//!
//! Set `POSTBRIDGE_LOG=debug` to see every queue/post decision.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result};
use env_logger::Env;
use log::{info, warn};
use serde_json::{Value, json};

use postbridge::ChannelConfig;
use postbridge::adapters::log_observer::LogObserver;
use postbridge::adapters::loopback::LoopbackNetwork;
use postbridge::ports::Executor;
use postbridge::rpc::{Call, Channel, ChannelHooks, Param};
use postbridge::scheduler::Scheduler;

const SCOPE: &str = "widget";
const COUNTDOWN_STEP: Duration = Duration::from_millis(100);

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().filter_or("POSTBRIDGE_LOG", "info")).init();

    info!("╔══════════════════════════════════════╗");
    info!("║  PostBridge demo v{}              ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    let sched = Scheduler::new();
    let net = LoopbackNetwork::new(Rc::new(sched.clone()));
    let (parent_id, parent_rt) = net.attach("https://app.test");
    let (child_id, child_rt) = net.attach("https://widget.test");

    // ── Child: serves requests ────────────────────────────────
    let child = Channel::build(
        &child_rt,
        parent_id,
        &ChannelConfig::new("https://app.test").with_scope(SCOPE),
        LogObserver::new("child").install(ChannelHooks::default()),
    )
    .context("building child channel")?;

    child.bind("sum", |_txn, params| {
        let Some(items) = params.as_array() else {
            return Err(("bad_params", "sum expects an array").into());
        };
        Ok(json!(items.iter().filter_map(Value::as_f64).sum::<f64>()))
    })?;

    let timer = sched.clone();
    child.bind("countdown", move |txn, params| {
        let from = params.get("from").and_then(Value::as_u64).unwrap_or(3);
        let tick = txn
            .callback("tick")
            .ok_or(("bad_params", "countdown needs a tick callback"))?;
        txn.delay_return(true);
        schedule_tick(&timer, txn.clone(), tick, from);
        Ok(Value::Null)
    })?;

    // The child loads first: its ping finds no channel in the parent yet.
    sched.run_until_idle();

    // ── Parent: issues requests once ready ────────────────────
    let results: Rc<RefCell<Vec<String>>> = Rc::default();
    let log = results.clone();
    let hooks = ChannelHooks::default().on_ready(move |chan| {
        info!("parent channel {} is ready", chan.id());
        log.borrow_mut().push("ready".into());
    });
    let parent = Channel::build(
        &parent_rt,
        child_id,
        &ChannelConfig::new("https://widget.test")
            .with_scope(SCOPE)
            .with_debug_output(true),
        hooks,
    )
    .context("building parent channel")?;

    // Queued until the handshake completes.
    let log = results.clone();
    parent.call(
        Call::new("sum", json!([1, 2, 3.5]))
            .on_success(move |v| log.borrow_mut().push(format!("sum = {v}")))
            .on_error(|kind, msg| warn!("sum failed: {kind}: {msg}")),
    )?;

    let params = Param::map();
    params.insert("from", 3)?;
    let log = results.clone();
    params.insert(
        "tick",
        Param::callback(move |v| log.borrow_mut().push(format!("tick {v}"))),
    )?;
    let log = results.clone();
    let log_err = results.clone();
    parent.call(
        Call::new("countdown", params)
            .on_success(move |v| log.borrow_mut().push(format!("countdown = {v}")))
            .on_error(move |kind, msg| log_err.borrow_mut().push(format!("countdown failed: {kind}: {msg}")))
            .timeout(Duration::from_secs(5)),
    )?;

    let log = results.clone();
    parent.call(
        Call::new("missing", Value::Null)
            .on_success(|_| {})
            .on_error(move |kind, msg| log.borrow_mut().push(format!("missing: {kind}: {msg}")))
            .timeout(Duration::from_millis(250)),
    )?;

    sched.run_until_idle();
    for _ in 0..10 {
        sched.advance(COUNTDOWN_STEP);
    }

    for line in results.borrow().iter() {
        info!("result | {line}");
    }
    info!(
        "parent={} child={} frames={}",
        parent.id(),
        child.id(),
        net.frames().len()
    );

    parent.destroy();
    child.destroy();
    Ok(())
}

/// Fire `tick` once per step, then complete the delayed transaction.
fn schedule_tick(
    sched: &Scheduler,
    txn: postbridge::rpc::Transaction,
    tick: postbridge::rpc::RemoteCallback,
    remaining: u64,
) {
    let next = sched.clone();
    sched.set_timeout(
        COUNTDOWN_STEP,
        Box::new(move || {
            if remaining == 0 {
                if let Err(e) = txn.complete(json!("liftoff")) {
                    warn!("countdown: {e}");
                }
                return;
            }
            if let Err(e) = tick.call(json!(remaining)) {
                warn!("countdown: {e}");
                return;
            }
            schedule_tick(&next, txn, tick, remaining - 1);
        }),
    );
}
