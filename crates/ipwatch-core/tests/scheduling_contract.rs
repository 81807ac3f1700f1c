//! Contract Test: Scheduling and Shutdown
//!
//! Constraints verified:
//! - The first cycle runs one interval after start
//! - Cycles never overlap; ticks missed during an overrun collapse into
//!   one immediate cycle and the schedule stays aligned
//! - Shutdown ends the run promptly, even in the middle of a cycle
//! - A watcher runs at most once
//! - Errors still queued at shutdown are observed but not dispatched
//! - Drain waits for in-flight dispatches up to its deadline
//!
//! All tests run on paused time.

mod common;

use common::*;
use ipwatch_core::config::EventsConfig;
use ipwatch_core::engine::WatcherState;
use ipwatch_core::{Error, ErrorKind, EventType, Watcher, WatcherEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

#[tokio::test(start_paused = true)]
async fn first_cycle_runs_one_interval_after_start() {
    let resolver = Arc::new(ScriptedResolver::fixed(ip("203.0.113.5")));
    let (watcher, events) = Watcher::new(
        &config(EventsConfig::default()),
        resolver.clone(),
        Arc::new(FaultyHistoryStore::new()),
        None,
    )
    .unwrap();

    let mut running = Running::start(watcher, events);

    sleep(Duration::from_secs(59)).await;
    assert_eq!(resolver.calls(), 0);

    sleep(Duration::from_secs(2)).await;
    assert_eq!(resolver.calls(), 1);

    sleep(Duration::from_secs(60)).await;
    assert_eq!(resolver.calls(), 2);

    running.stop().await;
}

#[tokio::test(start_paused = true)]
async fn overrun_skips_missed_ticks() {
    // 10s interval, first resolution takes 25s (ticks at 10, 20, 30 ...)
    let resolver = Arc::new(
        ScriptedResolver::fixed(ip("203.0.113.5")).with_delays(vec![Duration::from_secs(25)]),
    );
    let mut cfg = config(EventsConfig::default());
    cfg.watcher.interval_secs = 10;

    let (watcher, events) = Watcher::new(
        &cfg,
        resolver.clone(),
        Arc::new(FaultyHistoryStore::new()),
        None,
    )
    .unwrap();

    let mut running = Running::start(watcher, events);

    // Cycle 1 runs 10..35; the ticks at 20 and 30 collapse into one cycle at 35
    sleep(Duration::from_secs(34)).await;
    assert_eq!(resolver.calls(), 1, "cycles never overlap");

    sleep(Duration::from_secs(4)).await;
    assert_eq!(resolver.calls(), 2, "one catch-up cycle, not a burst");

    // Back on the original grid at 40
    sleep(Duration::from_secs(3)).await;
    assert_eq!(resolver.calls(), 3);

    sleep(Duration::from_secs(10)).await;
    assert_eq!(resolver.calls(), 4);

    running.stop().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_walks_lifecycle_states() {
    let (watcher, events) = Watcher::new(
        &config(EventsConfig::default()),
        Arc::new(ScriptedResolver::fixed(ip("203.0.113.5"))),
        Arc::new(FaultyHistoryStore::new()),
        None,
    )
    .unwrap();
    assert_eq!(watcher.state(), WatcherState::Idle);
    let mut states = watcher.subscribe_state();

    let mut running = Running::start(watcher, events);
    states.changed().await.unwrap();
    assert_eq!(*states.borrow_and_update(), WatcherState::Running);

    sleep(Duration::from_secs(125)).await;
    let rest = running.stop().await;

    assert_eq!(running.watcher.state(), WatcherState::Stopped);
    assert!(matches!(rest.last(), Some(WatcherEvent::Stopped { .. })));
}

#[tokio::test(start_paused = true)]
async fn watcher_runs_only_once() {
    let (watcher, events) = Watcher::new(
        &config(EventsConfig::default()),
        Arc::new(ScriptedResolver::fixed(ip("203.0.113.5"))),
        Arc::new(FaultyHistoryStore::new()),
        None,
    )
    .unwrap();

    let mut running = Running::start(watcher, events);
    sleep(Duration::from_secs(1)).await;
    running.stop().await;

    let (_tx, rx) = tokio::sync::oneshot::channel();
    assert!(running.watcher.run_with_shutdown(rx).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn shutdown_interrupts_running_cycle() {
    let resolver = Arc::new(
        ScriptedResolver::fixed(ip("203.0.113.5")).with_delays(vec![Duration::from_secs(1000)]),
    );
    let history = FaultyHistoryStore::new();
    let (watcher, events) = Watcher::new(
        &config(EventsConfig::default()),
        resolver.clone(),
        Arc::new(history.clone()),
        None,
    )
    .unwrap();

    let mut running = Running::start(watcher, events);
    sleep(Duration::from_secs(65)).await;
    assert_eq!(resolver.calls(), 1);

    let rest = running.stop().await;

    assert!(!rest.iter().any(|e| matches!(e, WatcherEvent::EntryCreated { .. })));
    assert!(history.all().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn drain_waits_up_to_deadline() {
    let mail = RecordingMailTransport::new();
    mail.delay_sends(Duration::from_secs(30));

    let events = EventsConfig {
        on_match: notify_only(),
        ..EventsConfig::default()
    };
    let (watcher, _events) = Watcher::new(
        &notifying_config(events),
        Arc::new(ScriptedResolver::fixed(ip("203.0.113.5"))),
        Arc::new(FaultyHistoryStore::seeded(ip("203.0.113.5")).await),
        Some(Arc::new(mail.clone())),
    )
    .unwrap();

    watcher.run_cycle().await;
    assert!(!watcher.drain(Duration::from_secs(5)).await, "deadline hit first");
    assert!(mail.delivered().is_empty());

    // Detached tasks keep running past the deadline
    sleep(Duration::from_secs(120)).await;
    assert_eq!(mail.delivered().len(), 2);
    assert!(watcher.drain(Duration::from_secs(1)).await);
}

#[tokio::test(start_paused = true)]
async fn queued_errors_are_observed_at_shutdown() {
    let (watcher, mut events) = Watcher::new(
        &config(EventsConfig {
            on_error: notify_only(),
            ..EventsConfig::default()
        }),
        Arc::new(ScriptedResolver::fixed(ip("203.0.113.5"))),
        Arc::new(FaultyHistoryStore::new()),
        None,
    )
    .unwrap();

    let sink = watcher.error_sink();
    sink.report(Error::executor("'sh hook.sh': boom"));
    sink.report(Error::database("connection lost"));

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    shutdown_tx.send(()).unwrap();
    watcher.run_with_shutdown(shutdown_rx).await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }

    let observed: Vec<_> = seen
        .iter()
        .filter_map(|e| match e {
            WatcherEvent::ErrorObserved { kind, .. } => Some(*kind),
            _ => None,
        })
        .collect();
    assert_eq!(observed, vec![ErrorKind::Executor, ErrorKind::Database]);
    assert!(!seen.iter().any(|e| is_dispatched(e, EventType::OnError)));
    assert!(matches!(seen.last(), Some(WatcherEvent::Stopped { .. })));

    // Reports after shutdown go nowhere but do not panic
    assert!(sink.is_closed());
    sink.report(Error::fetch("late"));
}
