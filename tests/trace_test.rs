//! Hop tracing over a simulated path

#![allow(clippy::unwrap_used)]

mod common;

use common::{fast_timing, HopBehaviour, MockPath, MockResolver};
use pingotrace::{
    CancellationToken, HopSample, HopTracer, RepeatingTracer, Session, TraceConfig, TraceEvent,
    TraceHopRecord, TraceOutcome,
};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const DEST: &str = "192.0.2.9";

fn config(max_hops: u8, resolve_hops: bool) -> TraceConfig {
    TraceConfig::builder()
        .max_hops(max_hops)
        .probe_timeout(Duration::from_millis(10))
        .resolve_hops(resolve_hops)
        .build()
        .unwrap()
}

fn session(path: MockPath, resolver: MockResolver) -> Session {
    Session::builder()
        .transport(Arc::new(path))
        .resolver(Arc::new(resolver))
        .timing(fast_timing())
        .build()
        .unwrap()
}

async fn collect(mut rx: mpsc::Receiver<TraceEvent>) -> Vec<TraceEvent> {
    let mut events = Vec::new();
    let drain = async {
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
    };
    tokio::time::timeout(Duration::from_secs(5), drain)
        .await
        .unwrap();
    events
}

fn hops(events: &[TraceEvent]) -> Vec<&TraceHopRecord> {
    events
        .iter()
        .filter_map(|e| match e {
            TraceEvent::Hop(record) => Some(record),
            _ => None,
        })
        .collect()
}

fn diagnostics(events: &[TraceEvent]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|e| match e {
            TraceEvent::Diagnostic { message } => Some(message.as_str()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_one_record_per_hop_until_destination() {
    let path = MockPath::new(vec![
        HopBehaviour::Router([10, 0, 0, 1]),
        HopBehaviour::Silent,
        HopBehaviour::Router([10, 0, 0, 3]),
    ]);
    let session = session(path, MockResolver::new());
    let scope = session.begin_operation().await;

    let events = collect(session.start_trace(&scope, DEST, config(30, false))).await;
    let records = hops(&events);

    assert_eq!(records.len(), 4);
    assert_eq!(
        records.iter().map(|r| r.hop).collect::<Vec<_>>(),
        [1, 2, 3, 4]
    );
    assert!(diagnostics(&events).is_empty());

    let last = records[3];
    assert!(last.destination_reached);
    assert_eq!(last.peer, Some(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 9))));
    assert!(records[..3].iter().all(|r| !r.destination_reached));

    assert_eq!(records[0].to_fields()[..2], [" 1", "10.0.0.1"]);
    assert_eq!(records[0].samples, [HopSample::Reply(Duration::from_millis(1)); 3]);
    assert_eq!(records[0].to_fields()[2], "1 ms");
}

#[tokio::test]
async fn test_silent_hop_is_reported_as_timeout() {
    let path = MockPath::new(vec![HopBehaviour::Silent, HopBehaviour::Router([10, 0, 0, 2])]);
    let session = session(path, MockResolver::new());
    let scope = session.begin_operation().await;

    let events = collect(session.start_trace(&scope, DEST, config(30, false))).await;
    let silent = hops(&events)[0];

    assert_eq!(silent.peer, None);
    assert_eq!(silent.samples, [HopSample::Timeout; 3]);
    assert_eq!(
        silent.to_fields(),
        [" 1", "Request timed out", "*", "*", "*"]
    );
}

#[tokio::test]
async fn test_hop_names_come_from_ptr_lookups() {
    let path = MockPath::new(vec![
        HopBehaviour::Router([10, 0, 0, 1]),
        HopBehaviour::Router([10, 0, 0, 2]),
    ]);
    let resolver = MockResolver::new().with_reverse([10, 0, 0, 1], "gw.example");
    let session = session(path, resolver);
    let scope = session.begin_operation().await;

    let events = collect(session.start_trace(&scope, DEST, config(30, true))).await;
    let records = hops(&events);

    assert_eq!(records[0].peer_name.as_deref(), Some("gw.example"));
    assert_eq!(records[0].peer_text(), "gw.example [10.0.0.1]");
    // No PTR record: the bare address is shown
    assert_eq!(records[1].peer_name, None);
    assert_eq!(records[1].peer_text(), "10.0.0.2");
}

#[tokio::test]
async fn test_trace_stops_at_max_hops() {
    let path = MockPath::new(vec![HopBehaviour::Router([10, 0, 0, 1]); 8]);
    let tracer = HopTracer::new(
        Arc::new(path.clone()),
        Arc::new(MockResolver::new()),
        config(3, false),
    );
    let (tx, rx) = mpsc::channel(16);
    let cancel = pingotrace::CancellationToken::new();

    let outcome = tracer.run(DEST, &tx, &cancel).await;
    drop(tx);

    assert_eq!(
        outcome,
        TraceOutcome::Completed {
            hops: 3,
            destination_reached: false
        }
    );
    let events = collect(rx).await;
    assert_eq!(hops(&events).len(), 3);
    assert_eq!(path.probes(), 9);
}

#[tokio::test]
async fn test_open_failure_is_a_diagnostic() {
    let mut path = MockPath::new(Vec::new());
    path.open_fails = true;
    let session = session(path, MockResolver::new());
    let scope = session.begin_operation().await;

    let events = collect(session.start_trace(&scope, DEST, config(30, false))).await;

    assert_eq!(events.len(), 1);
    assert!(
        diagnostics(&events)[0].starts_with("Unable to open ICMP connection: "),
        "{events:?}"
    );
}

#[tokio::test]
async fn test_ttl_failure_is_a_diagnostic() {
    let mut path = MockPath::new(Vec::new());
    path.ttl_fails = true;
    let probes = path.probes.clone();
    let session = session(path, MockResolver::new());
    let scope = session.begin_operation().await;

    let events = collect(session.start_trace(&scope, DEST, config(30, false))).await;

    assert_eq!(
        diagnostics(&events),
        ["Unable to set TTL: Failed to create socket: operation not permitted"]
    );
    assert!(hops(&events).is_empty());
    assert_eq!(probes.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_send_failure_ends_the_run() {
    let path = MockPath::new(vec![
        HopBehaviour::Router([10, 0, 0, 1]),
        HopBehaviour::SendFails,
        HopBehaviour::Router([10, 0, 0, 3]),
    ]);
    let session = session(path, MockResolver::new());
    let scope = session.begin_operation().await;

    let events = collect(session.start_trace(&scope, DEST, config(30, false))).await;

    assert_eq!(hops(&events).len(), 1);
    assert_eq!(
        diagnostics(&events),
        ["Unable to send ICMP message: network is unreachable"]
    );
    assert!(matches!(events.last(), Some(TraceEvent::Diagnostic { .. })));
}

#[tokio::test]
async fn test_unresolvable_destination_is_a_diagnostic() {
    let path = MockPath::new(Vec::new());
    let opened = path.opened.clone();
    let session = session(path, MockResolver::new());
    let scope = session.begin_operation().await;

    let events = collect(session.start_trace(&scope, "nowhere.example", config(30, false))).await;

    let messages = diagnostics(&events);
    assert_eq!(messages.len(), 1);
    assert!(messages[0].starts_with("Unable to resolve destination IP address: "));
    assert_eq!(opened.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_hostname_destination_is_resolved_first() {
    let path = MockPath::new(vec![HopBehaviour::Router([10, 0, 0, 1])]);
    let resolver = MockResolver::new().with_forward("dest.example", [192, 0, 2, 9]);
    let session = session(path, resolver);
    let scope = session.begin_operation().await;

    let events = collect(session.start_trace(&scope, "dest.example", config(30, false))).await;
    let records = hops(&events);

    assert_eq!(records.len(), 2);
    assert_eq!(records[1].peer_text(), DEST);
}

#[tokio::test]
async fn test_cancel_stops_trace_without_more_records() {
    let path = MockPath::new(vec![HopBehaviour::Silent; 20]);
    let session = session(path, MockResolver::new());
    let scope = session.begin_operation().await;

    let slow = TraceConfig::builder()
        .probe_timeout(Duration::from_millis(200))
        .resolve_hops(false)
        .build()
        .unwrap();
    let rx = session.start_trace(&scope, DEST, slow);

    tokio::time::sleep(Duration::from_millis(50)).await;
    session.cancel_operation().await;

    let events = collect(rx).await;
    assert!(hops(&events).is_empty(), "{events:?}");
    assert!(diagnostics(&events).is_empty());
}

#[tokio::test]
async fn test_repeating_trace_runs_until_cancelled() {
    let path = MockPath::new(vec![HopBehaviour::Router([10, 0, 0, 1])]);
    let opened = path.opened.clone();
    let session = session(path, MockResolver::new());
    let scope = session.begin_operation().await;

    let mut rx = session.start_repeating_trace(&scope, DEST, config(30, false));

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        let done = event == TraceEvent::RunFinished { run: 2 };
        events.push(event);
        if done {
            break;
        }
    }
    scope.cancel();
    let rest = collect(rx).await;

    assert_eq!(events.len(), 6);
    assert_eq!(events[2], TraceEvent::RunFinished { run: 1 });
    assert_eq!(hops(&events).iter().map(|r| r.hop).collect::<Vec<_>>(), [1, 2, 1, 2]);
    assert_eq!(events[5].to_fields(), ["Trace #2 complete"]);
    assert!(opened.load(std::sync::atomic::Ordering::SeqCst) >= 2);
    assert!(rest
        .iter()
        .all(|e| !matches!(e, TraceEvent::RunFinished { run } if *run > 3)));
}

#[tokio::test]
async fn test_repeating_trace_continues_after_diagnostics() {
    let mut path = MockPath::new(Vec::new());
    path.ttl_fails = true;
    let session = session(path, MockResolver::new());
    let scope = session.begin_operation().await;

    let mut rx = session.start_repeating_trace(&scope, DEST, config(30, false));

    let mut runs = 0;
    let mut messages = 0;
    while runs < 2 {
        match rx.recv().await.unwrap() {
            TraceEvent::Diagnostic { .. } => messages += 1,
            TraceEvent::RunFinished { .. } => runs += 1,
            TraceEvent::Hop(record) => panic!("unexpected hop {record}"),
        }
    }
    assert!(scope.shutdown(Duration::from_secs(1)).await);
    assert_eq!(messages, 2);
}

#[tokio::test]
async fn test_unread_stream_does_not_block_cancellation() {
    let mut failing = MockPath::new(Vec::new());
    failing.open_fails = true;

    // One path ends in a hop record, the other in a diagnostic
    for path in [MockPath::new(Vec::new()), failing] {
        let tracer = HopTracer::new(
            Arc::new(path),
            Arc::new(MockResolver::new()),
            config(30, false),
        );
        let repeating = RepeatingTracer::new(tracer, Duration::from_millis(5));
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { repeating.run(DEST, &tx, &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let runs = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("repeating tracer still blocked after cancellation")
            .unwrap();
        assert!(runs <= 1, "only the first run fits in the channel: {runs}");
    }
}
