//! Batch resolution through a session with a mock resolver

#![allow(clippy::unwrap_used)]

mod common;

use common::{fast_timing, MockResolver};
use pingotrace::dns::{LOOKUP_FAILED, NO_DNS_RECORD, PTR_LOOKUP_TIMED_OUT};
use pingotrace::{LookupKind, Session};
use std::sync::Arc;
use std::time::Duration;

fn session(resolver: Arc<MockResolver>) -> Session {
    Session::builder()
        .resolver(resolver)
        .timing(fast_timing())
        .build()
        .unwrap()
}

fn strings(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_flat_addresses_match_input_positions() {
    let resolver = Arc::new(MockResolver::new().with_forward("one.example", [192, 0, 2, 1]));
    let session = session(resolver.clone());
    let scope = session.begin_operation().await;

    let input = strings(&["1.1.1.1", "not a valid host###"]);
    let out = session.resolve_addresses(&input, scope.token()).await;
    assert_eq!(out, ["1.1.1.1", LOOKUP_FAILED]);

    let input = strings(&["one.example", "10.0.0.1", "two.example", "one.example"]);
    let out = session.resolve_addresses(&input, scope.token()).await;
    assert_eq!(out.len(), input.len());
    assert_eq!(out, ["192.0.2.1", "10.0.0.1", LOOKUP_FAILED, "192.0.2.1"]);
}

#[tokio::test]
async fn test_reverse_names_have_no_root_dot() {
    let resolver = Arc::new(
        MockResolver::new()
            .with_reverse([192, 0, 2, 1], "gw.example")
            .with_reverse([192, 0, 2, 2], "core.example"),
    );
    let session = session(resolver);
    let scope = session.begin_operation().await;

    let input = strings(&["192.0.2.1", "192.0.2.2", "192.0.2.3"]);
    let res = session.resolve_targets(&input, scope.token()).await;

    for result in res.iter().filter(|r| r.success) {
        assert_eq!(result.kind, LookupKind::Reverse);
        assert!(!result.display_name.ends_with('.'), "{result:?}");
    }
    assert_eq!(res.get("192.0.2.1").unwrap().display_name, "gw.example");
    let missing = res.get("192.0.2.3").unwrap();
    assert!(!missing.success);
    assert_eq!(missing.display_name, PTR_LOOKUP_TIMED_OUT);
}

#[tokio::test]
async fn test_dedup_is_idempotent() {
    let resolver = Arc::new(
        MockResolver::new()
            .with_forward("a.example", [192, 0, 2, 1])
            .with_forward("b.example", [192, 0, 2, 1])
            .with_forward("c.example", [192, 0, 2, 3])
            .with_reverse([192, 0, 2, 3], "c.example"),
    );
    let session = session(resolver);
    let scope = session.begin_operation().await;

    let input = strings(&[
        "a.example",
        "b.example",
        "192.0.2.3",
        "c.example",
        "bad.example",
        "192.0.2.4",
    ]);
    let res = session.resolve_targets(&input, scope.token()).await;
    let once = res.dedup();
    let twice = once.dedup();

    assert_eq!(once, twice);
    assert_eq!(
        once.order(),
        strings(&["a.example", "192.0.2.3", "bad.example", "192.0.2.4"]).as_slice()
    );
}

#[tokio::test]
async fn test_cancelled_scope_fails_every_lookup() {
    let resolver = Arc::new(MockResolver::new().with_forward("a.example", [192, 0, 2, 1]));
    let session = session(resolver.clone());
    let scope = session.begin_operation().await;
    scope.cancel();

    let input = strings(&["a.example", "192.0.2.1"]);
    let res = session.resolve_targets(&input, scope.token()).await;
    assert!(res.iter().all(|r| !r.success));
    assert_eq!(res.get("a.example").unwrap().resolved_address, NO_DNS_RECORD);
    assert_eq!(resolver.calls(), 0);
}

#[tokio::test]
async fn test_cancellation_fails_in_flight_lookups() {
    let resolver = Arc::new(
        MockResolver::new()
            .with_forward("slow.example", [192, 0, 2, 1])
            .with_delay(Duration::from_secs(30)),
    );
    let session = session(resolver);
    let scope = session.begin_operation().await;

    let token = scope.token().clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });

    let input = strings(&["slow.example"]);
    let res = tokio::time::timeout(
        Duration::from_secs(5),
        session.resolve_targets(&input, scope.token()),
    )
    .await
    .unwrap();
    let result = res.get("slow.example").unwrap();
    assert!(!result.success);
    assert_eq!(result.resolved_address, NO_DNS_RECORD);
}

#[tokio::test]
async fn test_new_operation_cancels_previous_lookups() {
    let resolver = Arc::new(
        MockResolver::new()
            .with_forward("slow.example", [192, 0, 2, 1])
            .with_delay(Duration::from_secs(30)),
    );
    let session = session(resolver);
    let first = session.begin_operation().await;

    let worker = {
        let session = session.clone();
        let token = first.token().clone();
        first.spawn(async move {
            session
                .resolve_targets(&strings(&["slow.example"]), &token)
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = session.begin_operation().await;
    assert!(first.is_cancelled());
    assert!(!second.is_cancelled());

    let res = worker.await.unwrap();
    assert!(!res.get("slow.example").unwrap().success);
}
