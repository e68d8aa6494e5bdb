//! Concurrent resolution of target lists

use super::resolver::{forward_lookup, ptr_lookup, Resolver};
use super::{is_ipv4_literal, ResolutionResult, LOOKUP_FAILED};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Results of a batch resolution, keyed by target, with the input order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Resolutions {
    results: HashMap<String, ResolutionResult>,
    order: Vec<String>,
}

impl Resolutions {
    /// Assemble from a result map and the order targets were supplied in
    pub fn new(results: HashMap<String, ResolutionResult>, order: Vec<String>) -> Self {
        Self { results, order }
    }

    /// Result for a target
    pub fn get(&self, target: &str) -> Option<&ResolutionResult> {
        self.results.get(target)
    }

    /// Targets in input order
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Number of distinct results
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether there are no results
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Results in input order; a target listed twice is yielded once
    pub fn iter(&self) -> impl Iterator<Item = &ResolutionResult> {
        let mut yielded = HashSet::new();
        self.order
            .iter()
            .filter(move |key| yielded.insert(key.as_str()))
            .filter_map(|key| self.results.get(key))
    }

    /// Drop records that describe an address or target already seen
    ///
    /// Successful records are keyed by their address: the target when it is
    /// an IP, otherwise the resolved value when that is an IP. Failed records
    /// only collide on the exact target string. Traversal follows input
    /// order, so applying this twice changes nothing.
    pub fn dedup(&self) -> Resolutions {
        let mut seen: HashSet<String> = HashSet::new();
        let mut results = HashMap::new();
        let mut order = Vec::new();

        for result in self.iter() {
            let key = &result.target;
            let keep = if result.success {
                let mut keep = false;
                if key.parse::<IpAddr>().is_ok() && seen.insert(key.clone()) {
                    keep = true;
                }
                let value = result.value();
                if value.parse::<IpAddr>().is_ok() && seen.insert(value.to_string()) {
                    keep = true;
                }
                keep
            } else {
                seen.insert(key.clone())
            };

            if keep {
                order.push(key.clone());
                results.insert(key.clone(), result.clone());
            }
        }

        Resolutions { results, order }
    }
}

/// Resolve every target concurrently
///
/// IPv4 literals get a reverse lookup, anything else a forward lookup. At
/// most `max_concurrent` lookups are in flight at once.
#[instrument(skip_all, fields(targets = targets.len()))]
pub async fn resolve_targets(
    resolver: &dyn Resolver,
    targets: &[String],
    cancel: &CancellationToken,
    max_concurrent: usize,
) -> Resolutions {
    let semaphore = Semaphore::new(max_concurrent.max(1));
    let mut lookups = FuturesUnordered::new();

    for target in targets {
        let semaphore = &semaphore;
        lookups.push(async move {
            let _permit = semaphore.acquire().await.ok();
            match target.parse::<IpAddr>() {
                Ok(ip) if is_ipv4_literal(target) => ptr_lookup(resolver, ip, cancel).await,
                _ => forward_lookup(resolver, target, cancel).await,
            }
        });
    }

    let mut results = HashMap::new();
    while let Some(result) = lookups.next().await {
        results.insert(result.target.clone(), result);
    }
    debug!(resolved = results.len(), "batch resolution finished");

    Resolutions::new(results, targets.to_vec())
}

/// Resolve every target to an IPv4 address string, one output per input
///
/// IPv4 literals pass through untouched; failures become [`LOOKUP_FAILED`].
#[instrument(skip_all, fields(targets = targets.len()))]
pub async fn resolve_addresses(
    resolver: &dyn Resolver,
    targets: &[String],
    cancel: &CancellationToken,
    max_concurrent: usize,
) -> Vec<String> {
    let semaphore = Semaphore::new(max_concurrent.max(1));
    let mut lookups = FuturesUnordered::new();

    for (index, target) in targets.iter().enumerate() {
        let semaphore = &semaphore;
        lookups.push(async move {
            if is_ipv4_literal(target) {
                return (index, target.clone());
            }
            let _permit = semaphore.acquire().await.ok();
            let result = forward_lookup(resolver, target, cancel).await;
            let address = if result.success {
                result.resolved_address
            } else {
                LOOKUP_FAILED.to_string()
            };
            (index, address)
        });
    }

    let mut addresses = vec![LOOKUP_FAILED.to_string(); targets.len()];
    while let Some((index, address)) = lookups.next().await {
        addresses[index] = address;
    }
    addresses
}
