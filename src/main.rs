//! pingotrace - concurrent ping, traceroute and trace-then-ping.
//!
//! This is the command-line interface for the pingotrace library.

#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pingotrace::dns::LOOKUP_FAILED;
use pingotrace::socket::utils::{is_root, privilege_hint};
use pingotrace::{
    plan_targets, PingEvent, PingPathEvent, PingSample, ResolutionResult, Session, TargetList,
    TimingConfig, TraceConfig, TraceEvent,
};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Get the version string for pingotrace
fn get_version() -> &'static str {
    if cfg!(debug_assertions) {
        concat!(env!("CARGO_PKG_VERSION"), "-UNRELEASED")
    } else {
        env!("CARGO_PKG_VERSION")
    }
}

/// Command-line arguments.
#[derive(Parser, Debug)]
#[clap(
    author,
    version = get_version(),
    about = "Concurrent ICMP ping, traceroute and trace-then-ping",
    long_about = None
)]
struct Args {
    #[clap(subcommand)]
    command: Command,

    /// Output results as JSON (one object per line for streaming commands)
    #[clap(long, global = true)]
    json: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Delay between two probes of the same target in milliseconds
    #[clap(long, global = true, default_value_t = 1000)]
    interval_ms: u64,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve hostnames to addresses and addresses to names
    Lookup {
        /// Hostnames or IPv4 addresses
        #[clap(required = true)]
        targets: Vec<String>,

        /// Drop entries describing an address already listed
        #[clap(long)]
        dedup: bool,
    },
    /// Resolve every target to an IPv4 address, one per line
    Addresses {
        /// Hostnames or IPv4 addresses
        #[clap(required = true)]
        targets: Vec<String>,
    },
    /// Ping targets continuously until interrupted
    Ping {
        /// Hostnames or IPv4 addresses
        #[clap(required = true)]
        targets: Vec<String>,

        /// Send a single echo request per target and exit
        #[clap(long)]
        once: bool,
    },
    /// Trace the route to a destination
    Trace {
        /// Destination hostname or IPv4 address
        destination: String,

        #[clap(flatten)]
        trace: TraceArgs,

        /// Repeat the trace until interrupted
        #[clap(short, long)]
        continuous: bool,
    },
    /// Trace the route to a destination, then ping every hop
    Pingpath {
        /// Destination hostname or IPv4 address
        destination: String,

        #[clap(flatten)]
        trace: TraceArgs,

        /// Pause between the end of the trace and the first ping, in milliseconds
        #[clap(long, default_value_t = 3000)]
        grace_ms: u64,
    },
}

#[derive(clap::Args, Debug)]
struct TraceArgs {
    /// Maximum number of hops
    #[clap(short = 'm', long, default_value_t = 30)]
    max_hops: u8,

    /// Timeout for individual probes in milliseconds
    #[clap(long, default_value_t = 1000)]
    probe_timeout_ms: u64,

    /// Disable reverse DNS lookups of hops
    #[clap(long)]
    no_rdns: bool,
}

impl TraceArgs {
    fn to_config(&self) -> Result<TraceConfig> {
        TraceConfig::builder()
            .max_hops(self.max_hops)
            .probe_timeout(Duration::from_millis(self.probe_timeout_ms))
            .resolve_hops(!self.no_rdns)
            .build()
            .map_err(anyhow::Error::msg)
    }
}

/// Log filter for a `-v` count
fn verbosity_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn configure_logging(verbose: u8) {
    let filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| verbosity_filter(verbose).to_string());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn main() {
    let args = Args::parse();
    configure_logging(args.verbose);

    // Create single-threaded tokio runtime for lower overhead
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to create Tokio runtime");

    if let Err(e) = runtime.block_on(async_main(args)) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn async_main(args: Args) -> Result<()> {
    let mut timing = TimingConfig::current();
    timing.ping_interval = Duration::from_millis(args.interval_ms);
    if let Command::Pingpath { grace_ms, .. } = &args.command {
        timing.pingpath_grace = Duration::from_millis(*grace_ms);
    }

    let session = Session::builder()
        .timing(timing)
        .build()
        .map_err(anyhow::Error::msg)?;

    // Ctrl-C cancels whatever operation is running; a second one exits
    {
        let session = session.clone();
        tokio::spawn(async move {
            let mut previous = 0;
            while tokio::signal::ctrl_c().await.is_ok() {
                match interrupt_action(previous) {
                    InterruptAction::CancelOperation => {
                        debug!("interrupted");
                        session.cancel_operation().await;
                    }
                    InterruptAction::Exit => {
                        eprintln!("Interrupted");
                        std::process::exit(130);
                    }
                }
                previous += 1;
            }
        });
    }

    match &args.command {
        Command::Lookup { targets, dedup } => lookup(&session, targets, *dedup, args.json).await,
        Command::Addresses { targets } => addresses(&session, targets, args.json).await,
        Command::Ping { targets, once } => {
            warn_if_unprivileged();
            ping(&session, targets, *once, args.json).await
        }
        Command::Trace {
            destination,
            trace,
            continuous,
        } => {
            warn_if_unprivileged();
            run_trace(&session, destination, trace.to_config()?, *continuous, args.json).await
        }
        Command::Pingpath {
            destination, trace, ..
        } => {
            warn_if_unprivileged();
            pingpath(&session, destination, trace.to_config()?, args.json).await
        }
    }
}

/// Response to a Ctrl-C
#[derive(Debug, PartialEq, Eq)]
enum InterruptAction {
    /// Stop the running operation and let the command finish
    CancelOperation,
    /// Leave immediately
    Exit,
}

/// Response to a Ctrl-C preceded by `previous` others
fn interrupt_action(previous: usize) -> InterruptAction {
    if previous == 0 {
        InterruptAction::CancelOperation
    } else {
        InterruptAction::Exit
    }
}

fn warn_if_unprivileged() {
    if !is_root() {
        eprintln!("Warning: not running as root; {}", privilege_hint());
    }
}

fn parse_targets(targets: &[String]) -> Result<Vec<String>> {
    let list = TargetList::parse(targets).context("invalid target list")?;
    Ok(list.into_vec())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

/// One line of `lookup` output
fn format_resolution(result: &ResolutionResult) -> String {
    if result.success {
        format!("{} -> {}", result.target, result.value())
    } else {
        format!("{}: {}", result.target, result.value())
    }
}

async fn lookup(session: &Session, targets: &[String], dedup: bool, json: bool) -> Result<()> {
    let targets = parse_targets(targets)?;
    let scope = session.begin_operation().await;
    let mut resolutions = session.resolve_targets(&targets, scope.token()).await;
    if dedup {
        resolutions = resolutions.dedup();
    }

    let results: Vec<&ResolutionResult> = resolutions.iter().collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        for result in results {
            println!("{}", format_resolution(result));
        }
    }
    Ok(())
}

async fn addresses(session: &Session, targets: &[String], json: bool) -> Result<()> {
    let targets = parse_targets(targets)?;
    let scope = session.begin_operation().await;
    let addresses = session.resolve_addresses(&targets, scope.token()).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&addresses)?);
    } else {
        for (target, address) in targets.iter().zip(&addresses) {
            if address == LOOKUP_FAILED {
                println!("{}: {}", target, address);
            } else {
                println!("{}", address);
            }
        }
    }
    Ok(())
}

/// One line of continuous-ping output
fn format_sample(label: &str, sample: &PingSample) -> String {
    format!("{} #{:<2} {}", label, sample.column + 1, sample.class)
}

async fn ping(session: &Session, targets: &[String], once: bool, json: bool) -> Result<()> {
    let targets = parse_targets(targets)?;
    let scope = session.begin_operation().await;
    let resolutions = session.resolve_targets(&targets, scope.token()).await.dedup();
    let plan = plan_targets(&resolutions);

    if json {
        print_json(&plan)?;
    } else {
        for (host, reason) in &plan.failures {
            println!("{}: {}", host, reason);
        }
    }

    if once {
        let probes = plan.targets.iter().map(|t| session.probe(&t.address));
        for (target, result) in plan.targets.iter().zip(futures::future::join_all(probes).await) {
            if json {
                print_json(&result)?;
            } else {
                println!("{}: {}", target.label, result.class());
            }
        }
        return Ok(());
    }

    let labels: Vec<String> = plan.targets.iter().map(|t| t.label.clone()).collect();
    let mut events = session.start_ping(&scope, plan.targets);
    while let Some(event) = events.recv().await {
        if json {
            print_json(&event)?;
            continue;
        }
        match event {
            PingEvent::Sample(sample) => {
                println!("{}", format_sample(&labels[sample.target], &sample));
            }
            PingEvent::WindowCleared { target } => {
                debug!(label = %labels[target], "window cleared");
            }
        }
    }
    Ok(())
}

/// Text form of a trace event
fn format_trace_event(event: &TraceEvent) -> String {
    match event {
        TraceEvent::Hop(record) => record.to_string(),
        other => other.to_fields().join(" "),
    }
}

async fn run_trace(
    session: &Session,
    destination: &str,
    config: TraceConfig,
    continuous: bool,
    json: bool,
) -> Result<()> {
    let scope = session.begin_operation().await;
    if !json {
        println!(
            "Tracing route to {} over a maximum of {} hops",
            destination, config.max_hops
        );
    }

    let mut events = if continuous {
        session.start_repeating_trace(&scope, destination, config)
    } else {
        session.start_trace(&scope, destination, config)
    };
    while let Some(event) = events.recv().await {
        if json {
            print_json(&event)?;
        } else {
            println!("{}", format_trace_event(&event));
        }
    }
    Ok(())
}

async fn pingpath(
    session: &Session,
    destination: &str,
    config: TraceConfig,
    json: bool,
) -> Result<()> {
    let scope = session.begin_operation().await;
    let mut labels: Vec<String> = Vec::new();
    let mut events = session.start_pingpath(&scope, destination, config);

    while let Some(event) = events.recv().await {
        if json {
            print_json(&event)?;
            continue;
        }
        match event {
            PingPathEvent::Trace(event) => println!("{}", format_trace_event(&event)),
            PingPathEvent::Plan(plan) => {
                println!();
                labels = plan.targets.into_iter().map(|t| t.label).collect();
                for (host, reason) in &plan.failures {
                    println!("{}: {}", host, reason);
                }
            }
            PingPathEvent::Ping(PingEvent::Sample(sample)) => {
                if let Some(label) = labels.get(sample.target) {
                    println!("{}", format_sample(label, &sample));
                }
            }
            PingPathEvent::Ping(PingEvent::WindowCleared { .. }) => {}
        }
    }
    Ok(())
}
