//! orchestra CLI entry point.

mod args;
mod progress;
mod replay;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use orchestra_core::clock::{Poller, SystemClock};
use orchestra_core::commands::Command;
use orchestra_core::config::OrchestraConfig;
use orchestra_core::filters::find_in_snapshot;
use orchestra_core::hierarchy::TreeNode;
use orchestra_core::orchestra::{CommandStatus, FlowReport, Orchestra};
use orchestra_core::selector::ElementSelector;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::args::{Cli, Commands, QueryArgs, RunArgs};
use crate::progress::ConsoleListener;
use crate::replay::ReplayDriver;

fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run(args) => run_command(args),
        Commands::Query(args) => query_command(args),
        Commands::Examples => {
            println!("{}", crate::args::EXAMPLES_TEXT);
            Ok(true)
        }
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}

/// Read a flow file: a JSON array of commands.
fn load_flow(path: &Path) -> anyhow::Result<Vec<Command>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read flow {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid flow {}", path.display()))
}

/// Configuration from file and env, then command-line flags on top.
fn load_config(args: &RunArgs) -> anyhow::Result<OrchestraConfig> {
    let mut config =
        OrchestraConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(ms) = args.lookup_timeout {
        config.lookup_timeout_ms = ms;
    }
    if let Some(ms) = args.optional_timeout {
        config.optional_lookup_timeout_ms = ms;
    }
    Ok(config)
}

fn run_command(args: RunArgs) -> anyhow::Result<bool> {
    let commands = load_flow(&args.flow)?;
    let config = load_config(&args)?;
    let driver = Arc::new(ReplayDriver::load(&args.session)?);

    let runtime = tokio::runtime::Runtime::new()?;
    let report = runtime.block_on(run_flow(driver, config, commands, args.json))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }
    Ok(report.success)
}

/// Run the flow on a blocking worker; Ctrl+C or SIGTERM cancels it.
async fn run_flow(
    driver: Arc<ReplayDriver>,
    config: OrchestraConfig,
    commands: Vec<Command>,
    quiet: bool,
) -> anyhow::Result<FlowReport> {
    let cancel = CancellationToken::new();
    let poller = Poller::new(Arc::new(SystemClock::new()), cancel.clone());
    let mut orchestra = Orchestra::new(driver, config).with_poller(poller);
    if !quiet {
        orchestra = orchestra.with_listener(Box::new(ConsoleListener));
    }

    let mut worker =
        tokio::task::spawn_blocking(move || orchestra.run_flow_with_report(&commands, None));

    let report = tokio::select! {
        joined = &mut worker => joined?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, cancelling flow");
            cancel.cancel();
            worker.await?
        }
        _ = sigterm() => {
            info!("Received SIGTERM, cancelling flow");
            cancel.cancel();
            worker.await?
        }
    };
    Ok(report)
}

fn print_summary(report: &FlowReport) {
    let done = report
        .statuses
        .iter()
        .filter(|s| matches!(s, CommandStatus::Completed | CommandStatus::Skipped))
        .count();
    let verdict = if report.success { "passed" } else { "failed" };
    println!(
        "Flow {} ({}/{} commands completed, run {})",
        verdict,
        done,
        report.statuses.len(),
        report.run_id
    );
    if let Some(err) = &report.error {
        println!("Error: {}", err);
    }
}

fn query_command(args: QueryArgs) -> anyhow::Result<bool> {
    let selector: ElementSelector =
        serde_json::from_str(&args.selector).context("invalid selector JSON")?;
    let raw = std::fs::read_to_string(&args.hierarchy)
        .with_context(|| format!("failed to read hierarchy {}", args.hierarchy.display()))?;
    let root: TreeNode = serde_json::from_str(&raw)
        .with_context(|| format!("invalid hierarchy {}", args.hierarchy.display()))?;

    let matches = find_in_snapshot(&selector, &root)?;

    if args.json {
        let rows: Vec<_> = matches
            .iter()
            .map(|m| {
                serde_json::json!({
                    "bounds": m.bounds,
                    "center": m.center(),
                    "attributes": m.tree_node.attributes,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else if matches.is_empty() {
        println!("No element matches {}", selector.description());
    } else {
        for (i, m) in matches.iter().enumerate() {
            println!(
                "{}: {:?} {} center={}",
                i,
                m.tree_node.label().unwrap_or(""),
                m.bounds.encode(),
                m.center()
            );
        }
    }
    Ok(!matches.is_empty())
}

/// Wait for SIGTERM signal (Unix only).
///
/// If signal registration fails, logs a warning and waits indefinitely.
#[cfg(unix)]
async fn sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!(
                "Failed to register SIGTERM handler: {}, only SIGINT cancels the flow",
                e
            );
            std::future::pending::<()>().await;
        }
    }
}

/// SIGTERM is not available on non-Unix platforms; use a never-completing future.
#[cfg(not(unix))]
async fn sigterm() {
    std::future::pending::<()>().await;
}
