use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use colored::*;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use replica_controller::cli::Cli;
use replica_controller::error::exit;
use replica_controller::{
    run_once, Backoff, ControllerConfig, DnsResolver, MongoAdmin, Outcome, Reconciler, WatchLoop,
    WatchSettings,
};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let cli = Cli::parse();

    // Set up colored output
    if cli.no_color {
        colored::control::set_override(false);
    }
    init_logging(cli.verbose, !cli.no_color);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".bright_red().bold(), e);
            exit::CONFIGURATION
        }
    };
    process::exit(code);
}

/// `LOGLEVEL` wins over `RUST_LOG`; `--verbose` wins over both
fn init_logging(verbose: bool, ansi: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        std::env::var("LOGLEVEL")
            .ok()
            .and_then(|level| EnvFilter::try_new(level.to_lowercase()).ok())
            .or_else(|| EnvFilter::try_from_default_env().ok())
            .unwrap_or_else(|| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(ansi)
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<ControllerConfig> {
    let mut config = match &cli.config {
        Some(path) => ControllerConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => ControllerConfig::default(),
    };
    cli.apply_to(&mut config);
    config.validate()?;
    Ok(config)
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let config = load_config(&cli)?;

    let admin = Arc::new(MongoAdmin::new(
        config.call_timeout(),
        config.default_port,
        config.auth.clone(),
    ));
    let reconciler = Reconciler::from_config(&config, Arc::new(DnsResolver::new()), admin);

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    if config.watch {
        info!(endpoints = ?config.endpoints, interval = ?config.poll_interval(), "watching replica set membership");
        let settings = WatchSettings {
            interval: config.poll_interval(),
            backoff: Backoff::from_config(&config.backoff),
        };
        let report = WatchLoop::new(reconciler, settings, cancel).run().await;

        if cli.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            println!(
                "{} stopped after {} passes ({} failed)",
                "✓".bright_green(),
                report.passes,
                report.failures
            );
        }
        Ok(exit::SUCCESS)
    } else {
        let outcome = run_once(&reconciler, &cancel).await;
        print_outcome(&outcome, cli.json)?;
        Ok(outcome.exit_code())
    }
}

fn print_outcome(outcome: &Outcome, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }

    match outcome {
        Outcome::Failed(e) => eprintln!("{} {}", "Error:".bright_red().bold(), e),
        Outcome::NoChange => println!("{} replica set already up to date", "✓".bright_green()),
        other => println!("{} replica set {}", "✓".bright_green(), other.to_string().bright_cyan()),
    }
    Ok(())
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown requested");
        cancel.cancel();
    });
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
