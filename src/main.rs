//! `drover` command-line driver.
//!
//! Runs one simulation over an in-process pool of simulated replicas and
//! prints the consistency report.
//!
//! # Exit codes
//! - `0`: run completed, or was interrupted by a signal
//! - `1`: fatal startup failure
//! - `2`: invalid arguments or configuration

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use drover_core::{AccountKeying, AccountSampling, RunConfig};
use drover_harness::{HarnessError, RunCoordinator};
use drover_replica::SimReplicaFactory;
use tracing_subscriber::EnvFilter;

const EXIT_FATAL: u8 = 1;
const EXIT_USAGE: u8 = 2;

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|e| e.to_string())
}

fn cli() -> Command {
    Command::new("drover")
        .about("drive a replicated ledger pool under load, inject crashes, verify convergence")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("nodenum")
                .short('n')
                .long("nodenum")
                .value_parser(value_parser!(usize))
                .help("Replica count [default: 10]"),
        )
        .arg(
            Arg::new("txsnum")
                .long("txsnum")
                .value_parser(value_parser!(u64))
                .help("Total transaction budget [default: 50000]"),
        )
        .arg(
            Arg::new("crash")
                .short('c')
                .long("crash")
                .value_parser(value_parser!(usize))
                .help("Replicas to crash during the run [default: 0]"),
        )
        .arg(
            Arg::new("rps")
                .long("rps")
                .value_parser(value_parser!(u32))
                .help("Target aggregate transactions per second [default: 5000]"),
        )
        .arg(
            Arg::new("stagger")
                .long("stagger")
                .value_parser(parse_duration)
                .help("Delay between replica starts, e.g. 2s [default: 0s]"),
        )
        .arg(
            Arg::new("crash-warmup")
                .long("crash-warmup")
                .value_parser(parse_duration)
                .help("Delay before the first crash is scheduled [default: 0s]"),
        )
        .arg(
            Arg::new("keying")
                .long("keying")
                .value_parser(|s: &str| s.parse::<AccountKeying>())
                .help("Account id keying: numeric|named [default: numeric]"),
        )
        .arg(
            Arg::new("sampling")
                .long("sampling")
                .value_parser(|s: &str| s.parse::<AccountSampling>())
                .help("Verifier account sampling: random|leading [default: random]"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .value_parser(value_parser!(u64))
                .help("Seed for crash, sampling and transaction randomness"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_parser(value_parser!(PathBuf))
                .help("TOML run configuration; flags override file values"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Print the report as JSON"),
        )
}

fn build_config(matches: &ArgMatches) -> Result<RunConfig, HarnessError> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };

    if let Some(&replicas) = matches.get_one::<usize>("nodenum") {
        config.replicas = replicas;
    }
    if let Some(&total) = matches.get_one::<u64>("txsnum") {
        config.total_transactions = total;
    }
    if let Some(&crashes) = matches.get_one::<usize>("crash") {
        config.crashes = crashes;
    }
    if let Some(&rate) = matches.get_one::<u32>("rps") {
        config.target_rate = rate;
    }
    if let Some(&stagger) = matches.get_one::<Duration>("stagger") {
        config.stagger = stagger;
    }
    if let Some(&warmup) = matches.get_one::<Duration>("crash-warmup") {
        config.crash_warmup = warmup;
    }
    if let Some(&keying) = matches.get_one::<AccountKeying>("keying") {
        config.keying = keying;
    }
    if let Some(&sampling) = matches.get_one::<AccountSampling>("sampling") {
        config.sampling = sampling;
    }
    if let Some(&seed) = matches.get_one::<u64>("seed") {
        config.seed = Some(seed);
    }

    config.validate()?;
    Ok(config)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = cli().get_matches();
    init_tracing();

    let config = match build_config(&matches) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::from(EXIT_USAGE);
        }
    };
    let json = matches.get_flag("json");

    tracing::info!(
        replicas = config.replicas,
        transactions = config.total_transactions,
        rate = config.target_rate,
        crashes = config.crashes,
        seed = ?config.seed,
        "drover starting"
    );

    let factory = Arc::new(SimReplicaFactory::from_run_config(&config));
    let mut coordinator = RunCoordinator::new(config, factory).with_signals(true);
    if json {
        // Keep stdout for the JSON document.
        coordinator = coordinator.with_progress(std::io::stderr());
    }

    match coordinator.run().await {
        Ok(outcome) => {
            if json {
                match outcome.report.to_json() {
                    Ok(document) => println!("{document}"),
                    Err(e) => {
                        tracing::error!(error = %e, "failed to render report");
                        return ExitCode::from(EXIT_FATAL);
                    }
                }
            } else {
                println!("{}", outcome.report);
            }
            if !outcome.report.is_consistent() {
                tracing::warn!(accounts = outcome.report.divergent.len(), "replicas diverged");
            }
            ExitCode::SUCCESS
        }
        Err(HarnessError::Interrupted) => {
            tracing::info!("run interrupted, exiting");
            ExitCode::SUCCESS
        }
        Err(e) if e.is_config() => {
            tracing::error!(error = %e, "invalid configuration");
            ExitCode::from(EXIT_USAGE)
        }
        Err(e) => {
            tracing::error!(error = %e, "run failed");
            ExitCode::from(EXIT_FATAL)
        }
    }
}
