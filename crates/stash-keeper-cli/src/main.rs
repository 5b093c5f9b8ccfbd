mod commands;
mod logging;

use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands};
use dotenv::dotenv;
use stash_keeper_core::config::{load_configuration, AppConfig};
use stash_keeper_core::monitor::{heartbeat_path, Heartbeat};
use stash_keeper_core::presets::{ExtensionPresets, DEFAULT_PRESETS_FILE_NAME};
use stash_keeper_core::storage::BackupRecord;
use stash_keeper_core::{ErrorClass, HashIndex, LogReporter, Monitor, ShutdownSignal};
use tracing::{error, info};

fn main() {
    dotenv().ok();

    let _guard = logging::init_logger();
    let args = Cli::parse();

    let config = match load_configuration(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(2);
        }
    };

    let outcome = match args.command {
        Some(Commands::Run) => run_monitor(&config),
        Some(Commands::Once) => run_settle_once(&config),
        Some(Commands::PrintConfig) => print_config(&config),
        Some(Commands::Presets { write }) => show_presets(&config, write),
        Some(Commands::Records { path, limit }) => show_records(&config, path.as_deref(), limit),
        Some(Commands::Status) => show_status(&config),
        None => {
            let _ = Cli::command().print_long_help();
            Ok(())
        }
    };

    if let Err(err) = outcome {
        error!("Error: {:#}", err);
        process::exit(exit_code(&err));
    }
}

/// 2 for configuration problems, 3 for a damaged store, 1 otherwise.
fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<stash_keeper_core::Error>().map(|e| e.class()) {
        Some(ErrorClass::Configuration) => 2,
        Some(ErrorClass::StoreCorruption) => 3,
        _ => 1,
    }
}

fn install_shutdown_handler() -> Result<ShutdownSignal> {
    let shutdown = ShutdownSignal::new();
    let handle = shutdown.clone();
    ctrlc::set_handler(move || {
        info!("Received termination signal, finishing the current scan");
        handle.request();
    })
    .context("could not install signal handler")?;
    Ok(shutdown)
}

fn run_monitor(config: &AppConfig) -> Result<()> {
    let settings = config.validate()?;
    let shutdown = install_shutdown_handler()?;
    let reporter = LogReporter;

    let mut monitor = Monitor::new(settings, &reporter)?;
    info!(
        "Archiving into {}",
        monitor.settings().destination_root().display()
    );
    let outcome = monitor.run(&shutdown);
    let (summary, records) = close_monitor(monitor, outcome)?;

    info!(
        "{} scans, {} archived, {} skipped as duplicates, {} errors, {} records stored",
        format!("{}", summary.cycles).cyan(),
        format!("{}", summary.archived).green(),
        format!("{}", summary.skipped_duplicate).yellow(),
        format!("{}", summary.errors).red(),
        records,
    );
    Ok(())
}

fn run_settle_once(config: &AppConfig) -> Result<()> {
    let settings = config.validate()?;
    let shutdown = install_shutdown_handler()?;
    let reporter = LogReporter;

    let mut monitor = Monitor::new(settings, &reporter)?;
    let outcome = monitor.settle_once(&shutdown);
    let (result, _) = close_monitor(monitor, outcome)?;

    info!(
        "{} listed, {} archived, {} skipped as duplicates, {} still settling, {} errors",
        result.listed,
        format!("{}", result.archived.len()).green(),
        format!("{}", result.skipped_duplicate.len()).yellow(),
        result
            .listed
            .saturating_sub(result.archived.len() + result.skipped_duplicate.len()),
        format!("{}", result.errors.len()).red(),
    );
    Ok(())
}

/// Flush the store and combine the result with the loop's. The loop's own
/// failure wins; a flush error behind it is only logged.
fn close_monitor<T>(
    monitor: Monitor<'_>,
    outcome: stash_keeper_core::error::Result<T>,
) -> Result<(T, u64)> {
    conclude(outcome, monitor.shutdown())
}

fn conclude<T>(
    outcome: stash_keeper_core::error::Result<T>,
    closed: stash_keeper_core::error::Result<u64>,
) -> Result<(T, u64)> {
    match (outcome, closed) {
        (Ok(value), Ok(records)) => Ok((value, records)),
        (Ok(_), Err(flush_err)) => Err(flush_err.into()),
        (Err(loop_err), Ok(_)) => Err(loop_err.into()),
        (Err(loop_err), Err(flush_err)) => {
            error!("Could not flush backup store: {}", flush_err);
            Err(loop_err.into())
        }
    }
}

fn print_config(config: &AppConfig) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("could not render configuration")?;
    println!("{}", rendered);
    match config.resolve_extensions() {
        Ok(extensions) => println!("# effective extensions: {}", extensions.join(", ")),
        Err(err) => println!("# {}", err),
    }
    Ok(())
}

fn presets_path(config: &AppConfig) -> PathBuf {
    config
        .presets_file
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PRESETS_FILE_NAME))
}

fn show_presets(config: &AppConfig, write: bool) -> Result<()> {
    let path = presets_path(config);
    if write {
        if path.exists() {
            anyhow::bail!("{} already exists, not overwriting", path.display());
        }
        ExtensionPresets::default().save(&path)?;
        println!("Wrote built-in presets to {}", path.display());
        return Ok(());
    }

    let presets = ExtensionPresets::load(&path)?;
    for preset in presets.iter() {
        let selected = config
            .extension_presets
            .iter()
            .any(|name| name.eq_ignore_ascii_case(&preset.name));
        let marker = if selected { "*".green() } else { " ".normal() };
        println!(
            "{} {}: {}",
            marker,
            preset.name.bold(),
            preset.extensions.join(" ")
        );
    }
    Ok(())
}

fn store_path(config: &AppConfig) -> PathBuf {
    config.dest_base_dir.join(&config.store_file_name)
}

fn open_existing_store(path: &Path) -> Result<Option<HashIndex>> {
    if !path.exists() {
        println!("No backup store at {}", path.display());
        return Ok(None);
    }
    Ok(Some(HashIndex::open(path)?))
}

fn show_records(config: &AppConfig, relative_path: Option<&str>, limit: u64) -> Result<()> {
    let Some(index) = open_existing_store(&store_path(config))? else {
        return Ok(());
    };

    let records = match relative_path {
        Some(path) => index.records_for_path(path)?,
        None => index.list_records(0, limit)?,
    };
    if records.is_empty() {
        println!("No records");
    }
    for record in records.iter().take(limit as usize) {
        print_record(record);
    }
    Ok(())
}

fn print_record(record: &BackupRecord) {
    println!(
        "{}  {}  {}  {} bytes  -> {}",
        record.archived_at.format("%Y-%m-%d %H:%M:%S"),
        record.content_hash.short(12).yellow(),
        record.relative_path.bold(),
        record.file_size,
        record.destination_path.display()
    );
}

fn show_status(config: &AppConfig) -> Result<()> {
    let interval = Duration::from_secs(config.check_interval_secs);
    match Heartbeat::read(&heartbeat_path(&config.dest_base_dir))? {
        Some(beat) if beat.is_fresh(Utc::now(), interval) => println!(
            "Monitor:        {} (pid {}, last scan {})",
            "running".green(),
            beat.pid,
            beat.last_scan.format("%Y-%m-%d %H:%M:%S")
        ),
        Some(beat) => println!(
            "Monitor:        {} (pid {}, last scan {})",
            "stalled".red(),
            beat.pid,
            beat.last_scan.format("%Y-%m-%d %H:%M:%S")
        ),
        None => println!("Monitor:        {}", "not running".yellow()),
    }

    let path = store_path(config);
    let Some(index) = open_existing_store(&path)? else {
        return Ok(());
    };

    let summary = index.summary()?;
    println!("Store:          {}", path.display());
    println!(
        "Records:        {}",
        format!("{}", summary.record_count).green()
    );
    println!("Distinct files: {}", summary.distinct_paths);
    println!("Bytes archived: {}", summary.total_bytes);
    match summary.latest {
        Some(record) => {
            print!("Latest:         ");
            print_record(&record);
        }
        None => println!("Latest:         none"),
    }
    Ok(())
}
