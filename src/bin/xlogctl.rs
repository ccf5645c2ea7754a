//! `xlogctl` — offline admin/inspection tool for an `ashlar` data
//! directory.
//!
//! Modelled on `Jeanhwea-innobase_reader`'s `clap::{Parser, Subcommand}`
//! derive CLI over a log-structured on-disk format (`src/main.rs` +
//! `src/app.rs` there): a thin `Args`/`Commands` pair dispatching into
//! plain functions, `anyhow::Result` at the boundary converting this
//! crate's own `XlogError` via `?`. Unlike the teacher's own
//! `tokio`-based MySQL-wire-protocol `main.rs`, this binary has no
//! network surface to serve, so it runs to completion and exits.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use ashlar::applier::Applier;
use ashlar::cache::LogCache;
use ashlar::checkpointer::Checkpointer;
use ashlar::config::Config;
use ashlar::position::{LogId, LogOffset, LogPosition};
use ashlar::reader::SeqReader;
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about = "Admin tool for an ashlar transaction log directory", long_about = None)]
struct Args {
    /// Database directory (the one containing `pbxt/`).
    data_dir: PathBuf,

    /// Optional JSON config file overlaying the default `Config`
    /// (keys named after spec §6, e.g. `checkpoint_bytes`).
    #[arg(long = "config")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the recovery driver to completion and report the resulting
    /// append position. Does not reopen the log for writing.
    Recover,

    /// Force an immediate checkpoint at the current durable position.
    Checkpoint,

    /// Stream decoded records from one log file to stdout, one line
    /// per record.
    Dump {
        /// The log file id to dump, e.g. 1 for `xlog-00000001.xt`.
        #[arg(long = "log-id")]
        log_id: LogId,

        /// Byte offset to start from; defaults to just past the header.
        #[arg(long)]
        from: Option<LogOffset>,
    },

    /// Print the current checkpoint number, restart position, and the
    /// oldest retained log id.
    Status,

    /// Read and print exactly one record at a given position, through
    /// the LogCache.
    ReadAt {
        #[arg(long = "log-id")]
        log_id: LogId,
        #[arg(long)]
        offset: LogOffset,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = Config::load(&args.data_dir, args.config.as_deref()).context("failed to load config")?;

    match args.command {
        Commands::Recover => run_recover(&config),
        Commands::Checkpoint => run_checkpoint(&config),
        Commands::Dump { log_id, from } => run_dump(&config, log_id, from),
        Commands::Status => run_status(&config),
        Commands::ReadAt { log_id, offset } => run_read_at(&config, log_id, offset),
    }
}

fn run_recover(config: &Config) -> Result<()> {
    let applier = Applier::new();
    let state = ashlar::recovery::recover(config, &applier).context("recovery failed")?;
    println!("restart position:  {}", state.restart_position);
    println!("append position:   {}", state.append_position);
    println!("records applied:   {}", state.records_applied);
    println!("records skipped:   {}", state.records_skipped);
    println!("torn tail:         {}", state.truncated);
    Ok(())
}

fn run_checkpoint(config: &Config) -> Result<()> {
    let applier = Applier::new();
    let (engine, _recovered) = ashlar::Engine::open(config.clone(), applier).context("failed to open database")?;
    let checkpoint = engine.checkpoint_now().context("checkpoint failed")?;
    println!(
        "checkpoint {} written: restart {}",
        checkpoint.checkpoint_number,
        LogPosition::new(checkpoint.restart_log_id, checkpoint.restart_log_offset)
    );
    if !checkpoint.deletable_log_ids.is_empty() {
        println!("deletable logs: {:?}", checkpoint.deletable_log_ids);
    }
    Ok(())
}

fn run_dump(config: &Config, log_id: LogId, from: Option<LogOffset>) -> Result<()> {
    let start = from.unwrap_or(ashlar::header::HEADER_LEN as u64);
    let mut reader = SeqReader::start(config.clone(), LogPosition::new(log_id, start))
        .with_context(|| format!("failed to open log {}", log_id))?;

    let mut count = 0u64;
    loop {
        let position = reader.position();
        match reader.next() {
            Ok(Some(op)) => {
                println!("{}  {:?}", position, op);
                count += 1;
            }
            Ok(None) => break,
            Err(e) => {
                println!("{}  <error: {}>", position, e);
                break;
            }
        }
    }
    if reader.truncated() {
        println!("-- stream truncated at {} (torn or corrupt record)", reader.position());
    }
    println!("-- {} records dumped", count);
    Ok(())
}

fn run_status(config: &Config) -> Result<()> {
    match Checkpointer::load_latest(config) {
        Some(cp) => {
            println!("checkpoint number:     {}", cp.checkpoint_number);
            println!("restart position:      {}", LogPosition::new(cp.restart_log_id, cp.restart_log_offset));
            println!("index recovery position: {}", LogPosition::new(cp.ind_recovery_log_id, cp.ind_recovery_log_offset));
            println!("high water table id:   {}", cp.high_water_tab_id);
            println!("high water xact id:    {}", cp.high_water_xact_id);
            println!("deletable logs:        {:?}", cp.deletable_log_ids);
        }
        None => println!("no checkpoint file found; database has never been checkpointed"),
    }

    let mut log_ids: Vec<LogId> = Vec::new();
    if let Ok(entries) = std::fs::read_dir(config.xlog_dir()) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(rest) = name.strip_prefix("xlog-").and_then(|s| s.strip_suffix(".xt")) {
                if let Ok(id) = rest.parse::<LogId>() {
                    log_ids.push(id);
                }
            }
        }
    }
    log_ids.sort_unstable();
    match log_ids.first() {
        Some(oldest) => println!("oldest retained log:   {}", oldest),
        None => println!("oldest retained log:   (none)"),
    }
    Ok(())
}

fn run_read_at(config: &Config, log_id: LogId, offset: LogOffset) -> Result<()> {
    let cache = Arc::new(LogCache::new(config));
    let op = SeqReader::rnd_read(config.clone(), LogPosition::new(log_id, offset), cache)
        .with_context(|| format!("failed to read record at {}", LogPosition::new(log_id, offset)))?;
    println!("{:?}", op);
    Ok(())
}
