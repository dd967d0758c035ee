//! zendesk-export-rs: export the Zendesk tickets of a list of clients to PDF.
//!
//! For every client code in a CSV list the exporter logs into the Zendesk
//! agent interface through a Chrome browser driven over WebDriver, walks the
//! client's ticket listing and prints each ticket to
//! `<output>/assessor_<code>/ticket_<id>.pdf`. Progress is checkpointed so an
//! interrupted run resumes where it stopped, and a dead browser session is
//! replaced without losing the run.

#![warn(clippy::all)]

mod cli;
mod codes;
mod config;
mod credentials;
mod discovery;
mod export;
mod orchestrator;
mod records;
mod remote;
pub mod retry;
mod shutdown;
mod state;
mod types;
mod wait;

use std::path::Path;

use anyhow::Context;
use clap::Parser;
use fs4::fs_std::FileExt;
use tracing_subscriber::EnvFilter;

use cli::{Command, ExportArgs};
use config::Config;
use orchestrator::{Orchestrator, RunOutcome, RunStats};
use records::ResultSink;
use remote::ZendeskSessionFactory;
use state::CheckpointStore;

const LOCK_FILE: &str = ".lock";

/// Hold an exclusive advisory lock on the output directory for the run.
async fn acquire_lock(output_dir: &Path) -> anyhow::Result<std::fs::File> {
    let lock_path = output_dir.join(LOCK_FILE);
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::create(&lock_path)
            .with_context(|| format!("Failed to create lock file: {}", lock_path.display()))?;
        file.try_lock_exclusive().map_err(|_| {
            anyhow::anyhow!(
                "Another zendesk-export-rs instance is writing to this output directory (lock: {})",
                lock_path.display()
            )
        })?;
        Ok::<std::fs::File, anyhow::Error>(file)
    })
    .await?
}

fn log_stats(stats: &RunStats) {
    tracing::info!(
        exported = stats.exported,
        reused = stats.reused,
        failed_tickets = stats.failed_tickets,
        failed_codes = stats.failed_codes,
        skipped_codes = stats.skipped_codes,
        session_recoveries = stats.session_recoveries,
        "Run statistics"
    );
}

/// Run the export command.
async fn run_export(config: &Config, args: ExportArgs) -> anyhow::Result<()> {
    let output_dir = config.output_dir();
    tokio::fs::create_dir_all(&output_dir)
        .await
        .with_context(|| format!("Failed to create output directory {}", output_dir.display()))?;
    let _lock = acquire_lock(&output_dir).await?;

    let codes_file = config.codes_file();
    let codes = codes::load_codes(&codes_file)?;
    if codes.is_empty() {
        tracing::warn!("No codes found in {}, nothing to do", codes_file.display());
        return Ok(());
    }
    tracing::info!("Loaded {} codes from {}", codes.len(), codes_file.display());

    let credentials =
        tokio::task::block_in_place(|| credentials::resolve(config.email(), config.password()))?;

    let store = CheckpointStore::in_dir(&output_dir);
    let state = store
        .load(args.reset_checkpoint || config.runtime.reset_checkpoint)
        .await?;
    tracing::info!(
        done_codes = state.done_count(),
        processed_tickets = state.processed_count(),
        "Checkpoint loaded"
    );

    let export_config = config.export_config()?;
    let factory = ZendeskSessionFactory::new(
        config.browser_config(args.headless),
        export_config.endpoints.clone(),
        export_config.nav_retry,
    );
    let shutdown = shutdown::install_signal_handler()?;
    let orchestrator = Orchestrator::new(
        &factory,
        &credentials,
        store,
        state,
        ResultSink::new(&output_dir),
        config.discovery_limits(),
        export_config,
        config.run_config(args.no_progress_bar),
        shutdown,
    );

    match orchestrator.run(&codes).await? {
        RunOutcome::Completed { summary, stats } => {
            log_stats(&stats);
            tracing::info!(
                "Export complete: {} codes, {} tickets discovered",
                summary.total_assessors,
                summary.total_expected_tickets
            );
        }
        RunOutcome::Interrupted { stats } => {
            log_stats(&stats);
            tracing::info!("Export interrupted; run again to resume from the checkpoint");
        }
    }
    Ok(())
}

/// Run the status command.
async fn run_status(config: &Config, failed: bool) -> anyhow::Result<()> {
    let output_dir = config.output_dir();
    let store = CheckpointStore::in_dir(&output_dir);
    let sink = ResultSink::new(&output_dir);

    if !store.path().exists() {
        println!("No checkpoint found at {}", store.path().display());
        println!("Run an export first to create it.");
    } else {
        let state = store.load(false).await?;
        println!("Checkpoint: {}", store.path().display());
        println!();
        println!("Progress:");
        println!("  Codes done:        {}", state.done_count());
        println!("  Tickets processed: {}", state.processed_count());
    }

    let successes = sink.successes()?;
    let failures = sink.failures()?;
    let inventory = sink.inventory()?;
    println!();
    println!("Records:");
    println!("  Exported:  {}", successes.len());
    println!("  Failed:    {}", failures.len());
    println!("  Inventory: {}", inventory.len());

    if let Some(summary) = sink.read_summary()? {
        println!();
        println!(
            "Last full pass: {} ({} codes, {} tickets)",
            summary.generated_at, summary.total_assessors, summary.total_expected_tickets
        );
    }

    if failed && !failures.is_empty() {
        println!();
        println!("Failures:");
        for failure in &failures {
            if failure.ticket_id == records::WHOLE_CODE {
                println!("  {} (whole code) - {}", failure.assessor, failure.error);
            } else {
                println!("  {} ticket {} - {}", failure.assessor, failure.ticket_id, failure.error);
            }
        }
    }

    Ok(())
}

/// Run the reset-state command.
async fn run_reset_state(config: &Config, yes: bool) -> anyhow::Result<()> {
    let store = CheckpointStore::in_dir(&config.output_dir());

    if !store.path().exists() {
        println!("No checkpoint found at {}", store.path().display());
        return Ok(());
    }

    if !yes {
        println!("This will delete the checkpoint at:");
        println!("  {}", store.path().display());
        println!("Exported PDFs and result records are kept.");
        println!();
        print!("Are you sure? [y/N] ");
        use std::io::Write;
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    store
        .remove()
        .await
        .with_context(|| format!("Failed to delete {}", store.path().display()))?;
    println!("Checkpoint deleted.");
    Ok(())
}

/// Run the verify command. Exits with status 1 if anything is missing.
async fn run_verify(config: &Config) -> anyhow::Result<()> {
    let sink = ResultSink::new(&config.output_dir());
    let successes = sink.successes()?;

    println!("Verifying {} exported tickets...", successes.len());
    println!();

    let mut missing = 0;
    let mut corrupted = 0;
    let mut verified = 0;

    for record in &successes {
        let path = Path::new(&record.file_path);
        if !path.exists() {
            println!("MISSING: {} ({} ticket {})", path.display(), record.assessor, record.ticket_id);
            missing += 1;
            continue;
        }
        match export::valid_pdf_size(path).await {
            Some(_) => verified += 1,
            None => {
                println!("CORRUPTED: {} ({} ticket {})", path.display(), record.assessor, record.ticket_id);
                corrupted += 1;
            }
        }
    }

    println!();
    println!("Results:");
    println!("  Verified:  {}", verified);
    println!("  Missing:   {}", missing);
    println!("  Corrupted: {}", corrupted);

    if missing > 0 || corrupted > 0 {
        std::process::exit(1);
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    let config = Config::load(cli.config_path()?)?;

    let filter = cli.log_level.unwrap_or(config.logging.level).as_filter();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();
    tracing::debug!(?config, "Configuration loaded");

    match cli.effective_command() {
        Command::Export(args) => run_export(&config, args).await,
        Command::Status { failed } => run_status(&config, failed).await,
        Command::ResetState { yes } => run_reset_state(&config, yes).await,
        Command::Verify => run_verify(&config).await,
    }
}
