//! rustpubstats - PubMed publication statistics sync
//!
//! Fetches a researcher's publications from PubMed, matches journals against a
//! curated impact-factor table, and rewrites the homepage statistics.
//!
//! ## Usage
//!
//! ```bash
//! rustpubstats sync --query "kim js[Author] AND jeonbuk[Affiliation]" --html index.html
//! rustpubstats match "J. Am. Chem. Soc." --reference data/journal_impact_factors.json
//! ```
//!
//! `sync` exits 0 only when the document was changed and written back.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rustpubstats::analyzer::{match_journal, normalize};
use rustpubstats::pipeline::{
    self, SyncConfig, DEFAULT_HTML_PATH, DEFAULT_LOG_PATH, DEFAULT_REFERENCE_PATH,
    DEFAULT_SNAPSHOT_PATH,
};
use rustpubstats::reference::ReferenceTable;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// PubMed publication statistics sync for a static homepage
#[derive(Parser)]
#[command(name = "rustpubstats")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch publications and update the homepage, snapshot and history log
    Sync {
        /// PubMed query (e.g. "kim js[Author] AND jeonbuk[Affiliation]")
        #[arg(short, long, env = "PUBSTATS_QUERY")]
        query: String,

        /// Homepage HTML file to update
        #[arg(long, default_value = DEFAULT_HTML_PATH, env = "PUBSTATS_HTML")]
        html: PathBuf,

        /// Journal impact-factor table (JSON)
        #[arg(long, default_value = DEFAULT_REFERENCE_PATH, env = "PUBSTATS_REFERENCE")]
        reference: PathBuf,

        /// Snapshot output (JSON, overwritten)
        #[arg(long, default_value = DEFAULT_SNAPSHOT_PATH)]
        snapshot: PathBuf,

        /// History log (JSON, appended)
        #[arg(long, default_value = DEFAULT_LOG_PATH)]
        log: PathBuf,

        /// Also export the journal table as CSV
        #[arg(long)]
        csv: Option<PathBuf>,

        /// NCBI API key (raises the rate limit)
        #[arg(long, env = "NCBI_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        /// Contact e-mail sent to NCBI
        #[arg(long, env = "NCBI_EMAIL")]
        email: Option<String>,

        /// E-utilities base URL (for mirrors)
        #[arg(long)]
        eutils_url: Option<String>,

        /// Pause between efetch batches, in milliseconds
        #[arg(long, default_value = "350")]
        batch_interval_ms: u64,

        /// Compute and report, but write nothing
        #[arg(long)]
        dry_run: bool,
    },

    /// Look up a journal name in the impact-factor table
    Match {
        /// Journal abbreviation or full title
        name: String,

        /// Journal impact-factor table (JSON)
        #[arg(long, default_value = DEFAULT_REFERENCE_PATH, env = "PUBSTATS_REFERENCE")]
        reference: PathBuf,
    },
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .init();

    match cli.command {
        Commands::Sync {
            query,
            html,
            reference,
            snapshot,
            log,
            csv,
            api_key,
            email,
            eutils_url,
            batch_interval_ms,
            dry_run,
        } => {
            let config = SyncConfig {
                query,
                html_path: html,
                reference_path: reference,
                snapshot_path: snapshot,
                log_path: log,
                csv_path: csv,
                eutils_url,
                api_key,
                email,
                batch_interval: Duration::from_millis(batch_interval_ms),
                dry_run,
            };
            run_sync(&config).await
        }
        Commands::Match { name, reference } => {
            handle_match(&name, &reference);
            Ok(ExitCode::SUCCESS)
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

async fn run_sync(config: &SyncConfig) -> Result<ExitCode> {
    if config.query.trim().is_empty() {
        anyhow::bail!("--query must not be empty");
    }

    let outcome = pipeline::run(config)
        .await
        .context("Failed to start sync run")?;

    if outcome.document_changed() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn handle_match(name: &str, reference: &std::path::Path) {
    let table = ReferenceTable::load(reference);

    // The same string is tried as abbreviation and as full title
    match match_journal(name, name, &table) {
        Some(m) => {
            println!("Matched: {}", m.key);
            println!("  Impact factor: {}", m.reference.impact_factor);
            println!("  Quartile: {}", m.reference.quartile.as_deref().unwrap_or("-"));
            if let Some(ref full_name) = m.reference.full_name {
                println!("  Full name: {}", full_name);
            }
        }
        None => {
            println!("No match for {:?} (normalized: {:?})", name, normalize(name));
            println!("Searched {} entries in {:?}", table.len(), reference);
        }
    }
}
