//! The sync pipeline: reference → fetch → analyze → publish.
//!
//! One call to [`run`] is one complete, sequential run. Only the search and
//! fetch stage can end a run early; every later failure is reported and the remaining
//! artifacts are still written.

use crate::analyzer::{aggregate, Aggregates, Summary};
use crate::document::{update_document, DocumentUpdate};
use crate::error::Result;
use crate::pubmed::PubMedClient;
use crate::reference::ReferenceTable;
use crate::snapshot::{append_log, save_journal_csv, Snapshot, UpdateLogEntry};
use chrono::Local;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

pub const DEFAULT_HTML_PATH: &str = "index.html";
pub const DEFAULT_REFERENCE_PATH: &str = "data/journal_impact_factors.json";
pub const DEFAULT_SNAPSHOT_PATH: &str = "publications_data.json";
pub const DEFAULT_LOG_PATH: &str = "publication_log.json";

/// Everything one run needs
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// PubMed boolean query, e.g. `kim js[Author] AND jeonbuk[Affiliation]`
    pub query: String,
    pub html_path: PathBuf,
    pub reference_path: PathBuf,
    pub snapshot_path: PathBuf,
    pub log_path: PathBuf,
    /// Optional journal table export
    pub csv_path: Option<PathBuf>,
    /// E-utilities base URL override
    pub eutils_url: Option<String>,
    pub api_key: Option<String>,
    pub email: Option<String>,
    /// Pause between efetch batches
    pub batch_interval: Duration,
    /// Compute everything but write nothing
    pub dry_run: bool,
}

impl SyncConfig {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            html_path: PathBuf::from(DEFAULT_HTML_PATH),
            reference_path: PathBuf::from(DEFAULT_REFERENCE_PATH),
            snapshot_path: PathBuf::from(DEFAULT_SNAPSHOT_PATH),
            log_path: PathBuf::from(DEFAULT_LOG_PATH),
            csv_path: None,
            eutils_url: None,
            api_key: None,
            email: None,
            batch_interval: Duration::from_millis(350),
            dry_run: false,
        }
    }
}

/// What a completed run produced
#[derive(Debug, Clone)]
pub struct RunReport {
    pub summary: Summary,
    pub aggregates: Aggregates,
    /// `None` when the document could not be read or written
    pub document: Option<DocumentUpdate>,
    pub snapshot_saved: bool,
    pub log_saved: bool,
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The search returned no identifiers, or none of them could be fetched
    /// and parsed; nothing was analyzed or written
    NoPublications,
    Completed(Box<RunReport>),
}

impl RunOutcome {
    /// True only if changed document text was written back to disk
    pub fn document_changed(&self) -> bool {
        match self {
            RunOutcome::NoPublications => false,
            RunOutcome::Completed(report) => {
                report.document.as_ref().map(|d| d.written).unwrap_or(false)
            }
        }
    }
}

/// Run the full pipeline once.
///
/// # Errors
///
/// Only fails if the HTTP client cannot be constructed. All stage failures
/// are logged and reflected in the returned [`RunOutcome`].
pub async fn run(config: &SyncConfig) -> Result<RunOutcome> {
    let started = Local::now();
    println!("=== PubMed Publication Update - {} ===", started.format("%Y-%m-%d %H:%M:%S"));

    // ===========================================
    // STAGE 1: Reference Table
    // ===========================================
    println!("\n--- Stage 1: Journal Reference Table ---");
    let table = ReferenceTable::load(&config.reference_path);
    if table.is_empty() {
        println!("No journal references loaded; impact factors will be 0.");
    } else {
        println!("Loaded {} journal references.", table.len());
    }

    // ===========================================
    // STAGE 2: PubMed Search & Fetch
    // ===========================================
    println!("\n--- Stage 2: PubMed Search ---");
    let client = PubMedClient::new(config.eutils_url.clone())?
        .with_api_key(config.api_key.clone())
        .with_email(config.email.clone())
        .with_batch_interval(config.batch_interval);

    let search = client.list_identifiers(&config.query).await;
    if search.ids.is_empty() {
        error!(query = %config.query, "No publications retrieved");
        println!("Failed to retrieve any publications, exiting.");
        return Ok(RunOutcome::NoPublications);
    }
    println!(
        "Found {} publications on PubMed (fetching {}).",
        search.total_count,
        search.ids.len()
    );

    let records = client.fetch_details(&search.ids).await;
    if records.is_empty() {
        error!(ids = search.ids.len(), "No publication details retrieved");
        println!("Failed to fetch details for any of {} publications, exiting.", search.ids.len());
        return Ok(RunOutcome::NoPublications);
    }
    println!("Parsed {} / {} records.", records.len(), search.ids.len());

    // ===========================================
    // STAGE 3: Analysis
    // ===========================================
    println!("\n--- Stage 3: Journal Analysis ---");
    let aggregates = aggregate(&records, &table);
    let summary = aggregates.summary(search.total_count, started);

    println!(
        "{} publications in {} journals, total IF {:.2}, average IF {:.2} ({} matched).",
        summary.total_publications,
        summary.journal_count,
        summary.total_if,
        summary.average_if,
        summary.matched_publications
    );

    let unmatched = aggregates.unmatched();
    if !unmatched.is_empty() {
        println!("Unmatched journals ({}):", unmatched.len());
        for journal in &unmatched {
            println!("  - {} ({})", journal.key, journal.count);
        }
    }

    // ===========================================
    // STAGE 4: Publish
    // ===========================================
    println!("\n--- Stage 4: Publish ---");
    if config.dry_run {
        println!("Dry run: no files will be written.");
    }

    let document = match update_document(&config.html_path, &summary, config.dry_run) {
        Ok(update) => {
            if update.changed {
                if config.dry_run {
                    println!("Dry run: document would change.");
                }
                let names: Vec<&str> = update.updated.iter().map(|s| s.name()).collect();
                println!("Updated document fields: {}", names.join(", "));
            } else {
                println!("No changes needed in document.");
            }
            Some(update)
        }
        Err(e) => {
            warn!(path = ?config.html_path, error = %e, "Document update failed");
            println!("Error updating document: {}", e);
            None
        }
    };

    let mut snapshot_saved = false;
    let mut log_saved = false;

    if !config.dry_run {
        let snapshot = Snapshot::build(&aggregates, &summary, &records);
        match snapshot.save(&config.snapshot_path) {
            Ok(()) => snapshot_saved = true,
            Err(e) => {
                warn!(path = ?config.snapshot_path, error = %e, "Snapshot save failed");
                println!("Error saving snapshot: {}", e);
            }
        }

        match append_log(&config.log_path, &UpdateLogEntry::from_summary(&summary)) {
            Ok(entries) => {
                log_saved = true;
                println!("Saved history log ({} entries).", entries);
            }
            Err(e) => {
                warn!(path = ?config.log_path, error = %e, "History log save failed");
                println!("Error saving history log: {}", e);
            }
        }

        if let Some(ref csv_path) = config.csv_path {
            if let Err(e) = save_journal_csv(csv_path, &aggregates) {
                warn!(path = ?csv_path, error = %e, "CSV export failed");
                println!("Error writing CSV: {}", e);
            }
        }
    }

    info!(
        total = summary.total_publications,
        total_if = summary.total_if,
        snapshot_saved,
        log_saved,
        "Run complete"
    );
    println!("\n=== Update complete ===");

    Ok(RunOutcome::Completed(Box::new(RunReport {
        summary,
        aggregates,
        document,
        snapshot_saved,
        log_saved,
    })))
}
