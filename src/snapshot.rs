//! Snapshot, history log and CSV persistence.
//!
//! The snapshot is overwritten every run. The history log is append-only and
//! keeps the most recent [`MAX_LOG_ENTRIES`] entries; entries written by older
//! versions of the tool are carried over verbatim.

use crate::analyzer::{round2, Aggregates, Summary};
use crate::error::Result;
use crate::pubmed::PublicationRecord;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::{debug, info};

/// History log cap
pub const MAX_LOG_ENTRIES: usize = 100;

/// Raw records kept in the snapshot
pub const MAX_RECENT_RECORDS: usize = 20;

/// Full structured snapshot of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub last_updated: String,
    pub total_publications: usize,
    pub total_if: f64,
    pub journals: Vec<JournalEntry>,
    pub by_year: Vec<YearEntry>,
    /// Most recent raw records, newest first
    pub publications: Vec<PublicationRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub name: String,
    pub count: usize,
    pub impact_factor: f64,
    pub quartile: Option<String>,
    pub years: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearEntry {
    pub year: String,
    pub count: usize,
    pub total_if: f64,
}

impl Snapshot {
    /// Build a snapshot from a run's aggregates.
    ///
    /// `records` are expected newest first, as returned by the search.
    pub fn build(aggregates: &Aggregates, summary: &Summary, records: &[PublicationRecord]) -> Self {
        let journals = aggregates
            .journals_by_impact()
            .into_iter()
            .map(|j| JournalEntry {
                name: j.key.clone(),
                count: j.count,
                impact_factor: j.impact_factor,
                quartile: j.quartile.clone(),
                years: j.years.iter().cloned().collect(),
            })
            .collect();

        let by_year = aggregates
            .years_desc()
            .into_iter()
            .map(|y| YearEntry {
                year: y.year.clone(),
                count: y.count,
                total_if: round2(y.total_impact_factor),
            })
            .collect();

        Self {
            last_updated: format_timestamp(summary),
            total_publications: summary.total_publications,
            total_if: round2(summary.total_if),
            journals,
            by_year,
            publications: records.iter().take(MAX_RECENT_RECORDS).cloned().collect(),
        }
    }

    /// Overwrite the snapshot file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!(
            path = ?path,
            journals = self.journals.len(),
            years = self.by_year.len(),
            "Saved snapshot"
        );
        Ok(())
    }
}

/// One history log line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateLogEntry {
    pub timestamp: String,
    pub total_count: usize,
    pub total_if: f64,
    pub journal_count: usize,
}

impl UpdateLogEntry {
    pub fn from_summary(summary: &Summary) -> Self {
        Self {
            timestamp: format_timestamp(summary),
            total_count: summary.search_count,
            total_if: round2(summary.total_if),
            journal_count: summary.journal_count,
        }
    }
}

/// History log file contents.
///
/// Entries are kept as raw JSON so older entry shapes survive a rewrite.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateLog {
    #[serde(default)]
    pub updates: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UpdateLog {
    /// Load the log, or start a fresh one if the file doesn't exist.
    ///
    /// An existing file that cannot be parsed is an error; it is never
    /// silently replaced.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("History log not found, starting fresh: {:?}", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Append an entry, dropping the oldest beyond [`MAX_LOG_ENTRIES`]
    pub fn push(&mut self, entry: &UpdateLogEntry) -> Result<()> {
        self.updates.push(serde_json::to_value(entry)?);
        if self.updates.len() > MAX_LOG_ENTRIES {
            let excess = self.updates.len() - MAX_LOG_ENTRIES;
            self.updates.drain(..excess);
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Append one entry to the history log at `path`, creating it if absent.
///
/// Returns the number of entries now in the log.
pub fn append_log(path: &Path, entry: &UpdateLogEntry) -> Result<usize> {
    let mut log = UpdateLog::load(path)?;
    log.push(entry)?;
    log.save(path)?;
    info!(path = ?path, entries = log.updates.len(), "Saved history log");
    Ok(log.updates.len())
}

#[derive(Debug, Serialize)]
struct JournalRow<'a> {
    journal: &'a str,
    count: usize,
    impact_factor: f64,
    quartile: &'a str,
    years: String,
}

/// Write the sorted journal table as CSV
pub fn save_journal_csv(path: &Path, aggregates: &Aggregates) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new().has_headers(true).from_path(path)?;

    for journal in aggregates.journals_by_impact() {
        wtr.serialize(JournalRow {
            journal: &journal.key,
            count: journal.count,
            impact_factor: journal.impact_factor,
            quartile: journal.quartile.as_deref().unwrap_or(""),
            years: journal.years.iter().cloned().collect::<Vec<_>>().join(";"),
        })?;
    }

    wtr.flush()?;
    info!(path = ?path, journals = aggregates.journals.len(), "Saved journal CSV");
    Ok(())
}

fn format_timestamp(summary: &Summary) -> String {
    summary.updated_at.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}
