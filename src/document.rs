//! Homepage statistics as named slots.
//!
//! The page is never parsed as a whole. Each [`Slot`] knows the literal text
//! anchoring its value and how to render a new value from a [`Summary`].
//! Updating is two explicit steps: [`StatDocument::locate`] records where each
//! slot's current value sits, then [`StatDocument::render`] splices in the new
//! values. Bytes outside the located values are copied through unchanged.

use crate::analyzer::Summary;
use crate::error::{PubstatsError, Result};
use regex::Regex;
use std::ops::Range;
use std::path::Path;
use tracing::{debug, info};

/// A statistic field on the page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Slot {
    SciPublications,
    TotalImpactFactor,
    TotalPublications,
    AverageImpactFactor,
    DifferentJournals,
    TotalIfSum,
    /// "With over N SCI-indexed publications"
    OverviewSentence,
    /// "Last updated: <Month> <Year>"
    LastUpdated,
}

impl Slot {
    pub const ALL: [Slot; 8] = [
        Slot::SciPublications,
        Slot::TotalImpactFactor,
        Slot::TotalPublications,
        Slot::AverageImpactFactor,
        Slot::DifferentJournals,
        Slot::TotalIfSum,
        Slot::OverviewSentence,
        Slot::LastUpdated,
    ];

    /// Literal label text shown next to a stat card, if this slot is one
    pub fn label(self) -> Option<&'static str> {
        match self {
            Slot::SciPublications => Some("SCI Publications"),
            Slot::TotalImpactFactor => Some("Total Impact Factor"),
            Slot::TotalPublications => Some("Total Publications"),
            Slot::AverageImpactFactor => Some("Average Impact Factor"),
            Slot::DifferentJournals => Some("Different Journals"),
            Slot::TotalIfSum => Some("Total IF Sum"),
            Slot::OverviewSentence | Slot::LastUpdated => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Slot::OverviewSentence => "Overview sentence",
            Slot::LastUpdated => "Last updated",
            stat => stat.label().unwrap_or("stat"),
        }
    }

    /// Regex whose `value` group is the slot's current value
    fn pattern(self) -> String {
        match self.label() {
            Some(label) => format!(
                r#"<div class="stat-number"[^>]*>\s*(?P<value>[0-9][0-9.,]*\+?)\s*</div>\s*<div class="stat-label"[^>]*>\s*{}\b"#,
                regex::escape(label)
            ),
            None => match self {
                Slot::OverviewSentence => {
                    r"With over (?P<value>[0-9]+) SCI-indexed publications".to_string()
                }
                _ => r"Last updated: (?P<value>[A-Z][a-z]+ [0-9]{4})".to_string(),
            },
        }
    }

    /// New value for this slot
    pub fn render(self, summary: &Summary) -> String {
        match self {
            Slot::SciPublications => format!("{}+", summary.rounded_count()),
            Slot::TotalImpactFactor => format!("{:.1}", summary.total_if),
            Slot::TotalPublications => summary.total_publications.to_string(),
            Slot::AverageImpactFactor => format!("{:.2}", summary.average_if),
            Slot::DifferentJournals => summary.journal_count.to_string(),
            Slot::TotalIfSum => format!("{:.2}", summary.total_if),
            Slot::OverviewSentence => summary.rounded_count().to_string(),
            Slot::LastUpdated => summary.updated_at.format("%B %Y").to_string(),
        }
    }
}

/// Where one occurrence of a slot's value sits in the page
#[derive(Debug, Clone, PartialEq)]
struct SlotSpan {
    slot: Slot,
    range: Range<usize>,
}

/// A page with its located slots
#[derive(Debug, Clone)]
pub struct StatDocument {
    content: String,
    spans: Vec<SlotSpan>,
}

/// Outcome of rendering a summary into a page
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentUpdate {
    pub content: String,
    /// True only if the rendered text differs from the input
    pub changed: bool,
    /// True only if the rendered text was written back to disk
    pub written: bool,
    /// Slots whose value changed, in page order
    pub updated: Vec<Slot>,
    /// Slots not present in the page
    pub missing: Vec<Slot>,
}

impl StatDocument {
    /// Find every occurrence of every slot in `content`
    pub fn locate(content: String) -> Result<Self> {
        let mut spans = Vec::new();

        for slot in Slot::ALL {
            let re = Regex::new(&slot.pattern())
                .map_err(|e| PubstatsError::Parse(format!("{} pattern: {}", slot.name(), e)))?;

            for caps in re.captures_iter(&content) {
                if let Some(value) = caps.name("value") {
                    spans.push(SlotSpan {
                        slot,
                        range: value.range(),
                    });
                }
            }
        }

        spans.sort_by_key(|s| s.range.start);
        Ok(Self { content, spans })
    }

    /// Current value of each located slot occurrence, in page order
    pub fn values(&self) -> Vec<(Slot, &str)> {
        self.spans
            .iter()
            .map(|s| (s.slot, &self.content[s.range.clone()]))
            .collect()
    }

    pub fn contains(&self, slot: Slot) -> bool {
        self.spans.iter().any(|s| s.slot == slot)
    }

    /// Splice rendered values into the page
    pub fn render(&self, summary: &Summary) -> DocumentUpdate {
        let mut content = String::with_capacity(self.content.len());
        let mut updated = Vec::new();
        let mut cursor = 0;

        for span in &self.spans {
            if span.range.start < cursor {
                continue;
            }
            let current = &self.content[span.range.clone()];
            let rendered = span.slot.render(summary);

            content.push_str(&self.content[cursor..span.range.start]);
            content.push_str(&rendered);
            cursor = span.range.end;

            if current != rendered {
                debug!(slot = span.slot.name(), from = current, to = %rendered, "Slot updated");
                updated.push(span.slot);
            }
        }
        content.push_str(&self.content[cursor..]);

        let missing = Slot::ALL
            .iter()
            .copied()
            .filter(|slot| !self.contains(*slot))
            .collect();

        DocumentUpdate {
            changed: content != self.content,
            written: false,
            content,
            updated,
            missing,
        }
    }
}

/// Render `summary` into the page at `path`, writing it back only if it changed.
pub fn update_document(path: &Path, summary: &Summary, dry_run: bool) -> Result<DocumentUpdate> {
    let content = std::fs::read_to_string(path)?;
    let document = StatDocument::locate(content)?;
    let mut update = document.render(summary);

    for slot in &update.missing {
        debug!(slot = slot.name(), "Slot not found in document");
    }

    if update.changed && !dry_run {
        std::fs::write(path, &update.content)?;
        update.written = true;
        info!(path = ?path, slots = update.updated.len(), "Document updated");
    }

    Ok(update)
}
