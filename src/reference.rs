//! Curated journal impact-factor table.
//!
//! The table is a hand-maintained JSON side file. Loading never fails: a
//! missing or malformed file yields an empty table, which simply means no
//! journal gets an impact factor this run.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Impact-factor metadata for one journal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct JournalReference {
    /// Journal impact factor
    pub impact_factor: f64,
    /// JCR quartile (Q1, Q2, ...)
    pub quartile: Option<String>,
    /// Full journal name, used by the normalized fallback match
    pub full_name: Option<String>,
}

/// Journal key (abbreviation or name) -> metadata, in sorted key order
#[derive(Debug, Clone, Default)]
pub struct ReferenceTable {
    entries: BTreeMap<String, JournalReference>,
}

impl ReferenceTable {
    /// Load the table from a JSON file.
    ///
    /// Returns an empty table if the file doesn't exist or is invalid.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            warn!("Reference file not found: {:?}", path);
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match Self::from_json(&content) {
                Ok(table) => {
                    info!("Loaded {} journal references from {:?}", table.len(), path);
                    table
                }
                Err(e) => {
                    warn!("Failed to parse reference file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Failed to read reference file: {}", e);
                Self::default()
            }
        }
    }

    /// Parse the table from JSON text.
    ///
    /// The keyed collection is either the top-level object or a nested
    /// `journals` object. Entries without a usable impact factor are skipped.
    pub fn from_json(content: &str) -> serde_json::Result<Self> {
        let mut root: Value = serde_json::from_str(content)?;

        let collection = match root.get_mut("journals").map(Value::take) {
            Some(Value::Object(map)) => map,
            _ => match root {
                Value::Object(map) => map,
                _ => {
                    warn!("Reference file is not a JSON object");
                    return Ok(Self::default());
                }
            },
        };

        let mut entries = BTreeMap::new();
        for (key, raw) in collection {
            match parse_entry(&raw) {
                Some(entry) => {
                    entries.insert(key, entry);
                }
                None => debug!(journal = %key, "Skipping reference entry without impact factor"),
            }
        }

        Ok(Self { entries })
    }

    /// Build a table from in-memory entries
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, JournalReference)>,
    {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Exact key lookup
    pub fn get(&self, key: &str) -> Option<&JournalReference> {
        self.entries.get(key)
    }

    /// Exact key lookup returning the stored key as well
    pub fn get_key_value(&self, key: &str) -> Option<(&String, &JournalReference)> {
        self.entries.get_key_value(key)
    }

    /// Iterate entries in table order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &JournalReference)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parse a single entry, accepting `impact_factor` or `if`, numeric or string
fn parse_entry(raw: &Value) -> Option<JournalReference> {
    let obj = raw.as_object()?;

    let impact_factor = obj
        .get("impact_factor")
        .or_else(|| obj.get("if"))
        .and_then(value_to_f64)?;

    let quartile = obj
        .get("quartile")
        .and_then(value_to_string)
        .filter(|q| !q.is_empty());

    let full_name = obj
        .get("full_name")
        .or_else(|| obj.get("name"))
        .and_then(value_to_string)
        .filter(|n| !n.is_empty());

    Some(JournalReference {
        impact_factor,
        quartile,
        full_name,
    })
}

fn value_to_f64(val: &Value) -> Option<f64> {
    match val {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn value_to_string(val: &Value) -> Option<String> {
    match val {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
