//! Journal matching and publication aggregation.
//!
//! Every record is folded into exactly one journal bucket. The run's total
//! impact factor is computed once, in [`Aggregates::total_impact_factor`], and
//! carried to every output through [`Summary`].

use crate::pubmed::PublicationRecord;
use crate::reference::{JournalReference, ReferenceTable};
use chrono::{DateTime, Local};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Bucket key for records with neither an abbreviation nor a journal title
pub const UNKNOWN_JOURNAL: &str = "Unknown";

/// A successful reference lookup
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JournalMatch<'a> {
    /// Reference table key that matched
    pub key: &'a str,
    pub reference: &'a JournalReference,
}

/// Per-journal aggregate
#[derive(Debug, Clone, PartialEq)]
pub struct JournalAggregate {
    pub key: String,
    pub count: usize,
    /// 0 when unmatched
    pub impact_factor: f64,
    pub quartile: Option<String>,
    pub years: BTreeSet<String>,
    pub matched: bool,
}

impl JournalAggregate {
    fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            count: 0,
            impact_factor: 0.0,
            quartile: None,
            years: BTreeSet::new(),
            matched: false,
        }
    }

    /// Impact factor contributed by all publications in this journal
    pub fn total_impact_factor(&self) -> f64 {
        self.impact_factor * self.count as f64
    }
}

/// Per-year aggregate
#[derive(Debug, Clone, PartialEq)]
pub struct YearAggregate {
    pub year: String,
    pub count: usize,
    pub total_impact_factor: f64,
}

/// Result of folding a run's records
#[derive(Debug, Clone, Default)]
pub struct Aggregates {
    pub journals: BTreeMap<String, JournalAggregate>,
    pub years: BTreeMap<String, YearAggregate>,
    pub publications: usize,
}

/// Derived statistics shared by the document, the snapshot and the log
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    /// Total hit count reported by the search
    pub search_count: usize,
    /// Records actually analyzed
    pub total_publications: usize,
    /// Records whose journal has a reference entry
    pub matched_publications: usize,
    pub journal_count: usize,
    pub total_if: f64,
    /// `total_if` over matched publications, 0 when nothing matched
    pub average_if: f64,
    pub updated_at: DateTime<Local>,
}

impl Summary {
    /// Search count floored to a multiple of ten, as shown on the page ("120+")
    pub fn rounded_count(&self) -> usize {
        floor_to_ten(self.search_count)
    }
}

/// Lowercase, strip punctuation, collapse whitespace.
pub fn normalize(text: &str) -> String {
    text.chars()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Find the reference entry for a journal.
///
/// Tries the abbreviation as a literal key first, then compares the normalized
/// abbreviation and full title against every normalized key and stored full
/// name. The first entry in table order wins.
pub fn match_journal<'a>(
    abbreviation: &str,
    full_title: &str,
    table: &'a ReferenceTable,
) -> Option<JournalMatch<'a>> {
    if !abbreviation.is_empty() {
        if let Some((key, reference)) = table.get_key_value(abbreviation) {
            return Some(JournalMatch { key, reference });
        }
    }

    let candidates: Vec<String> = [abbreviation, full_title]
        .iter()
        .map(|s| normalize(s))
        .filter(|s| !s.is_empty())
        .collect();

    if candidates.is_empty() {
        return None;
    }

    table
        .iter()
        .find(|(key, reference)| {
            let key_norm = normalize(key);
            if candidates.contains(&key_norm) {
                return true;
            }
            reference
                .full_name
                .as_deref()
                .map(|name| candidates.contains(&normalize(name)))
                .unwrap_or(false)
        })
        .map(|(key, reference)| JournalMatch { key, reference })
}

/// Fold records into journal and year buckets.
///
/// When several records of the same journal match, the last match sets the
/// bucket's impact factor and quartile. Year totals use each bucket's final
/// impact factor.
pub fn aggregate(records: &[PublicationRecord], table: &ReferenceTable) -> Aggregates {
    let mut journals: BTreeMap<String, JournalAggregate> = BTreeMap::new();

    for record in records {
        let key = bucket_key(record);
        let bucket = journals
            .entry(key.to_string())
            .or_insert_with(|| JournalAggregate::new(key));

        bucket.count += 1;
        if !record.year.is_empty() {
            bucket.years.insert(record.year.clone());
        }

        if let Some(m) = match_journal(&record.journal_abbrev, &record.journal, table) {
            if bucket.matched && bucket.impact_factor != m.reference.impact_factor {
                debug!(
                    journal = key,
                    previous = bucket.impact_factor,
                    current = m.reference.impact_factor,
                    "Conflicting reference matches for one journal, keeping last"
                );
            }
            bucket.impact_factor = m.reference.impact_factor;
            bucket.quartile = m.reference.quartile.clone();
            bucket.matched = true;
        }
    }

    let mut years: BTreeMap<String, YearAggregate> = BTreeMap::new();
    for record in records.iter().filter(|r| !r.year.is_empty()) {
        let impact_factor = journals
            .get(bucket_key(record))
            .map(|j| j.impact_factor)
            .unwrap_or(0.0);

        let entry = years
            .entry(record.year.clone())
            .or_insert_with(|| YearAggregate {
                year: record.year.clone(),
                count: 0,
                total_impact_factor: 0.0,
            });
        entry.count += 1;
        entry.total_impact_factor += impact_factor;
    }

    Aggregates {
        journals,
        years,
        publications: records.len(),
    }
}

fn bucket_key(record: &PublicationRecord) -> &str {
    match record.journal_key() {
        "" => UNKNOWN_JOURNAL,
        key => key,
    }
}

impl Aggregates {
    /// Σ impact_factor × count over all journals
    pub fn total_impact_factor(&self) -> f64 {
        self.journals
            .values()
            .map(JournalAggregate::total_impact_factor)
            .sum()
    }

    /// Number of publications in matched journals
    pub fn matched_publications(&self) -> usize {
        self.journals
            .values()
            .filter(|j| j.matched)
            .map(|j| j.count)
            .sum()
    }

    /// Journals sorted by impact factor, then count, both descending
    pub fn journals_by_impact(&self) -> Vec<&JournalAggregate> {
        let mut sorted: Vec<&JournalAggregate> = self.journals.values().collect();
        sorted.sort_by(|a, b| {
            b.impact_factor
                .total_cmp(&a.impact_factor)
                .then_with(|| b.count.cmp(&a.count))
                .then_with(|| a.key.cmp(&b.key))
        });
        sorted
    }

    /// Years, most recent first
    pub fn years_desc(&self) -> Vec<&YearAggregate> {
        self.years.values().rev().collect()
    }

    /// Journals without a reference entry, most frequent first
    pub fn unmatched(&self) -> Vec<&JournalAggregate> {
        let mut unmatched: Vec<&JournalAggregate> =
            self.journals.values().filter(|j| !j.matched).collect();
        unmatched.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
        unmatched
    }

    pub fn summary(&self, search_count: usize, updated_at: DateTime<Local>) -> Summary {
        let total_if = self.total_impact_factor();
        let matched_publications = self.matched_publications();
        let average_if = if matched_publications > 0 {
            total_if / matched_publications as f64
        } else {
            0.0
        };

        Summary {
            search_count,
            total_publications: self.publications,
            matched_publications,
            journal_count: self.journals.len(),
            total_if,
            average_if,
            updated_at,
        }
    }
}

/// Integer floor to the nearest ten
pub fn floor_to_ten(n: usize) -> usize {
    (n / 10) * 10
}

/// Round to two decimals for persisted output
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pmid: &str, abbrev: &str, journal: &str, year: &str) -> PublicationRecord {
        PublicationRecord {
            pmid: pmid.to_string(),
            title: format!("Article {}", pmid),
            journal: journal.to_string(),
            journal_abbrev: abbrev.to_string(),
            year: year.to_string(),
        }
    }

    fn reference(impact_factor: f64, quartile: &str, full_name: Option<&str>) -> JournalReference {
        JournalReference {
            impact_factor,
            quartile: Some(quartile.to_string()),
            full_name: full_name.map(str::to_string),
        }
    }

    fn sample_table() -> ReferenceTable {
        ReferenceTable::from_entries(vec![
            ("J Med".to_string(), reference(3.5, "Q1", None)),
            (
                "Chem Soc Rev".to_string(),
                reference(40.4, "Q1", Some("Chemical Society Reviews")),
            ),
            (
                "J. Am. Chem. Soc.".to_string(),
                reference(14.4, "Q1", Some("Journal of the American Chemical Society")),
            ),
        ])
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("J. Am. Chem. Soc."), "j am chem soc");
        assert_eq!(normalize("  Angew  Chem\tInt Ed Engl "), "angew chem int ed engl");
        assert_eq!(normalize("Nature (London)"), "nature london");
        assert_eq!(normalize("..."), "");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for input in [
            "J. Am. Chem. Soc.",
            "Chem-Soc Rev!",
            "  Ünïcode  Jöurnal ",
            "İstanbul Med J",
            "",
        ] {
            let once = normalize(input);
            assert_eq!(normalize(&once), once);
        }
    }

    #[test]
    fn test_normalize_multi_char_lowercase() {
        // 'İ' lowercases to 'i' plus a combining dot, which is not kept
        assert_eq!(normalize("İstanbul Med J"), "istanbul med j");
        assert_eq!(normalize("İstanbul Med J"), normalize("Istanbul Med. J."));
    }

    #[test]
    fn test_full_name_match_with_multi_char_lowercase() {
        let table = ReferenceTable::from_entries(vec![(
            "Istanbul Med J".to_string(),
            reference(1.2, "Q4", Some("İstanbul Medical Journal")),
        )]);
        let m = match_journal("", "Istanbul Medical Journal", &table).expect("match");
        assert_eq!(m.key, "Istanbul Med J");
    }

    #[test]
    fn test_exact_match() {
        let table = sample_table();
        let m = match_journal("J Med", "Journal of Medicine", &table).expect("match");
        assert_eq!(m.key, "J Med");
        assert_eq!(m.reference.impact_factor, 3.5);
    }

    #[test]
    fn test_normalized_key_match() {
        let table = sample_table();
        let m = match_journal("J Am Chem Soc", "", &table).expect("match");
        assert_eq!(m.key, "J. Am. Chem. Soc.");
    }

    #[test]
    fn test_full_name_match() {
        let table = sample_table();
        let m = match_journal("", "Chemical society reviews.", &table).expect("match");
        assert_eq!(m.key, "Chem Soc Rev");
    }

    #[test]
    fn test_no_match() {
        let table = sample_table();
        assert!(match_journal("Unknown J", "Unknown Journal", &table).is_none());
        assert!(match_journal("", "", &table).is_none());
        assert!(match_journal("J Med", "", &ReferenceTable::default()).is_none());
    }

    #[test]
    fn test_match_is_deterministic() {
        let table = sample_table();
        let first = match_journal("J Am Chem Soc", "Journal of the American Chemical Society", &table);
        for _ in 0..10 {
            let again =
                match_journal("J Am Chem Soc", "Journal of the American Chemical Society", &table);
            assert_eq!(first, again);
        }
    }

    #[test]
    fn test_two_records_same_journal() {
        let table = ReferenceTable::from_json(r#"{"J Med": {"if": 3.5, "quartile": "Q1"}}"#)
            .expect("valid json");
        let records = vec![
            record("1", "J Med", "Journal of Medicine", "2023"),
            record("2", "J Med", "Journal of Medicine", "2024"),
        ];

        let agg = aggregate(&records, &table);

        assert_eq!(agg.journals.len(), 1);
        let journal = &agg.journals["J Med"];
        assert_eq!(journal.count, 2);
        assert_eq!(journal.impact_factor, 3.5);
        assert_eq!(journal.quartile.as_deref(), Some("Q1"));
        let years: Vec<&str> = journal.years.iter().map(String::as_str).collect();
        assert_eq!(years, vec!["2023", "2024"]);
        assert_eq!(agg.total_impact_factor(), 7.0);
    }

    #[test]
    fn test_unmatched_bucket_uses_title() {
        let table = sample_table();
        let records = vec![record("1", "", "Unknown Journal", "2022")];

        let agg = aggregate(&records, &table);

        let journal = &agg.journals["Unknown Journal"];
        assert_eq!(journal.count, 1);
        assert_eq!(journal.impact_factor, 0.0);
        assert!(!journal.matched);
        let unmatched: Vec<&str> = agg.unmatched().iter().map(|j| j.key.as_str()).collect();
        assert_eq!(unmatched, vec!["Unknown Journal"]);
    }

    #[test]
    fn test_records_without_journal_share_one_bucket() {
        let records = vec![record("1", "", "", ""), record("2", " ", "", "2020")];
        let agg = aggregate(&records, &ReferenceTable::default());
        assert_eq!(agg.journals.len(), 1);
        assert_eq!(agg.journals[UNKNOWN_JOURNAL].count, 2);
    }

    #[test]
    fn test_total_invariant_and_year_totals() {
        let table = sample_table();
        let records = vec![
            record("1", "J Med", "Journal of Medicine", "2023"),
            record("2", "Chem Soc Rev", "Chemical Society Reviews", "2023"),
            record("3", "Chem Soc Rev", "Chemical Society Reviews", "2024"),
            record("4", "J Am Chem Soc", "Journal of the American Chemical Society", "2024"),
            record("5", "", "Unknown Journal", "2021"),
            record("6", "J Med", "Journal of Medicine", ""),
        ];

        let agg = aggregate(&records, &table);

        let expected: f64 = agg
            .journals
            .values()
            .map(|j| j.impact_factor * j.count as f64)
            .sum();
        assert_eq!(agg.total_impact_factor(), expected);
        assert!((agg.total_impact_factor() - (3.5 * 2.0 + 40.4 * 2.0 + 14.4)).abs() < 1e-9);

        // Undated record (pmid 6) is excluded from year buckets only
        let year_sum: f64 = agg.years.values().map(|y| y.total_impact_factor).sum();
        assert!((year_sum - (agg.total_impact_factor() - 3.5)).abs() < 1e-9);
        let year_count: usize = agg.years.values().map(|y| y.count).sum();
        assert_eq!(year_count, 5);
        assert_eq!(agg.publications, 6);
    }

    #[test]
    fn test_sorting() {
        let table = sample_table();
        let records = vec![
            record("1", "J Med", "", "2021"),
            record("2", "Chem Soc Rev", "", "2024"),
            record("3", "", "Unknown Journal", "2022"),
            record("4", "", "Another Journal", "2022"),
            record("5", "", "Another Journal", "2022"),
        ];

        let agg = aggregate(&records, &table);

        let order: Vec<&str> = agg.journals_by_impact().iter().map(|j| j.key.as_str()).collect();
        assert_eq!(order, vec!["Chem Soc Rev", "J Med", "Another Journal", "Unknown Journal"]);

        let years: Vec<&str> = agg.years_desc().iter().map(|y| y.year.as_str()).collect();
        assert_eq!(years, vec!["2024", "2022", "2021"]);
    }

    #[test]
    fn test_last_match_wins_for_bucket() {
        // Same abbreviation key, but the second record's full title matches a
        // different entry through the normalized fallback.
        let table = ReferenceTable::from_entries(vec![
            ("Alpha".to_string(), reference(2.0, "Q2", Some("Shared Name"))),
            ("Beta".to_string(), reference(5.0, "Q1", Some("Other Name"))),
        ]);
        let records = vec![
            record("1", "Amb J", "Shared Name", "2020"),
            record("2", "Amb J", "Other Name", "2021"),
        ];

        let agg = aggregate(&records, &table);

        let journal = &agg.journals["Amb J"];
        assert_eq!(journal.impact_factor, 5.0);
        assert_eq!(journal.quartile.as_deref(), Some("Q1"));
        assert_eq!(agg.total_impact_factor(), 10.0);
    }

    #[test]
    fn test_summary() {
        let table = sample_table();
        let records = vec![
            record("1", "J Med", "", "2023"),
            record("2", "J Med", "", "2024"),
            record("3", "", "Unknown Journal", "2024"),
        ];
        let agg = aggregate(&records, &table);
        let summary = agg.summary(123, Local::now());

        assert_eq!(summary.rounded_count(), 120);
        assert_eq!(summary.total_publications, 3);
        assert_eq!(summary.matched_publications, 2);
        assert_eq!(summary.journal_count, 2);
        assert_eq!(summary.total_if, 7.0);
        assert_eq!(summary.average_if, 3.5);
    }

    #[test]
    fn test_summary_without_matches() {
        let agg = aggregate(&[record("1", "", "Nowhere", "")], &ReferenceTable::default());
        let summary = agg.summary(1, Local::now());
        assert_eq!(summary.total_if, 0.0);
        assert_eq!(summary.average_if, 0.0);
    }

    #[test]
    fn test_floor_to_ten() {
        assert_eq!(floor_to_ten(123), 120);
        assert_eq!(floor_to_ten(120), 120);
        assert_eq!(floor_to_ten(9), 0);
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(7.0), 7.0);
        assert_eq!(round2(12.345_6), 12.35);
    }
}
