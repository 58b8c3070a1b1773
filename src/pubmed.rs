//! PubMed E-utilities client.
//!
//! Two endpoints are used:
//! - `esearch.fcgi`: JSON list of PMIDs plus a total count for a boolean query
//! - `efetch.fcgi`: PubmedArticleSet XML for a comma-separated batch of PMIDs
//!
//! Failures are reported as warnings and degrade to partial results: a failed
//! search yields no identifiers, a failed batch is skipped, a malformed
//! article is dropped.

use crate::error::{OptionExt, PubstatsError, Result};
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// E-utilities base URL
pub const DEFAULT_EUTILS_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

/// Maximum identifiers requested from esearch
pub const MAX_SEARCH_RESULTS: usize = 500;

/// Maximum identifiers per efetch request
pub const FETCH_BATCH_SIZE: usize = 100;

const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);
const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Pause between efetch batches (NCBI allows 3 req/s without an API key)
const DEFAULT_BATCH_INTERVAL: Duration = Duration::from_millis(350);

const TOOL_NAME: &str = "rustpubstats";

/// One bibliographic record parsed from efetch XML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PublicationRecord {
    /// PubMed identifier
    pub pmid: String,
    /// Article title
    pub title: String,
    /// Journal full title
    pub journal: String,
    /// ISO journal abbreviation (falls back to MedlineTA)
    pub journal_abbrev: String,
    /// Publication year, empty if unknown
    pub year: String,
}

impl PublicationRecord {
    /// Aggregation key: abbreviation, or full title when the abbreviation is empty
    pub fn journal_key(&self) -> &str {
        if self.journal_abbrev.trim().is_empty() {
            self.journal.trim()
        } else {
            self.journal_abbrev.trim()
        }
    }
}

/// Result of an esearch query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResult {
    /// PMIDs, newest first, at most [`MAX_SEARCH_RESULTS`]
    pub ids: Vec<String>,
    /// Total hit count reported by PubMed (may exceed `ids.len()`)
    pub total_count: usize,
}

/// PubMed E-utilities client
pub struct PubMedClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    email: Option<String>,
    batch_interval: Duration,
}

impl PubMedClient {
    /// Create a new client
    ///
    /// # Arguments
    ///
    /// * `base_url` - E-utilities base URL, `None` for the NCBI default
    pub fn new(base_url: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(format!("{}/{}", TOOL_NAME, env!("CARGO_PKG_VERSION")))
            .timeout(SEARCH_TIMEOUT)
            .build()
            .map_err(|e| PubstatsError::Config(format!("Failed to build HTTP client: {}", e)))?;

        let base_url = base_url
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_EUTILS_URL.to_string());

        Ok(Self {
            client,
            base_url,
            api_key: None,
            email: None,
            batch_interval: DEFAULT_BATCH_INTERVAL,
        })
    }

    /// Send an NCBI API key with every request
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.trim().is_empty());
        self
    }

    /// Send a contact e-mail with every request
    pub fn with_email(mut self, email: Option<String>) -> Self {
        self.email = email.filter(|e| !e.trim().is_empty());
        self
    }

    /// Override the pause between efetch batches
    pub fn with_batch_interval(mut self, interval: Duration) -> Self {
        self.batch_interval = interval;
        self
    }

    fn base_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("db", "pubmed".to_string()),
            ("tool", TOOL_NAME.to_string()),
        ];
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }
        if let Some(email) = &self.email {
            params.push(("email", email.clone()));
        }
        params
    }

    /// Search PubMed and return up to [`MAX_SEARCH_RESULTS`] PMIDs.
    ///
    /// Never fails: network or parse errors are logged and yield an empty
    /// result with a zero count.
    pub async fn list_identifiers(&self, query: &str) -> SearchResult {
        match self.esearch(query).await {
            Ok(result) => {
                info!(
                    total = result.total_count,
                    returned = result.ids.len(),
                    "PubMed search complete"
                );
                result
            }
            Err(e) => {
                warn!(error = %e, "PubMed search failed");
                SearchResult::default()
            }
        }
    }

    async fn esearch(&self, query: &str) -> Result<SearchResult> {
        let url = format!("{}/esearch.fcgi", self.base_url);

        let mut params = self.base_params();
        params.push(("term", query.to_string()));
        params.push(("retmode", "json".to_string()));
        params.push(("retmax", MAX_SEARCH_RESULTS.to_string()));
        params.push(("sort", "pub_date".to_string()));

        debug!(url = %url, query = query, "Sending esearch request");

        let response = self.client.get(&url).query(&params).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(PubstatsError::Api {
                code: status.as_u16() as i32,
                message: format!("esearch error: {}", status),
            });
        }

        let data: ESearchResponse = response.json().await?;
        let result = data.esearchresult;

        if let Some(message) = result.error {
            return Err(PubstatsError::Api {
                code: status.as_u16() as i32,
                message,
            });
        }

        let total_count = result.count.trim().parse().unwrap_or_else(|_| {
            debug!(count = %result.count, "Unparseable esearch count, using id list length");
            result.idlist.len()
        });

        let mut ids = result.idlist;
        ids.truncate(MAX_SEARCH_RESULTS);

        Ok(SearchResult { ids, total_count })
    }

    /// Fetch bibliographic details for `ids` in batches of [`FETCH_BATCH_SIZE`].
    ///
    /// A failed batch is logged and skipped; records from other batches are kept.
    pub async fn fetch_details(&self, ids: &[String]) -> Vec<PublicationRecord> {
        if ids.is_empty() {
            return Vec::new();
        }

        let batch_count = ids.len().div_ceil(FETCH_BATCH_SIZE);
        info!(total = ids.len(), batches = batch_count, "Fetching PubMed details");

        let mut all_records = Vec::with_capacity(ids.len());

        for (batch_idx, chunk) in ids.chunks(FETCH_BATCH_SIZE).enumerate() {
            match self.fetch_batch(chunk).await {
                Ok(records) => {
                    info!(
                        batch = batch_idx + 1,
                        total_batches = batch_count,
                        requested = chunk.len(),
                        parsed = records.len(),
                        "Batch completed"
                    );
                    all_records.extend(records);
                }
                Err(e) => {
                    warn!(batch = batch_idx + 1, error = %e, "Batch failed, skipping");
                }
            }

            if batch_idx + 1 < batch_count && !self.batch_interval.is_zero() {
                tokio::time::sleep(self.batch_interval).await;
            }
        }

        info!(total_parsed = all_records.len(), "PubMed fetch complete");
        all_records
    }

    async fn fetch_batch(&self, ids: &[String]) -> Result<Vec<PublicationRecord>> {
        let url = format!("{}/efetch.fcgi", self.base_url);

        let mut params = self.base_params();
        params.push(("id", ids.join(",")));
        params.push(("retmode", "xml".to_string()));

        let response = self
            .client
            .get(&url)
            .query(&params)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await?;
        let status = response.status();

        if !status.is_success() {
            return Err(PubstatsError::Api {
                code: status.as_u16() as i32,
                message: format!("efetch error: {}", status),
            });
        }

        let xml = response.text().await?;
        parse_pubmed_xml(&xml)
    }
}

// === esearch Response Types ===

#[derive(Debug, Deserialize)]
struct ESearchResponse {
    esearchresult: ESearchResult,
}

#[derive(Debug, Deserialize)]
struct ESearchResult {
    #[serde(default)]
    count: String,
    #[serde(default)]
    idlist: Vec<String>,
    #[serde(rename = "ERROR", default)]
    error: Option<String>,
}

// === efetch XML parsing ===

/// Fields collected while inside one `<PubmedArticle>`
#[derive(Default)]
struct ArticleBuilder {
    pmid: Option<String>,
    title: String,
    journal: String,
    iso_abbrev: String,
    medline_ta: String,
    year: String,
    medline_date: String,
    broken: Option<String>,
}

impl ArticleBuilder {
    fn build(self, year_regex: &Regex) -> Result<PublicationRecord> {
        if let Some(reason) = self.broken {
            return Err(PubstatsError::Parse(reason));
        }

        let pmid = self
            .pmid
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .ok_or_parse("PubmedArticle without PMID")?;

        let year = match self.year.trim() {
            "" => extract_year(&self.medline_date, year_regex).unwrap_or_default(),
            y => y.to_string(),
        };

        let journal_abbrev = if self.iso_abbrev.trim().is_empty() {
            collapse_whitespace(&self.medline_ta)
        } else {
            collapse_whitespace(&self.iso_abbrev)
        };

        Ok(PublicationRecord {
            pmid,
            title: collapse_whitespace(&self.title),
            journal: collapse_whitespace(&self.journal),
            journal_abbrev,
            year,
        })
    }

    /// Route a text node to the field named by the current element path
    fn push_text(&mut self, path: &[String], text: &str) {
        let n = path.len();
        let last = path.last().map(String::as_str).unwrap_or("");
        let parent = if n >= 2 { path[n - 2].as_str() } else { "" };

        match (parent, last) {
            ("MedlineCitation", "PMID") if self.pmid.is_none() => {
                self.pmid = Some(text.to_string());
            }
            ("Journal", "Title") => self.journal.push_str(text),
            ("Journal", "ISOAbbreviation") => self.iso_abbrev.push_str(text),
            ("MedlineJournalInfo", "MedlineTA") => self.medline_ta.push_str(text),
            ("PubDate", "Year") => self.year.push_str(text),
            ("PubDate", "MedlineDate") => self.medline_date.push_str(text),
            _ => {
                // ArticleTitle may contain inline markup (<i>, <sup>, ...)
                if path.iter().any(|p| p == "ArticleTitle") {
                    self.title.push_str(text);
                }
            }
        }
    }
}

/// Parse efetch XML (PubmedArticleSet) into records.
///
/// Articles that cannot be turned into a record are dropped with a warning.
/// Malformed XML fails the whole document.
pub fn parse_pubmed_xml(xml: &str) -> Result<Vec<PublicationRecord>> {
    let year_regex = Regex::new(YEAR_PATTERN).map_err(|e| PubstatsError::Parse(e.to_string()))?;
    let mut records = Vec::new();
    let mut reader = Reader::from_str(xml);

    let mut path: Vec<String> = Vec::new();
    let mut current: Option<ArticleBuilder> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == "PubmedArticle" {
                    current = Some(ArticleBuilder::default());
                }
                path.push(name);
            }
            Ok(Event::Text(ref e)) => {
                if let Some(ref mut article) = current {
                    match e.unescape() {
                        Ok(text) => article.push_text(&path, &text),
                        Err(err) => {
                            article.broken = Some(format!("Bad text in <{}>: {}", path.join("/"), err));
                        }
                    }
                }
            }
            Ok(Event::CData(ref e)) => {
                if let Some(ref mut article) = current {
                    article.push_text(&path, &String::from_utf8_lossy(e));
                }
            }
            Ok(Event::End(ref e)) => {
                if e.local_name().as_ref() == b"PubmedArticle" {
                    if let Some(article) = current.take() {
                        match article.build(&year_regex) {
                            Ok(record) => records.push(record),
                            Err(err) => warn!(error = %err, "Dropping unparseable article"),
                        }
                    }
                }
                path.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(PubstatsError::Parse(format!(
                    "XML error at position {}: {}",
                    reader.buffer_position(),
                    e
                )));
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(records)
}

/// Four ASCII digits; `\d` would also accept other scripts' digits
pub const YEAR_PATTERN: &str = r"[0-9]{4}";

/// First 4-digit run in a free-text date such as `"2024 Jan-Feb"`
pub fn extract_year(text: &str, year_regex: &Regex) -> Option<String> {
    year_regex.find(text).map(|m| m.as_str().to_string())
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const ARTICLE_SET: &str = r#"<?xml version="1.0"?>
<!DOCTYPE PubmedArticleSet PUBLIC "-//NLM//DTD PubMedArticle, 1st January 2024//EN" "https://dtd.nlm.nih.gov/ncbi/pubmed/out/pubmed_240101.dtd">
<PubmedArticleSet>
  <PubmedArticle>
    <MedlineCitation Status="MEDLINE" Owner="NLM">
      <PMID Version="1">38000001</PMID>
      <Article PubModel="Print">
        <Journal>
          <ISSN IssnType="Electronic">1234-5678</ISSN>
          <JournalIssue CitedMedium="Internet">
            <Volume>12</Volume>
            <PubDate><Year>2023</Year><Month>Nov</Month></PubDate>
          </JournalIssue>
          <Title>Journal of Medicine</Title>
          <ISOAbbreviation>J Med</ISOAbbreviation>
        </Journal>
        <ArticleTitle>Targeted <i>in vivo</i> imaging &amp; therapy.</ArticleTitle>
      </Article>
      <MedlineJournalInfo><MedlineTA>J Med</MedlineTA></MedlineJournalInfo>
      <CommentsCorrectionsList>
        <CommentsCorrections RefType="CommentIn"><PMID Version="1">11111111</PMID></CommentsCorrections>
      </CommentsCorrectionsList>
    </MedlineCitation>
  </PubmedArticle>
  <PubmedArticle>
    <MedlineCitation>
      <PMID Version="1">38000002</PMID>
      <Article>
        <Journal>
          <JournalIssue>
            <PubDate><MedlineDate>2024 Jan-Feb</MedlineDate></PubDate>
          </JournalIssue>
          <Title>Chemical Society Reviews</Title>
        </Journal>
        <ArticleTitle>Second article</ArticleTitle>
      </Article>
      <MedlineJournalInfo><MedlineTA>Chem Soc Rev</MedlineTA></MedlineJournalInfo>
    </MedlineCitation>
  </PubmedArticle>
  <PubmedArticle>
    <MedlineCitation>
      <Article>
        <Journal><Title>No Identifier Journal</Title></Journal>
        <ArticleTitle>Missing PMID</ArticleTitle>
      </Article>
    </MedlineCitation>
  </PubmedArticle>
</PubmedArticleSet>"#;

    fn single_article(pmid: &str) -> String {
        format!(
            "<PubmedArticleSet><PubmedArticle><MedlineCitation><PMID>{}</PMID><Article>\
             <Journal><JournalIssue><PubDate><Year>2022</Year></PubDate></JournalIssue>\
             <Title>Test Journal</Title><ISOAbbreviation>Test J</ISOAbbreviation></Journal>\
             <ArticleTitle>Article {}</ArticleTitle></Article></MedlineCitation></PubmedArticle>\
             </PubmedArticleSet>",
            pmid, pmid
        )
    }

    #[test]
    fn test_parse_pubmed_xml() {
        let records = parse_pubmed_xml(ARTICLE_SET).expect("Parse failed");
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.pmid, "38000001");
        assert_eq!(first.title, "Targeted in vivo imaging & therapy.");
        assert_eq!(first.journal, "Journal of Medicine");
        assert_eq!(first.journal_abbrev, "J Med");
        assert_eq!(first.year, "2023");
    }

    #[test]
    fn test_medline_date_and_medline_ta_fallback() {
        let records = parse_pubmed_xml(ARTICLE_SET).expect("Parse failed");
        let second = &records[1];
        assert_eq!(second.pmid, "38000002");
        assert_eq!(second.year, "2024");
        assert_eq!(second.journal_abbrev, "Chem Soc Rev");
    }

    #[test]
    fn test_missing_year_is_empty() {
        let xml = "<PubmedArticleSet><PubmedArticle><MedlineCitation><PMID>1</PMID>\
                   <Article><Journal><Title>Undated</Title></Journal>\
                   <ArticleTitle>No date</ArticleTitle></Article></MedlineCitation>\
                   </PubmedArticle></PubmedArticleSet>";
        let records = parse_pubmed_xml(xml).expect("Parse failed");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].year, "");
        assert_eq!(records[0].journal_key(), "Undated");
    }

    #[test]
    fn test_malformed_xml_fails() {
        let xml = "<PubmedArticleSet><PubmedArticle><MedlineCitation></PubmedArticle>";
        assert!(parse_pubmed_xml(xml).is_err());
    }

    #[test]
    fn test_extract_year() {
        let re = Regex::new(YEAR_PATTERN).expect("year pattern");
        assert_eq!(extract_year("2024 Jan-Feb", &re).as_deref(), Some("2024"));
        assert_eq!(extract_year("Winter 2019-2020", &re).as_deref(), Some("2019"));
        assert_eq!(extract_year("Spring", &re), None);
    }

    #[test]
    fn test_extract_year_ignores_non_ascii_digits() {
        let re = Regex::new(YEAR_PATTERN).expect("year pattern");
        // Full-width and Arabic-Indic digits
        assert_eq!(extract_year("\u{ff12}\u{ff10}\u{ff12}\u{ff14} Jan", &re), None);
        assert_eq!(extract_year("\u{662}\u{660}\u{662}\u{664}", &re), None);
        assert_eq!(extract_year("\u{ff12}\u{ff10}\u{ff12}\u{ff14} / 2023", &re).as_deref(), Some("2023"));
    }

    #[test]
    fn test_medline_date_with_full_width_digits_has_no_year() {
        let xml = "<PubmedArticleSet><PubmedArticle><MedlineCitation><PMID>7</PMID>\
                   <Article><Journal><JournalIssue><PubDate>\
                   <MedlineDate>\u{ff12}\u{ff10}\u{ff12}\u{ff14} Spring</MedlineDate>\
                   </PubDate></JournalIssue><Title>Wide</Title></Journal>\
                   <ArticleTitle>Wide date</ArticleTitle></Article></MedlineCitation>\
                   </PubmedArticle></PubmedArticleSet>";
        let records = parse_pubmed_xml(xml).expect("Parse failed");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].year, "");
    }

    #[test]
    fn test_journal_key_falls_back_to_title() {
        let record = PublicationRecord {
            journal: "Unknown Journal".to_string(),
            journal_abbrev: "  ".to_string(),
            ..Default::default()
        };
        assert_eq!(record.journal_key(), "Unknown Journal");
    }

    #[tokio::test]
    async fn test_list_identifiers() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/esearch.fcgi")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("db".into(), "pubmed".into()),
                Matcher::UrlEncoded("retmax".into(), "500".into()),
                Matcher::UrlEncoded("term".into(), "kim[Author]".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"esearchresult": {"count": "123", "retmax": "2", "idlist": ["2", "1"]}}"#)
            .create_async()
            .await;

        let client = PubMedClient::new(Some(server.url())).expect("client");
        let result = client.list_identifiers("kim[Author]").await;

        assert_eq!(result.total_count, 123);
        assert_eq!(result.ids, vec!["2".to_string(), "1".to_string()]);
    }

    #[tokio::test]
    async fn test_list_identifiers_failure_is_empty() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/esearch.fcgi")
            .match_query(Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        let client = PubMedClient::new(Some(server.url())).expect("client");
        let result = client.list_identifiers("anything").await;

        assert_eq!(result, SearchResult::default());
    }

    #[tokio::test]
    async fn test_fetch_details_keeps_partial_results() {
        let mut server = mockito::Server::new_async().await;

        let ids: Vec<String> = (1..=150).map(|n| n.to_string()).collect();
        let first_batch = ids[..100].join(",");
        let second_batch = ids[100..].join(",");

        let _ok = server
            .mock("GET", "/efetch.fcgi")
            .match_query(Matcher::UrlEncoded("id".into(), first_batch))
            .with_status(200)
            .with_body(single_article("1"))
            .create_async()
            .await;
        let _failed = server
            .mock("GET", "/efetch.fcgi")
            .match_query(Matcher::UrlEncoded("id".into(), second_batch))
            .with_status(502)
            .create_async()
            .await;

        let client = PubMedClient::new(Some(server.url()))
            .expect("client")
            .with_batch_interval(Duration::ZERO);
        let records = client.fetch_details(&ids).await;

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].pmid, "1");
        assert_eq!(records[0].journal_key(), "Test J");
    }
}
