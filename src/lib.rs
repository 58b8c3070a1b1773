//! # rustpubstats
//!
//! PubMed publication statistics sync for a static homepage.
//!
//! ## Modules
//!
//! - [`reference`] - Curated journal impact-factor table
//! - [`pubmed`] - PubMed E-utilities client (esearch + batched efetch)
//! - [`analyzer`] - Journal matching and per-journal / per-year aggregation
//! - [`document`] - Homepage stat slots and rendering
//! - [`snapshot`] - Snapshot, history log and CSV persistence
//! - [`pipeline`] - One complete sync run
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rustpubstats::pipeline::{self, SyncConfig};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SyncConfig::new("kim js[Author] AND jeonbuk[Affiliation]");
//!     let outcome = pipeline::run(&config).await?;
//!     println!("Document changed: {}", outcome.document_changed());
//!     Ok(())
//! }
//! ```

pub mod analyzer;
pub mod document;
pub mod error;
pub mod pipeline;
pub mod pubmed;
pub mod reference;
pub mod snapshot;

pub use error::{PubstatsError, Result};
