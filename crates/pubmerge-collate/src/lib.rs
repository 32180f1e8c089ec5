//! Pubmerge collate — PubMed/Scopus retrieval, response cache, record merge.

pub mod cache;
pub mod collate;
pub mod error;
pub mod http;
pub mod merge;
pub mod resolver;
pub mod sources;

pub use cache::{CacheStats, RawResponse, ResponseCache};
pub use collate::{CollationDriver, PublicationOutcome, PublicationStatus, RunSummary};
pub use error::{CollateError, Result};
pub use merge::{SourcePriority, merge_records};
pub use sources::{ApiSource, QuotaLedger, SourceClient};
