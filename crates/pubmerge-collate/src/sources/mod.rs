use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use pubmerge_core::models::{PublicationRef, SourceRecord};

use crate::error::{CollateError, Result};
use crate::http::HttpFailure;

pub mod pubmed;
pub mod scopus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiSource {
    Pubmed,
    Scopus,
}

impl ApiSource {
    pub const ALL: [ApiSource; 2] = [ApiSource::Pubmed, ApiSource::Scopus];

    pub fn name(self) -> &'static str {
        match self {
            ApiSource::Pubmed => "pubmed",
            ApiSource::Scopus => "scopus",
        }
    }
}

impl fmt::Display for ApiSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-run "remote quota exhausted" flags, one per source. Never persisted;
/// reset by constructing a fresh ledger at the start of the next run.
/// Single writer, many readers: any worker may trip a flag, and every
/// worker checks it before a network attempt.
#[derive(Debug, Default)]
pub struct QuotaLedger {
    pubmed: AtomicBool,
    scopus: AtomicBool,
}

impl QuotaLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trip(&self, source: ApiSource) {
        self.flag(source).store(true, Ordering::SeqCst);
    }

    pub fn is_tripped(&self, source: ApiSource) -> bool {
        self.flag(source).load(Ordering::SeqCst)
    }

    pub fn tripped_sources(&self) -> Vec<&'static str> {
        ApiSource::ALL
            .into_iter()
            .filter(|s| self.is_tripped(*s))
            .map(ApiSource::name)
            .collect()
    }

    fn flag(&self, source: ApiSource) -> &AtomicBool {
        match source {
            ApiSource::Pubmed => &self.pubmed,
            ApiSource::Scopus => &self.scopus,
        }
    }
}

/// One external metadata provider. `fetch` returns the cached record when
/// present, otherwise runs the identifier fallback plan against the remote
/// service, normalizes, caches, and returns — or a typed failure that the
/// driver records without retrying.
#[async_trait]
pub trait SourceClient: Send + Sync {
    fn source(&self) -> ApiSource;

    async fn fetch(
        &self,
        publication: &PublicationRef,
        quota: &QuotaLedger,
    ) -> Result<SourceRecord>;
}

/// Convert a transport failure into the run taxonomy, tripping the quota
/// ledger on a rate-limit signal so every worker stops calling the source
/// as soon as the first 429 is seen.
pub(crate) fn failure_to_error(
    source: ApiSource,
    local_key: &str,
    quota: &QuotaLedger,
    failure: HttpFailure,
) -> CollateError {
    match failure {
        HttpFailure::RateLimited => {
            quota.trip(source);
            tracing::warn!(source = source.name(), "quota exhausted, disabling source for this run");
            CollateError::QuotaExceeded {
                source_id: source.name(),
            }
        }
        HttpFailure::Status { status, body } => CollateError::Transient {
            source_id: source.name(),
            local_key: local_key.to_string(),
            message: format!("HTTP {status}: {body}"),
        },
        HttpFailure::Network(message) => CollateError::Transient {
            source_id: source.name(),
            local_key: local_key.to_string(),
            message,
        },
    }
}
