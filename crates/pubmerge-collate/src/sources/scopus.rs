use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use pubmerge_core::NetworkConfig;
use pubmerge_core::models::{IdKind, PublicationRef, SourceRecord};

use crate::cache::{RawResponse, ResponseCache};
use crate::error::{CollateError, Result};
use crate::http::PacedClient;
use crate::resolver::resolve_identifiers;
use crate::sources::{ApiSource, QuotaLedger, SourceClient, failure_to_error};

const BASE_URL: &str = "https://api.elsevier.com";
const SOURCE: ApiSource = ApiSource::Scopus;

/// The envelope's way of saying "no match": an entry whose `error` field
/// carries this literal. Must be told apart from a transport error.
const EMPTY_RESULT_ERROR: &str = "Result set was empty";

static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(19|20)\d{2}\b").expect("valid regex"));

/// Scopus search client. Queries by PMID first, then falls back to DOI —
/// the numeric database ID gives the higher-confidence unique match.
pub struct ScopusClient {
    client: PacedClient,
    cache: Arc<ResponseCache>,
    base_url: String,
    api_key: String,
}

impl ScopusClient {
    pub fn new(cache: Arc<ResponseCache>, api_key: String, network: &NetworkConfig) -> Self {
        Self::with_params(
            BASE_URL,
            cache,
            api_key,
            Duration::from_millis(network.min_interval_ms),
            Duration::from_secs(network.timeout_secs),
        )
    }

    pub fn with_params(
        base_url: &str,
        cache: Arc<ResponseCache>,
        api_key: String,
        min_interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            client: PacedClient::new(min_interval, timeout, "pubmerge/0.1"),
            cache,
            base_url: base_url.to_string(),
            api_key,
        }
    }

    async fn attempt(
        &self,
        local_key: &str,
        quota: &QuotaLedger,
        kind: IdKind,
        value: String,
    ) -> Result<(String, SourceRecord)> {
        let query = match kind {
            IdKind::Pmid => format!("PMID({value})"),
            IdKind::Doi => format!("DOI({value})"),
        };
        let url = format!(
            "{}/content/search/scopus?apiKey={}&query={}",
            self.base_url,
            urlencoding::encode(&self.api_key),
            urlencoding::encode(&query)
        );

        let body = self
            .client
            .get(&url)
            .await
            .map_err(|failure| failure_to_error(SOURCE, local_key, quota, failure))?;

        let mut record = normalize_search_results(local_key, &body)?;
        record.retrieved_via = Some(kind);
        Ok((body, record))
    }
}

#[async_trait]
impl SourceClient for ScopusClient {
    fn source(&self) -> ApiSource {
        SOURCE
    }

    async fn fetch(
        &self,
        publication: &PublicationRef,
        quota: &QuotaLedger,
    ) -> Result<SourceRecord> {
        if let Some(record) = self.cache.get(&publication.key, SOURCE.name()).await? {
            tracing::debug!(local_key = %publication.key, "scopus cache hit");
            return Ok(record);
        }

        if quota.is_tripped(SOURCE) {
            return Err(CollateError::QuotaExceeded {
                source_id: SOURCE.name(),
            });
        }

        let plan = [
            (IdKind::Pmid, publication.pmid.as_deref()),
            (IdKind::Doi, publication.doi.as_deref()),
        ];
        let resolution = resolve_identifiers(SOURCE, &publication.key, &plan, |kind, value| {
            Box::pin(self.attempt(&publication.key, quota, kind, value))
        })
        .await;

        let (body, record) = resolution.outcome?;
        let raw = RawResponse {
            local_key: publication.key.clone(),
            source: SOURCE.name().to_string(),
            identifier_kind: record.retrieved_via.unwrap_or(IdKind::Pmid),
            fetched_at: Utc::now(),
            body,
        };
        self.cache
            .put(&publication.key, SOURCE.name(), &raw, &record)
            .await?;

        Ok(record)
    }
}

// ─── Normalization ───────────────────────────────────────────────────────────

/// Map a `search-results` envelope onto the common record shape. An entry
/// whose `error` field says the result set was empty is `NotFound`; an
/// entry without its `dc:identifier` cross-reference is `Transient`
/// (required field); a missing envelope is `Transient`.
pub fn normalize_search_results(local_key: &str, body: &str) -> Result<SourceRecord> {
    let val: Value = serde_json::from_str(body).map_err(|e| CollateError::Transient {
        source_id: SOURCE.name(),
        local_key: local_key.to_string(),
        message: format!("invalid search response: {e}"),
    })?;

    let Some(entry) = val["search-results"]["entry"]
        .as_array()
        .and_then(|entries| entries.first())
    else {
        return Err(CollateError::Transient {
            source_id: SOURCE.name(),
            local_key: local_key.to_string(),
            message: "missing search-results envelope".to_string(),
        });
    };

    if let Some(error) = entry["error"].as_str() {
        if error == EMPTY_RESULT_ERROR {
            return Err(CollateError::NotFound {
                source_id: SOURCE.name(),
                local_key: local_key.to_string(),
            });
        }
        return Err(CollateError::Transient {
            source_id: SOURCE.name(),
            local_key: local_key.to_string(),
            message: format!("search error: {error}"),
        });
    }

    let scopus_id = entry["dc:identifier"]
        .as_str()
        .map(|id| id.strip_prefix("SCOPUS_ID:").unwrap_or(id).to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| CollateError::Transient {
            source_id: SOURCE.name(),
            local_key: local_key.to_string(),
            message: "entry has no dc:identifier".to_string(),
        })?;

    let mut record = SourceRecord::new(local_key, SOURCE.name());
    record.identifiers.scopus_id = Some(scopus_id);
    record.title = string_field(entry, "dc:title");
    record.journal = string_field(entry, "prism:publicationName");
    record.authors = string_field(entry, "dc:creator").into_iter().collect();
    record.identifiers.doi = string_field(entry, "prism:doi");
    record.identifiers.pmid = string_field(entry, "pubmed-id");
    record.year = entry["prism:coverDate"]
        .as_str()
        .and_then(|date| YEAR_RE.find(date))
        .and_then(|m| m.as_str().parse::<i32>().ok());
    record.citation_count = entry["citedby-count"]
        .as_str()
        .and_then(|count| count.trim().parse::<u32>().ok())
        .or_else(|| entry["citedby-count"].as_u64().map(|n| n as u32));

    Ok(record)
}

fn string_field(entry: &Value, field: &str) -> Option<String> {
    entry[field]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
}
