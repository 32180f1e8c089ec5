use std::collections::HashSet;
use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;

use pubmerge_core::AppConfig;
use pubmerge_core::models::{PublicationRef, SourceFailure, is_valid_key};

use crate::cache::ResponseCache;
use crate::error::{CollateError, Result};
use crate::merge::{SourcePriority, merge_records};
use crate::sources::pubmed::PubmedClient;
use crate::sources::scopus::ScopusClient;
use crate::sources::{QuotaLedger, SourceClient};

/// Terminal state of one publication for this run. A partial merge is not
/// a distinct state: it is `Merged` with failures recorded on the outcome
/// and `complete == false` on the canonical record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicationStatus {
    Merged,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublicationOutcome {
    pub local_key: String,
    pub status: PublicationStatus,
    pub failures: Vec<SourceFailure>,
}

impl PublicationOutcome {
    fn skipped(local_key: &str, failures: Vec<SourceFailure>) -> Self {
        Self {
            local_key: local_key.to_string(),
            status: PublicationStatus::Skipped,
            failures,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Publications merged with every enabled source contributing.
    pub merged: usize,
    /// Publications merged with at least one source failure recorded.
    pub partial: usize,
    /// Publications with no usable data from any source.
    pub skipped: usize,
    /// Sources disabled mid-run by a quota signal.
    pub quota_tripped: Vec<&'static str>,
    pub outcomes: Vec<PublicationOutcome>,
}

/// Walks the publication list, runs every enabled source client per
/// publication, and writes the merged canonical record. Publications are
/// collated concurrently; sources within one publication run in a fixed
/// order.
pub struct CollationDriver {
    clients: Vec<Arc<dyn SourceClient>>,
    cache: Arc<ResponseCache>,
    priority: SourcePriority,
    seed_sources: Vec<String>,
    quota: QuotaLedger,
    concurrency: usize,
}

impl CollationDriver {
    pub fn new(
        clients: Vec<Arc<dyn SourceClient>>,
        cache: Arc<ResponseCache>,
        priority: SourcePriority,
        seed_sources: Vec<String>,
        concurrency: usize,
    ) -> Self {
        Self {
            clients,
            cache,
            priority,
            seed_sources,
            quota: QuotaLedger::new(),
            concurrency: concurrency.max(1),
        }
    }

    /// Build the driver from validated configuration. Missing credentials
    /// are fatal here, before any fetch begins.
    pub fn from_config(config: &AppConfig, cache: Arc<ResponseCache>) -> Result<Self> {
        config
            .validate()
            .map_err(|e| CollateError::Configuration(e.to_string()))?;

        let mut clients: Vec<Arc<dyn SourceClient>> = Vec::new();
        if config.sources.pubmed {
            let email = config.contact_email.clone().ok_or_else(|| {
                CollateError::Configuration("contact_email is required for pubmed".to_string())
            })?;
            clients.push(Arc::new(PubmedClient::new(
                cache.clone(),
                email,
                &config.network,
            )));
        }
        if config.sources.scopus {
            let api_key = config.scopus_api_key.clone().ok_or_else(|| {
                CollateError::Configuration("scopus_api_key is required for scopus".to_string())
            })?;
            clients.push(Arc::new(ScopusClient::new(
                cache.clone(),
                api_key,
                &config.network,
            )));
        }

        Ok(Self::new(
            clients,
            cache,
            SourcePriority::new(&config.source_priority),
            config.seed_sources.clone(),
            config.network.concurrency,
        ))
    }

    pub async fn collate(&self, publications: &[PublicationRef]) -> Result<RunSummary> {
        validate_publications(publications)?;

        let mut outcomes: Vec<PublicationOutcome> = futures::stream::iter(publications)
            .map(|publication| self.collate_one(publication))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        outcomes.sort_by(|a, b| a.local_key.cmp(&b.local_key));

        let merged = outcomes
            .iter()
            .filter(|o| o.status == PublicationStatus::Merged && o.failures.is_empty())
            .count();
        let partial = outcomes
            .iter()
            .filter(|o| o.status == PublicationStatus::Merged && !o.failures.is_empty())
            .count();
        let skipped = outcomes
            .iter()
            .filter(|o| o.status == PublicationStatus::Skipped)
            .count();

        let summary = RunSummary {
            merged,
            partial,
            skipped,
            quota_tripped: self.quota.tripped_sources(),
            outcomes,
        };
        tracing::info!(
            merged = summary.merged,
            partial = summary.partial,
            skipped = summary.skipped,
            "collation finished"
        );
        Ok(summary)
    }

    async fn collate_one(&self, publication: &PublicationRef) -> PublicationOutcome {
        let key = &publication.key;
        let mut records = Vec::new();
        let mut failures = Vec::new();

        if !publication.has_identifiers() {
            tracing::debug!(local_key = %key, "no external identifiers, relying on cache and seeds");
        }

        for client in &self.clients {
            let source = client.source();
            tracing::debug!(local_key = %key, source = source.name(), "fetching");

            match client.fetch(publication, &self.quota).await {
                Ok(record) => records.push(record),
                Err(err) => {
                    match &err {
                        CollateError::NotFound { .. } => {
                            tracing::info!(local_key = %key, error = %err, "no match")
                        }
                        CollateError::QuotaExceeded { .. } => {
                            tracing::info!(local_key = %key, source = source.name(), "source disabled by quota")
                        }
                        CollateError::CacheCorruption { .. } => {
                            tracing::error!(local_key = %key, error = %err, "skipping publication");
                            failures.push(failure(source.name(), &err));
                            return PublicationOutcome::skipped(key, failures);
                        }
                        _ => tracing::warn!(local_key = %key, error = %err, "source failed"),
                    }
                    failures.push(failure(source.name(), &err));
                }
            }
        }

        for seed in &self.seed_sources {
            match self.cache.get(key, seed).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(err) => {
                    tracing::error!(local_key = %key, error = %err, "skipping publication");
                    failures.push(failure(seed, &err));
                    return PublicationOutcome::skipped(key, failures);
                }
            }
        }

        if records.is_empty() {
            tracing::info!(local_key = %key, "no usable data from any source");
            return PublicationOutcome::skipped(key, failures);
        }

        let mut merged = merge_records(key, &records, &self.priority);
        failures.sort_by(|a, b| a.source.cmp(&b.source));
        merged.sources_failed = failures.clone();
        merged.complete = failures.is_empty();

        if let Err(err) = self.cache.write_merged(&merged).await {
            tracing::error!(local_key = %key, error = %err, "failed to write merged record");
            failures.push(failure("merged", &err));
            return PublicationOutcome::skipped(key, failures);
        }

        tracing::debug!(local_key = %key, complete = merged.complete, "merged");
        PublicationOutcome {
            local_key: key.clone(),
            status: PublicationStatus::Merged,
            failures,
        }
    }
}

fn failure(source: &str, err: &CollateError) -> SourceFailure {
    SourceFailure {
        source: source.to_string(),
        kind: err.kind_label().to_string(),
    }
}

/// Local keys must be unique and filesystem-safe before any fetch starts;
/// two publications aliasing onto one cache path would silently overwrite
/// each other.
fn validate_publications(publications: &[PublicationRef]) -> Result<()> {
    let mut seen = HashSet::new();
    for publication in publications {
        if !is_valid_key(&publication.key) {
            return Err(CollateError::Configuration(format!(
                "invalid local key {:?}",
                publication.key
            )));
        }
        if !seen.insert(publication.key.as_str()) {
            return Err(CollateError::Configuration(format!(
                "duplicate local key {:?}",
                publication.key
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use mockito::{Matcher, Server, ServerGuard};

    use super::*;

    static TEST_COUNTER: AtomicUsize = AtomicUsize::new(0);

    const PUBMED_XML: &str = r#"<PubmedArticleSet>
      <PubmedArticle>
        <MedlineCitation>
          <PMID Version="1">26886243</PMID>
          <Article>
            <Journal>
              <Title>International journal of epidemiology</Title>
              <JournalIssue><PubDate><Year>2016</Year></PubDate></JournalIssue>
            </Journal>
            <ArticleTitle>Cohort profile</ArticleTitle>
          </Article>
          <MeshHeadingList>
            <MeshHeading>
              <DescriptorName MajorTopicYN="Y">Epidemiology</DescriptorName>
            </MeshHeading>
          </MeshHeadingList>
        </MedlineCitation>
      </PubmedArticle>
    </PubmedArticleSet>"#;

    const SCOPUS_JSON: &str = r#"{
        "search-results": {
            "entry": [{
                "dc:identifier": "SCOPUS_ID:84959865907",
                "dc:title": "Cohort profile",
                "dc:creator": "Butters O.",
                "prism:coverDate": "2016-04-01",
                "citedby-count": "42"
            }]
        }
    }"#;

    fn test_cache() -> Arc<ResponseCache> {
        let root = std::env::temp_dir().join(format!(
            "pubmerge_collate_test_{}_{}",
            std::process::id(),
            TEST_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        Arc::new(ResponseCache::new(root))
    }

    fn driver_for(server: &ServerGuard, cache: Arc<ResponseCache>) -> CollationDriver {
        let pubmed = Arc::new(PubmedClient::with_params(
            &server.url(),
            cache.clone(),
            "ops@example.org".to_string(),
            Duration::from_millis(1),
            Duration::from_secs(5),
        ));
        let scopus = Arc::new(ScopusClient::with_params(
            &server.url(),
            cache.clone(),
            "test-key".to_string(),
            Duration::from_millis(1),
            Duration::from_secs(5),
        ));
        CollationDriver::new(
            vec![pubmed, scopus],
            cache,
            SourcePriority::new(&[
                "zotero".to_string(),
                "pubmed".to_string(),
                "scopus".to_string(),
            ]),
            vec!["zotero".to_string()],
            2,
        )
    }

    fn publication(key: &str, pmid: Option<&str>, doi: Option<&str>) -> PublicationRef {
        PublicationRef {
            key: key.to_string(),
            pmid: pmid.map(ToOwned::to_owned),
            doi: doi.map(ToOwned::to_owned),
        }
    }

    #[tokio::test]
    async fn both_sources_merge_into_one_complete_record() {
        let mut server = Server::new_async().await;
        let _pm = server
            .mock("GET", "/efetch.fcgi")
            .match_query(Matcher::Any)
            .with_body(PUBMED_XML)
            .create_async()
            .await;
        let _sc = server
            .mock("GET", "/content/search/scopus")
            .match_query(Matcher::Any)
            .with_body(SCOPUS_JSON)
            .create_async()
            .await;

        let cache = test_cache();
        let driver = driver_for(&server, cache.clone());
        let summary = driver
            .collate(&[publication("k1", Some("26886243"), None)])
            .await
            .unwrap();

        assert_eq!(summary.merged, 1);
        assert_eq!(summary.partial, 0);
        assert_eq!(summary.skipped, 0);

        let merged = cache.read_merged("k1").await.unwrap().unwrap();
        assert!(merged.complete);
        assert_eq!(merged.title.unwrap().source, "pubmed");
        assert_eq!(merged.citation_count.unwrap().value, 42);
        assert_eq!(merged.sources_merged, vec!["pubmed", "scopus"]);
    }

    #[tokio::test]
    async fn second_run_is_byte_identical_with_zero_network_calls() {
        let mut server = Server::new_async().await;
        let pm = server
            .mock("GET", "/efetch.fcgi")
            .match_query(Matcher::Any)
            .with_body(PUBMED_XML)
            .expect(1)
            .create_async()
            .await;
        let sc = server
            .mock("GET", "/content/search/scopus")
            .match_query(Matcher::Any)
            .with_body(SCOPUS_JSON)
            .expect(1)
            .create_async()
            .await;

        let cache = test_cache();
        let publications = [publication("k1", Some("26886243"), None)];

        let driver = driver_for(&server, cache.clone());
        driver.collate(&publications).await.unwrap();
        let first = std::fs::read(cache.root().join("processed/merged/k1.json")).unwrap();

        // Fresh driver, same cache: a new run with unchanged source data.
        let driver = driver_for(&server, cache.clone());
        driver.collate(&publications).await.unwrap();
        let second = std::fs::read(cache.root().join("processed/merged/k1.json")).unwrap();

        assert_eq!(first, second);
        pm.assert_async().await;
        sc.assert_async().await;
    }

    #[tokio::test]
    async fn quota_trip_short_circuits_remaining_publications() {
        let mut server = Server::new_async().await;
        let _pm = server
            .mock("GET", "/efetch.fcgi")
            .match_query(Matcher::Any)
            .with_body(PUBMED_XML)
            .expect(2)
            .create_async()
            .await;
        // Only the first publication may reach Scopus.
        let sc = server
            .mock("GET", "/content/search/scopus")
            .match_query(Matcher::Any)
            .with_status(429)
            .expect(1)
            .create_async()
            .await;

        let cache = test_cache();
        let driver = CollationDriver {
            concurrency: 1, // deterministic publication order for the call count
            ..driver_for(&server, cache.clone())
        };
        let summary = driver
            .collate(&[
                publication("k1", Some("111"), None),
                publication("k2", Some("222"), None),
            ])
            .await
            .unwrap();

        assert_eq!(summary.partial, 2);
        assert_eq!(summary.quota_tripped, vec!["scopus"]);
        sc.assert_async().await;

        let merged = cache.read_merged("k2").await.unwrap().unwrap();
        assert!(!merged.complete);
        assert_eq!(merged.sources_failed.len(), 1);
        assert_eq!(merged.sources_failed[0].kind, "quota_exceeded");
    }

    #[tokio::test]
    async fn publication_with_no_usable_data_is_skipped() {
        let mut server = Server::new_async().await;
        let _pm = server
            .mock("GET", "/efetch.fcgi")
            .match_query(Matcher::Any)
            .with_body("<PubmedArticleSet/>")
            .create_async()
            .await;
        let _sc = server
            .mock("GET", "/content/search/scopus")
            .match_query(Matcher::Any)
            .with_body(r#"{"search-results": {"entry": [{"error": "Result set was empty"}]}}"#)
            .create_async()
            .await;

        let cache = test_cache();
        let driver = driver_for(&server, cache.clone());
        let summary = driver
            .collate(&[publication("gone", Some("999"), Some("10.1/none"))])
            .await
            .unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(cache.read_merged("gone").await.unwrap(), None);
        assert_eq!(summary.outcomes[0].failures.len(), 2);
        assert!(
            summary.outcomes[0]
                .failures
                .iter()
                .all(|f| f.kind == "not_found")
        );
    }

    #[tokio::test]
    async fn seed_records_join_the_merge() {
        let mut server = Server::new_async().await;
        let _pm = server
            .mock("GET", "/efetch.fcgi")
            .match_query(Matcher::Any)
            .with_body(PUBMED_XML)
            .create_async()
            .await;
        let _sc = server
            .mock("GET", "/content/search/scopus")
            .match_query(Matcher::Any)
            .with_body(r#"{"search-results": {"entry": [{"error": "Result set was empty"}]}}"#)
            .create_async()
            .await;

        let cache = test_cache();
        let mut seed = pubmerge_core::models::SourceRecord::new("k1", "zotero");
        seed.title = Some("The zotero title".to_string());
        let dir = cache.root().join("processed/zotero");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("k1.json"), serde_json::to_vec(&seed).unwrap()).unwrap();

        let driver = driver_for(&server, cache.clone());
        driver
            .collate(&[publication("k1", Some("26886243"), None)])
            .await
            .unwrap();

        let merged = cache.read_merged("k1").await.unwrap().unwrap();
        // Zotero outranks pubmed in the priority used here.
        assert_eq!(merged.title.unwrap().source, "zotero");
        assert!(merged.conflicts.iter().any(|c| c.field == "title"));
        assert!(!merged.complete);
    }

    #[tokio::test]
    async fn duplicate_keys_fail_before_any_fetch() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/efetch.fcgi")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let driver = driver_for(&server, test_cache());
        let err = driver
            .collate(&[
                publication("dup", Some("1"), None),
                publication("dup", Some("2"), None),
            ])
            .await
            .unwrap_err();

        assert!(matches!(err, CollateError::Configuration(_)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn malformed_key_fails_before_any_fetch() {
        let server = Server::new_async().await;
        let driver = driver_for(&server, test_cache());
        let err = driver
            .collate(&[publication("bad/key", Some("1"), None)])
            .await
            .unwrap_err();
        assert!(matches!(err, CollateError::Configuration(_)));
    }
}
