use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use quick_xml::de::from_str;
use regex::Regex;
use serde::Deserialize;

use pubmerge_core::NetworkConfig;
use pubmerge_core::models::{IdKind, PublicationRef, SourceRecord, SubjectTag};

use crate::cache::{RawResponse, ResponseCache};
use crate::error::{CollateError, Result};
use crate::http::PacedClient;
use crate::resolver::resolve_identifiers;
use crate::sources::{ApiSource, QuotaLedger, SourceClient, failure_to_error};

const BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";
const SOURCE: ApiSource = ApiSource::Pubmed;

static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(19|20)\d{2}\b").expect("valid regex"));

/// PubMed EFetch client. Queried by PMID only; the contact email rides on
/// every request per the NCBI usage policy.
pub struct PubmedClient {
    client: PacedClient,
    cache: Arc<ResponseCache>,
    base_url: String,
    contact_email: String,
}

impl PubmedClient {
    pub fn new(cache: Arc<ResponseCache>, contact_email: String, network: &NetworkConfig) -> Self {
        Self::with_params(
            BASE_URL,
            cache,
            contact_email,
            Duration::from_millis(network.min_interval_ms),
            Duration::from_secs(network.timeout_secs),
        )
    }

    pub fn with_params(
        base_url: &str,
        cache: Arc<ResponseCache>,
        contact_email: String,
        min_interval: Duration,
        timeout: Duration,
    ) -> Self {
        let user_agent = format!("pubmerge/0.1 (mailto:{contact_email})");
        Self {
            client: PacedClient::new(min_interval, timeout, &user_agent),
            cache,
            base_url: base_url.to_string(),
            contact_email,
        }
    }

    async fn attempt(
        &self,
        local_key: &str,
        quota: &QuotaLedger,
        pmid: String,
    ) -> Result<(String, SourceRecord)> {
        let url = format!(
            "{}/efetch.fcgi?db=pubmed&id={}&retmode=xml&email={}",
            self.base_url,
            urlencoding::encode(&pmid),
            urlencoding::encode(&self.contact_email)
        );

        let body = self
            .client
            .get(&url)
            .await
            .map_err(|failure| failure_to_error(SOURCE, local_key, quota, failure))?;

        let record = normalize_article_set(local_key, &pmid, &body)?;
        Ok((body, record))
    }
}

#[async_trait]
impl SourceClient for PubmedClient {
    fn source(&self) -> ApiSource {
        SOURCE
    }

    async fn fetch(
        &self,
        publication: &PublicationRef,
        quota: &QuotaLedger,
    ) -> Result<SourceRecord> {
        if let Some(record) = self.cache.get(&publication.key, SOURCE.name()).await? {
            tracing::debug!(local_key = %publication.key, "pubmed cache hit");
            return Ok(record);
        }

        if quota.is_tripped(SOURCE) {
            return Err(CollateError::QuotaExceeded {
                source_id: SOURCE.name(),
            });
        }

        let plan = [(IdKind::Pmid, publication.pmid.as_deref())];
        let resolution = resolve_identifiers(SOURCE, &publication.key, &plan, |_, value| {
            Box::pin(self.attempt(&publication.key, quota, value))
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

/// Map a `PubmedArticleSet` document onto the common record shape. Partial
/// payloads are tolerated: a citation missing its article, author list,
/// abstract, journal, or mesh headings yields a partial record rather than
/// a failure. Only an empty set (no article for the PMID) is `NotFound`,
/// and only an undecodable document is `Transient`.
///
/// The major-topic flag lives in the `MajorTopicYN` attribute of the
/// `DescriptorName` element, not in its text, so it is copied into the tag
/// explicitly here.
pub fn normalize_article_set(local_key: &str, pmid: &str, xml: &str) -> Result<SourceRecord> {
    let set: PubmedArticleSet = from_str(xml).map_err(|e| CollateError::Transient {
        source_id: SOURCE.name(),
        local_key: local_key.to_string(),
        message: format!("invalid efetch xml: {e}"),
    })?;

    let Some(article) = set.articles.into_iter().next() else {
        return Err(CollateError::NotFound {
            source_id: SOURCE.name(),
            local_key: local_key.to_string(),
        });
    };

    let mut record = SourceRecord::new(local_key, SOURCE.name());
    record.retrieved_via = Some(IdKind::Pmid);
    record.identifiers.pmid = Some(pmid.to_string());

    let Some(citation) = article.citation else {
        return Ok(record);
    };

    if let Some(value) = citation.pmid.and_then(|p| clean_optional(p.value)) {
        record.identifiers.pmid = Some(value);
    }

    if let Some(article) = citation.article {
        record.title = article.title.as_deref().and_then(clean_text_optional);

        record.abstract_text = article.abstract_element.and_then(|a| {
            let joined = a
                .sections
                .into_iter()
                .filter_map(|s| clean_optional(s.text))
                .collect::<Vec<_>>()
                .join(" ");
            (!joined.is_empty()).then_some(joined)
        });

        record.authors = article
            .author_list
            .map(|list| {
                list.authors
                    .into_iter()
                    .filter_map(author_display_name)
                    .collect()
            })
            .unwrap_or_default();

        if let Some(journal) = article.journal {
            record.journal = journal.title.as_deref().and_then(clean_text_optional);
            record.year = journal
                .issue
                .and_then(|issue| issue.pub_date)
                .and_then(parse_pub_date_year);
        }

        record.identifiers.doi = article
            .elocation_ids
            .into_iter()
            .find(|e| e.id_type.as_deref().is_some_and(|t| t.eq_ignore_ascii_case("doi")))
            .and_then(|e| clean_optional(e.value));
    }

    record.subject_tags = citation
        .mesh_headings
        .map(|list| {
            list.headings
                .into_iter()
                .filter_map(|heading| heading.descriptor)
                .filter_map(|descriptor| {
                    let term = clean_optional(descriptor.term)?;
                    let major_topic = descriptor.major_topic.as_deref() == Some("Y");
                    Some(SubjectTag::new(term, major_topic))
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(record)
}

fn author_display_name(author: AuthorElement) -> Option<String> {
    let last = author.last_name.and_then(|v| clean_text_optional(&v));
    let fore = author.fore_name.and_then(|v| clean_text_optional(&v));
    match (last, fore) {
        (Some(last), Some(fore)) => Some(format!("{last}, {fore}")),
        (Some(last), None) => Some(last),
        (None, Some(fore)) => Some(fore),
        (None, None) => author
            .collective_name
            .and_then(|v| clean_text_optional(&v)),
    }
}

fn parse_pub_date_year(date: PubDate) -> Option<i32> {
    if let Some(year) = date.year.as_deref().and_then(|y| y.trim().parse::<i32>().ok()) {
        return Some(year);
    }
    // e.g. "2000 Jan-Feb" or "Winter 2013"
    date.medline_date
        .as_deref()
        .and_then(|v| YEAR_RE.find(v))
        .and_then(|m| m.as_str().parse::<i32>().ok())
}

fn clean_text(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn clean_text_optional(input: &str) -> Option<String> {
    let cleaned = clean_text(input);
    (!cleaned.is_empty()).then_some(cleaned)
}

fn clean_optional(value: Option<String>) -> Option<String> {
    value.as_deref().and_then(clean_text_optional)
}

// ─── EFetch XML shapes ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PubmedArticleSet {
    #[serde(rename = "PubmedArticle", default)]
    articles: Vec<PubmedArticle>,
}

#[derive(Debug, Deserialize)]
struct PubmedArticle {
    #[serde(rename = "MedlineCitation")]
    citation: Option<MedlineCitation>,
}

#[derive(Debug, Deserialize)]
struct MedlineCitation {
    #[serde(rename = "PMID")]
    pmid: Option<PmidElement>,
    #[serde(rename = "Article")]
    article: Option<ArticleElement>,
    #[serde(rename = "MeshHeadingList")]
    mesh_headings: Option<MeshHeadingList>,
}

#[derive(Debug, Deserialize)]
struct PmidElement {
    #[serde(rename = "$text")]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ArticleElement {
    #[serde(rename = "ArticleTitle")]
    title: Option<String>,
    #[serde(rename = "Abstract")]
    abstract_element: Option<AbstractElement>,
    #[serde(rename = "AuthorList")]
    author_list: Option<AuthorList>,
    #[serde(rename = "Journal")]
    journal: Option<JournalElement>,
    #[serde(rename = "ELocationID", default)]
    elocation_ids: Vec<ELocationId>,
}

#[derive(Debug, Deserialize)]
struct AbstractElement {
    #[serde(rename = "AbstractText", default)]
    sections: Vec<AbstractText>,
}

#[derive(Debug, Deserialize)]
struct AbstractText {
    #[serde(rename = "$text")]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthorList {
    #[serde(rename = "Author", default)]
    authors: Vec<AuthorElement>,
}

#[derive(Debug, Deserialize)]
struct AuthorElement {
    #[serde(rename = "LastName")]
    last_name: Option<String>,
    #[serde(rename = "ForeName")]
    fore_name: Option<String>,
    #[serde(rename = "CollectiveName")]
    collective_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JournalElement {
    #[serde(rename = "Title")]
    title: Option<String>,
    #[serde(rename = "JournalIssue")]
    issue: Option<JournalIssue>,
}

#[derive(Debug, Deserialize)]
struct JournalIssue {
    #[serde(rename = "PubDate")]
    pub_date: Option<PubDate>,
}

#[derive(Debug, Deserialize)]
struct PubDate {
    #[serde(rename = "Year")]
    year: Option<String>,
    #[serde(rename = "MedlineDate")]
    medline_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ELocationId {
    #[serde(rename = "@EIdType")]
    id_type: Option<String>,
    #[serde(rename = "$text")]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MeshHeadingList {
    #[serde(rename = "MeshHeading", default)]
    headings: Vec<MeshHeading>,
}

#[derive(Debug, Deserialize)]
struct MeshHeading {
    #[serde(rename = "DescriptorName")]
    descriptor: Option<DescriptorName>,
}

#[derive(Debug, Deserialize)]
struct DescriptorName {
    #[serde(rename = "@MajorTopicYN")]
    major_topic: Option<String>,
    #[serde(rename = "$text")]
    term: Option<String>,
}
