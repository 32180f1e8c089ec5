use serde::{Deserialize, Serialize};

/// A field value together with the source that supplied it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenanced<T> {
    pub value: T,
    pub source: String,
}

impl<T> Provenanced<T> {
    pub fn new(value: T, source: impl Into<String>) -> Self {
        Self {
            value,
            source: source.into(),
        }
    }
}

/// A losing value from a lower-priority source. Disagreeing data is
/// recorded here, never silently dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConflict {
    pub field: String,
    pub source: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedAuthor {
    pub name: String,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedTag {
    pub term: String,
    /// True if any contributing source marked the tag a major topic.
    pub major_topic: bool,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergedIdentifiers {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pmid: Option<Provenanced<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<Provenanced<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopus_id: Option<Provenanced<String>>,
}

/// How a source failed for this publication, mirrored onto the merged
/// record so partial merges are queryable rather than inferred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFailure {
    pub source: String,
    pub kind: String,
}

/// The single reconciled record for a publication across all sources.
/// Immutable once written to the cache; regenerated, not mutated, on later
/// runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedRecord {
    pub local_key: String,
    pub filename: String,

    /// False when at least one enabled source contributed nothing.
    pub complete: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<Provenanced<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal: Option<Provenanced<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<Provenanced<i32>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abstract_text: Option<Provenanced<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation_count: Option<Provenanced<u32>>,

    #[serde(default)]
    pub identifiers: MergedIdentifiers,

    #[serde(default)]
    pub authors: Vec<MergedAuthor>,

    #[serde(default)]
    pub subject_tags: Vec<MergedTag>,

    #[serde(default)]
    pub conflicts: Vec<FieldConflict>,

    #[serde(default)]
    pub sources_merged: Vec<String>,

    #[serde(default)]
    pub sources_failed: Vec<SourceFailure>,
}

impl MergedRecord {
    pub fn new(local_key: impl Into<String>) -> Self {
        let local_key = local_key.into();
        let filename = format!("{local_key}.json");
        Self {
            local_key,
            filename,
            complete: false,
            title: None,
            journal: None,
            year: None,
            abstract_text: None,
            citation_count: None,
            identifiers: MergedIdentifiers::default(),
            authors: Vec::new(),
            subject_tags: Vec::new(),
            conflicts: Vec::new(),
            sources_merged: Vec::new(),
            sources_failed: Vec::new(),
        }
    }
}
