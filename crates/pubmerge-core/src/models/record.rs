use serde::{Deserialize, Serialize};

/// Which external identifier a retrieval attempt used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdKind {
    Pmid,
    Doi,
}

impl IdKind {
    pub fn as_str(self) -> &'static str {
        match self {
            IdKind::Pmid => "pmid",
            IdKind::Doi => "doi",
        }
    }
}

/// A subject tag with the major-topic marker. The flag is copied explicitly
/// from attribute data on the source element during normalization — it is
/// not derivable from the term text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectTag {
    pub term: String,
    #[serde(default)]
    pub major_topic: bool,
}

impl SubjectTag {
    pub fn new(term: impl Into<String>, major_topic: bool) -> Self {
        Self {
            term: term.into(),
            major_topic,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordIdentifiers {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pmid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopus_id: Option<String>,
}

/// One source's data mapped into the common field shape. Owned by the
/// client that produced it; read-only afterward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub local_key: String,
    pub source: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default)]
    pub authors: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abstract_text: Option<String>,

    #[serde(default)]
    pub identifiers: RecordIdentifiers,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation_count: Option<u32>,

    #[serde(default)]
    pub subject_tags: Vec<SubjectTag>,

    /// Identifier kind the successful retrieval used; absent for records
    /// that did not come from an API fetch (seed sources).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieved_via: Option<IdKind>,
}

impl SourceRecord {
    pub fn new(local_key: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            local_key: local_key.into(),
            source: source.into(),
            title: None,
            authors: Vec::new(),
            journal: None,
            year: None,
            abstract_text: None,
            identifiers: RecordIdentifiers::default(),
            citation_count: None,
            subject_tags: Vec::new(),
            retrieved_via: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn major_topic_flag_survives_serialization() {
        let record = SourceRecord {
            subject_tags: vec![
                SubjectTag::new("Neoplasms", true),
                SubjectTag::new("Humans", false),
            ],
            ..SourceRecord::new("k1", "pubmed")
        };

        let json = serde_json::to_string(&record).unwrap();
        let back: SourceRecord = serde_json::from_str(&json).unwrap();
        assert!(back.subject_tags[0].major_topic);
        assert!(!back.subject_tags[1].major_topic);
    }
}
