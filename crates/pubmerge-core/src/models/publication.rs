use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// One row of the publication list: the stable local key plus whatever
/// external identifiers are known for it. The local key is the only field
/// guaranteed to be present; it doubles as the cache filename stem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationRef {
    pub key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pmid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
}

impl PublicationRef {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            pmid: None,
            doi: None,
        }
    }

    pub fn has_identifiers(&self) -> bool {
        non_empty(self.pmid.as_deref()) || non_empty(self.doi.as_deref())
    }
}

/// Local keys become filenames; anything outside this set would alias on
/// disk and corrupt the cache keyspace.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Load the publication list from a JSON array file. Whitespace-only
/// identifiers are treated as absent.
pub fn load_publications(path: &Path) -> Result<Vec<PublicationRef>> {
    let raw = std::fs::read_to_string(path)?;
    let mut publications: Vec<PublicationRef> = serde_json::from_str(&raw)?;

    for publication in &mut publications {
        publication.key = publication.key.trim().to_string();
        publication.pmid = normalize_id(publication.pmid.take());
        publication.doi = normalize_id(publication.doi.take());
    }

    if publications.is_empty() {
        return Err(CoreError::PublicationList(format!(
            "{} contains no publications",
            path.display()
        )));
    }

    Ok(publications)
}

fn normalize_id(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn non_empty(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_charset() {
        assert!(is_valid_key("smith-2015_a.1"));
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("bad/key"));
        assert!(!is_valid_key("spaced key"));
    }

    #[test]
    fn blank_identifiers_become_absent() {
        let dir = std::env::temp_dir().join(format!("pubmerge_pubs_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("pubs.json");
        std::fs::write(
            &path,
            r#"[{"key": " k1 ", "pmid": "  ", "doi": "10.1000/x"}]"#,
        )
        .unwrap();

        let publications = load_publications(&path).unwrap();
        assert_eq!(publications[0].key, "k1");
        assert_eq!(publications[0].pmid, None);
        assert_eq!(publications[0].doi.as_deref(), Some("10.1000/x"));
        assert!(publications[0].has_identifiers());
    }
}
