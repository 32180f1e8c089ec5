use serde_json::Value;

use pubmerge_core::models::{
    FieldConflict, MergedAuthor, MergedRecord, MergedTag, Provenanced, SourceRecord,
};

/// Fixed source ranking for conflict resolution. Earlier entries win;
/// sources missing from the ranking sort after all ranked ones.
#[derive(Debug, Clone)]
pub struct SourcePriority {
    order: Vec<String>,
}

impl SourcePriority {
    pub fn new(order: &[String]) -> Self {
        Self {
            order: order.iter().map(|s| s.trim().to_lowercase()).collect(),
        }
    }

    pub fn rank(&self, source: &str) -> usize {
        let source = source.to_lowercase();
        self.order
            .iter()
            .position(|candidate| *candidate == source)
            .unwrap_or(self.order.len())
    }
}

/// Comparison key for set-valued fields: case-insensitive with collapsed
/// whitespace, so "Cancer" and " cancer " are one entry.
pub fn normalized_key(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Reconcile one publication's normalized records into the canonical
/// record. Contributions are folded in priority order (query order is
/// irrelevant), so the same input set always produces a byte-identical
/// record:
///
/// - singleton fields keep the highest-priority value and record every
///   disagreeing lower-priority value as a conflict;
/// - set fields union with de-duplication by [`normalized_key`], keeping
///   the highest-priority spelling and OR-ing the major-topic flag.
///
/// `complete` and `sources_failed` are the caller's to fill in: only the
/// driver knows which enabled sources failed.
pub fn merge_records(
    local_key: &str,
    records: &[SourceRecord],
    priority: &SourcePriority,
) -> MergedRecord {
    let mut ordered: Vec<&SourceRecord> = records.iter().collect();
    ordered.sort_by(|a, b| {
        priority
            .rank(&a.source)
            .cmp(&priority.rank(&b.source))
            .then_with(|| a.source.cmp(&b.source))
    });

    let mut merged = MergedRecord::new(local_key);
    let mut conflicts = Vec::new();

    merged.title = pick(&ordered, "title", &mut conflicts, |r| {
        clean(r.title.as_deref())
    });
    merged.journal = pick(&ordered, "journal", &mut conflicts, |r| {
        clean(r.journal.as_deref())
    });
    merged.year = pick(&ordered, "year", &mut conflicts, |r| r.year);
    merged.abstract_text = pick(&ordered, "abstract_text", &mut conflicts, |r| {
        clean(r.abstract_text.as_deref())
    });
    merged.citation_count = pick(&ordered, "citation_count", &mut conflicts, |r| {
        r.citation_count
    });

    merged.identifiers.pmid = pick(&ordered, "identifiers.pmid", &mut conflicts, |r| {
        clean(r.identifiers.pmid.as_deref())
    });
    merged.identifiers.doi = pick(&ordered, "identifiers.doi", &mut conflicts, |r| {
        clean(r.identifiers.doi.as_deref())
    });
    merged.identifiers.scopus_id = pick(&ordered, "identifiers.scopus_id", &mut conflicts, |r| {
        clean(r.identifiers.scopus_id.as_deref())
    });

    for record in &ordered {
        for name in &record.authors {
            let key = normalized_key(name);
            if key.is_empty() {
                continue;
            }
            match merged
                .authors
                .iter_mut()
                .find(|author| normalized_key(&author.name) == key)
            {
                Some(existing) => push_source(&mut existing.sources, &record.source),
                None => merged.authors.push(MergedAuthor {
                    name: name.trim().to_string(),
                    sources: vec![record.source.clone()],
                }),
            }
        }

        for tag in &record.subject_tags {
            let key = normalized_key(&tag.term);
            if key.is_empty() {
                continue;
            }
            match merged
                .subject_tags
                .iter_mut()
                .find(|existing| normalized_key(&existing.term) == key)
            {
                Some(existing) => {
                    existing.major_topic |= tag.major_topic;
                    push_source(&mut existing.sources, &record.source);
                }
                None => merged.subject_tags.push(MergedTag {
                    term: tag.term.trim().to_string(),
                    major_topic: tag.major_topic,
                    sources: vec![record.source.clone()],
                }),
            }
        }
    }

    merged.sources_merged = ordered.iter().map(|r| r.source.clone()).collect();
    merged.sources_merged.dedup();
    merged.conflicts = conflicts;
    merged
}

/// First non-empty value in priority order wins; later values that
/// disagree are appended to the conflict list with their source.
fn pick<T, F>(
    ordered: &[&SourceRecord],
    field: &str,
    conflicts: &mut Vec<FieldConflict>,
    accessor: F,
) -> Option<Provenanced<T>>
where
    T: Clone + PartialEq + serde::Serialize,
    F: Fn(&SourceRecord) -> Option<T>,
{
    let mut winner: Option<Provenanced<T>> = None;

    for record in ordered {
        let Some(value) = accessor(record) else {
            continue;
        };
        match &winner {
            None => winner = Some(Provenanced::new(value, record.source.clone())),
            Some(current) if !values_agree(&current.value, &value) => {
                conflicts.push(FieldConflict {
                    field: field.to_string(),
                    source: record.source.clone(),
                    value: serde_json::to_value(&value).unwrap_or(Value::Null),
                });
            }
            Some(_) => {}
        }
    }

    winner
}

fn values_agree<T: serde::Serialize + PartialEq>(a: &T, b: &T) -> bool {
    if a == b {
        return true;
    }
    // Spelling-only differences (case, whitespace) are not disagreements.
    match (serde_json::to_value(a), serde_json::to_value(b)) {
        (Ok(Value::String(a)), Ok(Value::String(b))) => normalized_key(&a) == normalized_key(&b),
        _ => false,
    }
}

fn clean(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToOwned::to_owned)
}

fn push_source(sources: &mut Vec<String>, source: &str) {
    if !sources.iter().any(|existing| existing == source) {
        sources.push(source.to_string());
    }
}

#[cfg(test)]
mod tests {
    use pubmerge_core::models::SubjectTag;

    use super::*;

    fn priority(order: &[&str]) -> SourcePriority {
        SourcePriority::new(&order.iter().map(|s| s.to_string()).collect::<Vec<_>>())
    }

    fn record(source: &str) -> SourceRecord {
        SourceRecord::new("k1", source)
    }

    #[test]
    fn higher_priority_source_wins_and_conflict_is_recorded() {
        let a = SourceRecord {
            title: Some("X".to_string()),
            year: Some(2001),
            ..record("pubmed")
        };
        let b = SourceRecord {
            title: Some("Y".to_string()),
            year: Some(2001),
            ..record("scopus")
        };

        let merged = merge_records("k1", &[a, b], &priority(&["pubmed", "scopus"]));

        let title = merged.title.unwrap();
        assert_eq!(title.value, "X");
        assert_eq!(title.source, "pubmed");

        assert_eq!(merged.conflicts.len(), 1);
        assert_eq!(merged.conflicts[0].field, "title");
        assert_eq!(merged.conflicts[0].source, "scopus");
        assert_eq!(merged.conflicts[0].value, serde_json::json!("Y"));

        // Agreeing years are not a conflict.
        assert_eq!(merged.year.unwrap().value, 2001);
    }

    #[test]
    fn merge_is_independent_of_input_order() {
        let a = SourceRecord {
            title: Some("X".to_string()),
            ..record("pubmed")
        };
        let b = SourceRecord {
            title: Some("Y".to_string()),
            citation_count: Some(7),
            ..record("scopus")
        };
        let priority = priority(&["pubmed", "scopus"]);

        let forward = merge_records("k1", &[a.clone(), b.clone()], &priority);
        let reverse = merge_records("k1", &[b, a], &priority);

        assert_eq!(
            serde_json::to_vec(&forward).unwrap(),
            serde_json::to_vec(&reverse).unwrap()
        );
        assert_eq!(forward.title.unwrap().value, "X");
        assert_eq!(forward.citation_count.unwrap().source, "scopus");
    }

    #[test]
    fn tags_deduplicate_case_insensitively_and_or_major_topic() {
        let a = SourceRecord {
            subject_tags: vec![SubjectTag::new("Cancer", false)],
            ..record("pubmed")
        };
        let b = SourceRecord {
            subject_tags: vec![SubjectTag::new("cancer", true)],
            ..record("zotero")
        };

        let merged = merge_records("k1", &[a, b], &priority(&["pubmed", "zotero"]));

        assert_eq!(merged.subject_tags.len(), 1);
        let tag = &merged.subject_tags[0];
        assert_eq!(tag.term, "Cancer");
        assert!(tag.major_topic);
        assert_eq!(tag.sources, vec!["pubmed", "zotero"]);
    }

    #[test]
    fn authors_union_with_whitespace_collapsed_dedup() {
        let a = SourceRecord {
            authors: vec!["Butters, Olly".to_string(), "Garner, Hugh".to_string()],
            ..record("pubmed")
        };
        let b = SourceRecord {
            authors: vec!["butters,  olly".to_string(), "Wilson, Becca".to_string()],
            ..record("scopus")
        };

        let merged = merge_records("k1", &[a, b], &priority(&["pubmed", "scopus"]));

        let names: Vec<&str> = merged.authors.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["Butters, Olly", "Garner, Hugh", "Wilson, Becca"]);
        assert_eq!(merged.authors[0].sources, vec!["pubmed", "scopus"]);
    }

    #[test]
    fn unranked_sources_sort_after_ranked_ones() {
        let a = SourceRecord {
            title: Some("From the ranked source".to_string()),
            ..record("scopus")
        };
        let b = SourceRecord {
            title: Some("From an unknown source".to_string()),
            ..record("mystery")
        };

        let merged = merge_records("k1", &[b, a], &priority(&["scopus"]));
        assert_eq!(merged.title.unwrap().source, "scopus");
        assert_eq!(merged.sources_merged, vec!["scopus", "mystery"]);
    }

    #[test]
    fn spelling_only_differences_are_not_conflicts() {
        let a = SourceRecord {
            journal: Some("International Journal of Epidemiology".to_string()),
            ..record("pubmed")
        };
        let b = SourceRecord {
            journal: Some("international  journal of epidemiology".to_string()),
            ..record("scopus")
        };

        let merged = merge_records("k1", &[a, b], &priority(&["pubmed", "scopus"]));
        assert!(merged.conflicts.is_empty());
    }

    #[test]
    fn filename_and_key_are_always_populated() {
        let merged = merge_records("k9", &[], &priority(&["pubmed"]));
        assert_eq!(merged.local_key, "k9");
        assert_eq!(merged.filename, "k9.json");
    }
}
