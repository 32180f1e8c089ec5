use futures::future::BoxFuture;

use pubmerge_core::models::IdKind;

use crate::error::{CollateError, Result};
use crate::sources::ApiSource;

/// Typed outcome of one identifier attempt. Kept alongside the overall
/// resolution so every failure path is individually observable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptResult {
    /// Identifier was empty or absent; no network call was made.
    Skipped,
    Success,
    NotFound,
    Transient(String),
    QuotaExceeded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub kind: IdKind,
    pub result: AttemptResult,
}

pub struct Resolution<T> {
    pub outcome: Result<T>,
    pub attempts: Vec<AttemptRecord>,
}

/// Try each identifier of the plan in order, stopping at the first success
/// or quota signal. The order is policy: the most specific identifier
/// (numeric database ID) comes before the less precise one (DOI) because it
/// yields a higher-confidence unique match at the source.
///
/// Exhausting the plan without a success resolves to `NotFound` — including
/// the degenerate plan where every identifier was absent, which therefore
/// costs no network call at all.
pub async fn resolve_identifiers<'a, T, F>(
    source: ApiSource,
    local_key: &str,
    plan: &[(IdKind, Option<&str>)],
    mut attempt: F,
) -> Resolution<T>
where
    T: 'a,
    F: FnMut(IdKind, String) -> BoxFuture<'a, Result<T>>,
{
    let mut attempts = Vec::with_capacity(plan.len());

    for (kind, value) in plan {
        let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
            attempts.push(AttemptRecord {
                kind: *kind,
                result: AttemptResult::Skipped,
            });
            continue;
        };

        match attempt(*kind, value.to_string()).await {
            Ok(found) => {
                attempts.push(AttemptRecord {
                    kind: *kind,
                    result: AttemptResult::Success,
                });
                return Resolution {
                    outcome: Ok(found),
                    attempts,
                };
            }
            Err(err @ CollateError::QuotaExceeded { .. }) => {
                attempts.push(AttemptRecord {
                    kind: *kind,
                    result: AttemptResult::QuotaExceeded,
                });
                return Resolution {
                    outcome: Err(err),
                    attempts,
                };
            }
            Err(CollateError::NotFound { .. }) => {
                tracing::info!(
                    source = source.name(),
                    local_key,
                    identifier = kind.as_str(),
                    "no match, falling back to next identifier"
                );
                attempts.push(AttemptRecord {
                    kind: *kind,
                    result: AttemptResult::NotFound,
                });
            }
            Err(err) => {
                tracing::warn!(
                    source = source.name(),
                    local_key,
                    identifier = kind.as_str(),
                    error = %err,
                    "attempt failed, falling back to next identifier"
                );
                attempts.push(AttemptRecord {
                    kind: *kind,
                    result: AttemptResult::Transient(err.to_string()),
                });
            }
        }
    }

    Resolution {
        outcome: Err(CollateError::NotFound {
            source_id: source.name(),
            local_key: local_key.to_string(),
        }),
        attempts,
    }
}
