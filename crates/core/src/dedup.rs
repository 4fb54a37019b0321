//! Dedup Guard
//!
//! Checks a new record's title against active records of the same domain
//! before anything is created.

use tracing::debug;

use crate::error::MutationError;
use crate::ports::RecordStore;
use crate::types::Record;

/// Case-fold, strip punctuation, collapse whitespace
pub fn normalize_title(title: &str) -> String {
    let kept: String = title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First active record whose normalized title equals `title`'s.
pub async fn find_duplicate(
    store: &dyn RecordStore,
    title: &str,
    limit: usize,
) -> Result<Option<Record>, MutationError> {
    let wanted = normalize_title(title);
    if wanted.is_empty() {
        return Ok(None);
    }

    let mut queries = vec![title.trim().to_string()];
    if wanted != title.trim() {
        queries.push(wanted.clone());
    }

    for query in queries {
        let hits = store.find(&query, limit).await?;
        if let Some(hit) = hits
            .into_iter()
            .find(|r| r.is_active() && normalize_title(&r.title) == wanted)
        {
            debug!(domain = %store.domain(), id = %hit.id, "duplicate title");
            return Ok(Some(hit));
        }
    }
    Ok(None)
}
