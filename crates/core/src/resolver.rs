//! Entity Resolver
//!
//! Resolves an intent's reference to exactly one record, a capped candidate
//! list, or nothing. Precedence:
//!
//! 1. explicit id argument
//! 2. 1-based index (argument or raw text) into the recently shown list
//! 3. free-text query, fuzzed into variants and run against the store
//! 4. for batch-capable kinds, the query is split and the remainder queued

use std::collections::VecDeque;

use serde_json::Value;
use tracing::debug;

use crate::classify::{infer_index, PhraseTable};
use crate::config::EngineSettings;
use crate::error::MutationError;
use crate::fuzzer::{split_multi_target, variants};
use crate::ports::{RecordStore, ShownLists};
use crate::types::{Candidate, ConversationId, Domain, Intent, Record, ResolvedTarget};

/// Argument keys carrying a free-text reference
const QUERY_KEYS: &[&str] = &["query", "queryText", "query_text", "target"];

/// Argument keys carrying several references at once
const MULTI_QUERY_KEYS: &[&str] = &["queries", "targets"];

/// Raw text longer than this is never read as an index reference
const MAX_INDEX_TEXT_WORDS: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Single(ResolvedTarget),
    Candidates(Vec<Candidate>),
    Empty,
}

/// Result of resolving one intent or one queue step
#[derive(Debug, Clone)]
pub struct Resolved {
    pub resolution: Resolution,
    /// The reference that was searched, for user-facing messages
    pub reference: Option<String>,
    /// References still to process after this one
    pub queue: VecDeque<String>,
}

impl Resolved {
    fn direct(resolution: Resolution) -> Self {
        Self {
            resolution,
            reference: None,
            queue: VecDeque::new(),
        }
    }
}

/// Everything the resolver reads besides the intent
pub struct ResolveContext<'a> {
    pub conversation: &'a ConversationId,
    pub domain: Domain,
    pub store: &'a dyn RecordStore,
    pub shown: &'a dyn ShownLists,
    pub phrases: &'a PhraseTable,
    pub settings: &'a EngineSettings,
}

/// Resolve the target reference of `intent`.
pub async fn resolve(intent: &Intent, ctx: &ResolveContext<'_>) -> Result<Resolved, MutationError> {
    let domain = ctx.domain;

    // 1. Explicit id
    if let Some(id) = id_argument(intent, domain) {
        debug!(domain = %domain, id = %id, "resolved by explicit id");
        let target = match ctx.store.get(&id).await {
            Ok(Some(record)) => record.as_target(domain),
            Ok(None) => ResolvedTarget { id: id.clone(), title: id, domain },
            Err(e) => {
                debug!("lookup of explicit id failed: {}", e);
                ResolvedTarget { id: id.clone(), title: id, domain }
            }
        };
        return Ok(Resolved::direct(Resolution::Single(target)));
    }

    let query = query_argument(intent);

    // 2. Index into the shown list
    let explicit_index = index_argument(intent, domain);
    let inferred_index = if explicit_index.is_none() && query.is_none() {
        index_from_text(&intent.raw_text, ctx.phrases)
    } else {
        None
    };
    if let Some(index) = explicit_index.or(inferred_index) {
        let shown = ctx.shown.shown(ctx.conversation, domain);
        if let Some(item) = shown.iter().find(|item| item.index == index) {
            debug!(domain = %domain, index, id = %item.id, "resolved by shown-list index");
            return Ok(Resolved::direct(Resolution::Single(ResolvedTarget {
                id: item.id.clone(),
                title: item.title.clone(),
                domain,
            })));
        }
        if explicit_index.is_some() {
            debug!(domain = %domain, index, shown = shown.len(), "index not in shown list");
            return Ok(Resolved {
                resolution: Resolution::Empty,
                reference: Some(format!("#{}", index)),
                queue: VecDeque::new(),
            });
        }
    }

    // 3./4. Free-text query, split for batch kinds
    let references = if intent.kind.is_batch_capable() {
        match multi_query_argument(intent) {
            Some(list) => list,
            None => query
                .as_deref()
                .map(|q| split_multi_target(q, ctx.phrases))
                .unwrap_or_default(),
        }
    } else {
        query.into_iter().collect()
    };

    if references.is_empty() {
        debug!(domain = %domain, kind = %intent.kind, "no reference to resolve");
        return Ok(Resolved::direct(Resolution::Empty));
    }

    resolve_queue(references.into(), ctx).await
}

/// Resolve the front of `queue`, moving on to the next reference whenever one
/// matches nothing. The queue only ever shrinks.
pub async fn resolve_queue(
    mut queue: VecDeque<String>,
    ctx: &ResolveContext<'_>,
) -> Result<Resolved, MutationError> {
    let mut first_reference = None;
    while let Some(reference) = queue.pop_front() {
        let resolution = search(&reference, ctx).await?;
        if resolution != Resolution::Empty {
            return Ok(Resolved {
                resolution,
                reference: Some(reference),
                queue,
            });
        }
        debug!(domain = %ctx.domain, reference = %reference, remaining = queue.len(), "reference matched nothing");
        first_reference.get_or_insert(reference);
    }
    Ok(Resolved {
        resolution: Resolution::Empty,
        reference: first_reference,
        queue,
    })
}

/// Run the fuzzed variants of one reference against the store.
async fn search(reference: &str, ctx: &ResolveContext<'_>) -> Result<Resolution, MutationError> {
    let mut merged: Vec<Record> = Vec::new();

    for (tried, variant) in variants(reference).iter().enumerate() {
        let hits = ctx.store.find(variant, ctx.settings.find_limit).await?;
        debug!(variant = %variant, hits = hits.len(), "query variant");

        if hits.len() == 1 {
            return Ok(Resolution::Single(hits[0].as_target(ctx.domain)));
        }
        for hit in hits {
            if !merged.iter().any(|r| r.id == hit.id) {
                merged.push(hit);
            }
        }
        if tried + 1 >= ctx.settings.min_variants_before_stop && merged.len() >= 2 {
            break;
        }
    }

    Ok(match merged.len() {
        0 => Resolution::Empty,
        1 => Resolution::Single(merged[0].as_target(ctx.domain)),
        _ => Resolution::Candidates(to_candidates(merged, ctx.settings.max_candidates())),
    })
}

/// 1-based candidates in discovery order, capped
pub fn to_candidates(records: Vec<Record>, cap: usize) -> Vec<Candidate> {
    records
        .into_iter()
        .take(cap)
        .enumerate()
        .map(|(i, record)| Candidate {
            index: i + 1,
            id: record.id,
            title: record.title,
        })
        .collect()
}

// ============================================================================
// Argument extraction
// ============================================================================

fn id_argument(intent: &Intent, domain: Domain) -> Option<String> {
    domain.id_keys().iter().find_map(|key| match intent.arguments.get(*key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn index_argument(intent: &Intent, domain: Domain) -> Option<usize> {
    domain.index_keys().iter().find_map(|key| match intent.arguments.get(*key) {
        Some(Value::Number(n)) => n.as_u64().map(|n| n as usize).filter(|n| *n > 0),
        Some(Value::String(s)) => s.trim().trim_start_matches('#').parse::<usize>().ok().filter(|n| *n > 0),
        _ => None,
    })
}

/// Update kinds use `title` for the new title, so it only counts as a
/// reference for the other kinds.
fn query_argument(intent: &Intent) -> Option<String> {
    intent.str_arg(QUERY_KEYS).or_else(|| {
        if intent.kind.is_update() || intent.kind.is_create() {
            None
        } else {
            intent.str_arg(&["title"])
        }
    })
}

fn multi_query_argument(intent: &Intent) -> Option<Vec<String>> {
    MULTI_QUERY_KEYS.iter().find_map(|key| {
        let items: Vec<String> = intent
            .arguments
            .get(*key)?
            .as_array()?
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        (!items.is_empty()).then_some(items)
    })
}

fn index_from_text(raw_text: &str, phrases: &PhraseTable) -> Option<usize> {
    if raw_text.split_whitespace().count() > MAX_INDEX_TEXT_WORDS {
        return None;
    }
    infer_index(raw_text, phrases)
}
