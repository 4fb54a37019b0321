//! Option Normalizer
//!
//! Maps free-form values onto a field's legal options and decides what an
//! update does with each field: leave it, clear it, set it, merge it, drop it,
//! or create a new legal option first.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::classify::{has_create_marker, has_replace_marker, PhraseTable};
use crate::error::EngineError;
use crate::ports::OptionCatalog;
use crate::types::Domain;

/// Alias/containment matching needs at least this many key characters
const MIN_CONTAINMENT_LEN: usize = 3;

// ============================================================================
// Matching
// ============================================================================

/// Strip everything but letters and digits, case-fold
pub fn normalize_key(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Match one input against the legal options.
///
/// Order: exact (case-insensitive), normalized key, then alias token matched
/// by prefix/substring against the legal keys with the shortest key winning.
pub fn match_option(
    input: &str,
    legal: &[String],
    aliases: &HashMap<String, String>,
) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    let lowered = trimmed.to_lowercase();
    if let Some(hit) = legal.iter().find(|o| o.to_lowercase() == lowered) {
        return Some(hit.clone());
    }

    let key = normalize_key(trimmed);
    if key.is_empty() {
        return None;
    }
    if let Some(hit) = legal.iter().find(|o| normalize_key(o) == key) {
        return Some(hit.clone());
    }

    let token = aliases
        .get(&key)
        .map(|alias| normalize_key(alias))
        .unwrap_or(key);
    if let Some(hit) = legal.iter().find(|o| normalize_key(o) == token) {
        return Some(hit.clone());
    }
    if token.chars().count() < MIN_CONTAINMENT_LEN {
        return None;
    }

    legal
        .iter()
        .map(|o| (o, normalize_key(o)))
        .filter(|(_, legal_key)| {
            legal_key.starts_with(&token)
                || legal_key.contains(&token)
                || (legal_key.chars().count() >= MIN_CONTAINMENT_LEN && token.contains(legal_key.as_str()))
        })
        .min_by_key(|(_, legal_key)| legal_key.chars().count())
        .map(|(o, _)| o.clone())
}

/// Result of matching a multi-valued input
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiMatch {
    pub matched: Vec<String>,
    pub unmatched: Vec<String>,
}

/// Per-element matching; matched values are deduplicated in input order
pub fn match_many(inputs: &[String], legal: &[String], aliases: &HashMap<String, String>) -> MultiMatch {
    let mut result = MultiMatch::default();
    for input in inputs {
        match match_option(input, legal, aliases) {
            Some(hit) => {
                if !result.matched.contains(&hit) {
                    result.matched.push(hit);
                }
            }
            None => {
                if !input.trim().is_empty() {
                    result.unmatched.push(input.trim().to_string());
                }
            }
        }
    }
    result
}

/// Union of existing and incoming values, existing first, case-insensitive
pub fn merge_values(existing: Option<&Value>, incoming: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = match existing {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    };
    for value in incoming {
        if !merged.iter().any(|m| m.eq_ignore_ascii_case(value)) {
            merged.push(value.clone());
        }
    }
    merged
}

/// Legal options whose key (or an alias of it) appears as a word in `text`
pub fn options_mentioned_in(text: &str, legal: &[String], aliases: &HashMap<String, String>) -> Vec<String> {
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .map(normalize_key)
        .filter(|w| !w.is_empty())
        .collect();
    legal
        .iter()
        .filter(|option| {
            let key = normalize_key(option);
            words.iter().any(|word| {
                *word == key || aliases.get(word).map(|a| normalize_key(a) == key).unwrap_or(false)
            })
        })
        .cloned()
        .collect()
}

// ============================================================================
// Field Schemas
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Single,
    Multi,
}

/// An enumerated field of a domain
#[derive(Debug, Clone, Copy)]
pub struct OptionField {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required_on_create: bool,
}

const TASK_FIELDS: &[OptionField] = &[
    OptionField { name: "status", kind: FieldKind::Single, required_on_create: false },
    OptionField { name: "priority", kind: FieldKind::Single, required_on_create: false },
    OptionField { name: "tags", kind: FieldKind::Multi, required_on_create: false },
];

const IDEA_FIELDS: &[OptionField] = &[
    OptionField { name: "category", kind: FieldKind::Single, required_on_create: false },
    OptionField { name: "tags", kind: FieldKind::Multi, required_on_create: false },
];

const SOCIAL_FIELDS: &[OptionField] = &[
    OptionField { name: "platform", kind: FieldKind::Single, required_on_create: true },
    OptionField { name: "status", kind: FieldKind::Single, required_on_create: false },
];

const JOURNAL_FIELDS: &[OptionField] = &[
    OptionField { name: "mood", kind: FieldKind::Single, required_on_create: false },
    OptionField { name: "topics", kind: FieldKind::Multi, required_on_create: false },
];

pub fn option_fields(domain: Domain) -> &'static [OptionField] {
    match domain {
        Domain::Task => TASK_FIELDS,
        Domain::Idea => IDEA_FIELDS,
        Domain::Social => SOCIAL_FIELDS,
        Domain::Journal => JOURNAL_FIELDS,
    }
}

/// Argument keys that steer resolution and never reach a store
const CONTROL_KEYS: &[&str] = &[
    "domain", "query", "queryText", "query_text", "target", "queries", "targets", "autofill",
];

fn is_control_key(domain: Domain, key: &str) -> bool {
    CONTROL_KEYS.contains(&key) || domain.id_keys().contains(&key) || domain.index_keys().contains(&key)
}

// ============================================================================
// Field Normalization
// ============================================================================

/// Inputs that shape how unmatched and multi-valued fields are treated
pub struct NormalizeContext<'a> {
    pub raw_text: &'a str,
    pub phrases: &'a PhraseTable,
    pub aliases: &'a HashMap<String, String>,
}

/// A supplied value that matched no legal option and was dropped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dropped {
    pub field: String,
    pub value: String,
}

/// Normalized mutation fields
#[derive(Debug, Clone, Default)]
pub struct NormalizedFields {
    /// Fields to send; `Null` clears
    pub fields: Map<String, Value>,
    /// Multi-valued fields to union with the record's current values
    pub merge_fields: Vec<String>,
    pub dropped: Vec<Dropped>,
    /// Options created on the way, as (field, value)
    pub created: Vec<(String, String)>,
}

impl NormalizedFields {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn was_dropped(&self, field: &str) -> bool {
        self.dropped.iter().any(|d| d.field == field)
    }

    /// Encode merge instructions alongside the fields for later execution
    pub fn into_payload(self) -> Map<String, Value> {
        let mut payload = self.fields;
        if !self.merge_fields.is_empty() {
            payload.insert(
                MERGE_KEY.to_string(),
                Value::Array(self.merge_fields.into_iter().map(Value::String).collect()),
            );
        }
        payload
    }
}

/// Payload key listing multi-valued fields to merge at execution time
pub const MERGE_KEY: &str = "__merge";

fn string_items(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Value::Number(n) => vec![n.to_string()],
        _ => Vec::new(),
    }
}

/// Normalize every argument of a create/update intent.
///
/// Absent fields stay untouched, `null` clears, unmatched values are dropped
/// unless the raw text names the field (then the option is created first).
/// Multi-valued fields merge unless the raw text asks to replace.
pub async fn normalize_fields(
    domain: Domain,
    arguments: &Map<String, Value>,
    catalog: &dyn OptionCatalog,
    ctx: &NormalizeContext<'_>,
) -> NormalizedFields {
    let mut out = NormalizedFields::default();
    let schema = option_fields(domain);

    for (key, value) in arguments {
        if is_control_key(domain, key) {
            continue;
        }
        let Some(field) = schema.iter().find(|f| f.name == key) else {
            out.fields.insert(key.clone(), value.clone());
            continue;
        };

        if value.is_null() {
            out.fields.insert(key.clone(), Value::Null);
            continue;
        }

        let inputs = string_items(value);
        if inputs.is_empty() {
            // An explicit empty list clears a multi-valued field
            if field.kind == FieldKind::Multi && value.as_array().is_some() {
                out.fields.insert(key.clone(), Value::Array(Vec::new()));
            }
            continue;
        }

        let legal = catalog.legal_options(domain, field.name).await;
        let may_create = has_create_marker(ctx.raw_text, field.name, ctx.phrases);

        match field.kind {
            FieldKind::Single => {
                let input = &inputs[0];
                match match_option(input, &legal, ctx.aliases) {
                    Some(hit) => {
                        out.fields.insert(key.clone(), Value::String(hit));
                    }
                    None if may_create => match create(catalog, domain, field.name, input).await {
                        Some(created) => {
                            out.created.push((key.clone(), created.clone()));
                            out.fields.insert(key.clone(), Value::String(created));
                        }
                        None => drop_value(&mut out, key, input),
                    },
                    None => drop_value(&mut out, key, input),
                }
            }
            FieldKind::Multi => {
                let MultiMatch { mut matched, unmatched } = match_many(&inputs, &legal, ctx.aliases);
                for input in unmatched {
                    if may_create {
                        if let Some(created) = create(catalog, domain, field.name, &input).await {
                            out.created.push((key.clone(), created.clone()));
                            if !matched.contains(&created) {
                                matched.push(created);
                            }
                            continue;
                        }
                    }
                    drop_value(&mut out, key, &input);
                }
                if matched.is_empty() {
                    continue;
                }
                out.fields.insert(
                    key.clone(),
                    Value::Array(matched.into_iter().map(Value::String).collect()),
                );
                if !has_replace_marker(ctx.raw_text, ctx.phrases) {
                    out.merge_fields.push(key.clone());
                }
            }
        }
    }

    debug!(
        domain = %domain,
        fields = out.fields.len(),
        dropped = out.dropped.len(),
        created = out.created.len(),
        "normalized fields"
    );
    out
}

fn drop_value(out: &mut NormalizedFields, field: &str, value: &str) {
    let err = EngineError::OptionUnmatched {
        field: field.to_string(),
        value: value.to_string(),
    };
    debug!("dropping field: {}", err);
    out.dropped.push(Dropped {
        field: field.to_string(),
        value: value.to_string(),
    });
}

async fn create(catalog: &dyn OptionCatalog, domain: Domain, field: &str, value: &str) -> Option<String> {
    match catalog.create_option(domain, field, value).await {
        Ok(created) => Some(created),
        Err(e) => {
            warn!(domain = %domain, field, value, "failed to create option: {:#}", e);
            None
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
