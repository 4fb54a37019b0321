//! Heuristic text classifiers
//!
//! Pure keyword-based detection used by the resolver, normalizer, gateway and
//! executor. All phrase lists live in a [`PhraseTable`] so a locale can be
//! swapped without touching resolution logic. The default table covers
//! English and German.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

// ============================================================================
// Phrase Table
// ============================================================================

/// Locale-specific phrase lists. Entries are matched on whole words against
/// normalized text (see [`normalize_phrase_text`]).
#[derive(Debug, Clone)]
pub struct PhraseTable {
    pub affirmative: Vec<String>,
    pub negative: Vec<String>,
    /// Marks a reply as an edit request ("yes, but make it tomorrow")
    pub edit: Vec<String>,
    /// Multi-value updates replace instead of merge
    pub replace: Vec<String>,
    /// Autofill overwrites filled fields
    pub overwrite: Vec<String>,
    /// Signals that a reference names several records
    pub plural: Vec<String>,
    /// Words joining several references
    pub connectives: Vec<String>,
    /// Ordinal words with their 1-based value
    pub ordinals: Vec<(String, usize)>,
    /// Field name → words that allow creating a new legal option
    pub create_markers: Vec<(String, Vec<String>)>,
    pub affirmative_symbols: Vec<String>,
    pub negative_symbols: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for PhraseTable {
    fn default() -> Self {
        Self {
            affirmative: strings(&[
                "yes", "y", "yeah", "yep", "yup", "sure", "ok", "okay", "confirm", "do it",
                "go ahead", "please do", "correct", "sounds good", "ja", "jep", "klar", "genau",
                "mach", "mach es", "passt", "bestätige", "bestaetige",
            ]),
            negative: strings(&[
                "no", "n", "nope", "cancel", "stop", "dont", "abort", "never mind", "nevermind",
                "forget it", "nein", "abbrechen", "lass es", "nicht",
            ]),
            edit: strings(&[
                "instead", "rather", "change", "make it", "actually", "stattdessen", "lieber",
                "ändere", "aendere",
            ]),
            replace: strings(&[
                "replace", "only these", "only this", "clear", "overwrite", "reset",
                "ersetze", "nur diese", "nur noch",
            ]),
            overwrite: strings(&[
                "overwrite", "all fields", "everything", "redo", "from scratch", "überschreibe",
                "ueberschreibe", "alles neu",
            ]),
            plural: strings(&[
                "them", "both", "all", "these", "those", "each", "tasks", "ideas", "posts",
                "entries", "beide", "beiden", "alle", "diese",
            ]),
            connectives: strings(&["and", "&", "und", "sowie"]),
            ordinals: [
                ("first", 1), ("second", 2), ("third", 3), ("fourth", 4), ("fifth", 5),
                ("sixth", 6), ("seventh", 7), ("eighth", 8), ("ninth", 9), ("tenth", 10),
                ("erste", 1), ("ersten", 1), ("zweite", 2), ("zweiten", 2), ("dritte", 3),
                ("dritten", 3), ("vierte", 4), ("vierten", 4), ("fünfte", 5), ("fünften", 5),
            ]
            .into_iter()
            .map(|(word, n)| (word.to_string(), n))
            .collect(),
            create_markers: vec![
                ("tags".to_string(), strings(&["tag", "tags", "hashtag", "label", "#"])),
                ("category".to_string(), strings(&["category", "kategorie"])),
                ("topics".to_string(), strings(&["topic", "topics", "thema", "themen"])),
            ],
            affirmative_symbols: strings(&["👍", "✅", "👌"]),
            negative_symbols: strings(&["👎", "❌", "🚫"]),
        }
    }
}

// ============================================================================
// Normalization
// ============================================================================

/// Lowercase, drop apostrophes, turn other punctuation into spaces, collapse
/// whitespace. `#` survives so it can act as a marker.
pub fn normalize_phrase_text(text: &str) -> String {
    let mapped: String = text
        .to_lowercase()
        .chars()
        .filter(|c| *c != '\'' && *c != '’')
        .map(|c| if c.is_alphanumeric() || c == '#' || c == '&' { c } else { ' ' })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whole-word phrase containment on normalized text
fn contains_phrase(normalized: &str, phrase: &str) -> bool {
    let phrase = normalize_phrase_text(phrase);
    if phrase.is_empty() {
        return false;
    }
    format!(" {} ", normalized).contains(&format!(" {} ", phrase))
}

fn contains_any(normalized: &str, phrases: &[String]) -> bool {
    phrases.iter().any(|p| contains_phrase(normalized, p))
}

// ============================================================================
// Reply Classification
// ============================================================================

/// How a free-text reply relates to the pending confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyDecision {
    Confirm,
    Cancel,
    Edit,
    Unknown,
}

/// Longer replies are left to an external classifier
const MAX_RULE_WORDS: usize = 6;

/// Rule-based affirmation/negation detection. Edit wording wins over any
/// polarity. Returns `Unknown` when the reply is long, mixed, or carries no
/// known phrase.
pub fn classify_reply(text: &str, table: &PhraseTable) -> ReplyDecision {
    let trimmed = text.trim();
    if table.affirmative_symbols.iter().any(|s| trimmed == s) {
        return ReplyDecision::Confirm;
    }
    if table.negative_symbols.iter().any(|s| trimmed == s) {
        return ReplyDecision::Cancel;
    }

    let normalized = normalize_phrase_text(trimmed);
    if normalized.is_empty() {
        return ReplyDecision::Unknown;
    }

    if contains_any(&normalized, &table.edit) {
        return ReplyDecision::Edit;
    }
    if normalized.split(' ').count() > MAX_RULE_WORDS {
        return ReplyDecision::Unknown;
    }

    let affirmative = contains_any(&normalized, &table.affirmative);
    let negative = contains_any(&normalized, &table.negative);
    match (affirmative, negative) {
        (true, false) => ReplyDecision::Confirm,
        (false, true) => ReplyDecision::Cancel,
        _ => ReplyDecision::Unknown,
    }
}

// ============================================================================
// Markers
// ============================================================================

pub fn has_replace_marker(text: &str, table: &PhraseTable) -> bool {
    contains_any(&normalize_phrase_text(text), &table.replace)
}

pub fn has_overwrite_marker(text: &str, table: &PhraseTable) -> bool {
    contains_any(&normalize_phrase_text(text), &table.overwrite)
}

pub fn has_plural_marker(text: &str, table: &PhraseTable) -> bool {
    contains_any(&normalize_phrase_text(text), &table.plural)
}

/// Number of connective words plus commas
pub fn count_connectives(text: &str, table: &PhraseTable) -> usize {
    let normalized = normalize_phrase_text(text);
    let words = normalized
        .split(' ')
        .filter(|w| table.connectives.iter().any(|c| c == w))
        .count();
    words + text.matches(',').count()
}

/// Whether the raw text explicitly mentions `field` (e.g. "tag", "category")
/// and therefore allows creating a new legal option for it.
pub fn has_create_marker(text: &str, field: &str, table: &PhraseTable) -> bool {
    let Some((_, markers)) = table.create_markers.iter().find(|(f, _)| f == field) else {
        return false;
    };
    let normalized = normalize_phrase_text(text);
    markers.iter().any(|m| {
        if m == "#" {
            text.contains('#')
        } else {
            contains_phrase(&normalized, m)
        }
    })
}

// ============================================================================
// Index Inference
// ============================================================================

fn index_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:#|\b(?:number|nr\.?|no\.|item|entry|nummer|eintrag)\s*)(\d{1,2})\b|\b(\d{1,2})(?:st|nd|rd|th)\b")
            .expect("Invalid regex")
    })
}

/// Infer a 1-based list index from free text: "#2", "number 2", "2nd",
/// "the second one", or a bare number.
pub fn infer_index(text: &str, table: &PhraseTable) -> Option<usize> {
    let trimmed = text.trim();
    if let Ok(n) = trimmed.trim_end_matches('.').parse::<usize>() {
        return (n > 0).then_some(n);
    }

    if let Some(caps) = index_regex().captures(trimmed) {
        let digits = caps.get(1).or_else(|| caps.get(2))?;
        let n: usize = digits.as_str().parse().ok()?;
        return (n > 0).then_some(n);
    }

    let normalized = normalize_phrase_text(trimmed);
    normalized.split(' ').find_map(|word| {
        table
            .ordinals
            .iter()
            .find(|(ordinal, _)| ordinal == word)
            .map(|(_, n)| *n)
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> PhraseTable {
        PhraseTable::default()
    }

    #[test]
    fn test_normalize_phrase_text() {
        assert_eq!(normalize_phrase_text("  Don't   DO it!! "), "dont do it");
        assert_eq!(normalize_phrase_text("#work, please"), "#work please");
    }

    #[test]
    fn test_classify_affirmative() {
        assert_eq!(classify_reply("Yes", &table()), ReplyDecision::Confirm);
        assert_eq!(classify_reply("ok, go ahead", &table()), ReplyDecision::Confirm);
        assert_eq!(classify_reply("Ja, passt", &table()), ReplyDecision::Confirm);
        assert_eq!(classify_reply("👍", &table()), ReplyDecision::Confirm);
    }

    #[test]
    fn test_classify_negative() {
        assert_eq!(classify_reply("no", &table()), ReplyDecision::Cancel);
        assert_eq!(classify_reply("Don't!", &table()), ReplyDecision::Cancel);
        assert_eq!(classify_reply("nein, abbrechen", &table()), ReplyDecision::Cancel);
    }

    #[test]
    fn test_classify_word_boundaries() {
        // "yesterday" must not read as "yes"
        assert_eq!(classify_reply("yesterday", &table()), ReplyDecision::Unknown);
        assert_eq!(classify_reply("nothing", &table()), ReplyDecision::Unknown);
    }

    #[test]
    fn test_classify_edit_and_mixed() {
        assert_eq!(
            classify_reply("no, make it the blue one instead", &table()),
            ReplyDecision::Edit
        );
        assert_eq!(classify_reply("yes no", &table()), ReplyDecision::Unknown);
        assert_eq!(
            classify_reply("yes, but make it tomorrow instead", &table()),
            ReplyDecision::Edit
        );
        assert_eq!(classify_reply("ok change it to High", &table()), ReplyDecision::Edit);
        assert_eq!(classify_reply("sure, actually rename it", &table()), ReplyDecision::Edit);
        assert_eq!(
            classify_reply("ok but what about the other list I sent you earlier today", &table()),
            ReplyDecision::Unknown
        );
    }

    #[test]
    fn test_markers() {
        let t = table();
        assert!(has_replace_marker("replace the tags with ux", &t));
        assert!(has_replace_marker("nur diese tags", &t));
        assert!(!has_replace_marker("add ux tag", &t));
        assert!(!has_replace_marker("add tag work, only for today", &t));
        assert!(has_replace_marker("only these tags: ux", &t));
        assert!(has_overwrite_marker("autofill and overwrite", &t));
        assert!(!has_overwrite_marker("autofill it", &t));
        assert!(has_plural_marker("delete them", &t));
        assert!(!has_plural_marker("delete the thematic one", &t));
    }

    #[test]
    fn test_count_connectives() {
        let t = table();
        assert_eq!(count_connectives("Task A and Task B", &t), 1);
        assert_eq!(count_connectives("A, B and C", &t), 2);
        assert_eq!(count_connectives("Sand castle", &t), 0);
    }

    #[test]
    fn test_create_markers() {
        let t = table();
        assert!(has_create_marker("add the tag deepwork", "tags", &t));
        assert!(has_create_marker("add #deepwork", "tags", &t));
        assert!(has_create_marker("neue Kategorie Reisen", "category", &t));
        assert!(!has_create_marker("set priority to urgent-ish", "priority", &t));
        assert!(!has_create_marker("mark it deepwork", "tags", &t));
    }

    #[test]
    fn test_infer_index() {
        let t = table();
        assert_eq!(infer_index("2", &t), Some(2));
        assert_eq!(infer_index("mark #3 as done", &t), Some(3));
        assert_eq!(infer_index("delete number 4", &t), Some(4));
        assert_eq!(infer_index("the 2nd one", &t), Some(2));
        assert_eq!(infer_index("the second one please", &t), Some(2));
        assert_eq!(infer_index("die dritte bitte", &t), Some(3));
        assert_eq!(infer_index("0", &t), None);
        assert_eq!(infer_index("buy milk", &t), None);
    }
}
