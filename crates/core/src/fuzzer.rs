//! Query Fuzzer
//!
//! Turns a noisy reference ("Task 1 2 3", "\"Dark mode\"") into a small set of
//! search variants, and splits text that names several records.

use regex::Regex;

use crate::classify::{count_connectives, has_plural_marker, normalize_phrase_text, PhraseTable};

/// Upper bound on variants sent to a store per reference
pub const MAX_VARIANTS: usize = 5;

const QUOTES: &[char] = &['"', '\'', '`', '“', '”', '‘', '’', '„', '«', '»'];

/// Ordered, deduplicated search variants for `text`, at most [`MAX_VARIANTS`].
pub fn variants(text: &str) -> Vec<String> {
    let trimmed = text.trim();
    let unquoted = strip_quotes(trimmed);
    let candidates = [
        trimmed.to_string(),
        unquoted.clone(),
        collapse_digit_spaces(&unquoted),
        unquoted.chars().filter(|c| !c.is_whitespace()).collect(),
        strip_punctuation(&unquoted),
    ];

    let mut out: Vec<String> = Vec::with_capacity(MAX_VARIANTS);
    for candidate in candidates {
        if candidate.is_empty() || out.contains(&candidate) {
            continue;
        }
        out.push(candidate);
        if out.len() == MAX_VARIANTS {
            break;
        }
    }
    out
}

fn strip_quotes(s: &str) -> String {
    s.chars().filter(|c| !QUOTES.contains(c)).collect::<String>().trim().to_string()
}

/// "1 2 3" → "123"; whitespace between two digits is dropped
fn collapse_digit_spaces(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() && out.chars().last().is_some_and(|p| p.is_ascii_digit()) {
            let mut j = i;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && chars[j].is_ascii_digit() {
                i = j;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }
    out
}

fn strip_punctuation(s: &str) -> String {
    let kept: String = s
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ============================================================================
// Multi-target splitting
// ============================================================================

/// Split a reference that names several records.
///
/// Semicolons and newlines always split. Commas and connective words only
/// split when the text carries a plural marker or at least two connectives.
/// Returns a single element otherwise.
pub fn split_multi_target(text: &str, table: &PhraseTable) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let hard: Vec<&str> = trimmed.split([';', '\n']).collect();
    let loose = has_plural_marker(trimmed, table) || count_connectives(trimmed, table) >= 2;

    let mut segments = Vec::new();
    for part in hard {
        if loose {
            segments.extend(split_on_connectives(part, table));
        } else {
            segments.push(part.to_string());
        }
    }

    let segments: Vec<String> = segments
        .into_iter()
        .map(|s| strip_leading_plural(&s, table))
        .filter(|s| !s.is_empty())
        .collect();

    if segments.is_empty() {
        vec![trimmed.to_string()]
    } else {
        segments
    }
}

fn split_on_connectives(text: &str, table: &PhraseTable) -> Vec<String> {
    let words: Vec<String> = table.connectives.iter().map(|c| regex::escape(c)).collect();
    let pattern = format!(r"(?i),|\s+(?:{})\s+", words.join("|"));
    match Regex::new(&pattern) {
        Ok(re) => re.split(text).map(|s| s.trim().to_string()).collect(),
        Err(_) => vec![text.trim().to_string()],
    }
}

/// "both Task A" → "Task A"
fn strip_leading_plural(segment: &str, table: &PhraseTable) -> String {
    let mut rest = segment.trim();
    loop {
        let Some((head, tail)) = rest.split_once(char::is_whitespace) else {
            break;
        };
        let word = normalize_phrase_text(head);
        if table.plural.iter().any(|p| *p == word) {
            rest = tail.trim_start();
        } else {
            break;
        }
    }
    rest.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variants_core_set() {
        let v = variants("  \"Invoice 1 2 3\"  ");
        assert_eq!(v[0], "\"Invoice 1 2 3\"");
        assert_eq!(v[1], "Invoice 1 2 3");
        assert!(v.contains(&"Invoice 123".to_string()));
        assert!(v.contains(&"Invoice123".to_string()));
        assert!(v.len() <= MAX_VARIANTS);
    }

    #[test]
    fn test_variants_deduplicated() {
        assert_eq!(variants("milk"), vec!["milk"]);
        assert_eq!(variants("Task A"), vec!["Task A", "TaskA"]);
        assert!(variants("   ").is_empty());
    }

    #[test]
    fn test_variants_punctuation() {
        let v = variants("call mom (urgent)!");
        assert!(v.contains(&"call mom urgent".to_string()));
    }

    #[test]
    fn test_collapse_digit_spaces_keeps_words() {
        assert_eq!(collapse_digit_spaces("room 4 1 2 b"), "room 412 b");
        assert_eq!(collapse_digit_spaces("a b"), "a b");
    }

    #[test]
    fn test_split_semicolon_always() {
        let t = PhraseTable::default();
        assert_eq!(split_multi_target("Task A; Task B", &t), vec!["Task A", "Task B"]);
    }

    #[test]
    fn test_split_single_connective_stays_whole() {
        let t = PhraseTable::default();
        assert_eq!(split_multi_target("salt and pepper", &t), vec!["salt and pepper"]);
    }

    #[test]
    fn test_split_with_plural_marker() {
        let t = PhraseTable::default();
        assert_eq!(
            split_multi_target("both Task A and Task B", &t),
            vec!["Task A", "Task B"]
        );
        assert_eq!(split_multi_target("A, B and C", &t), vec!["A", "B", "C"]);
        assert_eq!(split_multi_target("beide: Milch und Brot", &t).len(), 2);
    }
}
