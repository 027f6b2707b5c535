//! Text utilities: sentence splitting with exact byte spans, name and phrase
//! normalization, span lookup.

use serde::{Deserialize, Serialize};

/// Half-open byte range into the source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextSpan {
    pub start: usize,
    pub end: usize,
}

impl TextSpan {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shift a span found in a sub-slice back into document coordinates.
    pub fn offset(self, by: usize) -> Self {
        Self::new(self.start + by, self.end + by)
    }

    pub fn slice<'a>(&self, text: &'a str) -> &'a str {
        text.get(self.start..self.end).unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    pub index: usize,
    pub span: TextSpan,
    pub text: String,
}

fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

fn is_closer(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '"' | '\'' | ')' | '\u{201D}' | '\u{2019}')
}

/// Split text into sentences whose spans tile the input exactly: the first
/// starts at 0, each starts where the previous ended, the last ends at
/// `text.len()`. Trailing whitespace belongs to the preceding sentence.
/// Whitespace-only input yields no sentences.
pub fn split_sentences(text: &str) -> Vec<Sentence> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut bounds: Vec<(usize, usize)> = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i].1;
        let paragraph = c == '\n' && matches!(chars.get(i + 1), Some((_, '\n')));
        if !is_terminal(c) && !paragraph {
            i += 1;
            continue;
        }

        let mut j = i + 1;
        if !paragraph {
            while j < chars.len() && is_closer(chars[j].1) {
                j += 1;
            }
            // "3.5" or "e.g.x" are not boundaries
            if j < chars.len() && !chars[j].1.is_whitespace() {
                i = j;
                continue;
            }
        }
        while j < chars.len() && chars[j].1.is_whitespace() {
            j += 1;
        }
        let end = chars.get(j).map(|(b, _)| *b).unwrap_or(text.len());
        if !text[start..end].trim().is_empty() {
            bounds.push((start, end));
            start = end;
        }
        i = j;
    }

    if start < text.len() {
        if !text[start..].trim().is_empty() {
            bounds.push((start, text.len()));
        } else if let Some(last) = bounds.last_mut() {
            last.1 = text.len();
        }
    }

    bounds
        .into_iter()
        .enumerate()
        .map(|(index, (s, e))| Sentence {
            index,
            span: TextSpan::new(s, e),
            text: text[s..e].to_string(),
        })
        .collect()
}

const ARTICLES: &[&str] = &["the ", "a ", "an "];

const GENERIC_REFERENCES: &[&str] = &[
    "someone", "somebody", "anyone", "anybody", "everyone", "everybody", "no one", "nobody",
    "he", "she", "they", "it", "him", "her", "them", "i", "me", "we", "us", "you", "thing",
    "something", "people",
];

/// Lowercase, trim surrounding punctuation, collapse inner whitespace.
pub fn normalize_name(name: &str) -> String {
    let trimmed = name.trim_matches(|c: char| !c.is_alphanumeric());
    let trimmed = trimmed
        .strip_suffix("'s")
        .or_else(|| trimmed.strip_suffix("\u{2019}s"))
        .unwrap_or(trimmed);
    trimmed
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Drop one leading article from an already-normalized name.
pub fn strip_article(normalized: &str) -> &str {
    for article in ARTICLES {
        if let Some(rest) = normalized.strip_prefix(article) {
            if !rest.is_empty() {
                return rest;
            }
        }
    }
    normalized
}

/// Pronouns and indefinite references never name a Molecule.
pub fn is_generic_reference(name: &str) -> bool {
    let key = normalize_name(name);
    key.is_empty() || GENERIC_REFERENCES.contains(&strip_article(&key))
}

/// Cache key for a verb phrase: lowercase, single-spaced, no trailing punctuation.
pub fn normalize_phrase(phrase: &str) -> String {
    phrase
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| c.is_ascii_punctuation())
        .to_lowercase()
}

/// Locate `needle` in `haystack` at or after byte `from`; exact match first,
/// then ASCII case-insensitive. Offsets are preserved because only ASCII
/// letters are folded.
pub fn find_span(haystack: &str, needle: &str, from: usize) -> Option<TextSpan> {
    let needle = needle.trim();
    if needle.is_empty() || from > haystack.len() || !haystack.is_char_boundary(from) {
        return None;
    }
    if let Some(pos) = haystack[from..].find(needle) {
        return Some(TextSpan::new(from + pos, from + pos + needle.len()));
    }
    let folded_hay = haystack[from..].to_ascii_lowercase();
    let folded_needle = needle.to_ascii_lowercase();
    folded_hay
        .find(&folded_needle)
        .map(|pos| TextSpan::new(from + pos, from + pos + needle.len()))
}

/// First `n` characters of `text`, on a char boundary.
pub fn head_chars(text: &str, n: usize) -> &str {
    match text.char_indices().nth(n) {
        Some((b, _)) => &text[..b],
        None => text,
    }
}
