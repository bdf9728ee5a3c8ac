//! # Keyword Parsing
//!
//! Two independent passes over user-typed search text:
//!
//! * [`KeywordParser`] pulls the advanced syntax (`author:NAME`,
//!   `"exact phrase"`, `-excluded`) out of a single free-form query string.
//! * [`parse_keyword_groups`] reads the grouping convention shared by the
//!   parsed leftover text and the structured `keywords` field: commas separate
//!   AND groups, slashes separate OR alternatives, quotes mark exact phrases.

const MAX_QUERY_CHARS: usize = 500;
const AUTHOR_PREFIX: &str = "author:";

/// Output of [`KeywordParser::parse`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedKeywords {
    pub author_name: Option<String>,
    pub include_phrases: Vec<String>,
    pub exclude_terms: Vec<String>,
    pub remaining_text: String,
}

pub struct KeywordParser;

impl KeywordParser {
    /// Removes control characters (keeping `\n`, `\r`, `\t`), caps the length
    /// and trims the result.
    pub fn sanitize(text: &str) -> String {
        let cleaned: String = text
            .chars()
            .filter(|c| (*c as u32) >= 32 || matches!(c, '\n' | '\r' | '\t'))
            .take(MAX_QUERY_CHARS)
            .collect();
        cleaned.trim().to_string()
    }

    /// Splits one search string into its author filter, exact phrases,
    /// excluded terms and leftover text.
    ///
    /// The three forms are scanned in order (author, phrase, exclusion) and
    /// every match marks its characters as consumed; a later form whose first
    /// character is already consumed is skipped. When several `author:` forms
    /// are present the last one wins.
    pub fn parse(query: &str) -> ParsedKeywords {
        let chars: Vec<char> = query.trim().chars().collect();
        if chars.is_empty() {
            return ParsedKeywords::default();
        }

        let mut consumed = vec![false; chars.len()];
        let mut parsed = ParsedKeywords::default();

        let mut i = 0;
        while i < chars.len() {
            match match_author(&chars, i) {
                Some((name, end)) => {
                    parsed.author_name = Some(name);
                    consumed[i..end].iter_mut().for_each(|c| *c = true);
                    i = end;
                }
                None => i += 1,
            }
        }

        let mut i = 0;
        while i < chars.len() {
            match match_quoted(&chars, i) {
                Some((inner, end)) => {
                    let phrase = inner.trim();
                    if !phrase.is_empty() && !consumed[i] {
                        parsed.include_phrases.push(phrase.to_string());
                        consumed[i..end].iter_mut().for_each(|c| *c = true);
                    }
                    i = end;
                }
                None => i += 1,
            }
        }

        let mut i = 0;
        while i < chars.len() {
            match match_excluded(&chars, i) {
                Some((term, end)) => {
                    let preceded_by_colon = i > 0 && chars[i - 1] == ':';
                    if !consumed[i] && !preceded_by_colon {
                        parsed.exclude_terms.push(term);
                        consumed[i..end].iter_mut().for_each(|c| *c = true);
                    }
                    i = end;
                }
                None => i += 1,
            }
        }

        let mut parts: Vec<String> = Vec::new();
        let mut current = String::new();
        for (c, used) in chars.iter().zip(&consumed) {
            if *used {
                flush_word(&mut current, &mut parts);
            } else {
                current.push(*c);
            }
        }
        flush_word(&mut current, &mut parts);
        parsed.remaining_text = parts.join(" ");

        parsed
    }
}

fn flush_word(current: &mut String, parts: &mut Vec<String>) {
    let word = current.trim();
    if !word.is_empty() {
        parts.push(word.to_string());
    }
    current.clear();
}

/// `author:` (any case), optional whitespace, then `"quoted name"` or a
/// run of non-whitespace. Returns the name and the exclusive end index.
fn match_author(chars: &[char], start: usize) -> Option<(String, usize)> {
    let prefix_len = AUTHOR_PREFIX.chars().count();
    if start + prefix_len > chars.len() {
        return None;
    }
    let matches_prefix = chars[start..start + prefix_len]
        .iter()
        .zip(AUTHOR_PREFIX.chars())
        .all(|(a, b)| a.to_lowercase().eq(b.to_lowercase()));
    if !matches_prefix {
        return None;
    }

    let mut j = start + prefix_len;
    while j < chars.len() && chars[j].is_whitespace() {
        j += 1;
    }
    if j >= chars.len() {
        return None;
    }

    if let Some((inner, end)) = match_quoted(chars, j) {
        return Some((inner, end));
    }

    let end = run_of_non_whitespace(chars, j);
    Some((chars[j..end].iter().collect(), end))
}

/// A `"..."` span with at least one character between the quotes.
fn match_quoted(chars: &[char], start: usize) -> Option<(String, usize)> {
    if chars.get(start) != Some(&'"') {
        return None;
    }
    let close = chars[start + 1..].iter().position(|c| *c == '"')? + start + 1;
    if close == start + 1 {
        return None;
    }
    Some((chars[start + 1..close].iter().collect(), close + 1))
}

/// A `-` followed by at least one non-whitespace character.
fn match_excluded(chars: &[char], start: usize) -> Option<(String, usize)> {
    if chars.get(start) != Some(&'-') {
        return None;
    }
    let end = run_of_non_whitespace(chars, start + 1);
    if end == start + 1 {
        return None;
    }
    Some((chars[start + 1..end].iter().collect(), end))
}

fn run_of_non_whitespace(chars: &[char], from: usize) -> usize {
    chars[from..]
        .iter()
        .position(|c| c.is_whitespace())
        .map_or(chars.len(), |p| p + from)
}

/// One alternative inside an OR group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeywordTerm {
    /// Matches words starting with the text.
    Prefix(String),
    /// Matches the text as a literal phrase.
    Exact(String),
}

/// Alternatives that are ORed together. Groups are ANDed with each other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordGroup(pub Vec<KeywordTerm>);

/// Reads `a/b, "c d", e` as `(a OR b) AND "c d" AND e`.
/// Full-width `，` and `／` are accepted as separators.
pub fn parse_keyword_groups(input: &str) -> Vec<KeywordGroup> {
    let normalized = input.replace('，', ",").replace('／', "/");
    normalized
        .split(',')
        .filter_map(|group| {
            let terms: Vec<KeywordTerm> = group.split('/').filter_map(parse_term).collect();
            (!terms.is_empty()).then_some(KeywordGroup(terms))
        })
        .collect()
}

fn parse_term(raw: &str) -> Option<KeywordTerm> {
    let term = raw.trim();
    if term.is_empty() {
        return None;
    }
    if term.len() > 2 && term.starts_with('"') && term.ends_with('"') {
        let inner = term[1..term.len() - 1].trim();
        return (!inner.is_empty()).then(|| KeywordTerm::Exact(inner.to_string()));
    }
    Some(KeywordTerm::Prefix(term.to_string()))
}

/// Splits the `exclude_keywords` field on commas, slashes and whitespace.
pub fn split_exclude_keywords(input: &str) -> Vec<String> {
    input
        .split(|c: char| c == ',' || c == '，' || c == '/' || c.is_whitespace())
        .map(str::trim)
        .filter(|kw| !kw.is_empty())
        .map(str::to_string)
        .collect()
}
