//! # Full-text segmentation and MATCH expressions
//!
//! Indexed text and query terms go through the same [`tokens`] function
//! before they reach the FTS5 index, so the store can use the stock
//! `unicode61` tokenizer:
//!
//! * CJK ideographs, kana and hangul become one token per character.
//! * Other non-ASCII symbols (emoji such as `🈲`) become `u<hex>` tokens.
//! * ASCII punctuation and whitespace separate tokens.
//!
//! Because tokens are alphanumeric only, quoting them is enough to keep user
//! input from being read as FTS5 operators.

use crate::keywords::{KeywordGroup, KeywordTerm};

/// Proximity window, in tokens, inside which an exemption marker cancels an
/// excluded keyword.
pub const EXEMPTION_WINDOW: usize = 8;

fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3040..=0x30FF      // hiragana, katakana
        | 0x3400..=0x4DBF    // CJK extension A
        | 0x4E00..=0x9FFF    // CJK unified ideographs
        | 0xAC00..=0xD7AF    // hangul syllables
        | 0xF900..=0xFAFF    // CJK compatibility ideographs
        | 0x20000..=0x2FA1F) // CJK extensions B+
}

/// Splits text into index tokens.
pub fn tokens(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut word = String::new();

    for c in text.chars() {
        if is_cjk(c) {
            flush(&mut word, &mut out);
            out.push(c.to_string());
        } else if c.is_alphanumeric() {
            word.push(c);
        } else if c.is_whitespace() || c.is_ascii() {
            flush(&mut word, &mut out);
        } else {
            flush(&mut word, &mut out);
            out.push(format!("u{:x}", c as u32));
        }
    }
    flush(&mut word, &mut out);
    out
}

fn flush(word: &mut String, out: &mut Vec<String>) {
    if !word.is_empty() {
        out.push(std::mem::take(word));
    }
}

/// The text as stored in the FTS5 table.
pub fn segment(text: &str) -> String {
    tokens(text).join(" ")
}

/// `"t1 t2 …"`, or `None` when the text has no tokens.
pub fn phrase(text: &str) -> Option<String> {
    let toks = tokens(text);
    (!toks.is_empty()).then(|| format!("\"{}\"", toks.join(" ")))
}

/// Loose match for unquoted text: every whitespace-separated word must
/// occur somewhere (implicit AND), the last one as a prefix. A word that
/// splits into several tokens, such as a CJK run, stays one phrase.
pub fn prefix_terms(text: &str) -> Option<String> {
    let words: Vec<String> = text.split_whitespace().filter_map(phrase).collect();
    let (last, rest) = words.split_last()?;
    let mut parts = rest.to_vec();
    parts.push(format!("{last}*"));
    Some(parts.join(" "))
}

/// One AND group as a MATCH expression: its alternatives ORed together.
pub fn group_expression(group: &KeywordGroup) -> Option<String> {
    let alternatives: Vec<(String, bool)> = group
        .0
        .iter()
        .filter_map(|term| match term {
            KeywordTerm::Prefix(text) => {
                let compound = text.split_whitespace().filter(|w| phrase(w).is_some()).count() > 1;
                prefix_terms(text).map(|expr| (expr, compound))
            }
            KeywordTerm::Exact(text) => phrase(text).map(|expr| (expr, false)),
        })
        .collect();

    match alternatives.len() {
        0 => None,
        1 => alternatives.into_iter().next().map(|(expr, _)| expr),
        _ => Some(format!(
            "({})",
            alternatives
                .into_iter()
                .map(|(expr, compound)| if compound { format!("({expr})") } else { expr })
                .collect::<Vec<_>>()
                .join(" OR ")
        )),
    }
}

/// "matches `term`, unless `term` is within `window` tokens of a marker".
/// With no usable markers the expression is just the term.
pub fn exclusion_expression(term: &str, markers: &[String], window: usize) -> Option<String> {
    let target = phrase(term)?;
    let near: Vec<String> = markers
        .iter()
        .filter_map(|m| phrase(m))
        .map(|m| format!("NEAR({target} {m}, {window})"))
        .collect();

    if near.is_empty() {
        Some(target)
    } else {
        Some(format!("({target} NOT ({}))", near.join(" OR ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_split_cjk_and_symbols() {
        assert_eq!(tokens("禁止ads, here!"), vec!["禁", "止", "ads", "here"]);
        assert_eq!(tokens("🈲spam"), vec!["u1f232", "spam"]);
        assert_eq!(segment("Hello-World"), "Hello World");
    }

    #[test]
    fn test_phrase_neutralizes_operators() {
        assert_eq!(phrase(r#"a" OR "b"#).as_deref(), Some(r#""a OR b""#));
        assert_eq!(phrase("..."), None);
    }

    #[test]
    fn test_group_expression() {
        let group = KeywordGroup(vec![
            KeywordTerm::Prefix("drag".into()),
            KeywordTerm::Exact("red fox".into()),
        ]);
        assert_eq!(
            group_expression(&group).as_deref(),
            Some(r#"("drag"* OR "red fox")"#)
        );
    }

    #[test]
    fn test_unquoted_words_are_anded_not_adjacent() {
        assert_eq!(prefix_terms("dragon story").as_deref(), Some(r#""dragon" "story"*"#));
        assert_eq!(prefix_terms("红色 龙").as_deref(), Some(r#""红 色" "龙"*"#));
        assert_eq!(prefix_terms("dragon ...").as_deref(), Some(r#""dragon"*"#));
        assert_eq!(prefix_terms("  "), None);
    }

    #[test]
    fn test_compound_alternatives_are_parenthesized() {
        let group = KeywordGroup(vec![
            KeywordTerm::Prefix("red fox".into()),
            KeywordTerm::Prefix("wolf".into()),
        ]);
        assert_eq!(
            group_expression(&group).as_deref(),
            Some(r#"(("red" "fox"*) OR "wolf"*)"#)
        );
    }

    #[test]
    fn test_exclusion_expression() {
        let markers = vec!["禁".to_string(), "🈲".to_string()];
        assert_eq!(
            exclusion_expression("ads", &markers, EXEMPTION_WINDOW).as_deref(),
            Some(r#"("ads" NOT (NEAR("ads" "禁", 8) OR NEAR("ads" "u1f232", 8)))"#)
        );
        assert_eq!(exclusion_expression("ads", &[], 8).as_deref(), Some(r#""ads""#));
    }
}
