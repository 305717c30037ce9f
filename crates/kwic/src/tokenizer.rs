//! Tokenization seam.
//!
//! The engine consumes tokenization as a service: a tokenizer turns a
//! source string into normalized text plus per-word position mappings,
//! and expands a search term into rows of morpheme alternatives. The
//! built-in [`BasicTokenizer`] lower-cases and, for text without word
//! structure, treats every character as a word; a host with a
//! morphological analyzer plugs in its own implementation.

use common::EngineResult;
use types::{LanguageSet, SearchTerm};

/// One word of the source: inclusive character ranges in the
/// normalized and the original text, plus whether it ends a sentence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WordInfo {
    pub norm_head: usize,
    pub norm_tail: usize,
    pub orig_head: usize,
    pub orig_tail: usize,
    pub is_period: bool,
}

/// Abstract morphological service.
pub trait Tokenizer: Send {
    /// Normalize `source` and report the word layout. When
    /// `separator` is given, that character is inserted before each
    /// word and after the last one in the normalized text (word-mode
    /// search needs the sentinels).
    fn word_info(
        &self,
        source: &str,
        language: &LanguageSet,
        separator: Option<char>,
    ) -> EngineResult<(Vec<char>, Vec<WordInfo>)>;

    /// Expand a search term into rows of normalized morpheme
    /// alternatives. Row order follows the term; every row holds at
    /// least one alternative.
    fn expand(&self, term: &SearchTerm) -> EngineResult<Vec<Vec<String>>>;
}

const PERIODS: [char; 6] = ['.', '!', '?', '\u{3002}', '\u{FF01}', '\u{FF1F}'];

/// Default tokenizer: whitespace-separated tokens are words; a source
/// without any whitespace degrades to one word per character.
/// Normalization lower-cases and deletes the whitespace.
#[derive(Debug, Default)]
pub struct BasicTokenizer;

impl BasicTokenizer {
    pub fn new(_parameters: &[(String, String)]) -> Self {
        BasicTokenizer
    }
}

impl Tokenizer for BasicTokenizer {
    fn word_info(
        &self,
        source: &str,
        _language: &LanguageSet,
        separator: Option<char>,
    ) -> EngineResult<(Vec<char>, Vec<WordInfo>)> {
        let chars: Vec<char> = source.chars().collect();
        let has_whitespace = chars.iter().any(|c| c.is_whitespace());

        let mut words: Vec<(usize, usize)> = Vec::new();
        if has_whitespace {
            let mut start = None;
            for (i, c) in chars.iter().enumerate() {
                if c.is_whitespace() {
                    if let Some(s) = start.take() {
                        words.push((s, i - 1));
                    }
                } else if start.is_none() {
                    start = Some(i);
                }
            }
            if let Some(s) = start {
                words.push((s, chars.len() - 1));
            }
        } else {
            words.extend((0..chars.len()).map(|i| (i, i)));
        }

        let mut normalized = Vec::new();
        let mut info = Vec::new();
        for (head, tail) in words {
            if let Some(sep) = separator {
                normalized.push(sep);
            }
            let norm_head = normalized.len();
            normalized.extend(chars[head..=tail].iter().flat_map(|c| c.to_lowercase()));
            let norm_tail = normalized.len().saturating_sub(1);
            info.push(WordInfo {
                norm_head,
                norm_tail,
                orig_head: head,
                orig_tail: tail,
                is_period: head == tail && PERIODS.contains(&chars[head]),
            });
        }
        if separator.is_some() && !info.is_empty() {
            normalized.push(separator.unwrap());
        }

        Ok((normalized, info))
    }

    fn expand(&self, term: &SearchTerm) -> EngineResult<Vec<Vec<String>>> {
        let rows: Vec<Vec<String>> = if term.term.chars().any(|c| c.is_whitespace()) {
            term.term
                .split_whitespace()
                .map(|tok| vec![tok.to_lowercase()])
                .collect()
        } else if term.term.is_empty() {
            Vec::new()
        } else {
            vec![vec![term.term.to_lowercase()]]
        };
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::MatchMode;

    fn info_for(source: &str) -> (Vec<char>, Vec<WordInfo>) {
        BasicTokenizer
            .word_info(source, &LanguageSet::default(), None)
            .unwrap()
    }

    #[test]
    fn characters_are_words_without_whitespace() {
        let (normalized, words) = info_for("AbC");
        assert_eq!(normalized, vec!['a', 'b', 'c']);
        assert_eq!(words.len(), 3);
        assert_eq!(words[1].orig_head, 1);
        assert_eq!(words[1].norm_head, 1);
    }

    #[test]
    fn whitespace_separates_words_and_is_deleted() {
        let (normalized, words) = info_for("Hello  World.");
        assert_eq!(normalized.iter().collect::<String>(), "helloworld.");
        assert_eq!(words.len(), 2);
        assert_eq!(words[0].orig_head, 0);
        assert_eq!(words[0].orig_tail, 4);
        assert_eq!(words[1].orig_head, 7);
        assert_eq!(words[1].norm_head, 5);
        assert!(!words[1].is_period);
    }

    #[test]
    fn lone_period_ends_a_sentence() {
        let (_, words) = info_for("end . next");
        assert!(words[1].is_period);
    }

    #[test]
    fn separator_wraps_every_word() {
        let (normalized, words) = BasicTokenizer
            .word_info("ab cd", &LanguageSet::default(), Some('/'))
            .unwrap();
        assert_eq!(normalized.iter().collect::<String>(), "/ab/cd/");
        assert_eq!(words[0].norm_head, 1);
        assert_eq!(words[1].norm_head, 4);
    }

    #[test]
    fn expand_splits_on_whitespace() {
        let term = SearchTerm::new("Quick Fox", MatchMode::SimpleWord);
        let rows = BasicTokenizer.expand(&term).unwrap();
        assert_eq!(rows, vec![vec!["quick".to_string()], vec!["fox".to_string()]]);

        let term = SearchTerm::new("XYZ", MatchMode::String);
        assert_eq!(BasicTokenizer.expand(&term).unwrap(), vec![vec!["xyz".to_string()]]);
    }
}
