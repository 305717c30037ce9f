//! Multi-pattern matcher.
//!
//! A goto/fail trie in the Aho–Corasick style: patterns are added one
//! by one, `prepare` wires the failure links, and `check` reports every
//! occurrence in one pass over the normalized text.

use common::{EngineError, EngineResult};
use hashbrown::HashMap;

/// Sentinel inserted by word-mode tokenization; never occurs in text.
pub const WORD_SEPARATOR: char = '\u{F8FF}';

/// `(head offset in the normalized text, pattern id)`, in document
/// order.
pub type PatternLocation = (usize, usize);

#[derive(Debug, Default)]
struct TrieNode {
    children: HashMap<char, usize>,
    fail: usize,
    /// Ids of patterns ending at this node (directly or via fail links).
    output: Vec<usize>,
}

/// The matcher. `add_pattern` ids are assigned in call order and align
/// with the condition tree's leaf ids.
#[derive(Debug, Default)]
pub struct PatternChecker {
    nodes: Vec<TrieNode>,
    pattern_lengths: Vec<usize>,
    word_checker: bool,
    prepared: bool,
}

impl PatternChecker {
    pub fn new() -> Self {
        Self {
            nodes: vec![TrieNode::default()],
            pattern_lengths: Vec::new(),
            word_checker: false,
            prepared: false,
        }
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Register a pattern. Patterns cannot be added after `prepare`.
    pub fn add_pattern(&mut self, pattern: &str) -> EngineResult<usize> {
        if self.prepared {
            return Err(EngineError::Kwic("pattern added after prepare".into()));
        }
        let id = self.pattern_lengths.len();
        let chars: Vec<char> = pattern.chars().collect();
        if chars.is_empty() {
            return Err(EngineError::Kwic("empty pattern".into()));
        }
        if chars.contains(&WORD_SEPARATOR) {
            self.word_checker = true;
        }

        let mut node = 0usize;
        for c in chars.iter() {
            let next = match self.nodes[node].children.get(c) {
                Some(&n) => n,
                None => {
                    self.nodes.push(TrieNode::default());
                    let n = self.nodes.len() - 1;
                    self.nodes[node].children.insert(*c, n);
                    n
                }
            };
            node = next;
        }
        self.nodes[node].output.push(id);
        self.pattern_lengths.push(chars.len());
        Ok(id)
    }

    pub fn pattern_count(&self) -> usize {
        self.pattern_lengths.len()
    }

    pub fn pattern_length(&self, id: usize) -> usize {
        self.pattern_lengths[id]
    }

    pub fn pattern_lengths(&self) -> &[usize] {
        &self.pattern_lengths
    }

    /// Whether any pattern carries word separators, i.e. the source
    /// must be tokenized with sentinels.
    pub fn is_word_checker(&self) -> bool {
        self.word_checker
    }

    /// Build the failure links. Idempotent.
    pub fn prepare(&mut self) {
        if self.prepared {
            return;
        }
        self.prepared = true;

        let mut queue = std::collections::VecDeque::new();
        let roots: Vec<usize> = self.nodes[0].children.values().copied().collect();
        for n in roots {
            self.nodes[n].fail = 0;
            queue.push_back(n);
        }

        while let Some(current) = queue.pop_front() {
            let children: Vec<(char, usize)> = self.nodes[current]
                .children
                .iter()
                .map(|(c, n)| (*c, *n))
                .collect();
            for (c, child) in children {
                let mut fail = self.nodes[current].fail;
                let fail_target = loop {
                    if let Some(&n) = self.nodes[fail].children.get(&c) {
                        break n;
                    }
                    if fail == 0 {
                        break 0;
                    }
                    fail = self.nodes[fail].fail;
                };
                self.nodes[child].fail = if fail_target == child { 0 } else { fail_target };
                let inherited = self.nodes[self.nodes[child].fail].output.clone();
                self.nodes[child].output.extend(inherited);
                queue.push_back(child);
            }
        }
    }

    /// Scan the normalized text, returning matches ordered by head
    /// offset.
    pub fn check(&self, text: &[char]) -> Vec<PatternLocation> {
        debug_assert!(self.prepared || self.pattern_lengths.is_empty());

        let mut matches = Vec::new();
        let mut node = 0usize;
        for (i, c) in text.iter().enumerate() {
            loop {
                if let Some(&next) = self.nodes[node].children.get(c) {
                    node = next;
                    break;
                }
                if node == 0 {
                    break;
                }
                node = self.nodes[node].fail;
            }
            for &id in &self.nodes[node].output {
                let head = i + 1 - self.pattern_lengths[id];
                matches.push((head, id));
            }
        }
        matches.sort();
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    fn prepared(patterns: &[&str]) -> PatternChecker {
        let mut checker = PatternChecker::new();
        for p in patterns {
            checker.add_pattern(p).unwrap();
        }
        checker.prepare();
        checker
    }

    #[test]
    fn finds_every_occurrence_in_order() {
        let checker = prepared(&["xyz"]);
        let found = checker.check(&chars("abcxyzdefxyzghi"));
        assert_eq!(found, vec![(3, 0), (9, 0)]);
    }

    #[test]
    fn overlapping_patterns_are_all_reported() {
        let checker = prepared(&["aa"]);
        assert_eq!(checker.check(&chars("aaaa")), vec![(0, 0), (1, 0), (2, 0)]);
    }

    #[test]
    fn multiple_patterns_share_one_pass() {
        let checker = prepared(&["he", "she", "hers"]);
        let found = checker.check(&chars("ushers"));
        // she at 1, he at 2, hers at 2.
        assert_eq!(found, vec![(1, 1), (2, 0), (2, 2)]);
    }

    #[test]
    fn substring_patterns_fire_inside_longer_matches() {
        let checker = prepared(&["abcd", "bc"]);
        let found = checker.check(&chars("abcd"));
        assert_eq!(found, vec![(0, 0), (1, 1)]);
    }

    #[test]
    fn word_checker_flag_tracks_separators() {
        let mut checker = PatternChecker::new();
        checker.add_pattern("plain").unwrap();
        assert!(!checker.is_word_checker());
        checker
            .add_pattern(&format!("{WORD_SEPARATOR}word{WORD_SEPARATOR}"))
            .unwrap();
        assert!(checker.is_word_checker());
    }

    #[test]
    fn add_after_prepare_is_rejected() {
        let mut checker = prepared(&["a"]);
        assert!(checker.add_pattern("b").is_err());
    }
}
