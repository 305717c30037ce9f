//! The search-term tree.
//!
//! Terms become leaves under a root; a synonym list becomes a
//! disjunction with one leaf per expansion, and a term whose expansion
//! would explode combinatorially is divided into a conjunction of
//! disjunctions. Sliding-window scoring increments and decrements
//! leaves; scores propagate to the root, whose count is the window
//! score.

use common::{EngineError, EngineResult};
use types::{Data, MatchMode, SearchTerm};

use crate::checker::{PatternChecker, WORD_SEPARATOR};
use crate::tokenizer::Tokenizer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NodeType {
    /// Collects the score; never propagates further.
    Root,
    /// Propagates when all children are hit.
    Conjunction,
    /// Propagates when one or more children are hit.
    Disjunction,
}

#[derive(Clone, Copy, Debug)]
struct Node {
    count: usize,
    parent: usize,
    node_type: NodeType,
    children: usize,
}

/// `(hit count, parent node id)`. Leaf ids equal pattern ids.
type Leaf = (usize, usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Separator {
    None,
    /// A separator sentinel is required at this position.
    Insert,
    /// Patterns are generated both with and without a separator.
    Expand,
}

/// The prepared tree plus the raw term lists it was built from.
#[derive(Default)]
pub struct Condition {
    nodes: Vec<Node>,
    leaves: Vec<Leaf>,
    perfect_score: usize,
    word_search: bool,
    term_lists: Vec<Vec<Data>>,
}

impl Condition {
    pub fn new() -> Self {
        Condition::default()
    }

    /// Accumulate one search-term list. Lists from later `set` calls
    /// merge into the same tree at the next `prepare`.
    pub fn set(&mut self, term_list: &[Data]) {
        if !self.word_search {
            self.word_search = is_word_search(term_list);
        }
        self.term_lists.push(term_list.to_vec());
    }

    pub fn is_prepared(&self) -> bool {
        self.perfect_score > 0
    }

    pub fn clear(&mut self) {
        *self = Condition::new();
    }

    /// Build nodes and leaves and register every pattern.
    pub fn prepare(
        &mut self,
        checker: &mut PatternChecker,
        tokenizer: &dyn Tokenizer,
        expand_limit: usize,
    ) -> EngineResult<()> {
        if self.is_prepared() {
            return Ok(());
        }

        let root = self.add_node(NodeType::Root, 0);
        let term_lists = std::mem::take(&mut self.term_lists);
        for list in &term_lists {
            for entry in list {
                match entry {
                    Data::SearchTerm(term) => {
                        self.set_search_term(term, root, checker, tokenizer, expand_limit)?;
                    }
                    Data::Array(synonyms) => {
                        let parent = self.add_node(NodeType::Disjunction, root);
                        for synonym in synonyms {
                            let term = match synonym {
                                Data::SearchTerm(term) => term,
                                other => {
                                    return Err(EngineError::ClassCast(format!(
                                        "synonym list holds {:?}",
                                        other.kind()
                                    )));
                                }
                            };
                            self.set_search_term(term, parent, checker, tokenizer, expand_limit)?;
                        }
                    }
                    other => {
                        return Err(EngineError::ClassCast(format!(
                            "search term list holds {:?}",
                            other.kind()
                        )));
                    }
                }
            }
        }
        self.term_lists = term_lists;

        // The perfect score is what a window scoring every leaf once
        // reaches.
        for leaf in 0..self.leaves.len() {
            self.increment(leaf);
        }
        self.perfect_score = self.score();
        self.initialize_status();
        Ok(())
    }

    pub fn score(&self) -> usize {
        self.nodes.first().map(|n| n.count).unwrap_or(0)
    }

    pub fn perfect_score(&self) -> usize {
        self.perfect_score
    }

    pub fn initialize_status(&mut self) {
        for node in &mut self.nodes {
            node.count = 0;
        }
        for leaf in &mut self.leaves {
            leaf.0 = 0;
        }
    }

    pub fn increment(&mut self, leaf: usize) {
        self.leaves[leaf].0 += 1;
        if self.leaves[leaf].0 == 1 {
            self.increment_node(self.leaves[leaf].1);
        }
    }

    pub fn decrement(&mut self, leaf: usize) {
        debug_assert!(self.leaves[leaf].0 > 0);
        self.leaves[leaf].0 -= 1;
        if self.leaves[leaf].0 == 0 {
            self.decrement_node(self.leaves[leaf].1);
        }
    }

    fn increment_node(&mut self, id: usize) {
        self.nodes[id].count += 1;
        let node = self.nodes[id];
        match node.node_type {
            NodeType::Root => {}
            NodeType::Conjunction if node.count == node.children => {
                self.increment_node(node.parent);
            }
            NodeType::Disjunction if node.count == 1 => {
                self.increment_node(node.parent);
            }
            _ => {}
        }
    }

    fn decrement_node(&mut self, id: usize) {
        let before = self.nodes[id];
        self.nodes[id].count -= 1;
        match before.node_type {
            NodeType::Root => {}
            NodeType::Conjunction if before.count == before.children => {
                self.decrement_node(before.parent);
            }
            NodeType::Disjunction if before.count == 1 => {
                self.decrement_node(before.parent);
            }
            _ => {}
        }
    }

    fn add_node(&mut self, node_type: NodeType, parent: usize) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node {
            count: 0,
            parent,
            node_type,
            children: 0,
        });
        if id != parent {
            self.nodes[parent].children += 1;
        }
        id
    }

    fn add_leaf(&mut self, parent: usize) -> usize {
        let id = self.leaves.len();
        self.leaves.push((0, parent));
        self.nodes[parent].children += 1;
        id
    }

    /// Expand one term into patterns and leaves under `parent`.
    fn set_search_term(
        &mut self,
        term: &SearchTerm,
        parent: usize,
        checker: &mut PatternChecker,
        tokenizer: &dyn Tokenizer,
        expand_limit: usize,
    ) -> EngineResult<()> {
        let (head, mid, tail) = self.separator_mode(term);
        let rows = tokenizer.expand(term)?;
        if rows.is_empty() {
            return Ok(());
        }

        // Divide the rows into chunks whose combination count stays
        // under the expansion bound; more than one chunk turns the term
        // into a conjunction of its pieces.
        let mid_options = if mid == Separator::Expand { 2 } else { 1 };
        let mut chunks: Vec<&[Vec<String>]> = Vec::new();
        let mut start = 0;
        let mut combos = 0usize;
        for (i, row) in rows.iter().enumerate() {
            let next = if combos == 0 {
                row.len()
            } else {
                combos * mid_options * row.len()
            };
            if combos > 0 && next > expand_limit.max(1) {
                chunks.push(&rows[start..i]);
                start = i;
                combos = row.len();
            } else {
                combos = next;
            }
        }
        chunks.push(&rows[start..]);

        let parent = if chunks.len() > 1 {
            self.add_node(NodeType::Conjunction, parent)
        } else {
            parent
        };

        let last = chunks.len() - 1;
        for (i, chunk) in chunks.iter().enumerate() {
            let chunk_head = if i == 0 { head } else { Separator::None };
            let chunk_tail = if i == last { tail } else { Separator::None };
            self.add_expanded(chunk, chunk_head, mid, chunk_tail, parent, checker)?;
        }
        Ok(())
    }

    /// Emit every pattern combination of one chunk as leaves.
    fn add_expanded(
        &mut self,
        rows: &[Vec<String>],
        head: Separator,
        mid: Separator,
        tail: Separator,
        parent: usize,
        checker: &mut PatternChecker,
    ) -> EngineResult<()> {
        let mut patterns = Vec::new();
        build_patterns(rows, head, mid, tail, &mut String::new(), 0, &mut patterns);

        let parent = if patterns.len() > 1
            && self.nodes[parent].node_type != NodeType::Disjunction
        {
            self.add_node(NodeType::Disjunction, parent)
        } else {
            parent
        };

        for pattern in patterns {
            let leaf = self.add_leaf(parent);
            let id = checker.add_pattern(&pattern)?;
            debug_assert_eq!(leaf, id);
        }
        Ok(())
    }

    /// Word-boundary sentinels per match mode. Without word search
    /// every position is plain.
    fn separator_mode(&self, term: &SearchTerm) -> (Separator, Separator, Separator) {
        if !self.word_search {
            return (Separator::None, Separator::None, Separator::None);
        }
        match term.match_mode {
            MatchMode::String => (Separator::None, Separator::Expand, Separator::None),
            MatchMode::WordHead => (Separator::Insert, Separator::Expand, Separator::None),
            MatchMode::WordTail => (Separator::None, Separator::Expand, Separator::Insert),
            MatchMode::SimpleWord => (Separator::Insert, Separator::Expand, Separator::Insert),
            MatchMode::ExactWord => (Separator::Insert, Separator::Insert, Separator::Insert),
        }
    }
}

/// Any term with a word-based match mode switches the whole condition
/// into word search.
fn is_word_search(term_list: &[Data]) -> bool {
    term_list.iter().any(|entry| match entry {
        Data::SearchTerm(term) => term.match_mode != MatchMode::String,
        Data::Array(synonyms) => is_word_search(synonyms),
        _ => false,
    })
}

fn build_patterns(
    rows: &[Vec<String>],
    head: Separator,
    mid: Separator,
    tail: Separator,
    prefix: &mut String,
    row: usize,
    out: &mut Vec<String>,
) {
    if row == rows.len() {
        let mut pattern = String::new();
        if head == Separator::Insert {
            pattern.push(WORD_SEPARATOR);
        }
        pattern.push_str(prefix);
        if tail == Separator::Insert {
            pattern.push(WORD_SEPARATOR);
        }
        out.push(pattern);
        return;
    }

    for alternative in &rows[row] {
        let separators: &[&str] = if row == 0 {
            &[""]
        } else {
            match mid {
                Separator::None => &[""],
                Separator::Insert => &["\u{F8FF}"],
                Separator::Expand => &["", "\u{F8FF}"],
            }
        };
        for sep in separators {
            let saved = prefix.len();
            prefix.push_str(sep);
            prefix.push_str(alternative);
            build_patterns(rows, head, mid, tail, prefix, row + 1, out);
            prefix.truncate(saved);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::BasicTokenizer;

    fn term(s: &str, mode: MatchMode) -> Data {
        Data::SearchTerm(SearchTerm::new(s, mode))
    }

    fn prepared(list: Vec<Data>) -> (Condition, PatternChecker) {
        let mut condition = Condition::new();
        condition.set(&list);
        let mut checker = PatternChecker::new();
        condition
            .prepare(&mut checker, &BasicTokenizer, 16)
            .unwrap();
        checker.prepare();
        (condition, checker)
    }

    #[test]
    fn single_term_scores_one() {
        let (mut condition, checker) = prepared(vec![term("xyz", MatchMode::String)]);
        assert_eq!(checker.pattern_count(), 1);
        assert_eq!(condition.perfect_score(), 1);

        condition.increment(0);
        assert_eq!(condition.score(), 1);
        condition.increment(0);
        assert_eq!(condition.score(), 1, "repeat hits score once");
        condition.decrement(0);
        assert_eq!(condition.score(), 1);
        condition.decrement(0);
        assert_eq!(condition.score(), 0);
    }

    #[test]
    fn two_terms_score_independently() {
        let (mut condition, _) = prepared(vec![
            term("abc", MatchMode::String),
            term("def", MatchMode::String),
        ]);
        assert_eq!(condition.perfect_score(), 2);
        condition.increment(0);
        assert_eq!(condition.score(), 1);
        condition.increment(1);
        assert_eq!(condition.score(), 2);
    }

    #[test]
    fn synonyms_share_a_disjunction() {
        let (mut condition, checker) = prepared(vec![Data::Array(vec![
            term("car", MatchMode::String),
            term("auto", MatchMode::String),
        ])]);
        assert_eq!(checker.pattern_count(), 2);
        // Either synonym alone reaches the perfect score.
        assert_eq!(condition.perfect_score(), 1);
        condition.increment(1);
        assert_eq!(condition.score(), 1);
        condition.increment(0);
        assert_eq!(condition.score(), 1);
        condition.decrement(1);
        assert_eq!(condition.score(), 1);
        condition.decrement(0);
        assert_eq!(condition.score(), 0);
    }

    #[test]
    fn word_modes_insert_separators() {
        let (_, checker) = prepared(vec![term("ab cd", MatchMode::ExactWord)]);
        // One pattern with separators at head, gap, and tail.
        assert_eq!(checker.pattern_count(), 1);
        assert!(checker.is_word_checker());
        assert_eq!(checker.pattern_length(0), 2 + 2 + 3);
    }

    #[test]
    fn expand_mode_doubles_gap_patterns() {
        let (_, checker) = prepared(vec![term("ab cd", MatchMode::SimpleWord)]);
        // The gap may or may not carry a separator: two patterns.
        assert_eq!(checker.pattern_count(), 2);
    }

    #[test]
    fn string_mode_stays_plain_without_word_terms() {
        let (_, checker) = prepared(vec![term("ab cd", MatchMode::String)]);
        assert_eq!(checker.pattern_count(), 1);
        assert!(!checker.is_word_checker());
        assert_eq!(checker.pattern_length(0), 4);
    }

    #[test]
    fn oversized_expansion_becomes_a_conjunction() {
        let long: String = (0..40)
            .map(|i| format!("w{i}"))
            .collect::<Vec<_>>()
            .join(" ");
        let mut condition = Condition::new();
        condition.set(&[term(&long, MatchMode::SimpleWord)]);
        let mut checker = PatternChecker::new();
        condition.prepare(&mut checker, &BasicTokenizer, 16).unwrap();
        // The term was divided rather than expanded past the limit.
        assert!(checker.pattern_count() > 1);
        // Scoring the tree still needs every piece.
        assert_eq!(condition.perfect_score(), 1);
    }

    #[test]
    fn later_set_calls_merge_terms() {
        let mut condition = Condition::new();
        condition.set(&[term("one", MatchMode::String)]);
        condition.set(&[term("two", MatchMode::String)]);
        let mut checker = PatternChecker::new();
        condition.prepare(&mut checker, &BasicTokenizer, 16).unwrap();
        assert_eq!(checker.pattern_count(), 2);
        assert_eq!(condition.perfect_score(), 2);
    }
}
