//! Keyword-In-Context snippet generation.
//!
//! The engine is primed once per query with the index's search-term
//! metadata ([`Kwic::set`]), then generates one snippet per result row:
//! tokenize the source, find every pattern occurrence in the normalized
//! text, pick the highest-scoring seed window, widen it to the
//! requested size along word boundaries, and emit the original text
//! with the matches wrapped in tags, escaped, and framed by ellipses.

#[cfg(test)]
mod tests;

pub mod checker;
pub mod condition;
pub mod tokenizer;

use common::{Config, EngineError, EngineResult};
use types::{Data, LanguageSet};

use checker::{PatternChecker, PatternLocation, WORD_SEPARATOR};
use condition::Condition;
use tokenizer::{BasicTokenizer, Tokenizer, WordInfo};

/// How the emitted text is escaped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Escape {
    #[default]
    None,
    Html,
}

impl Escape {
    /// `""` and `"none"` pass text through; `"html"` escapes the four
    /// HTML metacharacters. Anything else is a caller error.
    pub fn parse(method: &str) -> EngineResult<Escape> {
        if method.is_empty() || method.eq_ignore_ascii_case("none") {
            Ok(Escape::None)
        } else if method.eq_ignore_ascii_case("html") {
            Ok(Escape::Html)
        } else {
            Err(EngineError::BadArgument)
        }
    }
}

/// The property dictionary handed over by the index.
#[derive(Clone, Debug, Default)]
pub struct Properties {
    pub rough_sizes: Vec<u32>,
    /// `SearchTerm` and synonym-list (`Array` of `SearchTerm`) entries.
    pub search_terms: Vec<Data>,
    pub una_parameters: Vec<(String, String)>,
}

impl Properties {
    /// Decode the key/value arrays of the driver surface.
    pub fn from_pairs(keys: &[Data], values: &[Data]) -> EngineResult<Properties> {
        if keys.len() != values.len() {
            return Err(EngineError::BadArgument);
        }
        let mut props = Properties::default();
        let mut una_keys = Vec::new();
        let mut una_values = Vec::new();

        for (key, value) in keys.iter().zip(values) {
            let name = key
                .as_str()
                .ok_or_else(|| EngineError::ClassCast("property key is not a string".into()))?;
            let items = value
                .as_array()
                .ok_or_else(|| EngineError::ClassCast("property value is not an array".into()))?;
            match name {
                "RoughKwicSize" => {
                    props.rough_sizes = items
                        .iter()
                        .map(|d| {
                            d.as_uint().ok_or_else(|| {
                                EngineError::ClassCast("rough size is not unsigned".into())
                            })
                        })
                        .collect::<EngineResult<_>>()?;
                }
                "SearchTermList" => props.search_terms = items.to_vec(),
                "UnaParameterKey" => {
                    una_keys = items
                        .iter()
                        .map(|d| d.as_str().map(str::to_string))
                        .collect::<Option<Vec<_>>>()
                        .ok_or_else(|| {
                            EngineError::ClassCast("una parameter key is not a string".into())
                        })?;
                }
                "UnaParameterValue" => {
                    una_values = items
                        .iter()
                        .map(|d| d.as_str().map(str::to_string))
                        .collect::<Option<Vec<_>>>()
                        .ok_or_else(|| {
                            EngineError::ClassCast("una parameter value is not a string".into())
                        })?;
                }
                other => {
                    log::error!("unknown kwic property '{other}'");
                    return Err(EngineError::BadArgument);
                }
            }
        }
        props.una_parameters = una_keys.into_iter().zip(una_values).collect();
        Ok(props)
    }
}

/// One original-text character range `[head, tail]` to wrap in tags.
type WordRange = (usize, usize);

/// The snippet generator.
pub struct Kwic {
    condition: Condition,
    checker: PatternChecker,
    tokenizer: Box<dyn Tokenizer>,
    start_tag: String,
    end_tag: String,
    ellipsis: String,
    escape: Escape,
    /// Requested snippet length in characters; zero until `set`.
    size: usize,
    /// `size` with the margin removed; bounds the seed window.
    content_size: usize,
    rough_sizes: Vec<u32>,
    expand_limit: usize,
    margin_percent: u32,
}

impl Kwic {
    pub fn new(config: &Config) -> Self {
        Self {
            condition: Condition::new(),
            checker: PatternChecker::new(),
            tokenizer: Box::new(BasicTokenizer),
            start_tag: String::new(),
            end_tag: String::new(),
            ellipsis: String::new(),
            escape: Escape::None,
            size: 0,
            content_size: 0,
            rough_sizes: Vec::new(),
            expand_limit: config.kwic_expand_limit,
            margin_percent: config.kwic_margin_percent,
        }
    }

    /// Prime the generator. The first call configures everything; later
    /// calls only contribute additional search terms.
    pub fn set(
        &mut self,
        properties: &Properties,
        start_tag: &str,
        end_tag: &str,
        ellipsis: &str,
        escape_method: &str,
        size: usize,
    ) -> EngineResult<()> {
        if self.size != 0 {
            // Second time or later.
            self.condition.set(&properties.search_terms);
            return Ok(());
        }

        if size == 0 {
            return Err(EngineError::BadArgument);
        }
        if self.margin_percent >= 100 {
            return Err(EngineError::BadArgument);
        }

        self.rough_sizes = properties.rough_sizes.clone();
        self.tokenizer = Box::new(BasicTokenizer::new(&properties.una_parameters));
        self.condition.set(&properties.search_terms);

        self.start_tag = start_tag.to_string();
        self.end_tag = if end_tag.is_empty() {
            start_tag.to_string()
        } else {
            end_tag.to_string()
        };
        self.ellipsis = ellipsis.to_string();
        self.escape = Escape::parse(escape_method)?;
        self.size = size;
        self.content_size = (size * (100 - self.margin_percent as usize) / 100).max(1);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.condition.clear();
        self.checker.clear();
        self.rough_sizes.clear();
        self.start_tag.clear();
        self.end_tag.clear();
        self.ellipsis.clear();
        self.escape = Escape::None;
        self.size = 0;
        self.content_size = 0;
    }

    /// Width of the rough snippet the index stores for `field`.
    ///
    /// The field number comes from the same query that produced the
    /// vector, so an out-of-range index is a caller bug and panics.
    pub fn rough_size(&self, field: usize) -> u32 {
        self.rough_sizes[field]
    }

    /// Generate a snippet for one value. `rough_size` is the width of
    /// the pre-cut rough text (zero when the full value is passed).
    /// Returns the snippet and whether any pattern was highlighted.
    pub fn generate(
        &mut self,
        source: &str,
        rough_size: u32,
        language: &LanguageSet,
    ) -> EngineResult<(String, bool)> {
        if self.size == 0 {
            return Err(EngineError::FileNotOpen);
        }
        if source.is_empty() {
            return Ok((String::new(), false));
        }

        if !self.condition.is_prepared() {
            self.condition
                .prepare(&mut self.checker, &*self.tokenizer, self.expand_limit)?;
            self.checker.prepare();
        }

        let separator = self.checker.is_word_checker().then_some(WORD_SEPARATOR);
        let (normalized, words) = self.tokenizer.word_info(source, language, separator)?;
        let source_chars: Vec<char> = source.chars().collect();

        let locations = self.checker.check(&normalized);

        let separator_count = if separator.is_some() {
            words.len() + 1
        } else {
            0
        };
        let content_chars = normalized.len().saturating_sub(separator_count);
        let ratio = content_chars as f64 / source_chars.len() as f64;
        let normalized_content = ((self.content_size as f64 * ratio) as usize)
            .min(content_chars)
            .max(1);

        let (seed_offset, seed_size) = self.seed(&locations, normalized_content);

        let (offset, size, head_ellipsis, tail_ellipsis, ranges) =
            self.determine(&locations, &words, seed_offset, seed_size, source_chars.len());

        Ok(self.emit(
            &source_chars,
            offset,
            size,
            rough_size,
            head_ellipsis,
            tail_ellipsis,
            &ranges,
        ))
    }

    /// Generate for an array-of-string value: the position selects the
    /// segment, and the remaining position applies within it.
    pub fn generate_array(
        &mut self,
        segments: &[String],
        position: Option<usize>,
        rough_size: u32,
        language: &LanguageSet,
    ) -> EngineResult<(String, bool)> {
        let mut remaining = position.unwrap_or(0);
        for segment in segments {
            let len = segment.chars().count();
            if remaining < len || position.is_none() {
                return self.generate(segment, rough_size, language);
            }
            remaining -= len;
        }
        match segments.last() {
            Some(segment) => self.generate(segment, rough_size, language),
            None => Ok((String::new(), false)),
        }
    }

    /// Slide a window over the matches, growing the tail and shrinking
    /// the head while it exceeds the content size, and keep the
    /// best-scoring window. Stops early once the perfect score is
    /// reached.
    fn seed(&mut self, locations: &[PatternLocation], content: usize) -> (usize, usize) {
        let mut seed = (0usize, 0usize);
        let mut best = 0usize;

        self.condition.initialize_status();
        let mut head = 0usize;
        for tail in 0..locations.len() {
            let (tail_offset, tail_id) = locations[tail];
            self.condition.increment(tail_id);

            while head < tail {
                let (head_offset, head_id) = locations[head];
                let window = tail_offset - head_offset + self.checker.pattern_length(tail_id);
                if window <= content {
                    // The window may still exceed the content size when
                    // head == tail and the single pattern is long.
                    break;
                }
                self.condition.decrement(head_id);
                head += 1;
            }

            if tail == 0 || self.condition.score() > best {
                seed = (
                    locations[head].0,
                    tail_offset - locations[head].0 + self.checker.pattern_length(tail_id),
                );
                best = self.condition.score();
                if best == self.condition.perfect_score() {
                    break;
                }
            }
        }
        seed
    }

    /// Turn the normalized seed into an original-text window: anchor at
    /// the seed's word, fill up to the requested size, clip to word
    /// boundaries, and exclude a trailing pattern that does not fit
    /// completely.
    fn determine(
        &self,
        locations: &[PatternLocation],
        words: &[WordInfo],
        seed_offset: usize,
        seed_size: usize,
        source_len: usize,
    ) -> (usize, usize, bool, bool, Vec<WordRange>) {
        if locations.is_empty() || seed_size == 0 || words.is_empty() {
            // No hit: the first `size` characters, ellipses decided at
            // emission from the window edges.
            return (0, self.size.min(source_len), true, true, Vec::new());
        }

        // Anchor: the word covering the seed head, pulled back when the
        // tail of the text cannot fill the window.
        let anchor_word = words
            .iter()
            .position(|w| w.norm_tail >= seed_offset)
            .unwrap_or(words.len() - 1);
        let anchor = words[anchor_word].orig_head;
        let offset = anchor.min(source_len.saturating_sub(self.size));
        // Clip a pulled-back offset to the head of its word.
        let offset_word = words
            .iter()
            .rposition(|w| w.orig_head <= offset)
            .unwrap_or(0);
        let offset = if words[offset_word].orig_head < offset && offset_word + 1 < words.len() {
            // Mid-word: start at the next word instead.
            words[offset_word + 1].orig_head.min(anchor)
        } else {
            offset
        };

        let budget_end = (offset + self.size).min(source_len);
        // Clip the tail to the last word that fits completely; a source
        // that is one giant word is cut mid-word instead.
        let mut end = budget_end;
        if let Some(last_fitting) = words
            .iter()
            .rposition(|w| w.orig_head >= offset && w.orig_tail < budget_end)
        {
            end = words[last_fitting].orig_tail + 1;
        }

        // Map every pattern into original positions, collecting the
        // ones whose range fits inside the window. A pattern that
        // begins inside but ends beyond the window trims the window
        // down to its head rather than being half-highlighted.
        let mut ranges: Vec<WordRange> = Vec::new();
        for &(norm_head, id) in locations {
            let norm_tail = norm_head + self.checker.pattern_length(id) - 1;
            let Some((head, tail)) = map_pattern(words, norm_head, norm_tail) else {
                continue;
            };
            if tail < offset {
                continue;
            }
            if head >= end {
                break;
            }
            if tail >= end {
                // Exclude the half-covered pattern, unless that would
                // empty the window (it then stays as plain text).
                if head > offset {
                    end = end.min(head);
                }
                break;
            }
            match ranges.last_mut() {
                // Overlapping matches merge into one tag pair.
                Some(prev) if head <= prev.1 => prev.1 = prev.1.max(tail),
                _ => ranges.push((head.max(offset), tail)),
            }
        }
        ranges.retain(|(head, tail)| *head >= offset && *tail < end);

        // An ellipsis is suppressed where the window borders a
        // sentence period.
        let head_ellipsis = !words[..offset_word.min(words.len())]
            .iter()
            .rev()
            .take(1)
            .any(|w| w.is_period);
        let after = words.iter().find(|w| w.orig_head >= end);
        let tail_ellipsis = !after.map(|w| w.is_period).unwrap_or(false);

        let size = end.saturating_sub(offset);
        (offset, size, head_ellipsis, tail_ellipsis, ranges)
    }

    /// Stream the window, wrapping each range in tags and applying the
    /// escape method, with ellipses at unanchored edges.
    #[allow(clippy::too_many_arguments)]
    fn emit(
        &self,
        source: &[char],
        offset: usize,
        size: usize,
        rough_size: u32,
        head_ellipsis: bool,
        tail_ellipsis: bool,
        ranges: &[WordRange],
    ) -> (String, bool) {
        debug_assert!(ranges.iter().all(|(head, tail)| head <= tail));

        let rough = if rough_size == 0 {
            usize::MAX
        } else {
            rough_size as usize
        };
        let end = (offset + size).min(source.len());

        let mut out = String::new();
        let mut hit = false;

        if head_ellipsis && (offset > 0 || source.len() >= rough) {
            out.push_str(&self.ellipsis);
        }

        let mut prev = offset;
        for &(head, tail) in ranges {
            if head < prev || tail >= end {
                continue;
            }
            self.write_escaped(&source[prev..head], &mut out);
            out.push_str(&self.start_tag);
            self.write_escaped(&source[head..=tail], &mut out);
            out.push_str(&self.end_tag);
            prev = tail + 1;
            hit = true;
        }
        if prev < end {
            self.write_escaped(&source[prev..end], &mut out);
        }

        if tail_ellipsis && (end < source.len() || source.len() >= rough) {
            out.push_str(&self.ellipsis);
        }
        (out, hit)
    }

    fn write_escaped(&self, text: &[char], out: &mut String) {
        match self.escape {
            Escape::None => out.extend(text.iter()),
            Escape::Html => {
                for c in text {
                    match c {
                        '"' => out.push_str("&quot;"),
                        '&' => out.push_str("&amp;"),
                        '<' => out.push_str("&lt;"),
                        '>' => out.push_str("&gt;"),
                        _ => out.push(*c),
                    }
                }
            }
        }
    }
}

/// Map a normalized pattern range back to original positions.
///
/// Inside a word the boundary is computed from the ratio of the
/// original and normalized word lengths, rounded away from the word
/// center and clamped to the word.
fn map_pattern(words: &[WordInfo], norm_head: usize, norm_tail: usize) -> Option<(usize, usize)> {
    let head_word = words.iter().find(|w| w.norm_tail >= norm_head)?;
    let tail_word = words
        .iter()
        .rev()
        .find(|w| w.norm_head <= norm_tail)
        .copied()
        .unwrap_or(*head_word);

    let head = if norm_head <= head_word.norm_head {
        // The pattern starts at or before the word (separator sentinel).
        head_word.orig_head
    } else {
        let ratio = (head_word.orig_tail - head_word.orig_head + 1) as f64
            / (head_word.norm_tail - head_word.norm_head + 1) as f64;
        if (head_word.norm_head + head_word.norm_tail) as f64 / 2.0 <= norm_head as f64 {
            // Tail side: round the covered length up.
            let length = ratio * (head_word.norm_tail - norm_head + 1) as f64;
            let length = (length.ceil() as usize)
                .min(head_word.orig_tail - head_word.orig_head + 1)
                .max(1);
            head_word.orig_tail + 1 - length
        } else {
            let diff = (ratio * (norm_head - head_word.norm_head) as f64) as usize;
            head_word.orig_head + diff.min(head_word.orig_tail - head_word.orig_head)
        }
    };

    let tail = if norm_tail >= tail_word.norm_tail {
        tail_word.orig_tail
    } else {
        let ratio = (tail_word.orig_tail - tail_word.orig_head + 1) as f64
            / (tail_word.norm_tail - tail_word.norm_head + 1) as f64;
        if (tail_word.norm_head + tail_word.norm_tail) as f64 / 2.0 <= norm_tail as f64 {
            let diff = ratio * (tail_word.norm_tail - norm_tail) as f64;
            let diff = (diff.ceil() as usize).min(tail_word.orig_tail - tail_word.orig_head);
            tail_word.orig_tail - diff
        } else {
            let length = (ratio * (norm_tail - tail_word.norm_head + 1) as f64) as usize;
            tail_word.orig_head + length.max(1) - 1
        }
    };

    Some((head, tail.max(head)))
}
