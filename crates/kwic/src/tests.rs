use super::*;
use pretty_assertions::assert_eq;
use types::{MatchMode, SearchTerm};

fn props(terms: Vec<Data>) -> Properties {
    Properties {
        rough_sizes: Vec::new(),
        search_terms: terms,
        una_parameters: Vec::new(),
    }
}

fn term(s: &str) -> Data {
    Data::SearchTerm(SearchTerm::new(s, MatchMode::String))
}

fn kwic_for(terms: Vec<Data>, size: usize) -> Kwic {
    let mut kwic = Kwic::new(&Config::default());
    kwic.set(&props(terms), "<b>", "</b>", "\u{2026}", "", size)
        .unwrap();
    kwic
}

fn visible_len(snippet: &str) -> usize {
    snippet
        .replace("<b>", "")
        .replace("</b>", "")
        .replace('\u{2026}', "")
        .chars()
        .count()
}

#[test]
fn window_covers_the_first_hit() {
    let mut kwic = kwic_for(vec![term("XYZ")], 7);
    let (snippet, hit) = kwic
        .generate("abcXYZdefXYZghi", 0, &LanguageSet::default())
        .unwrap();
    assert!(hit);
    assert_eq!(snippet, "\u{2026}<b>XYZ</b>def\u{2026}");
}

#[test]
fn full_window_highlights_every_hit() {
    let mut kwic = kwic_for(vec![term("XYZ")], 15);
    let (snippet, hit) = kwic
        .generate("abcXYZdefXYZghi", 0, &LanguageSet::default())
        .unwrap();
    assert!(hit);
    assert_eq!(snippet, "abc<b>XYZ</b>def<b>XYZ</b>ghi");
}

#[test]
fn no_hit_emits_the_head_of_the_source() {
    let mut kwic = kwic_for(vec![term("zzz")], 5);
    let (snippet, hit) = kwic
        .generate("abcdefghij", 0, &LanguageSet::default())
        .unwrap();
    assert!(!hit);
    assert_eq!(snippet, "abcde\u{2026}");
}

#[test]
fn empty_end_tag_reuses_the_start_tag() {
    let mut kwic = Kwic::new(&Config::default());
    kwic.set(&props(vec![term("b")]), "*", "", "", "", 3).unwrap();
    let (snippet, _) = kwic.generate("abc", 0, &LanguageSet::default()).unwrap();
    assert_eq!(snippet, "a*b*c");
}

#[test]
fn html_escape_replaces_metacharacters() {
    let mut kwic = Kwic::new(&Config::default());
    kwic.set(&props(vec![term("b")]), "<b>", "</b>", "", "html", 9)
        .unwrap();
    let (snippet, _) = kwic
        .generate("a<b>&\"c", 0, &LanguageSet::default())
        .unwrap();
    assert_eq!(snippet, "a&lt;<b>b</b>&gt;&amp;&quot;c");
}

#[test]
fn unknown_escape_method_is_rejected() {
    let mut kwic = Kwic::new(&Config::default());
    assert!(matches!(
        kwic.set(&props(vec![term("x")]), "", "", "", "latin1", 5),
        Err(EngineError::BadArgument)
    ));
}

#[test]
fn zero_size_is_rejected() {
    let mut kwic = Kwic::new(&Config::default());
    assert!(matches!(
        kwic.set(&props(vec![term("x")]), "", "", "", "", 0),
        Err(EngineError::BadArgument)
    ));
}

#[test]
fn synonyms_highlight_whichever_occurs() {
    let mut kwic = kwic_for(
        vec![Data::Array(vec![term("cat"), term("dog")])],
        11,
    );
    let (snippet, hit) = kwic
        .generate("the dog ran", 0, &LanguageSet::default())
        .unwrap();
    assert!(hit);
    assert_eq!(snippet, "the <b>dog</b> ran");
}

#[test]
fn best_scoring_window_wins() {
    // "one" and "two" both hit only in the second half; the window
    // should cover that region rather than the lone first hit.
    let mut kwic = kwic_for(vec![term("one"), term("two")], 8);
    let source = "one_________________onetwo___";
    let (snippet, hit) = kwic.generate(source, 0, &LanguageSet::default()).unwrap();
    assert!(hit);
    assert!(snippet.contains("<b>one</b><b>two</b>"), "got {snippet}");
}

#[test]
fn overlapping_matches_share_one_tag_pair() {
    let mut kwic = kwic_for(vec![term("aba")], 7);
    let (snippet, hit) = kwic.generate("xxababa", 0, &LanguageSet::default()).unwrap();
    assert!(hit);
    // "ababa" holds two overlapping hits merged into one pair.
    assert_eq!(snippet, "xx<b>ababa</b>");
}

#[test]
fn sentence_period_suppresses_the_ellipsis() {
    let mut kwic = kwic_for(vec![term("target")], 10);
    let source = "intro words . target tail more words here";
    let (snippet, hit) = kwic.generate(source, 0, &LanguageSet::default()).unwrap();
    assert!(hit);
    // The window begins right after the period: no head ellipsis.
    assert!(snippet.starts_with("<b>target</b>"), "got {snippet}");
    assert!(snippet.ends_with('\u{2026}'), "got {snippet}");
}

#[test]
fn word_clipping_never_splits_a_word() {
    let mut kwic = kwic_for(vec![term("quick")], 12);
    let (snippet, hit) = kwic
        .generate("the quick brown fox", 0, &LanguageSet::default())
        .unwrap();
    assert!(hit);
    // "fox" does not fit completely and is clipped away whole.
    assert_eq!(snippet, "\u{2026}<b>quick</b> brown\u{2026}");
}

#[test]
fn array_value_generates_within_the_located_segment() {
    let segments = vec!["abcd".to_string(), "efgh".to_string(), "ijkl".to_string()];
    let mut kwic = kwic_for(vec![term("fg")], 4);

    let (snippet, hit) = kwic
        .generate_array(&segments, Some(5), 0, &LanguageSet::default())
        .unwrap();
    assert!(hit);
    // Exactly one highlighted pair, and the window touches both array
    // boundaries so no ellipsis appears.
    assert_eq!(snippet, "e<b>fg</b>h");
}

#[test]
fn array_value_without_position_uses_the_first_segment() {
    let segments = vec!["abcd".to_string(), "efgh".to_string()];
    let mut kwic = kwic_for(vec![term("zz")], 4);
    let (snippet, hit) = kwic
        .generate_array(&segments, None, 0, &LanguageSet::default())
        .unwrap();
    assert!(!hit);
    assert_eq!(snippet, "abcd");
}

#[test]
fn later_set_calls_only_add_terms() {
    let mut kwic = kwic_for(vec![term("abc")], 9);
    kwic.set(&props(vec![term("ghi")]), "ignored", "", "", "", 99)
        .unwrap();
    let (snippet, hit) = kwic
        .generate("abcdefghi", 0, &LanguageSet::default())
        .unwrap();
    assert!(hit);
    // Both the first and the second term list highlight.
    assert_eq!(snippet, "<b>abc</b>def<b>ghi</b>");
}

#[test]
#[should_panic]
fn rough_size_out_of_range_panics() {
    let kwic = Kwic::new(&Config::default());
    let _ = kwic.rough_size(3);
}

#[test]
fn rough_sizes_come_from_the_properties() {
    let mut kwic = Kwic::new(&Config::default());
    let properties = Properties {
        rough_sizes: vec![120, 240],
        search_terms: vec![term("x")],
        una_parameters: Vec::new(),
    };
    kwic.set(&properties, "", "", "", "", 10).unwrap();
    assert_eq!(kwic.rough_size(0), 120);
    assert_eq!(kwic.rough_size(1), 240);
}

#[test]
fn properties_decode_from_data_pairs() {
    let keys = vec![
        Data::Str("RoughKwicSize".into()),
        Data::Str("SearchTermList".into()),
    ];
    let values = vec![
        Data::Array(vec![Data::UInt(100)]),
        Data::Array(vec![term("needle")]),
    ];
    let props = Properties::from_pairs(&keys, &values).unwrap();
    assert_eq!(props.rough_sizes, vec![100]);
    assert_eq!(props.search_terms.len(), 1);

    let bad_keys = vec![Data::Str("Nonsense".into())];
    let bad_values = vec![Data::Array(vec![])];
    assert!(Properties::from_pairs(&bad_keys, &bad_values).is_err());
}

#[test]
fn snippet_length_stays_within_the_band() {
    let source = "abcXYZdefXYZghi";
    let margin = Config::default().kwic_margin_percent as usize;
    for n in 1..=source.len() {
        let mut kwic = kwic_for(vec![term("XYZ")], n);
        let (snippet, _) = kwic.generate(source, 0, &LanguageSet::default()).unwrap();
        let visible = visible_len(&snippet);
        assert!(visible <= n, "size {n} emitted {visible} chars: {snippet}");
        // The lower bound only binds while enough text remains.
        if n >= 3 {
            let floor = (n * (100 - margin) / 100).min(source.len() - 3);
            assert!(
                visible >= floor.min(n.saturating_sub(2)),
                "size {n} emitted only {visible} chars: {snippet}"
            );
        }
    }
}
