//! Proptest strategies for engine values.

use proptest::prelude::*;
use types::{Data, MatchMode, SearchTerm};

/// Payload bytes spanning zero to several data pages.
pub fn lob_payload() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), 0..20_000)
}

/// A valid `delayed` hint value.
pub fn delayed_hint() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("delayed".to_string()),
        Just("delayed=true".to_string()),
        Just("delayed=false".to_string()),
        Just("delayed=sync".to_string()),
        Just("delayed=async".to_string()),
        Just("delayed=(sync,vacuum=false)".to_string()),
        Just("delayed=(async,vacuum=true)".to_string()),
    ]
}

/// A search term over lowercase ASCII.
pub fn search_term() -> impl Strategy<Value = Data> {
    ("[a-z]{1,8}", match_mode()).prop_map(|(term, mode)| {
        Data::SearchTerm(SearchTerm::new(term, mode))
    })
}

pub fn match_mode() -> impl Strategy<Value = MatchMode> {
    prop_oneof![
        Just(MatchMode::String),
        Just(MatchMode::WordHead),
        Just(MatchMode::WordTail),
        Just(MatchMode::SimpleWord),
        Just(MatchMode::ExactWord),
    ]
}
