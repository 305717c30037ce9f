use super::*;

#[test]
fn config_defaults_match_engine_parameters() {
    let config = Config::default();
    assert_eq!(config.leaf_page_size_kib, 16);
    assert_eq!(config.overflow_page_size_kib, 16);
    assert_eq!(config.btree_page_size_kib, 16);
    assert_eq!(config.other_page_size_kib, 4);
    assert_eq!(config.page_cache_count, 10);
    assert_eq!(config.batch_size_max, 60 << 20);
    assert_eq!(config.kwic_expand_limit, 16);
}

#[test]
fn config_builder_overrides() {
    let config = Config::builder()
        .page_cache_count(2)
        .kwic_margin_percent(0)
        .build();
    assert_eq!(config.page_cache_count, 2);
    assert_eq!(config.kwic_margin_percent, 0);
    assert_eq!(config.leaf_page_size_kib, 16);
}

#[test]
fn cancel_token_is_shared_between_clones() {
    let token = CancelToken::new();
    let other = token.clone();
    assert!(token.check().is_ok());

    other.cancel();
    assert!(token.is_cancelled());
    assert!(matches!(token.check(), Err(EngineError::Cancelled)));
}

#[test]
fn invalid_page_id_round_trips() {
    let json = serde_json::to_string(&PageId::INVALID).unwrap();
    let back: PageId = serde_json::from_str(&json).unwrap();
    assert!(back.is_invalid());
}

#[test]
fn fix_mode_predicates() {
    assert!(FixMode::ReadOnly.is_read_only());
    assert!(!FixMode::Write.is_discardable());
    assert!(FixMode::WriteDiscardable.is_discardable());
}
