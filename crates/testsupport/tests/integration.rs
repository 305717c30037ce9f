//! Cross-crate scenarios: the engine invariants exercised end to end.

use std::sync::Arc;

use common::{CancelToken, Config, EngineError, FixMode, TransactionId};
use driver::{FullTextFile, LobInterface, OpenMode, OpenOptions};
use fileid::{DelayedMode, FieldType, FileId};
use kwic::{Kwic, Properties};
use lob::Codec;
use merge::MergeDaemon;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use testsupport::fixtures::payload;
use testsupport::{StoreContext, lob_store, simple_file_id};
use types::{Data, LanguageSet, MatchMode, ObjectId, SearchTerm};

fn update_options() -> OpenOptions {
    let mut options = OpenOptions::new();
    options.set_open_mode(OpenMode::Update);
    options
}

#[test]
fn hint_parse_delayed_async_without_vacuum() {
    let ctx = StoreContext::new();
    let id = simple_file_id(&ctx.path("idx"), "delayed=(async,vacuum=false)");
    assert_eq!(id.delayed_mode(), DelayedMode::Async);
    assert!(!id.is_vacuum());
}

#[test]
fn hint_parse_dual_nolocation_is_rejected() {
    let ctx = StoreContext::new();
    let result = FileId::create(
        vec![FieldType::Str],
        "inverted=(indexing=Dual,normalized=true,nolocation=true)",
        &Config::default(),
        ctx.path("idx"),
        common::LockName::new("db", "t", "ft"),
    );
    assert!(matches!(result, Err(EngineError::NotSupported(_))));
}

#[test]
fn lob_insert_expunge_compact_lifecycle() {
    testsupport::init_logging();
    let ctx = StoreContext::new();
    let store = lob_store(&ctx.path("lob"), Codec::Raw, ctx.oracle.clone());

    let tx1 = ctx.begin_tx();
    store
        .open(tx1, FixMode::Write, ctx.cancel_token())
        .unwrap();

    let ids: Vec<ObjectId> = (0..3).map(|_| store.insert(&payload(5000)).unwrap()).collect();
    store.expunge(ids[1]).unwrap();

    // The expunging transaction is still active: the block stays put.
    let tx2 = ctx.begin_tx();
    store.open(tx2, FixMode::Write, ctx.cancel_token()).unwrap();
    assert!(!store.compact().unwrap());
    assert!(store.is_exist_expunge_data().unwrap());

    // After it ends, a fresh pass frees the block onto the free list.
    ctx.end_tx(tx1);
    let tx3 = ctx.begin_tx();
    store.open(tx3, FixMode::Write, ctx.cancel_token()).unwrap();
    assert!(store.compact().unwrap());
    assert!(!store.is_exist_expunge_data().unwrap());
    assert_eq!(store.insert(b"reused").unwrap(), ids[1]);
}

#[test]
fn lob_round_trips_survive_page_cache_churn() {
    let ctx = StoreContext::new();
    let store = lob_store(&ctx.path("lob"), Codec::Raw, ctx.oracle.clone());
    store
        .open(ctx.begin_tx(), FixMode::Write, ctx.cancel_token())
        .unwrap();

    // insert; get == original
    let original = payload(9000);
    let id = store.insert(&original).unwrap();
    assert_eq!(store.get(id, 0, 9000).unwrap().0, original);

    // append(a); append(b): prefix equals a ∥ b
    let a = payload(3000);
    let b: Vec<u8> = (0..2500).map(|i| (i % 17) as u8).collect();
    let id2 = store.insert(&a).unwrap();
    store.append(id2, &b).unwrap();
    let got = store.get(id2, 0, a.len() + b.len()).unwrap().0;
    assert_eq!(&got[..a.len()], &a[..]);
    assert_eq!(&got[a.len()..], &b[..]);

    // insert; expunge; undo_expunge: get == original
    store.expunge(id).unwrap();
    store.undo_expunge(id).unwrap();
    assert_eq!(store.get(id, 0, 9000).unwrap().0, original);

    // insert; update(b); undo_update: get == original
    store.update(id, &payload(1000)).unwrap();
    store.undo_update(id).unwrap();
    assert_eq!(store.get(id, 0, 9000).unwrap().0, original);

    store.flush_all_pages().unwrap();
}

#[test]
fn delayed_merge_pipeline_over_the_driver() {
    let ctx = StoreContext::new();
    let daemon = Arc::new(MergeDaemon::start(2));
    let id = simple_file_id(&ctx.path("ft"), "delayed=async");
    let mut file = FullTextFile::new(id, 10, Some(daemon.clone()));

    let tx = ctx.begin_tx();
    file.create(tx).unwrap();
    file.open(tx, &update_options()).unwrap();
    for i in 0..4 {
        file.insert(&[Data::Str(format!("document {i}"))]).unwrap();
    }
    file.close().unwrap();

    daemon.wait_idle();
    assert_eq!(file.count(), 4);
    daemon.shutdown();
}

#[test]
fn kwic_highlights_across_the_surface() {
    let mut kwic = Kwic::new(&Config::default());
    let properties = Properties {
        rough_sizes: vec![64],
        search_terms: vec![Data::SearchTerm(SearchTerm::new("XYZ", MatchMode::String))],
        una_parameters: Vec::new(),
    };
    kwic.set(&properties, "<b>", "</b>", "\u{2026}", "", 7).unwrap();

    let (snippet, hit) = kwic
        .generate("abcXYZdefXYZghi", 0, &LanguageSet::default())
        .unwrap();
    assert!(hit);
    assert_eq!(snippet, "\u{2026}<b>XYZ</b>def\u{2026}");
    assert_eq!(kwic.rough_size(0), 64);
}

#[test]
fn lob_driver_round_trip_through_tuples() {
    let ctx = StoreContext::new();
    let id = simple_file_id(&ctx.path("lob"), "");
    let mut lob = LobInterface::new(id, Codec::Zlib, ctx.oracle.clone());

    let tx = ctx.begin_tx();
    lob.create(tx).unwrap();
    lob.open(tx, &update_options()).unwrap();

    let value = vec![b'z'; 12_000];
    let oid = lob.insert(&[Data::Bytes(value.clone())]).unwrap();
    lob.fetch(&[Data::ObjectId(oid)]).unwrap();
    assert_eq!(lob.get().unwrap().unwrap(), vec![Data::Bytes(value)]);

    // The compressed variant refuses in-place replace.
    let locator = lob.locator(&[Data::ObjectId(oid)]).unwrap();
    assert!(matches!(
        locator.replace(1, b"xx"),
        Err(EngineError::NotSupported(_))
    ));
    lob.close().unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn lob_store_round_trips_any_payload(
        bytes in testsupport::proptest_generators::lob_payload()
    ) {
        let ctx = StoreContext::new();
        let store = lob_store(&ctx.path("lob"), Codec::Raw, ctx.oracle.clone());
        store.open(TransactionId(1), FixMode::Write, CancelToken::new()).unwrap();

        let id = store.insert(&bytes).unwrap();
        let (back, is_null) = store.get(id, 0, bytes.len().max(1)).unwrap();
        prop_assert!(!is_null);
        prop_assert_eq!(back, bytes);
    }

    #[test]
    fn compressed_lob_round_trips_any_payload(
        bytes in testsupport::proptest_generators::lob_payload()
    ) {
        let ctx = StoreContext::new();
        let store = lob_store(&ctx.path("lob"), Codec::Zlib, ctx.oracle.clone());
        store.open(TransactionId(1), FixMode::Write, CancelToken::new()).unwrap();

        let id = store.insert(&bytes).unwrap();
        let (back, _) = store.get(id, 0, bytes.len().max(1)).unwrap();
        prop_assert_eq!(back, bytes);
    }

    #[test]
    fn delayed_hints_always_parse(hint in testsupport::proptest_generators::delayed_hint()) {
        let ctx = StoreContext::new();
        let id = simple_file_id(&ctx.path("idx"), &hint);
        // Whatever the form, vacuum defaults on unless disabled.
        if !hint.contains("vacuum=false") {
            prop_assert!(id.is_vacuum());
        }
    }

    #[test]
    fn kwic_terms_never_panic(
        terms in proptest::collection::vec(
            testsupport::proptest_generators::search_term(), 1..4),
        source in "[a-z ]{10,60}",
        size in 1usize..40,
    ) {
        let mut kwic = Kwic::new(&Config::default());
        let properties = Properties {
            rough_sizes: Vec::new(),
            search_terms: terms,
            una_parameters: Vec::new(),
        };
        kwic.set(&properties, "<b>", "</b>", "...", "", size).unwrap();
        let (snippet, _) = kwic.generate(&source, 0, &LanguageSet::default()).unwrap();
        prop_assert!(!snippet.is_empty() || source.trim().is_empty());
    }
}
