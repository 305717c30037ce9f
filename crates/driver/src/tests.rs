use super::*;
use std::sync::Arc;

use common::{CancelToken, Config, EngineError, LockName, TransactionId};
use common::verify::{Progress, Treatment};
use fileid::{FieldType, FileId};
use lob::{ActiveTransactions, Codec};
use merge::MergeDaemon;
use types::{Data, ObjectId};

use crate::options::key;

fn file_id(path: &std::path::Path, hint: &str) -> FileId {
    FileId::create(
        vec![FieldType::Str],
        hint,
        &Config::default(),
        path,
        LockName::new("db", "t", "ft"),
    )
    .unwrap()
}

fn update_options() -> OpenOptions {
    let mut options = OpenOptions::new();
    options.set_open_mode(OpenMode::Update);
    options
}

fn tx(n: u64) -> TransactionId {
    TransactionId(n)
}

// ---- full-text driver ----------------------------------------------

#[test]
fn create_is_staged_until_first_insert() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ft");
    let mut file = FullTextFile::new(file_id(&path, ""), 10, None);

    file.create(tx(1)).unwrap();
    assert!(!path.exists(), "create must not materialise the directory");
    assert!(!file.is_accessible(true));

    file.open(tx(1), &update_options()).unwrap();
    file.insert(&[Data::Str("first document".into())]).unwrap();
    assert!(file.is_accessible(true));
    file.close().unwrap();
}

#[test]
fn mutations_need_an_update_open() {
    let dir = tempfile::tempdir().unwrap();
    let mut file = FullTextFile::new(file_id(&dir.path().join("ft"), ""), 10, None);
    file.create(tx(1)).unwrap();

    assert!(matches!(
        file.insert(&[Data::Str("x".into())]),
        Err(EngineError::FileNotOpen)
    ));

    let mut read = OpenOptions::new();
    read.set_open_mode(OpenMode::Read);
    file.open(tx(1), &read).unwrap();
    assert!(matches!(
        file.insert(&[Data::Str("x".into())]),
        Err(EngineError::BadArgument)
    ));
    file.close().unwrap();
}

#[test]
fn tuple_shape_is_validated() {
    let dir = tempfile::tempdir().unwrap();
    let mut file = FullTextFile::new(file_id(&dir.path().join("ft"), ""), 10, None);
    file.create(tx(1)).unwrap();
    file.open(tx(1), &update_options()).unwrap();

    assert!(matches!(
        file.insert(&[Data::UInt(1)]),
        Err(EngineError::ClassCast(_))
    ));
    assert!(matches!(
        file.insert(&[Data::Str("a".into()), Data::Str("b".into())]),
        Err(EngineError::BadArgument)
    ));
    // Null keys are accepted.
    file.insert(&[Data::Null]).unwrap();
    file.close().unwrap();
}

#[test]
fn insert_update_expunge_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let mut file = FullTextFile::new(file_id(&dir.path().join("ft"), ""), 10, None);
    file.create(tx(1)).unwrap();
    file.open(tx(1), &update_options()).unwrap();

    let a = file.insert(&[Data::Str("alpha".into())]).unwrap();
    let b = file.insert(&[Data::Str("beta".into())]).unwrap();
    assert_ne!(a, b);
    assert_eq!(file.count(), 2);

    let b2 = file.update(b, &[Data::Str("beta two".into())]).unwrap();
    assert_ne!(b, b2);
    assert_eq!(file.count(), 2);

    file.expunge(a).unwrap();
    assert_eq!(file.count(), 1);
    file.close().unwrap();
}

#[test]
fn sync_mode_merges_before_the_statement_returns() {
    let dir = tempfile::tempdir().unwrap();
    let mut file = FullTextFile::new(
        file_id(&dir.path().join("ft"), "delayed=sync"),
        10,
        None,
    );
    file.create(tx(1)).unwrap();
    file.open(tx(1), &update_options()).unwrap();

    file.insert(&[Data::Str("doc".into())]).unwrap();
    // The small segment was merged away synchronously.
    let table = file_segments(&file);
    assert!(!table.has_small_documents());
    assert_eq!(table.main.unwrap().doc_count, 1);
    file.close().unwrap();
}

#[test]
fn async_mode_enqueues_discard_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = Arc::new(MergeDaemon::start(1));
    let mut file = FullTextFile::new(
        file_id(&dir.path().join("ft"), "delayed=async"),
        10,
        Some(daemon.clone()),
    );
    file.create(tx(1)).unwrap();
    file.open(tx(1), &update_options()).unwrap();

    file.insert(&[Data::Str("doc".into())]).unwrap();
    file.close().unwrap();

    daemon.wait_idle();
    // The background worker merged the small segment.
    let table = file_segments(&file);
    assert!(!table.has_small_documents());
    assert_eq!(file.count(), 1);
}

#[test]
fn batch_mode_defers_the_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = Arc::new(MergeDaemon::start(1));
    let mut file = FullTextFile::new(
        file_id(&dir.path().join("ft"), "delayed=async"),
        10,
        Some(daemon.clone()),
    );
    file.create(tx(1)).unwrap();

    let mut options = OpenOptions::new();
    options.set_open_mode(OpenMode::Batch);
    file.open(tx(1), &options).unwrap();
    file.insert(&[Data::Str("doc".into())]).unwrap();
    assert_eq!(daemon.pending_jobs(), 0, "batch mode must not enqueue");
    file.close().unwrap();
    daemon.shutdown();
}

#[test]
fn cursor_projects_virtual_fields() {
    let dir = tempfile::tempdir().unwrap();
    let mut file = FullTextFile::new(file_id(&dir.path().join("ft"), ""), 10, None);
    file.create(tx(1)).unwrap();
    file.open(tx(1), &update_options()).unwrap();
    file.insert(&[Data::Str("one".into())]).unwrap();
    file.insert(&[Data::Str("two".into())]).unwrap();
    file.close().unwrap();

    let mut options = OpenOptions::new();
    options.set_open_mode(OpenMode::Read);
    // Project rowid and count (virtual fields follow the value field).
    options.set_array(key::TARGET_FIELDS, vec![1, 4]);
    file.open(tx(2), &options).unwrap();

    let first = file.get().unwrap().unwrap();
    assert_eq!(first, vec![Data::UInt(0), Data::UInt(2)]);
    let second = file.get().unwrap().unwrap();
    assert_eq!(second[0], Data::UInt(1));
    assert!(file.get().unwrap().is_none());
    file.close().unwrap();
}

#[test]
fn planner_hooks_accept_and_reject() {
    let dir = tempfile::tempdir().unwrap();
    let file = FullTextFile::new(file_id(&dir.path().join("ft"), ""), 10, None);

    let mut options = OpenOptions::new();
    assert!(file.search_parameter(&SearchCondition::Contains("abc"), &mut options));
    assert_eq!(options.open_mode().unwrap(), OpenMode::Search);
    assert!(!file.search_parameter(&SearchCondition::Equals, &mut options));
    assert!(!file.search_parameter(&SearchCondition::Contains(""), &mut options));

    // Field 0 is the value; 1 rowid, 2 score, 3 cluster, 4 count.
    assert!(file.projection_parameter(&[0, 1, 2], &mut options));
    assert!(!file.projection_parameter(&[3], &mut options), "not clustered");
    assert!(file.projection_parameter(&[4], &mut options));
    assert!(!file.projection_parameter(&[9], &mut options));

    assert!(file.update_parameter(&[0], &mut options));
    assert!(!file.update_parameter(&[1], &mut options));

    assert!(file.sort_parameter(&[2], &mut options));
    assert!(file.sort_parameter(&[-2], &mut options));
    assert!(!file.sort_parameter(&[1], &mut options));

    assert!(file.limit_parameter(10, 0, &mut options));
    assert!(!file.limit_parameter(0, 0, &mut options));
}

#[test]
fn compact_vacuums_expunged_documents() {
    let dir = tempfile::tempdir().unwrap();
    let mut file = FullTextFile::new(
        file_id(&dir.path().join("ft"), "delayed, deleteflag"),
        10,
        None,
    );
    file.create(tx(1)).unwrap();
    file.open(tx(1), &update_options()).unwrap();
    let a = file.insert(&[Data::Str("one".into())]).unwrap();
    file.insert(&[Data::Str("two".into())]).unwrap();
    file.expunge(a).unwrap();
    file.close().unwrap();

    let mut incomplete = false;
    let mut modified = false;
    file.compact(tx(2), &CancelToken::new(), &mut incomplete, &mut modified)
        .unwrap();
    assert!(modified);
    assert!(!incomplete);
    assert_eq!(file_segments(&file).expunged_total(), 0);

    // A second compact finds nothing to do.
    let mut modified = false;
    file.compact(tx(3), &CancelToken::new(), &mut incomplete, &mut modified)
        .unwrap();
    assert!(!modified);
}

#[test]
fn verify_runs_clean_on_a_fresh_index() {
    let dir = tempfile::tempdir().unwrap();
    let mut file = FullTextFile::new(file_id(&dir.path().join("ft"), ""), 10, None);
    file.create(tx(1)).unwrap();
    file.open(tx(1), &update_options()).unwrap();
    file.insert(&[Data::Str("doc".into())]).unwrap();
    file.close().unwrap();

    let mut progress = Progress::new();
    file.verify(tx(2), Treatment::read_only(), &CancelToken::new(), &mut progress)
        .unwrap();
    assert!(progress.is_good(), "faults: {:?}", progress.faults());
}

#[test]
fn move_updates_the_file_id_path() {
    let dir = tempfile::tempdir().unwrap();
    let from = dir.path().join("a");
    let to = dir.path().join("b");
    let mut file = FullTextFile::new(file_id(&from, ""), 10, None);
    file.create(tx(1)).unwrap();
    file.open(tx(1), &update_options()).unwrap();
    file.insert(&[Data::Str("doc".into())]).unwrap();
    file.close().unwrap();

    file.move_to(tx(1), &to).unwrap();
    assert_eq!(file.file_id().path(), to);
    assert!(!from.exists());
    assert_eq!(file.count(), 1);
}

/// Read the segment table back through a fresh attach at the same path.
fn file_segments(file: &FullTextFile) -> inverted::segment::SegmentTable {
    let index = inverted::IndexFile::attach(file.file_id(), file.file_id().path(), false, 4);
    index.open(common::FixMode::ReadOnly, CancelToken::new());
    let table = index.segments().unwrap();
    index.close();
    table
}

// ---- lob driver -----------------------------------------------------

fn lob_interface(path: &std::path::Path, codec: Codec) -> (LobInterface, Arc<ActiveTransactions>) {
    let oracle = Arc::new(ActiveTransactions::new());
    let id = FileId::create(
        vec![FieldType::Str],
        "",
        &Config::default(),
        path,
        LockName::new("db", "t", "lob"),
    )
    .unwrap();
    (LobInterface::new(id, codec, oracle.clone()), oracle)
}

#[test]
fn lob_insert_fetch_get_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let (mut lob, _) = lob_interface(&dir.path().join("lob"), Codec::Raw);
    lob.create(tx(1)).unwrap();
    lob.open(tx(1), &update_options()).unwrap();

    let id = lob.insert(&[Data::Bytes(vec![7u8; 9000])]).unwrap();
    lob.fetch(&[Data::ObjectId(id)]).unwrap();
    let tuple = lob.get().unwrap().unwrap();
    assert_eq!(tuple, vec![Data::Bytes(vec![7u8; 9000])]);
    // The cursor yields each fetched object once.
    assert!(lob.get().unwrap().is_none());
    lob.close().unwrap();
}

#[test]
fn lob_cursor_mark_rewind() {
    let dir = tempfile::tempdir().unwrap();
    let (mut lob, _) = lob_interface(&dir.path().join("lob"), Codec::Raw);
    lob.create(tx(1)).unwrap();
    lob.open(tx(1), &update_options()).unwrap();

    let id = lob.insert(&[Data::Str("payload".into())]).unwrap();
    lob.fetch(&[Data::ObjectId(id)]).unwrap();
    lob.mark();
    assert!(lob.get().unwrap().is_some());
    assert!(lob.get().unwrap().is_none());

    lob.rewind();
    assert!(lob.get().unwrap().is_some());

    lob.reset();
    assert!(lob.get().unwrap().is_none());
    lob.close().unwrap();
}

#[test]
fn lob_locator_is_one_based() {
    let dir = tempfile::tempdir().unwrap();
    let (mut lob, _) = lob_interface(&dir.path().join("lob"), Codec::Raw);
    lob.create(tx(1)).unwrap();
    lob.open(tx(1), &update_options()).unwrap();

    let id = lob.insert(&[Data::Str("abcdefgh".into())]).unwrap();
    let locator = lob.locator(&[Data::ObjectId(id)]).unwrap();

    assert_eq!(locator.get(1, 3).unwrap(), b"abc");
    assert_eq!(locator.get(4, 2).unwrap(), b"de");
    assert!(matches!(locator.get(0, 1), Err(EngineError::BadArgument)));

    locator.append(b"ij").unwrap();
    assert_eq!(locator.length().unwrap(), 10);

    locator.replace(2, b"XY").unwrap();
    assert_eq!(locator.get(1, 4).unwrap(), b"aXYd");

    locator.truncate(4).unwrap();
    assert_eq!(locator.length().unwrap(), 4);
    lob.close().unwrap();
}

#[test]
fn lob_compact_frees_after_transaction_ends() {
    let dir = tempfile::tempdir().unwrap();
    let (mut lob, oracle) = lob_interface(&dir.path().join("lob"), Codec::Raw);
    lob.create(tx(1)).unwrap();

    oracle.begin(tx(1));
    lob.open(tx(1), &update_options()).unwrap();
    let id = lob.insert(&[Data::Bytes(vec![1u8; 5000])]).unwrap();
    lob.expunge(&[Data::ObjectId(id)]).unwrap();
    lob.close().unwrap();

    // The expunging transaction is still live: nothing is freed.
    let mut incomplete = false;
    let mut modified = false;
    lob.compact(tx(2), &CancelToken::new(), &mut incomplete, &mut modified)
        .unwrap();
    assert!(!modified);

    oracle.end(tx(1));
    lob.compact(tx(3), &CancelToken::new(), &mut incomplete, &mut modified)
        .unwrap();
    assert!(modified);
    assert!(!incomplete);
}

#[test]
fn lob_verify_is_clean() {
    let dir = tempfile::tempdir().unwrap();
    let (mut lob, _) = lob_interface(&dir.path().join("lob"), Codec::Raw);
    lob.create(tx(1)).unwrap();
    lob.open(tx(1), &update_options()).unwrap();
    for i in 0..5 {
        lob.insert(&[Data::Bytes(vec![i as u8; 3000])]).unwrap();
    }
    lob.close().unwrap();

    let mut progress = Progress::new();
    lob.verify(tx(2), Treatment::read_only(), &CancelToken::new(), &mut progress)
        .unwrap();
    assert!(progress.is_good(), "faults: {:?}", progress.faults());
}

#[test]
fn lob_projection_can_include_the_object_id() {
    let dir = tempfile::tempdir().unwrap();
    let (mut lob, _) = lob_interface(&dir.path().join("lob"), Codec::Raw);
    lob.create(tx(1)).unwrap();

    let mut options = update_options();
    assert!(lob.projection_parameter(&[0, 1], &mut options));
    lob.open(tx(1), &options).unwrap();

    let id = lob.insert(&[Data::Str("v".into())]).unwrap();
    lob.fetch(&[Data::ObjectId(id)]).unwrap();
    let tuple = lob.get().unwrap().unwrap();
    assert_eq!(tuple[1], Data::ObjectId(id));
    lob.close().unwrap();
}

#[test]
fn lob_locator_on_missing_object_fails() {
    let dir = tempfile::tempdir().unwrap();
    let (mut lob, _) = lob_interface(&dir.path().join("lob"), Codec::Raw);
    lob.create(tx(1)).unwrap();
    lob.open(tx(1), &update_options()).unwrap();
    lob.insert(&[Data::Str("v".into())]).unwrap();

    assert!(lob.locator(&[Data::ObjectId(ObjectId::new(0, 99))]).is_err());
    lob.close().unwrap();
}
