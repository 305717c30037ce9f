use super::*;
use std::io::Seek;
use tempfile::tempdir;

fn sample_records() -> Vec<LogRecord> {
    vec![
        LogRecord::new(Category::Mount, vec![LogValue::Id(1)]),
        LogRecord::new(
            Category::CreateIndex,
            vec![
                LogValue::Id(7),
                LogValue::Str("FT_INDEX".into()),
                LogValue::Ids(vec![1, 2, 3]),
                LogValue::Null,
            ],
        ),
        LogRecord::new(
            Category::TimeStamp,
            vec![LogValue::U64(0xDEAD_BEEF_0000_0001)],
        ),
    ]
}

#[test]
fn append_and_replay_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("schema.log");

    let mut log = SchemaLog::open(&path).unwrap();
    for record in sample_records() {
        log.append(&record).unwrap();
    }
    log.sync().unwrap();

    let replayed = SchemaLog::replay(&path).unwrap();
    assert_eq!(replayed, sample_records());
}

#[test]
fn reopen_appends_after_existing_records() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("schema.log");

    {
        let mut log = SchemaLog::open(&path).unwrap();
        log.append(&sample_records()[0]).unwrap();
    }
    {
        let mut log = SchemaLog::open(&path).unwrap();
        log.append(&sample_records()[1]).unwrap();
    }

    let replayed = SchemaLog::replay(&path).unwrap();
    assert_eq!(replayed.len(), 2);
    assert_eq!(replayed[1].sub_category(), Category::CreateIndex);
}

#[test]
fn corrupt_frame_is_log_item_corrupted() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("schema.log");

    let mut log = SchemaLog::open(&path).unwrap();
    log.append(&sample_records()[0]).unwrap();
    log.sync().unwrap();

    // Flip a byte inside the frame body.
    let mut file = OpenOptions::new().write(true).read(true).open(&path).unwrap();
    file.seek(std::io::SeekFrom::Start(10)).unwrap();
    file.write_all(&[0xFF]).unwrap();
    file.sync_all().unwrap();

    assert!(matches!(
        SchemaLog::replay(&path),
        Err(EngineError::LogItemCorrupted(_))
    ));
}

#[test]
fn short_frame_is_log_item_corrupted() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("schema.log");

    let mut log = SchemaLog::open(&path).unwrap();
    log.append(&sample_records()[1]).unwrap();
    log.sync().unwrap();

    // Cut the file mid-frame.
    let len = std::fs::metadata(&path).unwrap().len();
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(len - 3).unwrap();

    assert!(matches!(
        SchemaLog::replay(&path),
        Err(EngineError::LogItemCorrupted(_))
    ));
}

#[test]
fn truncate_empties_the_log() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("schema.log");

    let mut log = SchemaLog::open(&path).unwrap();
    for record in sample_records() {
        log.append(&record).unwrap();
    }
    log.truncate().unwrap();
    assert!(SchemaLog::replay(&path).unwrap().is_empty());

    // The log accepts appends again after truncation.
    log.append(&sample_records()[0]).unwrap();
    assert_eq!(SchemaLog::replay(&path).unwrap().len(), 1);
}

#[test]
fn undoable_categories_are_the_drops() {
    assert!(Category::DropTable.is_undoable());
    assert!(Category::DropIndex.is_undoable());
    assert!(Category::DropDatabase.is_undoable());
    assert!(!Category::CreateTable.is_undoable());
    assert!(!Category::Mount.is_undoable());
}

#[test]
fn typed_payload_access() {
    let record = LogRecord::new(
        Category::CreateTable,
        vec![LogValue::Id(4), LogValue::Str("T1".into())],
    );
    assert_eq!(record.element(0).unwrap().as_id().unwrap(), 4);
    assert_eq!(record.element(1).unwrap().as_str().unwrap(), "T1");
    assert!(matches!(
        record.element(0).unwrap().as_str(),
        Err(EngineError::LogItemCorrupted(_))
    ));
    assert!(matches!(
        record.element(9),
        Err(EngineError::LogItemCorrupted(_))
    ));
}
