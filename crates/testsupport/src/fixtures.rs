//! Canned engine objects.

use std::path::Path;
use std::sync::Arc;

use common::{Config, LockName};
use fileid::{FieldType, FileId};
use lob::{ActiveTransactions, Codec, LobStore};

/// A file id over a single string key with the given hint.
pub fn simple_file_id(path: &Path, hint: &str) -> FileId {
    FileId::create(
        vec![FieldType::Str],
        hint,
        &Config::default(),
        path,
        LockName::new("testdb", "t", "ft"),
    )
    .expect("create file id")
}

/// A file id over the given field layout.
pub fn string_key_file_id(path: &Path, fields: Vec<FieldType>, hint: &str) -> FileId {
    FileId::create(
        fields,
        hint,
        &Config::default(),
        path,
        LockName::new("testdb", "t", "ft"),
    )
    .expect("create file id")
}

/// A created LOB store at `path`.
pub fn lob_store(path: &Path, codec: Codec, oracle: Arc<ActiveTransactions>) -> LobStore {
    let store = LobStore::attach(path, 4096, codec, 10, oracle);
    store.create().expect("create lob store");
    store
}

/// Deterministic payload bytes of the given length.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}
