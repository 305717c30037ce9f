//! Logical interface of a LOB file.
//!
//! The executor sees cursor-style operations keyed by `ObjectId`;
//! everything else — deferred creation, open-mode decoding, cursor
//! state, locators, vacuum — lives here and delegates to the store.

use std::path::Path;
use std::sync::Arc;

use common::verify::{Progress, Treatment};
use common::{CancelToken, EngineError, EngineResult, FixMode, TransactionId, log_failure};
use fileid::FileId;
use lob::{Codec, LobStore, TransactionOracle};
use parking_lot::Mutex;
use types::{Data, ObjectId};

use crate::locator::Locator;
use crate::options::{OpenMode, OpenOptions, key};

#[derive(Default)]
struct Cursor {
    mode: Option<OpenMode>,
    projection: Vec<u32>,
    fetched: Option<ObjectId>,
    consumed: bool,
    marked: Option<ObjectId>,
}

/// Driver-level surface of one LOB file.
pub struct LobInterface {
    file_id: FileId,
    store: Arc<LobStore>,
    cursor: Mutex<Cursor>,
}

impl LobInterface {
    /// Attach the interface. The on-disk file is only materialised by
    /// the first insert, not by `create`.
    pub fn new(file_id: FileId, codec: Codec, oracle: Arc<dyn TransactionOracle>) -> Self {
        let store = Arc::new(LobStore::attach(
            file_id.path(),
            file_id.other_page_size(),
            codec,
            10,
            oracle,
        ));
        Self {
            file_id,
            store,
            cursor: Mutex::new(Cursor::default()),
        }
    }

    pub fn file_id(&self) -> &FileId {
        &self.file_id
    }

    /// Stage the file. Creation of the directory is deferred.
    pub fn create(&mut self, _tx: TransactionId) -> EngineResult<()> {
        self.file_id.set_mounted(true);
        Ok(())
    }

    pub fn destroy(&mut self, _tx: TransactionId) -> EngineResult<()> {
        self.store.destroy()
    }

    pub fn mount(&mut self, _tx: TransactionId) -> EngineResult<()> {
        self.file_id.set_mounted(true);
        if self.is_accessible(false) {
            self.store.mount()?;
        }
        Ok(())
    }

    pub fn unmount(&mut self, _tx: TransactionId) -> EngineResult<()> {
        self.file_id.set_mounted(false);
        if self.is_accessible(false) {
            self.store.unmount()?;
        }
        Ok(())
    }

    pub fn is_accessible(&self, force: bool) -> bool {
        self.store.is_accessible(force)
    }

    pub fn is_mounted(&self, _tx: TransactionId) -> bool {
        self.file_id.is_mounted()
    }

    pub fn size(&self) -> u64 {
        self.store.file_size().unwrap_or(0)
    }

    pub fn count(&self) -> u64 {
        if !self.is_accessible(false) {
            return 0;
        }
        self.store.entry_count().map(u64::from).unwrap_or(0)
    }

    pub fn is_opened(&self) -> bool {
        self.cursor.lock().mode.is_some()
    }

    /// Decode the open mode and stage cursor state.
    pub fn open(&self, tx: TransactionId, options: &OpenOptions) -> EngineResult<()> {
        let mode = options.open_mode()?;
        let fix = if mode.is_update() {
            FixMode::WriteDiscardable
        } else {
            FixMode::ReadOnly
        };
        self.store.open(tx, fix, CancelToken::new())?;

        let mut cursor = self.cursor.lock();
        cursor.mode = Some(mode);
        cursor.projection = options.array(key::TARGET_FIELDS).unwrap_or_else(|| vec![0]);
        cursor.fetched = None;
        cursor.consumed = false;
        cursor.marked = None;
        Ok(())
    }

    /// Flush or roll back per the open mode, then clear cursor state.
    pub fn close(&self) -> EngineResult<()> {
        let mode = {
            let mut cursor = self.cursor.lock();
            let mode = cursor.mode.take();
            cursor.fetched = None;
            cursor.consumed = false;
            cursor.marked = None;
            mode
        };
        if self.is_accessible(false) {
            match mode {
                Some(mode) if mode.is_update() => self.store.flush_all_pages()?,
                Some(_) => self.store.recover_all_pages()?,
                None => {}
            }
        }
        self.store.close();
        Ok(())
    }

    /// Stage the object the next `get` returns.
    pub fn fetch(&self, option: &[Data]) -> EngineResult<()> {
        let id = key_object_id(option)?;
        let mut cursor = self.cursor.lock();
        if cursor.mode.is_none() {
            return Err(EngineError::FileNotOpen);
        }
        cursor.fetched = Some(id);
        cursor.consumed = false;
        Ok(())
    }

    /// Return the fetched tuple, applying the projection. The payload
    /// vector moves straight from the page walk into the tuple.
    pub fn get(&self) -> EngineResult<Option<Vec<Data>>> {
        let (id, projection) = {
            let mut cursor = self.cursor.lock();
            if cursor.mode.is_none() {
                return Err(EngineError::FileNotOpen);
            }
            if cursor.consumed {
                return Ok(None);
            }
            let Some(id) = cursor.fetched else {
                return Ok(None);
            };
            cursor.consumed = true;
            (id, cursor.projection.clone())
        };

        let length = self.store.data_size(id)? as usize;
        let mut tuple = Vec::with_capacity(projection.len());
        for field in projection {
            match field {
                0 => {
                    let (bytes, is_null) = self.store.get(id, 0, length)?;
                    tuple.push(if is_null { Data::Null } else { Data::Bytes(bytes) });
                }
                1 => tuple.push(Data::ObjectId(id)),
                other => {
                    log::error!("lob projection names field {other}");
                    return Err(EngineError::BadArgument);
                }
            }
        }
        Ok(Some(tuple))
    }

    /// Insert a value, materialising the file on first use.
    pub fn insert(&self, tuple: &[Data]) -> EngineResult<ObjectId> {
        self.require_update_mode()?;
        let bytes = value_bytes(tuple)?;
        if !self.is_accessible(true) {
            self.store.create()?;
        }
        self.store.insert(&bytes)
    }

    pub fn update(&self, key: &[Data], tuple: &[Data]) -> EngineResult<()> {
        self.require_update_mode()?;
        let id = key_object_id(key)?;
        let bytes = value_bytes(tuple)?;
        self.store.update(id, &bytes)
    }

    pub fn expunge(&self, key: &[Data]) -> EngineResult<()> {
        self.require_update_mode()?;
        self.store.expunge(key_object_id(key)?)
    }

    pub fn undo_expunge(&self, key: &[Data]) -> EngineResult<()> {
        self.require_update_mode()?;
        self.store.undo_expunge(key_object_id(key)?)
    }

    pub fn undo_update(&self, key: &[Data]) -> EngineResult<()> {
        self.require_update_mode()?;
        self.store.undo_update(key_object_id(key)?)
    }

    /// Partial access without copying the value out whole.
    pub fn locator(&self, key: &[Data]) -> EngineResult<Locator> {
        let id = key_object_id(key)?;
        if !self.store.exists(id)? {
            return Err(EngineError::BadArgument);
        }
        Ok(Locator::new(Arc::clone(&self.store), id))
    }

    pub fn mark(&self) {
        let mut cursor = self.cursor.lock();
        cursor.marked = cursor.fetched;
    }

    pub fn rewind(&self) {
        let mut cursor = self.cursor.lock();
        cursor.fetched = cursor.marked;
        cursor.consumed = false;
    }

    pub fn reset(&self) {
        let mut cursor = self.cursor.lock();
        cursor.fetched = None;
        cursor.consumed = false;
    }

    /// Vacuum: probe read-only first, then free expunged blocks one by
    /// one under an update open, honoring cancellation.
    pub fn compact(
        &self,
        tx: TransactionId,
        cancel: &CancelToken,
        incomplete: &mut bool,
        modified: &mut bool,
    ) -> EngineResult<()> {
        let result = self.do_compact(tx, cancel, incomplete, modified);
        if let Err(ref e) = result {
            log_failure(&self.store.path(), e);
        }
        result
    }

    fn do_compact(
        &self,
        tx: TransactionId,
        cancel: &CancelToken,
        incomplete: &mut bool,
        modified: &mut bool,
    ) -> EngineResult<()> {
        if !self.is_accessible(true) || !self.file_id.is_mounted() {
            return Ok(());
        }

        self.store.open(tx, FixMode::ReadOnly, cancel.clone())?;
        let exists = self.store.is_exist_expunge_data()?;
        self.store.save_all_pages()?;
        self.store.close();
        if !exists {
            return Ok(());
        }

        self.store.open(tx, FixMode::WriteDiscardable, cancel.clone())?;
        loop {
            let freed = self.store.compact()?;
            if freed {
                *modified = true;
                self.store.save_all_pages()?;
            } else {
                break;
            }
            if cancel.is_cancelled() {
                if self.store.is_exist_expunge_data()? {
                    *incomplete = true;
                }
                break;
            }
        }
        self.store.flush_all_pages()?;
        self.store.close();
        Ok(())
    }

    pub fn verify(
        &self,
        tx: TransactionId,
        treatment: Treatment,
        cancel: &CancelToken,
        progress: &mut Progress,
    ) -> EngineResult<()> {
        if !self.is_accessible(true) {
            return Ok(());
        }
        let fix = if treatment.correct {
            FixMode::WriteDiscardable
        } else {
            FixMode::ReadOnly
        };
        self.store.open(tx, fix, cancel.clone())?;
        let result = self.store.verify(cancel, progress);
        self.store.recover_all_pages()?;
        self.store.close();
        if let Err(ref e) = result {
            log_failure(&self.store.path(), e);
        }
        result
    }

    pub fn sync(
        &self,
        _tx: TransactionId,
        incomplete: &mut bool,
        modified: &mut bool,
    ) -> EngineResult<()> {
        if self.is_accessible(true) {
            self.store.sync(incomplete, modified)?;
        }
        Ok(())
    }

    pub fn move_to(&mut self, _tx: TransactionId, area_path: &Path) -> EngineResult<()> {
        self.store.move_to(area_path)?;
        self.file_id.set_path(area_path);
        Ok(())
    }

    pub fn flush_all_pages(&self) -> EngineResult<()> {
        self.store.flush_all_pages()
    }

    pub fn recover_all_pages(&self) -> EngineResult<()> {
        self.store.recover_all_pages()
    }

    // ---- planner hooks -----------------------------------------------

    /// A LOB file serves lookups by object id only.
    pub fn search_parameter(&self, fetch_by_object_id: bool, options: &mut OpenOptions) -> bool {
        if fetch_by_object_id {
            options.set_open_mode(OpenMode::Read);
            true
        } else {
            false
        }
    }

    /// Fields: 0 is the value, 1 the object id.
    pub fn projection_parameter(&self, fields: &[u32], options: &mut OpenOptions) -> bool {
        if fields.is_empty() || fields.iter().any(|f| *f > 1) {
            return false;
        }
        options.set_array(key::TARGET_FIELDS, fields.to_vec());
        true
    }

    /// Only the value field is updatable.
    pub fn update_parameter(&self, fields: &[u32], options: &mut OpenOptions) -> bool {
        if fields != [0] {
            return false;
        }
        options.set_open_mode(OpenMode::Update);
        true
    }

    /// A LOB file cannot order its values.
    pub fn sort_parameter(&self, _keys: &[i32], _options: &mut OpenOptions) -> bool {
        false
    }

    fn require_update_mode(&self) -> EngineResult<()> {
        match self.cursor.lock().mode {
            Some(mode) if mode.is_update() => Ok(()),
            Some(_) => Err(EngineError::BadArgument),
            None => Err(EngineError::FileNotOpen),
        }
    }
}

/// The key tuple is a single object id.
fn key_object_id(key: &[Data]) -> EngineResult<ObjectId> {
    match key {
        [Data::ObjectId(id)] => Ok(*id),
        _ => Err(EngineError::ClassCast("key is not an object id".into())),
    }
}

/// The value tuple is a single bytes or string value.
fn value_bytes(tuple: &[Data]) -> EngineResult<Vec<u8>> {
    match tuple {
        [Data::Bytes(bytes)] => Ok(bytes.clone()),
        [Data::Str(text)] => Ok(text.as_bytes().to_vec()),
        [Data::Null] => Ok(Vec::new()),
        _ => Err(EngineError::ClassCast("value is not bytes or text".into())),
    }
}
