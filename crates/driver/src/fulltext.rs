//! Logical interface of a full-text index file.
//!
//! The executor drives this surface: create is staged (the directory
//! appears on the first insert), opens decode their mode from the
//! option bag, and every successful mutation feeds the delayed-merge
//! pipeline according to the file's mode — directly merged, merged
//! before the statement returns, or handed to the background daemon.

use std::path::Path;
use std::sync::Arc;

use common::verify::{Progress, Treatment};
use common::{CancelToken, EngineError, EngineResult, FixMode, TransactionId, log_failure};
use fileid::{DelayedMode, FieldType, FileId};
use inverted::IndexFile;
use merge::{MergeDaemon, MergeTarget, should_enqueue};
use parking_lot::Mutex;
use types::{Data, DocumentId};

use crate::options::{OpenMode, OpenOptions, key};

/// What the planner asks the file to evaluate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchCondition<'a> {
    /// `CONTAINS(key, pattern)`.
    Contains(&'a str),
    /// Free-text relevance search.
    Freetext(&'a str),
    /// Plain equality; a full-text index cannot serve it.
    Equals,
}

/// Virtual projection fields past the value fields.
pub mod virtual_field {
    /// Offset of the document id past the last value field.
    pub const ROWID: u32 = 0;
    pub const SCORE: u32 = 1;
    pub const CLUSTER: u32 = 2;
    pub const COUNT: u32 = 3;
}

#[derive(Default)]
struct OpenState {
    mode: Option<OpenMode>,
    cancel: CancelToken,
    projection: Vec<u32>,
    scan: Option<Vec<DocumentId>>,
    scan_next: usize,
}

/// Merges run by the daemon touch the index only through this handle.
struct MergeHandle {
    index: Arc<IndexFile>,
    vacuum: bool,
}

impl MergeTarget for MergeHandle {
    fn merge(&self) -> EngineResult<bool> {
        let merged = self.index.merge()?;
        self.index.save_all_pages()?;
        Ok(merged)
    }

    fn vacuum(&self) -> EngineResult<()> {
        self.index.vacuum()?;
        self.index.save_all_pages()
    }

    fn wants_vacuum(&self) -> bool {
        self.vacuum
    }
}

/// Driver-level surface of one full-text index.
pub struct FullTextFile {
    file_id: FileId,
    index: Arc<IndexFile>,
    daemon: Option<Arc<MergeDaemon>>,
    state: Mutex<OpenState>,
}

impl FullTextFile {
    /// Attach the driver. With an async delayed mode and a daemon, the
    /// index is registered for background merging.
    pub fn new(file_id: FileId, cache_count: usize, daemon: Option<Arc<MergeDaemon>>) -> Self {
        let index = Arc::new(IndexFile::attach(&file_id, file_id.path(), false, cache_count));
        if let Some(daemon) = daemon.as_ref() {
            if file_id.delayed_mode() == DelayedMode::Async {
                daemon.register(
                    file_id.lock_name().clone(),
                    Arc::new(MergeHandle {
                        index: Arc::clone(&index),
                        vacuum: file_id.is_vacuum(),
                    }),
                );
            }
        }
        Self {
            file_id,
            index,
            daemon,
            state: Mutex::new(OpenState::default()),
        }
    }

    pub fn file_id(&self) -> &FileId {
        &self.file_id
    }

    // ---- lifecycle ---------------------------------------------------

    /// Stage the file id only; the directory appears on first insert.
    pub fn create(&mut self, _tx: TransactionId) -> EngineResult<()> {
        self.file_id.set_mounted(true);
        Ok(())
    }

    /// Unconditional: a dropped index disappears even when half-built.
    pub fn destroy(&mut self, _tx: TransactionId) -> EngineResult<()> {
        if let Some(daemon) = self.daemon.as_ref() {
            daemon.unregister(self.file_id.lock_name());
        }
        self.index.destroy()
    }

    pub fn mount(&mut self, _tx: TransactionId) -> EngineResult<()> {
        self.file_id.set_mounted(true);
        if self.is_accessible(false) {
            self.index.mount()?;
        }
        Ok(())
    }

    pub fn unmount(&mut self, _tx: TransactionId) -> EngineResult<()> {
        self.file_id.set_mounted(false);
        if self.is_accessible(false) {
            self.index.unmount()?;
        }
        Ok(())
    }

    pub fn is_accessible(&self, force: bool) -> bool {
        self.index.is_accessible(force)
    }

    pub fn is_mounted(&self, _tx: TransactionId) -> bool {
        self.file_id.is_mounted()
    }

    pub fn size(&self) -> u64 {
        self.index.file_size().unwrap_or(0)
    }

    pub fn count(&self) -> u64 {
        if !self.is_accessible(false) {
            return 0;
        }
        self.index.document_count().map(u64::from).unwrap_or(0)
    }

    pub fn open(&self, _tx: TransactionId, options: &OpenOptions) -> EngineResult<()> {
        let mode = options.open_mode()?;
        let fix = if mode.is_update() {
            FixMode::WriteDiscardable
        } else {
            FixMode::ReadOnly
        };
        let cancel = CancelToken::new();
        self.index.open(fix, cancel.clone());

        let mut state = self.state.lock();
        state.mode = Some(mode);
        state.cancel = cancel;
        state.projection = options.array(key::TARGET_FIELDS).unwrap_or_default();
        state.scan = None;
        state.scan_next = 0;
        Ok(())
    }

    pub fn close(&self) -> EngineResult<()> {
        let mode = {
            let mut state = self.state.lock();
            state.scan = None;
            state.scan_next = 0;
            state.mode.take()
        };
        if self.is_accessible(false) {
            match mode {
                Some(mode) if mode.is_update() => self.index.flush_all_pages()?,
                Some(_) => self.index.recover_all_pages()?,
                None => {}
            }
        }
        self.index.close();
        Ok(())
    }

    // ---- mutations ---------------------------------------------------

    /// Register a document. The directory is materialised on the first
    /// insert, not at create.
    pub fn insert(&self, tuple: &[Data]) -> EngineResult<DocumentId> {
        self.require_update_mode()?;
        self.check_tuple(tuple)?;
        if !self.is_accessible(true) {
            self.index.create()?;
            self.index
                .open(FixMode::WriteDiscardable, self.state.lock().cancel.clone());
        }
        let doc = self.index.insert_document()?;
        self.after_mutation()?;
        Ok(doc)
    }

    /// Replace a document: the old image is expunged and the new value
    /// inserted under a fresh document id.
    pub fn update(&self, doc: DocumentId, tuple: &[Data]) -> EngineResult<DocumentId> {
        self.require_update_mode()?;
        self.check_tuple(tuple)?;
        self.index.expunge_document(doc)?;
        let doc = self.index.insert_document()?;
        self.after_mutation()?;
        Ok(doc)
    }

    pub fn expunge(&self, doc: DocumentId) -> EngineResult<()> {
        self.require_update_mode()?;
        self.index.expunge_document(doc)?;
        self.after_mutation()
    }

    /// Feed the delayed-merge pipeline after a successful mutation.
    fn after_mutation(&self) -> EngineResult<()> {
        let batch = self.state.lock().mode == Some(OpenMode::Batch);
        match self.file_id.delayed_mode() {
            DelayedMode::None => {
                // Applied to the main index directly.
                self.index.merge()?;
            }
            DelayedMode::Sync if !batch => {
                // Merged before the statement returns.
                self.index.merge()?;
                if self.file_id.is_vacuum() {
                    self.index.vacuum()?;
                }
            }
            DelayedMode::Async if should_enqueue(DelayedMode::Async, batch) => {
                if let Some(daemon) = self.daemon.as_ref() {
                    daemon.enqueue_discard(self.file_id.lock_name());
                }
            }
            _ => {
                // Batch mode: everything is deferred to close.
            }
        }
        Ok(())
    }

    // ---- read path ---------------------------------------------------

    /// Iterate the live documents, projecting each per the cached
    /// target fields.
    pub fn get(&self) -> EngineResult<Option<Vec<Data>>> {
        let mut state = self.state.lock();
        if state.mode.is_none() {
            return Err(EngineError::FileNotOpen);
        }
        if state.scan.is_none() {
            let table = self.index.segments()?;
            let mut docs = Vec::new();
            for segment in table
                .main
                .iter()
                .chain(table.large.iter())
                .chain(table.small.iter())
            {
                if segment.doc_count > 0 {
                    docs.extend((segment.first_doc.0..=segment.last_doc.0).map(DocumentId));
                }
            }
            docs.sort();
            state.scan = Some(docs);
            state.scan_next = 0;
        }

        let scan = state.scan.as_ref().expect("scan staged above");
        let Some(doc) = scan.get(state.scan_next).copied() else {
            return Ok(None);
        };
        state.scan_next += 1;

        let value_fields = self.file_id.fields().len() as u32;
        let projection = if state.projection.is_empty() {
            vec![value_fields + virtual_field::ROWID]
        } else {
            state.projection.clone()
        };

        let mut tuple = Vec::with_capacity(projection.len());
        for field in projection {
            let virtual_index = field.checked_sub(value_fields);
            match virtual_index {
                Some(virtual_field::ROWID) => tuple.push(Data::UInt(doc.0)),
                Some(virtual_field::SCORE) => tuple.push(Data::Double(0.0)),
                Some(virtual_field::COUNT) => {
                    tuple.push(Data::UInt(self.index.document_count()?));
                }
                _ => tuple.push(Data::Null),
            }
        }
        Ok(Some(tuple))
    }

    // ---- planner hooks -----------------------------------------------

    /// Whether this index can evaluate the condition. Containment and
    /// free-text searches open in search mode; anything else falls back
    /// to the executor.
    pub fn search_parameter(&self, condition: &SearchCondition<'_>, options: &mut OpenOptions) -> bool {
        match condition {
            SearchCondition::Contains(pattern) | SearchCondition::Freetext(pattern) => {
                if pattern.is_empty() {
                    return false;
                }
                options.set_open_mode(OpenMode::Search);
                true
            }
            SearchCondition::Equals => false,
        }
    }

    /// Value fields plus the virtual rowid/score/cluster/count fields
    /// are projectable; clusters only on a clustered index.
    pub fn projection_parameter(&self, fields: &[u32], options: &mut OpenOptions) -> bool {
        let value_fields = self.file_id.fields().len() as u32;
        for field in fields {
            match field.checked_sub(value_fields) {
                None => {}
                Some(virtual_field::ROWID | virtual_field::SCORE | virtual_field::COUNT) => {}
                Some(virtual_field::CLUSTER) if self.file_id.is_clustering() => {}
                Some(_) => return false,
            }
        }
        options.set_array(key::TARGET_FIELDS, fields.to_vec());
        true
    }

    /// Only the value fields can be rewritten.
    pub fn update_parameter(&self, fields: &[u32], options: &mut OpenOptions) -> bool {
        let value_fields = self.file_id.fields().len() as u32;
        if fields.iter().any(|f| *f >= value_fields) {
            return false;
        }
        options.set_open_mode(OpenMode::Update);
        options.set_array(key::TARGET_FIELDS, fields.to_vec());
        true
    }

    /// Results can be ordered by score, either direction.
    pub fn sort_parameter(&self, keys: &[i32], options: &mut OpenOptions) -> bool {
        let score = (self.file_id.fields().len() as u32 + virtual_field::SCORE) as i32;
        match keys {
            [k] if *k == score || *k == -score => {
                options.set_integer(key::SORT_SPEC, *k);
                true
            }
            _ => false,
        }
    }

    pub fn limit_parameter(&self, limit: u32, offset: u32, options: &mut OpenOptions) -> bool {
        if limit == 0 {
            return false;
        }
        options.set_integer(key::LIMIT, limit as i32);
        options.set_integer(key::OFFSET, offset as i32);
        true
    }

    // ---- maintenance -------------------------------------------------

    /// Vacuum deleted entries out of the main segment. Opens read-only
    /// first; when nothing is flagged the update open never happens.
    pub fn compact(
        &self,
        _tx: TransactionId,
        cancel: &CancelToken,
        incomplete: &mut bool,
        modified: &mut bool,
    ) -> EngineResult<()> {
        let result = self.do_compact(cancel, incomplete, modified);
        if let Err(ref e) = result {
            log_failure(&self.index.path(), e);
        }
        result
    }

    fn do_compact(
        &self,
        cancel: &CancelToken,
        incomplete: &mut bool,
        modified: &mut bool,
    ) -> EngineResult<()> {
        if !self.is_accessible(true) || !self.file_id.is_mounted() {
            return Ok(());
        }

        self.index.open(FixMode::ReadOnly, cancel.clone());
        let expunged = self.index.segments()?.expunged_total();
        self.index.save_all_pages()?;
        self.index.close();
        if expunged == 0 {
            return Ok(());
        }

        self.index.open(FixMode::WriteDiscardable, cancel.clone());
        if cancel.is_cancelled() {
            *incomplete = true;
            self.index.close();
            return Ok(());
        }
        self.index.merge()?;
        if self.index.vacuum()? > 0 {
            *modified = true;
        }
        self.index.flush_all_pages()?;
        self.index.close();
        Ok(())
    }

    pub fn verify(
        &self,
        _tx: TransactionId,
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
        self.index.open(fix, cancel.clone());
        let result = self.index.verify(cancel, progress);
        self.index.recover_all_pages()?;
        self.index.close();
        if let Err(ref e) = result {
            log_failure(&self.index.path(), e);
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
            self.index.sync(incomplete, modified)?;
        }
        Ok(())
    }

    pub fn move_to(&mut self, _tx: TransactionId, area_path: &Path) -> EngineResult<()> {
        self.index.move_to(area_path)?;
        self.file_id.set_path(area_path);
        Ok(())
    }

    pub fn flush_all_pages(&self) -> EngineResult<()> {
        self.index.flush_all_pages()
    }

    pub fn recover_all_pages(&self) -> EngineResult<()> {
        self.index.recover_all_pages()
    }

    // ---- shape checks ------------------------------------------------

    fn require_update_mode(&self) -> EngineResult<()> {
        match self.state.lock().mode {
            Some(mode) if mode.is_update() => Ok(()),
            Some(_) => Err(EngineError::BadArgument),
            None => Err(EngineError::FileNotOpen),
        }
    }

    /// The tuple must match the declared field layout.
    fn check_tuple(&self, tuple: &[Data]) -> EngineResult<()> {
        let fields = self.file_id.fields();
        if tuple.len() != fields.len() {
            return Err(EngineError::BadArgument);
        }
        for (value, field) in tuple.iter().zip(fields) {
            if value.is_null() {
                continue;
            }
            let ok = match field {
                FieldType::Str | FieldType::Word => value.as_str().is_some(),
                FieldType::StrArray | FieldType::WordArray => value
                    .as_array()
                    .map(|items| items.iter().all(|d| d.as_str().is_some()))
                    .unwrap_or(false),
                FieldType::Int => value.as_int().is_some(),
                FieldType::IntArray => value
                    .as_array()
                    .map(|items| items.iter().all(|d| d.as_int().is_some()))
                    .unwrap_or(false),
                FieldType::UInt => value.as_uint().is_some(),
                FieldType::UIntArray => value
                    .as_array()
                    .map(|items| items.iter().all(|d| d.as_uint().is_some()))
                    .unwrap_or(false),
                FieldType::Language => matches!(value, Data::Language(l) if l.is_valid()),
                FieldType::LanguageArray => value
                    .as_array()
                    .map(|items| {
                        items
                            .iter()
                            .all(|d| matches!(d, Data::Language(l) if l.is_valid()))
                    })
                    .unwrap_or(false),
                FieldType::Double => matches!(value, Data::Double(_)),
                FieldType::DoubleArray => value
                    .as_array()
                    .map(|items| items.iter().all(|d| matches!(d, Data::Double(_))))
                    .unwrap_or(false),
            };
            if !ok {
                return Err(EngineError::ClassCast(format!(
                    "field expects {field:?}, tuple holds {:?}",
                    value.kind()
                )));
            }
        }
        Ok(())
    }
}
