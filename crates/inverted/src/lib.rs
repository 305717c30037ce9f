//! Inverted-index file persistence.
//!
//! One index is a directory holding four paged sub-files — leaf,
//! overflow, btree, and "other" — each with its own page size taken
//! from the [`FileId`]. Every page carries a kind tag steering its
//! initialization; the b-tree header always sits at page 0 of the
//! btree sub-file and may only be fetched as such.
//!
//! The "other" sub-file's page 0 holds the segment table driving the
//! delayed-update pipeline (see [`segment`]).


pub mod segment;

use std::path::{Path, PathBuf};

use bincode::config;
use bincode::serde::{decode_from_slice, encode_into_slice};
use buffer::{FixPriority, PageCache, PageHandle};
use common::verify::Progress;
use common::{CancelToken, EngineError, EngineResult, FixMode, PageId};
use fileid::FileId;
use parking_lot::Mutex;
use segment::SegmentTable;
use storage::{PageManageVariant, PagedFile, StorageStrategy};
use types::DocumentId;

/// The four page spaces of one index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubFile {
    Leaf,
    Overflow,
    Btree,
    Other,
}

impl SubFile {
    pub const ALL: [SubFile; 4] = [SubFile::Leaf, SubFile::Overflow, SubFile::Btree, SubFile::Other];

    fn dir_name(self) -> &'static str {
        match self {
            SubFile::Leaf => "Leaf",
            SubFile::Overflow => "Overflow",
            SubFile::Btree => "Btree",
            SubFile::Other => "Other",
        }
    }
}

/// What a page holds; written into the page's first byte at
/// initialization.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageKind {
    /// The b-tree header, always page 0 of the btree sub-file.
    Btree,
    /// An inner b-tree node.
    Node,
    /// A top page, such as the segment table.
    Top,
    Overflow,
    Leaf,
}

impl PageKind {
    fn tag(self) -> u8 {
        match self {
            PageKind::Btree => 1,
            PageKind::Node => 2,
            PageKind::Top => 3,
            PageKind::Overflow => 4,
            PageKind::Leaf => 5,
        }
    }

    fn from_tag(tag: u8) -> Option<PageKind> {
        Some(match tag {
            1 => PageKind::Btree,
            2 => PageKind::Node,
            3 => PageKind::Top,
            4 => PageKind::Overflow,
            5 => PageKind::Leaf,
            _ => return None,
        })
    }
}

/// Content of a page starts after the kind tag.
pub const PAGE_CONTENT_OFFSET: usize = 1;

/// One inverted-index file: four page caches over four paged files.
pub struct IndexFile {
    leaf: PageCache,
    overflow: PageCache,
    btree: PageCache,
    other: PageCache,
    path: Mutex<PathBuf>,
    batch: bool,
}

impl IndexFile {
    /// Attach the four sub-files. Nothing touches the disk until
    /// [`IndexFile::create`] or the first page access of an existing
    /// index.
    pub fn attach(file_id: &FileId, path: impl Into<PathBuf>, batch: bool, cache_count: usize) -> Self {
        let path = path.into();
        let variant = if file_id.uses_two_level_free_management() {
            PageManageVariant::V2
        } else {
            PageManageVariant::V1
        };

        let make = |sub: SubFile, page_size: u32| {
            let mut strategy =
                StorageStrategy::new(path.join(sub.dir_name()), page_size, variant);
            strategy.mounted = file_id.is_mounted();
            strategy.read_only = file_id.is_read_only();
            strategy.temporary = file_id.is_temporary();
            PageCache::new(PagedFile::attach(strategy), cache_count)
        };

        Self {
            leaf: make(SubFile::Leaf, file_id.leaf_page_size()),
            overflow: make(SubFile::Overflow, file_id.overflow_page_size()),
            btree: make(SubFile::Btree, file_id.btree_page_size()),
            other: make(SubFile::Other, file_id.other_page_size()),
            path: Mutex::new(path),
            batch,
        }
    }

    pub fn path(&self) -> PathBuf {
        self.path.lock().clone()
    }

    pub fn is_batch(&self) -> bool {
        self.batch
    }

    fn cache(&self, sub: SubFile) -> &PageCache {
        match sub {
            SubFile::Leaf => &self.leaf,
            SubFile::Overflow => &self.overflow,
            SubFile::Btree => &self.btree,
            SubFile::Other => &self.other,
        }
    }

    // ---- lifecycle ---------------------------------------------------

    /// Create the four sub-files and initialize the root pages: the
    /// b-tree header and the segment table.
    pub fn create(&self) -> EngineResult<()> {
        let result = self.do_create();
        if result.is_err() {
            // A half-created index must not survive.
            for sub in SubFile::ALL {
                let _ = self.cache(sub).with_file(|f| f.destroy());
            }
            let _ = std::fs::remove_dir_all(self.path());
        }
        result
    }

    fn do_create(&self) -> EngineResult<()> {
        for sub in SubFile::ALL {
            self.cache(sub).with_file(|f| f.create())?;
        }

        self.open(FixMode::Write, CancelToken::new());
        let header = self.allocate_page(SubFile::Btree, PageKind::Btree)?;
        if header.id() != PageId(0) {
            return Err(EngineError::Unexpected("btree header not at page 0".into()));
        }
        drop(header);

        let top = self.allocate_page(SubFile::Other, PageKind::Top)?;
        if top.id() != PageId(0) {
            return Err(EngineError::Unexpected("segment table not at page 0".into()));
        }
        write_segments(&top, &SegmentTable::new())?;
        drop(top);

        self.flush_all_pages()?;
        self.close();
        Ok(())
    }

    /// Destroy all sub-files, then the index directory itself.
    pub fn destroy(&self) -> EngineResult<()> {
        for sub in SubFile::ALL {
            self.cache(sub).with_file(|f| f.destroy())?;
        }
        let path = self.path();
        if path.exists() {
            std::fs::remove_dir_all(&path)?;
        }
        Ok(())
    }

    pub fn mount(&self) -> EngineResult<()> {
        for sub in SubFile::ALL {
            self.cache(sub).with_file(|f| f.mount())?;
        }
        Ok(())
    }

    pub fn unmount(&self) -> EngineResult<()> {
        for sub in SubFile::ALL {
            self.cache(sub).with_file(|f| f.unmount())?;
        }
        Ok(())
    }

    pub fn flush(&self) -> EngineResult<()> {
        for sub in SubFile::ALL {
            self.cache(sub).with_file(|f| f.flush())?;
        }
        Ok(())
    }

    pub fn start_backup(&self, restorable: bool) -> EngineResult<()> {
        let mut done = Vec::new();
        for sub in SubFile::ALL {
            match self.cache(sub).with_file(|f| f.start_backup(restorable)) {
                Ok(()) => done.push(sub),
                Err(e) => {
                    for sub in done {
                        let _ = self.cache(sub).with_file(|f| f.end_backup());
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    pub fn end_backup(&self) -> EngineResult<()> {
        for sub in SubFile::ALL {
            self.cache(sub).with_file(|f| f.end_backup())?;
        }
        Ok(())
    }

    pub fn recover(&self) -> EngineResult<()> {
        for sub in SubFile::ALL {
            self.cache(sub).with_file(|f| f.recover())?;
        }
        if !self.is_accessible(true) {
            let _ = std::fs::remove_dir_all(self.path());
        }
        Ok(())
    }

    pub fn restore(&self) -> EngineResult<()> {
        for sub in SubFile::ALL {
            self.cache(sub).with_file(|f| f.restore())?;
        }
        Ok(())
    }

    pub fn sync(&self, incomplete: &mut bool, modified: &mut bool) -> EngineResult<()> {
        for sub in SubFile::ALL {
            self.cache(sub).with_file(|f| f.sync(incomplete, modified))?;
        }
        Ok(())
    }

    /// Move the whole index directory. A step counter drives the
    /// compensation: sub-files already moved are moved back when a
    /// later one fails.
    pub fn move_to(&self, new_path: &Path) -> EngineResult<()> {
        let old_path = self.path();
        if new_path == old_path {
            return Ok(());
        }
        let mut step = 0usize;
        let result = (|| -> EngineResult<()> {
            for sub in SubFile::ALL {
                self.cache(sub)
                    .with_file(|f| f.move_to(&new_path.join(sub.dir_name())))?;
                step += 1;
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                let _ = std::fs::remove_dir(&old_path);
                *self.path.lock() = new_path.to_path_buf();
                Ok(())
            }
            Err(e) => {
                for sub in SubFile::ALL.iter().take(step) {
                    let _ = self
                        .cache(*sub)
                        .with_file(|f| f.move_to(&old_path.join(sub.dir_name())));
                }
                let _ = std::fs::remove_dir_all(new_path);
                Err(e)
            }
        }
    }

    pub fn is_accessible(&self, force: bool) -> bool {
        SubFile::ALL
            .iter()
            .all(|sub| self.cache(*sub).with_file(|f| f.is_accessible(force)))
    }

    pub fn is_mounted(&self) -> bool {
        self.cache(SubFile::Btree).with_file(|f| f.is_mounted())
    }

    pub fn file_size(&self) -> EngineResult<u64> {
        let mut total = 0;
        for sub in SubFile::ALL {
            total += self.cache(sub).with_file(|f| f.file_size())?;
        }
        Ok(total)
    }

    pub fn open(&self, mode: FixMode, cancel: CancelToken) {
        for sub in SubFile::ALL {
            self.cache(sub).open(mode, cancel.clone());
        }
    }

    pub fn close(&self) {
        for sub in SubFile::ALL {
            self.cache(sub).close();
        }
    }

    pub fn flush_all_pages(&self) -> EngineResult<()> {
        for sub in SubFile::ALL {
            self.cache(sub).flush_all_pages()?;
        }
        Ok(())
    }

    pub fn recover_all_pages(&self) -> EngineResult<()> {
        for sub in SubFile::ALL {
            self.cache(sub).recover_all_pages()?;
        }
        Ok(())
    }

    pub fn save_all_pages(&self) -> EngineResult<()> {
        for sub in SubFile::ALL {
            self.cache(sub).save_all_pages()?;
        }
        Ok(())
    }

    // ---- page access -------------------------------------------------

    /// Allocate a page in one of the page spaces and stamp its kind.
    pub fn allocate_page(&self, sub: SubFile, kind: PageKind) -> EngineResult<PageHandle> {
        self.cache(sub).allocate_page(|buf| buf[0] = kind.tag())
    }

    /// Fetch a page, checking the stored kind against the expectation.
    ///
    /// Fetching page 0 of the btree sub-file as anything but the header
    /// is an `Unexpected` failure.
    pub fn attach_page(
        &self,
        sub: SubFile,
        pid: PageId,
        kind: PageKind,
    ) -> EngineResult<PageHandle> {
        let handle = self.cache(sub).attach_page(pid, FixPriority::Middle)?;
        let tag = handle.data()[0];
        match PageKind::from_tag(tag) {
            Some(stored) if stored == kind => Ok(handle),
            stored => Err(EngineError::Unexpected(format!(
                "page {} of {sub:?} holds {stored:?}, caller expected {kind:?}",
                pid.0
            ))),
        }
    }

    pub fn free_page(&self, sub: SubFile, handle: PageHandle) {
        self.cache(sub).free_page(handle);
    }

    // ---- segment pipeline --------------------------------------------

    pub fn segments(&self) -> EngineResult<SegmentTable> {
        let top = self.attach_page(SubFile::Other, PageId(0), PageKind::Top)?;
        read_segments(&top)
    }

    pub fn with_segments<R>(
        &self,
        f: impl FnOnce(&mut SegmentTable) -> R,
    ) -> EngineResult<R> {
        let top = self.attach_page(SubFile::Other, PageId(0), PageKind::Top)?;
        let mut table = read_segments(&top)?;
        let result = f(&mut table);
        write_segments(&top, &table)?;
        Ok(result)
    }

    /// Register a document in the small segment.
    pub fn insert_document(&self) -> EngineResult<DocumentId> {
        self.with_segments(|table| table.insert())
    }

    /// Flag a document as deleted.
    pub fn expunge_document(&self, doc: DocumentId) -> EngineResult<()> {
        self.with_segments(|table| table.expunge(doc))?
    }

    pub fn document_count(&self) -> EngineResult<u32> {
        Ok(self.segments()?.document_count())
    }

    /// Seal the small segment and fold everything sealed into the main
    /// segment. Returns whether anything moved.
    pub fn merge(&self) -> EngineResult<bool> {
        self.with_segments(|table| {
            let sealed = table.seal_small();
            let merged = table.merge();
            sealed || merged
        })
    }

    /// Reclaim expunged documents from the main segment.
    pub fn vacuum(&self) -> EngineResult<u32> {
        self.with_segments(|table| table.vacuum())
    }

    /// Walk all four sub-files and the root structures.
    pub fn verify(&self, cancel: &CancelToken, progress: &mut Progress) -> EngineResult<()> {
        for sub in SubFile::ALL {
            cancel.check()?;
            let mut child = Progress::new();
            self.cache(sub).with_file(|f| f.verify(&mut child))?;
            progress.merge(child);
        }

        // Root pages must decode with the right kinds.
        let path = self.path();
        if self.attach_page(SubFile::Btree, PageId(0), PageKind::Btree).is_err() {
            progress.fault(&path, Some(PageId(0)), "btree header is damaged");
        }
        match self.attach_page(SubFile::Other, PageId(0), PageKind::Top) {
            Ok(top) => {
                if read_segments(&top).is_err() {
                    progress.fault(&path, Some(PageId(0)), "segment table does not decode");
                }
            }
            Err(_) => {
                progress.fault(&path, Some(PageId(0)), "segment table page is damaged");
            }
        }
        Ok(())
    }
}

fn read_segments(top: &PageHandle) -> EngineResult<SegmentTable> {
    let buf = top.data();
    let (table, _) = decode_from_slice(&buf[PAGE_CONTENT_OFFSET..], config::legacy())
        .map_err(|e| EngineError::Inverted(format!("decode segment table failed: {e}")))?;
    Ok(table)
}

fn write_segments(top: &PageHandle, table: &SegmentTable) -> EngineResult<()> {
    let mut buf = top.data_mut();
    encode_into_slice(table, &mut buf[PAGE_CONTENT_OFFSET..], config::legacy())
        .map_err(|e| EngineError::Inverted(format!("encode segment table failed: {e}")))?;
    Ok(())
}
