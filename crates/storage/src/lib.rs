//! Physical paged file.
//!
//! A `PagedFile` is a directory holding a master data file plus a version
//! log and a sync log sized with the same maximum and extension sizes.
//! The master file is an array of fixed-size pages preceded by a header
//! block; snapshot versioning across transactions is the responsibility
//! of the host's version file, so the logs here only mirror lifecycle
//! state (backup brackets, sync points).
//!
//! Two free-space managers exist: the v1 manager threads freed pages
//! into an intrusive list through their first bytes, the v2 manager
//! keeps dedicated manage pages holding batches of free page IDs.
//! `FileId` versions of 5 and above select v2.


mod freelist;

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bincode::config::{self, Config as BincodeConfig};
use bincode::serde::{decode_from_slice, encode_to_vec};
use common::{EngineError, EngineResult, PageId};

use freelist::FreeManager;

pub const MASTER_FILE: &str = "master.dat";
pub const VERSION_LOG_FILE: &str = "version.log";
pub const SYNC_LOG_FILE: &str = "sync.log";

/// Default maximum size of each of the three files, in bytes.
pub const DEFAULT_FILE_MAX_SIZE: u64 = 64 << 30;
/// Default extension step when a file grows, in bytes.
pub const DEFAULT_FILE_EXTENSION_SIZE: u64 = 1 << 20;

const HEADER_MAGIC: u32 = 0x4654_5046; // "FTPF"
const HEADER_BLOCK: usize = 128;

fn bincode_config() -> impl BincodeConfig {
    config::legacy()
}

/// Which free-space management structure the file uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PageManageVariant {
    /// Single intrusive free list.
    V1,
    /// Two-level management: header -> manage pages -> free pages.
    V2,
}

/// Which buffer pool the host should place this file's pages in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolCategory {
    Normal,
    ReadOnly,
    Temporary,
}

/// Where and how the file is stored.
#[derive(Clone, Debug)]
pub struct StorageStrategy {
    pub path: PathBuf,
    pub page_size: u32,
    pub max_size: u64,
    pub extension_size: u64,
    pub variant: PageManageVariant,
    pub mounted: bool,
    pub read_only: bool,
    pub temporary: bool,
}

impl StorageStrategy {
    pub fn new(path: impl Into<PathBuf>, page_size: u32, variant: PageManageVariant) -> Self {
        Self {
            path: path.into(),
            page_size,
            max_size: DEFAULT_FILE_MAX_SIZE,
            extension_size: DEFAULT_FILE_EXTENSION_SIZE,
            variant,
            mounted: true,
            read_only: false,
            temporary: false,
        }
    }

    pub fn pool_category(&self) -> PoolCategory {
        if self.temporary {
            PoolCategory::Temporary
        } else if self.read_only {
            PoolCategory::ReadOnly
        } else {
            PoolCategory::Normal
        }
    }
}

/// Persistent state at the head of the master file.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
struct FileHeader {
    magic: u32,
    page_size: u32,
    /// Pages ever allocated, including freed ones and manage pages.
    page_count: u32,
    variant: PageManageVariant,
    free_head: PageId,
    free_count: u32,
    mounted: bool,
    in_backup: bool,
}

impl FileHeader {
    fn new(page_size: u32, variant: PageManageVariant) -> Self {
        Self {
            magic: HEADER_MAGIC,
            page_size,
            page_count: 0,
            variant,
            free_head: PageId::INVALID,
            free_count: 0,
            mounted: true,
            in_backup: false,
        }
    }
}

/// A fixed-size physical file backed by a directory of master and log
/// files. Creation of the on-disk state is deferred to [`PagedFile::create`];
/// until then every page operation fails with `FileNotOpen`.
#[derive(Debug)]
pub struct PagedFile {
    strategy: StorageStrategy,
    master: Option<File>,
    header: Option<FileHeader>,
}

impl PagedFile {
    /// Attach a file handle. No disk access happens here; the directory
    /// may not exist yet.
    pub fn attach(strategy: StorageStrategy) -> Self {
        Self {
            strategy,
            master: None,
            header: None,
        }
    }

    pub fn strategy(&self) -> &StorageStrategy {
        &self.strategy
    }

    pub fn page_size(&self) -> u32 {
        self.strategy.page_size
    }

    pub fn path(&self) -> &Path {
        &self.strategy.path
    }

    fn master_path(&self) -> PathBuf {
        self.strategy.path.join(MASTER_FILE)
    }

    /// Materialise the directory and the three files.
    ///
    /// On failure the directory is removed again so a half-created file
    /// never survives.
    pub fn create(&mut self) -> EngineResult<()> {
        let result = self.do_create();
        if let Err(ref e) = result {
            log::error!("{}: create failed: {e}", self.strategy.path.display());
            let _ = fs::remove_dir_all(&self.strategy.path);
        }
        result
    }

    fn do_create(&mut self) -> EngineResult<()> {
        fs::create_dir_all(&self.strategy.path)?;

        let mut master = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.master_path())
            .map_err(|e| EngineError::Storage(format!("create master file failed: {e}")))?;

        let header = FileHeader::new(self.strategy.page_size, self.strategy.variant);
        write_header(&mut master, &header)?;

        if !self.strategy.temporary {
            for name in [VERSION_LOG_FILE, SYNC_LOG_FILE] {
                File::create(self.strategy.path.join(name))
                    .map_err(|e| EngineError::Storage(format!("create {name} failed: {e}")))?;
            }
        }

        self.master = Some(master);
        self.header = Some(header);
        Ok(())
    }

    /// Open the existing master file and load the header.
    pub fn open(&mut self) -> EngineResult<()> {
        if self.master.is_some() {
            return Ok(());
        }
        let mut master = OpenOptions::new()
            .read(true)
            .write(!self.strategy.read_only)
            .open(self.master_path())
            .map_err(|_| EngineError::FileNotOpen)?;
        let header = read_header(&mut master)?;
        if header.page_size != self.strategy.page_size {
            return Err(EngineError::Unexpected(format!(
                "page size mismatch: file has {}, strategy has {}",
                header.page_size, self.strategy.page_size
            )));
        }
        self.master = Some(master);
        self.header = Some(header);
        Ok(())
    }

    /// Destroy the on-disk state unconditionally, then remove the
    /// directory sub-tree.
    pub fn destroy(&mut self) -> EngineResult<()> {
        self.master = None;
        self.header = None;
        if self.strategy.path.exists() {
            fs::remove_dir_all(&self.strategy.path)?;
        }
        Ok(())
    }

    /// Whether the OS files backing this handle exist. With `force` the
    /// directory is probed even when a handle is already open.
    pub fn is_accessible(&self, force: bool) -> bool {
        if !force && self.master.is_some() {
            return true;
        }
        self.master_path().exists()
    }

    pub fn is_mounted(&self) -> bool {
        self.header.as_ref().map(|h| h.mounted).unwrap_or(self.strategy.mounted)
    }

    pub fn mount(&mut self) -> EngineResult<()> {
        self.open()?;
        self.update_header(|h| h.mounted = true)
    }

    pub fn unmount(&mut self) -> EngineResult<()> {
        self.open()?;
        self.update_header(|h| h.mounted = false)?;
        self.flush()
    }

    /// Force all written pages to disk.
    pub fn flush(&mut self) -> EngineResult<()> {
        if let Some(master) = self.master.as_mut() {
            master.sync_all()?;
        }
        Ok(())
    }

    /// Begin a backup bracket. With `restorable` a snapshot image of the
    /// master file is kept so `restore` can roll back to this point.
    pub fn start_backup(&mut self, restorable: bool) -> EngineResult<()> {
        self.open()?;
        self.flush()?;
        if restorable {
            fs::copy(self.master_path(), self.backup_path())
                .map_err(|e| EngineError::Storage(format!("backup snapshot failed: {e}")))?;
        }
        self.update_header(|h| h.in_backup = true)
    }

    pub fn end_backup(&mut self) -> EngineResult<()> {
        self.update_header(|h| h.in_backup = false)?;
        let _ = fs::remove_file(self.backup_path());
        self.flush()
    }

    /// Roll the master file back to the most recent restorable snapshot.
    pub fn restore(&mut self) -> EngineResult<()> {
        if !self.backup_path().exists() {
            return Err(EngineError::Storage("no snapshot to restore".into()));
        }
        self.master = None;
        fs::copy(self.backup_path(), self.master_path())
            .map_err(|e| EngineError::Storage(format!("restore failed: {e}")))?;
        self.open()
    }

    /// Recover after a crash: reload the header and drop a stale backup
    /// bracket. If the OS files disappeared the directory is removed.
    pub fn recover(&mut self) -> EngineResult<()> {
        if !self.is_accessible(true) {
            let _ = fs::remove_dir_all(&self.strategy.path);
            return Ok(());
        }
        self.master = None;
        self.open()?;
        self.update_header(|h| h.in_backup = false)
    }

    /// Flush and report whether this file still has work pending.
    pub fn sync(&mut self, incomplete: &mut bool, modified: &mut bool) -> EngineResult<()> {
        if self.master.is_some() {
            self.flush()?;
            *modified = true;
        }
        let _ = incomplete;
        Ok(())
    }

    /// Move the directory to `new_path`.
    ///
    /// A step counter drives compensation: if moving any of the files
    /// fails after the master moved, the move is rolled back and the
    /// half-populated target directory removed. The now-empty source
    /// directory is always removed on success.
    pub fn move_to(&mut self, new_path: &Path) -> EngineResult<()> {
        if new_path == self.strategy.path {
            return Ok(());
        }

        let accessible = self.is_accessible(true);
        let old_path = self.strategy.path.clone();
        self.master = None;

        let mut step = 0;
        let result = (|| -> EngineResult<()> {
            if accessible {
                fs::create_dir_all(new_path)?;
                fs::rename(old_path.join(MASTER_FILE), new_path.join(MASTER_FILE))?;
                step = 1;
                if !self.strategy.temporary {
                    for name in [VERSION_LOG_FILE, SYNC_LOG_FILE] {
                        let from = old_path.join(name);
                        if from.exists() {
                            fs::rename(from, new_path.join(name))?;
                        }
                    }
                }
                step = 2;
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                if accessible {
                    let _ = fs::remove_dir(&old_path);
                }
                self.strategy.path = new_path.to_path_buf();
                Ok(())
            }
            Err(e) => {
                log::error!(
                    "moving {} to {} failed at step {step}, rolling back: {e}",
                    old_path.display(),
                    new_path.display()
                );
                if step >= 1 {
                    let _ = fs::rename(new_path.join(MASTER_FILE), old_path.join(MASTER_FILE));
                }
                let _ = fs::remove_dir_all(new_path);
                Err(e)
            }
        }
    }

    pub fn file_size(&self) -> EngineResult<u64> {
        let master = self.master.as_ref().ok_or(EngineError::FileNotOpen)?;
        Ok(master.metadata()?.len())
    }

    /// Pages handed out and not freed, excluding manage pages.
    pub fn used_page_count(&self) -> EngineResult<u32> {
        let header = self.header.as_ref().ok_or(EngineError::FileNotOpen)?;
        Ok(header.page_count - header.free_count)
    }

    pub fn page_count(&self) -> EngineResult<u32> {
        let header = self.header.as_ref().ok_or(EngineError::FileNotOpen)?;
        Ok(header.page_count)
    }

    /// Allocate a page, reusing a freed page when one is available.
    /// Fresh pages extend the master file and are zero-initialized.
    pub fn allocate_page(&mut self) -> EngineResult<PageId> {
        self.open()?;
        if let Some(pid) = self.pop_free_page()? {
            let zero = vec![0u8; self.strategy.page_size as usize];
            self.write_page(pid, &zero)?;
            return Ok(pid);
        }

        let header = self.header.as_mut().ok_or(EngineError::FileNotOpen)?;
        let pid = PageId(header.page_count);

        let page_size = self.strategy.page_size as u64;
        let needed = HEADER_BLOCK as u64 + (pid.0 as u64 + 1) * page_size;
        if needed > self.strategy.max_size {
            return Err(EngineError::Storage(format!(
                "file exceeds maximum size {}",
                self.strategy.max_size
            )));
        }
        header.page_count += 1;

        let zero = vec![0u8; self.strategy.page_size as usize];
        self.write_page(pid, &zero)?;
        self.persist_header()?;
        Ok(pid)
    }

    /// Return a page to the free manager. The payload is left in place;
    /// the page is recycled by a later `allocate_page`.
    pub fn free_page(&mut self, pid: PageId) -> EngineResult<()> {
        self.push_free_page(pid)
    }

    pub fn read_page(&mut self, pid: PageId) -> EngineResult<Vec<u8>> {
        self.open()?;
        self.check_page_id(pid)?;
        let page_size = self.strategy.page_size as usize;
        let master = self.master.as_mut().ok_or(EngineError::FileNotOpen)?;
        master.seek(SeekFrom::Start(page_offset(pid, page_size)))?;
        let mut buf = vec![0u8; page_size];
        master
            .read_exact(&mut buf)
            .map_err(|e| EngineError::Storage(format!("read page {} failed: {e}", pid.0)))?;
        Ok(buf)
    }

    pub fn write_page(&mut self, pid: PageId, data: &[u8]) -> EngineResult<()> {
        let page_size = self.strategy.page_size as usize;
        if data.len() != page_size {
            return Err(EngineError::Storage(format!(
                "page buffer is {} bytes, page size is {page_size}",
                data.len()
            )));
        }
        self.check_page_id(pid)?;
        let master = self.master.as_mut().ok_or(EngineError::FileNotOpen)?;
        master.seek(SeekFrom::Start(page_offset(pid, page_size)))?;
        master
            .write_all(data)
            .map_err(|e| EngineError::Storage(format!("write page {} failed: {e}", pid.0)))?;
        Ok(())
    }

    /// Walk the free structure and the page range, reporting
    /// inconsistencies into `progress`.
    pub fn verify(&mut self, progress: &mut common::verify::Progress) -> EngineResult<()> {
        self.open()?;
        let header = self.header.clone().ok_or(EngineError::FileNotOpen)?;

        let mut manager = FreeManager::load(self, &header)?;
        let free = manager.collect(self)?;
        if free.len() as u32 != header.free_count {
            progress.fault(
                &self.strategy.path,
                None,
                format!(
                    "free count mismatch: header says {}, structure holds {}",
                    header.free_count,
                    free.len()
                ),
            );
        }
        for pid in &free {
            progress.notify_page();
            if pid.0 >= header.page_count {
                progress.fault(
                    &self.strategy.path,
                    Some(*pid),
                    "free page beyond allocated range",
                );
            }
        }
        Ok(())
    }

    fn check_page_id(&self, pid: PageId) -> EngineResult<()> {
        let header = self.header.as_ref().ok_or(EngineError::FileNotOpen)?;
        if pid.is_invalid() || pid.0 >= header.page_count {
            return Err(EngineError::Storage(format!("page {} not allocated", pid.0)));
        }
        Ok(())
    }

    fn pop_free_page(&mut self) -> EngineResult<Option<PageId>> {
        let header = self.header.clone().ok_or(EngineError::FileNotOpen)?;
        let mut manager = FreeManager::load(self, &header)?;
        let popped = manager.pop(self)?;
        if popped.is_some() {
            let state = manager.state();
            self.update_header(|h| {
                h.free_head = state.head;
                h.free_count -= 1;
            })?;
        }
        Ok(popped)
    }

    fn push_free_page(&mut self, pid: PageId) -> EngineResult<()> {
        self.check_page_id(pid)?;
        let header = self.header.clone().ok_or(EngineError::FileNotOpen)?;
        let mut manager = FreeManager::load(self, &header)?;
        manager.push(self, pid)?;
        let state = manager.state();
        self.update_header(|h| {
            h.free_head = state.head;
            h.free_count += 1;
            h.page_count = h.page_count.max(state.page_count);
        })
    }

    fn update_header(&mut self, f: impl FnOnce(&mut FileHeader)) -> EngineResult<()> {
        let header = self.header.as_mut().ok_or(EngineError::FileNotOpen)?;
        f(header);
        self.persist_header()
    }

    fn persist_header(&mut self) -> EngineResult<()> {
        let header = self.header.clone().ok_or(EngineError::FileNotOpen)?;
        let master = self.master.as_mut().ok_or(EngineError::FileNotOpen)?;
        write_header(master, &header)
    }

    fn backup_path(&self) -> PathBuf {
        self.strategy.path.join("master.bak")
    }

    /// Used by the free manager to grow the file for its own pages.
    pub(crate) fn allocate_raw_page(&mut self) -> EngineResult<PageId> {
        let header = self.header.as_mut().ok_or(EngineError::FileNotOpen)?;
        let pid = PageId(header.page_count);
        header.page_count += 1;
        let zero = vec![0u8; self.strategy.page_size as usize];
        self.write_page(pid, &zero)?;
        self.persist_header()?;
        Ok(pid)
    }
}

fn page_offset(pid: PageId, page_size: usize) -> u64 {
    HEADER_BLOCK as u64 + pid.0 as u64 * page_size as u64
}

fn write_header(master: &mut File, header: &FileHeader) -> EngineResult<()> {
    let bytes = encode_to_vec(header, bincode_config())
        .map_err(|e| EngineError::Storage(format!("encode header failed: {e}")))?;
    debug_assert!(bytes.len() <= HEADER_BLOCK);
    let mut block = vec![0u8; HEADER_BLOCK];
    block[..bytes.len()].copy_from_slice(&bytes);
    master.seek(SeekFrom::Start(0))?;
    master
        .write_all(&block)
        .map_err(|e| EngineError::Storage(format!("write header failed: {e}")))?;
    Ok(())
}

fn read_header(master: &mut File) -> EngineResult<FileHeader> {
    master.seek(SeekFrom::Start(0))?;
    let mut block = vec![0u8; HEADER_BLOCK];
    master
        .read_exact(&mut block)
        .map_err(|e| EngineError::Storage(format!("read header failed: {e}")))?;
    let (header, _): (FileHeader, usize) = decode_from_slice(&block, bincode_config())
        .map_err(|e| EngineError::Storage(format!("decode header failed: {e}")))?;
    if header.magic != HEADER_MAGIC {
        return Err(EngineError::Storage("not a paged file".into()));
    }
    Ok(header)
}
