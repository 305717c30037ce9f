//! Page cache over a physical paged file.
//!
//! Each file gets one `PageCache`. Pages are fixed through
//! [`PageCache::attach_page`] and released when the returned
//! [`PageHandle`] drops; the cache tracks dirty state, keeps clean
//! unreferenced pages resident up to a configured count, and defers
//! physical frees until [`PageCache::flush_all_pages`].
//!
//! The mutable maps (LRU list, freelist, spare buffers) are guarded by
//! one latch per file; reads and writes of an already-fixed page only
//! take the page's own lock.

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use common::verify::{Progress, Treatment};
use common::{CancelToken, EngineError, EngineResult, FixMode, PageId};
use lru::LruCache;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use storage::PagedFile;

/// Replacement priority of a fixed page.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FixPriority {
    #[default]
    Low,
    Middle,
    High,
}

/// One cached page. Owned by the cache; callers only see it through
/// [`PageHandle`].
#[derive(Debug)]
pub struct PageSlot {
    id: PageId,
    buf: RwLock<Vec<u8>>,
    dirty: AtomicBool,
    refs: AtomicUsize,
    freed: AtomicBool,
    discardable: bool,
}

impl PageSlot {
    fn new(id: PageId, buf: Vec<u8>, discardable: bool) -> Arc<Self> {
        Arc::new(Self {
            id,
            buf: RwLock::new(buf),
            dirty: AtomicBool::new(false),
            refs: AtomicUsize::new(0),
            freed: AtomicBool::new(false),
            discardable,
        })
    }

    fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }
}

struct VerifyContext {
    progress: Progress,
}

struct CacheState {
    lru: LruCache<PageId, Arc<PageSlot>>,
    freelist: Vec<Arc<PageSlot>>,
    /// Clean, unreferenced pages currently resident.
    current_cache_count: usize,
    attach_count: u64,
    fix_mode: FixMode,
    cancel: CancelToken,
    verification: Option<VerifyContext>,
    /// Recycled page buffers, bounded to avoid holding memory.
    spare_buffers: Vec<Vec<u8>>,
}

struct Shared {
    file: Mutex<PagedFile>,
    state: Mutex<CacheState>,
    cache_count: usize,
}

/// LRU page cache with deferred free and fix/unfix handles.
pub struct PageCache {
    shared: Arc<Shared>,
}

const SPARE_BUFFER_MAX: usize = 10;
const CANCEL_CHECK_INTERVAL: u64 = 100;

impl PageCache {
    pub fn new(file: PagedFile, cache_count: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                file: Mutex::new(file),
                state: Mutex::new(CacheState {
                    lru: LruCache::unbounded(),
                    freelist: Vec::new(),
                    current_cache_count: 0,
                    attach_count: 0,
                    fix_mode: FixMode::ReadOnly,
                    cancel: CancelToken::new(),
                    verification: None,
                    spare_buffers: Vec::new(),
                }),
                cache_count,
            }),
        }
    }

    /// Set the fix mode and cancel token for the coming statement.
    pub fn open(&self, fix_mode: FixMode, cancel: CancelToken) {
        let mut state = self.shared.state.lock();
        state.fix_mode = fix_mode;
        state.cancel = cancel;
    }

    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        state.fix_mode = FixMode::ReadOnly;
        state.cancel = CancelToken::new();
    }

    /// Run `f` on the underlying physical file.
    pub fn with_file<R>(&self, f: impl FnOnce(&mut PagedFile) -> R) -> R {
        f(&mut self.shared.file.lock())
    }

    /// Fix a page, loading it from the physical file on a miss.
    ///
    /// During read-only operation the statement's cancel flag is polled
    /// once every 100 attaches. In verification mode every miss runs the
    /// page check into a per-call progress that is folded into the
    /// verification's accumulator; a bad page raises `VerifyAborted`.
    pub fn attach_page(&self, pid: PageId, priority: FixPriority) -> EngineResult<PageHandle> {
        let mut state = self.shared.state.lock();

        state.attach_count += 1;
        if state.attach_count % CANCEL_CHECK_INTERVAL == 0 && state.fix_mode.is_read_only() {
            state.cancel.check()?;
        }

        if let Some(slot) = state.lru.get(&pid).cloned() {
            if slot.refs.load(Ordering::Acquire) == 0 && !slot.is_dirty() {
                state.current_cache_count = state.current_cache_count.saturating_sub(1);
            }
            slot.refs.fetch_add(1, Ordering::AcqRel);
            return Ok(PageHandle {
                shared: Arc::clone(&self.shared),
                slot,
            });
        }

        let buf = self.fetch_page(&mut state, pid)?;
        let slot = PageSlot::new(pid, buf, state.fix_mode.is_discardable());
        slot.refs.store(1, Ordering::Release);
        state.lru.push(pid, Arc::clone(&slot));
        if priority == FixPriority::Low {
            state.lru.demote(&pid);
        }
        Ok(PageHandle {
            shared: Arc::clone(&self.shared),
            slot,
        })
    }

    /// Allocate a page, preferring the cache's freelist over the
    /// physical file, and initialize its buffer with `init`.
    pub fn allocate_page(&self, init: impl FnOnce(&mut [u8])) -> EngineResult<PageHandle> {
        let mut state = self.shared.state.lock();

        let slot = if let Some(old) = state.freelist.pop() {
            // Recycle the logically freed page in place.
            let pid = old.id;
            let mut buf = old.buf.write();
            buf.fill(0);
            init(&mut buf);
            drop(buf);
            old.freed.store(false, Ordering::Release);
            old.dirty.store(true, Ordering::Release);
            old.refs.store(1, Ordering::Release);
            state.lru.push(pid, Arc::clone(&old));
            old
        } else {
            let pid = self.shared.file.lock().allocate_page()?;
            let mut buf = state
                .spare_buffers
                .pop()
                .unwrap_or_else(|| vec![0u8; self.page_size()]);
            buf.fill(0);
            init(&mut buf);
            let slot = PageSlot::new(pid, buf, state.fix_mode.is_discardable());
            slot.dirty.store(true, Ordering::Release);
            slot.refs.store(1, Ordering::Release);
            state.lru.push(pid, Arc::clone(&slot));
            slot
        };

        Ok(PageHandle {
            shared: Arc::clone(&self.shared),
            slot,
        })
    }

    /// Mark the page as freed. The physical free happens at
    /// `flush_all_pages`; until then the page sits on the freelist and
    /// is never also on the LRU list.
    pub fn free_page(&self, handle: PageHandle) {
        let mut state = self.shared.state.lock();
        let slot = Arc::clone(&handle.slot);
        slot.freed.store(true, Ordering::Release);
        state.lru.pop(&slot.id);
        state.freelist.push(slot);
        drop(state);
        // The handle's drop sees the freed flag and skips LRU bookkeeping.
    }

    /// Physically free the freelist, write out every dirty page, drop
    /// all cached pages, and sync the file.
    pub fn flush_all_pages(&self) -> EngineResult<()> {
        let mut state = self.shared.state.lock();
        let mut file = self.shared.file.lock();

        for slot in std::mem::take(&mut state.freelist) {
            debug_assert_eq!(slot.refs.load(Ordering::Acquire), 0);
            file.free_page(slot.id)?;
        }

        while let Some((pid, slot)) = state.lru.pop_lru() {
            debug_assert_eq!(slot.refs.load(Ordering::Acquire), 0);
            if slot.is_dirty() {
                file.write_page(pid, &slot.buf.read())?;
            }
            Self::recycle_buffer(&mut state, slot);
        }

        state.current_cache_count = 0;
        state.attach_count = 0;
        file.flush()
    }

    /// Drop all modifications that can be dropped.
    ///
    /// Pages fixed discardable lose their changes; pages fixed plain
    /// write cannot be rolled back and are written out. Logical frees
    /// are rolled back wholesale (nothing was physically freed yet).
    pub fn recover_all_pages(&self) -> EngineResult<()> {
        let mut state = self.shared.state.lock();
        let mut file = self.shared.file.lock();

        for slot in std::mem::take(&mut state.freelist) {
            if !slot.discardable && slot.is_dirty() {
                file.write_page(slot.id, &slot.buf.read())?;
            }
        }

        while let Some((pid, slot)) = state.lru.pop_lru() {
            if !slot.discardable && slot.is_dirty() {
                file.write_page(pid, &slot.buf.read())?;
            }
            Self::recycle_buffer(&mut state, slot);
        }

        state.current_cache_count = 0;
        state.attach_count = 0;
        Ok(())
    }

    /// Write out dirty pages but keep them cached, evicting clean pages
    /// beyond the configured cache count.
    pub fn save_all_pages(&self) -> EngineResult<()> {
        let mut state = self.shared.state.lock();
        let mut file = self.shared.file.lock();

        for slot in std::mem::take(&mut state.freelist) {
            file.free_page(slot.id)?;
        }

        let slots: Vec<Arc<PageSlot>> = state.lru.iter().map(|(_, s)| Arc::clone(s)).collect();
        for slot in slots {
            if slot.is_dirty() {
                file.write_page(slot.id, &slot.buf.read())?;
                slot.dirty.store(false, Ordering::Release);
                if slot.refs.load(Ordering::Acquire) == 0 {
                    state.current_cache_count += 1;
                }
            }
        }

        if state.current_cache_count > self.shared.cache_count {
            Self::evict_clean(&self.shared, &mut state);
        }
        file.flush()
    }

    /// Pages currently held by the cache, freelist included.
    pub fn attached_page_count(&self) -> usize {
        let state = self.shared.state.lock();
        state.lru.len() + state.freelist.len()
    }

    pub fn page_size(&self) -> usize {
        self.shared.file.lock().page_size() as usize
    }

    /// Switch attaches into verification mode.
    pub fn start_verification(&self, treatment: Treatment) {
        let mut state = self.shared.state.lock();
        state.fix_mode = if treatment.correct {
            FixMode::WriteDiscardable
        } else {
            FixMode::ReadOnly
        };
        state.verification = Some(VerifyContext {
            progress: Progress::new(),
        });
    }

    /// Leave verification mode and return the accumulated findings.
    pub fn end_verification(&self) -> Progress {
        let mut state = self.shared.state.lock();
        state.fix_mode = FixMode::ReadOnly;
        state
            .verification
            .take()
            .map(|v| v.progress)
            .unwrap_or_default()
    }

    fn fetch_page(&self, state: &mut CacheState, pid: PageId) -> EngineResult<Vec<u8>> {
        let mut file = self.shared.file.lock();
        if let Some(verify) = state.verification.as_mut() {
            // Verify into a per-call progress first so one bad page can
            // abort the walk without losing earlier findings.
            let mut call = Progress::new();
            let result = file.read_page(pid);
            match result {
                Ok(buf) => {
                    call.notify_page();
                    verify.progress.merge(call);
                    Ok(buf)
                }
                Err(e) => {
                    log::warn!("{}: page {} failed verification: {e}", file.path().display(), pid.0);
                    call.fault(file.path(), Some(pid), e.to_string());
                    verify.progress.merge(call);
                    Err(EngineError::VerifyAborted)
                }
            }
        } else {
            file.read_page(pid)
        }
    }

    fn recycle_buffer(state: &mut CacheState, slot: Arc<PageSlot>) {
        if state.spare_buffers.len() < SPARE_BUFFER_MAX {
            // Only the cache held this page; reclaim its buffer.
            if let Some(slot) = Arc::into_inner(slot) {
                state.spare_buffers.push(slot.buf.into_inner());
            }
        }
    }

    /// Detach clean unreferenced pages in LRU order until the resident
    /// count is back under the limit.
    fn evict_clean(shared: &Shared, state: &mut CacheState) {
        let victims: Vec<PageId> = state
            .lru
            .iter()
            .rev() // least recently used first
            .filter(|(_, slot)| slot.refs.load(Ordering::Acquire) == 0 && !slot.is_dirty())
            .map(|(pid, _)| *pid)
            .collect();

        for pid in victims {
            if state.current_cache_count <= shared.cache_count {
                break;
            }
            if let Some(slot) = state.lru.pop(&pid) {
                state.current_cache_count -= 1;
                Self::recycle_buffer(state, slot);
            }
        }
    }

    fn detach(shared: &Arc<Shared>, slot: &Arc<PageSlot>) {
        let mut state = shared.state.lock();
        if slot.freed.load(Ordering::Acquire) {
            return;
        }
        // Most recently used position.
        state.lru.promote(&slot.id);
        if !slot.is_dirty() {
            state.current_cache_count += 1;
            if state.current_cache_count > shared.cache_count {
                Self::evict_clean(shared, &mut state);
            }
        }
    }
}

/// Reference-counted fix of one page; the fix is released on drop.
pub struct PageHandle {
    shared: Arc<Shared>,
    slot: Arc<PageSlot>,
}

impl PageHandle {
    pub fn id(&self) -> PageId {
        self.slot.id
    }

    pub fn is_dirty(&self) -> bool {
        self.slot.is_dirty()
    }

    /// Read access to the page buffer.
    pub fn data(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.slot.buf.read()
    }

    /// Write access; marks the page dirty.
    pub fn data_mut(&self) -> RwLockWriteGuard<'_, Vec<u8>> {
        self.slot.dirty.store(true, Ordering::Release);
        self.slot.buf.write()
    }

    pub fn mark_dirty(&self) {
        self.slot.dirty.store(true, Ordering::Release);
    }
}

impl Clone for PageHandle {
    fn clone(&self) -> Self {
        self.slot.refs.fetch_add(1, Ordering::AcqRel);
        Self {
            shared: Arc::clone(&self.shared),
            slot: Arc::clone(&self.slot),
        }
    }
}

impl Drop for PageHandle {
    fn drop(&mut self) {
        if self.slot.refs.fetch_sub(1, Ordering::AcqRel) == 1 {
            PageCache::detach(&self.shared, &self.slot);
        }
    }
}
