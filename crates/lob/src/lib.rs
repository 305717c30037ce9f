//! LOB store: variable-length opaque values in a single paged file.
//!
//! Page 0 is the top page. Its header carries the file totals, the
//! free-block list, and the expunge list; the rest of the page (and of
//! every node page) is a vector of fixed-size blocks, addressed by
//! `ObjectId { page, offset }`. A block's payload lives in data pages
//! reached through dir pages (see [`data`]).
//!
//! Deletion is two-phase: `expunge` only sets the block's expunge bit
//! and links it into the top page's expunge list, stamped with the
//! deleting transaction. `compact` later frees the payload of one
//! expunged block whose transaction can no longer be observed, moving
//! the block onto the free list.


mod compress;
mod data;
mod pages;

pub use data::Codec;
pub use pages::Block;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use buffer::{FixPriority, PageCache, PageHandle};
use common::verify::Progress;
use common::{CancelToken, EngineError, EngineResult, FixMode, PageId, TransactionId};
use data::Tree;
use pages::{
    NodeHeader, TopHeader, block_offset, blocks_per_page, decode_at, encode_at,
};
use parking_lot::RwLock;
use storage::{PageManageVariant, PagedFile, StorageStrategy};
use types::ObjectId;

/// Answers whether a transaction may still be observed by anyone.
///
/// The host's transaction manager implements this; vacuum consults it
/// before physically freeing an expunged block.
pub trait TransactionOracle: Send + Sync {
    fn is_in_progress(&self, tx: TransactionId) -> bool;
}

/// Oracle over an explicit set of live transactions.
#[derive(Default)]
pub struct ActiveTransactions {
    live: RwLock<HashSet<TransactionId>>,
}

impl ActiveTransactions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, tx: TransactionId) {
        self.live.write().insert(tx);
    }

    pub fn end(&self, tx: TransactionId) {
        self.live.write().remove(&tx);
    }
}

impl TransactionOracle for ActiveTransactions {
    fn is_in_progress(&self, tx: TransactionId) -> bool {
        self.live.read().contains(&tx)
    }
}

/// A LOB file: insert/get/expunge/update plus locator-style partial
/// operations and the deferred-expunge vacuum.
pub struct LobStore {
    cache: PageCache,
    path: parking_lot::Mutex<PathBuf>,
    codec: Codec,
    oracle: Arc<dyn TransactionOracle>,
    current_tx: AtomicU64,
    available: AtomicBool,
}

impl LobStore {
    /// Attach a store handle. Nothing touches the disk until
    /// [`LobStore::create`] or the first open of an existing file.
    pub fn attach(
        path: impl Into<PathBuf>,
        page_size: u32,
        codec: Codec,
        cache_count: usize,
        oracle: Arc<dyn TransactionOracle>,
    ) -> Self {
        let path = path.into();
        let file = PagedFile::attach(StorageStrategy::new(
            &path,
            page_size,
            PageManageVariant::V1,
        ));
        Self {
            cache: PageCache::new(file, cache_count),
            path: parking_lot::Mutex::new(path),
            codec,
            oracle,
            current_tx: AtomicU64::new(0),
            available: AtomicBool::new(true),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.path.lock().clone()
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Create the physical file and initialize the top page.
    pub fn create(&self) -> EngineResult<()> {
        self.cache.with_file(|file| file.create())?;
        let top = self.cache.allocate_page(|_| {})?;
        if top.id() != PageId(0) {
            return Err(EngineError::Unexpected(
                "top page was not allocated at page 0".into(),
            ));
        }
        {
            let mut buf = top.data_mut();
            encode_at(&mut buf, 0, &TopHeader::new())?;
        }
        drop(top);
        self.cache.flush_all_pages()
    }

    pub fn destroy(&self) -> EngineResult<()> {
        self.cache.with_file(|file| file.destroy())
    }

    pub fn open(&self, tx: TransactionId, mode: FixMode, cancel: CancelToken) -> EngineResult<()> {
        if !self.available.load(Ordering::Acquire) {
            return Err(EngineError::Unavailable);
        }
        self.current_tx.store(tx.0, Ordering::Release);
        self.cache.open(mode, cancel);
        Ok(())
    }

    fn current_tx(&self) -> u64 {
        self.current_tx.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        self.cache.close();
    }

    pub fn flush_all_pages(&self) -> EngineResult<()> {
        self.cache.flush_all_pages()
    }

    pub fn recover_all_pages(&self) -> EngineResult<()> {
        self.cache.recover_all_pages()
    }

    pub fn save_all_pages(&self) -> EngineResult<()> {
        self.cache.save_all_pages()
    }

    pub fn is_accessible(&self, force: bool) -> bool {
        self.cache.with_file(|file| file.is_accessible(force))
    }

    pub fn mount(&self) -> EngineResult<()> {
        self.cache.with_file(|file| file.mount())
    }

    pub fn unmount(&self) -> EngineResult<()> {
        self.cache.with_file(|file| file.unmount())
    }

    pub fn file_size(&self) -> EngineResult<u64> {
        self.cache.with_file(|file| file.file_size())
    }

    pub fn move_to(&self, new_path: &Path) -> EngineResult<()> {
        self.cache.with_file(|file| file.move_to(new_path))?;
        *self.path.lock() = new_path.to_path_buf();
        Ok(())
    }

    pub fn sync(&self, incomplete: &mut bool, modified: &mut bool) -> EngineResult<()> {
        self.cache.with_file(|file| file.sync(incomplete, modified))
    }

    /// Values currently visible (inserted and not expunged).
    pub fn entry_count(&self) -> EngineResult<u32> {
        Ok(self.read_top()?.1.total_entry_count)
    }

    pub fn is_exist_expunge_data(&self) -> EngineResult<bool> {
        Ok(!self.read_top()?.1.expunge_block.is_invalid())
    }

    /// Whether a block exists at `id` (live or expunged).
    pub fn exists(&self, id: ObjectId) -> EngineResult<bool> {
        match self.read_block(id) {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    // ---- value operations --------------------------------------------

    pub fn insert(&self, bytes: &[u8]) -> EngineResult<ObjectId> {
        let id = self.allocate_block()?;
        let mut block = self.read_block(id)?;
        self.tree().insert(&mut block, bytes)?;
        self.write_block(id, &block)?;
        self.update_top(|top| top.total_entry_count += 1)?;
        Ok(id)
    }

    /// Read at most `len` bytes from `position`. The flag is true when
    /// the block only holds an expunged image.
    pub fn get(&self, id: ObjectId, position: usize, len: usize) -> EngineResult<(Vec<u8>, bool)> {
        let block = self.read_block(id)?;
        if block.is_expunged() {
            return Ok((Vec::new(), true));
        }
        let bytes = self.tree().read(&block, position, len)?;
        Ok((bytes, false))
    }

    pub fn data_size(&self, id: ObjectId) -> EngineResult<u32> {
        Ok(self.read_block(id)?.length)
    }

    /// Logical delete: flag the block and push it onto the expunge
    /// list. The payload pages remain until `compact`.
    pub fn expunge(&self, id: ObjectId) -> EngineResult<()> {
        let mut block = self.read_block(id)?;
        let (top_handle, mut top) = self.read_top()?;
        block.transaction_id = self.current_tx();
        block.next_block = top.expunge_block;
        block.set_expunge_flag();
        self.write_block(id, &block)?;
        top.expunge_block = id;
        top.total_entry_count -= 1;
        self.write_top(&top_handle, &top)
    }

    /// Undo a logical delete: unlink from the expunge list and clear
    /// the flag.
    pub fn undo_expunge(&self, id: ObjectId) -> EngineResult<()> {
        self.unlink_expunge(id)?;
        let mut block = self.read_block(id)?;
        block.unset_expunge_flag();
        block.transaction_id = 0;
        block.next_block = ObjectId::INVALID;
        self.write_block(id, &block)?;
        self.update_top(|top| top.total_entry_count += 1)
    }

    /// Replace the payload, keeping the pre-image reachable for undo.
    ///
    /// A fresh block takes over the old payload pointers and is pushed
    /// onto the expunge list (it holds the pre-image); the new bytes are
    /// inserted into the original slot so the value's `ObjectId` is
    /// stable.
    pub fn update(&self, id: ObjectId, bytes: &[u8]) -> EngineResult<()> {
        let old = self.read_block(id)?;

        let pre_id = self.allocate_block()?;
        self.write_block(pre_id, &old)?;

        let mut new_block = Block::new();
        self.tree().insert(&mut new_block, bytes)?;
        new_block.prev_block = pre_id;
        self.write_block(id, &new_block)?;

        let mut pre = self.read_block(pre_id)?;
        let (top_handle, mut top) = self.read_top()?;
        pre.transaction_id = self.current_tx();
        pre.next_block = top.expunge_block;
        pre.set_expunge_flag();
        self.write_block(pre_id, &pre)?;
        top.expunge_block = pre_id;
        self.write_top(&top_handle, &top)
    }

    /// Undo an update: free the post-image, move the pre-image back
    /// into the original slot, recycle the pre-image block.
    ///
    /// Precondition: no vacuum ran since the update, so the pre-image
    /// block still holds its pages. If the undo itself fails the store
    /// is marked unavailable and the error propagates.
    pub fn undo_update(&self, id: ObjectId) -> EngineResult<()> {
        let result = self.do_undo_update(id);
        if let Err(ref e) = result {
            log::error!("{}: undo of an update failed: {e}", self.path.lock().display());
            self.available.store(false, Ordering::Release);
        }
        result
    }

    fn do_undo_update(&self, id: ObjectId) -> EngineResult<()> {
        let mut current = self.read_block(id)?;
        let pre_id = current.prev_block;
        if pre_id.is_invalid() {
            return Err(EngineError::Unexpected("undo_update without a pre-image".into()));
        }

        self.unlink_expunge(pre_id)?;

        let pre = self.read_block(pre_id)?;

        // Free the post-image payload.
        self.tree().expunge(&mut current)?;

        // The pre-image moves back into the original slot, live again.
        let mut restored = pre;
        restored.unset_expunge_flag();
        restored.transaction_id = 0;
        restored.next_block = ObjectId::INVALID;
        restored.prev_block = ObjectId::INVALID;
        self.write_block(id, &restored)?;

        // The emptied pre-image block goes onto the free list.
        let (top_handle, mut top) = self.read_top()?;
        let mut freed = Block::new();
        freed.next_block = top.free_block;
        freed.set_expunge_flag();
        self.write_block(pre_id, &freed)?;
        top.free_block = pre_id;
        self.write_top(&top_handle, &top)
    }

    pub fn append(&self, id: ObjectId, bytes: &[u8]) -> EngineResult<()> {
        let mut block = self.read_block(id)?;
        self.tree().append(&mut block, bytes)?;
        self.write_block(id, &block)
    }

    pub fn truncate(&self, id: ObjectId, new_len: usize) -> EngineResult<()> {
        let mut block = self.read_block(id)?;
        self.tree().truncate(&mut block, new_len)?;
        self.write_block(id, &block)
    }

    pub fn replace(&self, id: ObjectId, position: usize, bytes: &[u8]) -> EngineResult<()> {
        let block = self.read_block(id)?;
        self.tree().replace(&block, position, bytes)
    }

    /// Free the payload of one expunged block whose deleting
    /// transaction is no longer observable. Returns false when nothing
    /// could be freed. The walk position survives across calls in
    /// `prev_free_block` so a block held by a live transaction is only
    /// skipped once.
    pub fn compact(&self) -> EngineResult<bool> {
        let (top_handle, mut top) = self.read_top()?;
        if top.expunge_block.is_invalid() {
            return Ok(false);
        }

        if top.transaction_id != self.current_tx() {
            // First compact of this transaction: restart the walk.
            top.transaction_id = self.current_tx();
            top.prev_free_block = ObjectId::INVALID;
            self.write_top(&top_handle, &top)?;
        }

        let mut prev = top.prev_free_block;
        if prev.is_invalid() {
            let id = top.expunge_block;
            let mut block = self.read_block(id)?;
            if !self.oracle.is_in_progress(TransactionId(block.transaction_id)) {
                self.tree().expunge(&mut block)?;
                top.expunge_block = block.next_block;
                block.clear();
                block.next_block = top.free_block;
                block.set_expunge_flag();
                self.write_block(id, &block)?;
                top.free_block = id;
                self.write_top(&top_handle, &top)?;
                return Ok(true);
            }
            prev = id;
            top.prev_free_block = prev;
            self.write_top(&top_handle, &top)?;
        }

        let mut cursor = self.read_block(prev)?.next_block;
        while !cursor.is_invalid() {
            let mut block = self.read_block(cursor)?;
            if self.oracle.is_in_progress(TransactionId(block.transaction_id)) {
                prev = cursor;
                cursor = block.next_block;
                top.prev_free_block = prev;
                self.write_top(&top_handle, &top)?;
                continue;
            }

            self.tree().expunge(&mut block)?;
            let next = block.next_block;

            let mut pred = self.read_block(prev)?;
            pred.next_block = next;
            self.write_block(prev, &pred)?;

            block.clear();
            block.next_block = top.free_block;
            block.set_expunge_flag();
            self.write_block(cursor, &block)?;
            top.free_block = cursor;
            self.write_top(&top_handle, &top)?;
            return Ok(true);
        }

        Ok(false)
    }

    /// Walk every block page and every live block's payload tree.
    pub fn verify(&self, cancel: &CancelToken, progress: &mut Progress) -> EngineResult<()> {
        let path = self.path();
        let (_, top) = self.read_top()?;

        let free = self.count_list(top.free_block)?;
        let expunged = self.count_list(top.expunge_block)?;

        let mut slots = 0u32;
        let mut live = 0u32;
        let mut pid = PageId(0);
        while !pid.is_invalid() {
            cancel.check()?;
            progress.notify_page();
            let handle = self.attach_page(pid)?;
            let (entries, next) = self.page_entries(&handle)?;
            for index in 0..entries {
                let block: Block = decode_at(&handle.data(), block_offset(pid, index))?;
                slots += 1;
                if !block.is_expunged() {
                    live += 1;
                    self.tree()
                        .verify(&block, &path, progress)?;
                }
            }
            pid = next;
        }

        if slots != top.total_block_count {
            progress.fault(
                &path,
                None,
                format!(
                    "block slots {slots} differ from recorded total {}",
                    top.total_block_count
                ),
            );
        }
        if free + expunged + live != top.total_block_count {
            progress.fault(
                &path,
                None,
                format!(
                    "free {free} + expunged {expunged} + live {live} differ from total {}",
                    top.total_block_count
                ),
            );
        }
        if live != top.total_entry_count {
            progress.fault(
                &path,
                None,
                format!(
                    "live blocks {live} differ from entry count {}",
                    top.total_entry_count
                ),
            );
        }
        Ok(())
    }

    // ---- block plumbing ----------------------------------------------

    fn tree(&self) -> Tree<'_> {
        Tree::new(&self.cache, self.codec)
    }

    fn attach_page(&self, pid: PageId) -> EngineResult<PageHandle> {
        self.cache.attach_page(pid, FixPriority::Middle)
    }

    fn read_top(&self) -> EngineResult<(PageHandle, TopHeader)> {
        let handle = self.attach_page(PageId(0))?;
        let top: TopHeader = decode_at(&handle.data(), 0)?;
        Ok((handle, top))
    }

    fn write_top(&self, handle: &PageHandle, top: &TopHeader) -> EngineResult<()> {
        let mut buf = handle.data_mut();
        encode_at(&mut buf, 0, top)
    }

    fn update_top(&self, f: impl FnOnce(&mut TopHeader)) -> EngineResult<()> {
        let (handle, mut top) = self.read_top()?;
        f(&mut top);
        self.write_top(&handle, &top)
    }

    fn read_block(&self, id: ObjectId) -> EngineResult<Block> {
        if id.is_invalid() {
            return Err(EngineError::BadArgument);
        }
        let pid = PageId(id.page);
        let handle = self.attach_page(pid)?;
        let (entries, _) = self.page_entries(&handle)?;
        if id.offset >= entries {
            return Err(EngineError::Lob(format!("no block at {id}")));
        }
        decode_at(&handle.data(), block_offset(pid, id.offset))
    }

    fn write_block(&self, id: ObjectId, block: &Block) -> EngineResult<()> {
        let pid = PageId(id.page);
        let handle = self.attach_page(pid)?;
        let mut buf = handle.data_mut();
        encode_at(&mut buf, block_offset(pid, id.offset), block)
    }

    /// Entry count and next-block-page link of a block page.
    fn page_entries(&self, handle: &PageHandle) -> EngineResult<(u32, PageId)> {
        if handle.id() == PageId(0) {
            let top: TopHeader = decode_at(&handle.data(), 0)?;
            Ok((top.entry_count, top.next_block_page))
        } else {
            let node: NodeHeader = decode_at(&handle.data(), 0)?;
            Ok((node.entry_count, node.next_block_page))
        }
    }

    /// Take a block from the free list, or mint one at the end of the
    /// last block page (growing the chain when that page is full).
    fn allocate_block(&self) -> EngineResult<ObjectId> {
        let (top_handle, mut top) = self.read_top()?;

        if !top.free_block.is_invalid() {
            let id = top.free_block;
            let block = self.read_block(id)?;
            top.free_block = block.next_block;
            self.write_top(&top_handle, &top)?;
            self.write_block(id, &Block::new())?;
            return Ok(id);
        }

        let page_size = self.cache.page_size();
        let target = if top.last_block_page.is_invalid() {
            PageId(0)
        } else {
            top.last_block_page
        };

        let handle = self.attach_page(target)?;
        let (entries, _) = self.page_entries(&handle)?;
        if entries < blocks_per_page(page_size, target) {
            let id = ObjectId::new(target.0, entries);
            if target == PageId(0) {
                top.entry_count += 1;
                top.total_block_count += 1;
                self.write_top(&top_handle, &top)?;
            } else {
                let mut node: NodeHeader = decode_at(&handle.data(), 0)?;
                node.entry_count += 1;
                {
                    let mut buf = handle.data_mut();
                    encode_at(&mut buf, 0, &node)?;
                }
                top.total_block_count += 1;
                self.write_top(&top_handle, &top)?;
            }
            self.write_block(id, &Block::new())?;
            return Ok(id);
        }
        drop(handle);

        // The last block page is full: chain a new node page.
        let node_handle = self.cache.allocate_page(|_| {})?;
        let node_pid = node_handle.id();
        {
            let mut buf = node_handle.data_mut();
            let mut node = NodeHeader::new();
            node.entry_count = 1;
            encode_at(&mut buf, 0, &node)?;
        }
        drop(node_handle);

        if target == PageId(0) {
            top.next_block_page = node_pid;
        } else {
            let prev = self.attach_page(target)?;
            let mut node: NodeHeader = decode_at(&prev.data(), 0)?;
            node.next_block_page = node_pid;
            let mut buf = prev.data_mut();
            encode_at(&mut buf, 0, &node)?;
        }
        top.last_block_page = node_pid;
        top.total_block_count += 1;
        self.write_top(&top_handle, &top)?;

        let id = ObjectId::new(node_pid.0, 0);
        self.write_block(id, &Block::new())?;
        Ok(id)
    }

    /// Remove `id` from the expunge list, rewiring its predecessor.
    fn unlink_expunge(&self, id: ObjectId) -> EngineResult<()> {
        let (top_handle, mut top) = self.read_top()?;
        let block = self.read_block(id)?;

        if top.expunge_block == id {
            top.expunge_block = block.next_block;
        } else {
            let mut cursor = top.expunge_block;
            loop {
                if cursor.is_invalid() {
                    return Err(EngineError::Lob(format!("{id} is not on the expunge list")));
                }
                let mut pred = self.read_block(cursor)?;
                if pred.next_block == id {
                    pred.next_block = block.next_block;
                    self.write_block(cursor, &pred)?;
                    break;
                }
                cursor = pred.next_block;
            }
        }

        // The vacuum cursor may point at the removed block; restart it.
        if top.prev_free_block == id {
            top.prev_free_block = ObjectId::INVALID;
        }
        self.write_top(&top_handle, &top)
    }

    fn count_list(&self, head: ObjectId) -> EngineResult<u32> {
        let mut count = 0;
        let mut cursor = head;
        while !cursor.is_invalid() {
            count += 1;
            cursor = self.read_block(cursor)?.next_block;
            if count > 1_000_000 {
                return Err(EngineError::Lob("block list cycle".into()));
            }
        }
        Ok(count)
    }
}
