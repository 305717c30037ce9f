//! Payload tree operations: data page chains and the dir pages above
//! them.
//!
//! Every size recorded in a dir entry or a block is an uncompressed
//! byte count; only data page headers know how the payload is stored.
//! Offsets never leave the file as pointers, so each operation walks
//! the tree from the block's `dir_page`.

use buffer::{FixPriority, PageCache, PageHandle};
use common::verify::Progress;
use common::{EngineError, EngineResult, PageId};

use crate::compress::{self, UNIT_SIZE};
use crate::pages::{
    COMPRESSED_DATA_HEADER_SIZE, CompressedDataHeader, DATA_HEADER_SIZE, DataHeader, DirEntry,
    DirHeader, data_capacity, decode_at, dir_entries_per_page, dir_entry_offset, encode_at,
};
use crate::pages::Block;

/// How payload bytes are stored on data pages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Codec {
    Raw,
    Zlib,
}

/// Walks and mutates one block's payload tree.
pub(crate) struct Tree<'a> {
    cache: &'a PageCache,
    page_size: usize,
    codec: Codec,
}

impl<'a> Tree<'a> {
    pub fn new(cache: &'a PageCache, codec: Codec) -> Self {
        Self {
            cache,
            page_size: cache.page_size(),
            codec,
        }
    }

    // ---- public operations -------------------------------------------

    /// Write `bytes` as the block's payload. The block must be empty.
    pub fn insert(&self, block: &mut Block, bytes: &[u8]) -> EngineResult<()> {
        debug_assert!(block.dir_page.is_invalid() && block.length == 0);
        if bytes.is_empty() {
            return Ok(());
        }

        let mut prev = PageId::INVALID;
        let mut pages: Vec<(PageId, u32)> = Vec::new();
        for chunk in self.split_payload(bytes) {
            let pid = self.write_fresh_page(&chunk, prev)?;
            if !prev.is_invalid() {
                self.set_next(prev, pid)?;
            }
            pages.push((pid, chunk.len() as u32));
            prev = pid;
        }

        block.last_page = prev;
        block.length = bytes.len() as u32;
        block.set_used_pages(pages.len() as u32);
        for (pid, size) in pages {
            self.push_page(block, pid, size)?;
        }
        Ok(())
    }

    /// Read at most `len` bytes starting at `position`.
    pub fn read(&self, block: &Block, position: usize, len: usize) -> EngineResult<Vec<u8>> {
        if position >= block.length as usize || len == 0 {
            return Ok(Vec::new());
        }
        let take = len.min(block.length as usize - position);

        let (mut pid, prev_size) = self.locate(block, position)?;
        let mut skip = position - prev_size;
        let mut out = Vec::with_capacity(take);
        while out.len() < take && !pid.is_invalid() {
            let handle = self.attach(pid)?;
            let payload = self.page_payload(&handle)?;
            let chunk = &payload[skip.min(payload.len())..];
            let want = take - out.len();
            out.extend_from_slice(&chunk[..want.min(chunk.len())]);
            skip = 0;
            pid = self.next_of(&handle)?;
        }
        Ok(out)
    }

    /// Append `bytes` to the end of the payload.
    pub fn append(&self, block: &mut Block, bytes: &[u8]) -> EngineResult<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        if block.dir_page.is_invalid() {
            return self.insert(block, bytes);
        }
        if self.codec == Codec::Zlib && block.length as usize % UNIT_SIZE != 0 {
            // Appending may only start a new unit.
            return Err(EngineError::BadArgument);
        }

        let mut rest = bytes;

        // Fill the tail of the last page first.
        let fill = {
            let handle = self.attach(block.last_page)?;
            let room = self.page_room(&handle)?;
            let fill = room.min(rest.len());
            if fill > 0 {
                self.extend_page(&handle, &rest[..fill])?;
            }
            fill
        };
        if fill > 0 {
            self.adjust_rightmost(block.dir_page, fill as i64)?;
            block.dir_length += fill as u32;
            block.length += fill as u32;
            rest = &rest[fill..];
        }

        // Then grow the chain.
        let mut prev = block.last_page;
        for chunk in self.split_payload(rest) {
            let pid = self.write_fresh_page(&chunk, prev)?;
            self.set_next(prev, pid)?;
            self.push_page(block, pid, chunk.len() as u32)?;
            block.length += chunk.len() as u32;
            block.set_used_pages(block.used_pages() + 1);
            block.last_page = pid;
            prev = pid;
        }
        Ok(())
    }

    /// Shrink the payload to `new_len` bytes.
    pub fn truncate(&self, block: &mut Block, new_len: usize) -> EngineResult<()> {
        if new_len > block.length as usize {
            return Err(EngineError::BadArgument);
        }

        // Drop whole trailing pages.
        while (block.length as usize) > new_len {
            let handle = self.attach(block.last_page)?;
            let page_len = self.page_len(&handle)?;
            if block.length as usize - page_len < new_len {
                break;
            }
            let prev = self.prev_of(&handle)?;
            if !prev.is_invalid() {
                self.set_next(prev, PageId::INVALID)?;
            }
            self.cache.free_page(handle);
            self.pop_last_page(block, page_len as u32)?;
            block.length -= page_len as u32;
            block.set_used_pages(block.used_pages() - 1);
            block.last_page = prev;
        }

        // Cut within the new last page.
        let excess = block.length as usize - new_len;
        if excess > 0 {
            let handle = self.attach(block.last_page)?;
            self.shrink_page(&handle, excess)?;
            self.adjust_rightmost(block.dir_page, -(excess as i64))?;
            block.dir_length -= excess as u32;
            block.length -= excess as u32;
        }
        Ok(())
    }

    /// Overwrite `bytes` at `position` without changing the length.
    pub fn replace(&self, block: &Block, position: usize, bytes: &[u8]) -> EngineResult<()> {
        if self.codec == Codec::Zlib {
            return Err(EngineError::NotSupported(
                "replace on a compressed lob".into(),
            ));
        }
        if position + bytes.len() > block.length as usize {
            return Err(EngineError::BadArgument);
        }
        if bytes.is_empty() {
            return Ok(());
        }

        let (mut pid, prev_size) = self.locate(block, position)?;
        let mut offset = position - prev_size;
        let mut rest = bytes;
        while !rest.is_empty() {
            if pid.is_invalid() {
                return Err(EngineError::Lob("replace ran past the payload".into()));
            }
            let handle = self.attach(pid)?;
            let header: DataHeader = decode_at(&handle.data(), 0)?;
            let fits = (header.length as usize - offset).min(rest.len());
            {
                let mut buf = handle.data_mut();
                let start = DATA_HEADER_SIZE + offset;
                buf[start..start + fits].copy_from_slice(&rest[..fits]);
            }
            rest = &rest[fits..];
            offset = 0;
            pid = header.next;
        }
        Ok(())
    }

    /// Free every data page and dir page of the block's payload.
    pub fn expunge(&self, block: &mut Block) -> EngineResult<()> {
        if block.dir_page.is_invalid() {
            return Ok(());
        }
        for pid in self.collect_data_pages(block.dir_page)? {
            let handle = self.attach(pid)?;
            self.cache.free_page(handle);
        }
        self.free_dir(block.dir_page)?;
        block.dir_page = PageId::INVALID;
        block.dir_length = 0;
        block.length = 0;
        block.last_page = PageId::INVALID;
        block.set_used_pages(0);
        Ok(())
    }

    /// Check dir sizes and page chains against the block's totals.
    pub fn verify(
        &self,
        block: &Block,
        path: &std::path::Path,
        progress: &mut Progress,
    ) -> EngineResult<()> {
        if block.dir_page.is_invalid() {
            if block.length != 0 {
                progress.fault(path, None, "block without dir has a nonzero length");
            }
            return Ok(());
        }

        let total = self.verify_dir(block.dir_page, path, progress)?;
        if total != block.dir_length {
            progress.fault(
                path,
                Some(block.dir_page),
                format!(
                    "dir total {total} differs from block dir length {}",
                    block.dir_length
                ),
            );
        }
        if block.dir_length != block.length {
            progress.fault(path, None, "block length differs from dir length");
        }

        let pages = self.collect_data_pages(block.dir_page)?;
        if pages.len() as u32 != block.used_pages() {
            progress.fault(path, None, "used page count differs from dir leaves");
        }
        if pages.last().copied().unwrap_or(PageId::INVALID) != block.last_page {
            progress.fault(path, None, "last page differs from rightmost dir leaf");
        }
        Ok(())
    }

    // ---- payload codecs ----------------------------------------------

    fn split_payload(&self, bytes: &[u8]) -> Vec<Vec<u8>> {
        match self.codec {
            Codec::Raw => bytes
                .chunks(data_capacity(self.page_size))
                .map(|c| c.to_vec())
                .collect(),
            Codec::Zlib => {
                // Greedily pack units into pages.
                let capacity = self.page_size - COMPRESSED_DATA_HEADER_SIZE;
                let mut pages = Vec::new();
                let mut current = Vec::new();
                let mut used = 0usize;
                for unit in bytes.chunks(UNIT_SIZE) {
                    // Worst case the unit is stored raw.
                    let need = 2 + unit.len();
                    if !current.is_empty() && used + need > capacity {
                        pages.push(std::mem::take(&mut current));
                        used = 0;
                    }
                    current.extend_from_slice(unit);
                    used += need;
                }
                if !current.is_empty() {
                    pages.push(current);
                }
                pages
            }
        }
    }

    fn write_fresh_page(&self, payload: &[u8], prev: PageId) -> EngineResult<PageId> {
        match self.codec {
            Codec::Raw => {
                let header = DataHeader {
                    prev,
                    next: PageId::INVALID,
                    length: payload.len() as u32,
                };
                let handle = self.cache.allocate_page(|_| {})?;
                {
                    let mut buf = handle.data_mut();
                    encode_at(&mut buf, 0, &header)?;
                    buf[DATA_HEADER_SIZE..DATA_HEADER_SIZE + payload.len()]
                        .copy_from_slice(payload);
                }
                Ok(handle.id())
            }
            Codec::Zlib => {
                let handle = self.cache.allocate_page(|_| {})?;
                let mut header = CompressedDataHeader {
                    prev,
                    next: PageId::INVALID,
                    length: 0,
                    compressed_length: 0,
                    last_unit_length: 0,
                };
                {
                    let mut buf = handle.data_mut();
                    let mut offset = COMPRESSED_DATA_HEADER_SIZE;
                    for unit in payload.chunks(UNIT_SIZE) {
                        let stored = compress::compress_unit(unit)?;
                        encode_at(&mut buf, offset, &(stored.len() as u16))?;
                        buf[offset + 2..offset + 2 + stored.len()].copy_from_slice(&stored);
                        offset += 2 + stored.len();
                        header.length += unit.len() as u32;
                        header.compressed_length += 2 + stored.len() as u32;
                        header.last_unit_length = unit.len() as u32;
                    }
                    encode_at(&mut buf, 0, &header)?;
                }
                Ok(handle.id())
            }
        }
    }

    /// Uncompressed payload of one page.
    fn page_payload(&self, handle: &PageHandle) -> EngineResult<Vec<u8>> {
        match self.codec {
            Codec::Raw => {
                let header: DataHeader = decode_at(&handle.data(), 0)?;
                let buf = handle.data();
                let start = DATA_HEADER_SIZE;
                Ok(buf[start..start + header.length as usize].to_vec())
            }
            Codec::Zlib => {
                let header: CompressedDataHeader = decode_at(&handle.data(), 0)?;
                let buf = handle.data();
                let mut out = Vec::with_capacity(header.length as usize);
                let mut offset = COMPRESSED_DATA_HEADER_SIZE;
                let mut remaining = header.length as usize;
                while remaining > 0 {
                    let stored_len: u16 = decode_at(&buf, offset)?;
                    let unit_len = remaining.min(UNIT_SIZE);
                    let stored = &buf[offset + 2..offset + 2 + stored_len as usize];
                    out.extend(compress::uncompress_unit(stored, unit_len)?);
                    offset += 2 + stored_len as usize;
                    remaining -= unit_len;
                }
                Ok(out)
            }
        }
    }

    fn page_len(&self, handle: &PageHandle) -> EngineResult<usize> {
        match self.codec {
            Codec::Raw => {
                let header: DataHeader = decode_at(&handle.data(), 0)?;
                Ok(header.length as usize)
            }
            Codec::Zlib => {
                let header: CompressedDataHeader = decode_at(&handle.data(), 0)?;
                Ok(header.length as usize)
            }
        }
    }

    /// Bytes that can still be appended to this page.
    fn page_room(&self, handle: &PageHandle) -> EngineResult<usize> {
        match self.codec {
            Codec::Raw => {
                let header: DataHeader = decode_at(&handle.data(), 0)?;
                Ok(data_capacity(self.page_size) - header.length as usize)
            }
            Codec::Zlib => {
                let header: CompressedDataHeader = decode_at(&handle.data(), 0)?;
                let capacity = self.page_size - COMPRESSED_DATA_HEADER_SIZE;
                let free = capacity - header.compressed_length as usize;
                // Room in whole units, assuming worst-case raw storage.
                let units = free / (2 + UNIT_SIZE);
                Ok(units * UNIT_SIZE)
            }
        }
    }

    fn extend_page(&self, handle: &PageHandle, bytes: &[u8]) -> EngineResult<()> {
        match self.codec {
            Codec::Raw => {
                let mut header: DataHeader = decode_at(&handle.data(), 0)?;
                let mut buf = handle.data_mut();
                let start = DATA_HEADER_SIZE + header.length as usize;
                buf[start..start + bytes.len()].copy_from_slice(bytes);
                header.length += bytes.len() as u32;
                encode_at(&mut buf, 0, &header)
            }
            Codec::Zlib => {
                let mut header: CompressedDataHeader = decode_at(&handle.data(), 0)?;
                debug_assert_eq!(header.length as usize % UNIT_SIZE, 0);
                let mut buf = handle.data_mut();
                let mut offset = COMPRESSED_DATA_HEADER_SIZE + header.compressed_length as usize;
                for unit in bytes.chunks(UNIT_SIZE) {
                    let stored = compress::compress_unit(unit)?;
                    encode_at(&mut buf, offset, &(stored.len() as u16))?;
                    buf[offset + 2..offset + 2 + stored.len()].copy_from_slice(&stored);
                    offset += 2 + stored.len();
                    header.length += unit.len() as u32;
                    header.compressed_length += 2 + stored.len() as u32;
                    header.last_unit_length = unit.len() as u32;
                }
                encode_at(&mut buf, 0, &header)
            }
        }
    }

    /// Remove `excess` bytes from the end of this page's payload.
    fn shrink_page(&self, handle: &PageHandle, excess: usize) -> EngineResult<()> {
        match self.codec {
            Codec::Raw => {
                let mut header: DataHeader = decode_at(&handle.data(), 0)?;
                header.length -= excess as u32;
                let mut buf = handle.data_mut();
                encode_at(&mut buf, 0, &header)
            }
            Codec::Zlib => {
                // Re-pack the page from its uncompressed payload; a cut
                // that falls mid-unit re-compresses the tail unit.
                let mut payload = self.page_payload(handle)?;
                let header: CompressedDataHeader = decode_at(&handle.data(), 0)?;
                payload.truncate(header.length as usize - excess);

                let mut new_header = CompressedDataHeader {
                    prev: header.prev,
                    next: header.next,
                    length: 0,
                    compressed_length: 0,
                    last_unit_length: 0,
                };
                let mut buf = handle.data_mut();
                let mut offset = COMPRESSED_DATA_HEADER_SIZE;
                for unit in payload.chunks(UNIT_SIZE) {
                    let stored = compress::compress_unit(unit)?;
                    encode_at(&mut buf, offset, &(stored.len() as u16))?;
                    buf[offset + 2..offset + 2 + stored.len()].copy_from_slice(&stored);
                    offset += 2 + stored.len();
                    new_header.length += unit.len() as u32;
                    new_header.compressed_length += 2 + stored.len() as u32;
                    new_header.last_unit_length = unit.len() as u32;
                }
                encode_at(&mut buf, 0, &new_header)
            }
        }
    }

    fn next_of(&self, handle: &PageHandle) -> EngineResult<PageId> {
        // prev/next sit first in both header layouts.
        let header: DataHeader = decode_at(&handle.data(), 0)?;
        Ok(header.next)
    }

    fn prev_of(&self, handle: &PageHandle) -> EngineResult<PageId> {
        let header: DataHeader = decode_at(&handle.data(), 0)?;
        Ok(header.prev)
    }

    fn set_next(&self, pid: PageId, next: PageId) -> EngineResult<()> {
        let handle = self.attach(pid)?;
        let mut header: DataHeader = decode_at(&handle.data(), 0)?;
        header.next = next;
        let mut buf = handle.data_mut();
        encode_at(&mut buf, 0, &header)
    }

    fn attach(&self, pid: PageId) -> EngineResult<PageHandle> {
        self.cache.attach_page(pid, FixPriority::Middle)
    }

    // ---- dir tree ----------------------------------------------------

    /// Find the data page covering `position` and the byte total of
    /// everything before it.
    fn locate(&self, block: &Block, position: usize) -> EngineResult<(PageId, usize)> {
        let mut pid = block.dir_page;
        let mut acc = 0usize;
        loop {
            if pid.is_invalid() {
                return Err(EngineError::Lob("dir walk ran off the tree".into()));
            }
            let handle = self.attach(pid)?;
            let buf = handle.data();
            let header: DirHeader = decode_at(&buf, 0)?;
            let mut chosen: Option<DirEntry> = None;
            for i in 0..header.count {
                let entry: DirEntry = decode_at(&buf, dir_entry_offset(i))?;
                if position < acc + entry.size as usize {
                    chosen = Some(entry);
                    break;
                }
                acc += entry.size as usize;
            }
            let entry = chosen.ok_or_else(|| {
                EngineError::Lob("position beyond the dir totals".into())
            })?;
            if header.step == 1 {
                return Ok((entry.page, acc));
            }
            pid = entry.page;
        }
    }

    /// Register a new data page at the end of the tree, growing dirs
    /// upward as needed.
    fn push_page(&self, block: &mut Block, pid: PageId, size: u32) -> EngineResult<()> {
        if block.dir_page.is_invalid() {
            block.dir_page = self.new_dir(1, DirEntry { page: pid, size })?;
        } else if let Some((sibling, sibling_size, step)) =
            self.push_into(block.dir_page, pid, size)?
        {
            // The root overflowed; a new root points at the old root and
            // the sibling carrying the new entry.
            let old_root = block.dir_page;
            let root = self.new_dir(
                step + 1,
                DirEntry {
                    page: old_root,
                    size: block.dir_length,
                },
            )?;
            self.append_entry(
                root,
                DirEntry {
                    page: sibling,
                    size: sibling_size,
                },
            )?;
            block.dir_page = root;
        }
        block.dir_length += size;
        Ok(())
    }

    /// Returns `Some((new_page, its_size, its_step))` when this level
    /// overflowed into a same-step sibling the caller must adopt.
    fn push_into(
        &self,
        dir_pid: PageId,
        pid: PageId,
        size: u32,
    ) -> EngineResult<Option<(PageId, u32, u32)>> {
        let capacity = dir_entries_per_page(self.page_size);
        let handle = self.attach(dir_pid)?;
        let header: DirHeader = decode_at(&handle.data(), 0)?;

        if header.step == 1 {
            if header.count < capacity {
                drop(handle);
                self.append_entry(dir_pid, DirEntry { page: pid, size })?;
                return Ok(None);
            }
            let sibling = self.new_dir(1, DirEntry { page: pid, size })?;
            return Ok(Some((sibling, size, 1)));
        }

        let last_off = dir_entry_offset(header.count - 1);
        let last: DirEntry = decode_at(&handle.data(), last_off)?;
        match self.push_into(last.page, pid, size)? {
            None => {
                let mut buf = handle.data_mut();
                let grown = DirEntry {
                    page: last.page,
                    size: last.size + size,
                };
                encode_at(&mut buf, last_off, &grown)?;
                Ok(None)
            }
            Some((child_sibling, child_size, child_step)) => {
                if header.count < capacity {
                    drop(handle);
                    self.append_entry(
                        dir_pid,
                        DirEntry {
                            page: child_sibling,
                            size: child_size,
                        },
                    )?;
                    return Ok(None);
                }
                let sibling = self.new_dir(
                    child_step + 1,
                    DirEntry {
                        page: child_sibling,
                        size: child_size,
                    },
                )?;
                Ok(Some((sibling, child_size, child_step + 1)))
            }
        }
    }

    /// Remove the rightmost leaf entry, freeing dir pages that become
    /// empty on the way up.
    fn pop_last_page(&self, block: &mut Block, size: u32) -> EngineResult<()> {
        let (empty, _) = self.pop_into(block.dir_page, size)?;
        if empty {
            let handle = self.attach(block.dir_page)?;
            self.cache.free_page(handle);
            block.dir_page = PageId::INVALID;
        }
        block.dir_length -= size;
        Ok(())
    }

    fn pop_into(&self, dir_pid: PageId, size: u32) -> EngineResult<(bool, PageId)> {
        let handle = self.attach(dir_pid)?;
        let mut header: DirHeader = decode_at(&handle.data(), 0)?;
        if header.count == 0 {
            return Err(EngineError::Lob("pop from an empty dir".into()));
        }
        let last_off = dir_entry_offset(header.count - 1);
        let last: DirEntry = decode_at(&handle.data(), last_off)?;

        if header.step == 1 {
            header.count -= 1;
            let mut buf = handle.data_mut();
            encode_at(&mut buf, 0, &header)?;
            return Ok((header.count == 0, last.page));
        }

        let (child_empty, removed) = self.pop_into(last.page, size)?;
        let mut buf = handle.data_mut();
        if child_empty {
            header.count -= 1;
            encode_at(&mut buf, 0, &header)?;
            drop(buf);
            let child = self.attach(last.page)?;
            self.cache.free_page(child);
        } else {
            let shrunk = DirEntry {
                page: last.page,
                size: last.size - size,
            };
            encode_at(&mut buf, last_off, &shrunk)?;
            encode_at(&mut buf, 0, &header)?;
        }
        Ok((header.count == 0, removed))
    }

    /// Apply `delta` to the rightmost path of subtree totals.
    fn adjust_rightmost(&self, dir_pid: PageId, delta: i64) -> EngineResult<()> {
        let handle = self.attach(dir_pid)?;
        let header: DirHeader = decode_at(&handle.data(), 0)?;
        let last_off = dir_entry_offset(header.count - 1);
        let last: DirEntry = decode_at(&handle.data(), last_off)?;
        {
            let mut buf = handle.data_mut();
            let grown = DirEntry {
                page: last.page,
                size: (last.size as i64 + delta) as u32,
            };
            encode_at(&mut buf, last_off, &grown)?;
        }
        if header.step > 1 {
            self.adjust_rightmost(last.page, delta)?;
        }
        Ok(())
    }

    /// All data pages under a dir, left to right.
    fn collect_data_pages(&self, dir_pid: PageId) -> EngineResult<Vec<PageId>> {
        let handle = self.attach(dir_pid)?;
        let buf = handle.data();
        let header: DirHeader = decode_at(&buf, 0)?;
        let mut out = Vec::new();
        for i in 0..header.count {
            let entry: DirEntry = decode_at(&buf, dir_entry_offset(i))?;
            if header.step == 1 {
                out.push(entry.page);
            } else {
                out.extend(self.collect_data_pages(entry.page)?);
            }
        }
        Ok(out)
    }

    fn free_dir(&self, dir_pid: PageId) -> EngineResult<()> {
        let children = {
            let handle = self.attach(dir_pid)?;
            let buf = handle.data();
            let header: DirHeader = decode_at(&buf, 0)?;
            if header.step == 1 {
                Vec::new()
            } else {
                (0..header.count)
                    .map(|i| decode_at::<DirEntry>(&buf, dir_entry_offset(i)).map(|e| e.page))
                    .collect::<EngineResult<Vec<_>>>()?
            }
        };
        for child in children {
            self.free_dir(child)?;
        }
        let handle = self.attach(dir_pid)?;
        self.cache.free_page(handle);
        Ok(())
    }

    fn verify_dir(
        &self,
        dir_pid: PageId,
        path: &std::path::Path,
        progress: &mut Progress,
    ) -> EngineResult<u32> {
        let handle = self.attach(dir_pid)?;
        let buf = handle.data().clone();
        drop(handle);
        let header: DirHeader = decode_at(&buf, 0)?;
        progress.notify_page();

        let mut total = 0u32;
        for i in 0..header.count {
            let entry: DirEntry = decode_at(&buf, dir_entry_offset(i))?;
            if header.step == 1 {
                let page = self.attach(entry.page)?;
                let len = self.page_len(&page)? as u32;
                if len != entry.size {
                    progress.fault(
                        path,
                        Some(entry.page),
                        format!("data page holds {len} bytes, dir entry says {}", entry.size),
                    );
                }
                total += entry.size;
            } else {
                let below = self.verify_dir(entry.page, path, progress)?;
                if below != entry.size {
                    progress.fault(
                        path,
                        Some(entry.page),
                        format!("subtree holds {below} bytes, dir entry says {}", entry.size),
                    );
                }
                total += entry.size;
            }
        }
        Ok(total)
    }

    fn new_dir(&self, step: u32, first: DirEntry) -> EngineResult<PageId> {
        let handle = self.cache.allocate_page(|_| {})?;
        {
            let mut buf = handle.data_mut();
            encode_at(&mut buf, 0, &DirHeader { step, count: 1 })?;
            encode_at(&mut buf, dir_entry_offset(0), &first)?;
        }
        Ok(handle.id())
    }

    fn append_entry(&self, dir_pid: PageId, entry: DirEntry) -> EngineResult<()> {
        let handle = self.attach(dir_pid)?;
        let mut header: DirHeader = decode_at(&handle.data(), 0)?;
        let mut buf = handle.data_mut();
        encode_at(&mut buf, dir_entry_offset(header.count), &entry)?;
        header.count += 1;
        encode_at(&mut buf, 0, &header)
    }
}
