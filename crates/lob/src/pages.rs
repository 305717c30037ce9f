//! On-disk layouts of the LOB file's four page kinds.
//!
//! Page 0 is the top page: a header followed by a vector of blocks.
//! Further block pages are node pages with a two-field header. Dir
//! pages form the payload tree (step >= 1, entries carrying per-subtree
//! byte totals); data pages hold the payload in a doubly-linked chain.

use bincode::config;
use bincode::serde::{decode_from_slice, encode_into_slice};
use common::{EngineError, EngineResult, PageId};
use serde::Serialize;
use serde::de::DeserializeOwned;
use types::ObjectId;

pub const TOP_HEADER_SIZE: usize = 56;
pub const NODE_HEADER_SIZE: usize = 8;
pub const DIR_HEADER_SIZE: usize = 8;
pub const DIR_ENTRY_SIZE: usize = 8;
pub const DATA_HEADER_SIZE: usize = 12;
pub const COMPRESSED_DATA_HEADER_SIZE: usize = 20;
pub const BLOCK_SIZE: usize = 48;

const EXPUNGE_BIT: u32 = 0x8000_0000;

pub(crate) fn decode_at<T: DeserializeOwned>(buf: &[u8], offset: usize) -> EngineResult<T> {
    let (value, _) = decode_from_slice(&buf[offset..], config::legacy())
        .map_err(|e| EngineError::Lob(format!("decode at {offset} failed: {e}")))?;
    Ok(value)
}

pub(crate) fn encode_at<T: Serialize>(buf: &mut [u8], offset: usize, value: &T) -> EngineResult<()> {
    encode_into_slice(value, &mut buf[offset..], config::legacy())
        .map_err(|e| EngineError::Lob(format!("encode at {offset} failed: {e}")))?;
    Ok(())
}

/// Header of the top page (page 0).
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct TopHeader {
    pub entry_count: u32,
    pub next_block_page: PageId,
    pub total_block_count: u32,
    pub total_entry_count: u32,
    pub last_block_page: PageId,
    pub free_block: ObjectId,
    pub expunge_block: ObjectId,
    pad: [u8; 4],
    pub transaction_id: u64,
    pub prev_free_block: ObjectId,
}

impl TopHeader {
    pub fn new() -> Self {
        Self {
            entry_count: 0,
            next_block_page: PageId::INVALID,
            total_block_count: 0,
            total_entry_count: 0,
            last_block_page: PageId::INVALID,
            free_block: ObjectId::INVALID,
            expunge_block: ObjectId::INVALID,
            pad: [0; 4],
            transaction_id: 0,
            prev_free_block: ObjectId::INVALID,
        }
    }
}

impl Default for TopHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// Header of a node page holding overflow blocks.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct NodeHeader {
    pub entry_count: u32,
    pub next_block_page: PageId,
}

impl NodeHeader {
    pub fn new() -> Self {
        Self {
            entry_count: 0,
            next_block_page: PageId::INVALID,
        }
    }
}

/// Header of a dir page.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct DirHeader {
    /// Distance from the data pages: step-1 entries point at data
    /// pages, step-N entries point at step-(N-1) dir pages.
    pub step: u32,
    pub count: u32,
}

/// One dir entry: a child page and the byte total of its subtree.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct DirEntry {
    pub page: PageId,
    pub size: u32,
}

/// Header of a data page.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct DataHeader {
    pub prev: PageId,
    pub next: PageId,
    pub length: u32,
}

/// Header of a compressed data page. Payload is a run of
/// `{stored_len: u16, bytes}` units, each 2000 B uncompressed except
/// possibly the last.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct CompressedDataHeader {
    pub prev: PageId,
    pub next: PageId,
    pub length: u32,
    pub compressed_length: u32,
    pub last_unit_length: u32,
}

/// Fixed-size record describing one logical LOB value.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct Block {
    pub dir_page: PageId,
    pub dir_length: u32,
    used_page_number: u32,
    pub length: u32,
    pub last_page: PageId,
    pad: [u8; 4],
    pub transaction_id: u64,
    pub prev_block: ObjectId,
    pub next_block: ObjectId,
}

impl Block {
    pub fn new() -> Self {
        Self {
            dir_page: PageId::INVALID,
            dir_length: 0,
            used_page_number: 0,
            length: 0,
            last_page: PageId::INVALID,
            pad: [0; 4],
            transaction_id: 0,
            prev_block: ObjectId::INVALID,
            next_block: ObjectId::INVALID,
        }
    }

    pub fn is_expunged(&self) -> bool {
        self.used_page_number & EXPUNGE_BIT != 0
    }

    pub fn set_expunge_flag(&mut self) {
        self.used_page_number |= EXPUNGE_BIT;
    }

    pub fn unset_expunge_flag(&mut self) {
        self.used_page_number &= !EXPUNGE_BIT;
    }

    pub fn used_pages(&self) -> u32 {
        self.used_page_number & !EXPUNGE_BIT
    }

    pub fn set_used_pages(&mut self, n: u32) {
        debug_assert_eq!(n & EXPUNGE_BIT, 0);
        self.used_page_number = (self.used_page_number & EXPUNGE_BIT) | n;
    }

    pub fn clear(&mut self) {
        *self = Block::new();
    }
}

impl Default for Block {
    fn default() -> Self {
        Self::new()
    }
}

/// Byte offset of the block vector on a block page.
pub fn block_area_offset(page: PageId) -> usize {
    if page.0 == 0 {
        TOP_HEADER_SIZE
    } else {
        NODE_HEADER_SIZE
    }
}

pub fn block_offset(page: PageId, index: u32) -> usize {
    block_area_offset(page) + index as usize * BLOCK_SIZE
}

pub fn blocks_per_page(page_size: usize, page: PageId) -> u32 {
    ((page_size - block_area_offset(page)) / BLOCK_SIZE) as u32
}

pub fn dir_entries_per_page(page_size: usize) -> u32 {
    ((page_size - DIR_HEADER_SIZE) / DIR_ENTRY_SIZE) as u32
}

pub fn dir_entry_offset(index: u32) -> usize {
    DIR_HEADER_SIZE + index as usize * DIR_ENTRY_SIZE
}

/// Uncompressed payload capacity of one data page.
pub fn data_capacity(page_size: usize) -> usize {
    page_size - DATA_HEADER_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_encoding_is_fixed_size() {
        let block = Block::new();
        let mut buf = vec![0u8; 128];
        encode_at(&mut buf, 0, &block).unwrap();
        // Every field is fixed-width, so a block occupies exactly
        // BLOCK_SIZE bytes and the vector can be indexed.
        let bytes = bincode::serde::encode_to_vec(block, bincode::config::legacy()).unwrap();
        assert_eq!(bytes.len(), BLOCK_SIZE);
    }

    #[test]
    fn top_header_encoding_fits_reserved_area() {
        let header = TopHeader::new();
        let bytes = bincode::serde::encode_to_vec(header, bincode::config::legacy()).unwrap();
        assert_eq!(bytes.len(), TOP_HEADER_SIZE);
    }

    #[test]
    fn expunge_bit_does_not_disturb_page_count() {
        let mut block = Block::new();
        block.set_used_pages(7);
        block.set_expunge_flag();
        assert!(block.is_expunged());
        assert_eq!(block.used_pages(), 7);

        block.unset_expunge_flag();
        assert!(!block.is_expunged());
        assert_eq!(block.used_pages(), 7);
    }

    #[test]
    fn block_round_trips_through_page_buffer() {
        let mut buf = vec![0u8; 4096];
        let mut block = Block::new();
        block.dir_page = PageId(5);
        block.length = 1234;
        block.transaction_id = 42;
        block.next_block = ObjectId::new(1, 2);

        let offset = block_offset(PageId(0), 3);
        encode_at(&mut buf, offset, &block).unwrap();
        let back: Block = decode_at(&buf, offset).unwrap();
        assert_eq!(back.dir_page, PageId(5));
        assert_eq!(back.length, 1234);
        assert_eq!(back.transaction_id, 42);
        assert_eq!(back.next_block, ObjectId::new(1, 2));
    }
}
