//! Free-space management for the master file.
//!
//! v1 threads freed pages into an intrusive singly-linked list: the
//! header points at the most recently freed page and each freed page
//! stores the next link in its first bytes.
//!
//! v2 keeps dedicated manage pages, each holding a batch of free page
//! IDs plus a link to the next manage page. Manage pages are allocated
//! from the same page space and stay in the chain once created; an
//! emptied node is refilled by later pushes rather than unlinked.

use bincode::config;
use bincode::serde::{decode_from_slice, encode_to_vec};
use common::{EngineError, EngineResult, PageId};

use crate::{FileHeader, PageManageVariant, PagedFile};

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
struct ManageNode {
    next: PageId,
    free: Vec<PageId>,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct FreeState {
    pub head: PageId,
    pub page_count: u32,
}

pub(crate) enum FreeManager {
    V1 { head: PageId },
    V2 { head: PageId, page_count: u32 },
}

impl FreeManager {
    pub fn load(_file: &mut PagedFile, header: &FileHeader) -> EngineResult<Self> {
        Ok(match header.variant {
            PageManageVariant::V1 => FreeManager::V1 {
                head: header.free_head,
            },
            PageManageVariant::V2 => FreeManager::V2 {
                head: header.free_head,
                page_count: header.page_count,
            },
        })
    }

    pub fn state(&self) -> FreeState {
        match self {
            FreeManager::V1 { head } => FreeState {
                head: *head,
                page_count: 0,
            },
            FreeManager::V2 { head, page_count } => FreeState {
                head: *head,
                page_count: *page_count,
            },
        }
    }

    pub fn push(&mut self, file: &mut PagedFile, pid: PageId) -> EngineResult<()> {
        match self {
            FreeManager::V1 { head } => {
                let mut buf = file.read_page(pid)?;
                let link = encode_link(*head)?;
                buf[..link.len()].copy_from_slice(&link);
                file.write_page(pid, &buf)?;
                *head = pid;
                Ok(())
            }
            FreeManager::V2 { head, page_count } => {
                let capacity = node_capacity(file.page_size());
                if !head.is_invalid() {
                    let mut node = read_node(file, *head)?;
                    if node.free.len() < capacity {
                        node.free.push(pid);
                        return write_node(file, *head, &node);
                    }
                }
                // Head is missing or full: prepend a fresh manage page.
                let manage_pid = file.allocate_raw_page()?;
                *page_count = page_count.checked_add(1).ok_or_else(|| {
                    EngineError::Storage("page count overflow".into())
                })?;
                let node = ManageNode {
                    next: *head,
                    free: vec![pid],
                };
                write_node(file, manage_pid, &node)?;
                *head = manage_pid;
                Ok(())
            }
        }
    }

    pub fn pop(&mut self, file: &mut PagedFile) -> EngineResult<Option<PageId>> {
        match self {
            FreeManager::V1 { head } => {
                if head.is_invalid() {
                    return Ok(None);
                }
                let pid = *head;
                let buf = file.read_page(pid)?;
                *head = decode_link(&buf)?;
                Ok(Some(pid))
            }
            FreeManager::V2 { head, .. } => {
                let mut cursor = *head;
                while !cursor.is_invalid() {
                    let mut node = read_node(file, cursor)?;
                    if let Some(pid) = node.free.pop() {
                        write_node(file, cursor, &node)?;
                        return Ok(Some(pid));
                    }
                    cursor = node.next;
                }
                Ok(None)
            }
        }
    }

    /// Every free page currently recorded, for verification.
    pub fn collect(&mut self, file: &mut PagedFile) -> EngineResult<Vec<PageId>> {
        match self {
            FreeManager::V1 { head } => {
                let mut out = Vec::new();
                let mut cursor = *head;
                while !cursor.is_invalid() {
                    out.push(cursor);
                    let buf = file.read_page(cursor)?;
                    cursor = decode_link(&buf)?;
                    if out.len() > u32::MAX as usize {
                        return Err(EngineError::Storage("free list cycle".into()));
                    }
                }
                Ok(out)
            }
            FreeManager::V2 { head, .. } => {
                let mut out = Vec::new();
                let mut cursor = *head;
                while !cursor.is_invalid() {
                    let node = read_node(file, cursor)?;
                    out.extend(node.free.iter().copied());
                    cursor = node.next;
                }
                Ok(out)
            }
        }
    }
}

fn node_capacity(page_size: u32) -> usize {
    // next link + vec length prefix, then 4 bytes per entry.
    ((page_size as usize).saturating_sub(16)) / 4
}

fn read_node(file: &mut PagedFile, pid: PageId) -> EngineResult<ManageNode> {
    let buf = file.read_page(pid)?;
    let (node, _): (ManageNode, usize) = decode_from_slice(&buf, config::legacy())
        .map_err(|e| EngineError::Storage(format!("decode manage page {} failed: {e}", pid.0)))?;
    Ok(node)
}

fn write_node(file: &mut PagedFile, pid: PageId, node: &ManageNode) -> EngineResult<()> {
    let bytes = encode_to_vec(node, config::legacy())
        .map_err(|e| EngineError::Storage(format!("encode manage page {} failed: {e}", pid.0)))?;
    let mut buf = vec![0u8; file.page_size() as usize];
    if bytes.len() > buf.len() {
        return Err(EngineError::Storage("manage page overflow".into()));
    }
    buf[..bytes.len()].copy_from_slice(&bytes);
    file.write_page(pid, &buf)
}

fn encode_link(next: PageId) -> EngineResult<Vec<u8>> {
    encode_to_vec(next, config::legacy())
        .map_err(|e| EngineError::Storage(format!("encode free link failed: {e}")))
}

fn decode_link(buf: &[u8]) -> EngineResult<PageId> {
    let (pid, _): (PageId, usize) = decode_from_slice(buf, config::legacy())
        .map_err(|e| EngineError::Storage(format!("decode free link failed: {e}")))?;
    Ok(pid)
}
