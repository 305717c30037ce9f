//! Locators: partial access to one LOB value without materializing it.

use std::sync::Arc;

use common::{EngineError, EngineResult};
use lob::LobStore;
use types::ObjectId;

/// A handle onto one LOB value. Positions are 1-based at this boundary,
/// matching the SQL substring convention the executor speaks.
pub struct Locator {
    store: Arc<LobStore>,
    id: ObjectId,
}

impl Locator {
    pub(crate) fn new(store: Arc<LobStore>, id: ObjectId) -> Self {
        Self { store, id }
    }

    pub fn object_id(&self) -> ObjectId {
        self.id
    }

    /// Read `len` bytes from 1-based `position`.
    pub fn get(&self, position: usize, len: usize) -> EngineResult<Vec<u8>> {
        if position == 0 {
            return Err(EngineError::BadArgument);
        }
        let (bytes, is_null) = self.store.get(self.id, position - 1, len)?;
        if is_null {
            return Err(EngineError::BadArgument);
        }
        Ok(bytes)
    }

    pub fn append(&self, bytes: &[u8]) -> EngineResult<()> {
        self.store.append(self.id, bytes)
    }

    /// Overwrite in place from 1-based `position`.
    pub fn replace(&self, position: usize, bytes: &[u8]) -> EngineResult<()> {
        if position == 0 {
            return Err(EngineError::BadArgument);
        }
        self.store.replace(self.id, position - 1, bytes)
    }

    pub fn truncate(&self, len: usize) -> EngineResult<()> {
        self.store.truncate(self.id, len)
    }

    pub fn length(&self) -> EngineResult<usize> {
        Ok(self.store.data_size(self.id)? as usize)
    }
}
