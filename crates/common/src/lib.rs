#[cfg(test)]
mod tests;

pub mod verify;

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Logical identifier for a page in a paged file.
///
/// Page 0 is reserved for the root structure of the file (B-tree header
/// or LOB top page). `PageId::INVALID` is the on-disk "no page" value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct PageId(pub u32);

impl PageId {
    pub const INVALID: PageId = PageId(u32::MAX);

    pub fn is_invalid(&self) -> bool {
        *self == Self::INVALID
    }
}

/// How a page is fixed in the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FixMode {
    ReadOnly,
    Write,
    /// Write access whose modifications can still be discarded by
    /// `recover_all_pages`.
    WriteDiscardable,
}

impl FixMode {
    pub fn is_read_only(&self) -> bool {
        matches!(self, FixMode::ReadOnly)
    }

    pub fn is_discardable(&self) -> bool {
        matches!(self, FixMode::WriteDiscardable)
    }
}

/// Transaction identifier assigned by the host's transaction manager.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct TransactionId(pub u64);

/// Canonical error taxonomy shared across the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("bad argument")]
    BadArgument,
    #[error("not supported: {0}")]
    NotSupported(String),
    #[error("sql syntax error: {0}")]
    SqlSyntax(String),
    #[error("class cast: {0}")]
    ClassCast(String),
    #[error("log item corrupted: {0}")]
    LogItemCorrupted(String),
    #[error("memory exhausted")]
    MemoryExhaust,
    #[error("file not open")]
    FileNotOpen,
    #[error("cancelled")]
    Cancelled,
    #[error("verify aborted")]
    VerifyAborted,
    #[error("unexpected: {0}")]
    Unexpected(String),
    #[error("file is unavailable")]
    Unavailable,
    #[error("storage: {0}")]
    Storage(String),
    #[error("lob: {0}")]
    Lob(String),
    #[error("inverted: {0}")]
    Inverted(String),
    #[error("kwic: {0}")]
    Kwic(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias that carries an `EngineError`.
pub type EngineResult<T> = Result<T, EngineError>;

/// Statement-level cancellation flag, polled by long-running scans.
///
/// Cloning shares the underlying flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Fails with `Cancelled` when the statement has been interrupted.
    pub fn check(&self) -> EngineResult<()> {
        if self.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }
}

/// Process-wide tunables.
///
/// The engine reads these at file-attach time; tests construct their own
/// values instead of mutating a global.
///
/// # Example
/// ```
/// use common::Config;
///
/// let config = Config::builder()
///     .page_cache_count(4)
///     .leaf_page_size_kib(32)
///     .build();
/// assert_eq!(config.other_page_size_kib, 4);
/// ```
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize, bon::Builder)]
pub struct Config {
    /// Page size of the leaf sub-file, in KiB.
    #[builder(default = 16)]
    pub leaf_page_size_kib: u32,
    /// Page size of the overflow sub-file, in KiB.
    #[builder(default = 16)]
    pub overflow_page_size_kib: u32,
    /// Page size of the B-tree sub-file, in KiB.
    #[builder(default = 16)]
    pub btree_page_size_kib: u32,
    /// Page size of every other sub-file, in KiB.
    #[builder(default = 4)]
    pub other_page_size_kib: u32,
    /// Smallest physical page the version file supports, in bytes.
    #[builder(default = 4096)]
    pub physical_page_min: u32,
    /// Clean, unreferenced pages a cache keeps resident.
    #[builder(default = 10)]
    pub page_cache_count: usize,
    /// Upper bound of deferred work in batch mode, in bytes.
    #[builder(default = 60 << 20)]
    pub batch_size_max: usize,
    /// Bound on morphological expansion of one search term.
    #[builder(default = 16)]
    pub kwic_expand_limit: usize,
    /// Percentage of the requested KWIC size reserved as margin.
    #[builder(default = 20)]
    pub kwic_margin_percent: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config::builder().build()
    }
}

/// Identifies a file for the external lock manager and the diagnostic log.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct LockName {
    pub database: String,
    pub table: String,
    pub file: String,
}

impl LockName {
    pub fn new(
        database: impl Into<String>,
        table: impl Into<String>,
        file: impl Into<String>,
    ) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
            file: file.into(),
        }
    }
}

/// Logs the failing file path before an error is re-raised to the host.
pub fn log_failure(path: &Path, error: &EngineError) {
    log::error!("{}: {}", path.display(), error);
}

/// Convenient re-exports for downstream crates.
pub mod prelude {
    pub use crate::verify::{Progress, Treatment};
    pub use crate::{
        CancelToken, Config, EngineError, EngineResult, FixMode, LockName, PageId, TransactionId,
    };
}
