//! A temp-dir backed environment for engine tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::{CancelToken, Config, FixMode, TransactionId};
use lob::ActiveTransactions;
use tempfile::TempDir;

/// Owns a temporary directory plus the ambient pieces most tests need:
/// a configuration, a transaction oracle, and a running transaction id.
pub struct StoreContext {
    _dir: TempDir,
    root: PathBuf,
    pub config: Config,
    pub oracle: Arc<ActiveTransactions>,
    next_tx: std::sync::atomic::AtomicU64,
}

impl StoreContext {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let root = dir.path().to_path_buf();
        Self {
            _dir: dir,
            root,
            config: Config::default(),
            oracle: Arc::new(ActiveTransactions::new()),
            next_tx: std::sync::atomic::AtomicU64::new(1),
        }
    }

    pub fn with_config(config: Config) -> Self {
        let mut ctx = Self::new();
        ctx.config = config;
        ctx
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// A fresh transaction id, registered live with the oracle.
    pub fn begin_tx(&self) -> TransactionId {
        let tx = TransactionId(
            self.next_tx
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed),
        );
        self.oracle.begin(tx);
        tx
    }

    pub fn end_tx(&self, tx: TransactionId) {
        self.oracle.end(tx);
    }

    pub fn cancel_token(&self) -> CancelToken {
        CancelToken::new()
    }

    pub fn write_mode(&self) -> FixMode {
        FixMode::Write
    }
}

impl Default for StoreContext {
    fn default() -> Self {
        Self::new()
    }
}
