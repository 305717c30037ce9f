//! Schema modification log.
//!
//! Every schema mutation emits one [`LogRecord`]: a sub-category plus a
//! typed payload. Records are written to an append-only file with
//! length-prefixed, CRC-guarded framing so replay can iterate forward
//! safely and stop at a clean end; a frame that fails its checksum or
//! does not decode raises `LogItemCorrupted`.
//!
//! # Example
//!
//! ```no_run
//! use schemalog::{Category, LogRecord, LogValue, SchemaLog};
//!
//! let mut log = SchemaLog::open("data/schema.log").unwrap();
//! let record = LogRecord::new(
//!     Category::CreateIndex,
//!     vec![LogValue::Id(7), LogValue::Str("FT_INDEX".into())],
//! );
//! log.append(&record).unwrap();
//! log.sync().unwrap();
//!
//! for rec in SchemaLog::replay("data/schema.log").unwrap() {
//!     // Re-apply each schema mutation.
//! }
//! ```

#[cfg(test)]
mod tests;

use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_to_vec};
use common::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::{
    fs::{File, OpenOptions},
    io::{Read, Write},
    path::{Path, PathBuf},
};

/// What kind of schema mutation a record describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    Unknown,
    Mount,
    Unmount,
    StartBackup,
    EndBackup,
    TimeStamp,
    CreateDatabase,
    AlterDatabase,
    MoveDatabase,
    DropDatabase,
    CreateArea,
    AlterArea,
    DropArea,
    CreateTable,
    AlterTable,
    DropTable,
    CreateIndex,
    AlterIndex,
    DropIndex,
    RenameIndex,
    CreatePrivilege,
    AlterPrivilege,
    DropPrivilege,
    CreateCascade,
    AlterCascade,
    DropCascade,
    CreatePartition,
    AlterPartition,
    DropPartition,
    CreateFunction,
    DropFunction,
}

impl Category {
    /// Whether recovery can undo the operation. Drops are undoable so
    /// recovery can resurrect the object before deciding its fate.
    pub fn is_undoable(self) -> bool {
        matches!(
            self,
            Category::DropDatabase | Category::DropTable | Category::DropIndex
        )
    }
}

/// One typed element of a record's payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum LogValue {
    Id(u32),
    Ids(Vec<u32>),
    Str(String),
    Strs(Vec<String>),
    U32(u32),
    I32(i32),
    U64(u64),
    Null,
}

impl LogValue {
    pub fn as_id(&self) -> EngineResult<u32> {
        match self {
            LogValue::Id(v) => Ok(*v),
            other => Err(EngineError::LogItemCorrupted(format!(
                "expected an id, found {other:?}"
            ))),
        }
    }

    pub fn as_str(&self) -> EngineResult<&str> {
        match self {
            LogValue::Str(v) => Ok(v),
            other => Err(EngineError::LogItemCorrupted(format!(
                "expected a string, found {other:?}"
            ))),
        }
    }
}

/// A schema mutation: sub-category plus typed payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    sub_category: Category,
    payload: Vec<LogValue>,
}

impl LogRecord {
    pub fn new(sub_category: Category, payload: Vec<LogValue>) -> Self {
        Self {
            sub_category,
            payload,
        }
    }

    pub fn sub_category(&self) -> Category {
        self.sub_category
    }

    pub fn payload(&self) -> &[LogValue] {
        &self.payload
    }

    /// Typed access to one payload element.
    pub fn element(&self, index: usize) -> EngineResult<&LogValue> {
        self.payload.get(index).ok_or_else(|| {
            EngineError::LogItemCorrupted(format!(
                "{:?} record has no element {index}",
                self.sub_category
            ))
        })
    }
}

/// Append-only schema log file.
///
/// Frames are `{len: u32 LE}{crc32: u32 LE}{bincode record}`.
#[derive(Debug)]
pub struct SchemaLog {
    path: PathBuf,
    file: File,
}

impl SchemaLog {
    /// Open or create the log at `path`, preserving existing records.
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| EngineError::Storage(format!("open schema log failed: {e}")))?;
        Ok(Self { path, file })
    }

    /// Append one record. The buffer is flushed; call [`SchemaLog::sync`]
    /// for durability.
    pub fn append(&mut self, record: &LogRecord) -> EngineResult<()> {
        let bytes = encode_to_vec(record, bincode_config())
            .map_err(|e| EngineError::Storage(format!("serialize log record failed: {e}")))?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&bytes);
        let crc = hasher.finalize();

        self.file
            .write_all(&(bytes.len() as u32).to_le_bytes())
            .and_then(|_| self.file.write_all(&crc.to_le_bytes()))
            .and_then(|_| self.file.write_all(&bytes))
            .and_then(|_| self.file.flush())
            .map_err(|e| EngineError::Storage(format!("write log record failed: {e}")))?;
        Ok(())
    }

    pub fn sync(&mut self) -> EngineResult<()> {
        self.file
            .sync_all()
            .map_err(|e| EngineError::Storage(format!("sync schema log failed: {e}")))
    }

    /// Read every record from the start. Stops at a clean end of file;
    /// a short or corrupt frame is `LogItemCorrupted`.
    pub fn replay(path: impl AsRef<Path>) -> EngineResult<Vec<LogRecord>> {
        let mut file = OpenOptions::new()
            .read(true)
            .open(path.as_ref())
            .map_err(|e| EngineError::Storage(format!("open schema log for replay failed: {e}")))?;

        let mut records = Vec::new();
        loop {
            let mut len_buf = [0u8; 4];
            match file.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => {
                    return Err(EngineError::Storage(format!("read frame length failed: {e}")));
                }
            }
            let len = u32::from_le_bytes(len_buf) as usize;

            let mut crc_buf = [0u8; 4];
            file.read_exact(&mut crc_buf)
                .map_err(|_| EngineError::LogItemCorrupted("frame checksum missing".into()))?;
            let expected = u32::from_le_bytes(crc_buf);

            let mut bytes = vec![0u8; len];
            file.read_exact(&mut bytes)
                .map_err(|_| EngineError::LogItemCorrupted("frame body is short".into()))?;

            let mut hasher = crc32fast::Hasher::new();
            hasher.update(&bytes);
            if hasher.finalize() != expected {
                return Err(EngineError::LogItemCorrupted(
                    "frame checksum mismatch".into(),
                ));
            }

            let (record, _) = decode_from_slice(&bytes, bincode_config())
                .map_err(|e| EngineError::LogItemCorrupted(format!("frame does not decode: {e}")))?;
            records.push(record);
        }
        Ok(records)
    }

    /// Drop all records, e.g. after a checkpoint applied them.
    pub fn truncate(&mut self) -> EngineResult<()> {
        drop(std::mem::replace(
            &mut self.file,
            OpenOptions::new()
                .write(true)
                .truncate(true)
                .open(&self.path)
                .map_err(|e| EngineError::Storage(format!("truncate schema log failed: {e}")))?,
        ));
        self.file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| EngineError::Storage(format!("reopen schema log failed: {e}")))?;
        Ok(())
    }
}

/// Little-endian, fixed-width integers; the frame layout must not
/// depend on the platform.
fn bincode_config() -> impl Config {
    config::legacy()
}
