//! The open-option bag handed across the driver boundary.
//!
//! Values are dynamically typed and keyed by numeric constants so the
//! planner can stage parameters without knowing the driver's types.

use common::{EngineError, EngineResult};
use hashbrown::HashMap;
use types::Data;

/// Well-known option keys.
pub mod key {
    pub const OPEN_MODE: u32 = 0;
    pub const TARGET_FIELDS: u32 = 1;
    pub const FIELD_SELECT: u32 = 2;
    pub const CACHE_ALL: u32 = 3;
    pub const LIMIT: u32 = 4;
    pub const OFFSET: u32 = 5;
    pub const FUNCTION: u32 = 6;
    pub const FUNCTION_ARGUMENT: u32 = 7;
    pub const SORT_SPEC: u32 = 8;
}

/// How a cursor is opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Search,
    Update,
    Batch,
}

impl OpenMode {
    pub fn code(self) -> i32 {
        match self {
            OpenMode::Read => 0,
            OpenMode::Search => 1,
            OpenMode::Update => 2,
            OpenMode::Batch => 3,
        }
    }

    pub fn from_code(code: i32) -> EngineResult<OpenMode> {
        Ok(match code {
            0 => OpenMode::Read,
            1 => OpenMode::Search,
            2 => OpenMode::Update,
            3 => OpenMode::Batch,
            _ => return Err(EngineError::BadArgument),
        })
    }

    /// Mutating modes fix pages write-discardable so an aborted
    /// statement can roll its pages back.
    pub fn is_update(self) -> bool {
        matches!(self, OpenMode::Update | OpenMode::Batch)
    }
}

/// A typed bag of open parameters.
#[derive(Clone, Debug, Default)]
pub struct OpenOptions {
    values: HashMap<u32, Data>,
}

impl OpenOptions {
    pub fn new() -> Self {
        OpenOptions::default()
    }

    pub fn set_integer(&mut self, key: u32, value: i32) {
        self.values.insert(key, Data::Int(value));
    }

    pub fn set_boolean(&mut self, key: u32, value: bool) {
        self.values.insert(key, Data::Bool(value));
    }

    pub fn set_string(&mut self, key: u32, value: impl Into<String>) {
        self.values.insert(key, Data::Str(value.into()));
    }

    pub fn set_array(&mut self, key: u32, value: Vec<u32>) {
        self.values
            .insert(key, Data::Array(value.into_iter().map(Data::UInt).collect()));
    }

    pub fn integer(&self, key: u32) -> Option<i32> {
        self.values.get(&key).and_then(Data::as_int)
    }

    pub fn boolean(&self, key: u32) -> Option<bool> {
        self.values.get(&key).and_then(Data::as_bool)
    }

    pub fn string(&self, key: u32) -> Option<&str> {
        self.values.get(&key).and_then(Data::as_str)
    }

    pub fn array(&self, key: u32) -> Option<Vec<u32>> {
        self.values
            .get(&key)?
            .as_array()?
            .iter()
            .map(Data::as_uint)
            .collect()
    }

    pub fn set_open_mode(&mut self, mode: OpenMode) {
        self.set_integer(key::OPEN_MODE, mode.code());
    }

    /// Defaults to `Read` when the planner staged nothing.
    pub fn open_mode(&self) -> EngineResult<OpenMode> {
        match self.integer(key::OPEN_MODE) {
            None => Ok(OpenMode::Read),
            Some(code) => OpenMode::from_code(code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_round_trips() {
        let mut options = OpenOptions::new();
        options.set_integer(key::LIMIT, 10);
        options.set_boolean(key::CACHE_ALL, true);
        options.set_string(key::FUNCTION, "kwic");
        options.set_array(key::TARGET_FIELDS, vec![0, 2]);

        assert_eq!(options.integer(key::LIMIT), Some(10));
        assert_eq!(options.boolean(key::CACHE_ALL), Some(true));
        assert_eq!(options.string(key::FUNCTION), Some("kwic"));
        assert_eq!(options.array(key::TARGET_FIELDS), Some(vec![0, 2]));
        // Typed getters do not coerce.
        assert_eq!(options.boolean(key::LIMIT), None);
    }

    #[test]
    fn open_mode_codes() {
        let mut options = OpenOptions::new();
        assert_eq!(options.open_mode().unwrap(), OpenMode::Read);

        options.set_open_mode(OpenMode::Batch);
        assert_eq!(options.open_mode().unwrap(), OpenMode::Batch);
        assert!(options.open_mode().unwrap().is_update());

        options.set_integer(key::OPEN_MODE, 99);
        assert!(options.open_mode().is_err());
    }
}
