use std::fmt;

/// Locates a block inside a LOB file: physical page ID plus the block's
/// offset within that page's block vector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ObjectId {
    pub page: u32,
    pub offset: u32,
}

impl ObjectId {
    pub const INVALID: ObjectId = ObjectId {
        page: u32::MAX,
        offset: u32::MAX,
    };

    pub fn new(page: u32, offset: u32) -> Self {
        Self { page, offset }
    }

    pub fn is_invalid(&self) -> bool {
        *self == Self::INVALID
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.page, self.offset)
    }
}

/// Identifier of a document registered in the inverted index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct DocumentId(pub u32);

/// A set of languages attached to a text value, e.g. `"en"` or `"ja+en"`.
///
/// An empty set means "use the file's default language".
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct LanguageSet(String);

impl LanguageSet {
    pub fn new(spec: impl Into<String>) -> Self {
        Self(spec.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the spec is a well-formed `+`-separated list of language
    /// codes (ASCII letters only). The empty spec is valid.
    pub fn is_valid(&self) -> bool {
        self.0
            .split('+')
            .all(|code| self.0.is_empty() || (!code.is_empty() && code.chars().all(|c| c.is_ascii_alphabetic())))
    }
}

/// How word-separator sentinels are inserted around a search term when
/// it is expanded into patterns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MatchMode {
    /// Plain substring match.
    String,
    /// The term must start at a word boundary.
    WordHead,
    /// The term must end at a word boundary.
    WordTail,
    /// Head and tail are word boundaries; inner boundaries may appear.
    SimpleWord,
    /// Every morpheme boundary must be a word boundary.
    ExactWord,
}

/// A single search term delivered from the index to the KWIC engine.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SearchTerm {
    pub term: String,
    pub language: LanguageSet,
    pub match_mode: MatchMode,
}

impl SearchTerm {
    pub fn new(term: impl Into<String>, match_mode: MatchMode) -> Self {
        Self {
            term: term.into(),
            language: LanguageSet::default(),
            match_mode,
        }
    }
}

/// Discriminant of a `Data` value, used in error messages and shape checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataKind {
    Int,
    UInt,
    U64,
    Double,
    Bool,
    Str,
    Bytes,
    Language,
    ObjectId,
    SearchTerm,
    Array,
    Null,
}

/// Dynamically-typed value passed across the driver boundary.
///
/// Tuples, open-option values, and log payload elements are all carried
/// as `Data`; consumers match on the variant they expect instead of
/// downcasting.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Data {
    Int(i32),
    UInt(u32),
    U64(u64),
    Double(f64),
    Bool(bool),
    Str(String),
    Bytes(Vec<u8>),
    Language(LanguageSet),
    ObjectId(ObjectId),
    SearchTerm(SearchTerm),
    Array(Vec<Data>),
    Null,
}

impl Data {
    pub fn kind(&self) -> DataKind {
        match self {
            Data::Int(_) => DataKind::Int,
            Data::UInt(_) => DataKind::UInt,
            Data::U64(_) => DataKind::U64,
            Data::Double(_) => DataKind::Double,
            Data::Bool(_) => DataKind::Bool,
            Data::Str(_) => DataKind::Str,
            Data::Bytes(_) => DataKind::Bytes,
            Data::Language(_) => DataKind::Language,
            Data::ObjectId(_) => DataKind::ObjectId,
            Data::SearchTerm(_) => DataKind::SearchTerm,
            Data::Array(_) => DataKind::Array,
            Data::Null => DataKind::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Data::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Data::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Data::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u32> {
        match self {
            Data::UInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Data::U64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Data::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Data::Bytes(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_object_id(&self) -> Option<ObjectId> {
        match self {
            Data::ObjectId(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Data]> {
        match self {
            Data::Array(v) => Some(v),
            _ => None,
        }
    }
}

impl From<&str> for Data {
    fn from(s: &str) -> Self {
        Data::Str(s.to_string())
    }
}

impl From<u32> for Data {
    fn from(v: u32) -> Self {
        Data::UInt(v)
    }
}
