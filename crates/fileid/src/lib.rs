//! The persistent parameter dictionary of a full-text index file.
//!
//! A `FileId` is created once from the schema's field layout and the
//! SQL `HINT` string, then travels with the file: page sizes, indexing
//! type, tokenizer and coder parameters, normalization flags, and the
//! delayed-update mode are all read from here by the other crates.


pub mod hint;

use std::fs;
use std::path::{Path, PathBuf};

use ahash::RandomState;
use common::{Config, EngineError, EngineResult, LockName};
use hashbrown::HashMap;
use hint::{Hint, parse_hint_list, read_bool, read_hint};
use types::{Data, LanguageSet};

/// The parameter map; keyed lookups dominate, so the fast ahash
/// hasher backs it.
type ParamMap = HashMap<ParamKey, Data, RandomState>;

/// Current on-disk format version. Files below [`MIN_VERSION`] are
/// rejected at open; versions of 5 and above use the two-level free
/// management of the physical file.
pub const CURRENT_VERSION: i32 = 4;
pub const MIN_VERSION: i32 = 4;

const DEFAULT_ID_CODER: &str = "PEG:2";
const DEFAULT_FREQUENCY_CODER: &str = "PEG:3";
const DEFAULT_LENGTH_CODER: &str = "PEG:6";
const DEFAULT_LOCATION_CODER: &str = "PEG:6";
const DEFAULT_WORD_ID_CODER: &str = "PEG:1";
const DEFAULT_WORD_FREQUENCY_CODER: &str = "PEG:3";
const DEFAULT_WORD_LENGTH_CODER: &str = "PEG:1";
const DEFAULT_WORD_LOCATION_CODER: &str = "UNA";

const DEFAULT_NGRAM_TOKENIZER: &str = "NGR:1:1 @UNARSCID:1";
const DEFAULT_DUAL_TOKENIZER: &str = "DUAL:JAP:ALL:1 @UNARSCID:1";
const DEFAULT_WORD_TOKENIZER: &str = "DUAL:JAP @UNARSCID:1";

const DEFAULT_EXTRACTOR: &str = "@TERMRSCID:0";
const DEFAULT_MAX_WORD_LENGTH: i32 = 32;
const DEFAULT_FEATURE_SIZE: i32 = 10;

/// The key fields of an index may be represented with a 31-bit mask
/// elsewhere, so their number is capped.
pub const MAX_KEY_COUNT: usize = 31;

/// How the text is indexed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum IndexingType {
    Ngram,
    Word,
    Dual,
}

/// When index mutations reach the main index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DelayedMode {
    None,
    Sync,
    Async,
}

/// Declared type of one field in the file's tuple layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FieldType {
    Str,
    StrArray,
    Int,
    IntArray,
    UInt,
    UIntArray,
    Language,
    LanguageArray,
    Double,
    DoubleArray,
    Word,
    WordArray,
}

impl FieldType {
    fn is_string_key(self) -> bool {
        matches!(self, FieldType::Str | FieldType::StrArray)
    }
}

/// Keys of the persistent parameter map.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ParamKey {
    Version,
    KeyCount,
    DelayedMode,
    IsVacuum,
    IsSectionized,
    IsLanguage,
    IsScoreField,
    IsRoughKwic,
    LeafPageSize,
    OverflowPageSize,
    BtreePageSize,
    OtherPageSize,
    IndexingType,
    TokenizeParameter,
    IsNormalized,
    IsStemming,
    IsDeleteSpace,
    IsCarriage,
    IdCoder,
    FrequencyCoder,
    LengthCoder,
    LocationCoder,
    WordIdCoder,
    WordFrequencyCoder,
    WordLengthCoder,
    WordLocationCoder,
    Extractor,
    Language,
    Distribute,
    IsClustered,
    Feature,
    IsNolocation,
    IsNoTF,
    IsExpungeFlag,
    MaxWordLength,
    IsMounted,
    IsReadOnly,
    IsTemporary,
}

/// The parameter dictionary persisted with the file.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct FileId {
    params: ParamMap,
    fields: Vec<FieldType>,
    path: PathBuf,
    lock_name: LockName,
}

impl FileId {
    /// Build the dictionary from the field layout and the hint string.
    ///
    /// Hints missing from the string fall back to the engine
    /// configuration; inconsistent combinations fail with
    /// `NotSupported` and malformed values with `SqlSyntax`.
    pub fn create(
        fields: Vec<FieldType>,
        hint_string: &str,
        config: &Config,
        path: impl Into<PathBuf>,
        lock_name: LockName,
    ) -> EngineResult<FileId> {
        let mut id = FileId {
            params: ParamMap::default(),
            fields,
            path: path.into(),
            lock_name,
        };
        let hints = parse_hint_list(hint_string)?;

        id.set_delayed(&hints)?;
        id.set_sectionized(&hints)?;
        id.set_expunge_flag(&hints)?;
        id.set_inverted_parameter(&hints)?;
        id.set_rough_kwic(&hints)?;

        if !id.check() {
            return Err(EngineError::NotSupported(
                "field layout does not fit a full-text index".into(),
            ));
        }

        let minimum = config.physical_page_min;
        id.set_int(
            ParamKey::LeafPageSize,
            (fix_page_size(config.leaf_page_size_kib << 10, minimum) >> 10) as i32,
        );
        id.set_int(
            ParamKey::OverflowPageSize,
            (fix_page_size(config.overflow_page_size_kib << 10, minimum) >> 10) as i32,
        );
        id.set_int(
            ParamKey::BtreePageSize,
            (fix_page_size(config.btree_page_size_kib << 10, minimum) >> 10) as i32,
        );
        id.set_int(
            ParamKey::OtherPageSize,
            (fix_page_size(config.other_page_size_kib << 10, minimum) >> 10) as i32,
        );

        id.set_bool(ParamKey::IsMounted, true);
        id.set_bool(ParamKey::IsReadOnly, false);
        id.set_bool(ParamKey::IsTemporary, false);
        id.set_int(ParamKey::Version, CURRENT_VERSION);
        Ok(id)
    }

    /// Reject files written by formats this engine cannot read.
    pub fn check_version(&self) -> bool {
        self.version() >= MIN_VERSION
    }

    pub fn version(&self) -> i32 {
        self.get_int(ParamKey::Version).unwrap_or(0)
    }

    /// Versions of 5 and above use two-level free management.
    pub fn uses_two_level_free_management(&self) -> bool {
        self.version() >= 5
    }

    // ---- persistence -------------------------------------------------

    pub fn save(&self, path: &Path) -> EngineResult<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| EngineError::Unexpected(format!("serialize file id failed: {e}")))?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> EngineResult<FileId> {
        let json = fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|e| EngineError::Unexpected(format!("deserialize file id failed: {e}")))
    }

    // ---- page sizes (bytes) ------------------------------------------

    pub fn leaf_page_size(&self) -> u32 {
        (self.get_int(ParamKey::LeafPageSize).unwrap_or(16) as u32) << 10
    }

    pub fn overflow_page_size(&self) -> u32 {
        (self.get_int(ParamKey::OverflowPageSize).unwrap_or(16) as u32) << 10
    }

    pub fn btree_page_size(&self) -> u32 {
        (self.get_int(ParamKey::BtreePageSize).unwrap_or(16) as u32) << 10
    }

    pub fn other_page_size(&self) -> u32 {
        (self.get_int(ParamKey::OtherPageSize).unwrap_or(4) as u32) << 10
    }

    // ---- flags and parameters ----------------------------------------

    pub fn lock_name(&self) -> &LockName {
        &self.lock_name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.path = path.into();
    }

    pub fn is_mounted(&self) -> bool {
        self.get_bool(ParamKey::IsMounted).unwrap_or(false)
    }

    pub fn set_mounted(&mut self, mounted: bool) {
        self.set_bool(ParamKey::IsMounted, mounted);
    }

    pub fn is_read_only(&self) -> bool {
        self.get_bool(ParamKey::IsReadOnly).unwrap_or(false)
    }

    pub fn is_temporary(&self) -> bool {
        self.get_bool(ParamKey::IsTemporary).unwrap_or(false)
    }

    pub fn key_count(&self) -> usize {
        self.get_int(ParamKey::KeyCount).unwrap_or(0) as usize
    }

    pub fn is_key_array(&self, key: usize) -> bool {
        self.fields
            .get(key)
            .map(|f| matches!(f, FieldType::StrArray))
            .unwrap_or(false)
    }

    pub fn fields(&self) -> &[FieldType] {
        &self.fields
    }

    pub fn indexing_type(&self) -> IndexingType {
        match self.get_int(ParamKey::IndexingType) {
            Some(1) => IndexingType::Word,
            Some(2) => IndexingType::Dual,
            _ => IndexingType::Ngram,
        }
    }

    pub fn tokenize_parameter(&self) -> String {
        self.get_str(ParamKey::TokenizeParameter).unwrap_or_default()
    }

    /// Number of the morphological-analysis resource named in the
    /// tokenizer parameter (`@UNARSCID:<n>`).
    pub fn resource_id(&self) -> u32 {
        let param = self.tokenize_parameter();
        param
            .split_whitespace()
            .find_map(|tok| tok.strip_prefix("@UNARSCID:"))
            .and_then(|n| n.parse().ok())
            .unwrap_or(0)
    }

    pub fn is_normalized(&self) -> bool {
        self.get_bool(ParamKey::IsNormalized).unwrap_or(false)
    }

    pub fn is_stemming(&self) -> bool {
        self.get_bool(ParamKey::IsStemming).unwrap_or(false)
    }

    pub fn is_delete_space(&self) -> bool {
        self.get_bool(ParamKey::IsDeleteSpace).unwrap_or(false)
    }

    pub fn is_carriage(&self) -> bool {
        self.get_bool(ParamKey::IsCarriage).unwrap_or(false)
    }

    pub fn id_coder(&self) -> String {
        self.get_str(ParamKey::IdCoder).unwrap_or_default()
    }

    pub fn frequency_coder(&self) -> String {
        self.get_str(ParamKey::FrequencyCoder).unwrap_or_default()
    }

    pub fn length_coder(&self) -> String {
        self.get_str(ParamKey::LengthCoder).unwrap_or_default()
    }

    pub fn location_coder(&self) -> String {
        self.get_str(ParamKey::LocationCoder).unwrap_or_default()
    }

    pub fn word_id_coder(&self) -> String {
        self.get_str(ParamKey::WordIdCoder).unwrap_or_default()
    }

    pub fn word_frequency_coder(&self) -> String {
        self.get_str(ParamKey::WordFrequencyCoder).unwrap_or_default()
    }

    pub fn word_length_coder(&self) -> String {
        self.get_str(ParamKey::WordLengthCoder).unwrap_or_default()
    }

    pub fn word_location_coder(&self) -> String {
        self.get_str(ParamKey::WordLocationCoder).unwrap_or_default()
    }

    pub fn extractor(&self) -> String {
        self.get_str(ParamKey::Extractor).unwrap_or_default()
    }

    pub fn default_language(&self) -> LanguageSet {
        LanguageSet::new(self.get_str(ParamKey::Language).unwrap_or_default())
    }

    pub fn max_word_length(&self) -> i32 {
        self.get_int(ParamKey::MaxWordLength)
            .unwrap_or(DEFAULT_MAX_WORD_LENGTH)
    }

    pub fn is_distribute(&self) -> bool {
        self.distribute_count() > 0
    }

    pub fn distribute_count(&self) -> i32 {
        self.get_int(ParamKey::Distribute).unwrap_or(0)
    }

    pub fn is_clustering(&self) -> bool {
        self.get_bool(ParamKey::IsClustered).unwrap_or(false)
    }

    pub fn feature_size(&self) -> i32 {
        self.get_int(ParamKey::Feature).unwrap_or(DEFAULT_FEATURE_SIZE)
    }

    pub fn delayed_mode(&self) -> DelayedMode {
        match self.get_int(ParamKey::DelayedMode) {
            Some(1) => DelayedMode::Sync,
            Some(2) => DelayedMode::Async,
            _ => DelayedMode::None,
        }
    }

    pub fn is_delayed(&self) -> bool {
        self.delayed_mode() != DelayedMode::None
    }

    pub fn is_sync_merge(&self) -> bool {
        self.delayed_mode() == DelayedMode::Sync
    }

    pub fn is_vacuum(&self) -> bool {
        self.get_bool(ParamKey::IsVacuum).unwrap_or(true)
    }

    pub fn is_sectionized(&self) -> bool {
        self.get_bool(ParamKey::IsSectionized).unwrap_or(false)
    }

    pub fn is_language(&self) -> bool {
        self.get_bool(ParamKey::IsLanguage).unwrap_or(false)
    }

    pub fn is_score_field(&self) -> bool {
        self.get_bool(ParamKey::IsScoreField).unwrap_or(false)
    }

    pub fn is_rough_kwic(&self) -> bool {
        self.get_bool(ParamKey::IsRoughKwic).unwrap_or(false)
    }

    pub fn is_nolocation(&self) -> bool {
        self.get_bool(ParamKey::IsNolocation).unwrap_or(false)
    }

    pub fn is_notf(&self) -> bool {
        self.get_bool(ParamKey::IsNoTF).unwrap_or(false)
    }

    pub fn is_expunge_flag(&self) -> bool {
        self.get_bool(ParamKey::IsExpungeFlag).unwrap_or(false)
    }

    // ---- hint application --------------------------------------------

    fn set_delayed(&mut self, hints: &[Hint]) -> EngineResult<()> {
        let mut mode = DelayedMode::None;
        // Vacuum is only switched off by an explicit vacuum=false.
        let mut vacuum = true;

        if let Some(value) = read_hint(hints, "delayed") {
            if value.is_empty() || value.eq_ignore_ascii_case("true") {
                mode = DelayedMode::Async;
            } else if value.eq_ignore_ascii_case("false") {
                mode = DelayedMode::None;
            } else if value.eq_ignore_ascii_case("sync") {
                mode = DelayedMode::Sync;
            } else if value.eq_ignore_ascii_case("async") {
                mode = DelayedMode::Async;
            } else {
                // A child-hint list; async unless sync is named.
                mode = DelayedMode::Async;
                let children = parse_hint_list(value)?;
                if read_hint(&children, "sync").is_some() {
                    mode = DelayedMode::Sync;
                }
                if read_hint(&children, "async").is_some() {
                    mode = DelayedMode::Async;
                }
                if let Some(v) = read_hint(&children, "vacuum") {
                    if v.eq_ignore_ascii_case("false") {
                        vacuum = false;
                    }
                }
            }
        }

        self.set_int(ParamKey::DelayedMode, mode as i32);
        self.set_bool(ParamKey::IsVacuum, vacuum);
        Ok(())
    }

    fn set_sectionized(&mut self, hints: &[Hint]) -> EngineResult<()> {
        let value = match read_hint(hints, "sectionized") {
            None => false,
            Some(v) => read_bool(v).inspect_err(|_| {
                log::error!("illegal sectionized value '{v}'");
            })?,
        };
        self.set_bool(ParamKey::IsSectionized, value);
        Ok(())
    }

    fn set_expunge_flag(&mut self, hints: &[Hint]) -> EngineResult<()> {
        let value = match read_hint(hints, "deleteflag") {
            None => false,
            Some(v) => read_bool(v).inspect_err(|_| {
                log::error!("illegal deleteflag value '{v}'");
            })?,
        };
        self.set_bool(ParamKey::IsExpungeFlag, value);
        Ok(())
    }

    fn set_rough_kwic(&mut self, hints: &[Hint]) -> EngineResult<()> {
        let value = match read_hint(hints, "kwic") {
            None => false,
            Some(v) => read_bool(v).inspect_err(|_| {
                log::error!("illegal kwic value '{v}'");
            })?,
        };
        self.set_bool(ParamKey::IsRoughKwic, value);
        Ok(())
    }

    fn set_inverted_parameter(&mut self, hints: &[Hint]) -> EngineResult<()> {
        let inverted = read_hint(hints, "inverted").unwrap_or("");
        let children = parse_hint_list(inverted)?;

        self.set_indexing_type(&children)?;
        self.set_clustered(&children)?;
        self.set_tokenize_parameter(&children)?;
        self.set_normalized(&children)?;
        self.set_coder_parameter(&children)?;
        self.set_extractor(&children)?;
        self.set_language(&children)?;
        self.set_distribute(&children)?;
        self.set_nolocation(&children)?;
        self.set_notf(&children)?;

        if !self.verify_hint() {
            return Err(EngineError::NotSupported(
                "inconsistent nolocation/notf/indexing combination".into(),
            ));
        }

        self.set_max_word_length(&children)
    }

    fn set_indexing_type(&mut self, hints: &[Hint]) -> EngineResult<()> {
        let value = read_hint(hints, "indexing").unwrap_or("ngram");
        let indexing = if value.eq_ignore_ascii_case("ngram") {
            IndexingType::Ngram
        } else if value.eq_ignore_ascii_case("word") {
            IndexingType::Word
        } else if value.eq_ignore_ascii_case("dual") {
            IndexingType::Dual
        } else {
            log::error!("illegal indexing type '{value}'");
            return Err(EngineError::SqlSyntax(value.to_string()));
        };
        self.set_int(ParamKey::IndexingType, indexing as i32);
        Ok(())
    }

    fn set_clustered(&mut self, hints: &[Hint]) -> EngineResult<()> {
        let mut clustered = false;
        if let Some(value) = read_hint(hints, "clustered") {
            clustered = true;
            let children = parse_hint_list(value)?;
            match read_hint(&children, "feature") {
                Some(v) if !v.is_empty() => {
                    let feature: i32 = v
                        .parse()
                        .map_err(|_| EngineError::SqlSyntax(v.to_string()))?;
                    if feature <= 0 {
                        log::error!("illegal feature number '{v}'");
                        return Err(EngineError::SqlSyntax(v.to_string()));
                    }
                    self.set_int(ParamKey::Feature, feature);
                }
                Some(v) => {
                    log::error!("feature number missing");
                    return Err(EngineError::SqlSyntax(v.to_string()));
                }
                None => {
                    self.set_int(ParamKey::Feature, DEFAULT_FEATURE_SIZE);
                }
            }
        }
        self.set_bool(ParamKey::IsClustered, clustered);
        Ok(())
    }

    fn set_tokenize_parameter(&mut self, hints: &[Hint]) -> EngineResult<()> {
        let value = match read_hint(hints, "tokenizer") {
            Some(v) => v.to_string(),
            None => {
                if self.is_clustering() {
                    // Clustering needs the dual tokenizer.
                    DEFAULT_DUAL_TOKENIZER.to_string()
                } else {
                    match self.indexing_type() {
                        IndexingType::Dual => DEFAULT_DUAL_TOKENIZER.to_string(),
                        IndexingType::Word => DEFAULT_WORD_TOKENIZER.to_string(),
                        IndexingType::Ngram => DEFAULT_NGRAM_TOKENIZER.to_string(),
                    }
                }
            }
        };
        if value.is_empty() {
            log::error!("tokenizer parameter is not set");
            return Err(EngineError::NotSupported("empty tokenizer parameter".into()));
        }

        let value = value.to_ascii_uppercase();
        check_tokenizer(self.indexing_type(), &value)?;
        self.set_str(ParamKey::TokenizeParameter, value);
        Ok(())
    }

    fn set_normalized(&mut self, hints: &[Hint]) -> EngineResult<()> {
        let normalized = match read_hint(hints, "normalized") {
            None => false,
            Some(v) if v.is_empty() || v.eq_ignore_ascii_case("true") => true,
            Some(v) if v.eq_ignore_ascii_case("false") => false,
            Some(v) => {
                // A child-hint list. Unsupported children are ignored;
                // normalization itself is considered enabled.
                let children = parse_hint_list(v)?;
                if let Some(s) = read_hint(&children, "stemming") {
                    let b = read_bool(s).inspect_err(|_| {
                        log::error!("illegal stemming value '{s}'");
                    })?;
                    self.set_bool(ParamKey::IsStemming, b);
                }
                if let Some(s) = read_hint(&children, "deletespace") {
                    let b = read_bool(s).inspect_err(|_| {
                        log::error!("illegal deletespace value '{s}'");
                    })?;
                    self.set_bool(ParamKey::IsDeleteSpace, b);
                }
                if let Some(s) = read_hint(&children, "carriage") {
                    let b = read_bool(s).inspect_err(|_| {
                        log::error!("illegal carriage value '{s}'");
                    })?;
                    self.set_bool(ParamKey::IsCarriage, b);
                }
                true
            }
        };
        self.set_bool(ParamKey::IsNormalized, normalized);
        Ok(())
    }

    fn set_coder_parameter(&mut self, hints: &[Hint]) -> EngineResult<()> {
        let defaults = [
            (ParamKey::IdCoder, "id", DEFAULT_ID_CODER),
            (ParamKey::FrequencyCoder, "frequency", DEFAULT_FREQUENCY_CODER),
            (ParamKey::LengthCoder, "length", DEFAULT_LENGTH_CODER),
            (ParamKey::LocationCoder, "location", DEFAULT_LOCATION_CODER),
            (ParamKey::WordIdCoder, "wordid", DEFAULT_WORD_ID_CODER),
            (
                ParamKey::WordFrequencyCoder,
                "wordfrequency",
                DEFAULT_WORD_FREQUENCY_CODER,
            ),
            (ParamKey::WordLengthCoder, "wordlength", DEFAULT_WORD_LENGTH_CODER),
            (
                ParamKey::WordLocationCoder,
                "wordlocation",
                DEFAULT_WORD_LOCATION_CODER,
            ),
        ];

        match read_hint(hints, "coder") {
            None => {
                for (key, _, default) in defaults {
                    self.set_str(key, default);
                }
            }
            Some(value) => {
                let children = parse_hint_list(value)?;
                for (key, name, default) in defaults {
                    let coder = read_hint(&children, name).unwrap_or(default);
                    self.set_str(key, coder);
                }
            }
        }
        Ok(())
    }

    fn set_extractor(&mut self, hints: &[Hint]) -> EngineResult<()> {
        let value = read_hint(hints, "extractor").unwrap_or(DEFAULT_EXTRACTOR);
        if value.is_empty() {
            log::error!("extractor is not set");
            return Err(EngineError::NotSupported("empty extractor".into()));
        }
        self.set_str(ParamKey::Extractor, value);
        Ok(())
    }

    fn set_language(&mut self, hints: &[Hint]) -> EngineResult<()> {
        let value = read_hint(hints, "language").unwrap_or("");
        let language = LanguageSet::new(value);
        if !language.is_valid() {
            log::error!("illegal language specification '{value}'");
            return Err(EngineError::SqlSyntax(value.to_string()));
        }
        self.set_str(ParamKey::Language, value);
        Ok(())
    }

    fn set_distribute(&mut self, hints: &[Hint]) -> EngineResult<()> {
        let mut count = 0;
        if let Some(value) = read_hint(hints, "distribute") {
            count = value
                .parse::<i32>()
                .map_err(|_| EngineError::SqlSyntax(value.to_string()))?;
            if !(0..=100).contains(&count) {
                return Err(EngineError::NotSupported(format!(
                    "distribute count {count} is out of range"
                )));
            }
        }
        self.set_int(ParamKey::Distribute, count);
        Ok(())
    }

    fn set_nolocation(&mut self, hints: &[Hint]) -> EngineResult<()> {
        let value = matches!(
            read_hint(hints, "nolocation"),
            Some(v) if v.is_empty() || v.eq_ignore_ascii_case("true")
        );
        self.set_bool(ParamKey::IsNolocation, value);
        Ok(())
    }

    fn set_notf(&mut self, hints: &[Hint]) -> EngineResult<()> {
        let value = matches!(
            read_hint(hints, "notf"),
            Some(v) if v.is_empty() || v.eq_ignore_ascii_case("true")
        );
        self.set_bool(ParamKey::IsNoTF, value);
        Ok(())
    }

    fn set_max_word_length(&mut self, hints: &[Hint]) -> EngineResult<()> {
        let max = match read_hint(hints, "maxwordlength") {
            Some(v) => v
                .parse::<i32>()
                .map_err(|_| EngineError::SqlSyntax(v.to_string()))?,
            None => DEFAULT_MAX_WORD_LENGTH,
        };
        self.set_int(ParamKey::MaxWordLength, max);
        Ok(())
    }

    /// Consistency across the inverted hints.
    ///
    /// Without locations a dual index is meaningless, and storing
    /// locations without term frequencies is not a supported layout.
    fn verify_hint(&self) -> bool {
        if (self.is_nolocation() && self.indexing_type() == IndexingType::Dual)
            || (!self.is_nolocation() && self.is_notf())
        {
            return false;
        }
        true
    }

    /// Validate the field layout and derive key count, language and
    /// score-field flags from it.
    fn check(&mut self) -> bool {
        let fields = self.fields.clone();
        let mut n = 0;

        while n < fields.len() && fields[n].is_string_key() {
            n += 1;
        }
        let key_count = n;
        if key_count == 0 || key_count > MAX_KEY_COUNT {
            return false;
        }

        let mut language = false;
        if key_count != 1 {
            // A compound index's language column cannot be an array.
            if fields.get(n) == Some(&FieldType::LanguageArray) {
                return false;
            }
            if fields.get(n) == Some(&FieldType::Language) {
                language = true;
                n += 1;
            }
        } else {
            match fields.get(n) {
                Some(FieldType::Language) => {
                    if fields[0] != FieldType::Str {
                        return false;
                    }
                    language = true;
                    n += 1;
                }
                Some(FieldType::LanguageArray) => {
                    if fields[0] != FieldType::StrArray {
                        return false;
                    }
                    language = true;
                    n += 1;
                }
                _ => {}
            }
        }

        self.set_int(ParamKey::KeyCount, key_count as i32);
        self.set_bool(ParamKey::IsLanguage, language);

        if fields.get(n) == Some(&FieldType::Double) {
            self.set_bool(ParamKey::IsScoreField, true);
        }

        if self.is_sectionized() && (key_count != 1 || fields[0] != FieldType::StrArray) {
            return false;
        }

        true
    }

    // ---- typed map access --------------------------------------------

    fn set_int(&mut self, key: ParamKey, value: i32) {
        self.params.insert(key, Data::Int(value));
    }

    fn set_bool(&mut self, key: ParamKey, value: bool) {
        self.params.insert(key, Data::Bool(value));
    }

    fn set_str(&mut self, key: ParamKey, value: impl Into<String>) {
        self.params.insert(key, Data::Str(value.into()));
    }

    fn get_int(&self, key: ParamKey) -> Option<i32> {
        self.params.get(&key).and_then(Data::as_int)
    }

    fn get_bool(&self, key: ParamKey) -> Option<bool> {
        self.params.get(&key).and_then(Data::as_bool)
    }

    fn get_str(&self, key: ParamKey) -> Option<String> {
        self.params
            .get(&key)
            .and_then(Data::as_str)
            .map(str::to_string)
    }
}

/// Round a requested page size up to a power of two no smaller than the
/// physical minimum.
fn fix_page_size(requested: u32, minimum: u32) -> u32 {
    requested.max(minimum).next_power_of_two()
}

/// The tokenizer method must agree with the indexing type. The dual
/// tokenizer supersets the n-gram one, so an n-gram index accepts both.
fn check_tokenizer(indexing: IndexingType, parameter: &str) -> EngineResult<()> {
    let ok = match indexing {
        IndexingType::Ngram => parameter.starts_with("NGR") || parameter.starts_with("DUAL"),
        IndexingType::Word | IndexingType::Dual => parameter.starts_with("DUAL"),
    };
    if !ok {
        return Err(EngineError::NotSupported(format!(
            "tokenizer '{parameter}' does not fit indexing type {indexing:?}"
        )));
    }
    Ok(())
}
