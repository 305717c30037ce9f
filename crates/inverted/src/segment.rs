//! The segment model of the delayed-update pipeline.
//!
//! New documents land in the small segment, the live write target.
//! Sealing turns it into a large segment; a merge folds large segments
//! into the main segment. The table lives on page 0 of the "other"
//! sub-file.

use common::{EngineError, EngineResult};
use types::DocumentId;

/// Whether a segment still accepts inserts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SegmentState {
    Small,
    Large,
}

/// One segment: a generation counter, its state, and the contiguous
/// document range it covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Segment {
    pub generation: u32,
    pub state: SegmentState,
    pub first_doc: DocumentId,
    pub last_doc: DocumentId,
    pub doc_count: u32,
    pub expunged_count: u32,
}

impl Segment {
    fn new(generation: u32, state: SegmentState, first: DocumentId) -> Self {
        Self {
            generation,
            state,
            first_doc: first,
            last_doc: first,
            doc_count: 0,
            expunged_count: 0,
        }
    }

    pub fn contains(&self, doc: DocumentId) -> bool {
        self.doc_count > 0 && self.first_doc <= doc && doc <= self.last_doc
    }
}

/// All segments of one index, persisted as a whole.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SegmentTable {
    next_generation: u32,
    next_doc: u32,
    /// The merged main segment, present once anything was merged.
    pub main: Option<Segment>,
    /// Sealed segments awaiting a merge, oldest first.
    pub large: Vec<Segment>,
    /// The live write target.
    pub small: Option<Segment>,
}

impl SegmentTable {
    pub fn new() -> Self {
        SegmentTable::default()
    }

    pub fn document_count(&self) -> u32 {
        let live = |s: &Segment| s.doc_count - s.expunged_count;
        self.main.iter().map(live).sum::<u32>()
            + self.large.iter().map(live).sum::<u32>()
            + self.small.iter().map(live).sum::<u32>()
    }

    /// Register a new document in the small segment, creating the
    /// segment when there is none.
    pub fn insert(&mut self) -> DocumentId {
        let doc = DocumentId(self.next_doc);
        self.next_doc += 1;

        let small = self.small.get_or_insert_with(|| {
            let generation = self.next_generation;
            self.next_generation += 1;
            Segment::new(generation, SegmentState::Small, doc)
        });
        if small.doc_count == 0 {
            small.first_doc = doc;
        }
        small.last_doc = doc;
        small.doc_count += 1;
        doc
    }

    /// Flag a document as deleted in whichever segment covers it.
    pub fn expunge(&mut self, doc: DocumentId) -> EngineResult<()> {
        let segment = self
            .small
            .iter_mut()
            .chain(self.large.iter_mut())
            .chain(self.main.iter_mut())
            .find(|s| s.contains(doc))
            .ok_or_else(|| {
                EngineError::Inverted(format!("document {} is in no segment", doc.0))
            })?;
        segment.expunged_count += 1;
        Ok(())
    }

    /// Seal the small segment; it becomes merge-eligible.
    pub fn seal_small(&mut self) -> bool {
        match self.small.take() {
            Some(mut segment) if segment.doc_count > 0 => {
                segment.state = SegmentState::Large;
                self.large.push(segment);
                true
            }
            Some(_) | None => false,
        }
    }

    /// Fold every sealed segment into the main segment. Returns whether
    /// anything moved.
    pub fn merge(&mut self) -> bool {
        if self.large.is_empty() {
            return false;
        }
        let main = self.main.get_or_insert_with(|| {
            let generation = self.next_generation;
            self.next_generation += 1;
            let mut segment = Segment::new(generation, SegmentState::Large, DocumentId(0));
            segment.doc_count = 0;
            segment
        });
        for segment in self.large.drain(..) {
            if main.doc_count == 0 {
                main.first_doc = segment.first_doc;
            }
            main.last_doc = main.last_doc.max(segment.last_doc);
            main.doc_count += segment.doc_count;
            main.expunged_count += segment.expunged_count;
        }
        true
    }

    /// Physically drop expunged documents from the main segment.
    /// Returns how many were reclaimed.
    pub fn vacuum(&mut self) -> u32 {
        let mut reclaimed = 0;
        if let Some(main) = self.main.as_mut() {
            reclaimed += main.expunged_count;
            main.doc_count -= main.expunged_count;
            main.expunged_count = 0;
        }
        reclaimed
    }

    pub fn has_small_documents(&self) -> bool {
        self.small.map(|s| s.doc_count > 0).unwrap_or(false)
    }

    pub fn expunged_total(&self) -> u32 {
        self.main.iter().map(|s| s.expunged_count).sum::<u32>()
            + self.large.iter().map(|s| s.expunged_count).sum::<u32>()
            + self.small.iter().map(|s| s.expunged_count).sum::<u32>()
    }
}
