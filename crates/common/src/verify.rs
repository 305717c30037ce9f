//! Verification plumbing: what to do when an inconsistency is found and
//! how findings are accumulated across sub-checks.

use crate::PageId;
use std::path::PathBuf;

/// What the verifier is allowed to do with an inconsistency.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Treatment {
    /// Fix correctable inconsistencies in place (requires write access).
    pub correct: bool,
    /// Keep checking after the first finding instead of aborting.
    pub continue_after_fault: bool,
}

impl Treatment {
    pub fn read_only() -> Self {
        Treatment::default()
    }

    pub fn correcting() -> Self {
        Treatment {
            correct: true,
            continue_after_fault: true,
        }
    }
}

/// One inconsistency found during verification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fault {
    pub path: PathBuf,
    pub page: Option<PageId>,
    pub description: String,
}

/// Accumulates verification findings.
///
/// Sub-checks run against their own `Progress` and are merged into the
/// parent, so a failing sub-check can be identified and the walk aborted.
#[derive(Clone, Debug, Default)]
pub struct Progress {
    faults: Vec<Fault>,
    pages_checked: u64,
}

impl Progress {
    pub fn new() -> Self {
        Progress::default()
    }

    pub fn is_good(&self) -> bool {
        self.faults.is_empty()
    }

    pub fn notify_page(&mut self) {
        self.pages_checked += 1;
    }

    pub fn pages_checked(&self) -> u64 {
        self.pages_checked
    }

    pub fn fault(&mut self, path: impl Into<PathBuf>, page: Option<PageId>, description: impl Into<String>) {
        self.faults.push(Fault {
            path: path.into(),
            page,
            description: description.into(),
        });
    }

    pub fn faults(&self) -> &[Fault] {
        &self.faults
    }

    /// Folds a sub-check's findings into this one.
    pub fn merge(&mut self, child: Progress) {
        self.pages_checked += child.pages_checked;
        self.faults.extend(child.faults);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_accumulates_faults() {
        let mut parent = Progress::new();
        parent.notify_page();

        let mut child = Progress::new();
        child.fault("/tmp/x", Some(PageId(3)), "cumulative size mismatch");
        child.notify_page();

        assert!(parent.is_good());
        parent.merge(child);
        assert!(!parent.is_good());
        assert_eq!(parent.pages_checked(), 2);
        assert_eq!(parent.faults()[0].page, Some(PageId(3)));
    }
}
