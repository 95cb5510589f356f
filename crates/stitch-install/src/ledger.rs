//! Missing-parts ledger.
//!
//! Three sorted sets track what verification found: missing part indices
//! per target, `(target, part)` pairs per source patch, and targets whose
//! on-disk length does not match the index. Install task queues are built
//! from the per-source set.

use std::collections::BTreeSet;

use stitch_index::PatchIndex;

#[derive(Debug, Default)]
pub struct Ledger {
    missing_per_target: Vec<BTreeSet<usize>>,
    missing_per_source: Vec<BTreeSet<(usize, usize)>>,
    size_mismatch: BTreeSet<usize>,
}

impl Ledger {
    pub(crate) fn for_index(index: &dyn PatchIndex) -> Self {
        Self {
            missing_per_target: vec![BTreeSet::new(); index.target_count()],
            missing_per_source: vec![BTreeSet::new(); index.source_count()],
            size_mismatch: BTreeSet::new(),
        }
    }

    /// Record one part as missing, keeping the per-source set coherent.
    pub(crate) fn mark_part_missing(&mut self, index: &dyn PatchIndex, target: usize, part: usize) {
        self.missing_per_target[target].insert(part);
        let p = index.target(target).part(part);
        if p.is_from_source() {
            self.missing_per_source[p.source_index()].insert((target, part));
        }
    }

    /// Record every part of `target` as missing.
    pub(crate) fn mark_file_missing(&mut self, index: &dyn PatchIndex, target: usize) {
        for part in 0..index.target(target).part_count() {
            self.mark_part_missing(index, target, part);
        }
    }

    pub(crate) fn mark_size_mismatch(&mut self, target: usize) {
        self.size_mismatch.insert(target);
    }

    /// Drop all recorded state for one target, ahead of re-verification.
    pub(crate) fn clear_target(&mut self, target: usize) {
        for parts in &mut self.missing_per_source {
            parts.retain(|&(t, _)| t != target);
        }
        self.missing_per_target[target].clear();
        self.size_mismatch.remove(&target);
    }

    /// Missing part indices of one target, ascending.
    pub fn missing_parts(&self, target: usize) -> &BTreeSet<usize> {
        &self.missing_per_target[target]
    }

    /// `(target, part)` pairs whose reconstruction needs `source`.
    pub fn missing_for_source(&self, source: usize) -> &BTreeSet<(usize, usize)> {
        &self.missing_per_source[source]
    }

    /// Targets whose on-disk length differed from the index.
    pub fn size_mismatch_targets(&self) -> &BTreeSet<usize> {
        &self.size_mismatch
    }

    /// Whether `target` needs a writable stream: any missing part or a
    /// wrong file size.
    pub(crate) fn needs_write(&self, target: usize) -> bool {
        !self.missing_per_target[target].is_empty() || self.size_mismatch.contains(&target)
    }

    /// True when no target has a missing part.
    pub fn is_empty(&self) -> bool {
        self.missing_per_target.iter().all(BTreeSet::is_empty)
    }
}
