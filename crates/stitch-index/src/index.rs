//! The patch index traits.

use std::io;
use std::path::Path;

use async_trait::async_trait;

use crate::io::{SourceRead, TargetStore};

/// Result of verifying one part against its target store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// On-disk bytes match the index.
    Pass,
    /// The target store ended before the part's byte range.
    NotEnoughData,
    /// The bytes are present but do not match.
    Mismatch,
    /// The index carries no way to verify this part. An index always
    /// promises enough data to verify, so this indicates a broken index.
    Unverifiable,
}

/// A precomputed description of target files, their parts, and the source
/// patches the parts are reconstructed from.
///
/// Ownership is external; the installer borrows an index for its lifetime
/// and never mutates it.
pub trait PatchIndex: Send + Sync {
    /// Version this index installs, e.g. `"2024.03.21.0000.0001"`.
    fn version_name(&self) -> &str;

    /// Name of the primary version sidecar file, relative to the local root.
    fn version_file_ver(&self) -> &str;

    /// Name of the backup version sidecar file, relative to the local root.
    fn version_file_bck(&self) -> &str;

    fn target_count(&self) -> usize;

    fn target(&self, target_index: usize) -> &dyn IndexTarget;

    fn source_count(&self) -> usize;

    /// Exclusive upper bound on byte offsets within a source patch.
    fn source_last_ptr(&self, source_index: usize) -> u64;
}

/// One target file: a relative path, a final size, and an ordered list of
/// non-overlapping parts covering the file.
pub trait IndexTarget: Send + Sync {
    fn relative_path(&self) -> &Path;

    fn file_size(&self) -> u64;

    fn part_count(&self) -> usize;

    fn part(&self, part_index: usize) -> &dyn IndexPart;
}

/// A contiguous byte region of one target file.
///
/// Verification and reconstruction metadata is opaque to the installer; it
/// invokes the three operations and dispatches on their results.
#[async_trait]
pub trait IndexPart: Send + Sync {
    /// Byte offset of this part within the target file.
    fn target_offset(&self) -> u64;

    /// Size of this part in the target file.
    fn target_size(&self) -> usize;

    /// Whether reconstruction reads from a source patch. When false, the
    /// part is synthesized from the index alone.
    fn is_from_source(&self) -> bool;

    /// Index of the source patch this part reads from. Meaningful only
    /// when [`is_from_source`](Self::is_from_source) is true.
    fn source_index(&self) -> usize;

    /// Byte offset within the source patch where reconstruction starts.
    fn source_offset(&self) -> u64;

    /// Exclusive upper bound on source offsets this part may read.
    fn max_source_end(&self) -> u64;

    /// Check the part's bytes in the target store.
    async fn verify(&self, target: &mut dyn TargetStore) -> io::Result<VerifyOutcome>;

    /// Read the bytes this part needs from `source` (starting at the
    /// current position) and write the part's `target_size` bytes into
    /// `out`.
    async fn reconstruct(&self, source: &mut dyn SourceRead, out: &mut [u8]) -> io::Result<()>;

    /// Fill `out` with the part's bytes using index-embedded data only.
    /// Callers only invoke this when [`is_from_source`](Self::is_from_source)
    /// is false.
    fn reconstruct_without_source(&self, out: &mut [u8]);
}
