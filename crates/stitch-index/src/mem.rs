//! In-memory patch index with SHA-256 part verification.
//!
//! Patch-type parts are raw copies of a source byte range; non-patch parts
//! carry their bytes literally. Real deployments consume indices produced
//! offline by an index builder, but the in-memory form is enough for tests
//! and for embedders that assemble small indices programmatically.

use std::io::{self, ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::index::{IndexPart, IndexTarget, PatchIndex, VerifyOutcome};
use crate::io::{SourceRead, TargetStore};

#[derive(Debug, Default)]
pub struct MemoryIndex {
    version_name: String,
    version_file_ver: String,
    version_file_bck: String,
    targets: Vec<MemoryTarget>,
    source_sizes: Vec<u64>,
}

impl MemoryIndex {
    pub fn new(version_name: impl Into<String>) -> Self {
        let version_name = version_name.into();
        Self {
            version_file_ver: format!("{version_name}.ver"),
            version_file_bck: format!("{version_name}.bck"),
            version_name,
            targets: Vec::new(),
            source_sizes: Vec::new(),
        }
    }

    /// Register a source patch of `size` bytes, returning its index.
    pub fn add_source(&mut self, size: u64) -> usize {
        self.source_sizes.push(size);
        self.source_sizes.len() - 1
    }

    /// Append a target, returning its index.
    pub fn push_target(&mut self, target: MemoryTarget) -> usize {
        self.targets.push(target);
        self.targets.len() - 1
    }
}

impl PatchIndex for MemoryIndex {
    fn version_name(&self) -> &str {
        &self.version_name
    }

    fn version_file_ver(&self) -> &str {
        &self.version_file_ver
    }

    fn version_file_bck(&self) -> &str {
        &self.version_file_bck
    }

    fn target_count(&self) -> usize {
        self.targets.len()
    }

    fn target(&self, target_index: usize) -> &dyn IndexTarget {
        &self.targets[target_index]
    }

    fn source_count(&self) -> usize {
        self.source_sizes.len()
    }

    fn source_last_ptr(&self, source_index: usize) -> u64 {
        self.source_sizes[source_index]
    }
}

#[derive(Debug)]
pub struct MemoryTarget {
    relative_path: PathBuf,
    file_size: u64,
    parts: Vec<MemoryPart>,
}

impl MemoryTarget {
    pub fn new(relative_path: impl Into<PathBuf>, file_size: u64) -> Self {
        Self {
            relative_path: relative_path.into(),
            file_size,
            parts: Vec::new(),
        }
    }

    /// Append a part reconstructed by copying `expected.len()` bytes from
    /// `source_offset` of source patch `source_index`. The part verifies
    /// against the SHA-256 of `expected`.
    pub fn push_source_part(
        &mut self,
        target_offset: u64,
        source_index: usize,
        source_offset: u64,
        expected: &[u8],
    ) {
        self.parts.push(MemoryPart {
            target_offset,
            target_size: expected.len(),
            checksum: Some(Sha256::digest(expected).into()),
            origin: PartOrigin::Source {
                source_index,
                source_offset,
                max_source_end: source_offset + expected.len() as u64,
            },
        });
    }

    /// Append a source-backed part with no checksum. Verification reports
    /// [`VerifyOutcome::Unverifiable`]; only useful for exercising the
    /// broken-index path.
    pub fn push_unverifiable_part(
        &mut self,
        target_offset: u64,
        target_size: usize,
        source_index: usize,
        source_offset: u64,
    ) {
        self.parts.push(MemoryPart {
            target_offset,
            target_size,
            checksum: None,
            origin: PartOrigin::Source {
                source_index,
                source_offset,
                max_source_end: source_offset + target_size as u64,
            },
        });
    }

    /// Append a part whose bytes are embedded in the index.
    pub fn push_literal_part(&mut self, target_offset: u64, bytes: Vec<u8>) {
        self.parts.push(MemoryPart {
            target_offset,
            target_size: bytes.len(),
            checksum: Some(Sha256::digest(&bytes).into()),
            origin: PartOrigin::Literal(bytes),
        });
    }
}

impl IndexTarget for MemoryTarget {
    fn relative_path(&self) -> &Path {
        &self.relative_path
    }

    fn file_size(&self) -> u64 {
        self.file_size
    }

    fn part_count(&self) -> usize {
        self.parts.len()
    }

    fn part(&self, part_index: usize) -> &dyn IndexPart {
        &self.parts[part_index]
    }
}

#[derive(Debug)]
enum PartOrigin {
    Source {
        source_index: usize,
        source_offset: u64,
        max_source_end: u64,
    },
    Literal(Vec<u8>),
}

#[derive(Debug)]
pub struct MemoryPart {
    target_offset: u64,
    target_size: usize,
    checksum: Option<[u8; 32]>,
    origin: PartOrigin,
}

#[async_trait]
impl IndexPart for MemoryPart {
    fn target_offset(&self) -> u64 {
        self.target_offset
    }

    fn target_size(&self) -> usize {
        self.target_size
    }

    fn is_from_source(&self) -> bool {
        matches!(self.origin, PartOrigin::Source { .. })
    }

    fn source_index(&self) -> usize {
        match self.origin {
            PartOrigin::Source { source_index, .. } => source_index,
            PartOrigin::Literal(_) => 0,
        }
    }

    fn source_offset(&self) -> u64 {
        match self.origin {
            PartOrigin::Source { source_offset, .. } => source_offset,
            PartOrigin::Literal(_) => 0,
        }
    }

    fn max_source_end(&self) -> u64 {
        match self.origin {
            PartOrigin::Source { max_source_end, .. } => max_source_end,
            PartOrigin::Literal(_) => 0,
        }
    }

    async fn verify(&self, target: &mut dyn TargetStore) -> io::Result<VerifyOutcome> {
        let Some(checksum) = &self.checksum else {
            return Ok(VerifyOutcome::Unverifiable);
        };
        target.seek(SeekFrom::Start(self.target_offset)).await?;
        let mut buf = vec![0u8; self.target_size];
        match AsyncReadExt::read_exact(&mut *target, &mut buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                return Ok(VerifyOutcome::NotEnoughData);
            }
            Err(e) => return Err(e),
        }
        let digest: [u8; 32] = Sha256::digest(&buf).into();
        if digest == *checksum {
            Ok(VerifyOutcome::Pass)
        } else {
            Ok(VerifyOutcome::Mismatch)
        }
    }

    async fn reconstruct(&self, source: &mut dyn SourceRead, out: &mut [u8]) -> io::Result<()> {
        match &self.origin {
            PartOrigin::Source { .. } => source.read_exact(&mut out[..self.target_size]).await,
            PartOrigin::Literal(bytes) => {
                out[..self.target_size].copy_from_slice(bytes);
                Ok(())
            }
        }
    }

    fn reconstruct_without_source(&self, out: &mut [u8]) {
        match &self.origin {
            PartOrigin::Literal(bytes) => out[..self.target_size].copy_from_slice(bytes),
            // Contract violation by the caller; zero-fill rather than panic.
            PartOrigin::Source { .. } => out[..self.target_size].fill(0),
        }
    }
}
