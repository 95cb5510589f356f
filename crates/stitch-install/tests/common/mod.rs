//! Shared fixtures for installer scenarios.

use std::sync::Arc;

use stitch_index::PatchIndex;
use stitch_index::mem::{MemoryIndex, MemoryTarget};

/// Deterministic non-trivial byte pattern.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

/// One target `game/data.bin` built from `source` split into equal parts,
/// all reconstructed from source patch 0 at matching offsets.
pub fn split_index(source: &[u8], part_count: usize) -> Arc<dyn PatchIndex> {
    let part_size = source.len() / part_count;
    assert_eq!(source.len() % part_count, 0);

    let mut index = MemoryIndex::new("2024.03.21.0000.0001");
    index.add_source(source.len() as u64);
    let mut target = MemoryTarget::new("game/data.bin", source.len() as u64);
    for i in 0..part_count {
        let offset = i * part_size;
        target.push_source_part(
            offset as u64,
            0,
            offset as u64,
            &source[offset..offset + part_size],
        );
    }
    index.push_target(target);
    Arc::new(index)
}

/// Write the target file under `root` with the given contents.
pub fn seed_target(root: &std::path::Path, contents: &[u8]) {
    let path = root.join("game/data.bin");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

pub fn read_target(root: &std::path::Path) -> Vec<u8> {
    std::fs::read(root.join("game/data.bin")).unwrap()
}
