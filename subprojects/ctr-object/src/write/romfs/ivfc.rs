//! IVFC hash tree: per-block SHA-256 digests, built from level 3 upwards.

use std::ops::Range;

use zerocopy::IntoBytes;

use crate::raw::ivfc::{
    IVFC_BLOCK_SIZE, IVFC_BLOCK_SIZE_LOG2, IVFC_HASH_SIZE, IVFC_HEADER_SLOT, IVFC_MAGIC,
    IVFC_ROMFS_ID, IvfcHeader, IvfcLevelHeader,
};

use super::layout::{IvfcLevel, RomFsLayout};

/// Write the IVFC header and fill levels 2, 1 and 0 from the level below each.
///
/// `image` must be the whole image with level 3 already populated.
pub(super) fn write_hash_tree(image: &mut [u8], layout: &RomFsLayout) {
    let levels = layout.levels();

    write_header(&mut image[..size_of::<IvfcHeader>()], layout);

    // Each level depends on the finished level below it
    for level in (0..3).rev() {
        let src = block_range(&levels[level + 1]);
        let dst = digest_range(levels, level);
        let (src, dst) = split_disjoint(image, src, dst);
        hash_blocks(src, dst);
    }
}

fn write_header(dst: &mut [u8], layout: &RomFsLayout) {
    let levels = layout.levels();
    let level_header = |level: &IvfcLevel| IvfcLevelHeader {
        logical_offset: level.logical_offset.into(),
        hash_data_size: level.size.into(),
        block_size_log2: IVFC_BLOCK_SIZE_LOG2.into(),
        reserved: [0; 4],
    };

    let header = IvfcHeader {
        magic: IVFC_MAGIC,
        id: IVFC_ROMFS_ID.into(),
        master_hash_size: layout.master_hash_size().into(),
        levels: [
            level_header(&levels[1]),
            level_header(&levels[2]),
            level_header(&levels[3]),
        ],
        optional_size: 0u32.into(),
        reserved: [0; 4],
    };
    dst.copy_from_slice(header.as_bytes());
}

/// Whole blocks covering a level, padding included.
fn block_range(level: &IvfcLevel) -> Range<usize> {
    let start = level.offset as usize;
    start..start + level.padded_size() as usize
}

/// Where the digests of level `index + 1` are stored.
fn digest_range(levels: &[IvfcLevel], index: usize) -> Range<usize> {
    let mut start = levels[index].offset;
    if index == 0 {
        start += IVFC_HEADER_SLOT;
    }
    let len = levels[index + 1].block_count() * IVFC_HASH_SIZE;
    start as usize..(start + len) as usize
}

/// Borrow two non-overlapping ranges of `buf`, the first shared and the second mutable.
fn split_disjoint(buf: &mut [u8], src: Range<usize>, dst: Range<usize>) -> (&[u8], &mut [u8]) {
    if src.start >= dst.end {
        let (head, tail) = buf.split_at_mut(src.start);
        (&tail[..src.len()], &mut head[dst])
    } else {
        debug_assert!(src.end <= dst.start);
        let (head, tail) = buf.split_at_mut(dst.start);
        (&head[src], &mut tail[..dst.len()])
    }
}

/// Hash every block of `src` into consecutive digests of `dst`.
fn hash_blocks(src: &[u8], dst: &mut [u8]) {
    let block = IVFC_BLOCK_SIZE as usize;
    let digest = IVFC_HASH_SIZE as usize;

    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        src.par_chunks(block)
            .zip(dst.par_chunks_mut(digest))
            .for_each(|(block, out)| out.copy_from_slice(&sha256(block)));
    }

    #[cfg(not(feature = "parallel"))]
    {
        for (block, out) in src.chunks(block).zip(dst.chunks_mut(digest)) {
            out.copy_from_slice(&sha256(block));
        }
    }
}

/// Compute SHA256 hash of data.
pub(super) fn sha256(data: &[u8]) -> [u8; 0x20] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}
