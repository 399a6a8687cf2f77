//! Size prediction for every RomFS region, computed before any byte is written.

use crate::raw::{
    ivfc::{IVFC_BLOCK_SIZE, IVFC_HASH_SIZE, IVFC_HEADER_SLOT, IVFC_LEVEL_COUNT},
    romfs::{
        ROMFS_DATA_ALIGN, ROMFS_INFO_HEADER_SIZE, RomFsDirEntry, RomFsFileEntry, padded_name_len,
    },
};

use super::source::{DirNode, SourceTree};

/// Alignment of the metadata block that precedes the data region.
const METADATA_ALIGN: u64 = 0x10;

/// One level of the IVFC hash tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IvfcLevel {
    /// Byte offset of the level inside the image
    pub offset: u64,
    /// Unpadded size of the level
    pub size: u64,
    /// Offset of the level in the hash tree's logical address space
    pub logical_offset: u64,
}

impl IvfcLevel {
    /// Size of the level once padded to the hash block size.
    pub fn padded_size(&self) -> u64 {
        align64(self.size, IVFC_BLOCK_SIZE)
    }

    /// Number of hash blocks covering this level.
    pub fn block_count(&self) -> u64 {
        self.padded_size() / IVFC_BLOCK_SIZE
    }
}

/// Exact byte layout of a RomFS image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RomFsLayout {
    dir_count: u32,
    file_count: u32,
    dir_bucket_count: u32,
    file_bucket_count: u32,
    dir_table_len: u32,
    file_table_len: u32,
    data_len: u64,
    levels: [IvfcLevel; IVFC_LEVEL_COUNT],
    total_size: u64,
}

impl RomFsLayout {
    /// Layout of an image that is not emitted at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Plan the layout of `tree`.
    ///
    /// A tree with neither files nor subdirectories yields an empty layout.
    pub fn plan(tree: &SourceTree) -> Result<Self, LayoutError> {
        if tree.is_empty() {
            return Ok(Self::empty());
        }

        let mut totals = Totals::default();
        totals.visit_dir(tree.root(), true);

        let dir_count = u32::try_from(totals.dirs).map_err(|_| LayoutError::TableOverflow {
            table: "directory count",
            size: totals.dirs,
        })?;
        let file_count = u32::try_from(totals.files).map_err(|_| LayoutError::TableOverflow {
            table: "file count",
            size: totals.files,
        })?;

        let dir_bucket_count = hash_table_count(dir_count);
        let file_bucket_count = hash_table_count(file_count);

        let metadata_len = align64(
            u64::from(ROMFS_INFO_HEADER_SIZE)
                + bucket_bytes(dir_bucket_count)
                + totals.dir_table_len
                + bucket_bytes(file_bucket_count)
                + totals.file_table_len,
            METADATA_ALIGN,
        );
        // Every table offset and the data offset are 32-bit fields
        if metadata_len > u64::from(u32::MAX) {
            return Err(LayoutError::TableOverflow {
                table: "metadata",
                size: metadata_len,
            });
        }

        let mut levels = [IvfcLevel::default(); IVFC_LEVEL_COUNT];
        levels[3].size = metadata_len + totals.data.0;
        levels[2].size = hashes_for(levels[3].size);
        levels[1].size = hashes_for(levels[2].size);
        levels[0].size = hashes_for(levels[1].size) + IVFC_HEADER_SLOT;

        // Image order is level 0, 3, 1, 2
        levels[0].offset = 0;
        levels[3].offset = levels[0].padded_size();
        levels[1].offset = levels[3].offset + levels[3].padded_size();
        levels[2].offset = levels[1].offset + levels[1].padded_size();

        levels[1].logical_offset = 0;
        levels[2].logical_offset = levels[1].logical_offset + levels[1].padded_size();
        levels[3].logical_offset = levels[2].logical_offset + levels[2].padded_size();

        let total_size = levels.iter().map(IvfcLevel::padded_size).sum();

        Ok(Self {
            dir_count,
            file_count,
            dir_bucket_count,
            file_bucket_count,
            // Both fit: each is bounded by metadata_len
            dir_table_len: totals.dir_table_len as u32,
            file_table_len: totals.file_table_len as u32,
            data_len: totals.data.0,
            levels,
            total_size,
        })
    }

    /// True when no RomFS section is emitted.
    pub fn is_empty(&self) -> bool {
        self.total_size == 0
    }

    /// Total image size in bytes, every level padded to the block size.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Number of directory entries, root included.
    pub fn dir_count(&self) -> u32 {
        self.dir_count
    }

    /// Number of file entries.
    pub fn file_count(&self) -> u32 {
        self.file_count
    }

    /// Number of directory hash buckets.
    pub fn dir_bucket_count(&self) -> u32 {
        self.dir_bucket_count
    }

    /// Number of file hash buckets.
    pub fn file_bucket_count(&self) -> u32 {
        self.file_bucket_count
    }

    /// Directory table length in bytes.
    pub fn dir_table_len(&self) -> u32 {
        self.dir_table_len
    }

    /// File table length in bytes.
    pub fn file_table_len(&self) -> u32 {
        self.file_table_len
    }

    /// File data region length in bytes.
    pub fn data_len(&self) -> u64 {
        self.data_len
    }

    /// Hash tree levels, index 0 being the master hash level.
    pub fn levels(&self) -> &[IvfcLevel; IVFC_LEVEL_COUNT] {
        &self.levels
    }

    /// Offset of the directory hash table inside level 3.
    pub fn dir_hash_table_offset(&self) -> u32 {
        ROMFS_INFO_HEADER_SIZE
    }

    /// Offset of the directory table inside level 3.
    pub fn dir_table_offset(&self) -> u32 {
        self.dir_hash_table_offset() + self.dir_bucket_count * 4
    }

    /// Offset of the file hash table inside level 3.
    pub fn file_hash_table_offset(&self) -> u32 {
        self.dir_table_offset() + self.dir_table_len
    }

    /// Offset of the file table inside level 3.
    pub fn file_table_offset(&self) -> u32 {
        self.file_hash_table_offset() + self.file_bucket_count * 4
    }

    /// Offset of the data region inside level 3.
    pub fn data_offset(&self) -> u32 {
        align64(
            u64::from(self.file_table_offset() + self.file_table_len),
            METADATA_ALIGN,
        ) as u32
    }

    /// Size of the master hash stored after the IVFC header.
    pub fn master_hash_size(&self) -> u32 {
        (self.levels[1].block_count() * IVFC_HASH_SIZE) as u32
    }
}

/// Running sums collected in one traversal of the tree.
#[derive(Default)]
struct Totals {
    dirs: u64,
    files: u64,
    dir_table_len: u64,
    file_table_len: u64,
    data: DataCursor,
}

impl Totals {
    fn visit_dir(&mut self, dir: &DirNode, is_root: bool) {
        self.dirs += 1;
        self.dir_table_len += if is_root {
            size_of::<RomFsDirEntry>() as u64
        } else {
            entry_len(size_of::<RomFsDirEntry>(), dir.name())
        };

        for file in dir.files() {
            self.files += 1;
            self.file_table_len += entry_len(size_of::<RomFsFileEntry>(), file.name());
            self.data.place(file.size());
        }

        for child in dir.dirs() {
            self.visit_dir(child, false);
        }
    }
}

/// Position in the data region; each file starts on a 0x10 boundary.
#[derive(Debug, Clone, Copy, Default)]
pub(super) struct DataCursor(pub(super) u64);

impl DataCursor {
    /// Reserve `size` bytes and return where they start.
    pub(super) fn place(&mut self, size: u64) -> u64 {
        let start = align64(self.0, ROMFS_DATA_ALIGN);
        self.0 = start + size;
        start
    }
}

fn entry_len(header: usize, name: &[u16]) -> u64 {
    header as u64 + u64::from(padded_name_len(name_byte_len(name)))
}

/// Size in bytes of a UTF-16 name.
pub(super) fn name_byte_len(name: &[u16]) -> u32 {
    (name.len() * 2) as u32
}

fn bucket_bytes(count: u32) -> u64 {
    u64::from(count) * 4
}

/// Bytes of digests needed to cover `size` bytes of the level below.
fn hashes_for(size: u64) -> u64 {
    align64(size, IVFC_BLOCK_SIZE) / IVFC_BLOCK_SIZE * IVFC_HASH_SIZE
}

/// Calculate hash table size using pseudo-prime algorithm.
///
/// Only multiples of primes up to 17 are skipped, so the result is not
/// necessarily prime. Bucket counts are part of the format and must match.
pub fn hash_table_count(num_entries: u32) -> u32 {
    if num_entries < 3 {
        3
    } else if num_entries < 19 {
        num_entries | 1
    } else {
        let mut n = num_entries;
        while n % 2 == 0
            || n % 3 == 0
            || n % 5 == 0
            || n % 7 == 0
            || n % 11 == 0
            || n % 13 == 0
            || n % 17 == 0
        {
            n += 1;
        }
        n
    }
}

/// Align value to specified alignment.
pub(super) fn align64(value: u64, alignment: u64) -> u64 {
    let mask = alignment - 1;
    (value + mask) & !mask
}

/// Error returned by [`RomFsLayout::plan`].
#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    /// A table does not fit in the 32-bit offset fields of the format.
    #[error("romfs {table} too large: {size:#x}")]
    TableOverflow { table: &'static str, size: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_table_count_small() {
        assert_eq!(hash_table_count(0), 3);
        assert_eq!(hash_table_count(1), 3);
        assert_eq!(hash_table_count(2), 3);
        assert_eq!(hash_table_count(3), 3);
        assert_eq!(hash_table_count(4), 5);
        assert_eq!(hash_table_count(9), 9);
        assert_eq!(hash_table_count(18), 19);
    }

    #[test]
    fn test_hash_table_count_probe() {
        // 25, 26, 27, 28 rejected
        assert_eq!(hash_table_count(25), 29);
        assert_eq!(hash_table_count(19), 19);
        assert_eq!(hash_table_count(20), 23);
        // 19 * 19 and 19 * 23 are composite but survive the probe
        assert_eq!(hash_table_count(361), 361);
        assert_eq!(hash_table_count(437), 437);
        assert_eq!(hash_table_count(360), 361);
    }

    #[test]
    fn test_empty_tree_has_no_image() {
        let layout = RomFsLayout::plan(&SourceTree::new()).unwrap();
        assert!(layout.is_empty());
        assert_eq!(layout.total_size(), 0);
    }

    #[test]
    fn test_single_file_layout() {
        let mut tree = SourceTree::new();
        tree.add_file("/a.txt", vec![1u8, 2, 3, 4]).unwrap();
        let layout = RomFsLayout::plan(&tree).unwrap();

        assert_eq!(layout.dir_count(), 1);
        assert_eq!(layout.file_count(), 1);
        assert_eq!(layout.dir_bucket_count(), 3);
        assert_eq!(layout.file_bucket_count(), 3);
        assert_eq!(layout.dir_table_len(), 0x18);
        // "a.txt" is 10 bytes of UTF-16, padded to 12
        assert_eq!(layout.file_table_len(), 0x20 + 12);
        assert_eq!(layout.data_len(), 4);

        assert_eq!(layout.dir_hash_table_offset(), 0x28);
        assert_eq!(layout.dir_table_offset(), 0x34);
        assert_eq!(layout.file_hash_table_offset(), 0x4c);
        assert_eq!(layout.file_table_offset(), 0x58);
        assert_eq!(layout.data_offset(), 0x90);

        let levels = layout.levels();
        assert_eq!(levels[3].size, 0x94);
        assert_eq!(levels[2].size, 0x20);
        assert_eq!(levels[1].size, 0x20);
        assert_eq!(levels[0].size, 0x20 + 0x60);
        assert_eq!(levels[0].offset, 0);
        assert_eq!(levels[3].offset, 0x1000);
        assert_eq!(levels[1].offset, 0x2000);
        assert_eq!(levels[2].offset, 0x3000);
        assert_eq!(levels[2].logical_offset, 0x1000);
        assert_eq!(levels[3].logical_offset, 0x2000);
        assert_eq!(layout.master_hash_size(), 0x20);
        assert_eq!(layout.total_size(), 0x4000);
    }

    #[test]
    fn test_data_alignment_between_files() {
        let mut tree = SourceTree::new();
        tree.add_file("/a", vec![0u8; 5]).unwrap();
        tree.add_file("/b", vec![0u8; 0x11]).unwrap();
        tree.add_file("/c", vec![0u8; 1]).unwrap();
        let layout = RomFsLayout::plan(&tree).unwrap();
        // a: 0..5, b: 0x10..0x21, c: 0x30..0x31
        assert_eq!(layout.data_len(), 0x31);
    }

    #[test]
    fn test_root_name_not_counted() {
        let mut tree = SourceTree::new();
        tree.add_file("/sub/b.bin", Vec::<u8>::new()).unwrap();
        let layout = RomFsLayout::plan(&tree).unwrap();
        assert_eq!(layout.dir_count(), 2);
        assert_eq!(layout.file_count(), 1);
        // root 0x18, "sub" 0x18 + 8
        assert_eq!(layout.dir_table_len(), 0x18 + 0x18 + 8);
        assert_eq!(layout.data_len(), 0);
    }

    #[test]
    fn test_multi_block_levels() {
        let mut tree = SourceTree::new();
        tree.add_file("/big", vec![0u8; 0x200_0000]).unwrap();
        let layout = RomFsLayout::plan(&tree).unwrap();
        let levels = layout.levels();
        let blocks3 = levels[3].padded_size() / 0x1000;
        assert_eq!(levels[2].size, blocks3 * 0x20);
        assert_eq!(levels[1].size, levels[2].block_count() * 0x20);
        assert_eq!(levels[0].size, levels[1].block_count() * 0x20 + 0x60);
        assert_eq!(
            layout.total_size(),
            levels.iter().map(IvfcLevel::padded_size).sum::<u64>()
        );
    }
}
