use static_assertions::const_assert_eq;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, little_endian::*};

/// Marks an empty link: no sibling, no child, no file list, end of hash chain.
pub const ROMFS_UNUSED_ENTRY: u32 = 0xFFFF_FFFF;

/// Names are stored as UTF-16LE, zero-padded to this alignment.
pub const ROMFS_NAME_ALIGN: u32 = 4;

/// Every file's data starts on this boundary within the data region.
pub const ROMFS_DATA_ALIGN: u64 = 0x10;

/// Seed mixed into the parent offset before hashing an entry name.
pub const ROMFS_PATH_HASH_SEED: u32 = 123_456_789;

/// Location of one table inside level 3, relative to the info header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct RomFsSection {
    /// Offset from the start of the info header
    pub offset: U32,
    /// Size of the section in bytes
    pub size: U32,
}

const_assert_eq!(size_of::<RomFsSection>(), 0x8);

/// Level 3 info header (0x28 bytes) locating the hash tables, entry tables and
/// file data.
///
/// See: <https://www.3dbrew.org/wiki/RomFS#Level_3_Format>
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct RomFsInfoHeader {
    /// Size of this header (always 0x28)
    pub header_size: U32,
    /// Directory hash table
    pub dir_hash_table: RomFsSection,
    /// Directory metadata table
    pub dir_table: RomFsSection,
    /// File hash table
    pub file_hash_table: RomFsSection,
    /// File metadata table
    pub file_table: RomFsSection,
    /// Offset to file data region
    pub data_offset: U32,
}

const_assert_eq!(size_of::<RomFsInfoHeader>(), 0x28);

/// Size of [`RomFsInfoHeader`] as stored in its `header_size` field.
pub const ROMFS_INFO_HEADER_SIZE: u32 = size_of::<RomFsInfoHeader>() as u32;

/// RomFS directory entry (0x18 bytes + variable-length name).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct RomFsDirEntry {
    /// Offset to parent directory (0 for root, which is its own parent)
    pub parent_offset: U32,
    /// Offset to next sibling directory (ROMFS_UNUSED_ENTRY if none)
    pub sibling_offset: U32,
    /// Offset to first child directory (ROMFS_UNUSED_ENTRY if none)
    pub child_offset: U32,
    /// Offset to first file in this directory (ROMFS_UNUSED_ENTRY if none)
    pub file_offset: U32,
    /// Offset to next entry in hash bucket (ROMFS_UNUSED_ENTRY if end of chain)
    pub hash_sibling_offset: U32,
    /// Length of directory name in bytes
    pub name_len: U32,
    // Directory name follows (UTF-16LE, padded to 4 bytes)
}

const_assert_eq!(size_of::<RomFsDirEntry>(), 0x18);

/// RomFS file entry (0x20 bytes + variable-length name).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct RomFsFileEntry {
    /// Offset to parent directory
    pub parent_offset: U32,
    /// Offset to next sibling file (ROMFS_UNUSED_ENTRY if none)
    pub sibling_offset: U32,
    /// Offset to file data (relative to the data region)
    pub data_offset: U64,
    /// Size of file data in bytes
    pub data_size: U64,
    /// Offset to next entry in hash bucket (ROMFS_UNUSED_ENTRY if end of chain)
    pub hash_sibling_offset: U32,
    /// Length of file name in bytes
    pub name_len: U32,
    // File name follows (UTF-16LE, padded to 4 bytes)
}

const_assert_eq!(size_of::<RomFsFileEntry>(), 0x20);

/// Byte offset of an entry inside the directory or file table.
///
/// Entries are always 4-byte aligned, so the constructor rejects anything else,
/// including [`ROMFS_UNUSED_ENTRY`]. A missing link is `Option::<TableOffset>::None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableOffset(u32);

impl TableOffset {
    /// Offset of the root directory entry.
    pub const ROOT: Self = Self(0);

    /// Wrap a raw table offset, rejecting unaligned values.
    pub const fn new(raw: u32) -> Option<Self> {
        if raw % ROMFS_NAME_ALIGN != 0 {
            return None;
        }
        Some(Self(raw))
    }

    /// Raw offset value.
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Offset as a slice index into the table.
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Decode an on-disk link field.
    pub const fn from_link(raw: u32) -> Option<Self> {
        if raw == ROMFS_UNUSED_ENTRY {
            return None;
        }
        Self::new(raw)
    }

    /// Encode an optional link into its on-disk form.
    pub const fn into_link(link: Option<Self>) -> u32 {
        match link {
            Some(offset) => offset.0,
            None => ROMFS_UNUSED_ENTRY,
        }
    }
}

/// Size of an entry name once padded for storage.
pub const fn padded_name_len(name_len: u32) -> u32 {
    (name_len + ROMFS_NAME_ALIGN - 1) & !(ROMFS_NAME_ALIGN - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_offset_rejects_unaligned() {
        assert_eq!(TableOffset::new(0x18).map(TableOffset::get), Some(0x18));
        assert!(TableOffset::new(0x1a).is_none());
        assert!(TableOffset::new(ROMFS_UNUSED_ENTRY).is_none());
    }

    #[test]
    fn test_link_encoding() {
        assert_eq!(TableOffset::into_link(None), ROMFS_UNUSED_ENTRY);
        assert_eq!(TableOffset::into_link(Some(TableOffset::ROOT)), 0);
        assert_eq!(TableOffset::from_link(ROMFS_UNUSED_ENTRY), None);
        assert_eq!(TableOffset::from_link(0x30), TableOffset::new(0x30));
    }

    #[test]
    fn test_padded_name_len() {
        assert_eq!(padded_name_len(0), 0);
        assert_eq!(padded_name_len(2), 4);
        assert_eq!(padded_name_len(10), 12);
        assert_eq!(padded_name_len(12), 12);
    }
}
