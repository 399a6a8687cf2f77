use static_assertions::const_assert_eq;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, little_endian::*};

/// IVFC magic: "IVFC" in ASCII.
pub const IVFC_MAGIC: [u8; 4] = *b"IVFC";

/// IVFC format id used by RomFS images.
pub const IVFC_ROMFS_ID: u32 = 0x10000;

/// log2 of the hashed block size.
pub const IVFC_BLOCK_SIZE_LOG2: u32 = 12;

/// Hashed block size (0x1000 bytes).
pub const IVFC_BLOCK_SIZE: u64 = 1 << IVFC_BLOCK_SIZE_LOG2;

/// Size of one SHA-256 digest stored in a hash level.
pub const IVFC_HASH_SIZE: u64 = 0x20;

/// Number of levels in a RomFS hash tree, master hash level included.
pub const IVFC_LEVEL_COUNT: usize = 4;

/// Per-level descriptor for levels 1 to 3.
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct IvfcLevelHeader {
    /// Offset of the level in the logical (hash-tree) address space
    pub logical_offset: U64,
    /// Unpadded size of the level
    pub hash_data_size: U64,
    /// log2 of the level's block size
    pub block_size_log2: U32,
    /// Reserved, always zero
    pub reserved: [u8; 4],
}

const_assert_eq!(size_of::<IvfcLevelHeader>(), 0x18);

/// IVFC header (0x5C bytes) at the start of level 0, followed by the master hash.
///
/// See: <https://www.3dbrew.org/wiki/RomFS>
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct IvfcHeader {
    /// Magic "IVFC"
    pub magic: [u8; 4],
    /// Format id (0x10000 for RomFS)
    pub id: U32,
    /// Size of the master hash following the header
    pub master_hash_size: U32,
    /// Levels 1, 2 and 3
    pub levels: [IvfcLevelHeader; 3],
    /// Optional info size
    pub optional_size: U32,
    /// Reserved, always zero
    pub reserved: [u8; 4],
}

const_assert_eq!(size_of::<IvfcHeader>(), 0x5c);

/// Space reserved for [`IvfcHeader`] at the start of level 0.
pub const IVFC_HEADER_SLOT: u64 = (size_of::<IvfcHeader>() as u64 + 0xf) & !0xf;

const_assert_eq!(IVFC_HEADER_SLOT, 0x60);
