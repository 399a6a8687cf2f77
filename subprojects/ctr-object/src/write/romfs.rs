//! RomFS (read-only filesystem) builder.
//!
//! Building happens in three steps:
//!
//! 1. A [`SourceTree`] is imported from a host directory (or assembled in memory).
//! 2. [`RomFsLayout::plan`] predicts the exact size of every region, so the
//!    image can be allocated once.
//! 3. [`RomFsBuilder::build_into`] serializes the tables and file data into
//!    level 3, then hashes level 3 up to the master hash in level 0.
//!
//! # Example
//!
//! ```no_run
//! use ctr_object::write::RomFsBuilder;
//!
//! let romfs = RomFsBuilder::from_directory("romfs")
//!     .expect("failed to import romfs directory")
//!     .build()
//!     .expect("failed to build romfs");
//! println!("romfs is {:#x} bytes", romfs.len());
//! ```

mod ivfc;
mod layout;
mod source;
mod table;

use std::{
    path::{Path, PathBuf},
    vec::Vec,
};

use tracing::{debug, info, warn};

use crate::raw::ivfc::IVFC_HEADER_SLOT;

pub use self::{
    layout::{IvfcLevel, LayoutError, RomFsLayout, hash_table_count},
    source::{
        AcceptAll, DirNode, EntryFilter, EntryKind, FileNode, FileSource, ImportError, SkipHidden,
        SourceTree,
    },
    table::calc_path_hash,
};

/// Media unit of the NCCH container; the superblock hash covers level 0 padded to it.
pub const NCCH_MEDIA_UNIT: u64 = 0x200;

/// Data offset stored for zero-size files.
///
/// Zero-size files occupy no data, so the stored offset is a convention.
/// Different builders disagree on the value; both are accepted by readers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EmptyFileOffset {
    /// Store 0x00
    #[default]
    Zero,
    /// Store 0x40
    Legacy,
}

impl EmptyFileOffset {
    /// Raw offset written into the file entry.
    pub const fn value(self) -> u64 {
        match self {
            Self::Zero => 0x00,
            Self::Legacy => 0x40,
        }
    }
}

/// Builder for constructing RomFS images.
#[derive(Debug, Clone)]
pub struct RomFsBuilder {
    tree: SourceTree,
    layout: RomFsLayout,
    empty_file_offset: EmptyFileOffset,
}

impl RomFsBuilder {
    /// Create a builder for an already assembled tree, planning its layout.
    pub fn new(tree: SourceTree) -> Result<Self, LayoutError> {
        let layout = RomFsLayout::plan(&tree)?;
        debug!(
            dirs = layout.dir_count(),
            files = layout.file_count(),
            dir_buckets = layout.dir_bucket_count(),
            file_buckets = layout.file_bucket_count(),
            data_len = layout.data_len(),
            total_size = layout.total_size(),
            "romfs.layout.planned"
        );

        Ok(Self {
            tree,
            layout,
            empty_file_offset: EmptyFileOffset::default(),
        })
    }

    /// Build from a directory on the filesystem.
    ///
    /// Recursively adds all files from the given directory. If the directory
    /// cannot be opened the builder is empty and no RomFS is produced.
    pub fn from_directory(path: impl AsRef<Path>) -> Result<Self, FromDirectoryError> {
        Self::from_directory_filtered(path, AcceptAll)
    }

    /// Build from a directory on the filesystem, keeping only entries accepted by `filter`.
    pub fn from_directory_filtered(
        path: impl AsRef<Path>,
        filter: impl EntryFilter,
    ) -> Result<Self, FromDirectoryError> {
        let path = path.as_ref();

        let tree = match SourceTree::import(path, &filter) {
            Ok(tree) => tree,
            Err(ImportError::RootUnavailable { path, source }) => {
                warn!(path = %path.display(), error = %source, "romfs.import.root_unavailable");
                SourceTree::new()
            }
            Err(err) => return Err(err.into()),
        };

        debug!(
            root = %path.display(),
            dirs = tree.dir_count(),
            files = tree.file_count(),
            "romfs.import.complete"
        );

        Ok(Self::new(tree)?)
    }

    /// Set the data offset convention for zero-size files.
    pub fn empty_file_offset(mut self, convention: EmptyFileOffset) -> Self {
        self.empty_file_offset = convention;
        self
    }

    /// Source tree the image is built from.
    pub fn tree(&self) -> &SourceTree {
        &self.tree
    }

    /// Planned layout.
    pub fn layout(&self) -> &RomFsLayout {
        &self.layout
    }

    /// Size of the finished image; 0 means no RomFS section is emitted.
    pub fn size(&self) -> u64 {
        self.layout.total_size()
    }

    /// Build the image into a caller-owned buffer of exactly [`size`](Self::size) bytes.
    ///
    /// The buffer is zeroed first. On error its contents are unspecified.
    pub fn build_into(&self, dst: &mut [u8]) -> Result<(), BuildError> {
        let expected = self.layout.total_size();
        if dst.len() as u64 != expected {
            return Err(BuildError::BufferSize {
                expected,
                actual: dst.len() as u64,
            });
        }
        if self.layout.is_empty() {
            return Ok(());
        }

        dst.fill(0);

        let level3 = &self.layout.levels()[3];
        let start = level3.offset as usize;
        let end = start + level3.size as usize;
        table::write_level3(
            &mut dst[start..end],
            &self.layout,
            &self.tree,
            self.empty_file_offset,
        )?;
        ivfc::write_hash_tree(dst, &self.layout);

        info!(
            dirs = self.layout.dir_count(),
            files = self.layout.file_count(),
            size = expected,
            "romfs.build.complete"
        );
        Ok(())
    }

    /// Build the complete RomFS image.
    pub fn build(&self) -> Result<RomFsImage, BuildError> {
        let size = self.layout.total_size();
        let len = usize::try_from(size).map_err(|_| BuildError::Allocation { size })?;

        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(len)
            .map_err(|_| BuildError::Allocation { size })?;
        bytes.resize(len, 0);

        self.build_into(&mut bytes)?;

        Ok(RomFsImage {
            bytes,
            layout: self.layout.clone(),
        })
    }
}

/// A finished RomFS image together with its layout.
#[derive(Debug, Clone)]
pub struct RomFsImage {
    bytes: Vec<u8>,
    layout: RomFsLayout,
}

impl RomFsImage {
    /// Image bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the image, returning its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Image size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True when there is no RomFS section to embed.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Layout the image was built with.
    pub fn layout(&self) -> &RomFsLayout {
        &self.layout
    }

    /// Level 0: IVFC header followed by the master hash.
    pub fn level0(&self) -> &[u8] {
        let level = &self.layout.levels()[0];
        &self.bytes[level.offset as usize..(level.offset + level.size) as usize]
    }

    /// Master hash: one digest per level 1 block.
    pub fn master_hash(&self) -> &[u8] {
        let level0 = self.level0();
        level0.get(IVFC_HEADER_SLOT as usize..).unwrap_or_default()
    }

    /// Size of the region the container's superblock hash covers.
    pub fn hash_region_size(&self) -> u64 {
        let size = self.layout.levels()[0].size;
        size.div_ceil(NCCH_MEDIA_UNIT) * NCCH_MEDIA_UNIT
    }

    /// SHA-256 of the hash region, as stored in the NCCH header.
    ///
    /// Returns `None` for an empty image.
    pub fn superblock_hash(&self) -> Option<[u8; 0x20]> {
        if self.is_empty() {
            return None;
        }
        let end = self.hash_region_size() as usize;
        Some(ivfc::sha256(&self.bytes[..end]))
    }
}

/// Error returned by [`RomFsBuilder::build`] and [`RomFsBuilder::build_into`].
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// I/O error while reading a planned host file.
    #[error("I/O error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A file's size changed between planning and population.
    #[error("{} changed size: planned {expected} bytes, found {actual}", path.display())]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },
    /// The output buffer could not be allocated.
    #[error("cannot allocate {size:#x} bytes for romfs image")]
    Allocation { size: u64 },
    /// The caller's buffer does not match the planned size.
    #[error("romfs buffer is {actual:#x} bytes, expected {expected:#x}")]
    BufferSize { expected: u64, actual: u64 },
    /// An entry fell outside its planned table.
    #[error("romfs {table} table overrun at offset {offset:#x}")]
    TableOverrun { table: &'static str, offset: u32 },
}

/// Error returned by [`RomFsBuilder::from_directory`].
#[derive(Debug, thiserror::Error)]
pub enum FromDirectoryError {
    /// The directory tree could not be imported.
    #[error(transparent)]
    Import(#[from] ImportError),
    /// The imported tree does not fit the format.
    #[error(transparent)]
    Layout(#[from] LayoutError),
}
