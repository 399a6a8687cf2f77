//! Level 3 serialization: info header, hash tables, entry tables and file data.

use std::{io::Read, path::Path, vec::Vec};

use fs_err as fs;
use zerocopy::{FromBytes, IntoBytes};

use crate::raw::romfs::{
    ROMFS_INFO_HEADER_SIZE, ROMFS_PATH_HASH_SEED, RomFsDirEntry, RomFsFileEntry, RomFsInfoHeader,
    RomFsSection, TableOffset, padded_name_len,
};

use super::{
    BuildError, EmptyFileOffset,
    layout::{DataCursor, RomFsLayout, name_byte_len},
    source::{DirNode, FileNode, FileSource, SourceTree},
};

/// Calculate path hash for hash table lookup.
///
/// The parent's table offset is mixed in, so equal names in different
/// directories land in different buckets.
pub fn calc_path_hash(parent_offset: u32, name: &[u16]) -> u32 {
    let mut hash = parent_offset ^ ROMFS_PATH_HASH_SEED;
    for &c in name {
        hash = hash.rotate_right(5) ^ u32::from(c);
    }
    hash
}

/// Serialize `tree` into `level3`, which must be exactly the planned level 3 size.
pub(super) fn write_level3(
    level3: &mut [u8],
    layout: &RomFsLayout,
    tree: &SourceTree,
    empty_file_offset: EmptyFileOffset,
) -> Result<(), BuildError> {
    let (header, rest) = level3.split_at_mut(ROMFS_INFO_HEADER_SIZE as usize);
    let (dir_hash, rest) = rest.split_at_mut(layout.dir_bucket_count() as usize * 4);
    let (dir_table, rest) = rest.split_at_mut(layout.dir_table_len() as usize);
    let (file_hash, rest) = rest.split_at_mut(layout.file_bucket_count() as usize * 4);
    let (file_table, rest) = rest.split_at_mut(layout.file_table_len() as usize);
    let file_table_end = layout.file_table_offset() + layout.file_table_len();
    let padding = (layout.data_offset() - file_table_end) as usize;
    let data = &mut rest[padding..];

    write_info_header(header, layout);

    let mut writer = TableWriter::new(dir_table, file_table, layout, empty_file_offset);
    writer.write_tree(tree.root())?;
    let jobs = writer.finish(dir_hash, file_hash);

    populate_data(data, &jobs)
}

fn write_info_header(dst: &mut [u8], layout: &RomFsLayout) {
    let header = RomFsInfoHeader {
        header_size: ROMFS_INFO_HEADER_SIZE.into(),
        dir_hash_table: RomFsSection {
            offset: layout.dir_hash_table_offset().into(),
            size: (layout.dir_bucket_count() * 4).into(),
        },
        dir_table: RomFsSection {
            offset: layout.dir_table_offset().into(),
            size: layout.dir_table_len().into(),
        },
        file_hash_table: RomFsSection {
            offset: layout.file_hash_table_offset().into(),
            size: (layout.file_bucket_count() * 4).into(),
        },
        file_table: RomFsSection {
            offset: layout.file_table_offset().into(),
            size: layout.file_table_len().into(),
        },
        data_offset: layout.data_offset().into(),
    };
    dst.copy_from_slice(header.as_bytes());
}

/// File contents waiting to be copied into the data region.
struct DataJob<'t> {
    file: &'t FileNode,
    offset: u64,
}

/// Writes directory and file entries, threading the sibling and hash chains.
struct TableWriter<'a, 't> {
    dir_table: &'a mut [u8],
    file_table: &'a mut [u8],
    dir_buckets: Vec<Option<TableOffset>>,
    file_buckets: Vec<Option<TableOffset>>,
    dir_cursor: u32,
    file_cursor: u32,
    data: DataCursor,
    empty_file_offset: EmptyFileOffset,
    jobs: Vec<DataJob<'t>>,
}

impl<'a, 't> TableWriter<'a, 't> {
    fn new(
        dir_table: &'a mut [u8],
        file_table: &'a mut [u8],
        layout: &RomFsLayout,
        empty_file_offset: EmptyFileOffset,
    ) -> Self {
        Self {
            dir_table,
            file_table,
            dir_buckets: vec![None; layout.dir_bucket_count() as usize],
            file_buckets: vec![None; layout.file_bucket_count() as usize],
            dir_cursor: 0,
            file_cursor: 0,
            data: DataCursor::default(),
            empty_file_offset,
            jobs: Vec::with_capacity(layout.file_count() as usize),
        }
    }

    fn write_tree(&mut self, root: &'t DirNode) -> Result<(), BuildError> {
        // The root is its own parent and is always stored without a name
        let root_offset = self.place_dir(&[], TableOffset::ROOT, true)?;
        self.expand_dir(root, root_offset)
    }

    /// Write a directory entry at the next free offset and hash it.
    ///
    /// Child and file links stay unused until the directory is expanded.
    fn place_dir(
        &mut self,
        name: &[u16],
        parent: TableOffset,
        is_last: bool,
    ) -> Result<TableOffset, BuildError> {
        let offset = next_offset(self.dir_cursor, "directory")?;
        let len = size_of::<RomFsDirEntry>() as u32 + padded_name_len(name_byte_len(name));
        self.dir_cursor += len;

        let sibling = if is_last {
            None
        } else {
            TableOffset::new(offset.get() + len)
        };
        let hash_sibling = insert_hash(&mut self.dir_buckets, parent, name, offset);

        let entry = RomFsDirEntry {
            parent_offset: parent.get().into(),
            sibling_offset: TableOffset::into_link(sibling).into(),
            child_offset: TableOffset::into_link(None).into(),
            file_offset: TableOffset::into_link(None).into(),
            hash_sibling_offset: TableOffset::into_link(hash_sibling).into(),
            name_len: name_byte_len(name).into(),
        };
        write_entry(self.dir_table, "directory", offset, entry.as_bytes(), name, len)?;

        Ok(offset)
    }

    /// Write the files of a placed directory, then place and expand its children.
    ///
    /// All immediate children are placed before any of them is expanded, so
    /// siblings occupy consecutive offsets and each parent offset is known
    /// before its children reference it.
    fn expand_dir(&mut self, dir: &'t DirNode, offset: TableOffset) -> Result<(), BuildError> {
        let files = dir.files();
        if !files.is_empty() {
            let first = next_offset(self.file_cursor, "file")?;
            self.dir_entry_mut(offset)?.file_offset = first.get().into();
            for (i, file) in files.iter().enumerate() {
                self.add_file(file, offset, i + 1 == files.len())?;
            }
        }

        let dirs = dir.dirs();
        if !dirs.is_empty() {
            let first = next_offset(self.dir_cursor, "directory")?;
            self.dir_entry_mut(offset)?.child_offset = first.get().into();

            let mut placed = Vec::with_capacity(dirs.len());
            for (i, child) in dirs.iter().enumerate() {
                placed.push(self.place_dir(child.name(), offset, i + 1 == dirs.len())?);
            }
            for (child, child_offset) in dirs.iter().zip(placed) {
                self.expand_dir(child, child_offset)?;
            }
        }

        Ok(())
    }

    fn add_file(
        &mut self,
        file: &'t FileNode,
        parent: TableOffset,
        is_last: bool,
    ) -> Result<(), BuildError> {
        let name = file.name();
        let offset = next_offset(self.file_cursor, "file")?;
        let len = size_of::<RomFsFileEntry>() as u32 + padded_name_len(name_byte_len(name));
        self.file_cursor += len;

        let sibling = if is_last {
            None
        } else {
            TableOffset::new(offset.get() + len)
        };
        let hash_sibling = insert_hash(&mut self.file_buckets, parent, name, offset);

        let start = self.data.place(file.size());
        let data_offset = if file.size() == 0 {
            self.empty_file_offset.value()
        } else {
            self.jobs.push(DataJob { file, offset: start });
            start
        };

        let entry = RomFsFileEntry {
            parent_offset: parent.get().into(),
            sibling_offset: TableOffset::into_link(sibling).into(),
            data_offset: data_offset.into(),
            data_size: file.size().into(),
            hash_sibling_offset: TableOffset::into_link(hash_sibling).into(),
            name_len: name_byte_len(name).into(),
        };
        write_entry(self.file_table, "file", offset, entry.as_bytes(), name, len)
    }

    fn dir_entry_mut(&mut self, offset: TableOffset) -> Result<&mut RomFsDirEntry, BuildError> {
        let overrun = || BuildError::TableOverrun {
            table: "directory",
            offset: offset.get(),
        };
        let end = offset.index() + size_of::<RomFsDirEntry>();
        let slot = self.dir_table.get_mut(offset.index()..end).ok_or_else(overrun)?;
        RomFsDirEntry::mut_from_bytes(slot).map_err(|_| overrun())
    }

    /// Store the bucket heads and hand back the pending data copies.
    fn finish(self, dir_hash: &mut [u8], file_hash: &mut [u8]) -> Vec<DataJob<'t>> {
        debug_assert_eq!(self.dir_cursor as usize, self.dir_table.len());
        debug_assert_eq!(self.file_cursor as usize, self.file_table.len());

        write_buckets(dir_hash, &self.dir_buckets);
        write_buckets(file_hash, &self.file_buckets);
        self.jobs
    }
}

fn next_offset(cursor: u32, table: &'static str) -> Result<TableOffset, BuildError> {
    TableOffset::new(cursor).ok_or(BuildError::TableOverrun {
        table,
        offset: cursor,
    })
}

/// Push `offset` onto the head of its bucket chain and return the previous head.
fn insert_hash(
    buckets: &mut [Option<TableOffset>],
    parent: TableOffset,
    name: &[u16],
    offset: TableOffset,
) -> Option<TableOffset> {
    let bucket = calc_path_hash(parent.get(), name) as usize % buckets.len();
    buckets[bucket].replace(offset)
}

fn write_entry(
    table: &mut [u8],
    table_name: &'static str,
    offset: TableOffset,
    header: &[u8],
    name: &[u16],
    len: u32,
) -> Result<(), BuildError> {
    let slot = table
        .get_mut(offset.index()..offset.index() + len as usize)
        .ok_or(BuildError::TableOverrun {
            table: table_name,
            offset: offset.get(),
        })?;
    let (head, name_slot) = slot.split_at_mut(header.len());
    head.copy_from_slice(header);
    for (dst, unit) in name_slot.chunks_exact_mut(2).zip(name) {
        dst.copy_from_slice(&unit.to_le_bytes());
    }
    Ok(())
}

fn write_buckets(dst: &mut [u8], buckets: &[Option<TableOffset>]) {
    for (slot, head) in dst.chunks_exact_mut(4).zip(buckets) {
        slot.copy_from_slice(&TableOffset::into_link(*head).to_le_bytes());
    }
}

/// Copy every non-empty file into its planned slot of the data region.
fn populate_data(data: &mut [u8], jobs: &[DataJob<'_>]) -> Result<(), BuildError> {
    let mut slots = Vec::with_capacity(jobs.len());
    let mut rest = data;
    let mut base = 0u64;
    for job in jobs {
        let skip = (job.offset - base) as usize;
        let size = job.file.size() as usize;
        if skip + size > rest.len() {
            return Err(BuildError::TableOverrun {
                table: "data",
                offset: job.offset as u32,
            });
        }
        let tail = &mut core::mem::take(&mut rest)[skip..];
        let (slot, tail) = tail.split_at_mut(size);
        slots.push((job.file, slot));
        rest = tail;
        base = job.offset + job.file.size();
    }

    // Destinations are disjoint and fixed by the planner, so reads are independent
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        slots
            .into_par_iter()
            .try_for_each(|(file, dst)| read_file(file, dst))
    }

    #[cfg(not(feature = "parallel"))]
    {
        slots
            .into_iter()
            .try_for_each(|(file, dst)| read_file(file, dst))
    }
}

fn read_file(file: &FileNode, dst: &mut [u8]) -> Result<(), BuildError> {
    match file.source() {
        FileSource::Memory(bytes) => {
            check_size(file.path(), dst.len(), bytes.len() as u64)?;
            dst.copy_from_slice(bytes);
        }
        FileSource::Host => {
            let path = file.path();
            let io_error = |source: std::io::Error| BuildError::Io {
                path: path.to_path_buf(),
                source,
            };
            let mut host = fs::File::open(path).map_err(io_error)?;
            let actual = host.metadata().map_err(io_error)?.len();
            check_size(path, dst.len(), actual)?;
            host.read_exact(dst).map_err(io_error)?;
        }
    }
    Ok(())
}

fn check_size(path: &Path, expected: usize, actual: u64) -> Result<(), BuildError> {
    if actual != expected as u64 {
        return Err(BuildError::SizeMismatch {
            path: path.to_path_buf(),
            expected: expected as u64,
            actual,
        });
    }
    Ok(())
}
