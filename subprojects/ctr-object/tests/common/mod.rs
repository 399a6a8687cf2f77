//! Test-only walker over finished RomFS images.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};

use ctr_object::{
    raw::{
        ivfc::{IVFC_BLOCK_SIZE, IVFC_HASH_SIZE, IVFC_HEADER_SLOT, IvfcHeader},
        romfs::{
            ROMFS_UNUSED_ENTRY, RomFsDirEntry, RomFsFileEntry, RomFsInfoHeader, TableOffset,
            padded_name_len,
        },
    },
    write::{RomFsImage, romfs::calc_path_hash},
};
use sha2::{Digest, Sha256};
use zerocopy::FromBytes;

/// Everything reachable from the root directory.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Walked {
    /// Full path of every directory below the root
    pub dirs: BTreeSet<String>,
    /// Full path and contents of every file
    pub files: BTreeMap<String, Vec<u8>>,
}

pub struct Level3<'a> {
    pub bytes: &'a [u8],
    pub header: &'a RomFsInfoHeader,
}

impl<'a> Level3<'a> {
    pub fn new(image: &'a RomFsImage) -> Self {
        let level = &image.layout().levels()[3];
        let bytes =
            &image.as_bytes()[level.offset as usize..(level.offset + level.size) as usize];
        let header = RomFsInfoHeader::ref_from_prefix(bytes).unwrap().0;
        assert_eq!(header.header_size.get(), 0x28);
        Self { bytes, header }
    }

    fn section(&self, offset: u32, size: u32) -> &'a [u8] {
        &self.bytes[offset as usize..(offset + size) as usize]
    }

    pub fn dir_table(&self) -> &'a [u8] {
        self.section(self.header.dir_table.offset.get(), self.header.dir_table.size.get())
    }

    pub fn file_table(&self) -> &'a [u8] {
        self.section(
            self.header.file_table.offset.get(),
            self.header.file_table.size.get(),
        )
    }

    pub fn dir_buckets(&self) -> Vec<u32> {
        buckets(self.section(
            self.header.dir_hash_table.offset.get(),
            self.header.dir_hash_table.size.get(),
        ))
    }

    pub fn file_buckets(&self) -> Vec<u32> {
        buckets(self.section(
            self.header.file_hash_table.offset.get(),
            self.header.file_hash_table.size.get(),
        ))
    }

    pub fn dir(&self, offset: u32) -> (&'a RomFsDirEntry, Vec<u16>) {
        let table = self.dir_table();
        let entry = RomFsDirEntry::ref_from_prefix(&table[offset as usize..]).unwrap().0;
        let start = offset as usize + size_of::<RomFsDirEntry>();
        (entry, decode_name(&table[start..start + entry.name_len.get() as usize]))
    }

    pub fn file(&self, offset: u32) -> (&'a RomFsFileEntry, Vec<u16>) {
        let table = self.file_table();
        let entry = RomFsFileEntry::ref_from_prefix(&table[offset as usize..]).unwrap().0;
        let start = offset as usize + size_of::<RomFsFileEntry>();
        (entry, decode_name(&table[start..start + entry.name_len.get() as usize]))
    }

    pub fn file_data(&self, entry: &RomFsFileEntry) -> &'a [u8] {
        let start = self.header.data_offset.get() as usize + entry.data_offset.get() as usize;
        &self.bytes[start..start + entry.data_size.get() as usize]
    }

    /// Offsets of every entry in table order.
    pub fn dir_offsets(&self) -> Vec<u32> {
        let mut offsets = Vec::new();
        let mut offset = 0u32;
        while (offset as usize) < self.dir_table().len() {
            offsets.push(offset);
            let (entry, _) = self.dir(offset);
            offset += size_of::<RomFsDirEntry>() as u32 + padded_name_len(entry.name_len.get());
        }
        assert_eq!(offset as usize, self.dir_table().len());
        offsets
    }

    pub fn file_offsets(&self) -> Vec<u32> {
        let mut offsets = Vec::new();
        let mut offset = 0u32;
        while (offset as usize) < self.file_table().len() {
            offsets.push(offset);
            let (entry, _) = self.file(offset);
            offset += size_of::<RomFsFileEntry>() as u32 + padded_name_len(entry.name_len.get());
        }
        assert_eq!(offset as usize, self.file_table().len());
        offsets
    }
}

fn buckets(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn decode_name(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect()
}

/// Walk child, file and sibling links from the root, checking every chain ends.
pub fn walk(image: &RomFsImage) -> Walked {
    let level3 = Level3::new(image);
    let dir_total = level3.dir_offsets().len();
    let file_total = level3.file_offsets().len();

    let (root, root_name) = level3.dir(0);
    assert!(root_name.is_empty());
    assert_eq!(root.parent_offset.get(), 0);
    assert_eq!(root.sibling_offset.get(), ROMFS_UNUSED_ENTRY);

    let mut walked = Walked::default();
    let mut seen = (1usize, 0usize);
    walk_dir(&level3, 0, "", &mut walked, &mut seen, (dir_total, file_total));
    assert_eq!(seen, (dir_total, file_total), "every entry reachable from root");
    walked
}

fn walk_dir(
    level3: &Level3<'_>,
    offset: u32,
    prefix: &str,
    walked: &mut Walked,
    seen: &mut (usize, usize),
    totals: (usize, usize),
) {
    let (dir, _) = level3.dir(offset);

    let mut next = TableOffset::from_link(dir.file_offset.get());
    while let Some(file_offset) = next {
        seen.1 += 1;
        assert!(seen.1 <= totals.1, "file sibling chain does not terminate");
        let (file, name) = level3.file(file_offset.get());
        assert_eq!(file.parent_offset.get(), offset);
        let path = format!("{prefix}/{}", String::from_utf16(&name).unwrap());
        walked.files.insert(path, level3.file_data(file).to_vec());
        next = TableOffset::from_link(file.sibling_offset.get());
    }

    let mut children = Vec::new();
    let mut next = TableOffset::from_link(dir.child_offset.get());
    while let Some(child_offset) = next {
        seen.0 += 1;
        assert!(seen.0 <= totals.0, "dir sibling chain does not terminate");
        let (child, name) = level3.dir(child_offset.get());
        assert_eq!(child.parent_offset.get(), offset);
        children.push((child_offset.get(), String::from_utf16(&name).unwrap()));
        next = TableOffset::from_link(child.sibling_offset.get());
    }

    for (child_offset, name) in children {
        let path = format!("{prefix}/{name}");
        walked.dirs.insert(path.clone());
        walk_dir(level3, child_offset, &path, walked, seen, totals);
    }
}

/// Every entry must be reachable from its bucket head through hash links.
pub fn assert_hash_chains(image: &RomFsImage) {
    let level3 = Level3::new(image);

    let dir_buckets = level3.dir_buckets();
    let dir_offsets = level3.dir_offsets();
    for &offset in &dir_offsets {
        let (entry, name) = level3.dir(offset);
        let bucket = calc_path_hash(entry.parent_offset.get(), &name) as usize % dir_buckets.len();
        let mut link = dir_buckets[bucket];
        let mut steps = 0;
        while link != offset {
            assert_ne!(link, ROMFS_UNUSED_ENTRY, "dir {offset:#x} not in its bucket chain");
            steps += 1;
            assert!(steps <= dir_offsets.len(), "dir hash chain loops");
            link = level3.dir(link).0.hash_sibling_offset.get();
        }
    }

    let file_buckets = level3.file_buckets();
    let file_offsets = level3.file_offsets();
    for &offset in &file_offsets {
        let (entry, name) = level3.file(offset);
        let bucket = calc_path_hash(entry.parent_offset.get(), &name) as usize % file_buckets.len();
        let mut link = file_buckets[bucket];
        let mut steps = 0;
        while link != offset {
            assert_ne!(link, ROMFS_UNUSED_ENTRY, "file {offset:#x} not in its bucket chain");
            steps += 1;
            assert!(steps <= file_offsets.len(), "file hash chain loops");
            link = level3.file(link).0.hash_sibling_offset.get();
        }
    }
}

/// Every digest of level `n` must hash the matching block of level `n + 1`.
pub fn assert_hash_tree(image: &RomFsImage) {
    let bytes = image.as_bytes();
    let levels = image.layout().levels();

    let header = IvfcHeader::ref_from_prefix(bytes).unwrap().0;
    assert_eq!(&header.magic, b"IVFC");
    assert_eq!(header.id.get(), 0x10000);
    assert_eq!(
        u64::from(header.master_hash_size.get()),
        levels[1].block_count() * IVFC_HASH_SIZE
    );
    for (stored, level) in header.levels.iter().zip(&levels[1..]) {
        assert_eq!(stored.logical_offset.get(), level.logical_offset);
        assert_eq!(stored.hash_data_size.get(), level.size);
        assert_eq!(stored.block_size_log2.get(), 12);
    }

    for n in 0..3 {
        let below = &levels[n + 1];
        let mut digest_at = levels[n].offset as usize;
        if n == 0 {
            digest_at += IVFC_HEADER_SLOT as usize;
        }
        for block in 0..below.block_count() as usize {
            let start = below.offset as usize + block * IVFC_BLOCK_SIZE as usize;
            let expected = Sha256::digest(&bytes[start..start + IVFC_BLOCK_SIZE as usize]);
            let stored = &bytes[digest_at + block * 0x20..digest_at + (block + 1) * 0x20];
            assert_eq!(stored, expected.as_slice(), "level {n} digest {block}");
        }
    }
}
