//! Source tree import: host directories or in-memory files to a sorted node tree.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    vec::Vec,
};

use fs_err as fs;

/// Kind of host entry being offered to an [`EntryFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A directory
    Dir,
    /// A regular file
    File,
}

/// Inclusion predicate applied while importing a host directory.
///
/// Rejected directories are skipped with everything below them. Directories
/// left without any wanted file are pruned regardless of this filter.
pub trait EntryFilter {
    /// Whether the directory at `path` should be descended into.
    fn is_dir_wanted(&self, path: &Path) -> bool {
        let _ = path;
        true
    }

    /// Whether the file at `path` should be included.
    fn is_file_wanted(&self, path: &Path) -> bool {
        let _ = path;
        true
    }
}

/// Filter that keeps every entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl EntryFilter for AcceptAll {}

/// Filter that drops dot-prefixed files and directories.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkipHidden;

impl SkipHidden {
    fn is_visible(path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_none_or(|name| !name.starts_with('.'))
    }
}

impl EntryFilter for SkipHidden {
    fn is_dir_wanted(&self, path: &Path) -> bool {
        Self::is_visible(path)
    }

    fn is_file_wanted(&self, path: &Path) -> bool {
        Self::is_visible(path)
    }
}

impl<F> EntryFilter for F
where
    F: Fn(&Path, EntryKind) -> bool,
{
    fn is_dir_wanted(&self, path: &Path) -> bool {
        self(path, EntryKind::Dir)
    }

    fn is_file_wanted(&self, path: &Path) -> bool {
        self(path, EntryKind::File)
    }
}

/// Where a file's contents come from when the image is populated.
#[derive(Debug, Clone)]
pub enum FileSource {
    /// Read from the host filesystem at the node's path during the build
    Host,
    /// Bytes held in memory
    Memory(Arc<[u8]>),
}

/// One file of the source tree.
#[derive(Debug, Clone)]
pub struct FileNode {
    name: Vec<u16>,
    path: PathBuf,
    size: u64,
    source: FileSource,
}

impl FileNode {
    /// File name as UTF-16 code units.
    pub fn name(&self) -> &[u16] {
        &self.name
    }

    /// Host path of the file, or its virtual path for in-memory files.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File size in bytes as observed at import time.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Origin of the file contents.
    pub fn source(&self) -> &FileSource {
        &self.source
    }
}

/// One directory of the source tree, children kept in UTF-16 name order.
#[derive(Debug, Clone, Default)]
pub struct DirNode {
    name: Vec<u16>,
    path: PathBuf,
    dirs: Vec<DirNode>,
    files: Vec<FileNode>,
}

impl DirNode {
    fn new(name: Vec<u16>, path: PathBuf) -> Self {
        Self {
            name,
            path,
            dirs: Vec::new(),
            files: Vec::new(),
        }
    }

    /// Directory name as UTF-16 code units (empty for the root).
    pub fn name(&self) -> &[u16] {
        &self.name
    }

    /// Host path of the directory, or its virtual path for in-memory trees.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Immediate subdirectories.
    pub fn dirs(&self) -> &[DirNode] {
        &self.dirs
    }

    /// Immediate files.
    pub fn files(&self) -> &[FileNode] {
        &self.files
    }

    fn has_name(&self, name: &[u16]) -> bool {
        self.dirs.binary_search_by(|d| d.name.as_slice().cmp(name)).is_ok()
            || self.files.binary_search_by(|f| f.name.as_slice().cmp(name)).is_ok()
    }

    fn is_empty(&self) -> bool {
        self.dirs.is_empty() && self.files.is_empty()
    }

    fn sort(&mut self) {
        self.dirs.sort_by(|a, b| a.name.cmp(&b.name));
        self.files.sort_by(|a, b| a.name.cmp(&b.name));
    }
}

/// In-memory tree of directories and files to be packed into a RomFS image.
#[derive(Debug, Clone, Default)]
pub struct SourceTree {
    root: DirNode,
}

impl SourceTree {
    /// Create an empty tree holding only the root directory.
    pub fn new() -> Self {
        Self {
            root: DirNode::new(Vec::new(), PathBuf::from("/")),
        }
    }

    /// Import a host directory.
    ///
    /// Entries are visited depth-first and sorted by UTF-16 name, so the
    /// result does not depend on the host's directory listing order.
    pub fn import(root: impl AsRef<Path>, filter: &dyn EntryFilter) -> Result<Self, ImportError> {
        let root = root.as_ref();

        let entries = fs::read_dir(root).map_err(|source| ImportError::RootUnavailable {
            path: root.to_path_buf(),
            source,
        })?;

        let mut node = DirNode::new(Vec::new(), root.to_path_buf());
        import_entries(&mut node, entries, filter)?;

        Ok(Self { root: node })
    }

    /// Add an in-memory file.
    ///
    /// The path must start with `/` and use `/` as the separator. Missing
    /// parent directories are created.
    pub fn add_file(&mut self, path: &str, data: impl Into<Arc<[u8]>>) -> Result<(), ImportError> {
        let invalid = || ImportError::InvalidPath {
            path: PathBuf::from(path),
        };

        let rest = path.strip_prefix('/').ok_or_else(invalid)?;
        let components: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
        let Some((file_name, dir_components)) = components.split_last() else {
            return Err(invalid());
        };
        if components.iter().any(|c| *c == "." || *c == "..") {
            return Err(invalid());
        }

        let mut current = &mut self.root;
        for component in dir_components {
            let name: Vec<u16> = component.encode_utf16().collect();
            if current
                .files
                .binary_search_by(|f| f.name.as_slice().cmp(&name))
                .is_ok()
            {
                return Err(ImportError::DuplicateEntry {
                    path: PathBuf::from(path),
                });
            }

            let idx = match current.dirs.binary_search_by(|d| d.name.as_slice().cmp(&name)) {
                Ok(idx) => idx,
                Err(idx) => {
                    let dir_path = current.path.join(component);
                    current.dirs.insert(idx, DirNode::new(name, dir_path));
                    idx
                }
            };
            current = &mut current.dirs[idx];
        }

        let name: Vec<u16> = file_name.encode_utf16().collect();
        if current.has_name(&name) {
            return Err(ImportError::DuplicateEntry {
                path: PathBuf::from(path),
            });
        }

        let data: Arc<[u8]> = data.into();
        let idx = current
            .files
            .binary_search_by(|f| f.name.as_slice().cmp(&name))
            .unwrap_or_else(|idx| idx);
        current.files.insert(
            idx,
            FileNode {
                name,
                path: current.path.join(file_name),
                size: data.len() as u64,
                source: FileSource::Memory(data),
            },
        );

        Ok(())
    }

    /// Root directory.
    pub fn root(&self) -> &DirNode {
        &self.root
    }

    /// True when the root holds neither files nor subdirectories.
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Number of directories, the root included.
    pub fn dir_count(&self) -> usize {
        fn count(dir: &DirNode) -> usize {
            1 + dir.dirs.iter().map(count).sum::<usize>()
        }
        count(&self.root)
    }

    /// Number of files.
    pub fn file_count(&self) -> usize {
        fn count(dir: &DirNode) -> usize {
            dir.files.len() + dir.dirs.iter().map(count).sum::<usize>()
        }
        count(&self.root)
    }
}

fn import_entries(
    node: &mut DirNode,
    entries: fs::ReadDir,
    filter: &dyn EntryFilter,
) -> Result<(), ImportError> {
    for entry in entries {
        let entry = entry.map_err(|source| ImportError::Io {
            path: node.path.clone(),
            source,
        })?;
        let path = entry.path();

        let file_type = entry.file_type().map_err(|source| ImportError::Io {
            path: path.clone(),
            source,
        })?;

        if file_type.is_symlink() {
            // The link's kind is unknown without following it
            if !filter.is_file_wanted(&path) {
                continue;
            }
            return Err(ImportError::Symlink { path });
        }

        if file_type.is_dir() {
            if !filter.is_dir_wanted(&path) {
                continue;
            }
            let name = utf16_name(&entry, &path)?;
            let children = fs::read_dir(&path).map_err(|source| ImportError::Io {
                path: path.clone(),
                source,
            })?;
            let mut child = DirNode::new(name, path);
            import_entries(&mut child, children, filter)?;
            // Directories without wanted files never reach the image
            if !child.is_empty() {
                node.dirs.push(child);
            }
        } else if file_type.is_file() {
            if !filter.is_file_wanted(&path) {
                continue;
            }
            let name = utf16_name(&entry, &path)?;
            let size = entry
                .metadata()
                .map_err(|source| ImportError::Io {
                    path: path.clone(),
                    source,
                })?
                .len();
            node.files.push(FileNode {
                name,
                path,
                size,
                source: FileSource::Host,
            });
        }
    }

    node.sort();
    Ok(())
}

fn utf16_name(entry: &fs::DirEntry, path: &Path) -> Result<Vec<u16>, ImportError> {
    let name = entry.file_name();
    let name = name.to_str().ok_or_else(|| ImportError::InvalidFileName {
        path: path.to_path_buf(),
    })?;
    Ok(name.encode_utf16().collect())
}

/// Error returned while building a [`SourceTree`].
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    /// The root directory could not be opened.
    #[error("cannot open romfs root {}: {source}", path.display())]
    RootUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// I/O error while reading a directory below the root.
    #[error("I/O error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Symlinks are not supported.
    #[error("symlinks not supported: {}", path.display())]
    Symlink { path: PathBuf },
    /// Invalid file name (non-UTF8).
    #[error("invalid file name: {}", path.display())]
    InvalidFileName { path: PathBuf },
    /// Invalid in-memory path.
    #[error("invalid path: {}", path.display())]
    InvalidPath { path: PathBuf },
    /// A file or directory with the same name already exists.
    #[error("duplicate entry: {}", path.display())]
    DuplicateEntry { path: PathBuf },
}
