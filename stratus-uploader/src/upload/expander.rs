use std::fs;
use std::io;
use std::path::Path;

use bytes::Bytes;
use stratus_core::UploadSource;

use super::item::{FileItem, FolderItem, ItemBase, ItemId, UploadItem, UploadStatus};

/// A dropped or selected file-system entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    File {
        name: String,
        source: UploadSource,
        size: u64,
    },
    Directory {
        name: String,
        children: Vec<Entry>,
    },
}

impl Entry {
    pub fn memory(name: impl Into<String>, contents: impl Into<Bytes>) -> Self {
        let contents = contents.into();
        Entry::File {
            name: name.into(),
            size: contents.len() as u64,
            source: UploadSource::Memory(contents),
        }
    }

    pub fn directory(name: impl Into<String>, children: Vec<Entry>) -> Self {
        Entry::Directory {
            name: name.into(),
            children,
        }
    }

    /// Scans a local file or directory tree. Children are sorted by name;
    /// anything below `path` that is neither a regular file nor a directory,
    /// symlinks included, is skipped. `path` itself is followed if it is a link.
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let meta = fs::metadata(path)?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        if meta.is_dir() {
            let mut dir_entries = fs::read_dir(path)?.collect::<Result<Vec<_>, _>>()?;
            dir_entries.sort_by_key(|entry| entry.file_name());
            let mut children = Vec::with_capacity(dir_entries.len());
            for entry in dir_entries {
                let file_type = entry.file_type()?;
                if file_type.is_dir() || file_type.is_file() {
                    children.push(Self::from_path(&entry.path())?);
                }
            }
            Ok(Entry::Directory { name, children })
        } else {
            Ok(Entry::File {
                name,
                source: UploadSource::Path(path.to_path_buf()),
                size: meta.len(),
            })
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Entry::File { name, .. } | Entry::Directory { name, .. } => name,
        }
    }
}

/// Flat, fully linked items produced from one entry; parents precede children.
#[derive(Debug)]
pub struct Expansion {
    pub root: ItemId,
    pub items: Vec<UploadItem>,
}

/// Turns `entry` into upload items destined for `destination_node_id`.
///
/// Only the root carries a `parent_node_id`; nested items learn theirs once the
/// containing folder exists remotely.
pub fn expand(entry: Entry, destination_node_id: &str, next_id: &mut ItemId) -> Expansion {
    let mut items = Vec::new();
    let (root, _) = expand_into(entry, None, Some(destination_node_id), "", next_id, &mut items);
    Expansion { root, items }
}

fn expand_into(
    entry: Entry,
    parent_id: Option<ItemId>,
    parent_node_id: Option<&str>,
    parent_path: &str,
    next_id: &mut ItemId,
    out: &mut Vec<UploadItem>,
) -> (ItemId, usize) {
    let id = *next_id;
    *next_id += 1;
    let full_path = if parent_path.is_empty() {
        entry.name().to_string()
    } else {
        format!("{parent_path}/{}", entry.name())
    };
    let parent_node_id = parent_node_id.map(str::to_string);

    match entry {
        Entry::File { name, source, size } => {
            out.push(UploadItem::File(FileItem {
                base: ItemBase::new(id, name, full_path, parent_id, parent_node_id),
                source,
                size,
                progress: 0,
            }));
            (id, 1)
        }
        Entry::Directory { name, children } => {
            let mut subtree = Vec::new();
            let mut child_ids = Vec::with_capacity(children.len());
            let mut content_count = 1;
            for child in children {
                let (child_id, count) =
                    expand_into(child, Some(id), None, &full_path, next_id, &mut subtree);
                child_ids.push(child_id);
                content_count += count;
            }
            out.push(UploadItem::Folder(FolderItem {
                base: ItemBase::new(id, name, full_path, parent_id, parent_node_id),
                children: child_ids,
                content_count,
                completed_count: 0,
                failed_count: 0,
                creation: UploadStatus::Queued,
            }));
            out.extend(subtree);
            (id, content_count)
        }
    }
}
