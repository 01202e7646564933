//! Virtual file-entry and file-system model
//!
//! Every format back-end exposes the same polymorphic surface: a file system
//! owns the back-end state and hands out file entries; entries enumerate
//! children lazily (each iteration re-reads the directory, no shared
//! cursor), carry stat metadata with lossless timestamps, and open their
//! data streams on demand. Symbolic links are never followed here; callers
//! opt into resolution through the helpers.

pub mod cpio;
pub mod fake;
mod index;
pub mod os;
pub mod root_stream;
pub mod tar;
pub mod zip;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{VfsError, VfsResult};
use crate::path_spec::{PathSpec, TypeIndicator};
use crate::stream::FileObject;

pub(crate) use index::EntryIndex;

/// Re-opens the byte stream a file system is layered over. Entry data
/// streams get their own parent handle this way, so concurrent entry reads
/// share no state (the resolver wires this to a fresh chain resolution).
pub type StreamOpener = Arc<dyn Fn() -> VfsResult<Box<dyn FileObject>> + Send + Sync>;

/// Opener over an already materialized stream factory, for tests and direct
/// construction.
pub fn opener_from<F>(factory: F) -> StreamOpener
where
    F: Fn() -> VfsResult<Box<dyn FileObject>> + Send + Sync + 'static,
{
    Arc::new(factory)
}

/// Name of the default (unnamed) data stream.
pub const DEFAULT_DATA_STREAM: &str = "";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntryType {
    File,
    Directory,
    Link,
    Device,
    Socket,
    Pipe,
    Whiteout,
}

/// Metadata snapshot of a file entry. Every field is optional: formats
/// surface what they store and nothing else.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Stat {
    pub entry_type: Option<EntryType>,
    pub size: Option<u64>,
    pub access_time: Option<DateTime<Utc>>,
    pub modification_time: Option<DateTime<Utc>>,
    pub change_time: Option<DateTime<Utc>>,
    pub creation_time: Option<DateTime<Utc>>,
    pub backup_time: Option<DateTime<Utc>>,
    pub owner_identifier: Option<u32>,
    pub group_identifier: Option<u32>,
    pub mode: Option<u32>,
    /// Format-native identifier: inode, MFT entry, CNID.
    pub identifier: Option<u64>,
    pub link_count: Option<u32>,
    pub device_number: Option<u64>,
}

/// One addressable byte sequence attached to an entry: the default contents
/// or a named alternate (NTFS ADS, HFS resource fork).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataStream {
    pub name: String,
}

impl DataStream {
    pub fn default_stream() -> Self {
        Self {
            name: DEFAULT_DATA_STREAM.to_string(),
        }
    }

    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    pub fn is_default(&self) -> bool {
        self.name.is_empty()
    }
}

/// Extended or format-specific attribute of an entry.
#[derive(Debug, Clone, Serialize)]
pub struct Attribute {
    pub name: String,
    /// Format-specific attribute type identifier.
    pub kind: String,
    pub data: Vec<u8>,
}

/// Lazy, restartable sequence of sub entries.
pub type EntryIterator<'a> = Box<dyn Iterator<Item = VfsResult<Box<dyn FileEntry>>> + 'a>;

/// Metadata record for one node in a virtual file system.
pub trait FileEntry {
    /// Entry name without any path, empty for the root.
    fn name(&self) -> String;

    /// Full addressing chain of this entry.
    fn path_spec(&self) -> PathSpec;

    fn entry_type(&self) -> EntryType;

    fn is_directory(&self) -> bool {
        self.entry_type() == EntryType::Directory
    }

    /// Parent entry, None for the root.
    fn parent(&self) -> VfsResult<Option<Box<dyn FileEntry>>>;

    /// Children of a directory entry. Iterating twice yields the same set;
    /// order is only defined where the format defines one.
    fn sub_entries(&self) -> VfsResult<EntryIterator<'_>>;

    /// Data streams: the default stream plus named alternates. Directories
    /// commonly have none.
    fn data_streams(&self) -> VfsResult<Vec<DataStream>> {
        Ok(match self.entry_type() {
            EntryType::File => vec![DataStream::default_stream()],
            _ => Vec::new(),
        })
    }

    fn attributes(&self) -> VfsResult<Vec<Attribute>> {
        Ok(Vec::new())
    }

    /// Target of a symbolic link, None for other entry types.
    fn link_target(&self) -> VfsResult<Option<String>> {
        Ok(None)
    }

    fn stat(&self) -> VfsResult<Stat>;

    /// Opens a byte stream over one of the entry's data streams (default
    /// stream when `data_stream` is None).
    fn file_object(&self, data_stream: Option<&str>) -> VfsResult<Box<dyn FileObject>>;
}

/// A mounted format instance owning its back-end state.
pub trait FileSystem: Send + Sync {
    fn type_indicator(&self) -> TypeIndicator;

    fn path_separator(&self) -> char {
        '/'
    }

    /// The root entry always exists on a successfully opened file system.
    fn root_entry(&self) -> VfsResult<Box<dyn FileEntry>>;

    /// Entry addressed by the spec, by fast-path identifier when the spec
    /// carries one, else by location.
    fn entry_by_spec(&self, spec: &PathSpec) -> VfsResult<Box<dyn FileEntry>>;

    fn exists_by_spec(&self, spec: &PathSpec) -> bool {
        self.entry_by_spec(spec).is_ok()
    }

    fn join_path(&self, segments: &[&str]) -> String {
        let separator = self.path_separator();
        let mut out = String::new();
        for segment in segments {
            let trimmed = segment.trim_matches(separator);
            if trimmed.is_empty() {
                continue;
            }
            out.push(separator);
            out.push_str(trimmed);
        }
        if out.is_empty() {
            out.push(separator);
        }
        out
    }

    fn split_path(&self, location: &str) -> Vec<String> {
        location
            .split(self.path_separator())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Normalizes an archive member location to `/`-rooted form without a
/// trailing separator.
pub(crate) fn normalize_location(location: &str) -> String {
    let mut out = String::from("/");
    for segment in location.split('/').filter(|s| !s.is_empty() && *s != ".") {
        if !out.ends_with('/') {
            out.push('/');
        }
        out.push_str(segment);
    }
    out
}

/// Location attribute of a spec, required for entry lookup.
pub(crate) fn location_of(spec: &PathSpec) -> VfsResult<&str> {
    spec.location().ok_or_else(|| {
        VfsError::PathSpec(format!(
            "{} specification carries no location",
            spec.type_indicator()
        ))
    })
}
