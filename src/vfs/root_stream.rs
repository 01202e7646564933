//! Single-entry file system for stream-only layers
//!
//! Transform and storage-media layers (range windows, compressed, encoded
//! and encrypted streams, disk images, database blobs) have no hierarchy:
//! their whole content is one byte stream. This file system presents that
//! stream as a lone root file entry so chains ending in such a layer can
//! still be traversed through the entry model.

use std::sync::Arc;

use crate::error::{VfsError, VfsResult};
use crate::path_spec::{PathSpec, TypeIndicator};
use crate::stream::FileObject;
use crate::vfs::{
    DataStream, EntryIterator, EntryType, FileEntry, FileSystem, Stat, StreamOpener,
};

struct Inner {
    spec: PathSpec,
    opener: StreamOpener,
    size: u64,
}

pub struct RootStreamFileSystem {
    inner: Arc<Inner>,
}

impl RootStreamFileSystem {
    /// Wraps the stream layer addressed by `spec`; the opener re-opens that
    /// stream for each data access.
    pub fn open(opener: StreamOpener, spec: PathSpec) -> VfsResult<Self> {
        let mut probe = opener()?;
        let size = probe.size()?;
        Ok(Self {
            inner: Arc::new(Inner { spec, opener, size }),
        })
    }
}

struct RootStreamEntry {
    inner: Arc<Inner>,
}

impl FileEntry for RootStreamEntry {
    fn name(&self) -> String {
        String::new()
    }

    fn path_spec(&self) -> PathSpec {
        self.inner.spec.clone()
    }

    fn entry_type(&self) -> EntryType {
        EntryType::File
    }

    fn parent(&self) -> VfsResult<Option<Box<dyn FileEntry>>> {
        Ok(None)
    }

    fn sub_entries(&self) -> VfsResult<EntryIterator<'_>> {
        Ok(Box::new(std::iter::empty()))
    }

    fn data_streams(&self) -> VfsResult<Vec<DataStream>> {
        Ok(vec![DataStream::default_stream()])
    }

    fn stat(&self) -> VfsResult<Stat> {
        Ok(Stat {
            entry_type: Some(EntryType::File),
            size: Some(self.inner.size),
            ..Stat::default()
        })
    }

    fn file_object(&self, data_stream: Option<&str>) -> VfsResult<Box<dyn FileObject>> {
        if let Some(name) = data_stream {
            if !name.is_empty() {
                return Err(VfsError::NotFound(format!(
                    "stream layers have no data stream named {}",
                    name
                )));
            }
        }
        (self.inner.opener)()
    }
}

impl FileSystem for RootStreamFileSystem {
    fn type_indicator(&self) -> TypeIndicator {
        self.inner.spec.type_indicator()
    }

    fn root_entry(&self) -> VfsResult<Box<dyn FileEntry>> {
        Ok(Box::new(RootStreamEntry {
            inner: Arc::clone(&self.inner),
        }))
    }

    fn entry_by_spec(&self, spec: &PathSpec) -> VfsResult<Box<dyn FileEntry>> {
        // The root entry is the only entry; any location but the root (or
        // an absent one) resolves to it when the chain matches.
        if spec.type_indicator() != self.inner.spec.type_indicator() {
            return Err(VfsError::NotFound(format!(
                "no {} entry in a {} stream layer",
                spec.type_indicator(),
                self.inner.spec.type_indicator()
            )));
        }
        self.root_entry()
    }
}
