//! In-memory file system for tests and synthetic hierarchies
//!
//! Built programmatically through [`FakeFileSystemBuilder`]; entries live
//! entirely in memory and are addressed with FAKE specifications.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{VfsError, VfsResult};
use crate::path_spec::{PathSpec, TypeIndicator};
use crate::stream::fake::FakeStream;
use crate::stream::FileObject;
use crate::vfs::{
    location_of, normalize_location, Attribute, DataStream, EntryIndex, EntryIterator, EntryType,
    FileEntry, FileSystem, Stat,
};

struct FakeNode {
    data: Arc<Vec<u8>>,
    entry_type: EntryType,
    link_target: Option<String>,
    modification_time: Option<DateTime<Utc>>,
    attributes: Vec<Attribute>,
}

struct Inner {
    index: EntryIndex<FakeNode>,
}

pub struct FakeFileSystem {
    inner: Arc<Inner>,
}

/// Constructs fake hierarchies: intermediate directories are created
/// implicitly, records added later override synthesized placeholders.
pub struct FakeFileSystemBuilder {
    index: EntryIndex<FakeNode>,
}

impl Default for FakeFileSystemBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeFileSystemBuilder {
    pub fn new() -> Self {
        Self {
            index: EntryIndex::new(),
        }
    }

    pub fn add_file(mut self, location: &str, data: &[u8]) -> Self {
        self.index.insert(
            &normalize_location(location),
            FakeNode {
                data: Arc::new(data.to_vec()),
                entry_type: EntryType::File,
                link_target: None,
                modification_time: None,
                attributes: Vec::new(),
            },
            false,
        );
        self
    }

    pub fn add_file_with_times(
        mut self,
        location: &str,
        data: &[u8],
        modification_time: DateTime<Utc>,
    ) -> Self {
        self.index.insert(
            &normalize_location(location),
            FakeNode {
                data: Arc::new(data.to_vec()),
                entry_type: EntryType::File,
                link_target: None,
                modification_time: Some(modification_time),
                attributes: Vec::new(),
            },
            false,
        );
        self
    }

    pub fn add_directory(mut self, location: &str) -> Self {
        self.index.insert(
            &normalize_location(location),
            FakeNode {
                data: Arc::new(Vec::new()),
                entry_type: EntryType::Directory,
                link_target: None,
                modification_time: None,
                attributes: Vec::new(),
            },
            true,
        );
        self
    }

    pub fn add_symlink(mut self, location: &str, target: &str) -> Self {
        self.index.insert(
            &normalize_location(location),
            FakeNode {
                data: Arc::new(target.as_bytes().to_vec()),
                entry_type: EntryType::Link,
                link_target: Some(target.to_string()),
                modification_time: None,
                attributes: Vec::new(),
            },
            false,
        );
        self
    }

    pub fn add_file_with_attribute(
        mut self,
        location: &str,
        data: &[u8],
        attribute: Attribute,
    ) -> Self {
        self.index.insert(
            &normalize_location(location),
            FakeNode {
                data: Arc::new(data.to_vec()),
                entry_type: EntryType::File,
                link_target: None,
                modification_time: None,
                attributes: vec![attribute],
            },
            false,
        );
        self
    }

    pub fn build(self) -> Arc<FakeFileSystem> {
        Arc::new(FakeFileSystem {
            inner: Arc::new(Inner { index: self.index }),
        })
    }
}

struct FakeFileEntry {
    inner: Arc<Inner>,
    location: String,
}

impl FakeFileEntry {
    fn node(&self) -> Option<&FakeNode> {
        self.inner.index.get(&self.location).and_then(|n| n.meta.as_ref())
    }
}

impl FileEntry for FakeFileEntry {
    fn name(&self) -> String {
        self.location
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string()
    }

    fn path_spec(&self) -> PathSpec {
        PathSpec::Fake {
            location: self.location.clone(),
        }
    }

    fn entry_type(&self) -> EntryType {
        match self.inner.index.get(&self.location) {
            Some(node) if node.is_directory => EntryType::Directory,
            Some(_) => self
                .node()
                .map(|n| n.entry_type)
                .unwrap_or(EntryType::Directory),
            None => EntryType::File,
        }
    }

    fn parent(&self) -> VfsResult<Option<Box<dyn FileEntry>>> {
        if self.location == "/" {
            return Ok(None);
        }
        let parent = match self.location.rsplit_once('/') {
            Some(("", _)) => "/".to_string(),
            Some((parent, _)) => parent.to_string(),
            None => "/".to_string(),
        };
        Ok(Some(Box::new(FakeFileEntry {
            inner: Arc::clone(&self.inner),
            location: parent,
        })))
    }

    fn sub_entries(&self) -> VfsResult<EntryIterator<'_>> {
        let children = self.inner.index.children(&self.location);
        let inner = Arc::clone(&self.inner);
        Ok(Box::new(children.into_iter().map(move |location| {
            Ok(Box::new(FakeFileEntry {
                inner: Arc::clone(&inner),
                location,
            }) as Box<dyn FileEntry>)
        })))
    }

    fn data_streams(&self) -> VfsResult<Vec<DataStream>> {
        Ok(match self.entry_type() {
            EntryType::File => vec![DataStream::default_stream()],
            _ => Vec::new(),
        })
    }

    fn attributes(&self) -> VfsResult<Vec<Attribute>> {
        Ok(self.node().map(|n| n.attributes.clone()).unwrap_or_default())
    }

    fn link_target(&self) -> VfsResult<Option<String>> {
        Ok(self.node().and_then(|n| n.link_target.clone()))
    }

    fn stat(&self) -> VfsResult<Stat> {
        let node = self.node();
        Ok(Stat {
            entry_type: Some(self.entry_type()),
            size: node.map(|n| n.data.len() as u64),
            modification_time: node.and_then(|n| n.modification_time),
            ..Stat::default()
        })
    }

    fn file_object(&self, data_stream: Option<&str>) -> VfsResult<Box<dyn FileObject>> {
        if let Some(name) = data_stream {
            if !name.is_empty() {
                return Err(VfsError::NotFound(format!(
                    "no data stream named {} on {}",
                    name, self.location
                )));
            }
        }
        let node = self.node().ok_or_else(|| {
            VfsError::NotFound(format!("no data for {}", self.location))
        })?;
        if node.entry_type == EntryType::Directory {
            return Err(VfsError::InvalidData(format!(
                "{} is a directory",
                self.location
            )));
        }
        Ok(Box::new(FakeStream::from_shared(Arc::clone(&node.data))))
    }
}

impl FileSystem for FakeFileSystem {
    fn type_indicator(&self) -> TypeIndicator {
        TypeIndicator::Fake
    }

    fn root_entry(&self) -> VfsResult<Box<dyn FileEntry>> {
        Ok(Box::new(FakeFileEntry {
            inner: Arc::clone(&self.inner),
            location: "/".to_string(),
        }))
    }

    fn entry_by_spec(&self, spec: &PathSpec) -> VfsResult<Box<dyn FileEntry>> {
        let location = normalize_location(location_of(spec)?);
        if !self.inner.index.contains(&location) {
            return Err(VfsError::NotFound(location));
        }
        Ok(Box::new(FakeFileEntry {
            inner: Arc::clone(&self.inner),
            location,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Arc<FakeFileSystem> {
        FakeFileSystemBuilder::new()
            .add_file("/etc/passwd", b"root:x:0:0")
            .add_file("/var/log/syslog", b"log line\n")
            .add_symlink("/etc/alias", "/etc/passwd")
            .build()
    }

    #[test]
    fn test_root_and_traversal() {
        let fs = sample();
        let root = fs.root_entry().unwrap();
        assert!(root.is_directory());

        let names: Vec<String> = root
            .sub_entries()
            .unwrap()
            .map(|e| e.unwrap().name())
            .collect();
        assert_eq!(names, vec!["etc", "var"]);

        // Restartable: a second iteration yields the same set.
        let again: Vec<String> = root
            .sub_entries()
            .unwrap()
            .map(|e| e.unwrap().name())
            .collect();
        assert_eq!(names, again);
    }

    #[test]
    fn test_read_file() {
        let fs = sample();
        let spec = PathSpec::Fake {
            location: "/etc/passwd".to_string(),
        };
        let entry = fs.entry_by_spec(&spec).unwrap();
        assert_eq!(entry.entry_type(), EntryType::File);
        assert_eq!(entry.stat().unwrap().size, Some(10));

        let mut stream = entry.file_object(None).unwrap();
        let data = crate::stream::read_to_end(stream.as_mut()).unwrap();
        assert_eq!(data, b"root:x:0:0");
    }

    #[test]
    fn test_symlink_not_followed() {
        let fs = sample();
        let spec = PathSpec::Fake {
            location: "/etc/alias".to_string(),
        };
        let entry = fs.entry_by_spec(&spec).unwrap();
        assert_eq!(entry.entry_type(), EntryType::Link);
        assert_eq!(
            entry.link_target().unwrap(),
            Some("/etc/passwd".to_string())
        );
    }

    #[test]
    fn test_missing_entry() {
        let fs = sample();
        let spec = PathSpec::Fake {
            location: "/no/such".to_string(),
        };
        assert!(matches!(
            fs.entry_by_spec(&spec),
            Err(VfsError::NotFound(_))
        ));
        assert!(!fs.exists_by_spec(&spec));
    }

    #[test]
    fn test_parent_chain() {
        let fs = sample();
        let spec = PathSpec::Fake {
            location: "/var/log/syslog".to_string(),
        };
        let entry = fs.entry_by_spec(&spec).unwrap();
        let parent = entry.parent().unwrap().unwrap();
        assert_eq!(parent.name(), "log");
        let grandparent = parent.parent().unwrap().unwrap();
        assert_eq!(grandparent.name(), "var");
        let root = grandparent.parent().unwrap().unwrap();
        assert!(root.parent().unwrap().is_none());
    }
}
