//! Host file system entries
//!
//! Wraps the operating system's own file hierarchy in the entry model so a
//! chain can start from live-mounted directories. Entries are addressed by
//! host paths; metadata comes from `symlink_metadata` so links are reported
//! as links, never followed.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::{VfsError, VfsResult};
use crate::path_spec::{PathSpec, TypeIndicator};
use crate::stream::os::OsStream;
use crate::stream::FileObject;
use crate::vfs::{DataStream, EntryIterator, EntryType, FileEntry, FileSystem, Stat};

pub struct OsFileSystem;

struct OsFileEntry {
    path: PathBuf,
}

fn entry_type_of(metadata: &fs::Metadata) -> EntryType {
    let file_type = metadata.file_type();
    if file_type.is_symlink() {
        return EntryType::Link;
    }
    if file_type.is_dir() {
        return EntryType::Directory;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileTypeExt;
        if file_type.is_block_device() || file_type.is_char_device() {
            return EntryType::Device;
        }
        if file_type.is_socket() {
            return EntryType::Socket;
        }
        if file_type.is_fifo() {
            return EntryType::Pipe;
        }
    }
    EntryType::File
}

impl OsFileEntry {
    fn metadata(&self) -> VfsResult<fs::Metadata> {
        Ok(fs::symlink_metadata(&self.path)?)
    }
}

impl FileEntry for OsFileEntry {
    fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    fn path_spec(&self) -> PathSpec {
        PathSpec::Os {
            location: self.path.to_string_lossy().to_string(),
        }
    }

    fn entry_type(&self) -> EntryType {
        self.metadata()
            .map(|m| entry_type_of(&m))
            .unwrap_or(EntryType::File)
    }

    fn parent(&self) -> VfsResult<Option<Box<dyn FileEntry>>> {
        Ok(self.path.parent().map(|parent| {
            Box::new(OsFileEntry {
                path: parent.to_path_buf(),
            }) as Box<dyn FileEntry>
        }))
    }

    fn sub_entries(&self) -> VfsResult<EntryIterator<'_>> {
        if self.entry_type() != EntryType::Directory {
            return Ok(Box::new(std::iter::empty()));
        }
        let reader = fs::read_dir(&self.path)?;
        Ok(Box::new(reader.map(|entry| {
            let entry = entry.map_err(VfsError::from)?;
            Ok(Box::new(OsFileEntry { path: entry.path() }) as Box<dyn FileEntry>)
        })))
    }

    fn data_streams(&self) -> VfsResult<Vec<DataStream>> {
        Ok(match self.entry_type() {
            EntryType::File => vec![DataStream::default_stream()],
            _ => Vec::new(),
        })
    }

    fn link_target(&self) -> VfsResult<Option<String>> {
        if self.entry_type() != EntryType::Link {
            return Ok(None);
        }
        let target = fs::read_link(&self.path)?;
        Ok(Some(target.to_string_lossy().to_string()))
    }

    fn stat(&self) -> VfsResult<Stat> {
        let metadata = self.metadata()?;
        let mut stat = Stat {
            entry_type: Some(entry_type_of(&metadata)),
            size: Some(metadata.len()),
            access_time: metadata.accessed().ok().map(DateTime::<Utc>::from),
            modification_time: metadata.modified().ok().map(DateTime::<Utc>::from),
            creation_time: metadata.created().ok().map(DateTime::<Utc>::from),
            ..Stat::default()
        };
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            stat.change_time =
                DateTime::<Utc>::from_timestamp(metadata.ctime(), metadata.ctime_nsec() as u32);
            stat.owner_identifier = Some(metadata.uid());
            stat.group_identifier = Some(metadata.gid());
            stat.mode = Some(metadata.mode());
            stat.identifier = Some(metadata.ino());
            stat.link_count = Some(metadata.nlink() as u32);
            stat.device_number = Some(metadata.dev());
        }
        Ok(stat)
    }

    fn file_object(&self, data_stream: Option<&str>) -> VfsResult<Box<dyn FileObject>> {
        if let Some(name) = data_stream {
            if !name.is_empty() {
                return Err(VfsError::NotFound(format!(
                    "host files have no data stream named {}",
                    name
                )));
            }
        }
        Ok(Box::new(OsStream::open(&self.path.to_string_lossy())?))
    }
}

impl FileSystem for OsFileSystem {
    fn type_indicator(&self) -> TypeIndicator {
        TypeIndicator::Os
    }

    fn path_separator(&self) -> char {
        std::path::MAIN_SEPARATOR
    }

    fn root_entry(&self) -> VfsResult<Box<dyn FileEntry>> {
        Ok(Box::new(OsFileEntry {
            path: PathBuf::from(std::path::MAIN_SEPARATOR.to_string()),
        }))
    }

    fn entry_by_spec(&self, spec: &PathSpec) -> VfsResult<Box<dyn FileEntry>> {
        let location = match spec {
            PathSpec::Os { location } => location,
            other => {
                return Err(VfsError::PathSpec(format!(
                    "host file system cannot address {} specifications",
                    other.type_indicator()
                )))
            }
        };
        let path = Path::new(location);
        if fs::symlink_metadata(path).is_err() {
            return Err(VfsError::NotFound(location.clone()));
        }
        Ok(Box::new(OsFileEntry {
            path: path.to_path_buf(),
        }))
    }
}
