//! TAR archive file system
//!
//! Walks the 512-byte header blocks of a ustar archive once at open,
//! building the member table with verified header checksums. GNU long-name
//! extensions are honored; pax extended headers are skipped. Member data is
//! served as a range window over a fresh parent stream, so entry streams
//! are independent of each other.

use std::io::SeekFrom;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::error::{VfsError, VfsResult};
use crate::path_spec::{ArchiveFormat, PathSpec, TypeIndicator};
use crate::stream::data_range::DataRangeStream;
use crate::stream::FileObject;
use crate::vfs::{
    location_of, normalize_location, DataStream, EntryIndex, EntryIterator, EntryType, FileEntry,
    FileSystem, Stat, StreamOpener,
};

const BLOCK_SIZE: u64 = 512;

#[derive(Debug, Clone)]
struct TarMember {
    data_offset: u64,
    size: u64,
    entry_type: EntryType,
    link_target: Option<String>,
    modification_time: Option<DateTime<Utc>>,
    mode: u32,
    owner: u32,
    group: u32,
}

struct Inner {
    index: EntryIndex<TarMember>,
    opener: StreamOpener,
    parent_spec: PathSpec,
}

pub struct TarFileSystem {
    inner: Arc<Inner>,
}

/// Octal field: ASCII digits padded with spaces or NULs.
fn parse_octal(field: &[u8]) -> VfsResult<u64> {
    let text: String = field
        .iter()
        .map(|&b| b as char)
        .filter(|c| c.is_ascii_digit())
        .collect();
    if text.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(&text, 8)
        .map_err(|_| VfsError::InvalidData("malformed octal field in tar header".to_string()))
}

/// Validates a 512-byte header block's stored checksum. Also used by the
/// analyzer to confirm a `ustar` eyecatcher belongs to a real header.
pub(crate) fn header_block_checksum_valid(header: &[u8]) -> bool {
    let stored = match parse_octal(&header[148..156]) {
        Ok(value) => value,
        Err(_) => return false,
    };
    // The checksum field itself counts as spaces.
    let computed: u64 = header
        .iter()
        .enumerate()
        .map(|(i, &b)| if (148..156).contains(&i) { 0x20u64 } else { b as u64 })
        .sum();
    stored == computed
}

fn entry_type_for(typeflag: u8) -> EntryType {
    match typeflag {
        b'5' => EntryType::Directory,
        b'1' | b'2' => EntryType::Link,
        b'3' | b'4' => EntryType::Device,
        b'6' => EntryType::Pipe,
        _ => EntryType::File,
    }
}

impl TarFileSystem {
    pub fn open(opener: StreamOpener, parent_spec: PathSpec) -> VfsResult<Self> {
        let mut stream = opener()?;
        let mut index: EntryIndex<TarMember> = EntryIndex::new();
        let mut offset = 0u64;
        let mut pending_long_name: Option<String> = None;
        let mut pending_long_link: Option<String> = None;
        let mut members = 0usize;

        loop {
            stream.seek(SeekFrom::Start(offset))?;
            let mut header = [0u8; BLOCK_SIZE as usize];
            let count = stream.read(&mut header)?;
            if count == 0 {
                break;
            }
            if count < header.len() {
                return Err(VfsError::InvalidData(format!(
                    "truncated tar header at {}",
                    offset
                )));
            }
            // An all-zero block terminates the archive.
            if header.iter().all(|&b| b == 0) {
                break;
            }
            if !header_block_checksum_valid(&header) {
                return Err(VfsError::InvalidData(format!(
                    "tar header checksum mismatch at {}",
                    offset
                )));
            }

            let size = parse_octal(&header[124..136])?;
            let typeflag = header[156];
            let data_offset = offset + BLOCK_SIZE;
            let data_blocks = size.div_ceil(BLOCK_SIZE);
            let next_offset = data_offset + data_blocks * BLOCK_SIZE;

            match typeflag {
                // GNU long name / long link: the data holds the real name
                // for the next header.
                b'L' | b'K' => {
                    let mut name_data = vec![0u8; size as usize];
                    crate::stream::read_exact_at(stream.as_mut(), data_offset, &mut name_data)?;
                    let text = crate::common::binary::bytes_to_string(&name_data);
                    if typeflag == b'L' {
                        pending_long_name = Some(text);
                    } else {
                        pending_long_link = Some(text);
                    }
                    offset = next_offset;
                    continue;
                }
                // pax extended headers carry attributes this model already
                // gets from the ustar fields.
                b'x' | b'g' => {
                    offset = next_offset;
                    continue;
                }
                _ => {}
            }

            let name = match pending_long_name.take() {
                Some(name) => name,
                None => {
                    let base = crate::common::binary::bytes_to_string(&header[0..100]);
                    let prefix = crate::common::binary::bytes_to_string(&header[345..500]);
                    if prefix.is_empty() {
                        base
                    } else {
                        format!("{}/{}", prefix, base)
                    }
                }
            };
            if name.is_empty() {
                return Err(VfsError::InvalidData(format!(
                    "tar header without name at {}",
                    offset
                )));
            }

            let link_target = match pending_long_link.take() {
                Some(target) => Some(target),
                None => {
                    let target = crate::common::binary::bytes_to_string(&header[157..257]);
                    (!target.is_empty()).then_some(target)
                }
            };

            let entry_type = if name.ends_with('/') {
                EntryType::Directory
            } else {
                entry_type_for(typeflag)
            };
            let mtime = parse_octal(&header[136..148])?;
            let member = TarMember {
                data_offset,
                size,
                entry_type,
                link_target,
                modification_time: DateTime::<Utc>::from_timestamp(mtime as i64, 0),
                mode: parse_octal(&header[100..108])? as u32,
                owner: parse_octal(&header[108..116])? as u32,
                group: parse_octal(&header[116..124])? as u32,
            };

            let location = normalize_location(&name);
            trace!(location = location.as_str(), size, "tar member");
            index.insert(&location, member, entry_type == EntryType::Directory);
            members += 1;
            offset = next_offset;
        }

        if members == 0 {
            return Err(VfsError::InvalidData("empty or not a tar archive".to_string()));
        }
        debug!(members, "Indexed tar archive");
        Ok(Self {
            inner: Arc::new(Inner {
                index,
                opener,
                parent_spec,
            }),
        })
    }
}

struct TarFileEntry {
    inner: Arc<Inner>,
    location: String,
}

impl TarFileEntry {
    fn member(&self) -> Option<&TarMember> {
        self.inner
            .index
            .get(&self.location)
            .and_then(|n| n.meta.as_ref())
    }

    fn is_dir_node(&self) -> bool {
        self.inner
            .index
            .get(&self.location)
            .map(|n| n.is_directory)
            .unwrap_or(false)
    }
}

impl FileEntry for TarFileEntry {
    fn name(&self) -> String {
        self.location
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string()
    }

    fn path_spec(&self) -> PathSpec {
        PathSpec::Archive {
            format: ArchiveFormat::Tar,
            location: self.location.clone(),
            parent: Box::new(self.inner.parent_spec.clone()),
        }
    }

    fn entry_type(&self) -> EntryType {
        if self.is_dir_node() {
            return EntryType::Directory;
        }
        self.member()
            .map(|m| m.entry_type)
            .unwrap_or(EntryType::Directory)
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
        Ok(Some(Box::new(TarFileEntry {
            inner: Arc::clone(&self.inner),
            location: parent,
        })))
    }

    fn sub_entries(&self) -> VfsResult<EntryIterator<'_>> {
        let children = self.inner.index.children(&self.location);
        let inner = Arc::clone(&self.inner);
        Ok(Box::new(children.into_iter().map(move |location| {
            Ok(Box::new(TarFileEntry {
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

    fn link_target(&self) -> VfsResult<Option<String>> {
        Ok(self.member().and_then(|m| m.link_target.clone()))
    }

    fn stat(&self) -> VfsResult<Stat> {
        let member = self.member();
        Ok(Stat {
            entry_type: Some(self.entry_type()),
            size: member.map(|m| m.size),
            modification_time: member.and_then(|m| m.modification_time),
            mode: member.map(|m| m.mode),
            owner_identifier: member.map(|m| m.owner),
            group_identifier: member.map(|m| m.group),
            ..Stat::default()
        })
    }

    fn file_object(&self, data_stream: Option<&str>) -> VfsResult<Box<dyn FileObject>> {
        if let Some(name) = data_stream {
            if !name.is_empty() {
                return Err(VfsError::NotFound(format!(
                    "tar members have no data stream named {}",
                    name
                )));
            }
        }
        let member = self.member().ok_or_else(|| {
            VfsError::NotFound(format!("no member data for {}", self.location))
        })?;
        if member.entry_type != EntryType::File {
            return Err(VfsError::InvalidData(format!(
                "{} is not a regular member",
                self.location
            )));
        }
        let parent = (self.inner.opener)()?;
        Ok(Box::new(DataRangeStream::new(
            parent,
            member.data_offset,
            member.size,
        )))
    }
}

impl FileSystem for TarFileSystem {
    fn type_indicator(&self) -> TypeIndicator {
        TypeIndicator::Tar
    }

    fn root_entry(&self) -> VfsResult<Box<dyn FileEntry>> {
        Ok(Box::new(TarFileEntry {
            inner: Arc::clone(&self.inner),
            location: "/".to_string(),
        }))
    }

    fn entry_by_spec(&self, spec: &PathSpec) -> VfsResult<Box<dyn FileEntry>> {
        let location = normalize_location(location_of(spec)?);
        if !self.inner.index.contains(&location) {
            return Err(VfsError::NotFound(location));
        }
        Ok(Box::new(TarFileEntry {
            inner: Arc::clone(&self.inner),
            location,
        }))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::stream::fake::FakeStream;
    use crate::vfs::opener_from;

    /// Minimal ustar writer for fixtures.
    pub(crate) fn tar_fixture(members: &[(&str, &[u8], u8)]) -> Vec<u8> {
        let mut out = Vec::new();
        for (name, data, typeflag) in members {
            let mut header = vec![0u8; 512];
            header[..name.len()].copy_from_slice(name.as_bytes());
            header[100..107].copy_from_slice(b"0000644");
            header[108..115].copy_from_slice(b"0001000");
            header[116..123].copy_from_slice(b"0001000");
            let size_field = format!("{:011o}", data.len());
            header[124..135].copy_from_slice(size_field.as_bytes());
            header[136..147].copy_from_slice(b"14000000000");
            header[156] = *typeflag;
            header[257..262].copy_from_slice(b"ustar");
            header[263..265].copy_from_slice(b"00");

            let checksum: u64 = header
                .iter()
                .enumerate()
                .map(|(i, &b)| if (148..156).contains(&i) { 0x20u64 } else { b as u64 })
                .sum();
            let checksum_field = format!("{:06o}\0 ", checksum);
            header[148..156].copy_from_slice(checksum_field.as_bytes());

            out.extend_from_slice(&header);
            out.extend_from_slice(data);
            let padding = (512 - data.len() % 512) % 512;
            out.extend(std::iter::repeat(0u8).take(padding));
        }
        out.extend(std::iter::repeat(0u8).take(1024));
        out
    }

    fn open_fixture(archive: Vec<u8>) -> TarFileSystem {
        let archive = Arc::new(archive);
        let parent = PathSpec::Os {
            location: "/archive.tar".to_string(),
        };
        let opener = opener_from(move || {
            Ok(Box::new(FakeStream::from_shared(Arc::clone(&archive)))
                as Box<dyn FileObject>)
        });
        TarFileSystem::open(opener, parent).unwrap()
    }

    #[test]
    fn test_member_listing() {
        let fs = open_fixture(tar_fixture(&[
            ("etc/", b"", b'5'),
            ("etc/passwd", b"root:x:0:0\n", b'0'),
            ("syslog", b"line one\n", b'0'),
        ]));
        let root = fs.root_entry().unwrap();
        let names: Vec<String> = root
            .sub_entries()
            .unwrap()
            .map(|e| e.unwrap().name())
            .collect();
        assert_eq!(names, vec!["etc", "syslog"]);
    }

    #[test]
    fn test_member_data() {
        let fs = open_fixture(tar_fixture(&[("syslog", b"the log body", b'0')]));
        let spec = PathSpec::Archive {
            format: ArchiveFormat::Tar,
            location: "/syslog".to_string(),
            parent: Box::new(PathSpec::Os {
                location: "/archive.tar".to_string(),
            }),
        };
        let entry = fs.entry_by_spec(&spec).unwrap();
        assert_eq!(entry.stat().unwrap().size, Some(12));

        let mut stream = entry.file_object(None).unwrap();
        let data = crate::stream::read_to_end(stream.as_mut()).unwrap();
        assert_eq!(data, b"the log body");
    }

    #[test]
    fn test_independent_entry_streams() {
        let fs = open_fixture(tar_fixture(&[("a", b"first", b'0'), ("b", b"second", b'0')]));
        let parent = PathSpec::Os {
            location: "/archive.tar".to_string(),
        };
        let spec_a = PathSpec::Archive {
            format: ArchiveFormat::Tar,
            location: "/a".to_string(),
            parent: Box::new(parent.clone()),
        };
        let spec_b = PathSpec::Archive {
            format: ArchiveFormat::Tar,
            location: "/b".to_string(),
            parent: Box::new(parent),
        };

        let mut stream_a = fs.entry_by_spec(&spec_a).unwrap().file_object(None).unwrap();
        let mut stream_b = fs.entry_by_spec(&spec_b).unwrap().file_object(None).unwrap();

        let mut buf = [0u8; 3];
        stream_a.read(&mut buf).unwrap();
        assert_eq!(&buf, b"fir");
        let mut buf6 = [0u8; 6];
        stream_b.read(&mut buf6).unwrap();
        assert_eq!(&buf6, b"second");
        stream_a.read(&mut buf).unwrap();
        assert_eq!(&buf[..2], b"st");
    }

    #[test]
    fn test_checksum_rejected() {
        let mut archive = tar_fixture(&[("x", b"data", b'0')]);
        archive[148] = b'9'; // corrupt the stored checksum
        let parent = PathSpec::Os {
            location: "/bad.tar".to_string(),
        };
        let archive = Arc::new(archive);
        let opener = opener_from(move || {
            Ok(Box::new(FakeStream::from_shared(Arc::clone(&archive)))
                as Box<dyn FileObject>)
        });
        assert!(matches!(
            TarFileSystem::open(opener, parent),
            Err(VfsError::InvalidData(_))
        ));
    }

    #[test]
    fn test_symlink_member() {
        let mut archive = Vec::new();
        // symlink header with linkname field set
        let mut header = vec![0u8; 512];
        header[..4].copy_from_slice(b"link");
        header[100..107].copy_from_slice(b"0000777");
        header[124..135].copy_from_slice(b"00000000000");
        header[136..147].copy_from_slice(b"14000000000");
        header[156] = b'2';
        header[157..163].copy_from_slice(b"target");
        header[257..262].copy_from_slice(b"ustar");
        let checksum: u64 = header
            .iter()
            .enumerate()
            .map(|(i, &b)| if (148..156).contains(&i) { 0x20u64 } else { b as u64 })
            .sum();
        header[148..156].copy_from_slice(format!("{:06o}\0 ", checksum).as_bytes());
        archive.extend_from_slice(&header);
        archive.extend(std::iter::repeat(0u8).take(1024));

        let parent = PathSpec::Os {
            location: "/links.tar".to_string(),
        };
        let archive = Arc::new(archive);
        let opener = opener_from(move || {
            Ok(Box::new(FakeStream::from_shared(Arc::clone(&archive)))
                as Box<dyn FileObject>)
        });
        let fs = TarFileSystem::open(opener, parent).unwrap();

        let spec = PathSpec::Archive {
            format: ArchiveFormat::Tar,
            location: "/link".to_string(),
            parent: Box::new(PathSpec::Os {
                location: "/links.tar".to_string(),
            }),
        };
        let entry = fs.entry_by_spec(&spec).unwrap();
        assert_eq!(entry.entry_type(), EntryType::Link);
        assert_eq!(entry.link_target().unwrap(), Some("target".to_string()));
    }
}
