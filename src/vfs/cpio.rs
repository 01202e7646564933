//! cpio archive file system
//!
//! Supports the three header families that appear in forensic captures:
//! new ASCII (newc, `070701`) and its CRC sibling (`070702`), portable
//! ASCII (odc, `070707`), and the old binary format. Records are walked
//! once at open; the `TRAILER!!!` record ends the archive.

use std::io::SeekFrom;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::common::binary;
use crate::error::{VfsError, VfsResult};
use crate::path_spec::{ArchiveFormat, PathSpec, TypeIndicator};
use crate::stream::data_range::DataRangeStream;
use crate::stream::FileObject;
use crate::vfs::{
    location_of, normalize_location, DataStream, EntryIndex, EntryIterator, EntryType, FileEntry,
    FileSystem, Stat, StreamOpener,
};

const TRAILER_NAME: &str = "TRAILER!!!";

const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;
const S_IFLNK: u32 = 0o120000;
const S_IFREG: u32 = 0o100000;
const S_IFCHR: u32 = 0o020000;
const S_IFBLK: u32 = 0o060000;
const S_IFIFO: u32 = 0o010000;
const S_IFSOCK: u32 = 0o140000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CpioVariant {
    Newc,
    Crc,
    Odc,
    Binary,
}

#[derive(Debug, Clone)]
struct CpioRecord {
    data_offset: u64,
    size: u64,
    mode: u32,
    owner: u32,
    group: u32,
    modification_time: Option<DateTime<Utc>>,
    link_count: u32,
}

struct Inner {
    index: EntryIndex<CpioRecord>,
    opener: StreamOpener,
    parent_spec: PathSpec,
}

pub struct CpioFileSystem {
    inner: Arc<Inner>,
}

fn entry_type_from_mode(mode: u32) -> EntryType {
    match mode & S_IFMT {
        S_IFDIR => EntryType::Directory,
        S_IFLNK => EntryType::Link,
        S_IFCHR | S_IFBLK => EntryType::Device,
        S_IFIFO => EntryType::Pipe,
        S_IFSOCK => EntryType::Socket,
        _ => EntryType::File,
    }
}

fn parse_hex_field(data: &[u8]) -> VfsResult<u64> {
    let text = std::str::from_utf8(data)
        .map_err(|_| VfsError::InvalidData("non-ASCII cpio header field".to_string()))?;
    u64::from_str_radix(text.trim(), 16)
        .map_err(|_| VfsError::InvalidData(format!("malformed cpio hex field: {}", text)))
}

fn parse_octal_field(data: &[u8]) -> VfsResult<u64> {
    let text = std::str::from_utf8(data)
        .map_err(|_| VfsError::InvalidData("non-ASCII cpio header field".to_string()))?;
    u64::from_str_radix(text.trim(), 8)
        .map_err(|_| VfsError::InvalidData(format!("malformed cpio octal field: {}", text)))
}

fn align(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

struct RawRecord {
    name: String,
    mode: u32,
    owner: u32,
    group: u32,
    mtime: u64,
    link_count: u32,
    data_offset: u64,
    size: u64,
    next_offset: u64,
}

fn read_record(
    stream: &mut dyn FileObject,
    offset: u64,
    variant: CpioVariant,
) -> VfsResult<RawRecord> {
    match variant {
        CpioVariant::Newc | CpioVariant::Crc => {
            let header = binary::read_bytes_at(stream, offset, 110)?;
            let field = |i: usize| parse_hex_field(&header[6 + i * 8..14 + i * 8]);
            let mode = field(1)? as u32;
            let owner = field(2)? as u32;
            let group = field(3)? as u32;
            let link_count = field(4)? as u32;
            let mtime = field(5)?;
            let size = field(6)?;
            let name_size = field(11)?;

            let name_bytes = binary::read_bytes_at(stream, offset + 110, name_size as usize)?;
            let name = binary::bytes_to_string(&name_bytes);
            let data_offset = align(offset + 110 + name_size, 4);
            let next_offset = align(data_offset + size, 4);
            Ok(RawRecord {
                name,
                mode,
                owner,
                group,
                mtime,
                link_count,
                data_offset,
                size,
                next_offset,
            })
        }
        CpioVariant::Odc => {
            let header = binary::read_bytes_at(stream, offset, 76)?;
            let mode = parse_octal_field(&header[18..24])? as u32;
            let owner = parse_octal_field(&header[24..30])? as u32;
            let group = parse_octal_field(&header[30..36])? as u32;
            let link_count = parse_octal_field(&header[36..42])? as u32;
            let mtime = parse_octal_field(&header[48..59])?;
            let name_size = parse_octal_field(&header[59..65])?;
            let size = parse_octal_field(&header[65..76])?;

            let name_bytes = binary::read_bytes_at(stream, offset + 76, name_size as usize)?;
            let name = binary::bytes_to_string(&name_bytes);
            let data_offset = offset + 76 + name_size;
            Ok(RawRecord {
                name,
                mode,
                owner,
                group,
                mtime,
                link_count,
                data_offset,
                size,
                next_offset: data_offset + size,
            })
        }
        CpioVariant::Binary => {
            let header = binary::read_bytes_at(stream, offset, 26)?;
            let field = |i: usize| u16::from_le_bytes([header[i * 2], header[i * 2 + 1]]);
            let mode = field(3) as u32;
            let owner = field(4) as u32;
            let group = field(5) as u32;
            let link_count = field(6) as u32;
            let mtime = ((field(8) as u64) << 16) | field(9) as u64;
            let name_size = field(10) as u64;
            let size = ((field(11) as u64) << 16) | field(12) as u64;

            let name_bytes = binary::read_bytes_at(stream, offset + 26, name_size as usize)?;
            let name = binary::bytes_to_string(&name_bytes);
            let data_offset = align(offset + 26 + name_size, 2);
            let next_offset = align(data_offset + size, 2);
            Ok(RawRecord {
                name,
                mode,
                owner,
                group,
                mtime,
                link_count,
                data_offset,
                size,
                next_offset,
            })
        }
    }
}

impl CpioFileSystem {
    pub fn open(opener: StreamOpener, parent_spec: PathSpec) -> VfsResult<Self> {
        let mut stream = opener()?;
        let mut magic = [0u8; 6];
        crate::stream::read_exact_at(stream.as_mut(), 0, &mut magic)?;
        let variant = match &magic {
            b"070701" => CpioVariant::Newc,
            b"070702" => CpioVariant::Crc,
            b"070707" => CpioVariant::Odc,
            _ if magic[0] == 0xc7 && magic[1] == 0x71 => CpioVariant::Binary,
            _ => {
                return Err(VfsError::InvalidData(format!(
                    "not a cpio archive: magic {:02x?}",
                    magic
                )))
            }
        };

        let mut index: EntryIndex<CpioRecord> = EntryIndex::new();
        let mut offset = 0u64;
        let mut records = 0usize;
        loop {
            let record = read_record(stream.as_mut(), offset, variant)?;
            if record.name == TRAILER_NAME {
                break;
            }
            if record.name.is_empty() {
                return Err(VfsError::InvalidData(format!(
                    "cpio record without name at {}",
                    offset
                )));
            }

            let location = normalize_location(&record.name);
            if location != "/" {
                let entry_type = entry_type_from_mode(record.mode);
                trace!(location = location.as_str(), size = record.size, "cpio record");
                index.insert(
                    &location,
                    CpioRecord {
                        data_offset: record.data_offset,
                        size: record.size,
                        mode: record.mode,
                        owner: record.owner,
                        group: record.group,
                        modification_time: DateTime::<Utc>::from_timestamp(
                            record.mtime as i64,
                            0,
                        ),
                        link_count: record.link_count,
                    },
                    entry_type == EntryType::Directory,
                );
                records += 1;
            }
            offset = record.next_offset;
        }

        if records == 0 {
            return Err(VfsError::InvalidData("cpio archive has no records".to_string()));
        }
        debug!(records, ?variant, "Indexed cpio archive");
        Ok(Self {
            inner: Arc::new(Inner {
                index,
                opener,
                parent_spec,
            }),
        })
    }
}

struct CpioFileEntry {
    inner: Arc<Inner>,
    location: String,
}

impl CpioFileEntry {
    fn record(&self) -> Option<&CpioRecord> {
        self.inner
            .index
            .get(&self.location)
            .and_then(|n| n.meta.as_ref())
    }
}

impl FileEntry for CpioFileEntry {
    fn name(&self) -> String {
        self.location
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string()
    }

    fn path_spec(&self) -> PathSpec {
        PathSpec::Archive {
            format: ArchiveFormat::Cpio,
            location: self.location.clone(),
            parent: Box::new(self.inner.parent_spec.clone()),
        }
    }

    fn entry_type(&self) -> EntryType {
        match self.record() {
            Some(record) => entry_type_from_mode(record.mode),
            None => EntryType::Directory,
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
        Ok(Some(Box::new(CpioFileEntry {
            inner: Arc::clone(&self.inner),
            location: parent,
        })))
    }

    fn sub_entries(&self) -> VfsResult<EntryIterator<'_>> {
        let children = self.inner.index.children(&self.location);
        let inner = Arc::clone(&self.inner);
        Ok(Box::new(children.into_iter().map(move |location| {
            Ok(Box::new(CpioFileEntry {
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
        if self.entry_type() != EntryType::Link {
            return Ok(None);
        }
        let record = self.record().ok_or_else(|| {
            VfsError::NotFound(format!("no record for {}", self.location))
        })?;
        let mut parent = (self.inner.opener)()?;
        let data =
            binary::read_bytes_at(parent.as_mut(), record.data_offset, record.size as usize)?;
        Ok(Some(String::from_utf8_lossy(&data).to_string()))
    }

    fn stat(&self) -> VfsResult<Stat> {
        let record = self.record();
        Ok(Stat {
            entry_type: Some(self.entry_type()),
            size: record.map(|r| r.size),
            modification_time: record.and_then(|r| r.modification_time),
            mode: record.map(|r| r.mode),
            owner_identifier: record.map(|r| r.owner),
            group_identifier: record.map(|r| r.group),
            link_count: record.map(|r| r.link_count),
            ..Stat::default()
        })
    }

    fn file_object(&self, data_stream: Option<&str>) -> VfsResult<Box<dyn FileObject>> {
        if let Some(name) = data_stream {
            if !name.is_empty() {
                return Err(VfsError::NotFound(format!(
                    "cpio records have no data stream named {}",
                    name
                )));
            }
        }
        let record = self.record().ok_or_else(|| {
            VfsError::NotFound(format!("no record data for {}", self.location))
        })?;
        if entry_type_from_mode(record.mode) != EntryType::File {
            return Err(VfsError::InvalidData(format!(
                "{} is not a regular record",
                self.location
            )));
        }
        let parent = (self.inner.opener)()?;
        Ok(Box::new(DataRangeStream::new(
            parent,
            record.data_offset,
            record.size,
        )))
    }
}

impl FileSystem for CpioFileSystem {
    fn type_indicator(&self) -> TypeIndicator {
        TypeIndicator::Cpio
    }

    fn root_entry(&self) -> VfsResult<Box<dyn FileEntry>> {
        Ok(Box::new(CpioFileEntry {
            inner: Arc::clone(&self.inner),
            location: "/".to_string(),
        }))
    }

    fn entry_by_spec(&self, spec: &PathSpec) -> VfsResult<Box<dyn FileEntry>> {
        let location = normalize_location(location_of(spec)?);
        if !self.inner.index.contains(&location) {
            return Err(VfsError::NotFound(location));
        }
        Ok(Box::new(CpioFileEntry {
            inner: Arc::clone(&self.inner),
            location,
        }))
    }
}
