//! ZIP archive file system
//!
//! Locates the end-of-central-directory record by searching backwards from
//! the end of the stream, then indexes every central directory entry.
//! Stored members are served as range windows; deflated members get a
//! decompression layer with the size the central directory declares.
//! Encrypted members are indexed but refuse to open.

use std::io::SeekFrom;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, trace};

use crate::cancel::CancelToken;
use crate::common::binary;
use crate::error::{VfsError, VfsResult};
use crate::path_spec::{ArchiveFormat, CompressionMethod, PathSpec, TypeIndicator};
use crate::stream::compressed::CompressedStream;
use crate::stream::data_range::DataRangeStream;
use crate::stream::FileObject;
use crate::vfs::{
    location_of, normalize_location, DataStream, EntryIndex, EntryIterator, EntryType, FileEntry,
    FileSystem, Stat, StreamOpener,
};

const EOCD_SIGNATURE: &[u8; 4] = b"PK\x05\x06";
const CENTRAL_SIGNATURE: u32 = 0x0201_4b50;
const LOCAL_SIGNATURE: u32 = 0x0403_4b50;
/// EOCD fixed part plus the maximum comment length.
const EOCD_SEARCH_SPAN: u64 = 65_557;

const METHOD_STORED: u16 = 0;
const METHOD_DEFLATE: u16 = 8;
const FLAG_ENCRYPTED: u16 = 0x0001;

#[derive(Debug, Clone)]
struct ZipMember {
    method: u16,
    encrypted: bool,
    compressed_size: u64,
    uncompressed_size: u64,
    local_header_offset: u64,
    modification_time: Option<DateTime<Utc>>,
    unix_mode: Option<u32>,
}

struct Inner {
    index: EntryIndex<ZipMember>,
    opener: StreamOpener,
    parent_spec: PathSpec,
}

pub struct ZipFileSystem {
    inner: Arc<Inner>,
}

/// MS-DOS date/time pair to a date-time value. DOS stamps carry no zone;
/// they are surfaced as-is.
fn dos_datetime(date: u16, time: u16) -> Option<DateTime<Utc>> {
    let year = 1980 + ((date >> 9) & 0x7f) as i32;
    let month = ((date >> 5) & 0x0f) as u32;
    let day = (date & 0x1f) as u32;
    let hour = ((time >> 11) & 0x1f) as u32;
    let minute = ((time >> 5) & 0x3f) as u32;
    let second = ((time & 0x1f) * 2) as u32;
    Utc.with_ymd_and_hms(year, month, day, hour, minute, second)
        .single()
}

impl ZipFileSystem {
    pub fn open(opener: StreamOpener, parent_spec: PathSpec) -> VfsResult<Self> {
        let mut stream = opener()?;
        let size = stream.size()?;

        // Search backwards over the trailing window for the EOCD signature.
        let span = size.min(EOCD_SEARCH_SPAN);
        let mut tail = vec![0u8; span as usize];
        crate::stream::read_exact_at(stream.as_mut(), size - span, &mut tail)?;
        let eocd_pos = (0..tail.len().saturating_sub(3))
            .rev()
            .find(|&i| &tail[i..i + 4] == EOCD_SIGNATURE)
            .ok_or_else(|| {
                VfsError::InvalidData("no end-of-central-directory record".to_string())
            })?;
        if eocd_pos + 22 > tail.len() {
            return Err(VfsError::InvalidData(
                "truncated end-of-central-directory record".to_string(),
            ));
        }

        let entry_count = u16::from_le_bytes([tail[eocd_pos + 10], tail[eocd_pos + 11]]);
        let cd_offset = u32::from_le_bytes([
            tail[eocd_pos + 16],
            tail[eocd_pos + 17],
            tail[eocd_pos + 18],
            tail[eocd_pos + 19],
        ]);
        if cd_offset == 0xffff_ffff || entry_count == 0xffff {
            return Err(VfsError::InvalidData(
                "zip64 archives are not supported".to_string(),
            ));
        }

        let mut index: EntryIndex<ZipMember> = EntryIndex::new();
        let mut offset = cd_offset as u64;
        for _ in 0..entry_count {
            stream.seek(SeekFrom::Start(offset))?;
            let signature = binary::read_u32_le(stream.as_mut())?;
            if signature != CENTRAL_SIGNATURE {
                return Err(VfsError::CorruptVolume(format!(
                    "bad central directory signature at {}",
                    offset
                )));
            }
            let fixed = binary::read_bytes(stream.as_mut(), 42)?;
            let flags = u16::from_le_bytes([fixed[4], fixed[5]]);
            let method = u16::from_le_bytes([fixed[6], fixed[7]]);
            let dos_time = u16::from_le_bytes([fixed[8], fixed[9]]);
            let dos_date = u16::from_le_bytes([fixed[10], fixed[11]]);
            let compressed_size =
                u32::from_le_bytes([fixed[16], fixed[17], fixed[18], fixed[19]]) as u64;
            let uncompressed_size =
                u32::from_le_bytes([fixed[20], fixed[21], fixed[22], fixed[23]]) as u64;
            let name_length = u16::from_le_bytes([fixed[24], fixed[25]]) as u64;
            let extra_length = u16::from_le_bytes([fixed[26], fixed[27]]) as u64;
            let comment_length = u16::from_le_bytes([fixed[28], fixed[29]]) as u64;
            let external_attributes =
                u32::from_le_bytes([fixed[34], fixed[35], fixed[36], fixed[37]]);
            let local_header_offset =
                u32::from_le_bytes([fixed[38], fixed[39], fixed[40], fixed[41]]) as u64;

            let name_bytes = binary::read_bytes(stream.as_mut(), name_length as usize)?;
            let name = String::from_utf8_lossy(&name_bytes).to_string();

            let is_directory = name.ends_with('/');
            let unix_mode = (external_attributes >> 16 != 0).then_some(external_attributes >> 16);
            let member = ZipMember {
                method,
                encrypted: flags & FLAG_ENCRYPTED != 0,
                compressed_size,
                uncompressed_size,
                local_header_offset,
                modification_time: dos_datetime(dos_date, dos_time),
                unix_mode,
            };
            trace!(name = name.as_str(), method, "zip member");
            index.insert(&normalize_location(&name), member, is_directory);

            offset += 46 + name_length + extra_length + comment_length;
        }

        debug!(entries = entry_count, "Indexed zip archive");
        Ok(Self {
            inner: Arc::new(Inner {
                index,
                opener,
                parent_spec,
            }),
        })
    }
}

struct ZipFileEntry {
    inner: Arc<Inner>,
    location: String,
}

impl ZipFileEntry {
    fn member(&self) -> Option<&ZipMember> {
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

impl FileEntry for ZipFileEntry {
    fn name(&self) -> String {
        self.location
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string()
    }

    fn path_spec(&self) -> PathSpec {
        PathSpec::Archive {
            format: ArchiveFormat::Zip,
            location: self.location.clone(),
            parent: Box::new(self.inner.parent_spec.clone()),
        }
    }

    fn entry_type(&self) -> EntryType {
        if self.is_dir_node() {
            return EntryType::Directory;
        }
        match self.member().and_then(|m| m.unix_mode) {
            Some(mode) if mode & 0o170000 == 0o120000 => EntryType::Link,
            _ => EntryType::File,
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
        Ok(Some(Box::new(ZipFileEntry {
            inner: Arc::clone(&self.inner),
            location: parent,
        })))
    }

    fn sub_entries(&self) -> VfsResult<EntryIterator<'_>> {
        let children = self.inner.index.children(&self.location);
        let inner = Arc::clone(&self.inner);
        Ok(Box::new(children.into_iter().map(move |location| {
            Ok(Box::new(ZipFileEntry {
                inner: Arc::clone(&inner),
                location,
            }) as Box<dyn FileEntry>)
        })))
    }

    fn data_streams(&self) -> VfsResult<Vec<DataStream>> {
        Ok(match self.entry_type() {
            EntryType::Directory => Vec::new(),
            _ => vec![DataStream::default_stream()],
        })
    }

    fn link_target(&self) -> VfsResult<Option<String>> {
        if self.entry_type() != EntryType::Link {
            return Ok(None);
        }
        let mut stream = self.file_object(None)?;
        let data = crate::stream::read_to_end(stream.as_mut())?;
        Ok(Some(String::from_utf8_lossy(&data).to_string()))
    }

    fn stat(&self) -> VfsResult<Stat> {
        let member = self.member();
        Ok(Stat {
            entry_type: Some(self.entry_type()),
            size: member.map(|m| m.uncompressed_size),
            modification_time: member.and_then(|m| m.modification_time),
            mode: member.and_then(|m| m.unix_mode),
            ..Stat::default()
        })
    }

    fn file_object(&self, data_stream: Option<&str>) -> VfsResult<Box<dyn FileObject>> {
        if let Some(name) = data_stream {
            if !name.is_empty() {
                return Err(VfsError::NotFound(format!(
                    "zip members have no data stream named {}",
                    name
                )));
            }
        }
        let member = self
            .member()
            .cloned()
            .ok_or_else(|| VfsError::NotFound(format!("no member data for {}", self.location)))?;
        if member.encrypted {
            return Err(VfsError::EncryptedVolumeLocked(format!(
                "{} is an encrypted zip member",
                self.location
            )));
        }

        // The local header's own name/extra lengths decide where data
        // starts; they can differ from the central directory copy.
        let mut parent = (self.inner.opener)()?;
        let signature = binary::read_u32_at(parent.as_mut(), member.local_header_offset)?;
        if signature != LOCAL_SIGNATURE {
            return Err(VfsError::CorruptVolume(format!(
                "bad local header signature for {}",
                self.location
            )));
        }
        let local_fixed =
            binary::read_bytes_at(parent.as_mut(), member.local_header_offset + 26, 4)?;
        let name_length = u16::from_le_bytes([local_fixed[0], local_fixed[1]]) as u64;
        let extra_length = u16::from_le_bytes([local_fixed[2], local_fixed[3]]) as u64;
        let data_offset = member.local_header_offset + 30 + name_length + extra_length;

        let range = DataRangeStream::new(parent, data_offset, member.compressed_size);
        match member.method {
            METHOD_STORED => Ok(Box::new(range)),
            METHOD_DEFLATE => Ok(Box::new(
                CompressedStream::new(
                    Box::new(range),
                    CompressionMethod::Deflate,
                    CancelToken::new(),
                )?
                .with_declared_size(member.uncompressed_size),
            )),
            other => Err(VfsError::InvalidData(format!(
                "unsupported zip compression method {} for {}",
                other, self.location
            ))),
        }
    }
}

impl FileSystem for ZipFileSystem {
    fn type_indicator(&self) -> TypeIndicator {
        TypeIndicator::Zip
    }

    fn root_entry(&self) -> VfsResult<Box<dyn FileEntry>> {
        Ok(Box::new(ZipFileEntry {
            inner: Arc::clone(&self.inner),
            location: "/".to_string(),
        }))
    }

    fn entry_by_spec(&self, spec: &PathSpec) -> VfsResult<Box<dyn FileEntry>> {
        let location = normalize_location(location_of(spec)?);
        if !self.inner.index.contains(&location) {
            return Err(VfsError::NotFound(location));
        }
        Ok(Box::new(ZipFileEntry {
            inner: Arc::clone(&self.inner),
            location,
        }))
    }
}
