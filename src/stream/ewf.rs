//! Expert Witness Format (E01) storage media stream
//!
//! Walks the section chain across all segment files, collecting the volume
//! geometry and the chunk tables, then serves reads chunk by chunk with a
//! small LRU cache of decompressed chunks. Chunk offsets carry the
//! compression flag in the high bit; compressed chunks are zlib streams.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use flate2::read::ZlibDecoder;
use tracing::{debug, trace};

use crate::common::io_pool::FileIoPool;
use crate::common::segments::discover_ewf_segments;
use crate::error::{VfsError, VfsResult};
use crate::stream::{resolve_seek, FileObject};

const EWF_SIGNATURE: [u8; 8] = [0x45, 0x56, 0x46, 0x09, 0x0D, 0x0A, 0xFF, 0x00];
const SECTION_DESCRIPTOR_SIZE: u64 = 76;
const FIRST_SECTION_OFFSET: u64 = 13;
const MAX_SECTIONS: u32 = 10_000;
const CHUNK_CACHE_SIZE: usize = 64;
const COMPRESSED_FLAG: u64 = 0x8000_0000;

#[derive(Debug, Clone)]
struct VolumeSection {
    chunk_count: u32,
    sectors_per_chunk: u32,
    bytes_per_sector: u32,
    sector_count: u64,
}

#[derive(Debug, Clone)]
struct ChunkLocation {
    segment_index: usize,
    /// Raw table entry: compression flag in the high bit, offset below.
    raw_offset: u64,
    base_offset: u64,
}

struct SectionDescriptor {
    section_type: String,
    next_offset: u64,
}

/// LRU cache of decompressed chunk data
struct ChunkCache {
    entries: HashMap<usize, Vec<u8>>,
    order: VecDeque<usize>,
    capacity: usize,
}

impl ChunkCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn get(&mut self, chunk_index: usize) -> Option<Vec<u8>> {
        if let Some(data) = self.entries.get(&chunk_index) {
            self.order.retain(|&i| i != chunk_index);
            self.order.push_front(chunk_index);
            return Some(data.clone());
        }
        None
    }

    fn insert(&mut self, chunk_index: usize, data: Vec<u8>) {
        if self.entries.len() >= self.capacity {
            if let Some(evicted) = self.order.pop_back() {
                self.entries.remove(&evicted);
            }
        }
        self.entries.insert(chunk_index, data);
        self.order.push_front(chunk_index);
    }
}

pub struct EwfStream {
    pool: FileIoPool,
    segment_sizes: Vec<u64>,
    volume: VolumeSection,
    chunk_table: Vec<ChunkLocation>,
    cache: ChunkCache,
    media_size: u64,
    offset: u64,
}

impl EwfStream {
    /// Opens an E01 segment set from the path of its first segment.
    pub fn open(location: &str) -> VfsResult<Self> {
        let segment_paths = discover_ewf_segments(location)?;
        let mut segment_sizes = Vec::with_capacity(segment_paths.len());
        for path in &segment_paths {
            segment_sizes.push(std::fs::metadata(path)?.len());
        }
        let mut pool = FileIoPool::with_default_limit(segment_paths);

        // Every segment starts with the EWF signature.
        for index in 0..pool.file_count() {
            let file = pool.get_file(index)?;
            let mut signature = [0u8; 8];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut signature)?;
            if signature != EWF_SIGNATURE {
                return Err(VfsError::InvalidData(format!(
                    "segment {} has no EWF signature",
                    index
                )));
            }
        }

        let (volume, chunk_table) = Self::parse_sections(&mut pool, &segment_sizes)?;
        let media_size = volume.sector_count * volume.bytes_per_sector as u64;
        debug!(
            segments = segment_sizes.len(),
            chunks = chunk_table.len(),
            media_size,
            "Opened EWF image"
        );
        Ok(Self {
            pool,
            segment_sizes,
            volume,
            chunk_table,
            cache: ChunkCache::new(CHUNK_CACHE_SIZE),
            media_size,
            offset: 0,
        })
    }

    fn chunk_size(&self) -> usize {
        self.volume.sectors_per_chunk as usize * self.volume.bytes_per_sector as usize
    }

    /// Walks the section chain of every segment. Section `next` offsets are
    /// relative to their segment file.
    fn parse_sections(
        pool: &mut FileIoPool,
        segment_sizes: &[u64],
    ) -> VfsResult<(VolumeSection, Vec<ChunkLocation>)> {
        let mut volume: Option<VolumeSection> = None;
        let mut chunk_table: Vec<ChunkLocation> = Vec::new();
        let mut section_count = 0u32;

        let mut segment_index = 0usize;
        let mut offset_in_segment = FIRST_SECTION_OFFSET;

        loop {
            section_count += 1;
            if section_count > MAX_SECTIONS {
                return Err(VfsError::CorruptVolume(
                    "EWF section chain exceeds section limit".to_string(),
                ));
            }
            if offset_in_segment + 32 > segment_sizes[segment_index] {
                return Err(VfsError::CorruptVolume(format!(
                    "EWF section descriptor at {} overruns segment {}",
                    offset_in_segment, segment_index
                )));
            }

            let descriptor =
                Self::read_section_descriptor(pool.get_file(segment_index)?, offset_in_segment)?;
            trace!(
                section = descriptor.section_type.as_str(),
                segment_index,
                offset_in_segment,
                "EWF section"
            );
            let data_offset = offset_in_segment + SECTION_DESCRIPTOR_SIZE;

            match descriptor.section_type.as_str() {
                "volume" | "disk" => {
                    if volume.is_none() {
                        let file = pool.get_file(segment_index)?;
                        volume = Some(Self::read_volume_section(file, data_offset)?);
                    }
                }
                "table" => {
                    let file = pool.get_file(segment_index)?;
                    Self::read_table_section(file, data_offset, segment_index, &mut chunk_table)?;
                }
                "done" => break,
                "next" => {
                    if segment_index + 1 >= segment_sizes.len() {
                        break;
                    }
                    segment_index += 1;
                    offset_in_segment = FIRST_SECTION_OFFSET;
                    continue;
                }
                // header, header2, hash, digest, sectors, table2 carry
                // nothing the stream needs.
                _ => {}
            }

            if descriptor.next_offset == 0 || descriptor.next_offset == offset_in_segment {
                break;
            }
            offset_in_segment = descriptor.next_offset;
        }

        let volume = volume.ok_or_else(|| {
            VfsError::InvalidData("EWF image has no volume section".to_string())
        })?;
        Ok((volume, chunk_table))
    }

    fn read_section_descriptor(file: &mut File, offset: u64) -> VfsResult<SectionDescriptor> {
        file.seek(SeekFrom::Start(offset))?;
        let mut type_bytes = [0u8; 16];
        file.read_exact(&mut type_bytes)?;
        let mut tail = [0u8; 16];
        file.read_exact(&mut tail)?;

        let end = type_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(type_bytes.len());
        Ok(SectionDescriptor {
            section_type: String::from_utf8_lossy(&type_bytes[..end]).to_string(),
            next_offset: u64::from_le_bytes(tail[..8].try_into().expect("8 bytes")),
        })
    }

    fn read_volume_section(file: &mut File, offset: u64) -> VfsResult<VolumeSection> {
        file.seek(SeekFrom::Start(offset))?;
        let mut data = [0u8; 24];
        file.read_exact(&mut data)?;

        let volume = VolumeSection {
            // data[0..4] is media type and padding.
            chunk_count: u32::from_le_bytes(data[4..8].try_into().expect("4 bytes")),
            sectors_per_chunk: u32::from_le_bytes(data[8..12].try_into().expect("4 bytes")),
            bytes_per_sector: u32::from_le_bytes(data[12..16].try_into().expect("4 bytes")),
            sector_count: u64::from_le_bytes(data[16..24].try_into().expect("8 bytes")),
        };
        if volume.sectors_per_chunk == 0 || volume.bytes_per_sector == 0 {
            return Err(VfsError::InvalidData(
                "EWF volume section has zero chunk geometry".to_string(),
            ));
        }
        trace!(?volume, "EWF volume section");
        Ok(volume)
    }

    fn read_table_section(
        file: &mut File,
        offset: u64,
        segment_index: usize,
        chunk_table: &mut Vec<ChunkLocation>,
    ) -> VfsResult<()> {
        file.seek(SeekFrom::Start(offset))?;
        let mut header = [0u8; 24];
        file.read_exact(&mut header)?;

        let entry_count = u32::from_le_bytes(header[..4].try_into().expect("4 bytes"));
        let base_offset = u64::from_le_bytes(header[8..16].try_into().expect("8 bytes"));

        for _ in 0..entry_count {
            let mut entry = [0u8; 4];
            file.read_exact(&mut entry)?;
            chunk_table.push(ChunkLocation {
                segment_index,
                raw_offset: u32::from_le_bytes(entry) as u64,
                base_offset,
            });
        }
        trace!(entry_count, base_offset, "EWF table section");
        Ok(())
    }

    fn read_chunk(&mut self, chunk_index: usize) -> VfsResult<Vec<u8>> {
        if let Some(data) = self.cache.get(chunk_index) {
            return Ok(data);
        }

        let chunk_size = self.chunk_size();
        let location = match self.chunk_table.get(chunk_index) {
            Some(location) => location.clone(),
            None => {
                // Chunk missing from every table: sparse, reads as zeros.
                if chunk_index >= self.volume.chunk_count as usize {
                    return Err(VfsError::CorruptVolume(format!(
                        "chunk {} beyond chunk count {}",
                        chunk_index, self.volume.chunk_count
                    )));
                }
                return Ok(vec![0u8; chunk_size]);
            }
        };

        let is_compressed = location.raw_offset & COMPRESSED_FLAG != 0;
        let data_offset = location.base_offset + (location.raw_offset & !COMPRESSED_FLAG);
        let segment_size = self.segment_sizes[location.segment_index];
        if data_offset >= segment_size {
            return Err(VfsError::CorruptVolume(format!(
                "chunk {} offset {} beyond segment size {}",
                chunk_index, data_offset, segment_size
            )));
        }

        let file = self.pool.get_file(location.segment_index)?;
        file.seek(SeekFrom::Start(data_offset))?;

        let data = if is_compressed {
            let bounded = file.take((chunk_size * 2) as u64);
            let mut decoder = ZlibDecoder::new(bounded);
            let mut decompressed = Vec::with_capacity(chunk_size);
            decoder.read_to_end(&mut decompressed).map_err(|e| {
                VfsError::InvalidData(format!(
                    "chunk {} decompression at {}: {}",
                    chunk_index, data_offset, e
                ))
            })?;
            decompressed
        } else {
            let available = ((segment_size - data_offset) as usize).min(chunk_size);
            let mut raw = vec![0u8; available];
            file.read_exact(&mut raw)?;
            raw
        };

        self.cache.insert(chunk_index, data.clone());
        Ok(data)
    }
}

impl FileObject for EwfStream {
    fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        if self.offset >= self.media_size {
            return Ok(0);
        }
        let chunk_size = self.chunk_size() as u64;
        let mut filled = 0;

        while filled < buf.len() && self.offset < self.media_size {
            let chunk_index = (self.offset / chunk_size) as usize;
            let chunk_offset = (self.offset % chunk_size) as usize;
            let chunk = self.read_chunk(chunk_index)?;
            if chunk_offset >= chunk.len() {
                break;
            }

            let media_remaining = (self.media_size - self.offset) as usize;
            let take = (buf.len() - filled)
                .min(chunk.len() - chunk_offset)
                .min(media_remaining);
            buf[filled..filled + take]
                .copy_from_slice(&chunk[chunk_offset..chunk_offset + take]);
            filled += take;
            self.offset += take as u64;
        }
        Ok(filled)
    }

    fn seek(&mut self, pos: SeekFrom) -> VfsResult<u64> {
        let size = self.media_size;
        self.offset = resolve_seek(pos, self.offset, || Ok(size))?;
        Ok(self.offset)
    }

    fn offset(&self) -> u64 {
        self.offset
    }

    fn size(&mut self) -> VfsResult<u64> {
        Ok(self.media_size)
    }
}
