//! Raw (dd-style) storage media stream
//!
//! Raw images carry no metadata, so the stream is the image. Single files
//! pass straight through; split images (.001, .002, ...) are presented as
//! one contiguous byte stream spanning all segments, with the handles
//! managed by the shared LRU file pool.

use std::io::{Read, Seek, SeekFrom};

use tracing::debug;

use crate::common::io_pool::FileIoPool;
use crate::common::segments::discover_numbered_segments;
use crate::error::VfsResult;
use crate::stream::{resolve_seek, FileObject};

pub struct SegmentedRawStream {
    pool: FileIoPool,
    segment_sizes: Vec<u64>,
    total_size: u64,
    offset: u64,
}

impl SegmentedRawStream {
    /// Opens a raw image from its first segment (or only file).
    pub fn open(location: &str) -> VfsResult<Self> {
        let (paths, segment_sizes) = discover_numbered_segments(location)?;
        let total_size = segment_sizes.iter().sum();
        debug!(
            location,
            segments = paths.len(),
            total_size,
            "Opened raw image"
        );
        Ok(Self {
            pool: FileIoPool::with_default_limit(paths),
            segment_sizes,
            total_size,
            offset: 0,
        })
    }

    /// Convert absolute position to (segment_index, offset_within_segment)
    fn position_to_segment(&self, pos: u64) -> (usize, u64) {
        let mut remaining = pos;
        for (index, &size) in self.segment_sizes.iter().enumerate() {
            if remaining < size {
                return (index, remaining);
            }
            remaining -= size;
        }
        let last = self.segment_sizes.len() - 1;
        (last, self.segment_sizes[last])
    }
}

impl FileObject for SegmentedRawStream {
    fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        if self.offset >= self.total_size {
            return Ok(0);
        }

        let mut total_read = 0;
        while total_read < buf.len() && self.offset < self.total_size {
            let (segment_index, segment_offset) = self.position_to_segment(self.offset);
            let segment_remaining = (self.segment_sizes[segment_index] - segment_offset) as usize;
            let want = (buf.len() - total_read).min(segment_remaining);

            let file = self.pool.get_file(segment_index)?;
            file.seek(SeekFrom::Start(segment_offset))?;
            let count = file.read(&mut buf[total_read..total_read + want])?;
            if count == 0 {
                break;
            }
            total_read += count;
            self.offset += count as u64;
        }
        Ok(total_read)
    }

    fn seek(&mut self, pos: SeekFrom) -> VfsResult<u64> {
        let size = self.total_size;
        self.offset = resolve_seek(pos, self.offset, || Ok(size))?;
        Ok(self.offset)
    }

    fn offset(&self) -> u64 {
        self.offset
    }

    fn size(&mut self) -> VfsResult<u64> {
        Ok(self.total_size)
    }
}
