//! Format-aware gzip stream
//!
//! Multi-member gzip files are presented as the concatenation of their
//! decompressed members. Open scans the file once, indexing every member's
//! compressed start, decoded start and decoded size while validating CRC32
//! and ISIZE trailers; a member with a missing or truncated trailer is
//! invalid data. Seeks land on the member containing the target offset and
//! replay at member granularity, never from the file start.

use std::io::SeekFrom;

use tracing::{debug, trace};

use crate::cancel::{CancelCounter, CancelToken};
use crate::compression::{self, parse_member_header, Decompressor};
use crate::error::{VfsError, VfsResult};
use crate::path_spec::CompressionMethod;
use crate::stream::FileObject;

const CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone)]
struct Member {
    /// Offset of the member header in the parent stream.
    compressed_start: u64,
    /// Decoded offset of the member's first byte.
    decoded_start: u64,
    decoded_size: u64,
}

pub struct GzipStream {
    parent: Box<dyn FileObject>,
    members: Vec<Member>,
    size: u64,
    offset: u64,
    decompressor: Box<dyn Decompressor>,
    pending: Vec<u8>,
    window: Vec<u8>,
    window_offset: u64,
    parent_pos: u64,
    parent_exhausted: bool,
    realign: bool,
    token: CancelToken,
}

impl GzipStream {
    pub fn new(mut parent: Box<dyn FileObject>, token: CancelToken) -> VfsResult<Self> {
        let members = Self::scan_members(parent.as_mut(), &token)?;
        let size = members
            .last()
            .map(|m| m.decoded_start + m.decoded_size)
            .unwrap_or(0);
        debug!(members = members.len(), size, "Indexed gzip members");
        Ok(Self {
            parent,
            members,
            size,
            offset: 0,
            decompressor: compression::new_decompressor(CompressionMethod::Gzip)?,
            pending: Vec::new(),
            window: Vec::new(),
            window_offset: 0,
            parent_pos: 0,
            parent_exhausted: false,
            realign: true,
            token,
        })
    }

    /// Decoded offsets at which members begin, one entry per member.
    pub fn member_offsets(&self) -> Vec<u64> {
        self.members.iter().map(|m| m.decoded_start).collect()
    }

    fn scan_members(
        parent: &mut dyn FileObject,
        token: &CancelToken,
    ) -> VfsResult<Vec<Member>> {
        let parent_size = parent.size()?;
        if parent_size == 0 {
            return Err(VfsError::InvalidData("empty gzip file".to_string()));
        }
        let mut counter = CancelCounter::new(token.clone());
        let mut members = Vec::new();
        let mut pos = 0u64;
        let mut decoded_total = 0u64;

        while pos < parent_size {
            counter.tick()?;

            // Header: one bounded read is enough for any realistic header.
            let head_len = CHUNK.min((parent_size - pos) as usize);
            let mut head = vec![0u8; head_len];
            crate::stream::read_exact_at(parent, pos, &mut head)?;
            let header_len = parse_member_header(&head)?.ok_or_else(|| {
                VfsError::InvalidData(format!("truncated gzip member header at {}", pos))
            })? as u64;

            // Body: raw DEFLATE until the member's end marker.
            let mut deflate =
                compression::new_decompressor(CompressionMethod::Deflate)?;
            let mut crc = crc32fast::Hasher::new();
            let mut decoded_size = 0u64;
            let mut buffer: Vec<u8> = Vec::new();
            let mut fed = 0u64;
            let data_start = pos + header_len;
            parent.seek(SeekFrom::Start(data_start))?;

            while !deflate.finished() {
                counter.tick()?;
                if buffer.is_empty() {
                    let mut chunk = vec![0u8; CHUNK];
                    let count = parent.read(&mut chunk)?;
                    if count == 0 {
                        return Err(VfsError::InvalidData(format!(
                            "truncated gzip member data at {}",
                            data_start + fed
                        )));
                    }
                    chunk.truncate(count);
                    fed += chunk.len() as u64;
                    buffer = chunk;
                }
                let (out, consumed) = deflate.decompress(&buffer)?;
                buffer.drain(..consumed);
                crc.update(&out);
                decoded_size += out.len() as u64;
                if out.is_empty() && consumed == 0 && !deflate.finished() {
                    return Err(VfsError::InvalidData(format!(
                        "stalled gzip member data at {}",
                        data_start + fed
                    )));
                }
            }
            let data_len = fed - buffer.len() as u64;

            // Trailer: CRC32 and ISIZE are mandatory.
            let trailer_pos = data_start + data_len;
            if trailer_pos + 8 > parent_size {
                return Err(VfsError::InvalidData(format!(
                    "gzip member at {} is missing its trailer",
                    pos
                )));
            }
            let mut trailer = [0u8; 8];
            crate::stream::read_exact_at(parent, trailer_pos, &mut trailer)?;
            let crc_stored = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
            let isize_stored =
                u32::from_le_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]);
            let crc_computed = crc.finalize();
            if crc_computed != crc_stored {
                return Err(VfsError::InvalidData(format!(
                    "gzip member at {} CRC mismatch: stored {:08x}, computed {:08x}",
                    pos, crc_stored, crc_computed
                )));
            }
            if isize_stored != (decoded_size & 0xffff_ffff) as u32 {
                return Err(VfsError::InvalidData(format!(
                    "gzip member at {} size field mismatch",
                    pos
                )));
            }

            trace!(pos, decoded_size, "Indexed gzip member");
            members.push(Member {
                compressed_start: pos,
                decoded_start: decoded_total,
                decoded_size,
            });
            decoded_total += decoded_size;
            pos = trailer_pos + 8;
        }
        Ok(members)
    }

    /// Member whose decoded range contains `target`.
    fn member_for(&self, target: u64) -> Option<&Member> {
        let index = self
            .members
            .partition_point(|m| m.decoded_start <= target)
            .checked_sub(1)?;
        let member = &self.members[index];
        (target < member.decoded_start + member.decoded_size).then_some(member)
    }

    fn restart_at_member(&mut self, member_start: u64, decoded_start: u64) -> VfsResult<()> {
        self.parent.seek(SeekFrom::Start(member_start))?;
        self.parent_pos = member_start;
        self.decompressor = compression::new_decompressor(CompressionMethod::Gzip)?;
        self.pending.clear();
        self.window.clear();
        self.window_offset = decoded_start;
        self.parent_exhausted = false;
        Ok(())
    }

    fn window_end(&self) -> u64 {
        self.window_offset + self.window.len() as u64
    }

    fn fill(&mut self) -> VfsResult<bool> {
        loop {
            if !self.parent_exhausted {
                let mut chunk = vec![0u8; CHUNK];
                self.parent.seek(SeekFrom::Start(self.parent_pos))?;
                let count = self.parent.read(&mut chunk)?;
                if count == 0 {
                    self.parent_exhausted = true;
                } else {
                    chunk.truncate(count);
                    self.parent_pos += count as u64;
                    self.pending.extend_from_slice(&chunk);
                }
            }
            let (decoded, consumed) = self.decompressor.decompress(&self.pending)?;
            self.pending.drain(..consumed);
            if !decoded.is_empty() {
                self.window.extend_from_slice(&decoded);
                return Ok(true);
            }
            if self.parent_exhausted {
                return Ok(false);
            }
        }
    }

    fn align_to(&mut self, target: u64) -> VfsResult<()> {
        let in_window = target >= self.window_offset && target <= self.window_end();
        if !in_window {
            let member = match self.member_for(target) {
                Some(member) => member.clone(),
                None => return Ok(()), // past end; reads return 0
            };
            // Sequential continuation needs no restart.
            if target < self.window_offset || member.compressed_start >= self.parent_pos {
                self.restart_at_member(member.compressed_start, member.decoded_start)?;
            }
        }
        let mut counter = CancelCounter::new(self.token.clone());
        while self.window_end() <= target {
            counter.tick()?;
            self.window_offset = self.window_end();
            self.window.clear();
            if !self.fill()? {
                break;
            }
        }
        if target > self.window_offset {
            let cut = ((target - self.window_offset) as usize).min(self.window.len());
            self.window.drain(..cut);
            self.window_offset += cut as u64;
        }
        Ok(())
    }
}

impl FileObject for GzipStream {
    fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        if self.offset >= self.size {
            return Ok(0);
        }
        if self.realign {
            self.align_to(self.offset)?;
            self.realign = false;
        }
        let mut filled = 0;
        while filled < buf.len() && self.offset < self.size {
            if self.window.is_empty() {
                if !self.fill()? {
                    break;
                }
            }
            let take = self.window.len().min(buf.len() - filled);
            buf[filled..filled + take].copy_from_slice(&self.window[..take]);
            self.window.drain(..take);
            self.window_offset += take as u64;
            self.offset += take as u64;
            filled += take;
        }
        Ok(filled)
    }

    fn seek(&mut self, pos: SeekFrom) -> VfsResult<u64> {
        let size = self.size;
        let current = self.offset;
        let target = crate::stream::resolve_seek(pos, current, || Ok(size))?;
        if target != self.offset {
            self.offset = target;
            self.realign = true;
        }
        Ok(self.offset)
    }

    fn offset(&self) -> u64 {
        self.offset
    }

    fn size(&mut self) -> VfsResult<u64> {
        Ok(self.size)
    }
}
