//! Incremental decompressors
//!
//! Each decompressor is fed compressed bytes in arbitrarily sized chunks and
//! returns the decompressed bytes together with how much input it consumed;
//! callers keep unconsumed input and feed it back with the next chunk. One
//! constructor per supported method hides the differences between the
//! underlying libraries.

use flate2::{Decompress, FlushDecompress};

use crate::error::{VfsError, VfsResult};
use crate::path_spec::CompressionMethod;

/// Incremental decompressor over one compressed stream.
pub trait Decompressor: Send {
    /// Decompresses a chunk. Returns the decompressed bytes and the number
    /// of input bytes consumed. Once the underlying stream has ended,
    /// remaining input is consumed without producing output.
    fn decompress(&mut self, data: &[u8]) -> VfsResult<(Vec<u8>, usize)>;

    /// True once the end of the compressed stream was seen. Formats without
    /// an end marker never report finished and end at parent exhaustion.
    fn finished(&self) -> bool;
}

pub fn new_decompressor(method: CompressionMethod) -> VfsResult<Box<dyn Decompressor>> {
    Ok(match method {
        CompressionMethod::Zlib => Box::new(FlateDecompressor::new(true)),
        CompressionMethod::Deflate => Box::new(FlateDecompressor::new(false)),
        CompressionMethod::Gzip => Box::new(GzipDecompressor::new()),
        CompressionMethod::Bzip2 => Box::new(Bzip2Decompressor::new()),
        CompressionMethod::Xz => Box::new(XzDecompressor::new_xz()?),
        CompressionMethod::Lzma => Box::new(XzDecompressor::new_lzma()?),
    })
}

const OUTPUT_CHUNK: usize = 64 * 1024;

// =============================================================================
// DEFLATE / zlib
// =============================================================================

struct FlateDecompressor {
    inner: Decompress,
    finished: bool,
}

impl FlateDecompressor {
    fn new(zlib_header: bool) -> Self {
        Self {
            inner: Decompress::new(zlib_header),
            finished: false,
        }
    }
}

impl Decompressor for FlateDecompressor {
    fn decompress(&mut self, data: &[u8]) -> VfsResult<(Vec<u8>, usize)> {
        if self.finished {
            return Ok((Vec::new(), data.len()));
        }
        let mut out = Vec::new();
        let mut consumed = 0;
        while consumed < data.len() {
            if out.len() == out.capacity() {
                out.reserve(OUTPUT_CHUNK);
            }
            let out_before = out.len();
            let in_before = self.inner.total_in();
            let status = self
                .inner
                .decompress_vec(&data[consumed..], &mut out, FlushDecompress::Sync)
                .map_err(|e| VfsError::InvalidData(format!("deflate stream: {}", e)))?;
            consumed += (self.inner.total_in() - in_before) as usize;

            if status == flate2::Status::StreamEnd {
                self.finished = true;
                // Trailing bytes after the stream end carry no data.
                consumed = data.len();
                break;
            }
            if out.len() == out_before && (self.inner.total_in() - in_before) == 0 {
                break;
            }
        }
        Ok((out, consumed))
    }

    fn finished(&self) -> bool {
        self.finished
    }
}

// =============================================================================
// bzip2
// =============================================================================

struct Bzip2Decompressor {
    inner: bzip2::Decompress,
    finished: bool,
}

impl Bzip2Decompressor {
    fn new() -> Self {
        Self {
            inner: bzip2::Decompress::new(false),
            finished: false,
        }
    }
}

impl Decompressor for Bzip2Decompressor {
    fn decompress(&mut self, data: &[u8]) -> VfsResult<(Vec<u8>, usize)> {
        if self.finished {
            return Ok((Vec::new(), data.len()));
        }
        let mut out = Vec::new();
        let mut consumed = 0;
        while consumed < data.len() {
            if out.len() == out.capacity() {
                out.reserve(OUTPUT_CHUNK);
            }
            let out_before = out.len();
            let in_before = self.inner.total_in();
            let status = self
                .inner
                .decompress_vec(&data[consumed..], &mut out)
                .map_err(|e| VfsError::InvalidData(format!("bzip2 stream: {}", e)))?;
            consumed += (self.inner.total_in() - in_before) as usize;

            if status == bzip2::Status::StreamEnd {
                if consumed < data.len() {
                    // Concatenated bzip2 streams continue back to back.
                    self.inner = bzip2::Decompress::new(false);
                } else {
                    self.finished = true;
                }
                continue;
            }
            if out.len() == out_before && (self.inner.total_in() - in_before) == 0 {
                break;
            }
        }
        Ok((out, consumed))
    }

    fn finished(&self) -> bool {
        self.finished
    }
}

// =============================================================================
// xz / lzma
// =============================================================================

struct XzDecompressor {
    inner: xz2::stream::Stream,
    finished: bool,
}

impl XzDecompressor {
    fn new_xz() -> VfsResult<Self> {
        let inner = xz2::stream::Stream::new_stream_decoder(u64::MAX, 0)
            .map_err(|e| VfsError::BackEndFailure(format!("xz decoder init: {}", e)))?;
        Ok(Self {
            inner,
            finished: false,
        })
    }

    fn new_lzma() -> VfsResult<Self> {
        let inner = xz2::stream::Stream::new_lzma_decoder(u64::MAX)
            .map_err(|e| VfsError::BackEndFailure(format!("lzma decoder init: {}", e)))?;
        Ok(Self {
            inner,
            finished: false,
        })
    }
}

impl Decompressor for XzDecompressor {
    fn decompress(&mut self, data: &[u8]) -> VfsResult<(Vec<u8>, usize)> {
        if self.finished {
            return Ok((Vec::new(), data.len()));
        }
        let mut out = Vec::new();
        let mut consumed = 0;
        while consumed < data.len() {
            if out.len() == out.capacity() {
                out.reserve(OUTPUT_CHUNK);
            }
            let out_before = out.len();
            let in_before = self.inner.total_in();
            let status = self
                .inner
                .process_vec(&data[consumed..], &mut out, xz2::stream::Action::Run)
                .map_err(|e| VfsError::InvalidData(format!("xz stream: {}", e)))?;
            consumed += (self.inner.total_in() - in_before) as usize;

            if status == xz2::stream::Status::StreamEnd {
                self.finished = true;
                consumed = data.len();
                break;
            }
            if out.len() == out_before && (self.inner.total_in() - in_before) == 0 {
                break;
            }
        }
        Ok((out, consumed))
    }

    fn finished(&self) -> bool {
        self.finished
    }
}

// =============================================================================
// gzip members
// =============================================================================

const GZIP_FLAG_FHCRC: u8 = 0x02;
const GZIP_FLAG_FEXTRA: u8 = 0x04;
const GZIP_FLAG_FNAME: u8 = 0x08;
const GZIP_FLAG_FCOMMENT: u8 = 0x10;

/// Parses a gzip member header from the start of `data`.
///
/// Returns the header length when complete, `None` when more bytes are
/// needed, and `InvalidData` on a bad magic or unsupported method.
pub(crate) fn parse_member_header(data: &[u8]) -> VfsResult<Option<usize>> {
    if data.len() < 10 {
        return Ok(None);
    }
    if data[0] != 0x1f || data[1] != 0x8b {
        return Err(VfsError::InvalidData(format!(
            "bad gzip magic: {:02x} {:02x}",
            data[0], data[1]
        )));
    }
    if data[2] != 8 {
        return Err(VfsError::InvalidData(format!(
            "unsupported gzip compression method: {}",
            data[2]
        )));
    }
    let flags = data[3];
    let mut pos = 10;

    if flags & GZIP_FLAG_FEXTRA != 0 {
        if data.len() < pos + 2 {
            return Ok(None);
        }
        let extra_len = u16::from_le_bytes([data[pos], data[pos + 1]]) as usize;
        pos += 2 + extra_len;
        if data.len() < pos {
            return Ok(None);
        }
    }
    for flag in [GZIP_FLAG_FNAME, GZIP_FLAG_FCOMMENT] {
        if flags & flag != 0 {
            match data[pos..].iter().position(|&b| b == 0) {
                Some(end) => pos += end + 1,
                None => return Ok(None),
            }
        }
    }
    if flags & GZIP_FLAG_FHCRC != 0 {
        pos += 2;
        if data.len() < pos {
            return Ok(None);
        }
    }
    Ok(Some(pos))
}

enum GzipState {
    Header,
    Body,
    Trailer,
}

/// Member-continuous gzip decompressor: concatenated members are presented
/// as one decompressed stream, with per-member CRC32 and ISIZE validation.
struct GzipDecompressor {
    state: GzipState,
    pending: Vec<u8>,
    deflate: Decompress,
    crc: crc32fast::Hasher,
    member_size: u64,
    members_done: usize,
}

impl GzipDecompressor {
    fn new() -> Self {
        Self {
            state: GzipState::Header,
            pending: Vec::new(),
            deflate: Decompress::new(false),
            crc: crc32fast::Hasher::new(),
            member_size: 0,
            members_done: 0,
        }
    }
}

impl Decompressor for GzipDecompressor {
    fn decompress(&mut self, data: &[u8]) -> VfsResult<(Vec<u8>, usize)> {
        // Buffered leftovers from the previous call come first; everything is
        // consumed from `work` and the tail is saved back into `pending`.
        let mut work = std::mem::take(&mut self.pending);
        work.extend_from_slice(data);
        let mut out = Vec::new();
        let mut pos = 0;

        loop {
            match self.state {
                GzipState::Header => {
                    match parse_member_header(&work[pos..])? {
                        Some(header_len) => {
                            pos += header_len;
                            self.deflate = Decompress::new(false);
                            self.crc = crc32fast::Hasher::new();
                            self.member_size = 0;
                            self.state = GzipState::Body;
                        }
                        None => break,
                    }
                }
                GzipState::Body => {
                    if pos == work.len() {
                        break;
                    }
                    if out.len() == out.capacity() {
                        out.reserve(OUTPUT_CHUNK);
                    }
                    let out_before = out.len();
                    let in_before = self.deflate.total_in();
                    let status = self
                        .deflate
                        .decompress_vec(&work[pos..], &mut out, FlushDecompress::Sync)
                        .map_err(|e| {
                            VfsError::InvalidData(format!("gzip member data: {}", e))
                        })?;
                    pos += (self.deflate.total_in() - in_before) as usize;
                    self.crc.update(&out[out_before..]);
                    self.member_size += (out.len() - out_before) as u64;

                    if status == flate2::Status::StreamEnd {
                        self.state = GzipState::Trailer;
                    } else if out.len() == out_before
                        && (self.deflate.total_in() - in_before) == 0
                    {
                        break;
                    }
                }
                GzipState::Trailer => {
                    if work.len() - pos < 8 {
                        break;
                    }
                    let crc_stored = u32::from_le_bytes([
                        work[pos],
                        work[pos + 1],
                        work[pos + 2],
                        work[pos + 3],
                    ]);
                    let isize_stored = u32::from_le_bytes([
                        work[pos + 4],
                        work[pos + 5],
                        work[pos + 6],
                        work[pos + 7],
                    ]);
                    pos += 8;

                    let crc_computed = std::mem::take(&mut self.crc).finalize();
                    if crc_computed != crc_stored {
                        return Err(VfsError::InvalidData(format!(
                            "gzip member CRC mismatch: stored {:08x}, computed {:08x}",
                            crc_stored, crc_computed
                        )));
                    }
                    if isize_stored != (self.member_size & 0xffff_ffff) as u32 {
                        return Err(VfsError::InvalidData(
                            "gzip member size field mismatch".to_string(),
                        ));
                    }

                    self.members_done += 1;
                    self.state = GzipState::Header;
                    if pos == work.len() {
                        break;
                    }
                }
            }
        }

        self.pending = work.split_off(pos);
        Ok((out, data.len()))
    }

    fn finished(&self) -> bool {
        // A member boundary with no buffered continuation counts as finished;
        // a truncated header or trailer left in `pending` does not.
        matches!(self.state, GzipState::Header)
            && self.members_done > 0
            && self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn gzip_bytes(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_zlib_round_trip() {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"layered artifact data").unwrap();
        let compressed = encoder.finish().unwrap();

        let mut decompressor = new_decompressor(CompressionMethod::Zlib).unwrap();
        let (out, consumed) = decompressor.decompress(&compressed).unwrap();
        assert_eq!(out, b"layered artifact data");
        assert_eq!(consumed, compressed.len());
        assert!(decompressor.finished());
    }

    #[test]
    fn test_zlib_split_feed() {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&vec![0x42u8; 100_000]).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut decompressor = new_decompressor(CompressionMethod::Zlib).unwrap();
        let mut out = Vec::new();
        let mut pos = 0;
        while pos < compressed.len() {
            let end = (pos + 7).min(compressed.len());
            let (chunk, consumed) = decompressor.decompress(&compressed[pos..end]).unwrap();
            out.extend_from_slice(&chunk);
            assert!(consumed > 0);
            pos += consumed;
        }
        assert_eq!(out.len(), 100_000);
        assert!(out.iter().all(|&b| b == 0x42));
    }

    #[test]
    fn test_gzip_multi_member() {
        let mut compressed = gzip_bytes(b"first member, ");
        compressed.extend(gzip_bytes(b"second member"));

        let mut decompressor = new_decompressor(CompressionMethod::Gzip).unwrap();
        let (out, consumed) = decompressor.decompress(&compressed).unwrap();
        assert_eq!(out, b"first member, second member");
        assert_eq!(consumed, compressed.len());
        assert!(decompressor.finished());
    }

    #[test]
    fn test_gzip_bad_magic() {
        let mut decompressor = new_decompressor(CompressionMethod::Gzip).unwrap();
        let err = decompressor.decompress(b"not gzip data at all");
        assert!(matches!(err, Err(VfsError::InvalidData(_))));
    }

    #[test]
    fn test_gzip_corrupt_crc() {
        let mut compressed = gzip_bytes(b"payload");
        let trailer_start = compressed.len() - 8;
        compressed[trailer_start] ^= 0xff;

        let mut decompressor = new_decompressor(CompressionMethod::Gzip).unwrap();
        let err = decompressor.decompress(&compressed);
        assert!(matches!(err, Err(VfsError::InvalidData(_))));
    }

    #[test]
    fn test_parse_member_header_with_name() {
        // Header with FNAME flag and a null-terminated file name.
        let mut data = vec![0x1f, 0x8b, 0x08, GZIP_FLAG_FNAME, 0, 0, 0, 0, 0, 0xff];
        data.extend_from_slice(b"syslog\0");
        assert_eq!(parse_member_header(&data).unwrap(), Some(17));

        // Truncated name: needs more bytes.
        assert_eq!(parse_member_header(&data[..12]).unwrap(), None);
    }
}
