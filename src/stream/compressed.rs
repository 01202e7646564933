//! On-the-fly decompression stream
//!
//! Presents the decompressed bytes of its parent with a seekable interface.
//! The stream start is the one restart point every supported method shares,
//! so backward seeks re-run the decompressor from the origin and forward
//! seeks decode-and-discard incrementally; the format-aware gzip stream
//! keeps a real member index instead. The decompressed size is determined
//! by a single cancellable pass on first query and memoized.

use std::io::SeekFrom;

use tracing::trace;

use crate::cancel::{CancelCounter, CancelToken};
use crate::compression::{self, Decompressor};
use crate::error::{VfsError, VfsResult};
use crate::path_spec::CompressionMethod;
use crate::stream::FileObject;

const COMPRESSED_CHUNK: usize = 64 * 1024;

pub struct CompressedStream {
    parent: Box<dyn FileObject>,
    method: CompressionMethod,
    decompressor: Box<dyn Decompressor>,
    /// Compressed bytes read from the parent but not yet consumed.
    pending: Vec<u8>,
    /// Decoded bytes not yet handed out.
    window: Vec<u8>,
    /// Decoded-stream offset of `window[0]`.
    window_offset: u64,
    offset: u64,
    realign: bool,
    parent_exhausted: bool,
    size: Option<u64>,
    token: CancelToken,
}

impl CompressedStream {
    pub fn new(
        parent: Box<dyn FileObject>,
        method: CompressionMethod,
        token: CancelToken,
    ) -> VfsResult<Self> {
        Ok(Self {
            parent,
            method,
            decompressor: compression::new_decompressor(method)?,
            pending: Vec::new(),
            window: Vec::new(),
            window_offset: 0,
            offset: 0,
            realign: false,
            parent_exhausted: false,
            size: None,
            token,
        })
    }

    /// Trusts a size recorded by an outer format (e.g. an archive's central
    /// directory) instead of scanning for it.
    pub fn with_declared_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    fn reset(&mut self) -> VfsResult<()> {
        self.parent.seek(SeekFrom::Start(0))?;
        self.decompressor = compression::new_decompressor(self.method)?;
        self.pending.clear();
        self.window.clear();
        self.window_offset = 0;
        self.parent_exhausted = false;
        Ok(())
    }

    /// Decoded offset one past the end of the current window.
    fn window_end(&self) -> u64 {
        self.window_offset + self.window.len() as u64
    }

    /// Decompresses one more parent chunk into the window. Returns false
    /// when neither the parent nor the decompressor can produce more.
    fn fill(&mut self) -> VfsResult<bool> {
        loop {
            let mut chunk = vec![0u8; COMPRESSED_CHUNK];
            let count = if self.parent_exhausted {
                0
            } else {
                self.parent.read(&mut chunk)?
            };
            if count == 0 {
                self.parent_exhausted = true;
            } else {
                chunk.truncate(count);
                self.pending.extend_from_slice(&chunk);
            }

            let (decoded, consumed) = self.decompressor.decompress(&self.pending)?;
            self.pending.drain(..consumed);
            if !decoded.is_empty() {
                self.window.extend_from_slice(&decoded);
                return Ok(true);
            }
            if self.parent_exhausted {
                // Every supported method but lzma-alone marks its end in
                // the data; reaching parent EOF without it means the
                // stream is cut short.
                if !self.decompressor.finished() && self.method != CompressionMethod::Lzma {
                    return Err(VfsError::InvalidData(
                        "truncated compressed stream".to_string(),
                    ));
                }
                return Ok(false);
            }
        }
    }

    /// Discards decoded data in front of `target` so the window begins at or
    /// before it, re-running the decompressor from the origin if needed.
    fn align_to(&mut self, target: u64) -> VfsResult<()> {
        if target < self.window_offset {
            trace!(target, "Realigning compressed stream from origin");
            self.reset()?;
        }
        let mut counter = CancelCounter::new(self.token.clone());
        while self.window_end() <= target {
            counter.tick()?;
            // Nothing before the target is needed again; drop it.
            self.window_offset = self.window_end();
            self.window.clear();
            if !self.fill()? {
                break;
            }
        }
        // Trim the consumed prefix inside the window.
        if target > self.window_offset {
            let cut = ((target - self.window_offset) as usize).min(self.window.len());
            self.window.drain(..cut);
            self.window_offset += cut as u64;
        }
        Ok(())
    }

    fn scan_size(&mut self) -> VfsResult<u64> {
        let mut counter = CancelCounter::new(self.token.clone());
        self.reset()?;
        let mut total = 0u64;
        loop {
            counter.tick()?;
            self.window_offset += self.window.len() as u64;
            self.window.clear();
            if !self.fill()? {
                break;
            }
            total = self.window_end();
        }
        self.realign = true;
        Ok(total)
    }
}

impl FileObject for CompressedStream {
    fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        if let Some(size) = self.size {
            if self.offset >= size {
                return Ok(0);
            }
        }
        if self.realign {
            self.align_to(self.offset)?;
            self.realign = false;
        }

        let mut filled = 0;
        while filled < buf.len() {
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
        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => self.offset as i128 + delta as i128,
            SeekFrom::End(delta) => self.size()? as i128 + delta as i128,
        };
        if target < 0 {
            return Err(VfsError::InvalidData(format!(
                "seek to negative offset: {}",
                target
            )));
        }
        let target = target as u64;
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
        if self.size.is_none() {
            let size = self.scan_size()?;
            trace!(size, method = self.method.as_str(), "Determined decompressed size");
            self.size = Some(size);
        }
        Ok(self.size.expect("memoized above"))
    }
}
