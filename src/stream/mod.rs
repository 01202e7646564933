//! Byte-stream contract and transform stream implementations
//!
//! Every stream satisfies the same contract: `read` returns up to the
//! requested number of bytes and 0 at end-of-stream, `seek` past the end is
//! permitted but does not extend the stream, and `size` is known after open
//! (transform streams may determine it lazily with a one-pass scan). A
//! stream denotes a pure function from offset to byte; reads within one
//! stream are linearizable, and one stream instance must be used from one
//! thread at a time.

pub mod compressed;
pub mod data_range;
pub mod encoded;
pub mod encrypted;
pub mod ewf;
pub mod fake;
pub mod gzip;
pub mod os;
pub mod raw;
pub mod sqlite_blob;

use std::io;
use std::io::SeekFrom;

use crate::error::{VfsError, VfsResult};

/// Read-only, seekable byte stream over one layer of an addressing chain.
pub trait FileObject: Send {
    /// Reads up to `buf.len()` bytes at the current offset, returning the
    /// number of bytes read; 0 means end-of-stream.
    fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize>;

    /// Seeks to an offset. Seeking past the stream size is legal; seeking
    /// before offset 0 is not. `SeekFrom::End` may force size determination
    /// on streams that compute it lazily.
    fn seek(&mut self, pos: SeekFrom) -> VfsResult<u64>;

    /// Current offset.
    fn offset(&self) -> u64;

    /// Stream size in bytes.
    fn size(&mut self) -> VfsResult<u64>;
}

/// Resolves a `SeekFrom` against a current offset and a size callback,
/// enforcing the shared seek rules. Streams with lazily computed sizes pass
/// a callback that runs the size scan only when `SeekFrom::End` is used.
pub(crate) fn resolve_seek(
    pos: SeekFrom,
    current: u64,
    size: impl FnOnce() -> VfsResult<u64>,
) -> VfsResult<u64> {
    let target = match pos {
        SeekFrom::Start(offset) => offset as i128,
        SeekFrom::Current(delta) => current as i128 + delta as i128,
        SeekFrom::End(delta) => size()? as i128 + delta as i128,
    };
    if target < 0 {
        return Err(VfsError::InvalidData(format!(
            "seek to negative offset: {}",
            target
        )));
    }
    Ok(target as u64)
}

/// Reads exactly `buf.len()` bytes or fails with `InvalidData`. Used by
/// format parsers where a short read means a truncated structure.
pub fn read_exact(stream: &mut dyn FileObject, buf: &mut [u8]) -> VfsResult<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let count = stream.read(&mut buf[filled..])?;
        if count == 0 {
            return Err(VfsError::InvalidData(format!(
                "unexpected end of stream, wanted {} more bytes",
                buf.len() - filled
            )));
        }
        filled += count;
    }
    Ok(())
}

/// Seeks to `offset` and reads exactly `buf.len()` bytes.
pub fn read_exact_at(stream: &mut dyn FileObject, offset: u64, buf: &mut [u8]) -> VfsResult<()> {
    stream.seek(SeekFrom::Start(offset))?;
    read_exact(stream, buf)
}

/// Reads the remaining stream into memory.
pub fn read_to_end(stream: &mut dyn FileObject) -> VfsResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut buf = [0u8; 65536];
    loop {
        let count = stream.read(&mut buf)?;
        if count == 0 {
            break;
        }
        out.extend_from_slice(&buf[..count]);
    }
    Ok(out)
}

/// Adapter exposing a `FileObject` through the standard I/O traits, for
/// interop with code that wants `std::io::Read`/`Seek`.
pub struct StreamReader<'a> {
    stream: &'a mut dyn FileObject,
}

impl<'a> StreamReader<'a> {
    pub fn new(stream: &'a mut dyn FileObject) -> Self {
        Self { stream }
    }
}

impl io::Read for StreamReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf).map_err(VfsError::into_io_error)
    }
}

impl io::Seek for StreamReader<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.stream.seek(pos).map_err(VfsError::into_io_error)
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeStream;
    use super::*;

    #[test]
    fn test_read_exact_short_stream() {
        let mut stream = FakeStream::new(b"abc".to_vec());
        let mut buf = [0u8; 8];
        assert!(matches!(
            read_exact(&mut stream, &mut buf),
            Err(VfsError::InvalidData(_))
        ));
    }

    #[test]
    fn test_read_exact_at() {
        let mut stream = FakeStream::new(b"0123456789".to_vec());
        let mut buf = [0u8; 4];
        read_exact_at(&mut stream, 3, &mut buf).unwrap();
        assert_eq!(&buf, b"3456");
    }

    #[test]
    fn test_resolve_seek_negative() {
        let result = resolve_seek(SeekFrom::Current(-5), 2, || Ok(10));
        assert!(matches!(result, Err(VfsError::InvalidData(_))));
    }

    #[test]
    fn test_resolve_seek_past_end_allowed() {
        let offset = resolve_seek(SeekFrom::Start(1000), 0, || Ok(10)).unwrap();
        assert_eq!(offset, 1000);
    }
}
