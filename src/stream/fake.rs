//! In-memory byte stream backing FAKE specifications and tests

use std::io::SeekFrom;
use std::sync::Arc;

use crate::error::VfsResult;
use crate::stream::{resolve_seek, FileObject};

/// Stream over a shared in-memory buffer. Cloning the backing data is
/// avoided so a fake file system can hand out many streams over one blob.
pub struct FakeStream {
    data: Arc<Vec<u8>>,
    offset: u64,
}

impl FakeStream {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(data),
            offset: 0,
        }
    }

    pub fn from_shared(data: Arc<Vec<u8>>) -> Self {
        Self { data, offset: 0 }
    }
}

impl FileObject for FakeStream {
    fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        let size = self.data.len() as u64;
        if self.offset >= size {
            return Ok(0);
        }
        let available = (size - self.offset) as usize;
        let count = buf.len().min(available);
        let start = self.offset as usize;
        buf[..count].copy_from_slice(&self.data[start..start + count]);
        self.offset += count as u64;
        Ok(count)
    }

    fn seek(&mut self, pos: SeekFrom) -> VfsResult<u64> {
        let size = self.data.len() as u64;
        self.offset = resolve_seek(pos, self.offset, || Ok(size))?;
        Ok(self.offset)
    }

    fn offset(&self) -> u64 {
        self.offset
    }

    fn size(&mut self) -> VfsResult<u64> {
        Ok(self.data.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_and_seek() {
        let mut stream = FakeStream::new(b"Hello, World!".to_vec());
        assert_eq!(stream.size().unwrap(), 13);

        let mut buf = [0u8; 5];
        assert_eq!(stream.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"Hello");

        stream.seek(SeekFrom::Start(7)).unwrap();
        assert_eq!(stream.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"World");
    }

    #[test]
    fn test_read_at_end_returns_zero() {
        let mut stream = FakeStream::new(b"abc".to_vec());
        stream.seek(SeekFrom::Start(3)).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(stream.read(&mut buf).unwrap(), 0);

        // Seeking past the end is legal but does not extend the stream.
        stream.seek(SeekFrom::Start(100)).unwrap();
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
        assert_eq!(stream.size().unwrap(), 3);
    }
}
