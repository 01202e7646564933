//! Fixed window over a parent stream
//!
//! Presents `[range_offset, range_offset + range_size)` of the parent as a
//! stream of its own. The window may extend past the end of the parent; the
//! declared size is authoritative and reads beyond the parent's actual data
//! simply come up short, which matches how sparse evidence captures are
//! addressed.

use std::io::SeekFrom;

use crate::error::VfsResult;
use crate::stream::{resolve_seek, FileObject};

pub struct DataRangeStream {
    parent: Box<dyn FileObject>,
    range_offset: u64,
    range_size: u64,
    offset: u64,
}

impl DataRangeStream {
    pub fn new(parent: Box<dyn FileObject>, range_offset: u64, range_size: u64) -> Self {
        Self {
            parent,
            range_offset,
            range_size,
            offset: 0,
        }
    }
}

impl FileObject for DataRangeStream {
    fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        if self.offset >= self.range_size {
            return Ok(0);
        }
        let remaining = (self.range_size - self.offset) as usize;
        let want = buf.len().min(remaining);

        self.parent
            .seek(SeekFrom::Start(self.range_offset + self.offset))?;
        let count = self.parent.read(&mut buf[..want])?;
        self.offset += count as u64;
        Ok(count)
    }

    fn seek(&mut self, pos: SeekFrom) -> VfsResult<u64> {
        let size = self.range_size;
        self.offset = resolve_seek(pos, self.offset, || Ok(size))?;
        Ok(self.offset)
    }

    fn offset(&self) -> u64 {
        self.offset
    }

    fn size(&mut self) -> VfsResult<u64> {
        Ok(self.range_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::fake::FakeStream;

    #[test]
    fn test_window_clipping() {
        let parent = FakeStream::new(b"....0123456789....".to_vec());
        let mut range = DataRangeStream::new(Box::new(parent), 4, 10);
        assert_eq!(range.size().unwrap(), 10);

        let mut buf = [0u8; 4];
        assert_eq!(range.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"0123");

        range.seek(SeekFrom::Start(8)).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(range.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"89");
        assert_eq!(range.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_window_larger_than_parent() {
        // The declared range size wins even when the parent is shorter.
        let parent = FakeStream::new(vec![0xAA; 16]);
        let mut range = DataRangeStream::new(Box::new(parent), 8, 1024);
        assert_eq!(range.size().unwrap(), 1024);

        let mut buf = [0u8; 32];
        assert_eq!(range.read(&mut buf).unwrap(), 8);
        assert_eq!(range.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_seek_relative() {
        let parent = FakeStream::new(b"abcdefgh".to_vec());
        let mut range = DataRangeStream::new(Box::new(parent), 2, 4);
        range.seek(SeekFrom::End(-1)).unwrap();
        let mut buf = [0u8; 1];
        range.read(&mut buf).unwrap();
        assert_eq!(&buf, b"f");
    }
}
