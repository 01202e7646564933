//! Random-read slice view over any stream
//!
//! Wraps a stream in range-read semantics: `slice.read_range(a..b)` returns
//! the bytes of `[a, b)` regardless of the stream's current offset, clipped
//! to the stream size the way slicing clips to a buffer.

use std::io::SeekFrom;
use std::ops::Range;

use crate::error::{VfsError, VfsResult};
use crate::stream::FileObject;

pub struct DataSlice {
    stream: Box<dyn FileObject>,
    size: u64,
}

impl DataSlice {
    pub fn new(mut stream: Box<dyn FileObject>) -> VfsResult<Self> {
        let size = stream.size()?;
        Ok(Self { stream, size })
    }

    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Bytes of `[range.start, range.end)`, clipped to the stream size.
    pub fn read_range(&mut self, range: Range<u64>) -> VfsResult<Vec<u8>> {
        if range.start > range.end {
            return Err(VfsError::InvalidData(format!(
                "invalid slice range {}..{}",
                range.start, range.end
            )));
        }
        let start = range.start.min(self.size);
        let end = range.end.min(self.size);
        let mut out = vec![0u8; (end - start) as usize];

        self.stream.seek(SeekFrom::Start(start))?;
        let mut filled = 0;
        while filled < out.len() {
            let count = self.stream.read(&mut out[filled..])?;
            if count == 0 {
                break;
            }
            filled += count;
        }
        out.truncate(filled);
        Ok(out)
    }

    /// Up to `length` bytes starting at `offset`.
    pub fn read_at(&mut self, offset: u64, length: usize) -> VfsResult<Vec<u8>> {
        self.read_range(offset..offset.saturating_add(length as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::fake::FakeStream;

    fn slice_over(data: &[u8]) -> DataSlice {
        DataSlice::new(Box::new(FakeStream::new(data.to_vec()))).unwrap()
    }

    #[test]
    fn test_ranges() {
        let mut slice = slice_over(b"0123456789");
        assert_eq!(slice.len(), 10);
        assert_eq!(slice.read_range(2..5).unwrap(), b"234");
        assert_eq!(slice.read_range(0..10).unwrap(), b"0123456789");
        // Out-of-range clips like buffer slicing with saturation.
        assert_eq!(slice.read_range(8..100).unwrap(), b"89");
        assert_eq!(slice.read_range(50..60).unwrap(), b"");
    }

    #[test]
    fn test_reads_are_position_independent() {
        let mut slice = slice_over(b"abcdefgh");
        assert_eq!(slice.read_at(4, 2).unwrap(), b"ef");
        assert_eq!(slice.read_at(0, 2).unwrap(), b"ab");
        assert_eq!(slice.read_at(4, 2).unwrap(), b"ef");
    }

    #[test]
    fn test_inverted_range() {
        let mut slice = slice_over(b"abc");
        assert!(matches!(
            slice.read_range(3..1),
            Err(VfsError::InvalidData(_))
        ));
    }
}
