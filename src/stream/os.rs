//! Host file system byte stream
//!
//! Opens regular files and block/character devices through the host. Device
//! nodes report a zero metadata length, so the size of anything that is not
//! a regular file is probed with a seek to the end.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use tracing::debug;

use crate::error::{VfsError, VfsResult};
use crate::stream::{resolve_seek, FileObject};

pub struct OsStream {
    file: File,
    size: u64,
    offset: u64,
}

impl OsStream {
    pub fn open(location: &str) -> VfsResult<Self> {
        let path = Path::new(location);
        let mut file = File::open(path)?;
        let metadata = file.metadata()?;
        if metadata.is_dir() {
            return Err(VfsError::InvalidData(format!(
                "not a readable stream: {} is a directory",
                location
            )));
        }

        let size = if metadata.is_file() {
            metadata.len()
        } else {
            // Device node: probe the size, then rewind.
            let end = file.seek(SeekFrom::End(0))?;
            file.seek(SeekFrom::Start(0))?;
            end
        };

        debug!(location, size, "Opened host stream");
        Ok(Self {
            file,
            size,
            offset: 0,
        })
    }
}

impl FileObject for OsStream {
    fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        if self.offset >= self.size {
            return Ok(0);
        }
        self.file.seek(SeekFrom::Start(self.offset))?;
        let remaining = (self.size - self.offset) as usize;
        let want = buf.len().min(remaining);
        let count = self.file.read(&mut buf[..want])?;
        self.offset += count as u64;
        Ok(count)
    }

    fn seek(&mut self, pos: SeekFrom) -> VfsResult<u64> {
        let size = self.size;
        self.offset = resolve_seek(pos, self.offset, || Ok(size))?;
        Ok(self.offset)
    }

    fn offset(&self) -> u64 {
        self.offset
    }

    fn size(&mut self) -> VfsResult<u64> {
        Ok(self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_open_and_read() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(b"forensic image bytes").unwrap();

        let mut stream = OsStream::open(temp.path().to_str().unwrap()).unwrap();
        assert_eq!(stream.size().unwrap(), 20);

        stream.seek(SeekFrom::Start(9)).unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(stream.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"image");
    }

    #[test]
    fn test_missing_file() {
        let err = OsStream::open("/nonexistent/path/file.bin");
        assert!(matches!(err, Err(VfsError::NotFound(_))));
    }

    #[test]
    fn test_directory_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = OsStream::open(dir.path().to_str().unwrap());
        assert!(err.is_err());
    }
}
