// Shared binary reading utilities for container format parsers
//
// Provides consistent endian-aware reading over any byte stream in a chain,
// not just host files.

use crate::error::VfsResult;
use crate::stream::{read_exact, read_exact_at, FileObject};

// =============================================================================
// Basic Read Functions (from current position)
// =============================================================================

/// Read a single byte from the stream at current position
pub fn read_u8(stream: &mut dyn FileObject) -> VfsResult<u8> {
    let mut buf = [0u8; 1];
    read_exact(stream, &mut buf)?;
    Ok(buf[0])
}

/// Read u16 little-endian from the stream at current position
pub fn read_u16_le(stream: &mut dyn FileObject) -> VfsResult<u16> {
    let mut buf = [0u8; 2];
    read_exact(stream, &mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

/// Read u32 little-endian from the stream at current position
pub fn read_u32_le(stream: &mut dyn FileObject) -> VfsResult<u32> {
    let mut buf = [0u8; 4];
    read_exact(stream, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Read u64 little-endian from the stream at current position
pub fn read_u64_le(stream: &mut dyn FileObject) -> VfsResult<u64> {
    let mut buf = [0u8; 8];
    read_exact(stream, &mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Read u16 big-endian from the stream at current position
pub fn read_u16_be(stream: &mut dyn FileObject) -> VfsResult<u16> {
    let mut buf = [0u8; 2];
    read_exact(stream, &mut buf)?;
    Ok(u16::from_be_bytes(buf))
}

/// Read u32 big-endian from the stream at current position
pub fn read_u32_be(stream: &mut dyn FileObject) -> VfsResult<u32> {
    let mut buf = [0u8; 4];
    read_exact(stream, &mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

// =============================================================================
// Read at Offset Functions (seek + read)
// =============================================================================

/// Read u32 little-endian at specific offset
pub fn read_u32_at(stream: &mut dyn FileObject, offset: u64) -> VfsResult<u32> {
    let mut buf = [0u8; 4];
    read_exact_at(stream, offset, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Read u64 little-endian at specific offset
pub fn read_u64_at(stream: &mut dyn FileObject, offset: u64) -> VfsResult<u64> {
    let mut buf = [0u8; 8];
    read_exact_at(stream, offset, &mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

// =============================================================================
// Byte Array and String Reading
// =============================================================================

/// Read exact bytes from current position
pub fn read_bytes(stream: &mut dyn FileObject, length: usize) -> VfsResult<Vec<u8>> {
    if length == 0 {
        return Ok(Vec::new());
    }
    let mut buf = vec![0u8; length];
    read_exact(stream, &mut buf)?;
    Ok(buf)
}

/// Read exact bytes at specific offset
pub fn read_bytes_at(
    stream: &mut dyn FileObject,
    offset: u64,
    length: usize,
) -> VfsResult<Vec<u8>> {
    if length == 0 {
        return Ok(Vec::new());
    }
    let mut buf = vec![0u8; length];
    read_exact_at(stream, offset, &mut buf)?;
    Ok(buf)
}

/// Read a fixed-length field and return it as a string up to the first null
pub fn read_string(stream: &mut dyn FileObject, length: usize) -> VfsResult<String> {
    let buf = read_bytes(stream, length)?;
    Ok(bytes_to_string(&buf))
}

/// Convert bytes to null-terminated string
pub fn bytes_to_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::fake::FakeStream;

    #[test]
    fn test_read_integers() {
        let mut data = Vec::new();
        data.push(0x42u8);
        data.extend_from_slice(&[0x34, 0x12]); // u16 = 0x1234
        data.extend_from_slice(&[0x78, 0x56, 0x34, 0x12]); // u32 = 0x12345678
        data.extend_from_slice(&[0xEF, 0xCD, 0xAB, 0x90, 0x78, 0x56, 0x34, 0x12]); // u64

        let mut stream = FakeStream::new(data);
        assert_eq!(read_u8(&mut stream).unwrap(), 0x42);
        assert_eq!(read_u16_le(&mut stream).unwrap(), 0x1234);
        assert_eq!(read_u32_le(&mut stream).unwrap(), 0x12345678);
        assert_eq!(read_u64_le(&mut stream).unwrap(), 0x123456789ABCDEF);
    }

    #[test]
    fn test_read_at_offset() {
        let mut stream = FakeStream::new(vec![0, 0, 0, 0, 0x42, 0, 0, 0]);
        assert_eq!(read_u32_at(&mut stream, 4).unwrap(), 0x42);
    }

    #[test]
    fn test_big_endian() {
        let mut stream = FakeStream::new(vec![0x12, 0x34, 0x56, 0x78]);
        assert_eq!(read_u16_be(&mut stream).unwrap(), 0x1234);
        stream.seek(std::io::SeekFrom::Start(0)).unwrap();
        assert_eq!(read_u32_be(&mut stream).unwrap(), 0x12345678);
    }

    #[test]
    fn test_bytes_to_string() {
        assert_eq!(bytes_to_string(b"hello\x00world"), "hello");
        assert_eq!(bytes_to_string(b"no null"), "no null");
    }
}
