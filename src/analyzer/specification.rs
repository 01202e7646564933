//! Format specifications for signature-based identification

use crate::path_spec::TypeIndicator;

/// Category a format belongs to. Categories order ambiguous analyzer
/// results and size the scan windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatCategory {
    StorageMedia,
    VolumeSystem,
    FileSystem,
    Archive,
    Compressed,
    Encoded,
    Encrypted,
}

impl FormatCategory {
    /// Lower sorts first in analyzer output.
    pub fn priority(&self) -> u8 {
        match self {
            FormatCategory::FileSystem => 0,
            FormatCategory::VolumeSystem => 1,
            FormatCategory::StorageMedia => 2,
            FormatCategory::Archive => 3,
            FormatCategory::Compressed => 4,
            FormatCategory::Encoded => 5,
            FormatCategory::Encrypted => 6,
        }
    }

    /// Default number of leading bytes scanned for this category.
    pub fn default_scan_window(&self) -> usize {
        match self {
            FormatCategory::StorageMedia
            | FormatCategory::VolumeSystem
            | FormatCategory::FileSystem => 64 * 1024,
            FormatCategory::Archive => 4 * 1024,
            FormatCategory::Compressed
            | FormatCategory::Encoded
            | FormatCategory::Encrypted => 32,
        }
    }
}

/// Where a byte signature is anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureOffset {
    /// Fixed offset from the start of the stream.
    Start(u64),
    /// Fixed offset back from the end of the stream.
    End(u64),
    /// Anywhere inside the category's scan window.
    Anywhere,
}

/// Literal byte sequence at an anchored position.
#[derive(Debug, Clone)]
pub struct ByteSignature {
    pub offset: SignatureOffset,
    pub pattern: Vec<u8>,
}

impl ByteSignature {
    pub fn at_start(offset: u64, pattern: &[u8]) -> Self {
        Self {
            offset: SignatureOffset::Start(offset),
            pattern: pattern.to_vec(),
        }
    }

    pub fn from_end(offset: u64, pattern: &[u8]) -> Self {
        Self {
            offset: SignatureOffset::End(offset),
            pattern: pattern.to_vec(),
        }
    }

    pub fn anywhere(pattern: &[u8]) -> Self {
        Self {
            offset: SignatureOffset::Anywhere,
            pattern: pattern.to_vec(),
        }
    }
}

/// One registered format: its signatures plus the category that orders and
/// windows the scan. A specification matches when any of its signatures
/// matches (multiple signatures express format variants).
#[derive(Debug, Clone)]
pub struct FormatSpecification {
    pub type_indicator: TypeIndicator,
    pub category: FormatCategory,
    pub signatures: Vec<ByteSignature>,
}

impl FormatSpecification {
    pub fn new(
        type_indicator: TypeIndicator,
        category: FormatCategory,
        signatures: Vec<ByteSignature>,
    ) -> Self {
        Self {
            type_indicator,
            category,
            signatures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_ordering() {
        assert!(FormatCategory::FileSystem.priority() < FormatCategory::VolumeSystem.priority());
        assert!(FormatCategory::VolumeSystem.priority() < FormatCategory::StorageMedia.priority());
        assert!(FormatCategory::Archive.priority() < FormatCategory::Compressed.priority());
    }

    #[test]
    fn test_scan_windows() {
        assert_eq!(FormatCategory::StorageMedia.default_scan_window(), 65536);
        assert_eq!(FormatCategory::Archive.default_scan_window(), 4096);
        assert_eq!(FormatCategory::Compressed.default_scan_window(), 32);
    }
}
