//! Path specification algebra
//!
//! A path specification is an immutable, typed record naming a datum by
//! describing, from outside in, every container it is nested within. Chains
//! are parent-linked: exactly one record in a chain has no parent, and that
//! record must be a system-resolvable root (OS, FAKE or MOUNT).
//!
//! Equality, ordering and cache keys are all defined by the comparable form,
//! a canonical one-line-per-record serialization produced by
//! [`PathSpec::comparable`] and parsed back by
//! [`factory::from_comparable`].

pub mod factory;

use std::fmt;

// =============================================================================
// Type Indicators
// =============================================================================

/// Stable short identifier for every supported record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeIndicator {
    Os,
    Fake,
    Mount,
    DataRange,
    CompressedStream,
    EncodedStream,
    EncryptedStream,
    Gzip,
    Bzip2,
    Xz,
    Lzma,
    Ewf,
    Qcow,
    Vhdi,
    Vmdk,
    Raw,
    Modi,
    Phdi,
    Bde,
    Fvde,
    Luksde,
    ApfsContainer,
    Lvm,
    Gpt,
    Apm,
    Mbr,
    TskPartition,
    Vshadow,
    Apfs,
    Ext,
    Hfs,
    Ntfs,
    Xfs,
    Fat,
    Tsk,
    Cpio,
    Tar,
    Zip,
    SqliteBlob,
}

impl TypeIndicator {
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeIndicator::Os => "OS",
            TypeIndicator::Fake => "FAKE",
            TypeIndicator::Mount => "MOUNT",
            TypeIndicator::DataRange => "DATA_RANGE",
            TypeIndicator::CompressedStream => "COMPRESSED_STREAM",
            TypeIndicator::EncodedStream => "ENCODED_STREAM",
            TypeIndicator::EncryptedStream => "ENCRYPTED_STREAM",
            TypeIndicator::Gzip => "GZIP",
            TypeIndicator::Bzip2 => "BZIP2",
            TypeIndicator::Xz => "XZ",
            TypeIndicator::Lzma => "LZMA",
            TypeIndicator::Ewf => "EWF",
            TypeIndicator::Qcow => "QCOW",
            TypeIndicator::Vhdi => "VHDI",
            TypeIndicator::Vmdk => "VMDK",
            TypeIndicator::Raw => "RAW",
            TypeIndicator::Modi => "MODI",
            TypeIndicator::Phdi => "PHDI",
            TypeIndicator::Bde => "BDE",
            TypeIndicator::Fvde => "FVDE",
            TypeIndicator::Luksde => "LUKSDE",
            TypeIndicator::ApfsContainer => "APFS_CONTAINER",
            TypeIndicator::Lvm => "LVM",
            TypeIndicator::Gpt => "GPT",
            TypeIndicator::Apm => "APM",
            TypeIndicator::Mbr => "MBR",
            TypeIndicator::TskPartition => "TSK_PARTITION",
            TypeIndicator::Vshadow => "VSHADOW",
            TypeIndicator::Apfs => "APFS",
            TypeIndicator::Ext => "EXT",
            TypeIndicator::Hfs => "HFS",
            TypeIndicator::Ntfs => "NTFS",
            TypeIndicator::Xfs => "XFS",
            TypeIndicator::Fat => "FAT",
            TypeIndicator::Tsk => "TSK",
            TypeIndicator::Cpio => "CPIO",
            TypeIndicator::Tar => "TAR",
            TypeIndicator::Zip => "ZIP",
            TypeIndicator::SqliteBlob => "SQLITE_BLOB",
        }
    }

    pub fn from_str_indicator(value: &str) -> Option<Self> {
        Some(match value {
            "OS" => TypeIndicator::Os,
            "FAKE" => TypeIndicator::Fake,
            "MOUNT" => TypeIndicator::Mount,
            "DATA_RANGE" => TypeIndicator::DataRange,
            "COMPRESSED_STREAM" => TypeIndicator::CompressedStream,
            "ENCODED_STREAM" => TypeIndicator::EncodedStream,
            "ENCRYPTED_STREAM" => TypeIndicator::EncryptedStream,
            "GZIP" => TypeIndicator::Gzip,
            "BZIP2" => TypeIndicator::Bzip2,
            "XZ" => TypeIndicator::Xz,
            "LZMA" => TypeIndicator::Lzma,
            "EWF" => TypeIndicator::Ewf,
            "QCOW" => TypeIndicator::Qcow,
            "VHDI" => TypeIndicator::Vhdi,
            "VMDK" => TypeIndicator::Vmdk,
            "RAW" => TypeIndicator::Raw,
            "MODI" => TypeIndicator::Modi,
            "PHDI" => TypeIndicator::Phdi,
            "BDE" => TypeIndicator::Bde,
            "FVDE" => TypeIndicator::Fvde,
            "LUKSDE" => TypeIndicator::Luksde,
            "APFS_CONTAINER" => TypeIndicator::ApfsContainer,
            "LVM" => TypeIndicator::Lvm,
            "GPT" => TypeIndicator::Gpt,
            "APM" => TypeIndicator::Apm,
            "MBR" => TypeIndicator::Mbr,
            "TSK_PARTITION" => TypeIndicator::TskPartition,
            "VSHADOW" => TypeIndicator::Vshadow,
            "APFS" => TypeIndicator::Apfs,
            "EXT" => TypeIndicator::Ext,
            "HFS" => TypeIndicator::Hfs,
            "NTFS" => TypeIndicator::Ntfs,
            "XFS" => TypeIndicator::Xfs,
            "FAT" => TypeIndicator::Fat,
            "TSK" => TypeIndicator::Tsk,
            "CPIO" => TypeIndicator::Cpio,
            "TAR" => TypeIndicator::Tar,
            "ZIP" => TypeIndicator::Zip,
            "SQLITE_BLOB" => TypeIndicator::SqliteBlob,
            _ => return None,
        })
    }

    /// True for types resolvable by the host without opening any container.
    pub fn is_system_level(&self) -> bool {
        matches!(
            self,
            TypeIndicator::Os | TypeIndicator::Fake | TypeIndicator::Mount
        )
    }

    /// True for types that expose a navigable entry hierarchy.
    pub fn is_file_system(&self) -> bool {
        matches!(
            self,
            TypeIndicator::Apfs
                | TypeIndicator::Ext
                | TypeIndicator::Hfs
                | TypeIndicator::Ntfs
                | TypeIndicator::Xfs
                | TypeIndicator::Fat
                | TypeIndicator::Tsk
                | TypeIndicator::Cpio
                | TypeIndicator::Tar
                | TypeIndicator::Zip
                | TypeIndicator::Fake
                | TypeIndicator::Os
        )
    }

    /// True for volume-system types whose roots enumerate volumes or stores.
    pub fn is_volume_system(&self) -> bool {
        matches!(
            self,
            TypeIndicator::ApfsContainer
                | TypeIndicator::Lvm
                | TypeIndicator::Gpt
                | TypeIndicator::Apm
                | TypeIndicator::Mbr
                | TypeIndicator::TskPartition
                | TypeIndicator::Vshadow
        )
    }

    /// True for volume types that may require credentials to unlock.
    pub fn supports_credentials(&self) -> bool {
        matches!(
            self,
            TypeIndicator::Bde
                | TypeIndicator::Fvde
                | TypeIndicator::Luksde
                | TypeIndicator::ApfsContainer
                | TypeIndicator::EncryptedStream
        )
    }
}

impl fmt::Display for TypeIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Per-group format enums
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionMethod {
    Bzip2,
    Deflate,
    Gzip,
    Lzma,
    Xz,
    Zlib,
}

impl CompressionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionMethod::Bzip2 => "bzip2",
            CompressionMethod::Deflate => "deflate",
            CompressionMethod::Gzip => "gzip",
            CompressionMethod::Lzma => "lzma",
            CompressionMethod::Xz => "xz",
            CompressionMethod::Zlib => "zlib",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "bzip2" => CompressionMethod::Bzip2,
            "deflate" => CompressionMethod::Deflate,
            "gzip" => CompressionMethod::Gzip,
            "lzma" => CompressionMethod::Lzma,
            "xz" => CompressionMethod::Xz,
            "zlib" => CompressionMethod::Zlib,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncodingMethod {
    Base16,
    Base32,
    Base64,
}

impl EncodingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncodingMethod::Base16 => "base16",
            EncodingMethod::Base32 => "base32",
            EncodingMethod::Base64 => "base64",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "base16" => EncodingMethod::Base16,
            "base32" => EncodingMethod::Base32,
            "base64" => EncodingMethod::Base64,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncryptionMethod {
    Aes,
    Blowfish,
    Des3,
    Rc4,
}

impl EncryptionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncryptionMethod::Aes => "aes",
            EncryptionMethod::Blowfish => "blowfish",
            EncryptionMethod::Des3 => "des3",
            EncryptionMethod::Rc4 => "rc4",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "aes" => EncryptionMethod::Aes,
            "blowfish" => EncryptionMethod::Blowfish,
            "des3" => EncryptionMethod::Des3,
            "rc4" => EncryptionMethod::Rc4,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherMode {
    Cbc,
    Cfb,
    Ecb,
    Ofb,
    Xts,
}

impl CipherMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CipherMode::Cbc => "cbc",
            CipherMode::Cfb => "cfb",
            CipherMode::Ecb => "ecb",
            CipherMode::Ofb => "ofb",
            CipherMode::Xts => "xts",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "cbc" => CipherMode::Cbc,
            "cfb" => CipherMode::Cfb,
            "ecb" => CipherMode::Ecb,
            "ofb" => CipherMode::Ofb,
            "xts" => CipherMode::Xts,
            _ => return None,
        })
    }
}

/// Whole-file compressed formats with their own type indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressedFormat {
    Gzip,
    Bzip2,
    Xz,
    Lzma,
}

impl CompressedFormat {
    pub fn type_indicator(&self) -> TypeIndicator {
        match self {
            CompressedFormat::Gzip => TypeIndicator::Gzip,
            CompressedFormat::Bzip2 => TypeIndicator::Bzip2,
            CompressedFormat::Xz => TypeIndicator::Xz,
            CompressedFormat::Lzma => TypeIndicator::Lzma,
        }
    }

    /// Equivalent stream compression method.
    pub fn compression_method(&self) -> CompressionMethod {
        match self {
            CompressedFormat::Gzip => CompressionMethod::Gzip,
            CompressedFormat::Bzip2 => CompressionMethod::Bzip2,
            CompressedFormat::Xz => CompressionMethod::Xz,
            CompressedFormat::Lzma => CompressionMethod::Lzma,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageMediaFormat {
    Ewf,
    Qcow,
    Vhdi,
    Vmdk,
    Raw,
    Modi,
    Phdi,
}

impl StorageMediaFormat {
    pub fn type_indicator(&self) -> TypeIndicator {
        match self {
            StorageMediaFormat::Ewf => TypeIndicator::Ewf,
            StorageMediaFormat::Qcow => TypeIndicator::Qcow,
            StorageMediaFormat::Vhdi => TypeIndicator::Vhdi,
            StorageMediaFormat::Vmdk => TypeIndicator::Vmdk,
            StorageMediaFormat::Raw => TypeIndicator::Raw,
            StorageMediaFormat::Modi => TypeIndicator::Modi,
            StorageMediaFormat::Phdi => TypeIndicator::Phdi,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncryptedVolumeFormat {
    Bde,
    Fvde,
    Luksde,
}

impl EncryptedVolumeFormat {
    pub fn type_indicator(&self) -> TypeIndicator {
        match self {
            EncryptedVolumeFormat::Bde => TypeIndicator::Bde,
            EncryptedVolumeFormat::Fvde => TypeIndicator::Fvde,
            EncryptedVolumeFormat::Luksde => TypeIndicator::Luksde,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VolumeSystemFormat {
    ApfsContainer,
    Lvm,
    Gpt,
    Apm,
    Mbr,
    TskPartition,
    Vshadow,
}

impl VolumeSystemFormat {
    pub fn type_indicator(&self) -> TypeIndicator {
        match self {
            VolumeSystemFormat::ApfsContainer => TypeIndicator::ApfsContainer,
            VolumeSystemFormat::Lvm => TypeIndicator::Lvm,
            VolumeSystemFormat::Gpt => TypeIndicator::Gpt,
            VolumeSystemFormat::Apm => TypeIndicator::Apm,
            VolumeSystemFormat::Mbr => TypeIndicator::Mbr,
            VolumeSystemFormat::TskPartition => TypeIndicator::TskPartition,
            VolumeSystemFormat::Vshadow => TypeIndicator::Vshadow,
        }
    }

    /// Comparable key for the index attribute of this format.
    pub fn index_key(&self) -> &'static str {
        match self {
            VolumeSystemFormat::TskPartition => "part_index",
            VolumeSystemFormat::Vshadow => "store_index",
            _ => "volume_index",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileSystemFormat {
    Apfs,
    Ext,
    Hfs,
    Ntfs,
    Xfs,
    Fat,
    Tsk,
}

impl FileSystemFormat {
    pub fn type_indicator(&self) -> TypeIndicator {
        match self {
            FileSystemFormat::Apfs => TypeIndicator::Apfs,
            FileSystemFormat::Ext => TypeIndicator::Ext,
            FileSystemFormat::Hfs => TypeIndicator::Hfs,
            FileSystemFormat::Ntfs => TypeIndicator::Ntfs,
            FileSystemFormat::Xfs => TypeIndicator::Xfs,
            FileSystemFormat::Fat => TypeIndicator::Fat,
            FileSystemFormat::Tsk => TypeIndicator::Tsk,
        }
    }

    /// Comparable key for the fast-path identifier of this format.
    pub fn identifier_key(&self) -> &'static str {
        match self {
            FileSystemFormat::Ntfs => "mft_entry",
            FileSystemFormat::Ext | FileSystemFormat::Xfs | FileSystemFormat::Tsk => "inode",
            _ => "identifier",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveFormat {
    Cpio,
    Tar,
    Zip,
}

impl ArchiveFormat {
    pub fn type_indicator(&self) -> TypeIndicator {
        match self {
            ArchiveFormat::Cpio => TypeIndicator::Cpio,
            ArchiveFormat::Tar => TypeIndicator::Tar,
            ArchiveFormat::Zip => TypeIndicator::Zip,
        }
    }
}

/// Row addressing for SQLITE_BLOB records.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RowSelector {
    /// Zero-based index into the table's row order.
    Index(u64),
    /// `column operator value` filter, e.g. `name = syslog`.
    Condition {
        column: String,
        operator: String,
        value: String,
    },
}

// =============================================================================
// Path Specification
// =============================================================================

/// One record in an addressing chain. See the module documentation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSpec {
    Os {
        location: String,
    },
    Fake {
        location: String,
    },
    Mount {
        identifier: String,
    },
    DataRange {
        range_offset: u64,
        range_size: u64,
        parent: Box<PathSpec>,
    },
    CompressedStream {
        method: CompressionMethod,
        parent: Box<PathSpec>,
    },
    EncodedStream {
        method: EncodingMethod,
        parent: Box<PathSpec>,
    },
    EncryptedStream {
        method: EncryptionMethod,
        cipher_mode: Option<CipherMode>,
        initialization_vector: Option<Vec<u8>>,
        key: Option<Vec<u8>>,
        parent: Box<PathSpec>,
    },
    CompressedFormat {
        format: CompressedFormat,
        parent: Box<PathSpec>,
    },
    StorageMedia {
        format: StorageMediaFormat,
        parent: Box<PathSpec>,
    },
    EncryptedVolume {
        format: EncryptedVolumeFormat,
        password: Option<String>,
        recovery_password: Option<String>,
        startup_key: Option<String>,
        encrypted_root_plist: Option<String>,
        parent: Box<PathSpec>,
    },
    Volume {
        format: VolumeSystemFormat,
        location: Option<String>,
        index: Option<u32>,
        start_offset: Option<u64>,
        parent: Box<PathSpec>,
    },
    FileSystem {
        format: FileSystemFormat,
        location: String,
        identifier: Option<u64>,
        data_stream: Option<String>,
        mft_attribute: Option<u32>,
        parent: Box<PathSpec>,
    },
    Archive {
        format: ArchiveFormat,
        location: String,
        parent: Box<PathSpec>,
    },
    SqliteBlob {
        table_name: String,
        column_name: String,
        row: RowSelector,
        parent: Box<PathSpec>,
    },
}

impl PathSpec {
    pub fn type_indicator(&self) -> TypeIndicator {
        match self {
            PathSpec::Os { .. } => TypeIndicator::Os,
            PathSpec::Fake { .. } => TypeIndicator::Fake,
            PathSpec::Mount { .. } => TypeIndicator::Mount,
            PathSpec::DataRange { .. } => TypeIndicator::DataRange,
            PathSpec::CompressedStream { .. } => TypeIndicator::CompressedStream,
            PathSpec::EncodedStream { .. } => TypeIndicator::EncodedStream,
            PathSpec::EncryptedStream { .. } => TypeIndicator::EncryptedStream,
            PathSpec::CompressedFormat { format, .. } => format.type_indicator(),
            PathSpec::StorageMedia { format, .. } => format.type_indicator(),
            PathSpec::EncryptedVolume { format, .. } => format.type_indicator(),
            PathSpec::Volume { format, .. } => format.type_indicator(),
            PathSpec::FileSystem { format, .. } => format.type_indicator(),
            PathSpec::Archive { format, .. } => format.type_indicator(),
            PathSpec::SqliteBlob { .. } => TypeIndicator::SqliteBlob,
        }
    }

    pub fn parent(&self) -> Option<&PathSpec> {
        match self {
            PathSpec::Os { .. } | PathSpec::Fake { .. } | PathSpec::Mount { .. } => None,
            PathSpec::DataRange { parent, .. }
            | PathSpec::CompressedStream { parent, .. }
            | PathSpec::EncodedStream { parent, .. }
            | PathSpec::EncryptedStream { parent, .. }
            | PathSpec::CompressedFormat { parent, .. }
            | PathSpec::StorageMedia { parent, .. }
            | PathSpec::EncryptedVolume { parent, .. }
            | PathSpec::Volume { parent, .. }
            | PathSpec::FileSystem { parent, .. }
            | PathSpec::Archive { parent, .. }
            | PathSpec::SqliteBlob { parent, .. } => Some(parent),
        }
    }

    pub fn has_parent(&self) -> bool {
        self.parent().is_some()
    }

    /// True if the chain root is handled directly by the host.
    pub fn is_system_level(&self) -> bool {
        self.type_indicator().is_system_level()
    }

    /// Location attribute, for the types that carry one.
    pub fn location(&self) -> Option<&str> {
        match self {
            PathSpec::Os { location }
            | PathSpec::Fake { location }
            | PathSpec::FileSystem { location, .. }
            | PathSpec::Archive { location, .. } => Some(location),
            PathSpec::Volume { location, .. } => location.as_deref(),
            _ => None,
        }
    }

    /// Number of records in the chain, including this one.
    pub fn chain_depth(&self) -> usize {
        let mut depth = 1;
        let mut current = self;
        while let Some(parent) = current.parent() {
            depth += 1;
            current = parent;
        }
        depth
    }

    /// Records of the chain ordered leaf (parentless root) first.
    pub fn chain(&self) -> Vec<&PathSpec> {
        let mut records = Vec::with_capacity(4);
        let mut current = self;
        records.push(current);
        while let Some(parent) = current.parent() {
            records.push(parent);
            current = parent;
        }
        records.reverse();
        records
    }

    /// Returns a copy of this record re-parented onto `parent`. Parentless
    /// root types are returned unchanged.
    pub fn with_parent(&self, new_parent: PathSpec) -> PathSpec {
        let mut copy = self.clone();
        match &mut copy {
            PathSpec::Os { .. } | PathSpec::Fake { .. } | PathSpec::Mount { .. } => {}
            PathSpec::DataRange { parent, .. }
            | PathSpec::CompressedStream { parent, .. }
            | PathSpec::EncodedStream { parent, .. }
            | PathSpec::EncryptedStream { parent, .. }
            | PathSpec::CompressedFormat { parent, .. }
            | PathSpec::StorageMedia { parent, .. }
            | PathSpec::EncryptedVolume { parent, .. }
            | PathSpec::Volume { parent, .. }
            | PathSpec::FileSystem { parent, .. }
            | PathSpec::Archive { parent, .. }
            | PathSpec::SqliteBlob { parent, .. } => **parent = new_parent,
        }
        copy
    }

    // =========================================================================
    // Comparable form
    // =========================================================================

    /// Canonical serialization of the whole chain: one newline-terminated
    /// line per record, leaf first, attribute keys ASCII-sorted. Two specs
    /// denote the same object iff their comparables are byte-equal.
    pub fn comparable(&self) -> String {
        let mut out = String::new();
        for record in self.chain() {
            out.push_str("type=");
            out.push_str(record.type_indicator().as_str());

            let mut attrs = record.own_attributes();
            attrs.sort_by(|a, b| a.0.cmp(b.0));
            for (key, value) in attrs {
                out.push_str(", ");
                out.push_str(key);
                out.push('=');
                out.push_str(&value);
            }
            out.push('\n');
        }
        out
    }

    /// Attribute key/value pairs of this record alone, unsorted. Bytes
    /// values are rendered as `0x`-prefixed hex.
    fn own_attributes(&self) -> Vec<(&'static str, String)> {
        let mut attrs: Vec<(&'static str, String)> = Vec::new();
        match self {
            PathSpec::Os { location } | PathSpec::Fake { location } => {
                attrs.push(("location", location.clone()));
            }
            PathSpec::Mount { identifier } => {
                attrs.push(("identifier", identifier.clone()));
            }
            PathSpec::DataRange {
                range_offset,
                range_size,
                ..
            } => {
                attrs.push(("range_offset", range_offset.to_string()));
                attrs.push(("range_size", range_size.to_string()));
            }
            PathSpec::CompressedStream { method, .. } => {
                attrs.push(("compression_method", method.as_str().to_string()));
            }
            PathSpec::EncodedStream { method, .. } => {
                attrs.push(("encoding_method", method.as_str().to_string()));
            }
            PathSpec::EncryptedStream {
                method,
                cipher_mode,
                initialization_vector,
                key,
                ..
            } => {
                attrs.push(("encryption_method", method.as_str().to_string()));
                if let Some(mode) = cipher_mode {
                    attrs.push(("cipher_mode", mode.as_str().to_string()));
                }
                if let Some(iv) = initialization_vector {
                    attrs.push(("initialization_vector", hex_value(iv)));
                }
                if let Some(key) = key {
                    attrs.push(("key", hex_value(key)));
                }
            }
            PathSpec::CompressedFormat { .. } | PathSpec::StorageMedia { .. } => {}
            PathSpec::EncryptedVolume {
                password,
                recovery_password,
                startup_key,
                encrypted_root_plist,
                ..
            } => {
                if let Some(value) = password {
                    attrs.push(("password", value.clone()));
                }
                if let Some(value) = recovery_password {
                    attrs.push(("recovery_password", value.clone()));
                }
                if let Some(value) = startup_key {
                    attrs.push(("startup_key", value.clone()));
                }
                if let Some(value) = encrypted_root_plist {
                    attrs.push(("encrypted_root_plist", value.clone()));
                }
            }
            PathSpec::Volume {
                format,
                location,
                index,
                start_offset,
                ..
            } => {
                if let Some(value) = location {
                    attrs.push(("location", value.clone()));
                }
                if let Some(value) = index {
                    attrs.push((format.index_key(), value.to_string()));
                }
                if let Some(value) = start_offset {
                    attrs.push(("start_offset", value.to_string()));
                }
            }
            PathSpec::FileSystem {
                format,
                location,
                identifier,
                data_stream,
                mft_attribute,
                ..
            } => {
                attrs.push(("location", location.clone()));
                if let Some(value) = identifier {
                    attrs.push((format.identifier_key(), value.to_string()));
                }
                if let Some(value) = data_stream {
                    attrs.push(("data_stream", value.clone()));
                }
                if let Some(value) = mft_attribute {
                    attrs.push(("mft_attribute", value.to_string()));
                }
            }
            PathSpec::Archive { location, .. } => {
                attrs.push(("location", location.clone()));
            }
            PathSpec::SqliteBlob {
                table_name,
                column_name,
                row,
                ..
            } => {
                attrs.push(("table_name", table_name.clone()));
                attrs.push(("column_name", column_name.clone()));
                match row {
                    RowSelector::Index(index) => {
                        attrs.push(("row_index", index.to_string()));
                    }
                    RowSelector::Condition {
                        column,
                        operator,
                        value,
                    } => {
                        attrs.push((
                            "row_condition",
                            format!("{} {} {}", column, operator, value),
                        ));
                    }
                }
            }
        }
        attrs
    }
}

impl PartialOrd for PathSpec {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PathSpec {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.comparable().cmp(&other.comparable())
    }
}

impl fmt::Display for PathSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.comparable().trim_end())
    }
}

fn hex_value(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("0x");
    for byte in bytes {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_chain() -> PathSpec {
        PathSpec::Archive {
            format: ArchiveFormat::Tar,
            location: "/syslog".to_string(),
            parent: Box::new(PathSpec::CompressedFormat {
                format: CompressedFormat::Gzip,
                parent: Box::new(PathSpec::Os {
                    location: "/evidence/logs.tgz".to_string(),
                }),
            }),
        }
    }

    #[test]
    fn test_comparable_leaf_first() {
        let spec = sample_chain();
        assert_eq!(
            spec.comparable(),
            "type=OS, location=/evidence/logs.tgz\ntype=GZIP\ntype=TAR, location=/syslog\n"
        );
    }

    #[test]
    fn test_comparable_sorted_keys() {
        let spec = PathSpec::DataRange {
            range_offset: 32256,
            range_size: 512,
            parent: Box::new(PathSpec::Os {
                location: "/img.raw".to_string(),
            }),
        };
        assert_eq!(
            spec.comparable(),
            "type=OS, location=/img.raw\ntype=DATA_RANGE, range_offset=32256, range_size=512\n"
        );
    }

    #[test]
    fn test_bytes_rendered_as_hex() {
        let spec = PathSpec::EncryptedStream {
            method: EncryptionMethod::Aes,
            cipher_mode: Some(CipherMode::Cbc),
            initialization_vector: Some(vec![0x00, 0xff]),
            key: None,
            parent: Box::new(PathSpec::Os {
                location: "/x".to_string(),
            }),
        };
        assert!(spec.comparable().contains("initialization_vector=0x00ff"));
    }

    #[test]
    fn test_chain_depth_and_order() {
        let spec = sample_chain();
        assert_eq!(spec.chain_depth(), 3);
        let chain = spec.chain();
        assert_eq!(chain[0].type_indicator(), TypeIndicator::Os);
        assert_eq!(chain[2].type_indicator(), TypeIndicator::Tar);
        assert!(chain[0].is_system_level());
    }

    #[test]
    fn test_equality_by_comparable() {
        let a = sample_chain();
        let b = sample_chain();
        assert_eq!(a, b);
        assert_eq!(a.comparable(), b.comparable());
    }

    #[test]
    fn test_volume_index_key_per_format() {
        assert_eq!(VolumeSystemFormat::TskPartition.index_key(), "part_index");
        assert_eq!(VolumeSystemFormat::Vshadow.index_key(), "store_index");
        assert_eq!(VolumeSystemFormat::Gpt.index_key(), "volume_index");
    }
}
