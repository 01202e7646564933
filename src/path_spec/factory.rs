//! Path specification construction and parsing
//!
//! The factory is the validating front door of the algebra: it builds records
//! from string attributes (checking required attributes, attribute typing and
//! the parent rule for each type) and parses comparable form back into a
//! chain. `from_comparable(p.comparable()) == p` for every well-formed chain.

use std::collections::HashMap;

use crate::error::{VfsError, VfsResult};
use crate::path_spec::{
    ArchiveFormat, CipherMode, CompressedFormat, CompressionMethod, EncodingMethod,
    EncryptedVolumeFormat, EncryptionMethod, FileSystemFormat, PathSpec, RowSelector,
    StorageMediaFormat, TypeIndicator, VolumeSystemFormat,
};

/// Builds a validated record of the given type from string attributes.
///
/// System-level types (OS, FAKE, MOUNT) reject a parent; every other type
/// requires one. Unknown or malformed attributes fail with a path
/// specification error.
pub fn new(
    indicator: TypeIndicator,
    attributes: &[(&str, &str)],
    parent: Option<PathSpec>,
) -> VfsResult<PathSpec> {
    let mut attrs: HashMap<&str, &str> = HashMap::with_capacity(attributes.len());
    for (key, value) in attributes {
        if attrs.insert(key, value).is_some() {
            return Err(VfsError::PathSpec(format!(
                "duplicate attribute: {}",
                key
            )));
        }
    }

    if indicator.is_system_level() {
        if parent.is_some() {
            return Err(VfsError::PathSpec(format!(
                "{} must not have a parent",
                indicator
            )));
        }
    } else if parent.is_none() {
        return Err(VfsError::PathSpec(format!(
            "{} requires a parent",
            indicator
        )));
    }

    let spec = build(indicator, &mut attrs, parent)?;

    if let Some(key) = attrs.keys().next() {
        return Err(VfsError::PathSpec(format!(
            "unsupported attribute for {}: {}",
            indicator, key
        )));
    }
    Ok(spec)
}

fn build(
    indicator: TypeIndicator,
    attrs: &mut HashMap<&str, &str>,
    parent: Option<PathSpec>,
) -> VfsResult<PathSpec> {
    let spec = match indicator {
        TypeIndicator::Os => PathSpec::Os {
            location: required(attrs, indicator, "location")?,
        },
        TypeIndicator::Fake => PathSpec::Fake {
            location: required(attrs, indicator, "location")?,
        },
        TypeIndicator::Mount => PathSpec::Mount {
            identifier: required(attrs, indicator, "identifier")?,
        },
        TypeIndicator::DataRange => PathSpec::DataRange {
            range_offset: required_u64(attrs, indicator, "range_offset")?,
            range_size: required_u64(attrs, indicator, "range_size")?,
            parent: boxed(parent),
        },
        TypeIndicator::CompressedStream => {
            let method = required(attrs, indicator, "compression_method")?;
            PathSpec::CompressedStream {
                method: CompressionMethod::parse(&method).ok_or_else(|| {
                    VfsError::PathSpec(format!("unknown compression method: {}", method))
                })?,
                parent: boxed(parent),
            }
        }
        TypeIndicator::EncodedStream => {
            let method = required(attrs, indicator, "encoding_method")?;
            PathSpec::EncodedStream {
                method: EncodingMethod::parse(&method).ok_or_else(|| {
                    VfsError::PathSpec(format!("unknown encoding method: {}", method))
                })?,
                parent: boxed(parent),
            }
        }
        TypeIndicator::EncryptedStream => {
            let method = required(attrs, indicator, "encryption_method")?;
            let cipher_mode = match attrs.remove("cipher_mode") {
                Some(value) => Some(CipherMode::parse(value).ok_or_else(|| {
                    VfsError::PathSpec(format!("unknown cipher mode: {}", value))
                })?),
                None => None,
            };
            PathSpec::EncryptedStream {
                method: EncryptionMethod::parse(&method).ok_or_else(|| {
                    VfsError::PathSpec(format!("unknown encryption method: {}", method))
                })?,
                cipher_mode,
                initialization_vector: optional_bytes(attrs, "initialization_vector")?,
                key: optional_bytes(attrs, "key")?,
                parent: boxed(parent),
            }
        }
        TypeIndicator::Gzip => compressed_format(CompressedFormat::Gzip, parent),
        TypeIndicator::Bzip2 => compressed_format(CompressedFormat::Bzip2, parent),
        TypeIndicator::Xz => compressed_format(CompressedFormat::Xz, parent),
        TypeIndicator::Lzma => compressed_format(CompressedFormat::Lzma, parent),
        TypeIndicator::Ewf => storage_media(StorageMediaFormat::Ewf, parent),
        TypeIndicator::Qcow => storage_media(StorageMediaFormat::Qcow, parent),
        TypeIndicator::Vhdi => storage_media(StorageMediaFormat::Vhdi, parent),
        TypeIndicator::Vmdk => storage_media(StorageMediaFormat::Vmdk, parent),
        TypeIndicator::Raw => storage_media(StorageMediaFormat::Raw, parent),
        TypeIndicator::Modi => storage_media(StorageMediaFormat::Modi, parent),
        TypeIndicator::Phdi => storage_media(StorageMediaFormat::Phdi, parent),
        TypeIndicator::Bde | TypeIndicator::Fvde | TypeIndicator::Luksde => {
            let format = match indicator {
                TypeIndicator::Bde => EncryptedVolumeFormat::Bde,
                TypeIndicator::Fvde => EncryptedVolumeFormat::Fvde,
                _ => EncryptedVolumeFormat::Luksde,
            };
            let password = attrs.remove("password").map(str::to_string);
            let recovery_password = match format {
                EncryptedVolumeFormat::Luksde => None,
                _ => attrs.remove("recovery_password").map(str::to_string),
            };
            let startup_key = match format {
                EncryptedVolumeFormat::Bde => attrs.remove("startup_key").map(str::to_string),
                _ => None,
            };
            let encrypted_root_plist = match format {
                EncryptedVolumeFormat::Fvde => {
                    attrs.remove("encrypted_root_plist").map(str::to_string)
                }
                _ => None,
            };
            PathSpec::EncryptedVolume {
                format,
                password,
                recovery_password,
                startup_key,
                encrypted_root_plist,
                parent: boxed(parent),
            }
        }
        TypeIndicator::ApfsContainer
        | TypeIndicator::Lvm
        | TypeIndicator::Gpt
        | TypeIndicator::Apm
        | TypeIndicator::Mbr
        | TypeIndicator::TskPartition
        | TypeIndicator::Vshadow => {
            let format = match indicator {
                TypeIndicator::ApfsContainer => VolumeSystemFormat::ApfsContainer,
                TypeIndicator::Lvm => VolumeSystemFormat::Lvm,
                TypeIndicator::Gpt => VolumeSystemFormat::Gpt,
                TypeIndicator::Apm => VolumeSystemFormat::Apm,
                TypeIndicator::Mbr => VolumeSystemFormat::Mbr,
                TypeIndicator::TskPartition => VolumeSystemFormat::TskPartition,
                _ => VolumeSystemFormat::Vshadow,
            };
            let location = attrs.remove("location").map(str::to_string);
            let index = optional_u32(attrs, format.index_key())?;
            let start_offset = optional_u64(attrs, "start_offset")?;
            if location.is_none() && index.is_none() && start_offset.is_none() {
                return Err(VfsError::PathSpec(format!(
                    "{} requires a location, {} or start_offset",
                    indicator,
                    format.index_key()
                )));
            }
            PathSpec::Volume {
                format,
                location,
                index,
                start_offset,
                parent: boxed(parent),
            }
        }
        TypeIndicator::Apfs
        | TypeIndicator::Ext
        | TypeIndicator::Hfs
        | TypeIndicator::Ntfs
        | TypeIndicator::Xfs
        | TypeIndicator::Fat
        | TypeIndicator::Tsk => {
            let format = match indicator {
                TypeIndicator::Apfs => FileSystemFormat::Apfs,
                TypeIndicator::Ext => FileSystemFormat::Ext,
                TypeIndicator::Hfs => FileSystemFormat::Hfs,
                TypeIndicator::Ntfs => FileSystemFormat::Ntfs,
                TypeIndicator::Xfs => FileSystemFormat::Xfs,
                TypeIndicator::Fat => FileSystemFormat::Fat,
                _ => FileSystemFormat::Tsk,
            };
            let data_stream = match format {
                FileSystemFormat::Ntfs => attrs.remove("data_stream").map(str::to_string),
                _ => None,
            };
            let mft_attribute = match format {
                FileSystemFormat::Ntfs => optional_u32(attrs, "mft_attribute")?,
                _ => None,
            };
            PathSpec::FileSystem {
                format,
                location: required(attrs, indicator, "location")?,
                identifier: optional_u64(attrs, format.identifier_key())?,
                data_stream,
                mft_attribute,
                parent: boxed(parent),
            }
        }
        TypeIndicator::Cpio => archive(ArchiveFormat::Cpio, attrs, parent)?,
        TypeIndicator::Tar => archive(ArchiveFormat::Tar, attrs, parent)?,
        TypeIndicator::Zip => archive(ArchiveFormat::Zip, attrs, parent)?,
        TypeIndicator::SqliteBlob => {
            let row = if let Some(value) = attrs.remove("row_index") {
                RowSelector::Index(parse_u64("row_index", value)?)
            } else if let Some(value) = attrs.remove("row_condition") {
                parse_row_condition(value)?
            } else {
                return Err(VfsError::PathSpec(
                    "SQLITE_BLOB requires row_index or row_condition".to_string(),
                ));
            };
            PathSpec::SqliteBlob {
                table_name: required(attrs, indicator, "table_name")?,
                column_name: required(attrs, indicator, "column_name")?,
                row,
                parent: boxed(parent),
            }
        }
    };
    Ok(spec)
}

fn compressed_format(format: CompressedFormat, parent: Option<PathSpec>) -> PathSpec {
    PathSpec::CompressedFormat {
        format,
        parent: boxed(parent),
    }
}

fn storage_media(format: StorageMediaFormat, parent: Option<PathSpec>) -> PathSpec {
    PathSpec::StorageMedia {
        format,
        parent: boxed(parent),
    }
}

fn archive(
    format: ArchiveFormat,
    attrs: &mut HashMap<&str, &str>,
    parent: Option<PathSpec>,
) -> VfsResult<PathSpec> {
    Ok(PathSpec::Archive {
        format,
        location: required(attrs, format.type_indicator(), "location")?,
        parent: boxed(parent),
    })
}

fn boxed(parent: Option<PathSpec>) -> Box<PathSpec> {
    // The parent rule was checked up front; system-level types never get here.
    Box::new(parent.expect("parent presence validated"))
}

fn required(
    attrs: &mut HashMap<&str, &str>,
    indicator: TypeIndicator,
    key: &str,
) -> VfsResult<String> {
    attrs.remove(key).map(str::to_string).ok_or_else(|| {
        VfsError::PathSpec(format!("{} requires attribute {}", indicator, key))
    })
}

fn required_u64(
    attrs: &mut HashMap<&str, &str>,
    indicator: TypeIndicator,
    key: &str,
) -> VfsResult<u64> {
    let value = required(attrs, indicator, key)?;
    parse_u64(key, &value)
}

fn optional_u64(attrs: &mut HashMap<&str, &str>, key: &str) -> VfsResult<Option<u64>> {
    attrs.remove(key).map(|value| parse_u64(key, value)).transpose()
}

fn optional_u32(attrs: &mut HashMap<&str, &str>, key: &str) -> VfsResult<Option<u32>> {
    match attrs.remove(key) {
        Some(value) => value
            .parse::<u32>()
            .map(Some)
            .map_err(|_| VfsError::PathSpec(format!("{} is not an integer: {}", key, value))),
        None => Ok(None),
    }
}

fn parse_u64(key: &str, value: &str) -> VfsResult<u64> {
    value
        .parse::<u64>()
        .map_err(|_| VfsError::PathSpec(format!("{} is not an integer: {}", key, value)))
}

fn optional_bytes(attrs: &mut HashMap<&str, &str>, key: &str) -> VfsResult<Option<Vec<u8>>> {
    match attrs.remove(key) {
        Some(value) => parse_hex(key, value).map(Some),
        None => Ok(None),
    }
}

fn parse_hex(key: &str, value: &str) -> VfsResult<Vec<u8>> {
    let digits = value.strip_prefix("0x").ok_or_else(|| {
        VfsError::PathSpec(format!("{} must be 0x-prefixed hex: {}", key, value))
    })?;
    if !digits.is_ascii() {
        return Err(VfsError::PathSpec(format!(
            "{} contains non-hex digits: {}",
            key, value
        )));
    }
    if digits.len() % 2 != 0 {
        return Err(VfsError::PathSpec(format!(
            "{} has odd hex digit count: {}",
            key, value
        )));
    }
    let mut bytes = Vec::with_capacity(digits.len() / 2);
    for chunk in digits.as_bytes().chunks(2) {
        let text = std::str::from_utf8(chunk).expect("hex digits are ASCII");
        let byte = u8::from_str_radix(text, 16).map_err(|_| {
            VfsError::PathSpec(format!("{} contains non-hex digits: {}", key, value))
        })?;
        bytes.push(byte);
    }
    Ok(bytes)
}

fn parse_row_condition(value: &str) -> VfsResult<RowSelector> {
    let mut parts = value.splitn(3, ' ');
    let column = parts.next().unwrap_or_default();
    let operator = parts.next().unwrap_or_default();
    let condition_value = parts.next().unwrap_or_default();
    if column.is_empty() || operator.is_empty() || condition_value.is_empty() {
        return Err(VfsError::PathSpec(format!(
            "malformed row_condition: {}",
            value
        )));
    }
    if !matches!(operator, "=" | "==" | "!=" | "<" | "<=" | ">" | ">=") {
        return Err(VfsError::PathSpec(format!(
            "unsupported row_condition operator: {}",
            operator
        )));
    }
    Ok(RowSelector::Condition {
        column: column.to_string(),
        operator: operator.to_string(),
        value: condition_value.to_string(),
    })
}

// =============================================================================
// Comparable parsing
// =============================================================================

/// Parses comparable form back into a chain. The input is one record per
/// newline-terminated line, leaf first, as produced by
/// [`PathSpec::comparable`].
pub fn from_comparable(text: &str) -> VfsResult<PathSpec> {
    let mut current: Option<PathSpec> = None;

    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }

        let mut fields = line.split(", ");
        let type_field = fields.next().unwrap_or_default();
        let indicator_name = type_field.strip_prefix("type=").ok_or_else(|| {
            VfsError::PathSpec(format!("line does not start with type=: {}", line))
        })?;
        let indicator = TypeIndicator::from_str_indicator(indicator_name)
            .ok_or_else(|| VfsError::UnsupportedType(indicator_name.to_string()))?;

        let mut attributes: Vec<(&str, &str)> = Vec::new();
        for field in fields {
            let (key, value) = field.split_once('=').ok_or_else(|| {
                VfsError::PathSpec(format!("malformed attribute field: {}", field))
            })?;
            attributes.push((key, value));
        }

        current = Some(new(indicator, &attributes, current.take())?);
    }

    current.ok_or_else(|| VfsError::PathSpec("empty comparable".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_os() {
        let spec = new(TypeIndicator::Os, &[("location", "/tmp/img.raw")], None).unwrap();
        assert_eq!(spec.type_indicator(), TypeIndicator::Os);
        assert_eq!(spec.location(), Some("/tmp/img.raw"));
    }

    #[test]
    fn test_parent_rules() {
        let os = new(TypeIndicator::Os, &[("location", "/x")], None).unwrap();

        // System-level types reject a parent.
        let err = new(TypeIndicator::Os, &[("location", "/y")], Some(os.clone()));
        assert!(matches!(err, Err(VfsError::PathSpec(_))));

        // Everything else requires one.
        let err = new(TypeIndicator::Gzip, &[], None);
        assert!(matches!(err, Err(VfsError::PathSpec(_))));

        let gzip = new(TypeIndicator::Gzip, &[], Some(os)).unwrap();
        assert_eq!(gzip.type_indicator(), TypeIndicator::Gzip);
    }

    #[test]
    fn test_missing_required_attribute() {
        let err = new(TypeIndicator::Os, &[], None);
        assert!(matches!(err, Err(VfsError::PathSpec(_))));

        let os = new(TypeIndicator::Os, &[("location", "/x")], None).unwrap();
        let err = new(TypeIndicator::DataRange, &[("range_offset", "0")], Some(os));
        assert!(matches!(err, Err(VfsError::PathSpec(_))));
    }

    #[test]
    fn test_unknown_attribute_rejected() {
        let err = new(
            TypeIndicator::Os,
            &[("location", "/x"), ("bogus", "1")],
            None,
        );
        assert!(matches!(err, Err(VfsError::PathSpec(_))));
    }

    #[test]
    fn test_round_trip() {
        let os = new(TypeIndicator::Os, &[("location", "/evidence/disk.qcow2")], None).unwrap();
        let qcow = new(TypeIndicator::Qcow, &[], Some(os)).unwrap();
        let partition = new(
            TypeIndicator::TskPartition,
            &[("location", "/p1")],
            Some(qcow),
        )
        .unwrap();
        let fs = new(
            TypeIndicator::Tsk,
            &[("location", "/Users/MyUser/MyFile.txt"), ("inode", "128")],
            Some(partition),
        )
        .unwrap();

        let parsed = from_comparable(&fs.comparable()).unwrap();
        assert_eq!(parsed, fs);
        assert_eq!(parsed.comparable(), fs.comparable());
    }

    #[test]
    fn test_round_trip_encrypted_bytes() {
        let os = new(TypeIndicator::Os, &[("location", "/enc.bin")], None).unwrap();
        let spec = new(
            TypeIndicator::EncryptedStream,
            &[
                ("encryption_method", "aes"),
                ("cipher_mode", "cbc"),
                ("key", "0x000102030405060708090a0b0c0d0e0f"),
                ("initialization_vector", "0x0f0e0d0c0b0a09080706050403020100"),
            ],
            Some(os),
        )
        .unwrap();
        let parsed = from_comparable(&spec.comparable()).unwrap();
        assert_eq!(parsed, spec);
    }

    #[test]
    fn test_round_trip_sqlite_blob_condition() {
        let os = new(TypeIndicator::Os, &[("location", "/files.db")], None).unwrap();
        let spec = new(
            TypeIndicator::SqliteBlob,
            &[
                ("table_name", "files"),
                ("column_name", "data"),
                ("row_condition", "name = syslog"),
            ],
            Some(os),
        )
        .unwrap();
        let parsed = from_comparable(&spec.comparable()).unwrap();
        assert_eq!(parsed, spec);
    }

    #[test]
    fn test_unknown_type() {
        let err = from_comparable("type=FLOPPY, location=/x\n");
        assert!(matches!(err, Err(VfsError::UnsupportedType(_))));
    }

    #[test]
    fn test_volume_requires_address() {
        let os = new(TypeIndicator::Os, &[("location", "/x")], None).unwrap();
        let err = new(TypeIndicator::Gpt, &[], Some(os.clone()));
        assert!(matches!(err, Err(VfsError::PathSpec(_))));

        let ok = new(TypeIndicator::Vshadow, &[("store_index", "2")], Some(os)).unwrap();
        assert!(ok.comparable().contains("store_index=2"));
    }
}
