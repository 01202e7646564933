//! Native resolver helpers
//!
//! One helper per type the crate can open without an external decoder.
//! Helpers for types layered over a parent resolve that parent through the
//! context, so every constructed stream owns an independent parent chain.

use std::sync::Arc;

use crate::crypto::Decrypter;
use crate::error::{VfsError, VfsResult};
use crate::path_spec::{PathSpec, TypeIndicator};
use crate::registry::{BackendRegistry, ResolverHelper};
use crate::resolver::{CredentialValue, ResolverContext};
use crate::stream::compressed::CompressedStream;
use crate::stream::data_range::DataRangeStream;
use crate::stream::encoded::EncodedStream;
use crate::stream::encrypted::EncryptedStream;
use crate::stream::ewf::EwfStream;
use crate::stream::gzip::GzipStream;
use crate::stream::os::OsStream;
use crate::stream::raw::SegmentedRawStream;
use crate::stream::sqlite_blob::SqliteBlobStream;
use crate::stream::FileObject;
use crate::vfs::cpio::CpioFileSystem;
use crate::vfs::os::OsFileSystem;
use crate::vfs::root_stream::RootStreamFileSystem;
use crate::vfs::tar::TarFileSystem;
use crate::vfs::zip::ZipFileSystem;
use crate::vfs::{opener_from, FileSystem, StreamOpener};

/// Registers every native helper into the registry.
pub fn register_native_helpers(registry: &BackendRegistry) {
    registry.register_resolver_helper(Arc::new(OsResolverHelper));
    registry.register_resolver_helper(Arc::new(FakeResolverHelper));
    registry.register_resolver_helper(Arc::new(MountResolverHelper));
    registry.register_resolver_helper(Arc::new(DataRangeResolverHelper));
    registry.register_resolver_helper(Arc::new(CompressedStreamResolverHelper));
    registry.register_resolver_helper(Arc::new(EncodedStreamResolverHelper));
    registry.register_resolver_helper(Arc::new(EncryptedStreamResolverHelper));
    for indicator in [
        TypeIndicator::Gzip,
        TypeIndicator::Bzip2,
        TypeIndicator::Xz,
        TypeIndicator::Lzma,
    ] {
        registry.register_resolver_helper(Arc::new(CompressedFormatResolverHelper {
            indicator,
        }));
    }
    registry.register_resolver_helper(Arc::new(RawResolverHelper));
    registry.register_resolver_helper(Arc::new(EwfResolverHelper));
    registry.register_resolver_helper(Arc::new(SqliteBlobResolverHelper));
    registry.register_resolver_helper(Arc::new(TarResolverHelper));
    registry.register_resolver_helper(Arc::new(ZipResolverHelper));
    registry.register_resolver_helper(Arc::new(CpioResolverHelper));
}

/// Opener that re-resolves `spec` through `context` on every call.
fn chain_opener(context: &ResolverContext, spec: &PathSpec) -> StreamOpener {
    let context = context.clone();
    let spec = spec.clone();
    opener_from(move || context.open_file_object(&spec))
}

fn parent_of<'a>(spec: &'a PathSpec) -> VfsResult<&'a PathSpec> {
    spec.parent().ok_or_else(|| {
        VfsError::PathSpec(format!("{} requires a parent", spec.type_indicator()))
    })
}

/// Location of an OS parent, for back-ends that need host paths (segment
/// discovery, SQLite).
fn os_parent_location(spec: &PathSpec) -> Option<&str> {
    match parent_of(spec) {
        Ok(PathSpec::Os { location }) => Some(location),
        _ => None,
    }
}

/// Shared file-system product for stream-only layers.
fn root_stream_file_system(
    context: &ResolverContext,
    spec: &PathSpec,
) -> VfsResult<Arc<dyn FileSystem>> {
    Ok(Arc::new(RootStreamFileSystem::open(
        chain_opener(context, spec),
        spec.clone(),
    )?))
}

// =============================================================================
// System-level types
// =============================================================================

struct OsResolverHelper;

impl ResolverHelper for OsResolverHelper {
    fn type_indicator(&self) -> TypeIndicator {
        TypeIndicator::Os
    }

    fn provides_file_object(&self) -> bool {
        true
    }

    fn provides_file_system(&self) -> bool {
        true
    }

    fn new_file_object(
        &self,
        spec: &PathSpec,
        _context: &ResolverContext,
    ) -> VfsResult<Box<dyn FileObject>> {
        match spec {
            PathSpec::Os { location } => Ok(Box::new(OsStream::open(location)?)),
            _ => Err(VfsError::PathSpec("not an OS specification".to_string())),
        }
    }

    fn new_file_system(
        &self,
        _spec: &PathSpec,
        _context: &ResolverContext,
    ) -> VfsResult<Arc<dyn FileSystem>> {
        Ok(Arc::new(OsFileSystem))
    }
}

struct FakeResolverHelper;

impl ResolverHelper for FakeResolverHelper {
    fn type_indicator(&self) -> TypeIndicator {
        TypeIndicator::Fake
    }

    fn provides_file_object(&self) -> bool {
        true
    }

    fn provides_file_system(&self) -> bool {
        true
    }

    fn new_file_object(
        &self,
        spec: &PathSpec,
        context: &ResolverContext,
    ) -> VfsResult<Box<dyn FileObject>> {
        let file_system = self.new_file_system(spec, context)?;
        file_system.entry_by_spec(spec)?.file_object(None)
    }

    fn new_file_system(
        &self,
        spec: &PathSpec,
        context: &ResolverContext,
    ) -> VfsResult<Arc<dyn FileSystem>> {
        // Fake hierarchies are built programmatically; they resolve only
        // when cached into the context beforehand.
        context.cached_file_system(spec).ok_or_else(|| {
            VfsError::NotFound(
                "fake file system was not registered in this context".to_string(),
            )
        })
    }
}

struct MountResolverHelper;

impl MountResolverHelper {
    fn target(spec: &PathSpec, context: &ResolverContext) -> VfsResult<PathSpec> {
        match spec {
            PathSpec::Mount { identifier } => context.mount_table().resolve(identifier),
            _ => Err(VfsError::PathSpec("not a MOUNT specification".to_string())),
        }
    }
}

impl ResolverHelper for MountResolverHelper {
    fn type_indicator(&self) -> TypeIndicator {
        TypeIndicator::Mount
    }

    fn provides_file_object(&self) -> bool {
        true
    }

    fn provides_file_system(&self) -> bool {
        true
    }

    fn new_file_object(
        &self,
        spec: &PathSpec,
        context: &ResolverContext,
    ) -> VfsResult<Box<dyn FileObject>> {
        context.open_file_object(&Self::target(spec, context)?)
    }

    fn new_file_system(
        &self,
        spec: &PathSpec,
        context: &ResolverContext,
    ) -> VfsResult<Arc<dyn FileSystem>> {
        context.open_file_system(&Self::target(spec, context)?)
    }
}

// =============================================================================
// Transform streams
// =============================================================================

struct DataRangeResolverHelper;

impl ResolverHelper for DataRangeResolverHelper {
    fn type_indicator(&self) -> TypeIndicator {
        TypeIndicator::DataRange
    }

    fn provides_file_object(&self) -> bool {
        true
    }

    fn provides_file_system(&self) -> bool {
        true
    }

    fn new_file_object(
        &self,
        spec: &PathSpec,
        context: &ResolverContext,
    ) -> VfsResult<Box<dyn FileObject>> {
        match spec {
            PathSpec::DataRange {
                range_offset,
                range_size,
                parent,
            } => {
                let parent = context.open_file_object(parent)?;
                Ok(Box::new(DataRangeStream::new(
                    parent,
                    *range_offset,
                    *range_size,
                )))
            }
            _ => Err(VfsError::PathSpec(
                "not a DATA_RANGE specification".to_string(),
            )),
        }
    }

    fn new_file_system(
        &self,
        spec: &PathSpec,
        context: &ResolverContext,
    ) -> VfsResult<Arc<dyn FileSystem>> {
        root_stream_file_system(context, spec)
    }
}

struct CompressedStreamResolverHelper;

impl ResolverHelper for CompressedStreamResolverHelper {
    fn type_indicator(&self) -> TypeIndicator {
        TypeIndicator::CompressedStream
    }

    fn provides_file_object(&self) -> bool {
        true
    }

    fn provides_file_system(&self) -> bool {
        true
    }

    fn new_file_object(
        &self,
        spec: &PathSpec,
        context: &ResolverContext,
    ) -> VfsResult<Box<dyn FileObject>> {
        match spec {
            PathSpec::CompressedStream { method, parent } => {
                let parent = context.open_file_object(parent)?;
                Ok(Box::new(CompressedStream::new(
                    parent,
                    *method,
                    context.cancel_token(),
                )?))
            }
            _ => Err(VfsError::PathSpec(
                "not a COMPRESSED_STREAM specification".to_string(),
            )),
        }
    }

    fn new_file_system(
        &self,
        spec: &PathSpec,
        context: &ResolverContext,
    ) -> VfsResult<Arc<dyn FileSystem>> {
        root_stream_file_system(context, spec)
    }
}

struct EncodedStreamResolverHelper;

impl ResolverHelper for EncodedStreamResolverHelper {
    fn type_indicator(&self) -> TypeIndicator {
        TypeIndicator::EncodedStream
    }

    fn provides_file_object(&self) -> bool {
        true
    }

    fn provides_file_system(&self) -> bool {
        true
    }

    fn new_file_object(
        &self,
        spec: &PathSpec,
        context: &ResolverContext,
    ) -> VfsResult<Box<dyn FileObject>> {
        match spec {
            PathSpec::EncodedStream { method, parent } => {
                let parent = context.open_file_object(parent)?;
                Ok(Box::new(EncodedStream::new(parent, *method)?))
            }
            _ => Err(VfsError::PathSpec(
                "not an ENCODED_STREAM specification".to_string(),
            )),
        }
    }

    fn new_file_system(
        &self,
        spec: &PathSpec,
        context: &ResolverContext,
    ) -> VfsResult<Arc<dyn FileSystem>> {
        root_stream_file_system(context, spec)
    }
}

struct EncryptedStreamResolverHelper;

impl ResolverHelper for EncryptedStreamResolverHelper {
    fn type_indicator(&self) -> TypeIndicator {
        TypeIndicator::EncryptedStream
    }

    fn provides_file_object(&self) -> bool {
        true
    }

    fn provides_file_system(&self) -> bool {
        true
    }

    fn new_file_object(
        &self,
        spec: &PathSpec,
        context: &ResolverContext,
    ) -> VfsResult<Box<dyn FileObject>> {
        match spec {
            PathSpec::EncryptedStream {
                method,
                cipher_mode,
                initialization_vector,
                key,
                parent,
            } => {
                let explicit = key.clone().map(CredentialValue::Bytes);
                let (_, credential) = context.resolve_credential(spec, &["key"], explicit)?;
                let decrypter = Decrypter::new(
                    *method,
                    *cipher_mode,
                    credential.as_bytes(),
                    initialization_vector.as_deref(),
                )?;
                let parent = context.open_file_object(parent)?;
                Ok(Box::new(EncryptedStream::new(parent, decrypter)?))
            }
            _ => Err(VfsError::PathSpec(
                "not an ENCRYPTED_STREAM specification".to_string(),
            )),
        }
    }

    fn new_file_system(
        &self,
        spec: &PathSpec,
        context: &ResolverContext,
    ) -> VfsResult<Arc<dyn FileSystem>> {
        root_stream_file_system(context, spec)
    }
}

/// GZIP, BZIP2, XZ and LZMA: whole-file compressed formats.
struct CompressedFormatResolverHelper {
    indicator: TypeIndicator,
}

impl ResolverHelper for CompressedFormatResolverHelper {
    fn type_indicator(&self) -> TypeIndicator {
        self.indicator
    }

    fn provides_file_object(&self) -> bool {
        true
    }

    fn provides_file_system(&self) -> bool {
        true
    }

    fn new_file_object(
        &self,
        spec: &PathSpec,
        context: &ResolverContext,
    ) -> VfsResult<Box<dyn FileObject>> {
        match spec {
            PathSpec::CompressedFormat { format, parent } => {
                let parent_stream = context.open_file_object(parent)?;
                if format.type_indicator() == TypeIndicator::Gzip {
                    // The format-aware stream keeps a member index.
                    return Ok(Box::new(GzipStream::new(
                        parent_stream,
                        context.cancel_token(),
                    )?));
                }
                Ok(Box::new(CompressedStream::new(
                    parent_stream,
                    format.compression_method(),
                    context.cancel_token(),
                )?))
            }
            _ => Err(VfsError::PathSpec(format!(
                "not a {} specification",
                self.indicator
            ))),
        }
    }

    fn new_file_system(
        &self,
        spec: &PathSpec,
        context: &ResolverContext,
    ) -> VfsResult<Arc<dyn FileSystem>> {
        root_stream_file_system(context, spec)
    }
}

// =============================================================================
// Storage media
// =============================================================================

struct RawResolverHelper;

impl ResolverHelper for RawResolverHelper {
    fn type_indicator(&self) -> TypeIndicator {
        TypeIndicator::Raw
    }

    fn provides_file_object(&self) -> bool {
        true
    }

    fn provides_file_system(&self) -> bool {
        true
    }

    fn new_file_object(
        &self,
        spec: &PathSpec,
        context: &ResolverContext,
    ) -> VfsResult<Box<dyn FileObject>> {
        // Split images need host directory listings; any other parent is
        // treated as a single contiguous segment.
        if let Some(location) = os_parent_location(spec) {
            return Ok(Box::new(SegmentedRawStream::open(location)?));
        }
        context.open_file_object(parent_of(spec)?)
    }

    fn new_file_system(
        &self,
        spec: &PathSpec,
        context: &ResolverContext,
    ) -> VfsResult<Arc<dyn FileSystem>> {
        root_stream_file_system(context, spec)
    }
}

struct EwfResolverHelper;

impl ResolverHelper for EwfResolverHelper {
    fn type_indicator(&self) -> TypeIndicator {
        TypeIndicator::Ewf
    }

    fn provides_file_object(&self) -> bool {
        true
    }

    fn provides_file_system(&self) -> bool {
        true
    }

    fn new_file_object(
        &self,
        spec: &PathSpec,
        _context: &ResolverContext,
    ) -> VfsResult<Box<dyn FileObject>> {
        let location = os_parent_location(spec).ok_or_else(|| {
            VfsError::PathSpec(
                "EWF images are opened from host segment files".to_string(),
            )
        })?;
        Ok(Box::new(EwfStream::open(location)?))
    }

    fn new_file_system(
        &self,
        spec: &PathSpec,
        context: &ResolverContext,
    ) -> VfsResult<Arc<dyn FileSystem>> {
        root_stream_file_system(context, spec)
    }
}

struct SqliteBlobResolverHelper;

impl ResolverHelper for SqliteBlobResolverHelper {
    fn type_indicator(&self) -> TypeIndicator {
        TypeIndicator::SqliteBlob
    }

    fn provides_file_object(&self) -> bool {
        true
    }

    fn provides_file_system(&self) -> bool {
        true
    }

    fn new_file_object(
        &self,
        spec: &PathSpec,
        context: &ResolverContext,
    ) -> VfsResult<Box<dyn FileObject>> {
        match spec {
            PathSpec::SqliteBlob {
                table_name,
                column_name,
                row,
                parent,
            } => {
                if let Some(location) = os_parent_location(spec) {
                    return Ok(Box::new(SqliteBlobStream::open_from_path(
                        location, table_name, column_name, row,
                    )?));
                }
                let mut parent_stream = context.open_file_object(parent)?;
                Ok(Box::new(SqliteBlobStream::open_from_stream(
                    parent_stream.as_mut(),
                    table_name,
                    column_name,
                    row,
                )?))
            }
            _ => Err(VfsError::PathSpec(
                "not a SQLITE_BLOB specification".to_string(),
            )),
        }
    }

    fn new_file_system(
        &self,
        spec: &PathSpec,
        context: &ResolverContext,
    ) -> VfsResult<Arc<dyn FileSystem>> {
        root_stream_file_system(context, spec)
    }
}

// =============================================================================
// Archive file systems
// =============================================================================

struct TarResolverHelper;

impl ResolverHelper for TarResolverHelper {
    fn type_indicator(&self) -> TypeIndicator {
        TypeIndicator::Tar
    }

    fn provides_file_system(&self) -> bool {
        true
    }

    fn new_file_system(
        &self,
        spec: &PathSpec,
        context: &ResolverContext,
    ) -> VfsResult<Arc<dyn FileSystem>> {
        let parent = parent_of(spec)?;
        Ok(Arc::new(TarFileSystem::open(
            chain_opener(context, parent),
            parent.clone(),
        )?))
    }
}

struct ZipResolverHelper;

impl ResolverHelper for ZipResolverHelper {
    fn type_indicator(&self) -> TypeIndicator {
        TypeIndicator::Zip
    }

    fn provides_file_system(&self) -> bool {
        true
    }

    fn new_file_system(
        &self,
        spec: &PathSpec,
        context: &ResolverContext,
    ) -> VfsResult<Arc<dyn FileSystem>> {
        let parent = parent_of(spec)?;
        Ok(Arc::new(ZipFileSystem::open(
            chain_opener(context, parent),
            parent.clone(),
        )?))
    }
}

struct CpioResolverHelper;

impl ResolverHelper for CpioResolverHelper {
    fn type_indicator(&self) -> TypeIndicator {
        TypeIndicator::Cpio
    }

    fn provides_file_system(&self) -> bool {
        true
    }

    fn new_file_system(
        &self,
        spec: &PathSpec,
        context: &ResolverContext,
    ) -> VfsResult<Arc<dyn FileSystem>> {
        let parent = parent_of(spec)?;
        Ok(Arc::new(CpioFileSystem::open(
            chain_opener(context, parent),
            parent.clone(),
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path_spec::{
        ArchiveFormat, CompressedFormat, EncodingMethod, EncryptionMethod,
    };
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_data_range_over_os() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("img.raw");
        File::create(&path)
            .unwrap()
            .write_all(b"....windowed....")
            .unwrap();

        let context = ResolverContext::new();
        let spec = PathSpec::DataRange {
            range_offset: 4,
            range_size: 8,
            parent: Box::new(PathSpec::Os {
                location: path.to_string_lossy().to_string(),
            }),
        };
        let mut stream = context.open_file_object(&spec).unwrap();
        assert_eq!(stream.size().unwrap(), 8);
        let data = crate::stream::read_to_end(stream.as_mut()).unwrap();
        assert_eq!(data, b"windowed");
    }

    #[test]
    fn test_encoded_over_os() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("payload.b64");
        File::create(&path).unwrap().write_all(b"SGVsbG8=").unwrap();

        let context = ResolverContext::new();
        let spec = PathSpec::EncodedStream {
            method: EncodingMethod::Base64,
            parent: Box::new(PathSpec::Os {
                location: path.to_string_lossy().to_string(),
            }),
        };
        let mut stream = context.open_file_object(&spec).unwrap();
        assert_eq!(stream.size().unwrap(), 5);
        let data = crate::stream::read_to_end(stream.as_mut()).unwrap();
        assert_eq!(data, b"Hello");
    }

    #[test]
    fn test_encrypted_stream_locked_without_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cipher.bin");
        File::create(&path).unwrap().write_all(&[0u8; 32]).unwrap();

        let context = ResolverContext::new();
        let spec = PathSpec::EncryptedStream {
            method: EncryptionMethod::Rc4,
            cipher_mode: None,
            initialization_vector: None,
            key: None,
            parent: Box::new(PathSpec::Os {
                location: path.to_string_lossy().to_string(),
            }),
        };
        assert!(matches!(
            context.open_file_object(&spec),
            Err(VfsError::EncryptedVolumeLocked(_))
        ));

        // A key-chain entry for the exact comparable unlocks it.
        context.key_chain().set_credential(&spec, "key", "Key");
        assert!(context.open_file_object(&spec).is_ok());
    }

    #[test]
    fn test_credential_prompt_callback() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cipher.bin");
        // RC4("Key", "Plaintext")
        File::create(&path)
            .unwrap()
            .write_all(&[0xBB, 0xF3, 0x16, 0xE8, 0xD9, 0x40, 0xAF, 0x0A, 0xD3])
            .unwrap();

        let context = ResolverContext::new().with_prompt(Box::new(|_spec, names| {
            assert_eq!(names, ["key"]);
            Some(("key".to_string(), CredentialValue::Text("Key".to_string())))
        }));
        let spec = PathSpec::EncryptedStream {
            method: EncryptionMethod::Rc4,
            cipher_mode: None,
            initialization_vector: None,
            key: None,
            parent: Box::new(PathSpec::Os {
                location: path.to_string_lossy().to_string(),
            }),
        };

        let mut stream = context.open_file_object(&spec).unwrap();
        let data = crate::stream::read_to_end(stream.as_mut()).unwrap();
        assert_eq!(data, b"Plaintext");

        // Prompted credentials are remembered in the key chain.
        assert!(context.key_chain().credential(&spec, "key").is_some());
    }

    #[test]
    fn test_tar_file_system_entry() {
        let dir = TempDir::new().unwrap();
        let archive = crate::vfs::tar::tests::tar_fixture(&[("syslog", b"log body", b'0')]);
        let path = dir.path().join("logs.tar");
        File::create(&path).unwrap().write_all(&archive).unwrap();

        let context = ResolverContext::new();
        let spec = PathSpec::Archive {
            format: ArchiveFormat::Tar,
            location: "/syslog".to_string(),
            parent: Box::new(PathSpec::Os {
                location: path.to_string_lossy().to_string(),
            }),
        };
        let entry = context.open_file_entry(&spec).unwrap();
        assert_eq!(entry.name(), "syslog");

        // The file-object path goes through the entry's default stream.
        let mut stream = context.open_file_object(&spec).unwrap();
        let data = crate::stream::read_to_end(stream.as_mut()).unwrap();
        assert_eq!(data, b"log body");
    }

    #[test]
    fn test_resolver_cache_identity() {
        let dir = TempDir::new().unwrap();
        let archive = crate::vfs::tar::tests::tar_fixture(&[("a", b"x", b'0')]);
        let path = dir.path().join("c.tar");
        File::create(&path).unwrap().write_all(&archive).unwrap();

        let context = ResolverContext::new();
        let spec = PathSpec::Archive {
            format: ArchiveFormat::Tar,
            location: "/a".to_string(),
            parent: Box::new(PathSpec::Os {
                location: path.to_string_lossy().to_string(),
            }),
        };
        let first = context.open_file_system(&spec).unwrap();
        let second = context.open_file_system(&spec).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        // After the last reference drops, a new open builds a new instance.
        let raw = Arc::as_ptr(&first) as *const ();
        drop(first);
        drop(second);
        let third = context.open_file_system(&spec).unwrap();
        let _ = raw; // previous instance is gone; the new open succeeded
        assert_eq!(third.type_indicator(), TypeIndicator::Tar);
    }

    #[test]
    fn test_gzip_format_over_os() {
        use flate2::write::GzEncoder;
        use flate2::Compression;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("body.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder.write_all(b"compressed body").unwrap();
        encoder.finish().unwrap();

        let context = ResolverContext::new();
        let spec = PathSpec::CompressedFormat {
            format: CompressedFormat::Gzip,
            parent: Box::new(PathSpec::Os {
                location: path.to_string_lossy().to_string(),
            }),
        };
        let mut stream = context.open_file_object(&spec).unwrap();
        let data = crate::stream::read_to_end(stream.as_mut()).unwrap();
        assert_eq!(data, b"compressed body");
    }
}
