//! Native analyzer helpers: the signature catalog
//!
//! Signatures cover both the formats the crate opens natively and the
//! external-decoder formats, so scanners can report what a stream contains
//! even when opening it needs a registered back-end. Offsets and patterns
//! follow the on-disk structures of each format.

use std::sync::Arc;

use crate::error::VfsResult;
use crate::path_spec::TypeIndicator;
use crate::registry::{AnalyzerHelper, BackendRegistry};
use crate::stream::FileObject;
use crate::vfs::tar::header_block_checksum_valid;

use super::specification::{ByteSignature, FormatCategory, FormatSpecification, SignatureOffset};

/// Helper defined entirely by its signature list.
struct SignatureHelper {
    indicator: TypeIndicator,
    category: FormatCategory,
    signatures: Vec<ByteSignature>,
}

impl AnalyzerHelper for SignatureHelper {
    fn type_indicator(&self) -> TypeIndicator {
        self.indicator
    }

    fn format_specification(&self) -> FormatSpecification {
        FormatSpecification::new(self.indicator, self.category, self.signatures.clone())
    }
}

fn signature_helper(
    indicator: TypeIndicator,
    category: FormatCategory,
    signatures: Vec<ByteSignature>,
) -> Arc<dyn AnalyzerHelper> {
    Arc::new(SignatureHelper {
        indicator,
        category,
        signatures,
    })
}

/// MBR: the boot signature alone is too weak (FAT and NTFS volumes carry it
/// too), so the partition entry status bytes are checked as well.
struct MbrAnalyzerHelper;

impl AnalyzerHelper for MbrAnalyzerHelper {
    fn type_indicator(&self) -> TypeIndicator {
        TypeIndicator::Mbr
    }

    fn format_specification(&self) -> FormatSpecification {
        FormatSpecification::new(
            TypeIndicator::Mbr,
            FormatCategory::VolumeSystem,
            vec![ByteSignature::at_start(510, &[0x55, 0xaa])],
        )
    }

    fn structural_check(&self, stream: &mut dyn FileObject) -> VfsResult<bool> {
        let mut sector = [0u8; 512];
        if crate::stream::read_exact_at(stream, 0, &mut sector).is_err() {
            return Ok(false);
        }
        let mut used_entries = 0;
        for entry in sector[446..510].chunks(16) {
            match entry[0] {
                // Inactive or bootable are the only defined status values.
                0x00 | 0x80 => {
                    if entry[4] != 0 {
                        used_entries += 1;
                    }
                }
                _ => return Ok(false),
            }
        }
        Ok(used_entries > 0)
    }
}

/// LZMA-alone has no magic; the properties byte and dictionary size field
/// are checked for plausibility instead.
struct LzmaAnalyzerHelper;

impl AnalyzerHelper for LzmaAnalyzerHelper {
    fn type_indicator(&self) -> TypeIndicator {
        TypeIndicator::Lzma
    }

    fn format_specification(&self) -> FormatSpecification {
        FormatSpecification::new(
            TypeIndicator::Lzma,
            FormatCategory::Compressed,
            vec![ByteSignature {
                offset: SignatureOffset::Start(0),
                pattern: vec![0x5d],
            }],
        )
    }

    fn structural_check(&self, stream: &mut dyn FileObject) -> VfsResult<bool> {
        let mut header = [0u8; 13];
        if crate::stream::read_exact_at(stream, 0, &mut header).is_err() {
            return Ok(false);
        }
        // properties = (pb * 5 + lp) * 9 + lc, all within their ranges
        if header[0] >= 225 {
            return Ok(false);
        }
        let dictionary_size = u32::from_le_bytes([header[1], header[2], header[3], header[4]]);
        Ok(dictionary_size >= 1 << 12 && dictionary_size <= 1 << 30)
    }
}

/// tar has only the weak `ustar` eyecatcher; verifying the first header
/// block's checksum rules out streams that merely contain the string.
struct TarAnalyzerHelper;

impl AnalyzerHelper for TarAnalyzerHelper {
    fn type_indicator(&self) -> TypeIndicator {
        TypeIndicator::Tar
    }

    fn format_specification(&self) -> FormatSpecification {
        FormatSpecification::new(
            TypeIndicator::Tar,
            FormatCategory::Archive,
            vec![ByteSignature::at_start(257, b"ustar")],
        )
    }

    fn structural_check(&self, stream: &mut dyn FileObject) -> VfsResult<bool> {
        let mut block = [0u8; 512];
        if crate::stream::read_exact_at(stream, 0, &mut block).is_err() {
            return Ok(false);
        }
        Ok(header_block_checksum_valid(&block))
    }
}

/// Registers the full signature catalog.
pub fn register_native_helpers(registry: &BackendRegistry) {
    use FormatCategory::*;
    use TypeIndicator::*;

    // Storage media images
    registry.register_analyzer_helper(signature_helper(
        Ewf,
        StorageMedia,
        vec![
            ByteSignature::at_start(0, &[0x45, 0x56, 0x46, 0x09, 0x0d, 0x0a, 0xff, 0x00]),
            // EWF2 (Ex01) family
            ByteSignature::at_start(0, b"EVF2\x0d\x0a\x81\x00"),
        ],
    ));
    registry.register_analyzer_helper(signature_helper(
        Qcow,
        StorageMedia,
        vec![ByteSignature::at_start(0, b"QFI\xfb")],
    ));
    registry.register_analyzer_helper(signature_helper(
        Vhdi,
        StorageMedia,
        vec![
            ByteSignature::at_start(0, b"conectix"),
            ByteSignature::from_end(512, b"conectix"),
            ByteSignature::at_start(0, b"vhdxfile"),
        ],
    ));
    registry.register_analyzer_helper(signature_helper(
        Vmdk,
        StorageMedia,
        vec![
            ByteSignature::at_start(0, b"KDMV"),
            ByteSignature::at_start(0, b"# Disk DescriptorFile"),
        ],
    ));
    registry.register_analyzer_helper(signature_helper(
        Modi,
        StorageMedia,
        vec![ByteSignature::from_end(512, b"koly")],
    ));
    registry.register_analyzer_helper(signature_helper(
        Phdi,
        StorageMedia,
        vec![ByteSignature::at_start(0, b"WithoutFreeSpace")],
    ));

    // Volume systems
    registry.register_analyzer_helper(Arc::new(MbrAnalyzerHelper));
    registry.register_analyzer_helper(signature_helper(
        Gpt,
        VolumeSystem,
        vec![ByteSignature::at_start(512, b"EFI PART")],
    ));
    registry.register_analyzer_helper(signature_helper(
        Apm,
        VolumeSystem,
        vec![ByteSignature::at_start(512, &[0x50, 0x4d, 0x00, 0x00])],
    ));
    registry.register_analyzer_helper(signature_helper(
        Lvm,
        VolumeSystem,
        vec![ByteSignature::at_start(512, b"LABELONE")],
    ));
    registry.register_analyzer_helper(signature_helper(
        Vshadow,
        VolumeSystem,
        vec![ByteSignature::at_start(
            7680,
            &[
                0x6b, 0x87, 0x08, 0x38, 0x76, 0xc1, 0x48, 0x4e, 0xb7, 0xae, 0x04, 0x04, 0x6e,
                0x6c, 0xc7, 0x52,
            ],
        )],
    ));
    registry.register_analyzer_helper(signature_helper(
        Bde,
        VolumeSystem,
        vec![
            ByteSignature::at_start(3, b"-FVE-FS-"),
            // BitLocker To Go carries an exFAT-like header
            ByteSignature::at_start(3, b"MSWIN4.1"),
        ],
    ));
    registry.register_analyzer_helper(signature_helper(
        Fvde,
        VolumeSystem,
        vec![ByteSignature::at_start(88, &[0x43, 0x53])],
    ));
    registry.register_analyzer_helper(signature_helper(
        Luksde,
        VolumeSystem,
        vec![ByteSignature::at_start(0, b"LUKS\xba\xbe")],
    ));
    registry.register_analyzer_helper(signature_helper(
        ApfsContainer,
        VolumeSystem,
        vec![ByteSignature::at_start(32, b"NXSB")],
    ));

    // File systems
    registry.register_analyzer_helper(signature_helper(
        Apfs,
        FileSystem,
        vec![ByteSignature::at_start(32, b"APSB")],
    ));
    registry.register_analyzer_helper(signature_helper(
        Ntfs,
        FileSystem,
        vec![ByteSignature::at_start(3, b"NTFS    ")],
    ));
    registry.register_analyzer_helper(signature_helper(
        Ext,
        FileSystem,
        vec![ByteSignature::at_start(0x438, &[0x53, 0xef])],
    ));
    registry.register_analyzer_helper(signature_helper(
        Hfs,
        FileSystem,
        vec![
            ByteSignature::at_start(1024, b"H+\x00\x04"),
            ByteSignature::at_start(1024, b"HX\x00\x05"),
        ],
    ));
    registry.register_analyzer_helper(signature_helper(
        Xfs,
        FileSystem,
        vec![ByteSignature::at_start(0, b"XFSB")],
    ));
    registry.register_analyzer_helper(signature_helper(
        Fat,
        FileSystem,
        vec![
            ByteSignature::at_start(54, b"FAT12   "),
            ByteSignature::at_start(54, b"FAT16   "),
            ByteSignature::at_start(82, b"FAT32   "),
            ByteSignature::at_start(3, b"EXFAT   "),
        ],
    ));

    // Archives
    registry.register_analyzer_helper(Arc::new(TarAnalyzerHelper));
    registry.register_analyzer_helper(signature_helper(
        Zip,
        Archive,
        vec![ByteSignature::at_start(0, b"PK\x03\x04")],
    ));
    registry.register_analyzer_helper(signature_helper(
        Cpio,
        Archive,
        vec![
            ByteSignature::at_start(0, b"070701"),
            ByteSignature::at_start(0, b"070702"),
            ByteSignature::at_start(0, b"070707"),
            ByteSignature::at_start(0, &[0xc7, 0x71]),
        ],
    ));

    // Compressed streams
    registry.register_analyzer_helper(signature_helper(
        Gzip,
        Compressed,
        vec![ByteSignature::at_start(0, &[0x1f, 0x8b, 0x08])],
    ));
    registry.register_analyzer_helper(signature_helper(
        Bzip2,
        Compressed,
        vec![ByteSignature::at_start(0, b"BZh")],
    ));
    registry.register_analyzer_helper(signature_helper(
        Xz,
        Compressed,
        vec![ByteSignature::at_start(0, b"\xfd7zXZ\x00")],
    ));
    registry.register_analyzer_helper(Arc::new(LzmaAnalyzerHelper));
}
