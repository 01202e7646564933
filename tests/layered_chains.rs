//! End-to-end chains over real temp-file fixtures: build a chain with the
//! factory, hand it to a resolver context, and check the bytes that come
//! out the far end.

use std::fs::File;
use std::io::{SeekFrom, Write};

use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::TempDir;

use stratafs::path_spec::{factory, PathSpec, TypeIndicator};
use stratafs::resolver::ResolverContext;
use stratafs::scanner::{ScanContext, ScanStatus, SourceScanner};
use stratafs::VfsError;

fn os_spec(path: &std::path::Path) -> PathSpec {
    factory::new(
        TypeIndicator::Os,
        &[("location", &path.to_string_lossy())],
        None,
    )
    .unwrap()
}

/// Minimal single-member ustar fixture.
fn tar_bytes(name: &str, data: &[u8]) -> Vec<u8> {
    let mut header = vec![0u8; 512];
    header[..name.len()].copy_from_slice(name.as_bytes());
    header[100..107].copy_from_slice(b"0000644");
    header[108..115].copy_from_slice(b"0001000");
    header[116..123].copy_from_slice(b"0001000");
    header[124..135].copy_from_slice(format!("{:011o}", data.len()).as_bytes());
    header[136..147].copy_from_slice(b"14000000000");
    header[156] = b'0';
    header[257..262].copy_from_slice(b"ustar");
    header[263..265].copy_from_slice(b"00");
    let checksum: u64 = header
        .iter()
        .enumerate()
        .map(|(i, &b)| if (148..156).contains(&i) { 0x20u64 } else { b as u64 })
        .sum();
    header[148..156].copy_from_slice(format!("{:06o}\0 ", checksum).as_bytes());

    let mut out = header;
    out.extend_from_slice(data);
    let padding = (512 - data.len() % 512) % 512;
    out.extend(std::iter::repeat(0u8).take(padding));
    out.extend(std::iter::repeat(0u8).take(1024));
    out
}

fn read_all(stream: &mut dyn stratafs::FileObject) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let count = stream.read(&mut buf).unwrap();
        if count == 0 {
            break;
        }
        out.extend_from_slice(&buf[..count]);
    }
    out
}

#[test]
fn data_range_over_os() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("img.raw");
    let mut content = vec![0u8; 40000];
    content[32256..32260].copy_from_slice(b"BOOT");
    File::create(&path).unwrap().write_all(&content).unwrap();

    // The declared range size is authoritative even past the parent's end.
    let spec = factory::new(
        TypeIndicator::DataRange,
        &[("range_offset", "32256"), ("range_size", "8577654784")],
        Some(os_spec(&path)),
    )
    .unwrap();

    let context = ResolverContext::new();
    let mut stream = context.open_file_object(&spec).unwrap();
    assert_eq!(stream.size().unwrap(), 8_577_654_784);

    let mut head = [0u8; 4];
    assert_eq!(stream.read(&mut head).unwrap(), 4);
    assert_eq!(&head, b"BOOT");
}

#[test]
fn gzip_of_tar_member() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("logs.tgz");
    let syslog = b"Jan  1 00:00:00 host kernel: layered evidence\n".repeat(40);
    let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
    encoder.write_all(&tar_bytes("syslog", &syslog)).unwrap();
    encoder.finish().unwrap();

    let gzip = factory::new(TypeIndicator::Gzip, &[], Some(os_spec(&path))).unwrap();
    let member = factory::new(TypeIndicator::Tar, &[("location", "syslog")], Some(gzip)).unwrap();

    let context = ResolverContext::new();
    let entry = context.open_file_entry(&member).unwrap();
    assert_eq!(entry.name(), "syslog");
    assert_eq!(entry.stat().unwrap().size, Some(syslog.len() as u64));

    let mut stream = entry.file_object(None).unwrap();
    assert_eq!(read_all(stream.as_mut()), syslog);
}

#[test]
fn base64_encoded_stream() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("payload.b64");
    File::create(&path).unwrap().write_all(b"SGVsbG8=").unwrap();

    let spec = factory::new(
        TypeIndicator::EncodedStream,
        &[("encoding_method", "base64")],
        Some(os_spec(&path)),
    )
    .unwrap();

    let context = ResolverContext::new();
    let mut stream = context.open_file_object(&spec).unwrap();
    assert_eq!(stream.size().unwrap(), 5);
    let mut buf = [0u8; 5];
    assert_eq!(stream.read(&mut buf).unwrap(), 5);
    assert_eq!(&buf, b"Hello");
}

#[test]
fn locked_stream_unlocks_through_key_chain() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cipher.bin");
    // RC4("Key", "Plaintext")
    File::create(&path)
        .unwrap()
        .write_all(&[0xBB, 0xF3, 0x16, 0xE8, 0xD9, 0x40, 0xAF, 0x0A, 0xD3])
        .unwrap();

    let spec = factory::new(
        TypeIndicator::EncryptedStream,
        &[("encryption_method", "rc4")],
        Some(os_spec(&path)),
    )
    .unwrap();

    let context = ResolverContext::new();
    assert!(matches!(
        context.open_file_object(&spec),
        Err(VfsError::EncryptedVolumeLocked(_))
    ));

    context.key_chain().set_credential(&spec, "key", "Key");
    let mut stream = context.open_file_object(&spec).unwrap();
    assert_eq!(read_all(stream.as_mut()), b"Plaintext");
}

#[test]
fn comparable_round_trip_deep_chain() {
    let os = factory::new(TypeIndicator::Os, &[("location", "/image.qcow2")], None).unwrap();
    let qcow = factory::new(TypeIndicator::Qcow, &[], Some(os)).unwrap();
    let partition = factory::new(
        TypeIndicator::TskPartition,
        &[("location", "/p1")],
        Some(qcow),
    )
    .unwrap();
    let file = factory::new(
        TypeIndicator::Tsk,
        &[("location", "/Users/MyUser/MyFile.txt"), ("inode", "128")],
        Some(partition),
    )
    .unwrap();

    let comparable = file.comparable();
    assert_eq!(
        comparable,
        "type=OS, location=/image.qcow2\n\
         type=QCOW\n\
         type=TSK_PARTITION, location=/p1\n\
         type=TSK, inode=128, location=/Users/MyUser/MyFile.txt\n"
    );
    let parsed = factory::from_comparable(&comparable).unwrap();
    assert_eq!(parsed, file);
    assert_eq!(parsed.chain_depth(), 4);
}

#[test]
fn stream_denotes_pure_function_of_offset() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("data.gz");
    let body: Vec<u8> = (0..50_000u32).map(|i| (i % 241) as u8).collect();
    let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
    encoder.write_all(&body).unwrap();
    encoder.finish().unwrap();

    let spec = factory::new(TypeIndicator::Gzip, &[], Some(os_spec(&path))).unwrap();
    let context = ResolverContext::new();
    let mut stream = context.open_file_object(&spec).unwrap();
    let size = stream.size().unwrap();
    assert_eq!(size, body.len() as u64);

    // seek(0); read(N) equals read(k) ++ seek-back reads of [k, N).
    stream.seek(SeekFrom::Start(0)).unwrap();
    let whole = read_all(stream.as_mut());

    stream.seek(SeekFrom::Start(30_000)).unwrap();
    let tail = read_all(stream.as_mut());
    stream.seek(SeekFrom::Start(0)).unwrap();
    let mut head = vec![0u8; 30_000];
    stream.read(&mut head).unwrap();

    let mut reassembled = head;
    reassembled.extend_from_slice(&tail);
    assert_eq!(reassembled, whole);
    assert_eq!(whole, body);

    // Reading at the size offset returns nothing; seeking past it is legal.
    stream.seek(SeekFrom::Start(size)).unwrap();
    let mut buf = [0u8; 16];
    assert_eq!(stream.read(&mut buf).unwrap(), 0);
    stream.seek(SeekFrom::Start(size + 4096)).unwrap();
    assert_eq!(stream.read(&mut buf).unwrap(), 0);
    assert_eq!(stream.size().unwrap(), size);
}

#[test]
fn resolver_cache_returns_same_file_system() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("files.tar");
    File::create(&path)
        .unwrap()
        .write_all(&tar_bytes("a.txt", b"contents"))
        .unwrap();

    let spec = factory::new(
        TypeIndicator::Tar,
        &[("location", "/a.txt")],
        Some(os_spec(&path)),
    )
    .unwrap();

    let context = ResolverContext::new();
    let first = context.open_file_system(&spec).unwrap();
    let second = context.open_file_system(&spec).unwrap();
    assert!(std::sync::Arc::ptr_eq(&first, &second));
}

#[test]
fn scanner_discovers_layered_chain() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("logs.tgz");
    let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
    encoder
        .write_all(&tar_bytes("syslog", b"scan me"))
        .unwrap();
    encoder.finish().unwrap();

    let context = ResolverContext::new();
    let scanner = SourceScanner::new(context.clone());
    let mut scan_context = ScanContext::new();
    scanner.scan(&mut scan_context, os_spec(&path)).unwrap();

    assert_eq!(scan_context.status(), ScanStatus::FullyScanned);

    // Exactly one file-system layer is known to be in this source.
    let leaves = scan_context.file_system_nodes();
    assert_eq!(leaves.len(), 1);
    let leaf_spec = &scan_context.node(leaves[0]).path_spec;
    assert_eq!(leaf_spec.type_indicator(), TypeIndicator::Tar);

    // The discovered chain is directly openable.
    let fs = context.open_file_system(leaf_spec).unwrap();
    let root = fs.root_entry().unwrap();
    let names: Vec<String> = root
        .sub_entries()
        .unwrap()
        .map(|e| e.unwrap().name())
        .collect();
    assert_eq!(names, vec!["syslog"]);
}

#[test]
fn transform_composability() {
    // base64(gzip(text)): decoding then decompressing reproduces the text.
    let text = b"composable transform layers".to_vec();
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&text).unwrap();
    let gzipped = encoder.finish().unwrap();
    let encoded = data_encoding::BASE64.encode(&gzipped);

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("wrapped.b64");
    File::create(&path)
        .unwrap()
        .write_all(encoded.as_bytes())
        .unwrap();

    let decoded = factory::new(
        TypeIndicator::EncodedStream,
        &[("encoding_method", "base64")],
        Some(os_spec(&path)),
    )
    .unwrap();
    let decompressed = factory::new(TypeIndicator::Gzip, &[], Some(decoded)).unwrap();

    let context = ResolverContext::new();
    let mut stream = context.open_file_object(&decompressed).unwrap();
    assert_eq!(read_all(stream.as_mut()), text);
}

#[test]
fn mount_table_indirection() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("evidence.bin");
    File::create(&path).unwrap().write_all(b"mounted bytes").unwrap();

    let context = ResolverContext::new();
    context
        .mount_table()
        .register("source1", os_spec(&path))
        .unwrap();

    let spec = factory::new(TypeIndicator::Mount, &[("identifier", "source1")], None).unwrap();
    let mut stream = context.open_file_object(&spec).unwrap();
    assert_eq!(read_all(stream.as_mut()), b"mounted bytes");

    context.mount_table().deregister("source1").unwrap();
    assert!(context.open_file_object(&spec).is_err());
}
