// Segment discovery for multi-part storage media images
//
// Handles the two split-image naming families:
// - Numbered segments: .001, .002, .003, etc.
// - EWF segments: .E01, .E02, ..., .E99, then .EAA onward

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::error::{VfsError, VfsResult};

/// Discover numbered segments (.001, .002, etc.) starting from any segment
///
/// Returns (paths, sizes) sorted by segment number. A path without a numeric
/// extension is returned as a single segment.
pub fn discover_numbered_segments(path: &str) -> VfsResult<(Vec<PathBuf>, Vec<u64>)> {
    debug!(path, "Discovering numbered segments");
    let path_obj = Path::new(path);
    let parent = path_obj.parent().unwrap_or(Path::new("."));
    let filename = path_obj
        .file_name()
        .ok_or_else(|| VfsError::PathSpec(format!("invalid segment path: {}", path)))?
        .to_string_lossy();

    if let Some(base) = numbered_segment_base(&filename) {
        trace!(base, "Detected numbered segment format");
        return collect_numbered(parent, base);
    }

    // Single file or other format - just use the one file
    let size = fs::metadata(path)?.len();
    debug!(path, size, "Single file (non-segmented)");
    Ok((vec![path_obj.to_path_buf()], vec![size]))
}

/// Base name for a `.NNN` numbered segment, None otherwise.
fn numbered_segment_base(filename: &str) -> Option<&str> {
    let (base, ext) = filename.rsplit_once('.')?;
    (ext.len() == 3 && ext.chars().all(|c| c.is_ascii_digit())).then_some(base)
}

fn collect_numbered(dir: &Path, base: &str) -> VfsResult<(Vec<PathBuf>, Vec<u64>)> {
    let mut segments = Vec::new();
    let mut sizes = Vec::new();

    for num in 1..=999 {
        let segment_path = dir.join(format!("{}.{:03}", base, num));
        if !segment_path.exists() {
            break;
        }
        let size = fs::metadata(&segment_path)?.len();
        segments.push(segment_path);
        sizes.push(size);
    }

    if segments.is_empty() {
        return Err(VfsError::NotFound(format!(
            "no segments found for base {}",
            base
        )));
    }
    debug!(segment_count = segments.len(), "Found numbered segments");
    Ok((segments, sizes))
}

/// Discover EWF segment files (.E01, .E02, ..., then .EAA onward)
///
/// Returns paths sorted in segment order starting from any segment of the
/// set. Extension case follows the first segment.
pub fn discover_ewf_segments(path: &str) -> VfsResult<Vec<PathBuf>> {
    let path_obj = Path::new(path);
    let dir = path_obj.parent().unwrap_or(Path::new("."));
    let filename = path_obj
        .file_name()
        .ok_or_else(|| VfsError::PathSpec(format!("invalid segment path: {}", path)))?
        .to_string_lossy();

    let (base, ext) = filename.rsplit_once('.').ok_or_else(|| {
        VfsError::PathSpec(format!("EWF path has no extension: {}", path))
    })?;
    let uppercase = ext.starts_with('E');
    if !ext.eq_ignore_ascii_case("e01") {
        // Opening a non-first segment directly is not supported.
        return Err(VfsError::PathSpec(format!(
            "not a first EWF segment: {}",
            filename
        )));
    }

    let mut segments = Vec::new();
    for index in 1u32.. {
        let ext = ewf_extension(index, uppercase).ok_or_else(|| {
            VfsError::CorruptVolume("EWF segment count exceeds naming space".to_string())
        })?;
        let segment_path = dir.join(format!("{}.{}", base, ext));
        if !segment_path.exists() {
            break;
        }
        segments.push(segment_path);
    }

    if segments.is_empty() {
        return Err(VfsError::NotFound(format!("no EWF segments for {}", path)));
    }
    debug!(segment_count = segments.len(), "Found EWF segments");
    Ok(segments)
}

/// Extension for the 1-based EWF segment `index`: E01..E99, then EAA..EZZ
/// and beyond through the letter space.
fn ewf_extension(index: u32, uppercase: bool) -> Option<String> {
    let ext = if index <= 99 {
        format!("E{:02}", index)
    } else {
        // 100 -> EAA, continuing through FAA etc. when AA..ZZ wraps.
        let offset = index - 100;
        let first = offset / (26 * 26);
        let second = (offset / 26) % 26;
        let third = offset % 26;
        if first > 24 {
            return None;
        }
        format!(
            "{}{}{}",
            (b'E' + first as u8) as char,
            (b'A' + second as u8) as char,
            (b'A' + third as u8) as char
        )
    };
    Some(if uppercase {
        ext
    } else {
        ext.to_lowercase()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_numbered_segment_base() {
        assert_eq!(numbered_segment_base("disk.001"), Some("disk"));
        assert_eq!(numbered_segment_base("disk.010"), Some("disk"));
        assert_eq!(numbered_segment_base("disk.raw"), None);
        assert_eq!(numbered_segment_base("disk"), None);
    }

    #[test]
    fn test_discover_numbered() {
        let dir = TempDir::new().unwrap();
        for i in 1..=3 {
            let mut f = File::create(dir.path().join(format!("img.{:03}", i))).unwrap();
            f.write_all(&vec![i as u8; 10 * i]).unwrap();
        }

        let first = dir.path().join("img.001");
        let (paths, sizes) = discover_numbered_segments(first.to_str().unwrap()).unwrap();
        assert_eq!(paths.len(), 3);
        assert_eq!(sizes, vec![10, 20, 30]);
    }

    #[test]
    fn test_single_file_fallback() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("image.raw");
        File::create(&path).unwrap().write_all(&[0u8; 42]).unwrap();

        let (paths, sizes) = discover_numbered_segments(path.to_str().unwrap()).unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(sizes, vec![42]);
    }

    #[test]
    fn test_ewf_extension_series() {
        assert_eq!(ewf_extension(1, true).unwrap(), "E01");
        assert_eq!(ewf_extension(99, true).unwrap(), "E99");
        assert_eq!(ewf_extension(100, true).unwrap(), "EAA");
        assert_eq!(ewf_extension(101, true).unwrap(), "EAB");
        assert_eq!(ewf_extension(126, true).unwrap(), "EBA");
        assert_eq!(ewf_extension(2, false).unwrap(), "e02");
    }

    #[test]
    fn test_discover_ewf() {
        let dir = TempDir::new().unwrap();
        for ext in ["E01", "E02", "E03"] {
            File::create(dir.path().join(format!("case.{}", ext)))
                .unwrap()
                .write_all(b"x")
                .unwrap();
        }
        let first = dir.path().join("case.E01");
        let segments = discover_ewf_segments(first.to_str().unwrap()).unwrap();
        assert_eq!(segments.len(), 3);
        assert!(segments[2].to_string_lossy().ends_with("case.E03"));
    }
}
