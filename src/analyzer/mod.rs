//! Format analyzer
//!
//! Identifies what a stream contains by evaluating the signatures of every
//! registered analyzer helper against a bounded prefix (and, for
//! end-anchored signatures, a bounded suffix) of the stream. All matching
//! candidates are returned, ordered by category priority and then by first
//! match offset, so ambiguity is visible to the caller rather than decided
//! here.

pub mod helpers;
pub mod specification;

use std::io::SeekFrom;

use tracing::{debug, trace};

use crate::error::VfsResult;
use crate::path_spec::TypeIndicator;
use crate::registry::BackendRegistry;
use crate::stream::FileObject;
use specification::{ByteSignature, SignatureOffset};

/// Result of matching one helper's specification.
struct Candidate {
    type_indicator: TypeIndicator,
    category_priority: u8,
    first_match_offset: u64,
}

/// Scans `stream` against every registered format specification.
pub fn analyze(
    stream: &mut dyn FileObject,
    registry: &BackendRegistry,
) -> VfsResult<Vec<TypeIndicator>> {
    let helpers = registry.analyzer_helpers();
    if helpers.is_empty() {
        return Ok(Vec::new());
    }

    // One prefix read covers every start-anchored and windowed signature.
    let mut window = 0usize;
    for helper in &helpers {
        let spec = helper.format_specification();
        window = window.max(spec.category.default_scan_window());
        for signature in &spec.signatures {
            if let SignatureOffset::Start(offset) = signature.offset {
                window = window.max(offset as usize + signature.pattern.len());
            }
        }
    }

    let size = stream.size()?;
    let head_len = window.min(size as usize);
    let mut head = vec![0u8; head_len];
    stream.seek(SeekFrom::Start(0))?;
    let mut filled = 0;
    while filled < head.len() {
        let count = stream.read(&mut head[filled..])?;
        if count == 0 {
            break;
        }
        filled += count;
    }
    head.truncate(filled);

    let mut candidates: Vec<Candidate> = Vec::new();
    for helper in &helpers {
        let spec = helper.format_specification();
        let scan_window = spec.category.default_scan_window().min(head.len());

        let mut first_match: Option<u64> = None;
        for signature in &spec.signatures {
            if let Some(offset) = match_signature(signature, &head, scan_window, size, stream)? {
                first_match = Some(first_match.map_or(offset, |f| f.min(offset)));
            }
        }
        let Some(first_match_offset) = first_match else {
            continue;
        };

        if !helper.structural_check(stream)? {
            trace!(
                indicator = %spec.type_indicator,
                "signature matched but structural check failed"
            );
            continue;
        }
        candidates.push(Candidate {
            type_indicator: spec.type_indicator,
            category_priority: spec.category.priority(),
            first_match_offset,
        });
    }

    candidates.sort_by(|a, b| {
        a.category_priority
            .cmp(&b.category_priority)
            .then(a.first_match_offset.cmp(&b.first_match_offset))
            .then(a.type_indicator.as_str().cmp(b.type_indicator.as_str()))
    });
    let result: Vec<TypeIndicator> = candidates.iter().map(|c| c.type_indicator).collect();
    debug!(?result, "analyzer result");
    Ok(result)
}

/// Returns the stream offset of a signature match, or None.
fn match_signature(
    signature: &ByteSignature,
    head: &[u8],
    scan_window: usize,
    size: u64,
    stream: &mut dyn FileObject,
) -> VfsResult<Option<u64>> {
    let pattern = &signature.pattern;
    if pattern.is_empty() {
        return Ok(None);
    }
    match signature.offset {
        SignatureOffset::Start(offset) => {
            let start = offset as usize;
            let end = start + pattern.len();
            Ok((end <= head.len() && &head[start..end] == pattern.as_slice())
                .then_some(offset))
        }
        SignatureOffset::End(offset) => {
            if size < offset {
                return Ok(None);
            }
            let position = size - offset;
            let mut tail = vec![0u8; pattern.len()];
            stream.seek(SeekFrom::Start(position))?;
            let mut filled = 0;
            while filled < tail.len() {
                let count = stream.read(&mut tail[filled..])?;
                if count == 0 {
                    return Ok(None);
                }
                filled += count;
            }
            Ok((tail == *pattern).then_some(position))
        }
        SignatureOffset::Anywhere => {
            let limit = scan_window.min(head.len());
            if limit < pattern.len() {
                return Ok(None);
            }
            Ok((0..=limit - pattern.len())
                .find(|&i| &head[i..i + pattern.len()] == pattern.as_slice())
                .map(|i| i as u64))
        }
    }
}
