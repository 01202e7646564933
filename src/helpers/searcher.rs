//! File system searcher
//!
//! Walks a file system emitting the chains of entries that match the given
//! find specifications. A find spec constrains any combination of: the
//! location (one pattern per path segment, literal or regex), the traversal
//! depth, the entry type, a required named data stream, and case
//! sensitivity. The result sequence is a pull-based iterator; directory
//! handles are released as their subtrees finish.

use std::sync::Arc;

use regex::Regex;

use crate::error::{VfsError, VfsResult};
use crate::path_spec::PathSpec;
use crate::vfs::{EntryType, FileEntry, FileSystem};

enum SegmentMatcher {
    Literal(String),
    Pattern(Regex),
}

/// One search constraint set.
pub struct FindSpec {
    /// One matcher per path segment; None matches entries at any location.
    segments: Option<Vec<SegmentMatcher>>,
    minimum_depth: Option<usize>,
    maximum_depth: Option<usize>,
    entry_type: Option<EntryType>,
    data_stream_name: Option<String>,
    case_sensitive: bool,
}

impl FindSpec {
    pub fn new() -> Self {
        Self {
            segments: None,
            minimum_depth: None,
            maximum_depth: None,
            entry_type: None,
            data_stream_name: None,
            case_sensitive: true,
        }
    }

    /// Matches the exact location, segment by segment.
    pub fn with_location(mut self, location: &str) -> Self {
        self.segments = Some(
            location
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| SegmentMatcher::Literal(s.to_string()))
                .collect(),
        );
        self
    }

    /// Matches a location where each segment is a regular expression
    /// (anchored to the whole segment).
    pub fn with_location_regex(mut self, location: &str) -> VfsResult<Self> {
        let mut segments = Vec::new();
        for segment in location.split('/').filter(|s| !s.is_empty()) {
            let anchored = if self.case_sensitive {
                format!("^(?:{})$", segment)
            } else {
                format!("(?i)^(?:{})$", segment)
            };
            let pattern = Regex::new(&anchored).map_err(|e| {
                VfsError::PathSpec(format!("bad location regex segment {}: {}", segment, e))
            })?;
            segments.push(SegmentMatcher::Pattern(pattern));
        }
        self.segments = Some(segments);
        Ok(self)
    }

    pub fn with_minimum_depth(mut self, depth: usize) -> Self {
        self.minimum_depth = Some(depth);
        self
    }

    pub fn with_maximum_depth(mut self, depth: usize) -> Self {
        self.maximum_depth = Some(depth);
        self
    }

    pub fn with_entry_type(mut self, entry_type: EntryType) -> Self {
        self.entry_type = Some(entry_type);
        self
    }

    /// Requires the entry to carry a data stream with this name.
    pub fn with_data_stream_name(mut self, name: &str) -> Self {
        self.data_stream_name = Some(name.to_string());
        self
    }

    /// Case-insensitive matching must be requested before location patterns
    /// are set.
    pub fn case_insensitive(mut self) -> Self {
        self.case_sensitive = false;
        self
    }

    /// Whether the segment at `depth` (1-based) can lie on a matching path.
    /// Used for pruning: a subtree whose segment cannot match is skipped.
    fn segment_matches(&self, depth: usize, name: &str) -> bool {
        let Some(segments) = &self.segments else {
            return true;
        };
        let Some(matcher) = segments.get(depth - 1) else {
            return false; // deeper than the location
        };
        match matcher {
            SegmentMatcher::Literal(literal) => {
                if self.case_sensitive {
                    literal == name
                } else {
                    literal.eq_ignore_ascii_case(name)
                }
            }
            SegmentMatcher::Pattern(pattern) => pattern.is_match(name),
        }
    }

    /// Full match test for an entry at `depth`.
    fn matches(&self, entry: &dyn FileEntry, depth: usize) -> VfsResult<bool> {
        if let Some(segments) = &self.segments {
            if depth != segments.len() || !self.segment_matches(depth, &entry.name()) {
                return Ok(false);
            }
        }
        if let Some(minimum) = self.minimum_depth {
            if depth < minimum {
                return Ok(false);
            }
        }
        if let Some(maximum) = self.maximum_depth {
            if depth > maximum {
                return Ok(false);
            }
        }
        if let Some(wanted) = self.entry_type {
            if entry.entry_type() != wanted {
                return Ok(false);
            }
        }
        if let Some(name) = &self.data_stream_name {
            let present = entry
                .data_streams()?
                .iter()
                .any(|stream| &stream.name == name);
            if !present {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Whether any match can exist below `depth` on this path.
    fn can_descend(&self, depth: usize, name: &str) -> bool {
        match &self.segments {
            Some(segments) => depth < segments.len() && self.segment_matches(depth, name),
            None => self
                .maximum_depth
                .map(|maximum| depth < maximum)
                .unwrap_or(true),
        }
    }
}

impl Default for FindSpec {
    fn default() -> Self {
        Self::new()
    }
}

pub struct FileSystemSearcher {
    file_system: Arc<dyn FileSystem>,
}

impl FileSystemSearcher {
    pub fn new(file_system: Arc<dyn FileSystem>) -> Self {
        Self { file_system }
    }

    /// Lazy sequence of chains matching any of the find specs. Each call
    /// starts a fresh traversal.
    pub fn find<'a>(&'a self, find_specs: &'a [FindSpec]) -> VfsResult<FindIterator<'a>> {
        let root = self.file_system.root_entry()?;
        Ok(FindIterator {
            find_specs,
            stack: vec![(root, 0)],
        })
    }
}

/// Depth-first pull iterator over matching entries.
pub struct FindIterator<'a> {
    find_specs: &'a [FindSpec],
    stack: Vec<(Box<dyn FileEntry>, usize)>,
}

impl Iterator for FindIterator<'_> {
    type Item = VfsResult<PathSpec>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((entry, depth)) = self.stack.pop() {
            // Push children first so matches surface in traversal order.
            if entry.is_directory()
                && (depth == 0
                    || self
                        .find_specs
                        .iter()
                        .any(|spec| spec.can_descend(depth, &entry.name())))
            {
                match entry.sub_entries() {
                    Ok(children) => {
                        for child in children {
                            match child {
                                Ok(child) => self.stack.push((child, depth + 1)),
                                Err(error) => return Some(Err(error)),
                            }
                        }
                    }
                    Err(error) => return Some(Err(error)),
                }
            }

            if depth == 0 {
                continue;
            }
            for spec in self.find_specs {
                match spec.matches(entry.as_ref(), depth) {
                    Ok(true) => return Some(Ok(entry.path_spec())),
                    Ok(false) => {}
                    Err(error) => return Some(Err(error)),
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::fake::FakeFileSystemBuilder;

    fn sample_searcher() -> FileSystemSearcher {
        let fs = FakeFileSystemBuilder::new()
            .add_file("/etc/passwd", b"root")
            .add_file("/etc/shadow", b"hash")
            .add_file("/var/log/syslog", b"log")
            .add_file("/var/log/auth.log", b"auth")
            .add_directory("/var/empty")
            .build();
        FileSystemSearcher::new(fs)
    }

    fn locations(results: Vec<VfsResult<PathSpec>>) -> Vec<String> {
        let mut out: Vec<String> = results
            .into_iter()
            .map(|r| r.unwrap().location().unwrap().to_string())
            .collect();
        out.sort();
        out
    }

    #[test]
    fn test_exact_location() {
        let searcher = sample_searcher();
        let specs = [FindSpec::new().with_location("/etc/passwd")];
        let found = locations(searcher.find(&specs).unwrap().collect());
        assert_eq!(found, vec!["/etc/passwd"]);
    }

    #[test]
    fn test_segment_regex() {
        let searcher = sample_searcher();
        let specs = [FindSpec::new()
            .with_location_regex("/var/log/.*\\.log")
            .unwrap()];
        let found = locations(searcher.find(&specs).unwrap().collect());
        assert_eq!(found, vec!["/var/log/auth.log"]);
    }

    #[test]
    fn test_case_insensitive() {
        let searcher = sample_searcher();
        let specs = [FindSpec::new()
            .case_insensitive()
            .with_location("/ETC/PASSWD")];
        let found = locations(searcher.find(&specs).unwrap().collect());
        assert_eq!(found, vec!["/etc/passwd"]);
    }

    #[test]
    fn test_entry_type_filter() {
        let searcher = sample_searcher();
        let specs = [FindSpec::new()
            .with_entry_type(EntryType::Directory)
            .with_maximum_depth(2)];
        let found = locations(searcher.find(&specs).unwrap().collect());
        assert_eq!(found, vec!["/etc", "/var", "/var/empty"]);
    }

    #[test]
    fn test_depth_bounds() {
        let searcher = sample_searcher();
        let specs = [FindSpec::new()
            .with_minimum_depth(3)
            .with_entry_type(EntryType::File)];
        let found = locations(searcher.find(&specs).unwrap().collect());
        assert_eq!(found, vec!["/var/log/auth.log", "/var/log/syslog"]);
    }

    #[test]
    fn test_multiple_specs_union() {
        let searcher = sample_searcher();
        let specs = [
            FindSpec::new().with_location("/etc/shadow"),
            FindSpec::new().with_location("/var/log/syslog"),
        ];
        let found = locations(searcher.find(&specs).unwrap().collect());
        assert_eq!(found, vec!["/etc/shadow", "/var/log/syslog"]);
    }

    #[test]
    fn test_restartable() {
        let searcher = sample_searcher();
        let specs = [FindSpec::new().with_location("/etc/passwd")];
        let first = locations(searcher.find(&specs).unwrap().collect());
        let second = locations(searcher.find(&specs).unwrap().collect());
        assert_eq!(first, second);
    }
}
