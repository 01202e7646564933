// Shared file I/O pool for managing multiple segment file handles
//
// Provides LRU caching for file handles when working with multi-segment
// storage media images to avoid exceeding OS file descriptor limits.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::path::PathBuf;

use tracing::{debug, trace};

use crate::error::{VfsError, VfsResult};

/// Default maximum number of simultaneously open file handles
pub const DEFAULT_MAX_OPEN_FILES: usize = 32;

/// Manages multiple file handles with LRU caching
/// Limits number of simultaneously open files to avoid OS limits
pub struct FileIoPool {
    /// Paths to all segment files in order
    file_paths: Vec<PathBuf>,
    /// Currently open file handles (file_index -> File)
    open_handles: HashMap<usize, File>,
    /// LRU queue for file handle management
    lru_queue: VecDeque<usize>,
    /// Maximum number of simultaneously open files
    max_open: usize,
}

impl FileIoPool {
    /// Create a new file pool with specified paths and max open limit
    pub fn new(file_paths: Vec<PathBuf>, max_open: usize) -> Self {
        Self {
            file_paths,
            open_handles: HashMap::new(),
            lru_queue: VecDeque::new(),
            max_open,
        }
    }

    /// Create a new file pool with default max open limit
    pub fn with_default_limit(file_paths: Vec<PathBuf>) -> Self {
        Self::new(file_paths, DEFAULT_MAX_OPEN_FILES)
    }

    /// Get a file handle, opening it if necessary and managing LRU cache
    pub fn get_file(&mut self, file_index: usize) -> VfsResult<&mut File> {
        if file_index >= self.file_paths.len() {
            return Err(VfsError::NotFound(format!(
                "file index {} out of range (have {} files)",
                file_index,
                self.file_paths.len()
            )));
        }

        // If file is already open, move to front of LRU queue
        if self.open_handles.contains_key(&file_index) {
            self.lru_queue.retain(|&x| x != file_index);
            self.lru_queue.push_front(file_index);
            trace!(file_index, "File handle cache hit");
            return Ok(self
                .open_handles
                .get_mut(&file_index)
                .expect("checked above"));
        }

        // Need to open the file - check if we need to close one first
        if self.open_handles.len() >= self.max_open {
            if let Some(lru_index) = self.lru_queue.pop_back() {
                trace!(lru_index, "Evicting LRU file handle");
                self.open_handles.remove(&lru_index);
            }
        }

        let file_path = &self.file_paths[file_index];
        debug!(file_index, ?file_path, "Opening file handle");
        let file = File::open(file_path)?;

        self.open_handles.insert(file_index, file);
        self.lru_queue.push_front(file_index);

        Ok(self
            .open_handles
            .get_mut(&file_index)
            .expect("inserted above"))
    }

    /// Get the number of files in the pool
    pub fn file_count(&self) -> usize {
        self.file_paths.len()
    }

    /// Get the number of currently open handles
    pub fn open_count(&self) -> usize {
        self.open_handles.len()
    }

    /// Close all open file handles
    pub fn close_all(&mut self) {
        self.open_handles.clear();
        self.lru_queue.clear();
    }
}
