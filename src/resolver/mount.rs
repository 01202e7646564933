//! Mount table
//!
//! Maps caller-chosen identifiers to path specifications so chains can be
//! written against stable names (`MOUNT` records) instead of full chains.
//! Identifiers are unique; registering a taken identifier or resolving an
//! unknown one fails.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{VfsError, VfsResult};
use crate::path_spec::PathSpec;

#[derive(Default)]
pub struct MountTable {
    entries: Mutex<HashMap<String, PathSpec>>,
}

impl MountTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, identifier: &str, spec: PathSpec) -> VfsResult<()> {
        let mut entries = self.entries.lock().expect("mount table poisoned");
        if entries.contains_key(identifier) {
            return Err(VfsError::PathSpec(format!(
                "mount identifier already registered: {}",
                identifier
            )));
        }
        entries.insert(identifier.to_string(), spec);
        Ok(())
    }

    pub fn deregister(&self, identifier: &str) -> VfsResult<()> {
        let mut entries = self.entries.lock().expect("mount table poisoned");
        entries
            .remove(identifier)
            .map(|_| ())
            .ok_or_else(|| VfsError::NotFound(format!("mount identifier: {}", identifier)))
    }

    pub fn resolve(&self, identifier: &str) -> VfsResult<PathSpec> {
        let entries = self.entries.lock().expect("mount table poisoned");
        entries
            .get(identifier)
            .cloned()
            .ok_or_else(|| VfsError::NotFound(format!("mount identifier: {}", identifier)))
    }

    pub fn identifiers(&self) -> Vec<String> {
        let entries = self.entries.lock().expect("mount table poisoned");
        let mut identifiers: Vec<String> = entries.keys().cloned().collect();
        identifiers.sort();
        identifiers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os_spec(location: &str) -> PathSpec {
        PathSpec::Os {
            location: location.to_string(),
        }
    }

    #[test]
    fn test_register_resolve_deregister() {
        let table = MountTable::new();
        table.register("C", os_spec("/mnt/c.img")).unwrap();
        assert_eq!(table.resolve("C").unwrap(), os_spec("/mnt/c.img"));

        table.deregister("C").unwrap();
        assert!(matches!(table.resolve("C"), Err(VfsError::NotFound(_))));
    }

    #[test]
    fn test_duplicate_identifier() {
        let table = MountTable::new();
        table.register("evidence", os_spec("/a")).unwrap();
        assert!(matches!(
            table.register("evidence", os_spec("/b")),
            Err(VfsError::PathSpec(_))
        ));
    }

    #[test]
    fn test_unknown_identifier() {
        let table = MountTable::new();
        assert!(matches!(table.resolve("nope"), Err(VfsError::NotFound(_))));
        assert!(matches!(table.deregister("nope"), Err(VfsError::NotFound(_))));
    }
}
