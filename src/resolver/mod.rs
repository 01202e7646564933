//! Chain resolution
//!
//! The resolver walks an addressing chain parent-first, asking the
//! registered helper of each record to build its layer on top of the
//! parent's. All state a resolution needs travels in a [`ResolverContext`]:
//! the helper registry, the mount table, the key chain, a credential prompt
//! and the file-system cache. Contexts are cheap to clone (shared innards)
//! so helpers and file systems can re-resolve parents on demand.
//!
//! File systems are cached per comparable and reference counted: repeated
//! opens in one context return the same instance, and the back-end closes
//! when the last handle drops. Streams are never cached; every open returns
//! an independent handle.

pub mod helpers;
pub mod keychain;
pub mod mount;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, trace};

use crate::cancel::CancelToken;
use crate::error::{VfsError, VfsResult};
use crate::path_spec::PathSpec;
use crate::registry::BackendRegistry;
use crate::stream::FileObject;
use crate::vfs::{FileEntry, FileSystem};

pub use keychain::{CredentialValue, KeyChain};
pub use mount::MountTable;

/// Interactive credential callback: given the locked spec and the
/// credential names its type accepts, returns one name/value pair.
pub type CredentialPrompt =
    Box<dyn Fn(&PathSpec, &[&str]) -> Option<(String, CredentialValue)> + Send + Sync>;

struct ContextInner {
    registry: Arc<BackendRegistry>,
    mount_table: Arc<MountTable>,
    key_chain: Arc<KeyChain>,
    prompt: Option<CredentialPrompt>,
    cancel_token: CancelToken,
    cache: Mutex<HashMap<String, Weak<dyn FileSystem>>>,
    /// Externally built file systems registered into this context; held
    /// strongly for the context's lifetime.
    pinned: Mutex<HashMap<String, Arc<dyn FileSystem>>>,
}

/// Shared state for one resolution scope.
#[derive(Clone)]
pub struct ResolverContext {
    inner: Arc<ContextInner>,
}

impl Default for ResolverContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolverContext {
    /// Context over the native back-end set with fresh tables.
    pub fn new() -> Self {
        Self::with_registry(Arc::new(BackendRegistry::with_defaults()))
    }

    pub fn with_registry(registry: Arc<BackendRegistry>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                registry,
                mount_table: Arc::new(MountTable::new()),
                key_chain: Arc::new(KeyChain::new()),
                prompt: None,
                cancel_token: CancelToken::new(),
                cache: Mutex::new(HashMap::new()),
                pinned: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Derives a context sharing this one's registry and tables but with
    /// the given credential prompt installed.
    pub fn with_prompt(&self, prompt: CredentialPrompt) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                registry: Arc::clone(&self.inner.registry),
                mount_table: Arc::clone(&self.inner.mount_table),
                key_chain: Arc::clone(&self.inner.key_chain),
                prompt: Some(prompt),
                cancel_token: self.inner.cancel_token.clone(),
                cache: Mutex::new(HashMap::new()),
                pinned: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Derives a context observing the given cancellation token.
    pub fn with_cancel_token(&self, token: CancelToken) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                registry: Arc::clone(&self.inner.registry),
                mount_table: Arc::clone(&self.inner.mount_table),
                key_chain: Arc::clone(&self.inner.key_chain),
                prompt: None,
                cancel_token: token,
                cache: Mutex::new(HashMap::new()),
                pinned: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.inner.registry
    }

    pub fn mount_table(&self) -> &MountTable {
        &self.inner.mount_table
    }

    pub fn key_chain(&self) -> &KeyChain {
        &self.inner.key_chain
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.inner.cancel_token.clone()
    }

    // =========================================================================
    // Opening
    // =========================================================================

    /// Opens a byte stream for the chain. Streams are not cached; each call
    /// returns an independent handle.
    pub fn open_file_object(&self, spec: &PathSpec) -> VfsResult<Box<dyn FileObject>> {
        self.inner.cancel_token.check()?;
        trace!(chain = %spec, "open file object");
        let helper = self.inner.registry.resolver_helper(spec.type_indicator())?;
        if helper.provides_file_object() {
            return helper.new_file_object(spec, self);
        }
        // File-system types expose their entries' default data stream.
        let entry = self.open_file_entry(spec)?;
        let data_stream = match spec {
            PathSpec::FileSystem { data_stream, .. } => data_stream.as_deref(),
            _ => None,
        };
        entry.file_object(data_stream)
    }

    /// Opens (or returns the cached) file system owning the chain's top
    /// hierarchy layer.
    pub fn open_file_system(&self, spec: &PathSpec) -> VfsResult<Arc<dyn FileSystem>> {
        self.inner.cancel_token.check()?;
        let fs_spec = file_system_spec(spec);
        let key = fs_spec.comparable();

        if let Some(cached) = self.cached_file_system(spec) {
            trace!(key = key.as_str(), "file system cache hit");
            return Ok(cached);
        }

        let helper = self
            .inner
            .registry
            .resolver_helper(fs_spec.type_indicator())?;
        let file_system = helper.new_file_system(&fs_spec, self)?;
        debug!(key = key.as_str(), "opened file system");

        let mut cache = self.inner.cache.lock().expect("resolver cache poisoned");
        // Drop dead entries opportunistically so the table stays bounded.
        cache.retain(|_, weak| weak.strong_count() > 0);
        cache.insert(key, Arc::downgrade(&file_system));
        Ok(file_system)
    }

    /// Opens the file entry the chain addresses.
    pub fn open_file_entry(&self, spec: &PathSpec) -> VfsResult<Box<dyn FileEntry>> {
        // MOUNT records indirect through the mount table before normal
        // resolution (other types go through their helper, including the
        // mount helper's own stream path).
        if let PathSpec::Mount { identifier } = spec {
            let target = self.inner.mount_table.resolve(identifier)?;
            return self.open_file_entry(&target);
        }
        let file_system = self.open_file_system(spec)?;
        file_system.entry_by_spec(spec)
    }

    /// Pre-registers an externally built file system (fake hierarchies) so
    /// chains addressing it resolve inside this context. Unlike opened file
    /// systems, registered ones are held for the context's lifetime.
    pub fn cache_file_system(&self, spec: &PathSpec, file_system: Arc<dyn FileSystem>) {
        let key = file_system_spec(spec).comparable();
        let mut pinned = self.inner.pinned.lock().expect("resolver cache poisoned");
        pinned.insert(key, file_system);
    }

    /// Looks up a cached file system without opening.
    pub(crate) fn cached_file_system(&self, spec: &PathSpec) -> Option<Arc<dyn FileSystem>> {
        let key = file_system_spec(spec).comparable();
        let pinned = self.inner.pinned.lock().expect("resolver cache poisoned");
        if let Some(file_system) = pinned.get(&key) {
            return Some(Arc::clone(file_system));
        }
        drop(pinned);
        let cache = self.inner.cache.lock().expect("resolver cache poisoned");
        cache.get(&key).and_then(Weak::upgrade)
    }

    // =========================================================================
    // Credentials
    // =========================================================================

    /// Credential acquisition in the defined order: explicit value from the
    /// spec, key-chain entry for the exact comparable, interactive prompt,
    /// then locked.
    pub fn resolve_credential(
        &self,
        spec: &PathSpec,
        names: &[&str],
        explicit: Option<CredentialValue>,
    ) -> VfsResult<(String, CredentialValue)> {
        if let Some(value) = explicit {
            return Ok((names.first().unwrap_or(&"").to_string(), value));
        }
        for name in names {
            if let Some(value) = self.inner.key_chain.credential(spec, name) {
                return Ok((name.to_string(), value));
            }
        }
        if let Some(prompt) = &self.inner.prompt {
            if let Some((name, value)) = prompt(spec, names) {
                // Remember prompted credentials for repeated opens.
                self.inner.key_chain.set_credential(spec, &name, value.clone());
                return Ok((name, value));
            }
        }
        Err(VfsError::EncryptedVolumeLocked(format!(
            "no credential for {}",
            spec.type_indicator()
        )))
    }
}

/// Spec identifying the file system that owns the addressed entry: entry
/// addressing attributes are stripped so every entry of one hierarchy maps
/// to the same cache key.
fn file_system_spec(spec: &PathSpec) -> PathSpec {
    match spec {
        PathSpec::Archive {
            format, parent, ..
        } => PathSpec::Archive {
            format: *format,
            location: "/".to_string(),
            parent: parent.clone(),
        },
        PathSpec::FileSystem {
            format, parent, ..
        } => PathSpec::FileSystem {
            format: *format,
            location: "/".to_string(),
            identifier: None,
            data_stream: None,
            mft_attribute: None,
            parent: parent.clone(),
        },
        PathSpec::Os { .. } => PathSpec::Os {
            location: String::new(),
        },
        PathSpec::Fake { .. } => PathSpec::Fake {
            location: "/".to_string(),
        },
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path_spec::ArchiveFormat;

    #[test]
    fn test_file_system_spec_strips_entry_addressing() {
        let parent = PathSpec::Os {
            location: "/logs.tgz".to_string(),
        };
        let a = PathSpec::Archive {
            format: ArchiveFormat::Tar,
            location: "/syslog".to_string(),
            parent: Box::new(parent.clone()),
        };
        let b = PathSpec::Archive {
            format: ArchiveFormat::Tar,
            location: "/other/file".to_string(),
            parent: Box::new(parent),
        };
        assert_eq!(
            file_system_spec(&a).comparable(),
            file_system_spec(&b).comparable()
        );
    }

    #[test]
    fn test_mount_indirection() {
        let context = ResolverContext::new();
        let fake = crate::vfs::fake::FakeFileSystemBuilder::new()
            .add_file("/report.txt", b"mounted")
            .build();
        let fake_spec = PathSpec::Fake {
            location: "/report.txt".to_string(),
        };
        context.cache_file_system(&fake_spec, fake);
        context
            .mount_table()
            .register("evidence", fake_spec)
            .unwrap();

        let mount_spec = PathSpec::Mount {
            identifier: "evidence".to_string(),
        };
        let entry = context.open_file_entry(&mount_spec).unwrap();
        assert_eq!(entry.name(), "report.txt");

        let mut stream = context.open_file_object(&mount_spec).unwrap();
        let data = crate::stream::read_to_end(stream.as_mut()).unwrap();
        assert_eq!(data, b"mounted");
    }

    #[test]
    fn test_unknown_mount_identifier() {
        let context = ResolverContext::new();
        let spec = PathSpec::Mount {
            identifier: "ghost".to_string(),
        };
        assert!(matches!(
            context.open_file_object(&spec),
            Err(VfsError::NotFound(_))
        ));
    }
}
