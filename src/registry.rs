//! Back-end registries
//!
//! Two parallel registries keyed on the type indicator: resolver helpers
//! construct streams and file systems, analyzer helpers contribute format
//! specifications to the signature scanner. Registration is idempotent;
//! re-registering a type replaces its helper, which is how external format
//! decoders plug in at runtime.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::analyzer::specification::{FormatCategory, FormatSpecification};
use crate::error::{VfsError, VfsResult};
use crate::path_spec::{PathSpec, TypeIndicator};
use crate::resolver::ResolverContext;
use crate::stream::FileObject;
use crate::vfs::FileSystem;

/// Constructs live objects for one type indicator. A helper declares which
/// of the two products it supports; the default implementations refuse.
pub trait ResolverHelper: Send + Sync {
    fn type_indicator(&self) -> TypeIndicator;

    fn provides_file_object(&self) -> bool {
        false
    }

    fn provides_file_system(&self) -> bool {
        false
    }

    fn new_file_object(
        &self,
        _spec: &PathSpec,
        _context: &ResolverContext,
    ) -> VfsResult<Box<dyn FileObject>> {
        Err(VfsError::UnsupportedType(format!(
            "{} provides no file object",
            self.type_indicator()
        )))
    }

    fn new_file_system(
        &self,
        _spec: &PathSpec,
        _context: &ResolverContext,
    ) -> VfsResult<Arc<dyn FileSystem>> {
        Err(VfsError::UnsupportedType(format!(
            "{} provides no file system",
            self.type_indicator()
        )))
    }
}

/// Contributes signatures and an optional structural check for one format.
pub trait AnalyzerHelper: Send + Sync {
    fn type_indicator(&self) -> TypeIndicator;

    fn format_specification(&self) -> FormatSpecification;

    fn category(&self) -> FormatCategory {
        self.format_specification().category
    }

    /// Deeper verification once signatures matched; the stream offset is
    /// unspecified on entry.
    fn structural_check(&self, _stream: &mut dyn FileObject) -> VfsResult<bool> {
        Ok(true)
    }
}

/// Process-wide or per-context helper tables.
#[derive(Default)]
pub struct BackendRegistry {
    resolver_helpers: RwLock<HashMap<TypeIndicator, Arc<dyn ResolverHelper>>>,
    analyzer_helpers: RwLock<HashMap<TypeIndicator, Arc<dyn AnalyzerHelper>>>,
}

impl BackendRegistry {
    /// Empty registry; external decoders register into it.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with every native back-end.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        crate::resolver::helpers::register_native_helpers(&registry);
        crate::analyzer::helpers::register_native_helpers(&registry);
        registry
    }

    pub fn register_resolver_helper(&self, helper: Arc<dyn ResolverHelper>) {
        self.resolver_helpers
            .write()
            .expect("resolver helper table poisoned")
            .insert(helper.type_indicator(), helper);
    }

    pub fn register_analyzer_helper(&self, helper: Arc<dyn AnalyzerHelper>) {
        self.analyzer_helpers
            .write()
            .expect("analyzer helper table poisoned")
            .insert(helper.type_indicator(), helper);
    }

    pub fn resolver_helper(
        &self,
        indicator: TypeIndicator,
    ) -> VfsResult<Arc<dyn ResolverHelper>> {
        self.resolver_helpers
            .read()
            .expect("resolver helper table poisoned")
            .get(&indicator)
            .cloned()
            .ok_or_else(|| VfsError::UnsupportedType(indicator.as_str().to_string()))
    }

    pub fn has_resolver_helper(&self, indicator: TypeIndicator) -> bool {
        self.resolver_helpers
            .read()
            .expect("resolver helper table poisoned")
            .contains_key(&indicator)
    }

    pub fn analyzer_helpers(&self) -> Vec<Arc<dyn AnalyzerHelper>> {
        self.analyzer_helpers
            .read()
            .expect("analyzer helper table poisoned")
            .values()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::specification::ByteSignature;

    struct DummyAnalyzer(TypeIndicator);

    impl AnalyzerHelper for DummyAnalyzer {
        fn type_indicator(&self) -> TypeIndicator {
            self.0
        }

        fn format_specification(&self) -> FormatSpecification {
            FormatSpecification::new(
                self.0,
                FormatCategory::Archive,
                vec![ByteSignature::at_start(0, b"XX")],
            )
        }
    }

    #[test]
    fn test_unknown_type_fails() {
        let registry = BackendRegistry::new();
        assert!(matches!(
            registry.resolver_helper(TypeIndicator::Qcow),
            Err(VfsError::UnsupportedType(_))
        ));
    }

    #[test]
    fn test_reregistration_replaces() {
        let registry = BackendRegistry::new();
        registry.register_analyzer_helper(Arc::new(DummyAnalyzer(TypeIndicator::Zip)));
        registry.register_analyzer_helper(Arc::new(DummyAnalyzer(TypeIndicator::Zip)));
        assert_eq!(registry.analyzer_helpers().len(), 1);
    }

    #[test]
    fn test_defaults_cover_native_types() {
        let registry = BackendRegistry::with_defaults();
        for indicator in [
            TypeIndicator::Os,
            TypeIndicator::Fake,
            TypeIndicator::Mount,
            TypeIndicator::DataRange,
            TypeIndicator::CompressedStream,
            TypeIndicator::EncodedStream,
            TypeIndicator::EncryptedStream,
            TypeIndicator::Gzip,
            TypeIndicator::Tar,
            TypeIndicator::Zip,
            TypeIndicator::Cpio,
            TypeIndicator::Raw,
            TypeIndicator::Ewf,
            TypeIndicator::SqliteBlob,
        ] {
            assert!(
                registry.has_resolver_helper(indicator),
                "missing helper for {}",
                indicator
            );
        }
        // External decoder types have signatures but no resolver helper.
        assert!(!registry.has_resolver_helper(TypeIndicator::Qcow));
        assert!(!registry.has_resolver_helper(TypeIndicator::Ntfs));
    }
}
