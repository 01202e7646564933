//! Source scanner
//!
//! Given a system-resolvable root, the scanner discovers the nesting
//! structure of the source: it opens each layer, identifies what its
//! content is, and adds one child node per discovered deeper layer. The
//! result is a scan tree whose leaves are file systems, empty containers,
//! unrecognizable byte runs, or locked encrypted volumes. Errors on one
//! branch are recorded against that branch instead of aborting the scan.

pub mod volume;

use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::analyzer;
use crate::cancel::CancelToken;
use crate::error::{VfsError, VfsResult};
use crate::path_spec::{factory, PathSpec, TypeIndicator};
use crate::resolver::{CredentialValue, ResolverContext};

/// What the scanned source turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SourceType {
    File,
    Directory,
    StorageMediaImage,
    StorageMediaDevice,
}

/// Overall outcome of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScanStatus {
    FullyScanned,
    PartiallyScanned,
    Failed,
}

/// Credential names accepted by a lockable volume type.
pub fn credential_names_for(indicator: TypeIndicator) -> &'static [&'static str] {
    match indicator {
        TypeIndicator::Bde => &["password", "recovery_password", "startup_key"],
        TypeIndicator::Fvde => &["password", "recovery_password"],
        TypeIndicator::Luksde => &["password"],
        TypeIndicator::ApfsContainer => &["password", "recovery_password"],
        TypeIndicator::EncryptedStream => &["key"],
        _ => &[],
    }
}

/// One node of the scan tree.
pub struct ScanNode {
    pub path_spec: PathSpec,
    pub parent: Option<usize>,
    pub sub_nodes: Vec<usize>,
    pub scanned: bool,
    /// Encrypted volume awaiting credentials.
    pub locked: bool,
    /// Why this branch could not be scanned further.
    pub error: Option<String>,
}

impl ScanNode {
    fn new(path_spec: PathSpec, parent: Option<usize>) -> Self {
        Self {
            path_spec,
            parent,
            sub_nodes: Vec::new(),
            scanned: false,
            locked: false,
            error: None,
        }
    }

    pub fn type_indicator(&self) -> TypeIndicator {
        self.path_spec.type_indicator()
    }

    pub fn is_file_system(&self) -> bool {
        self.type_indicator().is_file_system()
    }

    pub fn is_volume_system(&self) -> bool {
        self.type_indicator().is_volume_system()
    }
}

/// Scan tree plus bookkeeping carried across scan passes.
#[derive(Default)]
pub struct ScanContext {
    nodes: Vec<ScanNode>,
    root: Option<usize>,
    pub source_type: Option<SourceType>,
}

impl ScanContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, path_spec: PathSpec, parent: Option<usize>) -> usize {
        let index = self.nodes.len();
        self.nodes.push(ScanNode::new(path_spec, parent));
        if let Some(parent) = parent {
            self.nodes[parent].sub_nodes.push(index);
        }
        if self.root.is_none() {
            self.root = Some(index);
        }
        index
    }

    pub fn node(&self, index: usize) -> &ScanNode {
        &self.nodes[index]
    }

    fn node_mut(&mut self, index: usize) -> &mut ScanNode {
        &mut self.nodes[index]
    }

    pub fn root_node(&self) -> Option<&ScanNode> {
        self.root.map(|index| &self.nodes[index])
    }

    pub fn root_index(&self) -> Option<usize> {
        self.root
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// First node not yet scanned and not waiting on credentials.
    fn unscanned_node(&self) -> Option<usize> {
        self.nodes
            .iter()
            .position(|node| !node.scanned && !node.locked)
    }

    /// Indices of nodes deferred for missing credentials.
    pub fn locked_nodes(&self) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.locked)
            .map(|(index, _)| index)
            .collect()
    }

    /// Indices of discovered file-system leaves. An OS node only counts
    /// when the source itself is a live directory; an OS node that holds a
    /// container is a carrier, not a file system result.
    pub fn file_system_nodes(&self) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(index, node)| {
                if node.error.is_some() {
                    return false;
                }
                match node.type_indicator() {
                    TypeIndicator::Os => {
                        self.source_type == Some(SourceType::Directory)
                            && self.root == Some(*index)
                    }
                    indicator => indicator.is_file_system(),
                }
            })
            .map(|(index, _)| index)
            .collect()
    }

    /// Per-branch failures: (chain comparable, reason).
    pub fn branch_errors(&self) -> Vec<(String, String)> {
        self.nodes
            .iter()
            .filter_map(|node| {
                node.error
                    .as_ref()
                    .map(|error| (node.path_spec.comparable(), error.clone()))
            })
            .collect()
    }

    pub fn status(&self) -> ScanStatus {
        let Some(root) = self.root else {
            return ScanStatus::Failed;
        };
        if self.nodes[root].error.is_some() {
            return ScanStatus::Failed;
        }
        let impaired = self
            .nodes
            .iter()
            .any(|node| node.error.is_some() || node.locked);
        if impaired {
            ScanStatus::PartiallyScanned
        } else {
            ScanStatus::FullyScanned
        }
    }
}

/// Recursive structural discovery over an unknown source.
pub struct SourceScanner {
    resolver: ResolverContext,
    token: CancelToken,
}

impl SourceScanner {
    pub fn new(resolver: ResolverContext) -> Self {
        let token = resolver.cancel_token();
        Self { resolver, token }
    }

    pub fn resolver(&self) -> &ResolverContext {
        &self.resolver
    }

    /// Scans `source` to completion (or to the first locked/errored state
    /// of every branch). Repeated calls continue where unlocking left off.
    pub fn scan(&self, context: &mut ScanContext, source: PathSpec) -> VfsResult<()> {
        if context.root.is_none() {
            if !source.is_system_level() {
                return Err(VfsError::PathSpec(
                    "scan source must be system-resolvable (OS, FAKE or MOUNT)".to_string(),
                ));
            }
            context.add_node(source, None);
        }
        while let Some(index) = context.unscanned_node() {
            self.token.check()?;
            self.scan_node(context, index);
        }
        debug!(
            nodes = context.node_count(),
            status = ?context.status(),
            "scan complete"
        );
        Ok(())
    }

    /// Supplies a credential for a locked node and resumes it. Returns true
    /// when the node unlocked.
    pub fn unlock(
        &self,
        context: &mut ScanContext,
        index: usize,
        credential_name: &str,
        value: impl Into<CredentialValue>,
    ) -> VfsResult<bool> {
        let spec = context.node(index).path_spec.clone();
        self.resolver
            .key_chain()
            .set_credential(&spec, credential_name, value);
        match self.resolver.open_file_object(&spec) {
            Ok(_) => {
                context.node_mut(index).locked = false;
                Ok(true)
            }
            Err(VfsError::EncryptedVolumeLocked(_)) => Ok(false),
            Err(other) => Err(other),
        }
    }

    fn scan_node(&self, context: &mut ScanContext, index: usize) {
        let spec = context.node(index).path_spec.clone();
        let indicator = spec.type_indicator();
        trace!(chain = %spec, "scanning node");

        // Host directories and file-system layers terminate their branch.
        if indicator == TypeIndicator::Os {
            let is_directory = spec
                .location()
                .map(|location| std::path::Path::new(location).is_dir())
                .unwrap_or(false);
            if is_directory {
                context.source_type = Some(SourceType::Directory);
                context.node_mut(index).scanned = true;
                return;
            }
        } else if indicator.is_file_system() {
            context.node_mut(index).scanned = true;
            return;
        }

        // The root of a volume system expands into its volumes; a single
        // volume (a location or index other than the root) is a byte run
        // analyzed like any other layer.
        if indicator.is_volume_system() && is_volume_system_root(&spec) {
            self.scan_volume_system_node(context, index, &spec);
            return;
        }

        // Everything else produces a byte stream to identify.
        let mut stream = match self.resolver.open_file_object(&spec) {
            Ok(stream) => stream,
            Err(VfsError::EncryptedVolumeLocked(reason)) => {
                debug!(chain = %spec, "locked volume deferred");
                let node = context.node_mut(index);
                node.locked = true;
                node.error = Some(reason);
                return;
            }
            Err(error) => {
                warn!(chain = %spec, %error, "branch failed to open");
                let node = context.node_mut(index);
                node.error = Some(error.to_string());
                node.scanned = true;
                return;
            }
        };

        let indicators = match analyzer::analyze(stream.as_mut(), self.resolver.registry()) {
            Ok(indicators) => indicators,
            Err(error) => {
                let node = context.node_mut(index);
                node.error = Some(error.to_string());
                node.scanned = true;
                return;
            }
        };

        if context.root == Some(index) && context.source_type.is_none() {
            context.source_type = Some(if indicators.is_empty() {
                SourceType::File
            } else {
                SourceType::StorageMediaImage
            });
        }

        for detected in indicators {
            match child_spec_for(detected, spec.clone()) {
                Ok(child) => {
                    context.add_node(child, Some(index));
                }
                Err(error) => {
                    trace!(%detected, %error, "cannot build child specification");
                }
            }
        }
        context.node_mut(index).scanned = true;
    }

    /// Volume systems are expanded through their entry hierarchy: one child
    /// node per volume or store.
    fn scan_volume_system_node(&self, context: &mut ScanContext, index: usize, spec: &PathSpec) {
        let result = self.resolver.open_file_system(spec).and_then(|fs| {
            let root = fs.root_entry()?;
            let mut specs = Vec::new();
            for entry in root.sub_entries()? {
                specs.push(entry?.path_spec());
            }
            Ok(specs)
        });
        match result {
            Ok(volume_specs) => {
                for volume_spec in volume_specs {
                    context.add_node(volume_spec, Some(index));
                }
                context.node_mut(index).scanned = true;
            }
            Err(VfsError::EncryptedVolumeLocked(reason)) => {
                let node = context.node_mut(index);
                node.locked = true;
                node.error = Some(reason);
            }
            Err(error) => {
                let node = context.node_mut(index);
                node.error = Some(error.to_string());
                node.scanned = true;
            }
        }
    }
}

/// True for the root record of a volume system (as opposed to one volume).
pub(crate) fn is_volume_system_root(spec: &PathSpec) -> bool {
    matches!(
        spec,
        PathSpec::Volume {
            location: Some(location),
            index: None,
            start_offset: None,
            ..
        } if location == "/"
    )
}

/// Builds the child spec for a detected format layered on `parent`.
fn child_spec_for(indicator: TypeIndicator, parent: PathSpec) -> VfsResult<PathSpec> {
    let attributes: Vec<(&str, &str)> = if indicator.is_file_system()
        || indicator.is_volume_system()
    {
        vec![("location", "/")]
    } else {
        Vec::new()
    };
    factory::new(indicator, &attributes, Some(parent))
}
