//! Volume scanner
//!
//! Builds on the source scanner to answer the practical question: which
//! file systems does this source contain, and which of them does the caller
//! want? Selection among partitions, logical volumes and snapshot stores is
//! driven by options (non-interactive defaults) or a caller-supplied
//! mediator (interactive choices and credential prompts).

use tracing::debug;

use crate::error::VfsResult;
use crate::path_spec::{PathSpec, TypeIndicator};
use crate::resolver::CredentialValue;
use crate::scanner::{credential_names_for, ScanContext, SourceScanner};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeSelection {
    All,
    Indices(Vec<usize>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotSelection {
    None,
    All,
    Indices(Vec<usize>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Honor selections; visit each selected branch once.
    OnePass,
    /// Collect every discoverable file system regardless of selections.
    Exhaustive,
}

pub struct VolumeScannerOptions {
    pub partitions: VolumeSelection,
    pub volumes: VolumeSelection,
    pub snapshots: SnapshotSelection,
    pub credentials: Vec<(String, CredentialValue)>,
    pub scan_mode: ScanMode,
}

impl Default for VolumeScannerOptions {
    fn default() -> Self {
        Self {
            partitions: VolumeSelection::All,
            volumes: VolumeSelection::All,
            snapshots: SnapshotSelection::None,
            credentials: Vec::new(),
            scan_mode: ScanMode::OnePass,
        }
    }
}

/// Caller-supplied policy answering the scanner's interactive questions.
/// Every method has a non-interactive default matching the options
/// defaults, so implementors override only what they mediate.
pub trait ScanMediator {
    /// Which of the enumerated partitions/volumes to descend into.
    fn select_volumes(&self, candidates: &[PathSpec]) -> VfsResult<Vec<usize>> {
        Ok((0..candidates.len()).collect())
    }

    /// Which snapshot stores to include.
    fn select_snapshots(&self, _candidates: &[PathSpec]) -> VfsResult<Vec<usize>> {
        Ok(Vec::new())
    }

    /// A credential for a locked volume, or None to leave it locked.
    fn request_credential(
        &self,
        _spec: &PathSpec,
        _credential_names: &[&str],
    ) -> Option<(String, CredentialValue)> {
        None
    }
}

pub struct VolumeScanner {
    scanner: SourceScanner,
    options: VolumeScannerOptions,
    mediator: Option<Box<dyn ScanMediator>>,
}

impl VolumeScanner {
    pub fn new(scanner: SourceScanner, options: VolumeScannerOptions) -> Self {
        Self {
            scanner,
            options,
            mediator: None,
        }
    }

    pub fn with_mediator(mut self, mediator: Box<dyn ScanMediator>) -> Self {
        self.mediator = Some(mediator);
        self
    }

    /// Scans the source and returns the chains of every selected file
    /// system root. The scan context is returned alongside so callers can
    /// inspect branch errors and locked leftovers.
    pub fn scan_for_file_systems(
        &self,
        source: PathSpec,
    ) -> VfsResult<(Vec<PathSpec>, ScanContext)> {
        let mut context = ScanContext::new();
        self.scanner.scan(&mut context, source)?;
        self.apply_credentials(&mut context)?;

        let mut selected = Vec::new();
        if let Some(root) = context.root_index() {
            self.collect(&context, root, &mut selected)?;
        }
        debug!(
            file_systems = selected.len(),
            status = ?context.status(),
            "volume scan complete"
        );
        Ok((selected, context))
    }

    /// Tries configured credentials (then the mediator) against every
    /// locked node, resuming the scan after each unlock.
    fn apply_credentials(&self, context: &mut ScanContext) -> VfsResult<()> {
        loop {
            let locked = context.locked_nodes();
            if locked.is_empty() {
                return Ok(());
            }
            let mut unlocked_any = false;
            for index in locked {
                let spec = context.node(index).path_spec.clone();
                let names = credential_names_for(spec.type_indicator());

                for (name, value) in &self.options.credentials {
                    if names.contains(&name.as_str())
                        && self
                            .scanner
                            .unlock(context, index, name, value.clone())
                            .unwrap_or(false)
                    {
                        unlocked_any = true;
                        break;
                    }
                }
                if !context.node(index).locked {
                    continue;
                }
                if let Some(mediator) = &self.mediator {
                    if let Some((name, value)) = mediator.request_credential(&spec, names) {
                        if self
                            .scanner
                            .unlock(context, index, &name, value)
                            .unwrap_or(false)
                        {
                            unlocked_any = true;
                        }
                    }
                }
            }
            if !unlocked_any {
                return Ok(());
            }
            // Unlocked nodes have unscanned branches now.
            let root = context
                .root_node()
                .map(|node| node.path_spec.clone())
                .expect("scan established a root");
            self.scanner.scan(context, root)?;
        }
    }

    /// Depth-first collection honoring the selection policy at volume
    /// system roots.
    fn collect(
        &self,
        context: &ScanContext,
        index: usize,
        out: &mut Vec<PathSpec>,
    ) -> VfsResult<()> {
        let node = context.node(index);

        if context.file_system_nodes().contains(&index) {
            out.push(node.path_spec.clone());
            return Ok(());
        }

        let children = node.sub_nodes.clone();
        let selected: Vec<usize> = if node.is_volume_system()
            && crate::scanner::is_volume_system_root(&node.path_spec)
            && self.options.scan_mode == ScanMode::OnePass
        {
            let candidates: Vec<PathSpec> = children
                .iter()
                .map(|&child| context.node(child).path_spec.clone())
                .collect();
            self.select_children(&node.path_spec, &candidates)?
                .into_iter()
                .filter_map(|i| children.get(i).copied())
                .collect()
        } else {
            children
        };

        for child in selected {
            self.collect(context, child, out)?;
        }
        Ok(())
    }

    fn select_children(
        &self,
        volume_spec: &PathSpec,
        candidates: &[PathSpec],
    ) -> VfsResult<Vec<usize>> {
        let is_snapshot_system =
            volume_spec.type_indicator() == TypeIndicator::Vshadow;

        if let Some(mediator) = &self.mediator {
            return if is_snapshot_system {
                mediator.select_snapshots(candidates)
            } else {
                mediator.select_volumes(candidates)
            };
        }

        if is_snapshot_system {
            return Ok(match &self.options.snapshots {
                SnapshotSelection::None => Vec::new(),
                SnapshotSelection::All => (0..candidates.len()).collect(),
                SnapshotSelection::Indices(indices) => indices.clone(),
            });
        }

        let selection = match volume_spec.type_indicator() {
            TypeIndicator::Lvm | TypeIndicator::ApfsContainer => &self.options.volumes,
            _ => &self.options.partitions,
        };
        Ok(match selection {
            VolumeSelection::All => (0..candidates.len()).collect(),
            VolumeSelection::Indices(indices) => indices.clone(),
        })
    }
}

// Re-exported here so mediator implementors see the format enum alongside
// the selection types.
pub use crate::path_spec::VolumeSystemFormat as VolumeFormat;
