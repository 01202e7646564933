//! stratafs - read-only access to file system objects inside layered
//! forensic artifacts
//!
//! A datum inside nested containers (a file in an NTFS volume in a
//! partition in a disk image in an evidence file) is named by a stacked
//! path specification: a parent-linked chain of typed records describing
//! each container from the outside in. From such a chain the resolver
//! materializes either a seekable byte stream or a navigable file entry.
//!
//! ```rust,ignore
//! use stratafs::path_spec::{factory, TypeIndicator};
//! use stratafs::resolver::ResolverContext;
//!
//! let os = factory::new(TypeIndicator::Os, &[("location", "/evidence/logs.tgz")], None)?;
//! let gzip = factory::new(TypeIndicator::Gzip, &[], Some(os))?;
//! let member = factory::new(TypeIndicator::Tar, &[("location", "/syslog")], Some(gzip))?;
//!
//! let context = ResolverContext::new();
//! let entry = context.open_file_entry(&member)?;
//! let mut stream = entry.file_object(None)?;
//! ```
//!
//! Scanners run the other direction: given an unknown source they identify
//! each layer by signature and emit the chains of every reachable file
//! system.

pub mod analyzer;
pub mod cancel;
pub mod common;
pub mod compression;
pub mod crypto;
pub mod error;
pub mod helpers;
pub mod logging;
pub mod path_spec;
pub mod registry;
pub mod resolver;
pub mod scanner;
pub mod stream;
pub mod vfs;

pub use cancel::CancelToken;
pub use error::{VfsError, VfsResult};
pub use path_spec::{PathSpec, TypeIndicator};
pub use registry::BackendRegistry;
pub use resolver::{KeyChain, MountTable, ResolverContext};
pub use scanner::volume::{VolumeScanner, VolumeScannerOptions};
pub use scanner::{ScanContext, SourceScanner};
pub use stream::FileObject;
pub use vfs::{FileEntry, FileSystem, Stat};
