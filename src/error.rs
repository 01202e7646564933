//! Error types for layered artifact access

use std::fmt;
use std::io;

/// Result type alias for VFS operations
pub type VfsResult<T> = Result<T, VfsError>;

/// Errors that can occur while resolving or reading layered artifacts
#[derive(Debug)]
pub enum VfsError {
    /// No back-end registered for the type indicator
    UnsupportedType(String),
    /// Malformed chain, missing/extra attribute, or orphan root type
    PathSpec(String),
    /// Path or entry absent
    NotFound(String),
    /// Host permission denied
    AccessDenied(String),
    /// Format violation: bad magic, truncated header, decode failure
    InvalidData(String),
    /// Structural inconsistency encountered mid-traversal
    CorruptVolume(String),
    /// Credential missing or wrong
    EncryptedVolumeLocked(String),
    /// Underlying decoder surfaced an opaque error
    BackEndFailure(String),
    /// Cooperative abort via cancellation token
    Cancelled,
    /// Caller-imposed deadline expired
    TimedOut,
}

impl fmt::Display for VfsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VfsError::UnsupportedType(e) => write!(f, "Unsupported type: {}", e),
            VfsError::PathSpec(e) => write!(f, "Path specification error: {}", e),
            VfsError::NotFound(e) => write!(f, "Not found: {}", e),
            VfsError::AccessDenied(e) => write!(f, "Access denied: {}", e),
            VfsError::InvalidData(e) => write!(f, "Invalid data: {}", e),
            VfsError::CorruptVolume(e) => write!(f, "Corrupt volume: {}", e),
            VfsError::EncryptedVolumeLocked(e) => {
                write!(f, "Encrypted volume locked: {}", e)
            }
            VfsError::BackEndFailure(e) => write!(f, "Back-end failure: {}", e),
            VfsError::Cancelled => write!(f, "Operation cancelled"),
            VfsError::TimedOut => write!(f, "Operation timed out"),
        }
    }
}

impl std::error::Error for VfsError {}

impl From<io::Error> for VfsError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => VfsError::NotFound(err.to_string()),
            io::ErrorKind::PermissionDenied => VfsError::AccessDenied(err.to_string()),
            io::ErrorKind::UnexpectedEof => VfsError::InvalidData(err.to_string()),
            _ => VfsError::BackEndFailure(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for VfsError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => {
                VfsError::NotFound("query returned no rows".to_string())
            }
            other => VfsError::BackEndFailure(other.to_string()),
        }
    }
}

impl VfsError {
    /// Maps a VFS error to an equivalent `std::io::Error` for interop with
    /// readers that speak the standard I/O traits.
    pub fn into_io_error(self) -> io::Error {
        let kind = match &self {
            VfsError::NotFound(_) => io::ErrorKind::NotFound,
            VfsError::AccessDenied(_) => io::ErrorKind::PermissionDenied,
            VfsError::InvalidData(_) | VfsError::CorruptVolume(_) => {
                io::ErrorKind::InvalidData
            }
            VfsError::TimedOut => io::ErrorKind::TimedOut,
            VfsError::Cancelled => io::ErrorKind::Interrupted,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_mapping() {
        let err = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert!(matches!(VfsError::from(err), VfsError::NotFound(_)));

        let err = io::Error::new(io::ErrorKind::PermissionDenied, "no");
        assert!(matches!(VfsError::from(err), VfsError::AccessDenied(_)));
    }

    #[test]
    fn test_display() {
        let err = VfsError::UnsupportedType("QCOW".to_string());
        assert_eq!(err.to_string(), "Unsupported type: QCOW");
    }
}
