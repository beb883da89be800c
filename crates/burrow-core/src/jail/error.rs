//! Error kinds for jail operations and errno mapping.
//!
//! Every error carries the normalised, relative path the caller supplied —
//! never the absolute host path — so the host location of a jail cannot
//! leak through error messages.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::jail::path::JailPath;

/// Errors from jail filesystem operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum JailError {
    /// The path resolved, or was attempting to resolve, outside the jail
    /// root. Never worth retrying.
    #[error("path escapes the jail: {}", path.display())]
    PathEscape {
        /// Relative path that attempted to escape.
        path: PathBuf,
    },

    /// A component of the path does not exist.
    #[error("not found: {}", path.display())]
    NotFound {
        /// Relative path that was not found.
        path: PathBuf,
    },

    /// Create requested on an existing path.
    #[error("already exists: {}", path.display())]
    AlreadyExists {
        /// Relative path that already exists.
        path: PathBuf,
    },

    /// The kernel denied the operation.
    #[error("permission denied: {}", path.display())]
    PermissionDenied {
        /// Relative path the operation targeted.
        path: PathBuf,
    },

    /// The operation requires a non-directory but found a directory.
    #[error("is a directory: {}", path.display())]
    IsADirectory {
        /// Relative path of the directory.
        path: PathBuf,
    },

    /// The operation requires a directory but found something else.
    #[error("not a directory: {}", path.display())]
    NotADirectory {
        /// Relative path of the non-directory.
        path: PathBuf,
    },

    /// Malformed path or flag combination; a caller bug.
    #[error("invalid argument: {reason}: {}", path.display())]
    InvalidArgument {
        /// Relative path the operation targeted.
        path: PathBuf,
        /// What was malformed.
        reason: String,
    },

    /// Any other kernel or device error.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        /// Relative path the operation targeted.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}

impl JailError {
    /// Map a raw OS error onto a caller-distinguishable kind, attaching the
    /// relative path.
    ///
    /// `ELOOP` (a refused symlink) and `EXDEV` (a resolution that left the
    /// anchor subtree under `RESOLVE_BENEATH`) both mean the path tried to
    /// leave the jail; the two backends report escapes through these two
    /// different codes.
    pub(crate) fn from_errno(err: io::Error, path: &JailPath) -> Self {
        Self::from_errno_at(err, path.report())
    }

    pub(crate) fn from_errno_at(err: io::Error, path: PathBuf) -> Self {
        match err.raw_os_error() {
            Some(libc::ELOOP | libc::EXDEV) => Self::PathEscape { path },
            Some(libc::ENOENT) => Self::NotFound { path },
            Some(libc::EEXIST) => Self::AlreadyExists { path },
            Some(libc::EACCES | libc::EPERM) => Self::PermissionDenied { path },
            Some(libc::EISDIR) => Self::IsADirectory { path },
            Some(libc::ENOTDIR) => Self::NotADirectory { path },
            Some(libc::EINVAL) => Self::InvalidArgument {
                path,
                reason: "rejected by the kernel".to_string(),
            },
            _ => Self::Io { path, source: err },
        }
    }
}
