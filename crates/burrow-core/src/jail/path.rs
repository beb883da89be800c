//! Lexical path normalisation for jail operations.
//!
//! Every caller-supplied path is reduced to a [`JailPath`] before any
//! syscall is issued: a relative path with no leading separator, no `.` or
//! `..` components, and no empty components. The empty path is the
//! distinguished value meaning "the jail root itself".
//!
//! Normalisation is purely lexical. A cleaned path that would still climb
//! above the root (a leading `..` component) is rejected here, so an escape
//! attempt never reaches the kernel.

use std::ffi::{CString, OsStr};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Component, Path, PathBuf};

use crate::jail::error::JailError;

/// A normalised, jail-relative path.
///
/// Produced only by [`JailPath::normalise`]; the containment engine treats
/// any other form as a programming error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct JailPath {
    inner: PathBuf,
}

impl JailPath {
    /// The jail root itself.
    pub(crate) fn root() -> Self {
        Self {
            inner: PathBuf::new(),
        }
    }

    /// Lexically clean `input` into a jail-relative path.
    ///
    /// Collapses `a/./b` to `a/b`, `a/b/../c` to `a/c`, and repeated
    /// separators to one; strips any leading separator; maps `.`, `/`, and
    /// the empty string to the root value. Absolute inputs are interpreted
    /// relative to the jail root, so `/etc/passwd` means `etc/passwd`.
    ///
    /// # Errors
    ///
    /// Returns [`JailError::PathEscape`] if the cleaned path still begins
    /// with `..`, i.e. the caller attempted to climb above the root.
    pub(crate) fn normalise(input: &Path) -> Result<Self, JailError> {
        let absolute = input.has_root();
        let mut stack: Vec<&OsStr> = Vec::new();

        for component in input.components() {
            match component {
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
                Component::Normal(name) => stack.push(name),
                Component::ParentDir => match stack.last() {
                    Some(last) if *last != OsStr::new("..") => {
                        stack.pop();
                    }
                    // `..` above an absolute root is a no-op, as the kernel
                    // treats `/..` as `/`.
                    _ if absolute => {}
                    _ => stack.push(OsStr::new("..")),
                },
            }
        }

        if stack.first().is_some_and(|first| *first == OsStr::new("..")) {
            let path: PathBuf = stack.iter().collect();
            return Err(JailError::PathEscape { path });
        }

        let mut inner = PathBuf::new();
        for name in stack {
            inner.push(name);
        }
        Ok(Self { inner })
    }

    /// `true` when this path names the jail root itself.
    pub(crate) fn is_root(&self) -> bool {
        self.inner.as_os_str().is_empty()
    }

    /// The path components, in order. Empty for the root.
    pub(crate) fn components(&self) -> impl Iterator<Item = &OsStr> {
        self.inner.components().filter_map(|c| match c {
            Component::Normal(name) => Some(name),
            _ => None,
        })
    }

    /// Split into the containing directory and the final component.
    ///
    /// Returns `None` for the root, which has no final component.
    pub(crate) fn split_parent(&self) -> Option<(Self, &OsStr)> {
        let leaf = self.inner.file_name()?;
        let parent = match self.inner.parent() {
            Some(p) => Self {
                inner: p.to_path_buf(),
            },
            None => Self::root(),
        };
        Some((parent, leaf))
    }

    /// Extend with one more component (already separator-free).
    pub(crate) fn child(&self, name: &OsStr) -> Self {
        Self {
            inner: self.inner.join(name),
        }
    }

    /// The relative form reported in errors and logs (`.` for the root).
    pub(crate) fn report(&self) -> PathBuf {
        if self.is_root() {
            PathBuf::from(".")
        } else {
            self.inner.clone()
        }
    }

    /// The whole path as a C string, for a single at-relative syscall.
    pub(crate) fn to_cstring(&self) -> io::Result<CString> {
        CString::new(self.inner.as_os_str().as_bytes())
            .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))
    }
}
