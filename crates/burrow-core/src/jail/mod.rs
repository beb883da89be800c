//! The jailed filesystem server.
//!
//! A [`Jail`] exposes a conventional file-and-directory API (open, stat,
//! read-dir, create, rename, remove, remove-tree, glob) while constraining
//! every operation to remain beneath a single pinned root directory,
//! regardless of the path expressions callers supply.
//!
//! # Security Model
//!
//! - **Capability anchoring**: the root directory is opened once at
//!   construction and every subsequent operation resolves relative to that
//!   descriptor, never to the root's textual name. Renaming or replacing
//!   the root path on the host after construction cannot redirect a jailed
//!   operation.
//! - **Lexical pre-screening**: caller paths are normalised before any
//!   syscall; a cleaned path that still climbs upward is rejected outright.
//! - **Kernel containment**: path resolution uses `openat2(2)` with
//!   `RESOLVE_BENEATH` where the kernel offers it, and a per-component
//!   `O_NOFOLLOW` walk everywhere else (see [`Backend`]).
//! - **Descriptor discipline**: every transient descriptor an operation
//!   opens is released before the operation returns, on success and on
//!   every error path.
//!
//! The API is synchronous and blocking; a `Jail` holds no mutable state
//! beyond the root descriptor, so it may be shared freely across threads.

mod backend;
mod dir;
mod error;
mod path;

use std::fs::{File, Metadata, OpenOptions};
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

pub use self::backend::Backend;
pub use self::dir::{DirEntry, EntryKind};
pub use self::error::JailError;
use self::path::JailPath;

/// Owner applied to inodes the jail creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOwner {
    /// Numeric user id.
    pub uid: u32,
    /// Numeric group id; `u32::MAX` is the kernel's "leave the group
    /// unchanged" chown sentinel.
    pub gid: u32,
}

/// Construction parameters for a [`Jail`], as carried in a workload
/// manifest.
///
/// The sentinel lives on `uid`: a negative `uid` disables ownership
/// propagation entirely. With a valid `uid`, a negative `gid` is forwarded
/// to the kernel as its own "leave the group unchanged" chown sentinel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JailSpec {
    /// Absolute host path of the directory to pin as the jail root.
    pub root: PathBuf,

    /// Owner for newly created inodes; `-1` disables ownership
    /// propagation.
    #[serde(default = "no_owner")]
    pub uid: i64,

    /// Group for newly created inodes; `-1` leaves the group unchanged.
    #[serde(default = "no_owner")]
    pub gid: i64,
}

const fn no_owner() -> i64 {
    -1
}

impl JailSpec {
    /// A spec rooted at `root` with ownership propagation disabled.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            uid: -1,
            gid: -1,
        }
    }

    /// The configured owner, or `None` when `uid` is the disabling
    /// sentinel.
    ///
    /// A negative `gid` on its own does not disable propagation: it maps
    /// to `(gid_t)-1`, which `fchown(2)` treats as "leave the group
    /// unchanged".
    #[must_use]
    pub fn owner(&self) -> Option<FileOwner> {
        let uid = u32::try_from(self.uid).ok()?;
        let gid = if self.gid < 0 {
            libc::gid_t::MAX
        } else {
            u32::try_from(self.gid).ok()?
        };
        Some(FileOwner { uid, gid })
    }
}

/// A pinned-root filesystem view.
///
/// All operations accept paths in host form (absolute or relative); they
/// are interpreted relative to the jail root after normalisation. See the
/// [module docs](self) for the containment guarantees.
#[derive(Debug)]
pub struct Jail {
    /// Retained only for reporting and [`Jail::shorten`]; resolution never
    /// consults it.
    root_path: PathBuf,
    root: OwnedFd,
    owner: Option<FileOwner>,
    backend: Backend,
}

impl Jail {
    /// Pin `spec.root` and return a jail anchored to it.
    ///
    /// The root directory is opened once, here; the descriptor stays valid
    /// for the jail's lifetime and is the only thing operations resolve
    /// against.
    ///
    /// # Errors
    ///
    /// Fails with the underlying error if the root cannot be opened as a
    /// directory; no jail is produced.
    pub fn new(spec: &JailSpec) -> Result<Self, JailError> {
        Self::with_backend(spec, Backend::detect())
    }

    /// Like [`Jail::new`] but with an explicitly chosen containment
    /// backend. Intended for parity testing and diagnostics; production
    /// callers want [`Backend::detect`].
    ///
    /// # Errors
    ///
    /// Fails with the underlying error if the root cannot be opened as a
    /// directory.
    pub fn with_backend(spec: &JailSpec, backend: Backend) -> Result<Self, JailError> {
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_DIRECTORY)
            .open(&spec.root)
            .map_err(|e| JailError::from_errno_at(e, spec.root.clone()))?;
        debug!(root = %spec.root.display(), ?backend, "jail anchored");
        Ok(Self {
            root_path: spec.root.clone(),
            root: OwnedFd::from(file),
            owner: spec.owner(),
            backend,
        })
    }

    /// The host path the jail was anchored at, for reporting and for
    /// handing to child processes as their working directory.
    #[must_use]
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// The containment backend in use.
    #[must_use]
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Release the root anchor.
    ///
    /// Consumes the jail, so operations on a closed jail are rejected at
    /// compile time. Dropping the jail has the same effect.
    pub fn close(self) {
        debug!(root = %self.root_path.display(), "jail closed");
    }

    /// Map an absolute host path back to its jail-relative form.
    ///
    /// Collaborators that run host APIs against [`Jail::root_path`] can use
    /// this to rewrite absolute paths out of the errors they report:
    /// `root_path` itself maps to `.`, paths beneath it to their relative
    /// suffix, anything else to `None`.
    #[must_use]
    pub fn shorten(&self, path: &Path) -> Option<PathBuf> {
        let rest = path.strip_prefix(&self.root_path).ok()?;
        if rest.as_os_str().is_empty() {
            Some(PathBuf::from("."))
        } else {
            Some(rest.to_path_buf())
        }
    }

    // -----------------------------------------------------------------------
    // Engine operations
    // -----------------------------------------------------------------------

    /// Open `path` with the given open flags and creation mode.
    ///
    /// The empty path (and `.` and `/`) names the jail root itself, which
    /// is reopened read-only regardless of `flags`. Without `O_CREAT` the
    /// mode is coerced to `0` so it cannot cause spurious permission
    /// differences. With `O_CREAT` and a configured owner, the opened
    /// inode's ownership is changed before the handle is returned, and a
    /// failure to do so is an error.
    ///
    /// # Errors
    ///
    /// [`JailError::PathEscape`] for any resolution that would leave the
    /// root, plus the usual kernel errors mapped per kind.
    pub fn open_file(
        &self,
        path: impl AsRef<Path>,
        flags: libc::c_int,
        mode: libc::mode_t,
    ) -> Result<File, JailError> {
        let jp = JailPath::normalise(path.as_ref())?;
        debug!(path = %jp.report().display(), flags, "open_file");
        let fd = self
            .open_relative(&jp, flags, mode)
            .map_err(|e| JailError::from_errno(e, &jp))?;
        if flags & libc::O_CREAT != 0 {
            if let Some(owner) = self.owner {
                backend::fchown_fd(fd.as_raw_fd(), owner.uid, owner.gid)
                    .map_err(|e| JailError::from_errno(e, &jp))?;
            }
        }
        Ok(File::from(fd))
    }

    /// Open `path` read-only.
    ///
    /// # Errors
    ///
    /// Same as [`Jail::open_file`].
    pub fn open(&self, path: impl AsRef<Path>) -> Result<File, JailError> {
        self.open_file(path, libc::O_RDONLY, 0)
    }

    /// Metadata for the inode at `path`.
    ///
    /// Implemented as a contained open followed by `fstat` on the handle,
    /// so the containment guarantee applies uniformly; there is no
    /// separate path-based stat.
    ///
    /// # Errors
    ///
    /// Same as [`Jail::open_file`].
    pub fn stat(&self, path: impl AsRef<Path>) -> Result<Metadata, JailError> {
        let jp = JailPath::normalise(path.as_ref())?;
        self.stat_norm(&jp)
    }

    /// All entries of the directory at `path`, in the order the kernel
    /// returned them.
    ///
    /// # Errors
    ///
    /// [`JailError::NotADirectory`] when `path` is not a directory, plus
    /// the errors of [`Jail::open_file`].
    pub fn read_dir(&self, path: impl AsRef<Path>) -> Result<Vec<DirEntry>, JailError> {
        let jp = JailPath::normalise(path.as_ref())?;
        debug!(path = %jp.report().display(), "read_dir");
        let fd = self
            .open_relative(&jp, libc::O_RDONLY | libc::O_DIRECTORY, 0)
            .map_err(|e| JailError::from_errno(e, &jp))?;
        dir::read_entries(fd).map_err(|e| JailError::from_errno(e, &jp))
    }

    /// Create the directory at `path` with the given mode.
    ///
    /// The parent is opened through the containment engine and the
    /// directory is created relative to it; with a configured owner the
    /// new directory's ownership is changed as well.
    ///
    /// # Errors
    ///
    /// [`JailError::AlreadyExists`] when `path` exists (including the jail
    /// root itself), plus the errors of [`Jail::open_file`] for the parent.
    pub fn mkdir(&self, path: impl AsRef<Path>, mode: libc::mode_t) -> Result<(), JailError> {
        let jp = JailPath::normalise(path.as_ref())?;
        self.mkdir_norm(&jp, mode)
    }

    /// Create `path` and every missing ancestor, `mkdir -p` style.
    ///
    /// An "already exists" result on any prefix is tolerated if the
    /// existing inode is a directory; the call succeeds only when every
    /// prefix exists as a directory at return time. Repeated invocation
    /// with the same arguments is idempotent.
    ///
    /// # Errors
    ///
    /// [`JailError::NotADirectory`] when a prefix exists as a
    /// non-directory, plus the errors of [`Jail::mkdir`].
    pub fn mkdir_all(&self, path: impl AsRef<Path>, mode: libc::mode_t) -> Result<(), JailError> {
        let jp = JailPath::normalise(path.as_ref())?;
        debug!(path = %jp.report().display(), "mkdir_all");
        let mut prefix = JailPath::root();
        for component in jp.components() {
            prefix = prefix.child(component);
            match self.mkdir_norm(&prefix, mode) {
                Ok(()) => {}
                Err(JailError::AlreadyExists { .. }) => {
                    if !self.stat_norm(&prefix)?.is_dir() {
                        return Err(JailError::NotADirectory {
                            path: prefix.report(),
                        });
                    }
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Atomically rename `source` to `target`.
    ///
    /// Both parent directories are opened through the containment engine
    /// and the kernel's `renameat` is issued against the two descriptors,
    /// so both operands resolve through the same root. Both descriptors
    /// are released on every exit path.
    ///
    /// # Errors
    ///
    /// [`JailError::InvalidArgument`] when either operand is the jail root,
    /// plus the errors of [`Jail::open_file`] for the parents.
    pub fn rename(
        &self,
        source: impl AsRef<Path>,
        target: impl AsRef<Path>,
    ) -> Result<(), JailError> {
        let src = JailPath::normalise(source.as_ref())?;
        let dst = JailPath::normalise(target.as_ref())?;
        let Some((src_parent, src_leaf)) = src.split_parent() else {
            return Err(root_operand_error(&src, "cannot rename the jail root"));
        };
        let Some((dst_parent, dst_leaf)) = dst.split_parent() else {
            return Err(root_operand_error(&dst, "cannot rename onto the jail root"));
        };
        debug!(
            source = %src.report().display(),
            target = %dst.report().display(),
            "rename"
        );

        let src_name = backend::cstr(src_leaf).map_err(|e| JailError::from_errno(e, &src))?;
        let dst_name = backend::cstr(dst_leaf).map_err(|e| JailError::from_errno(e, &dst))?;
        let src_dir = self.dir_handle(&src_parent)?;
        let dst_dir = self.dir_handle(&dst_parent)?;
        backend::rename_at(
            src_dir.as_raw_fd(),
            &src_name,
            dst_dir.as_raw_fd(),
            &dst_name,
        )
        .map_err(|e| JailError::from_errno(e, &src))
    }

    /// Remove the file, directory, or symlink at `path`.
    ///
    /// The target is opened once to learn whether it is a directory, then
    /// unlinked relative to its parent's descriptor. There is a benign
    /// race between the inspection and the unlink; containment holds
    /// regardless because both syscalls are anchored at the parent, and a
    /// type change in the window is absorbed by retrying the unlink with
    /// the other directory flag.
    ///
    /// # Errors
    ///
    /// [`JailError::InvalidArgument`] for the jail root, plus the errors of
    /// [`Jail::open_file`].
    pub fn remove(&self, path: impl AsRef<Path>) -> Result<(), JailError> {
        let jp = JailPath::normalise(path.as_ref())?;
        self.remove_norm(&jp)
    }

    /// Remove the directory at `path` and everything beneath it.
    ///
    /// Entries are drained depth-first. A symbolic link is never followed:
    /// link entries are unlinked in place, so a link pointing outside the
    /// jail is removed while its target is untouched.
    ///
    /// # Errors
    ///
    /// [`JailError::NotADirectory`] when `path` is not a directory,
    /// [`JailError::InvalidArgument`] for the jail root, plus the errors of
    /// [`Jail::open_file`].
    pub fn remove_all(&self, path: impl AsRef<Path>) -> Result<(), JailError> {
        let jp = JailPath::normalise(path.as_ref())?;
        if jp.is_root() {
            return Err(root_operand_error(&jp, "cannot remove the jail root"));
        }
        debug!(path = %jp.report().display(), "remove_all");
        self.remove_all_norm(&jp)
    }

    /// Names in the directory part of `pattern` whose final component
    /// matches the pattern's final component.
    ///
    /// The final component is a shell-style wildcard (`*`, `?`, character
    /// classes); the leading portion is a literal directory, with the
    /// empty directory part meaning the jail root. Matching is
    /// filename-only and non-recursive; patterns crossing separators are
    /// not supported. Results come back in directory order.
    ///
    /// # Errors
    ///
    /// [`JailError::InvalidArgument`] for a malformed pattern, plus the
    /// errors of [`Jail::read_dir`] on the directory part.
    pub fn glob(&self, pattern: impl AsRef<Path>) -> Result<Vec<String>, JailError> {
        let jp = JailPath::normalise(pattern.as_ref())?;
        let Some((parent, leaf)) = jp.split_parent() else {
            return Err(JailError::InvalidArgument {
                path: jp.report(),
                reason: "pattern has no final component".to_string(),
            });
        };
        let base = leaf.to_str().ok_or_else(|| JailError::InvalidArgument {
            path: jp.report(),
            reason: "pattern is not valid UTF-8".to_string(),
        })?;
        let matcher = glob::Pattern::new(base).map_err(|e| JailError::InvalidArgument {
            path: jp.report(),
            reason: e.to_string(),
        })?;

        let entries = self.read_dir(parent.report())?;
        Ok(entries
            .iter()
            .filter_map(|e| e.name().to_str())
            .filter(|name| matcher.matches(name))
            .map(str::to_owned)
            .collect())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Contained open of an already-normalised path, at the errno level.
    fn open_relative(
        &self,
        jp: &JailPath,
        flags: libc::c_int,
        mode: libc::mode_t,
    ) -> io::Result<OwnedFd> {
        if jp.is_root() {
            return backend::reopen_root(self.root.as_fd());
        }
        // Without O_CREAT the mode is meaningless; zero it so it cannot
        // leak into the syscall.
        let mode = if flags & libc::O_CREAT == 0 { 0 } else { mode };
        match self.backend {
            Backend::ResolveBeneath => backend::open_beneath(self.root.as_fd(), jp, flags, mode),
            Backend::Walking => backend::open_walking(self.root.as_fd(), jp, flags, mode),
        }
    }

    fn stat_norm(&self, jp: &JailPath) -> Result<Metadata, JailError> {
        let fd = self
            .open_relative(jp, libc::O_RDONLY, 0)
            .map_err(|e| JailError::from_errno(e, jp))?;
        File::from(fd)
            .metadata()
            .map_err(|e| JailError::from_errno(e, jp))
    }

    fn mkdir_norm(&self, jp: &JailPath, mode: libc::mode_t) -> Result<(), JailError> {
        let Some((parent, leaf)) = jp.split_parent() else {
            // The root always exists; creating it is the same error as
            // creating any other existing directory.
            return Err(JailError::AlreadyExists { path: jp.report() });
        };
        debug!(path = %jp.report().display(), mode, "mkdir");
        let dir = self.dir_handle(&parent)?;
        let name = backend::cstr(leaf).map_err(|e| JailError::from_errno(e, jp))?;
        backend::mkdir_at(dir.as_raw_fd(), &name, mode)
            .map_err(|e| JailError::from_errno(e, jp))?;
        if let Some(owner) = self.owner {
            backend::fchown_at(dir.as_raw_fd(), &name, owner.uid, owner.gid)
                .map_err(|e| JailError::from_errno(e, jp))?;
        }
        Ok(())
    }

    fn remove_norm(&self, jp: &JailPath) -> Result<(), JailError> {
        let Some((parent, leaf)) = jp.split_parent() else {
            return Err(root_operand_error(jp, "cannot remove the jail root"));
        };
        debug!(path = %jp.report().display(), "remove");
        let dir = self.dir_handle(&parent)?;

        // One inspection open to pick the unlink flavour. ELOOP and EXDEV
        // here mean the leaf is a symlink (refused by the walking backend,
        // or pointing out of the jail under resolve-beneath); the link
        // itself is unlinked like any non-directory.
        let is_dir = match self.open_relative(jp, libc::O_RDONLY, 0) {
            Ok(fd) => {
                let st = backend::fstat_fd(&fd).map_err(|e| JailError::from_errno(e, jp))?;
                st.st_mode & libc::S_IFMT == libc::S_IFDIR
            }
            Err(e) if matches!(e.raw_os_error(), Some(libc::ELOOP | libc::EXDEV)) => false,
            Err(e) => return Err(JailError::from_errno(e, jp)),
        };

        let name = backend::cstr(leaf).map_err(|e| JailError::from_errno(e, jp))?;
        let flags = if is_dir { libc::AT_REMOVEDIR } else { 0 };
        match backend::unlink_at(dir.as_raw_fd(), &name, flags) {
            Ok(()) => Ok(()),
            // The inode changed type between inspection and unlink; the
            // containment anchor is unchanged, so just flip the flag.
            Err(e) if e.raw_os_error() == Some(libc::EISDIR) && flags == 0 => {
                backend::unlink_at(dir.as_raw_fd(), &name, libc::AT_REMOVEDIR)
                    .map_err(|e| JailError::from_errno(e, jp))
            }
            Err(e) if e.raw_os_error() == Some(libc::ENOTDIR) && flags == libc::AT_REMOVEDIR => {
                backend::unlink_at(dir.as_raw_fd(), &name, 0)
                    .map_err(|e| JailError::from_errno(e, jp))
            }
            Err(e) => Err(JailError::from_errno(e, jp)),
        }
    }

    fn remove_all_norm(&self, jp: &JailPath) -> Result<(), JailError> {
        let fd = self
            .open_relative(jp, libc::O_RDONLY | libc::O_DIRECTORY, 0)
            .map_err(|e| JailError::from_errno(e, jp))?;
        let entries = {
            let dup = fd.try_clone().map_err(|e| JailError::from_errno(e, jp))?;
            dir::read_entries(dup).map_err(|e| JailError::from_errno(e, jp))?
        };

        for entry in &entries {
            let child = jp.child(entry.name());
            if entry.is_dir() {
                self.remove_all_norm(&child)?;
            } else {
                // Files and symlinks alike: unlink in place, never
                // traverse.
                let name = backend::cstr(entry.name())
                    .map_err(|e| JailError::from_errno(e, &child))?;
                backend::unlink_at(fd.as_raw_fd(), &name, 0)
                    .map_err(|e| JailError::from_errno(e, &child))?;
            }
        }

        drop(fd);
        self.remove_norm(jp)
    }

    /// Descriptor for an already-normalised directory path: the root
    /// anchor itself (borrowed) when the path is empty, a contained open
    /// otherwise.
    fn dir_handle(&self, jp: &JailPath) -> Result<DirFd<'_>, JailError> {
        if jp.is_root() {
            return Ok(DirFd::Root(self.root.as_fd()));
        }
        self.open_relative(jp, libc::O_RDONLY | libc::O_DIRECTORY, 0)
            .map(DirFd::Opened)
            .map_err(|e| JailError::from_errno(e, jp))
    }
}

/// A directory descriptor that is either the borrowed root anchor or a
/// transient open owned by the current operation.
enum DirFd<'a> {
    Root(BorrowedFd<'a>),
    Opened(OwnedFd),
}

impl DirFd<'_> {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Self::Root(fd) => fd.as_raw_fd(),
            Self::Opened(fd) => fd.as_raw_fd(),
        }
    }
}

fn root_operand_error(jp: &JailPath, reason: &str) -> JailError {
    JailError::InvalidArgument {
        path: jp.report(),
        reason: reason.to_string(),
    }
}
