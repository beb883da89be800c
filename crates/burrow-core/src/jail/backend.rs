//! Containment backends and the raw syscall surface.
//!
//! Two interchangeable strategies open paths beneath the root anchor:
//!
//! 1. **Resolve-beneath**: a single `openat2(2)` call with
//!    `RESOLVE_BENEATH`, which makes the kernel fail the open if any
//!    component — symlinks included — would leave the anchor's subtree.
//! 2. **Walking**: a per-component `openat(2)` chain with
//!    `O_NOFOLLOW | O_PATH`, for kernels (or seccomp policies) without
//!    `openat2`. At most one intermediate descriptor is live at any
//!    instant; `OwnedFd` releases every descriptor on every exit path.
//!
//! The strategy is probed once per process and is stable thereafter.
//!
//! # Security
//!
//! Both strategies resolve exclusively against an already-open directory
//! descriptor. No operation in this module ever consults the root's
//! textual name, so a rename or symlink swap of the root path after
//! construction cannot redirect resolution.

use std::ffi::{CStr, CString, OsStr};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::sync::LazyLock;

use crate::jail::path::JailPath;

/// Process-wide `openat2(2)` availability, probed on first use.
///
/// A probe failure of any kind (`ENOSYS` on old kernels, `EPERM` from a
/// seccomp filter) selects the walking strategy.
static RESOLVE_BENEATH_SUPPORTED: LazyLock<bool> = LazyLock::new(probe_resolve_beneath);

/// Attempts to re-resolve a beneath-constrained open when the kernel
/// reports `EAGAIN` because it raced a concurrent rename.
const BENEATH_RETRIES: u32 = 4;

/// The containment strategy used by a [`Jail`](crate::jail::Jail).
///
/// Detected once per process; both backends enforce the same containment
/// guarantee and differ only in how `open` resolves paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Single-syscall resolution via `openat2(2)` with `RESOLVE_BENEATH`.
    ResolveBeneath,
    /// Per-component resolution with symlink-follow disabled.
    Walking,
}

impl Backend {
    /// The preferred backend for this kernel.
    #[must_use]
    pub fn detect() -> Self {
        if *RESOLVE_BENEATH_SUPPORTED {
            Self::ResolveBeneath
        } else {
            Self::Walking
        }
    }
}

/// Probe `openat2(2)` by opening the current directory beneath itself.
#[allow(unsafe_code)]
#[allow(clippy::cast_sign_loss)]
fn probe_resolve_beneath() -> bool {
    // SAFETY: a zeroed `open_how` is a valid, fully-initialised value;
    // all its fields are plain integers.
    let mut how: libc::open_how = unsafe { mem::zeroed() };
    how.flags = (libc::O_RDONLY | libc::O_CLOEXEC) as u64;
    how.mode = 0;
    how.resolve = libc::RESOLVE_BENEATH;
    // SAFETY: the path is a valid, NUL-terminated literal and `how` is a
    // properly initialised open_how of the size we report.
    let fd = unsafe {
        libc::syscall(
            libc::SYS_openat2,
            libc::AT_FDCWD,
            c".".as_ptr(),
            &how,
            mem::size_of::<libc::open_how>(),
        )
    };
    if fd < 0 {
        return false;
    }
    // SAFETY: the syscall returned a valid descriptor we now own.
    #[allow(clippy::cast_possible_truncation)]
    unsafe {
        libc::close(fd as libc::c_int);
    }
    true
}

/// Open `path` relative to `root` in a single beneath-constrained syscall.
///
/// The kernel fails the call with `EXDEV` if any component, symlinks
/// included, would resolve outside `root`'s subtree. `EAGAIN` (the kernel
/// detected a rename race mid-resolution) is retried a bounded number of
/// times.
#[allow(unsafe_code)]
#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
pub(crate) fn open_beneath(
    root: BorrowedFd<'_>,
    path: &JailPath,
    flags: libc::c_int,
    mode: libc::mode_t,
) -> io::Result<OwnedFd> {
    let c_path = path.to_cstring()?;
    // SAFETY: a zeroed `open_how` is a valid, fully-initialised value;
    // all its fields are plain integers.
    let mut how: libc::open_how = unsafe { mem::zeroed() };
    how.flags = (flags | libc::O_CLOEXEC) as u64;
    how.mode = u64::from(mode);
    how.resolve = libc::RESOLVE_BENEATH;

    for _ in 0..BENEATH_RETRIES {
        // SAFETY: `root` is an open directory descriptor, `c_path` is a
        // valid NUL-terminated string, and `how` is fully initialised with
        // the size we report. The returned descriptor is owned by us.
        let fd = unsafe {
            libc::syscall(
                libc::SYS_openat2,
                root.as_raw_fd(),
                c_path.as_ptr(),
                &how,
                mem::size_of::<libc::open_how>(),
            )
        };
        if fd >= 0 {
            // SAFETY: fd is a valid descriptor returned by the kernel;
            // ownership transfers to the OwnedFd.
            return Ok(unsafe { OwnedFd::from_raw_fd(fd as RawFd) });
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EAGAIN) {
            return Err(err);
        }
    }
    Err(io::Error::from_raw_os_error(libc::EAGAIN))
}

/// Open `path` relative to `root` one component at a time, never following
/// symlinks.
///
/// Each non-final component is opened with `O_NOFOLLOW | O_PATH` relative
/// to the previous descriptor; the previous intermediate is released as
/// soon as the next is obtained, so at most one transient descriptor is
/// live in addition to the root. The final component is opened with the
/// caller's flags plus `O_NOFOLLOW`.
///
/// A symlink encountered as an intermediate component is refused with
/// `ELOOP` (with `O_PATH | O_NOFOLLOW` the open would otherwise yield a
/// descriptor for the link itself rather than fail).
pub(crate) fn open_walking(
    root: BorrowedFd<'_>,
    path: &JailPath,
    flags: libc::c_int,
    mode: libc::mode_t,
) -> io::Result<OwnedFd> {
    let components: Vec<&OsStr> = path.components().collect();
    let Some((leaf, dirs)) = components.split_last() else {
        return Err(io::Error::from_raw_os_error(libc::EINVAL));
    };

    let mut current: Option<OwnedFd> = None;
    for component in dirs {
        let name = cstr(component)?;
        let dirfd = current.as_ref().map_or(root.as_raw_fd(), AsRawFd::as_raw_fd);
        let next = open_at(
            dirfd,
            &name,
            libc::O_NOFOLLOW | libc::O_PATH | libc::O_CLOEXEC,
            0,
        )?;
        let stat = fstat_fd(&next)?;
        match stat.st_mode & libc::S_IFMT {
            // A symlink opened as the link itself: refuse rather than let
            // the next openat step through it.
            libc::S_IFLNK => return Err(io::Error::from_raw_os_error(libc::ELOOP)),
            libc::S_IFDIR => {}
            _ => return Err(io::Error::from_raw_os_error(libc::ENOTDIR)),
        }
        // Replacing `current` drops the previous intermediate now that the
        // next one is held.
        current = Some(next);
    }

    let name = cstr(leaf)?;
    let dirfd = current.as_ref().map_or(root.as_raw_fd(), AsRawFd::as_raw_fd);
    open_at(
        dirfd,
        &name,
        flags | libc::O_NOFOLLOW | libc::O_CLOEXEC,
        mode,
    )
}

/// Reopen the root anchor itself, read-only, without touching its textual
/// name.
pub(crate) fn reopen_root(root: BorrowedFd<'_>) -> io::Result<OwnedFd> {
    open_at(
        root.as_raw_fd(),
        c".",
        libc::O_RDONLY | libc::O_CLOEXEC,
        0,
    )
}

// ---------------------------------------------------------------------------
// Raw syscall wrappers
// ---------------------------------------------------------------------------

/// A single component as a C string; embedded NUL bytes are a caller bug
/// surfaced as `EINVAL`.
pub(crate) fn cstr(name: &OsStr) -> io::Result<CString> {
    CString::new(name.as_bytes()).map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))
}

#[allow(unsafe_code)]
pub(crate) fn open_at(
    dirfd: RawFd,
    name: &CStr,
    flags: libc::c_int,
    mode: libc::mode_t,
) -> io::Result<OwnedFd> {
    // SAFETY: `dirfd` is an open descriptor held by the caller for the
    // duration of the call and `name` is NUL-terminated.
    let fd = unsafe { libc::openat(dirfd, name.as_ptr(), flags, mode) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fd is a valid descriptor returned by openat; ownership
    // transfers to the OwnedFd.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

#[allow(unsafe_code)]
pub(crate) fn fstat_fd(fd: &impl AsRawFd) -> io::Result<libc::stat> {
    // SAFETY: `st` is a zeroed stat buffer the kernel fills; the descriptor
    // is open for the duration of the call.
    let mut st: libc::stat = unsafe { mem::zeroed() };
    let rc = unsafe { libc::fstat(fd.as_raw_fd(), &mut st) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(st)
}

#[allow(unsafe_code)]
pub(crate) fn mkdir_at(dirfd: RawFd, name: &CStr, mode: libc::mode_t) -> io::Result<()> {
    // SAFETY: `dirfd` is open and `name` is NUL-terminated.
    let rc = unsafe { libc::mkdirat(dirfd, name.as_ptr(), mode) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[allow(unsafe_code)]
pub(crate) fn unlink_at(dirfd: RawFd, name: &CStr, flags: libc::c_int) -> io::Result<()> {
    // SAFETY: `dirfd` is open and `name` is NUL-terminated.
    let rc = unsafe { libc::unlinkat(dirfd, name.as_ptr(), flags) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[allow(unsafe_code)]
pub(crate) fn rename_at(
    src_dirfd: RawFd,
    src: &CStr,
    dst_dirfd: RawFd,
    dst: &CStr,
) -> io::Result<()> {
    // SAFETY: both descriptors are open and both names are NUL-terminated.
    let rc = unsafe { libc::renameat(src_dirfd, src.as_ptr(), dst_dirfd, dst.as_ptr()) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[allow(unsafe_code)]
pub(crate) fn fchown_fd(fd: RawFd, uid: libc::uid_t, gid: libc::gid_t) -> io::Result<()> {
    // SAFETY: the descriptor is open for the duration of the call.
    let rc = unsafe { libc::fchown(fd, uid, gid) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[allow(unsafe_code)]
pub(crate) fn fchown_at(
    dirfd: RawFd,
    name: &CStr,
    uid: libc::uid_t,
    gid: libc::gid_t,
) -> io::Result<()> {
    // SAFETY: `dirfd` is open and `name` is NUL-terminated. The link itself
    // is never followed, so the chown cannot be redirected.
    let rc = unsafe {
        libc::fchownat(
            dirfd,
            name.as_ptr(),
            uid,
            gid,
            libc::AT_SYMLINK_NOFOLLOW,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
