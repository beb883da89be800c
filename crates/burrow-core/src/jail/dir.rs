//! Batched directory-entry reading from an open descriptor.
//!
//! Entries come back in the order the kernel returns them; no sort is ever
//! applied. Entry types are taken from `d_type` when the filesystem
//! provides one, with an `fstatat(2)` (no-follow) fallback for
//! `DT_UNKNOWN`.

use std::ffi::{CStr, OsStr, OsString};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, IntoRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;

/// The inode type of a directory entry, as reported without following
/// symbolic links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum EntryKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link (the link itself, never its target).
    Symlink,
    /// Named pipe.
    Fifo,
    /// Unix socket.
    Socket,
    /// Block device node.
    BlockDevice,
    /// Character device node.
    CharDevice,
    /// Anything the kernel would not identify.
    Other,
}

impl EntryKind {
    fn from_mode(mode: libc::mode_t) -> Self {
        match mode & libc::S_IFMT {
            libc::S_IFREG => Self::File,
            libc::S_IFDIR => Self::Directory,
            libc::S_IFLNK => Self::Symlink,
            libc::S_IFIFO => Self::Fifo,
            libc::S_IFSOCK => Self::Socket,
            libc::S_IFBLK => Self::BlockDevice,
            libc::S_IFCHR => Self::CharDevice,
            _ => Self::Other,
        }
    }
}

/// One directory entry: a name and its inode type.
#[derive(Debug, Clone)]
pub struct DirEntry {
    name: OsString,
    kind: EntryKind,
}

impl DirEntry {
    /// The entry's file name (no directory part).
    #[must_use]
    pub fn name(&self) -> &OsStr {
        &self.name
    }

    /// The entry's inode type.
    #[must_use]
    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    /// `true` for directories. A symlink to a directory is not a directory.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// `true` for symbolic links.
    #[must_use]
    pub fn is_symlink(&self) -> bool {
        self.kind == EntryKind::Symlink
    }
}

/// Read every entry of the directory behind `fd`, in kernel order.
///
/// Consumes the descriptor: `fdopendir(3)` takes ownership of it and
/// `closedir(3)` releases it on every exit path. `.` and `..` are skipped.
#[allow(unsafe_code)]
pub(crate) fn read_entries(fd: OwnedFd) -> io::Result<Vec<DirEntry>> {
    let raw = fd.as_raw_fd();
    // SAFETY: `raw` is an open directory descriptor. On success fdopendir
    // owns it, so the OwnedFd must be forgotten; on failure ownership stays
    // with the OwnedFd, which closes it on drop.
    let dirp = unsafe { libc::fdopendir(raw) };
    if dirp.is_null() {
        return Err(io::Error::last_os_error());
    }
    let _ = fd.into_raw_fd();

    let result = collect_entries(dirp);

    // SAFETY: `dirp` is the stream fdopendir returned; closedir releases
    // both the stream and the underlying descriptor exactly once.
    unsafe {
        libc::closedir(dirp);
    }
    result
}

#[allow(unsafe_code)]
fn collect_entries(dirp: *mut libc::DIR) -> io::Result<Vec<DirEntry>> {
    // SAFETY: `dirp` is a live directory stream owned by the caller.
    let dirfd = unsafe { libc::dirfd(dirp) };
    let mut entries = Vec::new();

    loop {
        // readdir returns NULL both at end-of-stream and on error; errno
        // is the only way to tell the two apart.
        // SAFETY: writing errno and reading a dirent from a live stream.
        let entry = unsafe {
            *libc::__errno_location() = 0;
            libc::readdir(dirp)
        };
        if entry.is_null() {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(0) {
                return Ok(entries);
            }
            return Err(err);
        }

        // SAFETY: a non-NULL dirent from readdir is valid until the next
        // readdir call; d_name is NUL-terminated.
        let (name, d_type) = unsafe {
            (
                CStr::from_ptr((*entry).d_name.as_ptr()),
                (*entry).d_type,
            )
        };
        let bytes = name.to_bytes();
        if bytes == b"." || bytes == b".." {
            continue;
        }

        let kind = match d_type {
            libc::DT_REG => EntryKind::File,
            libc::DT_DIR => EntryKind::Directory,
            libc::DT_LNK => EntryKind::Symlink,
            libc::DT_FIFO => EntryKind::Fifo,
            libc::DT_SOCK => EntryKind::Socket,
            libc::DT_BLK => EntryKind::BlockDevice,
            libc::DT_CHR => EntryKind::CharDevice,
            _ => stat_kind(dirfd, name),
        };

        entries.push(DirEntry {
            name: OsStr::from_bytes(bytes).to_os_string(),
            kind,
        });
    }
}

/// `fstatat` fallback for filesystems that report `DT_UNKNOWN`, never
/// following symlinks. An entry that vanished between readdir and stat is
/// reported as [`EntryKind::Other`].
#[allow(unsafe_code)]
fn stat_kind(dirfd: libc::c_int, name: &CStr) -> EntryKind {
    // SAFETY: `dirfd` belongs to the live stream and `name` is
    // NUL-terminated; `st` is a zeroed buffer the kernel fills.
    let mut st: libc::stat = unsafe { mem::zeroed() };
    let rc = unsafe { libc::fstatat(dirfd, name.as_ptr(), &mut st, libc::AT_SYMLINK_NOFOLLOW) };
    if rc != 0 {
        return EntryKind::Other;
    }
    EntryKind::from_mode(st.st_mode)
}

#[cfg(test)]
mod tests {
    use std::fs::{self, File};
    use std::os::fd::OwnedFd;
    use std::os::unix::fs::symlink;

    use super::*;

    fn entries_of(dir: &std::path::Path) -> Vec<DirEntry> {
        let fd = OwnedFd::from(File::open(dir).unwrap());
        read_entries(fd).unwrap()
    }

    #[test]
    fn reads_names_and_kinds() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("file.txt"), b"x").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        symlink("file.txt", dir.path().join("link")).unwrap();

        let mut entries = entries_of(dir.path());
        entries.sort_by(|a, b| a.name().cmp(b.name()));

        let names: Vec<_> = entries.iter().map(|e| e.name().to_os_string()).collect();
        assert_eq!(names, ["file.txt", "link", "sub"]);
        assert_eq!(entries[0].kind(), EntryKind::File);
        assert_eq!(entries[1].kind(), EntryKind::Symlink);
        assert!(entries[2].is_dir());
    }

    #[test]
    fn symlink_to_directory_is_not_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("real")).unwrap();
        symlink("real", dir.path().join("alias")).unwrap();

        let entries = entries_of(dir.path());
        let alias = entries.iter().find(|e| e.name() == "alias").unwrap();
        assert!(alias.is_symlink());
        assert!(!alias.is_dir());
    }

    #[test]
    fn fifo_kind_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        nix::unistd::mkfifo(&dir.path().join("pipe"), nix::sys::stat::Mode::S_IRWXU).unwrap();

        let entries = entries_of(dir.path());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind(), EntryKind::Fifo);
    }

    #[test]
    fn empty_directory_has_no_entries() {
        let dir = tempfile::tempdir().unwrap();
        assert!(entries_of(dir.path()).is_empty());
    }
}
