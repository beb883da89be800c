//! # burrow-core
//!
//! Jailed filesystem layer for multi-tenant workload roots.
//!
//! This crate provides the substrate a process manager uses to give each
//! managed workload a virtual root while still running in the host mount
//! namespace: a [`Jail`] pins one host directory at construction time and
//! exposes the usual file-and-directory operations (open, stat, read-dir,
//! create, rename, remove, remove-tree, glob), all constrained to remain
//! beneath that directory no matter what path expressions callers supply —
//! `..` hops, absolute paths, and symlinks pointing out of the jail
//! included.
//!
//! Containment rests on kernel primitives, not on path-string checks: the
//! root is held as a long-lived directory descriptor and every operation
//! resolves relative to it, via `openat2(2)` with `RESOLVE_BENEATH` where
//! available and a symlink-refusing component walk elsewhere. The target
//! platform is Linux.
//!
//! ## Example
//!
//! ```rust,no_run
//! use burrow_core::{Jail, JailSpec};
//!
//! # fn main() -> Result<(), burrow_core::JailError> {
//! let jail = Jail::new(&JailSpec::new("/srv/workloads/w1"))?;
//! jail.mkdir_all("saves/backups", 0o755)?;
//! let entries = jail.read_dir("saves")?;
//! # drop(entries);
//! jail.close();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(unsafe_code)]

pub mod jail;

pub use jail::{Backend, DirEntry, EntryKind, FileOwner, Jail, JailError, JailSpec};
