//! Descriptor-leak check: after any operation returns, no transient
//! descriptor opened by that operation remains open.
//!
//! Kept in its own test binary so nothing else in the process opens or
//! closes descriptors while we count `/proc/self/fd`.

use std::fs;
use std::os::unix::fs::symlink;

use burrow_core::{Backend, Jail, JailSpec};
use tempfile::TempDir;

fn open_fd_count() -> usize {
    fs::read_dir("/proc/self/fd").unwrap().count()
}

#[test]
fn operations_release_every_transient_descriptor() {
    // Force the one-time backend probe before taking the baseline.
    let _ = Backend::detect();

    let dir = TempDir::new().unwrap();
    let outside = TempDir::new().unwrap();

    let mut backends = vec![Backend::Walking];
    if Backend::detect() == Backend::ResolveBeneath {
        backends.push(Backend::ResolveBeneath);
    }
    for backend in backends {
        let root = dir.path().join(format!("jail-{backend:?}"));
        fs::create_dir(&root).unwrap();
        symlink(outside.path(), root.join("evil")).unwrap();

        let jail = Jail::with_backend(&JailSpec::new(&root), backend).unwrap();
        let baseline = open_fd_count();

        for round in 0..32 {
            // Success paths.
            jail.mkdir_all("a/b/c", 0o755).unwrap();
            drop(
                jail.open_file("a/b/c/f", libc::O_CREAT | libc::O_WRONLY, 0o644)
                    .unwrap(),
            );
            jail.stat("a/b/c/f").unwrap();
            jail.read_dir("a/b").unwrap();
            jail.rename("a/b/c/f", "a/g").unwrap();
            jail.glob("a/*").unwrap();
            jail.remove("a/g").unwrap();
            jail.remove_all("a").unwrap();

            // Error paths.
            let _ = jail.open("missing/nested/file");
            let _ = jail.open("../escape");
            let _ = jail.open("evil/anything");
            let _ = jail.mkdir("evil", 0o755);
            let _ = jail.read_dir("missing");
            let _ = jail.remove("missing");
            let _ = jail.remove_all("missing");
            let _ = jail.rename("missing", "elsewhere");

            assert_eq!(
                open_fd_count(),
                baseline,
                "descriptor leak after round {round} on {backend:?}"
            );
        }

        jail.close();
    }
}
