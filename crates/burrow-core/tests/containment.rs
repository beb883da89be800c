//! End-to-end containment scenarios, run against both backends.
//!
//! Every scenario executes once with the walking backend and once with the
//! resolve-beneath backend (when the kernel offers `openat2`), verifying
//! that the two are behaviourally equivalent: same outcomes, same error
//! kinds, modulo the syscall-level codes both map to the same kind.

use std::fs;
use std::io::Read;
use std::os::unix::fs::symlink;
use std::path::Path;

use burrow_core::{Backend, Jail, JailError, JailSpec};
use tempfile::TempDir;

fn backends() -> Vec<Backend> {
    let mut backends = vec![Backend::Walking];
    if Backend::detect() == Backend::ResolveBeneath {
        backends.push(Backend::ResolveBeneath);
    }
    backends
}

/// Run `scenario` once per available backend, each time against a fresh
/// jail root.
fn for_each_backend(scenario: impl Fn(&Jail, &Path)) {
    for backend in backends() {
        let dir = TempDir::new().unwrap();
        let jail = Jail::with_backend(&JailSpec::new(dir.path()), backend).unwrap();
        scenario(&jail, dir.path());
    }
}

fn is_escape_or_not_found(err: &JailError) -> bool {
    matches!(
        err,
        JailError::PathEscape { .. } | JailError::NotFound { .. }
    )
}

#[test]
fn dotdot_never_reaches_the_host() {
    for_each_backend(|jail, root| {
        let err = jail
            .open_file("../etc/passwd", libc::O_RDONLY, 0)
            .unwrap_err();
        assert!(
            matches!(err, JailError::PathEscape { .. }),
            "expected a path escape, got: {err}"
        );
        // The jail root is untouched.
        assert!(fs::read_dir(root).unwrap().next().is_none());
    });
}

#[test]
fn symlink_out_of_the_jail_is_not_followed() {
    for_each_backend(|jail, root| {
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("passwd"), b"root:x:0:0").unwrap();
        symlink(outside.path(), root.join("evil")).unwrap();

        let err = jail
            .open_file("evil/passwd", libc::O_RDONLY, 0)
            .unwrap_err();
        assert!(
            is_escape_or_not_found(&err),
            "expected escape or not-found, got: {err}"
        );

        // The target was never touched.
        assert_eq!(
            fs::read(outside.path().join("passwd")).unwrap(),
            b"root:x:0:0"
        );
    });
}

#[test]
fn relative_symlink_climbing_out_is_refused() {
    for_each_backend(|jail, root| {
        symlink("../../..", root.join("up")).unwrap();
        let err = jail.open_file("up/etc", libc::O_RDONLY, 0).unwrap_err();
        assert!(
            is_escape_or_not_found(&err),
            "expected escape or not-found, got: {err}"
        );
    });
}

#[test]
fn absolute_paths_are_rerooted_at_the_jail() {
    for_each_backend(|jail, root| {
        drop(
            jail.open_file("/abs.txt", libc::O_CREAT | libc::O_WRONLY, 0o644)
                .unwrap(),
        );
        assert!(root.join("abs.txt").is_file());
        assert!(jail.stat("abs.txt").unwrap().is_file());
    });
}

#[test]
fn mkdir_all_is_idempotent() {
    for_each_backend(|jail, _root| {
        jail.mkdir_all("a/b/c", 0o755).unwrap();
        jail.mkdir_all("a/b/c", 0o755).unwrap();
        assert!(jail.stat("a/b/c").unwrap().is_dir());
    });
}

#[test]
fn remove_all_drains_a_tree_and_spares_the_neighbours() {
    for_each_backend(|jail, root| {
        jail.mkdir_all("a/z", 0o755).unwrap();
        jail.mkdir("b", 0o755).unwrap();
        fs::write(root.join("a/x"), b"x").unwrap();
        fs::write(root.join("a/y"), b"y").unwrap();
        fs::write(root.join("a/z/w"), b"w").unwrap();

        jail.remove_all("a").unwrap();

        assert!(matches!(jail.stat("a"), Err(JailError::NotFound { .. })));
        assert!(jail.stat("b").unwrap().is_dir());
    });
}

#[test]
fn remove_all_unlinks_outside_symlinks_without_following_them() {
    for_each_backend(|jail, root| {
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("precious"), b"keep me").unwrap();

        jail.mkdir("doomed", 0o755).unwrap();
        fs::write(root.join("doomed/file"), b"x").unwrap();
        symlink(outside.path(), root.join("doomed/link_dir")).unwrap();
        symlink(outside.path().join("precious"), root.join("doomed/link_file")).unwrap();

        jail.remove_all("doomed").unwrap();

        assert!(matches!(
            jail.stat("doomed"),
            Err(JailError::NotFound { .. })
        ));
        // The links are gone; their targets are untouched.
        assert_eq!(fs::read(outside.path().join("precious")).unwrap(), b"keep me");
    });
}

#[test]
fn rename_is_atomic_between_jail_directories() {
    for_each_backend(|jail, root| {
        jail.mkdir("src", 0o755).unwrap();
        jail.mkdir("dst", 0o755).unwrap();
        fs::write(root.join("src/file"), b"payload").unwrap();

        jail.rename("src/file", "dst/file").unwrap();

        assert!(matches!(
            jail.stat("src/file"),
            Err(JailError::NotFound { .. })
        ));
        assert!(jail.stat("dst/file").unwrap().is_file());

        let mut content = String::new();
        jail.open("dst/file")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "payload");
    });
}

#[test]
fn glob_matches_only_the_requested_suffix() {
    for_each_backend(|jail, root| {
        jail.mkdir("dir", 0o755).unwrap();
        for name in ["a.txt", "b.log", "c.txt"] {
            fs::write(root.join("dir").join(name), b"x").unwrap();
        }

        let mut matched = jail.glob("dir/*.txt").unwrap();
        matched.sort();
        assert_eq!(matched, ["a.txt", "c.txt"]);
    });
}

#[test]
fn error_messages_never_contain_the_host_root() {
    for_each_backend(|jail, root| {
        symlink("/etc", root.join("evil")).unwrap();
        let host_root = root.to_string_lossy().into_owned();

        let failures = [
            jail.open("missing").unwrap_err(),
            jail.open("../up").unwrap_err(),
            jail.open("evil/passwd").unwrap_err(),
            jail.mkdir("evil", 0o755).unwrap_err(),
            jail.read_dir("missing").unwrap_err(),
            jail.remove("missing").unwrap_err(),
        ];
        for err in failures {
            let rendered = err.to_string();
            assert!(
                !rendered.contains(&host_root),
                "host root leaked through error: {rendered}"
            );
        }
    });
}

#[test]
fn backends_agree_on_a_shared_corpus() {
    fn kind(result: &Result<(), JailError>) -> String {
        match result {
            Ok(()) => "ok".to_string(),
            Err(JailError::PathEscape { .. }) => "path-escape".to_string(),
            Err(JailError::NotFound { .. }) => "not-found".to_string(),
            Err(JailError::AlreadyExists { .. }) => "already-exists".to_string(),
            Err(JailError::PermissionDenied { .. }) => "permission-denied".to_string(),
            Err(JailError::IsADirectory { .. }) => "is-directory".to_string(),
            Err(JailError::NotADirectory { .. }) => "not-directory".to_string(),
            Err(JailError::InvalidArgument { .. }) => "invalid-argument".to_string(),
            Err(other) => format!("io: {other}"),
        }
    }

    fn run_corpus(jail: &Jail, root: &Path) -> Vec<(&'static str, String)> {
        let outside = TempDir::new().unwrap();
        symlink(outside.path(), root.join("evil")).unwrap();
        fs::write(root.join("plain"), b"x").unwrap();
        fs::create_dir(root.join("dir")).unwrap();

        vec![
            ("open missing", kind(&jail.open("missing").map(drop))),
            ("open escape", kind(&jail.open("../../etc").map(drop))),
            (
                "open through symlink",
                kind(&jail.open("evil/anything").map(drop)),
            ),
            ("open file", kind(&jail.open("plain").map(drop))),
            ("mkdir existing", kind(&jail.mkdir("dir", 0o755))),
            (
                "read_dir on file",
                kind(&jail.read_dir("plain").map(drop)),
            ),
            ("remove missing", kind(&jail.remove("missing"))),
            (
                "stat nested missing",
                kind(&jail.stat("dir/none").map(drop)),
            ),
        ]
    }

    let all = backends();
    if all.len() < 2 {
        // Kernel without openat2: parity is vacuous here; the walking
        // corpus still runs in the scenarios above.
        return;
    }

    let mut outcomes = Vec::new();
    for backend in all {
        let dir = TempDir::new().unwrap();
        let jail = Jail::with_backend(&JailSpec::new(dir.path()), backend).unwrap();
        outcomes.push(run_corpus(&jail, dir.path()));
    }
    assert_eq!(outcomes[0], outcomes[1]);
}
