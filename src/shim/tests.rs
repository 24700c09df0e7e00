//! Tests for the exclusive-create emulation.

use super::*;
use std::fs;
use std::io::Write;
use tempfile::TempDir;

fn leftovers(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .filter(|name| name.starts_with(".nfs"))
        .collect()
}

fn plain_open(p: &Path, f: OFlag, m: Mode) -> nix::Result<RawFd> {
    nix::fcntl::open(p, f, m)
}

fn create_flags() -> OFlag {
    OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_WRONLY | OFlag::O_CLOEXEC
}

#[test]
fn temp_path_format() {
    let temp = temp_path(Path::new("/var/mail/bob.lock"), "mailhost", 42, 11);
    assert_eq!(temp, PathBuf::from("/var/mail/.nfsmailh00042b"));

    let bare = temp_path(Path::new("bob.lock"), "mx", 123456, 0);
    assert_eq!(bare, PathBuf::from(".nfsmx1234560"));
}

#[test]
fn emulated_create_leaves_only_the_target() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("inbox.lock");

    let fd = open_exclusive(&target, create_flags(), Mode::from_bits_truncate(0o600), plain_open)
        .unwrap();
    let mut file = unsafe { File::from_raw_fd(fd) };
    file.write_all(b"hello").unwrap();
    drop(file);

    assert_eq!(fs::read_to_string(&target).unwrap(), "hello");
    assert!(leftovers(dir.path()).is_empty());
}

#[test]
fn existing_target_yields_eexist_and_is_untouched() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("inbox.lock");
    fs::write(&target, "theirs").unwrap();

    let err = open_exclusive(&target, create_flags(), Mode::from_bits_truncate(0o600), plain_open)
        .unwrap_err();

    assert_eq!(err, Errno::EEXIST);
    assert_eq!(fs::read_to_string(&target).unwrap(), "theirs");
    assert!(leftovers(dir.path()).is_empty());
}

#[test]
fn raw_open_failure_is_returned() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("inbox.lock");

    let err = open_exclusive(&target, create_flags(), Mode::empty(), |_, _, _| {
        Err(Errno::EACCES)
    })
    .unwrap_err();

    assert_eq!(err, Errno::EACCES);
    assert!(!target.exists());
}

#[test]
fn missing_directory_reports_the_open_error() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("missing").join("inbox.lock");

    let err = open_exclusive(&target, create_flags(), Mode::from_bits_truncate(0o600), plain_open)
        .unwrap_err();

    assert_eq!(err, Errno::ENOENT);
}

#[test]
fn overlong_path_is_refused_before_touching_anything() {
    let long = PathBuf::from(format!("/tmp/{}", "x".repeat(PATH_MAX)));
    let mut opened = false;
    let err = open_exclusive(&long, create_flags(), Mode::empty(), |_, _, _| {
        opened = true;
        Err(Errno::EIO)
    })
    .unwrap_err();

    assert_eq!(err, Errno::ENAMETOOLONG);
    assert!(!opened);
}

#[test]
fn peer_temp_names_are_never_emulated() {
    assert!(!ShimPolicy::Always.applies(Path::new("/var/mail/.lk01234ahost")));
    assert!(!ShimPolicy::Always.applies(Path::new("/var/mail/_12345.bob")));
    assert!(ShimPolicy::Always.applies(Path::new("/var/mail/bob.lock")));
}

#[test]
fn local_filesystem_is_not_emulated_by_default() {
    let dir = TempDir::new().unwrap();
    if is_network_fs(dir.path()) {
        return;
    }
    assert!(!ShimPolicy::Auto.applies(&dir.path().join("bob.lock")));
}

#[test]
fn create_exclusive_in_both_modes() {
    let dir = TempDir::new().unwrap();

    for (policy, name) in [(ShimPolicy::Auto, "a.lock"), (ShimPolicy::Always, "b.lock")] {
        let target = dir.path().join(name);
        create_exclusive(&target, 0o644, policy).unwrap();
        assert!(target.exists());

        let err = create_exclusive(&target, 0o644, policy).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }
    assert!(leftovers(dir.path()).is_empty());
}
