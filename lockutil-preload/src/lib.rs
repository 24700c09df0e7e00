//! `LD_PRELOAD` library that makes `O_CREAT | O_EXCL` safe on NFS.
//!
//! Install it with `LD_PRELOAD=/usr/lib/liblockutil_preload.so` (or list it
//! in `/etc/ld.so.preload`). Every exclusive create in a directory on a
//! network filesystem then goes through [`lockutil::shim::open_exclusive`].
//! All other opens reach the kernel unchanged through raw `openat` system
//! calls, so nothing here depends on the symbols being interposed.
//!
//! Set `LOCKUTIL_FORCE_EMULATION=1` to emulate on local filesystems too.

use libc::{c_char, c_int, mode_t};
use lockutil::shim::{ShimPolicy, open_exclusive};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::stat::Mode;
use std::cell::Cell;
use std::ffi::{CStr, CString, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::OnceLock;

thread_local! {
    static IN_SHIM: Cell<bool> = const { Cell::new(false) };
}

static POLICY: OnceLock<ShimPolicy> = OnceLock::new();

fn policy() -> ShimPolicy {
    *POLICY.get_or_init(ShimPolicy::from_env)
}

/// Marks the current thread as inside the emulation; nested opens pass
/// straight through.
struct ShimGuard;

impl ShimGuard {
    fn enter() -> Option<Self> {
        IN_SHIM
            .try_with(|active| {
                if active.get() {
                    None
                } else {
                    active.set(true);
                    Some(ShimGuard)
                }
            })
            .ok()
            .flatten()
    }
}

impl Drop for ShimGuard {
    fn drop(&mut self) {
        let _ = IN_SHIM.try_with(|active| active.set(false));
    }
}

unsafe fn raw_openat(dirfd: c_int, path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
    unsafe { libc::syscall(libc::SYS_openat, dirfd, path, flags, mode as libc::c_uint) as c_int }
}

unsafe fn set_errno(errno: Errno) {
    unsafe { *libc::__errno_location() = errno as c_int };
}

fn wants_exclusive_create(flags: c_int) -> bool {
    let both = libc::O_CREAT | libc::O_EXCL;
    flags & both == both
}

unsafe fn open_with(
    policy: ShimPolicy,
    dirfd: c_int,
    path: *const c_char,
    flags: c_int,
    mode: mode_t,
) -> c_int {
    if path.is_null() || !wants_exclusive_create(flags) {
        return unsafe { raw_openat(dirfd, path, flags, mode) };
    }

    let bytes = unsafe { CStr::from_ptr(path) }.to_bytes();
    // Relative to a real directory descriptor: we cannot name the directory.
    if dirfd != libc::AT_FDCWD && bytes.first() != Some(&b'/') {
        return unsafe { raw_openat(dirfd, path, flags, mode) };
    }

    let Some(_guard) = ShimGuard::enter() else {
        return unsafe { raw_openat(dirfd, path, flags, mode) };
    };

    let target = Path::new(OsStr::from_bytes(bytes));
    if !policy.applies(target) {
        return unsafe { raw_openat(dirfd, path, flags, mode) };
    }

    let result = open_exclusive(
        target,
        OFlag::from_bits_retain(flags),
        Mode::from_bits_retain(mode),
        |temp, flags, mode| {
            let temp = CString::new(temp.as_os_str().as_bytes()).map_err(|_| Errno::EINVAL)?;
            let fd = unsafe { raw_openat(libc::AT_FDCWD, temp.as_ptr(), flags.bits(), mode.bits()) };
            if fd < 0 { Err(Errno::last()) } else { Ok(fd) }
        },
    );

    match result {
        Ok(fd) => fd,
        Err(errno) => {
            unsafe { set_errno(errno) };
            -1
        }
    }
}

unsafe fn open_impl(dirfd: c_int, path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
    unsafe { open_with(policy(), dirfd, path, flags, mode) }
}

// The variadic mode argument is declared explicitly; on the supported
// targets it is passed like a fixed third argument.

#[cfg(not(test))]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn open(path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
    unsafe { open_impl(libc::AT_FDCWD, path, flags, mode) }
}

#[cfg(not(test))]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn open64(path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
    unsafe { open_impl(libc::AT_FDCWD, path, flags | libc::O_LARGEFILE, mode) }
}

#[cfg(not(test))]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn openat(
    dirfd: c_int,
    path: *const c_char,
    flags: c_int,
    mode: mode_t,
) -> c_int {
    unsafe { open_impl(dirfd, path, flags, mode) }
}

#[cfg(not(test))]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn openat64(
    dirfd: c_int,
    path: *const c_char,
    flags: c_int,
    mode: mode_t,
) -> c_int {
    unsafe { open_impl(dirfd, path, flags | libc::O_LARGEFILE, mode) }
}

#[cfg(not(test))]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn creat(path: *const c_char, mode: mode_t) -> c_int {
    unsafe {
        open_impl(
            libc::AT_FDCWD,
            path,
            libc::O_CREAT | libc::O_WRONLY | libc::O_TRUNC,
            mode,
        )
    }
}

#[cfg(not(test))]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn creat64(path: *const c_char, mode: mode_t) -> c_int {
    unsafe {
        open_impl(
            libc::AT_FDCWD,
            path,
            libc::O_CREAT | libc::O_WRONLY | libc::O_TRUNC | libc::O_LARGEFILE,
            mode,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io;
    use std::os::fd::AsRawFd;
    use tempfile::TempDir;

    fn c_path(path: &Path) -> CString {
        CString::new(path.as_os_str().as_bytes()).unwrap()
    }

    fn nfs_leftovers(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .starts_with(".nfs")
            })
            .count()
    }

    const EXCL: c_int = libc::O_CREAT | libc::O_EXCL | libc::O_WRONLY | libc::O_CLOEXEC;

    #[test]
    fn plain_open_passes_through() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("mbox");
        fs::write(&file, "mail").unwrap();
        let path = c_path(&file);

        let fd = unsafe {
            open_with(ShimPolicy::Always, libc::AT_FDCWD, path.as_ptr(), libc::O_RDONLY, 0)
        };
        assert!(fd >= 0);
        unsafe { libc::close(fd) };
    }

    #[test]
    fn forced_emulation_creates_exclusively() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("bob.lock");
        let path = c_path(&file);

        let fd = unsafe { open_with(ShimPolicy::Always, libc::AT_FDCWD, path.as_ptr(), EXCL, 0o644) };
        assert!(fd >= 0);
        unsafe { libc::close(fd) };
        assert!(file.exists());
        assert_eq!(nfs_leftovers(dir.path()), 0);

        let again =
            unsafe { open_with(ShimPolicy::Always, libc::AT_FDCWD, path.as_ptr(), EXCL, 0o644) };
        assert_eq!(again, -1);
        assert_eq!(io::Error::last_os_error().raw_os_error(), Some(libc::EEXIST));
        assert_eq!(nfs_leftovers(dir.path()), 0);
    }

    #[test]
    fn relative_open_under_a_directory_descriptor_passes_through() {
        let dir = TempDir::new().unwrap();
        let handle = fs::File::open(dir.path()).unwrap();
        let leaf = CString::new("bob.lock").unwrap();

        let fd = unsafe {
            open_with(ShimPolicy::Always, handle.as_raw_fd(), leaf.as_ptr(), EXCL, 0o644)
        };
        assert!(fd >= 0);
        unsafe { libc::close(fd) };
        assert!(dir.path().join("bob.lock").exists());
    }

    #[test]
    fn nested_calls_are_not_emulated_again() {
        let _outer = ShimGuard::enter().unwrap();
        assert!(ShimGuard::enter().is_none());
    }

    #[test]
    fn guard_is_released_on_drop() {
        drop(ShimGuard::enter().unwrap());
        assert!(ShimGuard::enter().is_some());
    }
}
