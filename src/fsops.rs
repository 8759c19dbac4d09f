//! Thin libc wrappers.
//!
//! The handful of calls used here either have no `nix` wrapper (`rmdir`,
//! `futimes`) or sit behind `*at` signatures that keep shifting between
//! `nix` releases; going straight to libc with an [`Errno::result`] check
//! keeps the call sites flat. Everything returns `nix::Result` so errors
//! flow into the status mapper unchanged.

use std::ffi::CString;
use std::os::fd::{AsRawFd, BorrowedFd, IntoRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use nix::errno::Errno;

fn cstr(path: &Path) -> nix::Result<CString> {
    // An interior NUL cannot name anything on a POSIX filesystem.
    CString::new(path.as_os_str().as_bytes()).map_err(|_| Errno::EINVAL)
}

pub fn rename(old: &Path, new: &Path) -> nix::Result<()> {
    let (old, new) = (cstr(old)?, cstr(new)?);
    Errno::result(unsafe { libc::rename(old.as_ptr(), new.as_ptr()) }).map(drop)
}

pub fn hard_link(existing: &Path, new: &Path) -> nix::Result<()> {
    let (existing, new) = (cstr(existing)?, cstr(new)?);
    Errno::result(unsafe { libc::link(existing.as_ptr(), new.as_ptr()) }).map(drop)
}

pub fn symlink(target: &Path, link: &Path) -> nix::Result<()> {
    let (target, link) = (cstr(target)?, cstr(link)?);
    Errno::result(unsafe { libc::symlink(target.as_ptr(), link.as_ptr()) }).map(drop)
}

pub fn rmdir(path: &Path) -> nix::Result<()> {
    let path = cstr(path)?;
    Errno::result(unsafe { libc::rmdir(path.as_ptr()) }).map(drop)
}

/// Close an owned descriptor, reporting the OS error instead of swallowing
/// it the way `Drop` would.
pub fn close(fd: OwnedFd) -> nix::Result<()> {
    Errno::result(unsafe { libc::close(fd.into_raw_fd()) }).map(drop)
}

pub fn truncate(path: &Path, size: u64) -> nix::Result<()> {
    let path = cstr(path)?;
    Errno::result(unsafe { libc::truncate(path.as_ptr(), size as libc::off_t) }).map(drop)
}

pub fn ftruncate(fd: BorrowedFd<'_>, size: u64) -> nix::Result<()> {
    Errno::result(unsafe { libc::ftruncate(fd.as_raw_fd(), size as libc::off_t) }).map(drop)
}

/// `chown` without following symlinks. `None` leaves that id unchanged.
pub fn lchown(path: &Path, uid: Option<u32>, gid: Option<u32>) -> nix::Result<()> {
    let path = cstr(path)?;
    let uid = uid.unwrap_or(libc::uid_t::MAX);
    let gid = gid.unwrap_or(libc::gid_t::MAX);
    Errno::result(unsafe { libc::lchown(path.as_ptr(), uid, gid) }).map(drop)
}

pub fn fchown(fd: BorrowedFd<'_>, uid: Option<u32>, gid: Option<u32>) -> nix::Result<()> {
    let uid = uid.unwrap_or(libc::uid_t::MAX);
    let gid = gid.unwrap_or(libc::gid_t::MAX);
    Errno::result(unsafe { libc::fchown(fd.as_raw_fd(), uid, gid) }).map(drop)
}

pub fn chmod(path: &Path, mode: u32) -> nix::Result<()> {
    let path = cstr(path)?;
    Errno::result(unsafe { libc::chmod(path.as_ptr(), mode as libc::mode_t) }).map(drop)
}

pub fn fchmod(fd: BorrowedFd<'_>, mode: u32) -> nix::Result<()> {
    Errno::result(unsafe { libc::fchmod(fd.as_raw_fd(), mode as libc::mode_t) }).map(drop)
}

/// Timestamps as (seconds, microseconds) pairs.
pub type FileTime = (i64, i64);

fn timevals(atime: FileTime, mtime: FileTime) -> [libc::timeval; 2] {
    [
        libc::timeval {
            tv_sec: atime.0 as libc::time_t,
            tv_usec: atime.1 as libc::suseconds_t,
        },
        libc::timeval {
            tv_sec: mtime.0 as libc::time_t,
            tv_usec: mtime.1 as libc::suseconds_t,
        },
    ]
}

pub fn utimes(path: &Path, atime: FileTime, mtime: FileTime) -> nix::Result<()> {
    let path = cstr(path)?;
    let times = timevals(atime, mtime);
    Errno::result(unsafe { libc::utimes(path.as_ptr(), times.as_ptr()) }).map(drop)
}

pub fn futimes(fd: BorrowedFd<'_>, atime: FileTime, mtime: FileTime) -> nix::Result<()> {
    let times = timevals(atime, mtime);
    Errno::result(unsafe { libc::futimes(fd.as_raw_fd(), times.as_ptr()) }).map(drop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt as _;

    #[test]
    fn interior_nul_is_rejected() {
        let bad = Path::new(OsStr::from_bytes(b"a\0b"));
        assert_eq!(rmdir(bad), Err(Errno::EINVAL));
    }

    #[test]
    fn rename_and_rmdir() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::create_dir(&a).unwrap();
        rename(&a, &b).unwrap();
        assert!(b.is_dir());
        rmdir(&b).unwrap();
        assert!(!b.exists());
        assert_eq!(rmdir(&b), Err(Errno::ENOENT));
    }
}
