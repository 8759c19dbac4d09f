//! Extension request handlers, routed by name through `SSH_FXP_EXTENDED`.

use std::os::fd::AsFd;

use log::debug;
use nix::sys::statvfs::{FsFlags, statvfs};
use nix::unistd::{self, Whence};

use crate::fsops;
use crate::server::SftpRequest;
use crate::status::{HandlerResult, Outcome, SftpError, Status};
use crate::wire::abi::*;

/// `posix-rename@openssh.org`: plain overwriting rename.
pub(crate) fn sftp_posix_rename(req: &mut SftpRequest<'_>) -> HandlerResult {
    req.check_writable()?;
    let oldpath = req.parse_path()?;
    let newpath = req.parse_path()?;
    debug!("sftp_posix_rename {oldpath:?} {newpath:?}");
    fsops::rename(&oldpath, &newpath)?;
    Ok(Outcome::Success)
}

/// `hardlink@openssh.com`: create a hard link to an existing file.
pub(crate) fn sftp_hardlink(req: &mut SftpRequest<'_>) -> HandlerResult {
    req.check_writable()?;
    let existing = req.parse_path()?;
    let newpath = req.parse_path()?;
    debug!("sftp_hardlink {existing:?} {newpath:?}");
    fsops::hard_link(&existing, &newpath)?;
    Ok(Outcome::Success)
}

/// `statvfs@openssh.org`: filesystem statistics, every field as u64.
pub(crate) fn sftp_statvfs(req: &mut SftpRequest<'_>) -> HandlerResult {
    let path = req.parse_path()?;
    debug!("sftp_statvfs {path:?}");
    let vfs = statvfs(&path)?;
    let mut flags = 0u64;
    if vfs.flags().contains(FsFlags::ST_RDONLY) {
        flags |= SSH_FXE_STATVFS_ST_RDONLY;
    }
    if vfs.flags().contains(FsFlags::ST_NOSUID) {
        flags |= SSH_FXE_STATVFS_ST_NOSUID;
    }
    req.reply_begin(SSH_FXP_EXTENDED_REPLY);
    req.out.u64(vfs.block_size() as u64);
    req.out.u64(vfs.fragment_size() as u64);
    req.out.u64(vfs.blocks() as u64);
    req.out.u64(vfs.blocks_free() as u64);
    req.out.u64(vfs.blocks_available() as u64);
    req.out.u64(vfs.files() as u64);
    req.out.u64(vfs.files_free() as u64);
    req.out.u64(vfs.files_available() as u64);
    req.out.u64(vfs.filesystem_id() as u64);
    req.out.u64(flags);
    req.out.u64(vfs.name_max() as u64);
    req.reply_end()?;
    Ok(Outcome::Responded)
}

/// `space-available`: capacity figures derived from statvfs.
/// bytes-available-to-user is unknowable here and reported as 0.
pub(crate) fn sftp_space_available(req: &mut SftpRequest<'_>) -> HandlerResult {
    let path = req.parse_path()?;
    debug!("sftp_space_available {path:?}");
    let vfs = statvfs(&path)?;
    let frsize = vfs.fragment_size() as u64;
    req.reply_begin(SSH_FXP_EXTENDED_REPLY);
    // bytes-on-device
    req.out.u64(frsize * vfs.blocks() as u64);
    // unused-bytes-on-device
    req.out.u64(frsize * vfs.blocks_free() as u64);
    // bytes-available-to-user
    req.out.u64(0);
    // unused-bytes-available-to-user
    req.out.u64(frsize * vfs.blocks_available() as u64);
    // bytes-per-allocation-unit
    req.out.u32(vfs.fragment_size() as u32);
    req.reply_end()?;
    Ok(Outcome::Responded)
}

/// `text-seek`: position a handle at the start of line N by scanning for
/// newlines from the top of the file.
pub(crate) fn sftp_text_seek(req: &mut SftpRequest<'_>) -> HandlerResult {
    let handle = req.parse_handle()?;
    let line = req.input.u64()?;
    debug!("sftp_text_seek {handle:?} line {line}");
    let (fd, _) = req.server.handles.file(handle).map_err(SftpError::Status)?;
    unistd::lseek(fd.as_fd(), 0, Whence::SeekSet)?;
    if line == 0 {
        return Ok(Outcome::Success);
    }
    let buf = req.arena.alloc(8192);
    let mut remaining = line;
    loop {
        let n = unistd::read(fd.as_fd(), buf)?;
        if n == 0 {
            // Asked for a line beyond the end of the file.
            return Err(Status::Eof.into());
        }
        let mut pos = 0;
        while remaining > 0 {
            match memchr::memchr(b'\n', &buf[pos..n]) {
                Some(off) => {
                    pos += off + 1;
                    remaining -= 1;
                }
                None => break,
            }
        }
        if remaining == 0 {
            // Rewind to just after the newline that ended line N-1.
            unistd::lseek(fd.as_fd(), pos as libc::off_t - n as libc::off_t, Whence::SeekCur)?;
            return Ok(Outcome::Success);
        }
    }
}
