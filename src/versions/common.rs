//! Handlers shared by every protocol version.

use std::ffi::OsStr;
use std::os::fd::AsFd;
use std::os::unix::ffi::OsStrExt;

use log::debug;
use nix::dir::Dir;
use nix::fcntl::OFlag;
use nix::sys::stat::{self, Mode};
use nix::unistd;

use crate::attrs::{self, Attributes};
use crate::fsops;
use crate::handles::HandleFlags;
use crate::realpath::{self, RealpathFlags};
use crate::server::SftpRequest;
use crate::status::{HandlerResult, Outcome, SftpError, Status};
use crate::wire::abi::*;

/// `SSH_FXP_INIT` arriving after negotiation has already happened.
pub(crate) fn sftp_already_init(_req: &mut SftpRequest<'_>) -> HandlerResult {
    Err(Status::Failure.into())
}

pub(crate) fn sftp_close(req: &mut SftpRequest<'_>) -> HandlerResult {
    let handle = req.parse_handle()?;
    debug!("sftp_close {handle:?}");
    req.server.handles.close(handle)?;
    Ok(Outcome::Success)
}

pub(crate) fn sftp_read(req: &mut SftpRequest<'_>) -> HandlerResult {
    let handle = req.parse_handle()?;
    let offset = req.input.u64()?;
    let len = req.input.u32()?.min(req.server.config.max_read) as usize;
    debug!("sftp_read {handle:?} offset {offset} len {len}");
    let (fd, flags) = req.server.handles.file(handle).map_err(SftpError::Status)?;
    let buf = req.arena.alloc(len);
    let n = if flags.contains(HandleFlags::TEXT) {
        // Text handles read from the current position; the supplied offset
        // is ignored by protocol contract.
        unistd::read(fd.as_fd(), buf)?
    } else {
        nix::sys::uio::pread(fd.as_fd(), buf, offset as libc::off_t)?
    };
    if n == 0 && len > 0 {
        return Err(Status::Eof.into());
    }
    // Short reads are fine; they mean neither error nor EOF.
    req.data_reply(&buf[..n])
}

pub(crate) fn sftp_write(req: &mut SftpRequest<'_>) -> HandlerResult {
    let handle = req.parse_handle()?;
    let offset = req.input.u64()?;
    let data = req.parse_string()?;
    debug!("sftp_write {handle:?} offset {} len {}", offset, data.len());
    let (fd, flags) = req.server.handles.file(handle).map_err(SftpError::Status)?;
    let mut written = 0usize;
    while written < data.len() {
        let n = if flags.intersects(HandleFlags::APPEND | HandleFlags::TEXT) {
            // O_APPEND makes the kernel place the write; the offset is
            // ignored.
            unistd::write(fd.as_fd(), &data[written..])?
        } else {
            nix::sys::uio::pwrite(
                fd.as_fd(),
                &data[written..],
                (offset + written as u64) as libc::off_t,
            )?
        };
        if n == 0 {
            return Err(nix::errno::Errno::EIO.into());
        }
        written += n;
    }
    Ok(Outcome::Success)
}

pub(crate) fn sftp_opendir(req: &mut SftpRequest<'_>) -> HandlerResult {
    let path = req.parse_path()?;
    debug!("sftp_opendir {path:?}");
    let dir = Dir::open(&path, OFlag::O_RDONLY | OFlag::O_DIRECTORY, Mode::empty())?;
    let handle = req.server.handles.new_dir(dir, &path)?;
    req.handle_reply(handle)
}

pub(crate) fn sftp_readdir(req: &mut SftpRequest<'_>) -> HandlerResult {
    let handle = req.parse_handle()?;
    let (dir, dirpath) = req.server.handles.dir(handle).map_err(SftpError::Status)?;
    let mut names: Vec<Attributes> = Vec::new();
    {
        let mut dir = dir.lock().unwrap();
        let mut iter = dir.iter();
        while names.len() < req.server.config.max_names {
            let Some(entry) = iter.next() else { break };
            let entry = entry?;
            let name = OsStr::from_bytes(entry.file_name().to_bytes()).to_os_string();
            let full = dirpath.join(&name);
            let mut a = match stat::lstat(&full) {
                Ok(st) => attrs::stat_to_attrs(&st, AttrMask::all(), Some(full.as_path())),
                // The entry may have vanished; report the bare name.
                Err(_) => Attributes::default(),
            };
            a.name = name;
            if req.proto.version == 3 && a.file_type == SSH_FILEXFER_TYPE_SYMLINK {
                // The v3 longname shows "name -> target".
                a.target =
                    realpath::read_link_capped(full.as_os_str(), req.server.config.readlink_max)
                        .ok();
            }
            names.push(a);
        }
    }
    debug!("sftp_readdir {handle:?} -> {} entries", names.len());
    if names.is_empty() {
        return Err(Status::Eof.into());
    }
    req.names_reply(&names)
}

pub(crate) fn sftp_remove(req: &mut SftpRequest<'_>) -> HandlerResult {
    req.check_writable()?;
    let path = req.parse_path()?;
    debug!("sftp_remove {path:?}");
    unistd::unlink(&path)?;
    Ok(Outcome::Success)
}

pub(crate) fn sftp_mkdir(req: &mut SftpRequest<'_>) -> HandlerResult {
    req.check_writable()?;
    let path = req.parse_path()?;
    let attrs = req.parse_attrs()?;
    let mode = if attrs.valid.contains(AttrMask::PERMISSIONS) {
        attrs.permissions & 0o777
    } else {
        0o755
    };
    debug!("sftp_mkdir {path:?} mode {mode:o}");
    unistd::mkdir(&path, Mode::from_bits_truncate(mode as libc::mode_t))?;
    Ok(Outcome::Success)
}

pub(crate) fn sftp_rmdir(req: &mut SftpRequest<'_>) -> HandlerResult {
    req.check_writable()?;
    let path = req.parse_path()?;
    debug!("sftp_rmdir {path:?}");
    fsops::rmdir(&path)?;
    Ok(Outcome::Success)
}

/// `SSH_FXP_REALPATH` for v3-v5: lexical canonicalization only, no
/// filesystem access and no symlink chasing.
pub(crate) fn sftp_v345_realpath(req: &mut SftpRequest<'_>) -> HandlerResult {
    let path = req.parse_path()?;
    let resolved = realpath::find_realpath(
        path.as_os_str(),
        RealpathFlags::empty(),
        req.server.config.link_depth,
        req.server.config.readlink_max,
    )?;
    debug!("sftp_realpath {path:?} -> {resolved:?}");
    let a = Attributes {
        name: resolved.into_os_string(),
        ..Attributes::default()
    };
    req.names_reply(&[a])
}

pub(crate) fn sftp_readlink(req: &mut SftpRequest<'_>) -> HandlerResult {
    let path = req.parse_path()?;
    let target = realpath::read_link_capped(path.as_os_str(), req.server.config.readlink_max)?;
    debug!("sftp_readlink {path:?} -> {target:?}");
    let a = Attributes {
        name: target,
        ..Attributes::default()
    };
    req.names_reply(&[a])
}

/// `SSH_FXP_SYMLINK` for v3-v5. The drafts never pinned the argument
/// order down and OpenSSH historically had it reversed; the order in use
/// is advertised in the VERSION reply and flipped by
/// `Config::reverse_symlink`.
pub(crate) fn sftp_symlink(req: &mut SftpRequest<'_>) -> HandlerResult {
    req.check_writable()?;
    let first = req.parse_path()?;
    let second = req.parse_path()?;
    let (linkpath, targetpath) = if req.server.config.reverse_symlink {
        (second, first)
    } else {
        (first, second)
    };
    debug!("sftp_symlink {linkpath:?} -> {targetpath:?}");
    fsops::symlink(&targetpath, &linkpath)?;
    Ok(Outcome::Success)
}

pub(crate) fn sftp_setstat(req: &mut SftpRequest<'_>) -> HandlerResult {
    req.check_writable()?;
    let path = req.parse_path()?;
    let attrs = req.parse_attrs()?;
    debug!("sftp_setstat {path:?} valid {:?}", attrs.valid);
    attrs::set_status(&path, &attrs)?;
    Ok(Outcome::Success)
}

pub(crate) fn sftp_fsetstat(req: &mut SftpRequest<'_>) -> HandlerResult {
    req.check_writable()?;
    let handle = req.parse_handle()?;
    let attrs = req.parse_attrs()?;
    debug!("sftp_fsetstat {handle:?} valid {:?}", attrs.valid);
    let (fd, _) = req.server.handles.file(handle).map_err(SftpError::Status)?;
    attrs::set_fstatus(fd.as_fd(), &attrs)?;
    Ok(Outcome::Success)
}

/// `SSH_FXP_EXTENDED`: route by extension name through the negotiated
/// version's table.
pub(crate) fn sftp_extended(req: &mut SftpRequest<'_>) -> HandlerResult {
    let name = req.parse_string()?;
    debug!("extension {:?}", String::from_utf8_lossy(name));
    match req.proto.extension(name) {
        Some(handler) => handler(req),
        None => Err(Status::OpUnsupported.into()),
    }
}
