//! v5/v6 OPEN and RENAME, and the generic open shared with v3/v4.

use std::os::fd::AsFd;
use std::path::Path;

use log::debug;
use nix::errno::Errno;
use nix::fcntl::{OFlag, open};
use nix::sys::stat::{self, Mode};
use nix::unistd;

use crate::attrs::{self, Attributes};
use crate::fsops;
use crate::handles::HandleFlags;
use crate::server::SftpRequest;
use crate::status::{HandlerResult, Outcome, Status};
use crate::wire::abi::*;

pub(crate) fn sftp_v56_open(req: &mut SftpRequest<'_>) -> HandlerResult {
    let path = req.parse_path()?;
    let desired_access = Ace4::from_bits_truncate(req.input.u32()?);
    let flags = req.input.u32()?;
    let mut attrs = req.parse_attrs()?;
    debug!("sftp_v56_open {path:?} access {desired_access:?} flags {flags:#x}");
    generic_open(req, &path, desired_access, flags, &mut attrs)
}

fn is_symlink(path: &Path) -> bool {
    stat::lstat(path).is_ok_and(|st| (st.st_mode as u32) & libc::S_IFMT == libc::S_IFLNK)
}

/// Open a file per the v5/v6 vocabulary (v3/v4 translate into it).
///
/// The disposition branches follow the reference server, including its
/// best-effort handling of the races `O_EXCL` cannot cover when symlinks
/// may be followed.
pub(crate) fn generic_open(
    req: &mut SftpRequest<'_>,
    path: &Path,
    desired_access: Ace4,
    flags: u32,
    attrs: &mut Attributes,
) -> HandlerResult {
    // For opens the size is the planned total, not a creation attribute.
    attrs.valid.remove(AttrMask::SIZE);
    let disposition = flags & SSH_FXF_ACCESS_DISPOSITION;
    let flags = OpenFlags::from_bits_truncate(flags);
    let readonly = req.server.config.readonly;

    // Never acquire a controlling terminal by accident.
    let mut open_flags = OFlag::O_NOCTTY;
    match (
        desired_access.contains(Ace4::READ_DATA),
        desired_access.contains(Ace4::WRITE_DATA),
    ) {
        // No access bits at all usually means a broken client; treat it
        // as a read-only open.
        (true, false) | (false, false) => open_flags |= OFlag::O_RDONLY,
        (false, true) => {
            if readonly {
                return Err(Status::PermissionDenied.into());
            }
            open_flags |= OFlag::O_WRONLY;
        }
        (true, true) => {
            if readonly {
                return Err(Status::PermissionDenied.into());
            }
            open_flags |= OFlag::O_RDWR;
        }
    }

    let mut handle_flags = HandleFlags::empty();
    if flags.intersects(OpenFlags::APPEND_DATA | OpenFlags::APPEND_DATA_ATOMIC) {
        // O_APPEND gives atomic append either way.
        open_flags |= OFlag::O_APPEND;
        handle_flags |= HandleFlags::APPEND;
    }
    if flags.contains(OpenFlags::TEXT_MODE) {
        handle_flags |= HandleFlags::TEXT;
    }
    if flags.intersects(OpenFlags::BLOCK_READ | OpenFlags::BLOCK_WRITE | OpenFlags::BLOCK_DELETE) {
        // No mandatory locking.
        return Err(Status::OpUnsupported.into());
    }
    if flags.contains(OpenFlags::NOFOLLOW) {
        open_flags |= OFlag::O_NOFOLLOW;
    }

    let initial_permissions;
    if attrs.valid.contains(AttrMask::PERMISSIONS) {
        initial_permissions = attrs.permissions & 0o7777;
        if attrs.permissions == attrs.permissions & 0o777 {
            // Nothing beyond what open() itself will set; skip the
            // follow-up chmod.
            attrs.valid.remove(AttrMask::PERMISSIONS);
        }
    } else {
        initial_permissions = 0o755 & 0o666;
    }
    let mode = Mode::from_bits_truncate(initial_permissions as libc::mode_t);

    if readonly
        && (disposition != SSH_FXF_OPEN_EXISTING || flags.contains(OpenFlags::DELETE_ON_CLOSE))
    {
        return Err(Status::PermissionDenied.into());
    }

    let created;
    let opened = match disposition {
        SSH_FXF_CREATE_NEW => {
            created = true;
            if flags.contains(OpenFlags::NOFOLLOW) {
                // O_EXCL is exactly right when links must not be followed.
                open(path, open_flags | OFlag::O_CREAT | OFlag::O_EXCL, mode)
            } else {
                // O_EXCL refuses to follow links, so it cannot be used
                // here; test-then-open is the best available.
                if stat::stat(path).is_ok() {
                    return Err(Status::FileAlreadyExists.into());
                }
                open(path, open_flags | OFlag::O_CREAT, mode)
            }
        }
        SSH_FXF_CREATE_TRUNCATE | SSH_FXF_OPEN_OR_CREATE => {
            if disposition == SSH_FXF_CREATE_TRUNCATE {
                open_flags |= OFlag::O_TRUNC;
            }
            if flags.contains(OpenFlags::NOFOLLOW) {
                match open(path, open_flags | OFlag::O_CREAT | OFlag::O_EXCL, mode) {
                    Ok(fd) => {
                        created = true;
                        Ok(fd)
                    }
                    Err(Errno::EEXIST) => {
                        // Already there: open it unless it's a link. A
                        // deletion in the window surfaces as an error.
                        created = false;
                        if is_symlink(path) {
                            return Err(Status::LinkLoop.into());
                        }
                        open(path, open_flags, mode)
                    }
                    Err(e) => {
                        created = false;
                        Err(e)
                    }
                }
            } else {
                created = false;
                if stat::stat(path).is_ok() {
                    open(path, open_flags, mode)
                } else {
                    // Racy: a file created in the window is opened (and
                    // perhaps truncated) as if it had been there all
                    // along.
                    open(path, open_flags | OFlag::O_CREAT, mode)
                }
            }
        }
        SSH_FXF_OPEN_EXISTING => {
            created = false;
            open(path, open_flags, mode)
        }
        SSH_FXF_TRUNCATE_EXISTING => {
            created = false;
            if flags.contains(OpenFlags::NOFOLLOW) && is_symlink(path) {
                return Err(Status::LinkLoop.into());
            }
            open(path, open_flags | OFlag::O_TRUNC, mode)
        }
        _ => return Err(Status::OpUnsupported.into()),
    };

    let fd = match opened {
        Ok(fd) => fd,
        Err(errno) => {
            // Declining to follow a symlink deserves its own status.
            if flags.contains(OpenFlags::NOFOLLOW)
                && matches!(errno, Errno::ENOENT | Errno::EEXIST | Errno::ELOOP)
                && is_symlink(path)
            {
                return Err(Status::LinkLoop.into());
            }
            return Err(errno.into());
        }
    };

    if created && !attrs.valid.is_empty() {
        if let Err(errno) = attrs::set_fstatus(fd.as_fd(), attrs) {
            // Don't leave a half-initialized file behind.
            drop(fd);
            let _ = unistd::unlink(path);
            return Err(errno.into());
        }
    }
    if flags.contains(OpenFlags::DELETE_ON_CLOSE) {
        // "Immediately" is taken to mean at open; the inode lives on
        // until the handle closes.
        let _ = unistd::unlink(path);
    }

    let handle = req.server.handles.new_file(fd, path, handle_flags)?;
    debug!("open {path:?} -> {handle:?}");
    req.handle_reply(handle)
}

/// v5/v6 RENAME with explicit overwrite semantics.
pub(crate) fn sftp_v56_rename(req: &mut SftpRequest<'_>) -> HandlerResult {
    req.check_writable()?;
    let oldpath = req.parse_path()?;
    let newpath = req.parse_path()?;
    let flags = RenameFlags::from_bits_truncate(req.input.u32()?);
    debug!("sftp_v56_rename {oldpath:?} {newpath:?} {flags:?}");

    if flags.intersects(RenameFlags::OVERWRITE | RenameFlags::NATIVE) {
        // POSIX rename is atomic in the sense the ATOMIC bit wants, so it
        // needs no separate treatment.
        fsops::rename(&oldpath, &newpath)?;
        return Ok(Outcome::Success);
    }
    // Non-overwriting: same link-then-unlink strategy as v3/v4.
    match fsops::hard_link(&oldpath, &newpath) {
        Err(Errno::EEXIST) => Err(Status::FileAlreadyExists.into()),
        Err(_) => {
            fsops::rename(&oldpath, &newpath)?;
            Ok(Outcome::Success)
        }
        Ok(()) => match unistd::unlink(&oldpath) {
            Ok(()) => Ok(Outcome::Success),
            Err(e) => {
                let _ = unistd::unlink(&newpath);
                Err(e.into())
            }
        },
    }
}
