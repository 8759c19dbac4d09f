//! v6-only operations: REALPATH with compose paths, LINK, and the
//! version-select extension.

use log::{debug, warn};

use crate::attrs::{self, Attributes};
use crate::fsops;
use crate::realpath::{self, RealpathFlags};
use crate::server::SftpRequest;
use crate::status::{HandlerResult, Outcome, Status};
use crate::versions::{V3, V4, V5, V6};
use crate::wire::abi::*;

/// v6 `SSH_FXP_REALPATH`: optional control byte plus compose paths, then
/// canonicalization whose strictness the control byte selects.
pub(crate) fn sftp_v6_realpath(req: &mut SftpRequest<'_>) -> HandlerResult {
    let mut path = req.parse_path()?;
    let mut control_byte = SSH_FXP_REALPATH_NO_CHECK;
    if !req.input.is_empty() {
        control_byte = req.input.u8()?;
        while !req.input.is_empty() {
            // An absolute compose path restarts composition; PathBuf::push
            // has exactly that behavior.
            let compose = req.parse_path()?;
            path.push(compose);
        }
    }
    debug!("sftp_v6_realpath {path:?} control {control_byte:#x}");
    let rpflags = match control_byte {
        SSH_FXP_REALPATH_NO_CHECK => RealpathFlags::empty(),
        SSH_FXP_REALPATH_STAT_IF => RealpathFlags::READLINK,
        SSH_FXP_REALPATH_STAT_ALWAYS => RealpathFlags::READLINK | RealpathFlags::MUST_EXIST,
        _ => return Err(Status::BadMessage.into()),
    };
    let resolved = realpath::find_realpath(
        path.as_os_str(),
        rpflags,
        req.server.config.link_depth,
        req.server.config.readlink_max,
    )?;
    debug!("...real path is {resolved:?}");

    let attrs = match control_byte {
        // No filesystem check: dummy attributes.
        SSH_FXP_REALPATH_NO_CHECK => named_only(&resolved),
        _ => {
            let stat_result =
                nix::sys::stat::stat(&resolved).or_else(|_| nix::sys::stat::lstat(&resolved));
            match stat_result {
                Ok(st) => attrs::stat_to_attrs(&st, AttrMask::all(), Some(resolved.as_path())),
                Err(_) if control_byte == SSH_FXP_REALPATH_STAT_IF => named_only(&resolved),
                // Only possible if the path vanished between resolution
                // and stat.
                Err(e) => return Err(e.into()),
            }
        }
    };
    req.names_reply(&[attrs])
}

fn named_only(path: &std::path::Path) -> Attributes {
    Attributes {
        name: path.as_os_str().to_os_string(),
        ..Attributes::default()
    }
}

/// v6 `SSH_FXP_LINK`: symbolic or hard link.
pub(crate) fn sftp_v6_link(req: &mut SftpRequest<'_>) -> HandlerResult {
    req.check_writable()?;
    let newlinkpath = req.parse_path()?;
    let existingpath = req.parse_path()?;
    let symbolic = req.input.u8()? != 0;
    debug!(
        "sftp_v6_link {existingpath:?} {newlinkpath:?} [{}]",
        if symbolic { "symbolic" } else { "hard" }
    );
    let result = if symbolic {
        fsops::symlink(&existingpath, &newlinkpath)
    } else {
        fsops::hard_link(&existingpath, &newlinkpath)
    };
    match result {
        Ok(()) => Ok(Outcome::Success),
        Err(nix::errno::Errno::EPERM) => {
            if !symbolic
                && nix::sys::stat::stat(&existingpath)
                    .is_ok_and(|st| (st.st_mode as u32) & libc::S_IFMT == libc::S_IFDIR)
            {
                // Directories cannot be hard-linked.
                Err(Status::FileIsADirectory.into())
            } else {
                // e.g. Linux returns EPERM for links on FAT32.
                Err(Status::OpUnsupported.into())
            }
        }
        Err(e) => Err(e.into()),
    }
}

/// `version-select`: legal only as the very first message after INIT,
/// which is exactly the window in which the worker pool does not exist
/// yet. Any other timing is a protocol violation that costs the client
/// its connection (draft-13 s5.5).
pub(crate) fn sftp_v6_version_select(req: &mut SftpRequest<'_>) -> HandlerResult {
    if req.server.workers_started() {
        warn!("badly timed version-select");
        req.status_reply(Status::InvalidParameter, "badly timed version-select")?;
        req.server.request_shutdown();
        return Ok(Outcome::Responded);
    }
    let choice = req.parse_string()?;
    let proto = match choice {
        b"3" => Some(&V3),
        b"4" => Some(&V4),
        b"5" => Some(&V5),
        b"6" => Some(&V6),
        _ => None,
    };
    match proto {
        Some(proto) => {
            debug!("version-select -> {}", proto.version);
            req.server.set_protocol(proto);
            Ok(Outcome::Success)
        }
        None => {
            req.status_reply(Status::InvalidParameter, "unknown version")?;
            req.server.request_shutdown();
            Ok(Outcome::Responded)
        }
    }
}
