//! Per-version protocol descriptors.
//!
//! Each supported version gets a static [`Protocol`]: a command table
//! sorted by type byte, an extension table sorted by name, the attribute
//! mask the version can express, the highest status code it knows, and
//! the codec object implementing the five version-specific operations.
//! Before `SSH_FXP_INIT` the active descriptor is [`PRE_INIT`], whose only
//! command is INIT itself.

pub(crate) mod common;
pub(crate) mod v3;
pub(crate) mod v456;
pub(crate) mod v56;
pub(crate) mod v6;

use std::ffi::OsStr;
use std::path::PathBuf;

use crate::attrs::Attributes;
use crate::charset::Charset;
use crate::extensions;
use crate::server::{SftpRequest, sftp_init};
use crate::status::{HandlerResult, SftpError};
use crate::wire::abi::*;
use crate::wire::parse::Reader;
use crate::wire::send::SendBuffer;

pub type Handler = fn(&mut SftpRequest<'_>) -> HandlerResult;

/// The operations whose wire form changed across protocol revisions.
pub trait VersionOps: Sync {
    /// Body of an `SSH_FXP_NAME` response (count plus entries).
    fn send_names(
        &self,
        proto: &Protocol,
        out: &mut SendBuffer,
        charset: &Charset,
        names: &[Attributes],
    ) -> Result<(), SftpError>;

    /// One attribute block.
    fn send_attrs(
        &self,
        proto: &Protocol,
        out: &mut SendBuffer,
        charset: &Charset,
        attrs: &Attributes,
    ) -> Result<(), SftpError>;

    /// One attribute block from the wire.
    fn parse_attrs(&self, proto: &Protocol, input: &mut Reader<'_>)
    -> Result<Attributes, SftpError>;

    /// Local filename to wire bytes.
    fn encode_filename(&self, charset: &Charset, name: &OsStr) -> Result<Vec<u8>, SftpError>;

    /// Wire bytes to local filename.
    fn decode_filename(&self, charset: &Charset, bytes: &[u8]) -> Result<PathBuf, SftpError>;
}

pub struct Command {
    pub op: u8,
    pub handler: Handler,
}

pub struct Extension {
    pub name: &'static str,
    pub handler: Handler,
}

/// Everything version-dependent about request processing.
pub struct Protocol {
    pub version: u32,
    /// Sorted by type byte.
    pub commands: &'static [Command],
    /// Sorted by name.
    pub extensions: &'static [Extension],
    /// Attribute fields this version can put on the wire.
    pub attr_mask: AttrMask,
    /// Highest status value the version defines; see [`crate::Status::clamped`].
    pub max_status: u32,
    pub ops: &'static (dyn VersionOps + Sync),
}

impl Protocol {
    /// Binary search the command table by request type.
    pub fn lookup(&self, op: u8) -> Option<Handler> {
        self.commands
            .binary_search_by_key(&op, |c| c.op)
            .ok()
            .map(|n| self.commands[n].handler)
    }

    /// Binary search the extension table by name.
    pub fn extension(&self, name: &[u8]) -> Option<Handler> {
        self.extensions
            .binary_search_by(|e| e.name.as_bytes().cmp(name))
            .ok()
            .map(|n| self.extensions[n].handler)
    }
}

impl std::fmt::Debug for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Protocol")
            .field("version", &self.version)
            .finish()
    }
}

static V3_OPS: v3::V3Ops = v3::V3Ops;
static V456_OPS: v456::V456Ops = v456::V456Ops;

/// Descriptor in force before negotiation: INIT and nothing else.
pub static PRE_INIT: Protocol = Protocol {
    version: 3,
    commands: &[Command {
        op: SSH_FXP_INIT,
        handler: sftp_init,
    }],
    extensions: &[],
    attr_mask: AttrMask::empty(),
    max_status: 8, // SSH_FX_OP_UNSUPPORTED
    ops: &V3_OPS,
};

static EXTENSIONS_V345: [Extension; 5] = [
    Extension {
        name: "hardlink@openssh.com",
        handler: extensions::sftp_hardlink,
    },
    Extension {
        name: "posix-rename@openssh.org",
        handler: extensions::sftp_posix_rename,
    },
    Extension {
        name: "space-available",
        handler: extensions::sftp_space_available,
    },
    Extension {
        name: "statvfs@openssh.org",
        handler: extensions::sftp_statvfs,
    },
    Extension {
        name: "text-seek",
        handler: extensions::sftp_text_seek,
    },
];

static EXTENSIONS_V6: [Extension; 6] = [
    Extension {
        name: "hardlink@openssh.com",
        handler: extensions::sftp_hardlink,
    },
    Extension {
        name: "posix-rename@openssh.org",
        handler: extensions::sftp_posix_rename,
    },
    Extension {
        name: "space-available",
        handler: extensions::sftp_space_available,
    },
    Extension {
        name: "statvfs@openssh.org",
        handler: extensions::sftp_statvfs,
    },
    Extension {
        name: "text-seek",
        handler: extensions::sftp_text_seek,
    },
    Extension {
        name: "version-select",
        handler: v6::sftp_v6_version_select,
    },
];

pub static V3: Protocol = Protocol {
    version: 3,
    commands: &[
        Command {
            op: SSH_FXP_INIT,
            handler: common::sftp_already_init,
        },
        Command {
            op: SSH_FXP_OPEN,
            handler: v3::sftp_v34_open,
        },
        Command {
            op: SSH_FXP_CLOSE,
            handler: common::sftp_close,
        },
        Command {
            op: SSH_FXP_READ,
            handler: common::sftp_read,
        },
        Command {
            op: SSH_FXP_WRITE,
            handler: common::sftp_write,
        },
        Command {
            op: SSH_FXP_LSTAT,
            handler: v3::sftp_v3_lstat,
        },
        Command {
            op: SSH_FXP_FSTAT,
            handler: v3::sftp_v3_fstat,
        },
        Command {
            op: SSH_FXP_SETSTAT,
            handler: common::sftp_setstat,
        },
        Command {
            op: SSH_FXP_FSETSTAT,
            handler: common::sftp_fsetstat,
        },
        Command {
            op: SSH_FXP_OPENDIR,
            handler: common::sftp_opendir,
        },
        Command {
            op: SSH_FXP_READDIR,
            handler: common::sftp_readdir,
        },
        Command {
            op: SSH_FXP_REMOVE,
            handler: common::sftp_remove,
        },
        Command {
            op: SSH_FXP_MKDIR,
            handler: common::sftp_mkdir,
        },
        Command {
            op: SSH_FXP_RMDIR,
            handler: common::sftp_rmdir,
        },
        Command {
            op: SSH_FXP_REALPATH,
            handler: common::sftp_v345_realpath,
        },
        Command {
            op: SSH_FXP_STAT,
            handler: v3::sftp_v3_stat,
        },
        Command {
            op: SSH_FXP_RENAME,
            handler: v3::sftp_v34_rename,
        },
        Command {
            op: SSH_FXP_READLINK,
            handler: common::sftp_readlink,
        },
        Command {
            op: SSH_FXP_SYMLINK,
            handler: common::sftp_symlink,
        },
        Command {
            op: SSH_FXP_EXTENDED,
            handler: common::sftp_extended,
        },
    ],
    extensions: &EXTENSIONS_V345,
    attr_mask: AttrMask::SIZE
        .union(AttrMask::UIDGID)
        .union(AttrMask::PERMISSIONS)
        .union(AttrMask::ACCESSTIME)
        .union(AttrMask::MODIFYTIME),
    max_status: 8, // SSH_FX_OP_UNSUPPORTED
    ops: &V3_OPS,
};

pub static V4: Protocol = Protocol {
    version: 4,
    commands: &[
        Command {
            op: SSH_FXP_INIT,
            handler: common::sftp_already_init,
        },
        Command {
            op: SSH_FXP_OPEN,
            handler: v3::sftp_v34_open,
        },
        Command {
            op: SSH_FXP_CLOSE,
            handler: common::sftp_close,
        },
        Command {
            op: SSH_FXP_READ,
            handler: common::sftp_read,
        },
        Command {
            op: SSH_FXP_WRITE,
            handler: common::sftp_write,
        },
        Command {
            op: SSH_FXP_LSTAT,
            handler: v456::sftp_v456_lstat,
        },
        Command {
            op: SSH_FXP_FSTAT,
            handler: v456::sftp_v456_fstat,
        },
        Command {
            op: SSH_FXP_SETSTAT,
            handler: common::sftp_setstat,
        },
        Command {
            op: SSH_FXP_FSETSTAT,
            handler: common::sftp_fsetstat,
        },
        Command {
            op: SSH_FXP_OPENDIR,
            handler: common::sftp_opendir,
        },
        Command {
            op: SSH_FXP_READDIR,
            handler: common::sftp_readdir,
        },
        Command {
            op: SSH_FXP_REMOVE,
            handler: common::sftp_remove,
        },
        Command {
            op: SSH_FXP_MKDIR,
            handler: common::sftp_mkdir,
        },
        Command {
            op: SSH_FXP_RMDIR,
            handler: common::sftp_rmdir,
        },
        Command {
            op: SSH_FXP_REALPATH,
            handler: common::sftp_v345_realpath,
        },
        Command {
            op: SSH_FXP_STAT,
            handler: v456::sftp_v456_stat,
        },
        Command {
            op: SSH_FXP_RENAME,
            handler: v3::sftp_v34_rename,
        },
        Command {
            op: SSH_FXP_READLINK,
            handler: common::sftp_readlink,
        },
        Command {
            op: SSH_FXP_SYMLINK,
            handler: common::sftp_symlink,
        },
        Command {
            op: SSH_FXP_EXTENDED,
            handler: common::sftp_extended,
        },
    ],
    extensions: &EXTENSIONS_V345,
    attr_mask: AttrMask::SIZE
        .union(AttrMask::PERMISSIONS)
        .union(AttrMask::ACCESSTIME)
        .union(AttrMask::CREATETIME)
        .union(AttrMask::MODIFYTIME)
        .union(AttrMask::OWNERGROUP)
        .union(AttrMask::SUBSECOND_TIMES),
    max_status: 13, // SSH_FX_NO_MEDIA
    ops: &V456_OPS,
};

pub static V5: Protocol = Protocol {
    version: 5,
    commands: &[
        Command {
            op: SSH_FXP_INIT,
            handler: common::sftp_already_init,
        },
        Command {
            op: SSH_FXP_OPEN,
            handler: v56::sftp_v56_open,
        },
        Command {
            op: SSH_FXP_CLOSE,
            handler: common::sftp_close,
        },
        Command {
            op: SSH_FXP_READ,
            handler: common::sftp_read,
        },
        Command {
            op: SSH_FXP_WRITE,
            handler: common::sftp_write,
        },
        Command {
            op: SSH_FXP_LSTAT,
            handler: v456::sftp_v456_lstat,
        },
        Command {
            op: SSH_FXP_FSTAT,
            handler: v456::sftp_v456_fstat,
        },
        Command {
            op: SSH_FXP_SETSTAT,
            handler: common::sftp_setstat,
        },
        Command {
            op: SSH_FXP_FSETSTAT,
            handler: common::sftp_fsetstat,
        },
        Command {
            op: SSH_FXP_OPENDIR,
            handler: common::sftp_opendir,
        },
        Command {
            op: SSH_FXP_READDIR,
            handler: common::sftp_readdir,
        },
        Command {
            op: SSH_FXP_REMOVE,
            handler: common::sftp_remove,
        },
        Command {
            op: SSH_FXP_MKDIR,
            handler: common::sftp_mkdir,
        },
        Command {
            op: SSH_FXP_RMDIR,
            handler: common::sftp_rmdir,
        },
        Command {
            op: SSH_FXP_REALPATH,
            handler: common::sftp_v345_realpath,
        },
        Command {
            op: SSH_FXP_STAT,
            handler: v456::sftp_v456_stat,
        },
        Command {
            op: SSH_FXP_RENAME,
            handler: v56::sftp_v56_rename,
        },
        Command {
            op: SSH_FXP_READLINK,
            handler: common::sftp_readlink,
        },
        Command {
            op: SSH_FXP_SYMLINK,
            handler: common::sftp_symlink,
        },
        Command {
            op: SSH_FXP_EXTENDED,
            handler: common::sftp_extended,
        },
    ],
    extensions: &EXTENSIONS_V345,
    attr_mask: AttrMask::SIZE
        .union(AttrMask::PERMISSIONS)
        .union(AttrMask::ACCESSTIME)
        .union(AttrMask::CREATETIME)
        .union(AttrMask::MODIFYTIME)
        .union(AttrMask::OWNERGROUP)
        .union(AttrMask::SUBSECOND_TIMES)
        .union(AttrMask::BITS),
    max_status: 17, // SSH_FX_LOCK_CONFLICT
    ops: &V456_OPS,
};

pub static V6: Protocol = Protocol {
    version: 6,
    commands: &[
        Command {
            op: SSH_FXP_INIT,
            handler: common::sftp_already_init,
        },
        Command {
            op: SSH_FXP_OPEN,
            handler: v56::sftp_v56_open,
        },
        Command {
            op: SSH_FXP_CLOSE,
            handler: common::sftp_close,
        },
        Command {
            op: SSH_FXP_READ,
            handler: common::sftp_read,
        },
        Command {
            op: SSH_FXP_WRITE,
            handler: common::sftp_write,
        },
        Command {
            op: SSH_FXP_LSTAT,
            handler: v456::sftp_v456_lstat,
        },
        Command {
            op: SSH_FXP_FSTAT,
            handler: v456::sftp_v456_fstat,
        },
        Command {
            op: SSH_FXP_SETSTAT,
            handler: common::sftp_setstat,
        },
        Command {
            op: SSH_FXP_FSETSTAT,
            handler: common::sftp_fsetstat,
        },
        Command {
            op: SSH_FXP_OPENDIR,
            handler: common::sftp_opendir,
        },
        Command {
            op: SSH_FXP_READDIR,
            handler: common::sftp_readdir,
        },
        Command {
            op: SSH_FXP_REMOVE,
            handler: common::sftp_remove,
        },
        Command {
            op: SSH_FXP_MKDIR,
            handler: common::sftp_mkdir,
        },
        Command {
            op: SSH_FXP_RMDIR,
            handler: common::sftp_rmdir,
        },
        Command {
            op: SSH_FXP_REALPATH,
            handler: v6::sftp_v6_realpath,
        },
        Command {
            op: SSH_FXP_STAT,
            handler: v456::sftp_v456_stat,
        },
        Command {
            op: SSH_FXP_RENAME,
            handler: v56::sftp_v56_rename,
        },
        Command {
            op: SSH_FXP_READLINK,
            handler: common::sftp_readlink,
        },
        Command {
            op: SSH_FXP_LINK,
            handler: v6::sftp_v6_link,
        },
        Command {
            op: SSH_FXP_EXTENDED,
            handler: common::sftp_extended,
        },
    ],
    extensions: &EXTENSIONS_V6,
    attr_mask: AttrMask::SIZE
        .union(AttrMask::PERMISSIONS)
        .union(AttrMask::ACCESSTIME)
        .union(AttrMask::CTIME)
        .union(AttrMask::MODIFYTIME)
        .union(AttrMask::OWNERGROUP)
        .union(AttrMask::SUBSECOND_TIMES)
        .union(AttrMask::BITS)
        .union(AttrMask::LINK_COUNT),
    max_status: 31, // SSH_FX_NO_MATCHING_BYTE_RANGE_LOCK
    ops: &V456_OPS,
};

#[cfg(test)]
mod tests {
    use super::*;

    fn check_tables(proto: &Protocol) {
        assert!(
            proto.commands.windows(2).all(|w| w[0].op < w[1].op),
            "command table out of order for v{}",
            proto.version
        );
        assert!(
            proto
                .extensions
                .windows(2)
                .all(|w| w[0].name < w[1].name),
            "extension table out of order for v{}",
            proto.version
        );
    }

    #[test]
    fn tables_are_sorted_for_binary_search() {
        for proto in [&PRE_INIT, &V3, &V4, &V5, &V6] {
            check_tables(proto);
        }
    }

    #[test]
    fn lookup_finds_commands() {
        assert!(V3.lookup(SSH_FXP_OPEN).is_some());
        assert!(V3.lookup(SSH_FXP_LINK).is_none());
        assert!(V6.lookup(SSH_FXP_LINK).is_some());
        assert!(V6.lookup(SSH_FXP_SYMLINK).is_none());
        assert!(PRE_INIT.lookup(SSH_FXP_OPEN).is_none());
        assert!(V5.lookup(99).is_none());
    }

    #[test]
    fn extension_lookup_by_name() {
        assert!(V3.extension(b"text-seek").is_some());
        assert!(V3.extension(b"version-select").is_none());
        assert!(V6.extension(b"version-select").is_some());
        assert!(V6.extension(b"frobnicate@example.com").is_none());
    }
}
