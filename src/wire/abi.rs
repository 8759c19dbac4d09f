//! SFTP wire-protocol definitions.
//!
//! Message type codes, status values and flag groups from the expired
//! secsh-filexfer drafts (-02, -04, -05, -13). The numeric values are fixed
//! by the drafts; nothing here may be renumbered.

use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};

pub const SSH_FXP_INIT: u8 = 1;
pub const SSH_FXP_VERSION: u8 = 2;
pub const SSH_FXP_OPEN: u8 = 3;
pub const SSH_FXP_CLOSE: u8 = 4;
pub const SSH_FXP_READ: u8 = 5;
pub const SSH_FXP_WRITE: u8 = 6;
pub const SSH_FXP_LSTAT: u8 = 7;
pub const SSH_FXP_FSTAT: u8 = 8;
pub const SSH_FXP_SETSTAT: u8 = 9;
pub const SSH_FXP_FSETSTAT: u8 = 10;
pub const SSH_FXP_OPENDIR: u8 = 11;
pub const SSH_FXP_READDIR: u8 = 12;
pub const SSH_FXP_REMOVE: u8 = 13;
pub const SSH_FXP_MKDIR: u8 = 14;
pub const SSH_FXP_RMDIR: u8 = 15;
pub const SSH_FXP_REALPATH: u8 = 16;
pub const SSH_FXP_STAT: u8 = 17;
pub const SSH_FXP_RENAME: u8 = 18;
pub const SSH_FXP_READLINK: u8 = 19;
/// Create symbolic link (v3-v5 only).
pub const SSH_FXP_SYMLINK: u8 = 20;
/// Create symbolic or hard link (v6).
pub const SSH_FXP_LINK: u8 = 21;
pub const SSH_FXP_BLOCK: u8 = 22;
pub const SSH_FXP_UNBLOCK: u8 = 23;

pub const SSH_FXP_STATUS: u8 = 101;
pub const SSH_FXP_HANDLE: u8 = 102;
pub const SSH_FXP_DATA: u8 = 103;
pub const SSH_FXP_NAME: u8 = 104;
pub const SSH_FXP_ATTRS: u8 = 105;

pub const SSH_FXP_EXTENDED: u8 = 200;
pub const SSH_FXP_EXTENDED_REPLY: u8 = 201;

/// Request/response type codes, for logging and table sanity checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum MessageType {
    Init = SSH_FXP_INIT,
    Version = SSH_FXP_VERSION,
    Open = SSH_FXP_OPEN,
    Close = SSH_FXP_CLOSE,
    Read = SSH_FXP_READ,
    Write = SSH_FXP_WRITE,
    Lstat = SSH_FXP_LSTAT,
    Fstat = SSH_FXP_FSTAT,
    Setstat = SSH_FXP_SETSTAT,
    Fsetstat = SSH_FXP_FSETSTAT,
    Opendir = SSH_FXP_OPENDIR,
    Readdir = SSH_FXP_READDIR,
    Remove = SSH_FXP_REMOVE,
    Mkdir = SSH_FXP_MKDIR,
    Rmdir = SSH_FXP_RMDIR,
    Realpath = SSH_FXP_REALPATH,
    Stat = SSH_FXP_STAT,
    Rename = SSH_FXP_RENAME,
    Readlink = SSH_FXP_READLINK,
    Symlink = SSH_FXP_SYMLINK,
    Link = SSH_FXP_LINK,
    Block = SSH_FXP_BLOCK,
    Unblock = SSH_FXP_UNBLOCK,
    Status = SSH_FXP_STATUS,
    Handle = SSH_FXP_HANDLE,
    Data = SSH_FXP_DATA,
    Name = SSH_FXP_NAME,
    Attrs = SSH_FXP_ATTRS,
    Extended = SSH_FXP_EXTENDED,
    ExtendedReply = SSH_FXP_EXTENDED_REPLY,
}

/// File types carried in the v4+ attribute `type` byte.
pub const SSH_FILEXFER_TYPE_REGULAR: u8 = 1;
pub const SSH_FILEXFER_TYPE_DIRECTORY: u8 = 2;
pub const SSH_FILEXFER_TYPE_SYMLINK: u8 = 3;
pub const SSH_FILEXFER_TYPE_SPECIAL: u8 = 4;
pub const SSH_FILEXFER_TYPE_UNKNOWN: u8 = 5;
pub const SSH_FILEXFER_TYPE_SOCKET: u8 = 6;
pub const SSH_FILEXFER_TYPE_CHAR_DEVICE: u8 = 7;
pub const SSH_FILEXFER_TYPE_BLOCK_DEVICE: u8 = 8;
pub const SSH_FILEXFER_TYPE_FIFO: u8 = 9;

bitflags! {
    /// Attribute validity mask.
    ///
    /// The internal attribute record always uses the v6 bit assignments;
    /// the v3 codec translates on the way in and out (`ACMODTIME` shares
    /// the value of `ACCESSTIME`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AttrMask: u32 {
        const SIZE              = 0x0000_0001;
        /// v3 only: numeric uid/gid pair.
        const UIDGID            = 0x0000_0002;
        const PERMISSIONS       = 0x0000_0004;
        const ACCESSTIME        = 0x0000_0008;
        const CREATETIME        = 0x0000_0010;
        const MODIFYTIME        = 0x0000_0020;
        const ACL               = 0x0000_0040;
        const OWNERGROUP        = 0x0000_0080;
        const SUBSECOND_TIMES   = 0x0000_0100;
        const BITS              = 0x0000_0200;
        const ALLOCATION_SIZE   = 0x0000_0400;
        const TEXT_HINT         = 0x0000_0800;
        const MIME_TYPE         = 0x0000_1000;
        const LINK_COUNT        = 0x0000_2000;
        const UNTRANSLATED_NAME = 0x0000_4000;
        const CTIME             = 0x0000_8000;
        const EXTENDED          = 0x8000_0000;
    }
}

/// v3 name for the shared atime+mtime validity bit.
pub const SSH_FILEXFER_ACMODTIME: u32 = 0x0000_0008;

bitflags! {
    /// `attrib-bits` values (v5+).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AttrBits: u32 {
        const READONLY         = 0x0000_0001;
        const SYSTEM           = 0x0000_0002;
        const HIDDEN           = 0x0000_0004;
        const CASE_INSENSITIVE = 0x0000_0008;
        const ARCHIVE          = 0x0000_0010;
        const ENCRYPTED        = 0x0000_0020;
        const COMPRESSED       = 0x0000_0040;
        const SPARSE           = 0x0000_0080;
        const APPEND_ONLY      = 0x0000_0100;
        const IMMUTABLE        = 0x0000_0200;
        const SYNC             = 0x0000_0400;
        const TRANSLATION_ERR  = 0x0000_0800;
    }
}

bitflags! {
    /// v3/v4 `SSH_FXP_OPEN` pflags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PFlags: u32 {
        const READ   = 0x0000_0001;
        const WRITE  = 0x0000_0002;
        const APPEND = 0x0000_0004;
        const CREAT  = 0x0000_0008;
        const TRUNC  = 0x0000_0010;
        const EXCL   = 0x0000_0020;
        const TEXT   = 0x0000_0040;
    }
}

bitflags! {
    /// ACE4 access mask used by v5/v6 `SSH_FXP_OPEN`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Ace4: u32 {
        const READ_DATA         = 0x0000_0001;
        const WRITE_DATA        = 0x0000_0002;
        const APPEND_DATA       = 0x0000_0004;
        const READ_NAMED_ATTRS  = 0x0000_0008;
        const WRITE_NAMED_ATTRS = 0x0000_0010;
        const EXECUTE           = 0x0000_0020;
        const DELETE_CHILD      = 0x0000_0040;
        const READ_ATTRIBUTES   = 0x0000_0080;
        const WRITE_ATTRIBUTES  = 0x0000_0100;
        const DELETE            = 0x0001_0000;
        const READ_ACL          = 0x0002_0000;
        const WRITE_ACL         = 0x0004_0000;
        const WRITE_OWNER       = 0x0008_0000;
        const SYNCHRONIZE       = 0x0010_0000;
    }
}

/// Mask selecting the disposition field inside v5/v6 open flags.
pub const SSH_FXF_ACCESS_DISPOSITION: u32 = 0x0000_0007;
pub const SSH_FXF_CREATE_NEW: u32 = 0x0000_0000;
pub const SSH_FXF_CREATE_TRUNCATE: u32 = 0x0000_0001;
pub const SSH_FXF_OPEN_EXISTING: u32 = 0x0000_0002;
pub const SSH_FXF_OPEN_OR_CREATE: u32 = 0x0000_0003;
pub const SSH_FXF_TRUNCATE_EXISTING: u32 = 0x0000_0004;

bitflags! {
    /// v5/v6 open flag modifiers (everything above the disposition field).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const APPEND_DATA            = 0x0000_0008;
        const APPEND_DATA_ATOMIC     = 0x0000_0010;
        const TEXT_MODE              = 0x0000_0020;
        const BLOCK_READ             = 0x0000_0040;
        const BLOCK_WRITE            = 0x0000_0080;
        const BLOCK_DELETE           = 0x0000_0100;
        const BLOCK_ADVISORY         = 0x0000_0200;
        const NOFOLLOW               = 0x0000_0400;
        const DELETE_ON_CLOSE        = 0x0000_0800;
        const ACCESS_AUDIT_ALARM_INFO = 0x0000_1000;
        const ACCESS_BACKUP          = 0x0000_2000;
        const BACKUP_STREAM          = 0x0000_4000;
        const OVERRIDE_OWNER         = 0x0000_8000;
    }
}

bitflags! {
    /// v5/v6 `SSH_FXP_RENAME` flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RenameFlags: u32 {
        const OVERWRITE = 0x0000_0001;
        const ATOMIC    = 0x0000_0002;
        const NATIVE    = 0x0000_0004;
    }
}

/// v6 `SSH_FXP_REALPATH` control bytes.
pub const SSH_FXP_REALPATH_NO_CHECK: u8 = 0x01;
pub const SSH_FXP_REALPATH_STAT_IF: u8 = 0x02;
pub const SSH_FXP_REALPATH_STAT_ALWAYS: u8 = 0x03;

/// `text-hint` values (v6).
pub const SSH_FILEXFER_ATTR_KNOWN_TEXT: u8 = 0x00;
pub const SSH_FILEXFER_ATTR_GUESSED_TEXT: u8 = 0x01;
pub const SSH_FILEXFER_ATTR_KNOWN_BINARY: u8 = 0x02;
pub const SSH_FILEXFER_ATTR_GUESSED_BINARY: u8 = 0x03;

/// `statvfs` reply flag: filesystem is mounted read-only.
pub const SSH_FXE_STATVFS_ST_RDONLY: u64 = 0x1;
/// `statvfs` reply flag: filesystem ignores setuid/setgid bits.
pub const SSH_FXE_STATVFS_ST_NOSUID: u64 = 0x2;
