//! Status codes and the handler error channel.
//!
//! Every reply that is not data-bearing is an `SSH_FXP_STATUS` carrying one
//! of these codes. The set grew with each protocol revision, so a status
//! must be clamped to the negotiated version's ceiling before it goes on
//! the wire.

use nix::errno::Errno;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

use crate::wire::parse::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum Status {
    Ok = 0,
    Eof = 1,
    NoSuchFile = 2,
    PermissionDenied = 3,
    Failure = 4,
    BadMessage = 5,
    NoConnection = 6,
    ConnectionLost = 7,
    OpUnsupported = 8,
    InvalidHandle = 9,
    NoSuchPath = 10,
    FileAlreadyExists = 11,
    WriteProtect = 12,
    NoMedia = 13,
    NoSpaceOnFilesystem = 14,
    QuotaExceeded = 15,
    UnknownPrincipal = 16,
    LockConflict = 17,
    DirNotEmpty = 18,
    NotADirectory = 19,
    InvalidFilename = 20,
    LinkLoop = 21,
    CannotDelete = 22,
    InvalidParameter = 23,
    FileIsADirectory = 24,
    ByteRangeLockConflict = 25,
    ByteRangeLockRefused = 26,
    DeletePending = 27,
    FileCorrupt = 28,
    OwnerInvalid = 29,
    GroupInvalid = 30,
    NoMatchingByteRangeLock = 31,
}

impl Status {
    /// Default human-readable text for the status message.
    pub fn message(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Eof => "end of file",
            Status::NoSuchFile => "file does not exist",
            Status::PermissionDenied => "permission denied",
            Status::Failure => "operation failed",
            Status::BadMessage => "badly encoded SFTP packet",
            Status::NoConnection => "no connection",
            Status::ConnectionLost => "connection lost",
            Status::OpUnsupported => "operation not supported",
            Status::InvalidHandle => "invalid handle",
            Status::NoSuchPath => "path does not exist or is invalid",
            Status::FileAlreadyExists => "file already exists",
            Status::WriteProtect => "file is on read-only medium",
            Status::NoMedia => "no medium in drive",
            Status::NoSpaceOnFilesystem => "no space on filesystem",
            Status::QuotaExceeded => "quota exceeded",
            Status::UnknownPrincipal => "unknown principal",
            Status::LockConflict => "file is locked",
            Status::DirNotEmpty => "directory is not empty",
            Status::NotADirectory => "file is not a directory",
            Status::InvalidFilename => "invalid filename",
            Status::LinkLoop => "too many symbolic links",
            Status::CannotDelete => "file cannot be deleted",
            Status::InvalidParameter => "invalid parameter",
            Status::FileIsADirectory => "file is a directory",
            Status::ByteRangeLockConflict => "byte range is locked",
            Status::ByteRangeLockRefused => "cannot lock byte range",
            Status::DeletePending => "file deletion pending",
            Status::FileCorrupt => "file is corrupt",
            Status::OwnerInvalid => "invalid owner",
            Status::GroupInvalid => "invalid group",
            Status::NoMatchingByteRangeLock => "no such lock",
        }
    }

    /// Map a syscall error to the closest protocol status.
    pub fn from_errno(errno: Errno) -> Status {
        match errno {
            Errno::EPERM | Errno::EACCES => Status::PermissionDenied,
            Errno::ENOENT => Status::NoSuchFile,
            Errno::EIO => Status::FileCorrupt,
            Errno::ENOSPC => Status::NoSpaceOnFilesystem,
            Errno::ENOTDIR => Status::NotADirectory,
            Errno::EISDIR => Status::FileIsADirectory,
            Errno::EEXIST => Status::FileAlreadyExists,
            Errno::EROFS => Status::WriteProtect,
            Errno::ELOOP => Status::LinkLoop,
            Errno::ENAMETOOLONG => Status::InvalidFilename,
            Errno::ENOTEMPTY => Status::DirNotEmpty,
            Errno::EDQUOT => Status::QuotaExceeded,
            _ => Status::Failure,
        }
    }

    /// Clamp to a protocol version's highest known status value.
    ///
    /// Statuses the peer cannot know are remapped to their nearest older
    /// relative rather than dropped.
    pub fn clamped(self, ceiling: u32) -> Status {
        if u32::from(self) <= ceiling {
            return self;
        }
        match self {
            Status::InvalidFilename => Status::BadMessage,
            Status::NoSuchPath => Status::NoSuchFile,
            _ => Status::Failure,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// Error channel for command handlers.
///
/// Handlers either finish with [`Outcome`] or fail with one of these; the
/// dispatch framework turns the failure into the `SSH_FXP_STATUS` reply.
#[derive(Error, Debug)]
pub enum SftpError {
    /// A definite protocol status.
    #[error("{0}")]
    Status(Status),
    /// A syscall failed; mapped through [`Status::from_errno`] and reported
    /// with the OS error text.
    #[error(transparent)]
    Errno(#[from] Errno),
    /// Protocol violation: report the status, then tear the connection down.
    #[error("fatal protocol violation: {0}")]
    Fatal(Status),
    /// The output stream failed; no reply is possible.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<Status> for SftpError {
    fn from(status: Status) -> SftpError {
        SftpError::Status(status)
    }
}

impl From<ParseError> for SftpError {
    fn from(_: ParseError) -> SftpError {
        SftpError::Status(Status::BadMessage)
    }
}

/// Successful handler completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Framework sends `SSH_FXP_STATUS` with `SSH_FX_OK`.
    Success,
    /// Handler already sent its own response.
    Responded,
}

pub type HandlerResult = Result<Outcome, SftpError>;
