//! Protocol version 3: attribute and filename codec, plus the v3/v4
//! flavors of OPEN and RENAME.
//!
//! v3 predates the typed attribute record: no `type` byte, numeric
//! uid/gid instead of names, 32-bit timestamps, and a single validity bit
//! covering atime and mtime together. Filenames are opaque bytes in the
//! local encoding.

use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::PathBuf;

use log::debug;
use nix::errno::Errno;
use nix::unistd;

use crate::attrs::{self, Attributes, SftpTime};
use crate::charset::Charset;
use crate::fsops;
use crate::server::SftpRequest;
use crate::status::{HandlerResult, Outcome, SftpError, Status};
use crate::versions::{Protocol, VersionOps};
use crate::versions::v56::generic_open;
use crate::wire::abi::*;
use crate::wire::parse::Reader;
use crate::wire::send::SendBuffer;

pub(crate) struct V3Ops;

impl VersionOps for V3Ops {
    fn send_names(
        &self,
        proto: &Protocol,
        out: &mut SendBuffer,
        charset: &Charset,
        names: &[Attributes],
    ) -> Result<(), SftpError> {
        let this_year = attrs::current_year();
        out.u32(names.len() as u32);
        for attrs in names {
            out.bytes(&self.encode_filename(charset, &attrs.name)?);
            out.string(&attrs::format_longname(attrs, this_year));
            self.send_attrs(proto, out, charset, attrs)?;
        }
        Ok(())
    }

    fn send_attrs(
        &self,
        proto: &Protocol,
        out: &mut SendBuffer,
        _charset: &Charset,
        attrs: &Attributes,
    ) -> Result<(), SftpError> {
        let valid = attrs.valid & proto.attr_mask;
        let mut bits = 0u32;
        if valid.contains(AttrMask::SIZE) {
            bits |= AttrMask::SIZE.bits();
        }
        if valid.contains(AttrMask::UIDGID) {
            bits |= AttrMask::UIDGID.bits();
        }
        if valid.contains(AttrMask::PERMISSIONS) {
            bits |= AttrMask::PERMISSIONS.bits();
        }
        // One flag covers both timestamps; send it only when both exist.
        let times = valid.contains(AttrMask::ACCESSTIME | AttrMask::MODIFYTIME);
        if times {
            bits |= SSH_FILEXFER_ACMODTIME;
        }
        out.u32(bits);
        if valid.contains(AttrMask::SIZE) {
            out.u64(attrs.size);
        }
        if valid.contains(AttrMask::UIDGID) {
            out.u32(attrs.uid);
            out.u32(attrs.gid);
        }
        if valid.contains(AttrMask::PERMISSIONS) {
            out.u32(attrs.permissions);
        }
        if times {
            out.u32(attrs.atime.seconds as u32);
            out.u32(attrs.mtime.seconds as u32);
        }
        Ok(())
    }

    fn parse_attrs(
        &self,
        _proto: &Protocol,
        input: &mut Reader<'_>,
    ) -> Result<Attributes, SftpError> {
        let bits = input.u32()?;
        let mut attrs = Attributes::default();
        if bits & AttrMask::SIZE.bits() != 0 {
            attrs.size = input.u64()?;
            attrs.valid |= AttrMask::SIZE;
        }
        if bits & AttrMask::UIDGID.bits() != 0 {
            attrs.uid = input.u32()?;
            attrs.gid = input.u32()?;
            attrs.valid |= AttrMask::UIDGID;
        }
        if bits & AttrMask::PERMISSIONS.bits() != 0 {
            attrs.permissions = input.u32()?;
            attrs.valid |= AttrMask::PERMISSIONS;
        }
        if bits & SSH_FILEXFER_ACMODTIME != 0 {
            attrs.atime = SftpTime {
                seconds: i64::from(input.u32()?),
                nanoseconds: 0,
            };
            attrs.mtime = SftpTime {
                seconds: i64::from(input.u32()?),
                nanoseconds: 0,
            };
            attrs.valid |= AttrMask::ACCESSTIME | AttrMask::MODIFYTIME;
        }
        if bits & AttrMask::EXTENDED.bits() != 0 {
            let mut count = input.u32()?;
            while count > 0 {
                input.bytes()?;
                input.bytes()?;
                count -= 1;
            }
        }
        Ok(attrs)
    }

    fn encode_filename(&self, _charset: &Charset, name: &OsStr) -> Result<Vec<u8>, SftpError> {
        // v3 names are raw bytes in the local encoding.
        Ok(name.as_bytes().to_vec())
    }

    fn decode_filename(&self, _charset: &Charset, bytes: &[u8]) -> Result<PathBuf, SftpError> {
        Ok(PathBuf::from(OsString::from_vec(bytes.to_vec())))
    }
}

/// `SSH_FXP_OPEN` for v3/v4: translate the POSIX-flavored pflags into the
/// v5/v6 access-plus-disposition vocabulary and share the generic open.
pub(crate) fn sftp_v34_open(req: &mut SftpRequest<'_>) -> HandlerResult {
    let path = req.parse_path()?;
    let pflags = PFlags::from_bits_truncate(req.input.u32()?);
    let mut attrs = req.parse_attrs()?;
    debug!("sftp_v34_open {path:?} {pflags:?}");

    let mut access = Ace4::empty();
    if pflags.contains(PFlags::READ) {
        access |= Ace4::READ_DATA;
    }
    if pflags.contains(PFlags::WRITE) {
        access |= Ace4::WRITE_DATA;
    }
    let disposition = if pflags.contains(PFlags::CREAT) {
        if pflags.contains(PFlags::EXCL) {
            SSH_FXF_CREATE_NEW
        } else if pflags.contains(PFlags::TRUNC) {
            SSH_FXF_CREATE_TRUNCATE
        } else {
            SSH_FXF_OPEN_OR_CREATE
        }
    } else if pflags.contains(PFlags::TRUNC) {
        SSH_FXF_TRUNCATE_EXISTING
    } else {
        SSH_FXF_OPEN_EXISTING
    };
    let mut flags = disposition;
    if pflags.contains(PFlags::APPEND) {
        flags |= OpenFlags::APPEND_DATA.bits();
    }
    if pflags.contains(PFlags::TEXT) {
        flags |= OpenFlags::TEXT_MODE.bits();
    }
    generic_open(req, &path, access, flags, &mut attrs)
}

/// `SSH_FXP_RENAME` for v3/v4: non-overwriting by way of link-then-unlink.
///
/// When `link` fails for any reason other than the target existing (FAT32
/// and friends), this falls back to plain `rename`, which MAY overwrite.
/// That is a deliberate compromise against the draft's non-overwriting
/// language, inherited from the reference server.
pub(crate) fn sftp_v34_rename(req: &mut SftpRequest<'_>) -> HandlerResult {
    req.check_writable()?;
    let oldpath = req.parse_path()?;
    let newpath = req.parse_path()?;
    debug!("sftp_v34_rename {oldpath:?} {newpath:?}");
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

/// v3 `STAT`/`LSTAT`/`FSTAT` carry no flags word; numeric ownership is
/// always reported and name lookup never happens.
fn v3_stat_reply(req: &mut SftpRequest<'_>, st: nix::Result<nix::sys::stat::FileStat>) -> HandlerResult {
    let st = st?;
    let attrs = attrs::stat_to_attrs(&st, AttrMask::empty(), None);
    req.attrs_reply(&attrs)
}

pub(crate) fn sftp_v3_stat(req: &mut SftpRequest<'_>) -> HandlerResult {
    let path = req.parse_path()?;
    debug!("sftp_v3_stat {path:?}");
    v3_stat_reply(req, nix::sys::stat::stat(&path))
}

pub(crate) fn sftp_v3_lstat(req: &mut SftpRequest<'_>) -> HandlerResult {
    let path = req.parse_path()?;
    debug!("sftp_v3_lstat {path:?}");
    v3_stat_reply(req, nix::sys::stat::lstat(&path))
}

pub(crate) fn sftp_v3_fstat(req: &mut SftpRequest<'_>) -> HandlerResult {
    use std::os::fd::AsFd;
    let handle = req.parse_handle()?;
    debug!("sftp_v3_fstat {handle:?}");
    let (fd, _) = req.server.handles.file(handle).map_err(SftpError::Status)?;
    v3_stat_reply(req, nix::sys::stat::fstat(fd.as_fd()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::versions::V3;

    fn round_trip(attrs: &Attributes) -> Attributes {
        let mut out = SendBuffer::new();
        out.begin();
        V3Ops
            .send_attrs(&V3, &mut out, &Charset::new(), attrs)
            .unwrap();
        let payload = out.payload().to_vec();
        let mut r = Reader::new(&payload);
        let parsed = V3Ops.parse_attrs(&V3, &mut r).unwrap();
        assert!(r.is_empty());
        parsed
    }

    #[test]
    fn attrs_round_trip() {
        let attrs = Attributes {
            valid: AttrMask::SIZE
                | AttrMask::UIDGID
                | AttrMask::PERMISSIONS
                | AttrMask::ACCESSTIME
                | AttrMask::MODIFYTIME,
            size: 123,
            uid: 1000,
            gid: 100,
            permissions: 0o100644,
            atime: SftpTime {
                seconds: 1234,
                nanoseconds: 0,
            },
            mtime: SftpTime {
                seconds: 5678,
                nanoseconds: 0,
            },
            ..Attributes::default()
        };
        let parsed = round_trip(&attrs);
        assert_eq!(parsed.size, 123);
        assert_eq!((parsed.uid, parsed.gid), (1000, 100));
        assert_eq!(parsed.permissions, 0o100644);
        assert_eq!(parsed.atime.seconds, 1234);
        assert_eq!(parsed.mtime.seconds, 5678);
        assert_eq!(
            parsed.valid,
            AttrMask::SIZE
                | AttrMask::UIDGID
                | AttrMask::PERMISSIONS
                | AttrMask::ACCESSTIME
                | AttrMask::MODIFYTIME
        );
    }

    #[test]
    fn fields_outside_v3_are_masked() {
        let attrs = Attributes {
            valid: AttrMask::SIZE | AttrMask::OWNERGROUP | AttrMask::BITS | AttrMask::CTIME,
            size: 9,
            owner: "alice".into(),
            group: "users".into(),
            ..Attributes::default()
        };
        let parsed = round_trip(&attrs);
        assert_eq!(parsed.valid, AttrMask::SIZE);
        assert_eq!(parsed.size, 9);
    }

    #[test]
    fn lone_timestamp_is_dropped() {
        // v3 cannot express atime without mtime.
        let attrs = Attributes {
            valid: AttrMask::ACCESSTIME,
            atime: SftpTime {
                seconds: 1,
                nanoseconds: 0,
            },
            ..Attributes::default()
        };
        let parsed = round_trip(&attrs);
        assert_eq!(parsed.valid, AttrMask::empty());
    }

    #[test]
    fn filenames_are_raw_bytes() {
        let cs = Charset::new();
        let raw = [b'f', 0xff, b'o'];
        let decoded = V3Ops
            .decode_filename(&cs, &raw)
            .unwrap();
        assert_eq!(
            V3Ops
                .encode_filename(&cs, decoded.as_os_str())
                .unwrap(),
            raw.to_vec()
        );
    }

    #[test]
    fn extended_pairs_are_skipped() {
        let mut out = SendBuffer::new();
        out.begin();
        out.u32(AttrMask::SIZE.bits() | AttrMask::EXTENDED.bits());
        out.u64(7);
        out.u32(2);
        out.string("ext@example");
        out.string("data");
        out.string("other@example");
        out.string("x");
        let payload = out.payload().to_vec();
        let mut r = Reader::new(&payload);
        let parsed = V3Ops.parse_attrs(&V3, &mut r).unwrap();
        assert_eq!(parsed.size, 7);
        assert!(r.is_empty());
    }
}
