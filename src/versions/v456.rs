//! Attribute and filename codec for protocol versions 4 through 6, plus
//! the v4+ stat family.
//!
//! From v4 on, attributes open with a `type` byte, ownership travels as
//! names, timestamps are 64-bit with optional nanoseconds, and filenames
//! are UTF-8 on the wire. v6 additionally reads `attrib-bits-valid` and
//! inode change times. ACLs and untranslated names are parsed and
//! discarded.

use std::ffi::OsStr;
use std::os::fd::AsFd;
use std::path::PathBuf;

use log::debug;

use crate::attrs::{self, Attributes, SftpTime};
use crate::charset::Charset;
use crate::server::SftpRequest;
use crate::status::{HandlerResult, SftpError, Status};
use crate::versions::{Protocol, VersionOps};
use crate::wire::abi::*;
use crate::wire::parse::Reader;
use crate::wire::send::SendBuffer;

pub(crate) struct V456Ops;

fn parse_time(input: &mut Reader<'_>, subsecond: bool) -> Result<SftpTime, SftpError> {
    // The drafts disagree on signedness; the bits are the same either way.
    let seconds = input.u64()? as i64;
    let nanoseconds = if subsecond { input.u32()? } else { 0 };
    Ok(SftpTime {
        seconds,
        nanoseconds,
    })
}

fn send_time(out: &mut SendBuffer, t: SftpTime, subsecond: bool) {
    out.u64(t.seconds as u64);
    if subsecond {
        out.u32(t.nanoseconds);
    }
}

fn parse_name(input: &mut Reader<'_>) -> Result<String, SftpError> {
    String::from_utf8(input.bytes()?.to_vec()).map_err(|_| Status::BadMessage.into())
}

impl VersionOps for V456Ops {
    fn send_names(
        &self,
        proto: &Protocol,
        out: &mut SendBuffer,
        charset: &Charset,
        names: &[Attributes],
    ) -> Result<(), SftpError> {
        out.u32(names.len() as u32);
        for attrs in names {
            out.bytes(&self.encode_filename(charset, &attrs.name)?);
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
        let subsecond = valid.contains(AttrMask::SUBSECOND_TIMES);
        out.u32(valid.bits());
        out.u8(attrs.file_type);
        if valid.contains(AttrMask::SIZE) {
            out.u64(attrs.size);
        }
        if valid.contains(AttrMask::OWNERGROUP) {
            out.string(&attrs.owner);
            out.string(&attrs.group);
        }
        if valid.contains(AttrMask::PERMISSIONS) {
            out.u32(attrs.permissions);
        }
        if valid.contains(AttrMask::ACCESSTIME) {
            send_time(out, attrs.atime, subsecond);
        }
        if valid.contains(AttrMask::CREATETIME) {
            send_time(out, attrs.createtime, subsecond);
        }
        if valid.contains(AttrMask::MODIFYTIME) {
            send_time(out, attrs.mtime, subsecond);
        }
        if valid.contains(AttrMask::CTIME) {
            send_time(out, attrs.ctime, subsecond);
        }
        if valid.contains(AttrMask::BITS) {
            out.u32(attrs.attrib_bits);
            if proto.version >= 6 {
                out.u32(attrs.attrib_bits_valid);
            }
        }
        if valid.contains(AttrMask::TEXT_HINT) {
            out.u8(attrs.text_hint);
        }
        if valid.contains(AttrMask::MIME_TYPE) {
            out.string(&attrs.mime_type);
        }
        if valid.contains(AttrMask::LINK_COUNT) {
            out.u32(attrs.link_count);
        }
        Ok(())
    }

    fn parse_attrs(
        &self,
        proto: &Protocol,
        input: &mut Reader<'_>,
    ) -> Result<Attributes, SftpError> {
        let valid = AttrMask::from_bits_retain(input.u32()?);
        let subsecond = valid.contains(AttrMask::SUBSECOND_TIMES);
        let mut attrs = Attributes {
            valid,
            file_type: input.u8()?,
            ..Attributes::default()
        };
        if valid.contains(AttrMask::SIZE) {
            attrs.size = input.u64()?;
        }
        if valid.contains(AttrMask::OWNERGROUP) {
            attrs.owner = parse_name(input)?;
            attrs.group = parse_name(input)?;
        }
        if valid.contains(AttrMask::PERMISSIONS) {
            attrs.permissions = input.u32()?;
        }
        if valid.contains(AttrMask::ACCESSTIME) {
            attrs.atime = parse_time(input, subsecond)?;
        }
        if valid.contains(AttrMask::CREATETIME) {
            attrs.createtime = parse_time(input, subsecond)?;
        }
        if valid.contains(AttrMask::MODIFYTIME) {
            attrs.mtime = parse_time(input, subsecond)?;
        }
        if valid.contains(AttrMask::CTIME) {
            attrs.ctime = parse_time(input, subsecond)?;
        }
        if valid.contains(AttrMask::ACL) {
            // ACLs are parsed and ignored.
            input.bytes()?;
            attrs.valid.remove(AttrMask::ACL);
        }
        if valid.contains(AttrMask::BITS) {
            attrs.attrib_bits = input.u32()?;
            attrs.attrib_bits_valid = if proto.version >= 6 {
                input.u32()?
            } else {
                // draft-05 s5.8: all bits defined there are meaningful.
                0x7ff
            };
        }
        if valid.contains(AttrMask::TEXT_HINT) {
            attrs.text_hint = input.u8()?;
        }
        if valid.contains(AttrMask::MIME_TYPE) {
            attrs.mime_type = parse_name(input)?;
        }
        if valid.contains(AttrMask::LINK_COUNT) {
            attrs.link_count = input.u32()?;
        }
        if valid.contains(AttrMask::UNTRANSLATED_NAME) {
            input.bytes()?;
            attrs.valid.remove(AttrMask::UNTRANSLATED_NAME);
        }
        if valid.contains(AttrMask::EXTENDED) {
            let mut count = input.u32()?;
            while count > 0 {
                input.bytes()?;
                input.bytes()?;
                count -= 1;
            }
            attrs.valid.remove(AttrMask::EXTENDED);
        }
        Ok(attrs)
    }

    fn encode_filename(&self, charset: &Charset, name: &OsStr) -> Result<Vec<u8>, SftpError> {
        charset
            .local_to_utf8(name)
            .map(|b| b.into_owned())
            .ok_or_else(|| Status::InvalidFilename.into())
    }

    fn decode_filename(&self, charset: &Charset, bytes: &[u8]) -> Result<PathBuf, SftpError> {
        charset
            .utf8_to_local(bytes)
            .map(PathBuf::from)
            .ok_or_else(|| Status::InvalidFilename.into())
    }
}

/// Shared tail of the v4+ stat family. The request's flags word names the
/// attribute groups the client wants; owner/group resolution only happens
/// when asked for. The word is parsed after the syscall, like the
/// reference server, so a failed stat never reads it.
fn v456_stat_reply(
    req: &mut SftpRequest<'_>,
    st: nix::Result<nix::sys::stat::FileStat>,
    path: Option<&std::path::Path>,
) -> HandlerResult {
    let st = st?;
    let flags = AttrMask::from_bits_retain(req.input.u32()?);
    let attrs = attrs::stat_to_attrs(&st, flags, path);
    req.attrs_reply(&attrs)
}

pub(crate) fn sftp_v456_stat(req: &mut SftpRequest<'_>) -> HandlerResult {
    let path = req.parse_path()?;
    debug!("sftp_v456_stat {path:?}");
    v456_stat_reply(req, nix::sys::stat::stat(&path), Some(path.as_path()))
}

pub(crate) fn sftp_v456_lstat(req: &mut SftpRequest<'_>) -> HandlerResult {
    let path = req.parse_path()?;
    debug!("sftp_v456_lstat {path:?}");
    v456_stat_reply(req, nix::sys::stat::lstat(&path), Some(path.as_path()))
}

pub(crate) fn sftp_v456_fstat(req: &mut SftpRequest<'_>) -> HandlerResult {
    let handle = req.parse_handle()?;
    debug!("sftp_v456_fstat {handle:?}");
    let (fd, _) = req.server.handles.file(handle).map_err(SftpError::Status)?;
    v456_stat_reply(req, nix::sys::stat::fstat(fd.as_fd()), None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::versions::{V4, V6};

    fn round_trip(proto: &Protocol, attrs: &Attributes) -> Attributes {
        let mut out = SendBuffer::new();
        out.begin();
        V456Ops
            .send_attrs(proto, &mut out, &Charset::new(), attrs)
            .unwrap();
        let payload = out.payload().to_vec();
        let mut r = Reader::new(&payload);
        let parsed = V456Ops.parse_attrs(proto, &mut r).unwrap();
        assert!(r.is_empty());
        parsed
    }

    #[test]
    fn v6_round_trip_preserves_fields() {
        let attrs = Attributes {
            valid: AttrMask::SIZE
                | AttrMask::OWNERGROUP
                | AttrMask::PERMISSIONS
                | AttrMask::ACCESSTIME
                | AttrMask::MODIFYTIME
                | AttrMask::CTIME
                | AttrMask::SUBSECOND_TIMES
                | AttrMask::BITS
                | AttrMask::LINK_COUNT,
            file_type: SSH_FILEXFER_TYPE_REGULAR,
            size: 42,
            owner: "alice".into(),
            group: "users".into(),
            permissions: 0o644,
            atime: SftpTime {
                seconds: -1,
                nanoseconds: 500,
            },
            mtime: SftpTime {
                seconds: 1_700_000_000,
                nanoseconds: 1,
            },
            ctime: SftpTime {
                seconds: 3,
                nanoseconds: 4,
            },
            attrib_bits: AttrBits::HIDDEN.bits(),
            attrib_bits_valid: AttrBits::HIDDEN.bits(),
            link_count: 2,
            ..Attributes::default()
        };
        let parsed = round_trip(&V6, &attrs);
        assert_eq!(parsed.valid, attrs.valid);
        assert_eq!(parsed.size, 42);
        assert_eq!(parsed.owner, "alice");
        assert_eq!(parsed.group, "users");
        // Negative seconds survive the unsigned wire format bit-exactly.
        assert_eq!(parsed.atime.seconds, -1);
        assert_eq!(parsed.atime.nanoseconds, 500);
        assert_eq!(parsed.ctime.seconds, 3);
        assert_eq!(parsed.attrib_bits, AttrBits::HIDDEN.bits());
        assert_eq!(parsed.link_count, 2);
    }

    #[test]
    fn v4_masks_v6_only_fields() {
        let attrs = Attributes {
            valid: AttrMask::SIZE | AttrMask::CTIME | AttrMask::BITS | AttrMask::LINK_COUNT,
            file_type: SSH_FILEXFER_TYPE_DIRECTORY,
            size: 1,
            ctime: SftpTime {
                seconds: 9,
                nanoseconds: 0,
            },
            link_count: 3,
            ..Attributes::default()
        };
        let parsed = round_trip(&V4, &attrs);
        assert_eq!(parsed.valid, AttrMask::SIZE);
        assert_eq!(parsed.file_type, SSH_FILEXFER_TYPE_DIRECTORY);
    }

    #[test]
    fn acl_is_parsed_and_discarded() {
        let mut out = SendBuffer::new();
        out.begin();
        out.u32((AttrMask::SIZE | AttrMask::ACL).bits());
        out.u8(SSH_FILEXFER_TYPE_REGULAR);
        out.u64(5);
        out.bytes(b"opaque acl blob");
        let payload = out.payload().to_vec();
        let mut r = Reader::new(&payload);
        let parsed = V456Ops.parse_attrs(&V6, &mut r).unwrap();
        assert!(r.is_empty());
        assert_eq!(parsed.valid, AttrMask::SIZE);
        assert_eq!(parsed.size, 5);
    }

    #[test]
    fn v5_attrib_bits_get_default_validity() {
        let mut out = SendBuffer::new();
        out.begin();
        out.u32(AttrMask::BITS.bits());
        out.u8(SSH_FILEXFER_TYPE_UNKNOWN);
        out.u32(AttrBits::READONLY.bits());
        let payload = out.payload().to_vec();
        let mut r = Reader::new(&payload);
        let parsed = V456Ops.parse_attrs(&crate::versions::V5, &mut r).unwrap();
        assert_eq!(parsed.attrib_bits, AttrBits::READONLY.bits());
        assert_eq!(parsed.attrib_bits_valid, 0x7ff);
    }

    #[test]
    fn filenames_must_be_utf8() {
        let cs = Charset::new();
        assert!(V456Ops.decode_filename(&cs, &[0xc3, 0x28]).is_err());
        assert_eq!(
            V456Ops.decode_filename(&cs, "dir/fichier".as_bytes()).unwrap(),
            PathBuf::from("dir/fichier")
        );
    }
}
