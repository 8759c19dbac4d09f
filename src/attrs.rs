//! File attributes.
//!
//! One canonical record covers every protocol version's on-wire attribute
//! encoding; the `valid` mask says which fields mean anything. The mask
//! always uses the v6 bit assignments — the v3 codec translates its shared
//! atime/mtime bit on the way through. Conversion to and from the wire
//! lives with the per-version codecs; this module owns the record itself,
//! conversion from `stat` results, attribute application for SETSTAT, and
//! the ls-style `longname` used by v3 name lists.

use std::ffi::OsString;
use std::os::fd::BorrowedFd;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use nix::sys::stat::{self, FileStat};
use time::OffsetDateTime;

use crate::fsops;
use crate::users;
use crate::wire::abi::*;

/// Seconds since the epoch plus optional nanoseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SftpTime {
    pub seconds: i64,
    pub nanoseconds: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attributes {
    pub valid: AttrMask,
    pub file_type: u8,
    pub size: u64,
    pub allocation_size: u64,
    /// v3 numeric ownership.
    pub uid: u32,
    pub gid: u32,
    /// v4+ named ownership.
    pub owner: String,
    pub group: String,
    pub permissions: u32,
    pub atime: SftpTime,
    pub createtime: SftpTime,
    pub mtime: SftpTime,
    pub ctime: SftpTime,
    pub attrib_bits: u32,
    pub attrib_bits_valid: u32,
    pub text_hint: u8,
    pub mime_type: String,
    pub link_count: u32,
    /// Filename in the local encoding, for name lists.
    pub name: OsString,
    /// Symlink target, for v3 longnames.
    pub target: Option<OsString>,
}

impl Default for Attributes {
    fn default() -> Attributes {
        Attributes {
            valid: AttrMask::empty(),
            file_type: SSH_FILEXFER_TYPE_UNKNOWN,
            size: 0,
            allocation_size: 0,
            uid: 0,
            gid: 0,
            owner: String::new(),
            group: String::new(),
            permissions: 0,
            atime: SftpTime::default(),
            createtime: SftpTime::default(),
            mtime: SftpTime::default(),
            ctime: SftpTime::default(),
            attrib_bits: 0,
            attrib_bits_valid: 0,
            text_hint: 0,
            mime_type: String::new(),
            link_count: 0,
            name: OsString::new(),
            target: None,
        }
    }
}

fn type_of_mode(mode: u32) -> u8 {
    match mode & libc::S_IFMT {
        libc::S_IFIFO => SSH_FILEXFER_TYPE_FIFO,
        libc::S_IFCHR => SSH_FILEXFER_TYPE_CHAR_DEVICE,
        libc::S_IFDIR => SSH_FILEXFER_TYPE_DIRECTORY,
        libc::S_IFBLK => SSH_FILEXFER_TYPE_BLOCK_DEVICE,
        libc::S_IFREG => SSH_FILEXFER_TYPE_REGULAR,
        libc::S_IFLNK => SSH_FILEXFER_TYPE_SYMLINK,
        libc::S_IFSOCK => SSH_FILEXFER_TYPE_SOCKET,
        _ => SSH_FILEXFER_TYPE_SPECIAL,
    }
}

fn subseconds_in_range(st: &FileStat) -> bool {
    (0..1_000_000_000).contains(&st.st_atime_nsec)
        && (0..1_000_000_000).contains(&st.st_mtime_nsec)
        && (0..1_000_000_000).contains(&st.st_ctime_nsec)
}

/// Build an attribute record from a `stat` result.
///
/// Owner and group names are looked up only when `want` asks for
/// OWNERGROUP; numeric ids are always carried. `path`, when known, feeds
/// the name field and the hidden attrib-bit.
pub fn stat_to_attrs(st: &FileStat, want: AttrMask, path: Option<&Path>) -> Attributes {
    let mut attrs = Attributes {
        valid: AttrMask::SIZE
            | AttrMask::PERMISSIONS
            | AttrMask::ACCESSTIME
            | AttrMask::MODIFYTIME
            | AttrMask::UIDGID
            | AttrMask::ALLOCATION_SIZE
            | AttrMask::LINK_COUNT
            | AttrMask::CTIME
            | AttrMask::BITS,
        file_type: type_of_mode(st.st_mode as u32),
        size: st.st_size as u64,
        allocation_size: (st.st_blksize as u64).wrapping_mul(st.st_blocks as u64),
        uid: st.st_uid,
        gid: st.st_gid,
        permissions: st.st_mode as u32,
        atime: SftpTime {
            seconds: st.st_atime as i64,
            nanoseconds: 0,
        },
        mtime: SftpTime {
            seconds: st.st_mtime as i64,
            nanoseconds: 0,
        },
        ctime: SftpTime {
            seconds: st.st_ctime as i64,
            nanoseconds: 0,
        },
        link_count: st.st_nlink as u32,
        ..Attributes::default()
    };
    if want.contains(AttrMask::OWNERGROUP) {
        if let (Some(owner), Some(group)) =
            (users::uid_to_name(st.st_uid), users::gid_to_name(st.st_gid))
        {
            attrs.owner = owner;
            attrs.group = group;
            attrs.valid |= AttrMask::OWNERGROUP;
        }
    }
    if subseconds_in_range(st) {
        attrs.atime.nanoseconds = st.st_atime_nsec as u32;
        attrs.mtime.nanoseconds = st.st_mtime_nsec as u32;
        attrs.ctime.nanoseconds = st.st_ctime_nsec as u32;
        attrs.valid |= AttrMask::SUBSECOND_TIMES;
    }
    if let Some(path) = path {
        let bytes = path.as_os_str().as_bytes();
        let trimmed = bytes.strip_suffix(b"/").unwrap_or(bytes);
        let base = match trimmed.iter().rposition(|&b| b == b'/') {
            Some(n) => &trimmed[n + 1..],
            None => trimmed,
        };
        if base.first() == Some(&b'.') {
            attrs.attrib_bits |= AttrBits::HIDDEN.bits();
        }
        attrs.attrib_bits_valid |= AttrBits::HIDDEN.bits();
        attrs.name = path.as_os_str().to_os_string();
    }
    attrs
}

/// Fill in whichever of uid/gid and owner/group is missing, where the
/// name service can. Both names must resolve for the numeric pair to be
/// considered valid; a half-resolved pair stays name-only.
pub fn normalize_owner_group(attrs: &mut Attributes) {
    match (
        attrs.valid.contains(AttrMask::UIDGID),
        attrs.valid.contains(AttrMask::OWNERGROUP),
    ) {
        (true, false) => {
            if let (Some(owner), Some(group)) =
                (users::uid_to_name(attrs.uid), users::gid_to_name(attrs.gid))
            {
                attrs.owner = owner;
                attrs.group = group;
                attrs.valid |= AttrMask::OWNERGROUP;
            }
        }
        (false, true) => {
            if let (Some(uid), Some(gid)) = (
                users::name_to_uid(&attrs.owner),
                users::name_to_gid(&attrs.group),
            ) {
                attrs.uid = uid;
                attrs.gid = gid;
                attrs.valid |= AttrMask::UIDGID;
            }
        }
        _ => {}
    }
}

#[derive(Clone, Copy)]
enum SetstatTarget<'a> {
    Path(&'a Path),
    Fd(BorrowedFd<'a>),
}

/// Apply attributes in the draft-mandated order: truncate, chown, chmod,
/// utimes. The first failing call aborts the rest. Requests to set ctime
/// or createtime are ignored silently.
fn apply_attrs(target: SetstatTarget<'_>, attrs: &Attributes) -> nix::Result<()> {
    let mut attrs = attrs.clone();
    if attrs.valid.contains(AttrMask::SIZE) {
        match target {
            SetstatTarget::Path(p) => fsops::truncate(p, attrs.size)?,
            SetstatTarget::Fd(fd) => fsops::ftruncate(fd, attrs.size)?,
        }
    }
    normalize_owner_group(&mut attrs);
    if attrs.valid.contains(AttrMask::UIDGID) {
        match target {
            SetstatTarget::Path(p) => fsops::lchown(p, Some(attrs.uid), Some(attrs.gid))?,
            SetstatTarget::Fd(fd) => fsops::fchown(fd, Some(attrs.uid), Some(attrs.gid))?,
        }
    }
    if attrs.valid.contains(AttrMask::PERMISSIONS) {
        let mode = attrs.permissions & 0o7777;
        match target {
            SetstatTarget::Path(p) => fsops::chmod(p, mode)?,
            SetstatTarget::Fd(fd) => fsops::fchmod(fd, mode)?,
        }
    }
    if attrs
        .valid
        .intersects(AttrMask::ACCESSTIME | AttrMask::MODIFYTIME)
    {
        // A half-specified time pair is completed from the file's current
        // timestamps.
        let current = match target {
            SetstatTarget::Path(p) => stat::lstat(p)?,
            SetstatTarget::Fd(fd) => stat::fstat(fd)?,
        };
        let subsec = attrs.valid.contains(AttrMask::SUBSECOND_TIMES);
        let atime = if attrs.valid.contains(AttrMask::ACCESSTIME) {
            (
                attrs.atime.seconds,
                if subsec {
                    attrs.atime.nanoseconds as i64 / 1000
                } else {
                    0
                },
            )
        } else {
            (st_secs(current.st_atime), current.st_atime_nsec as i64 / 1000)
        };
        let mtime = if attrs.valid.contains(AttrMask::MODIFYTIME) {
            (
                attrs.mtime.seconds,
                if subsec {
                    attrs.mtime.nanoseconds as i64 / 1000
                } else {
                    0
                },
            )
        } else {
            (st_secs(current.st_mtime), current.st_mtime_nsec as i64 / 1000)
        };
        match target {
            SetstatTarget::Path(p) => fsops::utimes(p, atime, mtime)?,
            SetstatTarget::Fd(fd) => fsops::futimes(fd, atime, mtime)?,
        }
    }
    Ok(())
}

fn st_secs(t: libc::time_t) -> i64 {
    t as i64
}

/// SETSTAT: apply attributes to a path (not following a final symlink for
/// the ownership change, as the reference server does).
pub fn set_status(path: &Path, attrs: &Attributes) -> nix::Result<()> {
    apply_attrs(SetstatTarget::Path(path), attrs)
}

/// FSETSTAT: apply attributes through an open descriptor.
pub fn set_fstatus(fd: BorrowedFd<'_>, attrs: &Attributes) -> nix::Result<()> {
    apply_attrs(SetstatTarget::Fd(fd), attrs)
}

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// The year used to decide between time-of-day and year date columns.
pub fn current_year() -> i32 {
    OffsetDateTime::now_utc().year()
}

fn permission_chars(attrs: &Attributes) -> String {
    // "?-dl??scbp" indexed by file type
    const TYPE_CHARS: &[u8; 10] = b"?-dl??scbp";
    let mut s = String::with_capacity(10);
    s.push(TYPE_CHARS[usize::from(attrs.file_type.min(9))] as char);
    if !attrs.valid.contains(AttrMask::PERMISSIONS) {
        s.push_str("?????????");
        return s;
    }
    let p = attrs.permissions;
    s.push(if p & 0o400 != 0 { 'r' } else { '-' });
    s.push(if p & 0o200 != 0 { 'w' } else { '-' });
    s.push(match p & 0o4100 {
        0o0000 => '-',
        0o0100 => 'x',
        0o4000 => 'S',
        _ => 's',
    });
    s.push(if p & 0o040 != 0 { 'r' } else { '-' });
    s.push(if p & 0o020 != 0 { 'w' } else { '-' });
    s.push(match p & 0o2010 {
        0o0000 => '-',
        0o0010 => 'x',
        0o2000 => 'S',
        _ => 's',
    });
    s.push(if p & 0o004 != 0 { 'r' } else { '-' });
    s.push(if p & 0o002 != 0 { 'w' } else { '-' });
    s.push(match p & 0o1001 {
        0o0000 => '-',
        0o0001 => 'x',
        0o1000 => 'T',
        _ => 't',
    });
    s
}

/// ls-style description line for v3 `SSH_FXP_NAME` entries. The draft is
/// specific about the field widths; timestamps inside `this_year` show the
/// time of day, older ones the year.
pub fn format_longname(attrs: &Attributes, this_year: i32) -> String {
    let perms = permission_chars(attrs);
    let links = if attrs.valid.contains(AttrMask::LINK_COUNT) {
        attrs.link_count.to_string()
    } else {
        "?".to_string()
    };
    let size = if attrs.valid.contains(AttrMask::SIZE) {
        attrs.size.to_string()
    } else {
        "?".to_string()
    };
    let (owner, group) = if attrs.valid.contains(AttrMask::OWNERGROUP) {
        (attrs.owner.clone(), attrs.group.clone())
    } else if attrs.valid.contains(AttrMask::UIDGID) {
        (attrs.uid.to_string(), attrs.gid.to_string())
    } else {
        ("?".to_string(), "?".to_string())
    };
    let date = if attrs.valid.contains(AttrMask::MODIFYTIME) {
        match OffsetDateTime::from_unix_timestamp(attrs.mtime.seconds) {
            Ok(dt) => {
                let month = MONTHS[usize::from(u8::from(dt.month())) - 1];
                if dt.year() == this_year {
                    format!("{} {:02} {:02}:{:02}", month, dt.day(), dt.hour(), dt.minute())
                } else {
                    format!("{} {:02}  {}", month, dt.day(), dt.year())
                }
            }
            Err(_) => "?".to_string(),
        }
    } else {
        "?".to_string()
    };
    let name = attrs.name.to_string_lossy();
    let target = match &attrs.target {
        Some(t) => format!(" -> {}", t.to_string_lossy()),
        None => String::new(),
    };
    format!(
        "{:>10.10} {:>3.3} {:<8.8} {:<8.8} {:>8.8} {:>12.12} {}{}",
        perms, links, owner, group, size, date, name, target
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    #[test]
    fn mode_to_type() {
        assert_eq!(type_of_mode(libc::S_IFREG | 0o644), SSH_FILEXFER_TYPE_REGULAR);
        assert_eq!(
            type_of_mode(libc::S_IFDIR | 0o755),
            SSH_FILEXFER_TYPE_DIRECTORY
        );
        assert_eq!(type_of_mode(libc::S_IFLNK | 0o777), SSH_FILEXFER_TYPE_SYMLINK);
    }

    #[test]
    fn stat_conversion_basics() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file");
        std::fs::write(&path, b"hello").unwrap();
        let st = stat::lstat(&path).unwrap();
        let attrs = stat_to_attrs(&st, AttrMask::all(), Some(path.as_path()));
        assert_eq!(attrs.size, 5);
        assert_eq!(attrs.file_type, SSH_FILEXFER_TYPE_REGULAR);
        assert!(attrs.valid.contains(AttrMask::SIZE | AttrMask::UIDGID));
        assert_eq!(attrs.attrib_bits & AttrBits::HIDDEN.bits(), 0);
    }

    #[test]
    fn dotfiles_are_hidden() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".secret");
        std::fs::write(&path, b"").unwrap();
        let st = stat::lstat(&path).unwrap();
        let attrs = stat_to_attrs(&st, AttrMask::empty(), Some(path.as_path()));
        assert_ne!(attrs.attrib_bits & AttrBits::HIDDEN.bits(), 0);
        assert_ne!(attrs.attrib_bits_valid & AttrBits::HIDDEN.bits(), 0);
    }

    #[test]
    fn setstat_order_and_effect() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"0123456789").unwrap();
        let attrs = Attributes {
            valid: AttrMask::SIZE | AttrMask::PERMISSIONS | AttrMask::MODIFYTIME,
            size: 4,
            permissions: 0o600,
            mtime: SftpTime {
                seconds: 1_000_000,
                nanoseconds: 0,
            },
            ..Attributes::default()
        };
        set_status(&path, &attrs).unwrap();
        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(meta.len(), 4);
        assert_eq!(meta.permissions().mode() & 0o7777, 0o600);
        let st = stat::lstat(&path).unwrap();
        assert_eq!(st.st_mtime, 1_000_000);
    }

    #[test]
    fn longname_layout() {
        let attrs = Attributes {
            valid: AttrMask::SIZE
                | AttrMask::PERMISSIONS
                | AttrMask::MODIFYTIME
                | AttrMask::LINK_COUNT
                | AttrMask::OWNERGROUP,
            file_type: SSH_FILEXFER_TYPE_REGULAR,
            size: 5,
            permissions: 0o644,
            link_count: 1,
            owner: "alice".into(),
            group: "users".into(),
            // 2001-09-09T01:46:40Z
            mtime: SftpTime {
                seconds: 1_000_000_000,
                nanoseconds: 0,
            },
            name: OsStr::new("hello.txt").into(),
            ..Attributes::default()
        };
        let line = format_longname(&attrs, 2001);
        assert_eq!(line, "-rw-r--r--   1 alice    users           5 Sep 09 01:46 hello.txt");
        let old = format_longname(&attrs, 2026);
        assert!(old.ends_with("Sep 09  2001 hello.txt"));
    }

    #[test]
    fn longname_symlink_target() {
        let attrs = Attributes {
            valid: AttrMask::PERMISSIONS,
            file_type: SSH_FILEXFER_TYPE_SYMLINK,
            permissions: 0o777,
            name: OsStr::new("l").into(),
            target: Some(OsStr::new("/t").into()),
            ..Attributes::default()
        };
        let line = format_longname(&attrs, 2026);
        assert!(line.starts_with("lrwxrwxrwx"));
        assert!(line.ends_with("l -> /t"));
    }
}
