//! Path canonicalization.
//!
//! `SSH_FXP_REALPATH` wants a lexical cleanup of `.` and `..` against the
//! process's working directory, with symlink chasing only when the v6
//! control byte asks for it. Resolution works on raw bytes so v3 clients
//! with non-UTF-8 names round-trip untouched.

use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::PathBuf;

use bitflags::bitflags;
use nix::errno::Errno;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RealpathFlags: u8 {
        /// Chase symlinks while resolving.
        const READLINK   = 0x1;
        /// Fail with the OS error when a chased component is missing.
        const MUST_EXIST = 0x2;
    }
}

/// `readlink` with a size cap on the target. Targets beyond `max` are
/// reported as `E2BIG` rather than silently truncated.
pub fn read_link_capped(path: &OsStr, max: usize) -> nix::Result<OsString> {
    let target = nix::fcntl::readlink(path)?;
    if target.as_bytes().len() > max {
        return Err(Errno::E2BIG);
    }
    Ok(target)
}

/// Canonicalize `path`.
///
/// Relative input is resolved against the current working directory. The
/// result always starts with `/`. With `READLINK`, every appended
/// component is checked for being a symlink and the target is re-processed
/// in its place; `max_depth` bounds the total number of links chased, and
/// exhausting it surfaces as `ELOOP`.
pub fn find_realpath(
    path: &OsStr,
    flags: RealpathFlags,
    max_depth: usize,
    readlink_max: usize,
) -> nix::Result<PathBuf> {
    let mut input: Vec<u8> = path.as_bytes().to_vec();
    if input.is_empty() {
        input.push(b'.');
    }
    if input[0] != b'/' {
        let cwd = std::env::current_dir().map_err(|_| Errno::ENOENT)?;
        let mut abs = cwd.into_os_string().into_vec();
        abs.push(b'/');
        abs.extend_from_slice(&input);
        input = abs;
    }
    let mut result = vec![b'/'];
    let mut depth = max_depth;
    process_path(&mut result, &input, flags, &mut depth, readlink_max)?;
    Ok(PathBuf::from(OsString::from_vec(result)))
}

fn process_path(
    result: &mut Vec<u8>,
    path: &[u8],
    flags: RealpathFlags,
    depth: &mut usize,
    readlink_max: usize,
) -> nix::Result<()> {
    for element in path.split(|&b| b == b'/') {
        match element {
            b"" | b"." => {}
            b".." => {
                // "/.." stays "/"
                match result.iter().rposition(|&b| b == b'/') {
                    Some(0) | None => result.truncate(1),
                    Some(n) => result.truncate(n),
                }
            }
            _ => {
                let oldlen = result.len();
                if result.len() > 1 {
                    result.push(b'/');
                }
                result.extend_from_slice(element);
                if flags.contains(RealpathFlags::READLINK) {
                    match read_link_capped(OsStr::from_bytes(result), readlink_max) {
                        Ok(target) => {
                            if *depth == 0 {
                                return Err(Errno::ELOOP);
                            }
                            *depth -= 1;
                            if target.as_bytes().first() == Some(&b'/') {
                                // Absolute link restarts from the root.
                                result.truncate(1);
                            } else {
                                // Relative link replaces the component just
                                // appended.
                                result.truncate(oldlen);
                            }
                            let target = target.into_vec();
                            process_path(result, &target, flags, depth, readlink_max)?;
                        }
                        // Not a symlink: carry on.
                        Err(Errno::EINVAL) => {}
                        Err(e) => {
                            if flags.contains(RealpathFlags::MUST_EXIST) {
                                return Err(e);
                            }
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    fn lexical(path: &str) -> String {
        find_realpath(OsStr::new(path), RealpathFlags::empty(), 32, 65536)
            .unwrap()
            .to_string_lossy()
            .into_owned()
    }

    #[test]
    fn lexical_cleanup() {
        assert_eq!(lexical("/"), "/");
        assert_eq!(lexical("/a/b/.."), "/a");
        assert_eq!(lexical("/../.."), "/");
        assert_eq!(lexical("/a//b///c"), "/a/b/c");
        assert_eq!(lexical("/a/./b/."), "/a/b");
    }

    #[test]
    fn relative_paths_use_cwd() {
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(lexical("x"), format!("{}/x", cwd.display()));
        assert_eq!(lexical(""), cwd.display().to_string());
    }

    #[test]
    fn follows_symlinks_when_asked() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("target");
        std::fs::create_dir(&target).unwrap();
        let link = tmp.path().join("l");
        symlink(&target, &link).unwrap();
        let input = link.join("x");

        let followed = find_realpath(
            input.as_os_str(),
            RealpathFlags::READLINK,
            32,
            65536,
        )
        .unwrap();
        assert_eq!(followed, target.join("x"));

        let lexical_only =
            find_realpath(input.as_os_str(), RealpathFlags::empty(), 32, 65536).unwrap();
        assert_eq!(lexical_only, input);
    }

    #[test]
    fn relative_symlinks_resolve_in_place() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("d")).unwrap();
        symlink("d", tmp.path().join("rel")).unwrap();
        let out = find_realpath(
            tmp.path().join("rel/x").as_os_str(),
            RealpathFlags::READLINK,
            32,
            65536,
        )
        .unwrap();
        assert_eq!(out, tmp.path().join("d/x"));
    }

    #[test]
    fn link_loops_are_bounded() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        symlink(&a, &b).unwrap();
        symlink(&b, &a).unwrap();
        let err = find_realpath(a.as_os_str(), RealpathFlags::READLINK, 32, 65536).unwrap_err();
        assert_eq!(err, Errno::ELOOP);
    }

    #[test]
    fn must_exist_reports_missing_components() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("nope/deeper");
        let err = find_realpath(
            missing.as_os_str(),
            RealpathFlags::READLINK | RealpathFlags::MUST_EXIST,
            32,
            65536,
        )
        .unwrap_err();
        assert_eq!(err, Errno::ENOENT);
        // Without MUST_EXIST the same input resolves lexically.
        assert!(
            find_realpath(missing.as_os_str(), RealpathFlags::READLINK, 32, 65536).is_ok()
        );
    }
}
