//! User and group name lookup.
//!
//! v4+ attributes carry owner/group as names; the filesystem wants numeric
//! ids. The `nix` lookups wrap the reentrant `getpw*_r`/`getgr*_r` calls,
//! so unlike the classic interfaces they need no process-wide lock.

use nix::unistd::{Gid, Group, Uid, User};

pub fn uid_to_name(uid: u32) -> Option<String> {
    User::from_uid(Uid::from_raw(uid))
        .ok()
        .flatten()
        .map(|u| u.name)
}

pub fn gid_to_name(gid: u32) -> Option<String> {
    Group::from_gid(Gid::from_raw(gid))
        .ok()
        .flatten()
        .map(|g| g.name)
}

pub fn name_to_uid(name: &str) -> Option<u32> {
    User::from_name(name).ok().flatten().map(|u| u.uid.as_raw())
}

pub fn name_to_gid(name: &str) -> Option<u32> {
    Group::from_name(name)
        .ok()
        .flatten()
        .map(|g| g.gid.as_raw())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_user_round_trips() {
        let uid = nix::unistd::getuid().as_raw();
        if let Some(name) = uid_to_name(uid) {
            assert_eq!(name_to_uid(&name), Some(uid));
        }
    }

    #[test]
    fn unknown_name_is_none() {
        assert_eq!(name_to_uid("no-such-user-sftpd-test"), None);
    }
}
