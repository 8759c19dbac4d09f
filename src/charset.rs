//! Filename character-set conversion seam.
//!
//! Protocol versions 4 and up put UTF-8 on the wire while the filesystem
//! speaks the local encoding. Conversion for non-UTF-8 locales is an
//! external concern; the built-in converter assumes a UTF-8 locale and
//! only validates. Each worker carries its own converter pair, so a future
//! stateful converter needs no locking.

use std::borrow::Cow;
use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::{OsStrExt, OsStringExt};

/// Local-encoding <-> UTF-8 converter pair.
#[derive(Debug, Default, Clone)]
pub struct Charset;

impl Charset {
    pub fn new() -> Charset {
        Charset
    }

    /// Wire UTF-8 to the local encoding. `None` if the wire bytes are not
    /// valid UTF-8.
    pub fn utf8_to_local(&self, bytes: &[u8]) -> Option<OsString> {
        std::str::from_utf8(bytes).ok()?;
        Some(OsString::from_vec(bytes.to_vec()))
    }

    /// Local name to wire UTF-8. `None` if the local name cannot be
    /// represented.
    pub fn local_to_utf8<'a>(&self, name: &'a OsStr) -> Option<Cow<'a, [u8]>> {
        std::str::from_utf8(name.as_bytes()).ok()?;
        Some(Cow::Borrowed(name.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_passes_through() {
        let cs = Charset::new();
        assert_eq!(
            cs.utf8_to_local("héllo".as_bytes()).unwrap(),
            OsString::from("héllo")
        );
        assert_eq!(
            cs.local_to_utf8(OsStr::new("héllo")).unwrap().as_ref(),
            "héllo".as_bytes()
        );
    }

    #[test]
    fn invalid_utf8_is_refused() {
        let cs = Charset::new();
        assert!(cs.utf8_to_local(&[0xff, 0xfe]).is_none());
        assert!(
            cs.local_to_utf8(OsStr::from_bytes(&[b'a', 0xff]))
                .is_none()
        );
    }
}
