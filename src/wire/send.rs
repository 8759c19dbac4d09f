//! Response construction.
//!
//! Each worker owns a [`SendBuffer`]; a response is assembled between
//! [`SendBuffer::begin`] and [`SendBuffer::end`]. `begin` reserves a 4-byte
//! length prefix which `end` back-patches before handing the whole frame to
//! the output stream in one locked write, so responses from concurrent
//! workers never interleave. Nested length fields (the v5 `supported`
//! block, `vendor-id`) use the same reserve-and-patch trick via
//! [`SendBuffer::sub_begin`] / [`SendBuffer::sub_end`].

use std::io::{self, Write};
use std::sync::Mutex;

use crate::handles::HandleId;

/// Grow-only response buffer. The allocation is retained across requests.
#[derive(Debug, Default)]
pub struct SendBuffer {
    buf: Vec<u8>,
}

impl SendBuffer {
    pub fn new() -> SendBuffer {
        SendBuffer::default()
    }

    /// Start a new frame, reserving the length prefix.
    pub fn begin(&mut self) {
        self.buf.clear();
        self.buf.extend_from_slice(&[0; 4]);
    }

    /// Patch the length prefix and write the frame to `out`.
    pub fn end(&mut self, out: &Mutex<Box<dyn Write + Send>>) -> io::Result<()> {
        let len = (self.buf.len() - 4) as u32;
        self.buf[..4].copy_from_slice(&len.to_be_bytes());
        let mut out = out.lock().unwrap();
        out.write_all(&self.buf)?;
        out.flush()
    }

    pub fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Length-prefixed byte string.
    pub fn bytes(&mut self, b: &[u8]) {
        self.u32(b.len() as u32);
        self.buf.extend_from_slice(b);
    }

    pub fn string(&mut self, s: &str) {
        self.bytes(s.as_bytes());
    }

    pub fn handle(&mut self, id: HandleId) {
        self.u32(8);
        self.u32(id.index);
        self.u32(id.tag);
    }

    /// Open a nested length-prefixed block; returns the patch cookie.
    pub fn sub_begin(&mut self) -> usize {
        self.buf.extend_from_slice(&[0; 4]);
        self.buf.len()
    }

    /// Close the block opened at `offset`, patching its length field.
    pub fn sub_end(&mut self, offset: usize) {
        let len = (self.buf.len() - offset) as u32;
        self.buf[offset - 4..offset].copy_from_slice(&len.to_be_bytes());
    }

    /// The frame body assembled so far, without the outer length prefix.
    #[cfg(test)]
    pub(crate) fn payload(&self) -> &[u8] {
        &self.buf[4..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn sink() -> (Mutex<Box<dyn Write + Send>>, std::sync::Arc<Mutex<Vec<u8>>>) {
        #[derive(Clone)]
        struct Shared(std::sync::Arc<Mutex<Vec<u8>>>);
        impl Write for Shared {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        let store = std::sync::Arc::new(Mutex::new(Vec::new()));
        (
            Mutex::new(Box::new(Shared(store.clone())) as Box<dyn Write + Send>),
            store,
        )
    }

    #[test]
    fn frame_length_is_patched() {
        let (out, store) = sink();
        let mut b = SendBuffer::new();
        b.begin();
        b.u8(101);
        b.u32(7);
        b.end(&out).unwrap();
        let written = store.lock().unwrap().clone();
        assert_eq!(written, vec![0, 0, 0, 5, 101, 0, 0, 0, 7]);
    }

    #[test]
    fn strings_and_handles() {
        let mut b = SendBuffer::new();
        b.begin();
        b.string("hi");
        b.handle(HandleId { index: 1, tag: 2 });
        assert_eq!(
            b.payload(),
            &[0, 0, 0, 2, b'h', b'i', 0, 0, 0, 8, 0, 0, 0, 1, 0, 0, 0, 2]
        );
    }

    #[test]
    fn nested_blocks() {
        let mut b = SendBuffer::new();
        b.begin();
        b.u8(2);
        let sub = b.sub_begin();
        b.u32(0xdead_beef);
        b.string("x");
        b.sub_end(sub);
        // 4 (inner u32) + 5 (string) = 9 bytes in the sub-block
        assert_eq!(
            b.payload(),
            &[2, 0, 0, 0, 9, 0xde, 0xad, 0xbe, 0xef, 0, 0, 0, 1, b'x']
        );
    }

    #[test]
    fn buffer_reuse_resets_cleanly() {
        let (out, store) = sink();
        let mut b = SendBuffer::new();
        b.begin();
        b.u64(u64::MAX);
        b.end(&out).unwrap();
        b.begin();
        b.u8(1);
        b.end(&out).unwrap();
        let written = store.lock().unwrap().clone();
        assert_eq!(&written[12..], &[0, 0, 0, 1, 1]);
    }
}
