//! Per-request scratch arena.
//!
//! A bump allocator over chained chunks. Allocations are zero-filled and
//! live until [`Arena::reset`]; there is no per-object free. Each worker
//! owns one arena and resets it after every request, so a handler can take
//! request-lifetime scratch (READ buffers, readdir staging) without
//! touching the global allocator per object.
//!
//! An arena is single-threaded by construction; it is owned by exactly one
//! worker and never shared.

use std::cell::{Cell, UnsafeCell};

const CHUNK_SIZE: usize = 16 * 1024;

pub struct Arena {
    chunks: UnsafeCell<Vec<Box<[u8]>>>,
    /// Base pointer of the newest chunk.
    base: Cell<*mut u8>,
    /// Capacity of the newest chunk.
    cap: Cell<usize>,
    /// Bytes handed out from the newest chunk.
    used: Cell<usize>,
}

impl Arena {
    pub fn new() -> Arena {
        Arena {
            chunks: UnsafeCell::new(Vec::new()),
            base: Cell::new(std::ptr::null_mut()),
            cap: Cell::new(0),
            used: Cell::new(0),
        }
    }

    /// Allocate `n` zero-filled bytes.
    ///
    /// The region is valid until the arena is reset or dropped; `reset`
    /// takes `&mut self`, which makes holding a region across it a borrow
    /// error rather than a dangling pointer.
    pub fn alloc(&self, n: usize) -> &mut [u8] {
        if n == 0 {
            return &mut [];
        }
        if self.cap.get() - self.used.get() < n {
            self.grow(n);
        }
        let start = self.used.get();
        self.used.set(start + n);
        // SAFETY: the region [base+start, base+start+n) lies inside the
        // newest chunk, is handed out exactly once between resets, and the
        // chunk's heap storage never moves (growing pushes a new boxed
        // chunk; the vector may reallocate but only relocates the box
        // pointers, not the bytes they own).
        unsafe { std::slice::from_raw_parts_mut(self.base.get().add(start), n) }
    }

    fn grow(&self, n: usize) {
        let size = n.max(CHUNK_SIZE);
        let mut chunk = vec![0u8; size].into_boxed_slice();
        self.base.set(chunk.as_mut_ptr());
        self.cap.set(size);
        self.used.set(0);
        // SAFETY: the chunk vector is only touched here and in reset(),
        // never while a previous mutable borrow of it is live.
        unsafe { (*self.chunks.get()).push(chunk) };
    }

    /// Release every chunk. The next allocation starts a fresh chain.
    pub fn reset(&mut self) {
        self.chunks.get_mut().clear();
        self.base.set(std::ptr::null_mut());
        self.cap.set(0);
        self.used.set(0);
    }
}

impl Default for Arena {
    fn default() -> Self {
        Arena::new()
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("cap", &self.cap.get())
            .field("used", &self.used.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_filled() {
        let a = Arena::new();
        let buf = a.alloc(64);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn allocations_are_disjoint() {
        let a = Arena::new();
        let x = a.alloc(8);
        let y = a.alloc(8);
        x.fill(0xaa);
        y.fill(0xbb);
        assert!(x.iter().all(|&b| b == 0xaa));
        assert!(y.iter().all(|&b| b == 0xbb));
    }

    #[test]
    fn oversized_allocation_gets_own_chunk() {
        let a = Arena::new();
        let small = a.alloc(16);
        let big = a.alloc(CHUNK_SIZE * 3);
        assert_eq!(big.len(), CHUNK_SIZE * 3);
        small.fill(1);
        big.fill(2);
        assert!(small.iter().all(|&b| b == 1));
    }

    #[test]
    fn zero_sized_allocations() {
        let a = Arena::new();
        assert!(a.alloc(0).is_empty());
        a.alloc(8).fill(1);
        assert!(a.alloc(0).is_empty());
    }

    #[test]
    fn reset_reuses_cleanly() {
        let mut a = Arena::new();
        a.alloc(32).fill(0xff);
        a.reset();
        let buf = a.alloc(32);
        assert!(buf.iter().all(|&b| b == 0));
    }
}
