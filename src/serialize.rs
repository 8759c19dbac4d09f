//! Request ordering.
//!
//! The drafts demand that the observable outcome match execution in
//! receive order, while explicitly allowing non-conflicting reads and
//! writes to run concurrently. Every inbound job is registered here before
//! it is handed to a worker; a worker then blocks until nothing older and
//! conflicting is still in flight.
//!
//! READ and WRITE registrations are shallow-parsed for their
//! `(handle, offset, length)` triple. Everything else gets a
//! covers-everything sentinel and therefore orders against all of its
//! elders — so a client can stack OPEN, WRITE, CLOSE back to back and rely
//! on the order. Same-handle READs are additionally kept in order by
//! default because Paramiko's prefetcher assumes response order matches
//! request order; `Config::reorder_reads` restores the draft behavior.

use std::sync::{Condvar, Mutex};

use crate::handles::{HandleFlags, HandleId, HandleTable};
use crate::server::Config;
use crate::wire::abi::{SSH_FXP_READ, SSH_FXP_WRITE};
use crate::wire::parse::Reader;

#[derive(Debug, Clone, Copy)]
struct Entry {
    seq: u64,
    op: u8,
    handle: HandleId,
    offset: u64,
    /// Byte count for READ/WRITE; `u64::MAX` means "covers everything".
    len: u64,
    flags: HandleFlags,
}

/// Process-wide ordering queue: one mutex, one broadcast condvar.
#[derive(Debug, Default)]
pub struct Serializer {
    state: Mutex<Vec<Entry>>,
    cond: Condvar,
}

fn is_rw(op: u8) -> bool {
    op == SSH_FXP_READ || op == SSH_FXP_WRITE
}

fn ranges_overlap(a: &Entry, b: &Entry) -> bool {
    if a.len == 0 || b.len == 0 {
        return false;
    }
    let a_end = a.offset.saturating_add(a.len - 1);
    let b_end = b.offset.saturating_add(b.len - 1);
    a.offset <= b_end && b.offset <= a_end
}

/// May `job` run even though `older` is still in flight?
fn reorderable(job: &Entry, older: &Entry, config: &Config) -> bool {
    if !config.reorder {
        return false;
    }
    if !(is_rw(job.op) && is_rw(older.op)) {
        // Nothing else may be re-ordered with respect to anything.
        return false;
    }
    if job.handle != older.handle {
        return true;
    }
    if job.op == SSH_FXP_READ && older.op == SSH_FXP_READ && !config.reorder_reads {
        return false;
    }
    if job.flags.intersects(HandleFlags::TEXT | HandleFlags::APPEND) {
        // Text and append handles have position-dependent semantics.
        return false;
    }
    if (job.op == SSH_FXP_WRITE || older.op == SSH_FXP_WRITE) && ranges_overlap(job, older) {
        return false;
    }
    true
}

impl Serializer {
    pub fn new() -> Serializer {
        Serializer::default()
    }

    /// Record an inbound job before it is queued for execution.
    ///
    /// READ/WRITE headers are parsed with a throwaway cursor; the handler
    /// later re-parses from the start, so nothing here may consume the
    /// job's own state. A malformed header falls back to the sentinel and
    /// simply serializes strictly.
    pub fn register(&self, seq: u64, data: &[u8], handles: &HandleTable) {
        let mut entry = Entry {
            seq,
            op: 0,
            handle: HandleId::default(),
            offset: 0,
            len: u64::MAX,
            flags: HandleFlags::empty(),
        };
        let mut r = Reader::new(data);
        if let Ok(op) = r.u8() {
            entry.op = op;
            if is_rw(op) {
                if let (Ok(_id), Ok(handle), Ok(offset), Ok(len)) =
                    (r.u32(), r.handle(), r.u64(), r.u32())
                {
                    entry.handle = handle;
                    entry.offset = offset;
                    entry.len = u64::from(len);
                    entry.flags = handles.flags(handle);
                }
            }
        }
        self.state.lock().unwrap().push(entry);
    }

    /// Block until every older conflicting job has finished.
    pub fn wait_turn(&self, seq: u64, config: &Config) {
        let mut state = self.state.lock().unwrap();
        loop {
            // A job that was never registered runs immediately.
            let Some(pos) = state.iter().position(|e| e.seq == seq) else {
                return;
            };
            let me = state[pos];
            if state[..pos].iter().all(|old| reorderable(&me, old, config)) {
                return;
            }
            state = self.cond.wait(state).unwrap();
        }
    }

    /// Drop a finished job and wake everything that might now be runnable.
    pub fn remove(&self, seq: u64) {
        let mut state = self.state.lock().unwrap();
        state.retain(|e| e.seq != seq);
        self.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::time::Duration;

    fn entry(op: u8, handle: u32, offset: u64, len: u64, flags: HandleFlags) -> Entry {
        Entry {
            seq: 0,
            op,
            handle: HandleId {
                index: handle,
                tag: 1,
            },
            offset,
            len,
            flags,
        }
    }

    fn cfg() -> Config {
        Config::default()
    }

    #[test]
    fn non_io_never_reorders() {
        let open = entry(3, 0, 0, u64::MAX, HandleFlags::empty());
        let read = entry(SSH_FXP_READ, 1, 0, 10, HandleFlags::empty());
        assert!(!reorderable(&read, &open, &cfg()));
        assert!(!reorderable(&open, &read, &cfg()));
    }

    #[test]
    fn different_handles_always_reorder() {
        let w1 = entry(SSH_FXP_WRITE, 1, 0, 10, HandleFlags::empty());
        let w2 = entry(SSH_FXP_WRITE, 2, 0, 10, HandleFlags::empty());
        assert!(reorderable(&w1, &w2, &cfg()));
    }

    #[test]
    fn overlapping_writes_serialize() {
        let a = entry(SSH_FXP_WRITE, 1, 0, 10, HandleFlags::empty());
        let b = entry(SSH_FXP_WRITE, 1, 5, 10, HandleFlags::empty());
        let c = entry(SSH_FXP_WRITE, 1, 10, 10, HandleFlags::empty());
        assert!(!reorderable(&b, &a, &cfg()));
        assert!(reorderable(&c, &a, &cfg()));
    }

    #[test]
    fn same_handle_reads_keep_order_by_default() {
        let r1 = entry(SSH_FXP_READ, 1, 0, 10, HandleFlags::empty());
        let r2 = entry(SSH_FXP_READ, 1, 100, 10, HandleFlags::empty());
        assert!(!reorderable(&r2, &r1, &cfg()));
        let mut relaxed = cfg();
        relaxed.reorder_reads = true;
        assert!(reorderable(&r2, &r1, &relaxed));
    }

    #[test]
    fn text_and_append_handles_serialize() {
        let w1 = entry(SSH_FXP_WRITE, 1, 0, 10, HandleFlags::APPEND);
        let w2 = entry(SSH_FXP_WRITE, 1, 100, 10, HandleFlags::APPEND);
        assert!(!reorderable(&w2, &w1, &cfg()));
    }

    #[test]
    fn global_switch_disables_everything() {
        let w1 = entry(SSH_FXP_WRITE, 1, 0, 10, HandleFlags::empty());
        let w2 = entry(SSH_FXP_WRITE, 2, 0, 10, HandleFlags::empty());
        let mut off = cfg();
        off.reorder = false;
        assert!(!reorderable(&w1, &w2, &off));
    }

    fn write_msg(id: u32, handle: HandleId, offset: u64, len: u32) -> Vec<u8> {
        let mut m = vec![SSH_FXP_WRITE];
        m.extend_from_slice(&id.to_be_bytes());
        m.extend_from_slice(&8u32.to_be_bytes());
        m.extend_from_slice(&handle.index.to_be_bytes());
        m.extend_from_slice(&handle.tag.to_be_bytes());
        m.extend_from_slice(&offset.to_be_bytes());
        m.extend_from_slice(&len.to_be_bytes());
        m
    }

    #[test]
    fn conflicting_write_blocks_until_predecessor_finishes() {
        let serializer = Arc::new(Serializer::new());
        let handles = HandleTable::new();
        let h = HandleId { index: 0, tag: 7 };
        serializer.register(1, &write_msg(1, h, 0, 100), &handles);
        serializer.register(2, &write_msg(2, h, 50, 100), &handles);
        serializer.wait_turn(1, &cfg());

        let (tx, rx) = mpsc::channel();
        let s2 = serializer.clone();
        let t = std::thread::spawn(move || {
            s2.wait_turn(2, &cfg());
            tx.send(()).unwrap();
        });
        // The overlapping write must still be parked.
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        serializer.remove(1);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        t.join().unwrap();
        serializer.remove(2);
    }

    #[test]
    fn disjoint_writes_do_not_block() {
        let serializer = Serializer::new();
        let handles = HandleTable::new();
        let h = HandleId { index: 0, tag: 7 };
        serializer.register(1, &write_msg(1, h, 0, 10), &handles);
        serializer.register(2, &write_msg(2, h, 1000, 10), &handles);
        // Returns without remove(1) ever happening.
        serializer.wait_turn(2, &cfg());
    }
}
