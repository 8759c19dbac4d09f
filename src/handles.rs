//! Handle table.
//!
//! Open files and directory streams are externalized as opaque 8-byte
//! handles: a slot index plus a generation tag, both network order. A
//! handle is valid only while its tag matches the slot's current tag, so a
//! stale handle presented after `close` fails validation instead of
//! aliasing whatever reused the slot. Tag 0 is reserved to mean "free" and
//! is never assigned.

use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use bitflags::bitflags;
use nix::dir::Dir;

use crate::fsops;
use crate::status::{SftpError, Status};

/// Hard cap on concurrently open handles.
pub const MAX_HANDLES: usize = 128;

/// Externalized handle identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HandleId {
    pub index: u32,
    pub tag: u32,
}

bitflags! {
    /// Properties recorded when a file handle is created.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HandleFlags: u32 {
        /// Opened with `O_APPEND`; WRITE ignores the supplied offset.
        const APPEND = 0x1;
        /// Text-mode handle; READ ignores the supplied offset and the
        /// serializer never reorders operations on it.
        const TEXT   = 0x2;
    }
}

enum HandleKind {
    File(Arc<OwnedFd>),
    Dir(Arc<Mutex<Dir>>),
}

struct Entry {
    kind: HandleKind,
    path: PathBuf,
    flags: HandleFlags,
}

struct Slot {
    tag: u32,
    entry: Option<Entry>,
}

struct TableState {
    slots: Vec<Slot>,
    sequence: u32,
}

/// Process-wide table of live handles, one mutex for everything.
/// Contention is noise next to the I/O the handles gate.
pub struct HandleTable {
    state: Mutex<TableState>,
}

impl HandleTable {
    pub fn new() -> HandleTable {
        HandleTable {
            state: Mutex::new(TableState {
                slots: Vec::new(),
                sequence: 0,
            }),
        }
    }

    fn insert(&self, entry: Entry) -> Result<HandleId, SftpError> {
        let mut state = self.state.lock().unwrap();
        let index = match state.slots.iter().position(|s| s.tag == 0) {
            Some(n) => n,
            None if state.slots.len() < MAX_HANDLES => {
                state.slots.push(Slot {
                    tag: 0,
                    entry: None,
                });
                state.slots.len() - 1
            }
            None => return Err(SftpError::Status(Status::Failure)),
        };
        state.sequence = state.sequence.wrapping_add(1);
        while state.sequence == 0 {
            state.sequence = state.sequence.wrapping_add(1);
        }
        let tag = state.sequence;
        state.slots[index] = Slot {
            tag,
            entry: Some(entry),
        };
        Ok(HandleId {
            index: index as u32,
            tag,
        })
    }

    pub fn new_file(
        &self,
        fd: OwnedFd,
        path: &Path,
        flags: HandleFlags,
    ) -> Result<HandleId, SftpError> {
        self.insert(Entry {
            kind: HandleKind::File(Arc::new(fd)),
            path: path.to_path_buf(),
            flags,
        })
    }

    pub fn new_dir(&self, dir: Dir, path: &Path) -> Result<HandleId, SftpError> {
        self.insert(Entry {
            kind: HandleKind::Dir(Arc::new(Mutex::new(dir))),
            path: path.to_path_buf(),
            flags: HandleFlags::empty(),
        })
    }

    fn entry<'a>(state: &'a TableState, id: HandleId) -> Option<&'a Entry> {
        let slot = state.slots.get(id.index as usize)?;
        if slot.tag != id.tag || id.tag == 0 {
            return None;
        }
        slot.entry.as_ref()
    }

    /// Look up a file handle, yielding the descriptor and its flags.
    pub fn file(&self, id: HandleId) -> Result<(Arc<OwnedFd>, HandleFlags), Status> {
        let state = self.state.lock().unwrap();
        match Self::entry(&state, id) {
            Some(Entry {
                kind: HandleKind::File(fd),
                flags,
                ..
            }) => Ok((fd.clone(), *flags)),
            _ => Err(Status::InvalidHandle),
        }
    }

    /// Look up a directory handle, yielding the stream and its path.
    pub fn dir(&self, id: HandleId) -> Result<(Arc<Mutex<Dir>>, PathBuf), Status> {
        let state = self.state.lock().unwrap();
        match Self::entry(&state, id) {
            Some(Entry {
                kind: HandleKind::Dir(dir),
                path,
                ..
            }) => Ok((dir.clone(), path.clone())),
            _ => Err(Status::InvalidHandle),
        }
    }

    /// Flags snapshot for the serializer; empty for anything invalid.
    pub fn flags(&self, id: HandleId) -> HandleFlags {
        let state = self.state.lock().unwrap();
        Self::entry(&state, id).map_or(HandleFlags::empty(), |e| e.flags)
    }

    /// Free the slot and close the underlying descriptor or stream,
    /// reporting the close error if the OS gives one.
    pub fn close(&self, id: HandleId) -> Result<(), SftpError> {
        let entry = {
            let mut state = self.state.lock().unwrap();
            let slot = state
                .slots
                .get_mut(id.index as usize)
                .filter(|s| s.tag == id.tag && id.tag != 0)
                .ok_or(SftpError::Status(Status::InvalidHandle))?;
            slot.tag = 0;
            slot.entry.take()
        };
        match entry.map(|e| e.kind) {
            Some(HandleKind::File(fd)) => match Arc::try_unwrap(fd) {
                Ok(fd) => fsops::close(fd).map_err(SftpError::from),
                // A reader still holds a clone; the descriptor closes when
                // the last clone drops.
                Err(_) => Ok(()),
            },
            // closedir happens on drop; nix reports no error from it.
            Some(HandleKind::Dir(_)) => Ok(()),
            None => Err(SftpError::Status(Status::InvalidHandle)),
        }
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        HandleTable::new()
    }
}

impl std::fmt::Debug for HandleTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap();
        let live = state.slots.iter().filter(|s| s.tag != 0).count();
        f.debug_struct("HandleTable").field("live", &live).finish()
    }
}
