//! Server context and the dispatch loop.
//!
//! One reader thread frames requests off the input stream and registers
//! them with the serializer; jobs then run on the worker pool, or inline
//! on the reader thread while the pool does not exist yet. The pool is
//! created only after `SSH_FXP_INIT` — and for v6 only after the first
//! post-INIT request, because that request may be `version-select` and
//! must run before anything can execute concurrently.

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use log::{debug, error, warn};

use crate::arena::Arena;
use crate::attrs::Attributes;
use crate::charset::Charset;
use crate::handles::{HandleId, HandleTable};
use crate::queue::WorkerPool;
use crate::serialize::Serializer;
use crate::status::{HandlerResult, Outcome, SftpError, Status};
use crate::versions::{PRE_INIT, Protocol, V3, V4, V5, V6};
use crate::wire::abi::*;
use crate::wire::parse::Reader;
use crate::wire::send::SendBuffer;

/// Server tuning knobs. The defaults match the reference behavior.
#[derive(Debug, Clone)]
pub struct Config {
    /// Reject every mutating operation with `SSH_FX_PERMISSION_DENIED`.
    pub readonly: bool,
    /// Parse v3-v5 `SSH_FXP_SYMLINK` arguments in the reversed
    /// (OpenSSH-compatible) order. The active order is advertised via the
    /// `symlink-order@rjk.greenend.org.uk` extension either way.
    pub reverse_symlink: bool,
    /// Master switch for request reordering. Off means strict FIFO.
    pub reorder: bool,
    /// Allow same-handle READs to reorder as the draft permits. Off by
    /// default: Paramiko's prefetcher assumes response order matches
    /// request order.
    pub reorder_reads: bool,
    /// Worker threads.
    pub threads: usize,
    /// Largest acceptable request frame; anything bigger is fatal.
    pub max_request: u32,
    /// Cap on a single READ.
    pub max_read: u32,
    /// Entries per READDIR response.
    pub max_names: usize,
    /// Symlinks chased per REALPATH before reporting a loop.
    pub link_depth: usize,
    /// Largest acceptable symlink target.
    pub readlink_max: usize,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            readonly: false,
            reverse_symlink: false,
            reorder: true,
            reorder_reads: false,
            threads: 4,
            max_request: 1024 * 1024,
            max_read: 1024 * 1024,
            max_names: 32,
            link_depth: 32,
            readlink_max: 64 * 1024,
        }
    }
}

/// One inbound request: the raw frame plus its position in receive order.
#[derive(Debug)]
pub struct Job {
    pub seq: u64,
    pub data: Vec<u8>,
}

/// Per-thread processing state: the response buffer, the request-scratch
/// arena and the filename converters.
#[derive(Debug, Default)]
pub struct Worker {
    pub out: SendBuffer,
    pub arena: Arena,
    pub charset: Charset,
}

impl Worker {
    pub fn new() -> Worker {
        Worker::default()
    }
}

/// Read-mostly pointer to the negotiated protocol descriptor. All targets
/// are statics, so loads hand out `&'static` directly.
struct ProtocolCell(AtomicPtr<Protocol>);

impl ProtocolCell {
    fn new(proto: &'static Protocol) -> ProtocolCell {
        ProtocolCell(AtomicPtr::new(proto as *const Protocol as *mut Protocol))
    }

    fn load(&self) -> &'static Protocol {
        // SAFETY: only ever stores pointers to 'static Protocol values.
        unsafe { &*self.0.load(Ordering::Acquire) }
    }

    fn store(&self, proto: &'static Protocol) {
        self.0
            .store(proto as *const Protocol as *mut Protocol, Ordering::Release);
    }
}

/// Everything shared between the reader and the workers.
pub struct Server {
    pub config: Config,
    pub handles: HandleTable,
    pub serializer: Serializer,
    pub(crate) output: Mutex<Box<dyn Write + Send>>,
    protocol: ProtocolCell,
    pool: Mutex<Option<WorkerPool>>,
    next_seq: AtomicU64,
    shutdown: AtomicBool,
    me: Weak<Server>,
}

impl Server {
    pub fn new(config: Config, output: Box<dyn Write + Send>) -> Arc<Server> {
        Arc::new_cyclic(|me| Server {
            config,
            handles: HandleTable::new(),
            serializer: Serializer::new(),
            output: Mutex::new(output),
            protocol: ProtocolCell::new(&PRE_INIT),
            pool: Mutex::new(None),
            next_seq: AtomicU64::new(1),
            shutdown: AtomicBool::new(false),
            me: me.clone(),
        })
    }

    /// The currently negotiated protocol descriptor.
    pub fn protocol(&self) -> &'static Protocol {
        self.protocol.load()
    }

    pub(crate) fn set_protocol(&self, proto: &'static Protocol) {
        self.protocol.store(proto);
    }

    pub(crate) fn workers_started(&self) -> bool {
        self.pool.lock().unwrap().is_some()
    }

    pub(crate) fn start_workers(&self) {
        let mut pool = self.pool.lock().unwrap();
        if pool.is_some() {
            return;
        }
        let Some(server) = self.me.upgrade() else {
            return;
        };
        match WorkerPool::start(server, self.config.threads) {
            Ok(p) => *pool = Some(p),
            Err(e) => warn!("cannot start worker threads, staying synchronous: {e}"),
        }
    }

    /// Ask the dispatch loop to stop after the current request.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Run the dispatch loop until EOF or a fatal protocol error.
    ///
    /// EOF is the normal shutdown path: remaining queued jobs drain, the
    /// worker pool joins, and the call returns `Ok`.
    pub fn serve(&self, mut input: impl Read) -> io::Result<()> {
        // draft-13 s7.6: the server SHOULD NOT apply a umask to the mode
        // bits supplied by the client.
        nix::sys::stat::umask(nix::sys::stat::Mode::empty());
        let mut dispatcher = Worker::new();
        let result = loop {
            if self.shutting_down() {
                break Ok(());
            }
            let data = match read_frame(&mut input, self.config.max_request) {
                Ok(Some(data)) => data,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            };
            let job = Job {
                seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                data,
            };
            self.serializer.register(job.seq, &job.data, &self.handles);
            let pool = self.pool.lock().unwrap();
            if let Some(pool) = &*pool {
                pool.push(job);
            } else {
                drop(pool);
                // Workers don't exist until negotiation settles; run on
                // the dispatch thread.
                process_job(self, &mut dispatcher, job);
            }
        };
        let pool = self.pool.lock().unwrap().take();
        if let Some(pool) = pool {
            pool.shutdown();
        }
        result
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("version", &self.protocol().version)
            .finish()
    }
}

/// Read one `length:u32 | payload` frame. `Ok(None)` is a clean EOF at a
/// frame boundary; EOF anywhere else is an error, as is a zero-length or
/// oversized frame.
fn read_frame(input: &mut impl Read, max: u32) -> io::Result<Option<Vec<u8>>> {
    let mut prefix = [0u8; 4];
    let mut filled = 0;
    while filled < prefix.len() {
        let n = input.read(&mut prefix[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "truncated length prefix",
            ));
        }
        filled += n;
    }
    let len = u32::from_be_bytes(prefix);
    if len == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "zero-length message",
        ));
    }
    if len > max {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "message exceeds size limit",
        ));
    }
    let mut data = vec![0u8; len as usize];
    input.read_exact(&mut data)?;
    Ok(Some(data))
}

/// Per-request view handed to command handlers: the parse cursor over the
/// request, the worker's response machinery and the shared server state.
pub struct SftpRequest<'a> {
    pub server: &'a Server,
    pub proto: &'static Protocol,
    pub id: u32,
    pub input: Reader<'a>,
    pub out: &'a mut SendBuffer,
    pub arena: &'a Arena,
    pub charset: &'a Charset,
}

impl<'a> SftpRequest<'a> {
    pub fn parse_string(&mut self) -> Result<&'a [u8], SftpError> {
        Ok(self.input.bytes()?)
    }

    /// A filename string, decoded per the negotiated version.
    pub fn parse_path(&mut self) -> Result<PathBuf, SftpError> {
        let bytes = self.input.bytes()?;
        self.proto.ops.decode_filename(self.charset, bytes)
    }

    pub fn parse_handle(&mut self) -> Result<HandleId, SftpError> {
        Ok(self.input.handle()?)
    }

    pub fn parse_attrs(&mut self) -> Result<Attributes, SftpError> {
        self.proto.ops.parse_attrs(self.proto, &mut self.input)
    }

    /// Read-only mode gate; call before any mutating filesystem work.
    pub fn check_writable(&self) -> Result<(), SftpError> {
        if self.server.config.readonly {
            Err(Status::PermissionDenied.into())
        } else {
            Ok(())
        }
    }

    pub fn reply_begin(&mut self, msg_type: u8) {
        self.out.begin();
        self.out.u8(msg_type);
        self.out.u32(self.id);
    }

    pub fn reply_end(&mut self) -> Result<(), SftpError> {
        Ok(self.out.end(&self.server.output)?)
    }

    /// Explicit status reply for handlers that must respond themselves.
    pub fn status_reply(&mut self, status: Status, msg: &str) -> Result<(), SftpError> {
        let status = status.clamped(self.proto.max_status);
        self.reply_begin(SSH_FXP_STATUS);
        self.out.u32(status.into());
        self.out.string(msg);
        self.out.string("en");
        self.reply_end()
    }

    pub fn handle_reply(&mut self, handle: HandleId) -> HandlerResult {
        self.reply_begin(SSH_FXP_HANDLE);
        self.out.handle(handle);
        self.reply_end()?;
        Ok(Outcome::Responded)
    }

    pub fn data_reply(&mut self, data: &[u8]) -> HandlerResult {
        self.reply_begin(SSH_FXP_DATA);
        self.out.bytes(data);
        self.reply_end()?;
        Ok(Outcome::Responded)
    }

    pub fn names_reply(&mut self, names: &[Attributes]) -> HandlerResult {
        self.reply_begin(SSH_FXP_NAME);
        self.proto
            .ops
            .send_names(self.proto, self.out, self.charset, names)?;
        self.reply_end()?;
        Ok(Outcome::Responded)
    }

    pub fn attrs_reply(&mut self, attrs: &Attributes) -> HandlerResult {
        self.reply_begin(SSH_FXP_ATTRS);
        self.proto
            .ops
            .send_attrs(self.proto, self.out, self.charset, attrs)?;
        self.reply_end()?;
        Ok(Outcome::Responded)
    }
}

fn send_status(
    server: &Server,
    worker: &mut Worker,
    proto: &Protocol,
    id: u32,
    status: Status,
    msg: Option<&str>,
) {
    let status = status.clamped(proto.max_status);
    let out = &mut worker.out;
    out.begin();
    out.u8(SSH_FXP_STATUS);
    out.u32(id);
    out.u32(status.into());
    out.string(msg.unwrap_or_else(|| status.message()));
    out.string("en");
    if let Err(e) = out.end(&server.output) {
        error!("error sending response: {e}");
        server.request_shutdown();
    }
}

/// Execute one job to completion: parse the envelope, wait for the
/// serializer, run the handler, send whatever reply it didn't send
/// itself, then release the serializer slot and the scratch arena.
pub(crate) fn process_job(server: &Server, worker: &mut Worker, job: Job) {
    let Job { seq, data } = job;
    let msg_type = data[0];
    let mut input = Reader::new(&data[1..]);
    let proto = server.protocol();

    let mut id = 0;
    if msg_type != SSH_FXP_INIT {
        match input.u32() {
            Ok(v) => id = v,
            Err(_) => {
                send_status(
                    server,
                    worker,
                    proto,
                    0,
                    Status::BadMessage,
                    Some("missing ID field"),
                );
                finish_job(server, worker, seq, msg_type);
                return;
            }
        }
    }
    debug!(
        "request {} id {}",
        MessageType::try_from(msg_type)
            .map(|t| format!("{t:?}"))
            .unwrap_or_else(|_| format!("#{msg_type}")),
        id
    );

    server.serializer.wait_turn(seq, &server.config);

    let result = {
        let mut req = SftpRequest {
            server,
            proto,
            id,
            input,
            out: &mut worker.out,
            arena: &worker.arena,
            charset: &worker.charset,
        };
        match proto.lookup(msg_type) {
            Some(handler) => handler(&mut req),
            None => Err(SftpError::Status(Status::OpUnsupported)),
        }
    };

    match result {
        Ok(Outcome::Responded) => {}
        Ok(Outcome::Success) => send_status(server, worker, proto, id, Status::Ok, None),
        Err(SftpError::Status(status)) => send_status(server, worker, proto, id, status, None),
        Err(SftpError::Errno(errno)) => send_status(
            server,
            worker,
            proto,
            id,
            Status::from_errno(errno),
            Some(errno.desc()),
        ),
        Err(SftpError::Fatal(status)) => {
            send_status(server, worker, proto, id, status, None);
            server.request_shutdown();
        }
        Err(SftpError::Io(e)) => {
            error!("error sending response: {e}");
            server.request_shutdown();
        }
    }
    finish_job(server, worker, seq, msg_type);
}

fn finish_job(server: &Server, worker: &mut Worker, seq: u64, msg_type: u8) {
    server.serializer.remove(seq);
    worker.arena.reset();
    // After the first post-INIT request it is safe to go multithreaded;
    // for v6 that request might have been version-select and had to run
    // on the dispatch thread.
    if msg_type != SSH_FXP_INIT && !server.workers_started() && !server.shutting_down() {
        debug!("late work queue creation");
        server.start_workers();
    }
}

/// `SSH_FXP_INIT`: negotiate the version and advertise extensions.
pub(crate) fn sftp_init(req: &mut SftpRequest<'_>) -> HandlerResult {
    if !std::ptr::eq(req.proto, &PRE_INIT) {
        // Cannot initialize twice.
        return Err(Status::Failure.into());
    }
    let client_version = req.input.u32()?;
    let proto: &'static Protocol = match client_version {
        0..=2 => return Err(Status::OpUnsupported.into()),
        3 => &V3,
        4 => &V4,
        5 => &V5,
        _ => &V6,
    };
    req.server.set_protocol(proto);
    debug!("negotiated version {}", proto.version);

    let config = &req.server.config;
    let out = &mut *req.out;
    out.begin();
    out.u8(SSH_FXP_VERSION);
    out.u32(proto.version);
    if proto.version >= 4 {
        // Advertising newline="\n" shifts text-mode translation to the
        // client (draft-04 s4.3).
        out.string("newline");
        out.string("\n");
    }
    let supported_attrs = (AttrMask::SIZE
        | AttrMask::PERMISSIONS
        | AttrMask::ACCESSTIME
        | AttrMask::MODIFYTIME
        | AttrMask::OWNERGROUP
        | AttrMask::SUBSECOND_TIMES)
        .bits();
    if proto.version == 5 {
        // draft-05 s4.4
        out.string("supported");
        let sub = out.sub_begin();
        out.u32(supported_attrs);
        out.u32(0); // supported-attribute-bits
        out.u32(
            SSH_FXF_ACCESS_DISPOSITION
                | (OpenFlags::APPEND_DATA | OpenFlags::APPEND_DATA_ATOMIC | OpenFlags::TEXT_MODE)
                    .bits(),
        );
        out.u32(0xFFFF_FFFF); // supported-access-mask
        // A non-zero max-read-size would promise that short reads mean
        // EOF, which pipes cannot honor. Send 0.
        out.u32(0);
        for ext in proto.extensions {
            out.string(ext.name);
        }
        out.sub_end(sub);
    }
    if proto.version >= 6 {
        // draft-13 s5.4
        out.string("supported2");
        let sub = out.sub_begin();
        out.u32(supported_attrs);
        out.u32(0); // supported-attribute-bits
        out.u32(
            SSH_FXF_ACCESS_DISPOSITION
                | (OpenFlags::APPEND_DATA
                    | OpenFlags::APPEND_DATA_ATOMIC
                    | OpenFlags::TEXT_MODE
                    | OpenFlags::NOFOLLOW
                    | OpenFlags::DELETE_ON_CLOSE)
                    .bits(),
        );
        out.u32(0xFFFF_FFFF); // supported-access-mask
        out.u32(0); // max-read-size, see above
        out.u16(1); // supported-open-block-vector
        out.u16(1); // supported-block-vector
        out.u32(0); // attrib-extension-count
        out.u32(proto.extensions.len() as u32);
        for ext in proto.extensions {
            out.string(ext.name);
        }
        out.sub_end(sub);
        // draft-13 s5.5
        out.string("versions");
        out.string("3,4,5,6");
    }
    out.string("vendor-id");
    let sub = out.sub_begin();
    out.string("sftpd");
    out.string("sftpd");
    out.string(env!("CARGO_PKG_VERSION"));
    out.u64(0);
    out.sub_end(sub);
    // Documents the argument order this server expects for SSH_FXP_SYMLINK;
    // the drafts are ambiguous and OpenSSH historically had them reversed.
    out.string("symlink-order@rjk.greenend.org.uk");
    out.string(if config.reverse_symlink {
        "targetpath-linkpath"
    } else {
        "linkpath-targetpath"
    });
    if proto.version >= 6 {
        out.string("link-order@rjk.greenend.org.uk");
        out.string("linkpath-targetpath");
    }
    out.end(&req.server.output)?;

    if proto.version < 6 {
        // Safe to process later requests concurrently now. v6 must wait
        // for the first request, which might be version-select.
        debug!("normal work queue creation");
        req.server.start_workers();
    }
    Ok(Outcome::Responded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_reader_basics() {
        let mut input: &[u8] = &[0, 0, 0, 2, 9, 9];
        assert_eq!(read_frame(&mut input, 100).unwrap(), Some(vec![9, 9]));
        assert_eq!(read_frame(&mut input, 100).unwrap(), None);
    }

    #[test]
    fn zero_and_oversize_frames_are_fatal() {
        let mut zero: &[u8] = &[0, 0, 0, 0];
        assert!(read_frame(&mut zero, 100).is_err());
        let mut big: &[u8] = &[0, 0, 1, 0, 1];
        assert!(read_frame(&mut big, 100).is_err());
    }

    #[test]
    fn truncated_frames_are_fatal() {
        let mut cut_prefix: &[u8] = &[0, 0];
        assert!(read_frame(&mut cut_prefix, 100).is_err());
        let mut cut_body: &[u8] = &[0, 0, 0, 4, 1];
        assert!(read_frame(&mut cut_body, 100).is_err());
    }
}
