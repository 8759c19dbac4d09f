//! SFTP server engine.
//!
//! A server-side implementation of the SSH File Transfer Protocol for
//! wire versions 3 through 6 (the expired secsh-filexfer drafts -02, -04,
//! -05 and -13). The peer speaks length-prefixed messages over any
//! bidirectional byte stream — typically stdin/stdout under an SSH
//! subsystem — and the engine executes the requested filesystem
//! operations against the local POSIX filesystem.
//!
//! The pieces, bottom up: a wire codec ([`wire`]), a per-request scratch
//! arena ([`arena`]), the canonical attribute record ([`attrs`]), the
//! generation-tagged handle table ([`handles`]), lexical path resolution
//! ([`realpath`]), the request-ordering queue ([`serialize`]), and the
//! per-version dispatch tables ([`versions`]). [`Server::serve`] ties
//! them together: a reader thread frames requests and a small pool of
//! worker threads executes them, reordered only where the drafts allow.
//!
//! ```no_run
//! use sftpd::{Config, Server};
//!
//! let server = Server::new(Config::default(), Box::new(std::io::stdout()));
//! server.serve(std::io::stdin().lock()).unwrap();
//! ```

pub mod arena;
pub mod attrs;
pub mod charset;
mod extensions;
mod fsops;
pub mod handles;
mod queue;
pub mod realpath;
pub mod serialize;
pub mod server;
pub mod status;
mod users;
pub mod versions;
pub mod wire;

pub use crate::handles::{HandleFlags, HandleId};
pub use crate::server::{Config, Server, SftpRequest};
pub use crate::status::{HandlerResult, Outcome, SftpError, Status};
pub use crate::versions::Protocol;
