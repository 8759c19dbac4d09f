use std::io;
use std::process::ExitCode;

use clap::Parser;
use log::error;
use nix::sys::signal::{SigHandler, Signal, signal};

use sftpd::{Config, Server};

/// SFTP server subsystem speaking protocol versions 3 through 6.
/// Not intended for interactive use.
#[derive(Parser, Debug)]
#[command(name = "sftpd", version)]
struct Args {
    /// Reject every write operation
    #[arg(short = 'R', long)]
    readonly: bool,

    /// Number of worker threads
    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// Process requests strictly in receive order
    #[arg(long)]
    no_reorder: bool,

    /// Let same-handle READs reorder as the drafts allow (breaks clients
    /// that assume response order matches request order, e.g. Paramiko)
    #[arg(long)]
    reorder_reads: bool,

    /// Parse v3-v5 SYMLINK arguments in the reversed historical OpenSSH
    /// order
    #[arg(long)]
    reverse_symlink: bool,

    /// Log requests as they are processed
    #[arg(short = 'd', long)]
    debug: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let default_filter = if args.debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    // A failed write to the peer should surface as EPIPE on the write,
    // not kill the process mid-response.
    unsafe {
        let _ = signal(Signal::SIGPIPE, SigHandler::SigIgn);
    }

    let config = Config {
        readonly: args.readonly,
        threads: args.threads.max(1),
        reorder: !args.no_reorder,
        reorder_reads: args.reorder_reads,
        reverse_symlink: args.reverse_symlink,
        ..Config::default()
    };
    let server = Server::new(config, Box::new(io::stdout()));
    match server.serve(io::stdin().lock()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}
