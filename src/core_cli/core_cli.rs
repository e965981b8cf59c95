use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for the stand-alone server.
#[derive(Parser, Debug)]
#[command(name = "ferroftpd", about = "A portable FTP/FTPS server.", version)]
pub struct Cli {
    /// Interface to listen on (default: all interfaces)
    #[arg(short = 'i', long, default_value = "0.0.0.0")]
    pub interface: String,

    /// Port to listen on
    #[arg(short = 'p', long, default_value_t = 2121)]
    pub port: u16,

    /// Grant write access to the anonymous user
    #[arg(short = 'w', long)]
    pub write: bool,

    /// Directory to share (default: current directory)
    #[arg(short = 'd', long)]
    pub directory: Option<PathBuf>,

    /// NAT address to advertise in passive-mode replies
    #[arg(short = 'n', long, value_name = "ADDRESS")]
    pub nat_address: Option<String>,

    /// Port range for passive data connections, e.g. 8000-9000
    #[arg(short = 'r', long, value_name = "FROM-TO")]
    pub range: Option<String>,

    /// Enable debug logging
    #[arg(short = 'D', long)]
    pub debug: bool,

    /// Add a named user (requires --password)
    #[arg(short = 'u', long)]
    pub username: Option<String>,

    /// Password for --username
    #[arg(short = 'P', long)]
    pub password: Option<String>,

    /// Concurrency model
    #[arg(long, value_enum, default_value = "async")]
    pub concurrency: Concurrency,

    /// Number of pre-fork workers (0 = one per CPU)
    #[arg(long, default_value_t = 0)]
    pub workers: usize,

    /// Enable FTPS (requires --certfile)
    #[arg(long)]
    pub tls: bool,

    /// PEM certificate chain (may also hold the private key)
    #[arg(long)]
    pub certfile: Option<PathBuf>,

    /// PEM private key
    #[arg(long)]
    pub keyfile: Option<PathBuf>,

    /// Require TLS on the control channel before login
    #[arg(long)]
    pub tls_control_required: bool,

    /// Require PROT P before any data transfer
    #[arg(long)]
    pub tls_data_required: bool,

    /// Idle timeout in seconds (0 disables)
    #[arg(long, default_value_t = 300)]
    pub timeout: u64,

    /// Greeting banner
    #[arg(long)]
    pub banner: Option<String>,

    /// Permit FXP-style data connections to foreign addresses
    #[arg(long)]
    pub permit_foreign_addresses: bool,

    /// Permit active data connections to privileged ports
    #[arg(long)]
    pub permit_privileged_ports: bool,

    /// Control-channel encoding
    #[arg(long, default_value = "utf-8")]
    pub encoding: String,

    /// Report times in local time instead of GMT
    #[arg(long)]
    pub use_localtime: bool,

    /// Disable the sendfile(2) fast path
    #[arg(long)]
    pub disable_sendfile: bool,

    /// Maximum simultaneous connections (0 = unlimited)
    #[arg(long, default_value_t = 512)]
    pub max_cons: usize,

    /// Maximum simultaneous connections per IP (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    pub max_cons_per_ip: usize,

    /// Failed logins before disconnecting
    #[arg(long, default_value_t = 3)]
    pub max_login_attempts: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Concurrency {
    Async,
    PreFork,
    MultiThread,
    MultiProc,
}
