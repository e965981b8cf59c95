//! A portable FTP server library (RFC-959) with TLS (RFC-2228/4217),
//! IPv6 (RFC-2428), UTF-8 pathnames (RFC-2640) and the RFC-3659
//! extensions (MDTM, MLST/MLSD, SIZE, REST), built on a single-threaded
//! poll reactor with optional thread-, process- and pre-fork
//! concurrency models.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ferroftpd::config::FtpdConfig;
//! use ferroftpd::core_auth::VirtualAuthorizer;
//! use ferroftpd::server::{ConcurrencyModel, FtpServer};
//!
//! let mut authorizer = VirtualAuthorizer::new();
//! authorizer.add_anonymous(std::path::Path::new("/srv/ftp"), "elr").unwrap();
//!
//! let config = FtpdConfig::default();
//! let server = FtpServer::new(config, Arc::new(authorizer)).unwrap();
//! server.serve(ConcurrencyModel::Async).unwrap();
//! ```

pub mod config;
pub mod constants;
pub mod core_auth;
pub mod core_cli;
pub mod core_ftpcommand;
pub mod core_log;
pub mod core_network;
pub mod core_reactor;
pub mod core_tls;
pub mod core_transfer;
pub mod core_vfs;
pub mod server;
pub mod session;

pub use config::FtpdConfig;
pub use server::{ConcurrencyModel, DefaultCallbacks, FtpCallbacks, FtpServer};
