use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::constants::SERVER_NAME;

/// TLS-related options (RFC-4217 FTPS).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    /// PEM certificate chain. TLS support is enabled iff this is set.
    pub certfile: Option<PathBuf>,
    /// PEM private key; when omitted the certfile is assumed to contain
    /// the key as well.
    pub keyfile: Option<PathBuf>,
    /// Require AUTH TLS before USER/PASS.
    pub control_required: bool,
    /// Require PROT P before any data-channel command.
    pub data_required: bool,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            certfile: None,
            keyfile: None,
            control_required: false,
            data_required: false,
        }
    }
}

/// Every knob the server and its handlers read, passed explicitly to
/// constructors. Nothing is configured through global state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FtpdConfig {
    pub listen_address: String,
    pub listen_port: u16,

    /// Greeting sent in the 220 reply on connect.
    pub banner: String,

    /// Idle seconds before the control connection is dropped with 421.
    /// 0 disables the timer.
    pub timeout: u64,
    /// Seconds a data transfer may stall with no progress.
    pub data_timeout: u64,
    /// Seconds a failed PASS is delayed before the 530 reply.
    pub auth_failed_timeout: f64,
    pub max_login_attempts: u32,

    /// Inclusive port range for passive listeners; None lets the kernel
    /// pick.
    pub passive_ports: Option<(u16, u16)>,
    /// Public address advertised in PASV replies behind NAT.
    pub masquerade_address: Option<IpAddr>,
    /// Per-interface masquerade addresses, consulted before
    /// `masquerade_address`.
    pub masquerade_address_map: HashMap<IpAddr, IpAddr>,

    /// Report listing and MDTM times in GMT (default) or local time.
    pub use_gmt_times: bool,
    pub tcp_no_delay: bool,
    pub use_sendfile: bool,
    /// Control-channel text encoding; pathnames are exchanged as UTF-8.
    pub encoding: String,

    pub max_cons: usize,
    pub max_cons_per_ip: usize,

    /// Allow FXP-style data connections to third-party addresses.
    pub permit_foreign_addresses: bool,
    /// Allow active data connections to ports below 1024.
    pub permit_privileged_ports: bool,

    /// Data-channel bandwidth caps in bytes per second; 0 disables.
    pub read_limit: u64,
    pub write_limit: u64,

    /// Accept the legacy `MDTM <timeval> <path>` setter form.
    pub allow_mdtm_set: bool,

    pub tls: TlsSettings,
}

impl Default for FtpdConfig {
    fn default() -> Self {
        Self {
            listen_address: String::from("0.0.0.0"),
            listen_port: 2121,
            banner: format!("{} ready.", SERVER_NAME),
            timeout: 300,
            data_timeout: 300,
            auth_failed_timeout: 3.0,
            max_login_attempts: 3,
            passive_ports: None,
            masquerade_address: None,
            masquerade_address_map: HashMap::new(),
            use_gmt_times: true,
            tcp_no_delay: true,
            use_sendfile: true,
            encoding: String::from("utf-8"),
            max_cons: 512,
            max_cons_per_ip: 0,
            permit_foreign_addresses: false,
            permit_privileged_ports: false,
            read_limit: 0,
            write_limit: 0,
            allow_mdtm_set: false,
            tls: TlsSettings::default(),
        }
    }
}

impl FtpdConfig {
    /// Load settings from a TOML file, falling back to defaults for
    /// anything not specified.
    pub fn load_from_file(path: &str) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {}", path))?;
        let config = toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse configuration file: {}", path))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = FtpdConfig::default();
        assert_eq!(config.max_cons, 512);
        assert_eq!(config.max_login_attempts, 3);
        assert!(config.use_gmt_times);
        assert!(!config.permit_foreign_addresses);
        assert_eq!(config.auth_failed_timeout, 3.0);
    }

    #[test]
    fn partial_toml_is_filled_with_defaults() {
        let parsed: FtpdConfig = toml::from_str(
            r#"
            listen_port = 21
            max_cons = 64
            "#,
        )
        .unwrap();
        assert_eq!(parsed.listen_port, 21);
        assert_eq!(parsed.max_cons, 64);
        assert_eq!(parsed.timeout, 300);
    }
}
