use thiserror::Error;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("TLS is not configured")]
    NotConfigured,

    #[error("failed to load certificate: {0}")]
    CertificateLoad(String),

    #[error("failed to load private key: {0}")]
    PrivateKeyLoad(String),

    #[error("invalid TLS configuration: {0}")]
    Config(String),

    #[error("TLS handshake failed: {0}")]
    Handshake(String),
}
