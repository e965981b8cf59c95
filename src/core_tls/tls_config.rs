use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use crate::core_tls::error::TlsError;

/// Build a rustls server configuration from PEM files.
///
/// When `keyfile` is omitted the certificate file is assumed to also
/// contain the private key. SSLv2/SSLv3 and compression are never
/// offered; rustls only speaks TLS 1.2 and 1.3.
pub fn build_server_config(
    certfile: &Path,
    keyfile: Option<&Path>,
) -> Result<Arc<rustls::ServerConfig>, TlsError> {
    let certs = load_certs(certfile)?;
    let key = load_private_key(keyfile.unwrap_or(certfile))?;

    let config = rustls::ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|err| TlsError::Config(err.to_string()))?;

    Ok(Arc::new(config))
}

fn load_certs(path: &Path) -> Result<Vec<rustls::Certificate>, TlsError> {
    let file =
        File::open(path).map_err(|err| TlsError::CertificateLoad(format!("{:?}: {}", path, err)))?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .map_err(|err| TlsError::CertificateLoad(err.to_string()))?;
    if certs.is_empty() {
        return Err(TlsError::CertificateLoad(format!(
            "no certificates found in {:?}",
            path
        )));
    }
    Ok(certs.into_iter().map(rustls::Certificate).collect())
}

fn load_private_key(path: &Path) -> Result<rustls::PrivateKey, TlsError> {
    let file =
        File::open(path).map_err(|err| TlsError::PrivateKeyLoad(format!("{:?}: {}", path, err)))?;
    let mut reader = BufReader::new(file);

    let mut keys = rustls_pemfile::pkcs8_private_keys(&mut reader)
        .map_err(|err| TlsError::PrivateKeyLoad(err.to_string()))?;
    if keys.is_empty() {
        // retry the same file for legacy RSA keys
        let file = File::open(path)
            .map_err(|err| TlsError::PrivateKeyLoad(format!("{:?}: {}", path, err)))?;
        let mut reader = BufReader::new(file);
        keys = rustls_pemfile::rsa_private_keys(&mut reader)
            .map_err(|err| TlsError::PrivateKeyLoad(err.to_string()))?;
    }

    match keys.pop() {
        Some(key) => Ok(rustls::PrivateKey(key)),
        None => Err(TlsError::PrivateKeyLoad(format!(
            "no private key found in {:?}",
            path
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_certfile_is_reported() {
        let err = build_server_config(Path::new("/nonexistent/cert.pem"), None).unwrap_err();
        assert!(matches!(err, TlsError::CertificateLoad(_)));
    }
}
