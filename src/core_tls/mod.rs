pub mod error;
pub mod stream;
pub mod tls_config;

pub use error::TlsError;
pub use stream::TlsSession;
pub use tls_config::build_server_config;
