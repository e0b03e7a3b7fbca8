//! TLS connector factory for PostgreSQL connections.
//!
//! Builds the [`deadpool_postgres::Pool`] with the connector matching the
//! configured [`SslMode`]. Uses `rustls` with the platform's root
//! certificates, the same TLS stack the HTTP clients already use.

use deadpool_postgres::{Pool, Runtime};
use tokio_postgres::NoTls;
use tokio_postgres_rustls::MakeRustlsConnect;

use crate::config::SslMode;

fn make_rustls_connector() -> MakeRustlsConnect {
    let mut root_store = rustls::RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for e in &native.errors {
        tracing::warn!("error loading system root certs: {e}");
    }
    for cert in native.certs {
        if let Err(e) = root_store.add(cert) {
            tracing::warn!("skipping invalid system root cert: {e}");
        }
    }
    if root_store.is_empty() {
        tracing::error!("no system root certificates found -- TLS connections will fail");
    }
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    MakeRustlsConnect::new(config)
}

/// Create the connection pool with the appropriate TLS connector.
///
/// `Prefer` and `Require` behave identically: both present a TLS connector
/// and fail if the server rejects the handshake. True `prefer` semantics
/// (fall back to plaintext) would need reconnection logic tokio-postgres
/// does not provide; the three-variant enum matches libpq's `sslmode`.
pub fn create_pool(
    config: &deadpool_postgres::Config,
    ssl_mode: SslMode,
) -> Result<Pool, deadpool_postgres::CreatePoolError> {
    match ssl_mode {
        SslMode::Disable => config.create_pool(Some(Runtime::Tokio1), NoTls),
        SslMode::Prefer | SslMode::Require => {
            let tls = make_rustls_connector();
            config.create_pool(Some(Runtime::Tokio1), tls)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Pool creation is lazy; no server is contacted here.
    #[test]
    fn create_pool_disable_mode() {
        let mut config = deadpool_postgres::Config::new();
        config.url = Some("postgres://localhost/mizuhiki_test".to_string());
        assert!(create_pool(&config, SslMode::Disable).is_ok());
    }

    #[test]
    fn create_pool_require_mode() {
        let mut config = deadpool_postgres::Config::new();
        config.url = Some("postgres://localhost/mizuhiki_test".to_string());
        assert!(create_pool(&config, SslMode::Require).is_ok());
    }
}
