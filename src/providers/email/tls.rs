//! TCP and TLS dialing shared by the retrieval clients.

use std::io;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

use crate::domain::Endpoint;

/// Opens a plain TCP connection to the endpoint.
pub(crate) async fn dial(endpoint: &Endpoint) -> io::Result<TcpStream> {
    TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await
}

/// Opens a TCP connection and completes a TLS handshake verified against the
/// webpki root set.
pub(crate) async fn dial_tls(endpoint: &Endpoint) -> io::Result<TlsStream<TcpStream>> {
    let tcp_stream = dial(endpoint).await?;

    // Pinned provider: lettre may enable a second rustls backend.
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
        .with_root_certificates(RootCertStore::from_iter(
            webpki_roots::TLS_SERVER_ROOTS.iter().cloned(),
        ))
        .with_no_client_auth();

    let connector = TlsConnector::from(Arc::new(config));
    let server_name = ServerName::try_from(endpoint.host.clone())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    connector.connect(server_name, tcp_stream).await
}
