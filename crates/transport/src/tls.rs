//! Transport-security upgrade context
//!
//! Certificate and key material is loaded by the embedding application,
//! which hands the toolkit a ready `rustls::ClientConfig`. The toolkit
//! only sequences the upgrade: no protocol bytes flow until the secure
//! channel is established.

use std::sync::Arc;

use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use crate::connection::ConnectionError;

#[derive(Clone)]
pub struct TlsContext {
    connector: TlsConnector,
    server_name: ServerName<'static>,
}

impl TlsContext {
    /// Wrap an externally built client config for `server_name`.
    pub fn new(
        config: Arc<rustls::ClientConfig>,
        server_name: &str,
    ) -> Result<Self, ConnectionError> {
        let server_name = ServerName::try_from(server_name.to_string())
            .map_err(|e| ConnectionError::TlsUpgrade(format!("invalid server name: {e}")))?;

        Ok(Self {
            connector: TlsConnector::from(config),
            server_name,
        })
    }

    pub(crate) async fn upgrade(
        &self,
        tcp: TcpStream,
    ) -> Result<TlsStream<TcpStream>, ConnectionError> {
        self.connector
            .connect(self.server_name.clone(), tcp)
            .await
            .map_err(|e| ConnectionError::TlsUpgrade(e.to_string()))
    }
}

impl std::fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsContext")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}
