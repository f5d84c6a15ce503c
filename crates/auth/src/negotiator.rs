//! Authentication negotiator
//!
//! Drives a handshake session from `Init` to `Authenticated` or `Failed`
//! over the database variant: connect (with the optional
//! transport-security upgrade gated before any protocol bytes), exchange
//! version/product information, run the method-specific challenge
//! exchange, and accept the server's final verdict as authoritative.
//! Each step's input depends on the previous server response, so a
//! session is strictly sequential and never re-enters a state.

use std::sync::Arc;

use tracing::{debug, info, warn};

use tapwire_protocol::CompositionRegistry;
use tapwire_protocol::variants::sql;
use tapwire_transport::{ConnectConfig, Connection, ConnectionError};

use crate::method::{AuthMethod, AuthenticationError, Kdf};
use crate::scram;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Init,
    Connected,
    CapabilitiesExchanged,
    ChallengeSent,
    Authenticated,
    Failed,
}

/// What the server told us about itself during the hello exchange.
#[derive(Debug, Clone)]
pub struct ServerCapabilities {
    pub product_version: String,
    pub protocol_version: u32,
    pub auth_methods: Vec<String>,
}

/// One connection attempt's handshake state.
pub struct HandshakeSession {
    pub method: AuthMethod,
    pub state: HandshakeState,
    pub capabilities: Option<ServerCapabilities>,
    /// Cookie issued by the server on success, reusable for
    /// re-authentication via the SessionCookie method.
    pub session_cookie: Option<Vec<u8>>,
    /// Reason the handshake failed; the server's reason verbatim when the
    /// server rejected the credentials.
    pub failure: Option<String>,
    history: Vec<HandshakeState>,
    registry: Arc<CompositionRegistry>,
    connection: Option<Connection>,
}

impl HandshakeSession {
    pub fn new(method: AuthMethod, registry: Arc<CompositionRegistry>) -> Self {
        Self {
            method,
            state: HandshakeState::Init,
            capabilities: None,
            session_cookie: None,
            failure: None,
            history: vec![HandshakeState::Init],
            registry,
            connection: None,
        }
    }

    /// Every state entered so far, in order. Useful for asserting that no
    /// step is re-entered.
    pub fn history(&self) -> &[HandshakeState] {
        &self.history
    }

    /// The authenticated connection, available once the session succeeded.
    pub fn connection(&mut self) -> Option<&mut Connection> {
        self.connection.as_mut()
    }

    pub fn take_connection(&mut self) -> Option<Connection> {
        self.connection.take()
    }

    fn transition(&mut self, next: HandshakeState) {
        debug!(from = ?self.state, to = ?next, "handshake transition");
        self.state = next;
        self.history.push(next);
    }

    /// Run the handshake to a terminal state.
    pub async fn authenticate(
        &mut self,
        config: &ConnectConfig,
    ) -> Result<(), AuthenticationError> {
        match self.drive(config).await {
            Ok(conn) => {
                self.connection = Some(conn);
                self.transition(HandshakeState::Authenticated);
                info!(
                    method = self.method.name(),
                    user = self.method.username(),
                    "authenticated"
                );
                Ok(())
            }
            Err(e) => {
                self.failure = Some(match &e {
                    AuthenticationError::Rejected { reason } => reason.clone(),
                    other => other.to_string(),
                });
                self.transition(HandshakeState::Failed);
                Err(e)
            }
        }
    }

    async fn drive(&mut self, config: &ConnectConfig) -> Result<Connection, AuthenticationError> {
        let mut conn = Connection::connect(config).await?;
        self.transition(HandshakeState::Connected);

        // Version/product exchange. Capabilities recorded for later
        // encoding choices.
        let hello_fields = sql::FieldList::new()
            .with(config.process_label.as_bytes())
            .with(config.hostname_label.as_bytes())
            .with(&sql::PROTOCOL_VERSION.to_be_bytes()[..]);
        let hello = sql::request(sql::OP_HELLO, &hello_fields).map_err(ConnectionError::from)?;
        let reply = conn.send_receive(&self.registry, &hello, sql::SQL).await?;
        expect_reply(&reply, sql::OP_HELLO)?;

        let caps = parse_capabilities(&reply)?;
        debug!(
            product = %caps.product_version,
            protocol = caps.protocol_version,
            "capabilities exchanged"
        );
        if !caps.auth_methods.is_empty()
            && !caps.auth_methods.iter().any(|m| m == self.method.name())
        {
            // The final verdict stays with the server; this is only a hint
            // that the attempt is unlikely to succeed.
            warn!(
                method = self.method.name(),
                advertised = ?caps.auth_methods,
                "server did not advertise the chosen method"
            );
        }
        self.capabilities = Some(caps);
        self.transition(HandshakeState::CapabilitiesExchanged);

        let method = self.method.clone();
        let verdict = match method {
            AuthMethod::Scram {
                username,
                password,
                kdf,
            } => {
                let client_challenge = scram::client_challenge();
                let auth_fields = sql::FieldList::new()
                    .with(username.as_bytes())
                    .with(self.method.name().as_bytes())
                    .with(&client_challenge[..]);
                let request =
                    sql::request(sql::OP_AUTH, &auth_fields).map_err(ConnectionError::from)?;
                let challenge = conn.send_receive(&self.registry, &request, sql::SQL).await?;
                expect_reply(&challenge, sql::OP_AUTH)?;

                let fields = sql::fields(&challenge).map_err(ConnectionError::from)?;
                let salt = fields
                    .get(0)
                    .ok_or_else(|| malformed("challenge reply is missing the salt"))?
                    .to_vec();
                let server_challenge = fields
                    .get(1)
                    .ok_or_else(|| malformed("challenge reply is missing the server challenge"))?
                    .to_vec();
                let iterations = match kdf {
                    Kdf::PlainSha256 => 0,
                    Kdf::Pbkdf2Sha256 => {
                        let raw = fields
                            .get(2)
                            .ok_or_else(|| malformed("challenge reply is missing the iteration count"))?;
                        let raw: [u8; 4] = raw
                            .try_into()
                            .map_err(|_| malformed("iteration count is not a 32-bit value"))?;
                        let iterations = u32::from_be_bytes(raw);
                        if iterations < scram::MIN_PBKDF2_ITERATIONS {
                            warn!(iterations, "server chose a weak iteration count");
                        }
                        iterations
                    }
                };

                let proof = scram::client_proof(
                    kdf,
                    &password,
                    &salt,
                    &server_challenge,
                    &client_challenge,
                    iterations,
                );
                let final_fields = sql::FieldList::new()
                    .with(username.as_bytes())
                    .with(self.method.name().as_bytes())
                    .with(&proof[..]);
                let request =
                    sql::request(sql::OP_FINAL, &final_fields).map_err(ConnectionError::from)?;
                conn.send(&self.registry, &request).await?;
                self.transition(HandshakeState::ChallengeSent);

                let verdict = conn.receive(&self.registry, sql::SQL).await?;
                expect_reply(&verdict, sql::OP_FINAL)?;
                verdict
            }
            AuthMethod::AssertionToken {
                username, token, ..
            }
            | AuthMethod::SessionCookie {
                username,
                cookie: token,
            } => {
                // Single-round methods: the credential goes out as-is and
                // the reply is already the verdict.
                let auth_fields = sql::FieldList::new()
                    .with(username.as_bytes())
                    .with(self.method.name().as_bytes())
                    .with(token.as_bytes());
                let request =
                    sql::request(sql::OP_AUTH, &auth_fields).map_err(ConnectionError::from)?;
                conn.send(&self.registry, &request).await?;
                self.transition(HandshakeState::ChallengeSent);

                let verdict = conn.receive(&self.registry, sql::SQL).await?;
                expect_reply(&verdict, sql::OP_AUTH)?;
                verdict
            }
        };

        // Success replies may carry a session cookie for later
        // re-authentication.
        if let Ok(fields) = sql::fields(&verdict) {
            self.session_cookie = fields.get(0).filter(|f| !f.is_empty()).map(<[u8]>::to_vec);
        }

        Ok(conn)
    }
}

fn malformed(reason: &str) -> AuthenticationError {
    AuthenticationError::MalformedResponse(reason.to_string())
}

/// Require a reply envelope for `op` with a success status; a non-success
/// status carries the server's reason and maps to `Rejected`.
fn expect_reply(node: &tapwire_protocol::LayerNode, op: u8) -> Result<(), AuthenticationError> {
    if node.tag != sql::SQL {
        return Err(malformed("reply is not a database-variant envelope"));
    }

    let got_kind = node.expect_u8("kind").map_err(ConnectionError::from)?;
    if got_kind != sql::KIND_REPLY {
        return Err(malformed("expected a reply envelope"));
    }

    let got_op = sql::op(node).map_err(ConnectionError::from)?;
    if got_op != op {
        return Err(malformed(&format!(
            "expected operation {op:#04x}, got {got_op:#04x}"
        )));
    }

    if sql::status(node).map_err(ConnectionError::from)? != sql::STATUS_OK {
        let reason = sql::error_reason(node)
            .unwrap_or_else(|| "authentication failed".to_string());
        return Err(AuthenticationError::Rejected { reason });
    }

    Ok(())
}

fn parse_capabilities(
    node: &tapwire_protocol::LayerNode,
) -> Result<ServerCapabilities, AuthenticationError> {
    let fields = sql::fields(node).map_err(ConnectionError::from)?;

    let product_version = fields
        .get_str(0)
        .ok_or_else(|| malformed("hello reply is missing the product version"))?;
    let protocol_raw = fields
        .get(1)
        .ok_or_else(|| malformed("hello reply is missing the protocol version"))?;
    let protocol_raw: [u8; 4] = protocol_raw
        .try_into()
        .map_err(|_| malformed("protocol version is not a 32-bit value"))?;
    let auth_methods = fields
        .get_str(2)
        .map(|csv| {
            csv.split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    Ok(ServerCapabilities {
        product_version,
        protocol_version: u32::from_be_bytes(protocol_raw),
        auth_methods,
    })
}
