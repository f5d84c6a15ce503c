//! Credential strategies
//!
//! The method identifier string maps to a closed enum of strategies via a
//! validated factory. Structural preconditions (a SCRAM method without a
//! password, a cookie method without a cookie, an assertion method with
//! neither a token nor a signer) are rejected here, before any network
//! activity, so no partial handshake state is ever created.

use std::sync::Arc;

use thiserror::Error;

use tapwire_transport::ConnectionError;

use crate::signer::{SignerError, TokenSigner};

pub const METHOD_SCRAM_SHA256: &str = "SCRAMSHA256";
pub const METHOD_SCRAM_PBKDF2_SHA256: &str = "SCRAMPBKDF2SHA256";
pub const METHOD_JWT: &str = "JWT";
pub const METHOD_SAML: &str = "SAML";
pub const METHOD_SESSION_COOKIE: &str = "SessionCookie";

/// Every method identifier the toolkit understands.
pub const METHOD_NAMES: &[&str] = &[
    METHOD_SCRAM_SHA256,
    METHOD_SCRAM_PBKDF2_SHA256,
    METHOD_JWT,
    METHOD_SAML,
    METHOD_SESSION_COOKIE,
];

#[derive(Error, Debug)]
pub enum AuthenticationError {
    #[error("unsupported method: {method}")]
    UnsupportedMethod { method: String },

    #[error("{reason}")]
    MissingCredential { reason: &'static str },

    #[error("authentication rejected by server: {reason}")]
    Rejected { reason: String },

    #[error("malformed server response: {0}")]
    MalformedResponse(String),

    #[error("token signing failed: {0}")]
    Signer(#[from] SignerError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Password-to-key derivation used by the SCRAM family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kdf {
    PlainSha256,
    Pbkdf2Sha256,
}

/// Which flavor of pre-signed assertion a token is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertionKind {
    Jwt,
    Saml,
}

/// A credential strategy with exactly the material it needs.
#[derive(Debug, Clone)]
pub enum AuthMethod {
    Scram {
        username: String,
        password: String,
        kdf: Kdf,
    },
    /// `username` is empty when the server derives the identity from the
    /// assertion itself (SAML).
    AssertionToken {
        username: String,
        token: String,
        kind: AssertionKind,
    },
    SessionCookie {
        username: String,
        cookie: String,
    },
}

/// Raw credential material handed in by the embedding application.
#[derive(Default)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
    /// A ready-made signed token, when one exists.
    pub token: Option<String>,
    /// Claims to mint a token from, when no ready token exists.
    pub claims: Option<serde_json::Value>,
    /// External signing capability; may be absent in some deployments.
    pub signer: Option<Arc<dyn TokenSigner>>,
    pub cookie: Option<String>,
}

impl AuthMethod {
    /// The identifier announced to the server.
    pub fn name(&self) -> &'static str {
        match self {
            AuthMethod::Scram {
                kdf: Kdf::PlainSha256,
                ..
            } => METHOD_SCRAM_SHA256,
            AuthMethod::Scram {
                kdf: Kdf::Pbkdf2Sha256,
                ..
            } => METHOD_SCRAM_PBKDF2_SHA256,
            AuthMethod::AssertionToken {
                kind: AssertionKind::Jwt,
                ..
            } => METHOD_JWT,
            AuthMethod::AssertionToken {
                kind: AssertionKind::Saml,
                ..
            } => METHOD_SAML,
            AuthMethod::SessionCookie { .. } => METHOD_SESSION_COOKIE,
        }
    }

    pub fn username(&self) -> &str {
        match self {
            AuthMethod::Scram { username, .. }
            | AuthMethod::AssertionToken { username, .. }
            | AuthMethod::SessionCookie { username, .. } => username,
        }
    }

    /// Validated factory mapping a method identifier to a strategy.
    ///
    /// Assertion tokens are minted here via the external signer when only
    /// claims material was supplied, so a missing signer fails eagerly
    /// instead of deep in the handshake.
    pub fn from_credentials(
        method: &str,
        creds: Credentials,
    ) -> Result<Self, AuthenticationError> {
        match method {
            METHOD_SCRAM_SHA256 | METHOD_SCRAM_PBKDF2_SHA256 => {
                let password = creds.password.ok_or(AuthenticationError::MissingCredential {
                    reason: "password required",
                })?;
                let kdf = if method == METHOD_SCRAM_SHA256 {
                    Kdf::PlainSha256
                } else {
                    Kdf::Pbkdf2Sha256
                };
                Ok(AuthMethod::Scram {
                    username: creds.username.unwrap_or_default(),
                    password,
                    kdf,
                })
            }
            METHOD_JWT | METHOD_SAML => {
                let token = match (creds.token, creds.claims, creds.signer) {
                    (Some(token), _, _) => token,
                    (None, Some(claims), Some(signer)) => signer.sign(&claims)?,
                    _ => {
                        return Err(AuthenticationError::MissingCredential {
                            reason: "token or signer required",
                        });
                    }
                };
                let kind = if method == METHOD_JWT {
                    AssertionKind::Jwt
                } else {
                    AssertionKind::Saml
                };
                // SAML identity travels inside the assertion; the server
                // never sees an explicit username.
                let username = match kind {
                    AssertionKind::Jwt => creds.username.unwrap_or_default(),
                    AssertionKind::Saml => String::new(),
                };
                Ok(AuthMethod::AssertionToken {
                    username,
                    token,
                    kind,
                })
            }
            METHOD_SESSION_COOKIE => {
                let cookie = creds.cookie.ok_or(AuthenticationError::MissingCredential {
                    reason: "cookie required",
                })?;
                Ok(AuthMethod::SessionCookie {
                    username: creds.username.unwrap_or_default(),
                    cookie,
                })
            }
            other => Err(AuthenticationError::UnsupportedMethod {
                method: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scram_without_password_rejected() {
        let err = AuthMethod::from_credentials(
            METHOD_SCRAM_SHA256,
            Credentials {
                username: Some("jdoe".into()),
                ..Default::default()
            },
        )
        .unwrap_err();

        assert_eq!(err.to_string(), "password required");
    }

    #[test]
    fn test_cookie_without_cookie_rejected() {
        let err = AuthMethod::from_credentials(
            METHOD_SESSION_COOKIE,
            Credentials {
                username: Some("jdoe".into()),
                ..Default::default()
            },
        )
        .unwrap_err();

        assert_eq!(err.to_string(), "cookie required");
    }

    #[test]
    fn test_unrecognized_method_rejected() {
        let err =
            AuthMethod::from_credentials("KERBEROS", Credentials::default()).unwrap_err();
        assert!(matches!(
            err,
            AuthenticationError::UnsupportedMethod { .. }
        ));
        assert!(err.to_string().starts_with("unsupported method"));
    }

    #[test]
    fn test_assertion_without_token_or_signer_rejected() {
        let err = AuthMethod::from_credentials(
            METHOD_JWT,
            Credentials {
                username: Some("jdoe".into()),
                ..Default::default()
            },
        )
        .unwrap_err();

        assert_eq!(err.to_string(), "token or signer required");
    }

    #[test]
    fn test_ready_token_accepted() {
        let method = AuthMethod::from_credentials(
            METHOD_JWT,
            Credentials {
                username: Some("jdoe".into()),
                token: Some("a.b.c".into()),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(method.name(), METHOD_JWT);
        assert_eq!(method.username(), "jdoe");
    }

    #[test]
    fn test_saml_identity_stays_in_assertion() {
        let method = AuthMethod::from_credentials(
            METHOD_SAML,
            Credentials {
                username: Some("ignored".into()),
                token: Some("<Assertion/>".into()),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(method.username(), "");
    }

    #[test]
    fn test_method_names_map_to_kdf() {
        let plain = AuthMethod::from_credentials(
            METHOD_SCRAM_SHA256,
            Credentials {
                username: Some("u".into()),
                password: Some("p".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(matches!(
            plain,
            AuthMethod::Scram {
                kdf: Kdf::PlainSha256,
                ..
            }
        ));

        let pbkdf2 = AuthMethod::from_credentials(
            METHOD_SCRAM_PBKDF2_SHA256,
            Credentials {
                username: Some("u".into()),
                password: Some("p".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(pbkdf2.name(), METHOD_SCRAM_PBKDF2_SHA256);
    }
}
