//! Demonstration HS256 signer
//!
//! A minimal JWS-compact signer over a shared secret, implementing the
//! toolkit's external-signer interface. Deployments with a real token
//! service plug their own implementation in instead.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use tapwire_auth::{SignerError, TokenSigner};

type HmacSha256 = Hmac<Sha256>;

pub struct Hs256Signer {
    secret: Vec<u8>,
}

impl Hs256Signer {
    pub fn new(secret: Vec<u8>) -> Self {
        Self { secret }
    }
}

impl TokenSigner for Hs256Signer {
    fn sign(&self, claims: &serde_json::Value) -> Result<String, SignerError> {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = serde_json::to_vec(claims)
            .map_err(|e| SignerError::Signing(e.to_string()))?;
        let payload = URL_SAFE_NO_PAD.encode(payload);

        let signing_input = format!("{header}.{payload}");
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| SignerError::Signing(e.to_string()))?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{signing_input}.{signature}"))
    }
}
