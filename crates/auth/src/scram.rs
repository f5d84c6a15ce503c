//! SCRAM proof computation
//!
//! The server supplies a salt, a server challenge and (for the PBKDF2
//! flavor) an iteration count; the client proves knowledge of the password
//! without sending it. Salted-key derivation:
//!
//! - plain SHA-256: `SHA256(salt || password)`
//! - PBKDF2-SHA256: `PBKDF2-HMAC-SHA256(password, salt, iterations)`
//!
//! The proof is `HMAC-SHA256(key = salted_key,
//! msg = salt || server_challenge || client_challenge)`.

use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::method::Kdf;

type HmacSha256 = Hmac<Sha256>;

/// Length of the random challenge the client contributes.
pub const CLIENT_CHALLENGE_LEN: usize = 64;

/// Iteration count a server is expected to stay at or above for PBKDF2.
pub const MIN_PBKDF2_ITERATIONS: u32 = 4096;

/// Fresh random client challenge.
pub fn client_challenge() -> [u8; CLIENT_CHALLENGE_LEN] {
    let mut out = [0u8; CLIENT_CHALLENGE_LEN];
    rand::thread_rng().fill_bytes(&mut out);
    out
}

/// Derive the password-salted key for the chosen derivation.
pub fn salted_key(kdf: Kdf, password: &str, salt: &[u8], iterations: u32) -> [u8; 32] {
    match kdf {
        Kdf::PlainSha256 => {
            let mut hasher = Sha256::new();
            hasher.update(salt);
            hasher.update(password.as_bytes());
            hasher.finalize().into()
        }
        Kdf::Pbkdf2Sha256 => {
            let mut out = [0u8; 32];
            pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut out);
            out
        }
    }
}

/// Compute the client proof for one challenge exchange.
pub fn client_proof(
    kdf: Kdf,
    password: &str,
    salt: &[u8],
    server_challenge: &[u8],
    client_challenge: &[u8],
    iterations: u32,
) -> [u8; 32] {
    let key = salted_key(kdf, password, salt, iterations);
    let mut mac = HmacSha256::new_from_slice(&key).expect("HMAC can take key of any size");
    mac.update(salt);
    mac.update(server_challenge);
    mac.update(client_challenge);
    mac.finalize().into_bytes().into()
}

/// Constant-time proof check; used by servers (and simulated servers in
/// tests) holding the password or its salted key.
pub fn verify_proof(
    kdf: Kdf,
    password: &str,
    salt: &[u8],
    server_challenge: &[u8],
    client_challenge: &[u8],
    iterations: u32,
    proof: &[u8],
) -> bool {
    if proof.len() != 32 {
        return false;
    }
    let expected = client_proof(
        kdf,
        password,
        salt,
        server_challenge,
        client_challenge,
        iterations,
    );
    constant_time_compare(&expected, proof)
}

#[inline]
fn constant_time_compare(a: &[u8; 32], b: &[u8]) -> bool {
    let mut result = 0u8;
    for i in 0..32 {
        result |= a[i] ^ b[i];
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proof_is_deterministic() {
        let salt = b"salt-bytes";
        let server = b"server-challenge";
        let client = b"client-challenge";

        let a = client_proof(Kdf::PlainSha256, "hunter2", salt, server, client, 0);
        let b = client_proof(Kdf::PlainSha256, "hunter2", salt, server, client, 0);
        assert_eq!(a, b);
    }

    #[test]
    fn test_wrong_password_fails_verification() {
        let salt = b"salt";
        let server = b"sc";
        let client = b"cc";

        let proof = client_proof(Kdf::PlainSha256, "hunter2", salt, server, client, 0);
        assert!(verify_proof(
            Kdf::PlainSha256,
            "hunter2",
            salt,
            server,
            client,
            0,
            &proof
        ));
        assert!(!verify_proof(
            Kdf::PlainSha256,
            "hunter3",
            salt,
            server,
            client,
            0,
            &proof
        ));
    }

    #[test]
    fn test_derivations_differ() {
        let salt = b"salt";
        let plain = salted_key(Kdf::PlainSha256, "pw", salt, MIN_PBKDF2_ITERATIONS);
        let pbkdf2 = salted_key(Kdf::Pbkdf2Sha256, "pw", salt, MIN_PBKDF2_ITERATIONS);
        assert_ne!(plain, pbkdf2);
    }

    #[test]
    fn test_pbkdf2_iterations_matter() {
        let salt = b"salt";
        let a = salted_key(Kdf::Pbkdf2Sha256, "pw", salt, MIN_PBKDF2_ITERATIONS);
        let b = salted_key(Kdf::Pbkdf2Sha256, "pw", salt, MIN_PBKDF2_ITERATIONS + 1);
        assert_ne!(a, b);
    }

    #[test]
    fn test_challenge_is_random() {
        assert_ne!(client_challenge(), client_challenge());
    }

    #[test]
    fn test_truncated_proof_rejected() {
        let proof = client_proof(Kdf::PlainSha256, "pw", b"s", b"sc", b"cc", 0);
        assert!(!verify_proof(
            Kdf::PlainSha256,
            "pw",
            b"s",
            b"sc",
            b"cc",
            0,
            &proof[..31]
        ));
    }
}
