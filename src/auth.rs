//! Authentication engine (C4): challenge issuance and signature
//! verification.
//!
//! The wire scheme is documented by the protocol as a "signature" but
//! is actually a proof of public-key preimage knowledge:
//! `BLAKE2b-256(challenge ‖ pubkey)`, not a digital signature. Keep the
//! on-the-wire computation as-is for client compatibility rather than
//! silently upgrading to real signatures.

use std::time::{Duration, Instant};

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use rand::rngs::OsRng;
use rand::RngCore;

type Blake2b256 = Blake2b<U32>;

/// A challenge has 30s to be answered before it is rejected.
pub const CHALLENGE_TTL: Duration = Duration::from_secs(30);

/// An in-flight authentication attempt for one connection.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub username: String,
    pub challenge_b64: String,
    issued_at: Instant,
}

impl AuthSession {
    pub fn new(username: String, challenge_b64: String) -> Self {
        Self { username, challenge_b64, issued_at: Instant::now() }
    }

    pub fn is_expired(&self) -> bool {
        self.issued_at.elapsed() > CHALLENGE_TTL
    }
}

/// Generates a fresh 32-byte, base64-encoded challenge nonce.
///
/// Random generation failure is fatal to the call (no weaker fallback
/// source).
pub fn generate_challenge() -> anyhow::Result<String> {
    let mut bytes = [0u8; 32];
    OsRng.try_fill_bytes(&mut bytes).context("failed to generate challenge nonce")?;
    Ok(BASE64.encode(bytes))
}

/// Verifies `signature_b64` against `challenge_b64` and `pubkey_b64`
/// per the `BLAKE2b-256(challenge ‖ pubkey)` scheme. Any base64
/// decoding failure is treated as a rejection, not an error, so the
/// caller can always emit a uniform `AUTH_FAILED`.
pub fn verify_signature(pubkey_b64: &str, challenge_b64: &str, signature_b64: &str) -> bool {
    let (Ok(pubkey), Ok(challenge), Ok(signature)) = (
        BASE64.decode(pubkey_b64),
        BASE64.decode(challenge_b64),
        BASE64.decode(signature_b64),
    ) else {
        return false;
    };

    let mut hasher = Blake2b256::new();
    hasher.update(&challenge);
    hasher.update(&pubkey);
    let expected = hasher.finalize();

    constant_time_eq(&signature, &expected)
}

/// Constant-time buffer comparison: XOR-accumulates across the whole
/// buffer rather than short-circuiting on the first mismatch.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
