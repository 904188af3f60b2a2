//! Token registry (C3): single-use invite tokens with a 7-day TTL.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::persist;

/// Tokens older than this are swept on load and rejected by `validate`.
pub const TOKEN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Default, Serialize, Deserialize)]
struct TokensFile(HashMap<String, u64>);

pub struct TokenRegistry {
    path: PathBuf,
    tokens: HashMap<String, u64>,
}

impl TokenRegistry {
    /// Loads the registry, creating an empty file if missing, and
    /// sweeps any tokens already past their TTL.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut tokens = match std::fs::read_to_string(&path) {
            Ok(contents) => {
                let TokensFile(map) = serde_json::from_str(&contents)
                    .with_context(|| format!("failed to parse tokens file {}", path.display()))?;
                map
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                persist::write_atomic(&path, &serde_json::to_vec_pretty(&TokensFile::default())?)
                    .with_context(|| format!("failed to create tokens file {}", path.display()))?;
                HashMap::new()
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read tokens file {}", path.display()))
            }
        };

        let now = unix_now();
        let before = tokens.len();
        tokens.retain(|_, issued_at| !is_expired(*issued_at, now));

        let mut registry = Self { path, tokens };
        if tokens_were_swept(before, registry.tokens.len()) {
            registry.flush()?;
        }
        Ok(registry)
    }

    /// Generates a fresh single-use token, persists it, and returns it.
    pub fn issue(&mut self) -> Result<String> {
        let mut bytes = [0u8; 16];
        OsRng.try_fill_bytes(&mut bytes).context("failed to generate random token")?;
        let token = BASE64.encode(bytes);

        self.tokens.insert(token.clone(), unix_now());
        self.flush()?;

        Ok(token)
    }

    /// Returns `true` iff `token` is present and unexpired, consuming it
    /// (single use) in that case. Expired-but-present tokens are
    /// removed as a side effect and the call returns `false`.
    pub fn validate(&mut self, token: &str) -> Result<bool> {
        let Some(issued_at) = self.tokens.get(token).copied() else {
            return Ok(false);
        };

        self.tokens.remove(token);
        self.flush()?;

        Ok(!is_expired(issued_at, unix_now()))
    }

    fn flush(&self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&TokensFile(self.tokens.clone()))?;
        persist::write_atomic(&self.path, &bytes)
            .with_context(|| format!("failed to flush tokens file {}", self.path.display()))
    }
}

fn tokens_were_swept(before: usize, after: usize) -> bool {
    before != after
}

fn is_expired(issued_at_unix: u64, now_unix: u64) -> bool {
    now_unix.saturating_sub(issued_at_unix) > TOKEN_TTL.as_secs()
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs()
}
