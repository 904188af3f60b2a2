//! User registry (C2): `{username -> base64 public key}`, persisted as
//! pretty-printed JSON.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::persist;

#[derive(Debug, Default, Serialize, Deserialize)]
struct UsersFile(HashMap<String, String>);

/// Loads, holds, and flushes the username → pubkey mapping. All access
/// is expected to happen behind the caller's single lock (see
/// [`crate::state::Shared`]); this type does no internal locking.
pub struct UserRegistry {
    path: PathBuf,
    users: HashMap<String, String>,
}

impl UserRegistry {
    /// Loads the registry from `path`, creating an empty `{}` file if
    /// it doesn't exist yet.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let users = match std::fs::read_to_string(&path) {
            Ok(contents) => {
                let UsersFile(map) = serde_json::from_str(&contents)
                    .with_context(|| format!("failed to parse users file {}", path.display()))?;
                map
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                persist::write_atomic(&path, &serde_json::to_vec_pretty(&UsersFile::default())?)
                    .with_context(|| format!("failed to create users file {}", path.display()))?;
                HashMap::new()
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read users file {}", path.display()))
            }
        };

        Ok(Self { path, users })
    }

    /// Inserts `(name, pubkey)` iff `name` is not already registered,
    /// then flushes the whole registry. Returns `false` if the username
    /// was already taken.
    pub fn register(&mut self, name: &str, pubkey: &str) -> Result<bool> {
        if self.users.contains_key(name) {
            return Ok(false);
        }
        self.users.insert(name.to_string(), pubkey.to_string());
        self.flush()?;
        Ok(true)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.users.contains_key(name)
    }

    /// Returns the stored public key, or `None` if unregistered.
    pub fn get_pubkey(&self, name: &str) -> Option<&str> {
        self.users.get(name).map(String::as_str)
    }

    fn flush(&self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&UsersFile(self.users.clone()))?;
        persist::write_atomic(&self.path, &bytes)
            .with_context(|| format!("failed to flush users file {}", self.path.display()))
    }
}
