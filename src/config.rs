//! Server configuration: JSON config file with sane defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::StartupError;

fn default_port() -> u16 {
    6697
}

fn default_cert_file() -> PathBuf {
    PathBuf::from("cert.pem")
}

fn default_key_file() -> PathBuf {
    PathBuf::from("key.pem")
}

fn default_users_file() -> PathBuf {
    PathBuf::from("users.json")
}

fn default_tokens_file() -> PathBuf {
    PathBuf::from("tokens.json")
}

fn default_max_connections() -> usize {
    100
}

fn default_rate_limit() -> u32 {
    10
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_cert_file")]
    pub cert_file: PathBuf,
    #[serde(default = "default_key_file")]
    pub key_file: PathBuf,
    #[serde(default = "default_users_file")]
    pub users_file: PathBuf,
    #[serde(default = "default_tokens_file")]
    pub tokens_file: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            cert_file: default_cert_file(),
            key_file: default_key_file(),
            users_file: default_users_file(),
            tokens_file: default_tokens_file(),
            max_connections: default_max_connections(),
            rate_limit: default_rate_limit(),
        }
    }
}

impl Config {
    /// Loads config from `path`. A missing file yields all defaults; a
    /// present-but-malformed file is a fatal [`StartupError`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StartupError> {
        let path = path.as_ref();
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Config::default()),
            Err(source) => {
                return Err(StartupError::ConfigRead {
                    path: path.display().to_string(),
                    source,
                })
            }
        };

        serde_json::from_str(&contents).map_err(|source| StartupError::ConfigParse {
            path: path.display().to_string(),
            source,
        })
    }
}
