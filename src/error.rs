//! Wire error taxonomy and fatal startup errors.

use std::fmt;

/// Error codes carried on the wire as `ERROR <CODE> [detail]`.
///
/// All of these are non-fatal to the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    UnknownCommand,
    NotAuthenticated,
    AuthFailed,
    UserNotFound,
    UserExists,
    InvalidToken,
    RoomNotFound,
    AlreadyInRoom,
    NotInRoom,
    InvalidFormat,
    RateLimited,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::UnknownCommand => "UNKNOWN_COMMAND",
            ErrorCode::NotAuthenticated => "NOT_AUTHENTICATED",
            ErrorCode::AuthFailed => "AUTH_FAILED",
            ErrorCode::UserNotFound => "USER_NOT_FOUND",
            ErrorCode::UserExists => "USER_EXISTS",
            ErrorCode::InvalidToken => "INVALID_TOKEN",
            ErrorCode::RoomNotFound => "ROOM_NOT_FOUND",
            ErrorCode::AlreadyInRoom => "ALREADY_IN_ROOM",
            ErrorCode::NotInRoom => "NOT_IN_ROOM",
            ErrorCode::InvalidFormat => "INVALID_FORMAT",
            ErrorCode::RateLimited => "RATE_LIMITED",
        };
        f.write_str(s)
    }
}

/// Fatal errors that abort the whole process before (or while) accepting
/// connections. Everything else is reported on the wire and the
/// connection stays open.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed to read config file {path}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}")]
    ConfigParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to read certificate file {path}")]
    CertRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read private key file {path}")]
    KeyRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("certificate file {path} contains no certificates")]
    CertEmpty { path: String },
    #[error("private key file {path} contains no private key")]
    KeyEmpty { path: String },
    #[error("invalid TLS configuration")]
    TlsConfig(#[source] rustls::Error),
    #[error("failed to bind listener on port {port}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
}
