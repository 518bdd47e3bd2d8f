//! Error taxonomy shared by the registry, the daemon and the client.
//!
//! Every registry operation fails with exactly one `Error`. The daemon turns it into a
//! fixed HTTP status plus a JSON body `{"kind": "...", "message": "..."}`; the client
//! parses that body back into the same `Error`.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Malformed request: empty required field, zero size, too short prefix, bad name.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Reference does not resolve to any entity.
    #[error("not found: {0}")]
    NotFound(String),

    /// Abbreviated UUID matches more than one entity.
    #[error("ambiguous id '{prefix}': matches {matches} entities")]
    AmbiguousId { prefix: String, matches: usize },

    /// Name collision, delete with dependents, entity busy in a conflicting way.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Physical operation failed; the cause is the driver's message.
    #[error("driver error: {0}")]
    Driver(String),

    /// Caller deadline exceeded while waiting for the driver.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Persistence failure, corrupted on-disk state, poisoned lock.
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    #[serde(rename = "AmbiguousID")]
    AmbiguousId,
    Conflict,
    #[serde(rename = "DriverError")]
    Driver,
    Timeout,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "InvalidArgument",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::AmbiguousId => "AmbiguousID",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::Driver => "DriverError",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Internal => "Internal",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::InvalidArgument => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::AmbiguousId | ErrorKind::Conflict => 409,
            ErrorKind::Driver => 502,
            ErrorKind::Timeout => 504,
            ErrorKind::Internal => 500,
        }
    }

    /// Best guess when a response carries no parsable error body.
    pub fn from_http_status(status: u16) -> ErrorKind {
        match status {
            400 | 405 | 413 => ErrorKind::InvalidArgument,
            404 => ErrorKind::NotFound,
            409 => ErrorKind::Conflict,
            502 => ErrorKind::Driver,
            504 => ErrorKind::Timeout,
            _ => ErrorKind::Internal,
        }
    }

    /// Process exit code of a one-shot client command failing with this kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::InvalidArgument => 2,
            ErrorKind::NotFound => 3,
            ErrorKind::AmbiguousId => 4,
            ErrorKind::Conflict => 5,
            ErrorKind::Driver => 6,
            ErrorKind::Timeout => 7,
            ErrorKind::Internal => 8,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::AmbiguousId { .. } => ErrorKind::AmbiguousId,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Driver(_) => ErrorKind::Driver,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn conflict<S: Into<String>>(msg: S) -> Self {
        Error::Conflict(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Error::Internal(msg.into())
    }

    /// Wire form of this error.
    pub fn to_body(&self) -> ErrorBody {
        let message = match self {
            Error::InvalidArgument(m)
            | Error::NotFound(m)
            | Error::Conflict(m)
            | Error::Driver(m)
            | Error::Timeout(m)
            | Error::Internal(m) => m.clone(),
            Error::AmbiguousId { prefix, matches } => format!("{prefix} ({matches} matches)"),
        };
        ErrorBody {
            kind: self.kind(),
            message,
            matches: match self {
                Error::AmbiguousId { matches, .. } => Some(*matches),
                _ => None,
            },
        }
    }

    /// Inverse of `to_body`.
    pub fn from_body(body: ErrorBody) -> Self {
        let m = body.message;
        match body.kind {
            ErrorKind::InvalidArgument => Error::InvalidArgument(m),
            ErrorKind::NotFound => Error::NotFound(m),
            ErrorKind::AmbiguousId => {
                let matches = body.matches.unwrap_or(2);
                // message is "<prefix> (<n> matches)"
                let prefix = m
                    .split_once(" (")
                    .map(|(p, _)| p.to_string())
                    .unwrap_or(m);
                Error::AmbiguousId { prefix, matches }
            }
            ErrorKind::Conflict => Error::Conflict(m),
            ErrorKind::Driver => Error::Driver(m),
            ErrorKind::Timeout => Error::Timeout(m),
            ErrorKind::Internal => Error::Internal(m),
        }
    }
}

/// JSON error body of a non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matches: Option<usize>,
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Internal(format!("json: {e}"))
    }
}

impl From<crate::driver::DriverError> for Error {
    fn from(e: crate::driver::DriverError) -> Self {
        Error::Driver(e.to_string())
    }
}
