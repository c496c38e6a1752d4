use std::fmt;
use std::io;

/// Errors returned by the storage engine and its ambient collaborators
/// (configuration loading, the command-line front end).
#[derive(Debug)]
pub enum Error {
    /// `get` was called for a key with no live keydir entry.
    KeyNotFound,
    /// `put`/`delete` was called with an empty key.
    EmptyKey,
    /// `put` was called with an empty value.
    EmptyValue,
    /// Another process already holds the directory lock.
    Locked,
    /// Recovery found a short read mid-record or a checksum mismatch.
    Corruption(String),
    /// An underlying filesystem error.
    Io(io::Error),
    /// Configuration could not be resolved (bad file syntax, bad env var).
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::KeyNotFound => write!(f, "key not found"),
            Error::EmptyKey => write!(f, "key must not be empty"),
            Error::EmptyValue => write!(f, "value must not be empty"),
            Error::Locked => write!(f, "database directory is locked by another process"),
            Error::Corruption(msg) => write!(f, "data corruption: {msg}"),
            Error::Io(err) => write!(f, "I/O error: {err}"),
            Error::Config(msg) => write!(f, "configuration error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        // A failed advisory lock surfaces as WouldBlock on most platforms;
        // fs4 doesn't give us a dedicated error variant, so we recognize it
        // here rather than forcing every lock call site to special-case it.
        if err.kind() == io::ErrorKind::WouldBlock {
            Error::Locked
        } else {
            Error::Io(err)
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}
