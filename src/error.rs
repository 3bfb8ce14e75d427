use std::path::PathBuf;
use thiserror::Error;

/// All errors that can occur in smallworld operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// I/O error with context.
    #[error("I/O error at {path}: {context} ({source})")]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
        context: String,
    },

    /// Snapshot corruption detected.
    #[error("corruption in {file} at offset {offset}: {message}")]
    Corruption {
        file: PathBuf,
        offset: u64,
        message: String,
    },

    /// Invalid argument provided.
    #[error("invalid argument for field '{field}': {reason}")]
    InvalidArgument { field: String, reason: String },

    /// Vector dimension mismatch.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    WrongDimension { expected: usize, got: usize },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Checksum mismatch.
    #[error("checksum mismatch in {file}: expected {expected:016x}, got {got:016x}")]
    ChecksumMismatch {
        file: PathBuf,
        expected: u64,
        got: u64,
    },
}

impl Error {
    /// Create an I/O error with context.
    pub fn io_err(path: impl Into<PathBuf>, context: impl Into<String>) -> impl FnOnce(std::io::Error) -> Self {
        move |e: std::io::Error| Error::Io {
            source: e,
            path: path.into(),
            context: context.into(),
        }
    }

    /// Create a corruption error.
    pub fn corruption(file: impl Into<PathBuf>, offset: u64, message: impl Into<String>) -> Self {
        Error::Corruption {
            file: file.into(),
            offset,
            message: message.into(),
        }
    }

    /// Create an invalid argument error.
    pub fn invalid_arg(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for smallworld operations.
pub type Result<T> = std::result::Result<T, Error>;
