//! Error types for 7z archive operations.
//!
//! All fallible operations in this crate return [`Result<T>`], an alias for
//! `std::result::Result<T, Error>`. Errors are never swallowed: every failure
//! surfaces to the caller, with one documented exception (the recovery scan,
//! see [`crate::read::Reader`]).

use std::io;

/// The main error type for 7z archive operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error from the underlying byte source.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The file does not start with the 7z magic, or its major format
    /// version is not supported.
    #[error("not a 7z archive: {0}")]
    BadSignature(String),

    /// A structural violation in the archive: truncated data, a bad
    /// variable-length integer, an unknown mandatory tag, inconsistent
    /// counts, an out-of-range bind pair, or a CRC mismatch.
    #[error("corrupt archive: {0}")]
    Corrupt(String),

    /// The archive uses a format feature outside this engine's scope:
    /// coders with multiple input or output streams, alternate methods,
    /// or additional-streams blocks.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// An allocation sized from header input would exceed the configured
    /// memory ceiling. Raised before the allocation is attempted.
    #[error("memory limit exceeded: {needed_kib} KiB needed, limit is {limit_kib} KiB")]
    MemoryLimit {
        /// Estimated requirement in KiB.
        needed_kib: u64,
        /// The configured ceiling in KiB.
        limit_kib: u64,
    },

    /// An encrypted coder is present but no password was supplied.
    #[error("archive is encrypted and no password was supplied")]
    PasswordRequired,

    /// The AES primitive rejected the key, IV, or ciphertext.
    #[error("cryptographic failure: {0}")]
    Crypto(String),

    /// The caller supplied an invalid configuration or argument.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),
}

impl Error {
    /// Builds a [`Error::Corrupt`] from anything displayable.
    pub(crate) fn corrupt(reason: impl Into<String>) -> Self {
        Error::Corrupt(reason.into())
    }

    /// Builds a [`Error::Unsupported`] from anything displayable.
    pub(crate) fn unsupported(feature: impl Into<String>) -> Self {
        Error::Unsupported(feature.into())
    }

    /// Maps an I/O error produced inside a decoder stack back to the archive
    /// error it represents. Decoders report bad input as `InvalidData`, and
    /// early EOF inside a length-bounded stream means truncation; both are
    /// corruption of the archive, not environment failures.
    pub(crate) fn from_stream(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
                Error::Corrupt(e.to_string())
            }
            _ => Error::Io(e),
        }
    }
}

/// A specialized result type for 7z archive operations.
pub type Result<T> = std::result::Result<T, Error>;
