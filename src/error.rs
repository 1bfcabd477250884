//! Error types for vmarena.
//!
//! Only construction-time validation is recoverable. Failing OS calls and
//! arena exhaustion without the allow-failure policy abort the process
//! instead of propagating (see the crate docs on error handling).

use thiserror::Error;

/// Result type alias using vmarena's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for vmarena operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Arena configuration rejected at construction.
    #[error("invalid arena configuration: {0}")]
    InvalidConfig(&'static str),

    /// A buffer handed to a constructor or operation cannot be used.
    #[error("invalid buffer: {0}")]
    InvalidBuffer(&'static str),
}
