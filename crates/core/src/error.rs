//! Unified error taxonomy for the akashi decision-trace service.
//!
//! Every subsystem (WAL, storage, ingest, search, trace, authz, auth)
//! returns [`Error`]. We use `thiserror` for `Display`/`std::error::Error`
//! impls, matching the rest of this workspace.
//!
//! ## Error kinds
//!
//! The variants below map 1:1 onto the kinds named in the specification's
//! error-handling design: `Validation`, `Auth`, `Forbidden`, `NotFound`,
//! `Conflict`, `QuotaExceeded`, `BufferDraining`, `BufferAtCapacity`,
//! `Transient`, `Corruption`, `Fatal`. A transport layer maps these to HTTP
//! status codes; this crate has no opinion on transport.

use thiserror::Error;

/// Result type alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all akashi subsystems.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or semantically invalid input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Missing or invalid credential.
    #[error("auth error: {0}")]
    Auth(String),

    /// Caller authenticated but lacks permission for the requested resource.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Requested entity does not exist (or is not visible to the caller).
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation would create a duplicate of a uniquely-keyed entity.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Caller has exceeded a configured quota.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The ingest buffer is draining and rejects new admissions.
    #[error("buffer draining")]
    BufferDraining,

    /// The ingest buffer is at its hard capacity.
    #[error("buffer at capacity")]
    BufferAtCapacity,

    /// A retryable failure: serialization conflict, deadlock, connection
    /// reset. Callers may retry with backoff; `WithRetry` helpers recover
    /// these locally up to a bounded attempt count.
    #[error("transient error: {0}")]
    Transient(String),

    /// A WAL record failed CRC/magic/length validation and recovery
    /// truncated at that point. Recoverable — not fatal to startup.
    #[error("wal corruption: {0}")]
    Corruption(String),

    /// Unrecoverable startup misconfiguration (bad key material, unknown
    /// config enum value, missing required dependency).
    #[error("fatal configuration error: {0}")]
    Fatal(String),

    /// I/O error bubbled up from the filesystem (WAL segment files,
    /// checkpoint writes).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for errors that are safe to retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient(_))
    }

    /// True for the WAL-specific corruption kind (distinguished from
    /// `Fatal` because recovery continues past it rather than aborting).
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_))
    }

    /// The suggested transport status code per the specification's
    /// deterministic mapping. Transport crates are free to ignore this and
    /// apply their own mapping; it's provided so every caller maps errors
    /// consistently without duplicating the table.
    pub fn suggested_status(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::Auth(_) => 401,
            Error::Forbidden(_) => 403,
            Error::NotFound(_) => 404,
            Error::Conflict(_) => 409,
            Error::QuotaExceeded(_) => 429,
            Error::BufferDraining | Error::BufferAtCapacity => 503,
            Error::Transient(_) | Error::Fatal(_) | Error::Corruption(_) | Error::Io(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_400() {
        let err = Error::Validation("bad confidence".into());
        assert_eq!(err.suggested_status(), 400);
        assert!(err.to_string().contains("bad confidence"));
    }

    #[test]
    fn transient_is_retryable() {
        let err = Error::Transient("serialization failure".into());
        assert!(err.is_retryable());
        assert!(!Error::Fatal("x".into()).is_retryable());
    }

    #[test]
    fn corruption_is_not_retryable_but_is_corruption() {
        let err = Error::Corruption("bad crc".into());
        assert!(err.is_corruption());
        assert!(!err.is_retryable());
        assert_eq!(err.suggested_status(), 500);
    }

    #[test]
    fn buffer_errors_map_to_503() {
        assert_eq!(Error::BufferDraining.suggested_status(), 503);
        assert_eq!(Error::BufferAtCapacity.suggested_status(), 503);
    }

    #[test]
    fn quota_exceeded_maps_to_429() {
        assert_eq!(Error::QuotaExceeded("daily cap".into()).suggested_status(), 429);
    }
}
