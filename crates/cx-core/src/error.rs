//! Typed error definitions for the CX market-data system.
//!
//! Provides [`CxError`] for domain-specific errors that are more informative
//! than plain `anyhow::Error` strings. All variants implement `std::error::Error`
//! via `thiserror`, so they integrate seamlessly with `anyhow::Result`.
//!
//! Only the key errors are fatal: everything else is recovered locally
//! (reconnect, frame drop, out-of-grid discard).

use thiserror::Error;

/// Domain-specific errors for the CX market-data system.
#[derive(Debug, Error)]
pub enum CxError {
    /// Key material file absent or unreadable. Fatal at construction.
    #[error("key material missing: {0}")]
    KeyMissing(String),

    /// Key material file present but unusable. Fatal at construction.
    #[error("key material malformed: {0}")]
    KeyMalformed(String),

    /// Token signing failed. The affected frame is dropped and retried on
    /// the next reconnect.
    #[error("token signing failed: {0}")]
    SignFailure(String),

    /// Resolve, connect, TLS, handshake, read, write, or ping failure.
    /// Triggers reconnect with backoff.
    #[error("network error: {0}")]
    Network(String),

    /// Per-frame decode failure. Counted and dropped.
    #[error("decode error: {0}")]
    Decode(String),

    /// Server-reported protocol error. Surfaced to consumers.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Bounded queue overflow. Drop-newest policy.
    #[error("capacity exceeded: {0}")]
    Capacity(String),

    /// Configuration parsing or validation error.
    #[error("config error: {0}")]
    Config(String),
}
