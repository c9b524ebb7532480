//! The adapter crate's error type.
//!
//! No adapter function fails in a way `brokerlink-core` doesn't already
//! express (session/transport/validation/timeout errors all originate
//! from [`subscribe_and_wait`](brokerlink_core::subscribe_and_wait)), so
//! this is a thin transparent wrapper rather than a parallel taxonomy.

/// Errors returned by the adapter surface.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Propagated unchanged from `brokerlink-core`.
    #[error(transparent)]
    Core(#[from] brokerlink_core::Error),
}

/// Convenience alias, mirroring `brokerlink-core`'s own.
pub type Result<T> = std::result::Result<T, Error>;
