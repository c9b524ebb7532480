//! Error taxonomy shared by every component of the core.

/// All errors the core can surface to a caller.
///
/// [`Error::TwoFactorRequired`] is a signal rather than a failure in the
/// broader control flow (see [`crate::auth::AuthController::ensure_authenticated`]),
/// but it still needs to travel through `?` at call sites that don't special-case it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad credentials, bad 2FA code, refresh failure, or no cookies received.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Caller must prompt for a 2FA code before continuing.
    #[error("2FA required for {masked_phone}")]
    TwoFactorRequired {
        /// The phone number with all but a few digits replaced by `*`.
        masked_phone: String,
    },

    /// WebSocket open/close/error, malformed frame, unparseable JSON body,
    /// a delta with no base text, or a heartbeat timeout.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server sent an `E` frame for this subscription.
    #[error("request error: {0}")]
    Request(String),

    /// The response body did not match the caller's validator.
    #[error("{0}")]
    Validation(String),

    /// The request did not resolve before its deadline.
    #[error("{0} request timed out")]
    Timeout(String),

    /// Unrecognized subscription input (empty topic, malformed payload).
    #[error("invalid subscription config: {0}")]
    Config(String),

    /// Lower-level I/O failure (key store persistence, etc).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Failure constructing or parsing a URL.
    #[error(transparent)]
    Url(#[from] url::ParseError),

    /// The HTTP client could not complete a request after all retries.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// A JSON payload failed to parse or serialize.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the core.
pub type Result<T> = std::result::Result<T, Error>;
