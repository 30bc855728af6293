use std::error::Error as StdError;

/// Errors that can occur during hedged round trips.
#[derive(thiserror::Error, Debug)]
pub enum HedgedError {
    /// The underlying transport failed.
    ///
    /// The source error (I/O, DNS, protocol) is propagated verbatim.
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn StdError + Send + Sync>),

    /// A response arrived with a status code outside the resource's
    /// acceptable set.
    #[error("received unexpected response status code {0}")]
    UnexpectedStatus(u16),

    /// The caller's cancellation scope was cancelled before any acceptable
    /// response arrived.
    #[error("request canceled")]
    Canceled,
}

impl HedgedError {
    /// Wraps an arbitrary transport-level error.
    pub fn transport(err: impl StdError + Send + Sync + 'static) -> Self {
        HedgedError::Transport(Box::new(err))
    }
}
