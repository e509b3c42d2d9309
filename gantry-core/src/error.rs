/// Gantry Core Error Types
///
/// Comprehensive error handling for the forwarding kernel.

use thiserror::Error;

/// Main error type for forwarding-kernel operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Producer could not place bytes; the input region is exhausted
    #[error("Buffer full")]
    BufFull,

    /// Consumer found no data to drain
    #[error("Buffer empty")]
    BufEmpty,

    /// Operation attempted on a shut channel side
    #[error("Channel closed")]
    BufClosed,

    /// Message larger than the channel can ever hold
    #[error("Message too large: {size} bytes (capacity: {capacity})")]
    BufOversize { size: usize, capacity: usize },

    /// No bytes arrived before the read expiration tick
    #[error("Read timeout")]
    ReadTimeout,

    /// Pending output could not be flushed before the write expiration tick
    #[error("Write timeout")]
    WriteTimeout,

    /// Backend connection did not establish before the connect expiration tick
    #[error("Connect timeout")]
    ConnectTimeout,

    /// Backend connection failed
    #[error("Connect error: {0}")]
    ConnectError(String),

    /// Framing or preface violation
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A typed pool could not serve an allocation request
    #[error("Pool exhausted: {0}")]
    Resource(&'static str),
}

/// Result type alias for forwarding-kernel operations
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Create a protocol error with a message
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a connect error with a message
    pub fn connect(msg: impl Into<String>) -> Self {
        Self::ConnectError(msg.into())
    }

    /// Check if this error is transient.
    ///
    /// Transient conditions are recovered locally via wait flags and
    /// re-entry; everything else terminates the affected direction or the
    /// whole stream.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::BufFull | Self::BufEmpty)
    }

    /// Check if this error terminates the stream
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::BufClosed
                | Self::BufOversize { .. }
                | Self::ReadTimeout
                | Self::WriteTimeout
                | Self::ConnectTimeout
                | Self::Protocol(_)
        )
    }
}
