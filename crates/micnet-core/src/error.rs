//! Error types for micnet.
//!
//! All fallible operations across the library return [`Result<T>`], which
//! uses [`Error`] as the error type. Socket-layer, protocol-layer, and
//! lifecycle errors are all captured here.

/// The error type for all micnet operations.
///
/// Variants cover the failure modes encountered when talking to wireless
/// microphone receivers over UDP: transport failures, malformed datagrams,
/// timeouts, and commands issued against devices that have gone away.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (UDP socket, multicast membership).
    #[error("transport error: {0}")]
    Transport(String),

    /// A protocol-level error (malformed frame, bad command grammar,
    /// undecodable JSON).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Timed out waiting for a response from the receiver.
    #[error("timeout waiting for response")]
    Timeout,

    /// An invalid parameter was passed to a device command.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The receiver is no longer registered (evicted as stale, or the
    /// manager was shut down).
    #[error("device not connected")]
    NotConnected,

    /// The manager's event or command channel was closed.
    #[error("channel closed")]
    ChannelClosed,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
