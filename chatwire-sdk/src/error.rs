//! Error types returned across the SDK boundary.
//!
//! Transport trouble after a connection is up never shows up here: it becomes
//! a [`ConnectionState`](crate::ConnectionState) transition instead. Only the
//! caller of an explicit `connect()` sees a [`ConnectError`].

/// Failure to bring the transport to the open state.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// The endpoint URL could not be built from the configuration.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    /// The transport reported an error before it opened.
    #[error("transport error: {0}")]
    Transport(String),
    /// The server refused the credentials during the handshake.
    #[error("unauthorized")]
    Unauthorized,
    /// Another attempt is already opening the transport.
    #[error("a connection attempt is already in progress")]
    InProgress,
    /// `disconnect()` was called while the attempt was in flight.
    #[error("connection attempt cancelled")]
    Cancelled,
}

/// Failure to hand a frame to the transport.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The transport is not in the open state.
    #[error("not connected")]
    NotConnected,
    /// The frame could not be encoded as JSON.
    #[error("failed to encode frame: {0}")]
    Serialize(#[from] serde_json::Error),
    /// The writer went away between the state check and the write.
    #[error("connection closed while sending")]
    Closed,
}

/// Failure reading or writing the per-user notification blob.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure raising or negotiating a native OS-level alert.
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    /// The platform has no native alert channel.
    #[error("native alerts are not supported on this platform")]
    Unsupported,
    #[error("native alert failed: {0}")]
    Platform(String),
}
