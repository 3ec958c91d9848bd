/// Errors that can occur on a transport link.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to connect to the remote host.
    #[error("failed to connect to {host}: {source}")]
    Connect {
        host: String,
        source: std::io::Error,
    },

    /// The peer closed the stream.
    #[error("connection closed")]
    Closed,

    /// A blocking operation exceeded the transport timeout.
    #[error("transport timed out")]
    Timeout,

    /// The operation was aborted through the link's cancellation handle.
    /// The link stays unusable until the device is closed and reopened.
    #[error("transport cancelled")]
    Cancelled,

    /// The remote endpoint stalled.
    #[error("broken pipe")]
    BrokenPipe,

    /// The underlying device disappeared.
    #[error("no device")]
    NoDevice,

    /// An I/O error occurred on the stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;
