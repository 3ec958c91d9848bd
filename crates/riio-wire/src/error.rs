/// Errors that can occur while framing or moving protocol bytes.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The header carried an operation code outside the known set.
    /// This is a fatal protocol error: the stream can no longer be framed.
    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),

    /// A vectored transfer was requested with no buffers at all.
    #[error("empty buffer vector")]
    NoBuffers,

    /// A vectored transfer exceeded the segment ceiling.
    #[error("too many I/O segments ({count}, max {max})")]
    TooManySegments { count: usize, max: usize },

    /// Transport-level failure underneath the codec.
    #[error(transparent)]
    Transport(#[from] riio_transport::TransportError),
}

pub type Result<T> = std::result::Result<T, WireError>;
