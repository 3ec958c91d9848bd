use riio_wire::{Fault, Opcode};

/// Errors surfaced by responder operations.
#[derive(Debug, thiserror::Error)]
pub enum ResponderError {
    /// Transport-level failure.
    #[error(transparent)]
    Transport(#[from] riio_transport::TransportError),

    /// Framing or vectored-I/O failure.
    #[error(transparent)]
    Wire(#[from] riio_wire::WireError),

    /// The request was cancelled before it completed.
    #[error("request cancelled")]
    Cancelled,

    /// The responder's worker threads have shut down.
    #[error("responder stopped")]
    Stopped,

    /// A request was malformed before it reached the wire.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The remote side answered with a negative return code.
    #[error("remote fault: {0}")]
    Remote(Fault),

    /// The peer sent a command this side does not serve.
    #[error("unexpected inbound command {0:?}")]
    UnexpectedCommand(Opcode),
}

impl ResponderError {
    /// Interpret a negative slot code.
    pub(crate) fn from_code(code: i64) -> Self {
        ResponderError::Remote(Fault::from_wire_code(code as i32))
    }
}

pub type Result<T> = std::result::Result<T, ResponderError>;
