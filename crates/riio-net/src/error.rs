/// Errors surfaced by the network backend.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("invalid network URI: {0}")]
    BadUri(String),

    /// An empty host asks for DNS-SD discovery, which this build does not
    /// ship.
    #[error("host discovery is not available, specify a host")]
    DiscoveryUnsupported,

    #[error("device index {0} is not open")]
    NotOpen(u8),

    #[error("device index {0} is already open")]
    AlreadyOpen(u8),

    #[error(transparent)]
    Transport(#[from] riio_transport::TransportError),

    #[error(transparent)]
    Responder(#[from] riio_responder::ResponderError),
}

pub type Result<T> = std::result::Result<T, NetError>;
