/// Errors surfaced through the facade.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The URI matched no known scheme.
    #[error("invalid URI: {0}")]
    BadUri(String),

    #[error(transparent)]
    Net(#[from] riio_net::NetError),

    #[error(transparent)]
    Usb(#[from] riio_usb::UsbError),
}

pub type Result<T> = std::result::Result<T, Error>;
