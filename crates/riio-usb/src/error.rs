/// Errors surfaced by the USB backend.
#[derive(Debug, thiserror::Error)]
pub enum UsbError {
    #[error("invalid USB URI: {0}")]
    BadUri(String),

    /// Every non-control endpoint couple is owned by an open device.
    #[error("no free endpoint couple")]
    NoFreeCouple,

    /// No interface advertises the IIO string descriptor.
    #[error("no IIO interface on this device")]
    InterfaceNotFound,

    /// The interface's bulk endpoints are not an alternating IN/OUT set.
    #[error("invalid endpoint configuration")]
    BadEndpoints,

    /// A scan had to match exactly one device.
    #[error("scan matched {0} devices, need exactly one")]
    AmbiguousScan(usize),

    #[error("device index {0} is not open")]
    NotOpen(u8),

    #[error("device index {0} is already open")]
    AlreadyOpen(u8),

    #[error("invalid argument")]
    InvalidArgument,

    #[error("access denied")]
    AccessDenied,

    #[error("device not found")]
    NotFound,

    #[error("no device")]
    NoDevice,

    #[error("device busy")]
    Busy,

    #[error("transfer timed out")]
    Timeout,

    #[error("endpoint stalled")]
    BrokenPipe,

    #[error("interrupted")]
    Interrupted,

    #[error("out of memory")]
    OutOfMemory,

    #[error("not supported")]
    Unsupported,

    #[error("USB I/O error")]
    Io,

    #[error(transparent)]
    Responder(#[from] riio_responder::ResponderError),
}

/// Deterministic mapping of libusb failures, the same table the wire codes
/// use.
pub fn map_usb(err: rusb::Error) -> UsbError {
    match err {
        rusb::Error::InvalidParam => UsbError::InvalidArgument,
        rusb::Error::Access => UsbError::AccessDenied,
        rusb::Error::NoDevice => UsbError::NoDevice,
        rusb::Error::NotFound => UsbError::NotFound,
        rusb::Error::Busy => UsbError::Busy,
        rusb::Error::Timeout => UsbError::Timeout,
        rusb::Error::Pipe => UsbError::BrokenPipe,
        rusb::Error::Interrupted => UsbError::Interrupted,
        rusb::Error::NoMem => UsbError::OutOfMemory,
        rusb::Error::NotSupported => UsbError::Unsupported,
        _ => UsbError::Io,
    }
}

pub type Result<T> = std::result::Result<T, UsbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn libusb_errors_map_like_errno() {
        assert!(matches!(map_usb(rusb::Error::Timeout), UsbError::Timeout));
        assert!(matches!(map_usb(rusb::Error::Pipe), UsbError::BrokenPipe));
        assert!(matches!(map_usb(rusb::Error::NoDevice), UsbError::NoDevice));
        assert!(matches!(map_usb(rusb::Error::Access), UsbError::AccessDenied));
        assert!(matches!(map_usb(rusb::Error::Busy), UsbError::Busy));
        assert!(matches!(
            map_usb(rusb::Error::NotSupported),
            UsbError::Unsupported
        ));
        // Everything else degrades to a plain I/O error.
        assert!(matches!(map_usb(rusb::Error::Overflow), UsbError::Io));
        assert!(matches!(map_usb(rusb::Error::Other), UsbError::Io));
    }
}
