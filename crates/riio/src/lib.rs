//! Client for remote industrial-I/O instrument servers.
//!
//! Contexts are addressed by URI:
//!
//! - `ip:<host>[:port]` — TCP, e.g. `ip:192.168.2.1`
//! - `usb:<bus>.<address>[.<interface>]` — USB bulk endpoints, e.g.
//!   `usb:3.32.0`; a bare `usb:` scans and requires exactly one match
//!
//! ```no_run
//! use std::time::Duration;
//!
//! let ctx = riio::from_uri("ip:192.168.2.1", Duration::from_secs(5))?;
//! let raw = ctx.read_attr(0, riio::AttrTarget::Device, "in_voltage0_raw", 64)?;
//! # Ok::<(), riio::Error>(())
//! ```

pub mod context;
pub mod error;

use std::time::Duration;

pub use context::Context;
pub use error::{Error, Result};
pub use riio_net::{NetContext, DEFAULT_PORT};
pub use riio_responder::{AttrTarget, RequestSlot, Responder};
pub use riio_usb::{ScanEntry, UsbContext};

/// Default timeout applied when the caller has no opinion.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Create a context from a URI.
pub fn from_uri(uri: &str, timeout: Duration) -> Result<Context> {
    if let Some(body) = uri.strip_prefix("ip:") {
        Ok(Context::Net(riio_net::NetContext::from_uri_body(
            body, timeout,
        )?))
    } else if let Some(body) = uri.strip_prefix("usb:") {
        Ok(Context::Usb(riio_usb::UsbContext::from_uri_body(
            body, timeout,
        )?))
    } else {
        Err(Error::BadUri(uri.to_string()))
    }
}

/// Enumerate reachable contexts.
///
/// Network discovery needs DNS-SD, which this build does not ship, so the
/// result covers the USB bus.
pub fn scan() -> Result<Vec<ScanEntry>> {
    Ok(riio_usb::scan()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_scheme_is_rejected() {
        assert!(matches!(
            from_uri("serial:/dev/ttyUSB0", DEFAULT_TIMEOUT),
            Err(Error::BadUri(_))
        ));
        assert!(matches!(
            from_uri("192.168.2.1", DEFAULT_TIMEOUT),
            Err(Error::BadUri(_))
        ));
    }

    #[test]
    fn backend_errors_keep_their_shape() {
        assert!(matches!(
            from_uri("ip:", DEFAULT_TIMEOUT),
            Err(Error::Net(riio_net::NetError::DiscoveryUnsupported))
        ));
        assert!(matches!(
            from_uri("usb:one.two", DEFAULT_TIMEOUT),
            Err(Error::Usb(riio_usb::UsbError::BadUri(_)))
        ));
    }
}
