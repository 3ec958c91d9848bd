//! Duplex byte-stream transports for remote IIO links.
//!
//! A transport exposes the narrow port contract the multiplexer builds on:
//! vectored `read`, vectored `write` and `discard`, plus a cancellation
//! handle that can abort a blocked operation from another thread.
//!
//! This is the lowest layer of riio. Everything else builds on top of the
//! [`PortRead`] / [`PortWrite`] traits provided here.

pub mod error;
pub mod port;

#[cfg(unix)]
pub mod tcp;

pub use error::{Result, TransportError};
pub use port::{CancelToken, PortRead, PortWrite};

#[cfg(unix)]
pub use tcp::{TcpController, TcpPort, TcpReader, TcpWriter};
