//! TCP network backend for remote IIO contexts.
//!
//! One socket carries the control/attribute stream for the context's
//! lifetime; opening a device dials a second socket dedicated to that
//! device's streaming traffic, which keeps bulk transfers from head-blocking
//! attribute access.

pub mod context;
pub mod error;
pub mod uri;

pub use context::{NetContext, DEFAULT_PORT, DEFAULT_TIMEOUT};
pub use error::{NetError, Result};
pub use uri::parse_uri_body;
