//! Request/response multiplexer for a single remote IIO link.
//!
//! A [`Responder`] owns the two halves of a duplex port and two worker
//! threads. The writer thread is the only producer of outbound bytes, so a
//! command header and its payload are always contiguous on the wire. The
//! reader thread decodes inbound frames, routes responses to their
//! [`RequestSlot`] by client id, and hands every other command to the
//! collaborator-supplied [`CommandHandler`].
//!
//! User threads interact through slots: enqueue a send, enqueue a response
//! request, block until the matching direction completes. Multiple
//! operations may be in flight on one link at the same time.

pub mod error;
pub mod ops;
pub mod responder;
pub mod slot;

pub(crate) mod sync;

pub use error::{ResponderError, Result};
pub use ops::AttrTarget;
pub use responder::{CommandData, CommandHandler, RejectAllHandler, Responder};
pub use slot::{CleanupFn, RequestSlot};
