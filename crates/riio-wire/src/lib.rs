//! Wire format of the remote IIO control protocol.
//!
//! Every exchange starts with a fixed 8-byte command header carrying a
//! client id for response correlation, an operation code, a device index and
//! a signed argument/return code. Response frames append `code` bytes of
//! payload when `code > 0`.
//!
//! The [`rw`] module drives a transport port until a buffer vector has been
//! fully transferred, resuming short reads and writes.

pub mod command;
pub mod error;
pub mod rw;
pub mod status;

pub use command::{Command, Opcode, HEADER_SIZE};
pub use error::{Result, WireError};
pub use rw::{drain, read_exact_vectored, write_all_vectored, MAX_SEGMENTS};
pub use status::{fault_code, Fault};
