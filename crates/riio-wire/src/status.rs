use std::fmt;

use riio_transport::TransportError;

/// Fault kinds carried as negative codes in response headers.
///
/// The mapping mirrors POSIX errno values so both ends of the link agree on
/// the numbering. Cancellation travels as `EBADF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    InvalidArgument,
    AccessDenied,
    NotFound,
    NoDevice,
    Busy,
    Timeout,
    BrokenPipe,
    Interrupted,
    OutOfMemory,
    Unsupported,
    Cancelled,
    Io,
}

impl Fault {
    /// The negative code placed in a response header.
    pub fn wire_code(self) -> i32 {
        let errno = match self {
            Fault::InvalidArgument => libc::EINVAL,
            Fault::AccessDenied => libc::EACCES,
            Fault::NotFound => libc::ENOENT,
            Fault::NoDevice => libc::ENODEV,
            Fault::Busy => libc::EBUSY,
            Fault::Timeout => libc::ETIMEDOUT,
            Fault::BrokenPipe => libc::EPIPE,
            Fault::Interrupted => libc::EINTR,
            Fault::OutOfMemory => libc::ENOMEM,
            Fault::Unsupported => libc::ENOSYS,
            Fault::Cancelled => libc::EBADF,
            Fault::Io => libc::EIO,
        };
        -errno
    }

    /// Interpret a negative response code.
    pub fn from_wire_code(code: i32) -> Self {
        match -code {
            x if x == libc::EINVAL => Fault::InvalidArgument,
            x if x == libc::EACCES => Fault::AccessDenied,
            x if x == libc::ENOENT => Fault::NotFound,
            x if x == libc::ENODEV || x == libc::ENXIO => Fault::NoDevice,
            x if x == libc::EBUSY => Fault::Busy,
            x if x == libc::ETIMEDOUT => Fault::Timeout,
            x if x == libc::EPIPE => Fault::BrokenPipe,
            x if x == libc::EINTR => Fault::Interrupted,
            x if x == libc::ENOMEM => Fault::OutOfMemory,
            x if x == libc::ENOSYS => Fault::Unsupported,
            x if x == libc::EBADF => Fault::Cancelled,
            _ => Fault::Io,
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Fault::InvalidArgument => "invalid argument",
            Fault::AccessDenied => "access denied",
            Fault::NotFound => "not found",
            Fault::NoDevice => "no device",
            Fault::Busy => "busy",
            Fault::Timeout => "timed out",
            Fault::BrokenPipe => "broken pipe",
            Fault::Interrupted => "interrupted",
            Fault::OutOfMemory => "out of memory",
            Fault::Unsupported => "unsupported",
            Fault::Cancelled => "cancelled",
            Fault::Io => "I/O error",
        };
        f.write_str(name)
    }
}

/// The wire code a transport failure turns into when it is delivered to a
/// waiting request.
pub fn fault_code(err: &TransportError) -> i32 {
    let fault = match err {
        TransportError::Timeout => Fault::Timeout,
        TransportError::Cancelled => Fault::Cancelled,
        TransportError::Closed | TransportError::BrokenPipe => Fault::BrokenPipe,
        TransportError::NoDevice => Fault::NoDevice,
        TransportError::Connect { .. } | TransportError::Io(_) => Fault::Io,
    };
    fault.wire_code()
}
