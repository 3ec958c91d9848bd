//! Bulk-endpoint port halves feeding a responder.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use riio_transport::{CancelToken, PortRead, PortWrite, Result, TransportError};
use rusb::{Context, DeviceHandle};

use crate::ep::EndpointCouple;

/// Cap on a single bulk submission. Larger URBs can fail with out-of-memory
/// when the kernel has to allocate them contiguously; the vectored I/O layer
/// resumes the short transfer, which segments big operations naturally.
pub const MAX_BULK_TRANSFER: usize = 1024 * 1024;

/// How often an idle bulk read wakes up to check for cancellation.
const READ_POLL: Duration = Duration::from_millis(250);

fn map_transfer_error(err: rusb::Error) -> TransportError {
    match err {
        rusb::Error::Timeout => TransportError::Timeout,
        rusb::Error::Pipe => TransportError::BrokenPipe,
        rusb::Error::NoDevice => TransportError::NoDevice,
        other => TransportError::Io(std::io::Error::other(other)),
    }
}

/// IN-endpoint half. Reads poll in short slices so a fired cancel token is
/// noticed promptly even while the link is idle.
pub struct UsbBulkReader {
    handle: Arc<DeviceHandle<Context>>,
    couple: EndpointCouple,
    token: CancelToken,
}

impl UsbBulkReader {
    pub fn new(handle: Arc<DeviceHandle<Context>>, couple: EndpointCouple, token: CancelToken) -> Self {
        Self {
            handle,
            couple,
            token,
        }
    }

    fn bulk_in(&self, buf: &mut [u8]) -> Result<usize> {
        loop {
            self.token.ensure_live()?;

            match self.handle.read_bulk(self.couple.addr_in, buf, READ_POLL) {
                Ok(0) => continue,
                Ok(n) => return Ok(n),
                // Idle link; keep polling so cancellation stays responsive.
                Err(rusb::Error::Timeout) => continue,
                Err(rusb::Error::Interrupted) => continue,
                Err(err) => return Err(map_transfer_error(err)),
            }
        }
    }
}

impl PortRead for UsbBulkReader {
    fn read_vectored(&mut self, bufs: &mut [&mut [u8]]) -> Result<usize> {
        let Some(buf) = bufs.iter_mut().find(|b| !b.is_empty()) else {
            return Ok(0);
        };
        let len = buf.len().min(MAX_BULK_TRANSFER);
        self.bulk_in(&mut buf[..len])
    }

    fn discard(&mut self, bytes: usize) -> Result<usize> {
        let mut scratch = [0u8; 4096];
        let len = bytes.min(scratch.len());
        self.bulk_in(&mut scratch[..len])
    }
}

/// OUT-endpoint half. Writes honour the context data timeout.
pub struct UsbBulkWriter {
    handle: Arc<DeviceHandle<Context>>,
    couple: EndpointCouple,
    token: CancelToken,
    timeout_ms: Arc<AtomicU32>,
}

impl UsbBulkWriter {
    pub fn new(
        handle: Arc<DeviceHandle<Context>>,
        couple: EndpointCouple,
        token: CancelToken,
        timeout_ms: Arc<AtomicU32>,
    ) -> Self {
        Self {
            handle,
            couple,
            token,
            timeout_ms,
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.timeout_ms.load(Ordering::Relaxed)))
    }
}

impl PortWrite for UsbBulkWriter {
    fn write_vectored(&mut self, bufs: &[&[u8]]) -> Result<usize> {
        let Some(buf) = bufs.iter().find(|b| !b.is_empty()) else {
            return Ok(0);
        };
        let chunk = &buf[..buf.len().min(MAX_BULK_TRANSFER)];

        loop {
            self.token.ensure_live()?;

            match self.handle.write_bulk(self.couple.addr_out, chunk, self.timeout()) {
                Ok(n) => return Ok(n),
                Err(rusb::Error::Interrupted) => continue,
                Err(err) => return Err(map_transfer_error(err)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_errors_map_deterministically() {
        assert!(matches!(
            map_transfer_error(rusb::Error::Timeout),
            TransportError::Timeout
        ));
        assert!(matches!(
            map_transfer_error(rusb::Error::Pipe),
            TransportError::BrokenPipe
        ));
        assert!(matches!(
            map_transfer_error(rusb::Error::NoDevice),
            TransportError::NoDevice
        ));
        assert!(matches!(
            map_transfer_error(rusb::Error::Overflow),
            TransportError::Io(_)
        ));
    }

    #[test]
    fn bulk_cap_is_one_mebibyte() {
        // The kernel-URB allocation constraint the cap exists for.
        assert_eq!(MAX_BULK_TRANSFER, 1024 * 1024);
    }
}
