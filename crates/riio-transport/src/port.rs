use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, TransportError};

/// Read half of a duplex link.
///
/// A port is exclusively owned by one reading thread; implementations do not
/// need to be re-entrant. Reads block until at least one byte arrived and may
/// return short counts.
pub trait PortRead: Send {
    /// Read into `bufs` in order. Returns the number of bytes placed, which
    /// may be less than the total capacity.
    fn read_vectored(&mut self, bufs: &mut [&mut [u8]]) -> Result<usize>;

    /// Consume and throw away up to `bytes` from the stream, returning how
    /// many were dropped. Callers loop until the requested count is drained.
    fn discard(&mut self, bytes: usize) -> Result<usize> {
        let mut scratch = [0u8; 4096];
        let len = bytes.min(scratch.len());
        self.read_vectored(&mut [&mut scratch[..len]])
    }
}

/// Write half of a duplex link. Exclusively owned by one writing thread.
pub trait PortWrite: Send {
    /// Write the buffers in order. Returns the number of bytes accepted,
    /// which may be less than the total.
    fn write_vectored(&mut self, bufs: &[&[u8]]) -> Result<usize>;
}

/// One-shot cancellation flag shared between a link and its owner.
///
/// Firing the token is idempotent and permanent: every subsequent operation
/// on the associated link fails with [`TransportError::Cancelled`] until the
/// link is torn down and rebuilt.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    fired: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the link as cancelled.
    pub fn fire(&self) {
        self.fired.store(true, Ordering::SeqCst);
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Fail fast if the token has fired.
    pub fn ensure_live(&self) -> Result<()> {
        if self.is_fired() {
            Err(TransportError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_starts_live() {
        let token = CancelToken::new();
        assert!(!token.is_fired());
        assert!(token.ensure_live().is_ok());
    }

    #[test]
    fn fire_is_permanent_and_idempotent() {
        let token = CancelToken::new();
        token.fire();
        token.fire();
        assert!(token.is_fired());
        assert!(matches!(
            token.ensure_live(),
            Err(TransportError::Cancelled)
        ));
    }

    #[test]
    fn clones_share_state() {
        let token = CancelToken::new();
        let other = token.clone();
        other.fire();
        assert!(token.is_fired());
    }

    #[test]
    fn default_discard_caps_to_request() {
        struct Zeroes;

        impl PortRead for Zeroes {
            fn read_vectored(&mut self, bufs: &mut [&mut [u8]]) -> Result<usize> {
                Ok(bufs.iter().map(|b| b.len()).sum())
            }
        }

        let mut port = Zeroes;
        assert_eq!(port.discard(10).unwrap(), 10);
        // Large requests are drained in scratch-sized steps.
        assert_eq!(port.discard(1 << 20).unwrap(), 4096);
    }
}
