use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::error::{Result, UsbError};

/// A bulk endpoint as found in the interface descriptor, already filtered to
/// transfer type Bulk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointAddr {
    pub address: u8,
    pub is_in: bool,
}

/// A paired (IN, OUT) bulk endpoint used as one logical duplex pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointCouple {
    pub addr_in: u8,
    pub addr_out: u8,
    pub pipe_id: u16,
}

/// Form couples from the interface's bulk endpoints.
///
/// The interface must expose an even number of bulk endpoints, at least two,
/// alternating IN then OUT; adjacent pairs become couples.
pub fn pair_endpoints(endpoints: &[EndpointAddr]) -> Result<Vec<EndpointCouple>> {
    if endpoints.len() < 2 || endpoints.len() % 2 != 0 {
        return Err(UsbError::BadEndpoints);
    }

    let mut couples = Vec::with_capacity(endpoints.len() / 2);
    for (pipe, pair) in endpoints.chunks_exact(2).enumerate() {
        if !pair[0].is_in || pair[1].is_in {
            return Err(UsbError::BadEndpoints);
        }
        couples.push(EndpointCouple {
            addr_in: pair[0].address,
            addr_out: pair[1].address,
            pipe_id: pipe as u16,
        });
    }
    Ok(couples)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CoupleState {
    Free,
    /// Couple 0, permanently bound to the control/attribute stream.
    Control,
    Owned(u8),
}

/// Exclusive-ownership pool of endpoint couples.
///
/// Couple 0 is reserved for the control stream at construction and is never
/// handed out. Every other couple is leased to at most one device at a time;
/// dropping the lease returns the couple.
pub struct EndpointPool {
    couples: Vec<EndpointCouple>,
    state: Mutex<Vec<CoupleState>>,
}

impl EndpointPool {
    pub fn new(couples: Vec<EndpointCouple>) -> Arc<Self> {
        let mut state = vec![CoupleState::Free; couples.len()];
        if let Some(first) = state.first_mut() {
            *first = CoupleState::Control;
        }
        Arc::new(Self {
            couples,
            state: Mutex::new(state),
        })
    }

    /// The couple carrying the control/attribute stream.
    pub fn control_couple(&self) -> EndpointCouple {
        self.couples[0]
    }

    pub fn len(&self) -> usize {
        self.couples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.couples.is_empty()
    }

    /// Lease the first free couple for `dev`.
    pub fn reserve(self: &Arc<Self>, dev: u8) -> Result<EndpointLease> {
        let mut state = lock(&self.state);
        for (index, slot) in state.iter_mut().enumerate() {
            if *slot == CoupleState::Free {
                *slot = CoupleState::Owned(dev);
                debug!(index, dev, "reserved endpoint couple");
                return Ok(EndpointLease {
                    pool: Arc::clone(self),
                    index,
                    couple: self.couples[index],
                });
            }
        }
        Err(UsbError::NoFreeCouple)
    }

    fn release(&self, index: usize) {
        let mut state = lock(&self.state);
        debug!(index, "released endpoint couple");
        state[index] = CoupleState::Free;
    }
}

/// Owned reservation of one couple; releasing is automatic on drop, so a
/// leaked reservation cannot outlive its device.
pub struct EndpointLease {
    pool: Arc<EndpointPool>,
    index: usize,
    couple: EndpointCouple,
}

impl EndpointLease {
    pub fn couple(&self) -> EndpointCouple {
        self.couple
    }

    pub fn pipe_id(&self) -> u16 {
        self.couple.pipe_id
    }
}

impl Drop for EndpointLease {
    fn drop(&mut self) {
        self.pool.release(self.index);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eps(layout: &[(u8, bool)]) -> Vec<EndpointAddr> {
        layout
            .iter()
            .map(|&(address, is_in)| EndpointAddr { address, is_in })
            .collect()
    }

    fn sample_pool() -> Arc<EndpointPool> {
        let couples = pair_endpoints(&eps(&[
            (0x81, true),
            (0x01, false),
            (0x82, true),
            (0x02, false),
            (0x83, true),
            (0x03, false),
        ]))
        .unwrap();
        EndpointPool::new(couples)
    }

    #[test]
    fn pairing_builds_adjacent_couples() {
        let couples = pair_endpoints(&eps(&[(0x81, true), (0x01, false), (0x82, true), (0x02, false)]))
            .unwrap();
        assert_eq!(couples.len(), 2);
        assert_eq!(couples[0].addr_in, 0x81);
        assert_eq!(couples[0].addr_out, 0x01);
        assert_eq!(couples[0].pipe_id, 0);
        assert_eq!(couples[1].pipe_id, 1);
    }

    #[test]
    fn pairing_rejects_bad_layouts() {
        // Too few.
        assert!(pair_endpoints(&eps(&[(0x81, true)])).is_err());
        // Odd count.
        assert!(pair_endpoints(&eps(&[(0x81, true), (0x01, false), (0x82, true)])).is_err());
        // Wrong order.
        assert!(pair_endpoints(&eps(&[(0x01, false), (0x81, true)])).is_err());
        // Two INs in a row.
        assert!(pair_endpoints(&eps(&[(0x81, true), (0x82, true)])).is_err());
    }

    #[test]
    fn couple_zero_is_never_leased() {
        let pool = sample_pool();
        assert_eq!(pool.control_couple().pipe_id, 0);

        let a = pool.reserve(0).unwrap();
        let b = pool.reserve(1).unwrap();
        assert_eq!(a.pipe_id(), 1);
        assert_eq!(b.pipe_id(), 2);
        assert!(matches!(pool.reserve(2), Err(UsbError::NoFreeCouple)));
    }

    #[test]
    fn dropping_a_lease_frees_the_couple() {
        let pool = sample_pool();

        let a = pool.reserve(0).unwrap();
        let _b = pool.reserve(1).unwrap();
        let taken = a.pipe_id();
        drop(a);

        // The freed couple is handed out again; couple 0 still is not.
        let c = pool.reserve(2).unwrap();
        assert_eq!(c.pipe_id(), taken);
    }
}
