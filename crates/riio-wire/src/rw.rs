use riio_transport::{PortRead, PortWrite, TransportError};

use crate::error::{Result, WireError};

/// Ceiling on the number of segments in one vectored transfer, header
/// included.
pub const MAX_SEGMENTS: usize = 32;

/// Write every byte of `bufs` to the port, resuming short writes.
///
/// The port sees the segments exactly in order, so a header followed by its
/// payload stays contiguous on the wire.
pub fn write_all_vectored(port: &mut dyn PortWrite, bufs: &[&[u8]]) -> Result<usize> {
    check_segments(bufs.len())?;

    let total: usize = bufs.iter().map(|b| b.len()).sum();
    let mut done = 0usize;

    while done < total {
        let views = pending_writes(bufs, done);
        let n = port.write_vectored(&views)?;
        if n == 0 {
            return Err(WireError::Transport(TransportError::Closed));
        }
        done += n;
    }

    Ok(total)
}

/// Read exactly `min(limit, capacity)` bytes into `bufs`, resuming short
/// reads and never consuming past `limit`. Oversized trailing buffers are
/// left untouched; the caller discards any wire bytes beyond the capacity.
pub fn read_exact_vectored(
    port: &mut dyn PortRead,
    bufs: &mut [&mut [u8]],
    limit: usize,
) -> Result<usize> {
    check_segments(bufs.len())?;

    let capacity: usize = bufs.iter().map(|b| b.len()).sum();
    let target = capacity.min(limit);
    let mut done = 0usize;

    while done < target {
        let mut views = pending_reads(bufs, done, target - done);
        let n = port.read_vectored(&mut views)?;
        if n == 0 {
            return Err(WireError::Transport(TransportError::Closed));
        }
        done += n;
    }

    Ok(done)
}

/// Throw away exactly `bytes` from the port.
pub fn drain(port: &mut dyn PortRead, mut bytes: usize) -> Result<()> {
    while bytes > 0 {
        let n = port.discard(bytes)?;
        if n == 0 {
            return Err(WireError::Transport(TransportError::Closed));
        }
        bytes -= n.min(bytes);
    }
    Ok(())
}

fn check_segments(count: usize) -> Result<()> {
    if count == 0 {
        return Err(WireError::NoBuffers);
    }
    if count > MAX_SEGMENTS {
        return Err(WireError::TooManySegments {
            count,
            max: MAX_SEGMENTS,
        });
    }
    Ok(())
}

fn pending_writes<'a>(bufs: &[&'a [u8]], mut skip: usize) -> Vec<&'a [u8]> {
    let mut out = Vec::with_capacity(bufs.len());
    for buf in bufs {
        if skip >= buf.len() {
            skip -= buf.len();
            continue;
        }
        out.push(&buf[skip..]);
        skip = 0;
    }
    out
}

fn pending_reads<'a>(
    bufs: &'a mut [&mut [u8]],
    mut skip: usize,
    mut budget: usize,
) -> Vec<&'a mut [u8]> {
    let mut out = Vec::with_capacity(bufs.len());
    for buf in bufs.iter_mut() {
        if budget == 0 {
            break;
        }
        let len = buf.len();
        if skip >= len {
            skip -= len;
            continue;
        }
        let take = (len - skip).min(budget);
        out.push(&mut buf[skip..skip + take]);
        skip = 0;
        budget -= take;
    }
    out
}
