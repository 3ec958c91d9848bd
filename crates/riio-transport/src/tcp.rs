use std::io::{ErrorKind, IoSlice, IoSliceMut, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::os::fd::AsRawFd;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::port::{CancelToken, PortRead, PortWrite};

/// A connected TCP link to a remote instrument server.
///
/// The link is split into read and write halves, each handed to one worker
/// thread. The [`TcpController`] keeps an extra handle for cancellation and
/// timeout adjustment without touching the halves.
pub struct TcpPort {
    stream: TcpStream,
    token: CancelToken,
}

impl TcpPort {
    /// Connect to `host:port`, honouring `timeout` during the connect itself.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let addrs: Vec<_> = (host, port)
            .to_socket_addrs()
            .map_err(|source| TransportError::Connect {
                host: host.to_string(),
                source,
            })?
            .collect();

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    debug!(%addr, "connected");
                    return Self::from_stream(stream, timeout);
                }
                Err(err) => last_err = Some(err),
            }
        }

        Err(TransportError::Connect {
            host: host.to_string(),
            source: last_err.unwrap_or_else(|| {
                std::io::Error::new(ErrorKind::NotFound, "host resolved to no addresses")
            }),
        })
    }

    /// Wrap an already-connected stream.
    pub fn from_stream(stream: TcpStream, timeout: Duration) -> Result<Self> {
        stream.set_nodelay(true)?;
        let port = Self {
            stream,
            token: CancelToken::new(),
        };
        port.controller()?.set_timeout(Some(timeout))?;
        Ok(port)
    }

    /// The peer's IP address as a printable literal.
    pub fn peer_ip(&self) -> Result<String> {
        Ok(self.stream.peer_addr()?.ip().to_string())
    }

    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }

    /// An out-of-band handle for cancellation and timeout control.
    pub fn controller(&self) -> Result<TcpController> {
        Ok(TcpController {
            stream: self.stream.try_clone()?,
            token: self.token.clone(),
        })
    }

    /// Split the link into its two halves.
    pub fn split(self) -> Result<(TcpReader, TcpWriter)> {
        let read_stream = self.stream.try_clone()?;
        let msg_trunc = probe_msg_trunc(&read_stream);
        debug!(msg_trunc, "split tcp link");
        Ok((
            TcpReader {
                stream: read_stream,
                token: self.token.clone(),
                msg_trunc,
            },
            TcpWriter {
                stream: self.stream,
                token: self.token,
            },
        ))
    }
}

/// Cancellation and timeout handle for a [`TcpPort`].
pub struct TcpController {
    stream: TcpStream,
    token: CancelToken,
}

impl TcpController {
    /// Abort any blocked read or write on the link. Idempotent; the link is
    /// dead afterwards.
    pub fn cancel(&self) {
        self.token.fire();
        let _ = self.stream.shutdown(Shutdown::Both);
        info!("tcp link cancelled");
    }

    /// Update the per-syscall read/write timeout.
    pub fn set_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.stream.set_read_timeout(timeout)?;
        self.stream.set_write_timeout(timeout)?;
        Ok(())
    }

    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }
}

/// Read half of a [`TcpPort`].
pub struct TcpReader {
    stream: TcpStream,
    token: CancelToken,
    /// Whether MSG_TRUNC-based draining works. WSL presents a Linux API
    /// without it, so this is probed at runtime rather than assumed.
    msg_trunc: bool,
}

impl TcpReader {
    /// Read up to and including the first `\n` into `dst`.
    ///
    /// Bytes after the newline are left unread in the socket. Fails if `dst`
    /// fills up before a newline arrives.
    pub fn read_line(&mut self, dst: &mut [u8]) -> Result<usize> {
        let mut pos = 0usize;

        while pos < dst.len() {
            self.token.ensure_live()?;

            let peeked = match recv_flags(&self.stream, &mut dst[pos..], libc::MSG_PEEK) {
                Ok(0) => return Err(self.closed()),
                Ok(n) => n,
                Err(err) => match retry_or_fail(err, &self.token)? {
                    Retry::Again => continue,
                },
            };

            let newline = dst[pos..pos + peeked].iter().position(|&b| b == b'\n');
            let consume = match newline {
                Some(idx) => idx + 1,
                None => peeked,
            };

            // Advance the socket past the bytes we keep.
            if self.msg_trunc {
                recv_trunc(&self.stream, consume)?;
            } else {
                recv_flags(&self.stream, &mut dst[pos..pos + consume], 0)?;
            }

            pos += consume;
            if newline.is_some() {
                return Ok(pos);
            }
        }

        Err(TransportError::Io(std::io::Error::new(
            ErrorKind::InvalidData,
            "no newline within the line buffer",
        )))
    }

    fn closed(&self) -> TransportError {
        if self.token.is_fired() {
            TransportError::Cancelled
        } else {
            TransportError::Closed
        }
    }
}

impl PortRead for TcpReader {
    fn read_vectored(&mut self, bufs: &mut [&mut [u8]]) -> Result<usize> {
        if bufs.iter().all(|b| b.is_empty()) {
            return Ok(0);
        }

        loop {
            self.token.ensure_live()?;

            let mut slices: Vec<IoSliceMut> =
                bufs.iter_mut().map(|b| IoSliceMut::new(b)).collect();
            match self.stream.read_vectored(&mut slices) {
                Ok(0) => return Err(self.closed()),
                Ok(n) => return Ok(n),
                Err(err) => match retry_or_fail(err, &self.token)? {
                    Retry::Again => continue,
                },
            }
        }
    }

    fn discard(&mut self, bytes: usize) -> Result<usize> {
        if !self.msg_trunc {
            let mut scratch = [0u8; 4096];
            let len = bytes.min(scratch.len());
            return self.read_vectored(&mut [&mut scratch[..len]]);
        }

        loop {
            self.token.ensure_live()?;

            match recv_trunc(&self.stream, bytes) {
                Ok(0) => return Err(self.closed()),
                Ok(n) => return Ok(n),
                Err(err) => match retry_or_fail(err, &self.token)? {
                    Retry::Again => continue,
                },
            }
        }
    }
}

/// Write half of a [`TcpPort`].
pub struct TcpWriter {
    stream: TcpStream,
    token: CancelToken,
}

impl PortWrite for TcpWriter {
    fn write_vectored(&mut self, bufs: &[&[u8]]) -> Result<usize> {
        if bufs.iter().all(|b| b.is_empty()) {
            return Ok(0);
        }

        loop {
            self.token.ensure_live()?;

            let slices: Vec<IoSlice> = bufs.iter().map(|b| IoSlice::new(b)).collect();
            match self.stream.write_vectored(&slices) {
                Ok(0) => {
                    return Err(if self.token.is_fired() {
                        TransportError::Cancelled
                    } else {
                        TransportError::Closed
                    })
                }
                Ok(n) => return Ok(n),
                Err(err) => match retry_or_fail(err, &self.token)? {
                    Retry::Again => continue,
                },
            }
        }
    }
}

enum Retry {
    Again,
}

/// Socket timeouts only bound individual syscalls; cancellation is the
/// mechanism that aborts a wait for good.
fn retry_or_fail(err: std::io::Error, token: &CancelToken) -> Result<Retry> {
    match err.kind() {
        ErrorKind::Interrupted => Ok(Retry::Again),
        ErrorKind::WouldBlock | ErrorKind::TimedOut => {
            if token.is_fired() {
                Err(TransportError::Cancelled)
            } else {
                Ok(Retry::Again)
            }
        }
        _ if token.is_fired() => Err(TransportError::Cancelled),
        _ => Err(TransportError::Io(err)),
    }
}

fn recv_flags(stream: &TcpStream, buf: &mut [u8], flags: libc::c_int) -> std::io::Result<usize> {
    loop {
        let ret = unsafe {
            libc::recv(
                stream.as_raw_fd(),
                buf.as_mut_ptr().cast::<libc::c_void>(),
                buf.len(),
                flags,
            )
        };
        if ret >= 0 {
            return Ok(ret as usize);
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Drop `len` bytes from the socket without copying them out.
#[cfg(target_os = "linux")]
fn recv_trunc(stream: &TcpStream, len: usize) -> std::io::Result<usize> {
    loop {
        let ret = unsafe {
            libc::recv(
                stream.as_raw_fd(),
                std::ptr::null_mut(),
                len,
                libc::MSG_TRUNC,
            )
        };
        if ret >= 0 {
            return Ok(ret as usize);
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn recv_trunc(_stream: &TcpStream, _len: usize) -> std::io::Result<usize> {
    Err(std::io::Error::from(ErrorKind::Unsupported))
}

#[cfg(target_os = "linux")]
fn probe_msg_trunc(stream: &TcpStream) -> bool {
    let ret = unsafe {
        libc::recv(
            stream.as_raw_fd(),
            std::ptr::null_mut(),
            0,
            libc::MSG_TRUNC | libc::MSG_DONTWAIT,
        )
    };
    if ret >= 0 {
        return true;
    }
    let err = std::io::Error::last_os_error();
    !matches!(
        err.raw_os_error(),
        Some(libc::EFAULT) | Some(libc::EINVAL)
    )
}

#[cfg(not(target_os = "linux"))]
fn probe_msg_trunc(_stream: &TcpStream) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    fn pair() -> (TcpPort, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || listener.accept().unwrap().0);
        let port = TcpPort::connect(&addr.ip().to_string(), addr.port(), Duration::from_secs(5))
            .unwrap();
        (port, server.join().unwrap())
    }

    #[test]
    fn connect_write_read_roundtrip() {
        let (port, mut peer) = pair();
        let (mut reader, mut writer) = port.split().unwrap();

        let n = writer
            .write_vectored(&[b"abc".as_slice(), b"def".as_slice()])
            .unwrap();
        assert_eq!(n, 6);

        let mut echoed = [0u8; 6];
        peer.read_exact(&mut echoed).unwrap();
        peer.write_all(&echoed).unwrap();

        let mut back = [0u8; 6];
        let mut total = 0;
        while total < back.len() {
            total += reader.read_vectored(&mut [&mut back[total..]]).unwrap();
        }
        assert_eq!(&back, b"abcdef");
    }

    #[test]
    fn discard_skips_bytes() {
        let (port, mut peer) = pair();
        let (mut reader, _writer) = port.split().unwrap();

        peer.write_all(b"0123456789").unwrap();

        let mut dropped = 0;
        while dropped < 4 {
            dropped += reader.discard(4 - dropped).unwrap();
        }

        let mut rest = [0u8; 6];
        let mut got = 0;
        while got < rest.len() {
            got += reader.read_vectored(&mut [&mut rest[got..]]).unwrap();
        }
        assert_eq!(&rest, b"456789");
    }

    #[test]
    fn discard_without_msg_trunc_falls_back() {
        let (port, mut peer) = pair();
        let (mut reader, _writer) = port.split().unwrap();
        reader.msg_trunc = false;

        peer.write_all(b"xxxxyyyy").unwrap();

        let mut dropped = 0;
        while dropped < 4 {
            dropped += reader.discard(4 - dropped).unwrap();
        }

        let mut rest = [0u8; 4];
        let mut got = 0;
        while got < rest.len() {
            got += reader.read_vectored(&mut [&mut rest[got..]]).unwrap();
        }
        assert_eq!(&rest, b"yyyy");
    }

    #[test]
    fn read_line_stops_at_newline() {
        let (port, mut peer) = pair();
        let (mut reader, _writer) = port.split().unwrap();

        peer.write_all(b"value\nleftover").unwrap();

        let mut line = [0u8; 64];
        let n = reader.read_line(&mut line).unwrap();
        assert_eq!(&line[..n], b"value\n");

        // Bytes past the newline stay in the stream.
        let mut rest = [0u8; 8];
        let got = reader.read_vectored(&mut [&mut rest[..]]).unwrap();
        assert_eq!(&rest[..got], &b"leftover"[..got]);
    }

    #[test]
    fn read_line_spanning_segments() {
        let (port, mut peer) = pair();
        let (mut reader, _writer) = port.split().unwrap();

        let server = thread::spawn(move || {
            peer.write_all(b"par").unwrap();
            thread::sleep(Duration::from_millis(30));
            peer.write_all(b"tial\n").unwrap();
            peer
        });

        let mut line = [0u8; 32];
        let n = reader.read_line(&mut line).unwrap();
        assert_eq!(&line[..n], b"partial\n");
        drop(server.join().unwrap());
    }

    #[test]
    fn read_line_overflow_is_an_error() {
        let (port, mut peer) = pair();
        let (mut reader, _writer) = port.split().unwrap();

        peer.write_all(b"too long for the buffer").unwrap();

        let mut line = [0u8; 4];
        assert!(matches!(
            reader.read_line(&mut line),
            Err(TransportError::Io(_))
        ));
    }

    #[test]
    fn peer_close_reports_closed() {
        let (port, peer) = pair();
        let (mut reader, _writer) = port.split().unwrap();
        drop(peer);

        let mut buf = [0u8; 4];
        assert!(matches!(
            reader.read_vectored(&mut [&mut buf[..]]),
            Err(TransportError::Closed)
        ));
    }

    #[test]
    fn cancel_aborts_blocked_read() {
        let (port, _peer) = pair();
        let controller = port.controller().unwrap();
        let (mut reader, _writer) = port.split().unwrap();

        let blocked = thread::spawn(move || {
            let mut buf = [0u8; 4];
            reader.read_vectored(&mut [&mut buf[..]])
        });

        thread::sleep(Duration::from_millis(50));
        controller.cancel();
        controller.cancel(); // idempotent

        assert!(matches!(
            blocked.join().unwrap(),
            Err(TransportError::Cancelled)
        ));
    }

    #[test]
    fn cancelled_link_fails_fast() {
        let (port, _peer) = pair();
        let controller = port.controller().unwrap();
        let (mut reader, mut writer) = port.split().unwrap();

        controller.cancel();

        let mut buf = [0u8; 4];
        assert!(matches!(
            reader.read_vectored(&mut [&mut buf[..]]),
            Err(TransportError::Cancelled)
        ));
        assert!(matches!(
            writer.write_vectored(&[b"data".as_slice()]),
            Err(TransportError::Cancelled)
        ));
    }

    #[test]
    fn connect_failure_reports_host() {
        // Bind then drop to get a port that is very likely unused.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = TcpPort::connect("127.0.0.1", addr.port(), Duration::from_millis(500));
        assert!(matches!(err, Err(TransportError::Connect { .. })));
    }
}
