use std::time::Duration;

use bytes::{Bytes, BytesMut};
use riio_net::NetContext;
use riio_responder::AttrTarget;
use riio_usb::UsbContext;

use crate::error::Result;

/// A connected context, whichever transport carries it.
///
/// Every operation dispatches to the backend; the two expose the same
/// surface, so callers rarely need to know which one they got.
pub enum Context {
    Net(NetContext),
    Usb(UsbContext),
}

impl Context {
    /// Context attributes advertised by the backend (`uri`, `ip,ip-addr`,
    /// `usb,vendor`, ...).
    pub fn attrs(&self) -> &[(String, String)] {
        match self {
            Context::Net(ctx) => ctx.attrs(),
            Context::Usb(ctx) => ctx.attrs(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        match self {
            Context::Net(ctx) => ctx.attr(name),
            Context::Usb(ctx) => ctx.attr(name),
        }
    }

    pub fn uri(&self) -> &str {
        match self {
            Context::Net(ctx) => ctx.uri(),
            Context::Usb(ctx) => ctx.uri(),
        }
    }

    /// Negotiate a new timeout with the transport and the remote.
    pub fn set_timeout(&self, timeout: Duration) -> Result<()> {
        match self {
            Context::Net(ctx) => Ok(ctx.set_timeout(timeout)?),
            Context::Usb(ctx) => Ok(ctx.set_timeout(timeout)?),
        }
    }

    pub fn description(&self, max_len: usize) -> Result<Bytes> {
        match self {
            Context::Net(ctx) => Ok(ctx.description(max_len)?),
            Context::Usb(ctx) => Ok(ctx.description(max_len)?),
        }
    }

    pub fn read_attr(
        &self,
        dev: u8,
        target: AttrTarget<'_>,
        attr: &str,
        max_len: usize,
    ) -> Result<Bytes> {
        match self {
            Context::Net(ctx) => Ok(ctx.read_attr(dev, target, attr, max_len)?),
            Context::Usb(ctx) => Ok(ctx.read_attr(dev, target, attr, max_len)?),
        }
    }

    pub fn write_attr(
        &self,
        dev: u8,
        target: AttrTarget<'_>,
        attr: &str,
        value: &[u8],
    ) -> Result<usize> {
        match self {
            Context::Net(ctx) => Ok(ctx.write_attr(dev, target, attr, value)?),
            Context::Usb(ctx) => Ok(ctx.write_attr(dev, target, attr, value)?),
        }
    }

    pub fn get_trigger(&self, dev: u8) -> Result<Option<String>> {
        match self {
            Context::Net(ctx) => Ok(ctx.get_trigger(dev)?),
            Context::Usb(ctx) => Ok(ctx.get_trigger(dev)?),
        }
    }

    pub fn set_trigger(&self, dev: u8, trigger: Option<&str>) -> Result<()> {
        match self {
            Context::Net(ctx) => Ok(ctx.set_trigger(dev, trigger)?),
            Context::Usb(ctx) => Ok(ctx.set_trigger(dev, trigger)?),
        }
    }

    pub fn set_buffers_count(&self, dev: u8, count: u32) -> Result<()> {
        match self {
            Context::Net(ctx) => Ok(ctx.set_buffers_count(dev, count)?),
            Context::Usb(ctx) => Ok(ctx.set_buffers_count(dev, count)?),
        }
    }

    pub fn open_device(&self, dev: u8, samples: u32, cyclic: bool, mask: &[u32]) -> Result<()> {
        match self {
            Context::Net(ctx) => Ok(ctx.open_device(dev, samples, cyclic, mask)?),
            Context::Usb(ctx) => Ok(ctx.open_device(dev, samples, cyclic, mask)?),
        }
    }

    pub fn close_device(&self, dev: u8) -> Result<()> {
        match self {
            Context::Net(ctx) => Ok(ctx.close_device(dev)?),
            Context::Usb(ctx) => Ok(ctx.close_device(dev)?),
        }
    }

    pub fn read_device(&self, dev: u8, len: usize) -> Result<BytesMut> {
        match self {
            Context::Net(ctx) => Ok(ctx.read_device(dev, len)?),
            Context::Usb(ctx) => Ok(ctx.read_device(dev, len)?),
        }
    }

    pub fn write_device(&self, dev: u8, data: Bytes) -> Result<usize> {
        match self {
            Context::Net(ctx) => Ok(ctx.write_device(dev, data)?),
            Context::Usb(ctx) => Ok(ctx.write_device(dev, data)?),
        }
    }

    /// Abort blocked I/O on a device; it stays unusable until reopened.
    pub fn cancel_device(&self, dev: u8) -> Result<()> {
        match self {
            Context::Net(ctx) => Ok(ctx.cancel_device(dev)?),
            Context::Usb(ctx) => Ok(ctx.cancel_device(dev)?),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    use super::*;

    /// Answers TIMEOUT and device-attribute reads; enough for the facade.
    fn serve(mut stream: TcpStream) {
        let mut hdr = [0u8; 8];
        while stream.read_exact(&mut hdr).is_ok() {
            let client_id = u16::from_le_bytes([hdr[0], hdr[1]]);
            let op = hdr[2];
            let code = i32::from_le_bytes([hdr[4], hdr[5], hdr[6], hdr[7]]);

            let mut frame = Vec::new();
            frame.extend_from_slice(&client_id.to_le_bytes());
            frame.push(0);
            frame.push(0);
            match op {
                3 => frame.extend_from_slice(&0i32.to_le_bytes()),
                7 => {
                    let mut name = vec![0u8; code as usize];
                    let _ = stream.read_exact(&mut name);
                    frame.extend_from_slice(&2i32.to_le_bytes());
                }
                _ => frame.extend_from_slice(&0i32.to_le_bytes()),
            }
            if op == 7 {
                frame.extend_from_slice(b"42");
            }
            let _ = stream.write_all(&frame);
        }
    }

    #[test]
    fn ip_uri_yields_a_working_network_context() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                serve(stream);
            }
        });

        let uri = format!("ip:{}:{}", addr.ip(), addr.port());
        let ctx = crate::from_uri(&uri, Duration::from_secs(1)).unwrap();

        assert!(matches!(ctx, Context::Net(_)));
        assert_eq!(ctx.attr("ip,ip-addr"), Some("127.0.0.1"));

        let value = ctx
            .read_attr(0, AttrTarget::Device, "in_voltage0_raw", 16)
            .unwrap();
        assert_eq!(value.as_ref(), b"42");

        ctx.set_timeout(Duration::from_secs(2)).unwrap();
    }
}
