use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use riio_responder::{AttrTarget, RejectAllHandler, Responder};
use riio_transport::{TcpController, TcpPort};
use tracing::{debug, info};

use crate::error::{NetError, Result};
use crate::uri::parse_uri_body;

/// Port the instrument server listens on by default.
pub const DEFAULT_PORT: u16 = 30431;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// The far side runs its own backend at half the local budget, so a remote
/// stall is noticed locally instead of racing the local timeout.
fn remote_timeout_ms(timeout: Duration) -> u32 {
    (timeout.as_millis() as u32) / 2
}

struct NetDevice {
    responder: Arc<Responder>,
    controller: TcpController,
}

/// A remote IIO context reached over TCP.
pub struct NetContext {
    host: String,
    port: u16,
    control: Responder,
    controller: TcpController,
    timeout: Mutex<Duration>,
    attrs: Vec<(String, String)>,
    devices: Mutex<HashMap<u8, NetDevice>>,
}

impl NetContext {
    /// Create a context from the body of an `ip:` URI.
    pub fn from_uri_body(body: &str, timeout: Duration) -> Result<Self> {
        let (host, port) = parse_uri_body(body)?;
        Self::connect(&host, port, timeout)
    }

    /// Dial the control link and negotiate the remote timeout.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let link = TcpPort::connect(host, port, timeout)?;
        let ip = link.peer_ip()?;
        let controller = link.controller()?;
        let (reader, writer) = link.split()?;

        let control = Responder::spawn(
            Box::new(reader),
            Box::new(writer),
            Box::new(RejectAllHandler),
        )?;

        if let Err(err) = control.set_remote_timeout(remote_timeout_ms(timeout)) {
            controller.cancel();
            return Err(err.into());
        }

        let attrs = vec![
            ("ip,ip-addr".to_string(), ip),
            ("uri".to_string(), format!("ip:{host}")),
        ];
        info!(host, port, "created network context");

        Ok(Self {
            host: host.to_string(),
            port,
            control,
            controller,
            timeout: Mutex::new(timeout),
            attrs,
            devices: Mutex::new(HashMap::new()),
        })
    }

    pub fn attrs(&self) -> &[(String, String)] {
        &self.attrs
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn uri(&self) -> &str {
        self.attr("uri").unwrap_or_default()
    }

    /// The responder carrying control and attribute traffic.
    pub fn control(&self) -> &Responder {
        &self.control
    }

    pub fn timeout(&self) -> Duration {
        *lock(&self.timeout)
    }

    /// Negotiate a new timeout: the transport first, then the remote's half;
    /// the context state is only committed once the remote accepted.
    pub fn set_timeout(&self, timeout: Duration) -> Result<()> {
        self.controller.set_timeout(Some(timeout))?;
        self.control.set_remote_timeout(remote_timeout_ms(timeout))?;
        *lock(&self.timeout) = timeout;
        Ok(())
    }

    /// Open a device: a dedicated socket and responder carry its traffic.
    pub fn open_device(&self, dev: u8, samples: u32, cyclic: bool, mask: &[u32]) -> Result<()> {
        let mut devices = lock(&self.devices);
        if devices.contains_key(&dev) {
            return Err(NetError::AlreadyOpen(dev));
        }

        let link = TcpPort::connect(&self.host, self.port, self.timeout())?;
        let controller = link.controller()?;
        let (reader, writer) = link.split()?;

        let responder = match Responder::spawn(
            Box::new(reader),
            Box::new(writer),
            Box::new(RejectAllHandler),
        ) {
            Ok(responder) => responder,
            Err(err) => {
                controller.cancel();
                return Err(err.into());
            }
        };

        if let Err(err) = responder.open_device(dev, samples, cyclic, mask) {
            controller.cancel();
            drop(responder);
            return Err(err.into());
        }

        debug!(dev, "opened device stream");
        devices.insert(
            dev,
            NetDevice {
                responder: Arc::new(responder),
                controller,
            },
        );
        Ok(())
    }

    /// Close `dev` and tear down its socket.
    pub fn close_device(&self, dev: u8) -> Result<()> {
        let entry = lock(&self.devices)
            .remove(&dev)
            .ok_or(NetError::NotOpen(dev))?;

        // Orderly close unless the link was already cancelled.
        let result = if entry.controller.token().is_fired() {
            Ok(())
        } else {
            entry.responder.close_device(dev).map_err(NetError::from)
        };

        entry.controller.cancel();
        drop(entry.responder);
        result
    }

    /// Read sample data from an open device.
    pub fn read_device(&self, dev: u8, len: usize) -> Result<BytesMut> {
        let responder = self.device_responder(dev)?;
        Ok(responder.read_buffer(dev, len)?)
    }

    /// Push sample data to an open device.
    pub fn write_device(&self, dev: u8, data: Bytes) -> Result<usize> {
        let responder = self.device_responder(dev)?;
        Ok(responder.write_buffer(dev, data)?)
    }

    /// Abort any blocked I/O on `dev`. The device stays unusable until it is
    /// closed and reopened.
    pub fn cancel_device(&self, dev: u8) -> Result<()> {
        let devices = lock(&self.devices);
        let entry = devices.get(&dev).ok_or(NetError::NotOpen(dev))?;
        entry.controller.cancel();
        Ok(())
    }

    pub fn read_attr(
        &self,
        dev: u8,
        target: AttrTarget<'_>,
        attr: &str,
        max_len: usize,
    ) -> Result<Bytes> {
        Ok(self.control.read_attr(dev, target, attr, max_len)?)
    }

    pub fn write_attr(
        &self,
        dev: u8,
        target: AttrTarget<'_>,
        attr: &str,
        value: &[u8],
    ) -> Result<usize> {
        Ok(self.control.write_attr(dev, target, attr, value)?)
    }

    pub fn get_trigger(&self, dev: u8) -> Result<Option<String>> {
        Ok(self.control.get_trigger(dev)?)
    }

    pub fn set_trigger(&self, dev: u8, trigger: Option<&str>) -> Result<()> {
        Ok(self.control.set_trigger(dev, trigger)?)
    }

    pub fn set_buffers_count(&self, dev: u8, count: u32) -> Result<()> {
        Ok(self.control.set_buffers_count(dev, count)?)
    }

    pub fn description(&self, max_len: usize) -> Result<Bytes> {
        Ok(self.control.context_description(max_len)?)
    }

    fn device_responder(&self, dev: u8) -> Result<Arc<Responder>> {
        let devices = lock(&self.devices);
        let entry = devices.get(&dev).ok_or(NetError::NotOpen(dev))?;
        Ok(Arc::clone(&entry.responder))
    }
}

impl Drop for NetContext {
    fn drop(&mut self) {
        let open: Vec<u8> = lock(&self.devices).keys().copied().collect();
        for dev in open {
            let _ = self.close_device(dev);
        }
        self.controller.cancel();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
