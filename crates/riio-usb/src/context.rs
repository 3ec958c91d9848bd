use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use riio_responder::{AttrTarget, RejectAllHandler, Responder};
use riio_transport::CancelToken;
use rusb::{Context, DeviceHandle, Direction, TransferType, UsbContext as _};
use tracing::{debug, info, warn};

use crate::control;
use crate::ep::{pair_endpoints, EndpointAddr, EndpointLease, EndpointPool};
use crate::error::{map_usb, Result, UsbError};
use crate::port::{UsbBulkReader, UsbBulkWriter};
use crate::scan;
use crate::uri::parse_uri_body;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// The far side runs its own backend at half the local budget, so a remote
/// stall is noticed locally instead of racing the local timeout.
fn remote_timeout_ms(timeout: Duration) -> u32 {
    (timeout.as_millis() as u32) / 2
}

struct OpenDevice {
    responder: Arc<Responder>,
    token: CancelToken,
    lease: EndpointLease,
}

/// A remote IIO context reached over a USB interface.
///
/// The control/attribute stream runs on endpoint couple 0 for the context's
/// whole lifetime; each opened device gets its own couple and responder.
pub struct UsbContext {
    handle: Arc<DeviceHandle<Context>>,
    interface: u8,
    pool: Arc<EndpointPool>,
    control: Responder,
    control_token: CancelToken,
    timeout_ms: Arc<AtomicU32>,
    attrs: Vec<(String, String)>,
    devices: Mutex<HashMap<u8, OpenDevice>>,
}

impl UsbContext {
    /// Create a context from the body of a `usb:` URI. An empty body scans
    /// the bus and requires exactly one match.
    pub fn from_uri_body(body: &str, timeout: Duration) -> Result<Self> {
        if body.is_empty() {
            let entries = scan::scan()?;
            if entries.len() != 1 {
                return Err(UsbError::AmbiguousScan(entries.len()));
            }
            let body = entries[0].uri.trim_start_matches("usb:").to_string();
            let (bus, address, interface) = parse_uri_body(&body)?;
            return Self::connect(bus, address, interface, timeout);
        }

        let (bus, address, interface) = parse_uri_body(body)?;
        Self::connect(bus, address, interface, timeout)
    }

    /// Open the device at `bus.address`, claim `interface`, set up the
    /// endpoint pool and start the control stream.
    pub fn connect(bus: u8, address: u8, interface: u8, timeout: Duration) -> Result<Self> {
        let usb = Context::new().map_err(map_usb)?;

        let mut found = None;
        for device in usb.devices().map_err(map_usb)?.iter() {
            if device.bus_number() != bus || device.address() != address {
                continue;
            }
            match device.open() {
                Ok(handle) => {
                    found = Some((device, handle));
                    break;
                }
                // Half-enumerated ghosts (seen on Windows) report
                // NotSupported; keep looking for the real entry.
                Err(rusb::Error::NotSupported) => {
                    warn!("skipping broken USB device");
                    continue;
                }
                Err(err) => return Err(map_usb(err)),
            }
        }
        let (device, mut handle) = found.ok_or(UsbError::NoDevice)?;

        let _ = handle.set_auto_detach_kernel_driver(true);
        handle.claim_interface(interface).map_err(map_usb)?;

        let config = device.active_config_descriptor().map_err(map_usb)?;
        let mut endpoints = Vec::new();
        for intf in config.interfaces() {
            if intf.number() != interface {
                continue;
            }
            if let Some(desc) = intf.descriptors().next() {
                for ep in desc.endpoint_descriptors() {
                    if ep.transfer_type() == TransferType::Bulk {
                        endpoints.push(EndpointAddr {
                            address: ep.address(),
                            is_in: ep.direction() == Direction::In,
                        });
                    }
                }
            }
        }
        let couples = pair_endpoints(&endpoints)?;
        debug!(couples = couples.len(), "usable endpoint couples");

        let desc = device.device_descriptor().map_err(map_usb)?;
        let uri = scan::format_uri(bus, address, interface);
        let release = desc.usb_version();
        let libusb = rusb::version();
        let attrs = vec![
            ("uri".to_string(), uri.clone()),
            (
                "usb,vendor".to_string(),
                scan::string_or_empty(&handle, desc.manufacturer_string_index()),
            ),
            (
                "usb,product".to_string(),
                scan::string_or_empty(&handle, desc.product_string_index()),
            ),
            (
                "usb,serial".to_string(),
                scan::string_or_empty(&handle, desc.serial_number_string_index()),
            ),
            (
                "usb,idVendor".to_string(),
                format!("{:04x}", desc.vendor_id()),
            ),
            (
                "usb,idProduct".to_string(),
                format!("{:04x}", desc.product_id()),
            ),
            (
                "usb,release".to_string(),
                format!("{}.{}", release.major(), release.minor()),
            ),
            (
                "usb,libusb".to_string(),
                format!(
                    "{}.{}.{}.{}{}",
                    libusb.major(),
                    libusb.minor(),
                    libusb.micro(),
                    libusb.nano(),
                    libusb.rc().unwrap_or("")
                ),
            ),
        ];

        let handle = Arc::new(handle);
        let pool = EndpointPool::new(couples);
        let timeout_ms = Arc::new(AtomicU32::new(timeout.as_millis() as u32));

        control::reset_pipes(&handle, interface)?;
        control::open_pipe(&handle, interface, 0)?;

        let control_token = CancelToken::new();
        let couple = pool.control_couple();
        let control = Responder::spawn(
            Box::new(UsbBulkReader::new(
                Arc::clone(&handle),
                couple,
                control_token.clone(),
            )),
            Box::new(UsbBulkWriter::new(
                Arc::clone(&handle),
                couple,
                control_token.clone(),
                Arc::clone(&timeout_ms),
            )),
            Box::new(RejectAllHandler),
        )?;

        if let Err(err) = control.set_remote_timeout(remote_timeout_ms(timeout)) {
            control_token.fire();
            return Err(err.into());
        }
        info!(%uri, "created usb context");

        Ok(Self {
            handle,
            interface,
            pool,
            control,
            control_token,
            timeout_ms,
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
        Duration::from_millis(u64::from(self.timeout_ms.load(Ordering::Relaxed)))
    }

    /// Negotiate a new timeout. The remote gets half; the local transport
    /// value is only committed once the remote accepted.
    pub fn set_timeout(&self, timeout: Duration) -> Result<()> {
        self.control.set_remote_timeout(remote_timeout_ms(timeout))?;
        self.timeout_ms
            .store(timeout.as_millis() as u32, Ordering::Relaxed);
        Ok(())
    }

    /// Reserve an endpoint couple for `dev`, open its pipe and start the
    /// device's own responder.
    pub fn open_device(&self, dev: u8, samples: u32, cyclic: bool, mask: &[u32]) -> Result<()> {
        let mut devices = lock(&self.devices);
        if devices.contains_key(&dev) {
            return Err(UsbError::AlreadyOpen(dev));
        }

        let lease = self.pool.reserve(dev)?;
        control::open_pipe(&self.handle, self.interface, lease.pipe_id())?;

        let token = CancelToken::new();
        let couple = lease.couple();
        let responder = match Responder::spawn(
            Box::new(UsbBulkReader::new(
                Arc::clone(&self.handle),
                couple,
                token.clone(),
            )),
            Box::new(UsbBulkWriter::new(
                Arc::clone(&self.handle),
                couple,
                token.clone(),
                Arc::clone(&self.timeout_ms),
            )),
            Box::new(RejectAllHandler),
        ) {
            Ok(responder) => responder,
            Err(err) => {
                let _ = control::close_pipe(&self.handle, self.interface, lease.pipe_id());
                return Err(err.into());
            }
        };

        if let Err(err) = responder.open_device(dev, samples, cyclic, mask) {
            token.fire();
            drop(responder);
            let _ = control::close_pipe(&self.handle, self.interface, lease.pipe_id());
            return Err(err.into());
        }

        devices.insert(
            dev,
            OpenDevice {
                responder: Arc::new(responder),
                token,
                lease,
            },
        );
        Ok(())
    }

    /// Close `dev`, release its couple and pipe.
    pub fn close_device(&self, dev: u8) -> Result<()> {
        let open = lock(&self.devices)
            .remove(&dev)
            .ok_or(UsbError::NotOpen(dev))?;

        // Orderly close unless the link was already cancelled.
        let result = if open.token.is_fired() {
            Ok(())
        } else {
            open.responder.close_device(dev).map_err(UsbError::from)
        };

        open.token.fire();
        drop(open.responder);
        let _ = control::close_pipe(&self.handle, self.interface, open.lease.pipe_id());
        drop(open.lease);
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
        let open = devices.get(&dev).ok_or(UsbError::NotOpen(dev))?;
        open.token.fire();
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
        let open = devices.get(&dev).ok_or(UsbError::NotOpen(dev))?;
        Ok(Arc::clone(&open.responder))
    }
}

impl Drop for UsbContext {
    fn drop(&mut self) {
        let open: Vec<u8> = lock(&self.devices).keys().copied().collect();
        for dev in open {
            let _ = self.close_device(dev);
        }

        self.control_token.fire();
        // Close everything on the remote side in one request.
        let _ = control::reset_pipes(&self.handle, self.interface);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
