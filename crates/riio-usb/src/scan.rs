//! Enumeration of instrument servers reachable over USB.

use rusb::{Context, Device, DeviceDescriptor, DeviceHandle, UsbContext as _};
use tracing::debug;

use crate::error::{map_usb, Result};

/// String descriptor identifying the instrument interface.
pub const IIO_INTERFACE_NAME: &str = "IIO";

/// One discovered context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEntry {
    /// Human-readable description, `VID:PID (Manufacturer Product), serial=...`.
    pub description: String,
    /// URI suitable for connecting to this entry.
    pub uri: String,
}

/// Scan every USB device for an IIO interface.
pub fn scan() -> Result<Vec<ScanEntry>> {
    let usb = Context::new().map_err(map_usb)?;
    let devices = usb.devices().map_err(map_usb)?;

    let mut entries = Vec::new();
    for device in devices.iter() {
        // Devices we cannot open (permissions, half-enumerated Windows
        // ghosts) are skipped rather than failing the whole scan.
        let Ok(handle) = device.open() else { continue };

        let Some(interface) = find_iio_interface(&device, &handle)? else {
            continue;
        };

        let desc = device.device_descriptor().map_err(map_usb)?;
        let entry = ScanEntry {
            description: describe(&handle, &desc),
            uri: format_uri(device.bus_number(), device.address(), interface),
        };
        debug!(uri = %entry.uri, "found IIO interface");
        entries.push(entry);
    }

    Ok(entries)
}

/// Find the interface whose string descriptor equals `IIO`, if any.
pub(crate) fn find_iio_interface(
    device: &Device<Context>,
    handle: &DeviceHandle<Context>,
) -> Result<Option<u8>> {
    let config = match device.active_config_descriptor() {
        Ok(config) => config,
        Err(_) => return Ok(None),
    };

    for interface in config.interfaces() {
        for desc in interface.descriptors() {
            let Some(index) = desc.description_string_index() else {
                continue;
            };
            match handle.read_string_descriptor_ascii(index) {
                Ok(name) if name == IIO_INTERFACE_NAME => {
                    return Ok(Some(desc.interface_number()));
                }
                _ => {}
            }
        }
    }
    Ok(None)
}

pub(crate) fn describe(handle: &DeviceHandle<Context>, desc: &DeviceDescriptor) -> String {
    let manufacturer = string_or_empty(handle, desc.manufacturer_string_index());
    let product = string_or_empty(handle, desc.product_string_index());
    let serial = string_or_empty(handle, desc.serial_number_string_index());
    format_description(
        desc.vendor_id(),
        desc.product_id(),
        &manufacturer,
        &product,
        &serial,
    )
}

pub(crate) fn string_or_empty(handle: &DeviceHandle<Context>, index: Option<u8>) -> String {
    index
        .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok())
        .unwrap_or_default()
}

fn format_description(
    vendor_id: u16,
    product_id: u16,
    manufacturer: &str,
    product: &str,
    serial: &str,
) -> String {
    format!("{vendor_id:04x}:{product_id:04x} ({manufacturer} {product}), serial={serial}")
}

pub(crate) fn format_uri(bus: u8, address: u8, interface: u8) -> String {
    format!("usb:{bus}.{address}.{interface}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_matches_the_advertised_shape() {
        let text = format_description(0x0456, 0xb673, "Analog Devices Inc.", "PlutoSDR", "104473");
        assert_eq!(
            text,
            "0456:b673 (Analog Devices Inc. PlutoSDR), serial=104473"
        );
    }

    #[test]
    fn missing_strings_leave_gaps_not_garbage() {
        let text = format_description(0x1234, 0x5678, "", "", "");
        assert_eq!(text, "1234:5678 ( ), serial=");
    }

    #[test]
    fn uri_uses_decimal_fields() {
        assert_eq!(format_uri(3, 42, 0), "usb:3.42.0");
        assert_eq!(format_uri(255, 255, 7), "usb:255.255.7");
    }
}
