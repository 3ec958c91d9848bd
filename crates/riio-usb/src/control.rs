//! Vendor control requests steering the server-side pipe table.

use std::time::Duration;

use rusb::{Context, DeviceHandle, Direction, Recipient, RequestType};
use tracing::debug;

use crate::error::{map_usb, Result};

/// Control transfers never move data and should not take long.
const CTRL_TIMEOUT: Duration = Duration::from_millis(1000);

const REQ_RESET_PIPES: u8 = 0;
const REQ_OPEN_PIPE: u8 = 1;
const REQ_CLOSE_PIPE: u8 = 2;

fn vendor_request(
    handle: &DeviceHandle<Context>,
    request: u8,
    value: u16,
    interface: u8,
) -> Result<()> {
    let request_type = rusb::request_type(Direction::Out, RequestType::Vendor, Recipient::Interface);
    handle
        .write_control(
            request_type,
            request,
            value,
            u16::from(interface),
            &[],
            CTRL_TIMEOUT,
        )
        .map_err(map_usb)?;
    Ok(())
}

/// Close every pipe on the remote side.
pub fn reset_pipes(handle: &DeviceHandle<Context>, interface: u8) -> Result<()> {
    debug!("resetting pipes");
    vendor_request(handle, REQ_RESET_PIPES, 0, interface)
}

pub fn open_pipe(handle: &DeviceHandle<Context>, interface: u8, pipe_id: u16) -> Result<()> {
    debug!(pipe_id, "opening pipe");
    vendor_request(handle, REQ_OPEN_PIPE, pipe_id, interface)
}

pub fn close_pipe(handle: &DeviceHandle<Context>, interface: u8, pipe_id: u16) -> Result<()> {
    debug!(pipe_id, "closing pipe");
    vendor_request(handle, REQ_CLOSE_PIPE, pipe_id, interface)
}
