//! `usb:<bus>.<address>[.<interface>]` parsing.

use crate::error::{Result, UsbError};

/// Parse the body of a USB URI (everything after `usb:`).
///
/// Fields are decimal, each in `0..=255`; the interface defaults to 0. An
/// empty body means "scan and expect exactly one device" and is handled by
/// the caller, not here.
pub fn parse_uri_body(body: &str) -> Result<(u8, u8, u8)> {
    let bad = || UsbError::BadUri(format!("usb:{body}"));

    let mut parts = body.split('.');
    let bus = parse_field(parts.next(), bad)?;
    let address = parse_field(parts.next(), bad)?;
    let interface = match parts.next() {
        Some(field) => parse_field(Some(field), bad)?,
        None => 0,
    };
    if parts.next().is_some() {
        return Err(bad());
    }

    Ok((bus, address, interface))
}

fn parse_field(field: Option<&str>, bad: impl Fn() -> UsbError) -> Result<u8> {
    let field = field.ok_or_else(&bad)?;
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }
    field.parse::<u8>().map_err(|_| bad())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_triple() {
        assert_eq!(parse_uri_body("3.32.1").unwrap(), (3, 32, 1));
        assert_eq!(parse_uri_body("0.0.0").unwrap(), (0, 0, 0));
        assert_eq!(parse_uri_body("255.255.255").unwrap(), (255, 255, 255));
    }

    #[test]
    fn interface_defaults_to_zero() {
        assert_eq!(parse_uri_body("3.32").unwrap(), (3, 32, 0));
    }

    #[test]
    fn rejects_malformed_bodies() {
        for body in [
            "3", "3.", ".32", "3.32.", "3.32.1.9", "3,32", "a.b", "3.+2", "3.-2", "3. 2",
            "256.1", "1.256", "1.1.256", "0x3.2", "",
        ] {
            assert!(
                matches!(parse_uri_body(body), Err(UsbError::BadUri(_))),
                "body {body:?} should be rejected"
            );
        }
    }
}
