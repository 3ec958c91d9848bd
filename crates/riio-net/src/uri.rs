//! `ip:<host>[:port]` parsing.

use crate::context::DEFAULT_PORT;
use crate::error::{NetError, Result};

/// Parse the body of a network URI (everything after `ip:`).
///
/// An empty body asks for discovery and is rejected here. Bracketed IPv6
/// literals keep their colons; for everything else a single trailing
/// `:port` is split off.
pub fn parse_uri_body(body: &str) -> Result<(String, u16)> {
    if body.is_empty() {
        return Err(NetError::DiscoveryUnsupported);
    }

    if let Some(rest) = body.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| NetError::BadUri(format!("ip:{body}")))?;
        if host.is_empty() {
            return Err(NetError::BadUri(format!("ip:{body}")));
        }
        return match tail.strip_prefix(':') {
            None if tail.is_empty() => Ok((host.to_string(), DEFAULT_PORT)),
            Some(port) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| NetError::BadUri(format!("ip:{body}")))?;
                Ok((host.to_string(), port))
            }
            None => Err(NetError::BadUri(format!("ip:{body}"))),
        };
    }

    // A bare IPv6 literal has more than one colon and carries no port.
    if body.matches(':').count() == 1 {
        let (host, port) = body.split_once(':').unwrap_or((body, ""));
        if host.is_empty() {
            return Err(NetError::BadUri(format!("ip:{body}")));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| NetError::BadUri(format!("ip:{body}")))?;
        return Ok((host.to_string(), port));
    }

    Ok((body.to_string(), DEFAULT_PORT))
}
