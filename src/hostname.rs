//! Hostname normalization.
//!
//! Every name that enters the record dictionary and every name looked
//! up against it goes through this module, so internationalized names
//! match no matter which form the client sends: storage and lookup
//! normalize identically or not at all.

use std::net::IpAddr;
use std::str::FromStr;

use crate::protocol::types::{DomainName, LABEL_MAX_LEN};
use crate::Error;

/// Normalize a hostname to its ASCII-compatible (punycode) form:
/// lowercased, without trailing dot, each label encoded
/// independently.  Already-ASCII names pass through unchanged apart
/// from case and trailing-dot normalization.
///
/// # Errors
///
/// `Error::InvalidHostname` if a label cannot be encoded,
/// `Error::LabelTooLong` if a label exceeds 63 octets once encoded.
pub fn to_ascii(hostname: &str) -> Result<String, Error> {
    let stripped = hostname.strip_suffix('.').unwrap_or(hostname);

    // the root name (the null-MX exchange) has no labels to encode
    if stripped.is_empty() {
        return Ok(String::new());
    }

    let ascii = idna::domain_to_ascii(stripped).map_err(|_| Error::InvalidHostname {
        hostname: hostname.to_string(),
    })?;

    for label in ascii.split('.') {
        if label.len() > LABEL_MAX_LEN {
            return Err(Error::LabelTooLong {
                label: label.to_string(),
            });
        }
    }

    Ok(ascii)
}

/// Normalize a hostname and parse it into a `DomainName`.
///
/// # Errors
///
/// As `to_ascii`, plus `Error::InvalidHostname` for names the wire
/// format cannot represent (empty interior labels, over 255 octets
/// encoded).
pub fn domain(hostname: &str) -> Result<DomainName, Error> {
    let ascii = to_ascii(hostname)?;
    DomainName::from_dotted_string(&ascii).ok_or_else(|| Error::InvalidHostname {
        hostname: hostname.to_string(),
    })
}

/// The canonical reverse name of an IP address: reversed octets under
/// `in-addr.arpa` for IPv4, reversed nibbles under `ip6.arpa` for
/// IPv6.
#[allow(clippy::missing_panics_doc)]
pub fn reverse(address: IpAddr) -> DomainName {
    let dotted = match address {
        IpAddr::V4(v4) => {
            let [a, b, c, d] = v4.octets();
            format!("{d}.{c}.{b}.{a}.in-addr.arpa")
        }
        IpAddr::V6(v6) => {
            let mut out = String::with_capacity(72);
            for octet in v6.octets().iter().rev() {
                out.push_str(&format!("{:x}.{:x}.", octet & 0x0f, octet >> 4));
            }
            out.push_str("ip6.arpa");
            out
        }
    };

    // safe: the longest possible reverse name is 32 nibble labels
    // plus the ip6.arpa suffix, well under the 255-octet limit
    DomainName::from_dotted_string(&dotted).unwrap()
}

/// Parse an IPv4 or IPv6 literal and produce its reverse name.
///
/// # Errors
///
/// `Error::InvalidIpAddress` if the literal does not parse.
pub fn reverse_literal(literal: &str) -> Result<DomainName, Error> {
    match IpAddr::from_str(literal) {
        Ok(address) => Ok(reverse(address)),
        Err(_) => Err(Error::InvalidIpAddress {
            address: literal.to_string(),
        }),
    }
}

/// True if the string parses as an IPv4 or IPv6 literal.  Used by the
/// dictionary builder to decide whether an owner key names a host or
/// an address.
pub fn is_ip_literal(s: &str) -> bool {
    IpAddr::from_str(s).is_ok()
}
