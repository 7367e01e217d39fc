//! IPv4 allow-list address validation.

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;

use crate::error::ProvisionError;

/// Validate an IPv4 literal or CIDR and return its canonical CIDR form.
///
/// A bare literal becomes a `/32`; host bits below the prefix are cleared, so
/// `10.0.0.7/24` is stored as `10.0.0.0/24`. Runs before any I/O.
pub fn canonicalize(input: &str) -> Result<String, ProvisionError> {
    let raw = input.trim();
    if raw.is_empty() {
        return Err(ProvisionError::validation("address must not be empty"));
    }

    let (ip_part, prefix) = match raw.split_once('/') {
        Some((ip, prefix)) => (ip, parse_prefix(raw, prefix)?),
        None => (raw, 32),
    };

    let ip: Ipv4Addr = ip_part
        .parse()
        .map_err(|_| ProvisionError::validation(format!("'{raw}' is not a valid IPv4 address")))?;

    let network = Ipv4Network::new(ip, prefix)
        .and_then(|net| Ipv4Network::new(net.network(), prefix))
        .map_err(|err| ProvisionError::validation(format!("'{raw}': {err}")))?;

    Ok(network.to_string())
}

fn parse_prefix(raw: &str, prefix: &str) -> Result<u8, ProvisionError> {
    let invalid = || ProvisionError::validation(format!("'{raw}' has an invalid prefix length"));
    if prefix.is_empty() || prefix.len() > 2 || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    match prefix.parse::<u8>() {
        Ok(len) if len <= 32 => Ok(len),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_literals_and_cidrs() {
        let cases = [
            ("10.0.0.1", "10.0.0.1/32"),
            ("10.0.0.1/32", "10.0.0.1/32"),
            (" 192.168.1.0/24 ", "192.168.1.0/24"),
            ("192.168.1.77/24", "192.168.1.0/24"),
            ("0.0.0.0/0", "0.0.0.0/0"),
            ("255.255.255.255", "255.255.255.255/32"),
        ];
        for (input, expected) in cases {
            assert_eq!(canonicalize(input).unwrap(), expected, "input {input:?}");
        }
    }

    #[test]
    fn rejects_malformed_addresses() {
        for input in [
            "",
            "10.0.0",
            "10.0.0.256",
            "10.0.0.1/33",
            "10.0.0.1/",
            "10.0.0.1/-1",
            "10.0.0.1/+8",
            "10.0.0.1/8/8",
            "::1",
            "fe80::/10",
            "example.com",
            "10.0.0.1 trust",
            "10.0.0.1/024",
        ] {
            assert!(
                matches!(canonicalize(input), Err(ProvisionError::Validation(_))),
                "{input:?} accepted"
            );
        }
    }
}
