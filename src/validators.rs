//! Pure validation/canonicalization functions for the three query types
//! None of these perform I/O; they only reject malformed input
//! and normalize valid input to its canonical form.

use crate::errors::Error;
use lazy_static::lazy_static;
use regex::Regex;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

lazy_static! {
    // A single LDH (letter-digit-hyphen) label: 1-63 chars, no leading/trailing hyphen.
    static ref LABEL_RE: Regex =
        Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$").unwrap();
}

/// Validates and canonicalizes a domain name: trims, rejects embedded
/// whitespace/angle-brackets, IDNA-to-ASCII encodes non-ASCII labels,
/// lowercases, and checks each label against the LDH grammar.
pub fn validate_domain(input: &str) -> Result<String, Error> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err(Error::validation("domain name is empty"));
    }
    if trimmed.chars().any(|c| c.is_whitespace() || c == '<' || c == '>') {
        return Err(Error::validation(
            "domain name contains whitespace or angle brackets",
        ));
    }

    // IDNA-to-ASCII (Punycode) only if a non-ASCII label is present; this
    // also performs the nameprep-style mapping/lowercasing idna defines.
    let ascii = if trimmed.is_ascii() {
        trimmed.to_string()
    } else {
        idna::domain_to_ascii(trimmed)
            .map_err(|e| Error::validation(format!("IDNA encoding failed: {:?}", e)))?
    };

    let canonical = ascii.to_ascii_lowercase();
    let canonical = canonical.trim_end_matches('.').to_string();

    if canonical.is_empty() {
        return Err(Error::validation("domain name is empty after trimming"));
    }

    for label in canonical.split('.') {
        if !LABEL_RE.is_match(label) {
            return Err(Error::validation(format!(
                "invalid domain label: {:?}",
                label
            )));
        }
    }

    Ok(canonical)
}

/// Whether `addr` is an IPv4 or IPv6 literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpVersion {
    V4,
    V6,
}

/// Validates an IP address literal. Returns the canonical textual form
/// (lowercase, zone suffix stripped) and the address family.
///
/// IPv6 zone identifiers (`fe80::1%eth0`) are accepted and stripped from the
/// canonical form, since RDAP bootstrap/query URLs have no use
/// for a zone index.
pub fn validate_ip(input: &str) -> Result<(String, IpVersion), Error> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::validation("IP address is empty"));
    }

    // Strip a zone suffix for parsing purposes; IpAddr::from_str doesn't
    // understand it but we still want to validate+canonicalize the rest.
    let (addr_part, _zone) = match trimmed.split_once('%') {
        Some((a, z)) => (a, Some(z)),
        None => (trimmed, None),
    };

    if let Ok(v4) = Ipv4Addr::from_str(addr_part) {
        if !is_canonical_v4_text(addr_part) {
            return Err(Error::validation(format!(
                "IPv4 address not in canonical form: {:?}",
                input
            )));
        }
        return Ok((v4.to_string(), IpVersion::V4));
    }

    if let Ok(v6) = Ipv6Addr::from_str(addr_part) {
        return Ok((v6.to_string(), IpVersion::V6));
    }

    Err(Error::validation(format!("invalid IP address: {:?}", input)))
}

/// Rejects octets with non-canonical leading zeros (e.g. "01.2.3.4"), which
/// `Ipv4Addr::from_str` otherwise silently accepts on some platforms.
fn is_canonical_v4_text(s: &str) -> bool {
    let parts: Vec<&str> = s.split('.').collect();
    if parts.len() != 4 {
        return false;
    }
    parts.iter().all(|p| {
        !p.is_empty()
            && p.chars().all(|c| c.is_ascii_digit())
            && (p.len() == 1 || !p.starts_with('0'))
    })
}

/// Parses an ASN reference: a bare integer, optionally "AS"/"as" prefixed.
/// Does not accept the `ASx-ASy` range form — that's a property of
/// bootstrap registry entries, not of a single query.
pub fn validate_asn(input: &str) -> Result<u32, Error> {
    let trimmed = input.trim();
    let digits = if let Some(stripped) = trimmed.strip_prefix("AS").or_else(|| trimmed.strip_prefix("as")) {
        stripped
    } else {
        trimmed
    };

    digits
        .parse::<u32>()
        .map_err(|_| Error::validation(format!("invalid ASN: {:?}", input)))
}

/// Parses a bootstrap ASN range entry such as `"64512-65534"` or a single
/// ASN `"64496"` (a single value is a range of length one).
pub fn parse_asn_range(entry: &str) -> Result<(u32, u32), Error> {
    match entry.split_once('-') {
        Some((lo, hi)) => {
            let lo: u32 = lo
                .parse()
                .map_err(|_| Error::validation(format!("invalid ASN range: {:?}", entry)))?;
            let hi: u32 = hi
                .parse()
                .map_err(|_| Error::validation(format!("invalid ASN range: {:?}", entry)))?;
            if lo > hi {
                return Err(Error::validation(format!(
                    "ASN range start exceeds end: {:?}",
                    entry
                )));
            }
            Ok((lo, hi))
        }
        None => {
            let n: u32 = entry
                .parse()
                .map_err(|_| Error::validation(format!("invalid ASN range: {:?}", entry)))?;
            Ok((n, n))
        }
    }
}

/// Extracts the rightmost label (the TLD) from a canonical domain name.
pub fn rightmost_label(canonical_domain: &str) -> &str {
    canonical_domain
        .rsplit('.')
        .next()
        .unwrap_or(canonical_domain)
}

/// `IpAddr` parsed out of a validated/canonicalized textual IP, used by the
/// bootstrap resolver's longest-prefix match.
pub fn parse_ip_addr(canonical: &str) -> Result<IpAddr, Error> {
    IpAddr::from_str(canonical).map_err(|_| Error::validation(format!("invalid IP: {}", canonical)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_canonicalizes_case_and_trailing_dot() {
        assert_eq!(validate_domain("Example.COM.").unwrap(), "example.com");
    }

    #[test]
    fn domain_rejects_embedded_whitespace() {
        assert!(validate_domain("exa mple.com").is_err());
    }

    #[test]
    fn domain_rejects_angle_brackets() {
        assert!(validate_domain("<script>.com").is_err());
    }

    #[test]
    fn domain_rejects_consecutive_dots() {
        assert!(validate_domain("example..com").is_err());
    }

    #[test]
    fn domain_rejects_leading_trailing_hyphen_label() {
        assert!(validate_domain("-example.com").is_err());
        assert!(validate_domain("example-.com").is_err());
    }

    #[test]
    fn domain_accepts_single_label() {
        assert_eq!(validate_domain("localhost").unwrap(), "localhost");
    }

    #[test]
    fn domain_idna_encodes_unicode() {
        let canonical = validate_domain("académie-française.fr").unwrap();
        assert!(canonical.split('.').next().unwrap().starts_with("xn--"));
    }

    #[test]
    fn domain_validator_is_idempotent() {
        let c1 = validate_domain("Example.COM").unwrap();
        let c2 = validate_domain(&c1).unwrap();
        assert_eq!(c1, c2);
    }

    #[test]
    fn ipv4_accepts_canonical() {
        let (canonical, version) = validate_ip("8.8.8.8").unwrap();
        assert_eq!(canonical, "8.8.8.8");
        assert_eq!(version, IpVersion::V4);
    }

    #[test]
    fn ipv4_rejects_leading_zero() {
        assert!(validate_ip("08.8.8.8").is_err());
    }

    #[test]
    fn ipv4_rejects_out_of_range_octet() {
        assert!(validate_ip("256.1.1.1").is_err());
    }

    #[test]
    fn ipv6_accepts_compressed_form() {
        let (_, version) = validate_ip("::1").unwrap();
        assert_eq!(version, IpVersion::V6);
    }

    #[test]
    fn ipv6_strips_zone_suffix_from_canonical() {
        let (canonical, _) = validate_ip("fe80::1%eth0").unwrap();
        assert!(!canonical.contains('%'));
    }

    #[test]
    fn ipv6_accepts_embedded_ipv4() {
        assert!(validate_ip("::ffff:192.0.2.1").is_ok());
    }

    #[test]
    fn asn_accepts_bare_and_prefixed() {
        assert_eq!(validate_asn("15169").unwrap(), 15169);
        assert_eq!(validate_asn("AS15169").unwrap(), 15169);
        assert_eq!(validate_asn("as15169").unwrap(), 15169);
    }

    #[test]
    fn asn_rejects_non_numeric() {
        assert!(validate_asn("ASxyz").is_err());
    }

    #[test]
    fn asn_range_parses_ordered_range() {
        assert_eq!(parse_asn_range("64512-65534").unwrap(), (64512, 65534));
    }

    #[test]
    fn asn_range_rejects_inverted_range() {
        assert!(parse_asn_range("65534-64512").is_err());
    }

    #[test]
    fn asn_range_accepts_single_value() {
        assert_eq!(parse_asn_range("64496").unwrap(), (64496, 64496));
    }

    #[test]
    fn rightmost_label_extracts_tld() {
        assert_eq!(rightmost_label("example.co.uk"), "uk");
        assert_eq!(rightmost_label("example.com"), "com");
    }
}
