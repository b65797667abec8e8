//! SSRF guard: rejects fetch targets before any socket is
//! opened, and again after DNS resolution so a name that first resolves to
//! a public address can't rebind to an internal one mid-flight.

use crate::config::SsrfOptions;
use crate::errors::Error;
use std::net::IpAddr;
use url::{Host, Url};

const RESERVED_SUFFIXES: &[&str] = &[".localhost", ".internal", ".local", ".corp", ".lan", ".intranet"];

/// Checks a URL against the SSRF policy. Does not
/// perform DNS resolution; call [`check_resolved_addr`] once the host has
/// been resolved, immediately before connecting.
pub fn check_url(url: &Url, opts: &SsrfOptions) -> Result<(), Error> {
    if !opts.enabled {
        return Ok(());
    }

    if url.scheme() != "https" {
        return Err(Error::ssrf(format!(
            "scheme {:?} is not https",
            url.scheme()
        )));
    }

    let host = url
        .host()
        .ok_or_else(|| Error::ssrf("URL has no host"))?;

    let host_str = match &host {
        Host::Domain(d) => d.to_ascii_lowercase(),
        Host::Ipv4(ip) => ip.to_string(),
        Host::Ipv6(ip) => ip.to_string(),
    };

    // Rule 2: whitelist overrides everything below it.
    if !opts.allowed_domains.is_empty() {
        if opts
            .allowed_domains
            .iter()
            .any(|allowed| domain_matches(&host_str, allowed))
        {
            return Ok(());
        }
    }

    // Rule 3: explicit blocklist.
    if opts
        .blocked_domains
        .iter()
        .any(|blocked| domain_matches(&host_str, blocked))
    {
        return Err(Error::ssrf(format!("host {:?} is blocklisted", host_str)));
    }

    match &host {
        Host::Ipv4(ip) => check_ip(IpAddr::V4(*ip), opts)?,
        Host::Ipv6(ip) => check_ip(IpAddr::V6(*ip), opts)?,
        Host::Domain(domain) => {
            let lower = domain.to_ascii_lowercase();
            if lower == "localhost"
                || RESERVED_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix))
            {
                return Err(Error::ssrf(format!(
                    "host {:?} is a reserved internal label",
                    lower
                )));
            }
        }
    }

    Ok(())
}

/// Rule 4 applied again to a resolved address, immediately before connect
/// (the connect must bind to that exact address to avoid
/// DNS-rebinding").
pub fn check_resolved_addr(addr: IpAddr, opts: &SsrfOptions) -> Result<(), Error> {
    if !opts.enabled {
        return Ok(());
    }
    check_ip(addr, opts)
}

fn check_ip(ip: IpAddr, opts: &SsrfOptions) -> Result<(), Error> {
    if opts.block_localhost && is_loopback(ip) {
        return Err(Error::ssrf(format!("{} is a loopback address", ip)));
    }
    if opts.block_private_ips && is_private(ip) {
        return Err(Error::ssrf(format!("{} is a private address", ip)));
    }
    if opts.block_link_local && is_link_local(ip) {
        return Err(Error::ssrf(format!("{} is a link-local address", ip)));
    }
    if is_unspecified(ip) {
        return Err(Error::ssrf(format!("{} is unspecified", ip)));
    }
    if is_broadcast(ip) {
        return Err(Error::ssrf(format!("{} is the broadcast address", ip)));
    }
    if is_multicast(ip) {
        return Err(Error::ssrf(format!("{} is a multicast address", ip)));
    }
    Ok(())
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => v6.is_loopback(),
    }
}

fn is_private(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private(),
        // fc00::/7 Unique Local Addresses.
        IpAddr::V6(v6) => (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}

fn is_link_local(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_link_local(),
        // fe80::/10.
        IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) == 0xfe80,
    }
}

fn is_unspecified(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_unspecified(),
        IpAddr::V6(v6) => v6.is_unspecified(),
    }
}

fn is_broadcast(ip: IpAddr) -> bool {
    matches!(ip, IpAddr::V4(v4) if v4.is_broadcast())
}

fn is_multicast(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_multicast(),
        IpAddr::V6(v6) => v6.is_multicast(),
    }
}

fn domain_matches(host: &str, pattern: &str) -> bool {
    let pattern = pattern.to_ascii_lowercase();
    host == pattern || host.ends_with(&format!(".{}", pattern))
}
