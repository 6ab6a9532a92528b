//! Outbound webhook SSRF guard (§4.7 "Webhook worker algorithm", step 1).
//!
//! Fail-closed: resolution failures, unparseable URLs, and anything not provably a public
//! address are rejected. The denylist mirrors the same philosophy as the query translator's
//! `validate_sql` — a narrow allow path, everything else rejected — applied to network
//! destinations instead of SQL text.

use std::net::IpAddr;
use url::Url;

const DENIED_HOSTNAMES: &[&str] = &[
    "localhost",
    "db",
    "redis",
    "dragonfly",
    "nginx",
    "postgres",
    "postgresql",
    "metadata",
    "metadata.google.internal",
];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SsrfViolation {
    #[error("could not parse target URL: {0}")]
    InvalidUrl(String),
    #[error("target URL has no host")]
    MissingHost,
    #[error("target host '{0}' is denylisted")]
    DeniedHostname(String),
    #[error("target resolves to a private or loopback address: {0}")]
    PrivateAddress(IpAddr),
    #[error("target host did not resolve to any address")]
    NoResolution,
}

/// Checks a raw target URL for SSRF risk. Only the URL + hostname-literal checks run here; DNS
/// resolution (`check_resolved_addrs`) is the caller's job, since it requires an async resolver
/// and this function stays synchronous so it is cheap to call before any I/O is scheduled.
pub fn check_url(raw_url: &str) -> Result<Url, SsrfViolation> {
    let url = Url::parse(raw_url).map_err(|e| SsrfViolation::InvalidUrl(e.to_string()))?;
    let host = url.host_str().ok_or(SsrfViolation::MissingHost)?;
    let normalized = host.trim_end_matches('.').to_ascii_lowercase();

    if DENIED_HOSTNAMES.contains(&normalized.as_str()) {
        return Err(SsrfViolation::DeniedHostname(normalized));
    }

    if let Ok(ip) = normalized.parse::<IpAddr>() {
        check_addr(ip)?;
    }

    Ok(url)
}

/// Checks resolved addresses (the output of a DNS `A`/`AAAA` lookup) against the private /
/// loopback / link-local ranges named in §4.7.
pub fn check_resolved_addrs(addrs: &[IpAddr]) -> Result<(), SsrfViolation> {
    if addrs.is_empty() {
        return Err(SsrfViolation::NoResolution);
    }
    for addr in addrs {
        check_addr(*addr)?;
    }
    Ok(())
}

fn check_addr(addr: IpAddr) -> Result<(), SsrfViolation> {
    let is_denied = match addr {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.octets()[0] == 0
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || (v6.segments()[0] & 0xfe00) == 0xfc00 // fc00::/7
                || (v6.segments()[0] & 0xffc0) == 0xfe80 // fe80::/10
        }
    };
    if is_denied {
        Err(SsrfViolation::PrivateAddress(addr))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn rejects_localhost_hostname() {
        assert_eq!(
            check_url("http://localhost/hook"),
            Err(SsrfViolation::DeniedHostname("localhost".into()))
        );
    }

    #[test]
    fn rejects_internal_service_names() {
        assert!(check_url("http://redis:6379/hook").is_err());
        assert!(check_url("http://dragonfly/hook").is_err());
    }

    #[test]
    fn rejects_literal_private_ipv4() {
        assert!(check_url("http://10.0.0.5/hook").is_err());
        assert!(check_url("http://192.168.1.1/hook").is_err());
        assert!(check_url("http://169.254.169.254/hook").is_err());
    }

    #[test]
    fn accepts_public_https_target() {
        assert!(check_url("https://hooks.example.com/webhook").is_ok());
    }

    #[test]
    fn resolved_addr_check_rejects_private_ranges() {
        assert!(check_resolved_addrs(&[IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3))]).is_err());
        assert!(check_resolved_addrs(&[IpAddr::V6(Ipv6Addr::LOCALHOST)]).is_err());
        assert!(check_resolved_addrs(&[IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34))]).is_ok());
    }

    #[test]
    fn empty_resolution_is_rejected() {
        assert_eq!(check_resolved_addrs(&[]), Err(SsrfViolation::NoResolution));
    }
}
