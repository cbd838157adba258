//! Hostname validation and resolver address resolution.
//!
//! Two different validation regimes apply: resolver hostnames follow strict
//! RFC 1123 rules, while query names additionally accept underscores so that
//! `_dmarc.example.com`, `_acme-challenge.example.com` and friends can be
//! probed.

use std::net::IpAddr;

use hickory_resolver::system_conf::read_system_conf;

use crate::error::{DiagError, Result};

/// Address family constraint (`-4` / `-6`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    pub fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        }
    }

    pub fn matches(&self, ip: &IpAddr) -> bool {
        *self == Self::of(ip)
    }

    pub fn name(&self) -> &'static str {
        match self {
            AddressFamily::Ipv4 => "IPv4",
            AddressFamily::Ipv6 => "IPv6",
        }
    }
}

/// Validate a hostname or FQDN.
///
/// A single trailing dot is stripped first. The name must be non-empty, at
/// most 253 characters, and split on `.` into labels of 1–63 characters that
/// start and end with an alphanumeric and otherwise contain only
/// alphanumerics and hyphens. With `allow_underscore`, a label may also
/// begin with or contain `_`.
pub fn valid_hostname(hostname: &str, allow_underscore: bool) -> bool {
    let hostname = hostname.strip_suffix('.').unwrap_or(hostname);

    if hostname.is_empty() || hostname.len() > 253 {
        return false;
    }

    for label in hostname.split('.') {
        if label.is_empty() || label.len() > 63 {
            return false;
        }

        let bytes = label.as_bytes();
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];

        let first_ok = first.is_ascii_alphanumeric() || (allow_underscore && first == b'_');
        if !first_ok || !last.is_ascii_alphanumeric() {
            return false;
        }

        for &c in bytes {
            let ok = c.is_ascii_alphanumeric() || c == b'-' || (allow_underscore && c == b'_');
            if !ok {
                return false;
            }
        }
    }

    true
}

/// Resolve a resolver specification (IP literal or hostname) to an address.
///
/// An IP literal is returned as-is after checking it against a forced
/// family. A hostname is looked up through the OS under the requested
/// family (IPv4 when unspecified) and the first matching address wins.
pub async fn resolve_server(name: &str, family: Option<AddressFamily>) -> Result<IpAddr> {
    if let Ok(ip) = name.parse::<IpAddr>() {
        if let Some(family) = family {
            if !family.matches(&ip) {
                let literal = AddressFamily::of(&ip);
                return Err(DiagError::AddressFamilyConflict(format!(
                    "DNS server is {} but -{} flag was specified",
                    literal.name(),
                    if family == AddressFamily::Ipv4 { 4 } else { 6 },
                )));
            }
        }
        return Ok(ip);
    }

    if !valid_hostname(name, false) {
        return Err(DiagError::InvalidInput(format!("invalid hostname: {}", name)));
    }

    let want = family.unwrap_or(AddressFamily::Ipv4);
    let addrs = tokio::net::lookup_host((name, 0))
        .await
        .map_err(|_| DiagError::ResolutionFailed(name.to_string()))?;

    addrs
        .map(|addr| addr.ip())
        .find(|ip| want.matches(ip))
        .ok_or_else(|| DiagError::ResolutionFailed(format!("{} ({})", name, want.name())))
}

/// Check that a source address belongs to the same family as the target.
pub fn check_source_family(src: IpAddr, target: IpAddr) -> Result<()> {
    if AddressFamily::of(&src) != AddressFamily::of(&target) {
        return Err(DiagError::AddressFamilyConflict(format!(
            "source IP is {} but target DNS server is {}",
            AddressFamily::of(&src).name(),
            AddressFamily::of(&target).name(),
        )));
    }
    Ok(())
}

/// Nameservers from the system resolver configuration, optionally filtered
/// by address family. Not every system carries a resolv.conf, so absence is
/// reported as a resolution failure rather than a panic.
pub fn system_nameservers(family: Option<AddressFamily>) -> Result<Vec<IpAddr>> {
    let (config, _opts) = read_system_conf()
        .map_err(|e| DiagError::ResolutionFailed(format!("system resolver: {}", e)))?;

    let mut seen = Vec::new();
    for ip in config.name_servers().iter().map(|ns| ns.socket_addr.ip()) {
        let family_ok = family.map(|f| f.matches(&ip)).unwrap_or(true);
        if family_ok && !seen.contains(&ip) {
            seen.push(ip);
        }
    }

    if seen.is_empty() {
        return Err(match family {
            Some(f) => DiagError::ResolutionFailed(format!(
                "no {} nameservers found in system resolver",
                f.name()
            )),
            None => DiagError::ResolutionFailed("no nameservers found in system resolver".into()),
        });
    }
    Ok(seen)
}

/// First system nameserver under the family constraint.
pub fn system_nameserver(family: Option<AddressFamily>) -> Result<IpAddr> {
    Ok(system_nameservers(family)?[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_hostnames() {
        assert!(valid_hostname("example.com", false));
        assert!(valid_hostname("a.b.c.d.example", false));
        assert!(valid_hostname("xn--nxasmq6b.example", false));
        assert!(!valid_hostname("", false));
        assert!(!valid_hostname("-leading.example.com", false));
        assert!(!valid_hostname("trailing-.example.com", false));
        assert!(!valid_hostname("exa mple.com", false));
    }

    #[test]
    fn trailing_dot_is_normalized() {
        for name in ["example.com", "a.example", "_dmarc.example.com"] {
            let dotted = format!("{}.", name);
            assert_eq!(
                valid_hostname(name, true),
                valid_hostname(&dotted, true),
                "{name}"
            );
        }
    }

    #[test]
    fn underscore_rules() {
        assert!(!valid_hostname("_dmarc.example.com", false));
        assert!(valid_hostname("_dmarc.example.com", true));
        assert!(valid_hostname("_acme-challenge.example.com", true));
        // even relaxed, a label must end alphanumeric
        assert!(!valid_hostname("dmarc_.example.com", true));
    }

    #[test]
    fn length_limits() {
        let label63 = "a".repeat(63);
        assert!(valid_hostname(&format!("{}.example", label63), false));
        let label64 = "a".repeat(64);
        assert!(!valid_hostname(&format!("{}.example", label64), false));

        let long = [label63.as_str(); 4].join(".");
        assert!(long.len() > 253);
        assert!(!valid_hostname(&long, false));
    }

    #[tokio::test]
    async fn literal_family_conflicts() {
        let err = resolve_server("2001:4860:4860::8888", Some(AddressFamily::Ipv4))
            .await
            .unwrap_err();
        assert!(matches!(err, DiagError::AddressFamilyConflict(_)));

        let err = resolve_server("8.8.8.8", Some(AddressFamily::Ipv6))
            .await
            .unwrap_err();
        assert!(matches!(err, DiagError::AddressFamilyConflict(_)));

        let ip = resolve_server("8.8.8.8", None).await.unwrap();
        assert_eq!(ip, "8.8.8.8".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn source_family_mismatch() {
        let err = check_source_family(
            "127.0.0.1".parse().unwrap(),
            "2001:4860:4860::8888".parse().unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, DiagError::AddressFamilyConflict(_)));

        check_source_family("127.0.0.1".parse().unwrap(), "8.8.8.8".parse().unwrap()).unwrap();
    }
}
