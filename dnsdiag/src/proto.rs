//! Transport protocol tags and the resolved server target.

use std::net::IpAddr;

use crate::hostname::AddressFamily;

/// The six supported DNS transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Udp,
    Tcp,
    /// DNS over TLS (RFC 7858).
    Tls,
    /// DNS over HTTPS (RFC 8484), HTTP/2.
    Https,
    /// DNS over QUIC (RFC 9250).
    Quic,
    /// DNS over HTTP/3.
    Http3,
}

impl Protocol {
    /// Default destination port for this transport.
    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::Udp | Protocol::Tcp => 53,
            // RFC 7858 section 3.1 / RFC 9250 section 4.1.1
            Protocol::Tls | Protocol::Quic => 853,
            Protocol::Https | Protocol::Http3 => 443,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Udp => "UDP",
            Protocol::Tcp => "TCP",
            Protocol::Tls => "TLS",
            Protocol::Https => "HTTPS",
            Protocol::Quic => "QUIC",
            Protocol::Http3 => "HTTP3",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully resolved probe destination.
///
/// The original hostname is retained alongside the resolved address so the
/// TLS-based transports can present SNI (and DoH can build its URL) from the
/// name the operator actually typed, while the socket still connects to the
/// resolved address.
#[derive(Debug, Clone)]
pub struct ServerTarget {
    pub ip: IpAddr,
    pub hostname: Option<String>,
    pub port: u16,
    pub protocol: Protocol,
}

impl ServerTarget {
    pub fn new(ip: IpAddr, hostname: Option<String>, port: u16, protocol: Protocol) -> Self {
        Self {
            ip,
            hostname,
            port,
            protocol,
        }
    }

    pub fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.ip)
    }

    /// The name TLS/HTTPS transports should present: the operator-supplied
    /// hostname when there is one, the IP literal otherwise.
    pub fn tls_name(&self) -> String {
        match &self.hostname {
            Some(name) => name.clone(),
            None => self.ip.to_string(),
        }
    }

    /// Host part for a DoH/DoH3 URL, with IPv6 literals bracketed.
    pub fn url_host(&self) -> String {
        match &self.hostname {
            Some(name) => name.clone(),
            None => match self.ip {
                IpAddr::V4(ip) => ip.to_string(),
                IpAddr::V6(ip) => format!("[{}]", ip),
            },
        }
    }

    /// Display form of the server address, IPv6 bracketed.
    pub fn display_addr(&self) -> String {
        match self.ip {
            IpAddr::V4(ip) => ip.to_string(),
            IpAddr::V6(ip) => format!("[{}]", ip),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ports_are_total() {
        assert_eq!(Protocol::Udp.default_port(), 53);
        assert_eq!(Protocol::Tcp.default_port(), 53);
        assert_eq!(Protocol::Tls.default_port(), 853);
        assert_eq!(Protocol::Https.default_port(), 443);
        assert_eq!(Protocol::Quic.default_port(), 853);
        assert_eq!(Protocol::Http3.default_port(), 443);
    }

    #[test]
    fn url_host_brackets_ipv6() {
        let target = ServerTarget::new(
            "2001:4860:4860::8888".parse().unwrap(),
            None,
            443,
            Protocol::Https,
        );
        assert_eq!(target.url_host(), "[2001:4860:4860::8888]");

        let named = ServerTarget::new(
            "8.8.8.8".parse().unwrap(),
            Some("dns.google".to_string()),
            443,
            Protocol::Https,
        );
        assert_eq!(named.url_host(), "dns.google");
        assert_eq!(named.tls_name(), "dns.google");
    }
}
