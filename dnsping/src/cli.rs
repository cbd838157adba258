//! Command line surface of `dnsping` and its conversion into engine types.

use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use hickory_proto::rr::{DNSClass, RecordType};

use dnsdiag::error::{DiagError, Result};
use dnsdiag::hostname::AddressFamily;
use dnsdiag::ping::PingOptions;
use dnsdiag::proto::Protocol;
use dnsdiag::query::QuerySpec;

/// Ping-like latency prober for DNS servers.
#[derive(Debug, Parser)]
#[command(name = "dnsping", version)]
pub struct Cli {
    /// Hostname to query
    pub hostname: String,

    /// Number of requests to send (0 = until interrupted)
    #[arg(short = 'c', long = "count", default_value_t = 10)]
    pub count: u32,

    /// Maximum wait time for a reply, in seconds
    #[arg(short = 'w', long = "wait", default_value_t = 2.0)]
    pub wait: f64,

    /// Time between each request, in seconds
    #[arg(short = 'i', long = "interval", default_value_t = 1.0)]
    pub interval: f64,

    /// DNS request record type
    #[arg(short = 't', long = "type", default_value = "A")]
    pub rdtype: String,

    /// DNS request record class
    #[arg(short = 'C', long = "class", default_value = "IN")]
    pub rdclass: String,

    /// DNS server to use (default: first system resolver)
    #[arg(short = 's', long = "server")]
    pub server: Option<String>,

    /// DNS server port number
    #[arg(short = 'p', long = "port", value_parser = clap::value_parser!(u16).range(1..))]
    pub port: Option<u16>,

    /// Source IP address for the query
    #[arg(short = 'S', long = "srcip")]
    pub src_ip: Option<IpAddr>,

    /// Source port for the query
    #[arg(short = 'P', long = "srcport", default_value_t = 0)]
    pub src_port: u16,

    /// Use IPv4 (only relevant when the server is given as a hostname)
    #[arg(short = '4', long = "ipv4", conflicts_with = "ipv6")]
    pub ipv4: bool,

    /// Use IPv6
    #[arg(short = '6', long = "ipv6")]
    pub ipv6: bool,

    /// Use TCP as the transport protocol
    #[arg(short = 'T', long = "tcp", group = "transport")]
    pub tcp: bool,

    /// Use TLS as the transport protocol (DoT)
    #[arg(short = 'X', long = "tls", group = "transport")]
    pub tls: bool,

    /// Use HTTPS as the transport protocol (DoH)
    #[arg(short = 'H', long = "doh", group = "transport")]
    pub doh: bool,

    /// Use QUIC as the transport protocol (DoQ)
    #[arg(short = 'Q', long = "quic", group = "transport")]
    pub quic: bool,

    /// Use HTTP/3 as the transport protocol (DoH3)
    #[arg(short = '3', long = "http3", group = "transport")]
    pub http3: bool,

    /// Enable EDNS0
    #[arg(short = 'e', long = "edns")]
    pub edns: bool,

    /// Set the DNSSEC OK bit (implies --edns)
    #[arg(short = 'D', long = "dnssec")]
    pub dnssec: bool,

    /// Request resolver identification via NSID (implies --edns)
    #[arg(short = 'n', long = "nsid")]
    pub nsid: bool,

    /// EDNS client subnet as <address>/<prefix> (implies --edns)
    #[arg(long = "ecs")]
    pub ecs: Option<String>,

    /// Send a random client DNS cookie (implies --edns)
    #[arg(long = "cookie")]
    pub cookie: bool,

    /// Force cache misses by prepending a random label per request
    #[arg(short = 'm', long = "cache-miss")]
    pub cache_miss: bool,

    /// Do not set the Recursion Desired flag
    #[arg(short = 'r', long = "norecurse")]
    pub norecurse: bool,

    /// Print the full DNS response
    #[arg(short = 'v', long = "verbose", conflicts_with = "quiet")]
    pub verbose: bool,

    /// Suppress per-probe output
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,
}

impl Cli {
    pub fn family(&self) -> Option<AddressFamily> {
        if self.ipv4 {
            Some(AddressFamily::Ipv4)
        } else if self.ipv6 {
            Some(AddressFamily::Ipv6)
        } else {
            None
        }
    }

    pub fn protocol(&self) -> Protocol {
        if self.tcp {
            Protocol::Tcp
        } else if self.tls {
            Protocol::Tls
        } else if self.doh {
            Protocol::Https
        } else if self.quic {
            Protocol::Quic
        } else if self.http3 {
            Protocol::Http3
        } else {
            Protocol::Udp
        }
    }

    pub fn query_spec(&self) -> Result<QuerySpec> {
        let rdtype = RecordType::from_str(&self.rdtype.to_uppercase())
            .map_err(|_| DiagError::InvalidInput(format!("invalid record type \"{}\"", self.rdtype)))?;
        let rdclass = DNSClass::from_str(&self.rdclass.to_uppercase())
            .map_err(|_| DiagError::InvalidInput(format!("invalid record class \"{}\"", self.rdclass)))?;

        let mut spec = QuerySpec::new(self.hostname.clone(), rdtype);
        spec.rdclass = rdclass;
        spec.recurse = !self.norecurse;
        spec.use_edns = self.edns;
        spec.want_dnssec = self.dnssec;
        spec.want_nsid = self.nsid;
        spec.send_cookie = self.cookie;
        spec.force_cache_miss = self.cache_miss;
        if let Some(ecs) = &self.ecs {
            spec.ecs = Some(ecs.parse()?);
        }
        Ok(spec)
    }

    pub fn ping_options(&self) -> Result<PingOptions> {
        if self.wait < 0.0 {
            return Err(DiagError::InvalidInput(format!(
                "wait time must be non-negative: {}",
                self.wait
            )));
        }
        if self.interval < 0.0 {
            return Err(DiagError::InvalidInput(format!(
                "interval must be non-negative: {}",
                self.interval
            )));
        }

        let mut opts = PingOptions::new(self.count, Duration::from_secs_f64(self.wait));
        opts.interval = Duration::from_secs_f64(self.interval);
        opts.source_ip = self.src_ip;
        opts.source_port = self.src_port;
        Ok(opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = Cli::parse_from(["dnsping", "example.com"]);
        assert_eq!(cli.count, 10);
        assert_eq!(cli.protocol(), Protocol::Udp);
        assert_eq!(cli.family(), None);
        let spec = cli.query_spec().unwrap();
        assert_eq!(spec.rdtype, RecordType::A);
        assert!(spec.recurse);
        assert!(!spec.wants_edns());
    }

    #[test]
    fn transport_flags_are_exclusive() {
        assert!(Cli::try_parse_from(["dnsping", "-T", "-Q", "example.com"]).is_err());
        let cli = Cli::parse_from(["dnsping", "-X", "example.com"]);
        assert_eq!(cli.protocol(), Protocol::Tls);
    }

    #[test]
    fn family_flags_are_exclusive() {
        assert!(Cli::try_parse_from(["dnsping", "-4", "-6", "example.com"]).is_err());
    }

    #[test]
    fn dnssec_implies_edns() {
        let cli = Cli::parse_from(["dnsping", "-D", "example.com"]);
        let spec = cli.query_spec().unwrap();
        assert!(spec.want_dnssec);
        assert!(spec.wants_edns());
    }

    #[test]
    fn invalid_record_type_is_reported() {
        let cli = Cli::parse_from(["dnsping", "-t", "INVALID", "example.com"]);
        let err = cli.query_spec().unwrap_err();
        assert!(err.to_string().contains("invalid record type"));
    }

    #[test]
    fn ecs_flows_into_the_spec() {
        let cli = Cli::parse_from(["dnsping", "--ecs", "192.0.2.0/24", "example.com"]);
        let spec = cli.query_spec().unwrap();
        let ecs = spec.ecs.unwrap();
        assert_eq!(ecs.prefix, 24);
        assert!(spec.wants_edns());
    }

    #[test]
    fn port_zero_is_rejected() {
        assert!(Cli::try_parse_from(["dnsping", "-p", "0", "example.com"]).is_err());
    }
}
