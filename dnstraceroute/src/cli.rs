//! Command line surface of `dnstraceroute`.

use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use hickory_proto::rr::RecordType;

use dnsdiag::error::{DiagError, Result};
use dnsdiag::hostname::AddressFamily;
use dnsdiag::proto::Protocol;
use dnsdiag::query::QuerySpec;
use dnsdiag::trace::TraceOptions;

/// Trace the network path towards a DNS resolver using DNS probes.
#[derive(Debug, Parser)]
#[command(name = "dnstraceroute", version)]
pub struct Cli {
    /// Hostname to query at each hop
    pub hostname: String,

    /// Maximum number of hops
    #[arg(short = 'c', long = "count", default_value_t = 30, value_parser = clap::value_parser!(u32).range(1..))]
    pub count: u32,

    /// Maximum wait time for a reply, in seconds
    #[arg(short = 'w', long = "wait", default_value_t = 2.0)]
    pub wait: f64,

    /// DNS request record type
    #[arg(short = 't', long = "type", default_value = "A")]
    pub rdtype: String,

    /// DNS server to use (default: first system resolver)
    #[arg(short = 's', long = "server")]
    pub server: Option<String>,

    /// DNS server port number
    #[arg(short = 'p', long = "port", value_parser = clap::value_parser!(u16).range(1..))]
    pub port: Option<u16>,

    /// Source IP address for the probes
    #[arg(short = 'S', long = "srcip")]
    pub src_ip: Option<IpAddr>,

    /// Use IPv4 (only relevant when the server is given as a hostname)
    #[arg(short = '4', long = "ipv4", conflicts_with = "ipv6")]
    pub ipv4: bool,

    /// Use IPv6
    #[arg(short = '6', long = "ipv6")]
    pub ipv6: bool,

    /// Use TCP as the transport protocol
    #[arg(short = 'T', long = "tcp", group = "transport")]
    pub tcp: bool,

    /// Use QUIC as the transport protocol (DoQ)
    #[arg(short = 'Q', long = "quic", group = "transport")]
    pub quic: bool,

    /// Use HTTP/3 as the transport protocol (DoH3)
    #[arg(short = '3', long = "http3", group = "transport")]
    pub http3: bool,

    /// Enable EDNS0
    #[arg(short = 'e', long = "edns")]
    pub edns: bool,

    /// Request resolver identification via NSID (implies --edns)
    #[arg(short = 'n', long = "nsid")]
    pub nsid: bool,

    /// Force cache misses by prepending a random label per probe
    #[arg(short = 'm', long = "cache-miss")]
    pub cache_miss: bool,

    /// Annotate each hop with its origin AS number
    #[arg(short = 'a', long = "asn")]
    pub asn: bool,

    /// Display expert hints, if available
    #[arg(short = 'x', long = "expert")]
    pub expert: bool,

    /// Do not reverse-resolve hop addresses
    #[arg(long = "no-resolve")]
    pub no_resolve: bool,

    /// Suppress everything except the trace output
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

        let mut spec = QuerySpec::new(self.hostname.clone(), rdtype);
        spec.use_edns = self.edns;
        spec.want_nsid = self.nsid;
        spec.force_cache_miss = self.cache_miss;
        // fixed-length label keeps hop lines aligned across probes
        spec.miss_label_len = (8, 8);
        Ok(spec)
    }

    pub fn trace_options(&self) -> Result<TraceOptions> {
        if self.wait < 0.0 {
            return Err(DiagError::InvalidInput(format!(
                "wait time must be non-negative: {}",
                self.wait
            )));
        }

        let mut opts = TraceOptions::new(self.count, Duration::from_secs_f64(self.wait));
        opts.source_ip = self.src_ip;
        opts.resolve_hostnames = !self.no_resolve;
        opts.as_lookup = self.asn;
        Ok(opts)
    }
}
