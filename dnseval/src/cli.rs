//! Command line surface of `dnseval`.

use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use hickory_proto::rr::RecordType;

use dnsdiag::error::{DiagError, Result};
use dnsdiag::eval::EvalOptions;
use dnsdiag::hostname::AddressFamily;
use dnsdiag::ping::PingOptions;
use dnsdiag::proto::Protocol;
use dnsdiag::query::QuerySpec;

/// Compare a list of DNS resolvers by latency and loss.
#[derive(Debug, Parser)]
#[command(name = "dnseval", version)]
pub struct Cli {
    /// Hostname to query on every resolver
    pub hostname: String,

    /// File with one resolver per line, `-` for stdin
    /// (default: the system resolver list)
    #[arg(short = 'f', long = "file")]
    pub file: Option<String>,

    /// Append line-delimited JSON results to this file, `-` for stdout
    #[arg(short = 'j', long = "json")]
    pub json: Option<String>,

    /// Number of requests per resolver
    #[arg(short = 'c', long = "count", default_value_t = 10, value_parser = clap::value_parser!(u32).range(1..))]
    pub count: u32,

    /// Maximum wait time for a reply, in seconds
    #[arg(short = 'w', long = "wait", default_value_t = 2.0)]
    pub wait: f64,

    /// DNS request record type
    #[arg(short = 't', long = "type", default_value = "A")]
    pub rdtype: String,

    /// DNS server port number
    #[arg(short = 'p', long = "port", value_parser = clap::value_parser!(u16).range(1..))]
    pub port: Option<u16>,

    /// Source IP address for the queries
    #[arg(short = 'S', long = "srcip")]
    pub src_ip: Option<IpAddr>,

    /// Use IPv4 when resolving listed hostnames
    #[arg(short = '4', long = "ipv4", conflicts_with = "ipv6")]
    pub ipv4: bool,

    /// Use IPv6 when resolving listed hostnames
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

    /// Force cache misses by prepending a random label per request
    #[arg(short = 'm', long = "cache-miss")]
    pub cache_miss: bool,

    /// Skip the warmup pass before measuring
    #[arg(long = "skip-warmup")]
    pub skip_warmup: bool,

    /// Print the answer section of each final response
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
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

        let mut spec = QuerySpec::new(self.hostname.clone(), rdtype);
        spec.use_edns = self.edns;
        spec.want_dnssec = self.dnssec;
        spec.force_cache_miss = self.cache_miss;
        Ok(spec)
    }

    pub fn eval_options(&self) -> Result<EvalOptions> {
        if self.wait < 0.0 {
            return Err(DiagError::InvalidInput(format!(
                "wait time must be non-negative: {}",
                self.wait
            )));
        }

        let mut ping = PingOptions::new(self.count, Duration::from_secs_f64(self.wait));
        ping.interval = Duration::ZERO;
        ping.source_ip = self.src_ip;

        Ok(EvalOptions {
            ping,
            protocol: self.protocol(),
            port: self.port,
            family: self.family(),
            // warmup makes no sense for a machine-read JSON sink
            warmup: !self.skip_warmup && self.json.is_none(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = Cli::parse_from(["dnseval", "example.com"]);
        assert_eq!(cli.count, 10);
        assert_eq!(cli.protocol(), Protocol::Udp);
        let opts = cli.eval_options().unwrap();
        assert!(opts.warmup);
        assert_eq!(opts.port, None);
    }

    #[test]
    fn json_mode_disables_warmup() {
        let cli = Cli::parse_from(["dnseval", "-j", "-", "example.com"]);
        assert!(!cli.eval_options().unwrap().warmup);

        let cli = Cli::parse_from(["dnseval", "--skip-warmup", "example.com"]);
        assert!(!cli.eval_options().unwrap().warmup);
    }

    #[test]
    fn count_zero_is_rejected() {
        assert!(Cli::try_parse_from(["dnseval", "-c", "0", "example.com"]).is_err());
    }
}
