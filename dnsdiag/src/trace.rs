//! The hop-limited trace engine.
//!
//! For each TTL the engine runs one DNS probe (with the TTL installed on the
//! probe socket) concurrently with a blocking read on a raw ICMP socket of
//! the matching family. A Time Exceeded packet is attributed to the probe by
//! the UDP destination port embedded in the quoted datagram; an answered
//! probe means the resolver itself was reached.

use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::system_conf::read_system_conf;
use hickory_resolver::Resolver;
use socket2::{Domain, Protocol as SockProtocol, Socket, Type};
use tokio::sync::mpsc;

use crate::error::{DiagError, Result};
use crate::ping::{ping, PingOptions};
use crate::proto::ServerTarget;
use crate::query::QuerySpec;
use crate::shutdown::Shutdown;
use crate::whois::{AsnRecord, WhoisCache};

/// ICMP Time Exceeded, RFC 792.
const ICMP_TIME_EXCEEDED: u8 = 11;
/// ICMPv6 Time Exceeded, RFC 4443.
const ICMPV6_TIME_EXCEEDED: u8 = 3;

/// Hops this close to the probing host are assumed to be inside the local
/// network when judging expert hints.
const PRIVATE_NETWORK_RADIUS: usize = 4;

/// Trace configuration.
#[derive(Debug, Clone, Copy)]
pub struct TraceOptions {
    pub max_hops: u32,
    pub timeout: Duration,
    pub source_ip: Option<IpAddr>,
    /// Reverse-resolve hop addresses.
    pub resolve_hostnames: bool,
    /// Annotate hops with origin AS via the whois cache.
    pub as_lookup: bool,
}

impl TraceOptions {
    pub fn new(max_hops: u32, timeout: Duration) -> Self {
        Self {
            max_hops,
            timeout,
            source_ip: None,
            resolve_hostnames: true,
            as_lookup: false,
        }
    }
}

/// One hop of the traced path.
#[derive(Debug, Clone)]
pub struct TraceHop {
    pub ttl: u32,
    /// `None` renders as `*`: nothing acceptable came back for this TTL.
    pub address: Option<IpAddr>,
    pub hostname: Option<String>,
    pub elapsed_ms: f64,
    pub asn: Option<AsnRecord>,
    pub nsid: Option<String>,
    /// The DNS probe itself was answered at this TTL.
    pub reached: bool,
}

/// Trace the path to `target`, probing with `spec` at each TTL.
///
/// Each finished hop is also streamed to `progress` so the UI can print the
/// path while later TTLs are still being probed.
pub async fn trace(
    target: &ServerTarget,
    spec: &QuerySpec,
    opts: &TraceOptions,
    shutdown: &Shutdown,
    whois: &mut WhoisCache,
    progress: Option<mpsc::UnboundedSender<TraceHop>>,
) -> Result<Vec<TraceHop>> {
    let reverse = if opts.resolve_hostnames {
        system_resolver()
    } else {
        None
    };

    let mut path: Vec<TraceHop> = Vec::new();

    for ttl in 1..=opts.max_hops {
        if shutdown.requested() {
            break;
        }

        let icmp_socket = open_icmp_socket(target, opts.timeout)?;
        let family_is_v4 = target.ip.is_ipv4();
        let dst_port = target.port;
        let icmp_task = tokio::task::spawn_blocking(move || {
            wait_for_time_exceeded(icmp_socket, family_is_v4, dst_port)
        });

        let mut probe_opts = PingOptions::new(1, opts.timeout);
        probe_opts.interval = Duration::ZERO;
        probe_opts.source_ip = opts.source_ip;
        probe_opts.socket_ttl = Some(ttl);
        let probe = ping(target, spec, &probe_opts, shutdown, None);

        let (icmp_result, probe_result) = tokio::join!(icmp_task, probe);
        let (icmp_addr, icmp_elapsed_ms) = icmp_result.unwrap_or((None, 0.0));
        let summary = probe_result?;

        let reached = summary
            .response
            .as_ref()
            .map(|r| !r.answers.is_empty())
            .unwrap_or(false);

        let (address, elapsed_ms, nsid) = if reached {
            let nsid = summary.response.as_ref().and_then(|r| r.nsid());
            (Some(target.ip), summary.stats.max, nsid)
        } else {
            (icmp_addr, icmp_elapsed_ms, None)
        };

        let hostname = match (&reverse, address) {
            (Some(resolver), Some(addr)) => reverse_lookup(resolver, addr).await,
            _ => None,
        };

        if shutdown.requested() {
            break;
        }

        let asn = match (opts.as_lookup, address) {
            (true, Some(addr)) => whois.asn_lookup(&addr.to_string()).await,
            _ => None,
        };

        let hop = TraceHop {
            ttl,
            address,
            hostname,
            elapsed_ms,
            asn,
            nsid,
            reached,
        };
        if let Some(tx) = &progress {
            let _ = tx.send(hop.clone());
        }
        let terminal = reached || hop.address == Some(target.ip);
        path.push(hop);
        if terminal {
            break;
        }
    }

    Ok(path)
}

/// Open the ICMP receive socket for the target's family, bound to the DNS
/// destination port so the kernel hands over the matching errors. Raw
/// sockets are preferred; some platforms allow unprivileged datagram ICMP.
fn open_icmp_socket(target: &ServerTarget, timeout: Duration) -> Result<std::net::UdpSocket> {
    let (domain, proto, any): (Domain, SockProtocol, IpAddr) = if target.ip.is_ipv4() {
        (
            Domain::IPV4,
            SockProtocol::ICMPV4,
            IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
        )
    } else {
        (
            Domain::IPV6,
            SockProtocol::ICMPV6,
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED),
        )
    };

    let socket = match Socket::new(domain, Type::RAW, Some(proto)) {
        Ok(socket) => socket,
        Err(_) => Socket::new(domain, Type::DGRAM, Some(proto)).map_err(|_| {
            DiagError::PermissionDenied(
                "unable to create ICMP socket with unprivileged user. Please run as root".into(),
            )
        })?,
    };

    socket.bind(&SocketAddr::new(any, target.port).into())?;
    socket.set_read_timeout(Some(timeout))?;
    Ok(socket.into())
}

/// Block for one ICMP packet and return the accepted hop address plus the
/// wait time in milliseconds.
fn wait_for_time_exceeded(
    socket: std::net::UdpSocket,
    family_is_v4: bool,
    dst_port: u16,
) -> (Option<IpAddr>, f64) {
    let started = Instant::now();
    let mut buf = [0u8; 512];

    let address = match socket.recv_from(&mut buf) {
        Ok((len, src)) => {
            let packet = &buf[..len];
            let accepted = if family_is_v4 {
                accept_v4(packet, dst_port)
            } else {
                accept_v6(packet, dst_port)
            };
            if accepted {
                Some(src.ip())
            } else {
                None
            }
        }
        Err(_) => None,
    };

    (address, started.elapsed().as_secs_f64() * 1000.0)
}

/// IPv4 delivery includes the outer IP header. Both the outer and the quoted
/// header length are taken from their IHL nibbles rather than assumed to be
/// 20 bytes.
fn accept_v4(packet: &[u8], dst_port: u16) -> bool {
    match embedded_port_v4(packet) {
        Some((icmp_type, port)) => icmp_type == ICMP_TIME_EXCEEDED && port == dst_port,
        None => false,
    }
}

fn embedded_port_v4(packet: &[u8]) -> Option<(u8, u16)> {
    let outer_ihl = ((*packet.first()? & 0x0f) as usize) * 4;
    if outer_ihl < 20 {
        return None;
    }
    let icmp_type = *packet.get(outer_ihl)?;
    let inner_start = outer_ihl + 8;
    let inner_ihl = ((*packet.get(inner_start)? & 0x0f) as usize) * 4;
    if inner_ihl < 20 {
        return None;
    }
    let port_off = inner_start + inner_ihl + 2;
    let hi = *packet.get(port_off)?;
    let lo = *packet.get(port_off + 1)?;
    Some((icmp_type, u16::from_be_bytes([hi, lo])))
}

/// The kernel strips the outer IPv6 header: the ICMPv6 header leads, the
/// quoted IPv6 header is fixed at 40 bytes, so the embedded UDP destination
/// port sits at bytes 50..52 of what is delivered.
fn accept_v6(packet: &[u8], dst_port: u16) -> bool {
    match embedded_port_v6(packet) {
        Some((icmp_type, port)) => icmp_type == ICMPV6_TIME_EXCEEDED && port == dst_port,
        None => false,
    }
}

fn embedded_port_v6(packet: &[u8]) -> Option<(u8, u16)> {
    let icmp_type = *packet.first()?;
    let hi = *packet.get(50)?;
    let lo = *packet.get(51)?;
    Some((icmp_type, u16::from_be_bytes([hi, lo])))
}

fn system_resolver() -> Option<Resolver<TokioConnectionProvider>> {
    let (config, _opts) = read_system_conf().ok()?;
    Some(Resolver::builder_with_config(config, TokioConnectionProvider::default()).build())
}

async fn reverse_lookup(resolver: &Resolver<TokioConnectionProvider>, addr: IpAddr) -> Option<String> {
    let lookup = resolver.reverse_lookup(addr).await.ok()?;
    lookup
        .iter()
        .next()
        .map(|ptr| ptr.0.to_string().trim_end_matches('.').to_string())
}

/// Post-trace heuristics pointing at suspicious paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpertHint {
    PathTooShort,
    InvisibleHop,
    PrivatePenultimate,
    ReservedPenultimate,
}

impl std::fmt::Display for ExpertHint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpertHint::PathTooShort => write!(
                f,
                "path too short (possible DNS hijacking, unless it is a local DNS resolver)"
            ),
            ExpertHint::InvisibleHop => write!(
                f,
                "public DNS server is next to an invisible hop (probably a firewall)"
            ),
            ExpertHint::PrivatePenultimate => write!(
                f,
                "public DNS server is next to a private IP address (possible hijacking)"
            ),
            ExpertHint::ReservedPenultimate => write!(
                f,
                "public DNS server is next to a reserved IP address (possible hijacking)"
            ),
        }
    }
}

/// Judge the finished path. `None` means nothing noteworthy.
pub fn expert_hint(path: &[TraceHop]) -> Option<ExpertHint> {
    if path.len() < 2 {
        return Some(ExpertHint::PathTooShort);
    }
    if path.len() <= PRIVATE_NETWORK_RADIUS {
        return None;
    }

    let penultimate = &path[path.len() - 2];
    match penultimate.address {
        None => Some(ExpertHint::InvisibleHop),
        Some(addr) if is_private(&addr) => Some(ExpertHint::PrivatePenultimate),
        Some(addr) if is_reserved(&addr) => Some(ExpertHint::ReservedPenultimate),
        Some(_) => None,
    }
}

fn is_private(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            v6.is_loopback()
                // fc00::/7 unique local, fe80::/10 link local
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

fn is_reserved(ip: &IpAddr) -> bool {
    match ip {
        // 240.0.0.0/4, minus the limited broadcast address
        IpAddr::V4(v4) => v4.octets()[0] >= 240 && !v4.is_broadcast(),
        IpAddr::V6(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Outer IPv4 header (`ihl` words) + ICMP header + quoted IPv4 header
    /// (20 bytes) + UDP header with the given destination port.
    fn v4_packet(outer_ihl_words: u8, icmp_type: u8, dst_port: u16) -> Vec<u8> {
        let outer_len = outer_ihl_words as usize * 4;
        let mut packet = vec![0u8; outer_len + 8 + 20 + 8];
        packet[0] = 0x40 | outer_ihl_words;
        packet[outer_len] = icmp_type;
        let inner = outer_len + 8;
        packet[inner] = 0x45;
        let port_off = inner + 20 + 2;
        packet[port_off..port_off + 2].copy_from_slice(&dst_port.to_be_bytes());
        packet
    }

    fn v6_packet(icmp_type: u8, dst_port: u16) -> Vec<u8> {
        let mut packet = vec![0u8; 8 + 40 + 8];
        packet[0] = icmp_type;
        packet[50..52].copy_from_slice(&dst_port.to_be_bytes());
        packet
    }

    #[test]
    fn v4_time_exceeded_matches_port() {
        let packet = v4_packet(5, ICMP_TIME_EXCEEDED, 53);
        // the standard 20-byte header puts the port at bytes 50..52
        assert_eq!(&packet[50..52], &53u16.to_be_bytes());
        assert!(accept_v4(&packet, 53));
        assert!(!accept_v4(&packet, 853));
    }

    #[test]
    fn v4_tolerates_ip_options() {
        // IHL of 6 words shifts everything by 4 bytes
        let packet = v4_packet(6, ICMP_TIME_EXCEEDED, 53);
        assert!(accept_v4(&packet, 53));
    }

    #[test]
    fn v4_rejects_other_icmp_types() {
        // echo reply
        let packet = v4_packet(5, 0, 53);
        assert!(!accept_v4(&packet, 53));
    }

    #[test]
    fn v4_rejects_truncated() {
        let packet = v4_packet(5, ICMP_TIME_EXCEEDED, 53);
        assert!(!accept_v4(&packet[..40], 53));
    }

    #[test]
    fn v6_time_exceeded_matches_port() {
        let packet = v6_packet(ICMPV6_TIME_EXCEEDED, 853);
        assert!(accept_v6(&packet, 853));
        assert!(!accept_v6(&packet, 53));
        assert!(!accept_v6(&v6_packet(1, 853), 853));
    }

    fn hop(ttl: u32, address: Option<&str>, reached: bool) -> TraceHop {
        TraceHop {
            ttl,
            address: address.map(|a| a.parse().unwrap()),
            hostname: None,
            elapsed_ms: 1.0,
            asn: None,
            nsid: None,
            reached,
        }
    }

    #[test]
    fn short_path_hints_hijacking() {
        let path = vec![hop(1, Some("8.8.8.8"), true)];
        assert_eq!(expert_hint(&path), Some(ExpertHint::PathTooShort));
    }

    #[test]
    fn invisible_penultimate_hop() {
        let path = vec![
            hop(1, Some("192.168.1.1"), false),
            hop(2, Some("10.0.0.1"), false),
            hop(3, Some("203.0.113.7"), false),
            hop(4, None, false),
            hop(5, Some("8.8.8.8"), true),
        ];
        assert_eq!(expert_hint(&path), Some(ExpertHint::InvisibleHop));
    }

    #[test]
    fn private_penultimate_hop() {
        let path = vec![
            hop(1, Some("203.0.113.1"), false),
            hop(2, Some("203.0.113.2"), false),
            hop(3, Some("203.0.113.3"), false),
            hop(4, Some("172.16.3.4"), false),
            hop(5, Some("8.8.8.8"), true),
        ];
        assert_eq!(expert_hint(&path), Some(ExpertHint::PrivatePenultimate));
    }

    #[test]
    fn reserved_penultimate_hop() {
        let path = vec![
            hop(1, Some("203.0.113.1"), false),
            hop(2, Some("203.0.113.2"), false),
            hop(3, Some("203.0.113.3"), false),
            hop(4, Some("240.1.2.3"), false),
            hop(5, Some("8.8.8.8"), true),
        ];
        assert_eq!(expert_hint(&path), Some(ExpertHint::ReservedPenultimate));
    }

    #[test]
    fn clean_long_path_has_no_hint() {
        let path = vec![
            hop(1, Some("192.168.1.1"), false),
            hop(2, Some("203.0.113.2"), false),
            hop(3, Some("203.0.113.3"), false),
            hop(4, Some("203.0.113.4"), false),
            hop(5, Some("8.8.8.8"), true),
        ];
        assert_eq!(expert_hint(&path), None);
    }

    #[test]
    fn short_clean_path_has_no_hint() {
        let path = vec![
            hop(1, Some("192.168.1.1"), false),
            hop(2, Some("8.8.8.8"), true),
        ];
        assert_eq!(expert_hint(&path), None);
    }
}
