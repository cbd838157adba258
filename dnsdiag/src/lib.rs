//! Engine library for the `dnsdiag` toolkit.
//!
//! This crate provides the shared machinery behind the `dnsping`, `dnseval`
//! and `dnstraceroute` binaries:
//! - The `transport` module abstracts six DNS transports (UDP, TCP, DoT,
//!   DoH, DoQ, DoH3) behind a uniform exchange contract with uniform
//!   latency measurement.
//! - The `ping` module drives repeated probes against one resolver and
//!   aggregates latency statistics.
//! - The `trace` module discovers the routed path to a resolver by raising
//!   the IP TTL per probe and correlating ICMP Time Exceeded replies.
//! - The `eval` module fans the prober out across a resolver list on a
//!   bounded worker pool.
//!
//! Design notes:
//! - All long-running loops take a [`shutdown::Shutdown`] handle and yield
//!   within 100 ms of a graceful-shutdown request.
//! - Recoverable probe failures (timeouts, unreachable networks, malformed
//!   replies) are absorbed into loss counters; fatal conditions surface as
//!   [`error::DiagError`] and map onto process exit codes.

pub mod edns;
pub mod error;
pub mod eval;
pub mod hostname;
pub mod ping;
pub mod proto;
pub mod query;
pub mod response;
pub mod shutdown;
pub mod stats;
pub mod trace;
pub mod transport;
pub mod whois;

/// EDNS(0) advertised UDP payload size used on every query we build.
pub const EDNS_PAYLOAD_SIZE: u16 = 1232;
