//! Query assembly.
//!
//! A [`QuerySpec`] captures everything the operator asked for; [`QuerySpec::build`]
//! turns it into a fresh wire message. Building is repeated per probe so the
//! transaction id, the client cookie and the cache-miss label are
//! re-randomized on every iteration.

use std::net::IpAddr;
use std::str::FromStr;

use hickory_proto::op::{Edns, Message, MessageType, OpCode, Query};
use hickory_proto::rr::rdata::opt::{ClientSubnet, EdnsOption};
use hickory_proto::rr::{DNSClass, Name, RecordType};
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::edns::code;
use crate::error::{DiagError, Result};
use crate::EDNS_PAYLOAD_SIZE;

/// EDNS Client Subnet option requested on the command line, `<addr>/<prefix>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EcsSpec {
    pub address: IpAddr,
    pub prefix: u8,
}

impl FromStr for EcsSpec {
    type Err = DiagError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || DiagError::InvalidInput(format!("invalid ECS specification: {}", s));
        let (addr, prefix) = s.split_once('/').ok_or_else(invalid)?;
        let address: IpAddr = addr.parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
        let max = match address {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix > max {
            return Err(invalid());
        }
        Ok(EcsSpec { address, prefix })
    }
}

/// One request, as described by the operator. Built once per command
/// invocation and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct QuerySpec {
    pub qname: String,
    pub rdtype: RecordType,
    pub rdclass: DNSClass,
    /// RD flag; cleared by `--norecurse`.
    pub recurse: bool,
    pub use_edns: bool,
    pub want_dnssec: bool,
    pub want_nsid: bool,
    pub ecs: Option<EcsSpec>,
    pub send_cookie: bool,
    /// Prepend a random `_dnsdiag_<rand>_.` label per probe to defeat the
    /// resolver cache.
    pub force_cache_miss: bool,
    /// Length bounds of the random cache-miss label.
    pub miss_label_len: (usize, usize),
}

impl QuerySpec {
    pub fn new(qname: impl Into<String>, rdtype: RecordType) -> Self {
        Self {
            qname: qname.into(),
            rdtype,
            rdclass: DNSClass::IN,
            recurse: true,
            use_edns: false,
            want_dnssec: false,
            want_nsid: false,
            ecs: None,
            send_cookie: false,
            force_cache_miss: false,
            miss_label_len: (5, 10),
        }
    }

    /// EDNS is implied by any option that rides in the OPT record.
    pub fn wants_edns(&self) -> bool {
        self.use_edns
            || self.want_dnssec
            || self.want_nsid
            || self.send_cookie
            || self.ecs.is_some()
    }

    /// The name actually placed on the wire for the next probe.
    pub fn effective_qname(&self) -> String {
        if self.force_cache_miss {
            let (min, max) = self.miss_label_len;
            format!("_dnsdiag_{}_.{}", random_label(min, max), self.qname)
        } else {
            self.qname.clone()
        }
    }

    /// Assemble a fresh wire message for one probe.
    pub fn build(&self) -> Result<Message> {
        let fqdn = self.effective_qname();
        let name = Name::from_ascii(&fqdn)
            .map_err(|_| DiagError::InvalidInput(format!("invalid query name: {}", fqdn)))?;

        let mut query = Query::query(name, self.rdtype);
        query.set_query_class(self.rdclass);

        let mut message = Message::new();
        message
            .set_id(rand::thread_rng().gen())
            .set_message_type(MessageType::Query)
            .set_op_code(OpCode::Query)
            .set_recursion_desired(self.recurse)
            .add_query(query);

        if self.wants_edns() {
            let mut edns = Edns::new();
            edns.set_version(0);
            edns.set_max_payload(EDNS_PAYLOAD_SIZE);
            edns.set_dnssec_ok(self.want_dnssec);

            if self.want_nsid {
                edns.options_mut()
                    .insert(EdnsOption::Unknown(code::NSID, Vec::new()));
            }
            if let Some(ecs) = &self.ecs {
                edns.options_mut().insert(EdnsOption::Subnet(ClientSubnet::new(
                    ecs.address,
                    ecs.prefix,
                    0,
                )));
            }
            if self.send_cookie {
                let mut client_cookie = [0u8; 8];
                rand::thread_rng().fill(&mut client_cookie[..]);
                edns.options_mut()
                    .insert(EdnsOption::Unknown(code::COOKIE, client_cookie.to_vec()));
            }

            message.set_edns(edns);
        }

        Ok(message)
    }
}

/// A random alphanumeric label of `min..=max` characters.
pub fn random_label(min: usize, max: usize) -> String {
    let mut rng = rand::thread_rng();
    let len = rng.gen_range(min..=max);
    (&mut rng)
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecs_spec_parsing() {
        let ecs: EcsSpec = "192.0.2.0/24".parse().unwrap();
        assert_eq!(ecs.address, "192.0.2.0".parse::<IpAddr>().unwrap());
        assert_eq!(ecs.prefix, 24);

        let ecs: EcsSpec = "2001:db8::/48".parse().unwrap();
        assert_eq!(ecs.prefix, 48);

        assert!("192.0.2.0".parse::<EcsSpec>().is_err());
        assert!("192.0.2.0/33".parse::<EcsSpec>().is_err());
        assert!("not-an-ip/24".parse::<EcsSpec>().is_err());
    }

    #[test]
    fn random_label_bounds() {
        for _ in 0..50 {
            let label = random_label(5, 10);
            assert!(label.len() >= 5 && label.len() <= 10);
            assert!(label.chars().all(|c| c.is_ascii_alphanumeric()));
        }
        assert_eq!(random_label(8, 8).len(), 8);
    }

    #[test]
    fn cache_miss_label_shape() {
        let mut spec = QuerySpec::new("example.com", RecordType::A);
        spec.force_cache_miss = true;
        let fqdn = spec.effective_qname();
        assert!(fqdn.starts_with("_dnsdiag_"));
        assert!(fqdn.ends_with("_.example.com"));
        // re-randomized per probe
        assert_ne!(spec.effective_qname(), spec.effective_qname());
    }

    #[test]
    fn plain_query_has_no_edns() {
        let spec = QuerySpec::new("example.com", RecordType::A);
        let message = spec.build().unwrap();
        assert!(message.extensions().is_none());
        assert!(message.recursion_desired());
    }

    #[test]
    fn norecurse_clears_rd() {
        let mut spec = QuerySpec::new("example.com", RecordType::A);
        spec.recurse = false;
        let message = spec.build().unwrap();
        assert!(!message.recursion_desired());
    }

    #[test]
    fn dnssec_sets_do_bit() {
        let mut spec = QuerySpec::new("example.com", RecordType::A);
        spec.want_dnssec = true;
        assert!(spec.wants_edns());
        let message = spec.build().unwrap();
        let edns = message.extensions().as_ref().expect("OPT present");
        assert!(edns.flags().dnssec_ok);
        assert_eq!(edns.max_payload(), EDNS_PAYLOAD_SIZE);
    }

    #[test]
    fn ecs_round_trips_through_the_wire() {
        let mut spec = QuerySpec::new("example.com", RecordType::A);
        spec.ecs = Some("192.0.2.0/24".parse().unwrap());
        let wire = spec.build().unwrap().to_vec().unwrap();

        let parsed = Message::from_vec(&wire).unwrap();
        let edns = parsed.extensions().as_ref().expect("OPT present");
        let subnet = edns
            .options()
            .as_ref()
            .iter()
            .map(|(_, opt)| opt)
            .find(|opt| matches!(opt, EdnsOption::Subnet(_)))
            .expect("ECS option present");
        let expected = ClientSubnet::new("192.0.2.0".parse::<IpAddr>().unwrap(), 24, 0);
        assert_eq!(subnet, &EdnsOption::Subnet(expected));
    }

    #[test]
    fn cookie_is_eight_random_bytes() {
        let mut spec = QuerySpec::new("example.com", RecordType::A);
        spec.send_cookie = true;
        let message = spec.build().unwrap();
        let edns = message.extensions().as_ref().expect("OPT present");
        let cookie = edns
            .options()
            .as_ref()
            .iter()
            .map(|(_, opt)| opt)
            .find_map(|opt| match opt {
                EdnsOption::Unknown(c, data) if *c == code::COOKIE => Some(data.clone()),
                _ => None,
            })
            .expect("cookie option present");
        assert_eq!(cookie.len(), 8);
    }
}
