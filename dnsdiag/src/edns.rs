//! EDNS(0) option decoding for display and JSON export.
//!
//! Responses carry their options as raw `(code, payload)` pairs on the
//! [`crate::response::ResponseHandle`]; this module projects the ones the
//! toolkit knows about into printable values. Unknown options degrade to a
//! code/length pair instead of being dropped.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// EDNS option codes (IANA DNS EDNS0 option registry).
pub mod code {
    pub const NSID: u16 = 3;
    pub const DAU: u16 = 5;
    pub const ECS: u16 = 8;
    pub const COOKIE: u16 = 10;
    pub const TCP_KEEPALIVE: u16 = 11;
    pub const PADDING: u16 = 12;
    pub const CHAIN: u16 = 13;
    pub const KEY_TAG: u16 = 14;
    pub const EDE: u16 = 15;
}

/// A decoded EDNS option, ready for display.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedOption {
    /// Name server identifier, UTF-8 when possible, hex otherwise.
    Nsid(String),
    /// Client subnet echoed by the resolver.
    Ecs {
        family: u16,
        source_prefix: u8,
        scope_prefix: u8,
        address: String,
    },
    /// Extended DNS error, RFC 8914.
    Ede { code: u16, text: String },
    Cookie {
        client: String,
        server: Option<String>,
    },
    TcpKeepalive { timeout: Option<u16> },
    Padding { length: usize },
    Chain { closest_encloser: String },
    KeyTag(Vec<u16>),
    Other { code: u16, length: usize },
}

/// Decode a single raw option payload.
pub fn decode_option(opt_code: u16, data: &[u8]) -> DecodedOption {
    match opt_code {
        code::NSID => DecodedOption::Nsid(match std::str::from_utf8(data) {
            Ok(s) => s.to_string(),
            Err(_) => hex::encode(data),
        }),
        code::ECS => decode_ecs(data),
        code::EDE => {
            if data.len() < 2 {
                return DecodedOption::Other {
                    code: opt_code,
                    length: data.len(),
                };
            }
            DecodedOption::Ede {
                code: u16::from_be_bytes([data[0], data[1]]),
                text: String::from_utf8_lossy(&data[2..]).into_owned(),
            }
        }
        code::COOKIE => {
            let client = hex::encode(&data[..data.len().min(8)]);
            let server = if data.len() > 8 {
                Some(hex::encode(&data[8..]))
            } else {
                None
            };
            DecodedOption::Cookie { client, server }
        }
        code::TCP_KEEPALIVE => DecodedOption::TcpKeepalive {
            timeout: if data.len() >= 2 {
                Some(u16::from_be_bytes([data[0], data[1]]))
            } else {
                None
            },
        },
        code::PADDING => DecodedOption::Padding { length: data.len() },
        code::CHAIN => DecodedOption::Chain {
            closest_encloser: String::from_utf8_lossy(data).into_owned(),
        },
        code::KEY_TAG => DecodedOption::KeyTag(
            data.chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect(),
        ),
        other => DecodedOption::Other {
            code: other,
            length: data.len(),
        },
    }
}

/// Decode every option of a response in order.
pub fn decode_options(options: &[(u16, Vec<u8>)]) -> Vec<DecodedOption> {
    options
        .iter()
        .map(|(code, data)| decode_option(*code, data))
        .collect()
}

fn decode_ecs(data: &[u8]) -> DecodedOption {
    if data.len() < 4 {
        return DecodedOption::Other {
            code: code::ECS,
            length: data.len(),
        };
    }

    let family = u16::from_be_bytes([data[0], data[1]]);
    let source_prefix = data[2];
    let scope_prefix = data[3];
    let addr_bytes = &data[4..];

    let address = match family {
        1 => {
            let mut octets = [0u8; 4];
            let n = addr_bytes.len().min(4);
            octets[..n].copy_from_slice(&addr_bytes[..n]);
            IpAddr::V4(Ipv4Addr::from(octets)).to_string()
        }
        2 => {
            let mut octets = [0u8; 16];
            let n = addr_bytes.len().min(16);
            octets[..n].copy_from_slice(&addr_bytes[..n]);
            IpAddr::V6(Ipv6Addr::from(octets)).to_string()
        }
        _ => hex::encode(addr_bytes),
    };

    DecodedOption::Ecs {
        family,
        source_prefix,
        scope_prefix,
        address,
    }
}

impl std::fmt::Display for DecodedOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodedOption::Nsid(id) => write!(f, "NSID: {}", id),
            DecodedOption::Ecs {
                source_prefix,
                scope_prefix,
                address,
                ..
            } => write!(f, "ECS: {}/{}/{}", address, source_prefix, scope_prefix),
            DecodedOption::Ede { code, text } => {
                let mut short: String = text.chars().take(50).collect();
                if text.chars().count() > 50 {
                    short.push('…');
                }
                write!(f, "EDE: {} ({})", code, short)
            }
            DecodedOption::Cookie { client, server } => match server {
                Some(server) => write!(f, "COOKIE: {} (server: {})", client, server),
                None => write!(f, "COOKIE: {}", client),
            },
            DecodedOption::TcpKeepalive { timeout } => match timeout {
                Some(t) => write!(f, "TCP-KEEPALIVE: {}", t),
                None => write!(f, "TCP-KEEPALIVE"),
            },
            DecodedOption::Padding { length } => write!(f, "PADDING: {} bytes", length),
            DecodedOption::Chain { closest_encloser } => write!(f, "CHAIN: {}", closest_encloser),
            DecodedOption::KeyTag(tags) => {
                let tags: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
                write!(f, "KEY-TAG: {}", tags.join(","))
            }
            DecodedOption::Other { code, length } => {
                write!(f, "OPT{}: {} bytes", code, length)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nsid_utf8_and_hex() {
        assert_eq!(
            decode_option(code::NSID, b"gpdns-fra"),
            DecodedOption::Nsid("gpdns-fra".to_string())
        );
        assert_eq!(
            decode_option(code::NSID, &[0xff, 0xfe]),
            DecodedOption::Nsid("fffe".to_string())
        );
    }

    #[test]
    fn ecs_v4() {
        // family=1, source=24, scope=0, 192.0.2.0/24 (truncated address)
        let data = [0, 1, 24, 0, 192, 0, 2];
        let decoded = decode_option(code::ECS, &data);
        assert_eq!(
            decoded,
            DecodedOption::Ecs {
                family: 1,
                source_prefix: 24,
                scope_prefix: 0,
                address: "192.0.2.0".to_string(),
            }
        );
        assert_eq!(decoded.to_string(), "ECS: 192.0.2.0/24/0");
    }

    #[test]
    fn ecs_v6() {
        let mut data = vec![0, 2, 56, 0];
        data.extend_from_slice(&[0x20, 0x01, 0x0d, 0xb8, 0, 0, 0x12]);
        match decode_option(code::ECS, &data) {
            DecodedOption::Ecs {
                family, address, ..
            } => {
                assert_eq!(family, 2);
                assert_eq!(address, "2001:db8:0:1200::");
            }
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn ede_truncation_in_display() {
        let text = "x".repeat(80);
        let mut data = vec![0, 18];
        data.extend_from_slice(text.as_bytes());
        let decoded = decode_option(code::EDE, &data);
        match &decoded {
            DecodedOption::Ede { code, text } => {
                assert_eq!(*code, 18);
                assert_eq!(text.len(), 80);
            }
            other => panic!("unexpected decode: {:?}", other),
        }
        let shown = decoded.to_string();
        assert!(shown.contains('…'));
        assert!(shown.len() < 80);
    }

    #[test]
    fn cookie_split() {
        let data: Vec<u8> = (0..16).collect();
        match decode_option(code::COOKIE, &data) {
            DecodedOption::Cookie { client, server } => {
                assert_eq!(client, "0001020304050607");
                assert_eq!(server.as_deref(), Some("08090a0b0c0d0e0f"));
            }
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn keepalive_padding_keytag() {
        assert_eq!(
            decode_option(code::TCP_KEEPALIVE, &[0x01, 0x2c]),
            DecodedOption::TcpKeepalive { timeout: Some(300) }
        );
        assert_eq!(
            decode_option(code::PADDING, &[0; 12]),
            DecodedOption::Padding { length: 12 }
        );
        assert_eq!(
            decode_option(code::KEY_TAG, &[0x4a, 0x5c, 0x00, 0x01]),
            DecodedOption::KeyTag(vec![19036, 1])
        );
    }

    #[test]
    fn unknown_options_are_kept() {
        assert_eq!(
            decode_option(65001, &[1, 2, 3]),
            DecodedOption::Other {
                code: 65001,
                length: 3
            }
        );
    }
}
