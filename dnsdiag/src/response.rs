//! The uniform response surface every transport produces.

use std::time::Duration;

use hickory_proto::op::{Header, Message, ResponseCode};
use hickory_proto::rr::rdata::opt::EdnsOption;

use crate::error::{DiagError, Result};

/// Header flags of a response, in query-grid order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseFlags {
    pub qr: bool,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    pub ad: bool,
    pub cd: bool,
}

impl ResponseFlags {
    pub fn from_header(header: &Header) -> Self {
        Self {
            qr: header.message_type() == hickory_proto::op::MessageType::Response,
            aa: header.authoritative(),
            tc: header.truncated(),
            rd: header.recursion_desired(),
            ra: header.recursion_available(),
            ad: header.authentic_data(),
            cd: header.checking_disabled(),
        }
    }

    /// Render the fixed-position grid, e.g. `QR -- -- RD RA -- --`.
    pub fn to_text(&self) -> String {
        let cells = [
            (self.qr, "QR"),
            (self.aa, "AA"),
            (self.tc, "TC"),
            (self.rd, "RD"),
            (self.ra, "RA"),
            (self.ad, "AD"),
            (self.cd, "CD"),
        ];
        cells
            .iter()
            .map(|(set, name)| if *set { *name } else { "--" })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl std::fmt::Display for ResponseFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_text())
    }
}

/// Canonical rcode mnemonic, e.g. `NOERROR`, `NXDOMAIN`.
pub fn rcode_text(code: ResponseCode) -> String {
    match code {
        ResponseCode::NoError => "NOERROR".to_string(),
        ResponseCode::FormErr => "FORMERR".to_string(),
        ResponseCode::ServFail => "SERVFAIL".to_string(),
        ResponseCode::NXDomain => "NXDOMAIN".to_string(),
        ResponseCode::NotImp => "NOTIMP".to_string(),
        ResponseCode::Refused => "REFUSED".to_string(),
        ResponseCode::YXDomain => "YXDOMAIN".to_string(),
        ResponseCode::YXRRSet => "YXRRSET".to_string(),
        ResponseCode::NXRRSet => "NXRRSET".to_string(),
        ResponseCode::NotAuth => "NOTAUTH".to_string(),
        ResponseCode::NotZone => "NOTZONE".to_string(),
        other => format!("{:?}", other).to_uppercase(),
    }
}

/// A parsed response plus the dispatcher's own latency measurement.
///
/// The dispatcher measures elapsed time itself so every transport reports
/// latency the same way regardless of what its underlying library exposes.
#[derive(Debug, Clone)]
pub struct ResponseHandle {
    pub wire: Vec<u8>,
    pub elapsed_ms: f64,
    pub flags: ResponseFlags,
    /// DO bit of the response's OPT record.
    pub dnssec_ok: bool,
    pub rcode: ResponseCode,
    pub rcode_text: String,
    /// TTL of the first answer record, when any answer came back.
    pub answer_ttl: Option<u32>,
    /// Answer section in presentation format, in wire order.
    pub answers: Vec<String>,
    /// Raw EDNS options as `(code, payload)`, sorted by code.
    pub options: Vec<(u16, Vec<u8>)>,
}

impl ResponseHandle {
    /// Parse a wire response received for the query with id `expect_id`.
    pub fn parse(wire: Vec<u8>, elapsed: Duration, expect_id: u16) -> Result<Self> {
        let message = Message::from_vec(&wire)
            .map_err(|e| DiagError::InvalidResponse(e.to_string()))?;

        if message.id() != expect_id {
            return Err(DiagError::InvalidResponse(format!(
                "transaction id mismatch: got {}, expected {}",
                message.id(),
                expect_id
            )));
        }

        let flags = ResponseFlags::from_header(message.header());
        let rcode = message.response_code();

        let mut dnssec_ok = false;
        let mut options: Vec<(u16, Vec<u8>)> = Vec::new();
        if let Some(edns) = message.extensions() {
            dnssec_ok = edns.flags().dnssec_ok;
            for (code, option) in edns.options().as_ref() {
                let data = match option {
                    EdnsOption::Unknown(_, data) => data.clone(),
                    other => Vec::<u8>::try_from(other).unwrap_or_default(),
                };
                options.push((u16::from(*code), data));
            }
            options.sort_by_key(|(code, _)| *code);
        }

        let answers: Vec<String> = message.answers().iter().map(|r| r.to_string()).collect();
        let answer_ttl = message.answers().first().map(|r| r.ttl());

        Ok(Self {
            wire,
            elapsed_ms: elapsed.as_secs_f64() * 1000.0,
            flags,
            dnssec_ok,
            rcode,
            rcode_text: rcode_text(rcode),
            answer_ttl,
            answers,
            options,
        })
    }

    pub fn wire_len(&self) -> usize {
        self.wire.len()
    }

    /// Decoded EDNS options for display.
    pub fn decoded_options(&self) -> Vec<crate::edns::DecodedOption> {
        crate::edns::decode_options(&self.options)
    }

    /// NSID string if the response carried one.
    pub fn nsid(&self) -> Option<String> {
        self.decoded_options().into_iter().find_map(|opt| match opt {
            crate::edns::DecodedOption::Nsid(id) if !id.is_empty() => Some(id),
            _ => None,
        })
    }

    /// EDNS flag text, `DO` or empty.
    pub fn edns_flags_text(&self) -> &'static str {
        if self.dnssec_ok {
            "DO"
        } else {
            ""
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QuerySpec;
    use hickory_proto::op::{Message, MessageType};
    use hickory_proto::rr::rdata::A;
    use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
    use std::str::FromStr;

    fn canned_response(id: u16) -> Vec<u8> {
        let mut message = Message::new();
        message
            .set_id(id)
            .set_message_type(MessageType::Response)
            .set_recursion_desired(true)
            .set_recursion_available(true);
        let name = Name::from_str("example.com.").unwrap();
        let record = Record::from_rdata(name, 300, RData::A(A::new(93, 184, 216, 34)));
        message.add_answer(record);
        message.to_vec().unwrap()
    }

    #[test]
    fn parse_extracts_answer_and_flags() {
        let wire = canned_response(0x1234);
        let handle =
            ResponseHandle::parse(wire, Duration::from_millis(12), 0x1234).unwrap();
        assert_eq!(handle.rcode_text, "NOERROR");
        assert_eq!(handle.answer_ttl, Some(300));
        assert_eq!(handle.answers.len(), 1);
        assert!(handle.flags.qr && handle.flags.rd && handle.flags.ra);
        assert!(!handle.flags.aa);
        assert!((handle.elapsed_ms - 12.0).abs() < 1e-9);
    }

    #[test]
    fn id_mismatch_is_invalid_response() {
        let wire = canned_response(7);
        let err = ResponseHandle::parse(wire, Duration::from_millis(1), 8).unwrap_err();
        assert!(matches!(err, DiagError::InvalidResponse(_)));
    }

    #[test]
    fn garbage_is_invalid_response() {
        let err =
            ResponseHandle::parse(vec![0xde, 0xad], Duration::from_millis(1), 0).unwrap_err();
        assert!(matches!(err, DiagError::InvalidResponse(_)));
    }

    #[test]
    fn flag_grid_rendering() {
        let flags = ResponseFlags {
            qr: true,
            rd: true,
            ra: true,
            ..Default::default()
        };
        assert_eq!(flags.to_text(), "QR -- -- RD RA -- --");
        assert_eq!(ResponseFlags::default().to_text(), "-- -- -- -- -- -- --");
    }

    #[test]
    fn built_query_parses_back() {
        let mut spec = QuerySpec::new("example.com", RecordType::A);
        spec.rdclass = DNSClass::IN;
        let message = spec.build().unwrap();
        let id = message.id();
        let wire = message.to_vec().unwrap();
        // a query is not a response, but the wire format parses the same way
        let handle = ResponseHandle::parse(wire, Duration::from_millis(1), id).unwrap();
        assert!(!handle.flags.qr);
        assert_eq!(handle.answer_ttl, None);
    }
}
