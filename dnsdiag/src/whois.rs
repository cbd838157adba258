//! Origin-AS annotation with an on-disk cache.
//!
//! Lookups go to Team Cymru's IP-to-ASN whois service. Results are cached in
//! a JSON file next to the working directory so repeated traces do not hammer
//! the service; entries are refreshed after ten hours. Lookup failures are
//! non-fatal: the hop is simply displayed without an AS number.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{DiagError, Result};

/// Cache location, relative to the working directory.
pub const WHOIS_CACHE_FILE: &str = "whois.cache";

/// Seconds an entry stays fresh (10 hours).
pub const CACHE_TTL_SECS: u64 = 36_000;

const WHOIS_SERVER: &str = "whois.cymru.com";
const WHOIS_PORT: u16 = 43;
const WHOIS_TIMEOUT: Duration = Duration::from_secs(5);

/// One whois answer: origin AS number and the owner description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsnRecord {
    pub asn: String,
    pub owner: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    record: AsnRecord,
    /// Unix seconds of the lookup that produced the record.
    ts: u64,
}

/// IP → (record, timestamp) mapping, loaded at start and written at exit.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct WhoisCache {
    entries: HashMap<String, CacheEntry>,
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl WhoisCache {
    /// Load the cache from the default location; any problem (missing file,
    /// stale format) yields an empty cache.
    pub fn restore() -> Self {
        Self::restore_from(WHOIS_CACHE_FILE)
    }

    pub fn restore_from(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let mut cache = std::fs::read(path)
            .ok()
            .and_then(|data| serde_json::from_slice::<WhoisCache>(&data).ok())
            .unwrap_or_default();
        cache.path = Some(path.to_path_buf());
        cache
    }

    /// Write the cache back to where it was loaded from. Best effort.
    pub fn save(&self) {
        let Some(path) = &self.path else { return };
        match serde_json::to_vec(self) {
            Ok(data) => {
                if let Err(e) = std::fs::write(path, data) {
                    log::debug!("cannot save whois cache: {}", e);
                }
            }
            Err(e) => log::debug!("cannot serialize whois cache: {}", e),
        }
    }

    /// Cached record for `ip` if it is still fresh at `now`.
    pub fn fresh(&self, ip: &str, now: u64) -> Option<&AsnRecord> {
        self.entries
            .get(ip)
            .filter(|entry| now.saturating_sub(entry.ts) < CACHE_TTL_SECS)
            .map(|entry| &entry.record)
    }

    pub fn insert(&mut self, ip: &str, record: AsnRecord, now: u64) {
        self.entries
            .insert(ip.to_string(), CacheEntry { record, ts: now });
    }

    /// Resolve the origin AS for `ip`, from cache when fresh, otherwise from
    /// the whois service. `None` when the service cannot be reached or has
    /// no mapping.
    pub async fn asn_lookup(&mut self, ip: &str) -> Option<AsnRecord> {
        let now = unix_now();
        if let Some(record) = self.fresh(ip, now) {
            return Some(record.clone());
        }

        match tokio::time::timeout(WHOIS_TIMEOUT, cymru_lookup(ip)).await {
            Ok(Ok(record)) => {
                self.insert(ip, record.clone(), now);
                Some(record)
            }
            Ok(Err(e)) => {
                log::debug!("whois lookup for {} failed: {}", ip, e);
                None
            }
            Err(_) => {
                log::debug!("whois lookup for {} timed out", ip);
                None
            }
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// One verbose query against the Cymru whois service.
///
/// The reply is a header line followed by
/// `AS | IP | BGP Prefix | CC | Registry | Allocated | AS Name`.
async fn cymru_lookup(ip: &str) -> Result<AsnRecord> {
    let mut stream = TcpStream::connect((WHOIS_SERVER, WHOIS_PORT)).await?;
    stream
        .write_all(format!(" -v {}\r\n", ip).as_bytes())
        .await?;

    let mut reply = String::new();
    stream.read_to_string(&mut reply).await?;
    parse_cymru_reply(&reply)
        .ok_or_else(|| DiagError::Proto(format!("unparseable whois reply for {}", ip)))
}

fn parse_cymru_reply(reply: &str) -> Option<AsnRecord> {
    for line in reply.lines().skip(1) {
        let fields: Vec<&str> = line.split('|').map(str::trim).collect();
        if fields.len() < 7 {
            continue;
        }
        return Some(AsnRecord {
            asn: fields[0].to_string(),
            owner: fields[6].to_string(),
        });
    }
    None
}
