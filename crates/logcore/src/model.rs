//! The canonical parsed record (`LogItem`) and the per-source bookkeeping
//! types (`Log`, `Logs`, `LastParse`) that travel with it through the
//! pipeline.

use std::path::PathBuf;

use bytes::Bytes;

/// Outcome of IP literal validation for the `%h` / `%{reject}h` directives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeIp {
    V4,
    V6,
    Invalid,
}

/// Outcome of the ignore-policy evaluation in the line classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IgnoreLevel {
    #[default]
    Keep,
    /// Excluded from both counting and panel aggregation.
    IgnorePanel,
    /// Counted as processed but excluded from panel aggregation.
    IgnoreReq,
}

/// The canonical parsed record, populated field-by-field by the directive
/// engine and handed, whole, to the downstream inserter.
///
/// Every field is independently optional except the four the pipeline
/// treats as non-negotiable before handing an item to `process_log`:
/// `host`, `date`, `req`, and the absence of `errstr`.
#[derive(Debug, Clone, Default)]
pub struct LogItem {
    pub date: Option<String>,
    pub numdate: u32,
    pub time: Option<String>,

    pub host: Option<String>,
    pub type_ip: Option<TypeIp>,

    pub vhost: Option<String>,
    pub userid: Option<String>,
    pub cache_status: Option<String>,

    pub method: Option<String>,
    pub protocol: Option<String>,

    pub req: Option<String>,
    pub qstr: Option<String>,

    pub referer: Option<String>,
    pub site: Option<String>,
    pub keyphrase: Option<String>,

    pub agent: Option<String>,
    pub agent_hash: u32,
    pub agent_hex: String,

    pub browser: Option<String>,
    pub browser_type: Option<String>,
    pub os: Option<String>,
    pub os_type: Option<String>,
    pub continent: Option<String>,
    pub country: Option<String>,
    pub asn: Option<String>,

    pub status: i32,
    pub resp_size: u64,
    /// Always microseconds, regardless of the directive it came from.
    pub serve_time: u64,

    pub tls_type: Option<String>,
    pub tls_cypher: Option<String>,
    pub tls_type_cypher: Option<String>,
    pub mime_type: Option<String>,

    pub ignorelevel: IgnoreLevel,
    pub is_404: bool,
    pub is_static: bool,

    pub uniq_key: String,

    /// Diagnostic message if the line failed to parse. An item with
    /// `errstr.is_some()` is never handed to `process_log`.
    pub errstr: Option<String>,
}

impl LogItem {
    pub fn new() -> Self {
        Self {
            status: -1,
            ..Default::default()
        }
    }

    /// True once `host`, `date`, `req` are populated and no parse error
    /// was recorded — the gate a line must clear before reaching
    /// `process_log` (§3 invariants).
    pub fn is_emittable(&self) -> bool {
        self.errstr.is_none()
            && self.host.is_some()
            && self.date.is_some()
            && self.req.is_some()
            && self.status >= -1
    }

    /// `"{date}|{host}|{agent_hex}"`, computed once every field is set.
    pub fn compute_uniq_key(&mut self) {
        self.uniq_key = format!(
            "{}|{}|{}",
            self.date.as_deref().unwrap_or(""),
            self.host.as_deref().unwrap_or(""),
            self.agent_hex,
        );
    }
}

/// Persisted resume fingerprint for one log source, keyed by inode (or 0
/// for pipes, which have none).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LastParse {
    pub ts: i64,
    pub line: u64,
    pub size: u64,
    pub snippet: Bytes,
}

impl LastParse {
    pub fn snippetlen(&self) -> usize {
        self.snippet.len()
    }
}

/// Per-input-source state carried across the whole run: identity, read
/// progress, and the bounded error ring the spec caps at
/// `MAX_LOG_ERRORS`.
pub struct Log {
    pub path: Option<PathBuf>,
    pub is_pipe: bool,
    pub inode: u64,
    pub size: u64,
    pub read_bytes: u64,
    pub line_count: u64,
    pub start_time: i64,
    pub snippet: Bytes,
    pub last_parse: Option<LastParse>,
    pub processed: u64,
    pub invalid: u64,
    pub errors: Vec<String>,
}

/// Bound on the per-log error ring (`errors[]` in the spec).
pub const MAX_LOG_ERRORS: usize = 20;

impl Log {
    pub fn push_error(&mut self, msg: String) {
        if self.errors.len() < MAX_LOG_ERRORS {
            self.errors.push(msg);
        }
    }
}

/// An ordered collection of `Log`, with a cursor naming the log currently
/// being consumed (surfaced to observability as a `tracing` span field;
/// the terminal spinner itself is out of scope, see SPEC_FULL.md §3).
#[derive(Default)]
pub struct Logs {
    pub logs: Vec<Log>,
    pub current: usize,
}

impl Logs {
    pub fn current_log(&self) -> Option<&Log> {
        self.logs.get(self.current)
    }
}

/// DJB2 hash, matching the reference implementation's `agent_hash`.
pub fn djb2(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 5381;
    for &b in bytes {
        hash = hash.wrapping_mul(33).wrapping_add(b as u32);
    }
    hash
}

/// Lowercase hex of a DJB2 hash with no leading zeros, matching
/// `printf("%x")`.
pub fn hex_no_leading_zeros(hash: u32) -> String {
    format!("{:x}", hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_item_has_unset_status() {
        let item = LogItem::new();
        assert_eq!(item.status, -1);
        assert!(!item.is_emittable());
    }

    #[test]
    fn emittable_requires_host_date_req_and_no_error() {
        let mut item = LogItem::new();
        item.host = Some("127.0.0.1".into());
        item.date = Some("20001010".into());
        item.req = Some("/x".into());
        assert!(item.is_emittable());

        item.errstr = Some("boom".into());
        assert!(!item.is_emittable());
    }

    #[test]
    fn uniq_key_format() {
        let mut item = LogItem::new();
        item.date = Some("20001010".into());
        item.host = Some("127.0.0.1".into());
        item.agent_hex = "1a2b".into();
        item.compute_uniq_key();
        assert_eq!(item.uniq_key, "20001010|127.0.0.1|1a2b");
    }

    #[test]
    fn djb2_matches_known_vector() {
        // DJB2 of "a" is 177670 (5381*33 + 'a' = 5381*33+97).
        assert_eq!(djb2(b"a"), 5381u32.wrapping_mul(33).wrapping_add(97));
    }

    #[test]
    fn hex_has_no_leading_zeros() {
        assert_eq!(hex_no_leading_zeros(0x0f), "f");
        assert_eq!(hex_no_leading_zeros(0), "0");
    }
}
