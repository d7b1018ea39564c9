//! Field extractors (§4.1): the leaf-level string/number transforms the
//! directive engine calls once it has delimited a token.

use super::{Directive, DirectiveConfig};
use crate::error::DirectiveError;
use crate::model::TypeIp;

const REF_SITE_LEN: usize = 256;
const MAX_MIME_OUT: usize = 256;

/// Delimit the next token for `directive` starting at `pos`, returning
/// the token bytes and the new scan position (past the consumed
/// delimiter). `delim = None` means "to end of line".
pub fn scan_token(
    line: &[u8],
    pos: usize,
    delim: Option<u8>,
    directive: &Directive,
    cfg: &DirectiveConfig,
) -> Result<(Vec<u8>, usize), DirectiveError> {
    if pos > line.len() {
        return Err(DirectiveError::LineExhausted);
    }

    // Bracketed IPv6 host: the closing ']' is the delimiter regardless of
    // the configured one (§4.1).
    if let Directive::Host { reject: None } = directive {
        if line.get(pos) == Some(&b'[') {
            if let Some(close) = line[pos..].iter().position(|&b| b == b']') {
                let token = line[pos + 1..pos + close].to_vec();
                let mut new_pos = pos + close + 1;
                if let Some(d) = delim {
                    if line.get(new_pos) == Some(&d) {
                        new_pos += 1;
                    }
                }
                return Ok((token, new_pos));
            }
        }
    }

    let cnt = match directive {
        Directive::Date => {
            let format_spaces = cfg.date_format.bytes().filter(|&b| b == b' ').count();
            let input_spaces = count_date_gap_spaces(line, pos, format_spaces);
            format_spaces.max(input_spaces) + 1
        }
        _ => 1,
    };

    match delim {
        None => Ok((line[pos..].to_vec(), line.len())),
        Some(d) => {
            let mut seen = 0usize;
            let mut i = pos;
            while i < line.len() {
                if line[i] == b'\\' && i + 1 < line.len() {
                    i += 2;
                    continue;
                }
                if line[i] == d {
                    seen += 1;
                    if seen == cnt {
                        return Ok((line[pos..i].to_vec(), i + 1));
                    }
                }
                i += 1;
            }
            // Delimiter never found: fall back to end-of-line rather than
            // failing the whole line, so trailing directives in formats
            // that omit a final separator still parse (documented
            // simplification, see DESIGN.md).
            Ok((line[pos..].to_vec(), line.len()))
        }
    }
}

/// Sum of literal space bytes across the first `gaps` space-runs found in
/// `line` from `pos`, collapsing a run of consecutive spaces into one gap
/// but counting all the bytes in it. A syslog date pads single-digit days
/// with an extra space (`"Nov  2"` vs `"Nov 12"`), so the gap between
/// `%b` and `%e` can carry more bytes than `date_format` has literal
/// spaces; this lets `scan_token` extend past it instead of stopping at
/// the padding space.
fn count_date_gap_spaces(line: &[u8], pos: usize, gaps: usize) -> usize {
    if gaps == 0 {
        return 0;
    }
    let mut seen_gaps = 0usize;
    let mut total = 0usize;
    let mut i = pos;
    while i < line.len() && seen_gaps < gaps {
        if line[i] == b' ' {
            let mut run = 0usize;
            while i < line.len() && line[i] == b' ' {
                run += 1;
                i += 1;
            }
            total += run;
            seen_gaps += 1;
        } else {
            i += 1;
        }
    }
    total
}

pub fn non_empty_string(token: &[u8]) -> Option<String> {
    if token.is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(token).trim().to_string())
    }
}

/// Percent-decode in place; optionally double-decode; strip CR/LF; trim.
/// Empty result maps to `None`.
pub fn url_decode(token: &[u8], double_decode: bool) -> Option<String> {
    let once = percent_decode_once(token);
    let decoded = if double_decode {
        percent_decode_once(once.as_bytes())
    } else {
        once
    };
    let cleaned: String = decoded
        .chars()
        .filter(|&c| c != '\r' && c != '\n')
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn percent_decode_once(bytes: &[u8]) -> String {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                if let Some(h) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    out.push(h);
                    i += 3;
                } else {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).to_string()
}

const METHODS: &[&str] = &[
    "GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS", "PATCH", "CONNECT", "TRACE",
];
const PROTOCOLS: &[&str] = &["HTTP/1.0", "HTTP/1.1", "HTTP/2", "HTTP/3"];

pub fn match_method(token: &str) -> Option<&'static str> {
    let upper = token.trim().to_uppercase();
    METHODS.iter().find(|m| **m == upper).copied()
}

pub fn match_protocol(token: &str) -> Option<&'static str> {
    let upper = token.trim().to_uppercase();
    PROTOCOLS.iter().find(|p| **p == upper).copied()
}

/// `%r` — locate the method prefix, then the *last* space, validating
/// what follows as a protocol token. See §4.1.
pub fn parse_request_line(token: &[u8], double_decode: bool) -> (Option<String>, String, Option<String>) {
    let text = String::from_utf8_lossy(token);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return (None, "-".to_string(), None);
    }

    let mut rest = trimmed;
    let mut method = None;
    for m in METHODS {
        if let Some(stripped) = trimmed.strip_prefix(m) {
            if stripped.starts_with(' ') {
                method = Some(m.to_string());
                rest = stripped.trim_start();
                break;
            }
        }
    }

    match rest.rfind(' ') {
        Some(idx) => {
            let candidate_proto = &rest[idx + 1..];
            let req_part = &rest[..idx];
            match match_protocol(candidate_proto) {
                Some(proto) if !req_part.is_empty() => {
                    let req = url_decode(req_part.as_bytes(), double_decode)
                        .unwrap_or_else(|| "-".to_string());
                    (method, req, Some(proto.to_string()))
                }
                _ => (method, "-".to_string(), None),
            }
        }
        None => {
            if method.is_some() {
                let req = url_decode(rest.as_bytes(), double_decode)
                    .unwrap_or_else(|| "-".to_string());
                (method, req, None)
            } else {
                (None, "-".to_string(), None)
            }
        }
    }
}

const GOOGLE_HOSTS: &[&str] = &[
    "www.google.",
    "webcache.googleusercontent.com",
    "translate.googleusercontent.com",
];

fn is_google_host(referer: &str) -> bool {
    let lower = referer.to_lowercase();
    GOOGLE_HOSTS.iter().any(|h| lower.contains(h))
}

/// Only for Google-family referers: locate the query-parameter marker and
/// extract the search terms (§4.1).
pub fn referer_keyphrase(referer: &str) -> Option<String> {
    if !is_google_host(referer) {
        return None;
    }
    let markers = ["&q=", "?q=", "%26q%3D", "%3Fq%3D", "/+"];
    let mut start = None;
    for m in markers {
        if let Some(idx) = referer.find(m) {
            start = Some(idx + m.len());
            break;
        }
    }
    let start = start?;
    let remainder = &referer[start..];
    let end = remainder
        .find('&')
        .or_else(|| remainder.find("%26"))
        .unwrap_or(remainder.len());
    let raw = &remainder[..end];
    let decoded = url_decode(raw.as_bytes(), false)?;
    let spaced = decoded.replace('+', " ");
    let trimmed = spaced.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Strip scheme, take up to the next `/` or `?`, truncate to
/// `REF_SITE_LEN` (§4.1).
pub fn referer_site(referer: &str) -> Option<String> {
    let after_scheme = match referer.find("//") {
        Some(idx) => &referer[idx + 2..],
        None => referer,
    };
    let end = after_scheme
        .find(['/', '?'])
        .unwrap_or(after_scheme.len());
    let site = &after_scheme[..end.min(after_scheme.len())];
    if site.is_empty() {
        None
    } else {
        Some(site.chars().take(REF_SITE_LEN).collect())
    }
}

/// Parse and classify an IP literal. A bare stand-in for the spec's
/// external `invalid_ipaddr` collaborator (§6), sufficient for the
/// classifier to run standalone.
pub fn validate_ip(token: &str) -> TypeIp {
    match token.parse::<std::net::IpAddr>() {
        Ok(std::net::IpAddr::V4(_)) => TypeIp::V4,
        Ok(std::net::IpAddr::V6(_)) => TypeIp::V6,
        Err(_) => TypeIp::Invalid,
    }
}

/// `%h` / `%{reject}h`. When `reject` is `Some`, the token is an
/// XFF-style list; the first valid IP becomes the host (§4.2).
pub fn extract_host(
    token: &[u8],
    reject: Option<&[u8]>,
    no_ip_validation: bool,
) -> Option<(String, TypeIp)> {
    let text = String::from_utf8_lossy(token);
    match reject {
        None => {
            let candidate = text.trim();
            if candidate.is_empty() {
                return None;
            }
            let kind = if no_ip_validation {
                TypeIp::V4
            } else {
                validate_ip(candidate)
            };
            if !no_ip_validation && kind == TypeIp::Invalid {
                return None;
            }
            Some((candidate.to_string(), kind))
        }
        Some(set) => {
            for piece in text.split(|c: char| set.contains(&(c as u8))) {
                let candidate = piece.trim();
                if candidate.is_empty() {
                    continue;
                }
                let kind = validate_ip(candidate);
                if kind != TypeIp::Invalid {
                    return Some((candidate.to_string(), kind));
                }
                // A non-IP token after at least one valid host breaks the
                // loop (§4.2); since we haven't found a host yet here,
                // simply continue scanning.
            }
            None
        }
    }
}

const CACHE_STATUSES: &[&str] = &[
    "MISS", "BYPASS", "EXPIRED", "STALE", "UPDATING", "REVALIDATED", "HIT",
];

pub fn normalize_cache_status(token: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(token);
    let upper = text.trim().to_uppercase();
    CACHE_STATUSES.iter().find(|s| **s == upper).map(|s| s.to_string())
}

pub fn parse_status(token: &str, no_strict_status: bool) -> Option<i32> {
    let trimmed = token.trim();
    let value: i32 = trimmed.parse().ok()?;
    if no_strict_status {
        return Some(value);
    }
    if (100..=599).contains(&value) {
        Some(value)
    } else {
        None
    }
}

pub fn parse_u64_or_zero(token: &[u8]) -> u64 {
    String::from_utf8_lossy(token).trim().parse().unwrap_or(0)
}

pub fn parse_f64_or_zero(token: &[u8]) -> f64 {
    String::from_utf8_lossy(token).trim().parse().unwrap_or(0.0)
}

/// strptime-like parse via `date_format`, re-emitted via `date_num_format`
/// (numeric) (§4.1).
pub fn parse_date(text: &str, date_format: &str, date_num_format: &str) -> Option<(String, u32)> {
    let date = chrono::NaiveDate::parse_from_str(text.trim(), date_format).ok()?;
    let formatted = date.format(date_num_format).to_string();
    let numdate: u32 = formatted.parse().ok()?;
    Some((formatted, numdate))
}

pub fn parse_time(text: &str, time_format: &str) -> Option<String> {
    let time = chrono::NaiveTime::parse_from_str(text.trim(), time_format).ok()?;
    Some(time.format("%H:%M:%S").to_string())
}

/// `%x` — combined Unix-epoch timestamp.
pub fn parse_epoch(text: &str, date_num_format: &str) -> Option<(String, u32, String)> {
    let secs: i64 = text.trim().parse().ok()?;
    let dt = chrono::DateTime::from_timestamp(secs, 0)?;
    let naive = dt.naive_utc();
    let formatted = naive.format(date_num_format).to_string();
    let numdate: u32 = formatted.parse().ok()?;
    let time = naive.format("%H:%M:%S").to_string();
    Some((formatted, numdate, time))
}

/// Split on `;`/`,`, trim, lowercase, rejoin with `"; "`, truncate to
/// `MAX_MIME_OUT` (§4.1).
pub fn normalize_mime(token: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(token);
    if text.trim().is_empty() {
        return None;
    }
    let parts: Vec<String> = text
        .split([';', ','])
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect();
    if parts.is_empty() {
        return None;
    }
    let joined = parts.join("; ");
    Some(joined.chars().take(MAX_MIME_OUT).collect())
}

/// IANA cipher-suite code lookup for `%k`. A small built-in table stands
/// in for the spec's external cipher registry (§4.1, §6).
pub fn lookup_tls_cipher(token: &str) -> (String, Option<String>) {
    let trimmed = token.trim();
    if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        let name = match trimmed {
            "4865" => Some(("TLS_AES_128_GCM_SHA256", "TLSv1.3")),
            "4866" => Some(("TLS_AES_256_GCM_SHA384", "TLSv1.3")),
            "49199" => Some(("ECDHE-RSA-AES128-GCM-SHA256", "TLSv1.2")),
            "49195" => Some(("ECDHE-ECDSA-AES128-GCM-SHA256", "TLSv1.2")),
            _ => None,
        };
        match name {
            Some((cipher, version)) => (cipher.to_string(), Some(version.to_string())),
            None => (trimmed.to_string(), None),
        }
    } else {
        (trimmed.to_string(), None)
    }
}
