//! JSON directive engine (§4.3): an alternate entry point for logs shaped
//! as one JSON object per line. Each configured key is looked up in a
//! per-key subformat map and its value fed through the same field
//! extractors the line-oriented engine uses, rather than through a
//! hand-rolled walker (the donor stack already depends on `serde_json`).

use std::collections::HashMap;

use crate::directive::{extract, Directive, DirectiveConfig};
use crate::error::DirectiveError;
use crate::metrics::GlobalFlags;
use crate::model::LogItem;

/// Maps a JSON object key to the single directive letter that should
/// consume its value (e.g. `"remote_addr" -> "h"`, `"status" -> "s"`).
pub type JsonFormatMap = HashMap<String, char>;

pub struct JsonDirectiveEngine {
    fields: JsonFormatMap,
    cfg: DirectiveConfig,
}

impl JsonDirectiveEngine {
    pub fn new(fields: JsonFormatMap, cfg: DirectiveConfig) -> Self {
        Self { fields, cfg }
    }

    /// Walk a (non-nested) JSON object, feeding each recognized value
    /// through the directive engine. Unknown keys and empty values are
    /// skipped, per §4.3.
    pub fn parse_object(
        &self,
        obj: &serde_json::Map<String, serde_json::Value>,
        flags: &GlobalFlags,
    ) -> Result<LogItem, DirectiveError> {
        let mut item = LogItem::new();

        for (key, letter) in &self.fields {
            let Some(value) = obj.get(key) else { continue };
            let text = json_value_to_string(value);
            if text.is_empty() {
                continue;
            }
            let directive = directive_for_letter(*letter);
            apply_scalar_directive(&mut item, &directive, text.as_bytes(), &self.cfg, flags)?;
        }

        if item.agent.is_none() {
            item.agent = Some("-".to_string());
        }
        let hash = crate::model::djb2(item.agent.as_deref().unwrap_or("-").as_bytes());
        item.agent_hash = hash;
        item.agent_hex = crate::model::hex_no_leading_zeros(hash);

        if item.host.is_none() {
            return Err(DirectiveError::MissingRequiredField { field: "host" });
        }
        if item.date.is_none() {
            return Err(DirectiveError::MissingRequiredField { field: "date" });
        }
        if item.req.is_none() {
            return Err(DirectiveError::MissingRequiredField { field: "req" });
        }

        item.compute_uniq_key();
        Ok(item)
    }
}

fn json_value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

fn directive_for_letter(letter: char) -> Directive {
    match letter {
        'd' => Directive::Date,
        't' => Directive::Time,
        'x' => Directive::Timestamp,
        'v' => Directive::Vhost,
        'C' => Directive::CacheStatus,
        'h' => Directive::Host { reject: None },
        'm' => Directive::Method,
        'U' => Directive::ReqPath,
        'q' => Directive::QueryString,
        'H' => Directive::Protocol,
        'r' => Directive::RequestLine,
        's' => Directive::Status,
        'b' => Directive::RespSize,
        'R' => Directive::Referer,
        'u' => Directive::UserId,
        'L' => Directive::ServeTimeMs,
        'T' => Directive::ServeTimeS,
        'D' => Directive::ServeTimeUs,
        'n' => Directive::ServeTimeNs,
        'k' => Directive::TlsCypher,
        'K' => Directive::TlsType,
        'M' => Directive::Mime,
        _ => Directive::Extra,
    }
}

/// Apply one directive to a whole value (no delimiter scanning needed —
/// the JSON value boundary already delimits the token).
fn apply_scalar_directive(
    item: &mut LogItem,
    directive: &Directive,
    token: &[u8],
    cfg: &DirectiveConfig,
    flags: &GlobalFlags,
) -> Result<(), DirectiveError> {
    // Reuse the line-oriented engine's single-token application by routing
    // through the same extractor calls it would make once delimiting is
    // a no-op (the whole value is the token).
    match directive {
        Directive::Date => {
            let text = String::from_utf8_lossy(token);
            let (date, numdate) =
                extract::parse_date(&text, &cfg.date_format, &cfg.date_num_format).ok_or_else(|| {
                    DirectiveError::InvalidToken {
                        directive: "d".to_string(),
                        token: text.to_string(),
                    }
                })?;
            item.date = Some(date);
            item.numdate = numdate;
        }
        Directive::Timestamp => {
            let text = String::from_utf8_lossy(token);
            let (date, numdate, time) =
                extract::parse_epoch(&text, &cfg.date_num_format).ok_or_else(|| {
                    DirectiveError::InvalidToken {
                        directive: "x".to_string(),
                        token: text.to_string(),
                    }
                })?;
            item.date = Some(date);
            item.numdate = numdate;
            item.time = Some(time);
        }
        Directive::Time => {
            let text = String::from_utf8_lossy(token);
            item.time = extract::parse_time(&text, &cfg.time_format);
        }
        Directive::Vhost => item.vhost = extract::non_empty_string(token),
        Directive::CacheStatus => item.cache_status = extract::normalize_cache_status(token),
        Directive::Host { reject } => {
            if let Some((host, kind)) =
                extract::extract_host(token, reject.as_deref(), cfg.no_ip_validation)
            {
                item.host = Some(host);
                item.type_ip = Some(kind);
            }
        }
        Directive::Method => {
            let text = String::from_utf8_lossy(token);
            item.method = extract::match_method(&text).map(|s| s.to_string());
        }
        Directive::ReqPath => {
            item.req = extract::url_decode(token, cfg.double_decode).or_else(|| Some("-".to_string()));
        }
        Directive::QueryString => item.qstr = extract::url_decode(token, cfg.double_decode),
        Directive::Protocol => {
            let text = String::from_utf8_lossy(token);
            item.protocol = extract::match_protocol(&text).map(|s| s.to_string());
        }
        Directive::RequestLine => {
            let (method, req, protocol) = extract::parse_request_line(token, cfg.double_decode);
            if method.is_some() {
                item.method = method;
            }
            if protocol.is_some() {
                item.protocol = protocol;
            }
            item.req = Some(req);
        }
        Directive::Status => {
            let text = String::from_utf8_lossy(token);
            item.status = extract::parse_status(&text, cfg.no_strict_status).unwrap_or(-1);
        }
        Directive::RespSize => {
            item.resp_size = extract::parse_u64_or_zero(token);
            flags.mark_bandwidth_seen();
        }
        Directive::Referer => {
            if let Some(referer) = extract::url_decode(token, cfg.double_decode) {
                item.site = extract::referer_site(&referer);
                item.keyphrase = extract::referer_keyphrase(&referer);
                item.referer = Some(referer);
            }
        }
        Directive::UserId => item.userid = extract::non_empty_string(token),
        Directive::ServeTimeMs => {
            let ms = extract::parse_f64_or_zero(token);
            if ms > 0.0 {
                item.serve_time = (ms * 1000.0) as u64;
                flags.mark_serve_time_seen();
            }
        }
        Directive::ServeTimeS => {
            let secs = extract::parse_f64_or_zero(token);
            if secs > 0.0 {
                item.serve_time = (secs * 1_000_000.0) as u64;
                flags.mark_serve_time_seen();
            }
        }
        Directive::ServeTimeUs => {
            let us = extract::parse_u64_or_zero(token);
            if us > 0 {
                item.serve_time = us;
                flags.mark_serve_time_seen();
            }
        }
        Directive::ServeTimeNs => {
            let ns = extract::parse_u64_or_zero(token);
            if ns > 0 {
                item.serve_time = ns / 1000;
                flags.mark_serve_time_seen();
            }
        }
        Directive::TlsCypher => {
            let text = String::from_utf8_lossy(token);
            let (cypher, type_) = extract::lookup_tls_cipher(&text);
            item.tls_cypher = Some(cypher);
            if item.tls_type.is_none() {
                item.tls_type = type_;
            }
        }
        Directive::TlsType => item.tls_type = extract::non_empty_string(token),
        Directive::Mime => item.mime_type = extract::normalize_mime(token),
        Directive::Extra | Directive::SkipToken => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cfg() -> DirectiveConfig {
        DirectiveConfig {
            date_format: "%Y-%m-%d".to_string(),
            time_format: "%H:%M:%S".to_string(),
            date_num_format: "%Y%m%d".to_string(),
            double_decode: false,
            no_ip_validation: false,
            no_strict_status: false,
        }
    }

    #[test]
    fn parses_recognized_keys_and_skips_unknown() {
        let mut fields = JsonFormatMap::new();
        fields.insert("remote_addr".to_string(), 'h');
        fields.insert("request".to_string(), 'r');
        fields.insert("ts".to_string(), 'd');
        fields.insert("status".to_string(), 's');

        let engine = JsonDirectiveEngine::new(fields, cfg());
        let obj = json!({
            "remote_addr": "127.0.0.1",
            "request": "GET /x HTTP/1.1",
            "ts": "2000-10-10",
            "status": 200,
            "unused_key": "ignored"
        });
        let flags = GlobalFlags::default();
        let item = engine
            .parse_object(obj.as_object().unwrap(), &flags)
            .expect("should parse");
        assert_eq!(item.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(item.req.as_deref(), Some("/x"));
        assert_eq!(item.date.as_deref(), Some("20001010"));
        assert_eq!(item.status, 200);
    }

    #[test]
    fn empty_value_is_skipped() {
        let mut fields = JsonFormatMap::new();
        fields.insert("vhost".to_string(), 'v');
        fields.insert("remote_addr".to_string(), 'h');
        fields.insert("request".to_string(), 'r');
        fields.insert("ts".to_string(), 'd');

        let engine = JsonDirectiveEngine::new(fields, cfg());
        let obj = json!({
            "vhost": "",
            "remote_addr": "127.0.0.1",
            "request": "GET / HTTP/1.1",
            "ts": "2000-10-10"
        });
        let flags = GlobalFlags::default();
        let item = engine.parse_object(obj.as_object().unwrap(), &flags).unwrap();
        assert_eq!(item.vhost, None);
    }
}
