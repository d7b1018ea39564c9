//! Format-directed tokenizer (§4.2). The format string is parsed exactly
//! once into a `Vec<FormatToken>` — the C dispatch-table-per-character is
//! replaced by a tagged variant walked once per line, per SPEC_FULL.md §9.

pub mod extract;

use crate::error::{DirectiveError, FormatError};
use crate::metrics::GlobalFlags;
use crate::model::LogItem;

/// One field directive, tagged by the letter that introduces it in the
/// format language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Date,
    Time,
    /// `%x` — combined Unix-epoch timestamp, populating date/time/dt in
    /// one token without consulting `date_format`/`time_format`.
    /// (Open question resolution, see DESIGN.md.)
    Timestamp,
    Vhost,
    /// `%e` — extract-and-discard, an alias for `%^` kept for format
    /// strings that label the column (e.g. `pid`) even though this core
    /// has no field for it. (Open question resolution, see DESIGN.md.)
    Extra,
    CacheStatus,
    Host { reject: Option<Vec<u8>> },
    Method,
    ReqPath,
    QueryString,
    Protocol,
    RequestLine,
    Status,
    RespSize,
    Referer,
    UserId,
    ServeTimeMs,
    ServeTimeS,
    ServeTimeUs,
    ServeTimeNs,
    TlsCypher,
    TlsType,
    Mime,
    /// `%^` — extract and discard.
    SkipToken,
}

impl Directive {
    fn letter(&self) -> char {
        match self {
            Directive::Date => 'd',
            Directive::Time => 't',
            Directive::Timestamp => 'x',
            Directive::Vhost => 'v',
            Directive::Extra => 'e',
            Directive::CacheStatus => 'C',
            Directive::Host { .. } => 'h',
            Directive::Method => 'm',
            Directive::ReqPath => 'U',
            Directive::QueryString => 'q',
            Directive::Protocol => 'H',
            Directive::RequestLine => 'r',
            Directive::Status => 's',
            Directive::RespSize => 'b',
            Directive::Referer => 'R',
            Directive::UserId => 'u',
            Directive::ServeTimeMs => 'L',
            Directive::ServeTimeS => 'T',
            Directive::ServeTimeUs => 'D',
            Directive::ServeTimeNs => 'n',
            Directive::TlsCypher => 'k',
            Directive::TlsType => 'K',
            Directive::Mime => 'M',
            Directive::SkipToken => '^',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatToken {
    Directive(Directive),
    Literal(u8),
    /// `~` — skip leading input whitespace before the next token.
    SkipWs,
}

/// Parse a format string into tokens, once, at startup.
pub fn parse_format_string(fmt: &str) -> Result<Vec<FormatToken>, FormatError> {
    if fmt.is_empty() {
        return Err(FormatError::EmptyFormat);
    }
    let bytes = fmt.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'~' => {
                tokens.push(FormatToken::SkipWs);
                i += 1;
            }
            b'%' => {
                i += 1;
                if i >= bytes.len() {
                    return Err(FormatError::UnknownDirective('%'));
                }
                if bytes[i] == b'{' {
                    let close = bytes[i..]
                        .iter()
                        .position(|&b| b == b'}')
                        .map(|p| i + p)
                        .ok_or(FormatError::UnterminatedBraces)?;
                    let set = bytes[i + 1..close].to_vec();
                    i = close + 1;
                    if i >= bytes.len() || bytes[i] != b'h' {
                        return Err(FormatError::UnterminatedBraces);
                    }
                    tokens.push(FormatToken::Directive(Directive::Host {
                        reject: Some(set),
                    }));
                    i += 1;
                } else {
                    let c = bytes[i] as char;
                    let directive = match c {
                        'd' => Directive::Date,
                        't' => Directive::Time,
                        'x' => Directive::Timestamp,
                        'v' => Directive::Vhost,
                        'e' => Directive::Extra,
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
                        '^' => Directive::SkipToken,
                        other => return Err(FormatError::UnknownDirective(other)),
                    };
                    tokens.push(FormatToken::Directive(directive));
                    i += 1;
                }
            }
            b => {
                tokens.push(FormatToken::Literal(b));
                i += 1;
            }
        }
    }
    Ok(tokens)
}

/// Fatal startup check: the format must be able to populate `host`,
/// `date`, and a request field.
pub fn verify_required(tokens: &[FormatToken]) -> Result<(), FormatError> {
    let has = |want: &dyn Fn(&Directive) -> bool| {
        tokens.iter().any(|t| match t {
            FormatToken::Directive(d) => want(d),
            _ => false,
        })
    };
    if !has(&|d| matches!(d, Directive::Host { .. })) {
        return Err(FormatError::MissingRequiredDirective('h'));
    }
    if !has(&|d| matches!(d, Directive::Date | Directive::Timestamp)) {
        return Err(FormatError::MissingRequiredDirective('d'));
    }
    if !has(&|d| matches!(d, Directive::RequestLine | Directive::ReqPath)) {
        return Err(FormatError::MissingRequiredDirective('r'));
    }
    Ok(())
}

/// Date/time/format configuration the engine needs to resolve `%d`/`%t`
/// and delimiter-counting for syslog-style padded dates.
#[derive(Debug, Clone)]
pub struct DirectiveConfig {
    pub date_format: String,
    pub time_format: String,
    pub date_num_format: String,
    pub double_decode: bool,
    pub no_ip_validation: bool,
    pub no_strict_status: bool,
}

pub struct DirectiveEngine {
    tokens: Vec<FormatToken>,
    cfg: DirectiveConfig,
}

impl DirectiveEngine {
    pub fn new(tokens: Vec<FormatToken>, cfg: DirectiveConfig) -> Self {
        Self { tokens, cfg }
    }

    /// Run the engine over one raw line, producing a populated `LogItem`
    /// or the first directive error encountered (§4.2: "returns at the
    /// first error").
    pub fn parse_line(&self, line: &[u8], flags: &GlobalFlags) -> Result<LogItem, DirectiveError> {
        let mut item = LogItem::new();
        let mut pos = 0usize;
        let mut i = 0usize;

        while i < self.tokens.len() {
            match &self.tokens[i] {
                FormatToken::Literal(lit) => {
                    if pos < line.len() {
                        // Permissive: the byte is consumed whether or not
                        // it matches, per SPEC_FULL.md §4.2.
                        let _ = *lit;
                        pos += 1;
                    }
                    i += 1;
                }
                FormatToken::SkipWs => {
                    while pos < line.len() && (line[pos] == b' ' || line[pos] == b'\t') {
                        pos += 1;
                    }
                    i += 1;
                }
                FormatToken::Directive(d) => {
                    let delim = self.delimiter_for(i);
                    let already_set = self.field_already_set(&item, d);
                    let (token, new_pos) = extract::scan_token(line, pos, delim, d, &self.cfg)?;
                    pos = new_pos;
                    if !already_set {
                        self.apply_directive(&mut item, d, token, flags)?;
                    }
                    // The delimiter byte doubles as the format's next
                    // literal token; scan_token already consumed it from
                    // the input, so skip that literal rather than
                    // consuming a second input byte for it.
                    i += match (&delim, self.tokens.get(i + 1)) {
                        (Some(b), Some(FormatToken::Literal(l))) if b == l => 2,
                        _ => 1,
                    };
                }
            }
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

    fn field_already_set(&self, item: &LogItem, d: &Directive) -> bool {
        match d {
            Directive::Date | Directive::Timestamp => item.date.is_some(),
            Directive::Time => item.time.is_some(),
            Directive::Vhost => item.vhost.is_some(),
            Directive::CacheStatus => item.cache_status.is_some(),
            Directive::Host { .. } => item.host.is_some(),
            Directive::Method => item.method.is_some(),
            Directive::ReqPath | Directive::RequestLine => item.req.is_some(),
            Directive::QueryString => item.qstr.is_some(),
            Directive::Protocol => item.protocol.is_some(),
            Directive::Status => item.status != -1,
            Directive::RespSize => item.resp_size != 0,
            Directive::Referer => item.referer.is_some(),
            Directive::UserId => item.userid.is_some(),
            Directive::ServeTimeMs
            | Directive::ServeTimeS
            | Directive::ServeTimeUs
            | Directive::ServeTimeNs => item.serve_time != 0,
            Directive::TlsCypher => item.tls_cypher.is_some(),
            Directive::TlsType => item.tls_type.is_some(),
            Directive::Mime => item.mime_type.is_some(),
            Directive::Extra | Directive::SkipToken => false,
        }
    }

    /// The delimiter byte for the directive at `idx`: the next literal
    /// format byte, or `None` if the directive runs to end-of-line, or a
    /// single space as a conservative fallback when two directives are
    /// adjacent with no literal separator between them (open question,
    /// see DESIGN.md).
    fn delimiter_for(&self, idx: usize) -> Option<u8> {
        match self.tokens.get(idx + 1) {
            None => None,
            Some(FormatToken::Literal(b)) => Some(*b),
            Some(FormatToken::Directive(_)) | Some(FormatToken::SkipWs) => Some(b' '),
        }
    }

    fn apply_directive(
        &self,
        item: &mut LogItem,
        d: &Directive,
        token: Vec<u8>,
        flags: &GlobalFlags,
    ) -> Result<(), DirectiveError> {
        let letter = d.letter().to_string();
        match d {
            Directive::Date => {
                if token.is_empty() {
                    return Err(DirectiveError::MissingToken { directive: letter });
                }
                let text = String::from_utf8_lossy(&token);
                let (date, numdate) =
                    extract::parse_date(&text, &self.cfg.date_format, &self.cfg.date_num_format)
                        .ok_or_else(|| DirectiveError::InvalidToken {
                            directive: letter.clone(),
                            token: text.to_string(),
                        })?;
                item.date = Some(date);
                item.numdate = numdate;
            }
            Directive::Timestamp => {
                if token.is_empty() {
                    return Err(DirectiveError::MissingToken { directive: letter });
                }
                let text = String::from_utf8_lossy(&token);
                let (date, numdate, time) = extract::parse_epoch(&text, &self.cfg.date_num_format)
                    .ok_or_else(|| DirectiveError::InvalidToken {
                        directive: letter.clone(),
                        token: text.to_string(),
                    })?;
                item.date = Some(date);
                item.numdate = numdate;
                item.time = Some(time);
            }
            Directive::Time => {
                if token.is_empty() {
                    return Err(DirectiveError::MissingToken { directive: letter });
                }
                let text = String::from_utf8_lossy(&token);
                let time = extract::parse_time(&text, &self.cfg.time_format).ok_or_else(|| {
                    DirectiveError::InvalidToken {
                        directive: letter.clone(),
                        token: text.to_string(),
                    }
                })?;
                item.time = Some(time);
            }
            Directive::Vhost => {
                item.vhost = extract::non_empty_string(&token);
            }
            Directive::CacheStatus => {
                item.cache_status = extract::normalize_cache_status(&token);
            }
            Directive::Host { reject } => {
                if token.is_empty() {
                    return Err(DirectiveError::MissingToken { directive: letter });
                }
                let (host, kind) =
                    extract::extract_host(&token, reject.as_deref(), self.cfg.no_ip_validation)
                        .ok_or_else(|| DirectiveError::InvalidToken {
                            directive: letter.clone(),
                            token: String::from_utf8_lossy(&token).to_string(),
                        })?;
                item.host = Some(host);
                item.type_ip = Some(kind);
            }
            Directive::Method => {
                let text = String::from_utf8_lossy(&token);
                item.method = extract::match_method(&text).map(|s| s.to_string());
            }
            Directive::ReqPath => {
                item.req = extract::url_decode(&token, self.cfg.double_decode)
                    .or_else(|| Some("-".to_string()));
            }
            Directive::QueryString => {
                item.qstr = extract::url_decode(&token, self.cfg.double_decode);
            }
            Directive::Protocol => {
                let text = String::from_utf8_lossy(&token);
                item.protocol = extract::match_protocol(&text).map(|s| s.to_string());
            }
            Directive::RequestLine => {
                let (method, req, protocol) = extract::parse_request_line(&token, self.cfg.double_decode);
                if method.is_some() {
                    item.method = method;
                }
                if protocol.is_some() {
                    item.protocol = protocol;
                }
                item.req = Some(req);
            }
            Directive::Status => {
                if token.is_empty() {
                    return Err(DirectiveError::MissingToken { directive: letter });
                }
                let text = String::from_utf8_lossy(&token);
                let status = extract::parse_status(&text, self.cfg.no_strict_status).ok_or_else(|| {
                    DirectiveError::InvalidToken {
                        directive: letter.clone(),
                        token: text.to_string(),
                    }
                })?;
                item.status = status;
            }
            Directive::RespSize => {
                item.resp_size = extract::parse_u64_or_zero(&token);
                flags.mark_bandwidth_seen();
            }
            Directive::Referer => {
                let text = extract::url_decode(&token, self.cfg.double_decode);
                if let Some(referer) = text {
                    item.site = extract::referer_site(&referer);
                    item.keyphrase = extract::referer_keyphrase(&referer);
                    item.referer = Some(referer);
                }
            }
            Directive::UserId => {
                item.userid = extract::non_empty_string(&token);
            }
            Directive::ServeTimeMs => {
                let ms = extract::parse_f64_or_zero(&token);
                if ms > 0.0 {
                    item.serve_time = (ms * 1000.0) as u64;
                    flags.mark_serve_time_seen();
                }
            }
            Directive::ServeTimeS => {
                let secs = extract::parse_f64_or_zero(&token);
                if secs > 0.0 {
                    item.serve_time = (secs * 1_000_000.0) as u64;
                    flags.mark_serve_time_seen();
                }
            }
            Directive::ServeTimeUs => {
                let us = extract::parse_u64_or_zero(&token);
                if us > 0 {
                    item.serve_time = us;
                    flags.mark_serve_time_seen();
                }
            }
            Directive::ServeTimeNs => {
                let ns = extract::parse_u64_or_zero(&token);
                if ns > 0 {
                    item.serve_time = ns / 1000;
                    flags.mark_serve_time_seen();
                }
            }
            Directive::TlsCypher => {
                let text = String::from_utf8_lossy(&token);
                let (cypher, type_) = extract::lookup_tls_cipher(&text);
                item.tls_cypher = Some(cypher);
                if item.tls_type.is_none() {
                    item.tls_type = type_;
                }
            }
            Directive::TlsType => {
                item.tls_type = extract::non_empty_string(&token);
            }
            Directive::Mime => {
                item.mime_type = extract::normalize_mime(&token);
            }
            Directive::Extra | Directive::SkipToken => {}
        }

        if item.tls_type.is_some() || item.tls_cypher.is_some() {
            item.tls_type_cypher = Some(format!(
                "{}/{}",
                item.tls_type.as_deref().unwrap_or(""),
                item.tls_cypher.as_deref().unwrap_or("")
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::GlobalFlags;

    fn engine(fmt: &str) -> DirectiveEngine {
        let tokens = parse_format_string(fmt).unwrap();
        DirectiveEngine::new(
            tokens,
            DirectiveConfig {
                date_format: "%d/%b/%Y".to_string(),
                time_format: "%H:%M:%S".to_string(),
                date_num_format: "%Y%m%d".to_string(),
                double_decode: false,
                no_ip_validation: false,
                no_strict_status: false,
            },
        )
    }

    #[test]
    fn common_log_format_scenario() {
        let e = engine(r#"%h %^ %^ [%d:%t %^] "%r" %s %b"#);
        let line = br#"127.0.0.1 - frank [10/Oct/2000:13:55:36 -0700] "GET /apache_pb.gif HTTP/1.0" 200 2326"#;
        let flags = GlobalFlags::default();
        let item = e.parse_line(line, &flags).expect("should parse");
        assert_eq!(item.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(item.date.as_deref(), Some("20001010"));
        assert_eq!(item.time.as_deref(), Some("13:55:36"));
        assert_eq!(item.method.as_deref(), Some("GET"));
        assert_eq!(item.req.as_deref(), Some("/apache_pb.gif"));
        assert_eq!(item.protocol.as_deref(), Some("HTTP/1.0"));
        assert_eq!(item.status, 200);
        assert_eq!(item.resp_size, 2326);
    }

    #[test]
    fn xff_picks_first_valid_ip() {
        let e = engine("%{,}h");
        let flags = GlobalFlags::default();
        let item = e
            .parse_line(b"  10.0.0.5, 203.0.113.77  ", &flags)
            .expect("should parse");
        assert_eq!(item.host.as_deref(), Some("10.0.0.5"));
    }

    #[test]
    fn missing_host_directive_is_fatal_at_verify() {
        let tokens = parse_format_string("%d %r").unwrap();
        assert!(verify_required(&tokens).is_err());
    }

    #[test]
    fn duplicate_directive_does_not_overwrite() {
        let e = engine("%d-%d");
        let flags = GlobalFlags::default();
        // Two genuinely different dates either side of the literal '-':
        // the second %d must be skipped without reparse, so the item
        // keeps the first date rather than being overwritten (or erroring
        // out) on the second occurrence.
        let item = e
            .parse_line(b"10/Oct/2000-11/Nov/2001", &flags)
            .expect("should parse");
        assert_eq!(item.date.as_deref(), Some("20001010"));
    }
}
