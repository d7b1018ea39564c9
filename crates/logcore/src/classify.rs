//! Line classifier (§4.4): the ignore-policy decision table applied to an
//! already-parsed, already-field-complete `LogItem`. Modeled as a trait
//! object (`Classifiers`) so a downstream host can plug in real GeoIP/UA
//! tables, per the donor's pattern of keeping filter policy behind a trait
//! (see `filter::FilterEngine`); this core ships a minimal built-in table.

use crate::model::{IgnoreLevel, LogItem};

/// How static-asset requests are treated, a three-way switch instead of a
/// bool because "ignore but still count" and "ignore entirely" are both
/// legitimate operator choices (§6 `ignore_statics`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum StaticPolicy {
    #[default]
    Off,
    IgnoreReq,
    IgnorePanel,
}

#[derive(Debug, Clone, Default)]
pub struct ClassifyConfig {
    pub ignore_crawlers: bool,
    pub crawlers_only: bool,
    pub ignore_statics: StaticPolicy,
    pub ignore_qstr: bool,
    pub ignore_status: Vec<i32>,
    pub static_files: Vec<String>,
    pub all_static_files: bool,
    pub code444_as_404: bool,
}

/// Pluggable classification lookups the spec treats as opaque externals
/// (`is_crawler`, `hide_referer`/`ignore_referer`, `excluded_ip`). This
/// core supplies `BuiltinClassifiers` with small static tables.
pub trait Classifiers {
    fn is_crawler(&self, agent: &str) -> bool;
    fn ignore_referer(&self, referer: &str) -> bool;
    fn excluded_ip(&self, host: &str) -> bool;
}

const CRAWLER_MARKERS: &[&str] = &[
    "bot", "crawl", "spider", "slurp", "facebookexternalhit", "googlebot", "bingbot",
    "duckduckbot", "yandexbot", "baiduspider", "ahrefsbot", "semrushbot", "mj12bot",
];

const IGNORED_REFERERS: &[&str] = &[];

const EXCLUDED_IPS: &[&str] = &[];

const DEFAULT_STATIC_EXTENSIONS: &[&str] = &[
    ".css", ".js", ".jpg", ".jpeg", ".png", ".gif", ".svg", ".ico", ".woff", ".woff2",
    ".ttf", ".eot", ".map", ".webp", ".pdf", ".txt", ".xml", ".json",
];

#[derive(Debug, Clone, Default)]
pub struct BuiltinClassifiers;

impl Classifiers for BuiltinClassifiers {
    fn is_crawler(&self, agent: &str) -> bool {
        let lower = agent.to_ascii_lowercase();
        CRAWLER_MARKERS.iter().any(|m| lower.contains(m))
    }

    fn ignore_referer(&self, referer: &str) -> bool {
        let lower = referer.to_ascii_lowercase();
        IGNORED_REFERERS.iter().any(|r| lower.contains(r))
    }

    fn excluded_ip(&self, host: &str) -> bool {
        EXCLUDED_IPS.contains(&host)
    }
}

fn is_static_request(req: &str, cfg: &ClassifyConfig) -> bool {
    let path = req.split('?').next().unwrap_or(req);
    let lower = path.to_ascii_lowercase();
    if cfg.all_static_files {
        return DEFAULT_STATIC_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
            || cfg.static_files.iter().any(|ext| lower.ends_with(ext.as_str()));
    }
    cfg.static_files.iter().any(|ext| lower.ends_with(ext.as_str()))
}

/// Apply the full §4.4 ignore-policy decision table to an item that has
/// already cleared the missing-field check. Mutates `item` in place:
/// `ignorelevel`, `req` (if `ignore_qstr`), `is_404`/`is_static`, and
/// `uniq_key`.
pub fn classify(item: &mut LogItem, cfg: &ClassifyConfig, classifiers: &dyn Classifiers) {
    if item.agent.is_none() {
        item.agent = Some("-".to_string());
    }

    let mut level = IgnoreLevel::Keep;

    if let Some(host) = item.host.as_deref() {
        if classifiers.excluded_ip(host) {
            level = IgnoreLevel::IgnorePanel;
        }
    }

    if level == IgnoreLevel::Keep {
        let agent = item.agent.as_deref().unwrap_or("-");
        let crawler = classifiers.is_crawler(agent);
        if cfg.ignore_crawlers && crawler {
            level = IgnoreLevel::IgnorePanel;
        } else if cfg.crawlers_only && !crawler {
            level = IgnoreLevel::IgnorePanel;
        }
    }

    if level == IgnoreLevel::Keep {
        if let Some(referer) = item.referer.as_deref() {
            if classifiers.ignore_referer(referer) {
                level = IgnoreLevel::IgnorePanel;
            }
        }
    }

    if level == IgnoreLevel::Keep && cfg.ignore_status.contains(&item.status) {
        level = IgnoreLevel::IgnorePanel;
    }

    let req_is_static = item
        .req
        .as_deref()
        .map(|r| is_static_request(r, cfg))
        .unwrap_or(false);

    if level == IgnoreLevel::Keep && req_is_static {
        level = match cfg.ignore_statics {
            StaticPolicy::Off => IgnoreLevel::Keep,
            StaticPolicy::IgnoreReq => IgnoreLevel::IgnoreReq,
            StaticPolicy::IgnorePanel => IgnoreLevel::IgnorePanel,
        };
    }

    item.ignorelevel = level;

    if cfg.ignore_qstr {
        if let Some(req) = item.req.as_mut() {
            if let Some(idx) = req.find('?') {
                req.truncate(idx);
            }
        }
    }

    item.is_404 = item.status == 404 || (cfg.code444_as_404 && item.status == 444);
    item.is_static = !item.is_404 && req_is_static;

    item.compute_uniq_key();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> LogItem {
        let mut item = LogItem::new();
        item.host = Some("203.0.113.5".to_string());
        item.date = Some("20001010".to_string());
        item.req = Some("/index.html?x=1".to_string());
        item.status = 200;
        item.agent = Some("Mozilla/5.0".to_string());
        item
    }

    #[test]
    fn crawler_agent_is_ignored_when_configured() {
        let mut i = item();
        i.agent = Some("Googlebot/2.1".to_string());
        let cfg = ClassifyConfig {
            ignore_crawlers: true,
            ..Default::default()
        };
        classify(&mut i, &cfg, &BuiltinClassifiers);
        assert_eq!(i.ignorelevel, IgnoreLevel::IgnorePanel);
    }

    #[test]
    fn crawlers_only_ignores_non_crawlers() {
        let mut i = item();
        let cfg = ClassifyConfig {
            crawlers_only: true,
            ..Default::default()
        };
        classify(&mut i, &cfg, &BuiltinClassifiers);
        assert_eq!(i.ignorelevel, IgnoreLevel::IgnorePanel);
    }

    #[test]
    fn ignore_qstr_strips_query_string() {
        let mut i = item();
        let cfg = ClassifyConfig {
            ignore_qstr: true,
            ..Default::default()
        };
        classify(&mut i, &cfg, &BuiltinClassifiers);
        assert_eq!(i.req.as_deref(), Some("/index.html"));
    }

    #[test]
    fn status_404_is_marked() {
        let mut i = item();
        i.status = 404;
        classify(&mut i, &ClassifyConfig::default(), &BuiltinClassifiers);
        assert!(i.is_404);
        assert!(!i.is_static);
    }

    #[test]
    fn code_444_counts_as_404_when_configured() {
        let mut i = item();
        i.status = 444;
        let cfg = ClassifyConfig {
            code444_as_404: true,
            ..Default::default()
        };
        classify(&mut i, &cfg, &BuiltinClassifiers);
        assert!(i.is_404);
    }

    #[test]
    fn static_asset_extension_match() {
        let mut i = item();
        i.req = Some("/assets/app.js".to_string());
        let cfg = ClassifyConfig {
            ignore_statics: StaticPolicy::IgnoreReq,
            static_files: vec![".js".to_string()],
            ..Default::default()
        };
        classify(&mut i, &cfg, &BuiltinClassifiers);
        assert!(i.is_static);
        assert_eq!(i.ignorelevel, IgnoreLevel::IgnoreReq);
    }

    #[test]
    fn excluded_ip_takes_priority_over_everything() {
        struct AlwaysExcludes;
        impl Classifiers for AlwaysExcludes {
            fn is_crawler(&self, _: &str) -> bool {
                false
            }
            fn ignore_referer(&self, _: &str) -> bool {
                false
            }
            fn excluded_ip(&self, _: &str) -> bool {
                true
            }
        }
        let mut i = item();
        classify(&mut i, &ClassifyConfig::default(), &AlwaysExcludes);
        assert_eq!(i.ignorelevel, IgnoreLevel::IgnorePanel);
    }
}
