//! `fname_as_vhost` (§6): when configured, the log's virtual host is
//! derived from its filename rather than a `%v` directive — for
//! deployments that split one vhost per log file and name files
//! accordingly (e.g. `/var/log/nginx/example.com-access.log`). Kept on
//! `grep-matcher`/`grep-regex`, the donor's regex stack, rather than
//! adding a second regex crate.

use grep_matcher::{Captures, Matcher};
use grep_regex::{RegexMatcher, RegexMatcherBuilder};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("invalid fname_as_vhost pattern: {0}")]
    InvalidRegex(String),
}

/// Extracts a vhost name from a log filename via a regex with at least
/// one capture group; group 1 is taken as the vhost.
pub struct VhostMatcher {
    matcher: RegexMatcher,
}

impl VhostMatcher {
    pub fn new(pattern: &str) -> Result<Self, FilterError> {
        let matcher = RegexMatcherBuilder::new()
            .case_insensitive(false)
            .multi_line(false)
            .build(pattern)
            .map_err(|e| FilterError::InvalidRegex(e.to_string()))?;
        Ok(Self { matcher })
    }

    /// `None` if the filename doesn't match, or the pattern has no
    /// capture groups that matched.
    pub fn extract(&self, filename: &str) -> Option<String> {
        let mut caps = self.matcher.new_captures().ok()?;
        let matched = self
            .matcher
            .captures(filename.as_bytes(), &mut caps)
            .ok()?;
        if !matched {
            return None;
        }
        // Group 0 is the whole match; prefer group 1 if present, else the
        // whole match.
        let span = caps.get(1).or_else(|| caps.get(0))?;
        std::str::from_utf8(&filename.as_bytes()[span.start()..span.end()])
            .ok()
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_vhost_from_capture_group() {
        let matcher = VhostMatcher::new(r"([a-z0-9.-]+)-access\.log$").unwrap();
        assert_eq!(
            matcher.extract("/var/log/nginx/example.com-access.log"),
            Some("example.com".to_string())
        );
    }

    #[test]
    fn no_match_returns_none() {
        let matcher = VhostMatcher::new(r"([a-z0-9.-]+)-access\.log$").unwrap();
        assert_eq!(matcher.extract("/var/log/nginx/error.log"), None);
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        assert!(VhostMatcher::new("[invalid").is_err());
    }

    #[test]
    fn falls_back_to_whole_match_without_groups() {
        let matcher = VhostMatcher::new(r"access\.log$").unwrap();
        assert_eq!(
            matcher.extract("/var/log/access.log"),
            Some("access.log".to_string())
        );
    }
}
