//! Run configuration (§6, §10). Follows the donor's `AgentConfig::load()`
//! three-tier precedence — defaults, then an optional TOML file, then
//! environment variable overrides — but builds a `RunConfig` shaped
//! around log parsing rather than the agent's TLS/Docker surface.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::classify::StaticPolicy;
use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub log_format: String,
    pub date_format: String,
    pub time_format: String,
    pub date_num_format: String,

    pub double_decode: bool,
    pub append_method: bool,
    pub append_protocol: bool,
    pub no_ip_validation: bool,
    pub no_strict_status: bool,

    pub ignore_crawlers: bool,
    pub crawlers_only: bool,
    pub ignore_statics: StaticPolicy,
    pub ignore_qstr: bool,
    pub ignore_status: Vec<i32>,
    pub static_files: Vec<String>,
    pub all_static_files: bool,
    pub code444_as_404: bool,

    pub restore: bool,
    pub resume_store_path: Option<PathBuf>,

    pub num_tests: usize,
    pub jobs: usize,
    pub chunk_size: usize,

    pub fname_as_vhost: Option<String>,

    pub process_and_exit: bool,
    pub read_stdin: bool,

    pub is_json_log_format: bool,
    pub json_fields: std::collections::HashMap<String, char>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            log_format: r#"%h %^[%d:%t %^] "%r" %s %b"#.to_string(),
            date_format: "%d/%b/%Y".to_string(),
            time_format: "%H:%M:%S".to_string(),
            date_num_format: "%Y%m%d".to_string(),
            double_decode: false,
            append_method: false,
            append_protocol: false,
            no_ip_validation: false,
            no_strict_status: false,
            ignore_crawlers: false,
            crawlers_only: false,
            ignore_statics: StaticPolicy::Off,
            ignore_qstr: false,
            ignore_status: Vec::new(),
            static_files: Vec::new(),
            all_static_files: false,
            code444_as_404: false,
            restore: false,
            resume_store_path: None,
            num_tests: 10,
            jobs: 1,
            chunk_size: 1000,
            fname_as_vhost: None,
            process_and_exit: false,
            read_stdin: false,
            is_json_log_format: false,
            json_fields: std::collections::HashMap::new(),
        }
    }
}

const ENV_PREFIX: &str = "LOGCORE_";

impl RunConfig {
    /// Load configuration following the donor's precedence: built-in
    /// defaults, then an optional TOML file, then `LOGCORE_*` env vars.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = std::env::var("LOGCORE_CONFIG_FILE").ok();

        let mut config = match config_path {
            Some(path) if std::path::Path::new(&path).exists() => {
                tracing::info!(path = %path, "loading configuration from file");
                Self::from_file(&path)?
            }
            Some(path) => {
                tracing::warn!(path = %path, "configured file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_string(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::ParseFile {
            path: path.to_string(),
            source,
        })
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}LOG_FORMAT")) {
            self.log_format = v;
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}DATE_FORMAT")) {
            self.date_format = v;
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}TIME_FORMAT")) {
            self.time_format = v;
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}JOBS")) {
            if let Ok(n) = v.parse() {
                self.jobs = n;
            }
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}CHUNK_SIZE")) {
            if let Ok(n) = v.parse() {
                self.chunk_size = n;
            }
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}RESTORE")) {
            if let Ok(b) = v.parse() {
                self.restore = b;
            }
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}IGNORE_CRAWLERS")) {
            if let Ok(b) = v.parse() {
                self.ignore_crawlers = b;
            }
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}CRAWLERS_ONLY")) {
            if let Ok(b) = v.parse() {
                self.crawlers_only = b;
            }
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}FNAME_AS_VHOST")) {
            self.fname_as_vhost = Some(v);
        }
    }

    /// Reject contradictory settings before the pipeline starts, per
    /// SPEC_FULL.md §10.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_format.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "log_format",
                reason: "must not be empty".to_string(),
            });
        }
        if self.jobs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "jobs",
                reason: "must be > 0".to_string(),
            });
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "chunk_size",
                reason: "must be > 0".to_string(),
            });
        }
        if self.ignore_crawlers && self.crawlers_only {
            return Err(ConfigError::InvalidValue {
                field: "ignore_crawlers/crawlers_only",
                reason: "cannot both be set".to_string(),
            });
        }
        if self.is_json_log_format && self.json_fields.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "json_fields",
                reason: "is_json_log_format requires at least one mapped key".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(RunConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_jobs_is_rejected() {
        let cfg = RunConfig {
            jobs: 0,
            ..RunConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn contradictory_crawler_policy_is_rejected() {
        let cfg = RunConfig {
            ignore_crawlers: true,
            crawlers_only: true,
            ..RunConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn json_mode_without_fields_is_rejected() {
        let cfg = RunConfig {
            is_json_log_format: true,
            ..RunConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn from_file_round_trips_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logcore.toml");
        std::fs::write(&path, "jobs = 4\nchunk_size = 500\n").unwrap();
        let cfg = RunConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.jobs, 4);
        assert_eq!(cfg.chunk_size, 500);
    }
}
