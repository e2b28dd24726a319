use std::path::PathBuf;

use crate::logging::{DomainFilter, Level, Logger};

pub const DEFAULT_DB_PATH: &str = "data/trademirror.db";
pub const DEFAULT_MAX_FILE_MB: u64 = 50;

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub max_file_bytes: u64,
    /// Share of numerically parseable cells that marks a fallback header row.
    pub header_numeric_threshold: f64,
    /// Columns with a larger null share than this are reported.
    pub null_warn_fraction: f64,
    pub log_level: Level,
    pub log_domains: DomainFilter,
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            max_file_bytes: DEFAULT_MAX_FILE_MB * 1024 * 1024,
            header_numeric_threshold: 0.7,
            null_warn_fraction: 0.5,
            log_level: Level::Info,
            log_domains: DomainFilter::All,
            log_file: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            db_path: std::env::var("TRADEMIRROR_DB").map(PathBuf::from).unwrap_or(d.db_path),
            max_file_bytes: std::env::var("MAX_FILE_MB")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(|mb| mb * 1024 * 1024)
                .unwrap_or(d.max_file_bytes),
            header_numeric_threshold: std::env::var("HEADER_NUMERIC_TH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(d.header_numeric_threshold),
            null_warn_fraction: std::env::var("NULL_WARN_FRAC")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(d.null_warn_fraction),
            log_level: Level::from_env(),
            log_domains: std::env::var("LOG_DOMAINS")
                .map(|v| DomainFilter::parse(&v))
                .unwrap_or(DomainFilter::All),
            log_file: std::env::var("LOG_FILE").ok().map(PathBuf::from),
        }
    }

    /// File sink when `log_file` is set, stderr otherwise.
    pub fn build_logger(&self) -> std::io::Result<Logger> {
        let logger = match &self.log_file {
            Some(path) => Logger::file(path, self.log_level)?,
            None => Logger::stderr(self.log_level),
        };
        Ok(logger.with_domains(self.log_domains.clone()))
    }
}
