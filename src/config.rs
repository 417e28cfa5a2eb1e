//! Buffer configuration
//!
//! Settings are read from JSON (all fields optional) and may be overridden by
//! `PAGEBUF_*` environment variables.

use crate::types::{DEFAULT_MEM_MARGIN_KB, DEFAULT_PAGE_SIZE, DEFAULT_RESIZE_SLACK_BYTES};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::path::Path;

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// Percentage outside [0, 100]
    InvalidPercentage(&'static str, i64),
    /// Any other invalid value
    InvalidValue(String),
    /// Malformed JSON
    Parse(serde_json::Error),
    /// I/O error while reading a config file
    IoError(std::io::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPercentage(name, pct) => {
                write!(f, "Invalid percentage ({}) given for {}", pct, name)
            }
            ConfigError::InvalidValue(msg) => write!(f, "Invalid value: {}", msg),
            ConfigError::Parse(err) => write!(f, "Parse error: {}", err),
            ConfigError::IoError(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigError::Parse(err) => Some(err),
            ConfigError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err)
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

/// Page buffer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Size of one page in bytes
    pub page_size: usize,
    /// Initial number of page slots
    pub buffer_size: usize,
    /// Busy percentage of capacity that starts eviction
    pub evict_high_water_pct: i64,
    /// Busy percentage of capacity eviction drains down to
    pub evict_low_water_pct: i64,
    /// Number of fill worker threads
    pub num_fillers: usize,
    /// Number of flusher threads
    pub num_evictors: usize,
    /// Seconds between monitor reports, 0 disables the monitor
    pub monitor_freq_secs: u64,
    /// Seconds between adaptive resize epochs, 0 disables resizing
    pub adapt_freq_secs: u64,
    /// Available memory the resizer leaves untouched, in KB
    pub mem_margin_kb: u64,
    /// Slack added to the resize lookahead, in bytes
    pub resize_slack_bytes: u64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            buffer_size: 1024,
            evict_high_water_pct: 90,
            evict_low_water_pct: 70,
            num_fillers: cpus,
            num_evictors: cpus,
            monitor_freq_secs: 0,
            adapt_freq_secs: 0,
            mem_margin_kb: DEFAULT_MEM_MARGIN_KB,
            resize_slack_bytes: DEFAULT_RESIZE_SLACK_BYTES,
        }
    }
}

impl BufferConfig {
    /// Environment variables recognised by [`BufferConfig::apply_env`]
    pub const ENV_BUFSIZE: &'static str = "PAGEBUF_BUFSIZE";
    pub const ENV_PAGESIZE: &'static str = "PAGEBUF_PAGESIZE";
    pub const ENV_HIGH_WATER: &'static str = "PAGEBUF_EVICT_HIGH_WATER_THRESHOLD";
    pub const ENV_LOW_WATER: &'static str = "PAGEBUF_EVICT_LOW_WATER_THRESHOLD";
    pub const ENV_FILLERS: &'static str = "PAGEBUF_PAGE_FILLERS";
    pub const ENV_EVICTORS: &'static str = "PAGEBUF_PAGE_EVICTORS";
    pub const ENV_MONITOR_FREQ: &'static str = "PAGEBUF_MONITOR_FREQ";
    pub const ENV_ADAPT_FREQ: &'static str = "PAGEBUF_ADAPT_FREQ";

    /// Parses a JSON document; missing fields keep their defaults
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: BufferConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON config file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Default configuration with environment overrides applied
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies overrides from `lookup`, which maps a variable name to its value
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(format!("{}={}", key, value)))
        }

        if let Some(v) = lookup(Self::ENV_BUFSIZE) {
            self.buffer_size = parse(Self::ENV_BUFSIZE, v)?;
        }
        if let Some(v) = lookup(Self::ENV_PAGESIZE) {
            self.page_size = parse(Self::ENV_PAGESIZE, v)?;
        }
        if let Some(v) = lookup(Self::ENV_HIGH_WATER) {
            self.evict_high_water_pct = parse(Self::ENV_HIGH_WATER, v)?;
        }
        if let Some(v) = lookup(Self::ENV_LOW_WATER) {
            self.evict_low_water_pct = parse(Self::ENV_LOW_WATER, v)?;
        }
        if let Some(v) = lookup(Self::ENV_FILLERS) {
            self.num_fillers = parse(Self::ENV_FILLERS, v)?;
        }
        if let Some(v) = lookup(Self::ENV_EVICTORS) {
            self.num_evictors = parse(Self::ENV_EVICTORS, v)?;
        }
        if let Some(v) = lookup(Self::ENV_MONITOR_FREQ) {
            self.monitor_freq_secs = parse(Self::ENV_MONITOR_FREQ, v)?;
        }
        if let Some(v) = lookup(Self::ENV_ADAPT_FREQ) {
            self.adapt_freq_secs = parse(Self::ENV_ADAPT_FREQ, v)?;
        }
        Ok(())
    }

    /// Checks every field for a usable value
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_percentage("evict_high_water_pct", self.evict_high_water_pct)?;
        check_percentage("evict_low_water_pct", self.evict_low_water_pct)?;
        if self.evict_low_water_pct > self.evict_high_water_pct {
            return Err(ConfigError::InvalidValue(format!(
                "low water mark {}% above high water mark {}%",
                self.evict_low_water_pct, self.evict_high_water_pct
            )));
        }
        // The evict manager drains only while busy pages exceed the low mark
        if self.evict_low_water_pct >= 100 {
            return Err(ConfigError::InvalidValue(format!(
                "low water mark {}% leaves nothing to evict",
                self.evict_low_water_pct
            )));
        }
        if self.page_size == 0 || !self.page_size.is_power_of_two() {
            return Err(ConfigError::InvalidValue(format!(
                "page size {} is not a power of two",
                self.page_size
            )));
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::InvalidValue("buffer size is zero".to_string()));
        }
        if self.num_fillers == 0 || self.num_evictors == 0 {
            return Err(ConfigError::InvalidValue(
                "worker pools need at least one thread".to_string(),
            ));
        }
        Ok(())
    }
}

fn check_percentage(name: &'static str, pct: i64) -> Result<(), ConfigError> {
    if !(0..=100).contains(&pct) {
        return Err(ConfigError::InvalidPercentage(name, pct));
    }
    Ok(())
}
