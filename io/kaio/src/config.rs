//! Benchmark configuration.
//!
//! Describes the context to open, the workload to drive through it, and how
//! to log. Every field has a default, so an empty file is a valid config.

use crate::builder::DEFAULT_MAX_EVENTS;
use crate::engine::Engine;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Configuration loaded from a TOML file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Context settings
    #[serde(default)]
    pub context: ContextConfig,

    /// Workload settings
    #[serde(default)]
    pub workload: WorkloadConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Context settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContextConfig {
    /// Engine: "auto", "native" or "emulated"
    #[serde(default)]
    pub engine: Engine,

    /// Maximum concurrently in-flight requests
    #[serde(default = "default_max_events")]
    pub max_events: usize,

    /// Worker threads for the emulated engine
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            engine: Engine::default(),
            max_events: default_max_events(),
            workers: default_workers(),
        }
    }
}

/// Workload settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkloadConfig {
    /// File to operate on. A scratch file is created when unset.
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Size of the region exercised (e.g., "64MB")
    #[serde(default = "default_file_size", deserialize_with = "deserialize_size")]
    pub file_size: usize,

    /// Size of each read or write (e.g., "4KB")
    #[serde(default = "default_block_size", deserialize_with = "deserialize_size")]
    pub block_size: usize,

    /// Total requests to complete
    #[serde(default = "default_requests")]
    pub requests: u64,

    /// Requests per submit call
    #[serde(default = "default_batch")]
    pub batch: usize,

    /// Target number of requests kept in flight
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Fraction of requests that are writes, 0.0 to 1.0
    #[serde(default)]
    pub write_ratio: f64,

    /// Timeout for each completion poll in milliseconds; negative waits forever
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: i64,

    /// Cancel every in-flight request once the workload is submitted
    #[serde(default)]
    pub cancel: bool,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            file: None,
            file_size: default_file_size(),
            block_size: default_block_size(),
            requests: default_requests(),
            batch: default_batch(),
            queue_depth: default_queue_depth(),
            write_ratio: 0.0,
            timeout_ms: default_timeout_ms(),
            cancel: false,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable, multi-line
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
    /// Human readable, single line
    Compact,
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Level filter, e.g. "info" or "kaio=debug". RUST_LOG takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Format: "pretty", "json" or "compact"
    #[serde(default)]
    pub format: LogFormat,

    /// Include timestamps
    #[serde(default = "default_true")]
    pub timestamps: bool,

    /// Include the event target
    #[serde(default)]
    pub target: bool,

    /// Include thread names
    #[serde(default)]
    pub thread_names: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            timestamps: true,
            target: false,
            thread_names: false,
        }
    }
}

// Default value functions

fn default_max_events() -> usize {
    DEFAULT_MAX_EVENTS
}

fn default_workers() -> usize {
    4
}

fn default_file_size() -> usize {
    64 * 1024 * 1024 // 64MB
}

fn default_block_size() -> usize {
    4096
}

fn default_requests() -> u64 {
    100_000
}

fn default_batch() -> usize {
    16
}

fn default_queue_depth() -> usize {
    64
}

fn default_timeout_ms() -> i64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

/// Deserialize a size string like "64MB" or "4KB" into bytes.
fn deserialize_size<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SizeValue {
        Number(usize),
        String(String),
    }

    match SizeValue::deserialize(deserializer)? {
        SizeValue::Number(n) => Ok(n),
        SizeValue::String(s) => parse_size(&s).map_err(D::Error::custom),
    }
}

/// Parse a size string like "4KB", "64MB" or "1GB" into bytes.
pub fn parse_size(s: &str) -> Result<usize, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size string".to_string());
    }

    let (num_str, suffix) = match s.find(|c: char| c.is_alphabetic()) {
        Some(idx) => (&s[..idx], s[idx..].to_uppercase()),
        None => (s, String::new()),
    };

    let num: usize = num_str
        .trim()
        .parse()
        .map_err(|_| format!("invalid number: {}", num_str))?;

    let multiplier: usize = match suffix.as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => 1024 * 1024,
        "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
        _ => return Err(format!("unknown size suffix: {}", suffix)),
    };

    num.checked_mul(multiplier)
        .ok_or_else(|| "size overflow".to_string())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.context.max_events == 0 || self.context.max_events > u32::MAX as usize {
            return invalid(format!(
                "max_events ({}) must be between 1 and {}",
                self.context.max_events,
                u32::MAX
            ));
        }

        let w = &self.workload;
        if w.block_size == 0 {
            return invalid("block_size must be positive".to_string());
        }
        if w.file_size < w.block_size {
            return invalid(format!(
                "file_size ({}) must be at least block_size ({})",
                w.file_size, w.block_size
            ));
        }
        if w.batch == 0 {
            return invalid("batch must be positive".to_string());
        }
        if w.queue_depth == 0 {
            return invalid("queue_depth must be positive".to_string());
        }
        if w.queue_depth > self.context.max_events {
            return invalid(format!(
                "queue_depth ({}) must not exceed max_events ({})",
                w.queue_depth, self.context.max_events
            ));
        }
        if !(0.0..=1.0).contains(&w.write_ratio) {
            return invalid(format!(
                "write_ratio ({}) must be between 0.0 and 1.0",
                w.write_ratio
            ));
        }

        Ok(())
    }

    /// Number of whole blocks in the exercised region.
    pub fn blocks(&self) -> u64 {
        (self.workload.file_size / self.workload.block_size) as u64
    }
}

/// Annotated configuration with every default spelled out.
pub const DEFAULT_CONFIG: &str = r#"[context]
# "auto", "native" or "emulated"
engine = "auto"
max_events = 128
# worker threads for the emulated engine
workers = 4

[workload]
# file = "/path/to/file"  (a scratch file is created when unset)
file_size = "64MB"
block_size = "4KB"
requests = 100000
batch = 16
queue_depth = 64
write_ratio = 0.0
# negative waits forever
timeout_ms = 1000
cancel = false

[logging]
level = "info"
# "pretty", "json" or "compact"
format = "pretty"
timestamps = true
target = false
thread_names = false
"#;
