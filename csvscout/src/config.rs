use config::{Config as ConfigBuilder, ConfigError, File};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

/// Configuration for a scan run.
///
/// # Configuration Locations
///
/// The configuration can be loaded from multiple locations in order of precedence:
/// 1. Custom config file specified via `--config` flag
/// 2. Local `.csvscout.yaml` in the current directory
/// 3. Global `$HOME/.config/csvscout/config.yaml`
///
/// # Configuration Format
///
/// The configuration uses YAML format. Example:
/// ```yaml
/// # Field/pattern pairs to count (patterns are case-insensitive regex)
/// patterns:
///   - field: "call description"
///     pattern: "hello"
///
/// # File to scan
/// file_path: "calls.csv"
///
/// # Field separator
/// delimiter: ","
///
/// # Run on the caller's thread instead of sharding across workers
/// single_lane: false
///
/// # Worker count for parallel runs (default: CPU cores)
/// thread_count: 4
///
/// # How to handle invalid UTF-8 (failfast or lossy)
/// encoding_mode: failfast
///
/// # Log level (trace, debug, info, warn, error)
/// log_level: "info"
/// ```
///
/// When using the CLI, command-line arguments take precedence over config
/// file values. The merging behavior is defined in the `merge_with_cli`
/// method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Field/pattern pairs to count occurrences of
    #[serde(default)]
    pub patterns: Vec<FieldPattern>,

    /// Path of the delimited file to scan
    #[serde(default)]
    pub file_path: PathBuf,

    /// Field separator character
    #[serde(default = "default_delimiter")]
    pub delimiter: char,

    /// Process the whole file on the caller's thread instead of sharding
    #[serde(default)]
    pub single_lane: bool,

    /// Number of shard workers for parallel runs
    /// Defaults to number of CPU cores if not specified
    #[serde(default = "default_thread_count")]
    pub thread_count: NonZeroUsize,

    /// How to handle invalid UTF-8 sequences in the input
    #[serde(default)]
    pub encoding_mode: EncodingMode,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// One query entry: a column name and a case-insensitive pattern to count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldPattern {
    pub field: String,
    pub pattern: String,
}

impl FieldPattern {
    /// Entry whose pattern is regex source text, used as-is.
    pub fn regex(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            pattern: pattern.into(),
        }
    }

    /// Entry matching literal text: regex metacharacters are escaped.
    pub fn literal(field: impl Into<String>, text: &str) -> Self {
        Self {
            field: field.into(),
            pattern: regex::escape(text),
        }
    }
}

/// How to handle invalid UTF-8 in the input stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodingMode {
    /// Fail the lane on the first invalid sequence
    #[default]
    FailFast,
    /// Replace invalid sequences and keep going
    Lossy,
}

/// Which processing path a run takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// One pipeline over the whole file, on the caller's thread
    SingleLane,
    /// The file's data lines sharded across this many worker threads
    Parallel(NonZeroUsize),
}

fn default_delimiter() -> char {
    ','
}

fn default_thread_count() -> NonZeroUsize {
    NonZeroUsize::new(num_cpus::get()).unwrap()
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            file_path: PathBuf::new(),
            delimiter: default_delimiter(),
            single_lane: false,
            thread_count: default_thread_count(),
            encoding_mode: EncodingMode::default(),
            log_level: default_log_level(),
        }
    }
}

impl ScanConfig {
    /// Loads configuration from the default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Loads configuration from a specific file
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        // Default config locations
        let config_files = [
            // Global config
            dirs::config_dir().map(|p| p.join("csvscout/config.yaml")),
            // Local config
            Some(PathBuf::from(".csvscout.yaml")),
            // Custom config
            config_path.map(PathBuf::from),
        ];

        // Add existing config files
        for path in config_files.iter().flatten() {
            if path.exists() {
                builder = builder.add_source(File::from(path.as_path()));
            }
        }

        // Build and deserialize
        builder.build()?.try_deserialize()
    }

    /// Merges CLI arguments with configuration file values
    pub fn merge_with_cli(mut self, cli_config: ScanConfig) -> Self {
        // CLI values take precedence over config file values
        if !cli_config.patterns.is_empty() {
            self.patterns = cli_config.patterns;
        }
        if cli_config.file_path != PathBuf::new() {
            self.file_path = cli_config.file_path;
        }
        if cli_config.delimiter != default_delimiter() {
            self.delimiter = cli_config.delimiter;
        }
        if cli_config.single_lane {
            self.single_lane = true;
        }
        // Always use CLI thread count if specified
        self.thread_count = cli_config.thread_count;
        if cli_config.encoding_mode != EncodingMode::default() {
            self.encoding_mode = cli_config.encoding_mode;
        }
        if cli_config.log_level != default_log_level() {
            self.log_level = cli_config.log_level;
        }
        self
    }

    /// The processing path this configuration selects.
    pub fn execution_mode(&self) -> ExecutionMode {
        if self.single_lane {
            ExecutionMode::SingleLane
        } else {
            ExecutionMode::Parallel(self.thread_count)
        }
    }

    /// The field separator as a single byte.
    pub fn delimiter_byte(&self) -> u8 {
        let mut buf = [0u8; 4];
        self.delimiter.encode_utf8(&mut buf);
        buf[0]
    }
}
