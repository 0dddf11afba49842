use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default filename prefix for heap artifacts.
pub const DEFAULT_HEAP_PREFIX: &str = "heapdump";
/// Default filename prefix for stack-report artifacts.
///
/// The spelling is a wire contract with existing dump parsers; do not change.
pub const DEFAULT_STACK_PREFIX: &str = "goroutinedump";

/// Top-level watchdog configuration.
///
/// Immutable after construction. Can be built in code or loaded from a TOML
/// file via [`WatchConfig::load`]. Validation happens once, when the config
/// is handed to [`crate::DumpService::new`] (or explicitly via
/// [`WatchConfig::validate`]).
#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    /// Directory all dump artifacts are written to. Must already exist and
    /// be writable; the watchdog never creates it.
    pub dump_dir: String,
    /// Sampling period shared by every enabled watcher, in milliseconds.
    pub sampling_interval_ms: u64,
    /// Master switch for the heap watchers.
    #[serde(default)]
    pub watch_heap: bool,
    /// Master switch for the task watchers.
    #[serde(default)]
    pub watch_tasks: bool,
    /// Heap thresholds; required when `watch_heap` is set.
    #[serde(default)]
    pub heap: Option<HeapWatchConfig>,
    /// Task thresholds; required when `watch_tasks` is set.
    #[serde(default)]
    pub tasks: Option<TaskWatchConfig>,
}

/// Heap watcher thresholds. A zero value disables that trigger.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HeapWatchConfig {
    /// Absolute live-heap threshold in bytes (0 = disabled).
    #[serde(default)]
    pub threshold_bytes: u64,
    /// Live-heap threshold as a fraction of total system memory,
    /// in [0, 1] (0 = disabled).
    #[serde(default)]
    pub threshold_fraction: f64,
    /// Filename prefix for heap artifacts (default `"heapdump"`).
    #[serde(default)]
    pub dump_prefix: Option<String>,
}

impl HeapWatchConfig {
    pub fn prefix(&self) -> &str {
        self.dump_prefix.as_deref().unwrap_or(DEFAULT_HEAP_PREFIX)
    }
}

/// Task watcher thresholds. A zero value disables that trigger.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskWatchConfig {
    /// Live-task count threshold (0 = disabled).
    #[serde(default)]
    pub count_threshold: usize,
    /// How long a task's stack must stay bit-identical before it is
    /// classified as hanging, in milliseconds (0 = disabled).
    #[serde(default)]
    pub hanging_dwell_ms: u64,
    /// Filename prefix for stack-report artifacts (default `"goroutinedump"`).
    #[serde(default)]
    pub dump_prefix: Option<String>,
}

impl TaskWatchConfig {
    pub fn prefix(&self) -> &str {
        self.dump_prefix.as_deref().unwrap_or(DEFAULT_STACK_PREFIX)
    }
}

/// Errors detected while loading or validating a [`WatchConfig`].
#[derive(Debug)]
pub enum ConfigError {
    /// `watch_heap` is set but no `[heap]` block was provided.
    MissingHeapBlock,
    /// `watch_tasks` is set but no `[tasks]` block was provided.
    MissingTaskBlock,
    /// Heap watching enabled with both `threshold_bytes` and
    /// `threshold_fraction` zero.
    HeapThresholdsDisabled,
    /// `threshold_fraction` outside [0, 1].
    FractionOutOfRange { fraction: f64 },
    /// Task watching enabled with both `count_threshold` and
    /// `hanging_dwell_ms` zero.
    TaskThresholdsDisabled,
    /// `sampling_interval_ms` is zero.
    ZeroInterval,
    /// `dump_dir` is empty.
    EmptyDumpDir,
    /// Failed to read the config file.
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to parse the config file as TOML.
    Parse { source: toml::de::Error },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingHeapBlock => {
                write!(f, "watch_heap is set but the heap block is missing")
            }
            ConfigError::MissingTaskBlock => {
                write!(f, "watch_tasks is set but the tasks block is missing")
            }
            ConfigError::HeapThresholdsDisabled => {
                write!(
                    f,
                    "heap watching enabled but threshold_bytes and threshold_fraction are both 0"
                )
            }
            ConfigError::FractionOutOfRange { fraction } => {
                write!(
                    f,
                    "threshold_fraction must be within [0, 1], got {}",
                    fraction
                )
            }
            ConfigError::TaskThresholdsDisabled => {
                write!(
                    f,
                    "task watching enabled but count_threshold and hanging_dwell_ms are both 0"
                )
            }
            ConfigError::ZeroInterval => write!(f, "sampling_interval_ms cannot be 0"),
            ConfigError::EmptyDumpDir => write!(f, "dump_dir cannot be empty"),
            ConfigError::Read { path, source } => {
                write!(
                    f,
                    "failed to read config file {}: {}",
                    path.display(),
                    source
                )
            }
            ConfigError::Parse { source } => write!(f, "failed to parse config file: {}", source),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source } => Some(source),
            _ => None,
        }
    }
}

impl WatchConfig {
    /// Load and validate a config from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: WatchConfig =
            toml::from_str(&raw).map_err(|source| ConfigError::Parse { source })?;
        config.validate()?;
        Ok(config)
    }

    /// Check the config invariants.
    ///
    /// Pure: the verdict depends only on the config values, so repeated
    /// calls always agree.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watch_heap {
            let heap = self.heap.as_ref().ok_or(ConfigError::MissingHeapBlock)?;
            if heap.threshold_bytes == 0 && heap.threshold_fraction == 0.0 {
                return Err(ConfigError::HeapThresholdsDisabled);
            }
            if !(0.0..=1.0).contains(&heap.threshold_fraction) {
                return Err(ConfigError::FractionOutOfRange {
                    fraction: heap.threshold_fraction,
                });
            }
        }
        if self.watch_tasks {
            let tasks = self.tasks.as_ref().ok_or(ConfigError::MissingTaskBlock)?;
            if tasks.count_threshold == 0 && tasks.hanging_dwell_ms == 0 {
                return Err(ConfigError::TaskThresholdsDisabled);
            }
        }
        if self.sampling_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if self.dump_dir.is_empty() {
            return Err(ConfigError::EmptyDumpDir);
        }
        Ok(())
    }
}
