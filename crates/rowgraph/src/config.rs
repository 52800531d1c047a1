//! Session configuration.
//!
//! Configuration can be built in code, parsed from JSON, or read from the
//! environment:
//!
//! - `ROWGRAPH_PROFILE=1` - Enable per-query profiling
//! - `ROWGRAPH_PROFILE_LOG=/path/to/file` - Append profiles to a log file
//!   instead of emitting them as tracing events (implies profiling)

use rowgraph_core::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

/// Environment variable enabling profiling.
pub const PROFILE_ENV: &str = "ROWGRAPH_PROFILE";
/// Environment variable naming the profile log file.
pub const PROFILE_LOG_ENV: &str = "ROWGRAPH_PROFILE_LOG";

/// Default number of lazy loads of one relation before the N+1 warning.
pub const DEFAULT_LAZY_LOAD_WARN_THRESHOLD: usize = 3;

/// Runtime options of a [`Session`](crate::Session).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Report every executor call to the profiling sink
    pub profiling: bool,
    /// Profile log file; `None` profiles through `tracing`
    pub profile_log: Option<PathBuf>,
    /// Lazy loads of one relation on one entity type before warning.
    /// Zero disables the warning.
    pub lazy_load_warn_threshold: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            profiling: false,
            profile_log: None,
            lazy_load_warn_threshold: DEFAULT_LAZY_LOAD_WARN_THRESHOLD,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document. Missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            ConfigError::new(format!("invalid session configuration: {}", e))
                .with_source(e)
                .into()
        })
    }

    /// Read and parse a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::new(format!("cannot read {}: {}", path.display(), e)).with_source(e)
        })?;
        Self::from_json(&json)
    }

    /// Defaults overridden by `ROWGRAPH_PROFILE` and `ROWGRAPH_PROFILE_LOG`.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply the environment variables on top of this configuration.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = env::var(PROFILE_ENV) {
            self.profiling = is_truthy(&v);
        }
        if let Some(path) = env::var_os(PROFILE_LOG_ENV).filter(|p| !p.is_empty()) {
            self.profile_log = Some(PathBuf::from(path));
            self.profiling = true;
        }
        self
    }

    pub fn profiling(mut self, enabled: bool) -> Self {
        self.profiling = enabled;
        self
    }

    /// Profile into `path`; enables profiling.
    pub fn profile_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.profile_log = Some(path.into());
        self.profiling = true;
        self
    }

    pub fn lazy_load_warn_threshold(mut self, threshold: usize) -> Self {
        self.lazy_load_warn_threshold = threshold;
        self
    }
}

fn is_truthy(v: &str) -> bool {
    let v = v.to_lowercase();
    v == "1" || v == "true" || v == "yes" || v == "on"
}
