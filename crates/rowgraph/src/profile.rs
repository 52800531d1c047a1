//! Query profiling sinks.
//!
//! When profiling is enabled every executor call is timed and reported to a
//! [`ProfileSink`]. A failing sink is logged and otherwise ignored; it never
//! fails the query it was reporting on.

use rowgraph_core::{ConfigError, Error, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// One profiled executor call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryProfile {
    pub elapsed: Duration,
    /// Rendered statement, placeholders unbound
    pub sql: String,
    /// What issued the call, e.g. `Post::find_all`
    pub context: String,
}

/// Receives query profiles.
pub trait ProfileSink: Send + Sync {
    fn record(&self, profile: &QueryProfile) -> Result<()>;
}

/// Emits each profile as a `tracing` event at INFO level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ProfileSink for TracingSink {
    fn record(&self, profile: &QueryProfile) -> Result<()> {
        tracing::info!(
            target: "rowgraph::profile",
            elapsed_us = u64::try_from(profile.elapsed.as_micros()).unwrap_or(u64::MAX),
            sql = %profile.sql,
            context = %profile.context,
            "Query profile"
        );
        Ok(())
    }
}

/// Appends a `Time / SQL / Context` block per query to a log file.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProfileSink for FileSink {
    fn record(&self, profile: &QueryProfile) -> Result<()> {
        // Keep blocks from concurrent sessions sharing this sink contiguous.
        let _guard = self
            .lock
            .lock()
            .map_err(|_| Error::Custom("profile log lock poisoned".to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| io_error(&self.path, e))?;

        write!(
            file,
            "Time: {:.6}s\nSQL: {}\nContext: {}\n\n",
            profile.elapsed.as_secs_f64(),
            profile.sql,
            profile.context
        )
        .map_err(|e| io_error(&self.path, e))
    }
}

fn io_error(path: &Path, e: std::io::Error) -> Error {
    ConfigError::new(format!("cannot write profile log {}: {}", path.display(), e))
        .with_source(e)
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> QueryProfile {
        QueryProfile {
            elapsed: Duration::from_millis(2),
            sql: "SELECT t.* FROM posts t".to_string(),
            context: "Post::find".to_string(),
        }
    }

    #[test]
    fn test_file_sink_appends_blocks() {
        let path = std::env::temp_dir().join(format!(
            "rowgraph-profile-{}-{:?}.log",
            std::process::id(),
            std::thread::current().id()
        ));
        let _ = std::fs::remove_file(&path);

        let sink = FileSink::new(&path);
        sink.record(&profile()).unwrap();
        sink.record(&profile()).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.matches("SQL: SELECT t.* FROM posts t\n").count(), 2);
        assert!(contents.starts_with("Time: 0.002000s\n"));
        assert!(contents.contains("Context: Post::find\n"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_file_sink_reports_unwritable_path() {
        let sink = FileSink::new("/nonexistent-dir/for/rowgraph/profile.log");
        assert!(sink.record(&profile()).is_err());
    }

    #[test]
    fn test_tracing_sink_never_fails() {
        assert!(TracingSink.record(&profile()).is_ok());
    }
}
