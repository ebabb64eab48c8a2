//! Pipeline sizing and limits.

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use sluice_common::{Result, error::Error, verify_arg};

/// Default capacity of the task and result buffers.
pub const DEFAULT_BUFFER_CAPACITY: usize = 64;

/// Tunables of a [`Pipeline`](crate::Pipeline).
///
/// Every field is optional in serialized form and falls back to its default:
///
/// ```json
/// { "workers": 8, "task_capacity": 16, "result_capacity": 16, "timeout_ms": 5000 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Number of worker threads. Defaults to the available parallelism.
    pub workers: usize,
    /// Capacity of the buffer between the producer and the workers.
    pub task_capacity: usize,
    /// Capacity of the buffer between the workers and the aggregator.
    pub result_capacity: usize,
    /// Bound on the whole run, in milliseconds. `None` means no bound.
    pub timeout_ms: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            workers: default_workers(),
            task_capacity: DEFAULT_BUFFER_CAPACITY,
            result_capacity: DEFAULT_BUFFER_CAPACITY,
            timeout_ms: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<PipelineConfig> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<PipelineConfig> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::io(path.display().to_string(), e))?;
        PipelineConfig::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        verify_arg!(workers, self.workers > 0);
        verify_arg!(task_capacity, self.task_capacity > 0);
        verify_arg!(result_capacity, self.result_capacity > 0);
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_common::error::ErrorKind;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = PipelineConfig::from_json_str(r#"{ "workers": 3, "timeout_ms": 250 }"#)
            .unwrap();
        assert_eq!(config.workers, 3);
        assert_eq!(config.task_capacity, DEFAULT_BUFFER_CAPACITY);
        assert_eq!(config.timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = PipelineConfig::from_json_str(r#"{ "workers": 0 }"#).unwrap_err();
        match err.kind() {
            ErrorKind::InvalidArgument { name, .. } => assert_eq!(name, "workers"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = PipelineConfig::from_json_str(r#"{ "threads": 4 }"#).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Config { .. }));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(&path, r#"{ "result_capacity": 2 }"#).unwrap();
        let config = PipelineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.result_capacity, 2);
        assert!(config.workers > 0);

        let missing = PipelineConfig::from_json_file(dir.path().join("missing.json"));
        assert!(matches!(missing.unwrap_err().kind(), ErrorKind::Io { .. }));
    }
}
