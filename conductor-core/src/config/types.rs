use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::policy::{CleanupPolicy, RetryPolicy};

/// Final configuration with defaults applied
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConductorConfig {
    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub cleanup: CleanupPolicy,

    #[serde(default)]
    pub process: ProcessConfig,

    #[serde(default)]
    pub orchestration: OrchestrationConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub persistence: PersistenceConfig,
}

/// How CLI subprocesses are launched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Path to the claude binary (defaults to "claude" on PATH)
    #[serde(default)]
    pub claude_path: Option<PathBuf>,

    /// Model used for decomposition requests
    #[serde(default = "default_decomposition_model")]
    pub decomposition_model: String,

    /// Model used by sub-agents
    #[serde(default = "default_worker_model")]
    pub worker_model: String,

    #[serde(default)]
    pub allowed_tools: Vec<String>,

    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            claude_path: None,
            decomposition_model: default_decomposition_model(),
            worker_model: default_worker_model(),
            allowed_tools: Vec::new(),
            working_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    /// Ask a model to merge sub-task results instead of concatenating them
    #[serde(default)]
    pub synthesize_with_model: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_monitor_interval", with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: default_monitor_interval(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Root of the file store (defaults to the XDG data directory)
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    #[serde(default = "default_snapshot_interval", with = "humantime_serde")]
    pub snapshot_interval: Duration,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            snapshot_interval: default_snapshot_interval(),
        }
    }
}

impl PersistenceConfig {
    /// Directory the file store lives in
    pub fn store_dir(&self) -> PathBuf {
        self.data_dir
            .as_ref()
            .map(|dir| dir.join("store"))
            .unwrap_or_else(conductor_paths::store_dir)
    }
}

fn default_decomposition_model() -> String {
    "haiku".to_string()
}

fn default_worker_model() -> String {
    "sonnet".to_string()
}

fn default_monitor_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_snapshot_interval() -> Duration {
    Duration::from_secs(60)
}
