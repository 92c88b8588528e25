//! Scheduler configuration
//!
//! Read once at process start, like everything else in the request pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedConfig {
    /// The shared work table file created by the feeder.
    pub table_path: PathBuf,
    /// Directory for per-host advisory lock files.
    pub lock_dir: PathBuf,
    /// Cap on results per reply.
    pub max_results_per_reply: usize,
    /// Cap on results sent to one host per day.
    pub daily_result_quota: u32,
    /// Reject work if this user already has a result of the workunit.
    #[serde(default)]
    pub one_result_per_user_per_wu: bool,
    /// Restrict redundant copies to hosts of the same OS/vendor class.
    #[serde(default)]
    pub homogeneous_redundancy: bool,
    /// Seconds the client should wait before retrying after an empty reply.
    #[serde(default = "default_retry_delay")]
    pub retry_delay: f64,
    /// Seconds the client should wait when the project is down.
    #[serde(default = "default_maintenance_delay")]
    pub maintenance_delay: f64,
}

fn default_retry_delay() -> f64 {
    3600.0
}

fn default_maintenance_delay() -> f64 {
    4.0 * 3600.0
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self {
            table_path: PathBuf::from("./grid-data/work_table"),
            lock_dir: PathBuf::from("./grid-data/locks"),
            max_results_per_reply: 10,
            daily_result_quota: 100,
            one_result_per_user_per_wu: false,
            homogeneous_redundancy: false,
            retry_delay: default_retry_delay(),
            maintenance_delay: default_maintenance_delay(),
        }
    }
}

impl SchedConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        std::fs::write(path.as_ref(), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
