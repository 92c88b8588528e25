use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeederConfig {
    /// Shared work table file; created (or recreated) at startup.
    pub table_path: PathBuf,
    /// Number of slots in the table.
    pub capacity: u32,
    /// Unsent results fetched per database query.
    pub batch_size: usize,
    /// Delay between fill passes.
    pub poll_interval: Duration,
    /// Extra sleep after a pass that loaded nothing.
    pub idle_backoff: Duration,
    /// Directory watched for `quit` and `reread_db` trigger files.
    pub trigger_dir: PathBuf,
}

impl Default for FeederConfig {
    fn default() -> Self {
        Self {
            table_path: PathBuf::from("./worktab"),
            capacity: 100,
            batch_size: 100,
            poll_interval: Duration::from_millis(1000),
            idle_backoff: Duration::from_millis(5000),
            trigger_dir: PathBuf::from("."),
        }
    }
}
