//! Generation settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for partitioning, planning, workers and composition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Upper bound on parallel workers
    pub worker_cap: usize,
    /// Target number of snapshots each worker owns
    pub snapshots_per_worker: usize,
    /// Run the ownership planner before dispatch
    pub planner_enabled: bool,
    /// Snapshots sent to the planner
    pub planner_sample: usize,
    /// Ask the model for the composition before falling back
    pub compose_enabled: bool,
    /// Snapshots sent to the composition call
    pub compose_sample: usize,
    /// Pause before a worker's single retry, in seconds
    pub worker_retry_delay_secs: u64,
    /// Output token ceiling per call
    pub max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            worker_cap: 5,
            snapshots_per_worker: 1,
            planner_enabled: true,
            planner_sample: 4,
            compose_enabled: true,
            compose_sample: 3,
            worker_retry_delay_secs: 2,
            max_output_tokens: 16_000,
        }
    }
}

impl GenerationConfig {
    pub fn worker_cap(mut self, cap: usize) -> Self {
        self.worker_cap = cap;
        self
    }

    pub fn snapshots_per_worker(mut self, count: usize) -> Self {
        self.snapshots_per_worker = count;
        self
    }

    pub fn planner(mut self, enabled: bool) -> Self {
        self.planner_enabled = enabled;
        self
    }

    pub fn compose(mut self, enabled: bool) -> Self {
        self.compose_enabled = enabled;
        self
    }

    pub fn retry_delay_secs(mut self, secs: u64) -> Self {
        self.worker_retry_delay_secs = secs;
        self
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.worker_retry_delay_secs)
    }
}
