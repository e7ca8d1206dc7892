/// Live metrics for the TUI visualizer.
///
/// The scheduler publishes a JSON snapshot after every reconcile and every
/// dispatch when live metrics are enabled. The viz binary polls this file
/// and re-renders the dashboard.
/// Writes are atomic (write to .tmp then rename) to avoid torn reads.
use crate::components::ComponentStatus;
use crate::engine::SimTime;
use crate::simulator::System;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const METRICS_PATH: &str = "/tmp/prsim_live.json";

// ---------------------------------------------------------------------------
// Snapshot types
// ---------------------------------------------------------------------------

/// One grid cell as drawn by the heatmap.
#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq, Eq)]
pub struct CoreSnapshot {
    pub status: ComponentStatus,
    /// Owning kernel id, if any
    #[serde(default)]
    pub kernel: Option<usize>,
}

#[derive(Serialize, Deserialize, Default, Clone, Debug)]
pub struct LiveMetrics {
    /// "running" | "complete" | "stopped"
    pub status: String,
    pub architecture: String,
    pub workload: String,
    pub scheduling_policy: String,
    pub partition: String,
    /// Virtual time of the snapshot
    pub sim_time: SimTime,
    /// [height, width]
    pub grid: [usize; 2],
    /// Row-major, one entry per core
    pub cores: Vec<CoreSnapshot>,
    pub banks_used: usize,
    pub banks_total: usize,
    /// Fraction of cores in use [0.0, 1.0]
    pub utilization: f64,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub kernels_running: usize,
    /// Committed but not yet dispatched
    pub kernels_committed: usize,
    pub tasks_done: usize,
    pub tasks_expected: usize,
    /// Unix timestamp in ms when this snapshot was written
    pub timestamp_ms: u64,
}

impl LiveMetrics {
    pub fn capture(world: &System, workload: &str, tasks_expected: usize, now: SimTime, status: &str) -> Self {
        let acc = &world.accelerator;
        LiveMetrics {
            status: status.to_string(),
            architecture: acc.name.clone(),
            workload: workload.to_string(),
            scheduling_policy: world.scheduler.policy_name().to_string(),
            partition: acc.partition.to_string(),
            sim_time: now,
            grid: [acc.grid_height, acc.grid_width],
            cores: acc
                .cores()
                .iter()
                .map(|c| CoreSnapshot {
                    status: c.status,
                    kernel: c.kernel.map(|k| k.0),
                })
                .collect(),
            banks_used: acc.banks().iter().filter(|b| !b.is_idle()).count(),
            banks_total: acc.banks().len(),
            utilization: acc.utilization(),
            queue_depth: world.queue.len(),
            queue_capacity: world.queue.capacity(),
            kernels_running: acc.running_kernels().len(),
            kernels_committed: world.scheduler.committed().len(),
            tasks_done: world
                .tasks
                .tasks()
                .iter()
                .filter(|t| t.done_at.is_some())
                .count(),
            tasks_expected,
            timestamp_ms: now_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// I/O helpers
// ---------------------------------------------------------------------------

/// Atomically write metrics to `path`.
/// Uses a .tmp intermediate file + rename to avoid torn reads by the viz.
pub fn write_metrics(path: &Path, metrics: &LiveMetrics) -> std::io::Result<()> {
    let json = serde_json::to_string(metrics)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)
}

/// Read the latest metrics snapshot. Returns None if the file doesn't exist
/// or can't be parsed (e.g. no simulation has run yet).
pub fn read_metrics(path: &Path) -> Option<LiveMetrics> {
    let data = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&data).ok()
}

/// Returns current Unix time in milliseconds.
pub fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
