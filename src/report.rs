/// Run report: the timestamps and resource assignments of every task and
/// kernel, for downstream analysis (latency, throughput, utilization).
use crate::engine::SimTime;
use crate::error::Result;
use crate::kernel::KernelStatus;
use crate::simulator::System;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    pub id: usize,
    pub tag: String,
    pub query: String,
    pub index: usize,
    pub generated_at: Option<SimTime>,
    pub queued_at: Option<SimTime>,
    pub scheduled_at: Option<SimTime>,
    pub done_at: Option<SimTime>,
    /// Kernel ids in dependency order
    pub kernels: Vec<usize>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct KernelRecord {
    pub id: usize,
    /// Owning task id
    pub task: usize,
    pub tag: String,
    pub app: String,
    pub status: KernelStatus,
    /// Runtime of the chosen candidate
    pub runtime: Option<SimTime>,
    pub scheduled_at: Option<SimTime>,
    pub done_at: Option<SimTime>,
    pub cores: Vec<usize>,
    pub banks: Vec<usize>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RunReport {
    pub architecture: String,
    pub workload: String,
    pub policy: String,
    pub partition: String,
    /// Virtual time when the run stopped
    pub end_time: SimTime,
    pub tasks: Vec<TaskRecord>,
    pub kernels: Vec<KernelRecord>,
}

impl RunReport {
    pub fn collect(architecture: &str, workload: &str, world: &System, end_time: SimTime) -> Self {
        let tasks = world
            .tasks
            .tasks()
            .iter()
            .map(|t| TaskRecord {
                id: t.id.0,
                tag: t.tag.clone(),
                query: t.query.clone(),
                index: t.index,
                generated_at: t.generated_at,
                queued_at: t.queued_at,
                scheduled_at: t.scheduled_at,
                done_at: t.done_at,
                kernels: t.kernels.iter().map(|k| k.0).collect(),
            })
            .collect();
        let kernels = world
            .tasks
            .kernels()
            .iter()
            .map(|k| KernelRecord {
                id: k.id.0,
                task: k.task.0,
                tag: k.tag.clone(),
                app: k.app.clone(),
                status: k.status,
                runtime: k.config.as_ref().map(|c| c.runtime),
                scheduled_at: k.scheduled_at,
                done_at: k.done_at,
                cores: k.cores.clone(),
                banks: k.banks.clone(),
            })
            .collect();

        RunReport {
            architecture: architecture.to_string(),
            workload: workload.to_string(),
            policy: world.scheduler.policy_name().to_string(),
            partition: world.accelerator.partition.to_string(),
            end_time,
            tasks,
            kernels,
        }
    }

    pub fn task(&self, tag: &str) -> Option<&TaskRecord> {
        self.tasks.iter().find(|t| t.tag == tag)
    }

    pub fn kernel(&self, tag: &str) -> Option<&KernelRecord> {
        self.kernels.iter().find(|k| k.tag == tag)
    }

    pub fn completed_tasks(&self) -> usize {
        self.tasks.iter().filter(|t| t.done_at.is_some()).count()
    }

    pub fn completed_kernels(&self) -> usize {
        self.kernels
            .iter()
            .filter(|k| k.status == KernelStatus::Done)
            .count()
    }

    /// Completion time of the last finished task.
    pub fn makespan(&self) -> Option<SimTime> {
        self.tasks.iter().filter_map(|t| t.done_at).max()
    }

    /// Mean generate-to-done latency over completed tasks.
    pub fn mean_latency(&self) -> Option<f64> {
        let latencies: Vec<SimTime> = self
            .tasks
            .iter()
            .filter_map(|t| Some(t.done_at? - t.generated_at?))
            .collect();
        if latencies.is_empty() {
            return None;
        }
        Some(latencies.iter().sum::<SimTime>() as f64 / latencies.len() as f64)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}
