//! Whole-run scenarios driven through the public API and JSON config files.

use anyhow::Result;
use prsim::app::{AppConfig, AppPool};
use prsim::config::{self, ArchitectureConfig, ArrivalConfig, QueryConfig, WorkloadConfig};
use prsim::error::SimError;
use prsim::kernel::{KernelSpec, KernelStatus};
use prsim::metrics::read_metrics;
use prsim::report::RunReport;
use prsim::scheduler::SchedulingPolicy;
use prsim::simulator::Simulator;
use std::path::PathBuf;

//==============================================================================
// Helpers
//==============================================================================

fn scratch(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("prsim_{}_{}", std::process::id(), name))
}

fn write_json<T: serde::Serialize>(name: &str, value: &T) -> Result<PathBuf> {
    let path = scratch(name);
    std::fs::write(&path, serde_json::to_string_pretty(value)?)?;
    Ok(path)
}

fn with_partition(partition: &str) -> ArchitectureConfig {
    ArchitectureConfig {
        name: format!("amber-{}", partition),
        partition: partition.to_string(),
        ..ArchitectureConfig::amber()
    }
}

//==============================================================================
// Scenarios
//==============================================================================

#[test]
fn json_configs_drive_a_full_run() -> Result<()> {
    let arch_path = write_json("arch.json", &ArchitectureConfig::amber())?;
    let workload_path = write_json("workload.json", &WorkloadConfig::demo())?;
    let pool_path = write_json("apps.json", &AppPool::demo())?;

    let arch: ArchitectureConfig = config::load(&arch_path)?;
    let workload: WorkloadConfig = config::load(&workload_path)?;
    let pool: AppPool = config::load(&pool_path)?;
    for path in [arch_path, workload_path, pool_path] {
        std::fs::remove_file(path)?;
    }

    let mut simulator = Simulator::new(&arch, &workload, pool, "round_robin".parse()?)?;
    let report = simulator.run(None)?;
    assert_eq!(report.policy, "round_robin");
    assert_eq!(report.partition, "variable");
    assert_eq!(report.completed_tasks(), simulator.expected_tasks());

    // Every kernel of a task starts no earlier than the task was queued.
    for task in &report.tasks {
        for kernel in task.kernels.iter().map(|&id| &report.kernels[id]) {
            assert!(kernel.scheduled_at >= task.queued_at, "{}", kernel.tag);
            assert!(kernel.done_at <= task.done_at, "{}", kernel.tag);
        }
    }
    Ok(())
}

#[test]
fn every_non_fixed_partition_completes_the_demo() -> Result<()> {
    let workload = WorkloadConfig::demo();
    for partition in ["variable", "flexible", "full_flexible"] {
        let mut simulator = Simulator::new(
            &with_partition(partition),
            &workload,
            AppPool::demo(),
            SchedulingPolicy::Greedy,
        )?;
        let report = simulator.run(None)?;
        assert_eq!(report.partition, partition);
        assert_eq!(report.completed_tasks(), simulator.expected_tasks(), "{}", partition);
        assert!(report.kernels.iter().all(|k| k.status == KernelStatus::Done));
    }
    Ok(())
}

#[test]
fn fixed_partition_rejects_wide_candidates() -> Result<()> {
    let mut simulator = Simulator::new(
        &with_partition("fixed"),
        &WorkloadConfig::demo(),
        AppPool::demo(),
        SchedulingPolicy::Greedy,
    )?;
    assert!(matches!(
        simulator.run(None),
        Err(SimError::FixedWidthExceeded { width, .. }) if width > 1
    ));
    Ok(())
}

#[test]
fn bad_names_are_reported() {
    assert!(matches!(
        "lottery".parse::<SchedulingPolicy>(),
        Err(SimError::UnknownPolicy(_))
    ));
    let result = Simulator::new(
        &with_partition("diagonal"),
        &WorkloadConfig::demo(),
        AppPool::demo(),
        SchedulingPolicy::Greedy,
    );
    assert!(matches!(result, Err(SimError::UnknownPartition(_))));
}

#[test]
fn dependent_kernels_run_in_order() -> Result<()> {
    let mut pool = AppPool::new();
    pool.add("unit", AppConfig::new(1, 1, 1, 1, 10));
    let workload = WorkloadConfig {
        name: "chain".to_string(),
        queue_capacity: 2,
        schedule_delay: 3,
        seed: 0,
        queries: vec![QueryConfig {
            name: "chain".to_string(),
            arrival: ArrivalConfig::manual(vec![0]),
            kernels: vec![
                KernelSpec::new("last", "unit", &["middle"]),
                KernelSpec::new("first", "unit", &[]),
                KernelSpec::new("middle", "unit", &["first"]),
            ],
        }],
    };
    let mut simulator = Simulator::new(&ArchitectureConfig::amber_flexible(), &workload, pool, SchedulingPolicy::Greedy)?;
    let report = simulator.run(None)?;

    let tags: Vec<&str> = report.tasks[0]
        .kernels
        .iter()
        .map(|&id| report.kernels[id].tag.as_str())
        .collect();
    assert_eq!(tags, vec!["chain#0_first", "chain#0_middle", "chain#0_last"]);

    // Each kernel waits for its predecessor plus one scheduling delay.
    let done = |tag: &str| report.kernel(tag).and_then(|k| k.done_at);
    assert_eq!(done("chain#0_first"), Some(13));
    assert_eq!(done("chain#0_middle"), Some(26));
    assert_eq!(done("chain#0_last"), Some(39));
    assert_eq!(report.task("chain#0").and_then(|t| t.done_at), Some(39));
    Ok(())
}

#[test]
fn report_and_live_snapshot_are_written() -> Result<()> {
    let live = scratch("live.json");
    let mut simulator = Simulator::new(
        &ArchitectureConfig::amber(),
        &WorkloadConfig::demo(),
        AppPool::demo(),
        SchedulingPolicy::Fcfs,
    )?
    .with_live_metrics(&live);
    let report = simulator.run(None)?;

    let snapshot = read_metrics(&live).ok_or_else(|| anyhow::anyhow!("no live snapshot"))?;
    std::fs::remove_file(&live)?;
    assert_eq!(snapshot.status, "complete");
    assert_eq!(snapshot.scheduling_policy, "fcfs");
    assert_eq!(snapshot.tasks_done, simulator.expected_tasks());
    assert_eq!(snapshot.cores.len(), 64);
    assert_eq!(snapshot.kernels_running, 0);

    let path = scratch("report.json");
    report.write(&path)?;
    let back: RunReport = config::load(&path)?;
    std::fs::remove_file(&path)?;
    assert_eq!(back, report);
    Ok(())
}
