/// Top-level simulator.
/// Models a reconfigurable accelerator serving a stream of kernel-graph
/// tasks: generators feed the bounded task queue, the scheduler places ready
/// kernels on the grid, and the accelerator runs them and reports back.
use crate::accelerator::Accelerator;
use crate::app::AppPool;
use crate::config::{ArchitectureConfig, WorkloadConfig};
use crate::engine::{Engine, Sim, SimTime};
use crate::error::Result;
use crate::generator::{ArrivalPlan, QueryGenerator};
use crate::kernel::KernelId;
use crate::logging::ComponentLog;
use crate::metrics::{LiveMetrics, write_metrics};
use crate::report::RunReport;
use crate::scheduler::{SchedulerLoop, SchedulerState, SchedulingPolicy};
use crate::task::{TaskArena, TaskId, dependency_order};
use crate::task_queue::TaskQueue;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use std::path::PathBuf;

/// Payload carried by simulation events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// A task entered the queue
    Arrived(TaskId),
    /// A kernel finished and released its resources
    KernelDone(KernelId),
}

/// Engine handle as seen by the simulator's processes.
pub type SimCtx = Sim<System, Signal>;

/// Everything the simulation processes share.
pub struct System {
    pub accelerator: Accelerator,
    pub queue: TaskQueue,
    pub tasks: TaskArena,
    pub pool: AppPool,
    pub scheduler: SchedulerState,
    /// Live snapshot target, if enabled
    live: Option<LiveSink>,
}

struct LiveSink {
    path: PathBuf,
    workload: String,
    expected_tasks: usize,
}

impl System {
    pub fn new(
        arch: &ArchitectureConfig,
        pool: AppPool,
        queue_capacity: usize,
        schedule_delay: SimTime,
        policy: SchedulingPolicy,
        sim: &mut SimCtx,
    ) -> Result<Self> {
        Ok(System {
            accelerator: Accelerator::new(arch, sim)?,
            queue: TaskQueue::new(queue_capacity, sim)?,
            tasks: TaskArena::new(),
            pool,
            scheduler: SchedulerState::new(policy, schedule_delay),
            live: None,
        })
    }

    /// Writes a live snapshot if a sink is configured.
    pub fn publish(&self, now: SimTime) {
        self.publish_status(now, "running");
    }

    fn publish_status(&self, now: SimTime, status: &str) {
        if let Some(sink) = &self.live {
            let snapshot = LiveMetrics::capture(self, &sink.workload, sink.expected_tasks, now, status);
            if let Err(err) = write_metrics(&sink.path, &snapshot) {
                ComponentLog::new("metrics").warn(
                    now,
                    format_args!("cannot write {}: {}", sink.path.display(), err),
                );
            }
        }
    }
}

/// A configured simulation, ready to run.
pub struct Simulator {
    engine: Engine<System, Signal>,
    architecture: String,
    workload: String,
    expected_tasks: usize,
    log: ComponentLog,
}

impl Simulator {
    /// Wires the world and spawns the scheduler plus one generator per
    /// query. Arrival plans are drawn here, from the workload seed.
    pub fn new(
        arch: &ArchitectureConfig,
        workload: &WorkloadConfig,
        pool: AppPool,
        policy: SchedulingPolicy,
    ) -> Result<Self> {
        let mut sim = SimCtx::new();
        let world = System::new(
            arch,
            pool,
            workload.queue_capacity,
            workload.schedule_delay,
            policy,
            &mut sim,
        )?;
        let mut engine = Engine { sim, world };

        engine.spawn(SchedulerLoop::new());

        let mut rng = SmallRng::seed_from_u64(workload.seed);
        let mut expected_tasks = 0;
        for query in &workload.queries {
            dependency_order(&query.name, &query.kernels)?;
            let plan = ArrivalPlan::from_config(&query.name, &query.arrival, &mut rng)?;
            expected_tasks += plan.size();
            engine.spawn(QueryGenerator::new(&query.name, query.kernels.clone(), plan));
        }

        let log = ComponentLog::new("simulator");
        log.info(
            0,
            format_args!(
                "{} on {} ({}x{}, {} banks, {} partition), policy {}, {} task(s) expected",
                workload.name,
                arch.name,
                arch.grid_height,
                arch.grid_width,
                arch.num_banks,
                engine.world.accelerator.partition,
                policy,
                expected_tasks
            ),
        );

        Ok(Simulator {
            engine,
            architecture: arch.name.clone(),
            workload: workload.name.clone(),
            expected_tasks,
            log,
        })
    }

    /// Publishes live snapshots to `path` while running.
    pub fn with_live_metrics(mut self, path: impl Into<PathBuf>) -> Self {
        self.engine.world.live = Some(LiveSink {
            path: path.into(),
            workload: self.workload.clone(),
            expected_tasks: self.expected_tasks,
        });
        self
    }

    pub fn now(&self) -> SimTime {
        self.engine.now()
    }

    pub fn world(&self) -> &System {
        &self.engine.world
    }

    pub fn expected_tasks(&self) -> usize {
        self.expected_tasks
    }

    /// Runs until the agenda drains (or until `until`) and reports.
    pub fn run(&mut self, until: Option<SimTime>) -> Result<RunReport> {
        self.engine.run(until)?;
        let report = RunReport::collect(&self.architecture, &self.workload, &self.engine.world, self.now());
        let status = if report.completed_tasks() == self.expected_tasks {
            "complete"
        } else {
            "stopped"
        };
        self.engine.world.publish_status(self.now(), status);
        self.log.info(
            self.now(),
            format_args!(
                "{}: {}/{} task(s) done, {} kernel(s) run",
                status,
                report.completed_tasks(),
                self.expected_tasks,
                report.completed_kernels()
            ),
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::AppConfig;
    use crate::components::CoreShape;
    use crate::config::{ArrivalConfig, QueryConfig};
    use crate::error::SimError;
    use crate::kernel::{KernelSpec, KernelStatus};

    /// A single-row flexible strip with plenty of banks.
    fn strip(columns: usize) -> ArchitectureConfig {
        ArchitectureConfig {
            name: "strip".to_string(),
            grid_height: 1,
            grid_width: columns,
            num_banks: 32,
            partition: "flexible".to_string(),
            core: CoreShape::default(),
        }
    }

    fn workload(capacity: usize, arrival: ArrivalConfig, kernels: Vec<KernelSpec>) -> WorkloadConfig {
        WorkloadConfig {
            name: "test".to_string(),
            queue_capacity: capacity,
            schedule_delay: 0,
            seed: 0,
            queries: vec![QueryConfig {
                name: "q".to_string(),
                arrival,
                kernels,
            }],
        }
    }

    fn single(app: &str) -> Vec<KernelSpec> {
        vec![KernelSpec::new("k", app, &[])]
    }

    fn run(
        arch: &ArchitectureConfig,
        workload: &WorkloadConfig,
        pool: AppPool,
        policy: SchedulingPolicy,
    ) -> anyhow::Result<RunReport> {
        let mut simulator = Simulator::new(arch, workload, pool, policy)?;
        Ok(simulator.run(None)?)
    }

    #[test]
    fn back_to_back_tasks_on_a_full_grid() -> anyhow::Result<()> {
        let mut pool = AppPool::new();
        pool.add("full", AppConfig::new(1, 8, 1, 1, 50));
        let report = run(
            &strip(8),
            &workload(4, ArrivalConfig::manual(vec![50, 50]), single("full")),
            pool,
            SchedulingPolicy::Greedy,
        )?;

        let first = report.task("q#0").ok_or_else(|| anyhow::anyhow!("missing q#0"))?;
        assert_eq!(first.generated_at, Some(50));
        assert_eq!(first.scheduled_at, Some(50));
        assert_eq!(first.done_at, Some(100));

        let second = report.task("q#1").ok_or_else(|| anyhow::anyhow!("missing q#1"))?;
        assert_eq!(second.generated_at, Some(100));
        assert_eq!(second.scheduled_at, Some(100));
        assert_eq!(second.done_at, Some(150));
        assert_eq!(report.makespan(), Some(150));
        Ok(())
    }

    #[test]
    fn arrival_waits_for_busy_grid() -> anyhow::Result<()> {
        let mut pool = AppPool::new();
        pool.add("full", AppConfig::new(1, 8, 1, 1, 100));
        let report = run(
            &strip(8),
            &workload(4, ArrivalConfig::manual(vec![50, 50]), single("full")),
            pool,
            SchedulingPolicy::Greedy,
        )?;

        let second = report.task("q#1").ok_or_else(|| anyhow::anyhow!("missing q#1"))?;
        assert_eq!(second.queued_at, Some(100));
        assert_eq!(second.scheduled_at, Some(150));
        assert_eq!(second.done_at, Some(250));

        let kernel = report.kernel("q#1_k").ok_or_else(|| anyhow::anyhow!("missing q#1_k"))?;
        assert_eq!(kernel.status, KernelStatus::Done);
        assert_eq!(kernel.cores, (0..8).collect::<Vec<_>>());
        Ok(())
    }

    #[test]
    fn arrival_during_delay_carries_commits_over() -> anyhow::Result<()> {
        let mut pool = AppPool::new();
        pool.add("unit", AppConfig::new(1, 1, 1, 1, 10));
        let workload = WorkloadConfig {
            schedule_delay: 10,
            ..workload(4, ArrivalConfig::manual(vec![0, 5]), single("unit"))
        };
        let report = run(&strip(4), &workload, pool, SchedulingPolicy::Greedy)?;

        // the pass started at 0 is cut short at 5; its commit keeps its stamp
        // and its cores, and goes out with the pass started at 5
        let first = report.kernel("q#0_k").ok_or_else(|| anyhow::anyhow!("missing q#0_k"))?;
        assert_eq!(first.scheduled_at, Some(0));
        assert_eq!(first.cores, vec![0]);
        assert_eq!(first.done_at, Some(25));

        let second = report.kernel("q#1_k").ok_or_else(|| anyhow::anyhow!("missing q#1_k"))?;
        assert_eq!(second.scheduled_at, Some(5));
        assert_eq!(second.cores, vec![1]);
        assert_eq!(second.done_at, Some(25));
        Ok(())
    }

    fn mixed_pool() -> AppPool {
        let mut pool = AppPool::new();
        pool.add("wide", AppConfig::new(1, 3, 1, 1, 10));
        pool.add("unit", AppConfig::new(1, 1, 1, 1, 10));
        pool
    }

    fn mixed_kernels() -> Vec<KernelSpec> {
        vec![
            KernelSpec::new("w1", "wide", &[]),
            KernelSpec::new("w2", "wide", &[]),
            KernelSpec::new("u", "unit", &[]),
        ]
    }

    #[test]
    fn greedy_backfills_past_a_misfit() -> anyhow::Result<()> {
        let report = run(
            &strip(4),
            &workload(1, ArrivalConfig::manual(vec![0]), mixed_kernels()),
            mixed_pool(),
            SchedulingPolicy::Greedy,
        )?;
        let scheduled = |tag: &str| report.kernel(tag).and_then(|k| k.scheduled_at);
        assert_eq!(scheduled("q#0_w1"), Some(0));
        assert_eq!(scheduled("q#0_u"), Some(0));
        assert_eq!(scheduled("q#0_w2"), Some(10));
        assert_eq!(report.task("q#0").and_then(|t| t.done_at), Some(20));
        Ok(())
    }

    #[test]
    fn fcfs_stops_at_the_first_misfit() -> anyhow::Result<()> {
        let report = run(
            &strip(4),
            &workload(1, ArrivalConfig::manual(vec![0]), mixed_kernels()),
            mixed_pool(),
            SchedulingPolicy::Fcfs,
        )?;
        let scheduled = |tag: &str| report.kernel(tag).and_then(|k| k.scheduled_at);
        assert_eq!(scheduled("q#0_w1"), Some(0));
        assert_eq!(scheduled("q#0_w2"), Some(10));
        assert_eq!(scheduled("q#0_u"), Some(10));
        assert_eq!(report.task("q#0").and_then(|t| t.done_at), Some(20));
        Ok(())
    }

    #[test]
    fn stream_waits_for_completion_then_delay() -> anyhow::Result<()> {
        let mut pool = AppPool::new();
        pool.add("unit", AppConfig::new(1, 1, 1, 1, 10));
        let report = run(
            &strip(4),
            &workload(4, ArrivalConfig::stream(5, 2, 7), single("unit")),
            pool,
            SchedulingPolicy::Greedy,
        )?;

        assert_eq!(report.task("q#0").and_then(|t| t.done_at), Some(15));
        let second = report.task("q#1").ok_or_else(|| anyhow::anyhow!("missing q#1"))?;
        assert_eq!(second.generated_at, Some(22));
        assert_eq!(second.done_at, Some(32));
        assert_eq!(report.completed_tasks(), 2);
        Ok(())
    }

    #[test]
    fn blocked_puts_shorten_the_next_offset() -> anyhow::Result<()> {
        let mut pool = AppPool::new();
        pool.add("unit", AppConfig::new(1, 1, 1, 1, 25));
        let report = run(
            &strip(4),
            &workload(1, ArrivalConfig::fixed(0, 10, 3), single("unit")),
            pool,
            SchedulingPolicy::Greedy,
        )?;

        let second = report.task("q#1").ok_or_else(|| anyhow::anyhow!("missing q#1"))?;
        assert_eq!(second.generated_at, Some(10));
        assert_eq!(second.queued_at, Some(25));

        // blocked for 15 ticks against a 10 tick interval: no extra wait
        let third = report.task("q#2").ok_or_else(|| anyhow::anyhow!("missing q#2"))?;
        assert_eq!(third.generated_at, Some(25));
        assert_eq!(third.queued_at, Some(50));
        assert_eq!(third.done_at, Some(75));
        Ok(())
    }

    #[test]
    fn unknown_app_aborts_the_run() -> anyhow::Result<()> {
        let mut simulator = Simulator::new(
            &strip(4),
            &workload(4, ArrivalConfig::manual(vec![0]), single("missing")),
            AppPool::new(),
            SchedulingPolicy::Greedy,
        )?;
        assert!(matches!(simulator.run(None), Err(SimError::NoAppConfig(app)) if app == "missing"));
        Ok(())
    }

    #[test]
    fn cyclic_query_is_rejected_upfront() {
        let kernels = vec![
            KernelSpec::new("a", "unit", &["b"]),
            KernelSpec::new("b", "unit", &["a"]),
        ];
        let result = Simulator::new(
            &strip(4),
            &workload(4, ArrivalConfig::manual(vec![0]), kernels),
            mixed_pool(),
            SchedulingPolicy::Greedy,
        );
        assert!(matches!(result, Err(SimError::DependencyCycle { .. })));
    }

    #[test]
    fn demo_workload_completes_under_every_policy() -> anyhow::Result<()> {
        let workload = WorkloadConfig::demo();
        for policy in [
            SchedulingPolicy::Greedy,
            SchedulingPolicy::Fcfs,
            SchedulingPolicy::RoundRobin,
        ] {
            let mut simulator = Simulator::new(&ArchitectureConfig::amber(), &workload, AppPool::demo(), policy)?;
            let report = simulator.run(None)?;
            assert_eq!(report.completed_tasks(), simulator.expected_tasks(), "{}", policy);
            assert_eq!(report.completed_kernels(), report.kernels.len(), "{}", policy);
            assert!(simulator.world().queue.is_empty());
            assert_eq!(simulator.world().accelerator.utilization(), 0.0);
        }
        Ok(())
    }

    #[test]
    fn seeded_runs_are_reproducible() -> anyhow::Result<()> {
        let workload = WorkloadConfig::demo();
        let first = run(
            &ArchitectureConfig::amber_flexible(),
            &workload,
            AppPool::demo(),
            SchedulingPolicy::Greedy,
        )?;
        let second = run(
            &ArchitectureConfig::amber_flexible(),
            &workload,
            AppPool::demo(),
            SchedulingPolicy::Greedy,
        )?;
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn until_stops_early() -> anyhow::Result<()> {
        let mut pool = AppPool::new();
        pool.add("full", AppConfig::new(1, 8, 1, 1, 100));
        let mut simulator = Simulator::new(
            &strip(8),
            &workload(4, ArrivalConfig::manual(vec![50, 50]), single("full")),
            pool,
            SchedulingPolicy::Greedy,
        )?;
        let report = simulator.run(Some(120))?;
        assert_eq!(report.end_time, 120);
        assert_eq!(report.completed_tasks(), 0);
        assert_eq!(report.kernel("q#0_k").map(|k| k.status), Some(KernelStatus::Running));
        Ok(())
    }
}
