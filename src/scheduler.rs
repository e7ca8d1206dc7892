/// Kernel scheduling.
///
/// The scheduler is a reactive loop that sleeps until something changes on
/// the system (a task was admitted or a kernel finished), reconciles that
/// change, and runs a scheduling pass:
///
///   WAIT -> RECONCILE -> SELECT -> COMMIT -> (delay) -> DISPATCH -> WAIT
///
/// SELECT and COMMIT are delegated to a `KernelScheduler` policy working
/// through a `Planner`, which knows how to find the best placement for a
/// kernel and how to commit it. Three policies are implemented:
///   - Greedy      every ready kernel in queue order, skipping what does not fit
///   - FCFS        queue order, stopping at the first kernel that does not fit
///   - RoundRobin  one kernel per task per round, rotating the starting task
///
/// The pass then sleeps for the fixed scheduling overhead before dispatching
/// what it committed. A new arrival during that sleep interrupts the pass;
/// commits are durable, so whatever it committed is dispatched by the next
/// pass.
use crate::accelerator::{Accelerator, Mapping};
use crate::app::{AppConfig, AppPool};
use crate::engine::{EventId, Process, ProcessHandle, SimTime, Step, Wake};
use crate::error::{Result, SimError};
use crate::kernel::KernelId;
use crate::logging::ComponentLog;
use crate::simulator::{Signal, SimCtx, System};
use crate::task::{TaskArena, TaskId};
use crate::task_queue::TaskQueue;
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

/// A kernel whose dependencies are satisfied, as offered to a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyKernel {
    pub kernel: KernelId,
    pub task: TaskId,
}

// ---------------------------------------------------------------------------
// Planner
// ---------------------------------------------------------------------------

/// Placement helper handed to policies for one pass.
pub struct Planner<'a> {
    accelerator: &'a mut Accelerator,
    tasks: &'a mut TaskArena,
    pool: &'a AppPool,
    queue: &'a TaskQueue,
    now: SimTime,
    log: ComponentLog,
}

impl<'a> Planner<'a> {
    pub fn new(
        accelerator: &'a mut Accelerator,
        tasks: &'a mut TaskArena,
        pool: &'a AppPool,
        queue: &'a TaskQueue,
        now: SimTime,
    ) -> Self {
        Planner {
            accelerator,
            tasks,
            pool,
            queue,
            now,
            log: ComponentLog::new("scheduler"),
        }
    }

    /// Ready kernels of every queued task, in queue order.
    pub fn ready(&self) -> Vec<ReadyKernel> {
        self.queue
            .ready_kernels(self.tasks)
            .into_iter()
            .map(|kernel| ReadyKernel {
                kernel,
                task: self.tasks.kernel(kernel).task,
            })
            .collect()
    }

    /// The mappable candidate with the lowest runtime; the earlier candidate
    /// wins ties. An app without any candidate is fatal.
    pub fn best_candidate(&self, kernel: KernelId) -> Result<Option<(AppConfig, Mapping)>> {
        let app = &self.tasks.kernel(kernel).app;
        let candidates = self.pool.get(app);
        if candidates.is_empty() {
            return Err(SimError::NoAppConfig(app.clone()));
        }

        let mut best: Option<(AppConfig, Mapping)> = None;
        for candidate in candidates {
            let Some(mapping) = self.accelerator.map(app, candidate)? else {
                continue;
            };
            let better = best
                .as_ref()
                .is_none_or(|(chosen, _)| candidate.runtime < chosen.runtime);
            if better {
                best = Some((candidate.clone(), mapping));
            }
        }
        Ok(best)
    }

    /// Fixes the configuration, allocates the mapping and marks the kernel
    /// RUNNING.
    pub fn commit(&mut self, kernel: KernelId, config: AppConfig, mapping: Mapping) -> Result<()> {
        let record = self.tasks.kernel_mut(kernel);
        let runtime = config.runtime;
        record.config = Some(config);
        self.accelerator.allocate(record, mapping)?;
        self.log.info(
            self.now,
            format_args!(
                "{} -> cores {:?} banks {:?} (runtime {})",
                record.tag, record.cores, record.banks, runtime
            ),
        );
        self.queue.on_kernel_scheduled(self.tasks, kernel, self.now)
    }

    /// Places `kernel` if any candidate fits. Returns false if none does.
    pub fn try_schedule(&mut self, kernel: KernelId) -> Result<bool> {
        match self.best_candidate(kernel)? {
            Some((config, mapping)) => {
                self.commit(kernel, config, mapping)?;
                Ok(true)
            }
            None => {
                self.log.debug(
                    self.now,
                    format_args!("{} does not fit right now", self.tasks.kernel(kernel).tag),
                );
                Ok(false)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

/// Trait for kernel selection policies.
pub trait KernelScheduler: Send {
    /// Given the ready kernels in queue order, place as many as the policy
    /// allows through `planner` and return the committed ones in commit order.
    fn select_kernels(&mut self, ready: &[ReadyKernel], planner: &mut Planner<'_>) -> Result<Vec<KernelId>>;

    fn name(&self) -> &'static str;
}

/// Tries every ready kernel in queue order; kernels that do not fit are
/// skipped so smaller ones behind them can still start.
#[derive(Debug, Default)]
pub struct GreedyScheduler;

impl GreedyScheduler {
    pub fn new() -> Self {
        GreedyScheduler
    }
}

impl KernelScheduler for GreedyScheduler {
    fn select_kernels(&mut self, ready: &[ReadyKernel], planner: &mut Planner<'_>) -> Result<Vec<KernelId>> {
        let mut selected = Vec::new();
        for candidate in ready {
            if planner.try_schedule(candidate.kernel)? {
                selected.push(candidate.kernel);
            }
        }
        Ok(selected)
    }

    fn name(&self) -> &'static str {
        "greedy"
    }
}

/// Strict queue order: the first kernel that does not fit blocks every
/// kernel behind it until the next pass.
#[derive(Debug, Default)]
pub struct FcfsScheduler;

impl FcfsScheduler {
    pub fn new() -> Self {
        FcfsScheduler
    }
}

impl KernelScheduler for FcfsScheduler {
    fn select_kernels(&mut self, ready: &[ReadyKernel], planner: &mut Planner<'_>) -> Result<Vec<KernelId>> {
        let mut selected = Vec::new();
        for candidate in ready {
            if !planner.try_schedule(candidate.kernel)? {
                break;
            }
            selected.push(candidate.kernel);
        }
        Ok(selected)
    }

    fn name(&self) -> &'static str {
        "fcfs"
    }
}

/// Takes one kernel from each task in turn. Each pass starts with the task
/// after the one that got the last placement, so a task with many ready
/// kernels cannot starve the others.
#[derive(Debug, Default)]
pub struct RoundRobinScheduler {
    last_task: Option<TaskId>,
}

impl RoundRobinScheduler {
    pub fn new() -> Self {
        RoundRobinScheduler { last_task: None }
    }

    /// Per-task kernel lists, rotated to start after `last_task`.
    fn rotate(&self, ready: &[ReadyKernel]) -> Vec<(TaskId, VecDeque<KernelId>)> {
        let mut groups: Vec<(TaskId, VecDeque<KernelId>)> = Vec::new();
        for candidate in ready {
            match groups.iter_mut().find(|(task, _)| *task == candidate.task) {
                Some((_, kernels)) => kernels.push_back(candidate.kernel),
                None => groups.push((candidate.task, VecDeque::from([candidate.kernel]))),
            }
        }

        let start = match self.last_task {
            None => 0,
            Some(last) => match groups.iter().position(|(task, _)| *task == last) {
                Some(pos) => pos + 1,
                // task ids grow with arrival, so resume with the next newer one
                None => groups.iter().position(|(task, _)| *task > last).unwrap_or(0),
            },
        };
        if !groups.is_empty() {
            let start = start % groups.len();
            groups.rotate_left(start);
        }
        groups
    }
}

impl KernelScheduler for RoundRobinScheduler {
    fn select_kernels(&mut self, ready: &[ReadyKernel], planner: &mut Planner<'_>) -> Result<Vec<KernelId>> {
        let mut groups = self.rotate(ready);
        let mut selected = Vec::new();
        loop {
            let mut progressed = false;
            for (task, kernels) in groups.iter_mut() {
                let Some(kernel) = kernels.pop_front() else {
                    continue;
                };
                progressed = true;
                if planner.try_schedule(kernel)? {
                    selected.push(kernel);
                    self.last_task = Some(*task);
                }
            }
            if !progressed {
                break;
            }
        }
        Ok(selected)
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

// ---------------------------------------------------------------------------
// Policy selector
// ---------------------------------------------------------------------------

/// Selectable kernel scheduling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingPolicy {
    #[default]
    Greedy,
    Fcfs,
    RoundRobin,
}

impl SchedulingPolicy {
    pub fn build(self) -> Box<dyn KernelScheduler> {
        match self {
            SchedulingPolicy::Greedy     => Box::new(GreedyScheduler::new()),
            SchedulingPolicy::Fcfs       => Box::new(FcfsScheduler::new()),
            SchedulingPolicy::RoundRobin => Box::new(RoundRobinScheduler::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SchedulingPolicy::Greedy     => "greedy",
            SchedulingPolicy::Fcfs       => "fcfs",
            SchedulingPolicy::RoundRobin => "round_robin",
        }
    }
}

impl FromStr for SchedulingPolicy {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "greedy" => Ok(SchedulingPolicy::Greedy),
            "fcfs" => Ok(SchedulingPolicy::Fcfs),
            "round_robin" | "rr" => Ok(SchedulingPolicy::RoundRobin),
            _ => Err(SimError::UnknownPolicy(s.to_string())),
        }
    }
}

impl fmt::Display for SchedulingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ---------------------------------------------------------------------------
// Scheduler processes
// ---------------------------------------------------------------------------

/// Scheduler state that lives in the world.
pub struct SchedulerState {
    policy: Box<dyn KernelScheduler>,
    /// Committed but not yet dispatched
    committed: Vec<KernelId>,
    /// Fixed overhead of a scheduling pass
    delay: SimTime,
    log: ComponentLog,
}

impl SchedulerState {
    pub fn new(policy: SchedulingPolicy, delay: SimTime) -> Self {
        SchedulerState {
            policy: policy.build(),
            committed: Vec::new(),
            delay,
            log: ComponentLog::new("scheduler"),
        }
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    pub fn committed(&self) -> &[KernelId] {
        &self.committed
    }

    pub fn delay(&self) -> SimTime {
        self.delay
    }
}

enum Phase {
    /// Watching (arrival, kernel_done)
    Idle { arrival: EventId, kernel_done: EventId },
    /// A pass is running; watching (pass exit, arrival)
    Scheduling { pass: ProcessHandle },
    /// An interrupted pass is winding down
    Draining,
}

/// The reactive scheduler loop. Spawn once per simulation.
pub struct SchedulerLoop {
    phase: Option<Phase>,
}

impl SchedulerLoop {
    pub fn new() -> Self {
        SchedulerLoop { phase: None }
    }

    fn wait(&mut self, world: &System) -> Step {
        let arrival = world.queue.arrival_event();
        let kernel_done = world.accelerator.kernel_done_event();
        self.phase = Some(Phase::Idle { arrival, kernel_done });
        Step::WaitAny(vec![arrival, kernel_done])
    }

    fn reconcile(
        &mut self,
        world: &mut System,
        sim: &mut SimCtx,
        wake: &Wake<Signal>,
        arrival: EventId,
        kernel_done: EventId,
    ) -> Result<()> {
        if let Some(Signal::KernelDone(kernel)) = wake.value_of(kernel_done) {
            let kernel = *kernel;
            let finished = world.queue.on_kernel_done(sim, &mut world.tasks, kernel)?;
            world.accelerator.acknowledge_kernel_done(sim)?;
            if let Some(task) = finished {
                world.scheduler.log.info(
                    sim.now(),
                    format_args!("{} completed", world.tasks.task(task).tag),
                );
            }
        }
        if wake.fired(arrival) {
            let batch = world.queue.take_arrival(sim);
            world.scheduler.log.debug(
                sim.now(),
                format_args!("{} new task(s), {} queued", batch.len(), world.queue.len()),
            );
        }
        world.publish(sim.now());
        Ok(())
    }
}

impl Default for SchedulerLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl Process<System, Signal> for SchedulerLoop {
    fn resume(&mut self, world: &mut System, sim: &mut SimCtx, wake: Wake<Signal>) -> Result<Step> {
        match self.phase.take() {
            None => Ok(self.wait(world)),
            Some(Phase::Idle { arrival, kernel_done }) => {
                self.reconcile(world, sim, &wake, arrival, kernel_done)?;
                let pass = sim.spawn(SchedulePass);
                let arrival = world.queue.arrival_event();
                self.phase = Some(Phase::Scheduling { pass });
                Ok(Step::WaitAny(vec![pass.exit, arrival]))
            }
            Some(Phase::Scheduling { pass }) => {
                if wake.fired(pass.exit) {
                    return Ok(self.wait(world));
                }
                world
                    .scheduler
                    .log
                    .debug(sim.now(), format_args!("new arrival, interrupting pass"));
                sim.interrupt(pass.pid)?;
                self.phase = Some(Phase::Draining);
                Ok(Step::Wait(pass.exit))
            }
            Some(Phase::Draining) => Ok(self.wait(world)),
        }
    }

    fn name(&self) -> &str {
        "scheduler"
    }
}

/// One SELECT/COMMIT/DISPATCH pass.
struct SchedulePass;

impl Process<System, Signal> for SchedulePass {
    fn resume(&mut self, world: &mut System, sim: &mut SimCtx, wake: Wake<Signal>) -> Result<Step> {
        match wake {
            Wake::Start => {
                let System {
                    accelerator,
                    tasks,
                    pool,
                    queue,
                    scheduler,
                    ..
                } = world;
                let mut planner = Planner::new(accelerator, tasks, pool, queue, sim.now());
                let ready = planner.ready();
                let selected = scheduler.policy.select_kernels(&ready, &mut planner)?;
                if !selected.is_empty() {
                    scheduler.log.debug(
                        sim.now(),
                        format_args!(
                            "{} committed {} of {} ready kernel(s)",
                            scheduler.policy.name(),
                            selected.len(),
                            ready.len()
                        ),
                    );
                }
                scheduler.committed.extend(selected);
                Ok(Step::Timeout(scheduler.delay))
            }
            Wake::Timeout => {
                for kernel in std::mem::take(&mut world.scheduler.committed) {
                    world.accelerator.execute(sim, world.tasks.kernel(kernel))?;
                }
                world.publish(sim.now());
                Ok(Step::Exit)
            }
            Wake::Interrupted => {
                world.scheduler.log.debug(
                    sim.now(),
                    format_args!(
                        "pass interrupted, {} commit(s) carried over",
                        world.scheduler.committed.len()
                    ),
                );
                Ok(Step::Exit)
            }
            other => Err(SimError::UnexpectedWake {
                process: self.name().to_string(),
                wake: other.kind(),
            }),
        }
    }

    fn name(&self) -> &str {
        "schedule_pass"
    }
}
